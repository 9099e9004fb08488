//! URL fetching and markup stripping for `url` requests.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use scraper::{Html, Node, Selector};

use crate::http;

/// Elements whose text never reaches the extracted content.
const SKIPPED_ELEMENTS: &[&str] = &[
    "script", "style", "noscript", "nav", "header", "footer", "svg", "template", "head", "iframe",
];

/// A fetched page reduced to readable text.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchedPage {
    /// Final URL after redirects.
    pub url: String,
    pub title: Option<String>,
    pub text: String,
}

#[async_trait]
pub trait UrlFetcher: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

pub struct HttpFetcher {
    client: reqwest::Client,
    max_retries: u32,
}

impl HttpFetcher {
    pub fn new(timeout_secs: u64, max_retries: u32) -> Result<Self> {
        Ok(Self {
            client: http::client(timeout_secs)?,
            max_retries,
        })
    }
}

#[async_trait]
impl UrlFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let parsed = reqwest::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        if !matches!(parsed.scheme(), "http" | "https") {
            bail!("Unsupported URL scheme: {}", parsed.scheme());
        }

        let response = http::send_with_retry("fetch", self.max_retries, || {
            self.client
                .get(parsed.clone())
                .header(reqwest::header::USER_AGENT, "adkb/0.1")
        })
        .await?;

        let final_url = response.url().to_string();
        let is_html = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.contains("html"))
            .unwrap_or(true);
        let body = response.text().await?;

        let (title, text) = if is_html {
            html_to_text(&body)
        } else {
            (None, normalize_whitespace(&body))
        };

        Ok(FetchedPage {
            url: final_url,
            title,
            text,
        })
    }
}

/// Extract the `<title>` and the visible body text of an HTML document.
pub fn html_to_text(html: &str) -> (Option<String>, String) {
    let document = Html::parse_document(html);

    let title = Selector::parse("title")
        .ok()
        .and_then(|sel| document.select(&sel).next())
        .map(|el| normalize_whitespace(&el.text().collect::<String>()))
        .filter(|t| !t.is_empty());

    let mut fragments: Vec<&str> = Vec::new();
    for node in document.root_element().descendants() {
        let Node::Text(text) = node.value() else {
            continue;
        };
        let hidden = node.ancestors().any(|a| {
            a.value()
                .as_element()
                .is_some_and(|e| SKIPPED_ELEMENTS.contains(&e.name()))
        });
        if !hidden {
            let t = text.trim();
            if !t.is_empty() {
                fragments.push(t);
            }
        }
    }

    (title, normalize_whitespace(&fragments.join(" ")))
}

fn normalize_whitespace(s: &str) -> String {
    s.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Confidence for scraped text: short pages are usually cookie walls,
/// error pages or navigation shells.
pub fn page_confidence(text: &str) -> f64 {
    match text.chars().count() {
        0 => 0.0,
        n if n < 200 => 0.5,
        n if n < 1000 => 0.75,
        _ => 0.9,
    }
}
