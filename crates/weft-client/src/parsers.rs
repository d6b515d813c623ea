//! Ready-made [`ParseResponse`] functions for HTML pages.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use htmd::HtmlToMarkdown;
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use url::Url;
use weft_core::{CrawlError, Data, Item, ParseResponse, Request, Response};

/// Tags whose content never reaches the markdown.
const SKIP_TAGS: [&str; 9] = [
    "script", "style", "nav", "footer", "header", "aside", "noscript", "iframe", "svg",
];

/// True when the response is a successful HTML page (or did not say).
pub fn is_html(resp: &Response) -> bool {
    if !(200..300).contains(&resp.status) {
        return false;
    }
    resp.header("content-type")
        .is_none_or(|ct| ct.to_ascii_lowercase().contains("html"))
}

/// Follows every `<a href>` on the page.
///
/// Links are resolved against the response URL, stripped of their fragment
/// and de-duplicated per page. Each becomes a request one level deeper.
/// Whether a link is crawled is up to the scheduler's gate.
pub fn link_parser() -> ParseResponse {
    Arc::new(|resp: &Response| {
        let Some(html) = resp.text().filter(|_| is_html(resp)) else {
            return (Vec::new(), Vec::new());
        };
        let (links, errors) = extract_links(&resp.url, &html);
        let data: Vec<Data> = links
            .into_iter()
            .map(|url| Data::Request(Request::new(url, resp.depth + 1)))
            .collect();
        (data, errors)
    })
}

/// Turns each HTML page into one item:
/// `url`, `status`, `depth`, `title`, `markdown`, `content_hash`, `fetched_at`.
pub fn page_parser() -> ParseResponse {
    let converter = Arc::new(HtmlToMarkdown::builder().skip_tags(SKIP_TAGS.to_vec()).build());
    Arc::new(move |resp: &Response| {
        let Some(html) = resp.text().filter(|_| is_html(resp)) else {
            return (Vec::new(), Vec::new());
        };
        let markdown = match converter.convert(&html) {
            Ok(md) => md,
            Err(e) => {
                return (
                    Vec::new(),
                    vec![CrawlError::Analyze(format!(
                        "cannot convert {} to markdown: {e}",
                        resp.url
                    ))],
                );
            }
        };

        let item = Item::new()
            .with("url", resp.url.as_str())
            .with("status", resp.status)
            .with("depth", resp.depth)
            .with("title", page_title(&html))
            .with("content_hash", compute_hash(&markdown))
            .with("markdown", markdown)
            .with("fetched_at", Utc::now().to_rfc3339());
        (vec![Data::Item(item)], Vec::new())
    })
}

fn extract_links(base: &Url, html: &str) -> (Vec<Url>, Vec<CrawlError>) {
    let document = Html::parse_document(html);
    let selector = match Selector::parse("a[href]") {
        Ok(s) => s,
        Err(e) => {
            return (
                Vec::new(),
                vec![CrawlError::Analyze(format!("bad link selector: {e}"))],
            );
        }
    };

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    let mut errors = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href").map(str::trim) else {
            continue;
        };
        if href.is_empty() || href.starts_with('#') {
            continue;
        }
        match base.join(href) {
            Ok(mut url) => {
                url.set_fragment(None);
                if seen.insert(url.as_str().to_string()) {
                    links.push(url);
                }
            }
            Err(e) => errors.push(CrawlError::Analyze(format!(
                "bad link {href:?} on {base}: {e}"
            ))),
        }
    }
    (links, errors)
}

fn page_title(html: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let selector = Selector::parse("title").ok()?;
    document
        .select(&selector)
        .next()
        .map(|t| t.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// SHA-256 of a string as 64-char hex.
pub fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}
