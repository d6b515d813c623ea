//! Primary-domain derivation for scope checks.

use std::net::IpAddr;

use url::Url;

use crate::error::CrawlError;

/// Second-level public suffixes under which registrations happen one label
/// deeper (`example.co.uk`, not `co.uk`).
const MULTI_LABEL_SUFFIXES: &[&str] = &[
    "ac.jp", "ac.uk", "co.in", "co.jp", "co.kr", "co.nz", "co.uk", "co.za", "com.au", "com.br",
    "com.cn", "com.hk", "com.mx", "com.sg", "com.tr", "com.tw", "edu.au", "edu.cn", "gov.cn",
    "gov.uk", "ne.jp", "net.au", "net.cn", "or.jp", "org.au", "org.cn", "org.uk",
];

/// Registrable domain of a host: `news.example.com` → `example.com`,
/// `shop.example.co.uk` → `example.co.uk`. IP literals are returned as-is
/// and a trailing dot is ignored.
pub fn primary_domain(host: &str) -> Result<String, CrawlError> {
    let host = host.trim().trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        return Err(CrawlError::InvalidParameter("empty host".into()));
    }
    let bare = host.trim_start_matches('[').trim_end_matches(']');
    if bare.parse::<IpAddr>().is_ok() {
        return Ok(bare.to_string());
    }

    let labels: Vec<&str> = host.split('.').collect();
    if labels.iter().any(|l| l.is_empty()) {
        return Err(CrawlError::InvalidParameter(format!(
            "malformed host: {host}"
        )));
    }
    let keep = if labels.len() >= 3 {
        let suffix = labels[labels.len() - 2..].join(".");
        if MULTI_LABEL_SUFFIXES.contains(&suffix.as_str()) {
            3
        } else {
            2
        }
    } else {
        labels.len()
    };
    Ok(labels[labels.len() - keep..].join("."))
}

/// Primary domain of a URL's host.
pub fn primary_domain_of(url: &Url) -> Result<String, CrawlError> {
    let host = url
        .host_str()
        .ok_or_else(|| CrawlError::InvalidParameter(format!("URL has no host: {url}")))?;
    primary_domain(host)
}
