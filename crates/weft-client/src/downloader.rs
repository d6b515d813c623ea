use std::net::IpAddr;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use url::Url;
use weft_core::{ComponentId, CrawlError, Downloader, Kind, Module, ModuleBase, Request, Response};

const USER_AGENT: &str = "weft/0.1 (+crawler)";

/// HTTP downloader using reqwest.
///
/// Any status code is a successful download; only transport failures are
/// errors. SSRF protection is **enabled** by default: requests whose host
/// resolves to a private or reserved address are refused. Use
/// [`allow_private_urls`](Self::allow_private_urls) to crawl local sites.
pub struct HttpDownloader {
    base: ModuleBase,
    client: Client,
    timeout_secs: u64,
    ssrf_protection: bool,
}

impl HttpDownloader {
    pub fn new(id: ComponentId) -> Result<Self, CrawlError> {
        Self::with_timeout(id, Duration::from_secs(30))
    }

    pub fn with_timeout(id: ComponentId, timeout: Duration) -> Result<Self, CrawlError> {
        if id.kind() != Kind::Downloader {
            return Err(CrawlError::InvalidParameter(format!(
                "{id} is not a downloader id"
            )));
        }
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Download(format!("cannot build http client: {e}")))?;

        Ok(Self {
            base: ModuleBase::new(id, None),
            client,
            timeout_secs: timeout.as_secs(),
            ssrf_protection: true,
        })
    }

    /// Disable SSRF protection, allowing requests to private/reserved IPs.
    pub fn allow_private_urls(mut self) -> Self {
        self.ssrf_protection = false;
        self
    }

    async fn fetch(&self, req: &Request) -> Result<Response, CrawlError> {
        if self.ssrf_protection {
            validate_url(&req.url).await?;
        }

        let mut builder = self.client.get(req.url.clone());
        for (name, value) in &req.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                CrawlError::Download(format!(
                    "timed out after {}s fetching {}",
                    self.timeout_secs, req.url
                ))
            } else if e.is_connect() {
                CrawlError::Download(format!("connection to {} failed: {e}", req.url))
            } else {
                CrawlError::Download(e.to_string())
            }
        })?;

        let url = response.url().clone();
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| CrawlError::Download(format!("cannot read body of {url}: {e}")))?;

        let mut resp = Response::new(url, status, Some(body.to_vec()), req.depth);
        resp.headers = headers;
        Ok(resp)
    }
}

impl Module for HttpDownloader {
    fn base(&self) -> &ModuleBase {
        &self.base
    }
}

#[async_trait]
impl Downloader for HttpDownloader {
    async fn download(&self, req: &Request) -> Result<Response, CrawlError> {
        let _guard = self.base.begin();
        if !req.is_valid() {
            return Err(CrawlError::InvalidParameter(format!(
                "request for {} has no host",
                req.url
            )));
        }
        self.base.incr_accepted();

        let resp = self.fetch(req).await?;
        tracing::debug!(id = %self.id(), url = %resp.url, status = resp.status, "Fetched page");
        self.base.incr_completed();
        Ok(resp)
    }
}

// ---------------------------------------------------------------------------
// SSRF protection
// ---------------------------------------------------------------------------

/// Refuse URLs that are not http(s) or whose host resolves to a private
/// or reserved address.
async fn validate_url(url: &Url) -> Result<(), CrawlError> {
    let refuse = |why: String| Err(CrawlError::Download(why));

    match url.scheme() {
        "http" | "https" => {}
        scheme => return refuse(format!("scheme '{scheme}' is not allowed")),
    }
    let Some(host) = url.host_str() else {
        return refuse(format!("{url} has no host"));
    };

    let literal = host.trim_start_matches('[').trim_end_matches(']');
    if let Ok(ip) = literal.parse::<IpAddr>() {
        if is_private_ip(ip) {
            return refuse(format!("SSRF blocked: {host} is a private/reserved address"));
        }
        return Ok(());
    }

    let port = url.port_or_known_default().unwrap_or(80);
    let addrs: Vec<_> = tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| CrawlError::Download(format!("DNS resolution failed for {host}: {e}")))?
        .collect();
    if addrs.is_empty() {
        return refuse(format!("DNS resolution returned no addresses for {host}"));
    }
    if let Some(addr) = addrs.iter().find(|a| is_private_ip(a.ip())) {
        return refuse(format!(
            "SSRF blocked: {host} resolves to private/reserved address {}",
            addr.ip()
        ));
    }
    Ok(())
}

fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            v4.is_loopback()
                || v4.is_private()
                || v4.is_link_local()
                || v4.is_unspecified()
                || v4.is_broadcast()
                || v4.is_documentation()
                // 100.64.0.0/10 (CGN)
                || (a == 100 && (b & 0xC0) == 64)
        }
        IpAddr::V6(v6) => {
            let first = v6.segments()[0];
            v6.is_loopback()
                || v6.is_unspecified()
                || (first & 0xFFC0) == 0xFE80
                || (first & 0xFE00) == 0xFC00
                || v6
                    .to_ipv4_mapped()
                    .is_some_and(|v4| is_private_ip(IpAddr::V4(v4)))
        }
    }
}
