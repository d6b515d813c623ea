//! Values that flow between the scheduler's buffer pools.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use url::Url;

/// A page to fetch, with the crawl depth it was discovered at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Request {
    pub url: Url,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    pub depth: u32,
}

impl Request {
    pub fn new(url: Url, depth: u32) -> Self {
        Self {
            url,
            headers: Vec::new(),
            depth,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// A request is only dispatchable when its URL names a host.
    pub fn is_valid(&self) -> bool {
        self.url.host_str().is_some_and(|h| !h.is_empty())
    }
}

/// A fetched page. `depth` is inherited from the originating request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub url: Url,
    pub status: u16,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
    pub depth: u32,
}

impl Response {
    pub fn new(url: Url, status: u16, body: Option<Vec<u8>>, depth: u32) -> Self {
        Self {
            url,
            status,
            headers: Vec::new(),
            body,
            depth,
        }
    }

    pub fn is_valid(&self) -> bool {
        self.body.is_some()
    }

    /// First header with the given name, compared case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Body decoded as UTF-8, replacing invalid sequences.
    pub fn text(&self) -> Option<String> {
        self.body
            .as_deref()
            .map(|b| String::from_utf8_lossy(b).into_owned())
    }
}

/// Open key/value record extracted from a page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Item(pub Map<String, Value>);

impl Item {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0.insert(key.into(), value.into())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn is_valid(&self) -> bool {
        true
    }
}

impl From<Map<String, Value>> for Item {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

/// Anything an analyzer may emit.
#[derive(Debug, Clone, PartialEq)]
pub enum Data {
    Request(Request),
    Response(Response),
    Item(Item),
}

impl Data {
    pub fn is_valid(&self) -> bool {
        match self {
            Data::Request(r) => r.is_valid(),
            Data::Response(r) => r.is_valid(),
            Data::Item(i) => i.is_valid(),
        }
    }
}

impl From<Request> for Data {
    fn from(r: Request) -> Self {
        Data::Request(r)
    }
}

impl From<Response> for Data {
    fn from(r: Response) -> Self {
        Data::Response(r)
    }
}

impl From<Item> for Data {
    fn from(i: Item) -> Self {
        Data::Item(i)
    }
}
