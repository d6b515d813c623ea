//! Component identifiers.
//!
//! Every registered worker carries an opaque id of the form
//! `{letter}{serial}[|{ip:port}]`, where the letter names the worker kind
//! (`D`ownloader, `A`nalyzer, `P`ipeline) and the serial is a decimal
//! number handed out by a [`SerialNumberGenerator`](crate::sn::SerialNumberGenerator).

use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CrawlError;

/// The three kinds of pluggable worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Kind {
    Downloader,
    Analyzer,
    Pipeline,
}

impl Kind {
    pub const ALL: [Kind; 3] = [Kind::Downloader, Kind::Analyzer, Kind::Pipeline];

    pub fn as_str(&self) -> &'static str {
        match self {
            Kind::Downloader => "downloader",
            Kind::Analyzer => "analyzer",
            Kind::Pipeline => "pipeline",
        }
    }

    pub fn letter(&self) -> char {
        match self {
            Kind::Downloader => 'D',
            Kind::Analyzer => 'A',
            Kind::Pipeline => 'P',
        }
    }

    pub fn from_letter(letter: char) -> Option<Kind> {
        match letter {
            'D' => Some(Kind::Downloader),
            'A' => Some(Kind::Analyzer),
            'P' => Some(Kind::Pipeline),
            _ => None,
        }
    }

    /// Kind encoded in a component id, or `None` if the id is illegal.
    pub fn of(id: &str) -> Option<Kind> {
        decode(id).ok().map(|parts| parts.kind)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for Kind {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "downloader" => Ok(Kind::Downloader),
            "analyzer" => Ok(Kind::Analyzer),
            "pipeline" => Ok(Kind::Pipeline),
            _ => Err(CrawlError::InvalidParameter(format!(
                "unknown component kind: {s}"
            ))),
        }
    }
}

/// Network address a component is reachable at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModuleAddr {
    network: String,
    addr: SocketAddr,
}

impl ModuleAddr {
    /// `network` must be `http` or `https`; `ip` must be a literal address.
    pub fn new(network: &str, ip: &str, port: u16) -> Result<Self, CrawlError> {
        let network = network.to_lowercase();
        if network != "http" && network != "https" {
            return Err(CrawlError::InvalidParameter(format!(
                "illegal network for module address: {network}"
            )));
        }
        let ip: IpAddr = ip.parse().map_err(|_| {
            CrawlError::InvalidParameter(format!("illegal IP for module address: {ip}"))
        })?;
        Ok(Self {
            network,
            addr: SocketAddr::new(ip, port),
        })
    }

    pub fn network(&self) -> &str {
        &self.network
    }

    pub fn socket_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl fmt::Display for ModuleAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.addr)
    }
}

/// Decoded pieces of a [`ComponentId`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MidParts {
    pub kind: Kind,
    pub serial: u64,
    pub addr: Option<SocketAddr>,
}

/// Opaque, validated component id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ComponentId {
    raw: String,
    parts: MidParts,
}

impl ComponentId {
    pub fn encode(kind: Kind, serial: u64, addr: Option<&ModuleAddr>) -> Self {
        let raw = match addr {
            Some(addr) => format!("{}{}|{}", kind.letter(), serial, addr),
            None => format!("{}{}", kind.letter(), serial),
        };
        Self {
            raw,
            parts: MidParts {
                kind,
                serial,
                addr: addr.map(ModuleAddr::socket_addr),
            },
        }
    }

    pub fn parse(token: &str) -> Result<Self, CrawlError> {
        Ok(Self {
            parts: decode(token)?,
            raw: token.to_string(),
        })
    }

    pub fn parts(&self) -> MidParts {
        self.parts
    }

    pub fn kind(&self) -> Kind {
        self.parts.kind
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for ComponentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for ComponentId {
    type Err = CrawlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ComponentId {
    type Error = CrawlError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Ok(Self {
            parts: decode(&value)?,
            raw: value,
        })
    }
}

impl From<ComponentId> for String {
    fn from(id: ComponentId) -> Self {
        id.raw
    }
}

/// Splits a component id into kind, serial number and optional address.
pub fn decode(token: &str) -> Result<MidParts, CrawlError> {
    let illegal =
        |why: &str| CrawlError::InvalidParameter(format!("illegal component id {token:?}: {why}"));

    if token.len() <= 1 {
        return Err(illegal("too short"));
    }
    let mut chars = token.chars();
    let letter = chars.next().ok_or_else(|| illegal("empty"))?;
    let kind = Kind::from_letter(letter).ok_or_else(|| illegal("unknown kind letter"))?;
    let rest = chars.as_str();

    let (serial_part, addr_part) = match rest.rfind('|') {
        Some(i) => (&rest[..i], Some(&rest[i + 1..])),
        None => (rest, None),
    };
    if serial_part.is_empty() || !serial_part.bytes().all(|b| b.is_ascii_digit()) {
        return Err(illegal("serial number must be decimal digits"));
    }
    let serial: u64 = serial_part
        .parse()
        .map_err(|_| illegal("serial number out of range"))?;
    let addr = addr_part
        .map(|a| a.parse::<SocketAddr>())
        .transpose()
        .map_err(|_| illegal("address is not ip:port"))?;

    Ok(MidParts { kind, serial, addr })
}

pub fn is_legal(token: &str) -> bool {
    decode(token).is_ok()
}
