//! Port mapping interpretation

use super::model::{PortConfig, PortConfigLong};
use crate::error::{BerthError, Result};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

/// Transport protocol
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Tcp,
    Udp,
    Sctp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => write!(f, "tcp"),
            Protocol::Udp => write!(f, "udp"),
            Protocol::Sctp => write!(f, "sctp"),
        }
    }
}

impl FromStr for Protocol {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Protocol::Tcp),
            "udp" => Ok(Protocol::Udp),
            "sctp" => Ok(Protocol::Sctp),
            other => Err(format!("unknown protocol '{}'", other)),
        }
    }
}

/// Inclusive port range; a single port has `start == end`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PortRange {
    pub start: u16,
    pub end: u16,
}

impl PortRange {
    /// Single port
    pub fn single(port: u16) -> Self {
        Self {
            start: port,
            end: port,
        }
    }

    /// Number of ports in the range; zero when `end` is below `start`
    pub fn len(&self) -> usize {
        if self.end < self.start {
            return 0;
        }
        (self.end - self.start) as usize + 1
    }

    /// Whether the range holds no ports
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ports in the range
    pub fn ports(&self) -> impl Iterator<Item = u16> {
        self.start..=self.end
    }

    fn parse(spec: &str, text: &str) -> Result<Self> {
        let (start, end) = match text.split_once('-') {
            Some((start, end)) => (parse_number(spec, start)?, parse_number(spec, end)?),
            None => {
                let port = parse_number(spec, text)?;
                (port, port)
            }
        };
        if end < start {
            return Err(BerthError::invalid_port(
                spec,
                format!("range {} is reversed", text),
            ));
        }
        Ok(Self { start, end })
    }
}

impl fmt::Display for PortRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}-{}", self.start, self.end)
        }
    }
}

/// Interpreted port mapping
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PortMapping {
    /// Host address to bind; all interfaces when absent
    pub host_ip: Option<IpAddr>,
    /// Published host port(s); ephemeral when absent
    pub published: Option<PortRange>,
    /// Container port(s)
    pub target: PortRange,
    /// Protocol
    pub protocol: Protocol,
}

impl fmt::Display for PortMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.host_ip {
            Some(IpAddr::V6(ip)) => write!(f, "[{}]:", ip)?,
            Some(IpAddr::V4(ip)) => write!(f, "{}:", ip)?,
            None => {}
        }
        match self.published {
            Some(published) => write!(f, "{}:", published)?,
            None if self.host_ip.is_some() => write!(f, ":")?,
            None => {}
        }
        write!(f, "{}/{}", self.target, self.protocol)
    }
}

/// Interpret a port entry in any of its syntaxes
pub fn parse_port(config: &PortConfig) -> Result<PortMapping> {
    match config {
        PortConfig::Number(n) => {
            let spec = n.to_string();
            Ok(PortMapping {
                host_ip: None,
                published: None,
                target: PortRange::single(to_port(&spec, *n)?),
                protocol: Protocol::Tcp,
            })
        }
        PortConfig::Short(spec) => parse_short(spec),
        PortConfig::Long(long) => parse_long(long),
    }
}

/// Interpret `[[ip:]host[-end]:]container[-end][/protocol]`
pub fn parse_short(spec: &str) -> Result<PortMapping> {
    let (body, protocol) = match spec.rsplit_once('/') {
        Some((body, proto)) => (
            body,
            proto
                .parse::<Protocol>()
                .map_err(|e| BerthError::invalid_port(spec, e))?,
        ),
        None => (spec, Protocol::Tcp),
    };

    let (host_ip, rest) = if let Some(stripped) = body.strip_prefix('[') {
        let (ip, rest) = stripped
            .split_once("]:")
            .ok_or_else(|| BerthError::invalid_port(spec, "unterminated IPv6 address"))?;
        (Some(parse_ip(spec, ip)?), rest)
    } else {
        (None, body)
    };

    let parts: Vec<&str> = rest.split(':').collect();
    let (host_ip, published, target) = match (host_ip, parts.as_slice()) {
        (None, [target]) => (None, None, *target),
        (None, [published, target]) => (None, Some(*published), *target),
        (None, [ip, published, target]) => (Some(parse_ip(spec, ip)?), Some(*published), *target),
        (Some(ip), [published, target]) => (Some(ip), Some(*published), *target),
        _ => return Err(BerthError::invalid_port(spec, "unrecognized format")),
    };

    let published = match published {
        Some("") | None => None,
        Some(text) => Some(PortRange::parse(spec, text)?),
    };
    let target = PortRange::parse(spec, target)?;

    check_lengths(spec, published, target)?;

    Ok(PortMapping {
        host_ip,
        published,
        target,
        protocol,
    })
}

fn parse_long(long: &PortConfigLong) -> Result<PortMapping> {
    let spec = match &long.published {
        Some(published) => format!("{}:{}", published, long.target),
        None => long.target.to_string(),
    };

    let target = PortRange::single(to_port(&spec, long.target)?);
    let published = match long.published.as_ref().map(|p| p.to_string()) {
        Some(text) if !text.is_empty() => Some(PortRange::parse(&spec, &text)?),
        _ => None,
    };
    let host_ip = match long.host_ip.as_deref() {
        Some(ip) if !ip.is_empty() => Some(parse_ip(&spec, ip)?),
        _ => None,
    };
    let protocol = match long.protocol.as_deref() {
        Some(p) => p
            .parse::<Protocol>()
            .map_err(|e| BerthError::invalid_port(&spec, e))?,
        None => Protocol::Tcp,
    };
    if let Some(mode) = long.mode.as_deref() {
        if mode != "host" && mode != "ingress" {
            return Err(BerthError::invalid_port(
                &spec,
                format!("unknown mode '{}'", mode),
            ));
        }
    }

    check_lengths(&spec, published, target)?;

    Ok(PortMapping {
        host_ip,
        published,
        target,
        protocol,
    })
}

fn check_lengths(spec: &str, published: Option<PortRange>, target: PortRange) -> Result<()> {
    if let Some(published) = published {
        if published.len() != target.len() {
            return Err(BerthError::invalid_port(
                spec,
                "host and container ranges differ in length",
            ));
        }
    }
    Ok(())
}

fn parse_number(spec: &str, text: &str) -> Result<u16> {
    let n: u32 = text
        .parse()
        .map_err(|_| BerthError::invalid_port(spec, format!("'{}' is not a port number", text)))?;
    to_port(spec, n)
}

fn to_port(spec: &str, n: u32) -> Result<u16> {
    match u16::try_from(n) {
        Ok(0) | Err(_) => Err(BerthError::invalid_port(
            spec,
            format!("{} is outside 1-65535", n),
        )),
        Ok(port) => Ok(port),
    }
}

fn parse_ip(spec: &str, text: &str) -> Result<IpAddr> {
    text.parse::<IpAddr>()
        .map_err(|_| BerthError::invalid_port(spec, format!("'{}' is not an IP address", text)))
}
