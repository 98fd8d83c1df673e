//! Broker URL parsing

use prisma_events_core::{EventsError, Result};
use std::fmt;
use std::str::FromStr;

/// Connection transport selected by the URL scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    /// `mqtt://`, `tcp://`
    Tcp,
    /// `mqtts://`, `ssl://`
    Tls,
    /// `ws://`
    Ws,
    /// `wss://`
    Wss,
}

impl Transport {
    pub fn default_port(&self) -> u16 {
        match self {
            Transport::Tcp => 1883,
            Transport::Tls => 8883,
            Transport::Ws => 80,
            Transport::Wss => 443,
        }
    }

    pub fn is_websocket(&self) -> bool {
        matches!(self, Transport::Ws | Transport::Wss)
    }

    fn scheme(&self) -> &'static str {
        match self {
            Transport::Tcp => "mqtt",
            Transport::Tls => "mqtts",
            Transport::Ws => "ws",
            Transport::Wss => "wss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokerUrl {
    pub transport: Transport,
    pub host: String,
    pub port: u16,
    /// Websocket path, `/` when not given
    pub path: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl BrokerUrl {
    /// URL handed to the websocket transport, credentials stripped
    pub fn websocket_url(&self) -> String {
        format!(
            "{}://{}:{}{}",
            self.transport.scheme(),
            self.host,
            self.port,
            self.path
        )
    }
}

impl fmt::Display for BrokerUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}:{}", self.transport.scheme(), self.host, self.port)?;
        if self.transport.is_websocket() {
            write!(f, "{}", self.path)?;
        }
        Ok(())
    }
}

impl FromStr for BrokerUrl {
    type Err = EventsError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |reason: &str| {
            EventsError::ConfigError(format!("invalid broker url '{}': {}", s, reason))
        };

        let (scheme, rest) = s.split_once("://").ok_or_else(|| invalid("missing scheme"))?;
        let transport = match scheme.to_ascii_lowercase().as_str() {
            "mqtt" | "tcp" => Transport::Tcp,
            "mqtts" | "ssl" => Transport::Tls,
            "ws" => Transport::Ws,
            "wss" => Transport::Wss,
            other => return Err(invalid(&format!("unsupported scheme '{}'", other))),
        };

        let (authority, path) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, "/"),
        };

        let (credentials, host_port) = match authority.rsplit_once('@') {
            Some((creds, host_port)) => (Some(creds), host_port),
            None => (None, authority),
        };

        let (username, password) = match credentials {
            Some(creds) => match creds.split_once(':') {
                Some((user, pass)) => (Some(user.to_string()), Some(pass.to_string())),
                None => (Some(creds.to_string()), None),
            },
            None => (None, None),
        };

        let (host, port) = match host_port.rsplit_once(':') {
            Some((host, port)) => {
                let port = port.parse::<u16>().map_err(|_| invalid("bad port"))?;
                (host, port)
            }
            None => (host_port, transport.default_port()),
        };

        if host.is_empty() {
            return Err(invalid("missing host"));
        }

        Ok(Self {
            transport,
            host: host.to_string(),
            port,
            path: path.to_string(),
            username,
            password,
        })
    }
}
