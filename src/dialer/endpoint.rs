//! Parsed tunnel and proxy URLs.

use crate::auth::Credentials;
use crate::error::DialError;
use percent_encoding::percent_decode_str;
use std::fmt;
use std::str::FromStr;
use url::{Host, Url};

/// URL schemes with a built-in dialer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Http,
    Https,
    Ws,
    Wss,
}

impl Scheme {
    pub const ALL: [Scheme; 4] = [Scheme::Http, Scheme::Https, Scheme::Ws, Scheme::Wss];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "http" => Some(Scheme::Http),
            "https" => Some(Scheme::Https),
            "ws" => Some(Scheme::Ws),
            "wss" => Some(Scheme::Wss),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::Http => "http",
            Scheme::Https => "https",
            Scheme::Ws => "ws",
            Scheme::Wss => "wss",
        }
    }

    pub fn is_secure(&self) -> bool {
        matches!(self, Scheme::Https | Scheme::Wss)
    }

    pub fn default_port(&self) -> u16 {
        if self.is_secure() { 443 } else { 80 }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A tunnel or proxy URL: `scheme://[user:pass@]host[:port][/path]`.
///
/// Credentials are split off at parse time; the stored URL never contains
/// them. Any scheme parses, the dialer registry decides whether it is usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelEndpoint {
    url: Url,
    credentials: Option<Credentials>,
}

impl TunnelEndpoint {
    pub fn parse(input: &str) -> Result<Self, DialError> {
        let invalid = |reason: &str| DialError::InvalidEndpoint {
            url: input.to_string(),
            reason: reason.to_string(),
        };

        let mut url = Url::parse(input.trim()).map_err(|e| invalid(&e.to_string()))?;
        if url.host_str().is_none_or(str::is_empty) {
            return Err(invalid("missing host"));
        }

        // Userinfo comes back percent-encoded; proxies expect the raw text.
        let decode = |part: &str| {
            percent_decode_str(part)
                .decode_utf8()
                .map(|decoded| decoded.into_owned())
                .map_err(|_| invalid("credentials are not valid UTF-8"))
        };
        let credentials = if url.username().is_empty() {
            None
        } else {
            Some(Credentials::new(
                decode(url.username())?,
                decode(url.password().unwrap_or_default())?,
            ))
        };
        url.set_username("")
            .and_then(|()| url.set_password(None))
            .map_err(|()| invalid("cannot strip credentials"))?;

        Ok(Self { url, credentials })
    }

    pub fn scheme(&self) -> &str {
        self.url.scheme()
    }

    pub fn known_scheme(&self) -> Option<Scheme> {
        Scheme::parse(self.url.scheme())
    }

    /// Host as written in the URL; IPv6 literals keep their brackets.
    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }

    /// Host suitable for TLS server-name indication.
    pub fn server_name(&self) -> String {
        match self.url.host() {
            Some(Host::Domain(domain)) => domain.to_string(),
            Some(Host::Ipv4(ip)) => ip.to_string(),
            Some(Host::Ipv6(ip)) => ip.to_string(),
            None => String::new(),
        }
    }

    /// Explicit port, or the scheme default.
    pub fn port(&self) -> u16 {
        self.url
            .port_or_known_default()
            .or_else(|| self.known_scheme().map(|s| s.default_port()))
            .unwrap_or(80)
    }

    /// `host:port` for socket dialing and CONNECT requests.
    pub fn authority(&self) -> String {
        format!("{}:{}", self.host(), self.port())
    }

    /// Value for the `Host` header.
    pub fn host_header(&self) -> String {
        match self.url.port() {
            Some(port) => format!("{}:{}", self.host(), port),
            None => self.host().to_string(),
        }
    }

    /// Origin-form request target: path plus query.
    pub fn request_target(&self) -> String {
        match self.url.query() {
            Some(query) => format!("{}?{}", self.url.path(), query),
            None => self.url.path().to_string(),
        }
    }

    /// Address the far end of the tunnel should relay to.
    ///
    /// Tunnel servers take the path with its leading `/` removed; an empty
    /// path means the endpoint itself.
    pub fn relay_target(&self) -> String {
        let target = self.url.path().trim_start_matches('/');
        if target.is_empty() {
            self.authority()
        } else {
            target.to_string()
        }
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }
}

impl FromStr for TunnelEndpoint {
    type Err = DialError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TunnelEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
