//! Upstream proxy selection.

use crate::dialer::TunnelEndpoint;
use crate::error::DialError;
use std::net::IpAddr;

/// Keyword that disables proxying.
pub const NO_PROXY_KEYWORD: &str = "noProxy";

/// Keyword that reads proxies from the environment.
pub const ENV_KEYWORD: &str = "env";

/// How a client reaches its tunnel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProxySetting {
    /// Dial the tunnel directly.
    Disabled,
    /// Use `HTTP_PROXY`/`HTTPS_PROXY`, honoring `NO_PROXY`.
    Environment,
    /// Always go through this proxy URL.
    Url(String),
}

impl ProxySetting {
    pub fn parse(value: &str) -> Self {
        match value.trim() {
            NO_PROXY_KEYWORD => ProxySetting::Disabled,
            "" | ENV_KEYWORD => ProxySetting::Environment,
            url => ProxySetting::Url(url.to_string()),
        }
    }

    /// Proxy endpoint for `tunnel`, reading the process environment.
    pub fn resolve(&self, tunnel: &TunnelEndpoint) -> Result<Option<TunnelEndpoint>, DialError> {
        self.resolve_with(tunnel, |key| std::env::var(key).ok())
    }

    /// Proxy endpoint for `tunnel`, reading variables through `lookup`.
    pub fn resolve_with<F>(
        &self,
        tunnel: &TunnelEndpoint,
        lookup: F,
    ) -> Result<Option<TunnelEndpoint>, DialError>
    where
        F: Fn(&str) -> Option<String>,
    {
        match self {
            ProxySetting::Disabled => Ok(None),
            ProxySetting::Url(url) => TunnelEndpoint::parse(url).map(Some),
            ProxySetting::Environment => from_environment(tunnel, lookup),
        }
    }
}

fn from_environment<F>(
    tunnel: &TunnelEndpoint,
    lookup: F,
) -> Result<Option<TunnelEndpoint>, DialError>
where
    F: Fn(&str) -> Option<String>,
{
    let secure = tunnel.known_scheme().is_some_and(|s| s.is_secure());
    let keys: &[&str] = if secure {
        &["HTTPS_PROXY", "https_proxy"]
    } else {
        &["HTTP_PROXY", "http_proxy"]
    };

    let Some(proxy) = first_set(&lookup, keys) else {
        return Ok(None);
    };
    if is_loopback(tunnel.host()) {
        return Ok(None);
    }
    if let Some(no_proxy) = first_set(&lookup, &["NO_PROXY", "no_proxy"]) {
        if bypasses(&no_proxy, tunnel.host(), tunnel.port()) {
            return Ok(None);
        }
    }

    // A bare host:port in the environment means plain http.
    let proxy = if proxy.contains("://") {
        proxy
    } else {
        format!("http://{proxy}")
    };
    TunnelEndpoint::parse(&proxy).map(Some)
}

fn first_set<F>(lookup: &F, keys: &[&str]) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    keys.iter()
        .filter_map(|key| lookup(key))
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}

fn is_loopback(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    host.trim_matches(['[', ']'])
        .parse::<IpAddr>()
        .is_ok_and(|ip| ip.is_loopback())
}

/// Whether `NO_PROXY` excludes `host:port`.
///
/// Entries are comma separated. `*` matches everything; `example.com` and
/// `.example.com` match the domain and its subdomains; an entry with a port
/// only matches that port.
pub fn bypasses(no_proxy: &str, host: &str, port: u16) -> bool {
    let host = host.trim_matches(['[', ']']).to_ascii_lowercase();
    no_proxy
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .any(|entry| {
            if entry == "*" {
                return true;
            }
            let (pattern, entry_port) = split_port(entry);
            if entry_port.is_some_and(|p| p != port) {
                return false;
            }
            let pattern = pattern.trim_start_matches('.').to_ascii_lowercase();
            host == pattern || host.ends_with(&format!(".{pattern}"))
        })
}

fn split_port(entry: &str) -> (&str, Option<u16>) {
    let entry = entry.trim_matches(['[', ']']);
    // Bare IPv6 addresses contain colons without a port.
    if entry.parse::<IpAddr>().is_ok() {
        return (entry, None);
    }
    match entry.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host.trim_end_matches(']').trim_start_matches('['), Some(port)),
            Err(_) => (entry, None),
        },
        None => (entry, None),
    }
}
