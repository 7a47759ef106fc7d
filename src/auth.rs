//! Credentials and HTTP authentication headers.

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use http::header::{AUTHORIZATION, HeaderName, PROXY_AUTHORIZATION};
use std::fmt;

/// Produces one authentication header for an outbound request.
pub trait AuthProvider: Send + Sync + fmt::Debug {
    /// Header the value is sent under.
    fn header_name(&self) -> HeaderName;

    /// Complete header value, including the scheme prefix.
    fn header_value(&self) -> String;
}

/// Username and password taken from a URL's userinfo.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Basic auth for a tunnel endpoint (`Authorization`).
    pub fn basic(&self) -> BasicAuth {
        BasicAuth::new(self.clone())
    }

    /// Basic auth for an upstream proxy (`Proxy-Authorization`).
    pub fn proxy_basic(&self) -> BasicAuth {
        BasicAuth::new(self.clone()).with_header(PROXY_AUTHORIZATION)
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// HTTP Basic authentication.
#[derive(Debug, Clone)]
pub struct BasicAuth {
    credentials: Credentials,
    header: HeaderName,
}

impl BasicAuth {
    pub fn new(credentials: Credentials) -> Self {
        Self {
            credentials,
            header: AUTHORIZATION,
        }
    }

    /// Send the value under a different header name.
    pub fn with_header(mut self, header: HeaderName) -> Self {
        self.header = header;
        self
    }
}

impl AuthProvider for BasicAuth {
    fn header_name(&self) -> HeaderName {
        self.header.clone()
    }

    fn header_value(&self) -> String {
        let raw = format!("{}:{}", self.credentials.username, self.credentials.password);
        format!("Basic {}", STANDARD.encode(raw))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_basic_header_value() {
        let auth = Credentials::new("Aladdin", "open sesame").basic();
        assert_eq!(auth.header_name(), AUTHORIZATION);
        assert_eq!(auth.header_value(), "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ==");
    }

    #[test]
    fn test_proxy_basic_uses_proxy_authorization() {
        let auth = Credentials::new("user", "pass").proxy_basic();
        assert_eq!(auth.header_name(), PROXY_AUTHORIZATION);
        assert_eq!(auth.header_value(), "Basic dXNlcjpwYXNz");
    }

    #[test]
    fn test_empty_password() {
        let auth = Credentials::new("token", "").basic();
        assert_eq!(auth.header_value(), "Basic dG9rZW46");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = Credentials::new("user", "hunter2");
        let rendered = format!("{:?}", creds);
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}
