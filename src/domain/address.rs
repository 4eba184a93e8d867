//! Connection addresses and their resolution against an origin.
//!
//! Mirrors how a browser page resolves a socket endpoint: absolute URLs
//! are used as-is, paths starting with `/` hang off the current origin,
//! and no address at all means the bare origin. The scheme is `wss` when
//! the origin is secure and `ws` otherwise.

use std::fmt;

use url::Url;

use crate::error::ChannelError;

/// Host and transport security of the application the channel belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    secure: bool,
    host: String,
}

impl Origin {
    /// Creates an origin from a `host[:port]` and a security flag.
    #[must_use]
    pub fn new(host: impl Into<String>, secure: bool) -> Self {
        Self {
            secure,
            host: host.into(),
        }
    }

    /// Parses an origin from a URL such as `https://reportek.example:8443`.
    ///
    /// `https` and `wss` are secure; `http` and `ws` are not. Any path,
    /// query or fragment is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidOrigin`] if the string is not a URL,
    /// has no host, or uses another scheme.
    pub fn parse(origin: &str) -> Result<Self, ChannelError> {
        let url = Url::parse(origin.trim())
            .map_err(|e| ChannelError::InvalidOrigin(format!("`{origin}`: {e}")))?;

        let secure = match url.scheme() {
            "https" | "wss" => true,
            "http" | "ws" => false,
            other => {
                return Err(ChannelError::InvalidOrigin(format!(
                    "`{origin}`: unsupported scheme `{other}`"
                )));
            }
        };

        let Some(host) = url.host_str() else {
            return Err(ChannelError::InvalidOrigin(format!("`{origin}`: missing host")));
        };
        let host = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        Ok(Self { secure, host })
    }

    /// Returns `true` if the origin is served over a secure transport.
    #[must_use]
    pub const fn is_secure(&self) -> bool {
        self.secure
    }

    /// Returns the `host[:port]` part.
    #[must_use]
    pub fn host(&self) -> &str {
        &self.host
    }

    /// WebSocket scheme matching the origin's security.
    #[must_use]
    pub const fn ws_scheme(&self) -> &'static str {
        if self.secure { "wss" } else { "ws" }
    }

    /// `scheme://host` without a trailing slash.
    #[must_use]
    pub fn base_url(&self) -> String {
        format!("{}://{}", self.ws_scheme(), self.host)
    }
}

impl Default for Origin {
    fn default() -> Self {
        Self::new("localhost:8000", false)
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.base_url())
    }
}

/// Logical channel endpoint as supplied by a caller.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConnectionAddress {
    /// No address: resolves to the bare origin.
    #[default]
    Unset,
    /// Origin-relative path beginning with `/`.
    Path(String),
    /// Fully qualified URL.
    Absolute(String),
}

impl ConnectionAddress {
    /// Classifies a raw address string. Empty strings count as unset.
    #[must_use]
    pub fn parse(address: &str) -> Self {
        let address = address.trim();
        if address.is_empty() {
            Self::Unset
        } else if address.starts_with('/') {
            Self::Path(address.to_string())
        } else {
            Self::Absolute(address.to_string())
        }
    }

    /// Address of the notification channel for one envelope.
    #[must_use]
    pub fn envelope(envelope_id: u64) -> Self {
        Self::Path(format!("/ws/envelopes/{envelope_id}"))
    }

    /// Resolves this address into a `ws://` or `wss://` URL.
    ///
    /// Absolute `ws`/`wss` URLs pass through unchanged; `http`/`https`
    /// URLs are mapped onto the matching WebSocket scheme.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InvalidAddress`] if the result is not a
    /// valid URL or uses a scheme that cannot carry a WebSocket.
    pub fn resolve(&self, origin: &Origin) -> Result<Url, ChannelError> {
        match self {
            Self::Unset => parse_url(&origin.base_url(), &origin.base_url()),
            Self::Path(path) => parse_url(&format!("{}{path}", origin.base_url()), path),
            Self::Absolute(raw) => {
                let mut url = parse_url(raw, raw)?;
                let mapped = match url.scheme() {
                    "ws" | "wss" => return Ok(url),
                    "http" => "ws",
                    "https" => "wss",
                    other => {
                        return Err(ChannelError::invalid_address(
                            raw,
                            format!("unsupported scheme `{other}`"),
                        ));
                    }
                };
                url.set_scheme(mapped).map_err(|()| {
                    ChannelError::invalid_address(raw, format!("cannot switch scheme to `{mapped}`"))
                })?;
                Ok(url)
            }
        }
    }
}

impl From<&str> for ConnectionAddress {
    fn from(address: &str) -> Self {
        Self::parse(address)
    }
}

impl From<String> for ConnectionAddress {
    fn from(address: String) -> Self {
        Self::parse(&address)
    }
}

impl From<Option<&str>> for ConnectionAddress {
    fn from(address: Option<&str>) -> Self {
        address.map_or(Self::Unset, Self::parse)
    }
}

impl fmt::Display for ConnectionAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unset => f.write_str("<unset>"),
            Self::Path(s) | Self::Absolute(s) => f.write_str(s),
        }
    }
}

fn parse_url(candidate: &str, original: &str) -> Result<Url, ChannelError> {
    Url::parse(candidate).map_err(|e| ChannelError::invalid_address(original, e.to_string()))
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn resolved(address: ConnectionAddress, origin: &Origin) -> String {
        match address.resolve(origin) {
            Ok(url) => url.to_string(),
            Err(e) => panic!("resolution failed: {e}"),
        }
    }

    #[test]
    fn unset_resolves_to_bare_origin() {
        let origin = Origin::new("reportek.example", true);
        assert_eq!(
            resolved(ConnectionAddress::Unset, &origin),
            "wss://reportek.example/"
        );
    }

    #[test]
    fn path_uses_ws_on_insecure_origin() {
        let origin = Origin::new("localhost:8000", false);
        assert_eq!(
            resolved(ConnectionAddress::parse("/ws/envelopes/16"), &origin),
            "ws://localhost:8000/ws/envelopes/16"
        );
    }

    #[test]
    fn path_uses_wss_on_secure_origin() {
        let origin = Origin::new("reportek.example", true);
        assert_eq!(
            resolved(ConnectionAddress::envelope(16), &origin),
            "wss://reportek.example/ws/envelopes/16"
        );
    }

    #[test]
    fn absolute_ws_url_passes_through() {
        let origin = Origin::new("ignored.example", false);
        assert_eq!(
            resolved(ConnectionAddress::parse("wss://host/ws/envelopes/16"), &origin),
            "wss://host/ws/envelopes/16"
        );
    }

    #[test]
    fn http_urls_map_to_ws_schemes() {
        let origin = Origin::default();
        assert_eq!(
            resolved(ConnectionAddress::parse("https://host/feed"), &origin),
            "wss://host/feed"
        );
        assert_eq!(
            resolved(ConnectionAddress::parse("http://host:81/feed"), &origin),
            "ws://host:81/feed"
        );
    }

    #[test]
    fn foreign_scheme_is_rejected() {
        let result = ConnectionAddress::parse("ftp://host/feed").resolve(&Origin::default());
        let Err(ChannelError::InvalidAddress { address, .. }) = result else {
            panic!("expected InvalidAddress");
        };
        assert_eq!(address, "ftp://host/feed");
    }

    #[test]
    fn relative_without_slash_is_rejected() {
        let result = ConnectionAddress::parse("ws/envelopes/1").resolve(&Origin::default());
        assert!(matches!(result, Err(ChannelError::InvalidAddress { .. })));
    }

    #[test]
    fn empty_and_none_are_unset() {
        assert_eq!(ConnectionAddress::parse("  "), ConnectionAddress::Unset);
        assert_eq!(ConnectionAddress::from(None), ConnectionAddress::Unset);
    }

    #[test]
    fn origin_parse_keeps_port_and_security() {
        let Ok(origin) = Origin::parse("https://reportek.example:8443/app/") else {
            panic!("valid origin");
        };
        assert!(origin.is_secure());
        assert_eq!(origin.host(), "reportek.example:8443");
        assert_eq!(origin.base_url(), "wss://reportek.example:8443");

        let Ok(plain) = Origin::parse("http://localhost:8000") else {
            panic!("valid origin");
        };
        assert!(!plain.is_secure());
        assert_eq!(plain.to_string(), "ws://localhost:8000");
    }

    #[test]
    fn origin_parse_rejects_garbage() {
        assert!(Origin::parse("not a url").is_err());
        assert!(Origin::parse("ftp://files.example").is_err());
    }
}
