//! Client configuration

use url::Url;

use crate::ClientError;

/// Address used when nothing else is configured
pub const DEFAULT_ADDR: &str = "127.0.0.1:8046";

/// Environment variable holding a `doozer:?ca=...` URI
pub const URI_ENV: &str = "DOOZER_URI";

const URI_SCHEME: &str = "doozer";
// Scheme plus the start of the query; a bare `doozer:8046` is an address
const URI_PREFIX: &str = "doozer:?";

/// Client configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Candidate addresses (host:port), tried head-first
    pub addrs: Vec<String>,
    /// Set TCP_NODELAY on new connections
    pub nodelay: bool,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            addrs: vec![DEFAULT_ADDR.to_string()],
            nodelay: true,
        }
    }
}

impl ClientConfig {
    /// Create a config with a single address
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addrs: vec![addr.into()],
            ..Default::default()
        }
    }

    /// Parse a URI of the form `doozer:?ca=host:port&ca=host:port`.
    ///
    /// Every `ca` parameter becomes a candidate address, in order; other
    /// parameters are ignored.
    pub fn from_uri(uri: &str) -> Result<Self, ClientError> {
        let url = Url::parse(uri).map_err(|e| ClientError::Config(format!("{}: {}", uri, e)))?;
        if url.scheme() != URI_SCHEME {
            return Err(ClientError::Config(format!(
                "unsupported scheme {:?} (expected {:?})",
                url.scheme(),
                URI_SCHEME
            )));
        }

        let addrs = url
            .query_pairs()
            .filter(|(key, _)| key == "ca")
            .map(|(_, value)| validate_addr(&value))
            .collect::<Result<Vec<_>, _>>()?;

        if addrs.is_empty() {
            return Err(ClientError::Config(format!("no ca addresses in {}", uri)));
        }

        Ok(Self {
            addrs,
            ..Default::default()
        })
    }

    /// Read the URI from `DOOZER_URI`, or use the default address when unset
    pub fn from_env() -> Result<Self, ClientError> {
        match std::env::var(URI_ENV) {
            Ok(uri) if !uri.trim().is_empty() => Self::from_uri(uri.trim()),
            _ => Ok(Self::default()),
        }
    }

    /// Accept either a `doozer:` URI or a bare `host:port`
    pub fn parse(s: &str) -> Result<Self, ClientError> {
        if s.starts_with(URI_PREFIX) {
            Self::from_uri(s)
        } else {
            Ok(Self::new(validate_addr(s)?))
        }
    }

    /// Append a candidate address
    pub fn addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }

    /// Replace the candidate list
    pub fn addrs<I, S>(mut self, addrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.addrs = addrs.into_iter().map(Into::into).collect();
        self
    }

    /// Set TCP_NODELAY
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }
}

/// Check that an address looks like `host:port`
fn validate_addr(addr: &str) -> Result<String, ClientError> {
    let (host, port) = addr
        .rsplit_once(':')
        .ok_or_else(|| ClientError::Config(format!("address {:?} has no port", addr)))?;
    if host.is_empty() {
        return Err(ClientError::Config(format!("address {:?} has no host", addr)));
    }
    port.parse::<u16>()
        .map_err(|_| ClientError::Config(format!("address {:?} has an invalid port", addr)))?;
    Ok(addr.to_string())
}
