//! Tracking endpoint resolution.
//!
//! Maps the configured backend address onto the push endpoint: `https`
//! becomes `wss`, `http` becomes `ws`, the path is replaced with the
//! tracking path, and the bearer token rides along as a query parameter.

use std::fmt;

use url::Url;

use cr_core::config::{AppConfig, TrackingConfig};
use cr_core::constants;
use cr_core::error::{CrError, CrResult};

/// Resolved push endpoint, without credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    base: Url,
}

impl Endpoint {
    /// Resolve the endpoint at `path` on the backend at `address`.
    pub fn new(address: &str, path: &str) -> CrResult<Self> {
        let sanitized = AppConfig::sanitize_server_address(address);
        if sanitized.is_empty() {
            return Err(CrError::MissingConfig("server address".into()));
        }

        let mut base = Url::parse(&sanitized)?;
        let scheme = match base.scheme() {
            "https" | "wss" => "wss",
            "http" | "ws" => "ws",
            other => {
                return Err(CrError::InvalidEndpoint(format!(
                    "unsupported scheme {other:?} in {sanitized}"
                )))
            }
        };
        if base.host_str().is_none() {
            return Err(CrError::InvalidEndpoint(format!("no host in {sanitized}")));
        }
        base.set_scheme(scheme)
            .map_err(|_| CrError::InvalidEndpoint(format!("cannot use {scheme} for {sanitized}")))?;
        base.set_path(path);
        base.set_query(None);
        base.set_fragment(None);

        Ok(Self { base })
    }

    /// Resolve the endpoint from the `[server]` address and `[tracking]` path.
    pub fn from_config(address: &str, tracking: &TrackingConfig) -> CrResult<Self> {
        Self::new(address, &tracking.path)
    }

    /// Whether the endpoint uses the secure `wss` scheme.
    pub fn is_secure(&self) -> bool {
        self.base.scheme() == "wss"
    }

    /// The endpoint URL with `token` attached for the handshake.
    pub fn url_with_token(&self, token: &str) -> Url {
        let mut url = self.base.clone();
        url.query_pairs_mut()
            .append_pair(constants::TOKEN_QUERY_PARAM, token);
        url
    }

    /// The endpoint URL without credentials.
    pub fn as_url(&self) -> &Url {
        &self.base
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.base)
    }
}
