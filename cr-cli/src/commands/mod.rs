//! CLI command implementations.

pub mod endpoint;
pub mod watch;

use cr_core::config::AppConfig;
use cr_core::error::{CrError, CrResult};

/// Pick the backend address: flag, then config.
pub fn resolve_address(config: &AppConfig, flag: Option<String>) -> CrResult<String> {
    let address = flag
        .map(|a| AppConfig::sanitize_server_address(&a))
        .filter(|a| !a.is_empty())
        .unwrap_or_else(|| AppConfig::sanitize_server_address(&config.server.address));

    if address.is_empty() {
        return Err(CrError::MissingConfig(
            "server address (use --address or set [server] address in config)".into(),
        ));
    }
    Ok(address)
}
