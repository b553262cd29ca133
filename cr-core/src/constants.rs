//! Application-wide constants.

/// Application name.
pub const APP_NAME: &str = "Chaos Route Tracking";

/// Application version.
pub const APP_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Directory name used under the platform data/config directories.
pub const APP_DIR_NAME: &str = "ChaosRoute";

/// Path of the tracking push endpoint on the backend.
pub const TRACKING_PATH: &str = "/ws/tracking";

/// Query parameter carrying the bearer token at handshake time.
pub const TOKEN_QUERY_PARAM: &str = "token";

/// Environment variable consulted for the access token.
pub const TOKEN_ENV_VAR: &str = "CHAOS_ROUTE_TOKEN";

/// Topic tag that receives every parsed message.
pub const WILDCARD_TOPIC: &str = "*";

/// First reconnect delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Reconnect delay cap in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;

/// Close code the backend uses when the token is rejected.
pub const CLOSE_CODE_INVALID_TOKEN: u16 = 4001;

/// Event type tags broadcast by the backend.
pub mod event_types {
    pub const GPS_UPDATE: &str = "gps_update";
    pub const STOP_EVENT: &str = "stop_event";
    pub const ALERT: &str = "alert";
    pub const TOUR_STATUS: &str = "tour_status";
    pub const SUPPORT_SCAN: &str = "support_scan";

    /// All known event type tags.
    pub const ALL: &[&str] = &[GPS_UPDATE, STOP_EVENT, ALERT, TOUR_STATUS, SUPPORT_SCAN];
}
