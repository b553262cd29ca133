//! Chaos Route Tracking - real-time event client for the `/ws/tracking` stream.
//!
//! This crate provides the push-event client that handles:
//! - A single logical connection with an explicit state machine
//! - Automatic reconnection with capped exponential backoff
//! - Typed decoding of tracking events (GPS updates, stop events, alerts, ...)
//! - Fan-out to per-type and wildcard handlers with per-handler isolation
//! - Injectable transport and clock capabilities for deterministic tests
//! - A tokio driver backed by tokio-tungstenite for production use

pub mod backoff;
pub mod credentials;
pub mod dispatcher;
pub mod endpoint;
pub mod events;
pub mod manager;
pub mod runtime;
pub mod transport;

// Re-export key types
pub use backoff::{BackoffPolicy, ReconnectConfig};
pub use credentials::{CredentialProvider, SessionToken};
pub use dispatcher::{EventDispatcher, Handler, Subscription, Topic};
pub use endpoint::Endpoint;
pub use events::{
    Alert, Envelope, EventKind, GpsUpdate, StopEvent, StopEventKind, SupportScan,
    TourStatus, TrackingEvent,
};
pub use manager::{ConnectionManager, ConnectionState, StatusListener};
pub use runtime::TrackingClient;
pub use transport::{Clock, ConnectionId, TimerId, Transport, TransportEvent};
