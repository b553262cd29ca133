//! Transport and clock capabilities used by the connection manager.
//!
//! The manager never touches sockets or timers directly. It asks a
//! [`Transport`] to open or close a connection and a [`Clock`] to schedule
//! or cancel a one-shot timer. Whatever drives the manager feeds the
//! resulting [`TransportEvent`]s and timer expiries back in.

use std::fmt;
use std::time::Duration;

use url::Url;

use cr_core::error::CrResult;

/// Identifier of one transport open. A new id is issued per attempt so
/// events from a superseded connection can be told apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// Identifier of one scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(pub u64);

impl fmt::Display for TimerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "timer#{}", self.0)
    }
}

/// Callback-style events a transport reports for one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The handshake completed.
    Opened,
    /// A UTF-8 text frame arrived.
    Frame(String),
    /// The transport failed. A `Closed` event follows once it is torn down.
    Error(String),
    /// The transport is gone, gracefully or not.
    Closed {
        /// Close code sent by the peer, if any.
        code: Option<u16>,
        /// Close reason sent by the peer, possibly empty.
        reason: String,
    },
}

/// Opens and closes message-oriented connections.
///
/// Implementations report progress for connection `id` as
/// [`TransportEvent`]s and must eventually report `Closed` for every
/// connection they accepted. `close` must tolerate ids that are already
/// closed or unknown.
pub trait Transport {
    /// Start opening a connection to `url`. An `Err` means the attempt
    /// failed synchronously and no events will follow for `id`.
    fn open(&mut self, id: ConnectionId, url: &Url) -> CrResult<()>;

    /// Request the connection to close.
    fn close(&mut self, id: ConnectionId);
}

/// Schedules and cancels one-shot timers.
pub trait Clock {
    /// Arm a timer that expires after `delay`.
    fn schedule(&mut self, delay: Duration) -> TimerId;

    /// Disarm a timer. Expiry of a cancelled timer must not be reported,
    /// and cancelling an expired or unknown timer is a no-op.
    fn cancel(&mut self, id: TimerId);
}
