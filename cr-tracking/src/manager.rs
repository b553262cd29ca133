//! Tracking connection manager.
//!
//! Owns the lifecycle of the single logical connection to the tracking
//! endpoint: opening with the current bearer token, feeding parsed frames
//! to the [`EventDispatcher`], and rescheduling itself with capped
//! exponential backoff when the transport goes away.
//!
//! The manager is a plain state machine. It performs no IO of its own and
//! is driven by calls to [`ConnectionManager::connect`],
//! [`ConnectionManager::disconnect`], [`ConnectionManager::on_transport_event`]
//! and [`ConnectionManager::on_timer`], always from one logical loop.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use cr_core::constants::CLOSE_CODE_INVALID_TOKEN;
use cr_core::error::{CrError, CrResult};

use crate::backoff::{apply_jitter, BackoffPolicy, ReconnectConfig};
use crate::credentials::{current_token, CredentialProvider};
use crate::dispatcher::EventDispatcher;
use crate::endpoint::Endpoint;
use crate::events::Envelope;
use crate::transport::{Clock, ConnectionId, TimerId, Transport, TransportEvent};

/// Callback told `true` when the connection becomes usable and `false`
/// when it is lost.
pub type StatusListener = Box<dyn FnMut(bool) + Send>;

/// Connection state for the tracking manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Never connected, or explicitly disconnected.
    Idle,
    /// A transport is opening.
    Connecting,
    /// Connected and receiving events.
    Connected,
    /// Connection lost, waiting for the reconnect timer.
    Reconnecting {
        /// How long the pending timer waits.
        delay: Duration,
        /// The pending timer.
        timer: TimerId,
    },
    /// The transport failed and is being torn down.
    Closing,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Reconnecting { delay, .. } => {
                write!(f, "reconnecting in {:.1}s", delay.as_secs_f64())
            }
            Self::Closing => write!(f, "closing"),
        }
    }
}

/// State machine for the tracking connection.
///
/// Handles:
/// - Opening `ws(s)://host/ws/tracking?token=...` with the current token
/// - Exponential backoff reconnection (1s, 2s, 4s, 8s, 16s, max 30s), unbounded
/// - Dropping malformed frames and dispatching parsed ones
/// - Ignoring events from superseded connections and cancelled timers
/// - Single-slot status listener plus a watch channel of every state change
pub struct ConnectionManager<T, C> {
    endpoint: Endpoint,
    credentials: Arc<dyn CredentialProvider>,
    transport: T,
    clock: C,
    dispatcher: EventDispatcher,
    backoff: BackoffPolicy,
    jitter_factor: f64,
    state: ConnectionState,
    state_tx: watch::Sender<ConnectionState>,
    /// Cleared only by `disconnect`; read when a close arrives.
    should_reconnect: bool,
    /// The connection whose events are currently accepted.
    current: Option<ConnectionId>,
    next_connection: u64,
    status_listener: Option<StatusListener>,
    /// Last value handed to the status listener was `true`.
    reported_up: bool,
}

impl<T: Transport, C: Clock> ConnectionManager<T, C> {
    /// Create a new manager in the `Idle` state.
    pub fn new(
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialProvider>,
        transport: T,
        clock: C,
        dispatcher: EventDispatcher,
    ) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Idle);
        let reconnect = ReconnectConfig::default();

        Self {
            endpoint,
            credentials,
            transport,
            clock,
            dispatcher,
            backoff: BackoffPolicy::from(&reconnect),
            jitter_factor: reconnect.jitter_factor,
            state: ConnectionState::Idle,
            state_tx,
            should_reconnect: false,
            current: None,
            next_connection: 0,
            status_listener: None,
            reported_up: false,
        }
    }

    /// Set custom reconnection configuration.
    pub fn with_reconnect_config(mut self, config: ReconnectConfig) -> Self {
        self.backoff = BackoffPolicy::from(&config);
        self.jitter_factor = config.jitter_factor;
        self
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether the connection is open and receiving events.
    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Subscribe to every state change.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    /// Get the event dispatcher (for subscribing to events).
    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Replace the status listener. `None` removes it.
    pub fn set_status_listener(&mut self, listener: Option<StatusListener>) {
        self.status_listener = listener;
    }

    /// Start connecting.
    ///
    /// Returns `AuthRequired` without any state change when no token is
    /// available. A no-op while already connecting or connected.
    pub fn connect(&mut self) -> CrResult<()> {
        match self.state {
            ConnectionState::Connecting | ConnectionState::Connected => {
                debug!("already {}, skipping connect", self.state);
                return Ok(());
            }
            ConnectionState::Closing => {
                debug!("connect requested while closing, reconnecting after close");
                self.should_reconnect = true;
                return Ok(());
            }
            ConnectionState::Idle | ConnectionState::Reconnecting { .. } => {}
        }

        let token = current_token(self.credentials.as_ref()).ok_or_else(|| {
            warn!("tracking connect skipped: no access token");
            CrError::AuthRequired
        })?;

        if let ConnectionState::Reconnecting { timer, .. } = self.state {
            self.clock.cancel(timer);
        }
        self.should_reconnect = true;
        self.open(&token);
        Ok(())
    }

    /// Stop the connection and any pending reconnect. Idempotent.
    pub fn disconnect(&mut self) {
        self.should_reconnect = false;

        if let ConnectionState::Reconnecting { timer, .. } = self.state {
            self.clock.cancel(timer);
        }
        if let Some(id) = self.current.take() {
            self.transport.close(id);
        }
        if self.state != ConnectionState::Idle {
            info!("tracking disconnected");
        }
        self.set_state(ConnectionState::Idle);
    }

    /// Feed one transport event for connection `id`.
    pub fn on_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if self.current != Some(id) {
            debug!("ignoring {event:?} from superseded {id}");
            return;
        }

        match event {
            TransportEvent::Opened => {
                if self.state != ConnectionState::Connecting {
                    debug!("ignoring open of {id} while {}", self.state);
                    return;
                }
                self.backoff.on_success();
                self.set_state(ConnectionState::Connected);
                info!("tracking connected to {}", self.endpoint);
            }
            TransportEvent::Frame(text) => {
                if self.state == ConnectionState::Connected {
                    self.handle_frame(&text);
                } else {
                    debug!("dropping frame received while {}", self.state);
                }
            }
            TransportEvent::Error(reason) => {
                warn!("tracking transport error on {id}: {reason}");
                if self.state != ConnectionState::Closing {
                    self.set_state(ConnectionState::Closing);
                    self.transport.close(id);
                }
            }
            TransportEvent::Closed { code, reason } => {
                if code == Some(CLOSE_CODE_INVALID_TOKEN) {
                    warn!("tracking endpoint rejected the token: {reason}");
                } else {
                    info!("tracking {id} closed (code {code:?}) {reason}");
                }
                self.handle_closed(id);
            }
        }
    }

    /// Feed the expiry of timer `id`.
    pub fn on_timer(&mut self, id: TimerId) {
        let ConnectionState::Reconnecting { timer, .. } = self.state else {
            debug!("ignoring {id} while {}", self.state);
            return;
        };
        if timer != id {
            debug!("ignoring cancelled {id}");
            return;
        }

        match current_token(self.credentials.as_ref()) {
            Some(token) => self.open(&token),
            None => {
                warn!("reconnect abandoned: access token no longer available");
                self.should_reconnect = false;
                self.set_state(ConnectionState::Idle);
            }
        }
    }

    fn open(&mut self, token: &str) {
        self.next_connection += 1;
        let id = ConnectionId(self.next_connection);
        self.current = Some(id);
        self.set_state(ConnectionState::Connecting);

        info!("tracking connecting to {} ({id})", self.endpoint);
        let url = self.endpoint.url_with_token(token);
        if let Err(e) = self.transport.open(id, &url) {
            if e.is_transient() {
                warn!("failed to open tracking transport: {e}");
            } else {
                error!("failed to open tracking transport: {e}");
            }
            self.handle_closed(id);
        }
    }

    fn handle_closed(&mut self, id: ConnectionId) {
        self.transport.close(id);
        self.current = None;

        if self.should_reconnect {
            let delay = apply_jitter(self.backoff.on_failure(), self.jitter_factor);
            let timer = self.clock.schedule(delay);
            warn!("tracking reconnect in {:.1}s", delay.as_secs_f64());
            self.set_state(ConnectionState::Reconnecting { delay, timer });
        } else {
            self.set_state(ConnectionState::Idle);
        }
    }

    fn handle_frame(&self, text: &str) {
        match Envelope::parse(text) {
            Ok(envelope) => {
                self.dispatcher.dispatch(&envelope);
            }
            Err(e) => debug!("dropping frame: {e}"),
        }
    }

    /// Update the connection state and notify watchers.
    fn set_state(&mut self, new_state: ConnectionState) {
        if self.state != new_state {
            debug!("tracking state: {} -> {}", self.state, new_state);
            self.state = new_state;
            self.state_tx.send_replace(new_state);
        }

        let up = new_state == ConnectionState::Connected;
        if up != self.reported_up {
            self.reported_up = up;
            self.notify_status(up);
        }
    }

    fn notify_status(&mut self, connected: bool) {
        if let Some(listener) = self.status_listener.as_mut() {
            if catch_unwind(AssertUnwindSafe(|| listener(connected))).is_err() {
                error!("status listener panicked on {connected}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::credentials::SessionToken;
    use crate::events::EventKind;

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Open(ConnectionId, String),
        Close(ConnectionId),
    }

    /// Transport that records calls and can be told to fail opens.
    #[derive(Clone, Default)]
    struct FakeTransport {
        calls: Arc<Mutex<Vec<Call>>>,
        fail_opens: Arc<Mutex<bool>>,
    }

    impl FakeTransport {
        fn opens(&self) -> Vec<(ConnectionId, String)> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Open(id, url) => Some((*id, url.clone())),
                    Call::Close(_) => None,
                })
                .collect()
        }

        fn last_open(&self) -> ConnectionId {
            self.opens().last().expect("no open recorded").0
        }

        fn closes(&self) -> Vec<ConnectionId> {
            self.calls
                .lock()
                .unwrap()
                .iter()
                .filter_map(|c| match c {
                    Call::Close(id) => Some(*id),
                    Call::Open(..) => None,
                })
                .collect()
        }
    }

    impl Transport for FakeTransport {
        fn open(&mut self, id: ConnectionId, url: &url::Url) -> CrResult<()> {
            self.calls.lock().unwrap().push(Call::Open(id, url.to_string()));
            if *self.fail_opens.lock().unwrap() {
                Err(CrError::Transport("connection refused".into()))
            } else {
                Ok(())
            }
        }

        fn close(&mut self, id: ConnectionId) {
            self.calls.lock().unwrap().push(Call::Close(id));
        }
    }

    #[derive(Default)]
    struct ClockState {
        now: Duration,
        next_id: u64,
        pending: Vec<(TimerId, Duration)>,
        scheduled: Vec<Duration>,
    }

    /// Simulated clock; `advance` returns the timers that expired.
    #[derive(Clone, Default)]
    struct ManualClock {
        inner: Arc<Mutex<ClockState>>,
    }

    impl ManualClock {
        fn advance(&self, by: Duration) -> Vec<TimerId> {
            let mut state = self.inner.lock().unwrap();
            state.now += by;
            let now = state.now;
            let (due, pending): (Vec<_>, Vec<_>) =
                state.pending.drain(..).partition(|(_, at)| *at <= now);
            state.pending = pending;
            due.into_iter().map(|(id, _)| id).collect()
        }

        fn scheduled(&self) -> Vec<Duration> {
            self.inner.lock().unwrap().scheduled.clone()
        }

        fn pending(&self) -> usize {
            self.inner.lock().unwrap().pending.len()
        }
    }

    impl Clock for ManualClock {
        fn schedule(&mut self, delay: Duration) -> TimerId {
            let mut state = self.inner.lock().unwrap();
            state.next_id += 1;
            let id = TimerId(state.next_id);
            let at = state.now + delay;
            state.pending.push((id, at));
            state.scheduled.push(delay);
            id
        }

        fn cancel(&mut self, id: TimerId) {
            self.inner.lock().unwrap().pending.retain(|(t, _)| *t != id);
        }
    }

    struct Harness {
        manager: ConnectionManager<FakeTransport, ManualClock>,
        transport: FakeTransport,
        clock: ManualClock,
        session: SessionToken,
        statuses: Arc<Mutex<Vec<bool>>>,
    }

    impl Harness {
        fn new(token: Option<&str>) -> Self {
            let session = SessionToken::default();
            if let Some(token) = token {
                session.set(token);
            }
            let transport = FakeTransport::default();
            let clock = ManualClock::default();
            let endpoint = Endpoint::new("https://routes.example.com", "/ws/tracking").unwrap();
            let mut manager = ConnectionManager::new(
                endpoint,
                Arc::new(session.clone()),
                transport.clone(),
                clock.clone(),
                EventDispatcher::new(),
            );

            let statuses = Arc::new(Mutex::new(Vec::new()));
            let sink = Arc::clone(&statuses);
            manager.set_status_listener(Some(Box::new(move |up| sink.lock().unwrap().push(up))));

            Self { manager, transport, clock, session, statuses }
        }

        fn connect_and_open(&mut self) -> ConnectionId {
            self.manager.connect().unwrap();
            let id = self.transport.last_open();
            self.manager.on_transport_event(id, TransportEvent::Opened);
            id
        }

        fn close(&mut self, id: ConnectionId) {
            self.manager.on_transport_event(
                id,
                TransportEvent::Closed { code: Some(1006), reason: String::new() },
            );
        }

        /// Advance simulated time and deliver whatever fired.
        fn advance(&mut self, by: Duration) -> usize {
            let fired = self.clock.advance(by);
            for id in &fired {
                self.manager.on_timer(*id);
            }
            fired.len()
        }

        fn statuses(&self) -> Vec<bool> {
            self.statuses.lock().unwrap().clone()
        }
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    #[test]
    fn test_manager_starts_idle() {
        let h = Harness::new(Some("jwt"));
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert!(!h.manager.is_connected());
        assert!(h.transport.opens().is_empty());
    }

    #[test]
    fn test_connect_opens_secure_endpoint_with_token() {
        let mut h = Harness::new(Some("jwt-123"));
        h.manager.connect().unwrap();

        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        let opens = h.transport.opens();
        assert_eq!(opens.len(), 1);
        assert_eq!(opens[0].1, "wss://routes.example.com/ws/tracking?token=jwt-123");
    }

    #[test]
    fn test_open_transitions_to_connected_and_notifies() {
        let mut h = Harness::new(Some("jwt"));
        h.connect_and_open();
        assert!(h.manager.is_connected());
        assert_eq!(h.statuses(), vec![true]);
    }

    #[test]
    fn test_connect_without_token_is_silent_for_state() {
        let mut h = Harness::new(None);
        let result = h.manager.connect();

        assert!(matches!(result, Err(CrError::AuthRequired)));
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert!(h.transport.opens().is_empty());
        assert_eq!(h.clock.pending(), 0);
        assert!(h.statuses().is_empty());
    }

    #[test]
    fn test_connect_twice_opens_once() {
        let mut h = Harness::new(Some("jwt"));
        h.manager.connect().unwrap();
        h.manager.connect().unwrap();
        assert_eq!(h.transport.opens().len(), 1);

        let id = h.transport.last_open();
        h.manager.on_transport_event(id, TransportEvent::Opened);
        h.manager.connect().unwrap();
        assert_eq!(h.transport.opens().len(), 1);
    }

    #[test]
    fn test_close_schedules_reconnect_with_backoff() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();
        h.close(id);

        assert!(matches!(
            h.manager.state(),
            ConnectionState::Reconnecting { delay, .. } if delay == ms(1000)
        ));
        assert_eq!(h.statuses(), vec![true, false]);

        assert_eq!(h.advance(ms(999)), 0);
        assert_eq!(h.transport.opens().len(), 1);
        assert_eq!(h.advance(ms(1)), 1);
        assert_eq!(h.transport.opens().len(), 2);
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
    }

    #[test]
    fn test_repeated_failures_follow_backoff_sequence() {
        let mut h = Harness::new(Some("jwt"));
        h.manager.connect().unwrap();

        for _ in 0..7 {
            let id = h.transport.last_open();
            h.close(id);
            h.advance(ms(30_000));
        }

        assert_eq!(
            h.clock.scheduled(),
            vec![ms(1000), ms(2000), ms(4000), ms(8000), ms(16_000), ms(30_000), ms(30_000)]
        );
        // Retries never give up.
        assert_eq!(h.transport.opens().len(), 8);
    }

    #[test]
    fn test_successful_open_resets_backoff() {
        let mut h = Harness::new(Some("jwt"));
        h.manager.connect().unwrap();
        for _ in 0..3 {
            let id = h.transport.last_open();
            h.close(id);
            h.advance(ms(30_000));
        }
        let id = h.transport.last_open();
        h.manager.on_transport_event(id, TransportEvent::Opened);
        h.close(id);

        assert_eq!(h.clock.scheduled(), vec![ms(1000), ms(2000), ms(4000), ms(1000)]);
    }

    #[test]
    fn test_error_closes_transport_then_close_path_recovers() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();

        h.manager.on_transport_event(id, TransportEvent::Error("reset by peer".into()));
        assert_eq!(h.manager.state(), ConnectionState::Closing);
        assert_eq!(h.transport.closes(), vec![id]);
        assert_eq!(h.clock.pending(), 0);

        // A second error while closing does not close again.
        h.manager.on_transport_event(id, TransportEvent::Error("again".into()));
        assert_eq!(h.transport.closes(), vec![id]);

        h.close(id);
        assert!(matches!(h.manager.state(), ConnectionState::Reconnecting { .. }));
        assert_eq!(h.clock.pending(), 1);
    }

    #[test]
    fn test_failed_open_takes_close_path() {
        let mut h = Harness::new(Some("jwt"));
        *h.transport.fail_opens.lock().unwrap() = true;

        h.manager.connect().unwrap();
        assert!(matches!(h.manager.state(), ConnectionState::Reconnecting { .. }));
        // Never connected, so there is nothing to report as lost.
        assert!(h.statuses().is_empty());

        *h.transport.fail_opens.lock().unwrap() = false;
        h.advance(ms(1000));
        let id = h.transport.last_open();
        h.manager.on_transport_event(id, TransportEvent::Opened);
        assert!(h.manager.is_connected());
    }

    #[test]
    fn test_disconnect_while_reconnecting_cancels_timer() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();
        h.close(id);
        let timer = match h.manager.state() {
            ConnectionState::Reconnecting { timer, .. } => timer,
            other => panic!("expected reconnecting, got {other}"),
        };

        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.advance(ms(60_000)), 0);
        assert_eq!(h.transport.opens().len(), 1);

        // Even a timer expiry already queued before the cancel has no effect.
        h.manager.on_timer(timer);
        assert_eq!(h.transport.opens().len(), 1);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
    }

    #[test]
    fn test_disconnect_while_connected_closes_and_notifies() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();

        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.transport.closes(), vec![id]);
        assert_eq!(h.statuses(), vec![true, false]);

        // The late close event from the transport does not re-arm anything.
        h.close(id);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.clock.pending(), 0);
        assert_eq!(h.statuses(), vec![true, false]);
    }

    #[test]
    fn test_error_reports_down_before_close_arrives() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();

        h.manager.on_transport_event(id, TransportEvent::Error("reset".into()));
        assert_eq!(h.statuses(), vec![true, false]);

        h.close(id);
        assert!(matches!(h.manager.state(), ConnectionState::Reconnecting { .. }));
        assert_eq!(h.statuses(), vec![true, false]);
    }

    #[test]
    fn test_disconnect_while_closing_leaves_listener_down() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();

        h.manager.on_transport_event(id, TransportEvent::Error("reset".into()));
        h.manager.disconnect();
        h.close(id);

        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.statuses(), vec![true, false]);
        assert_eq!(h.clock.pending(), 0);
    }

    #[test]
    fn test_status_alternates_across_reconnects() {
        let mut h = Harness::new(Some("jwt"));
        let first = h.connect_and_open();
        h.close(first);
        h.advance(ms(1000));
        let second = h.transport.last_open();
        h.manager.on_transport_event(second, TransportEvent::Opened);
        h.manager.disconnect();

        assert_eq!(h.statuses(), vec![true, false, true, false]);
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let mut h = Harness::new(Some("jwt"));
        h.connect_and_open();
        h.manager.disconnect();
        h.manager.disconnect();
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.transport.closes().len(), 1);
        assert_eq!(h.statuses(), vec![true, false]);
    }

    #[test]
    fn test_close_after_disconnect_during_connecting_is_ignored() {
        let mut h = Harness::new(Some("jwt"));
        h.manager.connect().unwrap();
        let id = h.transport.last_open();

        h.manager.disconnect();
        h.close(id);
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.clock.pending(), 0);
        assert!(h.statuses().is_empty());
    }

    #[test]
    fn test_reconnect_after_disconnect_ignores_old_connection_events() {
        let mut h = Harness::new(Some("jwt"));
        let old = h.connect_and_open();
        h.manager.disconnect();

        let new = h.connect_and_open();
        assert_ne!(old, new);

        h.close(old);
        assert!(h.manager.is_connected());
    }

    #[test]
    fn test_explicit_connect_while_reconnecting_skips_wait() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();
        h.close(id);

        h.manager.connect().unwrap();
        assert_eq!(h.manager.state(), ConnectionState::Connecting);
        assert_eq!(h.clock.pending(), 0);
        assert_eq!(h.transport.opens().len(), 2);
    }

    #[test]
    fn test_connect_while_closing_reconnects_after_close() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();
        h.manager.on_transport_event(id, TransportEvent::Error("boom".into()));

        h.manager.connect().unwrap();
        assert_eq!(h.manager.state(), ConnectionState::Closing);
        h.close(id);
        assert!(matches!(h.manager.state(), ConnectionState::Reconnecting { .. }));
    }

    #[test]
    fn test_token_removed_before_timer_fires() {
        let mut h = Harness::new(Some("jwt"));
        let id = h.connect_and_open();
        h.close(id);

        h.session.clear();
        h.advance(ms(1000));
        assert_eq!(h.manager.state(), ConnectionState::Idle);
        assert_eq!(h.transport.opens().len(), 1);
        assert_eq!(h.clock.pending(), 0);
    }

    #[test]
    fn test_frames_dispatched_in_order() {
        let mut h = Harness::new(Some("jwt"));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let _sub = h.manager.dispatcher().subscribe("*", move |env: &Envelope| {
            sink.lock().unwrap().push(env.event_type().unwrap_or("-").to_string());
        });

        let id = h.connect_and_open();
        for frame in [
            r#"{"type":"gps_update","tour_id":1,"latitude":1.0,"longitude":2.0}"#,
            r#"{"type":"alert","alert_type":"WRONG_PDV","tour_id":1}"#,
            r#"{"no_type":true}"#,
        ] {
            h.manager.on_transport_event(id, TransportEvent::Frame(frame.into()));
        }

        assert_eq!(*seen.lock().unwrap(), vec!["gps_update", "alert", "-"]);
    }

    #[test]
    fn test_malformed_frame_is_dropped() {
        let mut h = Harness::new(Some("jwt"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = h.manager.dispatcher().subscribe("*", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = h.connect_and_open();
        h.manager.on_transport_event(id, TransportEvent::Frame("not-json".into()));

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(h.manager.is_connected());
        assert!(h.transport.closes().is_empty());
        assert_eq!(h.statuses(), vec![true]);
    }

    #[test]
    fn test_panicking_handler_does_not_break_stream() {
        let mut h = Harness::new(Some("jwt"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _bad = h.manager.dispatcher().subscribe(EventKind::Alert, |_| panic!("bad handler"));
        let _good = h.manager.dispatcher().subscribe(EventKind::Alert, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let id = h.connect_and_open();
        for _ in 0..2 {
            h.manager.on_transport_event(
                id,
                TransportEvent::Frame(r#"{"type":"alert","alert_type":"X","tour_id":1}"#.into()),
            );
        }
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(h.manager.is_connected());
    }

    #[test]
    fn test_frames_from_stale_connection_ignored() {
        let mut h = Harness::new(Some("jwt"));
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let _sub = h.manager.dispatcher().subscribe("*", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let old = h.connect_and_open();
        h.close(old);
        h.advance(ms(1000));
        let new = h.transport.last_open();
        h.manager.on_transport_event(new, TransportEvent::Opened);

        h.manager.on_transport_event(old, TransportEvent::Frame(r#"{"type":"alert"}"#.into()));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        h.manager.on_transport_event(new, TransportEvent::Frame(r#"{"type":"alert"}"#.into()));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_status_listener_replacement() {
        let mut h = Harness::new(Some("jwt"));
        let second = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&second);
        h.manager.set_status_listener(Some(Box::new(move |up| sink.lock().unwrap().push(up))));

        let id = h.connect_and_open();
        h.manager.set_status_listener(None);
        h.close(id);

        assert!(h.statuses().is_empty());
        assert_eq!(*second.lock().unwrap(), vec![true]);
    }

    #[test]
    fn test_panicking_status_listener_is_contained() {
        let mut h = Harness::new(Some("jwt"));
        h.manager.set_status_listener(Some(Box::new(|_| panic!("listener exploded"))));
        let id = h.connect_and_open();
        assert!(h.manager.is_connected());
        h.close(id);
        assert!(matches!(h.manager.state(), ConnectionState::Reconnecting { .. }));
    }

    #[test]
    fn test_state_receiver_tracks_changes() {
        let mut h = Harness::new(Some("jwt"));
        let rx = h.manager.state_receiver();
        h.connect_and_open();
        assert_eq!(*rx.borrow(), ConnectionState::Connected);
        h.manager.disconnect();
        assert_eq!(*rx.borrow(), ConnectionState::Idle);
    }

    #[test]
    fn test_custom_reconnect_config() {
        let mut h = Harness::new(Some("jwt"));
        let endpoint = h.manager.endpoint().clone();
        h.manager = ConnectionManager::new(
            endpoint,
            Arc::new(h.session.clone()),
            h.transport.clone(),
            h.clock.clone(),
            EventDispatcher::new(),
        )
        .with_reconnect_config(ReconnectConfig {
            base_delay: ms(100),
            max_delay: ms(250),
            jitter_factor: 0.0,
        });

        h.manager.connect().unwrap();
        for _ in 0..4 {
            let id = h.transport.last_open();
            h.close(id);
            h.advance(ms(1000));
        }
        assert_eq!(h.clock.scheduled(), vec![ms(100), ms(200), ms(250), ms(250)]);
    }

    #[test]
    fn test_connection_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "connected");
        assert_eq!(
            ConnectionState::Reconnecting { delay: ms(2000), timer: TimerId(1) }.to_string(),
            "reconnecting in 2.0s"
        );
    }
}
