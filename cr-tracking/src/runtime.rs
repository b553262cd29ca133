//! Tokio driver for the tracking connection.
//!
//! A single task owns the [`ConnectionManager`] and feeds it API commands,
//! socket events and timer expiries from one loop. [`TrackingClient`] is the
//! cloneable handle the rest of the application holds.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};
use url::Url;

use cr_core::config::AppConfig;
use cr_core::error::{CrError, CrResult};

use crate::backoff::ReconnectConfig;
use crate::credentials::CredentialProvider;
use crate::dispatcher::{EventDispatcher, Subscription, Topic};
use crate::endpoint::Endpoint;
use crate::events::Envelope;
use crate::manager::{ConnectionManager, ConnectionState, StatusListener};
use crate::transport::{Clock, ConnectionId, TimerId, Transport, TransportEvent};

const CLIENT_CLOSE_CODE: u16 = 1000;

/// Requests from client handles.
enum Command {
    Connect(oneshot::Sender<CrResult<()>>),
    Disconnect(oneshot::Sender<()>),
    SetStatusListener(Option<StatusListener>),
}

/// Events produced by sockets and timers.
#[derive(Debug)]
enum DriverEvent {
    Transport(ConnectionId, TransportEvent),
    Timer(TimerId),
}

/// WebSocket transport backed by tokio-tungstenite.
///
/// Each open spawns one socket task; closing signals it to send a close
/// frame and report `Closed`.
struct WsTransport {
    events: mpsc::UnboundedSender<DriverEvent>,
    sockets: HashMap<ConnectionId, oneshot::Sender<()>>,
}

impl WsTransport {
    fn new(events: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self {
            events,
            sockets: HashMap::new(),
        }
    }
}

impl Transport for WsTransport {
    fn open(&mut self, id: ConnectionId, url: &Url) -> CrResult<()> {
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        self.sockets.insert(id, shutdown_tx);
        tokio::spawn(run_socket(id, url.clone(), shutdown_rx, self.events.clone()));
        Ok(())
    }

    fn close(&mut self, id: ConnectionId) {
        if let Some(shutdown) = self.sockets.remove(&id) {
            // The task may already have finished on its own.
            let _ = shutdown.send(());
        }
    }
}

async fn run_socket(
    id: ConnectionId,
    url: Url,
    mut shutdown: oneshot::Receiver<()>,
    events: mpsc::UnboundedSender<DriverEvent>,
) {
    let emit = |event: TransportEvent| {
        let _ = events.send(DriverEvent::Transport(id, event));
    };

    let stream = tokio::select! {
        result = connect_async(url.as_str()) => match result {
            Ok((stream, _response)) => stream,
            Err(e) => {
                emit(TransportEvent::Error(e.to_string()));
                emit(TransportEvent::Closed { code: None, reason: e.to_string() });
                return;
            }
        },
        _ = &mut shutdown => {
            emit(TransportEvent::Closed { code: None, reason: "closed before open".into() });
            return;
        }
    };

    let (mut write, mut read) = stream.split();
    emit(TransportEvent::Opened);

    let (code, reason) = loop {
        tokio::select! {
            message = read.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    emit(TransportEvent::Frame(text.as_str().to_owned()));
                }
                Some(Ok(Message::Close(frame))) => {
                    break match frame {
                        Some(frame) => (Some(u16::from(frame.code)), frame.reason.as_str().to_owned()),
                        None => (None, String::new()),
                    };
                }
                // Pong is handled by tungstenite; binary frames carry no events.
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    emit(TransportEvent::Error(e.to_string()));
                    break (None, e.to_string());
                }
                None => break (None, "stream ended".to_string()),
            },
            _ = &mut shutdown => {
                let _ = write.send(Message::Close(None)).await;
                break (Some(CLIENT_CLOSE_CODE), "closed by client".to_string());
            }
        }
    };

    emit(TransportEvent::Closed { code, reason });
}

/// Clock backed by `tokio::time::sleep` tasks.
struct TokioClock {
    events: mpsc::UnboundedSender<DriverEvent>,
    next_id: u64,
    timers: HashMap<TimerId, JoinHandle<()>>,
}

impl TokioClock {
    fn new(events: mpsc::UnboundedSender<DriverEvent>) -> Self {
        Self {
            events,
            next_id: 0,
            timers: HashMap::new(),
        }
    }
}

impl Clock for TokioClock {
    fn schedule(&mut self, delay: Duration) -> TimerId {
        self.timers.retain(|_, handle| !handle.is_finished());

        self.next_id += 1;
        let id = TimerId(self.next_id);
        let events = self.events.clone();
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(DriverEvent::Timer(id));
        });
        self.timers.insert(id, handle);
        id
    }

    fn cancel(&mut self, id: TimerId) {
        if let Some(handle) = self.timers.remove(&id) {
            handle.abort();
        }
    }
}

impl Drop for TokioClock {
    fn drop(&mut self) {
        for (_, handle) in self.timers.drain() {
            handle.abort();
        }
    }
}

/// Owns the manager; stops when every client handle is gone.
struct Driver {
    manager: ConnectionManager<WsTransport, TokioClock>,
    commands: mpsc::UnboundedReceiver<Command>,
    events: mpsc::UnboundedReceiver<DriverEvent>,
}

impl Driver {
    async fn run(mut self) {
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(event) = self.events.recv() => self.handle_event(event),
            }
        }

        self.manager.disconnect();
        debug!("tracking driver stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Connect(reply) => {
                let _ = reply.send(self.manager.connect());
            }
            Command::Disconnect(reply) => {
                self.manager.disconnect();
                let _ = reply.send(());
            }
            Command::SetStatusListener(listener) => {
                self.manager.set_status_listener(listener);
            }
        }
    }

    fn handle_event(&mut self, event: DriverEvent) {
        match event {
            DriverEvent::Transport(id, event) => self.manager.on_transport_event(id, event),
            DriverEvent::Timer(id) => self.manager.on_timer(id),
        }
    }
}

/// Cloneable handle to a running tracking connection.
///
/// Subscriptions go straight to the shared dispatcher; connection control
/// is forwarded to the driver task.
#[derive(Clone)]
pub struct TrackingClient {
    commands: mpsc::UnboundedSender<Command>,
    dispatcher: EventDispatcher,
    state_rx: watch::Receiver<ConnectionState>,
    endpoint: Endpoint,
}

impl TrackingClient {
    /// Start the driver task. Must be called from within a tokio runtime.
    pub fn spawn(
        endpoint: Endpoint,
        credentials: Arc<dyn CredentialProvider>,
        reconnect: ReconnectConfig,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let dispatcher = EventDispatcher::new();

        let manager = ConnectionManager::new(
            endpoint.clone(),
            credentials,
            WsTransport::new(event_tx.clone()),
            TokioClock::new(event_tx),
            dispatcher.clone(),
        )
        .with_reconnect_config(reconnect);
        let state_rx = manager.state_receiver();

        let driver = Driver {
            manager,
            commands: command_rx,
            events: event_rx,
        };
        tokio::spawn(driver.run());
        info!("tracking client started for {endpoint}");

        Self {
            commands: command_tx,
            dispatcher,
            state_rx,
            endpoint,
        }
    }

    /// Build the endpoint and reconnect tuning from application config.
    pub fn from_config(
        config: &AppConfig,
        credentials: Arc<dyn CredentialProvider>,
    ) -> CrResult<Self> {
        let endpoint = Endpoint::from_config(&config.server.address, &config.tracking)?;
        Ok(Self::spawn(
            endpoint,
            credentials,
            ReconnectConfig::from(&config.tracking),
        ))
    }

    /// Start connecting. Fails with `AuthRequired` when no token is available.
    pub async fn connect(&self) -> CrResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Connect(reply_tx))?;
        reply_rx.await.map_err(|_| CrError::ClientShutdown)?
    }

    /// Close the connection and cancel any pending reconnect.
    pub async fn disconnect(&self) -> CrResult<()> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(Command::Disconnect(reply_tx))?;
        reply_rx.await.map_err(|_| CrError::ClientShutdown)
    }

    /// Register `handler` for an event type, or `"*"` for every frame.
    pub fn subscribe<F>(&self, topic: impl Into<Topic>, handler: F) -> Subscription
    where
        F: Fn(&Envelope) + Send + Sync + 'static,
    {
        self.dispatcher.subscribe(topic, handler)
    }

    /// Replace the connected/disconnected listener. `None` removes it.
    pub fn set_status_listener(&self, listener: Option<StatusListener>) -> CrResult<()> {
        self.send(Command::SetStatusListener(listener))
    }

    pub fn is_connected(&self) -> bool {
        *self.state_rx.borrow() == ConnectionState::Connected
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Watch every state change.
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn dispatcher(&self) -> &EventDispatcher {
        &self.dispatcher
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn send(&self, command: Command) -> CrResult<()> {
        self.commands.send(command).map_err(|_| {
            warn!("tracking driver is no longer running");
            CrError::ClientShutdown
        })
    }
}
