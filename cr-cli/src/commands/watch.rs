//! Watch command - connect and print live tracking events.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::Local;
use console::style;
use dialoguer::Password;
use tokio::sync::mpsc;
use tracing::{error, warn};

use cr_core::config::AppConfig;
use cr_core::constants::{TOKEN_ENV_VAR, WILDCARD_TOPIC};
use cr_core::error::{CrError, CrResult};
use cr_tracking::{
    ConnectionState, Envelope, SessionToken, StopEventKind, TrackingClient, TrackingEvent,
};

use crate::OutputFormat;

/// Arguments of the watch command.
pub struct WatchOptions {
    pub address: Option<String>,
    pub token: Option<String>,
    /// Event types to print; empty means every frame.
    pub events: Vec<String>,
    /// Where to save the address after a successful connect.
    pub save: Option<PathBuf>,
}

/// Run the watch command.
pub async fn run(mut config: AppConfig, options: WatchOptions, format: OutputFormat) -> CrResult<()> {
    let address = super::resolve_address(&config, options.address)?;
    config.server.address = address.clone();

    let env_token = std::env::var(TOKEN_ENV_VAR).ok();
    let token = match pick_token(options.token, env_token, config.access_token()) {
        Some(token) => token,
        None => Password::new()
            .with_prompt("Access token")
            .interact()
            .map_err(|e| CrError::Internal(e.to_string()))?,
    };

    let session = SessionToken::new(token);
    let client = TrackingClient::from_config(&config, Arc::new(session))?;

    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Envelope>();
    let topics = if options.events.is_empty() {
        vec![WILDCARD_TOPIC.to_string()]
    } else {
        options.events
    };
    let _subscriptions: Vec<_> = topics
        .iter()
        .map(|topic| {
            let tx = event_tx.clone();
            client.subscribe(topic.as_str(), move |envelope: &Envelope| {
                let _ = tx.send(envelope.clone());
            })
        })
        .collect();
    drop(event_tx);

    if format == OutputFormat::Text {
        println!(
            "{} Connecting to {}...",
            style("[1/2]").bold().dim(),
            client.endpoint()
        );
    }
    client.connect().await?;

    let mut states = client.state_receiver();
    let mut saved = false;

    loop {
        tokio::select! {
            Some(envelope) = event_rx.recv() => print_event(&envelope, format),
            changed = states.changed() => {
                if changed.is_err() {
                    error!("tracking driver stopped unexpectedly");
                    break;
                }
                let state = *states.borrow_and_update();
                if format == OutputFormat::Text {
                    print_state(state);
                }
                if state == ConnectionState::Connected && !saved {
                    if let Some(path) = options.save.as_deref() {
                        match config.save_to_file(path) {
                            Ok(()) => println!("  {} Config saved to {}", style("OK").green(), path.display()),
                            Err(e) => warn!("could not save config: {e}"),
                        }
                    }
                    saved = true;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                if format == OutputFormat::Text {
                    println!("\n  Disconnecting...");
                }
                client.disconnect().await?;
                break;
            }
        }
    }

    Ok(())
}

/// Token precedence: flag, then environment, then config.
fn pick_token(
    flag: Option<String>,
    env: Option<String>,
    config: Option<&str>,
) -> Option<String> {
    [flag, env, config.map(str::to_string)]
        .into_iter()
        .flatten()
        .map(|t| t.trim().to_string())
        .find(|t| !t.is_empty())
}

fn print_state(state: ConnectionState) {
    match state {
        ConnectionState::Connected => println!(
            "{} {} Listening for events... (Ctrl+C to stop)",
            style("[2/2]").bold().dim(),
            style("OK").green().bold()
        ),
        ConnectionState::Reconnecting { .. } => {
            println!("  {} Connection lost, {state}", style("WARN").yellow())
        }
        ConnectionState::Idle => println!("  {} Disconnected", style("--").dim()),
        ConnectionState::Connecting | ConnectionState::Closing => {}
    }
}

fn print_event(envelope: &Envelope, format: OutputFormat) {
    let now = Local::now();
    match format {
        OutputFormat::Json => {
            let line = serde_json::json!({
                "received_at": now.to_rfc3339(),
                "event": envelope.raw(),
            });
            println!("{line}");
        }
        OutputFormat::Text => {
            let tag = envelope.event_type().unwrap_or("?");
            println!(
                "  {} {} {}",
                style(now.format("%H:%M:%S")).dim(),
                style(format!("[{tag}]")).cyan(),
                describe(envelope)
            );
        }
    }
}

/// One-line summary of a tracking event.
fn describe(envelope: &Envelope) -> String {
    match envelope.event() {
        TrackingEvent::GpsUpdate(gps) => {
            let mut line = format!(
                "tour {} at {:.5}, {:.5}",
                gps.tour_id, gps.latitude, gps.longitude
            );
            if let Some(speed) = gps.speed {
                line.push_str(&format!(" ({speed:.0} km/h)"));
            }
            if let Some(driver) = &gps.driver_name {
                line.push_str(&format!(" - {driver}"));
            }
            line
        }
        TrackingEvent::StopEvent(stop) => {
            let what = match stop.event {
                StopEventKind::Arrival => "arrived at",
                StopEventKind::Closure if stop.forced => "force-closed",
                StopEventKind::Closure => "closed",
            };
            match &stop.pdv_code {
                Some(pdv) => format!("tour {} {what} stop {} ({pdv})", stop.tour_id, stop.stop_id),
                None => format!("tour {} {what} stop {}", stop.tour_id, stop.stop_id),
            }
        }
        TrackingEvent::Alert(alert) => {
            let mut line = format!("{} on tour {}", style(&alert.alert_type).red(), alert.tour_id);
            if let Some(message) = alert.message.as_deref().filter(|m| !m.is_empty()) {
                line.push_str(&format!(": {message}"));
            }
            line
        }
        TrackingEvent::TourStatus(status) => {
            format!("tour {} is now {}", status.tour_id, status.status)
        }
        TrackingEvent::SupportScan(scan) => format!(
            "tour {} scanned support {} at stop {}",
            scan.tour_id, scan.barcode, scan.stop_id
        ),
        TrackingEvent::Unknown => serde_json::Value::Object(envelope.raw().clone()).to_string(),
    }
}
