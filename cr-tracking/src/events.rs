//! Tracking event types and the parsed frame envelope.
//!
//! Defines every event kind the backend broadcasts on `/ws/tracking` and
//! a typed view over each payload. Routing always uses the raw `type` tag,
//! so a frame whose fields do not match the typed view is still delivered.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use cr_core::constants::event_types;
use cr_core::error::{CrError, CrResult};

/// All event kinds emitted by the tracking backend.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// A driver position sample (`gps_update`).
    GpsUpdate,
    /// Arrival at or closure of a delivery stop (`stop_event`).
    StopEvent,
    /// An operational alert such as a PDV mismatch (`alert`).
    Alert,
    /// A tour changed status, e.g. completed on return to base (`tour_status`).
    TourStatus,
    /// A support barcode was scanned at a stop (`support_scan`).
    SupportScan,
    /// Unknown/unhandled event type.
    Unknown(String),
}

impl EventKind {
    /// Parse an event type tag from the server.
    pub fn from_str(s: &str) -> Self {
        match s {
            event_types::GPS_UPDATE => Self::GpsUpdate,
            event_types::STOP_EVENT => Self::StopEvent,
            event_types::ALERT => Self::Alert,
            event_types::TOUR_STATUS => Self::TourStatus,
            event_types::SUPPORT_SCAN => Self::SupportScan,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// Convert to the server event tag.
    pub fn as_str(&self) -> &str {
        match self {
            Self::GpsUpdate => event_types::GPS_UPDATE,
            Self::StopEvent => event_types::STOP_EVENT,
            Self::Alert => event_types::ALERT,
            Self::TourStatus => event_types::TOUR_STATUS,
            Self::SupportScan => event_types::SUPPORT_SCAN,
            Self::Unknown(s) => s.as_str(),
        }
    }
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `gps_update` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GpsUpdate {
    pub tour_id: i64,
    #[serde(default)]
    pub tour_code: String,
    pub driver_name: Option<String>,
    pub latitude: f64,
    pub longitude: f64,
    /// Speed in km/h as reported by the driver app.
    pub speed: Option<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    pub timestamp: Option<String>,
}

/// What happened at a stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StopEventKind {
    Arrival,
    Closure,
}

/// Payload of a `stop_event` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StopEvent {
    pub event: StopEventKind,
    pub tour_id: i64,
    pub stop_id: i64,
    /// Point-of-sale code, sent with arrivals.
    pub pdv_code: Option<String>,
    pub timestamp: Option<String>,
    /// Set on closures that bypassed the normal checks.
    #[serde(default)]
    pub forced: bool,
}

/// Payload of an `alert` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Alert category, e.g. `WRONG_PDV` or `FORCED_CLOSURE`.
    pub alert_type: String,
    pub tour_id: i64,
    pub stop_id: Option<i64>,
    /// Absent or null for alerts without free text.
    pub message: Option<String>,
}

/// Payload of a `tour_status` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TourStatus {
    pub tour_id: i64,
    #[serde(default)]
    pub tour_code: String,
    pub status: String,
    pub actual_return_time: Option<String>,
}

/// Payload of a `support_scan` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupportScan {
    pub tour_id: i64,
    pub stop_id: i64,
    pub barcode: String,
    pub timestamp: Option<String>,
}

/// Typed view of a tracking frame.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackingEvent {
    GpsUpdate(GpsUpdate),
    StopEvent(StopEvent),
    Alert(Alert),
    TourStatus(TourStatus),
    SupportScan(SupportScan),
    /// Untagged frames, unknown tags, and known tags whose fields did not decode.
    Unknown,
}

impl TrackingEvent {
    fn decode(kind: &EventKind, raw: &Map<String, Value>) -> Self {
        let value = Value::Object(raw.clone());
        let decoded = match kind {
            EventKind::GpsUpdate => serde_json::from_value(value).map(Self::GpsUpdate),
            EventKind::StopEvent => serde_json::from_value(value).map(Self::StopEvent),
            EventKind::Alert => serde_json::from_value(value).map(Self::Alert),
            EventKind::TourStatus => serde_json::from_value(value).map(Self::TourStatus),
            EventKind::SupportScan => serde_json::from_value(value).map(Self::SupportScan),
            EventKind::Unknown(_) => return Self::Unknown,
        };
        decoded.unwrap_or_else(|e| {
            debug!("{kind} payload did not match its typed view: {e}");
            Self::Unknown
        })
    }
}

/// A successfully parsed inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Envelope {
    event_type: Option<String>,
    event: TrackingEvent,
    raw: Map<String, Value>,
}

impl Envelope {
    /// Parse one text frame. Anything other than a JSON object is malformed.
    pub fn parse(text: &str) -> CrResult<Self> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| CrError::MalformedPayload(e.to_string()))?;
        match value {
            Value::Object(raw) => Ok(Self::from_object(raw)),
            other => Err(CrError::MalformedPayload(format!(
                "expected a JSON object, got {}",
                json_type_name(&other)
            ))),
        }
    }

    /// Build an envelope from an already-parsed JSON object.
    pub fn from_object(raw: Map<String, Value>) -> Self {
        let event_type = raw
            .get("type")
            .and_then(Value::as_str)
            .filter(|t| !t.is_empty())
            .map(str::to_string);
        let event = match &event_type {
            Some(tag) => TrackingEvent::decode(&EventKind::from_str(tag), &raw),
            None => TrackingEvent::Unknown,
        };
        Self { event_type, event, raw }
    }

    /// The non-empty `type` tag, if the frame carried one.
    pub fn event_type(&self) -> Option<&str> {
        self.event_type.as_deref()
    }

    /// Typed view of the payload.
    pub fn event(&self) -> &TrackingEvent {
        &self.event
    }

    /// The full parsed object.
    pub fn raw(&self) -> &Map<String, Value> {
        &self.raw
    }

    /// A single field of the parsed object.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.raw.get(field)
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
