//! Data model. Plain structs with serde derives so the HTTP layer can
//! hand them straight to `axum::Json`.

use chrono::{DateTime, Utc};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GpsReading {
    pub lat: f64,
    pub lng: f64,
    pub speed_kmh: f64,
    pub heading: u16,
    pub satellites: u8,
    pub altitude: u16,
    pub ts: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Tracker {
    pub imei: String,
    pub label: Option<String>,
    pub last_fix: Option<GpsReading>,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BeaconType {
    EyeBeacon,
    EyeSensor,
}

#[derive(Debug, Clone, Serialize)]
pub struct KnownBeaconDef {
    pub mac: String,
    pub name: String,
    pub category: String,
    pub beacon_type: BeaconType,
    pub serial: String,
}

/// Tagged position — deliberately not `Option<(f64, f64)>` so the JSON
/// shape is a stable `{"kind": "set", "lat":..}` / `{"kind": "unset"}`
/// rather than a dict-of-anything.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BeaconPosition {
    Unset,
    Set { lat: f64, lng: f64 },
}

impl BeaconPosition {
    pub fn is_set(&self) -> bool {
        matches!(self, BeaconPosition::Set { .. })
    }

    pub fn as_latlng(&self) -> Option<(f64, f64)> {
        match self {
            BeaconPosition::Set { lat, lng } => Some((*lat, *lng)),
            BeaconPosition::Unset => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Pairing {
    pub carrier_id: String,
    pub start_time: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BeaconState {
    pub mac: String,
    pub position: BeaconPosition,
    pub carrier_id: String,
    pub last_update: Option<DateTime<Utc>>,
    pub last_seen: DateTime<Utc>,
    pub battery: Option<u8>,
    pub rssi: Option<i8>,
    pub magnet_status: Option<u8>,
    pub pairing: Pairing,
    pub is_paired: bool,
    pub pairing_duration_seconds: i64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScannerRegistration {
    pub scanner_id: String,
    pub lat: f64,
    pub lng: f64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ScanEvent {
    pub mac: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub carrier_id: String,
    pub rssi: Option<i8>,
    pub battery: Option<u8>,
    pub magnet_status: Option<u8>,
    pub is_known: bool,
    pub ts: DateTime<Utc>,
    /// Whether this call actually wrote a new position, as opposed to
    /// `lat`/`lng` merely echoing a position set by some earlier call.
    pub position_updated: bool,
}

/// One beacon sighting after MAC extraction and matching, ready for
/// position inference.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchedSighting {
    pub mac: String,
    pub rssi: Option<i8>,
    pub battery: Option<u8>,
    pub magnet_status: Option<u8>,
}
