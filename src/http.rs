//! HTTP read API.
//!
//! Fused trackers+beacons snapshot, manual overrides, scanner
//! registration. Router layering stacks `TraceLayer`, `CompressionLayer`,
//! and a permissive `CorsLayer` through one `ServiceBuilder`.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::State;
use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::inference::Params;
use crate::mac;
use crate::metrics::Metrics;
use crate::persistence::Adapter;
use crate::state::model::{BeaconPosition, BeaconType, MatchedSighting, ScannerRegistration, Tracker};
use crate::state::Store;
use crate::webhook;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<Store>,
    pub persistence: Arc<dyn Adapter>,
    pub params: Params,
    pub metrics: Arc<Metrics>,
    /// Whether a real relational backing store is attached as an
    /// external collaborator; the shipped `FileAdapter` is not one.
    pub db_enabled: bool,
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new().allow_origin(Any).allow_methods([Method::GET, Method::POST, Method::OPTIONS]);

    Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/data", get(data))
        .route("/ble/positions", get(ble_positions))
        .route("/trackers", get(trackers))
        .route("/api/trackers", get(trackers))
        .route("/api/ble", get(api_ble))
        .route("/ble/set-position", post(set_position))
        .route("/ble/set-all-home", post(set_all_home))
        .route("/api/rutx11", post(rutx11_ingest))
        .route("/api/rutx11/register", post(rutx11_register))
        .route("/api/rutx11/scanners", get(rutx11_scanners))
        .with_state(state)
        .layer(ServiceBuilder::new().layer(TraceLayer::new_for_http()).layer(CompressionLayer::new()).layer(cors))
}

#[derive(Serialize)]
struct HealthResp {
    status: &'static str,
    db_enabled: bool,
}

async fn health(State(s): State<AppState>) -> Json<HealthResp> {
    Json(HealthResp { status: "ok", db_enabled: s.db_enabled })
}

/// Counters surface as one plain JSON object of running totals, no
/// metrics-registry crate involved.
#[derive(Serialize)]
struct MetricsResp {
    frames_accepted: u64,
    frames_rejected: u64,
    records_parsed: u64,
    sightings_matched: u64,
    sightings_unmatched: u64,
    pairing_matured: u64,
    webhook_ingested: u64,
    persist_failures: u64,
}

async fn metrics(State(s): State<AppState>) -> Json<MetricsResp> {
    let m = &s.metrics;
    Json(MetricsResp {
        frames_accepted: Metrics::get(&m.frames_accepted),
        frames_rejected: Metrics::get(&m.frames_rejected),
        records_parsed: Metrics::get(&m.records_parsed),
        sightings_matched: Metrics::get(&m.sightings_matched),
        sightings_unmatched: Metrics::get(&m.sightings_unmatched),
        pairing_matured: Metrics::get(&m.pairing_matured),
        webhook_ingested: Metrics::get(&m.webhook_ingested),
        persist_failures: Metrics::get(&m.persist_failures),
    })
}

/// Fused view of one beacon: known-beacon definition metadata joined
/// with whatever live state exists, or `UNSET` placeholders when the
/// beacon has never been sighted.
#[derive(Serialize, Clone)]
struct BeaconView {
    mac: String,
    name: String,
    category: String,
    beacon_type: BeaconType,
    position: BeaconPosition,
    carrier_id: Option<String>,
    last_update: Option<DateTime<Utc>>,
    last_seen: Option<DateTime<Utc>>,
    battery: Option<u8>,
    rssi: Option<i8>,
    magnet_status: Option<u8>,
    is_paired: bool,
    pairing_duration_seconds: i64,
}

async fn fused_beacon_map(s: &AppState) -> HashMap<String, BeaconView> {
    let defs = s.store.known_beacons_snapshot();
    let live = s.store.snapshot_beacons().await;
    let live_by_mac: HashMap<_, _> = live.into_iter().map(|b| (b.mac.clone(), b)).collect();

    defs.into_iter()
        .map(|def| {
            let view = match live_by_mac.get(&def.mac) {
                Some(b) => BeaconView {
                    mac: def.mac.clone(),
                    name: def.name,
                    category: def.category,
                    beacon_type: def.beacon_type,
                    position: b.position,
                    carrier_id: Some(b.carrier_id.clone()),
                    last_update: b.last_update,
                    last_seen: Some(b.last_seen),
                    battery: b.battery,
                    rssi: b.rssi,
                    magnet_status: b.magnet_status,
                    is_paired: b.is_paired,
                    pairing_duration_seconds: b.pairing_duration_seconds,
                },
                None => BeaconView {
                    mac: def.mac.clone(),
                    name: def.name,
                    category: def.category,
                    beacon_type: def.beacon_type,
                    position: BeaconPosition::Unset,
                    carrier_id: None,
                    last_update: None,
                    last_seen: None,
                    battery: None,
                    rssi: None,
                    magnet_status: None,
                    is_paired: false,
                    pairing_duration_seconds: 0,
                },
            };
            (def.mac, view)
        })
        .collect()
}

#[derive(Serialize)]
struct DataResp {
    success: bool,
    rows: Vec<Tracker>,
    ble_positions: HashMap<String, BeaconView>,
    source: &'static str,
    ble_count: usize,
    ble_with_position: usize,
}

async fn data(State(s): State<AppState>) -> Json<DataResp> {
    let rows = s.store.snapshot_trackers().await;
    let ble_positions = fused_beacon_map(&s).await;
    let ble_with_position = ble_positions.values().filter(|b| b.position.is_set()).count();
    Json(DataResp { success: true, ble_count: ble_positions.len(), ble_with_position, rows, ble_positions, source: "memory" })
}

async fn ble_positions(State(s): State<AppState>) -> Json<HashMap<String, BeaconView>> {
    Json(fused_beacon_map(&s).await)
}

async fn trackers(State(s): State<AppState>) -> Json<HashMap<String, Tracker>> {
    let rows = s.store.snapshot_trackers().await;
    Json(rows.into_iter().map(|t| (t.imei.clone(), t)).collect())
}

async fn api_ble(State(s): State<AppState>) -> Json<Vec<BeaconView>> {
    Json(fused_beacon_map(&s).await.into_values().collect())
}

#[derive(Serialize)]
struct ErrorResp {
    success: bool,
    error: String,
}

fn bad_request(error: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ErrorResp { success: false, error: error.into() })).into_response()
}

#[derive(Deserialize)]
struct SetPositionReq {
    mac: String,
    lat: f64,
    lng: f64,
}

async fn set_position(State(s): State<AppState>, Json(req): Json<SetPositionReq>) -> Response {
    let normalized = mac::normalize(&req.mac);
    let known = s.store.known_mac_list();
    if !known.contains(&normalized) {
        return bad_request(format!("unknown mac: {}", req.mac));
    }
    let now = Utc::now();
    s.store.set_position(&normalized, req.lat, req.lng, now).await;
    s.persistence.upsert_beacon_position(&normalized, req.lat, req.lng, "manual", false, 0, None, None);
    StatusCode::OK.into_response()
}

#[derive(Deserialize)]
struct SetAllHomeReq {
    lat: f64,
    lng: f64,
}

async fn set_all_home(State(s): State<AppState>, Json(req): Json<SetAllHomeReq>) -> Response {
    let now = Utc::now();
    let n = s.store.set_all_home(req.lat, req.lng, now).await;
    Json(serde_json::json!({"success": true, "updated": n})).into_response()
}

async fn rutx11_ingest(State(s): State<AppState>, body: axum::body::Bytes) -> Response {
    let ingest = match webhook::parse(&body) {
        Ok(i) => i,
        Err(e) => return bad_request(e.to_string()),
    };

    let scanner = s.store.get_scanner(&ingest.scanner_id);
    let (lat, lng) = match (ingest.lat, ingest.lng) {
        (Some(lat), Some(lng)) => (Some(lat), Some(lng)),
        _ => (scanner.as_ref().map(|r| r.lat), scanner.as_ref().map(|r| r.lng)),
    };

    let known = s.store.known_mac_list();
    let patterns = s.store.strict_patterns();
    let now = Utc::now();
    let mut matched = 0usize;
    Metrics::add(&s.metrics.webhook_ingested, ingest.sightings.len() as u64);

    for raw in &ingest.sightings {
        let canonical = mac::match_mac(&raw.mac, &known, &patterns);
        let is_known = canonical.is_some();
        let normalized_for_log = canonical.clone().unwrap_or_else(|| mac::normalize(&raw.mac));

        if let (Some(mac), Some(lat), Some(lng)) = (canonical.clone(), lat, lng) {
            let sighting = MatchedSighting { mac, rssi: raw.rssi, battery: raw.battery, magnet_status: None };
            let event = s.store.apply_fixed_scanner(&ingest.scanner_id, lat, lng, &sighting, now).await;
            s.persistence.upsert_beacon_position(
                &sighting.mac,
                lat,
                lng,
                &event.carrier_id,
                true,
                0,
                raw.battery,
                None,
            );
            matched += 1;
        }
        s.persistence.append_scan(&normalized_for_log, lat, lng, &format!("rutx11:{}", ingest.scanner_id), raw.rssi, raw.battery, None, is_known, now);
    }

    Json(serde_json::json!({"success": true, "matched": matched, "received": ingest.sightings.len()})).into_response()
}

#[derive(Deserialize)]
struct RegisterReq {
    scanner_id: String,
    lat: f64,
    lng: f64,
    name: String,
}

async fn rutx11_register(State(s): State<AppState>, Json(req): Json<RegisterReq>) -> Response {
    let reg = ScannerRegistration { scanner_id: req.scanner_id.clone(), lat: req.lat, lng: req.lng, name: req.name.clone() };
    s.store.register_scanner(reg);
    s.persistence.upsert_scanner(&req.scanner_id, req.lat, req.lng, &req.name);
    StatusCode::OK.into_response()
}

async fn rutx11_scanners(State(s): State<AppState>) -> Json<Vec<ScannerRegistration>> {
    Json(s.store.list_scanners())
}
