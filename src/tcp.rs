//! Raw TCP listener for inbound tracker connections.
//!
//! Accept loop with one independent worker per connection: handshake,
//! then a frame-decode loop with a 5-minute idle read timeout and a
//! `watch`-channel graceful shutdown shared with the HTTP server.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, instrument, warn};

use crate::config::Settings;
use crate::inference::Params;
use crate::mac;
use crate::metrics::Metrics;
use crate::persistence::Adapter;
use crate::protocol::beacon;
use crate::protocol::frame::{self, DecodedFrame};
use crate::protocol::record::AvlRecord;
use crate::state::model::{GpsReading, MatchedSighting};
use crate::state::Store;

fn record_time(record: &AvlRecord) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(record.timestamp_ms as i64).unwrap_or_else(Utc::now)
}

fn matched_sightings(record: &AvlRecord, known_macs: &[String], patterns: &[mac::StrictPattern], metrics: &Metrics) -> Vec<MatchedSighting> {
    let mut sightings: Vec<_> = record.beacons.clone();
    for (_io_id, blob) in &record.vendor_blobs {
        sightings.extend(beacon::extract_format_b(blob, known_macs));
    }

    let mut matched = Vec::with_capacity(sightings.len());
    for s in sightings {
        match mac::match_mac(&s.mac, known_macs, patterns) {
            Some(canonical) => {
                Metrics::inc(&metrics.sightings_matched);
                matched.push(MatchedSighting { mac: canonical, rssi: s.rssi, battery: s.battery, magnet_status: s.magnet_status });
            }
            None => Metrics::inc(&metrics.sightings_unmatched),
        }
    }
    matched
}

async fn apply_frame(
    imei: &str,
    decoded: &DecodedFrame,
    store: &Arc<Store>,
    persistence: &Arc<dyn Adapter>,
    params: &Params,
    metrics: &Metrics,
) {
    for record in &decoded.records {
        let fix_ts = record_time(record);
        let now = Utc::now();
        let fix = GpsReading {
            lat: record.gps.lat,
            lng: record.gps.lng,
            speed_kmh: record.gps.speed_kmh as f64,
            heading: record.gps.heading,
            satellites: record.gps.satellites,
            altitude: record.gps.altitude,
            ts: fix_ts,
        };
        store.upsert_tracker_fix(imei, fix, now).await;
        persistence.upsert_tracker(imei, None, record.gps.lat, record.gps.lng, Some(record.gps.speed_kmh as f64), None);

        let known = store.known_mac_list();
        let patterns = store.strict_patterns();
        let sightings = matched_sightings(record, &known, &patterns, metrics);
        if sightings.is_empty() {
            continue;
        }

        let events = store
            .process_sightings(imei, record.gps.lat, record.gps.lng, record.gps.speed_kmh as f64, &sightings, now, params)
            .await;

        for event in &events {
            if event.position_updated {
                if let (Some(lat), Some(lng)) = (event.lat, event.lng) {
                    if let Some(beacon) = store.get_beacon(&event.mac).await {
                        if beacon.is_paired && beacon.pairing_duration_seconds == 0 {
                            Metrics::inc(&metrics.pairing_matured);
                        }
                        persistence.upsert_beacon_position(
                            &event.mac,
                            lat,
                            lng,
                            &event.carrier_id,
                            beacon.is_paired,
                            beacon.pairing_duration_seconds,
                            event.battery,
                            event.magnet_status,
                        );
                    }
                }
            }
            persistence.append_scan(
                &event.mac,
                event.lat,
                event.lng,
                &event.carrier_id,
                event.rssi,
                event.battery,
                event.magnet_status,
                event.is_known,
                event.ts,
            );
        }
    }
}

#[instrument(skip(stream, store, persistence, params, settings, metrics))]
async fn handle_connection(
    mut stream: TcpStream,
    peer: std::net::SocketAddr,
    store: Arc<Store>,
    persistence: Arc<dyn Adapter>,
    params: Params,
    settings: Arc<Settings>,
    metrics: Arc<Metrics>,
) {
    let imei = match frame::read_handshake(&mut stream).await {
        Ok(imei) => imei,
        Err(e) => {
            debug!(%peer, error = %e, "handshake_rejected");
            let _ = frame::write_handshake_reply(&mut stream, false).await;
            return;
        }
    };

    if frame::write_handshake_reply(&mut stream, true).await.is_err() {
        return;
    }
    info!(%peer, imei = %imei, "handshake_accepted");

    let idle = Duration::from_secs(settings.socket_idle_timeout_secs);

    loop {
        let decoded = match tokio::time::timeout(idle, frame::read_frame(&mut stream, settings.validate_crc)).await {
            Ok(Ok(Some(decoded))) => decoded,
            Ok(Ok(None)) => {
                debug!(%peer, imei = %imei, "connection_closed_clean");
                return;
            }
            Ok(Err(e)) => {
                warn!(%peer, imei = %imei, error = %e, "frame_error_closing");
                Metrics::inc(&metrics.frames_rejected);
                return;
            }
            Err(_) => {
                debug!(%peer, imei = %imei, "idle_timeout_continuing");
                continue;
            }
        };

        if decoded.ack_count == 0 {
            warn!(%peer, imei = %imei, "zero_records_parsed_closing");
            Metrics::inc(&metrics.frames_rejected);
            return;
        }
        Metrics::inc(&metrics.frames_accepted);
        Metrics::add(&metrics.records_parsed, decoded.records.len() as u64);

        apply_frame(&imei, &decoded, &store, &persistence, &params, &metrics).await;

        if frame::write_ack(&mut stream, decoded.ack_count as u32).await.is_err() {
            return;
        }
    }
}

pub async fn run(
    settings: Arc<Settings>,
    store: Arc<Store>,
    persistence: Arc<dyn Adapter>,
    params: Params,
    metrics: Arc<Metrics>,
    shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], settings.tcp_port));
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "tcp_listening");
    serve(listener, settings, store, persistence, params, metrics, shutdown).await
}

/// Accept loop over an already-bound listener, split out from `run` so
/// tests can bind an ephemeral port and drive real socket I/O.
pub async fn serve(
    listener: TcpListener,
    settings: Arc<Settings>,
    store: Arc<Store>,
    persistence: Arc<dyn Adapter>,
    params: Params,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> std::io::Result<()> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, peer) = accepted?;
                let store = store.clone();
                let persistence = persistence.clone();
                let settings = settings.clone();
                let metrics = metrics.clone();
                tokio::spawn(handle_connection(stream, peer, store, persistence, params, settings, metrics));
            }
            _ = shutdown.changed() => {
                info!("tcp_listener_shutting_down");
                return Ok(());
            }
        }
    }
}
