//! Persistence adapter.
//!
//! `Adapter` is the contract; `FileAdapter` is the one backing
//! implementation, an NDJSON append log written by an mpsc-batched
//! background worker. Adapter errors are logged and swallowed — ingest
//! must never block on disk.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::metrics::Metrics;
use crate::state::model::{BeaconState, KnownBeaconDef, ScannerRegistration};

#[async_trait::async_trait]
pub trait Adapter: Send + Sync {
    async fn load_definitions(&self) -> HashMap<String, KnownBeaconDef>;
    async fn load_beacon_state(&self) -> HashMap<String, BeaconState>;
    async fn load_scanners(&self) -> HashMap<String, ScannerRegistration>;

    fn upsert_beacon_position(
        &self,
        mac: &str,
        lat: f64,
        lng: f64,
        carrier_id: &str,
        is_paired: bool,
        pairing_duration_s: i64,
        battery: Option<u8>,
        magnet: Option<u8>,
    );

    fn upsert_tracker(&self, imei: &str, label: Option<&str>, lat: f64, lng: f64, speed: Option<f64>, battery: Option<u8>);

    fn append_scan(
        &self,
        mac: &str,
        lat: Option<f64>,
        lng: Option<f64>,
        carrier_id: &str,
        rssi: Option<i8>,
        battery: Option<u8>,
        magnet: Option<u8>,
        is_known: bool,
        ts: DateTime<Utc>,
    );

    fn upsert_scanner(&self, scanner_id: &str, lat: f64, lng: f64, name: &str);
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "record")]
enum LogRecord {
    BeaconPosition {
        mac: String,
        lat: f64,
        lng: f64,
        carrier_id: String,
        is_paired: bool,
        pairing_duration_s: i64,
        battery: Option<u8>,
        magnet: Option<u8>,
        ts: DateTime<Utc>,
    },
    Tracker {
        imei: String,
        label: Option<String>,
        lat: f64,
        lng: f64,
        speed: Option<f64>,
        battery: Option<u8>,
        ts: DateTime<Utc>,
    },
    Scan {
        mac: String,
        lat: Option<f64>,
        lng: Option<f64>,
        carrier_id: String,
        rssi: Option<i8>,
        battery: Option<u8>,
        magnet: Option<u8>,
        is_known: bool,
        ts: DateTime<Utc>,
    },
    Scanner {
        scanner_id: String,
        lat: f64,
        lng: f64,
        name: String,
        ts: DateTime<Utc>,
    },
}

const FLUSH_BATCH: usize = 1000;
const FLUSH_INTERVAL_MS: u64 = 100;

/// NDJSON write-through adapter. Writes are queued on an unbounded
/// channel and batched by a background worker, the same shape as the
/// teacher's `persist_tx` / `persist_worker` / `flush` trio — just with
/// one record enum instead of one proto message.
pub struct FileAdapter {
    tx: mpsc::UnboundedSender<LogRecord>,
    metrics: Arc<Metrics>,
}

impl FileAdapter {
    pub fn spawn(log_path: String, metrics: Arc<Metrics>) -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(rx, log_path));
        Arc::new(Self { tx, metrics })
    }

    fn send(&self, rec: LogRecord) {
        if self.tx.send(rec).is_err() {
            error!("persist_channel_closed");
            Metrics::inc(&self.metrics.persist_failures);
        }
    }
}

async fn worker(mut rx: mpsc::UnboundedReceiver<LogRecord>, log_path: String) {
    let mut batch = Vec::with_capacity(FLUSH_BATCH);
    let mut iv = tokio::time::interval(std::time::Duration::from_millis(FLUSH_INTERVAL_MS));
    loop {
        tokio::select! {
            maybe = rx.recv() => {
                match maybe {
                    Some(rec) => {
                        batch.push(rec);
                        if batch.len() >= FLUSH_BATCH {
                            flush(&mut batch, &log_path).await;
                        }
                    }
                    None => {
                        if !batch.is_empty() {
                            flush(&mut batch, &log_path).await;
                        }
                        return;
                    }
                }
            }
            _ = iv.tick() => {
                if !batch.is_empty() {
                    flush(&mut batch, &log_path).await;
                }
            }
        }
    }
}

async fn flush(batch: &mut Vec<LogRecord>, log_path: &str) {
    let n = batch.len();
    match tokio::fs::OpenOptions::new().create(true).append(true).open(log_path).await {
        Ok(mut f) => {
            for rec in batch.iter() {
                if let Ok(line) = serde_json::to_string(rec) {
                    if let Err(e) = f.write_all(format!("{line}\n").as_bytes()).await {
                        error!(error = %e, "persist_write_failed");
                    }
                }
            }
            info!(records = n, "persist_flush");
        }
        Err(e) => {
            error!(error = %e, path = log_path, "persist_log_open_failed");
        }
    }
    batch.clear();
}

#[async_trait::async_trait]
impl Adapter for FileAdapter {
    async fn load_definitions(&self) -> HashMap<String, KnownBeaconDef> {
        // The NDJSON log is write-only by design — reads only ever
        // happen at startup; this adapter has no warm-start source of
        // known-beacon definitions of its own, so startup seeding comes
        // from `main`'s built-in defaults instead.
        HashMap::new()
    }

    async fn load_beacon_state(&self) -> HashMap<String, BeaconState> {
        HashMap::new()
    }

    async fn load_scanners(&self) -> HashMap<String, ScannerRegistration> {
        HashMap::new()
    }

    fn upsert_beacon_position(
        &self,
        mac: &str,
        lat: f64,
        lng: f64,
        carrier_id: &str,
        is_paired: bool,
        pairing_duration_s: i64,
        battery: Option<u8>,
        magnet: Option<u8>,
    ) {
        self.send(LogRecord::BeaconPosition {
            mac: mac.to_string(),
            lat,
            lng,
            carrier_id: carrier_id.to_string(),
            is_paired,
            pairing_duration_s,
            battery,
            magnet,
            ts: Utc::now(),
        });
    }

    fn upsert_tracker(&self, imei: &str, label: Option<&str>, lat: f64, lng: f64, speed: Option<f64>, battery: Option<u8>) {
        self.send(LogRecord::Tracker {
            imei: imei.to_string(),
            label: label.map(str::to_string),
            lat,
            lng,
            speed,
            battery,
            ts: Utc::now(),
        });
    }

    fn append_scan(
        &self,
        mac: &str,
        lat: Option<f64>,
        lng: Option<f64>,
        carrier_id: &str,
        rssi: Option<i8>,
        battery: Option<u8>,
        magnet: Option<u8>,
        is_known: bool,
        ts: DateTime<Utc>,
    ) {
        self.send(LogRecord::Scan {
            mac: mac.to_string(),
            lat,
            lng,
            carrier_id: carrier_id.to_string(),
            rssi,
            battery,
            magnet,
            is_known,
            ts,
        });
    }

    fn upsert_scanner(&self, scanner_id: &str, lat: f64, lng: f64, name: &str) {
        self.send(LogRecord::Scanner { scanner_id: scanner_id.to_string(), lat, lng, name: name.to_string(), ts: Utc::now() });
    }
}
