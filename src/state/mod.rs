//! Shared in-memory state: trackers, beacons, scanners.
//!
//! Tracker/beacon/pairing state is updated as one atomic unit per
//! inbound record or webhook call, so it lives behind a single
//! `tokio::sync::Mutex` rather than split across per-field
//! `DashMap`s. The scanner registry and known-beacon table are each
//! their own independent concern and get their own `DashMap` — one map
//! per concern rather than one shared lock.

pub mod model;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::Mutex;

use crate::mac::StrictPattern;
use model::{BeaconState, KnownBeaconDef, MatchedSighting, ScanEvent, ScannerRegistration, Tracker};

#[derive(Default)]
struct Inner {
    trackers: HashMap<String, Tracker>,
    beacons: HashMap<String, BeaconState>,
}

pub struct Store {
    inner: Mutex<Inner>,
    known_beacons: DashMap<String, KnownBeaconDef>,
    scanners: DashMap<String, ScannerRegistration>,
}

impl Store {
    pub fn new() -> Arc<Self> {
        Arc::new(Self { inner: Mutex::new(Inner::default()), known_beacons: DashMap::new(), scanners: DashMap::new() })
    }

    pub fn seed_known_beacons(&self, defs: impl IntoIterator<Item = KnownBeaconDef>) {
        for def in defs {
            self.known_beacons.insert(def.mac.clone(), def);
        }
    }

    pub fn known_mac_list(&self) -> Vec<String> {
        self.known_beacons.iter().map(|e| e.key().clone()).collect()
    }

    pub fn known_beacons_snapshot(&self) -> Vec<KnownBeaconDef> {
        self.known_beacons.iter().map(|e| e.value().clone()).collect()
    }

    pub fn strict_patterns(&self) -> Vec<StrictPattern> {
        Vec::new()
    }

    pub fn register_scanner(&self, reg: ScannerRegistration) {
        self.scanners.insert(reg.scanner_id.clone(), reg);
    }

    pub fn get_scanner(&self, scanner_id: &str) -> Option<ScannerRegistration> {
        self.scanners.get(scanner_id).map(|e| e.clone())
    }

    pub fn list_scanners(&self) -> Vec<ScannerRegistration> {
        self.scanners.iter().map(|e| e.value().clone()).collect()
    }

    /// Run `f` inside the single critical section covering tracker and
    /// beacon state. This is the only way callers touch that state —
    /// both moving-carrier inference and fixed-scanner ingest run
    /// inside this closure.
    pub async fn with_state<F, T>(&self, f: F) -> T
    where
        F: FnOnce(&mut HashMap<String, Tracker>, &mut HashMap<String, BeaconState>) -> T,
    {
        let mut guard = self.inner.lock().await;
        let Inner { trackers, beacons } = &mut *guard;
        f(trackers, beacons)
    }

    pub async fn upsert_tracker_fix(
        &self,
        imei: &str,
        fix: model::GpsReading,
        now: DateTime<Utc>,
    ) {
        self.with_state(|trackers, _| {
            let t = trackers.entry(imei.to_string()).or_insert_with(|| Tracker {
                imei: imei.to_string(),
                label: None,
                last_fix: None,
                last_seen: now,
            });
            t.last_fix = Some(fix);
            t.last_seen = now;
        })
        .await;
    }

    pub async fn process_sightings(
        &self,
        carrier_id: &str,
        carrier_lat: f64,
        carrier_lng: f64,
        carrier_speed_kmh: f64,
        sightings: &[MatchedSighting],
        now: DateTime<Utc>,
        params: &crate::inference::Params,
    ) -> Vec<ScanEvent> {
        self.with_state(|_, beacons| {
            crate::inference::process_sightings(
                beacons,
                carrier_id,
                carrier_lat,
                carrier_lng,
                carrier_speed_kmh,
                sightings,
                now,
                params,
            )
        })
        .await
    }

    pub async fn apply_fixed_scanner(
        &self,
        scanner_id: &str,
        scanner_lat: f64,
        scanner_lng: f64,
        sighting: &MatchedSighting,
        now: DateTime<Utc>,
    ) -> ScanEvent {
        self.with_state(|_, beacons| {
            crate::inference::apply_fixed_scanner(beacons, scanner_id, scanner_lat, scanner_lng, sighting, now)
        })
        .await
    }

    /// Manual position override (`/ble/set-position`). Touches
    /// position/carrier_id/is_paired only — the underlying pairing
    /// timer keeps running untouched. Creates a fresh
    /// (previously-unseen) beacon entry on first use so a
    /// definition-known MAC can be overridden before it's ever been
    /// sighted; the caller is responsible for rejecting MACs absent
    /// from the known-beacon table entirely.
    pub async fn set_position(&self, mac: &str, lat: f64, lng: f64, now: DateTime<Utc>) {
        self.with_state(|_, beacons| {
            let b = beacons.entry(mac.to_string()).or_insert_with(|| BeaconState {
                mac: mac.to_string(),
                position: model::BeaconPosition::Unset,
                carrier_id: String::new(),
                last_update: None,
                last_seen: now,
                battery: None,
                rssi: None,
                magnet_status: None,
                pairing: model::Pairing { carrier_id: String::new(), start_time: now },
                is_paired: false,
                pairing_duration_seconds: 0,
            });
            b.position = model::BeaconPosition::Set { lat, lng };
            b.last_update = Some(now);
            b.carrier_id = "manual".to_string();
            b.is_paired = false;
        })
        .await
    }

    pub async fn set_all_home(&self, lat: f64, lng: f64, now: DateTime<Utc>) -> usize {
        self.with_state(|_, beacons| {
            let mut n = 0;
            for b in beacons.values_mut() {
                b.position = model::BeaconPosition::Set { lat, lng };
                b.last_update = Some(now);
                b.carrier_id = "manual".to_string();
                b.is_paired = false;
                n += 1;
            }
            n
        })
        .await
    }

    pub async fn snapshot_trackers(&self) -> Vec<Tracker> {
        self.with_state(|trackers, _| trackers.values().cloned().collect()).await
    }

    pub async fn snapshot_beacons(&self) -> Vec<BeaconState> {
        self.with_state(|_, beacons| beacons.values().cloned().collect()).await
    }

    pub async fn get_beacon(&self, mac: &str) -> Option<BeaconState> {
        self.with_state(|_, beacons| beacons.get(mac).cloned()).await
    }
}
