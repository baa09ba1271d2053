//! Position inference state machine.
//!
//! Pure logic over the beacon-state map; the caller (`state::Store`)
//! holds the single mutex for the whole batch, so every sighting from
//! one AVL record (or one webhook call) lands in one critical section.

use std::collections::HashMap;

use chrono::{DateTime, Utc};

use crate::config::Settings;
use crate::geo::haversine_m;
use crate::state::model::{BeaconPosition, BeaconState, MatchedSighting, Pairing, ScanEvent};

#[derive(Debug, Clone, Copy)]
pub struct Params {
    pub pair_sec: i64,
    pub drift_m: f64,
    pub gap_sec: i64,
    pub jump_m: f64,
    pub stop_kmh: f64,
}

impl From<&Settings> for Params {
    fn from(s: &Settings) -> Self {
        Self { pair_sec: s.pair_sec, drift_m: s.drift_m, gap_sec: s.gap_sec, jump_m: s.jump_m, stop_kmh: s.stop_kmh }
    }
}

/// Reset-or-advance the pairing timer. Works uniformly for a
/// freshly-created beacon (sentinel `carrier_id == ""` always
/// triggers the reset branch) and an existing one.
fn apply_pairing_timer(pairing: &mut Pairing, carrier_id: &str, now: DateTime<Utc>, pair_sec: i64) -> (bool, i64) {
    if pairing.carrier_id != carrier_id {
        pairing.carrier_id = carrier_id.to_string();
        pairing.start_time = now;
        (false, 0)
    } else {
        let duration = (now - pairing.start_time).num_seconds().max(0);
        (duration >= pair_sec, duration)
    }
}

fn refresh_sticky(beacon: &mut BeaconState, sighting: &MatchedSighting, now: DateTime<Utc>) {
    if sighting.battery.is_some() {
        beacon.battery = sighting.battery;
    }
    if sighting.rssi.is_some() {
        beacon.rssi = sighting.rssi;
    }
    if sighting.magnet_status.is_some() {
        beacon.magnet_status = sighting.magnet_status;
    }
    beacon.last_seen = now;
}

/// Process every matched sighting from one carrier's record/batch.
/// Returns one scan event per sighting, ready for the persistence log.
pub fn process_sightings(
    beacons: &mut HashMap<String, BeaconState>,
    carrier_id: &str,
    carrier_lat: f64,
    carrier_lng: f64,
    carrier_speed_kmh: f64,
    sightings: &[MatchedSighting],
    now: DateTime<Utc>,
    params: &Params,
) -> Vec<ScanEvent> {
    let stopped = carrier_speed_kmh < params.stop_kmh;
    let mut events = Vec::with_capacity(sightings.len());

    for sighting in sightings {
        let is_new = !beacons.contains_key(&sighting.mac);

        let beacon = beacons.entry(sighting.mac.clone()).or_insert_with(|| BeaconState {
            mac: sighting.mac.clone(),
            position: BeaconPosition::Unset,
            carrier_id: carrier_id.to_string(),
            last_update: None,
            last_seen: now,
            battery: None,
            rssi: None,
            magnet_status: None,
            pairing: Pairing { carrier_id: String::new(), start_time: now },
            is_paired: false,
            pairing_duration_seconds: 0,
        });

        // Snapshot pre-mutation state needed for gap/drift computation.
        let old_position = beacon.position;
        let old_last_seen = beacon.last_seen;

        let (is_paired, duration) = apply_pairing_timer(&mut beacon.pairing, carrier_id, now, params.pair_sec);
        beacon.is_paired = is_paired;
        beacon.pairing_duration_seconds = duration;

        refresh_sticky(beacon, sighting, now);

        let mut position_updated = false;

        if is_new {
            if stopped {
                beacon.position = BeaconPosition::Set { lat: carrier_lat, lng: carrier_lng };
                beacon.last_update = Some(now);
                beacon.carrier_id = carrier_id.to_string();
                position_updated = true;
            }
            // else: leave Unset (already the default).
        } else {
            match old_position {
                BeaconPosition::Unset => {
                    if stopped {
                        beacon.position = BeaconPosition::Set { lat: carrier_lat, lng: carrier_lng };
                        beacon.last_update = Some(now);
                        beacon.carrier_id = carrier_id.to_string();
                        position_updated = true;
                    }
                }
                BeaconPosition::Set { lat: old_lat, lng: old_lng } => {
                    let d = haversine_m(old_lat, old_lng, carrier_lat, carrier_lng);
                    let gap = (now - old_last_seen).num_seconds();

                    if d < params.drift_m {
                        // Drift suppression: position unchanged, carrier_id untouched.
                    } else if gap > params.gap_sec && d > params.jump_m {
                        beacon.position = BeaconPosition::Set { lat: carrier_lat, lng: carrier_lng };
                        beacon.last_update = Some(now);
                        beacon.carrier_id = carrier_id.to_string();
                        beacon.pairing.start_time = now;
                        beacon.is_paired = true;
                        beacon.pairing_duration_seconds = 0;
                        position_updated = true;
                    } else if beacon.is_paired {
                        beacon.position = BeaconPosition::Set { lat: carrier_lat, lng: carrier_lng };
                        beacon.last_update = Some(now);
                        beacon.carrier_id = carrier_id.to_string();
                        position_updated = true;
                    }
                    // else: movement seen but not yet paired long enough — leave alone.
                }
            }
        }

        let (lat, lng) = beacon.position.as_latlng().map(|(a, b)| (Some(a), Some(b))).unwrap_or((None, None));
        events.push(ScanEvent {
            mac: sighting.mac.clone(),
            lat,
            lng,
            carrier_id: carrier_id.to_string(),
            rssi: sighting.rssi,
            battery: sighting.battery,
            magnet_status: sighting.magnet_status,
            is_known: true,
            position_updated,
            ts: now,
        });
    }

    events
}

/// Fixed-scanner bypass: a fixed scanner's sighting is ground truth.
/// Skips the whole state machine above.
pub fn apply_fixed_scanner(
    beacons: &mut HashMap<String, BeaconState>,
    scanner_id: &str,
    scanner_lat: f64,
    scanner_lng: f64,
    sighting: &MatchedSighting,
    now: DateTime<Utc>,
) -> ScanEvent {
    let carrier_id = format!("rutx11:{scanner_id}");
    let beacon = beacons.entry(sighting.mac.clone()).or_insert_with(|| BeaconState {
        mac: sighting.mac.clone(),
        position: BeaconPosition::Unset,
        carrier_id: carrier_id.clone(),
        last_update: None,
        last_seen: now,
        battery: None,
        rssi: None,
        magnet_status: None,
        pairing: Pairing { carrier_id: carrier_id.clone(), start_time: now },
        is_paired: true,
        pairing_duration_seconds: 0,
    });

    beacon.position = BeaconPosition::Set { lat: scanner_lat, lng: scanner_lng };
    beacon.last_update = Some(now);
    beacon.carrier_id = carrier_id.clone();
    beacon.is_paired = true;
    beacon.pairing.carrier_id = carrier_id.clone();
    beacon.pairing.start_time = now;
    beacon.pairing_duration_seconds = 0;
    refresh_sticky(beacon, sighting, now);

    ScanEvent {
        mac: sighting.mac.clone(),
        lat: Some(scanner_lat),
        lng: Some(scanner_lng),
        carrier_id,
        rssi: sighting.rssi,
        battery: sighting.battery,
        magnet_status: sighting.magnet_status,
        is_known: true,
        position_updated: true,
        ts: now,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn params() -> Params {
        Params { pair_sec: 60, drift_m: 30.0, gap_sec: 300, jump_m: 100.0, stop_kmh: 5.0 }
    }

    fn sighting(mac: &str) -> MatchedSighting {
        MatchedSighting { mac: mac.to_string(), rssi: Some(-50), battery: Some(80), magnet_status: None }
    }

    #[test]
    fn first_sighting_while_stopped_sets_position() {
        let mut beacons = HashMap::new();
        let now = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], now, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Set { lat: 32.0, lng: 34.0 });
        assert!(!b.is_paired);
        assert_eq!(b.pairing_duration_seconds, 0);
    }

    #[test]
    fn first_sighting_while_moving_leaves_unset_but_starts_timer() {
        let mut beacons = HashMap::new();
        let now = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 40.0, &[sighting("7cd9f407f95c")], now, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Unset);
        assert_eq!(b.pairing.carrier_id, "IMEI1");
    }

    #[test]
    fn pairing_matures_after_60_seconds_same_carrier() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(61);
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let b = &beacons["7cd9f407f95c"];
        assert!(b.is_paired);
        assert!(b.pairing_duration_seconds >= 60);
    }

    #[test]
    fn drift_under_threshold_is_ignored() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(5);
        process_sightings(&mut beacons, "IMEI1", 32.00005, 34.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Set { lat: 32.0, lng: 34.0 }, "drift under DRIFT_M must not move position");
    }

    #[test]
    fn drift_observation_by_other_carrier_does_not_steal_carrier_id() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(5);
        let events =
            process_sightings(&mut beacons, "IMEI2", 32.00005, 34.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.carrier_id, "IMEI1", "a merely-drift-observing carrier must not overwrite who last produced the fix");
        assert!(!events[0].position_updated);
    }

    #[test]
    fn towing_update_moves_position_once_paired() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(61);
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let t2 = t1 + Duration::seconds(1);
        process_sightings(&mut beacons, "IMEI1", 32.001, 34.001, 0.0, &[sighting("7cd9f407f95c")], t2, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Set { lat: 32.001, lng: 34.001 });
    }

    #[test]
    fn gap_and_jump_updates_immediately_and_resets_timer() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(601);
        process_sightings(&mut beacons, "IMEI1", 33.0, 35.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Set { lat: 33.0, lng: 35.0 });
        assert!(b.is_paired);
        assert_eq!(b.pairing.start_time, t1);
    }

    #[test]
    fn carrier_change_resets_timer_and_reports_unpaired() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(61);
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let t2 = t1 + Duration::seconds(1);
        process_sightings(&mut beacons, "IMEI2", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t2, &params());
        let b = &beacons["7cd9f407f95c"];
        assert!(!b.is_paired);
        assert_eq!(b.pairing_duration_seconds, 0);
    }

    #[test]
    fn stop_kmh_boundary_is_strict_less_than() {
        let mut beacons = HashMap::new();
        let now = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 5.0, &[sighting("7cd9f407f95c")], now, &params());
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Unset, "speed exactly STOP_KMH counts as moving");
    }

    #[test]
    fn fixed_scanner_bypass_overrides_moving_carrier_pairing() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 40.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(1);
        apply_fixed_scanner(&mut beacons, "A", 40.0, -74.0, &sighting("7cd9f407f95c"), t1);
        let b = &beacons["7cd9f407f95c"];
        assert_eq!(b.position, BeaconPosition::Set { lat: 40.0, lng: -74.0 });
        assert_eq!(b.carrier_id, "rutx11:A");
        assert!(b.is_paired);
    }

    #[test]
    fn idempotent_replay_does_not_move_position_but_duration_increases() {
        let mut beacons = HashMap::new();
        let t0 = Utc::now();
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t0, &params());
        let t1 = t0 + Duration::seconds(10);
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t1, &params());
        let d1 = beacons["7cd9f407f95c"].pairing_duration_seconds;
        let t2 = t1 + Duration::seconds(10);
        process_sightings(&mut beacons, "IMEI1", 32.0, 34.0, 0.0, &[sighting("7cd9f407f95c")], t2, &params());
        let d2 = beacons["7cd9f407f95c"].pairing_duration_seconds;
        assert!(d2 > d1);
        assert_eq!(beacons["7cd9f407f95c"].position, BeaconPosition::Set { lat: 32.0, lng: 34.0 });
    }
}
