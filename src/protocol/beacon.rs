//! BLE beacon sighting extraction from AVL I/O elements.
//!
//! Format A (IO 385) is parsed directly out of the variable-length
//! element bytes. Format B (vendor blobs, IO 10828/10829/11317) is
//! opaque: we scan the blob's hex representation for any occurrence of
//! a known MAC and emit a sighting per distinct MAC found.

use super::cursor::Cursor;

#[derive(Debug, Clone, PartialEq)]
pub struct BeaconSighting {
    /// Lowercase 12-hex-char MAC, not yet matched against known beacons.
    pub mac: String,
    pub rssi: Option<i8>,
    pub battery: Option<u8>,
    pub magnet_status: Option<u8>,
    pub temperature_centideg: Option<i16>,
    pub humidity_percent: Option<u8>,
}

/// Format A: `num_beacons` byte, then per-beacon MAC(6) + rssi(1) +
/// battery(1) + flags(1) [+ optional temp/humidity/magnet by flag bit].
/// A beacon is dropped (not emitted) the moment its own bytes run out;
/// beacons already parsed before it are kept.
pub fn extract_format_a(payload: &[u8]) -> Vec<BeaconSighting> {
    let mut out = Vec::new();
    if payload.is_empty() {
        return out;
    }
    let num_beacons = payload[0];
    let mut c = Cursor::new(&payload[1..]);

    for _ in 0..num_beacons {
        let Ok(mac_bytes) = c.take(6) else { break };
        let Ok(rssi) = c.i8() else { break };
        let Ok(battery) = c.u8() else { break };
        let Ok(flags) = c.u8() else { break };

        let mut temperature_centideg = None;
        if flags & 0x01 != 0 {
            match c.take(2) {
                Ok(b) => temperature_centideg = Some(i16::from_be_bytes([b[0], b[1]])),
                Err(_) => break,
            }
        }
        let mut humidity_percent = None;
        if flags & 0x02 != 0 {
            match c.u8() {
                Ok(h) => humidity_percent = Some(h),
                Err(_) => break,
            }
        }
        let mut magnet_status = None;
        if flags & 0x04 != 0 {
            match c.u8() {
                Ok(m) => magnet_status = Some(m),
                Err(_) => break,
            }
        }

        out.push(BeaconSighting {
            mac: hex::encode(mac_bytes),
            rssi: Some(rssi),
            battery: Some(battery),
            magnet_status,
            temperature_centideg,
            humidity_percent,
        });
    }
    out
}

/// Format B: scan the blob's hex text for any of `known_macs`
/// (12 lowercase hex chars each). Multiple occurrences of the same MAC
/// in one blob collapse to a single sighting.
pub fn extract_format_b(blob: &[u8], known_macs: &[String]) -> Vec<BeaconSighting> {
    let hex_text = hex::encode(blob);
    let mut out = Vec::new();
    let mut seen = std::collections::HashSet::new();

    for mac in known_macs {
        if mac.len() != 12 {
            continue;
        }
        if let Some(idx) = hex_text.find(mac.as_str()) {
            if !seen.insert(mac.clone()) {
                continue;
            }
            // Battery: two hex digits immediately preceding the MAC, if present.
            let battery = if idx >= 2 {
                u8::from_str_radix(&hex_text[idx - 2..idx], 16).ok()
            } else {
                None
            };
            out.push(BeaconSighting {
                mac: mac.clone(),
                rssi: None,
                battery,
                magnet_status: None,
                temperature_centideg: None,
                humidity_percent: None,
            });
        }
    }
    out
}
