//! Fixed-scanner webhook ingest.
//!
//! Accepts either webhook JSON shape a RUTX11-class fixed scanner is
//! known to send and normalizes both down to one `Ingest` value before
//! handing off to the bypass rule in `inference::apply_fixed_scanner`.

use serde::Deserialize;

#[derive(Debug, Deserialize)]
pub struct RawSighting {
    pub mac: String,
    pub rssi: Option<i8>,
    pub battery: Option<u8>,
}

#[derive(Debug, Deserialize)]
struct StreamingData {
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GpsMonitoring {
    latitude: Option<f64>,
    longitude: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct FormatA {
    #[serde(rename = "Streaming_Data")]
    streaming_data: Option<StreamingData>,
    #[serde(rename = "GPS_Monitoring")]
    gps_monitoring: Option<GpsMonitoring>,
    #[serde(rename = "Bluetooth_Monitor")]
    bluetooth_monitor: Vec<RawSighting>,
}

#[derive(Debug, Deserialize)]
struct FormatB {
    host: String,
    lat: Option<f64>,
    lng: Option<f64>,
    data: Vec<RawSighting>,
}

/// Both webhook shapes, kept as distinct variants rather than one
/// loose struct with every field optional.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum WebhookBody {
    A(FormatA),
    B(FormatB),
}

pub struct Ingest {
    pub scanner_id: String,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub sightings: Vec<RawSighting>,
}

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),
}

pub fn parse(body: &[u8]) -> Result<Ingest, WebhookError> {
    let parsed: WebhookBody = serde_json::from_slice(body)?;
    Ok(match parsed {
        WebhookBody::A(a) => Ingest {
            scanner_id: a.streaming_data.and_then(|s| s.name).unwrap_or_default(),
            lat: a.gps_monitoring.as_ref().and_then(|g| g.latitude),
            lng: a.gps_monitoring.as_ref().and_then(|g| g.longitude),
            sightings: a.bluetooth_monitor,
        },
        WebhookBody::B(b) => Ingest { scanner_id: b.host, lat: b.lat, lng: b.lng, sightings: b.data },
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_format_a() {
        let body = br#"{
            "Streaming_Data": {"name": "A"},
            "GPS_Monitoring": {"latitude": 40.0, "longitude": -74.0},
            "Bluetooth_Monitor": [{"mac": "7C:D9:F4:07:F9:5C", "rssi": -50, "battery": 80}]
        }"#;
        let ingest = parse(body).unwrap();
        assert_eq!(ingest.scanner_id, "A");
        assert_eq!(ingest.lat, Some(40.0));
        assert_eq!(ingest.sightings.len(), 1);
    }

    #[test]
    fn parses_format_b() {
        let body = br#"{"host":"A","lat":40.0,"lng":-74.0,"data":[{"mac":"7cd9f407f95c","rssi":-50,"battery":80}]}"#;
        let ingest = parse(body).unwrap();
        assert_eq!(ingest.scanner_id, "A");
        assert_eq!(ingest.sightings[0].mac, "7cd9f407f95c");
    }

    #[test]
    fn format_b_without_coordinates() {
        let body = br#"{"host":"A","data":[{"mac":"7cd9f407f95c","rssi":-50,"battery":80}]}"#;
        let ingest = parse(body).unwrap();
        assert_eq!(ingest.lat, None);
        assert_eq!(ingest.lng, None);
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse(b"not json").is_err());
    }
}
