//! AVL record parser.
//!
//! Records share one cursor over the frame body. There is no explicit
//! per-record length prefix in this wire format, so once a record's
//! bytes run out mid-decode there is no sound position from which to
//! resume — parsing stops there and the frame decoder acknowledges
//! only the successful prefix.

use std::collections::HashMap;

use super::beacon::{self, BeaconSighting};
use super::cursor::Cursor;
use crate::error::RecordError;

pub const IO_BLE_STANDARD: u16 = 385;
pub const IO_VENDOR_BLOB_IDS: [u16; 3] = [10828, 10829, 11317];

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GpsFix {
    pub lat: f64,
    pub lng: f64,
    pub altitude: u16,
    pub heading: u16,
    pub satellites: u8,
    pub speed_kmh: u16,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AvlRecord {
    pub timestamp_ms: u64,
    pub priority: u8,
    pub gps: GpsFix,
    pub event_id: u64,
    /// Fixed-width I/O elements, keyed by io_id, value widened to u64.
    pub io: HashMap<u64, u64>,
    /// Variable-length elements whose io_id didn't match a known
    /// beacon table — stored verbatim (codec 0x8E only).
    pub opaque_io: HashMap<u16, Vec<u8>>,
    /// Beacons parsed directly out of IO 385 (format A).
    pub beacons: Vec<BeaconSighting>,
    /// Raw vendor blobs (IO 10828/10829/11317) awaiting format-B
    /// extraction once the known-beacon MAC list is available.
    pub vendor_blobs: Vec<(u16, Vec<u8>)>,
}

const CODEC8: u8 = 0x08;
const CODEC8E: u8 = 0x8E;

fn is_extended(codec_id: u8) -> bool {
    codec_id == CODEC8E
}

fn read_count(c: &mut Cursor, ext: bool) -> Result<u64, RecordError> {
    if ext { Ok(c.u16()? as u64) } else { Ok(c.u8()? as u64) }
}

fn read_id(c: &mut Cursor, ext: bool) -> Result<u64, RecordError> {
    if ext { Ok(c.u16()? as u64) } else { Ok(c.u8()? as u64) }
}

fn read_value(c: &mut Cursor, width: usize) -> Result<u64, RecordError> {
    match width {
        1 => Ok(c.u8()? as u64),
        2 => Ok(c.u16()? as u64),
        4 => Ok(c.u32()? as u64),
        8 => Ok(c.u64()?),
        w => Err(RecordError::BadIoWidth(w as u8)),
    }
}

fn read_fixed_table(c: &mut Cursor, ext: bool, width: usize, out: &mut HashMap<u64, u64>) -> Result<(), RecordError> {
    let count = read_count(c, ext)?;
    for _ in 0..count {
        let id = read_id(c, ext)?;
        let value = read_value(c, width)?;
        out.insert(id, value);
    }
    Ok(())
}

/// Parse exactly one record starting at the cursor's current position.
pub fn parse_one(c: &mut Cursor, codec_id: u8) -> Result<AvlRecord, RecordError> {
    let ext = is_extended(codec_id);

    let timestamp_ms = c.u64()?;
    let priority = c.u8()?;

    let lng_e7 = c.i32()?;
    let lat_e7 = c.i32()?;
    let altitude = c.u16()?;
    let heading = c.u16()?;
    let satellites = c.u8()?;
    let speed_kmh = c.u16()?;
    let gps = GpsFix {
        lat: lat_e7 as f64 / 10_000_000.0,
        lng: lng_e7 as f64 / 10_000_000.0,
        altitude,
        heading,
        satellites,
        speed_kmh,
    };

    let event_id = read_id(c, ext)?;
    let _total_io_count = read_count(c, ext)?;

    let mut io = HashMap::new();
    read_fixed_table(c, ext, 1, &mut io)?;
    read_fixed_table(c, ext, 2, &mut io)?;
    read_fixed_table(c, ext, 4, &mut io)?;
    read_fixed_table(c, ext, 8, &mut io)?;

    let mut opaque_io = HashMap::new();
    let mut beacons = Vec::new();
    let mut vendor_blobs = Vec::new();

    if ext {
        let var_count = c.u16()?;
        for _ in 0..var_count {
            let io_id = c.u16()?;
            let len = c.u16()? as usize;
            let bytes = c.take(len)?;
            if io_id == IO_BLE_STANDARD {
                beacons.extend(beacon::extract_format_a(bytes));
            } else if IO_VENDOR_BLOB_IDS.contains(&io_id) {
                vendor_blobs.push((io_id, bytes.to_vec()));
            } else {
                opaque_io.insert(io_id, bytes.to_vec());
            }
        }
    }

    Ok(AvlRecord {
        timestamp_ms,
        priority,
        gps,
        event_id,
        io,
        opaque_io,
        beacons,
        vendor_blobs,
    })
}

/// Parse up to `declared_count` records from `body`. Returns every
/// record successfully decoded (used for state updates) together with
/// `ack_count`: the length of the unbroken successful prefix, which is
/// all the frame decoder may acknowledge.
pub fn parse_records(body: &[u8], codec_id: u8, declared_count: u8) -> (Vec<AvlRecord>, usize) {
    let mut cursor = Cursor::new(body);
    let mut records = Vec::new();
    let mut ack_count = 0usize;
    let mut saw_failure = false;

    for _ in 0..declared_count {
        match parse_one(&mut cursor, codec_id) {
            Ok(rec) => {
                records.push(rec);
                if !saw_failure {
                    ack_count += 1;
                }
            }
            Err(_) => {
                saw_failure = true;
                break;
            }
        }
    }
    (records, ack_count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_record_bytes() -> Vec<u8> {
        let mut r = Vec::new();
        r.extend(1_720_000_000_000u64.to_be_bytes()); // timestamp
        r.push(0); // priority
        r.extend((340_000_000i32).to_be_bytes()); // lng e7 = 34.0
        r.extend((320_000_000i32).to_be_bytes()); // lat e7 = 32.0
        r.extend(50u16.to_be_bytes()); // altitude
        r.extend(0u16.to_be_bytes()); // heading
        r.push(10); // satellites
        r.extend(0u16.to_be_bytes()); // speed
        r.extend(0u16.to_be_bytes()); // event_id
        r.extend(0u16.to_be_bytes()); // total_io_count
        r.extend(0u16.to_be_bytes()); // count 1-byte table
        r.extend(0u16.to_be_bytes()); // count 2-byte table
        r.extend(0u16.to_be_bytes()); // count 4-byte table
        r.extend(0u16.to_be_bytes()); // count 8-byte table
        r.extend(1u16.to_be_bytes()); // var count = 1
        r.extend(IO_BLE_STANDARD.to_be_bytes());
        let payload = {
            let mut p = vec![1u8];
            p.extend(hex::decode("7cd9f407f95c").unwrap());
            p.push(0xCE); // rssi -50
            p.push(85); // battery
            p.push(0); // flags
            p
        };
        r.extend((payload.len() as u16).to_be_bytes());
        r.extend(payload);
        r
    }

    #[test]
    fn parses_gps_and_beacon_round_trip() {
        let body = sample_record_bytes();
        let (records, ack) = parse_records(&body, 0x8E, 1);
        assert_eq!(ack, 1);
        assert_eq!(records.len(), 1);
        let rec = &records[0];
        assert!((rec.gps.lat - 32.0).abs() < 1e-7);
        assert!((rec.gps.lng - 34.0).abs() < 1e-7);
        assert_eq!(rec.beacons.len(), 1);
        assert_eq!(rec.beacons[0].mac, "7cd9f407f95c");
    }

    #[test]
    fn second_malformed_record_acks_only_first() {
        let mut body = sample_record_bytes();
        body.extend(sample_record_bytes());
        body.truncate(body.len() - 3); // corrupt the tail of the second record
        let (records, ack) = parse_records(&body, 0x8E, 2);
        assert_eq!(ack, 1, "only the first record should be acknowledged");
        assert_eq!(records.len(), 1, "the truncated second record yields nothing");
    }

    #[test]
    fn codec8_uses_one_byte_counts() {
        let mut r = Vec::new();
        r.extend(1_700_000_000_000u64.to_be_bytes());
        r.push(1); // priority
        r.extend((100_000_000i32).to_be_bytes());
        r.extend((500_000_000i32).to_be_bytes());
        r.extend(0u16.to_be_bytes());
        r.extend(0u16.to_be_bytes());
        r.push(5);
        r.extend(10u16.to_be_bytes()); // speed 10 km/h
        r.push(0); // event id (1 byte)
        r.push(0); // total io count (1 byte)
        r.push(0); // 1-byte table count
        r.push(0); // 2-byte table count
        r.push(0); // 4-byte table count
        r.push(0); // 8-byte table count
        let (records, ack) = parse_records(&r, 0x08, 1);
        assert_eq!(ack, 1);
        assert_eq!(records[0].gps.speed_kmh, 10);
        assert!(records[0].beacons.is_empty(), "codec8 has no variable-length table");
    }
}
