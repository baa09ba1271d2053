//! AVL frame decoder.
//!
//! Owns the raw byte stream of one TCP connection: the handshake, then
//! a loop of length-prefixed data frames. Dispatches each frame's
//! records portion to `protocol::record` and writes the acknowledgement
//! the device expects back.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;
use crate::protocol::record::{self, AvlRecord};

/// Sane upper bound on a declared frame body, adopted from the
/// teacher's own `MAX_PKT` size-cap habit so a corrupt length field
/// can't make us allocate an unbounded buffer.
pub const MAX_DATA_LENGTH: u32 = 10 * 1024 * 1024;

pub const CODEC8: u8 = 0x08;
pub const CODEC8E: u8 = 0x8E;

fn map_eof(e: std::io::Error, wanted: usize) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ShortRead { wanted }
    } else {
        FrameError::Io(e)
    }
}

/// Read the 2-byte length + ASCII IMEI handshake. Returns the IMEI on
/// success; any rejection reason is a `HandshakeRejected`.
pub async fn read_handshake<R>(reader: &mut R) -> Result<String, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 2];
    reader.read_exact(&mut len_buf).await.map_err(|e| map_eof(e, 2))?;
    let len = u16::from_be_bytes(len_buf) as usize;
    if len == 0 || len > 15 {
        return Err(FrameError::HandshakeRejected(len));
    }
    let mut imei_buf = vec![0u8; len];
    reader.read_exact(&mut imei_buf).await.map_err(|e| map_eof(e, len))?;
    if !imei_buf.iter().all(|b| b.is_ascii_digit()) {
        return Err(FrameError::HandshakeRejected(len));
    }
    // Safe: validated all-ASCII-digit above.
    Ok(String::from_utf8(imei_buf).expect("validated ascii digits"))
}

pub async fn write_handshake_reply<W>(writer: &mut W, accept: bool) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&[if accept { 0x01 } else { 0x00 }]).await?;
    writer.flush().await?;
    Ok(())
}

/// One decoded data frame: the codec that produced it, the records
/// successfully parsed (used for state updates), and the ack count
/// that must be written back — only the clean prefix, never a gap.
pub struct DecodedFrame {
    pub codec_id: u8,
    pub records: Vec<AvlRecord>,
    pub ack_count: usize,
}

/// Read and decode exactly one data frame. Returns `Ok(None)` only
/// when the stream ended cleanly between frames (the caller's idle
/// loop should treat that as a graceful close, not an error).
///
/// `validate_crc` is off by default — most deployed trackers' CRCs
/// aren't worth rejecting a frame over. When enabled, the trailing 4
/// bytes are read as a zero-extended CRC16/IBM over the body.
pub async fn read_frame<R>(reader: &mut R, validate_crc: bool) -> Result<Option<DecodedFrame>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let mut preamble = [0u8; 4];
    match reader.read_exact(&mut preamble).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(FrameError::Io(e)),
    }
    if preamble != [0, 0, 0, 0] {
        return Err(FrameError::BadPreamble);
    }

    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await.map_err(|e| map_eof(e, 4))?;
    let data_length = u32::from_be_bytes(len_buf);
    if data_length > MAX_DATA_LENGTH {
        return Err(FrameError::LengthTooLarge(data_length));
    }
    if data_length < 2 {
        // Need at least codec_id + record_count.
        return Err(FrameError::ShortRead { wanted: 2 });
    }

    let mut body = vec![0u8; data_length as usize];
    reader.read_exact(&mut body).await.map_err(|e| map_eof(e, data_length as usize))?;

    let mut crc_buf = [0u8; 4];
    reader.read_exact(&mut crc_buf).await.map_err(|e| map_eof(e, 4))?;

    if validate_crc {
        let declared = u32::from_be_bytes(crc_buf);
        let computed = crc16_ibm(&body) as u32;
        if computed != declared {
            return Err(FrameError::CrcMismatch { computed: computed as u16, declared: declared as u16 });
        }
    }

    let codec_id = body[0];
    if codec_id != CODEC8 && codec_id != CODEC8E {
        return Err(FrameError::UnsupportedCodec(codec_id));
    }
    let declared_count = body[1];
    let records_bytes = &body[2..];

    let (records, ack_count) = record::parse_records(records_bytes, codec_id, declared_count);

    Ok(Some(DecodedFrame { codec_id, records, ack_count }))
}

pub async fn write_ack<W>(writer: &mut W, n: u32) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&n.to_be_bytes()).await?;
    writer.flush().await?;
    Ok(())
}

/// CRC16/IBM (aka CRC-16/ARC): polynomial 0xA001, reflected, no final
/// XOR. Used only when `AVL_VALIDATE_CRC=true`; stays opt-in since it's
/// rarely worth closing a connection over.
pub fn crc16_ibm(data: &[u8]) -> u16 {
    let mut crc: u16 = 0x0000;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 != 0 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}
