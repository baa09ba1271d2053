use thiserror::Error;

/// Failures that abort an entire frame (close the connection, no ack).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("preamble nonzero")]
    BadPreamble,
    #[error("handshake rejected: imei length {0}")]
    HandshakeRejected(usize),
    #[error("unsupported codec id {0:#04x}")]
    UnsupportedCodec(u8),
    #[error("short read: wanted {wanted} bytes, stream ended")]
    ShortRead { wanted: usize },
    #[error("declared data_length {0} exceeds sane bound")]
    LengthTooLarge(u32),
    #[error("crc mismatch: computed {computed:#06x}, frame had {declared:#06x}")]
    CrcMismatch { computed: u16, declared: u16 },
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures that abort a single record; the frame continues with the
/// next declared record.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("unexpected end of record body, needed {wanted} more bytes, had {remaining}")]
    Truncated { wanted: usize, remaining: usize },
    #[error("io element width {0} not recognized")]
    BadIoWidth(u8),
}
