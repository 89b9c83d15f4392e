use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModemError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Transmission already in progress")]
    Busy,

    /// Preamble detected but the marker could not be confirmed.
    /// Non-fatal: the session goes back to searching.
    #[error("Lost synchronization before the data region")]
    SyncLost,

    #[error("Capture ended before the frame completed")]
    InsufficientSamples,

    #[error("Corrupt frame: {ambiguous} of {total} bits ambiguous")]
    CorruptFrame { ambiguous: usize, total: usize },

    #[error("Failed to detect preamble")]
    PreambleNotFound,

    #[error("Self-test mismatch: expected {expected:02X?}, got {actual:02X?}")]
    SelfTestMismatch { expected: Vec<u8>, actual: Vec<u8> },

    #[error("FFT error: {0}")]
    FftError(String),

    #[error("Audio device error: {0}")]
    Audio(String),

    #[error("Report channel closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, ModemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_corrupt_frame_display() {
        let e = ModemError::CorruptFrame { ambiguous: 12, total: 64 };
        assert_eq!(e.to_string(), "Corrupt frame: 12 of 64 bits ambiguous");
    }

    #[test]
    fn test_self_test_mismatch_display() {
        let e = ModemError::SelfTestMismatch {
            expected: vec![0xAB],
            actual: vec![0x0C],
        };
        assert_eq!(e.to_string(), "Self-test mismatch: expected [AB], got [0C]");
    }
}
