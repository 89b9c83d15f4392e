//! Payload <-> bit sequence framing
//!
//! Bit order is most-significant-bit first on both sides: byte `0x80`
//! becomes `[true, false, false, false, false, false, false, false]`.
//! The preamble, silence and marker are waveform concerns; the bit
//! sequence holds only the data region.

use crate::config::{ModemConfig, PayloadLength};
use crate::error::{ModemError, Result};

pub type BitSequence = Vec<bool>;

/// Expand bytes into bits, MSB first.
pub fn bytes_to_bits(bytes: &[u8]) -> BitSequence {
    let mut bits = Vec::with_capacity(bytes.len() * 8);
    for &byte in bytes {
        for i in 0..8 {
            bits.push(byte & (1 << (7 - i)) != 0);
        }
    }
    bits
}

/// Pack bits into bytes, MSB first. Trailing bits that do not fill a byte
/// are dropped.
pub fn bits_to_bytes(bits: &[bool]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(bits.len() / 8);
    for chunk in bits.chunks(8) {
        if chunk.len() == 8 {
            let mut byte = 0u8;
            for (i, &bit) in chunk.iter().enumerate() {
                if bit {
                    byte |= 1 << (7 - i);
                }
            }
            bytes.push(byte);
        }
    }
    bytes
}

/// Turns a payload into the data bits of a frame.
pub struct FrameBuilder {
    payload_length: PayloadLength,
    repeat_factor: usize,
    max_payload: usize,
}

impl FrameBuilder {
    pub fn new(config: &ModemConfig) -> Self {
        Self {
            payload_length: config.payload_length,
            repeat_factor: config.layout.repeat_factor,
            max_payload: config.max_payload_len(),
        }
    }

    /// Bytes actually sent over the air (length prefix included).
    pub fn frame_bytes(&self, payload: &[u8]) -> Result<Vec<u8>> {
        if payload.is_empty() {
            return Err(ModemError::InvalidPayload("payload is empty".into()));
        }
        if payload.len() > self.max_payload {
            return Err(ModemError::InvalidPayload(format!(
                "{} bytes exceeds the maximum of {}",
                payload.len(),
                self.max_payload
            )));
        }

        match self.payload_length {
            PayloadLength::Fixed(len) => {
                if payload.len() != len {
                    return Err(ModemError::InvalidPayload(format!(
                        "expected exactly {} bytes, got {}",
                        len,
                        payload.len()
                    )));
                }
                Ok(payload.to_vec())
            }
            PayloadLength::Prefixed => {
                let mut frame = Vec::with_capacity(payload.len() + 1);
                frame.push(payload.len() as u8);
                frame.extend_from_slice(payload);
                Ok(frame)
            }
        }
    }

    /// Build the data bits: every frame bit repeated `repeat_factor` times.
    pub fn build(&self, payload: &[u8]) -> Result<BitSequence> {
        let frame = self.frame_bytes(payload)?;
        let mut bits = Vec::with_capacity(frame.len() * 8 * self.repeat_factor);
        for bit in bytes_to_bits(&frame) {
            for _ in 0..self.repeat_factor {
                bits.push(bit);
            }
        }
        Ok(bits)
    }
}

/// Progress of a [`FrameParser`] after consuming one bit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParseProgress {
    NeedMore,
    Complete(Vec<u8>),
}

/// Reassembles classified (already majority-voted) bits into a payload.
pub struct FrameParser {
    payload_length: PayloadLength,
    max_payload: usize,
    bits: Vec<bool>,
    expected_bytes: Option<usize>,
}

impl FrameParser {
    pub fn new(config: &ModemConfig) -> Self {
        let mut parser = Self {
            payload_length: config.payload_length,
            max_payload: config.max_payload_len(),
            bits: Vec::new(),
            expected_bytes: None,
        };
        parser.reset();
        parser
    }

    pub fn reset(&mut self) {
        self.bits.clear();
        self.expected_bytes = match self.payload_length {
            PayloadLength::Fixed(len) => Some(len),
            PayloadLength::Prefixed => None,
        };
    }

    /// Total frame bits once known (length byte included).
    pub fn expected_bits(&self) -> Option<usize> {
        self.expected_bytes
            .map(|len| (len + self.payload_length.header_bytes()) * 8)
    }

    pub fn bits_received(&self) -> usize {
        self.bits.len()
    }

    pub fn push_bit(&mut self, bit: bool) -> Result<ParseProgress> {
        self.bits.push(bit);

        if self.expected_bytes.is_none() && self.bits.len() == 8 {
            let len = bits_to_bytes(&self.bits)[0] as usize;
            if len == 0 || len > self.max_payload {
                return Err(ModemError::CorruptFrame {
                    ambiguous: 0,
                    total: self.bits.len(),
                });
            }
            log::debug!("Length prefix announces {} bytes", len);
            self.expected_bytes = Some(len);
        }

        match self.expected_bits() {
            Some(total) if self.bits.len() >= total => {
                let header_bits = self.payload_length.header_bytes() * 8;
                Ok(ParseProgress::Complete(bits_to_bytes(&self.bits[header_bits..total])))
            }
            _ => Ok(ParseProgress::NeedMore),
        }
    }
}
