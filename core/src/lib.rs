//! Acoustic data link over a speaker and a microphone
//!
//! Binary FSK with a chirp preamble, a silence gap and a marker tone ahead of
//! the data bits. Frames can be decoded from a stream delivered in arbitrary
//! chunks; transmissions are serialized with a busy policy.

pub mod audio;
pub mod config;
pub mod demodulator;
pub mod error;
pub mod fft_correlation;
pub mod framing;
pub mod listener;
pub mod modulator;
pub mod selftest;
pub mod sync;
pub mod tone;
pub mod transmitter;

pub use audio::{AudioChannel, AudioInput, AudioOutput, MemoryInput, MemoryOutput, Waveform};
pub use config::{DetectorConfig, FrameLayout, ModemConfig, PayloadLength, SignalParameters};
pub use demodulator::{decode, DecodePhase, DecodeSession, Demodulator};
pub use error::{ModemError, Result};
pub use framing::{FrameBuilder, FrameParser, ParseProgress};
pub use listener::{ListenEvent, Listener};
pub use modulator::Modulator;
pub use selftest::{loopback_self_test, self_test_waveform, verify_self_test, SELF_TEST_PATTERN};
pub use transmitter::TransmissionController;

pub const DEFAULT_SAMPLE_RATE: u32 = 48000;
pub const DEFAULT_CHUNK_SIZE: usize = 1024;

/// Longest frame, in seconds, either side will produce or buffer.
pub const MAX_FRAME_SECONDS: usize = 30;

/// Frame and modulate a payload in one step.
pub fn encode(config: &ModemConfig, payload: &[u8]) -> Result<Waveform> {
    let bits = FrameBuilder::new(config).build(payload)?;
    Modulator::new(config)?.modulate(&bits)
}
