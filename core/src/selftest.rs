//! Known-pattern check of parameter agreement between two peers.
//!
//! Both sides derive the self-test configuration from their own
//! [`ModemConfig`]; if tones, timing or repetition differ, the pattern comes
//! back wrong or not at all.

use crate::audio::{AudioChannel, MemoryInput, Waveform};
use crate::config::{ModemConfig, PayloadLength};
use crate::demodulator::Demodulator;
use crate::error::{ModemError, Result};
use crate::framing::FrameBuilder;
use crate::modulator::Modulator;

/// Alternating, constant and nibble/pair transitions.
pub const SELF_TEST_PATTERN: [u8; 8] = [0x55, 0xAA, 0x00, 0xFF, 0x0F, 0xF0, 0x33, 0xCC];

/// Same signal and timing, with a fixed length matching the pattern.
pub fn self_test_config(config: &ModemConfig) -> ModemConfig {
    config.with_payload_length(PayloadLength::Fixed(SELF_TEST_PATTERN.len()))
}

/// Waveform a peer plays for the other side to verify.
pub fn self_test_waveform(config: &ModemConfig) -> Result<Waveform> {
    let config = self_test_config(config);
    let bits = FrameBuilder::new(&config).build(&SELF_TEST_PATTERN)?;
    Modulator::new(&config)?.modulate(&bits)
}

/// Decode a captured self-test frame and compare it with the pattern.
pub fn verify_self_test(config: &ModemConfig, samples: &[f32]) -> Result<()> {
    let config = self_test_config(config);
    let actual = crate::demodulator::decode(&config, samples)?;
    check_pattern(actual)
}

/// Modulate the pattern and demodulate it again, chunk by chunk, the way a
/// live capture would arrive.
pub fn loopback_self_test(config: &ModemConfig) -> Result<()> {
    let waveform = self_test_waveform(config)?;
    let config = self_test_config(config);
    let mut demodulator = Demodulator::new(&config)?;
    let mut input = MemoryInput::new(waveform.into_samples());

    let mut decoded = None;
    {
        let mut channel = AudioChannel::acquire(
            &mut input,
            config.signal.sample_rate,
            crate::DEFAULT_CHUNK_SIZE,
        )?;
        while let Some(chunk) = channel.next_chunk()? {
            if let Some(payload) = demodulator.push(&chunk)? {
                decoded = Some(payload);
                break;
            }
        }
    }
    let actual = match decoded {
        Some(payload) => payload,
        None => demodulator.finish()?.ok_or(ModemError::PreambleNotFound)?,
    };
    check_pattern(actual)?;
    log::info!("Loopback self-test passed");
    Ok(())
}

fn check_pattern(actual: Vec<u8>) -> Result<()> {
    if actual != SELF_TEST_PATTERN {
        return Err(ModemError::SelfTestMismatch {
            expected: SELF_TEST_PATTERN.to_vec(),
            actual,
        });
    }
    Ok(())
}
