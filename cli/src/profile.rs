use serde::{Deserialize, Serialize};
use std::path::Path;
use tonelink_core::{
    DetectorConfig, FrameLayout, ModemConfig, PayloadLength, SignalParameters, MAX_FRAME_SECONDS,
};

use crate::CliError;

/// Modem parameters as stored on disk. Both peers must load the same profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profile {
    pub sample_rate: u32,
    pub base_frequency: f32,
    pub shift_frequency: f32,
    pub amplitude: f32,
    pub preamble_ms: u32,
    pub silence_ms: u32,
    pub marker_ms: u32,
    pub bit_ms: u32,
    pub repeat_factor: usize,
    /// Fixed payload length in bytes; absent means a one-byte length prefix.
    pub payload_length: Option<usize>,
}

impl Default for Profile {
    fn default() -> Self {
        Self::from_config(&ModemConfig::default())
    }
}

impl Profile {
    pub fn from_config(config: &ModemConfig) -> Self {
        let sr = config.signal.sample_rate.max(1) as usize;
        let to_ms = |samples: usize| (samples * 1000 / sr) as u32;
        Self {
            sample_rate: config.signal.sample_rate,
            base_frequency: config.signal.base_frequency,
            shift_frequency: config.signal.shift_frequency,
            amplitude: config.signal.amplitude,
            preamble_ms: to_ms(config.layout.preamble_samples),
            silence_ms: to_ms(config.layout.silence_samples),
            marker_ms: to_ms(config.layout.marker_samples),
            bit_ms: to_ms(config.layout.bit_samples),
            repeat_factor: config.layout.repeat_factor,
            payload_length: match config.payload_length {
                PayloadLength::Fixed(len) => Some(len),
                PayloadLength::Prefixed => None,
            },
        }
    }

    pub fn load(path: &Path) -> Result<Self, CliError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn to_config(&self) -> Result<ModemConfig, CliError> {
        let layout = FrameLayout::from_millis(
            self.sample_rate,
            self.preamble_ms,
            self.silence_ms,
            self.marker_ms,
            self.bit_ms,
            self.repeat_factor,
        );
        let config = ModemConfig {
            signal: SignalParameters {
                sample_rate: self.sample_rate,
                base_frequency: self.base_frequency,
                shift_frequency: self.shift_frequency,
                amplitude: self.amplitude,
            },
            layout,
            detector: DetectorConfig::for_layout(&layout),
            payload_length: match self.payload_length {
                Some(len) => PayloadLength::Fixed(len),
                None => PayloadLength::Prefixed,
            },
            max_frame_samples: self.sample_rate as usize * MAX_FRAME_SECONDS,
        };
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_profiles_survive_json() {
        for config in [ModemConfig::default(), ModemConfig::audible()] {
            let profile = Profile::from_config(&config);
            let json = serde_json::to_string(&profile).unwrap();
            let parsed: Profile = serde_json::from_str(&json).unwrap();
            assert_eq!(parsed.to_config().unwrap(), config);
        }
    }

    #[test]
    fn test_partial_profile_uses_defaults() {
        let profile: Profile =
            serde_json::from_str(r#"{"base_frequency": 5000.0, "payload_length": 8}"#).unwrap();
        let config = profile.to_config().unwrap();
        assert_eq!(config.signal.base_frequency, 5000.0);
        assert_eq!(config.payload_length, PayloadLength::Fixed(8));
        assert_eq!(config.layout, ModemConfig::default().layout);
    }

    #[test]
    fn test_invalid_profile_rejected() {
        let profile: Profile = serde_json::from_str(r#"{"base_frequency": 23800.0}"#).unwrap();
        assert!(matches!(profile.to_config(), Err(CliError::Modem(_))));
        assert!(serde_json::from_str::<Profile>(r#"{"baud": 300}"#).is_err());
    }
}
