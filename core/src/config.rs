use crate::error::{ModemError, Result};
use crate::{DEFAULT_SAMPLE_RATE, MAX_FRAME_SECONDS};

// Both peers must agree on every value in `ModemConfig`; nothing here is
// negotiated over the air. A mismatch shows up as SyncLost or CorruptFrame.

/// Tone parameters shared by modulator and demodulator.
///
/// `base_frequency` carries a 0 bit, `base_frequency + shift_frequency`
/// carries a 1 bit and the marker. The preamble sweeps between the two.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SignalParameters {
    pub sample_rate: u32,
    pub base_frequency: f32,
    pub shift_frequency: f32,
    pub amplitude: f32,
}

impl SignalParameters {
    /// Frequency of a 1 bit and of the marker tone.
    pub fn mark_frequency(&self) -> f32 {
        self.base_frequency + self.shift_frequency
    }

    pub fn validate(&self) -> Result<()> {
        if self.sample_rate == 0 {
            return Err(ModemError::InvalidConfig("sample rate must be positive".into()));
        }
        if !(self.base_frequency > 0.0) || !(self.shift_frequency > 0.0) {
            return Err(ModemError::InvalidConfig(format!(
                "frequencies must be positive (f0={}, df={})",
                self.base_frequency, self.shift_frequency
            )));
        }
        let nyquist = self.sample_rate as f32 / 2.0;
        if self.mark_frequency() >= nyquist {
            return Err(ModemError::InvalidConfig(format!(
                "f0 + df = {} Hz must stay below Nyquist ({} Hz)",
                self.mark_frequency(),
                nyquist
            )));
        }
        if !(self.amplitude > 0.0 && self.amplitude <= 1.0) {
            return Err(ModemError::InvalidConfig(format!(
                "amplitude {} outside (0, 1]",
                self.amplitude
            )));
        }
        Ok(())
    }
}

/// Segment lengths of a frame, in samples.
///
/// Stored as integer sample counts so the frame length is exact:
/// `preamble + silence + marker + bytes * 8 * repeat_factor * bit_samples`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameLayout {
    pub preamble_samples: usize,
    pub silence_samples: usize,
    pub marker_samples: usize,
    pub bit_samples: usize,
    pub repeat_factor: usize,
}

impl FrameLayout {
    /// Build a layout from durations in milliseconds.
    /// Each segment is converted on its own as `sample_rate * ms / 1000`.
    pub fn from_millis(
        sample_rate: u32,
        preamble_ms: u32,
        silence_ms: u32,
        marker_ms: u32,
        bit_ms: u32,
        repeat_factor: usize,
    ) -> Self {
        let to_samples = |ms: u32| (sample_rate as u64 * ms as u64 / 1000) as usize;
        Self {
            preamble_samples: to_samples(preamble_ms),
            silence_samples: to_samples(silence_ms),
            marker_samples: to_samples(marker_ms),
            bit_samples: to_samples(bit_ms),
            repeat_factor,
        }
    }

    /// Samples before the data region (preamble + silence + marker).
    pub fn header_samples(&self) -> usize {
        self.preamble_samples + self.silence_samples + self.marker_samples
    }

    /// Samples carrying one logical bit, all repetitions included.
    pub fn bit_window_samples(&self) -> usize {
        self.bit_samples * self.repeat_factor
    }

    pub fn data_samples(&self, frame_bytes: usize) -> usize {
        frame_bytes * 8 * self.bit_window_samples()
    }

    pub fn frame_samples(&self, frame_bytes: usize) -> usize {
        self.header_samples() + self.data_samples(frame_bytes)
    }

    pub fn validate(&self) -> Result<()> {
        let segments = [
            ("preamble", self.preamble_samples),
            ("silence", self.silence_samples),
            ("marker", self.marker_samples),
            ("bit", self.bit_samples),
        ];
        for (name, samples) in segments {
            if samples == 0 {
                return Err(ModemError::InvalidConfig(format!(
                    "{} duration must be positive",
                    name
                )));
            }
        }
        if self.repeat_factor == 0 {
            return Err(ModemError::InvalidConfig("repeat factor must be at least 1".into()));
        }
        if self.preamble_samples < MIN_PREAMBLE_SAMPLES {
            return Err(ModemError::InvalidConfig(format!(
                "preamble of {} samples is too short to detect (min {})",
                self.preamble_samples, MIN_PREAMBLE_SAMPLES
            )));
        }
        Ok(())
    }
}

const MIN_PREAMBLE_SAMPLES: usize = 64;

/// How the receiver learns the payload length.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PayloadLength {
    /// Both peers agree on the exact byte count; no header is sent.
    Fixed(usize),
    /// One length byte (1..=255) is sent ahead of the payload.
    Prefixed,
}

impl PayloadLength {
    /// Bytes added in front of the payload by this convention.
    pub fn header_bytes(&self) -> usize {
        match self {
            PayloadLength::Fixed(_) => 0,
            PayloadLength::Prefixed => 1,
        }
    }
}

/// Demodulator thresholds. These are tuning knobs, not protocol constants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectorConfig {
    /// Minimum normalized correlation against the sweep template.
    pub preamble_threshold: f32,
    /// Maximum silence power above the preamble's residual noise, as a
    /// fraction of the sweep power correlated with the template.
    pub silence_max_ratio: f32,
    /// Marker-tone energy must exceed base-tone energy by this factor.
    pub marker_dominance: f32,
    /// Minimum marker power as a fraction of preamble power.
    pub marker_min_level: f32,
    /// Half-width of the marker onset search, in samples.
    pub marker_search_samples: usize,
    /// Relative energy difference at or below which a repetition is a tie.
    pub tie_tolerance: f32,
    /// Share of ambiguous bits tolerated before the frame is rejected.
    pub max_ambiguous_ratio: f32,
    /// A repetition only votes when its stronger tone exceeds the noise
    /// floor measured in the silence gap by this many dB. With the 10 ms
    /// audible profile at amplitude 0.5 this puts the boundary near white
    /// noise of standard deviation 0.55.
    pub min_tone_snr_db: f32,
}

impl DetectorConfig {
    pub fn for_layout(layout: &FrameLayout) -> Self {
        Self {
            preamble_threshold: 0.4,
            silence_max_ratio: 0.5,
            marker_dominance: 2.0,
            marker_min_level: 0.25,
            marker_search_samples: layout.bit_samples / 2,
            tie_tolerance: 0.1,
            max_ambiguous_ratio: 0.25,
            min_tone_snr_db: 20.0,
        }
    }

    /// `min_tone_snr_db` as a power ratio.
    pub fn min_tone_snr(&self) -> f32 {
        10f32.powf(self.min_tone_snr_db / 10.0)
    }

    pub fn validate(&self, layout: &FrameLayout) -> Result<()> {
        if !(self.preamble_threshold > 0.0 && self.preamble_threshold < 1.0) {
            return Err(ModemError::InvalidConfig(format!(
                "preamble threshold {} outside (0, 1)",
                self.preamble_threshold
            )));
        }
        if !(self.tie_tolerance >= 0.0 && self.tie_tolerance < 1.0) {
            return Err(ModemError::InvalidConfig(format!(
                "tie tolerance {} outside [0, 1)",
                self.tie_tolerance
            )));
        }
        if !(self.max_ambiguous_ratio >= 0.0 && self.max_ambiguous_ratio <= 1.0) {
            return Err(ModemError::InvalidConfig(format!(
                "ambiguous ratio {} outside [0, 1]",
                self.max_ambiguous_ratio
            )));
        }
        if !(self.min_tone_snr_db.is_finite() && self.min_tone_snr_db >= 0.0) {
            return Err(ModemError::InvalidConfig(format!(
                "minimum tone SNR {} dB must be finite and non-negative",
                self.min_tone_snr_db
            )));
        }
        if self.marker_search_samples >= layout.silence_samples {
            return Err(ModemError::InvalidConfig(format!(
                "marker search window ({}) must be shorter than the silence ({})",
                self.marker_search_samples, layout.silence_samples
            )));
        }
        Ok(())
    }
}

/// Complete modem configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ModemConfig {
    pub signal: SignalParameters,
    pub layout: FrameLayout,
    pub detector: DetectorConfig,
    pub payload_length: PayloadLength,
    /// Longest frame either side will produce or buffer.
    pub max_frame_samples: usize,
}

impl ModemConfig {
    fn with_signal(signal: SignalParameters) -> Self {
        let layout = FrameLayout::from_millis(signal.sample_rate, 100, 50, 30, 10, 1);
        Self {
            signal,
            layout,
            detector: DetectorConfig::for_layout(&layout),
            payload_length: PayloadLength::Prefixed,
            max_frame_samples: signal.sample_rate as usize * MAX_FRAME_SECONDS,
        }
    }

    /// Audible profile: 5 kHz / 6 kHz tones, handy for debugging by ear.
    pub fn audible() -> Self {
        Self::with_signal(SignalParameters {
            sample_rate: DEFAULT_SAMPLE_RATE,
            base_frequency: 5000.0,
            shift_frequency: 1000.0,
            amplitude: 0.5,
        })
    }

    pub fn with_payload_length(mut self, payload_length: PayloadLength) -> Self {
        self.payload_length = payload_length;
        self
    }

    pub fn with_repeat_factor(mut self, repeat_factor: usize) -> Self {
        self.layout.repeat_factor = repeat_factor;
        self
    }

    /// Largest payload whose frame fits in `max_frame_samples`.
    pub fn max_payload_len(&self) -> usize {
        let per_byte = self.layout.data_samples(1);
        let header = self.layout.header_samples();
        if per_byte == 0 || header >= self.max_frame_samples {
            return 0;
        }
        let frame_bytes = (self.max_frame_samples - header) / per_byte;
        let payload = frame_bytes.saturating_sub(self.payload_length.header_bytes());
        match self.payload_length {
            PayloadLength::Fixed(_) => payload,
            PayloadLength::Prefixed => payload.min(u8::MAX as usize),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.signal.validate()?;
        self.layout.validate()?;
        self.detector.validate(&self.layout)?;

        if let PayloadLength::Fixed(len) = self.payload_length {
            if len == 0 || len > self.max_payload_len() {
                return Err(ModemError::InvalidConfig(format!(
                    "fixed payload length {} outside 1..={}",
                    len,
                    self.max_payload_len()
                )));
            }
        }
        if self.max_payload_len() == 0 {
            return Err(ModemError::InvalidConfig(format!(
                "max frame of {} samples cannot hold a single byte",
                self.max_frame_samples
            )));
        }

        // Tones are orthogonal over a bit window only when df spans a whole
        // number of cycles in it.
        let cycles = self.signal.shift_frequency as f64 * self.layout.bit_samples as f64
            / self.signal.sample_rate as f64;
        if (cycles - cycles.round()).abs() > 0.05 {
            log::warn!(
                "shift of {} Hz spans {:.2} cycles per bit; tone energies will leak",
                self.signal.shift_frequency,
                cycles
            );
        }
        Ok(())
    }
}

impl Default for ModemConfig {
    /// Near-ultrasonic profile: 18 kHz / 19 kHz tones at 48 kHz.
    fn default() -> Self {
        Self::with_signal(SignalParameters {
            sample_rate: DEFAULT_SAMPLE_RATE,
            base_frequency: 18000.0,
            shift_frequency: 1000.0,
            amplitude: 0.5,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(ModemConfig::default().validate().is_ok());
        assert!(ModemConfig::audible().validate().is_ok());
    }

    #[test]
    fn test_layout_from_millis() {
        let layout = FrameLayout::from_millis(48000, 100, 50, 30, 10, 2);
        assert_eq!(layout.preamble_samples, 4800);
        assert_eq!(layout.silence_samples, 2400);
        assert_eq!(layout.marker_samples, 1440);
        assert_eq!(layout.bit_samples, 480);
        assert_eq!(layout.bit_window_samples(), 960);
    }

    #[test]
    fn test_frame_samples_exact() {
        let layout = FrameLayout::from_millis(48000, 100, 50, 30, 10, 1);
        assert_eq!(layout.data_samples(8), 30720);
        assert_eq!(layout.frame_samples(8), 4800 + 2400 + 1440 + 30720);
    }

    #[test]
    fn test_nyquist_rejected() {
        let mut config = ModemConfig::default();
        config.signal.base_frequency = 23500.0;
        assert!(matches!(config.validate(), Err(ModemError::InvalidConfig(_))));
    }

    #[test]
    fn test_amplitude_bounds() {
        let mut config = ModemConfig::audible();
        config.signal.amplitude = 0.0;
        assert!(config.validate().is_err());
        config.signal.amplitude = 1.5;
        assert!(config.validate().is_err());
        config.signal.amplitude = 1.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_durations_rejected() {
        let mut config = ModemConfig::audible();
        config.layout.marker_samples = 0;
        assert!(config.validate().is_err());

        let config = ModemConfig::audible().with_repeat_factor(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_payload_prefixed_capped() {
        let config = ModemConfig::audible();
        // 30 s at 100 bit/s holds ~370 bytes, more than one length byte can describe
        assert_eq!(config.max_payload_len(), 255);
    }

    #[test]
    fn test_max_payload_shrinks_with_repetition() {
        let config = ModemConfig::audible()
            .with_payload_length(PayloadLength::Fixed(8))
            .with_repeat_factor(3);
        let expected = (config.max_frame_samples - config.layout.header_samples()) / (8 * 3 * 480);
        assert_eq!(config.max_payload_len(), expected);
    }

    #[test]
    fn test_tone_snr_threshold() {
        let mut config = ModemConfig::audible();
        assert!((config.detector.min_tone_snr() - 100.0).abs() < 1e-3);
        config.detector.min_tone_snr_db = -3.0;
        assert!(config.validate().is_err());
        config.detector.min_tone_snr_db = f32::NAN;
        assert!(config.validate().is_err());
        config.detector.min_tone_snr_db = 0.0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_fixed_length_bounds() {
        let config = ModemConfig::audible().with_payload_length(PayloadLength::Fixed(0));
        assert!(config.validate().is_err());

        let config = ModemConfig::audible().with_payload_length(PayloadLength::Fixed(100_000));
        assert!(config.validate().is_err());
    }
}
