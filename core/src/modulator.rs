use crate::audio::Waveform;
use crate::config::{FrameLayout, ModemConfig, SignalParameters};
use crate::error::{ModemError, Result};
use crate::sync::generate_preamble;
use std::f64::consts::PI;

/// Binary FSK modulator
///
/// Produces `preamble sweep + silence + marker tone + data tones`. The marker
/// and the data share one running phase accumulator, so switching between
/// f0 and f0 + df never introduces a discontinuity.
pub struct Modulator {
    signal: SignalParameters,
    layout: FrameLayout,
    preamble: Vec<f32>,
}

impl Modulator {
    pub fn new(config: &ModemConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            signal: config.signal,
            layout: config.layout,
            preamble: generate_preamble(&config.signal, config.layout.preamble_samples),
        })
    }

    /// Modulate data bits (as produced by `FrameBuilder`, repetitions
    /// included) into a complete frame.
    pub fn modulate(&self, bits: &[bool]) -> Result<Waveform> {
        if bits.is_empty() {
            return Err(ModemError::InvalidPayload("no data bits to modulate".into()));
        }
        if bits.len() % (8 * self.layout.repeat_factor) != 0 {
            return Err(ModemError::InvalidPayload(format!(
                "{} bits is not a whole number of repeated bytes",
                bits.len()
            )));
        }

        let total = self.layout.header_samples() + bits.len() * self.layout.bit_samples;
        let mut samples = Vec::with_capacity(total);

        samples.extend_from_slice(&self.preamble);
        samples.resize(samples.len() + self.layout.silence_samples, 0.0);

        let mut osc = PhaseAccumulator::new(self.signal.sample_rate, self.signal.amplitude);
        let mark = self.signal.mark_frequency();
        osc.render(&mut samples, mark, self.layout.marker_samples);
        for &bit in bits {
            let freq = if bit { mark } else { self.signal.base_frequency };
            osc.render(&mut samples, freq, self.layout.bit_samples);
        }

        debug_assert_eq!(samples.len(), total);
        log::debug!(
            "Modulated {} bits into {} samples ({:.2} s)",
            bits.len(),
            samples.len(),
            samples.len() as f32 / self.signal.sample_rate as f32
        );
        Ok(Waveform::new(samples, self.signal.sample_rate))
    }
}

/// Continuous-phase sine oscillator.
struct PhaseAccumulator {
    phase: f64,
    sample_rate: f64,
    amplitude: f32,
}

impl PhaseAccumulator {
    fn new(sample_rate: u32, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            sample_rate: sample_rate as f64,
            amplitude,
        }
    }

    fn render(&mut self, out: &mut Vec<f32>, freq: f32, count: usize) {
        let step = 2.0 * PI * freq as f64 / self.sample_rate;
        for _ in 0..count {
            out.push(self.amplitude * self.phase.sin() as f32);
            self.phase = (self.phase + step) % (2.0 * PI);
        }
    }
}
