use std::f32::consts::PI;

/// Single-bin energy estimator (Goertzel filter) for one tone.
///
/// The target frequency is used as-is rather than snapped to the nearest
/// DFT bin, so it works for any window length.
#[derive(Debug, Clone, Copy)]
pub struct ToneDetector {
    frequency: f32,
    coeff: f32,
}

impl ToneDetector {
    pub fn new(frequency: f32, sample_rate: u32) -> Self {
        let omega = 2.0 * PI * frequency / sample_rate as f32;
        Self {
            frequency,
            coeff: 2.0 * omega.cos(),
        }
    }

    pub fn frequency(&self) -> f32 {
        self.frequency
    }

    /// Squared magnitude of the tone's component over `samples`.
    pub fn power(&self, samples: &[f32]) -> f32 {
        let mut q1 = 0.0f32;
        let mut q2 = 0.0f32;
        for &sample in samples {
            let q0 = self.coeff * q1 - q2 + sample;
            q2 = q1;
            q1 = q0;
        }
        (q1 * q1 + q2 * q2 - self.coeff * q1 * q2).max(0.0)
    }
}

/// Mean power (mean square) of a window.
pub fn mean_power(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    samples.iter().map(|&s| s * s).sum::<f32>() / samples.len() as f32
}
