//! FFT-based cross-correlation against a fixed template
//!
//! Only fully overlapping positions are produced (scipy's "valid" mode): the
//! output has length `N - M + 1`, empty when `M > N`, and index `i` is the
//! window starting at `signal[i]`.

use crate::error::{ModemError, Result};
use realfft::RealFftPlanner;

/// Correlates signals against one template, reusing FFT plans between calls.
pub struct Correlator {
    planner: RealFftPlanner<f32>,
    template: Vec<f32>,
}

impl Correlator {
    pub fn new(template: Vec<f32>) -> Self {
        Self {
            planner: RealFftPlanner::new(),
            template,
        }
    }

    pub fn template(&self) -> &[f32] {
        &self.template
    }

    pub fn correlate(&mut self, signal: &[f32]) -> Result<Vec<f32>> {
        let template = &self.template;
        if template.is_empty() || signal.len() < template.len() {
            return Ok(Vec::new());
        }

        let output_len = signal.len() + template.len() - 1;
        let fft_size = output_len.next_power_of_two();

        let mut padded_signal = vec![0.0; fft_size];
        padded_signal[..signal.len()].copy_from_slice(signal);

        // Time-reversing the template turns the convolution theorem into
        // correlation for real signals.
        let mut padded_template = vec![0.0; fft_size];
        for (slot, &val) in padded_template.iter_mut().zip(template.iter().rev()) {
            *slot = val;
        }

        let r2c = self.planner.plan_fft_forward(fft_size);
        let c2r = self.planner.plan_fft_inverse(fft_size);

        let mut signal_spectrum = r2c.make_output_vec();
        let mut template_spectrum = r2c.make_output_vec();
        r2c.process(&mut padded_signal, &mut signal_spectrum)
            .map_err(|e| ModemError::FftError(format!("forward FFT of signal: {:?}", e)))?;
        r2c.process(&mut padded_template, &mut template_spectrum)
            .map_err(|e| ModemError::FftError(format!("forward FFT of template: {:?}", e)))?;

        for (s, t) in signal_spectrum.iter_mut().zip(template_spectrum.iter()) {
            *s *= *t;
        }

        let mut result = c2r.make_output_vec();
        c2r.process(&mut signal_spectrum, &mut result)
            .map_err(|e| ModemError::FftError(format!("inverse FFT: {:?}", e)))?;

        let normalization = fft_size as f32;
        result.iter_mut().for_each(|x| *x /= normalization);

        let start = template.len() - 1;
        let valid_len = signal.len() - template.len() + 1;
        Ok(result[start..start + valid_len].to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sliding_correlate(signal: &[f32], template: &[f32]) -> Vec<f32> {
        (0..=signal.len() - template.len())
            .map(|i| {
                signal[i..i + template.len()]
                    .iter()
                    .zip(template)
                    .map(|(s, t)| s * t)
                    .sum()
            })
            .collect()
    }

    #[test]
    fn test_output_lengths() {
        let mut corr = Correlator::new(vec![1.0; 10]);
        assert_eq!(corr.correlate(&[1.0; 100]).unwrap().len(), 91);
        assert_eq!(corr.correlate(&[1.0; 10]).unwrap().len(), 1);
        assert!(corr.correlate(&[1.0, 2.0]).unwrap().is_empty());
        assert!(corr.correlate(&[]).unwrap().is_empty());
    }

    #[test]
    fn test_impulse_template_picks_window_start() {
        let mut corr = Correlator::new(vec![1.0, 0.0, 0.0]);
        let result = corr.correlate(&[1.0, 2.0, 3.0, 4.0, 5.0]).unwrap();
        assert_eq!(result.len(), 3);
        for (i, expected) in [1.0, 2.0, 3.0].iter().enumerate() {
            assert!((result[i] - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_valid_matches_sliding_window() {
        let signal: Vec<f32> = (0..257).map(|i| ((i * 37) % 11) as f32 - 5.0).collect();
        let template = vec![0.5, -1.0, 2.0, 0.25, -0.75];
        let mut corr = Correlator::new(template.clone());

        let fft = corr.correlate(&signal).unwrap();
        let naive = sliding_correlate(&signal, &template);
        assert_eq!(fft.len(), naive.len());
        for (i, (a, b)) in fft.iter().zip(naive.iter()).enumerate() {
            assert!((a - b).abs() < 1e-3, "index {}: fft={} naive={}", i, a, b);
        }
    }

    #[test]
    fn test_planner_reuse_across_sizes() {
        let mut corr = Correlator::new(vec![1.0, -1.0]);
        for len in [3usize, 64, 65, 1000] {
            let signal = vec![1.0; len];
            let out = corr.correlate(&signal).unwrap();
            assert_eq!(out.len(), len - 1);
            assert!(out.iter().all(|v| v.abs() < 1e-3));
        }
    }
}
