use crate::config::SignalParameters;
use crate::error::Result;
use crate::fft_correlation::Correlator;
use std::f64::consts::PI;

/// Linear frequency sweep from `start_freq` to `end_freq` over `duration_samples`.
///
/// Instantaneous frequency at sample n is `start + (end - start) * n / len`;
/// phase is accumulated in f64 so long sweeps stay clean.
pub fn generate_chirp(
    duration_samples: usize,
    start_freq: f32,
    end_freq: f32,
    sample_rate: u32,
    amplitude: f32,
) -> Vec<f32> {
    let sample_rate = sample_rate as f64;
    let sweep = (end_freq - start_freq) as f64 / duration_samples.max(1) as f64;
    let mut phase = 0.0f64;
    let mut samples = Vec::with_capacity(duration_samples);
    for n in 0..duration_samples {
        samples.push(amplitude * phase.sin() as f32);
        let freq = start_freq as f64 + sweep * n as f64;
        phase = (phase + 2.0 * PI * freq / sample_rate) % (2.0 * PI);
    }
    samples
}

/// Preamble: sweep from f0 up to f0 + df.
pub fn generate_preamble(signal: &SignalParameters, duration_samples: usize) -> Vec<f32> {
    generate_chirp(
        duration_samples,
        signal.base_frequency,
        signal.mark_frequency(),
        signal.sample_rate,
        signal.amplitude,
    )
}

/// Best preamble alignment found in a window of candidate starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PreambleMatch {
    /// Offset of the preamble start within the searched slice.
    pub offset: usize,
    /// Normalized correlation coefficient in [0, 1].
    pub score: f32,
}

/// Normalized matched filter for the preamble sweep.
pub struct PreambleMatcher {
    correlator: Correlator,
    template_energy: f32,
}

impl PreambleMatcher {
    pub fn new(signal: &SignalParameters, preamble_samples: usize) -> Self {
        let template = generate_preamble(signal, preamble_samples);
        let template_energy = template.iter().map(|x| x * x).sum();
        Self {
            correlator: Correlator::new(template),
            template_energy,
        }
    }

    pub fn template_len(&self) -> usize {
        self.correlator.template().len()
    }

    /// Evaluate every start position `i` with `i + template_len <= samples.len()`
    /// and return the one with the highest normalized correlation.
    /// Ties go to the earliest position.
    pub fn best_match(&mut self, samples: &[f32]) -> Result<Option<PreambleMatch>> {
        let len = self.template_len();
        if samples.len() < len {
            return Ok(None);
        }
        let correlation = self.correlator.correlate(samples)?;

        // Prefix sums of squared samples give O(1) window energy
        let mut sq_prefix = vec![0.0f64; samples.len() + 1];
        for (k, &s) in samples.iter().enumerate() {
            sq_prefix[k + 1] = sq_prefix[k] + (s as f64) * (s as f64);
        }

        let mut best: Option<PreambleMatch> = None;
        for (i, &raw) in correlation.iter().enumerate() {
            let window_energy = (sq_prefix[i + len] - sq_prefix[i]).max(0.0) as f32;
            let denom = (window_energy * self.template_energy).sqrt();
            let score = if denom > 1e-10 { (raw / denom).abs().min(1.0) } else { 0.0 };
            if best.map_or(true, |b| score > b.score) {
                best = Some(PreambleMatch { offset: i, score });
            }
        }
        Ok(best)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ModemConfig;
    use crate::tone::ToneDetector;

    #[test]
    fn test_chirp_bounded_and_sweeping() {
        let chirp = generate_chirp(4800, 5000.0, 6000.0, 48000, 0.5);
        assert_eq!(chirp.len(), 4800);
        assert!(chirp.iter().all(|s| s.abs() <= 0.5 + 1e-6));

        let start = ToneDetector::new(5000.0, 48000);
        let end = ToneDetector::new(6000.0, 48000);
        let head = &chirp[..480];
        let tail = &chirp[4320..];
        assert!(start.power(head) > end.power(head));
        assert!(end.power(tail) > start.power(tail));
    }

    #[test]
    fn test_matcher_finds_exact_offset() {
        let signal = ModemConfig::audible().signal;
        let preamble = generate_preamble(&signal, 4800);
        let mut samples = vec![0.0; 1234];
        samples.extend_from_slice(&preamble);
        samples.extend_from_slice(&vec![0.0; 3000]);

        let mut matcher = PreambleMatcher::new(&signal, 4800);
        let found = matcher.best_match(&samples).unwrap().unwrap();
        assert_eq!(found.offset, 1234);
        assert!(found.score > 0.99, "score={}", found.score);
    }

    #[test]
    fn test_matcher_is_gain_invariant() {
        let signal = ModemConfig::audible().signal;
        let preamble = generate_preamble(&signal, 4800);
        let mut matcher = PreambleMatcher::new(&signal, 4800);
        for gain in [0.01f32, 0.3, 2.0] {
            let mut samples = vec![0.0; 500];
            samples.extend(preamble.iter().map(|s| s * gain));
            samples.extend_from_slice(&vec![0.0; 500]);
            let found = matcher.best_match(&samples).unwrap().unwrap();
            assert_eq!(found.offset, 500, "gain {}", gain);
        }
    }

    #[test]
    fn test_matcher_rejects_constant_tone() {
        let signal = ModemConfig::audible().signal;
        let tone = generate_chirp(12000, 6000.0, 6000.0, 48000, 0.5);
        let mut matcher = PreambleMatcher::new(&signal, 4800);
        let found = matcher.best_match(&tone).unwrap().unwrap();
        assert!(found.score < 0.4, "score={}", found.score);
    }

    #[test]
    fn test_matcher_needs_full_template() {
        let signal = ModemConfig::audible().signal;
        let mut matcher = PreambleMatcher::new(&signal, 4800);
        assert!(matcher.best_match(&[0.0; 4799]).unwrap().is_none());
        let silent = matcher.best_match(&[0.0; 4800]).unwrap().unwrap();
        assert_eq!(silent.score, 0.0);
    }
}
