use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::framing::{FrameParser, ParseProgress};
use crate::sync::PreambleMatcher;
use crate::tone::{mean_power, ToneDetector};

// Streaming FSK demodulator
//
// Samples are addressed by their absolute index in the stream. Every decision
// (preamble block, silence gate, marker check, each bit window) is taken only
// once all the samples it looks at are buffered, and it looks at exactly those
// samples. The outcome therefore does not depend on how the stream was cut
// into chunks.

/// Where a decode session is in the frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    SearchingPreamble,
    InSilence,
    AwaitingMarker,
    CollectingBits,
    Complete,
    Aborted,
}

impl DecodePhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, DecodePhase::Complete | DecodePhase::Aborted)
    }
}

/// Mutable state carried across chunk deliveries.
#[derive(Debug)]
pub struct DecodeSession {
    phase: DecodePhase,
    buffer: Vec<f32>,
    /// Absolute index of `buffer[0]`.
    base: usize,
    search_origin: usize,
    candidate: Option<usize>,
    preamble_start: usize,
    preamble_power: f32,
    preamble_score: f32,
    noise_floor: f32,
    /// Goertzel power a repetition's stronger tone must exceed to vote.
    tone_floor: f32,
    data_start: usize,
    windows_done: usize,
    ones: usize,
    zeros: usize,
    last_bit: bool,
    ambiguous_bits: usize,
    sync_losses: usize,
    payload: Option<Vec<u8>>,
    failure: Option<ModemError>,
    /// Where the next search starts once this session has ended.
    resume_at: usize,
}

impl DecodeSession {
    fn new() -> Self {
        Self {
            phase: DecodePhase::SearchingPreamble,
            buffer: Vec::new(),
            base: 0,
            search_origin: 0,
            candidate: None,
            preamble_start: 0,
            preamble_power: 0.0,
            preamble_score: 0.0,
            noise_floor: 0.0,
            tone_floor: 0.0,
            data_start: 0,
            windows_done: 0,
            ones: 0,
            zeros: 0,
            last_bit: false,
            ambiguous_bits: 0,
            sync_losses: 0,
            payload: None,
            failure: None,
            resume_at: 0,
        }
    }

    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    /// Absolute index one past the last sample received.
    pub fn samples_received(&self) -> usize {
        self.base + self.buffer.len()
    }

    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }

    /// Absolute index where the data region starts, once the marker is confirmed.
    pub fn data_start(&self) -> Option<usize> {
        match self.phase {
            DecodePhase::CollectingBits | DecodePhase::Complete => Some(self.data_start),
            DecodePhase::Aborted if self.data_start > 0 => Some(self.data_start),
            _ => None,
        }
    }

    pub fn preamble_start(&self) -> Option<usize> {
        match self.phase {
            DecodePhase::SearchingPreamble => None,
            _ => Some(self.preamble_start),
        }
    }

    /// Mean power measured in the silence gap.
    pub fn noise_floor(&self) -> f32 {
        self.noise_floor
    }

    pub fn ambiguous_bits(&self) -> usize {
        self.ambiguous_bits
    }

    /// Marker confirmations that failed since the last reset.
    pub fn sync_losses(&self) -> usize {
        self.sync_losses
    }

    pub fn payload(&self) -> Option<&[u8]> {
        self.payload.as_deref()
    }

    pub fn failure(&self) -> Option<&ModemError> {
        self.failure.as_ref()
    }

    fn end(&self) -> usize {
        self.samples_received()
    }

    fn window(&self, start: usize, end: usize) -> Option<&[f32]> {
        debug_assert!(start >= self.base, "window {} precedes buffer base {}", start, self.base);
        if start < self.base || end > self.end() || start > end {
            return None;
        }
        Some(&self.buffer[start - self.base..end - self.base])
    }

    fn discard_before(&mut self, index: usize) {
        if index > self.base {
            let n = (index - self.base).min(self.buffer.len());
            self.buffer.drain(..n);
            self.base += n;
        }
    }
}

enum Step {
    Wait,
    Advanced,
    Decoded(Vec<u8>),
}

/// Turns captured audio into payloads, one frame per session.
pub struct Demodulator {
    config: ModemConfig,
    matcher: PreambleMatcher,
    space: ToneDetector,
    mark: ToneDetector,
    refine_samples: usize,
    parser: FrameParser,
    session: DecodeSession,
}

impl Demodulator {
    pub fn new(config: &ModemConfig) -> Result<Self> {
        config.validate()?;
        let signal = config.signal;
        let layout = config.layout;
        let lobe = (4 * signal.sample_rate as usize) / signal.shift_frequency.max(1.0) as usize;
        Ok(Self {
            config: *config,
            matcher: PreambleMatcher::new(&signal, layout.preamble_samples),
            space: ToneDetector::new(signal.base_frequency, signal.sample_rate),
            mark: ToneDetector::new(signal.mark_frequency(), signal.sample_rate),
            refine_samples: lobe.max(64).min(layout.preamble_samples),
            parser: FrameParser::new(config),
            session: DecodeSession::new(),
        })
    }

    pub fn config(&self) -> &ModemConfig {
        &self.config
    }

    pub fn session(&self) -> &DecodeSession {
        &self.session
    }

    pub fn phase(&self) -> DecodePhase {
        self.session.phase
    }

    /// Start a new session.
    ///
    /// After a completed or aborted frame the search resumes where that frame
    /// ends, so samples already received past it are searched too. Resetting
    /// a session that has not ended drops everything buffered.
    pub fn reset(&mut self) {
        let resume = if self.session.phase.is_terminal() {
            self.session.resume_at
        } else {
            self.session.end()
        };
        let mut session = DecodeSession::new();
        session.buffer = std::mem::take(&mut self.session.buffer);
        session.base = self.session.base;
        session.search_origin = resume;
        session.discard_before(resume);
        self.session = session;
        self.parser.reset();
    }

    /// Feed the next chunk of captured samples.
    ///
    /// Returns the payload on the call that completes the frame. Once the
    /// session is complete or aborted, input is ignored until [`reset`](Self::reset).
    pub fn push(&mut self, chunk: &[f32]) -> Result<Option<Vec<u8>>> {
        if self.session.phase.is_terminal() {
            return Ok(None);
        }
        self.session.buffer.extend_from_slice(chunk);
        self.advance(false)
    }

    /// Signal that capture has ended.
    ///
    /// A frame that can still be completed from buffered samples is returned;
    /// a frame cut off after its preamble fails with `InsufficientSamples`.
    pub fn finish(&mut self) -> Result<Option<Vec<u8>>> {
        if self.session.phase.is_terminal() {
            return Ok(None);
        }
        if let Some(payload) = self.advance(true)? {
            return Ok(Some(payload));
        }
        match self.session.phase {
            DecodePhase::AwaitingMarker | DecodePhase::CollectingBits => {
                Err(self.abort(ModemError::InsufficientSamples))
            }
            DecodePhase::InSilence => {
                log::debug!("Capture ended during the silence gap");
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    fn advance(&mut self, at_end: bool) -> Result<Option<Vec<u8>>> {
        loop {
            let step = match self.session.phase {
                DecodePhase::SearchingPreamble => self.search_preamble(at_end)?,
                DecodePhase::InSilence => self.check_silence(),
                DecodePhase::AwaitingMarker => self.find_marker(),
                DecodePhase::CollectingBits => self.collect_bits()?,
                DecodePhase::Complete | DecodePhase::Aborted => Step::Wait,
            };
            match step {
                Step::Wait => return Ok(None),
                Step::Advanced => continue,
                Step::Decoded(payload) => return Ok(Some(payload)),
            }
        }
    }

    fn abort(&mut self, err: ModemError) -> ModemError {
        log::warn!("Decode session aborted: {}", err);
        let frame_end = match (self.session.phase, self.parser.expected_bits()) {
            (DecodePhase::CollectingBits, Some(total)) => {
                Some(self.session.data_start + total * self.config.layout.bit_window_samples())
            }
            _ => None,
        };
        let received = self.session.samples_received();
        self.session.resume_at = frame_end.unwrap_or(received);
        self.session.phase = DecodePhase::Aborted;
        self.session.discard_before(self.session.resume_at);
        self.session.failure = Some(err.clone());
        err
    }

    /// Resume searching after a rejected preamble. The rejected sweep is
    /// skipped whole so its own sidelobes are not detected again.
    fn restart_search(&mut self, origin: usize) {
        self.session.phase = DecodePhase::SearchingPreamble;
        self.session.candidate = None;
        self.session.search_origin = origin;
        self.session.discard_before(origin);
    }

    /// Candidate starts are scanned in blocks of one preamble length, aligned
    /// to `search_origin`. A block whose best score clears the threshold is
    /// refined over a short look-ahead, because the true peak may sit just
    /// past the block edge.
    fn search_preamble(&mut self, at_end: bool) -> Result<Step> {
        let len = self.config.layout.preamble_samples;
        let end = self.session.end();

        let candidate = match self.session.candidate {
            Some(c) => c,
            None => {
                let origin = self.session.search_origin;
                let full_end = origin + 2 * len - 1;
                let slice_end = if end >= full_end {
                    full_end
                } else if at_end && end >= origin + len {
                    end
                } else {
                    return Ok(Step::Wait);
                };

                let scored = match self.session.window(origin, slice_end) {
                    Some(w) => self.matcher.best_match(w),
                    None => return Ok(Step::Wait),
                };
                let best = match scored {
                    Ok(best) => best,
                    Err(e) => return Err(self.abort(e)),
                };
                match best {
                    Some(m) if m.score >= self.config.detector.preamble_threshold => {
                        let c = origin + m.offset;
                        self.session.candidate = Some(c);
                        c
                    }
                    _ => {
                        // Nothing here: slide to the next block
                        let next = slice_end + 1 - len;
                        self.session.search_origin = next;
                        self.session.discard_before(next);
                        return Ok(if slice_end == full_end { Step::Advanced } else { Step::Wait });
                    }
                }
            }
        };

        let refine_end = candidate + self.refine_samples + len;
        let slice_end = if end >= refine_end {
            refine_end
        } else if at_end {
            end
        } else {
            return Ok(Step::Wait);
        };
        let refined = match self.session.window(candidate, slice_end) {
            Some(w) => self.matcher.best_match(w),
            None => return Ok(Step::Wait),
        };
        let (start, score) = match refined {
            Ok(Some(m)) => (candidate + m.offset, m.score),
            Ok(None) => return Ok(Step::Wait),
            Err(e) => return Err(self.abort(e)),
        };

        let preamble_power = self
            .session
            .window(start, start + len)
            .map(mean_power)
            .unwrap_or(0.0);
        log::debug!(
            "Preamble at sample {} (score {:.3}, power {:.5})",
            start,
            score,
            preamble_power
        );
        self.session.candidate = None;
        self.session.preamble_start = start;
        self.session.preamble_power = preamble_power;
        self.session.preamble_score = score;
        self.session.phase = DecodePhase::InSilence;
        self.session.discard_before(start);
        Ok(Step::Advanced)
    }

    /// The gap after the sweep must be quiet compared to the sweep itself.
    ///
    /// The preamble window splits into the part correlated with the template
    /// (`score^2` of its power) and a residual. Noise shows up in both the
    /// residual and the gap, so only gap power beyond the residual counts
    /// against the sweep. The gap also calibrates the noise floor used to
    /// gate bit decisions.
    fn check_silence(&mut self) -> Step {
        let layout = self.config.layout;
        let silence_start = self.session.preamble_start + layout.preamble_samples;
        let guard = layout.silence_samples / 8;
        let gate_start = silence_start + guard;
        let gate_end = silence_start + layout.silence_samples - guard;

        let power = match self.session.window(gate_start, gate_end) {
            Some(w) => mean_power(w),
            None => return Step::Wait,
        };

        let detector = self.config.detector;
        let correlated = self.session.preamble_score.powi(2) * self.session.preamble_power;
        let residual = (self.session.preamble_power - correlated).max(0.0);
        if power > residual + detector.silence_max_ratio * correlated {
            log::debug!(
                "Energy in silence gap ({:.5} vs sweep {:.5}, residual {:.5}); rejecting preamble at {}",
                power,
                correlated,
                residual,
                self.session.preamble_start
            );
            self.restart_search(self.session.preamble_start + layout.preamble_samples);
        } else {
            // White noise of power p puts n * p into a Goertzel bin of n samples
            self.session.noise_floor = power;
            self.session.tone_floor = detector.min_tone_snr() * layout.bit_samples as f32 * power;
            self.session.phase = DecodePhase::AwaitingMarker;
        }
        Step::Advanced
    }

    /// The marker is the same tone as a 1 bit; only its position and length
    /// set it apart. The data region starts `marker_samples` after its onset.
    fn find_marker(&mut self) -> Step {
        let layout = self.config.layout;
        let detector = self.config.detector;
        let nominal =
            self.session.preamble_start + layout.preamble_samples + layout.silence_samples;
        let tolerance = detector.marker_search_samples;
        let marker_len = layout.marker_samples;

        if self.session.end() < nominal + tolerance + marker_len {
            return Step::Wait;
        }

        // Onsets are tried on a grid across the tolerance. The leading edge is
        // the earliest one within 2% of the strongest mark energy, since later
        // windows may run into data bits of the same tone.
        let step = (tolerance / 8).max(1);
        let reach = (tolerance / step) as i64;
        let min_level = detector.marker_min_level * self.session.preamble_power;
        let mut candidates = Vec::new();
        for k in -reach..=reach {
            let start = (nominal as i64 + k * step as i64) as usize;
            let window = match self.session.window(start, start + marker_len) {
                Some(w) => w,
                None => continue,
            };
            let mark = self.mark.power(window);
            let space = self.space.power(window);
            if mark > detector.marker_dominance * space && mean_power(window) >= min_level {
                candidates.push((start, mark));
            }
        }
        let peak = candidates.iter().map(|&(_, mark)| mark).fold(0.0f32, f32::max);
        let onset = candidates
            .iter()
            .find(|&&(_, mark)| mark >= 0.98 * peak)
            .map(|&(start, _)| start);

        match onset {
            Some(start) => {
                self.session.data_start = start + marker_len;
                self.session.windows_done = 0;
                self.session.ones = 0;
                self.session.zeros = 0;
                self.session.last_bit = false;
                self.session.ambiguous_bits = 0;
                self.parser.reset();
                self.session.phase = DecodePhase::CollectingBits;
                self.session.discard_before(self.session.data_start);
                log::debug!(
                    "Marker at sample {}; data starts at {}",
                    start,
                    self.session.data_start
                );
            }
            None => {
                self.session.sync_losses += 1;
                log::warn!(
                    "{} (preamble at {})",
                    ModemError::SyncLost,
                    self.session.preamble_start
                );
                self.restart_search(self.session.preamble_start + layout.preamble_samples);
            }
        }
        Step::Advanced
    }

    fn collect_bits(&mut self) -> Result<Step> {
        let bit_samples = self.config.layout.bit_samples;
        let repeat = self.config.layout.repeat_factor;
        let tie = self.config.detector.tie_tolerance;

        loop {
            let start = self.session.data_start + self.session.windows_done * bit_samples;
            let (space, mark) = match self.session.window(start, start + bit_samples) {
                Some(w) => (self.space.power(w), self.mark.power(w)),
                None => return Ok(Step::Wait),
            };

            // Ties and repetitions lost in the noise floor do not vote
            let clear = (mark - space).abs() > tie * (mark + space)
                && mark.max(space) > self.session.tone_floor;
            if clear {
                if mark > space {
                    self.session.ones += 1;
                } else {
                    self.session.zeros += 1;
                }
            }
            self.session.windows_done += 1;
            self.session.discard_before(start + bit_samples);

            if self.session.windows_done % repeat != 0 {
                continue;
            }

            let bit = if self.session.ones > self.session.zeros {
                true
            } else if self.session.zeros > self.session.ones {
                false
            } else {
                self.session.ambiguous_bits += 1;
                self.session.last_bit
            };
            self.session.ones = 0;
            self.session.zeros = 0;
            self.session.last_bit = bit;

            let progress = match self.parser.push_bit(bit) {
                Ok(progress) => progress,
                Err(ModemError::CorruptFrame { total, .. }) => {
                    return Err(self.abort(ModemError::CorruptFrame {
                        ambiguous: self.session.ambiguous_bits,
                        total,
                    }));
                }
                Err(e) => return Err(self.abort(e)),
            };

            if let Some(total) = self.parser.expected_bits() {
                let allowed =
                    (self.config.detector.max_ambiguous_ratio * total as f32).floor() as usize;
                if self.session.ambiguous_bits > allowed {
                    return Err(self.abort(ModemError::CorruptFrame {
                        ambiguous: self.session.ambiguous_bits,
                        total,
                    }));
                }
            }

            if let ParseProgress::Complete(payload) = progress {
                log::info!(
                    "Decoded {} byte frame ({} ambiguous bits)",
                    payload.len(),
                    self.session.ambiguous_bits
                );
                self.session.phase = DecodePhase::Complete;
                self.session.resume_at =
                    self.session.data_start + self.session.windows_done * bit_samples;
                self.session.payload = Some(payload.clone());
                return Ok(Step::Decoded(payload));
            }
        }
    }
}

/// Decode the first frame found in a complete recording.
pub fn decode(config: &ModemConfig, samples: &[f32]) -> Result<Vec<u8>> {
    let mut demodulator = Demodulator::new(config)?;
    if let Some(payload) = demodulator.push(samples)? {
        return Ok(payload);
    }
    demodulator.finish()?.ok_or(ModemError::PreambleNotFound)
}
