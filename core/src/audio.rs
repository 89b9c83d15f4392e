//! Audio boundary: waveforms, device traits and scoped capture.
//!
//! Samples are mono `f32` in `[-1.0, 1.0]` at the configured sample rate.
//! Playback completion is a blocking return from [`AudioOutput::play`];
//! capture is pulled chunk by chunk through [`AudioInput::next_chunk`].

use crate::error::{ModemError, Result};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A frame rendered to samples. Created per transmission, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct Waveform {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl Waveform {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
        }
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<f32> {
        self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn duration(&self) -> Duration {
        if self.sample_rate == 0 {
            return Duration::ZERO;
        }
        Duration::from_secs_f64(self.samples.len() as f64 / self.sample_rate as f64)
    }
}

/// Speaker side of the acoustic link.
pub trait AudioOutput: Send {
    /// Play the waveform, returning once playback has finished.
    fn play(&mut self, waveform: &Waveform) -> Result<()>;
}

/// Microphone side of the acoustic link.
pub trait AudioInput: Send {
    /// Start capturing mono samples at `sample_rate` in chunks of `chunk_size`.
    fn open(&mut self, sample_rate: u32, chunk_size: usize) -> Result<()>;

    /// Block until the next chunk is available. `None` means capture ended.
    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>>;

    /// Stop capturing and release the device. Must be safe to call twice.
    fn close(&mut self);
}

/// Scoped capture session: the input is opened on acquire and closed on drop,
/// whichever way the scope is left.
pub struct AudioChannel<'a, I: AudioInput + ?Sized> {
    input: &'a mut I,
}

impl<'a, I: AudioInput + ?Sized> AudioChannel<'a, I> {
    pub fn acquire(input: &'a mut I, sample_rate: u32, chunk_size: usize) -> Result<Self> {
        input.open(sample_rate, chunk_size)?;
        log::debug!("Audio input acquired ({} Hz, {} samples/chunk)", sample_rate, chunk_size);
        Ok(Self { input })
    }

    pub fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        self.input.next_chunk()
    }
}

impl<I: AudioInput + ?Sized> Drop for AudioChannel<'_, I> {
    fn drop(&mut self) {
        self.input.close();
        log::debug!("Audio input released");
    }
}

/// Delivers a prerecorded buffer in fixed-size chunks.
pub struct MemoryInput {
    samples: Vec<f32>,
    position: usize,
    chunk_size: usize,
    open: bool,
    opened_count: usize,
    closed_count: usize,
}

impl MemoryInput {
    pub fn new(samples: Vec<f32>) -> Self {
        Self {
            samples,
            position: 0,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            open: false,
            opened_count: 0,
            closed_count: 0,
        }
    }

    pub fn is_open(&self) -> bool {
        self.open
    }

    /// Number of completed open/close cycles (for leak checks).
    pub fn sessions(&self) -> (usize, usize) {
        (self.opened_count, self.closed_count)
    }
}

impl AudioInput for MemoryInput {
    fn open(&mut self, _sample_rate: u32, chunk_size: usize) -> Result<()> {
        if self.open {
            return Err(ModemError::Audio("input already open".into()));
        }
        if chunk_size == 0 {
            return Err(ModemError::Audio("chunk size must be positive".into()));
        }
        self.chunk_size = chunk_size;
        self.open = true;
        self.opened_count += 1;
        Ok(())
    }

    fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
        if !self.open {
            return Err(ModemError::Audio("input not open".into()));
        }
        if self.position >= self.samples.len() {
            return Ok(None);
        }
        let end = (self.position + self.chunk_size).min(self.samples.len());
        let chunk = self.samples[self.position..end].to_vec();
        self.position = end;
        Ok(Some(chunk))
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            self.closed_count += 1;
        }
    }
}

/// Records every played waveform; clones share the recording.
#[derive(Clone, Default)]
pub struct MemoryOutput {
    played: Arc<Mutex<Vec<Waveform>>>,
}

impl MemoryOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn played(&self) -> Vec<Waveform> {
        self.played.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

impl AudioOutput for MemoryOutput {
    fn play(&mut self, waveform: &Waveform) -> Result<()> {
        self.played
            .lock()
            .map_err(|_| ModemError::Audio("recording lock poisoned".into()))?
            .push(waveform.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_waveform_duration() {
        let waveform = Waveform::new(vec![0.0; 24000], 48000);
        assert_eq!(waveform.duration(), Duration::from_millis(500));
        assert_eq!(Waveform::new(vec![0.0; 10], 0).duration(), Duration::ZERO);
    }

    #[test]
    fn test_memory_input_chunks() {
        let mut input = MemoryInput::new((0..2500).map(|i| i as f32).collect());
        let mut channel = AudioChannel::acquire(&mut input, 48000, 1024).unwrap();
        let mut sizes = Vec::new();
        while let Some(chunk) = channel.next_chunk().unwrap() {
            sizes.push(chunk.len());
        }
        assert_eq!(sizes, vec![1024, 1024, 452]);
    }

    #[test]
    fn test_channel_releases_on_drop() {
        let mut input = MemoryInput::new(vec![0.0; 10]);
        {
            let _channel = AudioChannel::acquire(&mut input, 48000, 4).unwrap();
        }
        assert!(!input.is_open());
        assert_eq!(input.sessions(), (1, 1));
    }

    #[test]
    fn test_channel_releases_on_error_path() {
        fn read_one(input: &mut MemoryInput) -> Result<()> {
            let mut channel = AudioChannel::acquire(input, 48000, 4)?;
            channel.next_chunk()?;
            Err(ModemError::Audio("simulated failure".into()))
        }
        let mut input = MemoryInput::new(vec![0.0; 10]);
        assert!(read_one(&mut input).is_err());
        assert!(!input.is_open());
    }

    #[test]
    fn test_double_open_rejected() {
        let mut input = MemoryInput::new(vec![]);
        input.open(48000, 16).unwrap();
        assert!(input.open(48000, 16).is_err());
        input.close();
        input.close();
        assert_eq!(input.sessions(), (1, 1));
    }

    #[test]
    fn test_memory_output_records() {
        let output = MemoryOutput::new();
        let mut sink = output.clone();
        sink.play(&Waveform::new(vec![0.25; 4], 48000)).unwrap();
        assert_eq!(output.played().len(), 1);
        assert_eq!(output.played()[0].samples(), &[0.25; 4]);
    }
}
