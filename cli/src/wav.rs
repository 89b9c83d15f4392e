use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use tonelink_core::{AudioInput, AudioOutput, ModemError, Waveform};

/// Plays waveforms into a WAV file (16-bit PCM, mono).
pub struct WavOutput {
    path: PathBuf,
}

impl WavOutput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl AudioOutput for WavOutput {
    fn play(&mut self, waveform: &Waveform) -> tonelink_core::Result<()> {
        write_wav(&self.path, waveform).map_err(|e| ModemError::Audio(e.to_string()))
    }
}

pub fn write_wav(path: &Path, waveform: &Waveform) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: waveform.sample_rate(),
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &sample in waveform.samples() {
        // Clamp to [-1.0, 1.0] to avoid overflow, then scale to i16
        let clamped = sample.clamp(-1.0, 1.0);
        writer.write_sample((clamped * 32767.0) as i16)?;
    }
    writer.finalize()
}

/// Captures from a WAV file as if it were a microphone. Multi-channel files
/// are mixed down to mono.
pub struct WavInput {
    path: PathBuf,
    reader: Option<WavReader<BufReader<File>>>,
    chunk_size: usize,
}

impl WavInput {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader: None,
            chunk_size: tonelink_core::DEFAULT_CHUNK_SIZE,
        }
    }

    fn read_frames(&mut self) -> Result<Vec<f32>, hound::Error> {
        let reader = match self.reader.as_mut() {
            Some(r) => r,
            None => return Ok(Vec::new()),
        };
        let spec = reader.spec();
        let channels = spec.channels.max(1) as usize;
        let wanted = self.chunk_size * channels;

        let interleaved: Vec<f32> = match (spec.sample_format, spec.bits_per_sample) {
            (SampleFormat::Int, 16) => reader
                .samples::<i16>()
                .take(wanted)
                .map(|s| s.map(|v| v as f32 / 32768.0))
                .collect::<Result<_, _>>()?,
            (SampleFormat::Int, bits) => {
                let scale = (1i64 << (bits - 1)) as f32;
                reader
                    .samples::<i32>()
                    .take(wanted)
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
            (SampleFormat::Float, _) => reader
                .samples::<f32>()
                .take(wanted)
                .collect::<Result<_, _>>()?,
        };

        Ok(interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect())
    }
}

impl AudioInput for WavInput {
    fn open(&mut self, sample_rate: u32, chunk_size: usize) -> tonelink_core::Result<()> {
        if chunk_size == 0 {
            return Err(ModemError::Audio("chunk size must be positive".into()));
        }
        let reader = WavReader::open(&self.path)
            .map_err(|e| ModemError::Audio(format!("{}: {}", self.path.display(), e)))?;
        let spec = reader.spec();
        if spec.sample_rate != sample_rate {
            return Err(ModemError::Audio(format!(
                "{} is {} Hz but the profile expects {} Hz",
                self.path.display(),
                spec.sample_rate,
                sample_rate
            )));
        }
        tracing::debug!(
            channels = spec.channels,
            bits = spec.bits_per_sample,
            "Opened {}",
            self.path.display()
        );
        self.chunk_size = chunk_size;
        self.reader = Some(reader);
        Ok(())
    }

    fn next_chunk(&mut self) -> tonelink_core::Result<Option<Vec<f32>>> {
        if self.reader.is_none() {
            return Err(ModemError::Audio("input not open".into()));
        }
        let chunk = self
            .read_frames()
            .map_err(|e| ModemError::Audio(e.to_string()))?;
        Ok(if chunk.is_empty() { None } else { Some(chunk) })
    }

    fn close(&mut self) {
        self.reader = None;
    }
}
