use crate::audio::{AudioOutput, Waveform};
use crate::config::ModemConfig;
use crate::error::{ModemError, Result};
use crate::framing::FrameBuilder;
use crate::modulator::Modulator;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

/// Serializes transmissions onto one audio output.
///
/// Only one transmission may be in flight. A request made while another is
/// playing fails immediately with [`ModemError::Busy`] instead of queueing,
/// and never touches the waveform already being played.
pub struct TransmissionController<O: AudioOutput> {
    builder: FrameBuilder,
    modulator: Modulator,
    output: Mutex<O>,
    active: AtomicBool,
}

/// Clears the in-flight flag however `transmit` returns.
struct InFlight<'a>(&'a AtomicBool);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<O: AudioOutput> TransmissionController<O> {
    pub fn new(config: &ModemConfig, output: O) -> Result<Self> {
        Ok(Self {
            builder: FrameBuilder::new(config),
            modulator: Modulator::new(config)?,
            output: Mutex::new(output),
            active: AtomicBool::new(false),
        })
    }

    pub fn is_transmitting(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Frame, modulate and play `payload`, blocking until playback completes.
    /// Returns the waveform that was played.
    pub fn transmit(&self, payload: &[u8]) -> Result<Waveform> {
        if self
            .active
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log::warn!("Transmission rejected: another one is in progress");
            return Err(ModemError::Busy);
        }
        let _in_flight = InFlight(&self.active);

        let bits = self.builder.build(payload)?;
        let waveform = self.modulator.modulate(&bits)?;
        log::info!(
            "Transmitting {} bytes ({:.2} s)",
            payload.len(),
            waveform.duration().as_secs_f32()
        );

        self.output
            .lock()
            .map_err(|_| ModemError::Audio("output lock poisoned".into()))?
            .play(&waveform)?;
        log::debug!("Transmission complete");
        Ok(waveform)
    }

    /// Give back the output device.
    pub fn into_output(self) -> Result<O> {
        self.output
            .into_inner()
            .map_err(|_| ModemError::Audio("output lock poisoned".into()))
    }
}
