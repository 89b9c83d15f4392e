//! Background listening loop
//!
//! A worker thread owns the capture device for as long as the listener runs,
//! feeds each chunk to a [`Demodulator`] and reports every decode outcome on
//! a channel. The session is reset after each report and the search resumes
//! where the reported frame ended, so frames sent back to back are all
//! picked up.

use crate::audio::{AudioChannel, AudioInput};
use crate::config::ModemConfig;
use crate::demodulator::Demodulator;
use crate::error::{ModemError, Result};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Outcome reported by a running listener.
#[derive(Debug, Clone, PartialEq)]
pub enum ListenEvent {
    Decoded(Vec<u8>),
    Failed(ModemError),
    /// Capture stopped, either on request or because the input ran dry.
    Ended,
}

pub struct Listener<I: AudioInput + 'static> {
    config: ModemConfig,
    chunk_size: usize,
    input: Option<I>,
    worker: Option<JoinHandle<I>>,
    stop_flag: Arc<AtomicBool>,
    events_tx: Sender<ListenEvent>,
    events_rx: Receiver<ListenEvent>,
}

impl<I: AudioInput + 'static> Listener<I> {
    pub fn new(config: &ModemConfig, input: I) -> Result<Self> {
        config.validate()?;
        let (events_tx, events_rx) = unbounded();
        Ok(Self {
            config: *config,
            chunk_size: crate::DEFAULT_CHUNK_SIZE,
            input: Some(input),
            worker: None,
            stop_flag: Arc::new(AtomicBool::new(false)),
            events_tx,
            events_rx,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    /// Receiving end of the report channel. Clones share one queue.
    pub fn events(&self) -> Receiver<ListenEvent> {
        self.events_rx.clone()
    }

    /// True while the worker is capturing.
    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Start capturing. Calling this while already started is a no-op.
    pub fn start(&mut self) -> Result<()> {
        if self.worker.is_some() {
            log::debug!("Listener already started");
            return Ok(());
        }
        let mut input = self
            .input
            .take()
            .ok_or_else(|| ModemError::Audio("input device lost".into()))?;

        self.stop_flag.store(false, Ordering::Release);
        let stop_flag = Arc::clone(&self.stop_flag);
        let events = self.events_tx.clone();
        let config = self.config;
        let chunk_size = self.chunk_size;

        // The demodulator (and its FFT planner) lives on the worker only
        let worker = std::thread::Builder::new()
            .name("tonelink-listener".into())
            .spawn(move || {
                match Demodulator::new(&config) {
                    Ok(mut demodulator) => capture_loop(
                        &mut input,
                        &mut demodulator,
                        config.signal.sample_rate,
                        chunk_size,
                        &stop_flag,
                        &events,
                    ),
                    Err(e) => {
                        let _ = events.send(ListenEvent::Failed(e));
                        let _ = events.send(ListenEvent::Ended);
                    }
                }
                input
            })
            .map_err(|e| ModemError::Audio(format!("failed to spawn listener: {}", e)))?;

        log::info!(
            "Listening ({} Hz, {} samples/chunk)",
            config.signal.sample_rate,
            chunk_size
        );
        self.worker = Some(worker);
        Ok(())
    }

    /// Stop capturing and wait for the worker to release the input. A frame
    /// cut off by the stop is reported as `InsufficientSamples`.
    /// Calling this while stopped is a no-op.
    pub fn stop(&mut self) -> Result<()> {
        let worker = match self.worker.take() {
            Some(w) => w,
            None => return Ok(()),
        };
        self.stop_flag.store(true, Ordering::Release);
        let input = worker
            .join()
            .map_err(|_| ModemError::Audio("listener thread panicked".into()))?;
        self.input = Some(input);
        log::info!("Listener stopped");
        Ok(())
    }

    /// Stop and hand back the input device.
    pub fn into_input(mut self) -> Result<I> {
        self.stop()?;
        self.input
            .take()
            .ok_or_else(|| ModemError::Audio("input device lost".into()))
    }
}

impl<I: AudioInput + 'static> Drop for Listener<I> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            log::error!("Listener shutdown failed: {}", e);
        }
    }
}

fn capture_loop<I: AudioInput>(
    input: &mut I,
    demodulator: &mut Demodulator,
    sample_rate: u32,
    chunk_size: usize,
    stop_flag: &AtomicBool,
    events: &Sender<ListenEvent>,
) {
    match AudioChannel::acquire(input, sample_rate, chunk_size) {
        Ok(mut channel) => loop {
            if stop_flag.load(Ordering::Acquire) {
                // A frame cut off by the stop is reported like one cut off by the input
                drain(demodulator.finish(), demodulator, events, true);
                break;
            }
            match channel.next_chunk() {
                Ok(Some(chunk)) => drain(demodulator.push(&chunk), demodulator, events, false),
                Ok(None) => {
                    drain(demodulator.finish(), demodulator, events, true);
                    break;
                }
                Err(e) => {
                    log::error!("Capture failed: {}", e);
                    let _ = events.send(ListenEvent::Failed(e));
                    break;
                }
            }
        },
        Err(e) => {
            log::error!("Could not open audio input: {}", e);
            let _ = events.send(ListenEvent::Failed(e));
        }
    }
    let _ = events.send(ListenEvent::Ended);
}

/// Report `outcome`, then keep decoding what is already buffered: one chunk
/// may hold the tail of a frame and the whole of the next.
fn drain(
    mut outcome: Result<Option<Vec<u8>>>,
    demodulator: &mut Demodulator,
    events: &Sender<ListenEvent>,
    at_end: bool,
) {
    while report(outcome, demodulator, events) {
        outcome = if at_end {
            demodulator.finish()
        } else {
            demodulator.push(&[])
        };
    }
}

/// Send the outcome of a finished session and start the next one. Returns
/// false when there was nothing to report.
fn report(
    outcome: Result<Option<Vec<u8>>>,
    demodulator: &mut Demodulator,
    events: &Sender<ListenEvent>,
) -> bool {
    let event = match outcome {
        Ok(None) => return false,
        Ok(Some(payload)) => ListenEvent::Decoded(payload),
        Err(e) => ListenEvent::Failed(e),
    };
    let _ = events.send(event);
    demodulator.reset();
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryInput;
    use crate::config::PayloadLength;
    use crate::framing::FrameBuilder;
    use crate::modulator::Modulator;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn encode(config: &ModemConfig, payload: &[u8]) -> Vec<f32> {
        let bits = FrameBuilder::new(config).build(payload).unwrap();
        Modulator::new(config).unwrap().modulate(&bits).unwrap().into_samples()
    }

    fn collect_until_ended(rx: &Receiver<ListenEvent>) -> Vec<ListenEvent> {
        let mut events = Vec::new();
        loop {
            let event = rx.recv_timeout(TIMEOUT).unwrap();
            let ended = event == ListenEvent::Ended;
            events.push(event);
            if ended {
                return events;
            }
        }
    }

    /// Produces silence forever; counts closes.
    struct EndlessInput {
        open: bool,
        closes: Arc<AtomicUsize>,
    }

    impl AudioInput for EndlessInput {
        fn open(&mut self, _sample_rate: u32, _chunk_size: usize) -> Result<()> {
            self.open = true;
            Ok(())
        }

        fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
            std::thread::sleep(Duration::from_millis(1));
            Ok(Some(vec![0.0; 256]))
        }

        fn close(&mut self) {
            if self.open {
                self.open = false;
                self.closes.fetch_add(1, Ordering::SeqCst);
            }
        }
    }

    /// Hands out `samples`, then empty chunks until closed.
    struct StallingInput {
        inner: MemoryInput,
        drained: Arc<AtomicBool>,
    }

    impl AudioInput for StallingInput {
        fn open(&mut self, sample_rate: u32, chunk_size: usize) -> Result<()> {
            self.inner.open(sample_rate, chunk_size)
        }

        fn next_chunk(&mut self) -> Result<Option<Vec<f32>>> {
            match self.inner.next_chunk()? {
                Some(chunk) => Ok(Some(chunk)),
                None => {
                    self.drained.store(true, Ordering::SeqCst);
                    std::thread::sleep(Duration::from_millis(1));
                    Ok(Some(Vec::new()))
                }
            }
        }

        fn close(&mut self) {
            self.inner.close();
        }
    }

    #[test]
    fn test_reports_each_frame() {
        let config = ModemConfig::audible();
        let mut samples = vec![0.0; 2000];
        samples.extend(encode(&config, b"first"));
        samples.extend(vec![0.0; 6000]);
        samples.extend(encode(&config, b"second"));
        samples.extend(vec![0.0; 6000]);

        let mut listener = Listener::new(&config, MemoryInput::new(samples)).unwrap();
        let rx = listener.events();
        listener.start().unwrap();

        let events = collect_until_ended(&rx);
        assert_eq!(
            events,
            vec![
                ListenEvent::Decoded(b"first".to_vec()),
                ListenEvent::Decoded(b"second".to_vec()),
                ListenEvent::Ended,
            ]
        );

        let input = listener.into_input().unwrap();
        assert!(!input.is_open());
        assert_eq!(input.sessions(), (1, 1));
    }

    #[test]
    fn test_back_to_back_frames() {
        let config = ModemConfig::audible();
        let mut samples = encode(&config, b"first");
        samples.extend(encode(&config, b"second"));
        samples.extend(encode(&config, b"third"));

        for chunk_size in [samples.len(), 4096, 1024, 7] {
            let mut listener = Listener::new(&config, MemoryInput::new(samples.clone()))
                .unwrap()
                .with_chunk_size(chunk_size);
            let rx = listener.events();
            listener.start().unwrap();
            assert_eq!(
                collect_until_ended(&rx),
                vec![
                    ListenEvent::Decoded(b"first".to_vec()),
                    ListenEvent::Decoded(b"second".to_vec()),
                    ListenEvent::Decoded(b"third".to_vec()),
                    ListenEvent::Ended,
                ],
                "chunk size {}",
                chunk_size
            );
        }
    }

    #[test]
    fn test_failure_reported_and_listening_continues() {
        let config = ModemConfig::audible().with_payload_length(PayloadLength::Fixed(8));
        let mut jammed = encode(&config, &[0xFF; 8]);
        let data_start = config.layout.header_samples();
        let omega = 2.0 * std::f32::consts::PI * 5000.0 / 48000.0;
        for (n, s) in jammed[data_start..].iter_mut().enumerate() {
            *s += 0.5 * (omega * n as f32).sin();
        }

        let mut samples = jammed;
        samples.extend(vec![0.0; 6000]);
        samples.extend(encode(&config, b"TEST:AB\0"));

        let mut listener = Listener::new(&config, MemoryInput::new(samples)).unwrap();
        let rx = listener.events();
        listener.start().unwrap();

        let events = collect_until_ended(&rx);
        assert_eq!(events.len(), 3, "{:?}", events);
        assert!(matches!(
            events[0],
            ListenEvent::Failed(ModemError::CorruptFrame { .. })
        ));
        assert_eq!(events[1], ListenEvent::Decoded(b"TEST:AB\0".to_vec()));
        listener.stop().unwrap();
    }

    #[test]
    fn test_truncated_frame_reported_at_end() {
        let config = ModemConfig::audible();
        let samples = encode(&config, b"cut short");
        let cut = samples.len() - 2000;

        let mut listener =
            Listener::new(&config, MemoryInput::new(samples[..cut].to_vec())).unwrap();
        let rx = listener.events();
        listener.start().unwrap();
        assert_eq!(
            collect_until_ended(&rx),
            vec![
                ListenEvent::Failed(ModemError::InsufficientSamples),
                ListenEvent::Ended
            ]
        );
    }

    #[test]
    fn test_stop_releases_device() {
        let closes = Arc::new(AtomicUsize::new(0));
        let input = EndlessInput {
            open: false,
            closes: Arc::clone(&closes),
        };
        let mut listener = Listener::new(&ModemConfig::default(), input)
            .unwrap()
            .with_chunk_size(256);
        let rx = listener.events();

        listener.start().unwrap();
        listener.start().unwrap();
        assert!(listener.is_running());

        listener.stop().unwrap();
        listener.stop().unwrap();
        assert!(!listener.is_running());
        assert_eq!(closes.load(Ordering::SeqCst), 1);
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ListenEvent::Ended);

        // Restartable with the same device
        listener.start().unwrap();
        listener.stop().unwrap();
        assert_eq!(closes.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_stop_mid_frame_reports_truncation() {
        let config = ModemConfig::audible();
        let samples = encode(&config, b"interrupted");
        let cut = samples.len() - 3000;
        let drained = Arc::new(AtomicBool::new(false));
        let input = StallingInput {
            inner: MemoryInput::new(samples[..cut].to_vec()),
            drained: Arc::clone(&drained),
        };

        let mut listener = Listener::new(&config, input).unwrap();
        let rx = listener.events();
        listener.start().unwrap();
        let deadline = std::time::Instant::now() + TIMEOUT;
        while !drained.load(Ordering::SeqCst) {
            assert!(std::time::Instant::now() < deadline, "input never drained");
            std::thread::sleep(Duration::from_millis(1));
        }
        assert!(rx.is_empty());

        listener.stop().unwrap();
        assert_eq!(
            rx.try_iter().collect::<Vec<_>>(),
            vec![
                ListenEvent::Failed(ModemError::InsufficientSamples),
                ListenEvent::Ended
            ]
        );
    }

    #[test]
    fn test_open_failure_reported() {
        let mut listener = Listener::new(&ModemConfig::default(), MemoryInput::new(vec![0.0; 10]))
            .unwrap()
            .with_chunk_size(0);
        let rx = listener.events();
        listener.start().unwrap();
        assert!(matches!(
            rx.recv_timeout(TIMEOUT).unwrap(),
            ListenEvent::Failed(ModemError::Audio(_))
        ));
        assert_eq!(rx.recv_timeout(TIMEOUT).unwrap(), ListenEvent::Ended);
        listener.stop().unwrap();
    }
}
