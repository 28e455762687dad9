// Pipeline facade and worker threads
//
// The facade owns exactly one chained process pair at a time and bridges the
// caller (typically a hard real-time audio callback) to the blocking pipe
// I/O of the chain. `write_samples` and `read_samples` only ever take a lock
// long enough to swap or pop a buffer; the three worker threads do all the
// blocking work:
// - input writer: input queue -> f32-to-s16le -> encoder stdin
// - output reader: decoder stdout -> s16le-to-f32 -> output queue
// - error reader: merged diagnostic stream -> log sink
//
// Lock ordering: the session state lock is never held while acquiring a
// queue or stdin lock from a worker thread; workers only touch the queues,
// the stdin slot and the atomics.

use std::collections::VecDeque;
use std::io::{Read, Write};
use std::process::{ChildStdin, ChildStdout};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, error, info, warn};

use super::config::PipelineConfig;
use super::process::{ChainIo, TranscodeChain};
use crate::codecs::CodecRegistry;
use crate::convert;
use crate::error::{PipelineError, Result};

/// External sink for the transcoder processes' textual diagnostics
pub type LogSink = Arc<dyn Fn(&str) + Send + Sync>;

/// Session lifecycle, owned solely by the facade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Running,
    Stopping,
}

/// How long the input writer sleeps when the input queue is empty
const IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Graceful drain window before the chain is force-killed
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(2);

/// Bounded wait for the stdin slot when closing it from `stop`
const STDIN_CLOSE_RETRIES: u32 = 50;

/// Manager for one chained encode/decode transcoder session
pub struct CodecPipeline {
    state: Mutex<SessionState>,
    running: Arc<AtomicBool>,
    channels: Arc<AtomicUsize>,
    latency_samples: AtomicUsize,

    input_queue: Arc<Mutex<Vec<f32>>>,
    output_queue: Arc<Mutex<VecDeque<f32>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,

    chain: Mutex<Option<TranscodeChain>>,
    workers: Mutex<Vec<JoinHandle<()>>>,

    last_error: Arc<Mutex<String>>,
    log_sink: Arc<Mutex<Option<LogSink>>>,
}

impl Default for CodecPipeline {
    fn default() -> Self {
        Self::new()
    }
}

impl CodecPipeline {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SessionState::Idle),
            running: Arc::new(AtomicBool::new(false)),
            channels: Arc::new(AtomicUsize::new(0)),
            latency_samples: AtomicUsize::new(0),
            input_queue: Arc::new(Mutex::new(Vec::new())),
            output_queue: Arc::new(Mutex::new(VecDeque::new())),
            stdin: Arc::new(Mutex::new(None)),
            chain: Mutex::new(None),
            workers: Mutex::new(Vec::new()),
            last_error: Arc::new(Mutex::new(String::new())),
            log_sink: Arc::new(Mutex::new(None)),
        }
    }

    /// Start one session: spawn the chained process pair and the three
    /// worker threads. Fails without side effects while a session is live.
    pub fn start(&self, config: PipelineConfig) -> Result<()> {
        config.validate()?;

        // A session demoted by a broken transport is still holding its
        // half-dead chain; reap it so an explicit restart succeeds.
        if !self.running.load(Ordering::Acquire) && *lock(&self.state) == SessionState::Running {
            self.stop();
        }

        let mut state = lock(&self.state);
        if *state != SessionState::Idle {
            self.record_error("pipeline already running");
            return Err(PipelineError::AlreadyRunning);
        }

        let (chain, io) = match TranscodeChain::spawn(&config) {
            Ok(spawned) => spawned,
            Err(err) => {
                self.record_error(&err.to_string());
                return Err(err);
            }
        };
        let ChainIo {
            input,
            output,
            diagnostics,
        } = io;

        self.channels
            .store(config.channels as usize, Ordering::Release);
        self.latency_samples
            .store(estimate_latency_samples(&config.codec_name), Ordering::Relaxed);
        *lock(&self.stdin) = Some(input);
        self.running.store(true, Ordering::Release);

        let mut workers = lock(&self.workers);
        workers.push(std::thread::spawn({
            let running = Arc::clone(&self.running);
            let queue = Arc::clone(&self.input_queue);
            let stdin = Arc::clone(&self.stdin);
            let last_error = Arc::clone(&self.last_error);
            let sink = Arc::clone(&self.log_sink);
            let chunk_size = config.chunk_size;
            move || input_writer_loop(running, queue, stdin, chunk_size, last_error, sink)
        }));
        workers.push(std::thread::spawn({
            let running = Arc::clone(&self.running);
            let queue = Arc::clone(&self.output_queue);
            let channels = Arc::clone(&self.channels);
            let last_error = Arc::clone(&self.last_error);
            let sink = Arc::clone(&self.log_sink);
            let chunk_size = config.chunk_size;
            move || {
                output_reader_loop(running, output, queue, channels, chunk_size, last_error, sink)
            }
        }));
        workers.push(std::thread::spawn({
            let running = Arc::clone(&self.running);
            let sink = Arc::clone(&self.log_sink);
            move || error_reader_loop(running, diagnostics, sink)
        }));
        drop(workers);

        *lock(&self.chain) = Some(chain);
        *state = SessionState::Running;
        info!(
            codec = %config.codec_name,
            sample_rate = config.sample_rate,
            channels = config.channels,
            bitrate = config.bitrate,
            "transcoder chain started"
        );
        Ok(())
    }

    /// Stop the session: signal the workers, let the chain drain, force-kill
    /// anything still alive after the grace window, and release every handle.
    /// No-op when no session is live.
    pub fn stop(&self) {
        {
            let mut state = lock(&self.state);
            if *state != SessionState::Running {
                return;
            }
            *state = SessionState::Stopping;
        }
        info!("stopping transcoder chain");
        self.running.store(false, Ordering::Release);

        // Close the session input to signal end-of-stream to the encoder so
        // the chain can flush naturally. Bounded: a writer blocked mid-write
        // holds this lock until the force kill below breaks its pipe.
        let mut closed = false;
        for _ in 0..STDIN_CLOSE_RETRIES {
            if let Ok(mut guard) = self.stdin.try_lock() {
                guard.take();
                closed = true;
                break;
            }
            std::thread::sleep(IDLE_SLEEP);
        }
        if !closed {
            debug!("input writer still busy; relying on forced termination to unblock it");
        }

        if let Some(chain) = lock(&self.chain).take() {
            if chain.shutdown(SHUTDOWN_TIMEOUT) {
                warn!("transcoder chain required forced termination");
            }
        }

        // The force kill above broke any pending pipe I/O, so the workers are
        // exiting now if they had not already.
        let handles: Vec<JoinHandle<()>> = lock(&self.workers).drain(..).collect();
        for handle in handles {
            if handle.join().is_err() {
                error!("worker thread panicked during shutdown");
            }
        }

        lock(&self.stdin).take();
        lock(&self.input_queue).clear();
        lock(&self.output_queue).clear();
        self.channels.store(0, Ordering::Release);

        *lock(&self.state) = SessionState::Idle;
        info!("transcoder chain stopped");
    }

    /// True while the session is live and the transport is intact.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Current lifecycle state of the facade.
    pub fn state(&self) -> SessionState {
        *lock(&self.state)
    }

    /// Queue interleaved f32 samples for the encoder. Non-blocking: only the
    /// input queue lock is taken, never any pipe I/O.
    pub fn write_samples(&self, samples: &[f32]) -> Result<()> {
        if !self.is_running() {
            return Err(PipelineError::NotRunning);
        }
        lock(&self.input_queue).extend_from_slice(samples);
        Ok(())
    }

    /// Pop up to `max_frames` complete interleaved frames into `out`,
    /// returning the number of frames actually delivered. Non-blocking; a
    /// short or zero read means "not enough decoded audio yet", not an
    /// error.
    pub fn read_samples(&self, out: &mut [f32], max_frames: usize) -> usize {
        let channels = self.channels.load(Ordering::Acquire);
        if channels == 0 || !self.is_running() {
            return 0;
        }

        let mut queue = lock(&self.output_queue);
        let frames = (queue.len() / channels)
            .min(max_frames)
            .min(out.len() / channels);
        for slot in out[..frames * channels].iter_mut() {
            if let Some(sample) = queue.pop_front() {
                *slot = sample;
            }
        }
        frames
    }

    /// Complete frames currently queued for `read_samples`.
    pub fn available_frames(&self) -> usize {
        let channels = self.channels.load(Ordering::Acquire);
        if channels == 0 {
            return 0;
        }
        lock(&self.output_queue).len() / channels
    }

    /// Best-effort hint to push pending input toward the encoder. Not a
    /// guaranteed synchronous drain.
    pub fn flush(&self) {
        if let Ok(mut guard) = self.stdin.try_lock() {
            if let Some(pipe) = guard.as_mut() {
                let _ = pipe.flush();
            }
        }
    }

    /// Estimated codec latency in samples for the active session, zero when
    /// idle or unknown.
    pub fn latency_samples(&self) -> usize {
        self.latency_samples.load(Ordering::Relaxed)
    }

    /// Last recorded error message, empty when none occurred.
    pub fn last_error(&self) -> String {
        lock(&self.last_error).clone()
    }

    /// Register the sink that receives the external processes' diagnostics.
    pub fn set_log_callback(&self, sink: LogSink) {
        *lock(&self.log_sink) = Some(sink);
    }

    fn record_error(&self, message: &str) {
        error!("{}", message);
        *lock(&self.last_error) = message.to_string();
        forward_to_sink(&self.log_sink, message);
    }
}

impl Drop for CodecPipeline {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Poison-tolerant lock: a panicking worker must not wedge shutdown.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn forward_to_sink(sink: &Mutex<Option<LogSink>>, message: &str) {
    let callback = lock(sink).clone();
    if let Some(callback) = callback {
        callback(message);
    }
}

fn record_broken_transport(
    running: &AtomicBool,
    last_error: &Mutex<String>,
    sink: &Mutex<Option<LogSink>>,
    message: &str,
) {
    // First failure wins; later workers just observe the cleared flag.
    if running.swap(false, Ordering::AcqRel) {
        let error = PipelineError::BrokenTransport(message.to_string());
        warn!("{}", error);
        *lock(last_error) = error.to_string();
        forward_to_sink(sink, &error.to_string());
    }
}

/// Drains the input queue and writes it to the encoder's stdin in
/// chunk-sized pieces, re-checking the running flag between chunks.
fn input_writer_loop(
    running: Arc<AtomicBool>,
    queue: Arc<Mutex<Vec<f32>>>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    chunk_size: usize,
    last_error: Arc<Mutex<String>>,
    sink: Arc<Mutex<Option<LogSink>>>,
) {
    let mut pending: Vec<f32> = Vec::new();
    let mut bytes: Vec<u8> = Vec::new();

    while running.load(Ordering::Acquire) {
        {
            let mut shared = lock(&queue);
            if !shared.is_empty() {
                std::mem::swap(&mut pending, &mut *shared);
            }
        }
        if pending.is_empty() {
            std::thread::sleep(IDLE_SLEEP);
            continue;
        }

        bytes.clear();
        convert::float_to_s16le_bytes(&pending, &mut bytes);
        pending.clear();

        let mut offset = 0;
        while offset < bytes.len() && running.load(Ordering::Acquire) {
            let end = (offset + chunk_size).min(bytes.len());
            let mut guard = lock(&stdin);
            let Some(pipe) = guard.as_mut() else {
                // Stop already closed the session input.
                return;
            };
            match pipe.write(&bytes[offset..end]) {
                Ok(0) => {
                    drop(guard);
                    record_broken_transport(
                        &running,
                        &last_error,
                        &sink,
                        "input pipe rejected write - transcoder may have terminated",
                    );
                    return;
                }
                Ok(written) => offset += written,
                Err(err) if err.kind() == std::io::ErrorKind::Interrupted => {}
                Err(err) => {
                    drop(guard);
                    record_broken_transport(
                        &running,
                        &last_error,
                        &sink,
                        &format!("input pipe broken: {}", err),
                    );
                    return;
                }
            }
        }
    }
}

/// Reads decoded PCM from the decoder's stdout, reassembles sample-aligned
/// frames and pushes them to the output queue. Trailing partial-frame bytes
/// stay in the accumulator; they are never decoded misaligned.
fn output_reader_loop(
    running: Arc<AtomicBool>,
    mut output: ChildStdout,
    queue: Arc<Mutex<VecDeque<f32>>>,
    channels: Arc<AtomicUsize>,
    chunk_size: usize,
    last_error: Arc<Mutex<String>>,
    sink: Arc<Mutex<Option<LogSink>>>,
) {
    let mut chunk = vec![0u8; chunk_size];
    let mut accumulator: Vec<u8> = Vec::new();
    let mut samples: Vec<f32> = Vec::new();

    while running.load(Ordering::Acquire) {
        let read = match output.read(&mut chunk) {
            Ok(0) => {
                record_broken_transport(
                    &running,
                    &last_error,
                    &sink,
                    "output pipe closed - decoded stream ended",
                );
                break;
            }
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(err) => {
                record_broken_transport(
                    &running,
                    &last_error,
                    &sink,
                    &format!("output pipe read failed: {}", err),
                );
                break;
            }
        };

        accumulator.extend_from_slice(&chunk[..read]);
        let frame_bytes = convert::BYTES_PER_SAMPLE * channels.load(Ordering::Acquire).max(1);
        let complete = accumulator.len() / frame_bytes * frame_bytes;
        if complete == 0 {
            continue;
        }

        samples.clear();
        convert::s16le_bytes_to_float(&accumulator[..complete], &mut samples);
        {
            let mut shared = lock(&queue);
            shared.extend(samples.iter().copied());
        }
        accumulator.drain(..complete);
    }
}

/// Forwards the merged diagnostic stream of both processes to the log sink.
/// The text is opaque to the pipeline; it is never parsed.
fn error_reader_loop(running: Arc<AtomicBool>, mut diagnostics: std::fs::File, sink: Arc<Mutex<Option<LogSink>>>) {
    let mut buffer = vec![0u8; 4096];

    while running.load(Ordering::Acquire) {
        let read = match diagnostics.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(err) if err.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
        };
        let text = String::from_utf8_lossy(&buffer[..read]);
        let trimmed = text.trim_end();
        if !trimmed.is_empty() {
            debug!("transcoder diagnostics: {}", trimmed);
            forward_to_sink(&sink, trimmed);
        }
    }
}

/// Rough per-codec latency estimate: one codec frame plus pipeline slack,
/// looked up from the capability catalog by encoder name.
fn estimate_latency_samples(codec_name: &str) -> usize {
    let registry = CodecRegistry::new();
    registry
        .all()
        .iter()
        .find(|caps| caps.encoder_name == codec_name)
        .map(|caps| caps.frame_size as usize + 512)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idle_pipeline_rejects_io() {
        let pipeline = CodecPipeline::new();
        assert!(!pipeline.is_running());
        assert_eq!(pipeline.state(), SessionState::Idle);
        assert!(matches!(
            pipeline.write_samples(&[0.0; 8]),
            Err(PipelineError::NotRunning)
        ));

        let mut out = [0.0f32; 8];
        assert_eq!(pipeline.read_samples(&mut out, 4), 0);
        assert_eq!(pipeline.available_frames(), 0);
    }

    #[test]
    fn test_stop_is_noop_when_idle() {
        let pipeline = CodecPipeline::new();
        pipeline.stop();
        assert_eq!(pipeline.state(), SessionState::Idle);
    }

    #[test]
    fn test_last_error_starts_empty() {
        let pipeline = CodecPipeline::new();
        assert!(pipeline.last_error().is_empty());
    }

    #[test]
    fn test_start_validates_config() {
        let pipeline = CodecPipeline::new();
        let mut config = PipelineConfig::default();
        config.channels = 0;
        assert!(matches!(
            pipeline.start(config),
            Err(PipelineError::InvalidConfig(_))
        ));
        assert_eq!(pipeline.state(), SessionState::Idle);
    }

    #[test]
    fn test_latency_estimate_for_known_codec() {
        assert_eq!(estimate_latency_samples("libmp3lame"), 1152 + 512);
        assert_eq!(estimate_latency_samples("no-such-codec"), 0);
    }
}
