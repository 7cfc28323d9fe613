//! Trace capture backend
//!
//! This module owns the capture side of the viewer: transport selection,
//! the reader thread and the [`TraceSession`] context that the UI drives.
//!
//! # Architecture
//!
//! Exactly two threads touch trace data:
//!
//! - the **reader thread** blocks on the transport (USB bulk or TCP) and
//!   enqueues timestamped 64-byte frames on the packet ring;
//! - the **UI thread** owns everything else (registry, decoder, store,
//!   timeline, status log) and drains the ring from `process_text` /
//!   `process_profile` once per redraw.
//!
//! The ring is the only shared state; the reader additionally pokes the UI
//! through the [`WakeHandler`] so a blocked message pump redraws when trace
//! data arrives.
//!
//! # Example
//!
//! ```ignore
//! use swotrace_rs::backend::TraceSession;
//! use swotrace_rs::config::TransportConfig;
//! use std::sync::Arc;
//!
//! let mut session = TraceSession::new();
//! session.registry_mut().set_enabled(0, true);
//! session.open(
//!     &TransportConfig::Tcp { address: [127, 0, 0, 1].into(), port: 2332 },
//!     Arc::new(|| { /* wake the event loop */ }),
//! )?;
//!
//! // each UI frame:
//! let new_lines = session.process_text(true);
//! for line in session.store().lines() {
//!     println!("{} {}", line.time_label(), line.text());
//! }
//!
//! session.close();
//! # Ok::<(), swotrace_rs::TraceError>(())
//! ```

pub mod reader;
pub mod transport;

pub use reader::ReaderEvent;
pub use transport::{
    ReadOutcome, TcpTransport, TraceTransport, UsbTransport, BMP_PID, BMP_TRACE_ENDPOINT,
    BMP_TRACE_INTERFACE, BMP_VID,
};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::thread::JoinHandle;
use std::time::Instant;

use crossbeam_channel::{bounded, Receiver};

use crate::channels::ChannelRegistry;
use crate::config::{TraceConfig, TransportConfig};
use crate::ctf::{CtfStream, NoCtf};
use crate::decoder::{ItmDecoder, PayloadWidth};
use crate::error::{InitDiagnostics, InitLocation, Result, TraceError, TraceStatus};
use crate::profile::SampleMap;
use crate::ring::{frame_ring, FrameConsumer};
use crate::status::{StatusLog, StatusOrigin};
use crate::store::TraceStore;
use crate::timeline::{Timeline, TimelineConfig};

/// Rouses the UI event loop from the reader thread.
///
/// Implemented for any `Fn()` closure; a GUI typically posts an empty
/// message to its own event queue here.
pub trait WakeHandler: Send + Sync {
    /// Called after a trace frame was enqueued (and once when the reader
    /// exits)
    fn wake(&self);
}

impl<F: Fn() + Send + Sync> WakeHandler for F {
    fn wake(&self) {
        self()
    }
}

/// Seconds since the first call in this process, with sub-millisecond
/// precision.
///
/// Monotonic within one reader lifetime; not comparable across processes.
pub fn monotonic_timestamp() -> f64 {
    static ANCHOR: OnceLock<Instant> = OnceLock::new();
    ANCHOR.get_or_init(Instant::now).elapsed().as_secs_f64()
}

/// Totals returned by one profile-mode decode pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileUpdate {
    /// PC samples added to the map
    pub samples: u32,
    /// ITM overflow markers seen
    pub overflows: u32,
}

/// Live capture state, present only between `open` and `close`
struct Capture {
    frames: FrameConsumer,
    events: Receiver<ReaderEvent>,
    stop: Arc<AtomicBool>,
    thread: Option<JoinHandle<()>>,
}

/// The trace session: registry, decoder, store, timeline and status log in
/// one owned context, plus the capture transport while one is open.
///
/// All methods are called from the UI thread; see the module docs for the
/// thread model.
pub struct TraceSession {
    registry: ChannelRegistry,
    store: TraceStore,
    status: StatusLog,
    timeline: Timeline,
    decoder: ItmDecoder,
    ctf: Box<dyn CtfStream>,
    capture: Option<Capture>,
    last_init_error: Option<InitDiagnostics>,
}

impl Default for TraceSession {
    fn default() -> Self {
        Self::new()
    }
}

impl TraceSession {
    /// Create a closed session with default settings
    pub fn new() -> Self {
        Self {
            registry: ChannelRegistry::new(),
            store: TraceStore::new(),
            status: StatusLog::new(),
            timeline: Timeline::new(),
            decoder: ItmDecoder::new(),
            ctf: Box::new(NoCtf),
            capture: None,
            last_init_error: None,
        }
    }

    /// Create a session preconfigured from a saved configuration
    pub fn with_config(config: &TraceConfig) -> Self {
        let mut session = Self::new();
        session.apply_config(config);
        session
    }

    /// Apply channel, payload-width and timeline settings from a saved
    /// configuration. The transport selection is used at `open` time.
    pub fn apply_config(&mut self, config: &TraceConfig) {
        self.registry = config.channels.clone();
        self.decoder.set_payload_width(config.payload_width);
        self.timeline.set_config(config.timeline);
    }

    /// Open the trace channel and start the reader thread.
    ///
    /// Opening an already-open session is a no-op. On failure no thread is
    /// started and the diagnostics stay queryable through
    /// [`last_init_error`](Self::last_init_error).
    pub fn open(&mut self, config: &TransportConfig, wake: Arc<dyn WakeHandler>) -> Result<()> {
        if self.capture.is_some() {
            return Ok(());
        }
        self.last_init_error = None;

        let transport = match self.build_transport(config) {
            Ok(transport) => transport,
            Err(err) => {
                self.last_init_error = err.diagnostics();
                return Err(err);
            }
        };

        let (producer, frames) = frame_ring();
        let (event_tx, event_rx) = bounded(16);
        let stop = Arc::new(AtomicBool::new(false));
        let thread = match reader::spawn_reader(transport, producer, wake, event_tx, stop.clone())
        {
            Ok(thread) => thread,
            Err(err) => {
                let failure = TraceError::acquisition(
                    TraceStatus::NoThread,
                    InitLocation::SpawnThread,
                    err.raw_os_error().unwrap_or(0),
                    format!("cannot spawn reader thread: {}", err),
                );
                self.last_init_error = failure.diagnostics();
                return Err(failure);
            }
        };

        self.capture = Some(Capture {
            frames,
            events: event_rx,
            stop,
            thread: Some(thread),
        });
        tracing::info!("trace capture started");
        Ok(())
    }

    fn build_transport(&self, config: &TransportConfig) -> Result<Box<dyn TraceTransport>> {
        match config {
            TransportConfig::Usb { endpoint } => Ok(Box::new(UsbTransport::open(*endpoint)?)),
            TransportConfig::Tcp { address, port } => {
                Ok(Box::new(TcpTransport::connect(*address, *port)?))
            }
        }
    }

    /// Stop the reader thread and release the transport.
    ///
    /// Completes within the bounded transport read (well under a second).
    /// Decoded trace history is preserved; only the in-flight carry state
    /// is dropped.
    pub fn close(&mut self) {
        if let Some(mut capture) = self.capture.take() {
            capture.stop.store(true, Ordering::Release);
            if let Some(thread) = capture.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!("trace reader thread panicked");
                }
            }
            self.decoder.reset();
            tracing::info!("trace capture stopped");
        }
    }

    /// Whether a capture transport is currently open
    pub fn is_open(&self) -> bool {
        self.capture.is_some()
    }

    /// Diagnostics of the most recent failed `open`, if any
    pub fn last_init_error(&self) -> Option<InitDiagnostics> {
        self.last_init_error
    }

    /// Decode all queued frames in text mode.
    ///
    /// With `enabled == false` the frames are consumed and discarded and
    /// the overflow counter is reset, so a paused viewer does not show
    /// stale errors. Returns the number of frames that flushed text, as a
    /// "new data" hint for scroll-follow.
    pub fn process_text(&mut self, enabled: bool) -> u32 {
        self.drain_reader_events();
        let Self {
            capture,
            registry,
            store,
            status,
            decoder,
            ctf,
            ..
        } = self;
        let Some(capture) = capture.as_mut() else {
            return 0;
        };

        let mut count = 0;
        while let Some(frame) = capture.frames.pop() {
            if !enabled {
                continue;
            }
            let timestamp = frame.timestamp;
            let result = decoder.decode_text_frame(frame.data(), &mut |channel, payload| {
                dispatch_payload(store, status, registry, ctf.as_mut(), channel, payload, timestamp);
            });
            match result {
                Ok(true) => count += 1,
                Ok(false) => {}
                Err(_) => ctf.reset(),
            }
        }
        if !enabled {
            capture.frames.overflow_errors(true);
        }
        count
    }

    /// Decode all queued frames in profile mode, adding PC samples to
    /// `samples`.
    ///
    /// The disabled path behaves as in [`process_text`](Self::process_text).
    pub fn process_profile(&mut self, enabled: bool, samples: &mut SampleMap) -> ProfileUpdate {
        self.drain_reader_events();
        let Self {
            capture, decoder, ..
        } = self;
        let Some(capture) = capture.as_mut() else {
            return ProfileUpdate::default();
        };

        let mut update = ProfileUpdate::default();
        while let Some(frame) = capture.frames.pop() {
            if !enabled {
                continue;
            }
            if let Ok(stats) = decoder.decode_profile_frame(frame.data(), samples) {
                update.samples += stats.samples;
                update.overflows += stats.overflows;
            }
        }
        if !enabled {
            capture.frames.overflow_errors(true);
        }
        update
    }

    fn drain_reader_events(&mut self) {
        let Self {
            capture, status, ..
        } = self;
        let Some(capture) = capture.as_ref() else {
            return;
        };
        while let Ok(event) = capture.events.try_recv() {
            match event {
                ReaderEvent::Disconnected { transport } => {
                    status.push(
                        StatusOrigin::Probe,
                        0,
                        format!("trace stream closed ({})", transport),
                    );
                }
                ReaderEvent::TransportFailed { detail } => {
                    status.push(StatusOrigin::Probe, -1, detail);
                }
            }
        }
    }

    /// Number of invalid ITM packets seen; optionally resets the counter
    pub fn packet_errors(&mut self, reset: bool) -> u32 {
        self.decoder.packet_errors(reset)
    }

    /// Number of frames dropped on ring overflow; optionally resets
    pub fn overflow_errors(&mut self, reset: bool) -> u32 {
        self.capture
            .as_ref()
            .map(|capture| capture.frames.overflow_errors(reset))
            .unwrap_or(0)
    }

    /// Set the expected stimulus payload width
    pub fn set_payload_width(&mut self, width: PayloadWidth) {
        self.decoder.set_payload_width(width);
    }

    /// The payload width currently in effect, in bytes
    pub fn payload_width(&self) -> usize {
        self.decoder.payload_width()
    }

    /// Register the external CTF stream decoder
    pub fn set_ctf_stream(&mut self, ctf: Box<dyn CtfStream>) {
        self.ctf = ctf;
    }

    /// The channel registry
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Mutable access to the channel registry (UI settings)
    pub fn registry_mut(&mut self) -> &mut ChannelRegistry {
        &mut self.registry
    }

    /// The decoded trace lines
    pub fn store(&self) -> &TraceStore {
        &self.store
    }

    /// The status message log
    pub fn status(&self) -> &StatusLog {
        &self.status
    }

    /// Clear the status message log
    pub fn clear_status(&mut self) {
        self.status.clear();
    }

    /// Discard all decoded trace lines and the timeline built from them
    pub fn clear_trace(&mut self) {
        self.store.clear();
        self.timeline.rebuild(&self.store, &self.registry, None);
    }

    /// The timeline index
    pub fn timeline(&self) -> &Timeline {
        &self.timeline
    }

    /// Replace the timeline tick configuration and rebuild the index
    pub fn set_timeline_config(&mut self, config: TimelineConfig) {
        self.timeline.set_config(config);
        self.timeline.rebuild(&self.store, &self.registry, None);
    }

    /// Rebuild the timeline index from the current trace lines
    pub fn rebuild_timeline(&mut self, limit_marks: Option<usize>) {
        self.timeline.rebuild(&self.store, &self.registry, limit_marks);
    }

    /// Zoom the timeline in and rebuild
    pub fn timeline_zoom_in(&mut self, limit_marks: Option<usize>) {
        self.timeline.zoom_in();
        self.timeline.rebuild(&self.store, &self.registry, limit_marks);
    }

    /// Zoom the timeline out and rebuild
    pub fn timeline_zoom_out(&mut self, limit_marks: Option<usize>) {
        self.timeline.zoom_out();
        self.timeline.rebuild(&self.store, &self.registry, limit_marks);
    }

    /// Export the decoded trace lines as CSV
    pub fn save_csv(&self, path: &std::path::Path) -> Result<()> {
        self.store.save(path, &self.registry)
    }
}

impl Drop for TraceSession {
    fn drop(&mut self) {
        self.close();
    }
}

/// Route one completed stimulus payload to the CTF decoder or the plain
/// text store, honoring the channel enable switch.
fn dispatch_payload(
    store: &mut TraceStore,
    status: &mut StatusLog,
    registry: &ChannelRegistry,
    ctf: &mut dyn CtfStream,
    channel: u8,
    payload: &[u8],
    timestamp: f64,
) {
    if !registry.is_enabled(channel as usize) {
        return;
    }
    if ctf.is_active(channel) {
        let produced = ctf.decode(payload, channel);
        if produced < 0 {
            tracing::warn!(channel, code = produced, "CTF decode error");
            status.push(
                StatusOrigin::Ctf,
                produced,
                format!("CTF decode error on channel {}", channel),
            );
            return;
        }
        loop {
            let Some(message) = ctf.peek() else {
                break;
            };
            let remote = message.timestamp > 0.001;
            let line_timestamp = if remote { message.timestamp } else { timestamp };
            let stream_id = message.stream_id as u8;
            let text = message.text.clone();
            ctf.pop();
            store.add_message(stream_id, &text, line_timestamp, remote);
        }
    } else {
        store.append_text(channel, payload, timestamp);
    }
}
