//! Trace reader thread
//!
//! A single dedicated thread blocks on the transport, stamps each frame
//! with the monotonic timestamp and enqueues it on the packet ring, waking
//! the UI after every accepted frame. Cancellation is cooperative: the
//! session sets the stop flag and the bounded transport read guarantees
//! the thread notices within [`super::transport::READ_TIMEOUT`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crossbeam_channel::Sender;

use crate::backend::transport::{ReadOutcome, TraceTransport};
use crate::backend::{monotonic_timestamp, WakeHandler};
use crate::ring::{FrameProducer, FRAME_CAPACITY};

/// Pause after a zero-length read before retrying
const SHORT_READ_DELAY: Duration = Duration::from_millis(50);

/// Notification from the reader thread to the UI side
#[derive(Debug, Clone)]
pub enum ReaderEvent {
    /// The remote end closed the trace stream; capture has ended
    Disconnected {
        /// Transport description for the status message
        transport: String,
    },
    /// The transport failed; capture has ended
    TransportFailed {
        /// Failure detail for the status message
        detail: String,
    },
}

/// Spawn the reader thread over `transport`.
///
/// The thread runs until `stop` is set, the stream closes or the transport
/// fails; the two latter cases are reported through `events`.
pub(crate) fn spawn_reader(
    mut transport: Box<dyn TraceTransport>,
    mut producer: FrameProducer,
    wake: Arc<dyn WakeHandler>,
    events: Sender<ReaderEvent>,
    stop: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("swo-reader".to_string())
        .spawn(move || {
            tracing::debug!(transport = %transport.describe(), "trace reader started");
            let mut buffer = [0u8; FRAME_CAPACITY];
            while !stop.load(Ordering::Acquire) {
                match transport.read_frame(&mut buffer) {
                    Ok(ReadOutcome::Data(0)) => std::thread::sleep(SHORT_READ_DELAY),
                    Ok(ReadOutcome::Data(count)) => {
                        // a full ring drops the frame; overflow is counted
                        // by the ring itself
                        if producer.push(&buffer[..count], monotonic_timestamp()) {
                            wake.wake();
                        }
                    }
                    Ok(ReadOutcome::TimedOut) => {}
                    Ok(ReadOutcome::Closed) => {
                        tracing::info!("trace stream closed by remote end");
                        let _ = events.try_send(ReaderEvent::Disconnected {
                            transport: transport.describe(),
                        });
                        wake.wake();
                        break;
                    }
                    Err(err) => {
                        tracing::warn!(error = %err, "trace transport failed");
                        let _ = events.try_send(ReaderEvent::TransportFailed {
                            detail: err.to_string(),
                        });
                        wake.wake();
                        break;
                    }
                }
            }
            tracing::debug!("trace reader exiting");
        })
}
