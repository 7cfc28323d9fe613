//! # SWOtrace-RS: SWO/ITM trace viewer core
//!
//! The capture and decoding core of a trace viewer for ARM Cortex-M
//! targets behind a Black Magic Probe. The probe forwards the target's SWO
//! pin (ITM stimulus packets and PC samples) over a USB bulk endpoint or a
//! TCP connection; this crate reassembles the packet stream, demultiplexes
//! the 32 stimulus channels and produces display-ready trace lines, a
//! zoomable timeline index and PC-sample histograms. The GUI that renders
//! them is a separate concern and stays out of this crate.
//!
//! ## Architecture
//!
//! - **Backend**: a reader thread blocks on the transport and feeds a
//!   lock-free SPSC packet ring; [`TraceSession`] owns all decode state and
//!   is driven by the UI thread
//! - **Decoder**: stateful ITM packet reassembly with a carry cache for
//!   packets straddling frame boundaries; text mode and PC-sample profile
//!   mode share it
//! - **Store & timeline**: decoded lines with channel-aware coalescing,
//!   substring search and CSV export; a per-channel mark index for the
//!   timeline view
//! - **Communication**: crossbeam channels for reader events, a wake hook
//!   to rouse the GUI event loop
//!
//! ## Example
//!
//! ```ignore
//! use swotrace_rs::{TraceSession, TransportConfig};
//! use std::sync::Arc;
//!
//! fn main() -> swotrace_rs::Result<()> {
//!     let mut session = TraceSession::new();
//!     session.registry_mut().configure(0, true, Some("console"), [0, 160, 0, 255]);
//!     session.open(
//!         &TransportConfig::Tcp { address: [127, 0, 0, 1].into(), port: 2332 },
//!         Arc::new(|| { /* post a redraw event */ }),
//!     )?;
//!
//!     loop {
//!         if session.process_text(true) > 0 {
//!             let last = session.store().line(session.store().len() - 1).unwrap();
//!             println!("{} {}", last.time_label(), last.text());
//!         }
//!     }
//! }
//! ```

pub mod backend;
pub mod channels;
pub mod config;
pub mod ctf;
pub mod decoder;
pub mod error;
pub mod itm;
pub mod profile;
pub mod ring;
pub mod status;
pub mod store;
pub mod timeline;

// Re-export commonly used types
pub use backend::{monotonic_timestamp, ProfileUpdate, TraceSession, WakeHandler};
pub use channels::{Channel, ChannelRegistry, CHANNEL_COUNT};
pub use config::{TraceConfig, TransportConfig};
pub use ctf::{CtfMessage, CtfStream};
pub use decoder::{ItmDecoder, PayloadWidth};
pub use error::{InitDiagnostics, InitLocation, Result, TraceError, TraceStatus};
pub use profile::SampleMap;
pub use status::{StatusEntry, StatusLog, StatusOrigin};
pub use store::{TraceLine, TraceStore};
pub use timeline::{Timeline, TimelineConfig, TimelineMark};
