//! Error handling for the SWO trace core
//!
//! This module defines the error type shared by the transport, decoder and
//! store layers, plus the diagnostic codes that transport acquisition
//! reports back to the UI.

use thiserror::Error;

/// Stable status codes for transport acquisition, surfaced to the UI.
///
/// Everything except [`TraceStatus::Ok`] means no reader thread was started
/// and the session is not capturing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TraceStatus {
    /// The trace channel is open and capturing
    Ok,
    /// The probe (or its trace interface) was not found
    NoInterface,
    /// The device path to the trace interface could not be resolved
    NoDevPath,
    /// The device was found but could not be opened
    NoAccess,
    /// The bulk IN endpoint (or TCP connection) is not available
    NoPipe,
    /// The reader thread could not be spawned
    NoThread,
    /// Transport library initialization failed
    InitFailed,
}

impl std::fmt::Display for TraceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            TraceStatus::Ok => "ok",
            TraceStatus::NoInterface => "trace interface not found",
            TraceStatus::NoDevPath => "no device path for the trace interface",
            TraceStatus::NoAccess => "cannot access the trace interface",
            TraceStatus::NoPipe => "trace endpoint not available",
            TraceStatus::NoThread => "failed to start the trace reader thread",
            TraceStatus::InitFailed => "transport initialization failed",
        };
        write!(f, "{}", text)
    }
}

/// Identifies which acquisition step failed, for diagnostics.
///
/// The numeric value is stable and intended for display next to the
/// platform error code (see [`InitDiagnostics`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum InitLocation {
    /// Creating the libusb context
    UsbContext = 1,
    /// Enumerating USB devices
    DeviceList = 2,
    /// Scanning the device list for the probe
    DeviceLookup = 3,
    /// Opening the USB device
    DeviceOpen = 4,
    /// Claiming the trace interface
    ClaimInterface = 5,
    /// Locating the bulk IN endpoint
    EndpointLookup = 6,
    /// Creating the TCP socket
    SocketCreate = 7,
    /// Connecting the TCP socket
    SocketConnect = 8,
    /// Configuring socket timeouts
    SocketConfigure = 9,
    /// Spawning the reader thread
    SpawnThread = 10,
}

impl std::fmt::Display for InitLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "step {}", *self as u8)
    }
}

/// Diagnostic record of the most recent acquisition failure.
///
/// Equivalent of the classic `trace_errno()` query: a low-level platform
/// error code plus the location tag of the failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitDiagnostics {
    /// The stable status code returned to the UI
    pub status: TraceStatus,
    /// Which acquisition step failed
    pub location: InitLocation,
    /// Raw platform error code (libusb error number or OS errno)
    pub code: i32,
}

/// Main error type for the SWO trace core
#[derive(Error, Debug)]
pub enum TraceError {
    /// Transport acquisition failed; no reader thread was started
    #[error("{status} ({location}): {message}")]
    Acquisition {
        /// Stable status code for the UI
        status: TraceStatus,
        /// Acquisition step that failed
        location: InitLocation,
        /// Raw platform error code
        code: i32,
        /// Human readable detail
        message: String,
    },

    /// USB transfer errors during capture
    #[error("USB error: {0}")]
    Usb(#[from] rusb::Error),

    /// Socket and file I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl TraceError {
    /// Create an acquisition error with a location tag
    pub fn acquisition(
        status: TraceStatus,
        location: InitLocation,
        code: i32,
        message: impl Into<String>,
    ) -> Self {
        TraceError::Acquisition {
            status,
            location,
            code,
            message: message.into(),
        }
    }

    /// The stable status code for this error
    pub fn status(&self) -> TraceStatus {
        match self {
            TraceError::Acquisition { status, .. } => *status,
            _ => TraceStatus::InitFailed,
        }
    }

    /// Acquisition diagnostics, if this error came from opening a transport
    pub fn diagnostics(&self) -> Option<InitDiagnostics> {
        match self {
            TraceError::Acquisition {
                status,
                location,
                code,
                ..
            } => Some(InitDiagnostics {
                status: *status,
                location: *location,
                code: *code,
            }),
            _ => None,
        }
    }
}

/// Map a rusb error to the underlying libusb error number.
pub(crate) fn usb_error_code(err: &rusb::Error) -> i32 {
    match err {
        rusb::Error::Io => -1,
        rusb::Error::InvalidParam => -2,
        rusb::Error::Access => -3,
        rusb::Error::NoDevice => -4,
        rusb::Error::NotFound => -5,
        rusb::Error::Busy => -6,
        rusb::Error::Timeout => -7,
        rusb::Error::Overflow => -8,
        rusb::Error::Pipe => -9,
        rusb::Error::Interrupted => -10,
        rusb::Error::NoMem => -11,
        rusb::Error::NotSupported => -12,
        _ => -99,
    }
}

/// Result type alias for SWO trace operations
pub type Result<T> = std::result::Result<T, TraceError>;
