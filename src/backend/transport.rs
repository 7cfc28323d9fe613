//! Trace transports
//!
//! The probe delivers the raw SWO byte stream either over a dedicated USB
//! bulk IN endpoint (the Black Magic Probe's trace interface) or over a TCP
//! connection to a trace server. Both variants present the same bounded
//! read interface so the reader thread can poll its stop flag between
//! reads; no blocking call outlasts [`READ_TIMEOUT`].
//!
//! Acquisition failures carry a [`TraceStatus`] for the UI plus an
//! [`InitLocation`] tag and the platform error code for diagnostics.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4, TcpStream};
use std::time::Duration;

use rusb::{Context, DeviceHandle, UsbContext};

use crate::error::{usb_error_code, InitLocation, Result, TraceError, TraceStatus};
use crate::ring::FRAME_CAPACITY;

/// Black Magic Probe USB vendor id
pub const BMP_VID: u16 = 0x1d50;

/// Black Magic Probe USB product id
pub const BMP_PID: u16 = 0x6018;

/// Interface number of the probe's trace capture interface
pub const BMP_TRACE_INTERFACE: u8 = 5;

/// Default bulk IN endpoint of the trace interface
pub const BMP_TRACE_ENDPOINT: u8 = 0x85;

/// Upper bound on a single blocking read, so cancellation stays responsive
pub const READ_TIMEOUT: Duration = Duration::from_millis(100);

/// Timeout for the initial TCP connect
const CONNECT_TIMEOUT: Duration = Duration::from_secs(4);

/// Outcome of one bounded transport read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// `n` bytes were read into the buffer
    Data(usize),
    /// The bounded read expired without data; poll the stop flag and retry
    TimedOut,
    /// The remote end closed the stream
    Closed,
}

/// A bounded-read byte source for the reader thread.
///
/// Implementations map transient conditions (timeouts, interrupted
/// syscalls) to [`ReadOutcome::TimedOut`]; an `Err` is fatal and ends the
/// capture.
pub trait TraceTransport: Send {
    /// Read up to [`FRAME_CAPACITY`] bytes, waiting at most [`READ_TIMEOUT`]
    fn read_frame(&mut self, buffer: &mut [u8; FRAME_CAPACITY]) -> Result<ReadOutcome>;

    /// Human-readable description for log and status messages
    fn describe(&self) -> String;
}

/// USB bulk transport to the probe's trace endpoint
pub struct UsbTransport {
    handle: DeviceHandle<Context>,
    endpoint: u8,
}

impl UsbTransport {
    /// Find the probe, claim its trace interface and verify the endpoint.
    ///
    /// The first device matching the Black Magic Probe VID:PID is used.
    pub fn open(endpoint: u8) -> Result<Self> {
        let context = Context::new().map_err(|err| {
            TraceError::acquisition(
                TraceStatus::InitFailed,
                InitLocation::UsbContext,
                usb_error_code(&err),
                format!("libusb initialization failed: {}", err),
            )
        })?;
        let devices = context.devices().map_err(|err| {
            TraceError::acquisition(
                TraceStatus::InitFailed,
                InitLocation::DeviceList,
                usb_error_code(&err),
                format!("USB device enumeration failed: {}", err),
            )
        })?;

        let device = devices
            .iter()
            .find(|device| {
                device
                    .device_descriptor()
                    .map(|desc| desc.vendor_id() == BMP_VID && desc.product_id() == BMP_PID)
                    .unwrap_or(false)
            })
            .ok_or_else(|| {
                TraceError::acquisition(
                    TraceStatus::NoInterface,
                    InitLocation::DeviceLookup,
                    0,
                    format!("no probe with id {:04x}:{:04x} found", BMP_VID, BMP_PID),
                )
            })?;

        let mut handle = device.open().map_err(|err| {
            TraceError::acquisition(
                TraceStatus::NoAccess,
                InitLocation::DeviceOpen,
                usb_error_code(&err),
                format!("cannot open probe: {}", err),
            )
        })?;

        // the trace interface has no kernel driver normally, but a stale
        // CDC binding would make the claim fail
        let _ = handle.set_auto_detach_kernel_driver(true);
        handle
            .claim_interface(BMP_TRACE_INTERFACE)
            .map_err(|err| {
                TraceError::acquisition(
                    TraceStatus::NoInterface,
                    InitLocation::ClaimInterface,
                    usb_error_code(&err),
                    format!("cannot claim trace interface: {}", err),
                )
            })?;

        if !endpoint_exists(&handle, endpoint) {
            return Err(TraceError::acquisition(
                TraceStatus::NoPipe,
                InitLocation::EndpointLookup,
                0,
                format!("endpoint 0x{:02x} not found on the trace interface", endpoint),
            ));
        }

        tracing::info!("trace endpoint 0x{:02x} open", endpoint);
        Ok(Self { handle, endpoint })
    }
}

fn endpoint_exists(handle: &DeviceHandle<Context>, endpoint: u8) -> bool {
    let Ok(config) = handle.device().active_config_descriptor() else {
        return false;
    };
    config
        .interfaces()
        .flat_map(|iface| iface.descriptors())
        .flat_map(|desc| desc.endpoint_descriptors())
        .any(|ep| ep.address() == endpoint)
}

impl TraceTransport for UsbTransport {
    fn read_frame(&mut self, buffer: &mut [u8; FRAME_CAPACITY]) -> Result<ReadOutcome> {
        match self.handle.read_bulk(self.endpoint, buffer, READ_TIMEOUT) {
            Ok(count) => Ok(ReadOutcome::Data(count)),
            Err(rusb::Error::Timeout) => Ok(ReadOutcome::TimedOut),
            // transient conditions; the next transfer may succeed
            Err(rusb::Error::Interrupted) | Err(rusb::Error::Overflow) => Ok(ReadOutcome::TimedOut),
            Err(rusb::Error::NoDevice) => Ok(ReadOutcome::Closed),
            Err(err) => Err(TraceError::Usb(err)),
        }
    }

    fn describe(&self) -> String {
        format!("USB bulk endpoint 0x{:02x}", self.endpoint)
    }
}

/// TCP transport to a trace server (e.g. a probe forwarding SWO over the
/// network)
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    peer: SocketAddrV4,
}

impl TcpTransport {
    /// Connect to `address:port` and configure bounded reads
    pub fn connect(address: Ipv4Addr, port: u16) -> Result<Self> {
        let peer = SocketAddrV4::new(address, port);
        let stream =
            TcpStream::connect_timeout(&SocketAddr::V4(peer), CONNECT_TIMEOUT).map_err(|err| {
                TraceError::acquisition(
                    TraceStatus::NoPipe,
                    InitLocation::SocketConnect,
                    err.raw_os_error().unwrap_or(0),
                    format!("cannot connect to {}: {}", peer, err),
                )
            })?;
        stream
            .set_read_timeout(Some(READ_TIMEOUT))
            .map_err(|err| {
                TraceError::acquisition(
                    TraceStatus::InitFailed,
                    InitLocation::SocketConfigure,
                    err.raw_os_error().unwrap_or(0),
                    format!("cannot configure socket: {}", err),
                )
            })?;

        tracing::info!(%peer, "trace connection established");
        Ok(Self { stream, peer })
    }
}

impl TraceTransport for TcpTransport {
    fn read_frame(&mut self, buffer: &mut [u8; FRAME_CAPACITY]) -> Result<ReadOutcome> {
        use std::io::Read;
        match self.stream.read(buffer) {
            Ok(0) => Ok(ReadOutcome::Closed),
            Ok(count) => Ok(ReadOutcome::Data(count)),
            Err(err)
                if matches!(
                    err.kind(),
                    std::io::ErrorKind::WouldBlock
                        | std::io::ErrorKind::TimedOut
                        | std::io::ErrorKind::Interrupted
                ) =>
            {
                Ok(ReadOutcome::TimedOut)
            }
            Err(err) => Err(TraceError::Io(err)),
        }
    }

    fn describe(&self) -> String {
        format!("TCP {}", self.peer)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::net::TcpListener;

    #[test]
    fn test_tcp_connect_refused() {
        // port 1 is essentially never listening
        let err = TcpTransport::connect(Ipv4Addr::LOCALHOST, 1).unwrap_err();
        assert_eq!(err.status(), TraceStatus::NoPipe);
        let diag = err.diagnostics().unwrap();
        assert_eq!(diag.location, InitLocation::SocketConnect);
    }

    #[test]
    fn test_tcp_read_data_timeout_and_close() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();

        let server = std::thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            socket.write_all(b"abc").unwrap();
            std::thread::sleep(Duration::from_millis(250));
            // socket drops -> EOF
        });

        let mut transport = TcpTransport::connect(Ipv4Addr::LOCALHOST, port).unwrap();
        let mut buffer = [0u8; FRAME_CAPACITY];

        let outcome = transport.read_frame(&mut buffer).unwrap();
        assert_eq!(outcome, ReadOutcome::Data(3));
        assert_eq!(&buffer[..3], b"abc");

        // nothing sent yet: the bounded read expires
        assert_eq!(
            transport.read_frame(&mut buffer).unwrap(),
            ReadOutcome::TimedOut
        );

        server.join().unwrap();
        // remote closed
        loop {
            match transport.read_frame(&mut buffer).unwrap() {
                ReadOutcome::Closed => break,
                ReadOutcome::TimedOut => continue,
                other => panic!("unexpected outcome {:?}", other),
            }
        }
    }
}
