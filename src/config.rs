//! Persisted viewer configuration
//!
//! Transport selection, payload width, channel setup and timeline ticks
//! survive restarts through a small JSON file. The configuration is plain
//! data; applying it to a session happens through
//! [`TraceSession::apply_config`](crate::backend::TraceSession::apply_config).

use std::net::Ipv4Addr;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::backend::transport::BMP_TRACE_ENDPOINT;
use crate::channels::ChannelRegistry;
use crate::decoder::PayloadWidth;
use crate::error::Result;
use crate::timeline::TimelineConfig;

/// How to reach the probe's trace stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransportConfig {
    /// USB bulk IN endpoint on the probe's trace interface
    Usb {
        /// Endpoint address (IN bit set), e.g. `0x85`
        endpoint: u8,
    },
    /// TCP connection to a trace server
    Tcp {
        /// IPv4 address of the server
        address: Ipv4Addr,
        /// Server port
        port: u16,
    },
}

impl Default for TransportConfig {
    fn default() -> Self {
        TransportConfig::Usb {
            endpoint: BMP_TRACE_ENDPOINT,
        }
    }
}

impl std::fmt::Display for TransportConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportConfig::Usb { endpoint } => write!(f, "USB endpoint 0x{:02x}", endpoint),
            TransportConfig::Tcp { address, port } => write!(f, "TCP {}:{}", address, port),
        }
    }
}

/// The complete persisted configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TraceConfig {
    /// Transport used at `open` time
    pub transport: TransportConfig,
    /// Expected stimulus payload width
    pub payload_width: PayloadWidth,
    /// Channel enables, names and colors
    pub channels: ChannelRegistry,
    /// Timeline tick configuration
    pub timeline: TimelineConfig,
}

impl TraceConfig {
    /// Load a configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config = serde_json::from_str(&text).map_err(|err| {
            std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string())
        })?;
        Ok(config)
    }

    /// Save the configuration to a JSON file
    pub fn save(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string_pretty(self)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// Load from `path`, falling back to defaults when the file is missing
    /// or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                tracing::debug!(error = %err, "using default configuration");
                Self::default()
            }
        }
    }
}
