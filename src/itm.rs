//! ITM wire format
//!
//! The decoder only deals with three packet kinds on the SWO stream:
//!
//! - stimulus packets: one header byte (bits \[2:0\] select a 1, 2 or
//!   4-byte payload, bits \[7:3\] the stimulus channel) followed by the
//!   payload, little endian;
//! - PC samples: header `0x17` followed by a 4-byte little-endian program
//!   counter;
//! - the ITM overflow marker `0x70`.
//!
//! A packet can straddle two transport frames; at most the header plus a
//! payload prefix (4 bytes) needs to be carried over, hence the 5-byte
//! carry cache.

/// Header byte of a PC-sample packet (`0x17`, followed by 4 PC bytes)
pub const PC_SAMPLE_HEADER: u8 = 0x17;

/// The single-byte ITM overflow marker
pub const OVERFLOW_HEADER: u8 = 0x70;

/// Total size of a PC-sample packet including the header
pub const PC_SAMPLE_SIZE: usize = 5;

/// Whether a byte is a valid stimulus packet header
#[inline]
pub fn is_stimulus_header(byte: u8) -> bool {
    matches!(byte & 0x07, 1..=3)
}

/// Stimulus channel number encoded in a header byte (0..31)
#[inline]
pub fn stimulus_channel(byte: u8) -> u8 {
    (byte >> 3) & 0x1f
}

/// Payload length selected by a stimulus header: 1, 2 or 4 bytes
#[inline]
pub fn payload_len(byte: u8) -> usize {
    match byte & 0x07 {
        3 => 4,
        size => size as usize,
    }
}

/// Carry cache for a packet that straddles a frame boundary.
///
/// The cache always starts with the packet header; the length encodes how
/// much of the packet has been seen so far.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Carry {
    /// No packet pending
    #[default]
    Empty,
    /// A truncated packet: header plus a prefix of its payload
    Partial {
        /// Header byte and up to 4 payload bytes
        buf: [u8; 5],
        /// Number of valid bytes in `buf` (1..=4)
        len: u8,
    },
}

impl Carry {
    /// Stash the truncated packet `bytes` (header first, at most 4 bytes)
    pub fn stash(&mut self, bytes: &[u8]) {
        debug_assert!(!bytes.is_empty() && bytes.len() <= 4);
        let mut buf = [0u8; 5];
        buf[..bytes.len()].copy_from_slice(bytes);
        *self = Carry::Partial {
            buf,
            len: bytes.len() as u8,
        };
    }

    /// Append more bytes to an existing partial packet
    pub fn extend(&mut self, bytes: &[u8]) {
        if let Carry::Partial { buf, len } = self {
            let fill = *len as usize;
            debug_assert!(fill + bytes.len() <= buf.len());
            buf[fill..fill + bytes.len()].copy_from_slice(bytes);
            *len += bytes.len() as u8;
        } else {
            self.stash(bytes);
        }
    }

    /// Take the pending bytes, leaving the cache empty
    pub fn take(&mut self) -> Option<([u8; 5], usize)> {
        match std::mem::take(self) {
            Carry::Empty => None,
            Carry::Partial { buf, len } => Some((buf, len as usize)),
        }
    }

    /// Whether a packet is pending
    pub fn is_empty(&self) -> bool {
        matches!(self, Carry::Empty)
    }
}
