//! Stateful ITM packet decoder
//!
//! Transport frames slice the ITM stream at arbitrary points, so the
//! decoder keeps a carry cache for the packet straddling the current frame
//! boundary. Two decode modes share that state: text mode reassembles
//! stimulus payloads per channel, profile mode extracts PC samples into a
//! histogram.
//!
//! # Error containment
//!
//! An invalid header or an over-wide payload counts one packet error and
//! discards the remainder of the current frame only (including the carry
//! cache), so a corrupted stream loses at most one 64-byte window before
//! decoding resumes cleanly.
//!
//! # Payload width
//!
//! Targets configure the ITM port width as 1, 2 or 4 bytes. The expected
//! width can be fixed, or start at 1 byte and grow automatically when a
//! wider packet shows up ([`PayloadWidth::Auto`]).

use serde::{Deserialize, Serialize};

use crate::itm::{
    is_stimulus_header, payload_len, stimulus_channel, Carry, OVERFLOW_HEADER, PC_SAMPLE_HEADER,
    PC_SAMPLE_SIZE,
};
use crate::profile::SampleMap;
use crate::ring::FRAME_CAPACITY;

/// Expected stimulus payload width policy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PayloadWidth {
    /// Start at 1 byte, grow when wider packets arrive
    #[default]
    Auto,
    /// Fixed 8-bit writes
    Fixed8,
    /// Fixed 16-bit writes
    Fixed16,
    /// Fixed 32-bit writes
    Fixed32,
}

impl PayloadWidth {
    fn initial_width(self) -> usize {
        match self {
            PayloadWidth::Auto | PayloadWidth::Fixed8 => 1,
            PayloadWidth::Fixed16 => 2,
            PayloadWidth::Fixed32 => 4,
        }
    }

    fn grows(self) -> bool {
        matches!(self, PayloadWidth::Auto)
    }
}

/// Signals that an invalid packet discarded the rest of the frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketError;

/// Per-frame result of profile-mode decoding
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProfileFrameStats {
    /// PC samples recorded from this frame
    pub samples: u32,
    /// ITM overflow markers seen in this frame
    pub overflows: u32,
}

/// The stateful ITM decoder
#[derive(Debug)]
pub struct ItmDecoder {
    carry: Carry,
    data_width: usize,
    auto_grow: bool,
    packet_errors: u32,
}

impl Default for ItmDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl ItmDecoder {
    /// Create a decoder with automatic payload width detection
    pub fn new() -> Self {
        Self {
            carry: Carry::Empty,
            data_width: 1,
            auto_grow: true,
            packet_errors: 0,
        }
    }

    /// Set the payload width policy; also clears the packet error counter
    pub fn set_payload_width(&mut self, width: PayloadWidth) {
        self.data_width = width.initial_width();
        self.auto_grow = width.grows();
        self.packet_errors = 0;
    }

    /// The payload width currently in effect, in bytes
    pub fn payload_width(&self) -> usize {
        self.data_width
    }

    /// Number of invalid packets seen; optionally resets the counter
    pub fn packet_errors(&mut self, reset: bool) -> u32 {
        let count = self.packet_errors;
        if reset {
            self.packet_errors = 0;
        }
        count
    }

    /// Drop any packet held across a frame boundary (transport restart)
    pub fn reset(&mut self) {
        self.carry = Carry::Empty;
    }

    fn packet_error(&mut self) -> PacketError {
        self.packet_errors += 1;
        self.carry = Carry::Empty;
        PacketError
    }

    fn accept_width(&mut self, len: usize) -> Result<(), PacketError> {
        if len > self.data_width {
            if !self.auto_grow {
                return Err(self.packet_error());
            }
            tracing::debug!(width = len, "growing ITM payload width");
            self.data_width = len;
        }
        Ok(())
    }

    /// Decode one frame in text mode.
    ///
    /// `emit` receives `(channel, payload)` for every completed run of
    /// stimulus bytes. Returns `Ok(true)` when text was flushed at frame
    /// end (the "new data" hint used for scroll-follow), `Ok(false)` when
    /// the frame held no terminal text, and `Err(PacketError)` when an
    /// invalid packet discarded the rest of the frame; the caller must
    /// reset any CTF decode state in that case.
    pub fn decode_text_frame(
        &mut self,
        data: &[u8],
        emit: &mut dyn FnMut(u8, &[u8]),
    ) -> Result<bool, PacketError> {
        // payload accumulator: a frame of minimal packets plus the carry
        // payload can never exceed this
        let mut buffer = [0u8; FRAME_CAPACITY + 4];
        let mut buflen = 0usize;
        let mut channel: Option<u8> = None;
        let mut rest = data;

        // resume the packet cached from the previous frame
        if let Some((cache, filled)) = self.carry.take() {
            let header = cache[0];
            if !is_stimulus_header(header) {
                return Err(self.packet_error());
            }
            let needed = payload_len(header);
            self.accept_width(needed)?;
            let have = filled - 1;
            let take = needed - have;
            if take > rest.len() {
                // a very short frame; the packet is still incomplete
                self.carry.stash(&cache[..filled]);
                self.carry.extend(rest);
                return Ok(false);
            }
            buffer[..have].copy_from_slice(&cache[1..filled]);
            buffer[have..needed].copy_from_slice(&rest[..take]);
            buflen = needed;
            channel = Some(stimulus_channel(header));
            rest = &rest[take..];
        }

        while !rest.is_empty() {
            let head = rest[0];
            if head == PC_SAMPLE_HEADER {
                // PC samples are ignored in text mode; a sample truncated
                // at frame end just consumes the remainder
                rest = if rest.len() >= PC_SAMPLE_SIZE {
                    &rest[PC_SAMPLE_SIZE..]
                } else {
                    &[]
                };
                continue;
            }
            if !is_stimulus_header(head) {
                return Err(self.packet_error());
            }
            // a channel switch mid-frame flushes the text gathered so far
            let new_channel = stimulus_channel(head);
            if let Some(current) = channel {
                if current != new_channel && buflen > 0 {
                    emit(current, &buffer[..buflen]);
                    buflen = 0;
                }
            }
            channel = Some(new_channel);
            let len = payload_len(head);
            if rest.len() < len + 1 {
                self.carry.stash(rest);
                break;
            }
            self.accept_width(len)?;
            buffer[buflen..buflen + len].copy_from_slice(&rest[1..=len]);
            buflen += len;
            rest = &rest[len + 1..];
        }

        if buflen > 0 {
            if let Some(current) = channel {
                emit(current, &buffer[..buflen]);
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Decode one frame in profile mode.
    ///
    /// PC samples go into `samples`; overflow markers are counted. Other
    /// valid packets are skipped. Invalid headers behave exactly as in text
    /// mode: one counted error, rest of the frame dropped.
    pub fn decode_profile_frame(
        &mut self,
        data: &[u8],
        samples: &mut SampleMap,
    ) -> Result<ProfileFrameStats, PacketError> {
        let mut stats = ProfileFrameStats::default();
        let mut rest = data;

        if let Some((cache, filled)) = self.carry.take() {
            let header = cache[0];
            let total = if header == PC_SAMPLE_HEADER {
                PC_SAMPLE_SIZE
            } else if is_stimulus_header(header) {
                payload_len(header) + 1
            } else {
                return Err(self.packet_error());
            };
            let needed = total - filled;
            if needed > rest.len() {
                // cached bytes plus this whole frame still do not complete
                // the packet
                self.carry.stash(&cache[..filled]);
                self.carry.extend(rest);
                return Ok(stats);
            }
            if header == PC_SAMPLE_HEADER {
                let mut packet = [0u8; PC_SAMPLE_SIZE];
                packet[..filled].copy_from_slice(&cache[..filled]);
                packet[filled..].copy_from_slice(&rest[..needed]);
                samples.record(u32::from_le_bytes([
                    packet[1], packet[2], packet[3], packet[4],
                ]));
                stats.samples += 1;
            }
            rest = &rest[needed..];
        }

        while !rest.is_empty() {
            let head = rest[0];
            if head == PC_SAMPLE_HEADER {
                if rest.len() >= PC_SAMPLE_SIZE {
                    samples.record(u32::from_le_bytes([rest[1], rest[2], rest[3], rest[4]]));
                    stats.samples += 1;
                    rest = &rest[PC_SAMPLE_SIZE..];
                } else {
                    self.carry.stash(rest);
                    break;
                }
            } else if head == OVERFLOW_HEADER {
                stats.overflows += 1;
                rest = &rest[1..];
            } else if is_stimulus_header(head) {
                let total = payload_len(head) + 1;
                if rest.len() >= total {
                    rest = &rest[total..];
                } else {
                    self.carry.stash(rest);
                    break;
                }
            } else {
                return Err(self.packet_error());
            }
        }
        Ok(stats)
    }
}
