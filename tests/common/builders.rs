//! Builders for ITM byte streams and scripted collaborators

use std::collections::VecDeque;

use swotrace_rs::{CtfMessage, CtfStream};

/// Builds raw ITM byte streams for feeding the decoder
#[derive(Debug, Default)]
pub struct ItmStreamBuilder {
    bytes: Vec<u8>,
}

impl ItmStreamBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append `text` as single-byte stimulus packets on `channel`
    pub fn text(mut self, channel: u8, text: &str) -> Self {
        for byte in text.bytes() {
            self.bytes.push(0x01 | (channel << 3));
            self.bytes.push(byte);
        }
        self
    }

    /// Append one 4-byte stimulus packet on `channel`
    pub fn word(mut self, channel: u8, value: u32) -> Self {
        self.bytes.push(0x03 | (channel << 3));
        self.bytes.extend_from_slice(&value.to_le_bytes());
        self
    }

    /// Append a PC-sample packet
    pub fn pc_sample(mut self, pc: u32) -> Self {
        self.bytes.push(0x17);
        self.bytes.extend_from_slice(&pc.to_le_bytes());
        self
    }

    /// Append the ITM overflow marker
    pub fn overflow(mut self) -> Self {
        self.bytes.push(0x70);
        self
    }

    /// Append an invalid header byte
    pub fn garbage(mut self) -> Self {
        self.bytes.push(0xff);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.bytes
    }
}

/// Scripted CTF decoder: every payload byte on an active channel becomes
/// one canned message.
pub struct ScriptedCtf {
    active_channel: u8,
    queue: VecDeque<CtfMessage>,
    pub resets: usize,
}

impl ScriptedCtf {
    pub fn new(active_channel: u8) -> Self {
        Self {
            active_channel,
            queue: VecDeque::new(),
            resets: 0,
        }
    }
}

impl CtfStream for ScriptedCtf {
    fn is_active(&self, channel: u8) -> bool {
        channel == self.active_channel
    }

    fn decode(&mut self, payload: &[u8], channel: u8) -> i32 {
        for &byte in payload {
            self.queue.push_back(CtfMessage {
                stream_id: channel as u16,
                timestamp: 0.0,
                text: format!("event {:02x}", byte),
            });
        }
        payload.len() as i32
    }

    fn peek(&self) -> Option<&CtfMessage> {
        self.queue.front()
    }

    fn pop(&mut self) {
        self.queue.pop_front();
    }

    fn reset(&mut self) {
        self.resets += 1;
        self.queue.clear();
    }
}
