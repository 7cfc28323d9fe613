//! CTF stream decoder interface
//!
//! Stimulus channels can carry Common Trace Format binary streams instead
//! of plain text. The metadata-driven CTF decoder lives outside this crate;
//! the trace core only needs the narrow interface below: ask whether a
//! channel is a CTF stream, feed it raw stimulus bytes, and drain the
//! structured messages it produces.
//!
//! The trait is the seam for testing too: integration tests plug in small
//! scripted implementations.

/// A structured message produced by the CTF decoder
#[derive(Debug, Clone)]
pub struct CtfMessage {
    /// Stream identifier; used as the display channel
    pub stream_id: u16,
    /// Remote timestamp in seconds; values ≤ 0.001 mean "no timestamp"
    pub timestamp: f64,
    /// Formatted message text
    pub text: String,
}

/// Interface to an external CTF stream decoder
pub trait CtfStream: Send {
    /// Whether `channel` is registered as a CTF stream
    fn is_active(&self, channel: u8) -> bool;

    /// Feed raw stimulus bytes into the decoder.
    ///
    /// Returns the number of complete messages now available, or a negative
    /// value on a CTF-level decode error. Errors are reported to the status
    /// log but do not disturb ITM decoding.
    fn decode(&mut self, payload: &[u8], channel: u8) -> i32;

    /// The oldest decoded message still queued, if any
    fn peek(&self) -> Option<&CtfMessage>;

    /// Discard the oldest decoded message
    fn pop(&mut self);

    /// Drop partial decode state (called after an ITM packet error)
    fn reset(&mut self);
}

/// Null decoder: no channel is a CTF stream.
///
/// This is the session default until the UI registers a real decoder.
#[derive(Debug, Default)]
pub struct NoCtf;

impl CtfStream for NoCtf {
    fn is_active(&self, _channel: u8) -> bool {
        false
    }

    fn decode(&mut self, _payload: &[u8], _channel: u8) -> i32 {
        0
    }

    fn peek(&self) -> Option<&CtfMessage> {
        None
    }

    fn pop(&mut self) {}

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_no_ctf_is_inert() {
        let mut ctf = NoCtf;
        assert!(!ctf.is_active(0));
        assert_eq!(ctf.decode(&[1, 2, 3], 0), 0);
        assert!(ctf.peek().is_none());
        ctf.pop();
        ctf.reset();
    }
}
