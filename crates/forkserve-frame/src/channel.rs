//! Channel IDs.
//!
//! The socket only ever carries two kinds of traffic: the connection
//! handshake and, once it succeeds, the message envelopes.

/// Handshake request/response.
pub const CONTROL: u16 = 0;

/// Router/worker message envelopes (one JSON message per frame).
pub const MESSAGE: u16 = 1;

/// Returns a human-readable name for a channel ID.
pub fn channel_name(id: u16) -> &'static str {
    match id {
        CONTROL => "CONTROL",
        MESSAGE => "MESSAGE",
        _ => "UNKNOWN",
    }
}
