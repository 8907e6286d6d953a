//! Wire protocol of the gateway session: fixed-width opaque tags and the
//! frame grammar layered on top of them.
//!
//! Every frame on a session is `nonce(32) ‖ body`. When the nonce matches a
//! live output's tag the body is routed to that output as raw data;
//! otherwise the body is `command_tag(32) ‖ args` and is dispatched as a
//! command whose reply comes back as `nonce ‖ payload`. Failed commands are
//! reported as `ZERO ‖ nonce ‖ utf8-message`, with the all-zero tag reserved
//! as the error sentinel.

use std::fmt;

use orchid_buffer::Buffer;

/// Fixed-width 32-byte opaque identifier.
///
/// Tags name three things that share one key space: commands, request
/// nonces, and output routes. Comparisons are byte-wise; the byte patterns
/// of the command constants are arbitrary but stable for a session.
#[derive(Clone, Copy, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Tag([u8; 32]);

impl Tag {
    /// Width of every tag on the wire, in bytes.
    pub const SIZE: usize = 32;

    /// The all-zero tag, reserved as the error reply sentinel.
    pub const ZERO: Tag = Tag([0; Tag::SIZE]);

    /// Pipelines sub-commands and replies with their concatenated payloads.
    pub const BATCH: Tag = Tag::named(b"batch");

    /// Swallows the frame; no reply at all.
    pub const DISCARD: Tag = Tag::named(b"discard");

    /// Shuts and erases the output named by the argument tag.
    pub const CLOSE: Tag = Tag::named(b"close");

    /// Opens a UDP output toward a `host:port` target.
    pub const CONNECT: Tag = Tag::named(b"connect");

    /// Creates a fresh outgoing peer connection under a handle.
    pub const ESTABLISH: Tag = Tag::named(b"establish");

    /// Produces the (stripped) local offer of an outgoing connection.
    pub const OFFER: Tag = Tag::named(b"offer");

    /// Applies the client-supplied answer to an outgoing connection.
    pub const NEGOTIATE: Tag = Tag::named(b"negotiate");

    /// Opens a data channel on an outgoing connection as a new output.
    pub const CHANNEL: Tag = Tag::named(b"channel");

    /// Drops an outgoing connection.
    pub const CANCEL: Tag = Tag::named(b"cancel");

    /// Awaits the open handshake of a channel-backed output.
    pub const FINISH: Tag = Tag::named(b"finish");

    /// Answers an inbound offer relayed through this session.
    pub const ANSWER: Tag = Tag::named(b"answer");

    const fn named(name: &[u8]) -> Tag {
        let mut data = [0; Tag::SIZE];
        let mut index = 0;
        while index < name.len() {
            data[index] = name[index];
            index += 1;
        }
        Tag(data)
    }
}

impl From<[u8; Tag::SIZE]> for Tag {
    fn from(data: [u8; Tag::SIZE]) -> Self {
        Tag(data)
    }
}

impl Buffer for Tag {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(&self.0)
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(formatter, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Tag {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, formatter)
    }
}

/// Identity-derived key of a session peer: the SHA-256 fingerprint its
/// certificate was offered under, verified by the transport handshake.
/// Spaces are registered under this key.
#[derive(Clone, Copy, Eq, Hash, PartialEq)]
pub struct Common([u8; 32]);

impl From<[u8; 32]> for Common {
    fn from(data: [u8; 32]) -> Self {
        Common(data)
    }
}

impl fmt::Display for Common {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(formatter, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Common {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, formatter)
    }
}
