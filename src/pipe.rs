//! The uniform duplex seams everything in the gateway is built from: a
//! [`Pipe`] is something bytes can be sent into, a [`Drain`] is something a
//! transport lands received bytes on. A space is a pipe toward its conduit
//! and a drain from it; an output is a pipe toward its inner forwarder and a
//! drain from it.

use std::io;

use async_trait::async_trait;
use derive_more::{Display, From};
use orchid_buffer::{Beam, Buffer};

/// Errors raised by a transport underneath a [`Pipe`] or into a [`Drain`].
#[derive(Debug, Display, From)]
pub enum PipeError {
    /// The underlying socket failed an I/O operation.
    #[display(fmt = "I/O operation failed: {}", _0)]
    Io(io::Error),

    /// The underlying WebRTC stack failed.
    #[display(fmt = "WebRTC transport failed: {}", _0)]
    Rtc(webrtc::Error),

    /// The pipe has no live transport behind it any more.
    #[display(fmt = "transport detached")]
    Detached,
}

/// Something bytes can be sent into.
#[async_trait]
pub trait Pipe: Send + Sync {
    /// Forwards `data` into the pipe.
    ///
    /// # Errors
    ///
    /// [`PipeError`] when the transport behind the pipe rejects the write.
    async fn send(&self, data: &(dyn Buffer + Sync)) -> Result<(), PipeError>;

    /// Shuts the pipe down; further sends fail.
    ///
    /// # Errors
    ///
    /// [`PipeError`] when the teardown itself fails.
    async fn shut(&self) -> Result<(), PipeError>;
}

/// Something a transport notifies about received bytes and faults.
///
/// [`Drain::land`] is invoked from transport callbacks and must never block:
/// implementations enqueue the data and return.
pub trait Drain: Send + Sync {
    /// Delivers bytes produced by the source.
    fn land(&self, data: Beam);

    /// Reports that the source failed; downstream state tears down.
    fn stop(&self, error: PipeError);
}
