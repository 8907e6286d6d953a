//! Positional cursor over a scatter/gather buffer.

use derive_more::Display;

use crate::Buffer;

/// Failures of fixed-width reads on a [`Window`].
#[derive(Clone, Copy, Debug, Display, Eq, PartialEq)]
pub enum TakeError {
    /// A take requested more bytes than the window still holds.
    #[display(
        fmt = "take of {} bytes overruns window ({} remaining)",
        requested,
        remaining
    )]
    Truncated {
        /// Bytes the caller asked for.
        requested: usize,
        /// Bytes the window still held.
        remaining: usize,
    },

    /// The window was expected to be fully consumed but bytes remain.
    #[display(fmt = "window not fully consumed ({} bytes remain)", remaining)]
    Trailing {
        /// Bytes left past the cursor.
        remaining: usize,
    },
}

/// A flat view of a buffer's regions with a `(region, offset)` cursor.
///
/// [`Window::take`] copies exactly `N` bytes out, crossing region boundaries
/// transparently and advancing the cursor; the remainder is itself a buffer
/// (visiting starts at the cursor), so framed decoding is a sequence of
/// fixed-width takes followed by whatever consumes the rest.
#[derive(Clone, Debug)]
pub struct Window<'a> {
    regions: Vec<&'a [u8]>,
    index: usize,
    offset: usize,
}

impl<'a> Window<'a> {
    /// Materializes the regions of `buffer` into a fresh window with the
    /// cursor at the start.
    pub fn new<B: Buffer + ?Sized>(buffer: &'a B) -> Self {
        let mut regions = Vec::new();
        buffer.each(&mut |region| {
            regions.push(region);
            true
        });
        Window {
            regions,
            index: 0,
            offset: 0,
        }
    }

    /// Bytes left between the cursor and the end of the window.
    pub fn remaining(&self) -> usize {
        let mut remaining = 0;
        for (index, region) in self.regions.iter().enumerate().skip(self.index)
        {
            remaining += region.len();
            if index == self.index {
                remaining -= self.offset;
            }
        }
        remaining
    }

    /// Copies exactly `N` bytes into a fixed block, advancing the cursor.
    ///
    /// # Errors
    ///
    /// [`TakeError::Truncated`] if fewer than `N` bytes remain; the cursor is
    /// left untouched in that case.
    pub fn take<const N: usize>(&mut self) -> Result<[u8; N], TakeError> {
        let remaining = self.remaining();
        if remaining < N {
            return Err(TakeError::Truncated {
                requested: N,
                remaining,
            });
        }

        let mut block = [0; N];
        let mut filled = 0;
        while filled < N {
            let region = self.regions[self.index];
            let rest = &region[self.offset..];
            if rest.is_empty() {
                self.index += 1;
                self.offset = 0;
                continue;
            }
            let step = rest.len().min(N - filled);
            block[filled..filled + step].copy_from_slice(&rest[..step]);
            filled += step;
            self.offset += step;
            if self.offset == region.len() {
                self.index += 1;
                self.offset = 0;
            }
        }
        Ok(block)
    }

    /// Splits off everything past the cursor as a new window, leaving this
    /// one empty.
    pub fn take_rest(&mut self) -> Window<'a> {
        let rest = self.clone();
        self.index = self.regions.len();
        self.offset = 0;
        rest
    }

    /// Whether the cursor stands at the end of the window.
    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Consumes the window, failing if any bytes remain past the cursor.
    ///
    /// # Errors
    ///
    /// [`TakeError::Trailing`] when the window was not fully consumed.
    pub fn finish(self) -> Result<(), TakeError> {
        match self.remaining() {
            0 => Ok(()),
            remaining => Err(TakeError::Trailing { remaining }),
        }
    }
}

impl Buffer for Window<'_> {
    fn each<'b>(&'b self, code: &mut dyn FnMut(&'b [u8]) -> bool) -> bool {
        for (index, region) in self.regions.iter().enumerate().skip(self.index)
        {
            let region: &'b [u8] = if index == self.index {
                &region[self.offset..]
            } else {
                region
            };
            if !region.is_empty() && !code(region) {
                return false;
            }
        }
        true
    }
}
