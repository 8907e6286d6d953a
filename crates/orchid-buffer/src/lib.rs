//! Scatter/gather byte sequences for zero-copy framing. A [`Buffer`] is any
//! ordered sequence of contiguous byte regions: a plain slice, an owned
//! string, a reference-counted [`Beam`], or a tuple concatenating other
//! buffers. A [`Window`] walks a buffer with a positional cursor, copying out
//! fixed-width blocks without ever flattening the underlying regions.

#![deny(nonstandard_style, trivial_casts, trivial_numeric_casts)]
#![forbid(non_ascii_idents, unsafe_code)]
#![warn(
    deprecated_in_future,
    missing_copy_implementations,
    missing_docs,
    unreachable_pub,
    unused_import_braces,
    unused_labels,
    unused_lifetimes,
    unused_qualifications
)]

mod beam;
mod window;

use bytes::Bytes;

#[doc(inline)]
pub use beam::Beam;
#[doc(inline)]
pub use window::{TakeError, Window};

/// An ordered sequence of contiguous byte regions.
///
/// The one required operation is [`Buffer::each`]: visit the regions in
/// order, short-circuiting when the visitor returns `false`. Everything else
/// (sizing, flattening, windowing) is derived from it.
///
/// Concatenation is a tuple: `(tag, payload)` is itself a [`Buffer`] which
/// visits `tag`'s regions and then `payload`'s, with no bytes moved. A
/// reference `&B` is a borrowing buffer over `B`.
pub trait Buffer {
    /// Visits the buffer's regions in order. Returns `false` if the visitor
    /// short-circuited, `true` once every region has been seen.
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool;

    /// Total number of bytes over all regions.
    fn size(&self) -> usize {
        let mut size = 0;
        self.each(&mut |region| {
            size += region.len();
            true
        });
        size
    }

    /// Whether the buffer holds no bytes at all.
    fn is_empty(&self) -> bool {
        self.each(&mut |region| region.is_empty())
    }

    /// Flattens the buffer into one contiguous allocation.
    fn to_vec(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(self.size());
        self.each(&mut |region| {
            data.extend_from_slice(region);
            true
        });
        data
    }

    /// Copies the buffer into an owned, shareable [`Beam`].
    fn to_beam(&self) -> Beam {
        Beam::copy(self)
    }
}

impl<B: Buffer + ?Sized> Buffer for &B {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        (**self).each(code)
    }
}

impl Buffer for [u8] {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(self)
    }
}

impl<const N: usize> Buffer for [u8; N] {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(self)
    }
}

impl Buffer for str {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(self.as_bytes())
    }
}

impl Buffer for String {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(self.as_bytes())
    }
}

impl Buffer for Vec<u8> {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(self)
    }
}

impl Buffer for Bytes {
    fn each<'a>(&'a self, code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        code(self)
    }
}

/// The empty buffer: visits no regions.
impl Buffer for () {
    fn each<'a>(&'a self, _code: &mut dyn FnMut(&'a [u8]) -> bool) -> bool {
        true
    }
}

macro_rules! impl_buffer_for_tuple {
    ($($part:ident)+) => {
        impl<$($part: Buffer),+> Buffer for ($($part,)+) {
            fn each<'a>(
                &'a self,
                code: &mut dyn FnMut(&'a [u8]) -> bool,
            ) -> bool {
                #[allow(non_snake_case)]
                let ($($part,)+) = self;
                $($part.each(code) &&)+ true
            }
        }
    };
}

impl_buffer_for_tuple!(A);
impl_buffer_for_tuple!(A B);
impl_buffer_for_tuple!(A B C);
impl_buffer_for_tuple!(A B C D);
impl_buffer_for_tuple!(A B C D E);
