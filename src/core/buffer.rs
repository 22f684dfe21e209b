//! Byte buffers exchanged with the caller.
//!
//! A `Buffer` either owns its bytes or borrows caller memory. The borrow is
//! tracked by the lifetime parameter, so a borrowed buffer cannot outlive
//! the memory it wraps and dropping it never frees that memory.

use std::fmt;

use crate::error::{ClientError, Result};

#[derive(Clone, PartialEq, Eq)]
enum Repr<'a> {
    Owned(Vec<u8>),
    Borrowed(&'a [u8]),
}

/// An owned or borrowed byte range.
#[derive(Clone, PartialEq, Eq)]
pub struct Buffer<'a> {
    repr: Repr<'a>,
}

impl<'a> Buffer<'a> {
    /// Borrow caller memory without copying.
    pub fn wrap(bytes: &'a [u8]) -> Self {
        Self {
            repr: Repr::Borrowed(bytes),
        }
    }

    /// Borrow raw caller memory.
    ///
    /// A null pointer is only accepted together with a zero length.
    ///
    /// # Safety
    ///
    /// When `ptr` is non-null it must be valid for reads of `len` bytes for
    /// the whole lifetime `'a`, and the memory must not be mutated during it.
    pub unsafe fn from_raw_parts(ptr: *const u8, len: usize) -> Result<Self> {
        if ptr.is_null() {
            if len != 0 {
                return Err(ClientError::NullBuffer(len).into());
            }
            return Ok(Self::wrap(&[]));
        }
        Ok(Self::wrap(std::slice::from_raw_parts(ptr, len)))
    }

    /// The bytes of this buffer.
    pub fn data(&self) -> &[u8] {
        match &self.repr {
            Repr::Owned(v) => v,
            Repr::Borrowed(b) => b,
        }
    }

    pub fn len(&self) -> usize {
        self.data().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data().is_empty()
    }

    /// Whether dropping this buffer releases its storage.
    pub fn is_owned(&self) -> bool {
        matches!(self.repr, Repr::Owned(_))
    }

    /// Copy the bytes out.
    pub fn to_owned_bytes(&self) -> Vec<u8> {
        self.data().to_vec()
    }

    /// Detach from caller memory, copying borrowed bytes.
    pub fn into_owned(self) -> Buffer<'static> {
        match self.repr {
            Repr::Owned(v) => Buffer::from_vec(v),
            Repr::Borrowed(b) => Buffer::from_vec(b.to_vec()),
        }
    }
}

impl Buffer<'static> {
    /// An empty owned buffer.
    pub fn allocate() -> Self {
        Self::from_vec(Vec::new())
    }

    /// Take ownership of `bytes`.
    pub fn from_vec(bytes: Vec<u8>) -> Self {
        Self {
            repr: Repr::Owned(bytes),
        }
    }

    /// Consume into the owned bytes.
    pub fn into_vec(self) -> Vec<u8> {
        match self.repr {
            Repr::Owned(v) => v,
            Repr::Borrowed(b) => b.to_vec(),
        }
    }
}

impl AsRef<[u8]> for Buffer<'_> {
    fn as_ref(&self) -> &[u8] {
        self.data()
    }
}

impl From<Vec<u8>> for Buffer<'static> {
    fn from(bytes: Vec<u8>) -> Self {
        Self::from_vec(bytes)
    }
}

impl<'a> From<&'a [u8]> for Buffer<'a> {
    fn from(bytes: &'a [u8]) -> Self {
        Self::wrap(bytes)
    }
}

impl fmt::Debug for Buffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Buffer")
            .field("owned", &self.is_owned())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_is_zero_copy() {
        let backing = [1u8, 2, 3];
        let buf = Buffer::wrap(&backing);
        assert!(!buf.is_owned());
        assert_eq!(buf.len(), 3);
        assert_eq!(buf.data().as_ptr(), backing.as_ptr());
    }

    #[test]
    fn test_allocate_is_empty_and_owned() {
        let buf = Buffer::allocate();
        assert!(buf.is_owned());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_drop_borrowed_keeps_backing_memory() {
        let canary = vec![0xA5u8; 32];
        {
            let buf = Buffer::wrap(&canary);
            assert_eq!(buf.to_owned_bytes(), canary);
        }
        assert!(canary.iter().all(|b| *b == 0xA5));
    }

    #[test]
    fn test_into_owned_copies() {
        let backing = b"hello".to_vec();
        let owned = Buffer::wrap(&backing).into_owned();
        assert!(owned.is_owned());
        assert_ne!(owned.data().as_ptr(), backing.as_ptr());
        assert_eq!(owned.into_vec(), backing);
    }

    #[test]
    fn test_null_pointer_rejected() {
        let result = unsafe { Buffer::from_raw_parts(std::ptr::null(), 4) };
        assert!(result.is_err());

        let empty = unsafe { Buffer::from_raw_parts(std::ptr::null(), 0) }.unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_from_raw_parts_reads_exact_length() {
        let backing = [9u8, 8, 7, 6];
        let buf = unsafe { Buffer::from_raw_parts(backing.as_ptr(), 2) }.unwrap();
        assert_eq!(buf.data(), &[9, 8]);
    }
}
