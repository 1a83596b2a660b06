//! Native handles - opaque addresses of native-side object instances
//!
//! A handle is unique per live native object but the allocator may hand the
//! same address out again after destruction, so a handle is only a safe key
//! while the registry holds a live mapping for it.

use core::fmt;
use serde::{Deserialize, Serialize};

/// Address (or opaque identifier) of a native object or base sub-object
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NativeHandle(usize);

impl NativeHandle {
    pub const NULL: Self = Self(0);

    #[inline]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[inline]
    pub const fn addr(self) -> usize {
        self.0
    }

    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }

    /// Apply a base sub-object adjustor
    #[inline]
    pub const fn offset(self, delta: isize) -> Self {
        Self(self.0.wrapping_add_signed(delta))
    }

    /// Signed distance from `base` to `self`
    #[inline]
    pub const fn distance_from(self, base: Self) -> isize {
        self.0.wrapping_sub(base.0) as isize
    }
}

impl fmt::Display for NativeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<usize> for NativeHandle {
    fn from(addr: usize) -> Self {
        Self(addr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offset_round_trip() {
        let base = NativeHandle::new(0x1000);
        let sub = base.offset(16);
        assert_eq!(sub.addr(), 0x1010);
        assert_eq!(sub.distance_from(base), 16);
        assert_eq!(sub.offset(-16), base);
    }

    #[test]
    fn test_display_is_hex() {
        assert_eq!(NativeHandle::new(255).to_string(), "0xff");
        assert!(NativeHandle::NULL.is_null());
    }
}
