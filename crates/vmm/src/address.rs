//! Address types for physical and virtual memory.
//!
//! Both address kinds are plain 64-bit byte offsets. Splitting an address into page
//! and offset depends on the configured [`Geometry`](crate::Geometry), so the
//! arithmetic lives there rather than on the address types themselves.

use core::fmt;
use core::ops::{Add, Sub};

/// Macro to define common address type functionality.
///
/// This macro generates the basic structure and methods common to both physical
/// and virtual address types, reducing code duplication.
macro_rules! impl_address_common {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
        #[repr(transparent)]
        pub struct $name(u64);

        impl $name {
            /// Creates a new address.
            #[inline]
            pub const fn new(addr: u64) -> Self {
                Self(addr)
            }

            /// Returns the raw address value.
            #[inline]
            pub const fn as_u64(self) -> u64 {
                self.0
            }

            /// Checks if the address is aligned to the given power-of-two boundary.
            #[inline]
            pub const fn is_aligned(self, align: u64) -> bool {
                self.0 & (align - 1) == 0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:#x})", stringify!($name), self.0)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{:#x}", self.0)
            }
        }

        impl Add<u64> for $name {
            type Output = Self;

            #[inline]
            fn add(self, rhs: u64) -> Self::Output {
                Self(self.0.wrapping_add(rhs))
            }
        }

        impl Sub<$name> for $name {
            type Output = u64;

            #[inline]
            fn sub(self, rhs: $name) -> Self::Output {
                self.0 - rhs.0
            }
        }
    };
}

impl_address_common!(
    VirtualAddress,
    "A virtual address within a single process's address space."
);

impl VirtualAddress {
    /// Builds a virtual address from a signed value computed by an instruction.
    ///
    /// Negative results cannot name any page; they saturate to the top of the address
    /// range so that translation reports them as out of range.
    pub fn from_signed(addr: i64) -> Self {
        Self(u64::try_from(addr).unwrap_or(u64::MAX))
    }

    /// Offsets this address by a signed byte count.
    pub fn offset(self, delta: i64) -> Self {
        Self(self.0.wrapping_add_signed(delta))
    }
}

impl_address_common!(
    PhysicalAddress,
    "A byte offset into simulated physical memory."
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_is_hex() {
        assert_eq!(VirtualAddress::new(0x1f).to_string(), "0x1f");
        assert_eq!(PhysicalAddress::new(0).to_string(), "0x0");
    }

    #[test]
    fn debug_names_the_kind() {
        assert_eq!(
            format!("{:?}", PhysicalAddress::new(0x40)),
            "PhysicalAddress(0x40)"
        );
    }

    #[test]
    fn alignment() {
        assert!(VirtualAddress::new(0x40).is_aligned(16));
        assert!(!VirtualAddress::new(0x44).is_aligned(16));
    }

    #[test]
    fn negative_addresses_saturate() {
        assert_eq!(VirtualAddress::from_signed(-4).as_u64(), u64::MAX);
        assert_eq!(VirtualAddress::from_signed(12).as_u64(), 12);
    }

    #[test]
    fn signed_offsets() {
        let ip = VirtualAddress::new(16);
        assert_eq!(ip.offset(-8), VirtualAddress::new(8));
        assert_eq!(ip.offset(4), VirtualAddress::new(20));
        assert_eq!(VirtualAddress::new(24) - ip, 8);
    }
}
