//! Drift checksum over explicitly set flags.

use crate::registry::{FlagHandle, FlagSet};

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
#[derive(Debug, Clone, Copy)]
struct Fnv1a(u32);

impl Fnv1a {
    fn new() -> Self {
        Self(FNV_OFFSET_BASIS)
    }

    fn write(&mut self, bytes: &[u8]) {
        for byte in bytes {
            self.0 ^= u32::from(*byte);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn finish(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

/// Hash the name and current value of every explicitly set flag accepted by
/// `filter`, in name order.
///
/// Two processes with the same flags set to the same values produce the same
/// checksum, so comparing checksums detects configuration drift. Flags left at
/// their defaults never contribute.
///
/// # Examples
///
/// ```rust
/// use hotswap_flags::registry::{checksum, FlagSet};
///
/// let a = FlagSet::new();
/// let b = FlagSet::new();
/// for flags in [&a, &b] {
///     flags.dyn_int64("limit", 1, "").unwrap();
///     flags.set("limit", "5").unwrap();
/// }
/// assert_eq!(checksum(&a, |_| true), checksum(&b, |_| true));
/// ```
pub fn checksum<F>(flags: &FlagSet, filter: F) -> [u8; 4]
where
    F: Fn(&FlagHandle) -> bool,
{
    let mut hasher = Fnv1a::new();
    flags.visit_changed(|flag| {
        if filter(flag) {
            hasher.write(flag.name().as_bytes());
            hasher.write(flag.value().as_bytes());
        }
    });
    hasher.finish()
}

/// [`checksum`] rendered as lowercase hex.
pub fn checksum_hex<F>(flags: &FlagSet, filter: F) -> String
where
    F: Fn(&FlagHandle) -> bool,
{
    checksum(flags, filter)
        .iter()
        .map(|b| format!("{:02x}", b))
        .collect()
}
