use bitvec::{array::BitArray, BitArr};

/// Maximum supported warp size.
///
/// The configured warp size may be smaller, lanes above it are never active.
pub const MAX_WARP_SIZE: usize = 64;

/// Lane active mask.
///
/// Bitmask where a 1 at position i means that lane i takes part in the memory instruction.
pub type ActiveMask = BitArr!(for MAX_WARP_SIZE, in u64);

/// Builds an active mask from the given lane ids.
#[must_use]
pub fn active_mask(lanes: impl IntoIterator<Item = usize>) -> ActiveMask {
    let mut mask: ActiveMask = BitArray::ZERO;
    for lane in lanes {
        mask.set(lane, true);
    }
    mask
}

/// Active mask with the first `n` lanes set.
#[must_use]
pub fn full_mask(n: usize) -> ActiveMask {
    active_mask(0..n.min(MAX_WARP_SIZE))
}

/// Bit string of the first `warp_size` lanes, lane 0 first.
#[must_use]
pub fn to_bit_string(mask: &ActiveMask, warp_size: usize) -> String {
    mask[..warp_size.min(MAX_WARP_SIZE)]
        .iter()
        .map(|bit| if *bit { '1' } else { '0' })
        .collect()
}
