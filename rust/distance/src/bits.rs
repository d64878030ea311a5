//! Distances between fixed-width bit codes.
//!
//! Codes are plain unsigned integers. Proximity in Hamming distance stands in
//! for angular proximity of the vectors the codes were quantized from.

use std::fmt::Debug;
use std::hash::Hash;
use std::ops::{BitAnd, BitOr, BitXor, Not};

/// An unsigned integer used as a container for a bit code.
///
/// The logical code length may be shorter than [`BitCode::BITS`]; in that case
/// the unused high bits are zero.
pub trait BitCode:
    Copy
    + Debug
    + Default
    + Eq
    + Hash
    + Send
    + Sync
    + BitAnd<Output = Self>
    + BitOr<Output = Self>
    + BitXor<Output = Self>
    + Not<Output = Self>
{
    /// Width of the container in bits.
    const BITS: u32;
    const ZERO: Self;

    fn count_ones(self) -> u32;

    /// Returns `self` with bit `index` set. `index` must be below `BITS`.
    fn with_bit(self, index: u32) -> Self;

    /// A mask with the low `num_bits` bits set (all bits when `num_bits >= BITS`).
    fn low_mask(num_bits: u32) -> Self;

    fn bit(self, index: u32) -> bool;
}

macro_rules! impl_bit_code {
    ($($t:ty),*) => {
        $(
            impl BitCode for $t {
                const BITS: u32 = <$t>::BITS;
                const ZERO: Self = 0;

                #[inline]
                fn count_ones(self) -> u32 {
                    <$t>::count_ones(self)
                }

                #[inline]
                fn with_bit(self, index: u32) -> Self {
                    self | (1 << index)
                }

                #[inline]
                fn low_mask(num_bits: u32) -> Self {
                    if num_bits >= <$t>::BITS {
                        <$t>::MAX
                    } else {
                        (1 << num_bits) - 1
                    }
                }

                #[inline]
                fn bit(self, index: u32) -> bool {
                    (self >> index) & 1 == 1
                }
            }
        )*
    };
}

impl_bit_code!(u8, u16, u32, u64, u128);

/// Number of positions at which `a` and `b` differ.
#[inline]
pub fn hamming_distance<T: BitCode>(a: T, b: T) -> u32 {
    (a ^ b).count_ones()
}

/// Number of positions at which `a` and `b` agree, counted over the whole
/// container width.
///
/// Unused high bits of a shorter code always agree and inflate the count; use
/// [`bits_in_common_masked`] when the code does not fill the container.
#[inline]
pub fn bits_in_common<T: BitCode>(a: T, b: T) -> u32 {
    (!(a ^ b)).count_ones()
}

/// [`bits_in_common`] restricted to the low `num_bits` bits.
#[inline]
pub fn bits_in_common_masked<T: BitCode>(a: T, b: T, num_bits: u32) -> u32 {
    (!(a ^ b) & T::low_mask(num_bits)).count_ones()
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::{rngs::StdRng, Rng, SeedableRng};

    #[test]
    fn test_all_bits_differ() {
        assert_eq!(hamming_distance(0xFFFF_FFFFu32, 0x0000_0000u32), 32);
        assert_eq!(bits_in_common(0xFFFF_FFFFu32, 0x0000_0000u32), 0);
        assert_eq!(hamming_distance(0xAAAA_AAAAu32, 0x5555_5555u32), 32);
        assert_eq!(bits_in_common(0xAAAA_AAAAu32, 0x5555_5555u32), 0);
    }

    #[test]
    fn test_identical_codes() {
        let a = 0xDEAD_BEEFu32;
        assert_eq!(hamming_distance(a, a), 0);
        assert_eq!(bits_in_common(a, a), 32);
        assert_eq!(bits_in_common(u128::MAX, u128::MAX), 128);
    }

    #[test]
    fn test_single_bit_flip() {
        let mut rng = StdRng::seed_from_u64(0xdeadbeef);
        for _ in 0..10_000 {
            let a: u32 = rng.gen();
            let b = a ^ (1 << rng.gen_range(0..32));
            assert_eq!(hamming_distance(a, b), 1);
            assert_eq!(bits_in_common(a, b), 31);
        }
    }

    #[test]
    fn test_random_pairs_average_half() {
        let mut rng = StdRng::seed_from_u64(42);
        let num_iter = 100_000u64;
        let mut hamming_sum = 0u64;
        let mut common_sum = 0u64;
        for _ in 0..num_iter {
            let a: u32 = rng.gen();
            let b: u32 = rng.gen();
            hamming_sum += hamming_distance(a, b) as u64;
            common_sum += bits_in_common(a, b) as u64;
        }
        let hamming_avg = hamming_sum as f64 / num_iter as f64;
        let common_avg = common_sum as f64 / num_iter as f64;
        assert!(15.0 < hamming_avg && hamming_avg < 17.0);
        assert!(15.0 < common_avg && common_avg < 17.0);
    }

    #[test]
    fn test_masked_ignores_high_bits() {
        // 4-bit codes in a u8 container.
        let a = 0b0000_1010u8;
        let b = 0b0000_1000u8;
        assert_eq!(bits_in_common(a, b), 7);
        assert_eq!(bits_in_common_masked(a, b, 4), 3);
        assert_eq!(bits_in_common_masked(a, b, 8), 7);
        assert_eq!(bits_in_common_masked(a, b, 0), 0);
    }

    #[test]
    fn test_low_mask_and_bits() {
        assert_eq!(u8::low_mask(0), 0);
        assert_eq!(u8::low_mask(3), 0b111);
        assert_eq!(u8::low_mask(8), u8::MAX);
        assert_eq!(u128::low_mask(200), u128::MAX);
        assert_eq!(u128::low_mask(127), u128::MAX >> 1);
        let code = 0u16.with_bit(0).with_bit(15);
        assert!(code.bit(0));
        assert!(code.bit(15));
        assert!(!code.bit(7));
    }

    proptest! {
        #[test]
        fn hamming_is_symmetric(a in any::<u64>(), b in any::<u64>()) {
            prop_assert_eq!(hamming_distance(a, b), hamming_distance(b, a));
        }

        #[test]
        fn hamming_zero_iff_equal(a in any::<u128>(), b in any::<u128>()) {
            prop_assert_eq!(hamming_distance(a, a), 0);
            prop_assert_eq!(hamming_distance(a, b) == 0, a == b);
        }

        #[test]
        fn hamming_complements_bits_in_common(a in any::<u128>(), b in any::<u128>(), num_bits in 0u32..=128) {
            let mask = u128::low_mask(num_bits);
            let (a, b) = (a & mask, b & mask);
            prop_assert_eq!(
                hamming_distance(a, b),
                num_bits - bits_in_common_masked(a, b, num_bits)
            );
        }
    }
}
