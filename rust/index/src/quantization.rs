//! Sign quantization of unit vectors into fixed-width bit codes.
//!
//! The `D` coordinates are split into `N` contiguous groups, group `i`
//! spanning `[i·D/N, (i+1)·D/N)` (floor division). Bit `i` is set when the
//! group's mean coordinate is non-negative. Codes whose Hamming distance is
//! small come from vectors with a similar per-block sign pattern, a cheap
//! stand-in for one random hyperplane per bit.
//!
//! When `N > D` some groups are empty. An empty group contributes a 0 bit and
//! draws no noise.
//!
//! Optional noise flips each bit of a non-empty group with probability
//! `noise`, so vectors near a group's sign boundary do not always land in the
//! same bucket.

use heatspace_distance::BitCode;
use heatspace_error::{ErrorCodes, HeatspaceError};
use rand::Rng;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum QuantizationError {
    #[error("Requested `{requested}` bits but the code type holds only `{available}`")]
    TooManyBits { requested: u32, available: u32 },
    #[error("Quantization noise `{0}` outside [0, 1]")]
    InvalidNoise(f32),
}

impl HeatspaceError for QuantizationError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

/// Quantizes `unit_vector` to `num_bits` bits, flipping bits with probability
/// `noise` using `rng`.
pub fn quantize_embedding<T, R>(
    unit_vector: &[f32],
    num_bits: u32,
    noise: f32,
    rng: &mut R,
) -> Result<T, QuantizationError>
where
    T: BitCode,
    R: Rng,
{
    if !(0.0..=1.0).contains(&noise) {
        return Err(QuantizationError::InvalidNoise(noise));
    }
    quantize_with(unit_vector, num_bits, || {
        noise > 0.0 && rng.gen::<f32>() < noise
    })
}

/// Noise-free quantization; a pure function of `unit_vector` and `num_bits`.
pub fn quantize_embedding_exact<T: BitCode>(
    unit_vector: &[f32],
    num_bits: u32,
) -> Result<T, QuantizationError> {
    quantize_with(unit_vector, num_bits, || false)
}

fn quantize_with<T: BitCode>(
    unit_vector: &[f32],
    num_bits: u32,
    mut flip: impl FnMut() -> bool,
) -> Result<T, QuantizationError> {
    if num_bits > T::BITS {
        return Err(QuantizationError::TooManyBits {
            requested: num_bits,
            available: T::BITS,
        });
    }

    let dim = unit_vector.len();
    let groups = num_bits as usize;
    let mut code = T::ZERO;
    for i in 0..groups {
        let begin = i * dim / groups;
        let end = (i + 1) * dim / groups;
        if begin == end {
            continue;
        }

        let group = &unit_vector[begin..end];
        let mean = group.iter().sum::<f32>() / group.len() as f32;
        let mut bit = mean >= 0.0;
        if flip() {
            bit = !bit;
        }
        if bit {
            code = code.with_bit(i as u32);
        }
    }
    Ok(code)
}
