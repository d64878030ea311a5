pub mod bits;
pub mod distance;

pub use bits::*;
pub use distance::*;

/// Scales `vector` to unit length. A zero vector stays zero.
pub fn normalize(vector: &[f32]) -> Vec<f32> {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    vector.iter().map(|x| x / (norm + 1e-32)).collect()
}

/// In-place form of [`normalize`].
pub fn normalize_in_place(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    for x in vector.iter_mut() {
        *x /= norm + 1e-32;
    }
}
