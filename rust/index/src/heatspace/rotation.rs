use heatspace_distance::normalize_in_place;
use rand::Rng;
use rand_distr::StandardNormal;

/// Nudges a unit vector in a random direction: adds `sigma`-scaled Gaussian
/// noise to every coordinate and renormalizes.
pub fn gaussian_rotate_unit_vector<R: Rng>(input: &[f32], sigma: f32, rng: &mut R) -> Vec<f32> {
    let mut out: Vec<f32> = input
        .iter()
        .map(|x| {
            let g: f32 = rng.sample(StandardNormal);
            x + sigma * g
        })
        .collect();
    normalize_in_place(&mut out);
    out
}
