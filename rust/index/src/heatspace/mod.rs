//! The heatspace index: an approximate-proximity structure over a fixed set of
//! unit-norm embeddings.
//!
//! Build records, for a pyramid of increasingly fine quantizations, how many
//! slightly rotated copies of the points land in each bucket ("heat"), keeps a
//! handful of rotated 128-bit codes per point for ranking, and stores the
//! point/cloud membership tables in both directions. The index is immutable
//! once built; a changed point set means building a new one.

mod lookup;
mod pyramid;
mod rotation;
mod types;

pub use lookup::*;
pub use pyramid::*;
pub use rotation::*;
pub use types::*;

use crate::config::HeatspaceConfig;
use crate::embedding::EmbeddingMatrix;
use crate::quantization::{quantize_embedding, QuantizationError};
use crate::widening_array::WideningArrayError;
use heatspace_error::{ErrorCodes, HeatspaceError, HeatspaceValidationError};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use tracing::instrument;

/// Width of the per-point codes used to rank candidates.
pub const FINE_CODE_BITS: u32 = 128;

#[derive(Debug, Error)]
pub enum HeatspaceInitError {
    #[error(transparent)]
    InvalidConfig(#[from] HeatspaceValidationError),
    #[error("Got `{weights}` weights for `{points}` points")]
    PointsWeightsMismatch { points: usize, weights: usize },
    #[error("Weight `{weight}` of point `{point}` must be finite and positive")]
    BadPointWeight { point: usize, weight: f32 },
    #[error("Cannot index `{0}` points; point IDs are 32-bit")]
    TooManyPoints(usize),
    #[error("Cloud `{cloud_id}` of type `{cloud_type}` references unknown point `{point_id}`")]
    BadCloudPoint {
        cloud_type: CloudType,
        cloud_id: CloudId,
        point_id: PointId,
    },
    #[error("Cloud `{cloud_id}` of type `{cloud_type}` has non-finite membership weight `{weight}`")]
    BadMembershipWeight {
        cloud_type: CloudType,
        cloud_id: CloudId,
        weight: f32,
    },
    #[error("Error quantizing points: {0}")]
    Quantization(#[from] QuantizationError),
    #[error("Error populating pyramid: {0}")]
    Pyramid(#[from] WideningArrayError),
}

impl HeatspaceError for HeatspaceInitError {
    fn code(&self) -> ErrorCodes {
        match self {
            HeatspaceInitError::InvalidConfig(e) => e.code(),
            HeatspaceInitError::PointsWeightsMismatch { .. } => ErrorCodes::InvalidArgument,
            HeatspaceInitError::BadPointWeight { .. } => ErrorCodes::InvalidArgument,
            HeatspaceInitError::TooManyPoints(_) => ErrorCodes::InvalidArgument,
            HeatspaceInitError::BadCloudPoint { .. } => ErrorCodes::InvalidArgument,
            HeatspaceInitError::BadMembershipWeight { .. } => ErrorCodes::InvalidArgument,
            HeatspaceInitError::Quantization(e) => e.code(),
            HeatspaceInitError::Pyramid(e) => e.code(),
        }
    }
}

/// A random source seeded from `seed` when given, from entropy otherwise.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

#[derive(Debug)]
pub struct EmbeddingHeatspace {
    // Unit-normed points and their prominence weights.
    points: EmbeddingMatrix,
    point_weights: Vec<f32>,
    // Level l is addressed by codes of 4(l + 1) bits.
    pyramid: Vec<PyramidLevel>,
    // Point ID -> rotated 128-bit codes.
    fine_codes: Vec<Vec<u128>>,
    // Cloud type -> cloud ID -> (weight, point ID).
    cloud_points: Vec<Vec<CloudPoints>>,
    // Cloud type -> point ID -> (weight, cloud ID).
    point_clouds: Vec<Vec<PointCloudMemberships>>,
}

impl EmbeddingHeatspace {
    /// Builds the index.
    ///
    /// * `points` - one embedding per row. Rows are normalized to unit length.
    /// * `point_weights` - prominence of each point; higher is more prominent.
    /// * `clouds` - cloud type -> cloud ID -> weighted member points.
    /// * `config` - build tuning; `config.seed` makes the build reproducible.
    #[instrument(
        name = "EmbeddingHeatspace init",
        level = "info",
        skip_all,
        fields(num_points = points.num_rows(), dim = points.dim())
    )]
    pub fn init(
        points: EmbeddingMatrix,
        point_weights: Vec<f32>,
        clouds: Vec<Vec<CloudPoints>>,
        config: &HeatspaceConfig,
    ) -> Result<Self, HeatspaceInitError> {
        config.validate()?;
        let num_points = points.num_rows();
        if num_points > PointId::MAX as usize {
            return Err(HeatspaceInitError::TooManyPoints(num_points));
        }
        if point_weights.len() != num_points {
            return Err(HeatspaceInitError::PointsWeightsMismatch {
                points: num_points,
                weights: point_weights.len(),
            });
        }
        if let Some((point, &weight)) = point_weights
            .iter()
            .enumerate()
            .find(|(_, weight)| !weight.is_finite() || **weight <= 0.0)
        {
            return Err(HeatspaceInitError::BadPointWeight { point, weight });
        }
        validate_clouds(&clouds, num_points)?;

        let points = points.normalized();
        let mut rng = rng_from_seed(config.seed);

        let num_levels = num_resolution_levels(
            num_points,
            config.pyramid_qz_per_point,
            config.target_points_per_bucket,
            config.max_resolution_levels,
        );
        let mut pyramid = Vec::with_capacity(num_levels as usize);
        for level in 0..num_levels {
            let mut pyramid_level = PyramidLevel::new(level)?;
            for (point_id, point) in points.rows().enumerate() {
                for _ in 0..config.pyramid_qz_per_point {
                    let rotated =
                        gaussian_rotate_unit_vector(point, config.rotation_sigma, &mut rng);
                    let code: u32 = quantize_embedding(
                        &rotated,
                        pyramid_level.num_bits(),
                        config.quantization_noise,
                        &mut rng,
                    )?;
                    pyramid_level.record(code, point_id as PointId)?;
                }
            }
            tracing::debug!(
                level,
                num_bits = pyramid_level.num_bits(),
                occupied_buckets = pyramid_level.num_occupied_buckets(),
                int_size = pyramid_level.counts().int_size(),
                "Populated pyramid level"
            );
            pyramid.push(pyramid_level);
        }

        let mut fine_codes = Vec::with_capacity(num_points);
        for point in points.rows() {
            let mut codes = Vec::with_capacity(config.u128_per_point as usize);
            for _ in 0..config.u128_per_point {
                let rotated = gaussian_rotate_unit_vector(point, config.rotation_sigma, &mut rng);
                codes.push(quantize_embedding::<u128, _>(
                    &rotated,
                    FINE_CODE_BITS,
                    config.quantization_noise,
                    &mut rng,
                )?);
            }
            fine_codes.push(codes);
        }

        let point_clouds = transpose_clouds(&clouds, num_points);

        let heatspace = Self {
            points,
            point_weights,
            pyramid,
            fine_codes,
            cloud_points: clouds,
            point_clouds,
        };
        tracing::info!(
            num_points,
            dim = heatspace.dim(),
            num_levels,
            num_cloud_types = heatspace.num_cloud_types(),
            pyramid_bytes = heatspace.pyramid_memory_bytes(),
            "Built embedding heatspace"
        );
        Ok(heatspace)
    }

    pub fn dim(&self) -> usize {
        self.points.dim()
    }

    pub fn num_points(&self) -> usize {
        self.points.num_rows()
    }

    pub fn num_resolution_levels(&self) -> usize {
        self.pyramid.len()
    }

    pub fn pyramid_level(&self, level: usize) -> Option<&PyramidLevel> {
        self.pyramid.get(level)
    }

    pub fn pyramid_memory_bytes(&self) -> usize {
        self.pyramid.iter().map(PyramidLevel::memory_bytes).sum()
    }

    /// The unit-normed embedding of `point_id`.
    pub fn point(&self, point_id: PointId) -> Option<&[f32]> {
        self.points.get_row(point_id as usize)
    }

    pub fn point_weight(&self, point_id: PointId) -> Option<f32> {
        self.point_weights.get(point_id as usize).copied()
    }

    pub fn fine_codes(&self, point_id: PointId) -> Option<&[u128]> {
        self.fine_codes.get(point_id as usize).map(Vec::as_slice)
    }

    pub fn num_cloud_types(&self) -> usize {
        self.cloud_points.len()
    }

    pub fn num_clouds(&self, cloud_type: CloudType) -> Option<usize> {
        self.cloud_points.get(cloud_type as usize).map(Vec::len)
    }

    pub fn cloud_points(&self, cloud_type: CloudType, cloud_id: CloudId) -> Option<&[(f32, PointId)]> {
        self.cloud_points
            .get(cloud_type as usize)?
            .get(cloud_id as usize)
            .map(Vec::as_slice)
    }

    pub fn point_clouds(&self, cloud_type: CloudType, point_id: PointId) -> Option<&[(f32, CloudId)]> {
        self.point_clouds
            .get(cloud_type as usize)?
            .get(point_id as usize)
            .map(Vec::as_slice)
    }

    /// Total membership weight of every cloud of `cloud_type`.
    pub fn cloud_mass(&self, cloud_type: CloudType) -> Option<f64> {
        self.cloud_points.get(cloud_type as usize).map(|clouds| {
            clouds
                .iter()
                .flatten()
                .map(|(weight, _)| *weight as f64)
                .sum()
        })
    }

    /// Total membership weight of `cloud_type`, summed over points. Always
    /// equals [`Self::cloud_mass`] up to float rounding.
    pub fn membership_mass(&self, cloud_type: CloudType) -> Option<f64> {
        self.point_clouds.get(cloud_type as usize).map(|points| {
            points
                .iter()
                .flatten()
                .map(|(weight, _)| *weight as f64)
                .sum()
        })
    }
}

fn validate_clouds(clouds: &[Vec<CloudPoints>], num_points: usize) -> Result<(), HeatspaceInitError> {
    for (cloud_type, clouds_of_type) in clouds.iter().enumerate() {
        for (cloud_id, members) in clouds_of_type.iter().enumerate() {
            for &(weight, point_id) in members {
                if point_id as usize >= num_points {
                    return Err(HeatspaceInitError::BadCloudPoint {
                        cloud_type: cloud_type as CloudType,
                        cloud_id: cloud_id as CloudId,
                        point_id,
                    });
                }
                if !weight.is_finite() {
                    return Err(HeatspaceInitError::BadMembershipWeight {
                        cloud_type: cloud_type as CloudType,
                        cloud_id: cloud_id as CloudId,
                        weight,
                    });
                }
            }
        }
    }
    Ok(())
}

/// Derives cloud type -> point -> memberships from cloud type -> cloud -> members.
fn transpose_clouds(clouds: &[Vec<CloudPoints>], num_points: usize) -> Vec<Vec<PointCloudMemberships>> {
    clouds
        .iter()
        .map(|clouds_of_type| {
            let mut memberships = vec![PointCloudMemberships::new(); num_points];
            for (cloud_id, members) in clouds_of_type.iter().enumerate() {
                for &(weight, point_id) in members {
                    memberships[point_id as usize].push((weight, cloud_id as CloudId));
                }
            }
            memberships
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> HeatspaceConfig {
        HeatspaceConfig {
            seed: Some(17),
            ..Default::default()
        }
    }

    fn random_points(n: usize, dim: usize, seed: u64) -> EmbeddingMatrix {
        use rand::Rng;
        let mut rng = StdRng::seed_from_u64(seed);
        let data = (0..n * dim).map(|_| rng.gen_range(-1.0..1.0)).collect();
        EmbeddingMatrix::from_flat(data, dim).unwrap()
    }

    #[test]
    fn test_single_point_single_cloud() {
        let points = EmbeddingMatrix::from_rows(&[vec![3.0, 4.0, 0.0, 0.0]], 0).unwrap();
        let clouds = vec![vec![vec![(1.0, 0)]]];
        let heatspace = EmbeddingHeatspace::init(points, vec![1.0], clouds, &test_config()).unwrap();

        assert_eq!(heatspace.dim(), 4);
        assert_eq!(heatspace.num_points(), 1);
        assert_eq!(heatspace.num_resolution_levels(), 1);
        assert_eq!(heatspace.num_cloud_types(), 1);
        assert_eq!(heatspace.num_clouds(0), Some(1));
        assert_eq!(heatspace.cloud_points(0, 0), Some(&[(1.0, 0)][..]));
        assert_eq!(heatspace.point_clouds(0, 0), Some(&[(1.0, 0)][..]));
        assert_eq!(heatspace.cloud_mass(0), heatspace.membership_mass(0));

        let point = heatspace.point(0).unwrap();
        assert!((point[0] - 0.6).abs() < 1e-6);
        assert!((point[1] - 0.8).abs() < 1e-6);
        assert_eq!(heatspace.point_weight(0), Some(1.0));
        assert_eq!(heatspace.point(1), None);
    }

    #[test]
    fn test_pyramid_holds_every_copy() {
        let config = test_config();
        let heatspace =
            EmbeddingHeatspace::init(random_points(200, 16, 1), vec![1.0; 200], vec![], &config).unwrap();

        // 200 * 4 / 4 = 200 slots -> 8 bits -> 2 levels.
        assert_eq!(heatspace.num_resolution_levels(), 2);
        for l in 0..heatspace.num_resolution_levels() {
            let level = heatspace.pyramid_level(l).unwrap();
            assert_eq!(level.num_bits(), 4 * (l as u32 + 1));
            assert_eq!(
                level.counts().total().unwrap(),
                200 * config.pyramid_qz_per_point as u64
            );
        }
        assert!(heatspace.pyramid_level(2).is_none());
        for id in 0..200 {
            assert_eq!(
                heatspace.fine_codes(id).unwrap().len(),
                config.u128_per_point as usize
            );
        }
        assert!(heatspace.pyramid_memory_bytes() >= 16 + 256);
    }

    #[test]
    fn test_every_point_is_in_its_buckets() {
        let heatspace =
            EmbeddingHeatspace::init(random_points(50, 8, 2), vec![1.0; 50], vec![], &test_config()).unwrap();
        let level = heatspace.pyramid_level(0).unwrap();
        let mut seen = vec![false; 50];
        for code in 0..level.num_buckets() as u32 {
            let ids = level.points(code);
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            assert!(ids.len() as u64 <= level.count(code));
            for &id in ids {
                seen[id as usize] = true;
            }
        }
        assert!(seen.into_iter().all(|s| s));
    }

    #[test]
    fn test_seeded_build_is_reproducible() {
        let a = EmbeddingHeatspace::init(random_points(20, 32, 3), vec![1.0; 20], vec![], &test_config()).unwrap();
        let b = EmbeddingHeatspace::init(random_points(20, 32, 3), vec![1.0; 20], vec![], &test_config()).unwrap();
        for id in 0..20 {
            assert_eq!(a.fine_codes(id), b.fine_codes(id));
        }
        let (la, lb) = (a.pyramid_level(0).unwrap(), b.pyramid_level(0).unwrap());
        for code in 0..16 {
            assert_eq!(la.count(code), lb.count(code));
        }
    }

    #[test]
    fn test_fine_codes_come_from_rotated_point() {
        // Without rotation or noise every retained code is the exact code of the point.
        let config = HeatspaceConfig {
            rotation_sigma: 0.0,
            quantization_noise: 0.0,
            ..test_config()
        };
        let points = random_points(5, 128, 4);
        let heatspace = EmbeddingHeatspace::init(points.clone(), vec![1.0; 5], vec![], &config).unwrap();
        let normalized = points.normalized();
        for id in 0..5u32 {
            let exact: u128 =
                crate::quantization::quantize_embedding_exact(normalized.row(id as usize), 128).unwrap();
            assert!(heatspace.fine_codes(id).unwrap().iter().all(|code| *code == exact));
        }
    }

    #[test]
    fn test_cloud_tables_are_transposes() {
        let clouds = vec![
            vec![vec![(1.0, 0), (2.5, 3)], vec![(0.5, 3)], vec![]],
            vec![vec![(4.0, 1), (1.0, 2), (1.0, 4)]],
        ];
        let heatspace =
            EmbeddingHeatspace::init(random_points(5, 8, 5), vec![1.0; 5], clouds, &test_config()).unwrap();

        assert_eq!(heatspace.num_cloud_types(), 2);
        assert_eq!(heatspace.num_clouds(0), Some(3));
        assert_eq!(heatspace.num_clouds(2), None);
        assert_eq!(heatspace.point_clouds(0, 3), Some(&[(2.5, 0), (0.5, 1)][..]));
        assert_eq!(heatspace.point_clouds(0, 1), Some(&[][..]));
        assert_eq!(heatspace.point_clouds(1, 1), Some(&[(4.0, 0)][..]));
        assert_eq!(heatspace.cloud_points(0, 2), Some(&[][..]));
        assert_eq!(heatspace.cloud_points(0, 3), None);

        for cloud_type in 0..2 {
            let forward = heatspace.cloud_mass(cloud_type).unwrap();
            let backward = heatspace.membership_mass(cloud_type).unwrap();
            assert!((forward - backward).abs() < 1e-9);
        }
        assert_eq!(heatspace.cloud_mass(0), Some(4.0));
        assert_eq!(heatspace.cloud_mass(2), None);
    }

    #[test]
    fn test_init_rejects_bad_input() {
        let err = EmbeddingHeatspace::init(random_points(3, 4, 6), vec![1.0; 2], vec![], &test_config())
            .unwrap_err();
        assert!(matches!(
            err,
            HeatspaceInitError::PointsWeightsMismatch {
                points: 3,
                weights: 2
            }
        ));

        let err = EmbeddingHeatspace::init(
            random_points(3, 4, 6),
            vec![1.0, 0.0, 1.0],
            vec![],
            &test_config(),
        )
        .unwrap_err();
        assert!(matches!(err, HeatspaceInitError::BadPointWeight { point: 1, .. }));

        let err = EmbeddingHeatspace::init(
            random_points(3, 4, 6),
            vec![1.0; 3],
            vec![vec![vec![(1.0, 0)], vec![(1.0, 3)]]],
            &test_config(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            HeatspaceInitError::BadCloudPoint {
                cloud_type: 0,
                cloud_id: 1,
                point_id: 3
            }
        ));
        assert_eq!(err.code(), ErrorCodes::InvalidArgument);

        let config = HeatspaceConfig {
            pyramid_qz_per_point: 0,
            ..test_config()
        };
        let err = EmbeddingHeatspace::init(random_points(3, 4, 6), vec![1.0; 3], vec![], &config).unwrap_err();
        assert!(matches!(err, HeatspaceInitError::InvalidConfig(_)));
    }

    #[test]
    fn test_empty_index() {
        let points = EmbeddingMatrix::from_rows(&[], 8).unwrap();
        let heatspace = EmbeddingHeatspace::init(points, vec![], vec![vec![]], &test_config()).unwrap();
        assert_eq!(heatspace.num_points(), 0);
        assert_eq!(heatspace.num_resolution_levels(), 1);
        assert_eq!(heatspace.cloud_mass(0), Some(0.0));
    }
}
