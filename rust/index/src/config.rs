use crate::heatspace::CloudType;
use figment::providers::{Env, Format, Yaml};
use heatspace_error::{ErrorCodes, HeatspaceError, HeatspaceValidationError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const DEFAULT_CONFIG_PATH: &str = "./heatspace_config.yaml";
const ENV_PREFIX: &str = "HEATSPACE_";

/// Level codes are `u32` and the finest level must stay addressable in memory.
pub const MAX_RESOLUTION_LEVELS: u32 = 7;

pub fn default_pyramid_qz_per_point() -> u32 {
    4
}

pub fn default_rotation_sigma() -> f32 {
    0.1
}

pub fn default_quantization_noise() -> f32 {
    0.05
}

pub fn default_target_points_per_bucket() -> f32 {
    4.0
}

pub fn default_u128_per_point() -> u32 {
    4
}

pub fn default_max_resolution_levels() -> u32 {
    6
}

pub fn default_lookups_per_thread() -> u32 {
    8
}

pub fn default_points_per_lookup() -> u32 {
    32
}

pub fn default_num_results() -> u32 {
    30
}

fn validate_sigma(sigma: f32) -> Result<(), HeatspaceValidationError> {
    if !sigma.is_finite() || sigma < 0.0 {
        return Err(HeatspaceValidationError::new(
            "rotation_sigma",
            format!("must be finite and non-negative, got {sigma}"),
        ));
    }
    Ok(())
}

fn validate_noise(noise: f32) -> Result<(), HeatspaceValidationError> {
    if !(0.0..=1.0).contains(&noise) {
        return Err(HeatspaceValidationError::new(
            "quantization_noise",
            format!("must be in [0, 1], got {noise}"),
        ));
    }
    Ok(())
}

/// Build-time tuning of an [`crate::heatspace::EmbeddingHeatspace`].
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct HeatspaceConfig {
    /// How many rotated, quantized copies of each point go into every level
    /// of the pyramid. More copies give smoother density.
    #[serde(default = "default_pyramid_qz_per_point")]
    pub pyramid_qz_per_point: u32,
    /// Deviation of the Gaussian perturbation applied before quantization.
    #[serde(default = "default_rotation_sigma")]
    pub rotation_sigma: f32,
    /// Probability of flipping each quantized bit.
    #[serde(default = "default_quantization_noise")]
    pub quantization_noise: f32,
    /// Desired average occupancy of a bucket at the finest level. The level
    /// count is rounded so the real occupancy errs low.
    #[serde(default = "default_target_points_per_bucket")]
    pub target_points_per_bucket: f32,
    /// How many 128-bit codes to retain per point for candidate ranking.
    #[serde(default = "default_u128_per_point")]
    pub u128_per_point: u32,
    #[serde(default = "default_max_resolution_levels")]
    pub max_resolution_levels: u32,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for HeatspaceConfig {
    fn default() -> Self {
        Self {
            pyramid_qz_per_point: default_pyramid_qz_per_point(),
            rotation_sigma: default_rotation_sigma(),
            quantization_noise: default_quantization_noise(),
            target_points_per_bucket: default_target_points_per_bucket(),
            u128_per_point: default_u128_per_point(),
            max_resolution_levels: default_max_resolution_levels(),
            seed: None,
        }
    }
}

impl HeatspaceConfig {
    pub fn validate(&self) -> Result<(), HeatspaceValidationError> {
        if self.pyramid_qz_per_point == 0 {
            return Err(HeatspaceValidationError::new(
                "pyramid_qz_per_point",
                "must be at least 1",
            ));
        }
        validate_sigma(self.rotation_sigma)?;
        validate_noise(self.quantization_noise)?;
        if !self.target_points_per_bucket.is_finite() || self.target_points_per_bucket <= 0.0 {
            return Err(HeatspaceValidationError::new(
                "target_points_per_bucket",
                format!("must be positive, got {}", self.target_points_per_bucket),
            ));
        }
        if self.u128_per_point == 0 {
            return Err(HeatspaceValidationError::new(
                "u128_per_point",
                "must be at least 1",
            ));
        }
        if !(1..=MAX_RESOLUTION_LEVELS).contains(&self.max_resolution_levels) {
            return Err(HeatspaceValidationError::new(
                "max_resolution_levels",
                format!(
                    "must be in 1..={MAX_RESOLUTION_LEVELS}, got {}",
                    self.max_resolution_levels
                ),
            ));
        }
        Ok(())
    }
}

/// What a lookup returns IDs of.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultsType {
    #[default]
    Points,
    /// Clouds of the given type, reached through point memberships.
    Clouds(CloudType),
}

/// Order of the merged results before truncation.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ResultOrder {
    /// Heaviest first; truncation keeps the top results.
    #[default]
    Descending,
    /// Lightest first; truncation keeps the lowest-weight results.
    Ascending,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct LookupParams {
    /// Worker count, or 0 for the hardware concurrency.
    #[serde(default)]
    pub num_threads_or_zero: u32,
    #[serde(default = "default_rotation_sigma")]
    pub rotation_sigma: f32,
    #[serde(default = "default_quantization_noise")]
    pub quantization_noise: f32,
    /// Samples evaluated by each worker.
    #[serde(default = "default_lookups_per_thread")]
    pub lookups_per_thread: u32,
    /// Candidates kept per sample.
    #[serde(default = "default_points_per_lookup")]
    pub points_per_lookup: u32,
    #[serde(default)]
    pub results_type: ResultsType,
    #[serde(default = "default_num_results")]
    pub num_results: u32,
    #[serde(default)]
    pub result_order: ResultOrder,
    /// Seeds every worker's random source when set.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for LookupParams {
    fn default() -> Self {
        Self {
            num_threads_or_zero: 0,
            rotation_sigma: default_rotation_sigma(),
            quantization_noise: default_quantization_noise(),
            lookups_per_thread: default_lookups_per_thread(),
            points_per_lookup: default_points_per_lookup(),
            results_type: ResultsType::default(),
            num_results: default_num_results(),
            result_order: ResultOrder::default(),
            seed: None,
        }
    }
}

impl LookupParams {
    pub fn num_threads(&self) -> usize {
        match self.num_threads_or_zero {
            0 => num_cpus::get(),
            n => n as usize,
        }
    }

    pub fn validate(&self) -> Result<(), HeatspaceValidationError> {
        validate_sigma(self.rotation_sigma)?;
        validate_noise(self.quantization_noise)?;
        if self.lookups_per_thread == 0 {
            return Err(HeatspaceValidationError::new(
                "lookups_per_thread",
                "must be at least 1",
            ));
        }
        if self.points_per_lookup == 0 {
            return Err(HeatspaceValidationError::new(
                "points_per_lookup",
                "must be at least 1",
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Error)]
pub enum HeatspaceConfigError {
    #[error("Error loading config: {0}")]
    Figment(#[from] Box<figment::Error>),
    #[error(transparent)]
    Validation(#[from] HeatspaceValidationError),
}

impl HeatspaceError for HeatspaceConfigError {
    fn code(&self) -> ErrorCodes {
        ErrorCodes::InvalidArgument
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
/// # Description
/// The root config for a host embedding a heatspace index. It is a YAML file
/// whose fields can be overridden from environment variables prefixed with
/// HEATSPACE_, using `__` between nesting levels, e.g. HEATSPACE_BUILD__SEED.
/// Values in the environment take precedence over values in the YAML file.
/// Missing fields take their defaults.
pub struct RootConfig {
    #[serde(default)]
    pub build: HeatspaceConfig,
    #[serde(default)]
    pub lookup: LookupParams,
}

impl RootConfig {
    /// Load the config from ./heatspace_config.yaml, if present, and the environment.
    pub fn load() -> Result<Self, HeatspaceConfigError> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    /// Load the config from `path`, if it exists, merged under the environment.
    pub fn load_from_path(path: &str) -> Result<Self, HeatspaceConfigError> {
        // Figment splits nested keys on `.`, so map the `__` separator onto it.
        let mut f = figment::Figment::from(
            Env::prefixed(ENV_PREFIX).map(|k| k.as_str().replace("__", ".").into()),
        );
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        let config: RootConfig = f.extract().map_err(Box::new)?;
        config.build.validate()?;
        config.lookup.validate()?;
        tracing::debug!(path, ?config, "Loaded heatspace config");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use serial_test::serial;

    #[test]
    fn test_defaults_validate() {
        assert!(HeatspaceConfig::default().validate().is_ok());
        assert!(LookupParams::default().validate().is_ok());
        assert_eq!(LookupParams::default().num_results, 30);
        assert_eq!(LookupParams::default().result_order, ResultOrder::Descending);
    }

    #[test]
    fn test_invalid_build_config() {
        let config = HeatspaceConfig {
            quantization_noise: 1.5,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "quantization_noise");

        let config = HeatspaceConfig {
            max_resolution_levels: 8,
            ..Default::default()
        };
        assert_eq!(
            config.validate().unwrap_err().field,
            "max_resolution_levels"
        );

        let config = HeatspaceConfig {
            target_points_per_bucket: 0.0,
            ..Default::default()
        };
        assert!(config.validate().is_err());

        let config = HeatspaceConfig {
            rotation_sigma: f32::NAN,
            ..Default::default()
        };
        assert_eq!(config.validate().unwrap_err().field, "rotation_sigma");
    }

    #[test]
    fn test_invalid_lookup_params() {
        let params = LookupParams {
            lookups_per_thread: 0,
            ..Default::default()
        };
        assert_eq!(params.validate().unwrap_err().field, "lookups_per_thread");
    }

    #[test]
    fn test_num_threads() {
        let params = LookupParams {
            num_threads_or_zero: 3,
            ..Default::default()
        };
        assert_eq!(params.num_threads(), 3);
        assert!(LookupParams::default().num_threads() >= 1);
    }

    #[test]
    #[serial]
    fn test_config_from_yaml_and_env() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "heatspace_config.yaml",
                r#"
                build:
                    pyramid_qz_per_point: 8
                    target_points_per_bucket: 2.5
                    seed: 11
                lookup:
                    num_threads_or_zero: 2
                    results_type:
                        clouds: 1
                    result_order: ascending
                "#,
            )?;
            jail.set_env("HEATSPACE_BUILD__SEED", 42);
            jail.set_env("HEATSPACE_LOOKUP__NUM_RESULTS", 5);

            let config = RootConfig::load().expect("config should load");
            assert_eq!(config.build.pyramid_qz_per_point, 8);
            assert_eq!(config.build.target_points_per_bucket, 2.5);
            assert_eq!(config.build.seed, Some(42));
            assert_eq!(config.build.u128_per_point, 4);
            assert_eq!(config.lookup.num_threads_or_zero, 2);
            assert_eq!(config.lookup.results_type, ResultsType::Clouds(1));
            assert_eq!(config.lookup.result_order, ResultOrder::Ascending);
            assert_eq!(config.lookup.num_results, 5);
            assert_eq!(config.lookup.points_per_lookup, 32);
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_config_defaults_without_file() {
        Jail::expect_with(|_jail| {
            let config = RootConfig::load_from_path("missing.yaml").expect("config should load");
            assert_eq!(config, RootConfig::default());
            Ok(())
        });
    }

    #[test]
    #[serial]
    fn test_config_rejects_invalid_values() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "heatspace_config.yaml",
                r#"
                build:
                    quantization_noise: 2.0
                "#,
            )?;
            let err = RootConfig::load().unwrap_err();
            assert!(matches!(err, HeatspaceConfigError::Validation(_)));
            assert_eq!(err.code(), ErrorCodes::InvalidArgument);
            Ok(())
        });
    }
}
