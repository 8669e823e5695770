use crate::catalog::CatalogConfig;
use crate::indices::objective::Objective;
use crate::isres::IsresSettings;
use crate::seeding::SeedStrategy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read or write config file: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Failed to parse TOML config file: {0}")]
    TomlParseError(#[from] toml::de::Error),
    #[error("Failed to serialize config to TOML format: {0}")]
    TomlSerializeError(#[from] toml::ser::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Settings for one rotation procedure, loadable from TOML.
///
/// Every field has a default, so a config file only needs the values it changes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RotationConfig {
    pub objective: Objective,
    /// Wall-clock budget of the free-form search. Zero or negative skips the search.
    pub max_time_secs: f64,
    pub seed: u64,
    pub search_enabled: bool,
    pub population_factor: usize,
    pub bounds: (f64, f64),
    pub constraint_tolerance: f64,
    pub seed_strategy: SeedStrategy,
    /// Optional cap on search generations, mostly for reproducible runs.
    pub max_generations: Option<usize>,
    pub catalog: CatalogConfig,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            objective: Objective::Agreement,
            max_time_secs: 300.0,
            seed: 1,
            search_enabled: true,
            population_factor: 200,
            bounds: (-1.0, 1.0),
            constraint_tolerance: 1e-3,
            seed_strategy: SeedStrategy::Light,
            max_generations: None,
            catalog: CatalogConfig::default(),
        }
    }
}

impl RotationConfig {
    /// Rejects settings the search cannot run with.
    ///
    /// The bounds must contain `[-1, 1]`, since the reflection parameters are constrained to
    /// `±1` and the identity seed lies on that boundary.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let (lo, hi) = self.bounds;
        if !(lo.is_finite() && hi.is_finite()) || lo > -1.0 || hi < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "bounds ({lo}, {hi}) must be finite and contain [-1, 1]"
            )));
        }
        if self.population_factor == 0 {
            return Err(ConfigError::Invalid(
                "population_factor must be at least 1".to_string(),
            ));
        }
        if !(self.constraint_tolerance >= 0.0) {
            return Err(ConfigError::Invalid(
                "constraint_tolerance must be a non-negative number".to_string(),
            ));
        }
        if self.max_time_secs.is_nan() {
            return Err(ConfigError::Invalid("max_time_secs is not a number".to_string()));
        }
        if self.catalog.max_iter == 0 || !(self.catalog.tol > 0.0) {
            return Err(ConfigError::Invalid(
                "catalog max_iter and tol must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether the free-form family takes part in the tournament.
    pub fn runs_search(&self) -> bool {
        self.search_enabled && self.max_time_secs > 0.0
    }

    pub fn isres_settings(&self) -> IsresSettings {
        let max_time = if self.max_time_secs > 0.0 {
            Duration::try_from_secs_f64(self.max_time_secs).unwrap_or(Duration::MAX)
        } else {
            Duration::ZERO
        };
        IsresSettings {
            population_factor: self.population_factor,
            bounds: self.bounds,
            constraint_tolerance: self.constraint_tolerance,
            max_time,
            seed: self.seed,
            seed_strategy: self.seed_strategy,
            max_generations: self.max_generations,
        }
    }

    /// Saves the config to a TOML file.
    pub fn save(&self, path: &str) -> Result<(), ConfigError> {
        let toml_string = toml::to_string_pretty(self)?;
        let mut file = BufWriter::new(fs::File::create(path)?);
        file.write_all(toml_string.as_bytes())?;
        Ok(())
    }

    /// Loads and validates a config from a TOML file.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let toml_string = fs::read_to_string(path)?;
        let config: RotationConfig = toml::from_str(&toml_string)?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("rotation.toml");
        let path = path.to_str().unwrap();

        let config = RotationConfig {
            objective: Objective::CompositeV,
            max_time_secs: 12.5,
            seed: 99,
            seed_strategy: SeedStrategy::Exhaustive,
            max_generations: Some(40),
            ..RotationConfig::default()
        };
        config.save(path).unwrap();
        let loaded = RotationConfig::load(path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        fs::write(&path, "objective = \"overall\"\nseed = 5\n\n[catalog]\nnormalize = false\n")
            .unwrap();
        let loaded = RotationConfig::load(path.to_str().unwrap()).unwrap();
        assert_eq!(loaded.objective, Objective::Overall);
        assert_eq!(loaded.seed, 5);
        assert!(!loaded.catalog.normalize);
        assert_eq!(loaded.catalog.max_iter, 500);
        assert_eq!(loaded.max_time_secs, 300.0);
    }

    #[test]
    fn narrow_bounds_are_rejected() {
        let config = RotationConfig {
            bounds: (-0.5, 0.5),
            ..RotationConfig::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn non_positive_budget_disables_search() {
        let mut config = RotationConfig::default();
        assert!(config.runs_search());
        config.max_time_secs = 0.0;
        assert!(!config.runs_search());
        assert_eq!(config.isres_settings().max_time, Duration::ZERO);
        config.max_time_secs = -3.0;
        assert!(!config.runs_search());
    }
}
