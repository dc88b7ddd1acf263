//! Service configuration
//!
//! Loaded from a versioned YAML file, then overridden from the
//! environment, then validated:
//!
//! ```yaml
//! version: 1
//! engine:
//!   port: 5435
//!   working_dir: /opt/noisemodelling
//! propagation:
//!   max_prop_distance: 750
//! cache:
//!   backend: sqlite
//!   path: /var/lib/noise/cache.sqlite
//! workers:
//!   concurrency: 10
//! ```

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const SUPPORTED_VERSIONS: &[u32] = &[1];

/// Configuration error type
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid range for field '{field}': {value} not in {min}..={max}. {hint}")]
    Range {
        field: String,
        value: String,
        min: String,
        max: String,
        hint: String,
    },

    #[error("Missing 'version' field in configuration file. Add 'version: 1' to the top of your YAML file.")]
    MissingVersion,

    #[error("Unsupported configuration version {found}. Supported versions: {}", supported.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(", "))]
    UnsupportedVersion { found: u32, supported: Vec<u32> },

    #[error("Invalid value '{value}' for environment variable {var}")]
    Env { var: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

impl ConfigError {
    pub fn range_with_hint(
        field: impl Into<String>,
        value: impl ToString,
        min: impl ToString,
        max: impl ToString,
        hint: impl Into<String>,
    ) -> Self {
        Self::Range {
            field: field.into(),
            value: value.to_string(),
            min: min.to_string(),
            max: max.to_string(),
            hint: hint.into(),
        }
    }
}

fn check_range<T>(field: &str, value: T, min: T, max: T, hint: &str) -> ConfigResult<()>
where
    T: PartialOrd + ToString,
{
    if value < min || value > max {
        return Err(ConfigError::range_with_hint(field, value, min, max, hint));
    }
    Ok(())
}

/// Engine process and connection settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct EngineConfig {
    pub program: String,
    pub args: Vec<String>,
    /// Directory holding the engine jars
    pub working_dir: PathBuf,
    /// Engine stdout is appended here
    pub log_file: PathBuf,
    pub host: String,
    pub port: u16,
    /// Database name; relative paths are made absolute at connect time
    pub database: PathBuf,
    pub user: String,
    pub password: String,
    pub boot_delay_ms: u64,
    pub connect_backoff_ms: u64,
    pub max_connect_attempts: u32,
    /// Per-stage timeout
    pub stage_timeout_ms: u64,
    /// Where the engine writes the exported GeoJSON
    pub export_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            program: "java".to_string(),
            args: vec![
                "-cp".to_string(),
                "bin/*:bundle/*:sys-bundle/*".to_string(),
                "org.h2.tools.Server".to_string(),
                "-pg".to_string(),
                "-trace".to_string(),
            ],
            working_dir: PathBuf::from("orbisgis_java"),
            log_file: PathBuf::from("log.txt"),
            host: "localhost".to_string(),
            port: 5435,
            database: PathBuf::from("mydb"),
            user: "sa".to_string(),
            password: "sa".to_string(),
            boot_delay_ms: 2_000,
            connect_backoff_ms: 5_000,
            max_connect_attempts: 5,
            stage_timeout_ms: 600_000,
            export_dir: std::env::temp_dir().join("noise-results"),
        }
    }
}

/// Resolve a configured path against the service's working directory
///
/// The engine runs in `engine.working_dir`, so any path both sides use
/// must be absolute before it is handed over.
pub fn absolute_path(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(path.to_path_buf())
    } else {
        Ok(std::env::current_dir()?.join(path))
    }
}

impl EngineConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.program.trim().is_empty() {
            return Err(ConfigError::Validation(
                "engine.program must not be empty".to_string(),
            ));
        }
        check_range(
            "engine.max_connect_attempts",
            self.max_connect_attempts,
            1,
            100,
            "The engine needs at least one connection attempt",
        )?;
        check_range(
            "engine.stage_timeout_ms",
            self.stage_timeout_ms,
            1_000,
            86_400_000,
            "Stage timeout must be between one second and one day",
        )?;
        if self.port == 0 {
            return Err(ConfigError::range_with_hint(
                "engine.port",
                self.port,
                1,
                u16::MAX,
                "Port 0 cannot be connected to",
            ));
        }
        Ok(())
    }
}

/// Sound propagation parameters for the triangle grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PropagationConfig {
    pub max_prop_distance: f64,
    pub max_wall_seeking_distance: f64,
    pub road_width: f64,
    pub receiver_densification: f64,
    pub max_triangle_area: f64,
    pub sound_reflection_order: u32,
    pub sound_diffraction_order: u32,
    pub wall_absorption: f64,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            max_prop_distance: 750.0,
            max_wall_seeking_distance: 50.0,
            road_width: 1.5,
            receiver_densification: 2.8,
            max_triangle_area: 275.0,
            sound_reflection_order: 0,
            sound_diffraction_order: 0,
            wall_absorption: 0.23,
        }
    }
}

impl PropagationConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_range(
            "propagation.max_prop_distance",
            self.max_prop_distance,
            1.0,
            10_000.0,
            "Propagation distance is in metres",
        )?;
        check_range(
            "propagation.max_wall_seeking_distance",
            self.max_wall_seeking_distance,
            0.0,
            self.max_prop_distance,
            "Wall seeking cannot reach beyond the propagation distance",
        )?;
        check_range(
            "propagation.road_width",
            self.road_width,
            0.0,
            100.0,
            "Road width is in metres",
        )?;
        check_range(
            "propagation.max_triangle_area",
            self.max_triangle_area,
            1.0,
            1_000_000.0,
            "Triangle area is in square metres",
        )?;
        check_range(
            "propagation.sound_reflection_order",
            self.sound_reflection_order,
            0,
            10,
            "Higher reflection orders grow the computation exponentially",
        )?;
        check_range(
            "propagation.sound_diffraction_order",
            self.sound_diffraction_order,
            0,
            10,
            "Higher diffraction orders grow the computation exponentially",
        )?;
        check_range(
            "propagation.wall_absorption",
            self.wall_absorption,
            0.0,
            1.0,
            "Absorption is a coefficient",
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct CacheConfig {
    pub backend: CacheBackend,
    /// SQLite file (sqlite backend only)
    pub path: PathBuf,
    pub key_prefix: String,
    /// 0 disables expiry
    pub ttl_days: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::Memory,
            path: PathBuf::from("noise-cache.sqlite"),
            key_prefix: "noise_simulations".to_string(),
            ttl_days: 30,
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_range(
            "cache.ttl_days",
            self.ttl_days,
            0,
            3_650,
            "Use 0 to keep entries forever",
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct WorkersConfig {
    /// Jobs executing at the same time
    pub concurrency: usize,
    /// Threads used for geometry normalization
    pub normalize_threads: usize,
}

impl Default for WorkersConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            normalize_threads: num_cpus::get(),
        }
    }
}

impl WorkersConfig {
    pub fn validate(&self) -> ConfigResult<()> {
        check_range(
            "workers.concurrency",
            self.concurrency,
            1,
            1_024,
            "Each concurrent job owns one engine process",
        )?;
        check_range(
            "workers.normalize_threads",
            self.normalize_threads,
            1,
            1_024,
            "At least one normalization thread is needed",
        )
    }
}

/// YAML schema v1
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFileV1 {
    version: Option<u32>,
    #[serde(default)]
    engine: EngineConfig,
    #[serde(default)]
    propagation: PropagationConfig,
    #[serde(default)]
    cache: CacheConfig,
    #[serde(default)]
    workers: WorkersConfig,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct NoiseConfig {
    pub engine: EngineConfig,
    pub propagation: PropagationConfig,
    pub cache: CacheConfig,
    pub workers: WorkersConfig,
}

impl NoiseConfig {
    /// Load, apply process environment overrides and validate
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let mut config = Self::from_yaml(path)?;
        config.apply_env_from(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_yaml(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn from_yaml_str(content: &str) -> ConfigResult<Self> {
        let file: ConfigFileV1 = serde_yaml::from_str(content)?;

        match file.version {
            None => return Err(ConfigError::MissingVersion),
            Some(found) if !SUPPORTED_VERSIONS.contains(&found) => {
                return Err(ConfigError::UnsupportedVersion {
                    found,
                    supported: SUPPORTED_VERSIONS.to_vec(),
                })
            }
            Some(_) => {}
        }

        Ok(Self {
            engine: file.engine,
            propagation: file.propagation,
            cache: file.cache,
            workers: file.workers,
        })
    }

    /// Apply `NOISE_*` overrides read through `lookup`
    pub fn apply_env_from<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        fn parsed<T: std::str::FromStr>(var: &'static str, value: String) -> ConfigResult<T> {
            value
                .trim()
                .parse()
                .map_err(|_| ConfigError::Env { var, value })
        }

        if let Some(host) = lookup("NOISE_ENGINE_HOST") {
            self.engine.host = host;
        }
        if let Some(port) = lookup("NOISE_ENGINE_PORT") {
            self.engine.port = parsed("NOISE_ENGINE_PORT", port)?;
        }
        if let Some(concurrency) = lookup("NOISE_WORKER_CONCURRENCY") {
            self.workers.concurrency = parsed("NOISE_WORKER_CONCURRENCY", concurrency)?;
        }
        if let Some(ttl) = lookup("NOISE_CACHE_TTL_DAYS") {
            self.cache.ttl_days = parsed("NOISE_CACHE_TTL_DAYS", ttl)?;
        }
        if let Some(path) = lookup("NOISE_CACHE_PATH") {
            self.cache.path = PathBuf::from(path);
            self.cache.backend = CacheBackend::Sqlite;
        }
        Ok(())
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.engine.validate()?;
        self.propagation.validate()?;
        self.cache.validate()?;
        self.workers.validate()
    }
}
