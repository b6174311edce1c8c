//! Layered resolution with bounded-interval hot reload.

use super::{AdvisoryConfig, ConfigFile, EnvVars, env_layer};
use crate::Result;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

/// Locations of the file layers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigPaths {
    /// Versioned baseline file.
    pub baseline: Option<PathBuf>,
    /// Operator override file.
    pub overrides: Option<PathBuf>,
}

impl ConfigPaths {
    /// Uses `baseline.toml` and `overrides.toml` inside `dir`.
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            baseline: Some(dir.join("baseline.toml")),
            overrides: Some(dir.join("overrides.toml")),
        }
    }

    /// Uses the platform configuration directory (`~/.config/advisory` on Linux).
    ///
    /// Returns empty paths if no home directory can be determined.
    #[must_use]
    pub fn discover() -> Self {
        directories::ProjectDirs::from("", "", "advisory")
            .map(|dirs| Self::in_dir(dirs.config_dir()))
            .unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
struct Layers {
    baseline: Option<ConfigFile>,
    overrides: Option<ConfigFile>,
    env: Option<ConfigFile>,
}

impl Layers {
    fn compose(&self) -> AdvisoryConfig {
        let mut config = AdvisoryConfig::default();
        for layer in [&self.baseline, &self.overrides, &self.env]
            .into_iter()
            .flatten()
        {
            layer.apply(&mut config);
        }
        config
    }
}

#[derive(Debug)]
struct ResolverState {
    snapshot: Arc<AdvisoryConfig>,
    layers: Layers,
    resolved_at: Instant,
    generation: u64,
}

/// Resolves and periodically re-resolves the configuration.
///
/// Each call to [`snapshot`](Self::snapshot) returns an immutable
/// [`AdvisoryConfig`]; callers hold it for the duration of one operation.
#[derive(Debug)]
pub struct ConfigResolver {
    paths: ConfigPaths,
    env: EnvVars,
    interval: Duration,
    pinned: bool,
    state: RwLock<ResolverState>,
}

impl ConfigResolver {
    /// Resolves the configuration at startup.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::ConfigResolution`] if the baseline exists but is
    /// malformed or carries an unsupported version. Malformed override and env
    /// layers are skipped with a warning.
    pub fn bootstrap(paths: ConfigPaths, env: EnvVars) -> Result<Self> {
        let baseline = match &paths.baseline {
            Some(path) => {
                let file = ConfigFile::load("baseline", path)?;
                if let Some(file) = &file {
                    file.check_baseline_version()?;
                }
                file
            },
            None => None,
        };

        let overrides = match &paths.overrides {
            Some(path) => ConfigFile::load("overrides", path).unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Skipping malformed override layer");
                metrics::counter!("advisory_config_layer_errors_total", "layer" => "overrides")
                    .increment(1);
                None
            }),
            None => None,
        };

        let env_file = env_layer(&env).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Skipping malformed environment layer");
            metrics::counter!("advisory_config_layer_errors_total", "layer" => "env").increment(1);
            None
        });

        let layers = Layers {
            baseline,
            overrides,
            env: env_file,
        };
        let snapshot = Arc::new(layers.compose());
        let interval = Duration::from_secs(snapshot.reload_interval_secs.max(1));

        tracing::debug!(data_dir = %snapshot.data_dir.display(), "Configuration resolved");

        Ok(Self {
            paths,
            env,
            interval,
            pinned: false,
            state: RwLock::new(ResolverState {
                snapshot,
                layers,
                resolved_at: Instant::now(),
                generation: 1,
            }),
        })
    }

    /// Creates a resolver that always returns `config`.
    #[must_use]
    pub fn fixed(config: AdvisoryConfig) -> Self {
        Self {
            paths: ConfigPaths::default(),
            env: EnvVars::new(),
            interval: Duration::MAX,
            pinned: true,
            state: RwLock::new(ResolverState {
                snapshot: Arc::new(config),
                layers: Layers::default(),
                resolved_at: Instant::now(),
                generation: 1,
            }),
        }
    }

    /// Overrides the reload interval.
    #[must_use]
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Returns the current snapshot, re-resolving first if the interval elapsed.
    pub fn snapshot(&self) -> Arc<AdvisoryConfig> {
        {
            let state = self.state.read().unwrap_or_else(PoisonError::into_inner);
            if state.resolved_at.elapsed() < self.interval {
                return Arc::clone(&state.snapshot);
            }
        }
        self.reload()
    }

    /// Number of distinct snapshots published so far.
    pub fn generation(&self) -> u64 {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .generation
    }

    /// Re-resolves all layers now.
    ///
    /// A layer that fails to load keeps its last good value. Startup-critical
    /// keys (data directory, logging) keep their startup values.
    pub fn reload(&self) -> Arc<AdvisoryConfig> {
        let mut state = self.state.write().unwrap_or_else(PoisonError::into_inner);
        state.resolved_at = Instant::now();
        if self.pinned {
            return Arc::clone(&state.snapshot);
        }

        let mut layers = state.layers.clone();
        if let Some(path) = &self.paths.baseline {
            match ConfigFile::load("baseline", path)
                .and_then(|f| f.map(|f| f.check_baseline_version().map(|()| f)).transpose())
            {
                Ok(file) => layers.baseline = file,
                Err(e) => Self::keep_prior("baseline", &e),
            }
        }
        if let Some(path) = &self.paths.overrides {
            match ConfigFile::load("overrides", path) {
                Ok(file) => layers.overrides = file,
                Err(e) => Self::keep_prior("overrides", &e),
            }
        }
        match env_layer(&self.env) {
            Ok(file) => layers.env = file,
            Err(e) => Self::keep_prior("env", &e),
        }

        let mut next = layers.compose();
        next.data_dir.clone_from(&state.snapshot.data_dir);
        next.logging.clone_from(&state.snapshot.logging);
        state.layers = layers;

        if next != *state.snapshot {
            state.snapshot = Arc::new(next);
            state.generation += 1;
            tracing::info!(generation = state.generation, "Configuration reloaded");
            metrics::counter!("advisory_config_reloads_total").increment(1);
        }
        Arc::clone(&state.snapshot)
    }

    fn keep_prior(layer: &'static str, error: &crate::Error) {
        tracing::warn!(layer, error = %error, "Keeping prior configuration layer");
        metrics::counter!("advisory_config_layer_errors_total", "layer" => layer).increment(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use std::fs;

    fn write(path: &Path, contents: &str) {
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn test_defaults_without_files() {
        let resolver = ConfigResolver::bootstrap(ConfigPaths::default(), EnvVars::new()).unwrap();
        assert_eq!(*resolver.snapshot(), AdvisoryConfig::default());
    }

    #[test]
    fn test_layer_precedence() {
        let dir = tempfile::tempdir().unwrap();
        let paths = ConfigPaths::in_dir(dir.path());
        write(
            dir.path().join("baseline.toml").as_path(),
            "version = 1\n[gate]\nemission_budget = 3\ntool_cooldown_secs = 11\n[cache]\nttl_secs = 100\n",
        );
        write(
            dir.path().join("overrides.toml").as_path(),
            "[gate]\nemission_budget = 4\n",
        );
        let env = EnvVars::from_pairs([("ADVISORY_CACHE_TTL_SECS", "50")]);

        let resolver = ConfigResolver::bootstrap(paths, env).unwrap();
        let config = resolver.snapshot();
        assert_eq!(config.gate.emission_budget, 4);
        assert_eq!(config.gate.tool_cooldown_secs, 11);
        assert_eq!(config.cache.ttl_secs, 50);
    }

    #[test]
    fn test_malformed_baseline_is_fatal_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("baseline.toml").as_path(), "version = 1\n[gate\n");
        let err = ConfigResolver::bootstrap(ConfigPaths::in_dir(dir.path()), EnvVars::new())
            .unwrap_err();
        assert!(matches!(err, Error::ConfigResolution { .. }));
    }

    #[test]
    fn test_unversioned_baseline_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("baseline.toml").as_path(), "[gate]\nemission_budget = 1\n");
        assert!(
            ConfigResolver::bootstrap(ConfigPaths::in_dir(dir.path()), EnvVars::new()).is_err()
        );
    }

    #[test]
    fn test_malformed_overrides_skipped_at_startup() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path().join("overrides.toml").as_path(), "gate = [");
        let resolver =
            ConfigResolver::bootstrap(ConfigPaths::in_dir(dir.path()), EnvVars::new()).unwrap();
        assert_eq!(resolver.snapshot().gate.emission_budget, 2);
    }

    #[test]
    fn test_reload_picks_up_changes_and_keeps_prior_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = dir.path().join("overrides.toml");
        write(&overrides, "[gate]\nemission_budget = 3\n");

        let resolver = ConfigResolver::bootstrap(ConfigPaths::in_dir(dir.path()), EnvVars::new())
            .unwrap()
            .with_interval(Duration::ZERO);
        assert_eq!(resolver.snapshot().gate.emission_budget, 3);
        let first_generation = resolver.generation();

        write(&overrides, "[gate]\nemission_budget = 5\n");
        assert_eq!(resolver.snapshot().gate.emission_budget, 5);
        assert!(resolver.generation() > first_generation);

        write(&overrides, "[gate\nbroken");
        assert_eq!(resolver.snapshot().gate.emission_budget, 5);
    }

    #[test]
    fn test_reload_never_changes_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        let overrides = dir.path().join("overrides.toml");
        write(&overrides, "data_dir = \"/first\"\n");

        let resolver = ConfigResolver::bootstrap(ConfigPaths::in_dir(dir.path()), EnvVars::new())
            .unwrap()
            .with_interval(Duration::ZERO);
        write(&overrides, "data_dir = \"/second\"\n[cache]\nttl_secs = 1\n");

        let config = resolver.snapshot();
        assert_eq!(config.data_dir, PathBuf::from("/first"));
        assert_eq!(config.cache.ttl_secs, 1);
    }

    #[test]
    fn test_unchanged_reload_reuses_snapshot() {
        let resolver = ConfigResolver::fixed(AdvisoryConfig::default().with_data_dir("/pinned"));
        let a = resolver.snapshot();
        let b = resolver.reload();
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(b.data_dir, PathBuf::from("/pinned"));
        assert_eq!(resolver.generation(), 1);
    }
}
