//! Configuration management.
//!
//! Thresholds are resolved through four layers, highest priority last:
//!
//! | Layer | Source | On error |
//! |-------|--------|----------|
//! | defaults | [`AdvisoryConfig::default`] | n/a |
//! | baseline | `baseline.toml` (must carry `version = 1`) | fatal at startup, prior kept on reload |
//! | overrides | `overrides.toml` | layer skipped, prior kept |
//! | env | `ADVISORY_*` variables | layer skipped, prior kept |
//!
//! The result is an immutable [`AdvisoryConfig`] snapshot handed to each
//! component call. [`ConfigResolver`] re-resolves on a bounded interval.

mod env;
mod file;
mod resolver;

pub use env::{ENV_PREFIX, EnvVars, env_layer};
pub use file::{BASELINE_VERSION, ConfigFile};
pub use resolver::{ConfigPaths, ConfigResolver};

use crate::models::{SourceKind, TierThresholds};
use std::collections::HashMap;
use std::path::PathBuf;

/// Resolved configuration snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct AdvisoryConfig {
    /// Directory holding the cache index, logs and statistics.
    ///
    /// Startup-critical: never changed by a hot reload.
    pub data_dir: PathBuf,
    /// Seconds between configuration re-resolutions.
    pub reload_interval_secs: u64,
    /// Fusion ranker settings.
    pub ranker: RankerConfig,
    /// Packet cache settings.
    pub cache: CacheConfig,
    /// Suppression gate settings.
    pub gate: GateConfig,
    /// Synthesis router settings.
    pub synthesis: SynthesisConfig,
    /// Effectiveness feedback settings.
    pub feedback: FeedbackConfig,
    /// Background lane settings.
    pub workers: WorkerConfig,
    /// Logging settings. Startup-critical.
    pub logging: LoggingSettings,
}

impl Default for AdvisoryConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from(".advisory"),
            reload_interval_secs: 30,
            ranker: RankerConfig::default(),
            cache: CacheConfig::default(),
            gate: GateConfig::default(),
            synthesis: SynthesisConfig::default(),
            feedback: FeedbackConfig::default(),
            workers: WorkerConfig::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl AdvisoryConfig {
    /// Creates a configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the data directory.
    #[must_use]
    pub fn with_data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.data_dir = path.into();
        self
    }

    /// Path of the persisted cache index.
    #[must_use]
    pub fn cache_index_path(&self) -> PathBuf {
        self.data_dir.join("cache").join("index.json")
    }

    /// Path of the emission audit log.
    #[must_use]
    pub fn emission_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("emissions.jsonl")
    }

    /// Path of the outcome log.
    #[must_use]
    pub fn outcome_log_path(&self) -> PathBuf {
        self.data_dir.join("logs").join("outcomes.jsonl")
    }

    /// Path of the per-source statistics file.
    #[must_use]
    pub fn stats_path(&self) -> PathBuf {
        self.data_dir.join("source_stats.json")
    }

    /// Directory of per-session state files.
    #[must_use]
    pub fn sessions_dir(&self) -> PathBuf {
        self.data_dir.join("sessions")
    }

    /// Path of the cross-session dedup map.
    #[must_use]
    pub fn global_dedup_path(&self) -> PathBuf {
        self.data_dir.join("global_dedup.json")
    }

    /// Path of the pending-correlation file.
    #[must_use]
    pub fn pending_path(&self) -> PathBuf {
        self.data_dir.join("pending.json")
    }

    /// Directory of file-backed candidate sources.
    #[must_use]
    pub fn sources_dir(&self) -> PathBuf {
        self.data_dir.join("sources")
    }
}

/// Additive score weights.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreWeights {
    /// Weight of relevance.
    pub relevance: f32,
    /// Weight of quality.
    pub quality: f32,
    /// Weight of trust.
    pub trust: f32,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.45,
            quality: 0.30,
            trust: 0.25,
        }
    }
}

/// Fusion ranker settings.
#[derive(Debug, Clone, PartialEq)]
pub struct RankerConfig {
    /// Additive weights.
    pub weights: ScoreWeights,
    /// Number of distinct candidates kept.
    pub top_k: usize,
    /// Per-source query budget in milliseconds.
    pub source_timeout_ms: u64,
    /// Lower bound of the effectiveness modifier.
    pub modifier_min: f32,
    /// Upper bound of the effectiveness modifier.
    pub modifier_max: f32,
}

impl Default for RankerConfig {
    fn default() -> Self {
        Self {
            weights: ScoreWeights::default(),
            top_k: 8,
            source_timeout_ms: 250,
            modifier_min: 0.8,
            modifier_max: 1.1,
        }
    }
}

/// Packet cache settings.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheConfig {
    /// Freshness TTL of a packet in seconds.
    pub ttl_secs: u64,
    /// Minimum best score a packet needs to serve a relaxed lookup.
    pub relaxed_min_confidence: f32,
    /// Maximum age in seconds of a packet serving a relaxed lookup.
    pub relaxed_max_age_secs: u64,
    /// Rolling window in seconds for the reuse check.
    pub reuse_window_secs: u64,
    /// Hits required within the reuse window to stay `READY`.
    pub min_hits_in_window: u64,
    /// How long `STALE`/`INVALIDATED` packets are retained before collection.
    pub retention_secs: u64,
    /// Upper bound on packets kept; oldest are collected first.
    pub max_packets: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 900,
            relaxed_min_confidence: 0.6,
            relaxed_max_age_secs: 300,
            reuse_window_secs: 600,
            min_hits_in_window: 1,
            retention_secs: 3_600,
            max_packets: 2_048,
        }
    }
}

/// Suppression gate settings.
#[derive(Debug, Clone, PartialEq)]
pub struct GateConfig {
    /// Maximum survivors per call.
    pub emission_budget: usize,
    /// Authority tier thresholds.
    pub thresholds: TierThresholds,
    /// Default shown-TTL per advice identity, in seconds.
    pub shown_ttl_secs: u64,
    /// Per-source shown-TTL overrides.
    pub source_shown_ttl_secs: HashMap<SourceKind, u64>,
    /// Per-tool cooldown in seconds.
    pub tool_cooldown_secs: u64,
    /// Cross-session dedup horizon in seconds.
    pub global_dedup_secs: u64,
    /// Rolling emission window in seconds.
    pub window_secs: u64,
    /// Emissions allowed per rolling window.
    pub window_max_emissions: usize,
    /// Whether the rate-limited fallback is enabled.
    pub fallback_enabled: bool,
    /// At most one fallback per this many budget-exhausted calls.
    pub fallback_interval: usize,
    /// Drop `WHISPER` survivors entirely.
    pub suppress_whispers: bool,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            emission_budget: 2,
            thresholds: TierThresholds::default(),
            shown_ttl_secs: 600,
            source_shown_ttl_secs: HashMap::new(),
            tool_cooldown_secs: 30,
            global_dedup_secs: 21_600,
            window_secs: 600,
            window_max_emissions: 8,
            fallback_enabled: true,
            fallback_interval: 5,
            suppress_whispers: false,
        }
    }
}

impl GateConfig {
    /// Shown-TTL for advice from `source`.
    #[must_use]
    pub fn shown_ttl_for(&self, source: SourceKind) -> u64 {
        self.source_shown_ttl_secs
            .get(&source)
            .copied()
            .unwrap_or(self.shown_ttl_secs)
    }
}

/// Synthesis router settings.
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisConfig {
    /// Hard cap on rendered output, in characters.
    pub max_chars: usize,
    /// Whether generative refinement may run.
    pub refinement_enabled: bool,
    /// Hard timeout for refinement in milliseconds.
    pub refinement_timeout_ms: u64,
    /// Minimum remaining hot-lane budget before refinement is attempted.
    pub refinement_min_budget_ms: u64,
    /// Total hot-lane budget per call in milliseconds.
    pub hot_budget_ms: u64,
    /// Refinement endpoint (Ollama-compatible).
    pub refinement_endpoint: Option<String>,
    /// Refinement model.
    pub refinement_model: Option<String>,
}

impl Default for SynthesisConfig {
    fn default() -> Self {
        Self {
            max_chars: 500,
            refinement_enabled: false,
            refinement_timeout_ms: 600,
            refinement_min_budget_ms: 400,
            hot_budget_ms: 1_200,
            refinement_endpoint: None,
            refinement_model: None,
        }
    }
}

/// Effectiveness feedback settings.
#[derive(Debug, Clone, PartialEq)]
pub struct FeedbackConfig {
    /// How long an emission waits for a correlating outcome, in seconds.
    pub pending_ttl_secs: u64,
    /// Window in which a repeated call counts as a user correction.
    pub correction_window_secs: u64,
    /// Minimum resource/tool overlap for a `followed` classification.
    pub min_overlap: f32,
    /// Half-life of the decayed statistics, in seconds.
    pub half_life_secs: u64,
    /// Seconds between statistics flushes in the background lane.
    pub stats_flush_secs: u64,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            pending_ttl_secs: 120,
            correction_window_secs: 30,
            min_overlap: 0.3,
            half_life_secs: 604_800,
            stats_flush_secs: 60,
        }
    }
}

/// Background lane settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerConfig {
    /// Number of prefetch workers.
    pub prefetch_workers: usize,
    /// Bounded prefetch queue capacity.
    pub prefetch_queue: usize,
    /// Bounded outcome queue capacity.
    pub outcome_queue: usize,
    /// Seconds between cache sweeps.
    pub sweep_interval_secs: u64,
    /// Hot-lane latency (EWMA, ms) above which background work pauses.
    pub pause_latency_ms: u64,
    /// Queue depth above which background work pauses.
    pub pause_queue_depth: usize,
    /// Tools always considered likely next actions.
    pub prefetch_tools: Vec<String>,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            prefetch_workers: 2,
            prefetch_queue: 64,
            outcome_queue: 256,
            sweep_interval_secs: 60,
            pause_latency_ms: 300,
            pause_queue_depth: 48,
            prefetch_tools: vec![
                "Edit".to_string(),
                "Write".to_string(),
                "Bash".to_string(),
                "Read".to_string(),
            ],
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    /// Human-readable.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

impl LogFormat {
    /// Parses a log format name.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "json" => Self::Json,
            _ => Self::Pretty,
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LoggingSettings {
    /// Output format.
    pub format: LogFormat,
    /// `EnvFilter` directive.
    pub filter: Option<String>,
    /// Log file (stderr when unset).
    pub file: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        let w = ScoreWeights::default();
        assert!((w.relevance + w.quality + w.trust - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_shown_ttl_override() {
        let mut gate = GateConfig::default();
        gate.source_shown_ttl_secs.insert(SourceKind::Rules, 60);
        assert_eq!(gate.shown_ttl_for(SourceKind::Rules), 60);
        assert_eq!(gate.shown_ttl_for(SourceKind::Semantic), 600);
    }

    #[test]
    fn test_paths_live_under_data_dir() {
        let config = AdvisoryConfig::default().with_data_dir("/tmp/adv");
        assert!(config.cache_index_path().starts_with("/tmp/adv"));
        assert!(config.emission_log_path().starts_with("/tmp/adv"));
        assert!(config.stats_path().starts_with("/tmp/adv"));
    }

    #[test]
    fn test_log_format_parse() {
        assert_eq!(LogFormat::parse("JSON"), LogFormat::Json);
        assert_eq!(LogFormat::parse("anything"), LogFormat::Pretty);
    }
}
