//! TOML configuration file structure.

use super::{AdvisoryConfig, LogFormat};
use crate::models::SourceKind;
use crate::{Error, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Baseline schema version this build understands.
pub const BASELINE_VERSION: u32 = 1;

/// Configuration file structure (for TOML parsing).
///
/// Every field is optional; present values overwrite the layer below.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFile {
    /// Schema version. Required in the baseline.
    pub version: Option<u32>,
    /// Data directory.
    pub data_dir: Option<String>,
    /// Reload interval in seconds.
    pub reload_interval_secs: Option<u64>,
    /// Ranker section.
    pub ranker: Option<ConfigFileRanker>,
    /// Cache section.
    pub cache: Option<ConfigFileCache>,
    /// Gate section.
    pub gate: Option<ConfigFileGate>,
    /// Synthesis section.
    pub synthesis: Option<ConfigFileSynthesis>,
    /// Feedback section.
    pub feedback: Option<ConfigFileFeedback>,
    /// Workers section.
    pub workers: Option<ConfigFileWorkers>,
    /// Logging section.
    pub logging: Option<ConfigFileLogging>,
}

/// Ranker section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileRanker {
    /// Relevance weight.
    pub relevance_weight: Option<f32>,
    /// Quality weight.
    pub quality_weight: Option<f32>,
    /// Trust weight.
    pub trust_weight: Option<f32>,
    /// Top-K.
    pub top_k: Option<usize>,
    /// Per-source timeout.
    pub source_timeout_ms: Option<u64>,
    /// Modifier lower bound.
    pub modifier_min: Option<f32>,
    /// Modifier upper bound.
    pub modifier_max: Option<f32>,
}

/// Cache section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileCache {
    /// Packet TTL.
    pub ttl_secs: Option<u64>,
    /// Relaxed-match minimum confidence.
    pub relaxed_min_confidence: Option<f32>,
    /// Relaxed-match maximum age.
    pub relaxed_max_age_secs: Option<u64>,
    /// Reuse window.
    pub reuse_window_secs: Option<u64>,
    /// Minimum hits in the reuse window.
    pub min_hits_in_window: Option<u64>,
    /// Retention of dead packets.
    pub retention_secs: Option<u64>,
    /// Packet cap.
    pub max_packets: Option<usize>,
}

/// Authority thresholds in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileThresholds {
    /// BLOCK threshold.
    pub block: Option<f32>,
    /// WARNING threshold.
    pub warning: Option<f32>,
    /// NOTE threshold.
    pub note: Option<f32>,
    /// WHISPER threshold.
    pub whisper: Option<f32>,
}

/// Gate section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileGate {
    /// Per-call budget.
    pub emission_budget: Option<usize>,
    /// Tier thresholds.
    pub thresholds: Option<ConfigFileThresholds>,
    /// Default shown-TTL.
    pub shown_ttl_secs: Option<u64>,
    /// Per-source shown-TTL keyed by source name.
    pub source_shown_ttl_secs: Option<HashMap<String, u64>>,
    /// Tool cooldown.
    pub tool_cooldown_secs: Option<u64>,
    /// Global dedup horizon.
    pub global_dedup_secs: Option<u64>,
    /// Emission window.
    pub window_secs: Option<u64>,
    /// Emissions per window.
    pub window_max_emissions: Option<usize>,
    /// Fallback toggle.
    pub fallback_enabled: Option<bool>,
    /// Fallback rate.
    pub fallback_interval: Option<usize>,
    /// WHISPER suppression.
    pub suppress_whispers: Option<bool>,
}

/// Synthesis section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileSynthesis {
    /// Output cap.
    pub max_chars: Option<usize>,
    /// Refinement toggle.
    pub refinement_enabled: Option<bool>,
    /// Refinement timeout.
    pub refinement_timeout_ms: Option<u64>,
    /// Minimum remaining budget for refinement.
    pub refinement_min_budget_ms: Option<u64>,
    /// Hot-lane budget.
    pub hot_budget_ms: Option<u64>,
    /// Refinement endpoint.
    pub refinement_endpoint: Option<String>,
    /// Refinement model.
    pub refinement_model: Option<String>,
}

/// Feedback section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileFeedback {
    /// Pending TTL.
    pub pending_ttl_secs: Option<u64>,
    /// Correction window.
    pub correction_window_secs: Option<u64>,
    /// Minimum overlap.
    pub min_overlap: Option<f32>,
    /// Statistics half-life.
    pub half_life_secs: Option<u64>,
    /// Flush interval.
    pub stats_flush_secs: Option<u64>,
}

/// Workers section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileWorkers {
    /// Prefetch workers.
    pub prefetch_workers: Option<usize>,
    /// Prefetch queue capacity.
    pub prefetch_queue: Option<usize>,
    /// Outcome queue capacity.
    pub outcome_queue: Option<usize>,
    /// Sweep interval.
    pub sweep_interval_secs: Option<u64>,
    /// Pause latency.
    pub pause_latency_ms: Option<u64>,
    /// Pause queue depth.
    pub pause_queue_depth: Option<usize>,
    /// Prefetch tools.
    pub prefetch_tools: Option<Vec<String>>,
}

/// Logging section in config file.
#[derive(Debug, Clone, Deserialize, Default, PartialEq)]
pub struct ConfigFileLogging {
    /// `pretty` or `json`.
    pub format: Option<String>,
    /// Filter directive.
    pub filter: Option<String>,
    /// Log file.
    pub file: Option<String>,
}

impl ConfigFile {
    /// Parses a configuration layer from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigResolution`] if the text is not valid for the schema.
    pub fn parse(layer: &str, contents: &str) -> Result<Self> {
        toml::from_str(contents).map_err(|e| Error::ConfigResolution {
            layer: layer.to_string(),
            cause: e.to_string(),
        })
    }

    /// Loads a configuration layer from a file.
    ///
    /// Returns `Ok(None)` when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigResolution`] if the file exists but cannot be
    /// read or parsed.
    pub fn load(layer: &str, path: &Path) -> Result<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let contents = std::fs::read_to_string(path).map_err(|e| Error::ConfigResolution {
            layer: layer.to_string(),
            cause: format!("{}: {e}", path.display()),
        })?;
        Self::parse(layer, &contents).map(Some)
    }

    /// Checks the baseline schema version.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConfigResolution`] if the version is missing or unsupported.
    pub fn check_baseline_version(&self) -> Result<()> {
        match self.version {
            Some(BASELINE_VERSION) => Ok(()),
            Some(other) => Err(Error::ConfigResolution {
                layer: "baseline".to_string(),
                cause: format!("unsupported version {other}, expected {BASELINE_VERSION}"),
            }),
            None => Err(Error::ConfigResolution {
                layer: "baseline".to_string(),
                cause: "missing version".to_string(),
            }),
        }
    }

    /// Applies the values present in this layer over `config`.
    pub fn apply(&self, config: &mut AdvisoryConfig) {
        if let Some(data_dir) = &self.data_dir {
            config.data_dir = PathBuf::from(data_dir);
        }
        if let Some(v) = self.reload_interval_secs {
            config.reload_interval_secs = v;
        }
        if let Some(ranker) = &self.ranker {
            ranker.apply(config);
        }
        if let Some(cache) = &self.cache {
            cache.apply(config);
        }
        if let Some(gate) = &self.gate {
            gate.apply(config);
        }
        if let Some(synthesis) = &self.synthesis {
            synthesis.apply(config);
        }
        if let Some(feedback) = &self.feedback {
            feedback.apply(config);
        }
        if let Some(workers) = &self.workers {
            workers.apply(config);
        }
        if let Some(logging) = &self.logging {
            if let Some(format) = &logging.format {
                config.logging.format = LogFormat::parse(format);
            }
            if logging.filter.is_some() {
                config.logging.filter.clone_from(&logging.filter);
            }
            if let Some(file) = &logging.file {
                config.logging.file = Some(PathBuf::from(file));
            }
        }
    }
}

impl ConfigFileRanker {
    fn apply(&self, config: &mut AdvisoryConfig) {
        let ranker = &mut config.ranker;
        if let Some(v) = self.relevance_weight {
            ranker.weights.relevance = v;
        }
        if let Some(v) = self.quality_weight {
            ranker.weights.quality = v;
        }
        if let Some(v) = self.trust_weight {
            ranker.weights.trust = v;
        }
        if let Some(v) = self.top_k {
            ranker.top_k = v;
        }
        if let Some(v) = self.source_timeout_ms {
            ranker.source_timeout_ms = v;
        }
        if let Some(v) = self.modifier_min {
            ranker.modifier_min = v;
        }
        if let Some(v) = self.modifier_max {
            ranker.modifier_max = v;
        }
    }
}

impl ConfigFileCache {
    fn apply(&self, config: &mut AdvisoryConfig) {
        let cache = &mut config.cache;
        if let Some(v) = self.ttl_secs {
            cache.ttl_secs = v;
        }
        if let Some(v) = self.relaxed_min_confidence {
            cache.relaxed_min_confidence = v;
        }
        if let Some(v) = self.relaxed_max_age_secs {
            cache.relaxed_max_age_secs = v;
        }
        if let Some(v) = self.reuse_window_secs {
            cache.reuse_window_secs = v;
        }
        if let Some(v) = self.min_hits_in_window {
            cache.min_hits_in_window = v;
        }
        if let Some(v) = self.retention_secs {
            cache.retention_secs = v;
        }
        if let Some(v) = self.max_packets {
            cache.max_packets = v;
        }
    }
}

impl ConfigFileGate {
    fn apply(&self, config: &mut AdvisoryConfig) {
        let gate = &mut config.gate;
        if let Some(v) = self.emission_budget {
            gate.emission_budget = v;
        }
        if let Some(t) = &self.thresholds {
            if let Some(v) = t.block {
                gate.thresholds.block = v;
            }
            if let Some(v) = t.warning {
                gate.thresholds.warning = v;
            }
            if let Some(v) = t.note {
                gate.thresholds.note = v;
            }
            if let Some(v) = t.whisper {
                gate.thresholds.whisper = v;
            }
        }
        if let Some(v) = self.shown_ttl_secs {
            gate.shown_ttl_secs = v;
        }
        if let Some(map) = &self.source_shown_ttl_secs {
            for (name, ttl) in map {
                match SourceKind::parse(name) {
                    Some(kind) => {
                        gate.source_shown_ttl_secs.insert(kind, *ttl);
                    },
                    None => tracing::warn!(source = %name, "Ignoring shown-TTL for unknown source"),
                }
            }
        }
        if let Some(v) = self.tool_cooldown_secs {
            gate.tool_cooldown_secs = v;
        }
        if let Some(v) = self.global_dedup_secs {
            gate.global_dedup_secs = v;
        }
        if let Some(v) = self.window_secs {
            gate.window_secs = v;
        }
        if let Some(v) = self.window_max_emissions {
            gate.window_max_emissions = v;
        }
        if let Some(v) = self.fallback_enabled {
            gate.fallback_enabled = v;
        }
        if let Some(v) = self.fallback_interval {
            gate.fallback_interval = v.max(1);
        }
        if let Some(v) = self.suppress_whispers {
            gate.suppress_whispers = v;
        }
    }
}

impl ConfigFileSynthesis {
    fn apply(&self, config: &mut AdvisoryConfig) {
        let synthesis = &mut config.synthesis;
        if let Some(v) = self.max_chars {
            synthesis.max_chars = v;
        }
        if let Some(v) = self.refinement_enabled {
            synthesis.refinement_enabled = v;
        }
        if let Some(v) = self.refinement_timeout_ms {
            synthesis.refinement_timeout_ms = v;
        }
        if let Some(v) = self.refinement_min_budget_ms {
            synthesis.refinement_min_budget_ms = v;
        }
        if let Some(v) = self.hot_budget_ms {
            synthesis.hot_budget_ms = v;
        }
        if self.refinement_endpoint.is_some() {
            synthesis
                .refinement_endpoint
                .clone_from(&self.refinement_endpoint);
        }
        if self.refinement_model.is_some() {
            synthesis.refinement_model.clone_from(&self.refinement_model);
        }
    }
}

impl ConfigFileFeedback {
    fn apply(&self, config: &mut AdvisoryConfig) {
        let feedback = &mut config.feedback;
        if let Some(v) = self.pending_ttl_secs {
            feedback.pending_ttl_secs = v;
        }
        if let Some(v) = self.correction_window_secs {
            feedback.correction_window_secs = v;
        }
        if let Some(v) = self.min_overlap {
            feedback.min_overlap = v;
        }
        if let Some(v) = self.half_life_secs {
            feedback.half_life_secs = v.max(1);
        }
        if let Some(v) = self.stats_flush_secs {
            feedback.stats_flush_secs = v;
        }
    }
}

impl ConfigFileWorkers {
    fn apply(&self, config: &mut AdvisoryConfig) {
        let workers = &mut config.workers;
        if let Some(v) = self.prefetch_workers {
            workers.prefetch_workers = v;
        }
        if let Some(v) = self.prefetch_queue {
            workers.prefetch_queue = v.max(1);
        }
        if let Some(v) = self.outcome_queue {
            workers.outcome_queue = v.max(1);
        }
        if let Some(v) = self.sweep_interval_secs {
            workers.sweep_interval_secs = v.max(1);
        }
        if let Some(v) = self.pause_latency_ms {
            workers.pause_latency_ms = v;
        }
        if let Some(v) = self.pause_queue_depth {
            workers.pause_queue_depth = v;
        }
        if self.prefetch_tools.is_some() {
            workers.prefetch_tools = self.prefetch_tools.clone().unwrap_or_default();
        }
    }
}
