//! File-backed candidate source.
//!
//! Reads advice items from `<dir>/<kind>.jsonl`, one [`SourceEntry`] per line,
//! and scores relevance by keyword overlap with the context.

use super::CandidateSource;
use crate::models::{AdviceContext, Candidate, SourceKind, resource_matches};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

const fn neutral() -> f32 {
    0.5
}

/// One advice item as stored on disk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceEntry {
    /// Advice text.
    pub text: String,
    /// Trigger keywords matched against the context text.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Restricts the entry to these tools when non-empty.
    #[serde(default)]
    pub tools: Vec<String>,
    /// Restricts the entry to these intents when non-empty.
    #[serde(default)]
    pub intents: Vec<String>,
    /// Quality in [0, 1].
    #[serde(default = "neutral")]
    pub quality: f32,
    /// Trust in [0, 1].
    #[serde(default = "neutral")]
    pub trust: f32,
    /// Referenced resources.
    #[serde(default)]
    pub resources: Vec<String>,
    /// Whether the advice is hard-safety.
    #[serde(default)]
    pub safety_critical: bool,
    /// When the advice was observed.
    #[serde(default)]
    pub observed_at: u64,
}

impl SourceEntry {
    /// Scores this entry against a context. `None` if it does not apply.
    fn relevance(&self, context: &AdviceContext, haystack: &str) -> Option<f32> {
        if !self.tools.is_empty() && !self.tools.iter().any(|t| t == &context.tool_name) {
            return None;
        }
        if !self.intents.is_empty() && !self.intents.iter().any(|i| i == &context.intent) {
            return None;
        }

        let mut relevance = if self.keywords.is_empty() {
            if self.tools.is_empty() { 0.2 } else { 0.5 }
        } else {
            let matched = self
                .keywords
                .iter()
                .filter(|k| haystack.contains(&k.to_lowercase()))
                .count();
            if matched == 0 {
                return None;
            }
            #[allow(clippy::cast_precision_loss)]
            let ratio = matched as f32 / self.keywords.len() as f32;
            0.4f32.mul_add(ratio, 0.5)
        };

        let touches_resource = self
            .resources
            .iter()
            .any(|r| context.resources.iter().any(|c| resource_matches(r, c)));
        if touches_resource {
            relevance += 0.2;
        }
        Some(relevance.min(1.0))
    }
}

/// Source reading [`SourceEntry`] lines from a JSON Lines file.
#[derive(Debug, Clone)]
pub struct FileSource {
    kind: SourceKind,
    path: PathBuf,
}

impl FileSource {
    /// Creates a source reading `<dir>/<kind>.jsonl`.
    #[must_use]
    pub fn in_dir(dir: &Path, kind: SourceKind) -> Self {
        Self {
            kind,
            path: dir.join(format!("{}.jsonl", kind.as_str())),
        }
    }

    /// Returns the backing file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates one source per kind whose file exists in `dir`.
    #[must_use]
    pub fn discover(dir: &Path) -> Vec<Self> {
        SourceKind::all()
            .iter()
            .map(|kind| Self::in_dir(dir, *kind))
            .filter(|source| source.path.exists())
            .collect()
    }
}

impl CandidateSource for FileSource {
    fn kind(&self) -> SourceKind {
        self.kind
    }

    fn query(&self, context: &AdviceContext) -> Result<Vec<Candidate>> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(Error::SourceUnavailable {
                    source_kind: self.kind.to_string(),
                    cause: e.to_string(),
                });
            },
        };

        let haystack = format!(
            "{} {} {}",
            context.tool_name, context.intent, context.query_text
        )
        .to_lowercase();

        let mut candidates = Vec::new();
        for line in BufReader::new(file).lines() {
            let line = line.map_err(|e| Error::SourceUnavailable {
                source_kind: self.kind.to_string(),
                cause: e.to_string(),
            })?;
            if line.trim().is_empty() {
                continue;
            }
            let Ok(entry) = serde_json::from_str::<SourceEntry>(&line) else {
                tracing::debug!(source = %self.kind, "Skipping malformed source entry");
                continue;
            };
            let Some(relevance) = entry.relevance(context, &haystack) else {
                continue;
            };
            let mut candidate = Candidate::new(self.kind, entry.text)
                .with_scores(relevance, entry.quality, entry.trust)
                .with_resources(entry.resources)
                .with_observed_at(entry.observed_at);
            if entry.safety_critical {
                candidate = candidate.safety_critical();
            }
            candidates.push(candidate);
        }
        Ok(candidates)
    }
}
