//! Synthesis router.
//!
//! Turns gate survivors into one text block. Deterministic per-tier templates
//! are always available; generative refinement is attempted only when it is
//! enabled, a refiner is configured, there are survivors, and enough of the
//! hot-lane budget remains. Any refinement error or timeout falls back to the
//! template silently. Every path is capped to `max_chars`.

mod ollama;

pub use ollama::OllamaRefiner;

use crate::config::SynthesisConfig;
use crate::models::{AuthorityTier, Survivor};
use crate::{Error, Result};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::{Duration, Instant};

/// Rewrites a templated draft into tighter prose.
pub trait Refiner: Send + Sync {
    /// Refines `draft`, which was rendered from `survivors`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::GenerationFailure`] if the provider fails.
    fn refine(&self, draft: &str, survivors: &[Survivor], max_chars: usize) -> Result<String>;
}

/// Rendered guidance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    /// Final text, at most `max_chars` characters.
    pub text: String,
    /// Whether the text came from refinement.
    pub refined: bool,
    /// Whether the text was cut to fit the cap.
    pub truncated: bool,
}

/// Routes survivors through templating and optional refinement.
#[derive(Clone, Default)]
pub struct SynthesisRouter {
    refiner: Option<Arc<dyn Refiner>>,
}

impl std::fmt::Debug for SynthesisRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SynthesisRouter")
            .field("refiner", &self.refiner.is_some())
            .finish()
    }
}

impl SynthesisRouter {
    /// Creates a template-only router.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a refiner.
    #[must_use]
    pub fn with_refiner(mut self, refiner: Arc<dyn Refiner>) -> Self {
        self.refiner = Some(refiner);
        self
    }

    /// Renders one survivor with its tier template.
    #[must_use]
    pub fn template(survivor: &Survivor) -> String {
        let text = survivor.scored.candidate.text.trim();
        match survivor.tier {
            AuthorityTier::Block => format!("[BLOCKING] {text}"),
            AuthorityTier::Warning => format!("[ADVISORY] {text}"),
            AuthorityTier::Note => format!("[NOTE] {text}"),
            AuthorityTier::Whisper | AuthorityTier::Silent => format!("({text})"),
        }
    }

    /// Renders survivors. Returns `None` when there is nothing to say.
    ///
    /// `remaining` is what is left of the hot-lane budget for this call.
    #[tracing::instrument(skip_all, fields(survivors = survivors.len()))]
    pub fn render(
        &self,
        survivors: &[Survivor],
        config: &SynthesisConfig,
        remaining: Duration,
    ) -> Option<Rendered> {
        if survivors.is_empty() {
            return None;
        }

        let draft = survivors
            .iter()
            .map(Self::template)
            .collect::<Vec<_>>()
            .join("\n");

        if let Some(refined) = self.try_refine(&draft, survivors, config, remaining) {
            let (text, truncated) = cap(&refined, config.max_chars);
            return Some(Rendered {
                text,
                refined: true,
                truncated,
            });
        }

        let (text, truncated) = cap(&draft, config.max_chars);
        Some(Rendered {
            text,
            refined: false,
            truncated,
        })
    }

    fn try_refine(
        &self,
        draft: &str,
        survivors: &[Survivor],
        config: &SynthesisConfig,
        remaining: Duration,
    ) -> Option<String> {
        if !config.refinement_enabled {
            return None;
        }
        let refiner = self.refiner.as_ref()?;
        if remaining < Duration::from_millis(config.refinement_min_budget_ms) {
            tracing::debug!(remaining_ms = remaining.as_millis(), "Skipping refinement, budget too low");
            metrics::counter!("advisory_refinement_total", "status" => "skipped").increment(1);
            return None;
        }
        let timeout = Duration::from_millis(config.refinement_timeout_ms).min(remaining);

        match refine_with_timeout(Arc::clone(refiner), draft, survivors, config.max_chars, timeout) {
            Ok(text) if !text.trim().is_empty() => {
                metrics::counter!("advisory_refinement_total", "status" => "success").increment(1);
                Some(text.trim().to_string())
            },
            Ok(_) => {
                metrics::counter!("advisory_refinement_total", "status" => "empty").increment(1);
                None
            },
            Err(e) => {
                let status = match e {
                    Error::GenerationTimeout { .. } => "timeout",
                    _ => "error",
                };
                tracing::debug!(error = %e, "Refinement failed, using template");
                metrics::counter!("advisory_refinement_total", "status" => status).increment(1);
                None
            },
        }
    }
}

/// Runs a refiner on its own thread and waits at most `timeout`.
///
/// A refiner that misses the deadline keeps running until its own HTTP
/// timeout; its result is discarded.
fn refine_with_timeout(
    refiner: Arc<dyn Refiner>,
    draft: &str,
    survivors: &[Survivor],
    max_chars: usize,
    timeout: Duration,
) -> Result<String> {
    let (tx, rx) = mpsc::channel();
    let draft = draft.to_string();
    let survivors = survivors.to_vec();
    let started = Instant::now();

    std::thread::Builder::new()
        .name("advisory-refine".to_string())
        .spawn(move || {
            let _ = tx.send(refiner.refine(&draft, &survivors, max_chars));
        })
        .map_err(|e| Error::GenerationFailure(e.to_string()))?;

    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(RecvTimeoutError::Timeout) => Err(Error::GenerationTimeout {
            elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }),
        Err(RecvTimeoutError::Disconnected) => {
            Err(Error::GenerationFailure("refiner thread exited".to_string()))
        },
    }
}

/// Cuts `text` to at most `max_chars` characters on a char boundary.
///
/// A cut text ends with an ellipsis, which counts toward the cap.
#[must_use]
pub fn cap(text: &str, max_chars: usize) -> (String, bool) {
    if text.chars().count() <= max_chars {
        return (text.to_string(), false);
    }
    if max_chars == 0 {
        return (String::new(), true);
    }
    let mut cut: String = text.chars().take(max_chars - 1).collect();
    cut.truncate(cut.trim_end().len());
    cut.push('…');
    (cut, true)
}
