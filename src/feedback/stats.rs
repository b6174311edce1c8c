//! Decayed per-source effectiveness statistics.

use crate::config::RankerConfig;
use crate::models::Outcome;
use serde::{Deserialize, Serialize};

/// Exponentially decayed outcome counts for one source.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct SourceStats {
    /// Decayed `followed` weight.
    pub followed: f64,
    /// Decayed `unhelpful` weight.
    pub unhelpful: f64,
    /// Decayed `no_match` weight. Tracked for inspection only.
    pub no_match: f64,
    /// Time the weights were last decayed to (Unix seconds).
    pub updated_at: u64,
}

impl SourceStats {
    /// Decays all weights from `updated_at` to `now`.
    #[allow(clippy::cast_precision_loss)]
    pub fn decay_to(&mut self, now: u64, half_life_secs: u64) {
        if now <= self.updated_at {
            return;
        }
        if half_life_secs > 0 {
            let elapsed = (now - self.updated_at) as f64;
            let factor = 0.5_f64.powf(elapsed / half_life_secs as f64);
            self.followed *= factor;
            self.unhelpful *= factor;
            self.no_match *= factor;
        }
        self.updated_at = now;
    }

    /// Adds one outcome at `now`.
    pub fn observe(&mut self, outcome: Outcome, now: u64, half_life_secs: u64) {
        self.decay_to(now, half_life_secs);
        match outcome {
            Outcome::Followed => self.followed += 1.0,
            Outcome::Unhelpful => self.unhelpful += 1.0,
            Outcome::NoMatch => self.no_match += 1.0,
        }
    }

    /// Replaces one earlier `followed` with an `unhelpful`.
    pub fn correct(&mut self, now: u64, half_life_secs: u64) {
        self.decay_to(now, half_life_secs);
        self.followed = (self.followed - 1.0).max(0.0);
        self.unhelpful += 1.0;
    }

    /// Laplace-smoothed share of `followed` among decisive outcomes.
    #[must_use]
    pub fn effectiveness(&self) -> f64 {
        (self.followed + 1.0) / (self.followed + self.unhelpful + 2.0)
    }

    /// Ranking modifier, bounded by the ranker's modifier range.
    ///
    /// Neutral sources (effectiveness 0.5) get exactly 1.0. Above neutral the
    /// modifier climbs toward 1.1; below it falls toward 0.8.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn modifier(&self, config: &RankerConfig) -> f32 {
        let eff = self.effectiveness();
        let raw = if eff >= 0.5 {
            (eff - 0.5).mul_add(0.2, 1.0)
        } else {
            (0.5 - eff).mul_add(-0.4, 1.0)
        };
        (raw as f32).clamp(config.modifier_min, config.modifier_max)
    }
}
