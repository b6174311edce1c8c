//! Packet cache.
//!
//! Stores ranked, authority-tagged packets keyed by context. Packets are
//! immutable once published: every state change builds a new [`Packet`] and
//! swaps the `Arc` in one map write, so readers always see a whole packet and
//! its lineage together.
//!
//! # Lifecycle
//!
//! ```text
//! CREATED ─► READY ─► STALE ─► collected
//!              │                  ▲
//!              └──► INVALIDATED ──┘
//! ```
//!
//! `READY` packets are demoted to `STALE` by [`PacketCache::sweep_stale`] when
//! their TTL lapses or they go unused for a reuse window; any live packet moves
//! to `INVALIDATED` when a resource it references changes.

use crate::config::{CacheConfig, GateConfig};
use crate::models::{
    AuthorityTier, CacheKey, MatchConfidence, Packet, PacketStatus, Survivor,
};
use crate::ranking::Ranking;
use crate::storage::{read_json, write_json_atomic};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError, RwLock};

const INDEX_VERSION: u32 = 1;

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    /// The packet served.
    pub packet: Arc<Packet>,
    /// Whether the packet matched the full key or only stable key and tool.
    pub confidence: MatchConfidence,
}

/// Result of a sweep.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Packets demoted from `READY` to `STALE`.
    pub demoted: usize,
    /// Packets removed.
    pub collected: usize,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry {
    packet: Packet,
    #[serde(default)]
    hits: Vec<u64>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedIndex {
    version: u32,
    entries: Vec<PersistedEntry>,
}

/// Keyed, TTL-bounded, event-invalidated packet store.
#[derive(Debug, Default)]
pub struct PacketCache {
    packets: RwLock<HashMap<String, Arc<Packet>>>,
    relaxed: RwLock<HashMap<String, String>>,
    writers: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    hits: Mutex<HashMap<String, VecDeque<u64>>>,
    index_path: Option<PathBuf>,
}

impl PacketCache {
    /// Creates an empty in-memory cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens a cache persisted at `path`.
    ///
    /// A missing index yields an empty cache. A corrupted index is logged and
    /// also yields an empty cache; it is overwritten on the next flush.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cache = Self {
            index_path: Some(path.clone()),
            ..Self::default()
        };

        match Self::load_index(&path) {
            Ok(Some(index)) => cache.restore(index),
            Ok(None) => {},
            Err(e) => {
                tracing::warn!(error = %e, "Cache index unreadable, starting empty");
                metrics::counter!("advisory_cache_corruption_total").increment(1);
            },
        }
        cache
    }

    fn load_index(path: &Path) -> Result<Option<PersistedIndex>> {
        let Some(index) = read_json::<PersistedIndex>(path)? else {
            return Ok(None);
        };
        if index.version != INDEX_VERSION {
            return Err(Error::CacheCorruption {
                path: path.display().to_string(),
                cause: format!("unsupported index version {}", index.version),
            });
        }
        Ok(Some(index))
    }

    fn restore(&mut self, index: PersistedIndex) {
        let packets = self.packets.get_mut().unwrap_or_else(PoisonError::into_inner);
        let hits = self.hits.get_mut().unwrap_or_else(PoisonError::into_inner);
        for entry in index.entries {
            let key = entry.packet.key.exact();
            hits.insert(key.clone(), entry.hits.into());
            packets.insert(key, Arc::new(entry.packet));
        }
        let relaxed = Self::build_relaxed_index(packets);
        *self.relaxed.get_mut().unwrap_or_else(PoisonError::into_inner) = relaxed;
    }

    fn build_relaxed_index(packets: &HashMap<String, Arc<Packet>>) -> HashMap<String, String> {
        let mut latest: HashMap<String, (u64, String)> = HashMap::new();
        for (key, packet) in packets {
            if packet.status != PacketStatus::Ready {
                continue;
            }
            let relaxed = packet.key.relaxed();
            let newer = latest
                .get(&relaxed)
                .is_none_or(|(updated, _)| packet.updated_at > *updated);
            if newer {
                latest.insert(relaxed, (packet.updated_at, key.clone()));
            }
        }
        latest.into_iter().map(|(k, (_, v))| (k, v)).collect()
    }

    /// Writes the index to disk if the cache is persistent.
    ///
    /// # Errors
    ///
    /// Returns an error if the index cannot be written.
    pub fn flush(&self) -> Result<()> {
        let Some(path) = &self.index_path else {
            return Ok(());
        };
        let packets = self.packets.read().unwrap_or_else(PoisonError::into_inner);
        let hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<PersistedEntry> = packets
            .iter()
            .map(|(key, packet)| PersistedEntry {
                packet: Packet::clone(packet),
                hits: hits
                    .get(key)
                    .map(|h| h.iter().copied().collect())
                    .unwrap_or_default(),
            })
            .collect();
        drop(hits);
        drop(packets);
        entries.sort_by(|a, b| a.packet.key.exact().cmp(&b.packet.key.exact()));

        write_json_atomic(
            path,
            &PersistedIndex {
                version: INDEX_VERSION,
                entries,
            },
        )
    }

    /// Number of packets held, in any status.
    pub fn len(&self) -> usize {
        self.packets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Returns true if the cache holds no packets.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns the packet stored under an exact key, in any status.
    pub fn get(&self, key: &CacheKey) -> Option<Arc<Packet>> {
        self.packets
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key.exact())
            .cloned()
    }

    /// Looks up a servable packet: exact key first, then stable key and tool.
    ///
    /// Relaxed matches must be fresh (within `relaxed_max_age_secs` of their
    /// last update) and confident (best score at least
    /// `relaxed_min_confidence`). They are served as a copy whose lineage is
    /// tagged [`MatchConfidence::Relaxed`].
    #[tracing::instrument(skip_all, fields(key = %key))]
    pub fn lookup(&self, key: &CacheKey, config: &CacheConfig, now: u64) -> Option<CacheHit> {
        let exact_key = key.exact();
        let (exact, relaxed) = {
            let packets = self.packets.read().unwrap_or_else(PoisonError::into_inner);
            let exact = packets
                .get(&exact_key)
                .filter(|p| p.is_servable(now))
                .cloned();
            let relaxed = if exact.is_none() {
                self.relaxed
                    .read()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get(&key.relaxed())
                    .and_then(|k| packets.get(k))
                    .filter(|p| {
                        p.is_servable(now)
                            && now.saturating_sub(p.updated_at) <= config.relaxed_max_age_secs
                            && p.ranked
                                .first()
                                .is_some_and(|top| top.score >= config.relaxed_min_confidence)
                    })
                    .cloned()
            } else {
                None
            };
            (exact, relaxed)
        };

        if let Some(packet) = exact {
            self.record_hit(&exact_key, now);
            metrics::counter!("advisory_cache_lookups_total", "result" => "exact").increment(1);
            return Some(CacheHit {
                packet,
                confidence: MatchConfidence::Exact,
            });
        }

        if let Some(packet) = relaxed {
            self.record_hit(&packet.key.exact(), now);
            metrics::counter!("advisory_cache_lookups_total", "result" => "relaxed").increment(1);
            let mut tagged = Packet::clone(&packet);
            tagged.lineage.confidence = MatchConfidence::Relaxed;
            return Some(CacheHit {
                packet: Arc::new(tagged),
                confidence: MatchConfidence::Relaxed,
            });
        }

        metrics::counter!("advisory_cache_lookups_total", "result" => "miss").increment(1);
        None
    }

    fn record_hit(&self, key: &str, now: u64) {
        let mut hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner);
        let window = hits.entry(key.to_string()).or_default();
        window.push_back(now);
        // Only recent hits matter for the reuse check.
        while window.len() > 64 {
            window.pop_front();
        }
    }

    fn writer_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut writers = self.writers.lock().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(writers.entry(key.to_string()).or_default())
    }

    /// Publishes a `READY` packet for `key`, replacing any prior packet.
    ///
    /// Survivors are the ranked candidates tagged with their authority tier;
    /// `SILENT` candidates are not carried.
    pub fn store(
        &self,
        key: &CacheKey,
        ranking: Ranking,
        cache_config: &CacheConfig,
        gate_config: &GateConfig,
        now: u64,
    ) -> Arc<Packet> {
        let exact_key = key.exact();
        let writer = self.writer_lock(&exact_key);
        let _guard = writer.lock().unwrap_or_else(PoisonError::into_inner);

        let survivors: Vec<Survivor> = ranking
            .ranked
            .iter()
            .filter_map(|scored| {
                let tier = AuthorityTier::classify(
                    scored.score,
                    scored.candidate.safety_critical,
                    &gate_config.thresholds,
                );
                tier.is_emittable().then(|| Survivor {
                    scored: scored.clone(),
                    tier,
                    fallback: false,
                })
            })
            .collect();
        let resources: BTreeSet<String> = ranking
            .ranked
            .iter()
            .flat_map(|s| s.candidate.resources.iter().cloned())
            .collect();

        let created = Packet {
            key: key.clone(),
            ranked: ranking.ranked,
            survivors,
            lineage: ranking.lineage,
            resources,
            created_at: now,
            updated_at: now,
            fresh_until: now.saturating_add(cache_config.ttl_secs),
            status: PacketStatus::Created,
            invalidation_reason: None,
        };
        let packet = Arc::new(created.transitioned(PacketStatus::Ready, now, None));

        {
            let mut packets = self.packets.write().unwrap_or_else(PoisonError::into_inner);
            packets.insert(exact_key.clone(), Arc::clone(&packet));
            self.relaxed
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .insert(key.relaxed(), exact_key.clone());
        }
        self.hits
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&exact_key);

        tracing::debug!(
            key = %exact_key,
            ranked = packet.ranked.len(),
            survivors = packet.survivors.len(),
            "Stored packet"
        );
        metrics::counter!("advisory_cache_stores_total").increment(1);
        packet
    }

    /// Moves every live packet matching `predicate` to `INVALIDATED`.
    ///
    /// Returns the number of packets invalidated.
    pub fn invalidate<F>(&self, predicate: F, reason: &str, now: u64) -> usize
    where
        F: Fn(&Packet) -> bool,
    {
        let mut packets = self.packets.write().unwrap_or_else(PoisonError::into_inner);
        let mut count = 0;
        for packet in packets.values_mut() {
            let live = matches!(
                packet.status,
                PacketStatus::Created | PacketStatus::Ready | PacketStatus::Stale
            );
            if live && predicate(packet) {
                *packet = Arc::new(packet.transitioned(
                    PacketStatus::Invalidated,
                    now,
                    Some(reason.to_string()),
                ));
                count += 1;
            }
        }
        if count > 0 {
            // Repoint relaxed entries at the newest packet still servable.
            let relaxed = Self::build_relaxed_index(&packets);
            *self.relaxed.write().unwrap_or_else(PoisonError::into_inner) = relaxed;
        }
        drop(packets);

        if count > 0 {
            tracing::debug!(count, reason, "Invalidated packets");
            metrics::counter!("advisory_cache_invalidations_total").increment(count as u64);
        }
        count
    }

    /// Invalidates every packet referencing `path`.
    pub fn invalidate_resource(&self, path: &str, now: u64) -> usize {
        self.invalidate(
            |packet| packet.references(path),
            &format!("resource modified: {path}"),
            now,
        )
    }

    /// Demotes expired or unused packets and collects old dead ones.
    #[tracing::instrument(skip_all)]
    #[allow(clippy::cast_precision_loss)]
    pub fn sweep_stale(&self, config: &CacheConfig, now: u64) -> SweepReport {
        let mut report = SweepReport::default();
        let hits = self.hits.lock().unwrap_or_else(PoisonError::into_inner).clone();
        let mut packets = self.packets.write().unwrap_or_else(PoisonError::into_inner);

        for (key, packet) in packets.iter_mut() {
            if packet.status != PacketStatus::Ready {
                continue;
            }
            let reason = if now > packet.fresh_until {
                Some("ttl expired")
            } else if now.saturating_sub(packet.created_at) >= config.reuse_window_secs {
                let window_start = now.saturating_sub(config.reuse_window_secs);
                let recent = hits
                    .get(key)
                    .map_or(0, |h| h.iter().filter(|t| **t > window_start).count());
                (recent < usize::try_from(config.min_hits_in_window).unwrap_or(usize::MAX))
                    .then_some("unused in reuse window")
            } else {
                None
            };
            if let Some(reason) = reason {
                tracing::trace!(key = %key, reason, "Demoting packet");
                *packet = Arc::new(packet.transitioned(PacketStatus::Stale, now, None));
                report.demoted += 1;
            }
        }

        let before = packets.len();
        packets.retain(|_, packet| {
            let dead = matches!(
                packet.status,
                PacketStatus::Stale | PacketStatus::Invalidated
            );
            !(dead && now.saturating_sub(packet.updated_at) > config.retention_secs)
        });

        if packets.len() > config.max_packets {
            let mut by_age: Vec<(u64, String)> = packets
                .iter()
                .map(|(k, p)| (p.updated_at, k.clone()))
                .collect();
            by_age.sort();
            let excess = packets.len() - config.max_packets;
            for (_, key) in by_age.into_iter().take(excess) {
                packets.remove(&key);
            }
        }
        report.collected = before - packets.len();

        let relaxed = Self::build_relaxed_index(&packets);
        drop(packets);
        *self.relaxed.write().unwrap_or_else(PoisonError::into_inner) = relaxed;

        if report.collected > 0 {
            let live: BTreeSet<String> = self
                .packets
                .read()
                .unwrap_or_else(PoisonError::into_inner)
                .keys()
                .cloned()
                .collect();
            self.hits
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|k, _| live.contains(k));
            self.writers
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .retain(|k, lock| live.contains(k) || Arc::strong_count(lock) > 1);
        }

        metrics::gauge!("advisory_cache_packets").set(self.len() as f64);
        tracing::debug!(demoted = report.demoted, collected = report.collected, "Cache sweep");
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{AdviceContext, Candidate, Lineage, ScoredCandidate, SourceKind};

    fn key(tool: &str) -> CacheKey {
        AdviceContext::new("/proj", "s1", tool)
            .with_intent("auth_security")
            .cache_key()
    }

    fn ranking(score: f32, resources: &[&str]) -> Ranking {
        let candidate = Candidate::new(SourceKind::Rules, "Validate JWT audience")
            .with_resources(resources.iter().copied());
        Ranking {
            ranked: vec![ScoredCandidate {
                advice_id: candidate.identity(),
                candidate,
                base_score: score,
                modifier: 1.0,
                score,
            }],
            lineage: Lineage::default(),
        }
    }

    fn store(cache: &PacketCache, key: &CacheKey, score: f32, now: u64) -> Arc<Packet> {
        cache.store(
            key,
            ranking(score, &["src/auth.rs"]),
            &CacheConfig::default(),
            &GateConfig::default(),
            now,
        )
    }

    #[test]
    fn test_exact_lookup_returns_same_packet() {
        let cache = PacketCache::new();
        let k = key("Edit");
        let stored = store(&cache, &k, 0.85, 100);
        assert_eq!(stored.status, PacketStatus::Ready);
        assert_eq!(stored.survivors[0].tier, AuthorityTier::Warning);

        let config = CacheConfig::default();
        let a = cache.lookup(&k, &config, 110).unwrap();
        let b = cache.lookup(&k, &config, 120).unwrap();
        assert!(Arc::ptr_eq(&a.packet, &b.packet));
        assert_eq!(a.confidence, MatchConfidence::Exact);
    }

    #[test]
    fn test_ttl_bounds_lookup() {
        let cache = PacketCache::new();
        let k = key("Edit");
        store(&cache, &k, 0.85, 100);
        let config = CacheConfig::default();
        assert!(cache.lookup(&k, &config, 100 + config.ttl_secs).is_some());
        assert!(cache.lookup(&k, &config, 101 + config.ttl_secs).is_none());
    }

    #[test]
    fn test_relaxed_lookup_tags_lineage() {
        let cache = PacketCache::new();
        let stored_key = key("Edit");
        store(&cache, &stored_key, 0.85, 100);

        let other = AdviceContext::new("/proj", "s2", "Edit")
            .with_intent("testing")
            .with_last_prompt("different prompt")
            .cache_key();
        let config = CacheConfig::default();
        let hit = cache.lookup(&other, &config, 150).unwrap();
        assert_eq!(hit.confidence, MatchConfidence::Relaxed);
        assert_eq!(hit.packet.lineage.confidence, MatchConfidence::Relaxed);

        // Too old for a relaxed match.
        assert!(cache.lookup(&other, &config, 100 + config.relaxed_max_age_secs + 1).is_none());
    }

    #[test]
    fn test_relaxed_lookup_falls_back_after_invalidation() {
        let cache = PacketCache::new();
        let config = CacheConfig::default();
        let older = AdviceContext::new("/proj", "s1", "Edit")
            .with_last_prompt("first")
            .cache_key();
        let newer = AdviceContext::new("/proj", "s1", "Edit")
            .with_last_prompt("second")
            .cache_key();
        cache.store(&older, ranking(0.85, &["src/auth.rs"]), &config, &GateConfig::default(), 100);
        cache.store(&newer, ranking(0.85, &["src/db.rs"]), &config, &GateConfig::default(), 101);

        assert_eq!(cache.invalidate_resource("src/db.rs", 102), 1);
        assert!(cache.lookup(&older, &config, 103).is_some());

        let fresh = AdviceContext::new("/proj", "s1", "Edit")
            .with_last_prompt("third")
            .cache_key();
        let hit = cache.lookup(&fresh, &config, 103).unwrap();
        assert_eq!(hit.confidence, MatchConfidence::Relaxed);
        assert_eq!(hit.packet.key.exact(), older.exact());
    }

    #[test]
    fn test_relaxed_lookup_requires_confidence() {
        let cache = PacketCache::new();
        store(&cache, &key("Edit"), 0.3, 100);
        let other = AdviceContext::new("/proj", "s2", "Edit").cache_key();
        assert!(cache.lookup(&other, &CacheConfig::default(), 101).is_none());
    }

    #[test]
    fn test_invalidate_resource() {
        let cache = PacketCache::new();
        let k = key("Edit");
        store(&cache, &k, 0.85, 100);

        assert_eq!(cache.invalidate_resource("/proj/src/auth.rs", 105), 1);
        assert!(cache.lookup(&k, &CacheConfig::default(), 106).is_none());

        let packet = cache.get(&k).unwrap();
        assert_eq!(packet.status, PacketStatus::Invalidated);
        assert!(packet.invalidation_reason.as_deref().unwrap().contains("src/auth.rs"));

        // Already invalidated packets are not counted again.
        assert_eq!(cache.invalidate_resource("src/auth.rs", 107), 0);
    }

    #[test]
    fn test_sweep_demotes_and_collects() {
        let cache = PacketCache::new();
        let config = CacheConfig::default();
        let k = key("Edit");
        store(&cache, &k, 0.85, 0);

        // Unused for the whole reuse window.
        let report = cache.sweep_stale(&config, config.reuse_window_secs);
        assert_eq!(report.demoted, 1);
        assert_eq!(cache.get(&k).unwrap().status, PacketStatus::Stale);

        let later = config.reuse_window_secs + config.retention_secs + 1;
        let report = cache.sweep_stale(&config, later);
        assert_eq!(report.collected, 1);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_sweep_keeps_used_packets() {
        let cache = PacketCache::new();
        let config = CacheConfig::default();
        let k = key("Edit");
        store(&cache, &k, 0.85, 0);
        cache.lookup(&k, &config, config.reuse_window_secs - 10).unwrap();

        let report = cache.sweep_stale(&config, config.reuse_window_secs);
        assert_eq!(report.demoted, 0);
    }

    #[test]
    fn test_persistence_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache").join("index.json");
        let k = key("Edit");
        {
            let cache = PacketCache::open(&path);
            store(&cache, &k, 0.85, 100);
            cache.flush().unwrap();
        }
        let reopened = PacketCache::open(&path);
        let hit = reopened.lookup(&k, &CacheConfig::default(), 120).unwrap();
        assert_eq!(hit.packet.ranked.len(), 1);
    }

    #[test]
    fn test_corrupted_index_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("index.json");
        std::fs::write(&path, "{{{{").unwrap();
        let cache = PacketCache::open(&path);
        assert!(cache.is_empty());
        // The next flush replaces the corrupted file.
        store(&cache, &key("Edit"), 0.85, 1);
        cache.flush().unwrap();
        assert_eq!(PacketCache::open(&path).len(), 1);
    }
}
