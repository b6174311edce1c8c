//! Config command handler.
//!
//! Prints the resolved configuration snapshot and where its layers came from.

use advisory::config::{AdvisoryConfig, ConfigPaths};
use std::io::{self, Write};
use std::path::Path;

/// Config command.
pub fn cmd_config(config: &AdvisoryConfig, paths: &ConfigPaths) -> anyhow::Result<()> {
    let mut out = io::stdout().lock();

    writeln!(out, "Resolved Configuration")?;
    writeln!(out, "======================")?;
    writeln!(out)?;
    writeln!(out, "Layers:")?;
    display_layer(&mut out, "baseline", paths.baseline.as_deref())?;
    display_layer(&mut out, "overrides", paths.overrides.as_deref())?;
    writeln!(out, "  - env: ADVISORY_* variables")?;
    writeln!(out)?;

    writeln!(out, "Data Directory: {}", config.data_dir.display())?;
    writeln!(out, "Reload Interval: {}s", config.reload_interval_secs)?;
    writeln!(out)?;

    let ranker = &config.ranker;
    writeln!(out, "Ranker:")?;
    writeln!(
        out,
        "  Weights: relevance={} quality={} trust={}",
        ranker.weights.relevance, ranker.weights.quality, ranker.weights.trust
    )?;
    writeln!(out, "  Top K: {}", ranker.top_k)?;
    writeln!(out, "  Source Timeout: {}ms", ranker.source_timeout_ms)?;
    writeln!(
        out,
        "  Modifier Range: [{}, {}]",
        ranker.modifier_min, ranker.modifier_max
    )?;
    writeln!(out)?;

    let cache = &config.cache;
    writeln!(out, "Cache:")?;
    writeln!(out, "  TTL: {}s", cache.ttl_secs)?;
    writeln!(
        out,
        "  Relaxed Match: confidence >= {}, age <= {}s",
        cache.relaxed_min_confidence, cache.relaxed_max_age_secs
    )?;
    writeln!(
        out,
        "  Reuse: {} hit(s) within {}s",
        cache.min_hits_in_window, cache.reuse_window_secs
    )?;
    writeln!(out, "  Retention: {}s", cache.retention_secs)?;
    writeln!(out, "  Max Packets: {}", cache.max_packets)?;
    writeln!(out)?;

    display_gate(&mut out, config)?;

    let synthesis = &config.synthesis;
    writeln!(out, "Synthesis:")?;
    writeln!(out, "  Max Chars: {}", synthesis.max_chars)?;
    writeln!(out, "  Hot Budget: {}ms", synthesis.hot_budget_ms)?;
    writeln!(out, "  Refinement: {}", synthesis.refinement_enabled)?;
    if synthesis.refinement_enabled {
        writeln!(
            out,
            "    Endpoint: {}",
            synthesis.refinement_endpoint.as_deref().unwrap_or("(default)")
        )?;
        writeln!(
            out,
            "    Model: {}",
            synthesis.refinement_model.as_deref().unwrap_or("(default)")
        )?;
        writeln!(
            out,
            "    Timeout: {}ms (min budget {}ms)",
            synthesis.refinement_timeout_ms, synthesis.refinement_min_budget_ms
        )?;
    }
    writeln!(out)?;

    let feedback = &config.feedback;
    writeln!(out, "Feedback:")?;
    writeln!(out, "  Pending TTL: {}s", feedback.pending_ttl_secs)?;
    writeln!(out, "  Correction Window: {}s", feedback.correction_window_secs)?;
    writeln!(out, "  Min Overlap: {}", feedback.min_overlap)?;
    writeln!(out, "  Half-life: {}s", feedback.half_life_secs)?;
    writeln!(out)?;

    let workers = &config.workers;
    writeln!(out, "Workers:")?;
    writeln!(
        out,
        "  Prefetch: {} worker(s), queue {}",
        workers.prefetch_workers, workers.prefetch_queue
    )?;
    writeln!(out, "  Outcome Queue: {}", workers.outcome_queue)?;
    writeln!(out, "  Sweep Interval: {}s", workers.sweep_interval_secs)?;
    writeln!(
        out,
        "  Pause: latency > {}ms or backlog > {}",
        workers.pause_latency_ms, workers.pause_queue_depth
    )?;
    writeln!(out, "  Prefetch Tools: {}", workers.prefetch_tools.join(", "))?;
    writeln!(out)?;

    let logging = &config.logging;
    writeln!(out, "Logging:")?;
    writeln!(out, "  Format: {:?}", logging.format)?;
    writeln!(
        out,
        "  Filter: {}",
        logging.filter.as_deref().unwrap_or("(default)")
    )?;
    match &logging.file {
        Some(file) => writeln!(out, "  File: {}", file.display())?,
        None => writeln!(out, "  File: (stderr)")?,
    }
    Ok(())
}

fn display_layer(out: &mut impl Write, name: &str, path: Option<&Path>) -> io::Result<()> {
    match path {
        Some(path) if path.exists() => writeln!(out, "  - {name}: {}", path.display()),
        Some(path) => writeln!(out, "  - {name}: {} (not found)", path.display()),
        None => writeln!(out, "  - {name}: (none)"),
    }
}

fn display_gate(out: &mut impl Write, config: &AdvisoryConfig) -> io::Result<()> {
    let gate = &config.gate;
    writeln!(out, "Gate:")?;
    writeln!(out, "  Emission Budget: {}", gate.emission_budget)?;
    writeln!(
        out,
        "  Tiers: block>={} warning>={} note>={} whisper>={}",
        gate.thresholds.block, gate.thresholds.warning, gate.thresholds.note, gate.thresholds.whisper
    )?;
    writeln!(out, "  Shown TTL: {}s", gate.shown_ttl_secs)?;
    let mut overrides: Vec<_> = gate.source_shown_ttl_secs.iter().collect();
    overrides.sort_by_key(|(kind, _)| kind.as_str());
    for (kind, ttl) in overrides {
        writeln!(out, "    {kind}: {ttl}s")?;
    }
    writeln!(out, "  Tool Cooldown: {}s", gate.tool_cooldown_secs)?;
    writeln!(out, "  Global Dedup: {}s", gate.global_dedup_secs)?;
    writeln!(
        out,
        "  Window: {} emission(s) per {}s",
        gate.window_max_emissions, gate.window_secs
    )?;
    writeln!(
        out,
        "  Fallback: {} (every {} exhausted call(s))",
        gate.fallback_enabled, gate.fallback_interval
    )?;
    writeln!(out, "  Suppress Whispers: {}", gate.suppress_whispers)?;
    writeln!(out)
}
