//! Next-action prediction for prefetch.

/// Recent tools added to the configured common set.
const RECENT_PREDICTIONS: usize = 3;

/// Predicts the tools likely to run next.
///
/// The session's most recent tools come first, newest first, followed by the
/// configured common set. Duplicates are removed, keeping the first.
#[must_use]
pub fn predict_tools(common: &[String], recent: &[String]) -> Vec<String> {
    let mut predicted: Vec<String> = Vec::new();
    let candidates = recent
        .iter()
        .rev()
        .take(RECENT_PREDICTIONS)
        .chain(common.iter());
    for tool in candidates {
        if !tool.is_empty() && !predicted.contains(tool) {
            predicted.push(tool.clone());
        }
    }
    predicted
}
