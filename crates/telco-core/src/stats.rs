// ── Percentile helpers ────────────────────────────────────────────────────────

/// Compute the `p`-th percentile of a **sorted** slice using standard linear
/// interpolation (the same algorithm NumPy's `percentile` uses).
///
/// Returns `None` for an empty slice.
pub fn percentile(sorted_data: &[f64], p: f64) -> Option<f64> {
    if sorted_data.is_empty() {
        return None;
    }
    let len = sorted_data.len();
    if len == 1 {
        return Some(sorted_data[0]);
    }
    let rank = (p / 100.0) * (len as f64 - 1.0);
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Some(sorted_data[lo]);
    }
    let frac = rank - lo as f64;
    Some(sorted_data[lo] + frac * (sorted_data[hi] - sorted_data[lo]))
}

/// Median of the given values in any order. NaNs are ignored.
pub fn median(values: impl IntoIterator<Item = f64>) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    sorted.sort_by(f64::total_cmp);
    percentile(&sorted, 50.0)
}

/// Arithmetic mean, `None` when there are no values.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}
