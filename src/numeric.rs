// 🔢 Numeric helpers - finite guards, ratios, percentiles
// Every ratio that leaves the engine goes through `finite` so that no NaN or
// infinity can reach a serialized snapshot.

/// Keep a value only if it is a real, finite number
pub fn finite(value: f64) -> Option<f64> {
    if value.is_finite() {
        Some(value)
    } else {
        None
    }
}

/// Division that is undefined (None) for a zero or non-finite denominator
pub fn safe_div(numerator: f64, denominator: f64) -> Option<f64> {
    if denominator == 0.0 || !denominator.is_finite() || !numerator.is_finite() {
        return None;
    }
    finite(numerator / denominator)
}

/// Linear-interpolated percentile (`p` in 0..=100)
///
/// Sorts ascending, takes `index = (n - 1) * p / 100` and interpolates between
/// the floor and ceiling positions. Empty input has no percentile.
///
/// ```
/// use cashflow_risk::numeric::percentile;
/// let p95 = percentile(&[10.0, 10.0, 10.0, 10.0, 100.0], 95.0).unwrap();
/// assert!((p95 - 82.0).abs() < 1e-9);
/// ```
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(|a, b| a.total_cmp(b));

    let p = p.clamp(0.0, 100.0);
    let index = (sorted.len() - 1) as f64 * p / 100.0;
    let lower = index.floor() as usize;
    let upper = index.ceil() as usize;
    let fraction = index - lower as f64;

    finite(sorted[lower] + fraction * (sorted[upper] - sorted[lower]))
}

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    finite(values.iter().sum::<f64>() / values.len() as f64)
}

/// Population standard deviation
pub fn std_dev(values: &[f64]) -> Option<f64> {
    let m = mean(values)?;
    let variance = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / values.len() as f64;
    finite(variance.sqrt())
}

/// Round for display without letting -0.0 leak into reports
pub fn round2(value: f64) -> f64 {
    let rounded = (value * 100.0).round() / 100.0;
    if rounded == 0.0 {
        0.0
    } else {
        rounded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_percentile_linear_interpolation() {
        let p = percentile(&[10.0, 10.0, 10.0, 10.0, 100.0], 95.0).unwrap();
        assert!((p - 82.0).abs() < 1e-9);

        // Order of input does not matter
        let p = percentile(&[100.0, 10.0, 10.0, 10.0, 10.0], 95.0).unwrap();
        assert!((p - 82.0).abs() < 1e-9);
    }

    #[test]
    fn test_percentile_edges() {
        assert_eq!(percentile(&[], 95.0), None);
        assert_eq!(percentile(&[42.0], 95.0), Some(42.0));
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 0.0), Some(1.0));
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 100.0), Some(3.0));
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 50.0), Some(2.0));
    }

    #[test]
    fn test_safe_div() {
        assert_eq!(safe_div(1.0, 0.0), None);
        assert_eq!(safe_div(f64::NAN, 2.0), None);
        assert_eq!(safe_div(1.0, f64::INFINITY), None);
        assert_eq!(safe_div(3.0, 2.0), Some(1.5));
    }

    #[test]
    fn test_std_dev_population() {
        let sd = std_dev(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]).unwrap();
        assert!((sd - 2.0).abs() < 1e-12);
        assert_eq!(std_dev(&[]), None);
    }

    #[test]
    fn test_finite_guard() {
        assert_eq!(finite(f64::NAN), None);
        assert_eq!(finite(f64::NEG_INFINITY), None);
        assert_eq!(finite(-3.5), Some(-3.5));
    }
}
