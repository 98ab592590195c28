//! Statistical reductions used by aggregation and reporting.
//!
//! - [`mean`], [`geometric_mean`]: Basic statistical functions
//! - [`quantile_max`]: Order statistic used by quantile Hausdorff distances

/// Arithmetic mean, `None` for an empty slice.
///
/// # Example
///
/// ```
/// use segmetrics::stats::mean;
///
/// assert_eq!(mean(&[1.0, 2.0, 3.0]), Some(2.0));
/// assert_eq!(mean(&[]), None);
/// ```
#[must_use]
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Geometric mean, `None` for an empty slice.
///
/// A zero anywhere yields 0; negative values yield NaN.
///
/// # Example
///
/// ```
/// use segmetrics::stats::geometric_mean;
///
/// let g = geometric_mean(&[1.0, 4.0]).unwrap();
/// assert!((g - 2.0).abs() < 1e-12);
/// ```
#[must_use]
pub fn geometric_mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    Some((log_sum / values.len() as f64).exp())
}

/// The `quantile`-th order statistic, without interpolation.
///
/// `quantile = 1` is the maximum; otherwise the value at index
/// `floor(quantile * (n - 1))` of the sorted values.
#[must_use]
pub fn quantile_max(values: &[f64], quantile: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    if quantile >= 1.0 {
        return values.iter().copied().reduce(f64::max);
    }
    let sorted = sorted(values);
    let index = (quantile * (sorted.len() - 1) as f64) as usize;
    Some(sorted[index])
}

fn sorted(values: &[f64]) -> Vec<f64> {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    sorted
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_geometric_mean() {
        assert_relative_eq!(geometric_mean(&[2.0, 8.0]).unwrap(), 4.0, epsilon = 1e-12);
        assert_eq!(geometric_mean(&[0.0, 8.0]), Some(0.0));
        assert_eq!(geometric_mean(&[]), None);
    }

    #[test]
    fn test_quantile_max() {
        let values = [4.0, 1.0, 3.0, 2.0, 5.0];
        assert_eq!(quantile_max(&values, 1.0), Some(5.0));
        assert_eq!(quantile_max(&values, 0.5), Some(3.0));
        assert_eq!(quantile_max(&values, 0.99), Some(4.0));
        assert_eq!(quantile_max(&[], 0.5), None);
    }
}
