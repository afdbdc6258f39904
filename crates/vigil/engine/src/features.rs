//! Feature extraction.
//!
//! `extract` is a pure function of the window: the same records always
//! produce a bit-identical vector.

use tracing::warn;
use vigil_types::{Feature, FeatureVector, Window, FEATURE_LEN};

/// Summarize a sealed window into a fixed-length feature vector.
///
/// An empty window yields the all-zero sentinel with `empty` set.
pub fn extract(window: &Window) -> FeatureVector {
    let mut values = [0.0; FEATURE_LEN];
    let empty = window.is_empty();

    if !empty {
        let samples: Vec<f64> = window.values().collect();
        let n = samples.len() as f64;

        let mean = samples.iter().sum::<f64>() / n;
        let variance = if samples.len() < 2 {
            0.0
        } else {
            samples.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n
        };
        let min = samples.iter().copied().fold(f64::INFINITY, f64::min);
        let max = samples.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        let rate = if samples.len() < 2 {
            0.0
        } else {
            (samples[samples.len() - 1] - samples[0]) / (n - 1.0)
        };

        let mut sorted = samples;
        sorted.sort_by(f64::total_cmp);
        let spread = percentile(&sorted, 0.9) - percentile(&sorted, 0.1);

        values[Feature::Count.index()] = n;
        values[Feature::Mean.index()] = mean;
        values[Feature::Variance.index()] = variance;
        values[Feature::Min.index()] = min;
        values[Feature::Max.index()] = max;
        values[Feature::RateOfChange.index()] = rate;
        values[Feature::PercentileSpread.index()] = spread;

        for feature in Feature::ALL {
            let v = &mut values[feature.index()];
            if !v.is_finite() {
                warn!(
                    series = %window.series(),
                    window = %window.id(),
                    feature = feature.name(),
                    "Non-finite feature clamped to 0"
                );
                *v = 0.0;
            }
        }
    }

    FeatureVector {
        series: window.series().clone(),
        window_id: window.id(),
        window_start: window.start(),
        window_end: window.end(),
        values,
        empty,
    }
}

/// Linearly interpolated percentile of an ascending slice.
pub(crate) fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => 0.0,
        1 => sorted[0],
        len => {
            let rank = q.clamp(0.0, 1.0) * (len - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let frac = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use vigil_types::{Record, SeriesKey, WindowId};

    fn window(values: &[f64]) -> Window {
        let key = SeriesKey::new("cpu.load");
        let start = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
        let records = values
            .iter()
            .enumerate()
            .map(|(i, v)| Record::new(key.clone(), start + Duration::seconds(i as i64), *v))
            .collect();
        Window::sealed(key, WindowId(0), start, start + Duration::seconds(60), records)
    }

    #[test]
    fn test_basic_statistics() {
        let fv = extract(&window(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]));
        assert_eq!(fv.count(), 8.0);
        assert_eq!(fv.mean(), 5.0);
        assert_eq!(fv.variance(), 4.0);
        assert_eq!(fv.get(Feature::Min), 2.0);
        assert_eq!(fv.get(Feature::Max), 9.0);
        assert_eq!(fv.get(Feature::RateOfChange), 1.0);
        assert!(!fv.empty);
    }

    #[test]
    fn test_single_record_has_zero_variance() {
        let fv = extract(&window(&[42.0]));
        assert_eq!(fv.count(), 1.0);
        assert_eq!(fv.variance(), 0.0);
        assert_eq!(fv.get(Feature::RateOfChange), 0.0);
        assert_eq!(fv.get(Feature::PercentileSpread), 0.0);
    }

    #[test]
    fn test_empty_window_sentinel() {
        let fv = extract(&window(&[]));
        assert!(fv.empty);
        assert!(fv.values.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_non_finite_values_clamped() {
        let fv = extract(&window(&[1.0, f64::INFINITY]));
        assert!(fv.values.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_percentile_interpolation() {
        let sorted: Vec<f64> = (0..=10).map(f64::from).collect();
        assert_eq!(percentile(&sorted, 0.9), 9.0);
        assert_eq!(percentile(&sorted, 0.1), 1.0);
        assert!((percentile(&[0.0, 1.0], 0.25) - 0.25).abs() < 1e-12);
        assert_eq!(percentile(&[], 0.5), 0.0);
    }

    #[test]
    fn test_extract_is_deterministic() {
        let w = window(&[10.05, 9.93, 10.01, 9.99, 10.1]);
        let a = extract(&w);
        let b = extract(&w);
        for (x, y) in a.values.iter().zip(b.values.iter()) {
            assert_eq!(x.to_bits(), y.to_bits());
        }
    }
}
