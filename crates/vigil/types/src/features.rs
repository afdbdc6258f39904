//! Feature vectors derived from windows.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{SeriesKey, WindowId};

/// Number of features in every [`FeatureVector`].
pub const FEATURE_LEN: usize = 7;

/// Position of each statistic in a feature vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Feature {
    Count = 0,
    Mean = 1,
    Variance = 2,
    Min = 3,
    Max = 4,
    /// Mean of first differences between consecutive values
    RateOfChange = 5,
    /// p90 - p10
    PercentileSpread = 6,
}

impl Feature {
    pub const ALL: [Feature; FEATURE_LEN] = [
        Feature::Count,
        Feature::Mean,
        Feature::Variance,
        Feature::Min,
        Feature::Max,
        Feature::RateOfChange,
        Feature::PercentileSpread,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            Feature::Count => "count",
            Feature::Mean => "mean",
            Feature::Variance => "variance",
            Feature::Min => "min",
            Feature::Max => "max",
            Feature::RateOfChange => "rate_of_change",
            Feature::PercentileSpread => "percentile_spread",
        }
    }
}

/// Fixed-length numeric summary of exactly one window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// Series the window belonged to
    pub series: SeriesKey,

    /// Window the vector was derived from
    pub window_id: WindowId,

    /// Window bounds
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,

    /// Feature values, indexed by [`Feature`]
    pub values: [f64; FEATURE_LEN],

    /// Set for the sentinel vector of a window with no records
    pub empty: bool,
}

impl FeatureVector {
    pub fn get(&self, feature: Feature) -> f64 {
        self.values[feature.index()]
    }

    pub fn count(&self) -> f64 {
        self.get(Feature::Count)
    }

    pub fn mean(&self) -> f64 {
        self.get(Feature::Mean)
    }

    pub fn variance(&self) -> f64 {
        self.get(Feature::Variance)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_indices_are_dense() {
        for (i, feature) in Feature::ALL.iter().enumerate() {
            assert_eq!(feature.index(), i);
        }
    }

    #[test]
    fn test_accessors() {
        let now = Utc::now();
        let fv = FeatureVector {
            series: SeriesKey::new("cpu"),
            window_id: WindowId(0),
            window_start: now,
            window_end: now,
            values: [60.0, 10.0, 0.01, 9.9, 10.1, 0.0, 0.2],
            empty: false,
        };
        assert_eq!(fv.count(), 60.0);
        assert_eq!(fv.mean(), 10.0);
        assert_eq!(fv.variance(), 0.01);
        assert_eq!(fv.get(Feature::PercentileSpread), 0.2);
    }
}
