//! Trend classification between two time windows

use serde::{Deserialize, Serialize};
use std::fmt;

/// Direction and strength of change between an older and a recent window
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Trend {
    IncreasingFast,
    Increasing,
    Stable,
    Decreasing,
    DecreasingFast,
}

impl Trend {
    /// Classify `recent` against `older`.
    ///
    /// Thresholds are strict: +20% exactly is `Increasing`, +5% exactly is
    /// `Stable`. With no older activity any recent activity counts as
    /// `Increasing`.
    pub fn classify(recent: u64, older: u64) -> Self {
        let Some(change) = percent_change(recent, older) else {
            return if recent == 0 { Trend::Stable } else { Trend::Increasing };
        };

        if change > 20.0 {
            Trend::IncreasingFast
        } else if change > 5.0 {
            Trend::Increasing
        } else if change < -20.0 {
            Trend::DecreasingFast
        } else if change < -5.0 {
            Trend::Decreasing
        } else {
            Trend::Stable
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Trend::IncreasingFast => "increasing_fast",
            Trend::Increasing => "increasing",
            Trend::Stable => "stable",
            Trend::Decreasing => "decreasing",
            Trend::DecreasingFast => "decreasing_fast",
        }
    }

    pub fn is_decreasing(&self) -> bool {
        matches!(self, Trend::Decreasing | Trend::DecreasingFast)
    }
}

impl fmt::Display for Trend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// `(recent - older) / older * 100`, or `None` when `older` is zero
pub fn percent_change(recent: u64, older: u64) -> Option<f64> {
    if older == 0 {
        return None;
    }
    Some((recent as f64 - older as f64) / older as f64 * 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_older_window() {
        assert_eq!(Trend::classify(0, 0), Trend::Stable);
        assert_eq!(Trend::classify(1, 0), Trend::Increasing);
        assert_eq!(Trend::classify(500, 0), Trend::Increasing);
    }

    #[test]
    fn test_upper_boundaries_are_strict() {
        assert_eq!(Trend::classify(120, 100), Trend::Increasing);
        assert_eq!(Trend::classify(121, 100), Trend::IncreasingFast);
        assert_eq!(Trend::classify(105, 100), Trend::Stable);
        assert_eq!(Trend::classify(106, 100), Trend::Increasing);
    }

    #[test]
    fn test_lower_boundaries_are_strict() {
        assert_eq!(Trend::classify(80, 100), Trend::Decreasing);
        assert_eq!(Trend::classify(79, 100), Trend::DecreasingFast);
        assert_eq!(Trend::classify(95, 100), Trend::Stable);
        assert_eq!(Trend::classify(94, 100), Trend::Decreasing);
        assert_eq!(Trend::classify(0, 100), Trend::DecreasingFast);
    }

    #[test]
    fn test_equal_windows_stable() {
        assert_eq!(Trend::classify(42, 42), Trend::Stable);
    }

    #[test]
    fn test_serialized_name() {
        assert_eq!(
            serde_json::to_string(&Trend::IncreasingFast).unwrap(),
            "\"increasing_fast\""
        );
        assert_eq!(Trend::DecreasingFast.to_string(), "decreasing_fast");
    }
}
