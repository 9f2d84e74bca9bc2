//! Downtime classification over a normalized sample series.
//!
//! Each sample stands for one bucket of `bucket.period`. A bucket counts as
//! down when the [`DownRule`] (or any caller predicate) says so; buckets that
//! should exist but have no sample are charged as gap downtime. Absence of
//! telemetry is treated like an absent resource, so an empty series charges
//! the whole window.

use serde::{Deserialize, Serialize};

use crate::sample::{Sample, SampleSeries};
use crate::window::{BucketSpec, TimeWindow};

/// Tolerance when comparing minute totals against the window length.
const MINUTES_EPSILON: f64 = 1e-9;

/// Per-sample rule deciding whether a bucket was down.
///
/// Non-finite sample values are always down: a NaN reading is not evidence
/// that the resource was up.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "threshold", rename_all = "snake_case")]
pub enum DownRule {
    /// Down when the value is exactly zero (running tasks, healthy hosts).
    ZeroIsDown,
    /// Down when the value is positive (failed status checks, unhealthy hosts).
    NonZeroIsDown,
    /// Down when the value is strictly below the threshold.
    ThresholdBelow(f64),
    /// Down when the value is strictly above the threshold.
    ThresholdAbove(f64),
}

impl DownRule {
    pub fn is_down(&self, sample: &Sample) -> bool {
        let v = sample.value;
        if !v.is_finite() {
            return true;
        }
        match *self {
            Self::ZeroIsDown => v == 0.0,
            Self::NonZeroIsDown => v > 0.0,
            Self::ThresholdBelow(x) => v < x,
            Self::ThresholdAbove(x) => v > x,
        }
    }
}

impl std::fmt::Display for DownRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ZeroIsDown => write!(f, "value == 0"),
            Self::NonZeroIsDown => write!(f, "value > 0"),
            Self::ThresholdBelow(x) => write!(f, "value < {x}"),
            Self::ThresholdAbove(x) => write!(f, "value > {x}"),
        }
    }
}

/// Conservative defaults that are policy rather than arithmetic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DowntimePolicy {
    /// Charge each missing bucket as downtime.
    pub charge_gaps: bool,
    /// An empty series means the resource never ran (otherwise `NoData`).
    pub empty_series_is_down: bool,
    /// Cap total downtime at the window length and flag the cap.
    pub clamp_to_window: bool,
}

impl Default for DowntimePolicy {
    fn default() -> Self {
        Self {
            charge_gaps: true,
            empty_series_is_down: true,
            clamp_to_window: true,
        }
    }
}

/// Downtime split into what was observed and what was inferred from gaps.
///
/// `total_down_minutes == observed_down_minutes + gap_down_minutes` always
/// holds, including after a clamp.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DowntimeResult {
    pub observed_down_minutes: f64,
    pub gap_down_minutes: f64,
    pub total_down_minutes: f64,
    /// Buckets a gap-free series would hold.
    pub expected_samples: u64,
    /// In-window samples actually present.
    pub observed_samples: usize,
    /// Samples the rule classified as down.
    pub down_samples: usize,
    /// The series was empty: "100% down, no data observed".
    pub fully_missing: bool,
    /// Raw downtime exceeded the window and was capped.
    pub clamped: bool,
}

impl DowntimeResult {
    pub fn total_down_hours(&self) -> f64 {
        self.total_down_minutes / 60.0
    }

    pub fn total_down_seconds(&self) -> f64 {
        self.total_down_minutes * 60.0
    }

    /// Missing buckets (never negative).
    pub fn missing_samples(&self) -> u64 {
        self.expected_samples
            .saturating_sub(self.observed_samples as u64)
    }
}

/// Classify `series` with one of the built-in rules.
pub fn classify(
    series: &SampleSeries,
    window: &TimeWindow,
    bucket: &BucketSpec,
    rule: &DownRule,
    policy: &DowntimePolicy,
) -> DowntimeResult {
    classify_with(series, window, bucket, policy, |s| rule.is_down(s))
}

/// Classify `series` with an arbitrary per-sample predicate.
///
/// Samples outside `window` are ignored for both the down count and the
/// present count.
pub fn classify_with<F>(
    series: &SampleSeries,
    window: &TimeWindow,
    bucket: &BucketSpec,
    policy: &DowntimePolicy,
    is_down: F,
) -> DowntimeResult
where
    F: Fn(&Sample) -> bool,
{
    let period_min = bucket.period_minutes();
    let window_min = window.total_minutes();

    let in_window = series.iter().filter(|s| window.contains(s.timestamp));
    let (present, down) = in_window.fold((0usize, 0usize), |(present, down), s| {
        (present + 1, down + usize::from(is_down(s)))
    });

    // An empty series is charged the exact window, even when the window is
    // not a whole number of periods.
    if present == 0 {
        let gap = if policy.empty_series_is_down {
            window_min
        } else {
            0.0
        };
        return finish(
            0.0,
            gap,
            window_min,
            policy,
            DowntimeResult {
                observed_down_minutes: 0.0,
                gap_down_minutes: 0.0,
                total_down_minutes: 0.0,
                expected_samples: bucket.expected_count,
                observed_samples: 0,
                down_samples: 0,
                fully_missing: true,
                clamped: false,
            },
        );
    }

    let observed = down as f64 * period_min;
    let gap = if policy.charge_gaps {
        bucket.expected_count.saturating_sub(present as u64) as f64 * period_min
    } else {
        0.0
    };

    finish(
        observed,
        gap,
        window_min,
        policy,
        DowntimeResult {
            observed_down_minutes: 0.0,
            gap_down_minutes: 0.0,
            total_down_minutes: 0.0,
            expected_samples: bucket.expected_count,
            observed_samples: present,
            down_samples: down,
            fully_missing: false,
            clamped: false,
        },
    )
}

/// Fill in the minute totals, applying the clamp policy.
///
/// A clamp trims the gap term first, then observed downtime, so the two
/// components still add up to the total.
fn finish(
    observed: f64,
    gap: f64,
    window_min: f64,
    policy: &DowntimePolicy,
    mut result: DowntimeResult,
) -> DowntimeResult {
    let (observed, gap, clamped) =
        if policy.clamp_to_window && observed + gap > window_min + MINUTES_EPSILON {
            let observed = observed.min(window_min);
            (observed, window_min - observed, true)
        } else {
            (observed, gap, false)
        };
    result.observed_down_minutes = observed;
    result.gap_down_minutes = gap;
    result.total_down_minutes = observed + gap;
    result.clamped = clamped;
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sample::{Statistic, normalize};
    use chrono::{DateTime, TimeDelta, TimeZone, Utc};

    fn origin() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
    }

    fn window_hours(h: i64) -> TimeWindow {
        TimeWindow::new(origin(), origin() + TimeDelta::hours(h)).unwrap()
    }

    /// Series with one sample per 5-minute bucket, values from `values`.
    fn series(values: &[f64]) -> SampleSeries {
        normalize(values.iter().enumerate().map(|(i, v)| {
            Sample::new(
                origin() + TimeDelta::minutes(5 * i as i64),
                *v,
                Statistic::Average,
            )
        }))
    }

    /// Zero-is-down with the default policy.
    fn classify_zero(series: &SampleSeries, w: &TimeWindow, b: &BucketSpec) -> DowntimeResult {
        classify(series, w, b, &DownRule::ZeroIsDown, &DowntimePolicy::default())
    }

    // -----------------------------------------------------------------------
    // Rules
    // -----------------------------------------------------------------------

    #[test]
    fn test_rules() {
        let s = |v| Sample::new(origin(), v, Statistic::Average);
        assert!(DownRule::ZeroIsDown.is_down(&s(0.0)));
        assert!(!DownRule::ZeroIsDown.is_down(&s(0.5)));
        assert!(DownRule::NonZeroIsDown.is_down(&s(1.0)));
        assert!(!DownRule::NonZeroIsDown.is_down(&s(0.0)));
        assert!(DownRule::ThresholdBelow(2.0).is_down(&s(1.0)));
        assert!(!DownRule::ThresholdBelow(2.0).is_down(&s(2.0)));
        assert!(DownRule::ThresholdAbove(0.5).is_down(&s(0.75)));
        assert!(DownRule::ZeroIsDown.is_down(&s(f64::NAN)));
        assert!(DownRule::NonZeroIsDown.is_down(&s(f64::INFINITY)));
    }

    #[test]
    fn test_rule_serde_shape() {
        let json = serde_json::to_string(&DownRule::ThresholdBelow(1.5)).unwrap();
        assert_eq!(json, r#"{"kind":"threshold_below","threshold":1.5}"#);
        let rule: DownRule = serde_json::from_str(r#"{"kind":"zero_is_down"}"#).unwrap();
        assert_eq!(rule, DownRule::ZeroIsDown);
    }

    // -----------------------------------------------------------------------
    // Observed vs gap downtime
    // -----------------------------------------------------------------------

    #[test]
    fn test_full_series_has_no_gap_term() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        let values: Vec<f64> = (0..12).map(|i| if i % 4 == 0 { 0.0 } else { 2.0 }).collect();
        for rule in [
            DownRule::ZeroIsDown,
            DownRule::NonZeroIsDown,
            DownRule::ThresholdBelow(1.0),
        ] {
            let r = classify(&series(&values), &w, &b, &rule, &DowntimePolicy::default());
            assert_eq!(r.gap_down_minutes, 0.0);
            assert_eq!(r.total_down_minutes, r.observed_down_minutes);
        }
    }

    #[test]
    fn test_zero_is_down_counts_buckets() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        let mut values = vec![1.0; 12];
        values[3] = 0.0;
        values[4] = 0.0;
        let r = classify_zero(&series(&values), &w, &b);
        assert_eq!(r.down_samples, 2);
        assert!((r.observed_down_minutes - 10.0).abs() < 1e-12);
        assert!(!r.clamped);
    }

    #[test]
    fn test_gaps_are_charged() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        let r = classify_zero(&series(&[1.0; 9]), &w, &b);
        assert_eq!(r.missing_samples(), 3);
        assert!((r.gap_down_minutes - 15.0).abs() < 1e-12);
        assert!((r.total_down_minutes - 15.0).abs() < 1e-12);
    }

    #[test]
    fn test_gaps_ignored_when_policy_disabled() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        let policy = DowntimePolicy {
            charge_gaps: false,
            ..DowntimePolicy::default()
        };
        let r = classify(&series(&[1.0; 9]), &w, &b, &DownRule::ZeroIsDown, &policy);
        assert_eq!(r.total_down_minutes, 0.0);
    }

    #[test]
    fn test_out_of_window_samples_ignored() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        // 14 samples: the last two fall at or after window end.
        let r = classify_zero(&series(&[0.0; 14]), &w, &b);
        assert_eq!(r.observed_samples, 12);
        assert!((r.total_down_minutes - 60.0).abs() < 1e-12);
    }

    // -----------------------------------------------------------------------
    // Empty series
    // -----------------------------------------------------------------------

    #[test]
    fn test_empty_series_is_full_window() {
        let w = TimeWindow::last_days(origin(), 30).unwrap();
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        let r = classify_zero(&SampleSeries::empty(), &w, &b);
        assert!(r.fully_missing);
        assert_eq!(r.observed_down_minutes, 0.0);
        assert_eq!(r.total_down_minutes, w.total_minutes());
    }

    #[test]
    fn test_empty_series_charges_exact_window_when_not_period_multiple() {
        let w = TimeWindow::new(origin(), origin() + TimeDelta::seconds(899)).unwrap();
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        assert_eq!(b.expected_count, 2);
        let r = classify_zero(&SampleSeries::empty(), &w, &b);
        assert!(r.fully_missing);
        assert!(!r.clamped);
        assert_eq!(r.total_down_minutes, w.total_minutes());
        assert_eq!(r.gap_down_minutes, 899.0 / 60.0);
    }

    #[test]
    fn test_empty_series_without_policy_charges_nothing() {
        let w = window_hours(2);
        let b = BucketSpec::for_window_secs(&w, 60).unwrap();
        let policy = DowntimePolicy {
            empty_series_is_down: false,
            ..DowntimePolicy::default()
        };
        let r = classify(&SampleSeries::empty(), &w, &b, &DownRule::ZeroIsDown, &policy);
        assert!(r.fully_missing);
        assert_eq!(r.total_down_minutes, 0.0);
    }

    // -----------------------------------------------------------------------
    // Clamp
    // -----------------------------------------------------------------------

    #[test]
    fn test_overlap_is_clamped_and_flagged() {
        // Bucket period (10 min) larger than sample spacing (5 min): 12 down
        // samples charge 120 min in a 60 min window.
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 600).unwrap();
        let r = classify_zero(&series(&[0.0; 12]), &w, &b);
        assert!(r.clamped);
        assert!((r.total_down_minutes - 60.0).abs() < 1e-12);
        assert_eq!(r.total_down_minutes, r.observed_down_minutes + r.gap_down_minutes);
    }

    #[test]
    fn test_clamp_disabled_reports_raw_total() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 600).unwrap();
        let policy = DowntimePolicy {
            clamp_to_window: false,
            ..DowntimePolicy::default()
        };
        let r = classify(&series(&[0.0; 12]), &w, &b, &DownRule::ZeroIsDown, &policy);
        assert!(!r.clamped);
        assert!((r.total_down_minutes - 120.0).abs() < 1e-12);
    }

    // -----------------------------------------------------------------------
    // Custom predicates
    // -----------------------------------------------------------------------

    #[test]
    fn test_classify_with_custom_predicate() {
        let w = window_hours(1);
        let b = BucketSpec::for_window_secs(&w, 300).unwrap();
        let values: Vec<f64> = (0..12).map(|i| i as f64).collect();
        let r = classify_with(&series(&values), &w, &b, &DowntimePolicy::default(), |s| {
            (s.value as i64) % 2 == 1
        });
        assert_eq!(r.down_samples, 6);
        assert!((r.total_down_hours() - 0.5).abs() < 1e-12);
    }
}
