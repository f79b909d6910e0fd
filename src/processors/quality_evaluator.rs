use crate::models::{Category, QcFlag, QcPercentages, ThresholdPolicy};
use std::fmt;
use std::ops::Range;

/// Flag counts of one variable over one window, against the number of steps
/// the window should hold
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct QcSummary {
    pub expected: usize,
    pub measured: usize,
    pub good: usize,
    pub medium: usize,
    pub poor: usize,
    pub missing: usize,
}

impl QcSummary {
    /// Count flags against `expected` steps. A sequence shorter than
    /// `expected` has its shortfall counted as missing.
    pub fn from_flags(flags: &[QcFlag], expected: usize) -> Self {
        let mut summary = Self {
            expected,
            ..Self::default()
        };

        for flag in flags.iter().take(expected) {
            match flag {
                QcFlag::Measured => summary.measured += 1,
                QcFlag::GoodGapfill => summary.good += 1,
                QcFlag::MediumGapfill => summary.medium += 1,
                QcFlag::PoorGapfill => summary.poor += 1,
                QcFlag::Missing => summary.missing += 1,
            }
        }

        summary.missing += expected.saturating_sub(flags.len());
        summary
    }

    fn percent(&self, count: usize) -> f64 {
        if self.expected == 0 {
            return 0.0;
        }
        100.0 * count as f64 / self.expected as f64
    }

    pub fn missing_percent(&self) -> f64 {
        if self.expected == 0 {
            return 100.0;
        }
        self.percent(self.missing)
    }

    pub fn gapfilled_percent(&self) -> f64 {
        self.percent(self.good + self.medium + self.poor)
    }

    pub fn percentages(&self) -> QcPercentages {
        QcPercentages {
            measured: self.percent(self.measured),
            good: self.percent(self.good),
            medium: self.percent(self.medium),
            poor: self.percent(self.poor),
            missing: self.missing_percent(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropReason {
    TooManyMissing { percent: f64, limit: f64 },
    TooMuchGapfill { percent: f64, limit: f64 },
    TierExceeded { tier: QcFlag, percent: f64, limit: f64 },
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DropReason::TooManyMissing { percent, limit } => {
                write!(f, "{:.1}% missing exceeds {:.1}%", percent, limit)
            }
            DropReason::TooMuchGapfill { percent, limit } => {
                write!(f, "{:.1}% gap-filled exceeds {:.1}%", percent, limit)
            }
            DropReason::TierExceeded {
                tier,
                percent,
                limit,
            } => write!(
                f,
                "{:.1}% {:?} exceeds {:.1}%",
                percent, tier, limit
            ),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum QcDecision {
    Retained,
    Dropped(DropReason),
}

impl QcDecision {
    pub fn is_retained(&self) -> bool {
        matches!(self, QcDecision::Retained)
    }
}

/// Applies a threshold policy to flag sequences
pub struct QualityEvaluator<'a> {
    policy: &'a ThresholdPolicy,
}

impl<'a> QualityEvaluator<'a> {
    pub fn new(policy: &'a ThresholdPolicy) -> Self {
        Self { policy }
    }

    /// Summarize and decide retention of a whole variable
    pub fn evaluate(
        &self,
        flags: &[QcFlag],
        expected: usize,
        category: Category,
    ) -> (QcSummary, QcDecision) {
        let summary = QcSummary::from_flags(flags, expected);
        let decision = self.decide(&summary, category);
        (summary, decision)
    }

    /// Decide retention over a slice of the grid, e.g. one year
    pub fn evaluate_window(
        &self,
        flags: &[QcFlag],
        window: Range<usize>,
        category: Category,
    ) -> QcDecision {
        let expected = window.len();
        let end = window.end.min(flags.len());
        let start = window.start.min(end);
        let summary = QcSummary::from_flags(&flags[start..end], expected);
        self.decide(&summary, category)
    }

    pub fn decide(&self, summary: &QcSummary, category: Category) -> QcDecision {
        if category == Category::Eval && self.policy.include_all_eval {
            return QcDecision::Retained;
        }

        let missing = summary.missing_percent();
        if missing > self.policy.missing_max {
            return QcDecision::Dropped(DropReason::TooManyMissing {
                percent: missing,
                limit: self.policy.missing_max,
            });
        }

        if let Some(limit) = self.policy.gapfill_all_max {
            let gapfilled = summary.gapfilled_percent();
            if gapfilled > limit {
                return QcDecision::Dropped(DropReason::TooMuchGapfill {
                    percent: gapfilled,
                    limit,
                });
            }
            return QcDecision::Retained;
        }

        let tiers = [
            (QcFlag::GoodGapfill, summary.good, self.policy.gapfill_good_max),
            (QcFlag::MediumGapfill, summary.medium, self.policy.gapfill_med_max),
            (QcFlag::PoorGapfill, summary.poor, self.policy.gapfill_poor_max),
        ];
        for (tier, count, limit) in tiers {
            if let Some(limit) = limit {
                let percent = summary.percent(count);
                if percent > limit {
                    return QcDecision::Dropped(DropReason::TierExceeded {
                        tier,
                        percent,
                        limit,
                    });
                }
            }
        }

        QcDecision::Retained
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(measured: usize, good: usize, medium: usize, poor: usize, missing: usize) -> Vec<QcFlag> {
        let mut out = Vec::new();
        out.extend(std::iter::repeat(QcFlag::Measured).take(measured));
        out.extend(std::iter::repeat(QcFlag::GoodGapfill).take(good));
        out.extend(std::iter::repeat(QcFlag::MediumGapfill).take(medium));
        out.extend(std::iter::repeat(QcFlag::PoorGapfill).take(poor));
        out.extend(std::iter::repeat(QcFlag::Missing).take(missing));
        out
    }

    #[test]
    fn test_fully_measured_always_retained() {
        let strict = ThresholdPolicy::new(0.0)
            .with_gapfill_all_max(0.0)
            .with_tier_limits(Some(0.0), Some(0.0), Some(0.0));
        let lenient = ThresholdPolicy::new(100.0);
        let all_measured = flags(100, 0, 0, 0, 0);

        for policy in [&strict, &lenient] {
            for category in [Category::Met, Category::Eval] {
                let (_, decision) =
                    QualityEvaluator::new(policy).evaluate(&all_measured, 100, category);
                assert!(decision.is_retained());
            }
        }
    }

    #[test]
    fn test_truncation_counts_as_missing() {
        let summary = QcSummary::from_flags(&flags(80, 0, 0, 0, 0), 100);
        assert_eq!(summary.missing, 20);
        assert!((summary.missing_percent() - 20.0).abs() < 1e-12);

        let policy = ThresholdPolicy::new(15.0);
        let (_, decision) =
            QualityEvaluator::new(&policy).evaluate(&flags(80, 0, 0, 0, 0), 100, Category::Met);
        assert!(matches!(
            decision,
            QcDecision::Dropped(DropReason::TooManyMissing { .. })
        ));
    }

    #[test]
    fn test_missing_threshold_is_strict_greater_than() {
        let policy = ThresholdPolicy::new(15.0);
        let evaluator = QualityEvaluator::new(&policy);
        let (_, at_limit) = evaluator.evaluate(&flags(85, 0, 0, 0, 15), 100, Category::Met);
        let (_, over_limit) = evaluator.evaluate(&flags(84, 0, 0, 0, 16), 100, Category::Met);
        assert!(at_limit.is_retained());
        assert!(!over_limit.is_retained());
    }

    #[test]
    fn test_gapfill_all_supersedes_tiers() {
        // 30 % poor exceeds the poor tier, but the combined limit allows it
        let policy = ThresholdPolicy::new(10.0)
            .with_gapfill_all_max(40.0)
            .with_tier_limits(Some(5.0), Some(5.0), Some(5.0));
        let (_, decision) = QualityEvaluator::new(&policy).evaluate(
            &flags(70, 0, 0, 30, 0),
            100,
            Category::Met,
        );
        assert!(decision.is_retained());

        let (_, decision) = QualityEvaluator::new(&policy).evaluate(
            &flags(50, 20, 0, 30, 0),
            100,
            Category::Met,
        );
        assert!(matches!(
            decision,
            QcDecision::Dropped(DropReason::TooMuchGapfill { .. })
        ));
    }

    #[test]
    fn test_tier_limits_without_combined_limit() {
        let policy = ThresholdPolicy::new(10.0).with_tier_limits(None, Some(10.0), None);
        let evaluator = QualityEvaluator::new(&policy);

        let (_, ok) = evaluator.evaluate(&flags(50, 50, 0, 0, 0), 100, Category::Met);
        assert!(ok.is_retained());

        let (_, dropped) = evaluator.evaluate(&flags(80, 0, 20, 0, 0), 100, Category::Met);
        assert_eq!(
            dropped,
            QcDecision::Dropped(DropReason::TierExceeded {
                tier: QcFlag::MediumGapfill,
                percent: 20.0,
                limit: 10.0,
            })
        );
    }

    #[test]
    fn test_missing_checked_before_gapfill() {
        let policy = ThresholdPolicy::new(10.0).with_gapfill_all_max(10.0);
        let (_, decision) = QualityEvaluator::new(&policy).evaluate(
            &flags(50, 0, 0, 30, 20),
            100,
            Category::Met,
        );
        assert!(matches!(
            decision,
            QcDecision::Dropped(DropReason::TooManyMissing { .. })
        ));
    }

    #[test]
    fn test_include_all_eval_skips_checks() {
        let policy = ThresholdPolicy::new(10.0).with_include_all_eval(true);
        let evaluator = QualityEvaluator::new(&policy);
        let mostly_missing = flags(10, 0, 0, 0, 90);

        let (summary, eval) = evaluator.evaluate(&mostly_missing, 100, Category::Eval);
        assert!(eval.is_retained());
        assert_eq!(summary.missing, 90);

        let (_, met) = evaluator.evaluate(&mostly_missing, 100, Category::Met);
        assert!(!met.is_retained());
    }

    #[test]
    fn test_window_evaluation() {
        let policy = ThresholdPolicy::new(10.0);
        let evaluator = QualityEvaluator::new(&policy);
        let mut sequence = flags(10, 0, 0, 0, 0);
        sequence.extend(flags(0, 0, 0, 0, 10));

        assert!(evaluator
            .evaluate_window(&sequence, 0..10, Category::Met)
            .is_retained());
        assert!(!evaluator
            .evaluate_window(&sequence, 10..20, Category::Met)
            .is_retained());
        // Window past the end of the sequence is all missing
        assert!(!evaluator
            .evaluate_window(&sequence, 20..30, Category::Met)
            .is_retained());
    }
}
