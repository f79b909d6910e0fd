use crate::error::{ProcessingError, Result};
use crate::models::{Category, SiteDataset, ThresholdPolicy, TimeAxis};
use crate::processors::quality_evaluator::QualityEvaluator;
use std::ops::Range;
use tracing::debug;

/// Longest run of consecutive years in a sorted, de-duplicated list.
/// Ties go to the most recent run.
pub fn longest_contiguous_run(years: &[i32]) -> Option<(i32, i32)> {
    let mut best: Option<(i32, i32)> = None;
    let mut run_start = *years.first()?;
    let mut previous = run_start;

    fn consider(start: i32, end: i32, best: &mut Option<(i32, i32)>) {
        match *best {
            Some((b_start, b_end)) if b_end - b_start > end - start => {}
            _ => *best = Some((start, end)),
        }
    }

    for &year in &years[1..] {
        if year != previous + 1 {
            consider(run_start, previous, &mut best);
            run_start = year;
        }
        previous = year;
    }
    consider(run_start, previous, &mut best);

    best
}

/// Picks the output period of a site and checks sequences against it
pub struct TemporalAligner<'a> {
    policy: &'a ThresholdPolicy,
}

impl<'a> TemporalAligner<'a> {
    pub fn new(policy: &'a ThresholdPolicy) -> Self {
        Self { policy }
    }

    /// Years with input rows in which every essential meteorological
    /// variable passes the threshold policy
    pub fn acceptable_years(&self, dataset: &SiteDataset) -> Vec<i32> {
        let evaluator = QualityEvaluator::new(self.policy);
        let essential: Vec<_> = dataset
            .variables
            .iter()
            .filter(|v| v.spec.is_essential_met)
            .collect();

        dataset
            .grid
            .year_ranges()
            .into_iter()
            .filter(|(year, _)| dataset.observed_years.contains(year))
            .filter(|(year, range)| {
                let passes = essential.iter().all(|variable| {
                    evaluator
                        .evaluate_window(&variable.flags, range.clone(), Category::Met)
                        .is_retained()
                });
                if !passes {
                    debug!(site = %dataset.site_code, year, "year fails quality thresholds");
                }
                passes
            })
            .map(|(year, _)| year)
            .collect()
    }

    /// Longest contiguous span of acceptable years, if long enough
    pub fn select_window(&self, site_code: &str, acceptable: &[i32]) -> Result<(i32, i32)> {
        let required = self.policy.min_consecutive_years;
        let insufficient = |found: usize| ProcessingError::InsufficientContiguousYears {
            site: site_code.to_string(),
            found,
            required,
        };

        let (first, last) = longest_contiguous_run(acceptable).ok_or_else(|| insufficient(0))?;
        let found = (last - first + 1) as usize;
        if found < required as usize {
            return Err(insufficient(found));
        }
        Ok((first, last))
    }

    /// Resolve the output axis and the grid slots it covers
    pub fn align(&self, dataset: &SiteDataset) -> Result<(TimeAxis, Range<usize>)> {
        let acceptable = self.acceptable_years(dataset);
        let (first_year, last_year) = self.select_window(&dataset.site_code, &acceptable)?;
        let range = dataset.grid.year_span(first_year, last_year);

        let axis = TimeAxis {
            start: dataset.grid.timestamp(range.start),
            step_seconds: dataset.grid.step_seconds,
            n_steps: range.len(),
            first_year,
            last_year,
        };
        Ok((axis, range))
    }

    pub fn validate_length(axis: &TimeAxis, variable: &str, actual: usize) -> Result<()> {
        if actual != axis.n_steps {
            return Err(ProcessingError::SequenceLengthMismatch {
                variable: variable.to_string(),
                expected: axis.n_steps,
                actual,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gap_year_trims_shorter_run() {
        let policy = ThresholdPolicy::new(10.0).with_min_consecutive_years(3);
        let aligner = TemporalAligner::new(&policy);
        let window = aligner
            .select_window("US-Ha1", &[2001, 2002, 2004, 2005, 2006])
            .unwrap();
        assert_eq!(window, (2004, 2006));
    }

    #[test]
    fn test_run_too_short() {
        let policy = ThresholdPolicy::new(10.0).with_min_consecutive_years(4);
        let aligner = TemporalAligner::new(&policy);
        let err = aligner
            .select_window("US-Ha1", &[2001, 2002, 2004, 2005, 2006])
            .unwrap_err();
        assert!(matches!(
            err,
            ProcessingError::InsufficientContiguousYears {
                found: 3,
                required: 4,
                ..
            }
        ));
    }

    #[test]
    fn test_no_acceptable_years() {
        let policy = ThresholdPolicy::new(10.0);
        let aligner = TemporalAligner::new(&policy);
        assert!(aligner.select_window("US-Ha1", &[]).is_err());
    }

    #[test]
    fn test_tie_prefers_most_recent_run() {
        assert_eq!(
            longest_contiguous_run(&[2001, 2002, 2005, 2006]),
            Some((2005, 2006))
        );
        assert_eq!(longest_contiguous_run(&[2003]), Some((2003, 2003)));
        assert_eq!(longest_contiguous_run(&[]), None);
    }
}
