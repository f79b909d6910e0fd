use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Range;

use crate::error::{ProcessingError, Result};
use crate::models::{QcFlag, VariableSpec};

/// Raw numeric table as returned by a spreadsheet reader.
///
/// `columns` holds every non-timestamp column, with missing values as NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteTable {
    pub timestamps: Vec<NaiveDateTime>,
    pub columns: BTreeMap<String, Vec<f64>>,
    /// Year span declared by the source file, when known
    pub period: Option<(i32, i32)>,
}

impl SiteTable {
    pub fn new(timestamps: Vec<NaiveDateTime>, columns: BTreeMap<String, Vec<f64>>) -> Self {
        Self {
            timestamps,
            columns,
            period: None,
        }
    }

    pub fn with_period(mut self, first_year: i32, last_year: i32) -> Self {
        self.period = Some((first_year, last_year));
        self
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Regular time axis: `n_steps` slots of `step_seconds` starting at `start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeGrid {
    pub start: NaiveDateTime,
    pub step_seconds: i64,
    pub n_steps: usize,
}

impl TimeGrid {
    pub fn new(start: NaiveDateTime, step_seconds: i64, n_steps: usize) -> Self {
        Self {
            start,
            step_seconds,
            n_steps,
        }
    }

    /// Infer the native grid of a record from its timestamps.
    ///
    /// The step is the smallest positive interval; every other interval must
    /// be a whole multiple of it. Gaps are allowed, mixed resolutions are not.
    pub fn infer(
        site_code: &str,
        timestamps: &[NaiveDateTime],
        period: Option<(i32, i32)>,
    ) -> Result<Self> {
        let inconsistent = |details: String| ProcessingError::InconsistentTimeStep {
            site: site_code.to_string(),
            details,
        };

        if timestamps.len() < 2 {
            return Err(ProcessingError::MissingData(format!(
                "site {} has {} time step(s), at least two are needed to infer resolution",
                site_code,
                timestamps.len()
            )));
        }

        let mut step = i64::MAX;
        for window in timestamps.windows(2) {
            let interval = (window[1] - window[0]).num_seconds();
            if interval <= 0 {
                return Err(inconsistent(format!(
                    "timestamps not increasing at {}",
                    window[1]
                )));
            }
            step = step.min(interval);
        }

        for window in timestamps.windows(2) {
            let interval = (window[1] - window[0]).num_seconds();
            if interval % step != 0 {
                return Err(inconsistent(format!(
                    "interval of {}s at {} is not a multiple of the {}s native step",
                    interval, window[1], step
                )));
            }
        }

        let first = timestamps[0];
        let last = timestamps[timestamps.len() - 1];

        let (start, end_exclusive) = match period {
            Some((first_year, last_year)) => {
                let start = year_start(first_year)?;
                let end = year_start(last_year + 1)?;
                if first < start || last >= end {
                    return Err(inconsistent(format!(
                        "records span {} to {}, outside declared period {}-{}",
                        first, last, first_year, last_year
                    )));
                }
                if (first - start).num_seconds() % step != 0 {
                    return Err(inconsistent(format!(
                        "first record {} is not aligned to a {}s grid starting {}",
                        first, step, start
                    )));
                }
                (start, end)
            }
            None => (first, last + Duration::seconds(step)),
        };

        let span = (end_exclusive - start).num_seconds();
        let n_steps = (span + step - 1) / step;

        Ok(Self::new(start, step, n_steps as usize))
    }

    pub fn timestamp(&self, index: usize) -> NaiveDateTime {
        self.start + Duration::seconds(self.step_seconds * index as i64)
    }

    /// Slot holding `timestamp`, if it lies exactly on the grid
    pub fn index_of(&self, timestamp: NaiveDateTime) -> Option<usize> {
        let offset = (timestamp - self.start).num_seconds();
        if offset < 0 || offset % self.step_seconds != 0 {
            return None;
        }
        let index = (offset / self.step_seconds) as usize;
        (index < self.n_steps).then_some(index)
    }

    /// Slots falling in each calendar year, in year order
    pub fn year_ranges(&self) -> Vec<(i32, Range<usize>)> {
        let mut ranges: Vec<(i32, Range<usize>)> = Vec::new();
        for index in 0..self.n_steps {
            let year = self.timestamp(index).year();
            match ranges.last_mut() {
                Some((current, range)) if *current == year => range.end = index + 1,
                _ => ranges.push((year, index..index + 1)),
            }
        }
        ranges
    }

    /// Slots covering the inclusive year span `[first_year, last_year]`
    pub fn year_span(&self, first_year: i32, last_year: i32) -> Range<usize> {
        let ranges = self.year_ranges();
        let start = ranges
            .iter()
            .find(|(year, _)| *year >= first_year)
            .map_or(self.n_steps, |(_, r)| r.start);
        let end = ranges
            .iter()
            .rev()
            .find(|(year, _)| *year <= last_year)
            .map_or(start, |(_, r)| r.end);
        start..end.max(start)
    }
}

fn year_start(year: i32) -> Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .ok_or_else(|| ProcessingError::InvalidFormat(format!("Invalid year: {}", year)))
}

/// Input table placed on its regular grid (the `Loaded` state).
#[derive(Debug, Clone, PartialEq)]
pub struct LoadedSite {
    pub site_code: String,
    pub version_tag: String,
    pub grid: TimeGrid,
    pub columns: BTreeMap<String, Vec<f64>>,
    /// Years holding at least one input row
    pub observed_years: BTreeSet<i32>,
}

impl LoadedSite {
    pub fn from_table(site_code: &str, version_tag: &str, table: SiteTable) -> Result<Self> {
        let grid = TimeGrid::infer(site_code, &table.timestamps, table.period)?;

        let mut slots = Vec::with_capacity(table.timestamps.len());
        for timestamp in &table.timestamps {
            let index =
                grid.index_of(*timestamp)
                    .ok_or_else(|| ProcessingError::InconsistentTimeStep {
                        site: site_code.to_string(),
                        details: format!("timestamp {} is off the native grid", timestamp),
                    })?;
            slots.push(index);
        }

        let mut columns = BTreeMap::new();
        for (name, values) in table.columns {
            if values.len() != slots.len() {
                return Err(ProcessingError::InvalidFormat(format!(
                    "column {} has {} rows, expected {}",
                    name,
                    values.len(),
                    slots.len()
                )));
            }
            let mut placed = vec![f64::NAN; grid.n_steps];
            for (&slot, value) in slots.iter().zip(values) {
                placed[slot] = value;
            }
            columns.insert(name, placed);
        }

        let observed_years = table.timestamps.iter().map(|t| t.year()).collect();

        Ok(Self {
            site_code: site_code.to_string(),
            version_tag: version_tag.to_string(),
            grid,
            columns,
            observed_years,
        })
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }
}

/// One mapped and converted output variable of a site
#[derive(Debug, Clone, PartialEq)]
pub struct SiteVariable {
    pub spec: VariableSpec,
    pub values: Vec<f64>,
    pub flags: Vec<QcFlag>,
    /// Steps that were outside the valid range after conversion and kept
    pub out_of_range: Vec<bool>,
    /// Steps replaced from the reanalysis source
    pub substituted: Vec<bool>,
}

impl SiteVariable {
    pub fn new(spec: VariableSpec, values: Vec<f64>, flags: Vec<QcFlag>) -> Self {
        let out_of_range = vec![false; values.len()];
        let substituted = vec![false; values.len()];
        Self {
            spec,
            values,
            flags,
            out_of_range,
            substituted,
        }
    }

    pub fn substituted_steps(&self) -> usize {
        self.substituted.iter().filter(|s| **s).count()
    }
}

/// A site after mapping and conversion onto the output vocabulary
#[derive(Debug, Clone, PartialEq)]
pub struct SiteDataset {
    pub site_code: String,
    pub version_tag: String,
    pub grid: TimeGrid,
    pub observed_years: BTreeSet<i32>,
    pub variables: Vec<SiteVariable>,
    /// Source columns with no registry entry, passed through unconverted
    pub unmapped: BTreeMap<String, Vec<f64>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(y: i32, m: u32, d: u32, h: u32, min: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, min, 0)
            .unwrap()
    }

    #[test]
    fn test_infer_half_hourly_grid() {
        let stamps = vec![
            ts(2005, 1, 1, 0, 0),
            ts(2005, 1, 1, 0, 30),
            ts(2005, 1, 1, 1, 30),
        ];
        let grid = TimeGrid::infer("AU-Tum", &stamps, None).unwrap();
        assert_eq!(grid.step_seconds, 1800);
        assert_eq!(grid.n_steps, 4);
        assert_eq!(grid.index_of(ts(2005, 1, 1, 1, 30)), Some(3));
        assert_eq!(grid.index_of(ts(2005, 1, 1, 1, 15)), None);
    }

    #[test]
    fn test_infer_rejects_mixed_resolution() {
        let stamps = vec![
            ts(2005, 1, 1, 0, 0),
            ts(2005, 1, 1, 0, 30),
            ts(2005, 1, 1, 1, 15),
        ];
        let err = TimeGrid::infer("AU-Tum", &stamps, None).unwrap_err();
        assert!(matches!(err, ProcessingError::InconsistentTimeStep { .. }));
    }

    #[test]
    fn test_declared_period_counts_truncation() {
        let stamps = vec![ts(2005, 1, 1, 0, 0), ts(2005, 1, 1, 0, 30)];
        let grid = TimeGrid::infer("AU-Tum", &stamps, Some((2005, 2005))).unwrap();
        assert_eq!(grid.n_steps, 365 * 48);
    }

    #[test]
    fn test_year_ranges() {
        let grid = TimeGrid::new(ts(2004, 12, 31, 0, 0), 43_200, 4);
        let ranges = grid.year_ranges();
        assert_eq!(ranges, vec![(2004, 0..2), (2005, 2..4)]);
        assert_eq!(grid.year_span(2005, 2005), 2..4);
        assert_eq!(grid.year_span(2004, 2005), 0..4);
    }

    #[test]
    fn test_loaded_site_places_rows_on_grid() {
        let stamps = vec![
            ts(2005, 1, 1, 0, 0),
            ts(2005, 1, 1, 0, 30),
            ts(2005, 1, 1, 2, 0),
        ];
        let mut columns = BTreeMap::new();
        columns.insert("TA_F".to_string(), vec![1.0, 2.0, 3.0]);
        let table = SiteTable::new(stamps, columns);

        let loaded = LoadedSite::from_table("AU-Tum", "1-3", table).unwrap();
        assert_eq!(loaded.grid.step_seconds, 1800);
        let ta = loaded.column("TA_F").unwrap();
        assert_eq!(ta.len(), 5);
        assert_eq!(ta[0], 1.0);
        assert_eq!(ta[1], 2.0);
        assert!(ta[2].is_nan());
        assert!(ta[3].is_nan());
        assert_eq!(ta[4], 3.0);
        assert!(loaded.observed_years.contains(&2005));
    }
}
