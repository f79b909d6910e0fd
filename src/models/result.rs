use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{Category, QcFlag};

/// Resolved output time axis of a converted site
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeAxis {
    pub start: NaiveDateTime,
    pub step_seconds: i64,
    pub n_steps: usize,
    pub first_year: i32,
    pub last_year: i32,
}

impl TimeAxis {
    pub fn timestamps(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        (0..self.n_steps)
            .map(move |i| self.start + chrono::Duration::seconds(self.step_seconds * i as i64))
    }
}

/// One output variable of a record set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRecord {
    pub values: Vec<f64>,
    pub unit: String,
    pub long_name: String,
    pub standard_name: Option<String>,
    pub source_name: String,
    pub qc: Vec<QcFlag>,
    pub gap_filled_steps: usize,
}

/// Category fractions (percent of expected steps) as reported per variable
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct QcPercentages {
    pub measured: f64,
    pub good: f64,
    pub medium: f64,
    pub poor: f64,
    pub missing: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableReport {
    pub output_name: String,
    pub source_name: String,
    pub category: Category,
    pub essential: bool,
    pub preferred: bool,
    pub percentages: Option<QcPercentages>,
    pub out_of_range_steps: usize,
    pub gap_filled_steps: usize,
    /// Reason the variable was dropped, `None` when retained
    pub drop_reason: Option<String>,
}

impl VariableReport {
    pub fn is_retained(&self) -> bool {
        self.drop_reason.is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ConversionReport {
    pub variables: Vec<VariableReport>,
    pub unmapped_columns: Vec<String>,
    pub warnings: Vec<String>,
}

impl ConversionReport {
    pub fn retained(&self) -> impl Iterator<Item = &VariableReport> {
        self.variables.iter().filter(|v| v.is_retained())
    }

    pub fn dropped(&self) -> impl Iterator<Item = &VariableReport> {
        self.variables.iter().filter(|v| !v.is_retained())
    }
}

/// Everything produced for one successfully converted site.
///
/// Record sets are ordered maps so two runs over the same input compare
/// equal field by field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionResult {
    pub site_code: String,
    pub version_tag: String,
    pub time_axis: TimeAxis,
    pub forcing: BTreeMap<String, VariableRecord>,
    pub evaluation: BTreeMap<String, VariableRecord>,
    pub report: ConversionReport,
    /// Unmapped source columns on the output axis, unconverted
    pub passthrough: BTreeMap<String, Vec<f64>>,
}

impl ConversionResult {
    pub fn record_set(&self, category: Category) -> &BTreeMap<String, VariableRecord> {
        match category {
            Category::Met => &self.forcing,
            Category::Eval => &self.evaluation,
        }
    }

    /// Soft degradation: something was dropped, or no preferred evaluation
    /// variable survived
    pub fn is_degraded(&self) -> bool {
        self.report.dropped().next().is_some()
            || !self.report.retained().any(|v| v.preferred && v.category == Category::Eval)
    }

    pub fn status(&self) -> SiteStatus {
        if self.is_degraded() {
            SiteStatus::SoftDegraded
        } else {
            SiteStatus::Success
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteStatus {
    Success,
    SoftDegraded,
    Failed,
}

impl std::fmt::Display for SiteStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SiteStatus::Success => write!(f, "success"),
            SiteStatus::SoftDegraded => write!(f, "degraded"),
            SiteStatus::Failed => write!(f, "failed"),
        }
    }
}
