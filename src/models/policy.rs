use serde::{Deserialize, Serialize};
use std::path::Path;
use validator::Validate;

use crate::error::Result;
use crate::models::GapfillTier;
use crate::utils::constants::{DEFAULT_MIN_CONSECUTIVE_YEARS, ENV_PREFIX};

/// What to do with converted values outside a variable's physical bounds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutOfRangeAction {
    /// Keep the value and record a warning
    #[default]
    Flag,
    /// Replace the value with missing
    SetMissing,
    /// Treat the variable as unusable
    Fail,
}

/// Thresholds deciding whether a variable (or a year of it) is kept.
///
/// All thresholds are percentages of the expected number of time steps.
/// `gapfill_all_max`, when set, replaces the three per-tier thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct ThresholdPolicy {
    #[validate(range(min = 0.0, max = 100.0))]
    pub missing_max: f64,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0))]
    pub gapfill_all_max: Option<f64>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0))]
    pub gapfill_good_max: Option<f64>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0))]
    pub gapfill_med_max: Option<f64>,

    #[serde(default)]
    #[validate(range(min = 0.0, max = 100.0))]
    pub gapfill_poor_max: Option<f64>,

    #[serde(default = "default_min_consecutive_years")]
    #[validate(range(min = 1))]
    pub min_consecutive_years: u32,

    #[serde(default)]
    pub include_all_eval: bool,

    /// Substitute reanalysis values into essential meteorological gaps
    #[serde(default)]
    pub gap_fill: bool,

    #[serde(default)]
    pub substitute_tier: GapfillTier,

    #[serde(default)]
    pub out_of_range: OutOfRangeAction,
}

fn default_min_consecutive_years() -> u32 {
    DEFAULT_MIN_CONSECUTIVE_YEARS
}

impl ThresholdPolicy {
    pub fn new(missing_max: f64) -> Self {
        Self {
            missing_max,
            gapfill_all_max: None,
            gapfill_good_max: None,
            gapfill_med_max: None,
            gapfill_poor_max: None,
            min_consecutive_years: DEFAULT_MIN_CONSECUTIVE_YEARS,
            include_all_eval: false,
            gap_fill: false,
            substitute_tier: GapfillTier::default(),
            out_of_range: OutOfRangeAction::default(),
        }
    }

    /// Load a policy from a TOML/JSON/YAML file, with `FLUXNET_*`
    /// environment variables layered on top.
    pub fn from_file(path: &Path) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).try_parsing(true))
            .build()?;

        let policy: ThresholdPolicy = settings.try_deserialize()?;
        policy.validate()?;
        Ok(policy)
    }

    pub fn with_gapfill_all_max(mut self, percent: f64) -> Self {
        self.gapfill_all_max = Some(percent);
        self
    }

    pub fn with_tier_limits(
        mut self,
        good: Option<f64>,
        medium: Option<f64>,
        poor: Option<f64>,
    ) -> Self {
        self.gapfill_good_max = good;
        self.gapfill_med_max = medium;
        self.gapfill_poor_max = poor;
        self
    }

    pub fn with_min_consecutive_years(mut self, years: u32) -> Self {
        self.min_consecutive_years = years;
        self
    }

    pub fn with_include_all_eval(mut self, include_all_eval: bool) -> Self {
        self.include_all_eval = include_all_eval;
        self
    }

    pub fn with_gap_fill(mut self, gap_fill: bool) -> Self {
        self.gap_fill = gap_fill;
        self
    }

    pub fn with_substitute_tier(mut self, tier: GapfillTier) -> Self {
        self.substitute_tier = tier;
        self
    }

    pub fn with_out_of_range(mut self, action: OutOfRangeAction) -> Self {
        self.out_of_range = action;
        self
    }

    pub fn has_tier_limits(&self) -> bool {
        self.gapfill_good_max.is_some()
            || self.gapfill_med_max.is_some()
            || self.gapfill_poor_max.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::Builder;

    #[test]
    fn test_policy_validation() {
        assert!(ThresholdPolicy::new(15.0).validate().is_ok());
        assert!(ThresholdPolicy::new(150.0).validate().is_err());
        assert!(ThresholdPolicy::new(15.0)
            .with_gapfill_all_max(-1.0)
            .validate()
            .is_err());
        assert!(ThresholdPolicy::new(15.0)
            .with_min_consecutive_years(0)
            .validate()
            .is_err());
    }

    #[test]
    fn test_policy_from_toml_file() -> Result<()> {
        let mut file = Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "missing_max = 10.0")?;
        writeln!(file, "gapfill_all_max = 25.0")?;
        writeln!(file, "min_consecutive_years = 2")?;
        writeln!(file, "gap_fill = true")?;
        writeln!(file, "substitute_tier = \"poor\"")?;
        writeln!(file, "out_of_range = \"set_missing\"")?;

        let policy = ThresholdPolicy::from_file(file.path())?;

        assert_eq!(policy.missing_max, 10.0);
        assert_eq!(policy.gapfill_all_max, Some(25.0));
        assert_eq!(policy.gapfill_good_max, None);
        assert_eq!(policy.min_consecutive_years, 2);
        assert!(policy.gap_fill);
        assert!(!policy.include_all_eval);
        assert_eq!(policy.substitute_tier, GapfillTier::Poor);
        assert_eq!(policy.out_of_range, OutOfRangeAction::SetMissing);
        Ok(())
    }

    #[test]
    fn test_policy_file_rejects_invalid_percentages() -> Result<()> {
        let mut file = Builder::new().suffix(".toml").tempfile()?;
        writeln!(file, "missing_max = 120.0")?;

        assert!(ThresholdPolicy::from_file(file.path()).is_err());
        Ok(())
    }
}
