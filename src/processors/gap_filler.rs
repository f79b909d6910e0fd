use crate::error::Result;
use crate::models::{AggregateMethod, LoadedSite, QcFlag, SiteDataset, SiteVariable, ThresholdPolicy, TimeGrid};
use crate::processors::unit_converter::{ConversionContext, UnitConverter};
use tracing::{debug, warn};

/// Resample an auxiliary series onto a target grid.
///
/// Each target step takes the auxiliary samples overlapping it. `Mean`
/// weights them by overlap; `Sum` adds the share of each sample that falls
/// inside the step and needs the step fully covered. Steps without usable
/// samples come back as NaN.
pub fn resample(
    source_grid: &TimeGrid,
    source: &[f64],
    target_grid: &TimeGrid,
    method: AggregateMethod,
) -> Vec<f64> {
    let target_step = target_grid.step_seconds;
    let source_step = source_grid.step_seconds;
    let origin = (target_grid.start - source_grid.start).num_seconds();
    let available = source.len().min(source_grid.n_steps) as i64;

    (0..target_grid.n_steps)
        .map(|i| {
            if method == AggregateMethod::None {
                return f64::NAN;
            }

            let begin = origin + i as i64 * target_step;
            let end = begin + target_step;
            let first = begin.div_euclid(source_step).max(0);
            let last = (end - 1).div_euclid(source_step).min(available - 1);

            let mut weighted = 0.0;
            let mut covered = 0_i64;
            for j in first..=last {
                let value = source[j as usize];
                if value.is_nan() {
                    continue;
                }
                let sample_begin = j * source_step;
                let overlap = (sample_begin + source_step).min(end) - sample_begin.max(begin);
                if overlap <= 0 {
                    continue;
                }
                covered += overlap;
                weighted += match method {
                    AggregateMethod::Sum => value * overlap as f64 / source_step as f64,
                    _ => value * overlap as f64,
                };
            }

            match method {
                AggregateMethod::Mean if covered > 0 => weighted / covered as f64,
                AggregateMethod::Sum if covered == target_step => weighted,
                _ => f64::NAN,
            }
        })
        .collect()
}

/// Replaces missing and poor-quality steps of essential meteorological
/// variables with values derived from a reanalysis source
pub struct GapFiller<'a> {
    policy: &'a ThresholdPolicy,
}

impl<'a> GapFiller<'a> {
    pub fn new(policy: &'a ThresholdPolicy) -> Self {
        Self { policy }
    }

    /// Fill every eligible variable of a site. Returns warnings for
    /// variables the auxiliary source could not serve.
    pub fn fill_dataset(
        &self,
        dataset: &mut SiteDataset,
        auxiliary: &LoadedSite,
    ) -> Result<Vec<String>> {
        let mut warnings = Vec::new();
        let grid = dataset.grid;

        for variable in dataset.variables.iter_mut() {
            if !variable.spec.is_gapfill_candidate() {
                continue;
            }

            let Some(substitute) = variable.spec.substitute_source.clone() else {
                continue;
            };

            match auxiliary.column(&substitute) {
                Some(series) => {
                    let filled = self.fill_variable(variable, &grid, &auxiliary.grid, series)?;
                    debug!(
                        site = %dataset.site_code,
                        variable = %variable.spec.output_name,
                        filled,
                        "reanalysis substitution"
                    );
                }
                None => {
                    let message = format!(
                        "{}: auxiliary source has no {} column, {} left unfilled",
                        dataset.site_code, substitute, variable.spec.output_name
                    );
                    warn!("{}", message);
                    warnings.push(message);
                }
            }
        }

        Ok(warnings)
    }

    /// Fill one variable from an auxiliary series in source units.
    /// Returns the number of steps replaced.
    pub fn fill_variable(
        &self,
        variable: &mut SiteVariable,
        site_grid: &TimeGrid,
        auxiliary_grid: &TimeGrid,
        auxiliary: &[f64],
    ) -> Result<usize> {
        if !variable.spec.is_gapfill_candidate() {
            return Ok(0);
        }

        let resampled = resample(
            auxiliary_grid,
            auxiliary,
            site_grid,
            variable.spec.aggregate_method,
        );
        let context = ConversionContext::new(site_grid.step_seconds);
        let replacements = UnitConverter::convert(&resampled, &variable.spec, &context)?;

        let tier = QcFlag::from(self.policy.substitute_tier);
        let mut filled = 0;

        for (i, replacement) in replacements.into_iter().enumerate().take(variable.values.len()) {
            let needs_fill = variable.flags[i].is_replaceable() || variable.out_of_range[i];
            if !needs_fill || replacement.is_nan() || !variable.spec.is_within_bounds(replacement) {
                continue;
            }
            variable.values[i] = replacement;
            variable.flags[i] = tier;
            variable.out_of_range[i] = false;
            variable.substituted[i] = true;
            filled += 1;
        }

        Ok(filled)
    }
}
