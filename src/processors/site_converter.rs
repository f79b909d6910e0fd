use crate::error::{ProcessingError, Result};
use crate::models::{
    Category, ConversionReport, ConversionResult, LoadedSite, OutOfRangeAction, QcFlag,
    SiteDataset, SiteTable, SiteVariable, ThresholdPolicy, TimeAxis, VariableRecord,
    VariableReport, VariableSpec,
};
use crate::processors::gap_filler::GapFiller;
use crate::processors::quality_evaluator::{QcDecision, QcSummary, QualityEvaluator};
use crate::processors::temporal_aligner::TemporalAligner;
use crate::processors::unit_converter::{ConversionContext, UnitConverter};
use crate::registry::VariableRegistry;
use crate::utils::constants::QC_SUFFIX;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Range;
use tracing::{debug, info, warn};

/// Output variables whose raw source columns feed the humidity conversion
const AIR_TEMPERATURE_OUTPUT: &str = "Tair";
const AIR_PRESSURE_OUTPUT: &str = "Psurf";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConversionStage {
    Loaded,
    Mapped,
    QcEvaluated,
    GapFilled,
    Aligned,
    Emitted,
}

impl fmt::Display for ConversionStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ConversionStage::Loaded => "loaded",
            ConversionStage::Mapped => "mapped",
            ConversionStage::QcEvaluated => "qc-evaluated",
            ConversionStage::GapFilled => "gap-filled",
            ConversionStage::Aligned => "aligned",
            ConversionStage::Emitted => "emitted",
        };
        write!(f, "{}", name)
    }
}

/// Everything the converter needs for one site
#[derive(Debug, Clone)]
pub struct SiteInput {
    pub site_code: String,
    pub version_tag: String,
    pub table: SiteTable,
    pub auxiliary: Option<SiteTable>,
}

impl SiteInput {
    pub fn new(site_code: &str, version_tag: &str, table: SiteTable) -> Self {
        Self {
            site_code: site_code.to_string(),
            version_tag: version_tag.to_string(),
            table,
            auxiliary: None,
        }
    }

    pub fn with_auxiliary(mut self, auxiliary: SiteTable) -> Self {
        self.auxiliary = Some(auxiliary);
        self
    }
}

/// Runs one site through load, mapping, QC, gap-filling, alignment and
/// emission. Holds only shared read-only state, so one converter can serve
/// every worker.
pub struct SiteConverter<'a> {
    registry: &'a VariableRegistry,
    policy: &'a ThresholdPolicy,
}

impl<'a> SiteConverter<'a> {
    pub fn new(registry: &'a VariableRegistry, policy: &'a ThresholdPolicy) -> Self {
        Self { registry, policy }
    }

    pub fn convert(&self, input: SiteInput) -> Result<ConversionResult> {
        let SiteInput {
            site_code,
            version_tag,
            table,
            auxiliary,
        } = input;

        let loaded = LoadedSite::from_table(&site_code, &version_tag, table)?;
        self.transition(&site_code, ConversionStage::Loaded);

        let mut report = ConversionReport::default();

        let mut dataset = self.map_variables(loaded, &mut report)?;
        self.transition(&site_code, ConversionStage::Mapped);

        self.evaluate_quality(&mut dataset, &mut report)?;
        self.transition(&site_code, ConversionStage::QcEvaluated);

        if self.policy.gap_fill {
            let auxiliary = auxiliary.ok_or_else(|| ProcessingError::MissingAuxiliarySource {
                sites: vec![site_code.clone()],
            })?;
            let auxiliary = LoadedSite::from_table(&site_code, &version_tag, auxiliary)?;
            let warnings = GapFiller::new(self.policy).fill_dataset(&mut dataset, &auxiliary)?;
            report.warnings.extend(warnings);
            self.transition(&site_code, ConversionStage::GapFilled);
        }

        let (axis, range) = TemporalAligner::new(self.policy).align(&dataset)?;
        self.transition(&site_code, ConversionStage::Aligned);

        let result = self.emit(dataset, axis, range, report)?;
        self.transition(&site_code, ConversionStage::Emitted);

        Ok(result)
    }

    fn transition(&self, site_code: &str, stage: ConversionStage) {
        info!(site = %site_code, stage = %stage, "site conversion stage");
    }

    /// Project source columns onto the registry and convert units
    fn map_variables(
        &self,
        loaded: LoadedSite,
        report: &mut ConversionReport,
    ) -> Result<SiteDataset> {
        let context = ConversionContext::new(loaded.grid.step_seconds)
            .with_air_temperature(self.raw_source(&loaded, AIR_TEMPERATURE_OUTPUT, "degC"))
            .with_air_pressure(self.raw_source(&loaded, AIR_PRESSURE_OUTPUT, "kPa"));

        let mut variables = Vec::new();
        for spec in self.registry.specs() {
            let raw = loaded.column(&spec.source_name);
            if raw.is_none() && !spec.is_essential_met {
                debug!(site = %loaded.site_code, source = %spec.source_name, "not present in input");
                continue;
            }

            match self.map_variable(&loaded, spec, raw, &context, report) {
                Ok(variable) => variables.push(variable),
                Err(e) if spec.is_essential_met => return Err(e),
                Err(e) => {
                    warn!(site = %loaded.site_code, variable = %spec.output_name, "{}", e);
                    report
                        .variables
                        .push(dropped_report(spec, None, e.to_string()));
                }
            }
        }

        let mut unmapped = BTreeMap::new();
        for (name, values) in &loaded.columns {
            if self.is_accounted_for(name) {
                continue;
            }
            report.unmapped_columns.push(name.clone());
            unmapped.insert(name.clone(), values.clone());
        }
        if !report.unmapped_columns.is_empty() {
            debug!(
                site = %loaded.site_code,
                columns = report.unmapped_columns.len(),
                "unmapped source columns passed through"
            );
        }

        Ok(SiteDataset {
            site_code: loaded.site_code,
            version_tag: loaded.version_tag,
            grid: loaded.grid,
            observed_years: loaded.observed_years,
            variables,
            unmapped,
        })
    }

    fn map_variable(
        &self,
        loaded: &LoadedSite,
        spec: &VariableSpec,
        raw: Option<&[f64]>,
        context: &ConversionContext<'_>,
        report: &mut ConversionReport,
    ) -> Result<SiteVariable> {
        let n_steps = loaded.grid.n_steps;
        let qc = loaded.column(&spec.qc_column());

        let mut source = raw.map_or_else(|| vec![f64::NAN; n_steps], <[f64]>::to_vec);
        let mut flags = Vec::with_capacity(n_steps);
        for (i, value) in source.iter_mut().enumerate() {
            let flag = if value.is_nan() {
                QcFlag::Missing
            } else {
                match qc.map(|q| q[i]) {
                    Some(code) if !code.is_nan() => QcFlag::from_code(code)?,
                    _ => QcFlag::Measured,
                }
            };
            if flag.is_missing() {
                *value = f64::NAN;
            }
            flags.push(flag);
        }

        let values = UnitConverter::convert(&source, spec, context)?;
        // Derived outputs can lose a step their own source still has
        for (flag, value) in flags.iter_mut().zip(&values) {
            if value.is_nan() {
                *flag = QcFlag::Missing;
            }
        }
        let mut variable = SiteVariable::new(spec.clone(), values, flags);
        self.check_range(&loaded.site_code, &mut variable, report)?;
        Ok(variable)
    }

    fn check_range(
        &self,
        site_code: &str,
        variable: &mut SiteVariable,
        report: &mut ConversionReport,
    ) -> Result<()> {
        let spec = &variable.spec;
        let outside: Vec<usize> = variable
            .values
            .iter()
            .enumerate()
            .filter(|(_, v)| !v.is_nan() && !spec.is_within_bounds(**v))
            .map(|(i, _)| i)
            .collect();

        if outside.is_empty() {
            return Ok(());
        }

        let error = ProcessingError::OutOfRangeValue {
            variable: spec.output_name.clone(),
            count: outside.len(),
            min: spec.valid_min,
            max: spec.valid_max,
        };

        match self.policy.out_of_range {
            OutOfRangeAction::Fail => return Err(error),
            OutOfRangeAction::Flag => {
                for &i in &outside {
                    variable.out_of_range[i] = true;
                }
            }
            OutOfRangeAction::SetMissing => {
                for &i in &outside {
                    variable.values[i] = f64::NAN;
                    variable.flags[i] = QcFlag::Missing;
                }
            }
        }

        warn!(site = %site_code, action = ?self.policy.out_of_range, "{}", error);
        report.warnings.push(error.to_string());
        Ok(())
    }

    /// Drop variables failing the threshold policy. Fails the site when an
    /// essential meteorological variable is dropped.
    fn evaluate_quality(
        &self,
        dataset: &mut SiteDataset,
        report: &mut ConversionReport,
    ) -> Result<()> {
        let evaluator = QualityEvaluator::new(self.policy);
        let expected = dataset.grid.n_steps;
        let mut retained = Vec::with_capacity(dataset.variables.len());

        for variable in std::mem::take(&mut dataset.variables) {
            let spec = &variable.spec;
            let (summary, decision) = evaluator.evaluate(&variable.flags, expected, spec.category);
            debug!(
                site = %dataset.site_code,
                variable = %spec.output_name,
                missing = summary.missing_percent(),
                gapfilled = summary.gapfilled_percent(),
                "quality summary"
            );

            let reason = match decision {
                QcDecision::Retained => {
                    retained.push(variable);
                    continue;
                }
                QcDecision::Dropped(reason) => reason.to_string(),
            };

            if spec.is_essential_met {
                return Err(ProcessingError::EssentialVariableDropped {
                    variable: spec.output_name.clone(),
                    reason,
                });
            }

            let soft = ProcessingError::EvaluationVariableDropped {
                variable: spec.output_name.clone(),
                reason: reason.clone(),
            };
            match spec.category {
                Category::Eval => warn!(site = %dataset.site_code, "{}", soft),
                Category::Met => warn!(
                    site = %dataset.site_code,
                    variable = %spec.output_name,
                    "meteorological variable dropped: {}",
                    reason
                ),
            }
            report
                .variables
                .push(dropped_report(spec, Some(&summary), reason));
        }

        dataset.variables = retained;
        Ok(())
    }

    /// Cut every retained variable to the aligned window and build the result
    fn emit(
        &self,
        dataset: SiteDataset,
        axis: TimeAxis,
        range: Range<usize>,
        mut report: ConversionReport,
    ) -> Result<ConversionResult> {
        let mut forcing = BTreeMap::new();
        let mut evaluation = BTreeMap::new();

        for variable in dataset.variables {
            let values = variable.values[range.clone()].to_vec();
            let qc = variable.flags[range.clone()].to_vec();
            TemporalAligner::validate_length(&axis, &variable.spec.output_name, values.len())?;
            TemporalAligner::validate_length(&axis, &variable.spec.output_name, qc.len())?;

            let summary = QcSummary::from_flags(&qc, axis.n_steps);
            let substituted = variable.substituted[range.clone()]
                .iter()
                .filter(|s| **s)
                .count();
            let out_of_range = variable.out_of_range[range.clone()]
                .iter()
                .filter(|s| **s)
                .count();

            let spec = variable.spec;
            report.variables.push(VariableReport {
                output_name: spec.output_name.clone(),
                source_name: spec.source_name.clone(),
                category: spec.category,
                essential: spec.is_essential_met,
                preferred: spec.is_preferred_eval,
                percentages: Some(summary.percentages()),
                out_of_range_steps: out_of_range,
                gap_filled_steps: substituted,
                drop_reason: None,
            });

            let record = VariableRecord {
                values,
                unit: spec.output_unit,
                long_name: spec.long_name,
                standard_name: spec.standard_name,
                source_name: spec.source_name,
                qc,
                gap_filled_steps: substituted,
            };
            match spec.category {
                Category::Met => forcing.insert(spec.output_name, record),
                Category::Eval => evaluation.insert(spec.output_name, record),
            };
        }

        let mut passthrough = BTreeMap::new();
        for (name, values) in dataset.unmapped {
            let values = values[range.clone()].to_vec();
            TemporalAligner::validate_length(&axis, &name, values.len())?;
            passthrough.insert(name, values);
        }

        report
            .variables
            .sort_by(|a, b| a.output_name.cmp(&b.output_name));

        let result = ConversionResult {
            site_code: dataset.site_code,
            version_tag: dataset.version_tag,
            time_axis: axis,
            forcing,
            evaluation,
            report,
            passthrough,
        };

        if !result
            .report
            .retained()
            .any(|v| v.preferred && v.category == Category::Eval)
        {
            warn!(site = %result.site_code, "no preferred evaluation variable retained");
        }

        Ok(result)
    }

    /// Raw source column behind an output variable, when its unit matches
    fn raw_source<'l>(
        &self,
        loaded: &'l LoadedSite,
        output_name: &str,
        unit: &str,
    ) -> Option<&'l [f64]> {
        self.registry
            .specs()
            .iter()
            .find(|s| s.output_name == output_name && s.source_unit == unit)
            .and_then(|s| loaded.column(&s.source_name))
    }

    /// Registry sources and their QC companions are not reported as unmapped
    fn is_accounted_for(&self, column: &str) -> bool {
        if self.registry.is_known_source(column) {
            return true;
        }
        column
            .strip_suffix(QC_SUFFIX)
            .is_some_and(|base| self.registry.is_known_source(base))
    }
}

fn dropped_report(spec: &VariableSpec, summary: Option<&QcSummary>, reason: String) -> VariableReport {
    VariableReport {
        output_name: spec.output_name.clone(),
        source_name: spec.source_name.clone(),
        category: spec.category,
        essential: spec.is_essential_met,
        preferred: spec.is_preferred_eval,
        percentages: summary.map(QcSummary::percentages),
        out_of_range_steps: 0,
        gap_filled_steps: 0,
        drop_reason: Some(reason),
    }
}
