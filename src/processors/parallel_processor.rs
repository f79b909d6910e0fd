use crate::error::{ProcessingError, Result};
use crate::models::{ConversionResult, SiteStatus, ThresholdPolicy};
use crate::processors::site_converter::{SiteConverter, SiteInput};
use crate::readers::{FluxnetReader, SiteFiles};
use crate::registry::VariableRegistry;
use crate::utils::progress::ProgressReporter;
use crate::writers::{OutputFileInfo, ParquetWriter};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{error, info};

/// Outcome of one site in a batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteOutcome {
    pub site_code: String,
    pub version_tag: String,
    pub status: SiteStatus,
    /// Failure reason, or the dropped variables of a degraded site
    pub message: Option<String>,
    pub retained_variables: usize,
    pub dropped_variables: usize,
    pub years: Option<(i32, i32)>,
    pub outputs: Vec<OutputFileInfo>,
    pub warnings: Vec<String>,
}

impl SiteOutcome {
    fn converted(result: &ConversionResult, outputs: Vec<OutputFileInfo>) -> Self {
        let dropped: Vec<&str> = result
            .report
            .dropped()
            .map(|v| v.output_name.as_str())
            .collect();
        let status = result.status();
        let message = match status {
            SiteStatus::SoftDegraded if dropped.is_empty() => {
                Some("no preferred evaluation variable retained".to_string())
            }
            SiteStatus::SoftDegraded => Some(format!("dropped: {}", dropped.join(", "))),
            _ => None,
        };

        Self {
            site_code: result.site_code.clone(),
            version_tag: result.version_tag.clone(),
            status,
            message,
            retained_variables: result.forcing.len() + result.evaluation.len(),
            dropped_variables: dropped.len(),
            years: Some((result.time_axis.first_year, result.time_axis.last_year)),
            outputs,
            warnings: result.report.warnings.clone(),
        }
    }

    fn failed(site: &SiteFiles, error: &ProcessingError) -> Self {
        Self {
            site_code: site.site_code.clone(),
            version_tag: site.version_tag.clone(),
            status: SiteStatus::Failed,
            message: Some(error.to_string()),
            retained_variables: 0,
            dropped_variables: 0,
            years: None,
            outputs: Vec::new(),
            warnings: Vec::new(),
        }
    }
}

/// Per-site outcomes of a batch, ordered by site code
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BatchReport {
    pub policy: ThresholdPolicy,
    pub sites: Vec<SiteOutcome>,
}

impl BatchReport {
    pub fn count(&self, status: SiteStatus) -> usize {
        self.sites.iter().filter(|s| s.status == status).count()
    }

    pub fn site(&self, site_code: &str) -> Option<&SiteOutcome> {
        self.sites.iter().find(|s| s.site_code == site_code)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(())
    }

    pub fn generate_summary(&self) -> String {
        let mut summary = String::new();

        summary.push_str("=== Batch Conversion Report ===\n");
        summary.push_str(&format!("Sites: {}\n", self.sites.len()));
        summary.push_str(&format!("Success: {}\n", self.count(SiteStatus::Success)));
        summary.push_str(&format!(
            "Degraded: {}\n",
            self.count(SiteStatus::SoftDegraded)
        ));
        summary.push_str(&format!("Failed: {}\n\n", self.count(SiteStatus::Failed)));

        summary.push_str(&format!(
            "{:<10} {:<8} {:<9} {:<11} {:>8} {:>8}  {}\n",
            "Site", "Version", "Status", "Years", "Retained", "Dropped", "Details"
        ));
        for site in &self.sites {
            let years = site
                .years
                .map(|(first, last)| format!("{}-{}", first, last))
                .unwrap_or_else(|| "-".to_string());
            summary.push_str(&format!(
                "{:<10} {:<8} {:<9} {:<11} {:>8} {:>8}  {}\n",
                site.site_code,
                site.version_tag,
                site.status.to_string(),
                years,
                site.retained_variables,
                site.dropped_variables,
                site.message.as_deref().unwrap_or("")
            ));
        }

        let outputs: Vec<&OutputFileInfo> = self.sites.iter().flat_map(|s| &s.outputs).collect();
        if !outputs.is_empty() {
            let total: u64 = outputs.iter().map(|o| o.size_bytes).sum();
            summary.push_str(&format!(
                "\nOutput files: {} ({:.2} MB)\n",
                outputs.len(),
                total as f64 / 1_048_576.0
            ));
            for output in outputs {
                summary.push_str(&format!("  {}\n", output.summary()));
            }
        }

        summary
    }
}

/// Runs site conversions on a worker pool. Each worker takes one site from
/// reading through writing; a failing site never stops its siblings.
pub struct ParallelProcessor {
    max_workers: usize,
    reader: FluxnetReader,
    output: Option<(ParquetWriter, PathBuf)>,
}

impl ParallelProcessor {
    pub fn new(max_workers: usize) -> Self {
        Self {
            max_workers: max_workers.max(1),
            reader: FluxnetReader::new(),
            output: None,
        }
    }

    /// Write record sets of converted sites into `output_dir`
    pub fn with_output(mut self, writer: ParquetWriter, output_dir: PathBuf) -> Self {
        self.output = Some((writer, output_dir));
        self
    }

    /// Every site needs a reanalysis file when gap-filling is enabled.
    /// Reports all offending sites at once.
    pub fn preflight(sites: &[SiteFiles], gap_fill: bool) -> Result<()> {
        if !gap_fill {
            return Ok(());
        }
        let missing: Vec<String> = sites
            .iter()
            .filter(|s| s.auxiliary.is_none())
            .map(|s| s.site_code.clone())
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ProcessingError::MissingAuxiliarySource { sites: missing })
        }
    }

    /// Convert all sites in parallel
    pub fn process_sites(
        &self,
        sites: &[SiteFiles],
        registry: &VariableRegistry,
        policy: &ThresholdPolicy,
        progress: Option<&ProgressReporter>,
    ) -> Result<BatchReport> {
        Self::preflight(sites, policy.gap_fill)?;

        let total_sites = sites.len();
        let processed_count = Arc::new(AtomicUsize::new(0));

        if let Some(p) = progress {
            p.set_message(&format!("Converting {} sites...", total_sites));
        }

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.max_workers)
            .build()
            .map_err(|e| ProcessingError::Config(e.to_string()))?;

        let converter = SiteConverter::new(registry, policy);

        let mut outcomes: Vec<SiteOutcome> = pool.install(|| {
            sites
                .par_iter()
                .map(|site| {
                    let outcome = match self.process_single_site(site, &converter, policy) {
                        Ok(outcome) => outcome,
                        Err(e) => {
                            error!(site = %site.site_code, "conversion failed: {}", e);
                            SiteOutcome::failed(site, &e)
                        }
                    };

                    let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
                    if let Some(p) = progress {
                        p.update(count as u64);
                    }

                    outcome
                })
                .collect()
        });

        outcomes.sort_by(|a, b| a.site_code.cmp(&b.site_code));

        if let Some(p) = progress {
            p.finish_with_message(&format!("Converted {} sites", total_sites));
        }

        Ok(BatchReport {
            policy: policy.clone(),
            sites: outcomes,
        })
    }

    /// Read and convert one site without writing anything
    pub fn convert_site(
        &self,
        site: &SiteFiles,
        converter: &SiteConverter<'_>,
        policy: &ThresholdPolicy,
    ) -> Result<ConversionResult> {
        let table = self.reader.read_site(&site.path, Some(site.period))?;
        let mut input = SiteInput::new(&site.site_code, &site.version_tag, table);

        if policy.gap_fill {
            if let Some(aux_path) = &site.auxiliary {
                let auxiliary = self.reader.read_site(aux_path, site.auxiliary_period)?;
                input = input.with_auxiliary(auxiliary);
            }
        }

        converter.convert(input)
    }

    fn process_single_site(
        &self,
        site: &SiteFiles,
        converter: &SiteConverter<'_>,
        policy: &ThresholdPolicy,
    ) -> Result<SiteOutcome> {
        let result = self.convert_site(site, converter, policy)?;

        let outputs = match &self.output {
            Some((writer, output_dir)) => writer.write_result(&result, output_dir)?,
            None => Vec::new(),
        };

        info!(
            site = %result.site_code,
            status = %result.status(),
            years = ?(result.time_axis.first_year, result.time_axis.last_year),
            "site converted"
        );
        Ok(SiteOutcome::converted(&result, outputs))
    }
}

impl Default for ParallelProcessor {
    fn default() -> Self {
        Self::new(num_cpus::get())
    }
}
