//! Controlled vocabulary mapping FLUXNET source columns onto output variables.
//!
//! The table is data, not code: the built-in FLUXNET2015 table is embedded
//! from `fluxnet2015_variables.csv` and parsed on load. A source column may
//! appear in more than one row (relative humidity feeds both `RH` and
//! `Qair`), so rows are keyed by `(source_name, output_name)`.

use crate::error::{ProcessingError, Result};
use crate::models::{Category, VariableSpec};
use std::collections::HashSet;
use std::fs::File;
use std::io::Read;
use std::path::Path;

const FLUXNET2015_TABLE: &str = include_str!("fluxnet2015_variables.csv");

#[derive(Debug, Clone, PartialEq)]
pub struct VariableRegistry {
    specs: Vec<VariableSpec>,
}

impl VariableRegistry {
    /// Registry for FLUXNET2015 FULLSET/SUBSET files
    pub fn builtin() -> Result<Self> {
        Self::from_reader(FLUXNET2015_TABLE.as_bytes())
    }

    pub fn from_path(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(file)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);

        let mut specs = Vec::new();
        for row in csv_reader.deserialize() {
            let spec: VariableSpec = row?;
            specs.push(spec);
        }

        Self::from_specs(specs)
    }

    pub fn from_specs(specs: Vec<VariableSpec>) -> Result<Self> {
        let mut seen = HashSet::new();
        for spec in &specs {
            spec.validate_bounds()?;
            if !seen.insert((spec.source_name.as_str(), spec.output_name.as_str())) {
                return Err(ProcessingError::Config(format!(
                    "Duplicate registry entry {} -> {}",
                    spec.source_name, spec.output_name
                )));
            }
        }

        Ok(Self { specs })
    }

    /// Every output variable fed by `source_name` (zero, one or two entries)
    pub fn lookup(&self, source_name: &str) -> Vec<&VariableSpec> {
        self.specs
            .iter()
            .filter(|s| s.source_name == source_name)
            .collect()
    }

    pub fn get(&self, source_name: &str, output_name: &str) -> Option<&VariableSpec> {
        self.specs
            .iter()
            .find(|s| s.source_name == source_name && s.output_name == output_name)
    }

    pub fn all_of_category(&self, category: Category) -> Vec<&VariableSpec> {
        self.specs
            .iter()
            .filter(|s| s.category == category)
            .collect()
    }

    pub fn essential_met(&self) -> Vec<&VariableSpec> {
        self.specs.iter().filter(|s| s.is_essential_met).collect()
    }

    pub fn is_known_source(&self, source_name: &str) -> bool {
        self.specs.iter().any(|s| s.source_name == source_name)
    }

    /// Reanalysis columns referenced by any row
    pub fn substitute_sources(&self) -> Vec<&str> {
        let mut sources: Vec<&str> = self
            .specs
            .iter()
            .filter_map(|s| s.substitute_source.as_deref())
            .collect();
        sources.sort_unstable();
        sources.dedup();
        sources
    }

    pub fn specs(&self) -> &[VariableSpec] {
        &self.specs
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// Plain-text rendering of the table for the `registry` command
    pub fn summary(&self) -> String {
        let mut summary = String::new();
        summary.push_str(&format!(
            "{:<22} {:<16} {:<12} {:<10} {:<5} {:>10} {:>10}  {}\n",
            "source", "unit", "output", "unit", "cat", "min", "max", "flags"
        ));
        for spec in &self.specs {
            let mut flags = Vec::new();
            if spec.is_essential_met {
                flags.push("essential".to_string());
            }
            if spec.is_preferred_eval {
                flags.push("preferred".to_string());
            }
            if let Some(sub) = &spec.substitute_source {
                flags.push(format!("fill={}", sub));
            }
            summary.push_str(&format!(
                "{:<22} {:<16} {:<12} {:<10} {:<5} {:>10} {:>10}  {}\n",
                spec.source_name,
                spec.source_unit,
                spec.output_name,
                spec.output_unit,
                spec.category,
                spec.valid_min,
                spec.valid_max,
                flags.join(",")
            ));
        }
        summary
    }
}
