use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;

use crate::error::{ProcessingError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Category {
    Met,
    Eval,
}

impl Category {
    /// File suffix used for the record set of this category
    pub fn file_suffix(&self) -> &'static str {
        match self {
            Category::Met => "Met",
            Category::Eval => "Flux",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Category::Met => write!(f, "Met"),
            Category::Eval => write!(f, "Eval"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Numeric,
    Integer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregateMethod {
    Mean,
    Sum,
    None,
}

impl AggregateMethod {
    pub fn is_gapfill_eligible(&self) -> bool {
        !matches!(self, AggregateMethod::None)
    }
}

/// One row of the variable registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub source_name: String,
    pub source_unit: String,
    pub source_kind: SourceKind,
    pub output_name: String,
    pub output_unit: String,
    pub long_name: String,
    #[serde(deserialize_with = "empty_as_none")]
    pub standard_name: Option<String>,
    pub valid_min: f64,
    pub valid_max: f64,
    #[serde(rename = "essential_met", deserialize_with = "flag_from_str")]
    pub is_essential_met: bool,
    #[serde(rename = "preferred_eval", deserialize_with = "flag_from_str")]
    pub is_preferred_eval: bool,
    pub category: Category,
    #[serde(deserialize_with = "empty_as_none")]
    pub substitute_source: Option<String>,
    pub aggregate_method: AggregateMethod,
}

impl VariableSpec {
    pub fn validate_bounds(&self) -> Result<()> {
        if self.valid_min > self.valid_max {
            return Err(ProcessingError::Config(format!(
                "{} -> {}: valid_min {} > valid_max {}",
                self.source_name, self.output_name, self.valid_min, self.valid_max
            )));
        }
        Ok(())
    }

    pub fn is_within_bounds(&self, value: f64) -> bool {
        (self.valid_min..=self.valid_max).contains(&value)
    }

    /// Name of the companion quality-control column in FLUXNET files
    pub fn qc_column(&self) -> String {
        format!("{}_QC", self.source_name)
    }

    /// Whether this variable takes part in reanalysis substitution
    pub fn is_gapfill_candidate(&self) -> bool {
        self.is_essential_met
            && self.category == Category::Met
            && self.substitute_source.is_some()
            && self.aggregate_method.is_gapfill_eligible()
    }
}

fn empty_as_none<'de, D>(deserializer: D) -> std::result::Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<String>::deserialize(deserializer)?;
    Ok(value.and_then(|s| {
        let trimmed = s.trim();
        if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("NA") {
            None
        } else {
            Some(trimmed.to_string())
        }
    }))
}

fn flag_from_str<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = String::deserialize(deserializer)?;
    match value.trim().to_ascii_uppercase().as_str() {
        "TRUE" | "T" | "1" => Ok(true),
        "FALSE" | "F" | "0" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "invalid boolean flag: '{}'",
            other
        ))),
    }
}
