use serde::{Deserialize, Serialize};

use crate::error::{ProcessingError, Result};

/// Per-step provenance of a value, following the FLUXNET2015 `_QC` codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum QcFlag {
    Measured = 0,
    GoodGapfill = 1,
    MediumGapfill = 2,
    PoorGapfill = 3,
    Missing = 9,
}

impl QcFlag {
    /// Parse a FLUXNET QC code as read from a CSV column
    pub fn from_code(value: f64) -> Result<Self> {
        if value.fract() != 0.0 {
            return Err(ProcessingError::InvalidQualityFlag(value));
        }
        match value as i64 {
            0 => Ok(QcFlag::Measured),
            1 => Ok(QcFlag::GoodGapfill),
            2 => Ok(QcFlag::MediumGapfill),
            3 => Ok(QcFlag::PoorGapfill),
            9 => Ok(QcFlag::Missing),
            _ => Err(ProcessingError::InvalidQualityFlag(value)),
        }
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    pub fn is_gapfilled(&self) -> bool {
        matches!(
            self,
            QcFlag::GoodGapfill | QcFlag::MediumGapfill | QcFlag::PoorGapfill
        )
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, QcFlag::Missing)
    }

    /// Steps the reanalysis substitution may overwrite
    pub fn is_replaceable(&self) -> bool {
        matches!(self, QcFlag::Missing | QcFlag::PoorGapfill)
    }
}

/// Gap-fill tier written onto steps filled from the reanalysis source.
///
/// Has no `Measured` variant so that substituted values can never be
/// reclassified as observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GapfillTier {
    Good,
    #[default]
    Medium,
    Poor,
}

impl From<GapfillTier> for QcFlag {
    fn from(tier: GapfillTier) -> Self {
        match tier {
            GapfillTier::Good => QcFlag::GoodGapfill,
            GapfillTier::Medium => QcFlag::MediumGapfill,
            GapfillTier::Poor => QcFlag::PoorGapfill,
        }
    }
}
