pub mod policy;
pub mod quality;
pub mod result;
pub mod site;
pub mod variable;

pub use policy::{OutOfRangeAction, ThresholdPolicy};
pub use quality::{GapfillTier, QcFlag};
pub use result::{
    ConversionReport, ConversionResult, QcPercentages, SiteStatus, TimeAxis, VariableRecord,
    VariableReport,
};
pub use site::{LoadedSite, SiteDataset, SiteTable, SiteVariable, TimeGrid};
pub use variable::{AggregateMethod, Category, SourceKind, VariableSpec};
