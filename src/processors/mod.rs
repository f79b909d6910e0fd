pub mod gap_filler;
pub mod parallel_processor;
pub mod quality_evaluator;
pub mod site_converter;
pub mod temporal_aligner;
pub mod unit_converter;

pub use gap_filler::GapFiller;
pub use parallel_processor::{BatchReport, ParallelProcessor, SiteOutcome};
pub use quality_evaluator::{DropReason, QcDecision, QcSummary, QualityEvaluator};
pub use site_converter::{ConversionStage, SiteConverter, SiteInput};
pub use temporal_aligner::TemporalAligner;
pub use unit_converter::{ConversionContext, UnitConversion, UnitConverter};
