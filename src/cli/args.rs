use crate::error::Result;
use crate::models::{GapfillTier, OutOfRangeAction, ThresholdPolicy};
use crate::utils::constants::{DEFAULT_DATASET, DEFAULT_MISSING_MAX, DEFAULT_SUBSET};
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use validator::Validate;

#[derive(Parser)]
#[command(name = "fluxnet-processor")]
#[command(about = "Convert FLUXNET2015 flux tower archives into model forcing and evaluation data")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    #[arg(
        short,
        long,
        global = true,
        action = clap::ArgAction::Count,
        help = "Increase logging verbosity (-v info, -vv debug, -vvv trace)"
    )]
    pub verbose: u8,

    #[arg(long, global = true, help = "Log file path")]
    pub log_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert every located site into forcing and evaluation files
    Convert {
        #[arg(short, long, help = "Directory containing FLUXNET CSV archives")]
        input_dir: PathBuf,

        #[arg(short, long, help = "Directory for Parquet output and batch summary")]
        output_dir: PathBuf,

        #[arg(long, help = "Directory with ERAI reanalysis files [default: input dir]")]
        aux_dir: Option<PathBuf>,

        #[command(flatten)]
        policy: PolicyArgs,

        #[command(flatten)]
        selection: SelectionArgs,

        #[arg(long, help = "Variable registry CSV [default: built-in FLUXNET2015 table]")]
        registry: Option<PathBuf>,

        #[arg(short, long, default_value = "snappy")]
        compression: String,

        #[arg(long, default_value_t = num_cpus::get())]
        max_workers: usize,

        #[arg(long, help = "Only convert these site codes")]
        site: Vec<String>,
    },

    /// List located sites and how the registry covers their columns
    Inspect {
        #[arg(short, long, help = "Directory containing FLUXNET CSV archives")]
        input_dir: PathBuf,

        #[arg(long, help = "Directory with ERAI reanalysis files [default: input dir]")]
        aux_dir: Option<PathBuf>,

        #[command(flatten)]
        selection: SelectionArgs,

        #[arg(long, help = "Variable registry CSV [default: built-in FLUXNET2015 table]")]
        registry: Option<PathBuf>,
    },

    /// Print the variable registry
    Registry {
        #[arg(long, help = "Variable registry CSV [default: built-in FLUXNET2015 table]")]
        registry: Option<PathBuf>,

        #[arg(long, value_enum, help = "Only show one category")]
        category: Option<CategoryArg>,
    },
}

/// Which archives to pick up from a directory
#[derive(Args, Debug, Clone)]
pub struct SelectionArgs {
    #[arg(long, default_value = DEFAULT_DATASET)]
    pub dataset: String,

    #[arg(long, default_value = DEFAULT_SUBSET)]
    pub subset: String,

    #[arg(long, help = "Only accept one resolution code [default: HH, then HR]")]
    pub resolution: Option<String>,
}

/// Threshold policy flags. Flags given here override the policy file.
#[derive(Args, Debug, Clone, Default)]
pub struct PolicyArgs {
    #[arg(long, help = "Policy file (TOML, JSON or YAML)")]
    pub policy_file: Option<PathBuf>,

    #[arg(long, help = "Max % missing per variable [default: 15]")]
    pub missing_max: Option<f64>,

    #[arg(long, help = "Max % gap-filled of any tier; disables per-tier limits")]
    pub gapfill_all_max: Option<f64>,

    #[arg(long)]
    pub gapfill_good_max: Option<f64>,

    #[arg(long)]
    pub gapfill_med_max: Option<f64>,

    #[arg(long)]
    pub gapfill_poor_max: Option<f64>,

    #[arg(long)]
    pub min_consecutive_years: Option<u32>,

    #[arg(long, help = "Keep evaluation variables regardless of QC")]
    pub include_all_eval: bool,

    #[arg(long, help = "Fill essential meteorological gaps from ERAI")]
    pub gap_fill: bool,

    #[arg(long, value_enum)]
    pub substitute_tier: Option<TierArg>,

    #[arg(long, value_enum)]
    pub out_of_range: Option<OutOfRangeArg>,
}

impl PolicyArgs {
    /// Build the threshold policy: file values first, then any flag given
    /// on the command line. The result is validated before use.
    pub fn resolve(&self) -> Result<ThresholdPolicy> {
        let mut policy = match &self.policy_file {
            Some(path) => ThresholdPolicy::from_file(path)?,
            None => ThresholdPolicy::new(DEFAULT_MISSING_MAX),
        };

        if let Some(missing_max) = self.missing_max {
            policy.missing_max = missing_max;
        }
        if let Some(limit) = self.gapfill_all_max {
            policy.gapfill_all_max = Some(limit);
        }
        if let Some(limit) = self.gapfill_good_max {
            policy.gapfill_good_max = Some(limit);
        }
        if let Some(limit) = self.gapfill_med_max {
            policy.gapfill_med_max = Some(limit);
        }
        if let Some(limit) = self.gapfill_poor_max {
            policy.gapfill_poor_max = Some(limit);
        }
        if let Some(years) = self.min_consecutive_years {
            policy.min_consecutive_years = years;
        }
        if self.include_all_eval {
            policy.include_all_eval = true;
        }
        if self.gap_fill {
            policy.gap_fill = true;
        }
        if let Some(tier) = self.substitute_tier {
            policy.substitute_tier = tier.into();
        }
        if let Some(action) = self.out_of_range {
            policy.out_of_range = action.into();
        }

        policy.validate()?;
        Ok(policy)
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TierArg {
    Good,
    Medium,
    Poor,
}

impl From<TierArg> for GapfillTier {
    fn from(tier: TierArg) -> Self {
        match tier {
            TierArg::Good => GapfillTier::Good,
            TierArg::Medium => GapfillTier::Medium,
            TierArg::Poor => GapfillTier::Poor,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutOfRangeArg {
    Flag,
    SetMissing,
    Fail,
}

impl From<OutOfRangeArg> for OutOfRangeAction {
    fn from(action: OutOfRangeArg) -> Self {
        match action {
            OutOfRangeArg::Flag => OutOfRangeAction::Flag,
            OutOfRangeArg::SetMissing => OutOfRangeAction::SetMissing,
            OutOfRangeArg::Fail => OutOfRangeAction::Fail,
        }
    }
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CategoryArg {
    Met,
    Eval,
}
