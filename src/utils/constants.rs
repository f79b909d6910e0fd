/// FLUXNET missing value sentinel
pub const MISSING_VALUE: f64 = -9999.0;

/// Timestamp columns in FLUXNET files
pub const TIMESTAMP_START_COLUMN: &str = "TIMESTAMP_START";
pub const TIMESTAMP_END_COLUMN: &str = "TIMESTAMP_END";
pub const TIMESTAMP_COLUMN: &str = "TIMESTAMP";

/// Suffix of quality-control companion columns
pub const QC_SUFFIX: &str = "_QC";

/// Output column naming
pub const TIME_COLUMN: &str = "time";
pub const QC_COLUMN_SUFFIX: &str = "_qc";
pub const OUTPUT_EXTENSION: &str = "parquet";

/// File naming
pub const FLUXNET_FILE_PREFIX: &str = "FLX";
pub const DEFAULT_DATASET: &str = "FLUXNET2015";
pub const DEFAULT_SUBSET: &str = "FULLSET";
pub const AUXILIARY_SUBSET: &str = "ERAI";
/// Accepted resolutions in preference order
pub const DEFAULT_RESOLUTIONS: [&str; 2] = ["HH", "HR"];
pub const BATCH_SUMMARY_FILE: &str = "batch_summary.json";

/// Physical constants
pub const CELSIUS_TO_KELVIN: f64 = 273.15;
pub const STANDARD_PRESSURE_KPA: f64 = 101.325;
pub const WATER_TO_DRY_AIR_MASS_RATIO: f64 = 0.622;

/// Policy defaults
pub const DEFAULT_MISSING_MAX: f64 = 15.0;
pub const DEFAULT_MIN_CONSECUTIVE_YEARS: u32 = 1;
pub const ENV_PREFIX: &str = "FLUXNET";

/// Processing defaults
pub const DEFAULT_ROW_GROUP_SIZE: usize = 17_520; // one year of half-hours
pub const DEFAULT_BUFFER_SIZE: usize = 8192 * 16; // 128KB

/// Parquet compression options
pub const COMPRESSION_SNAPPY: &str = "snappy";
pub const COMPRESSION_GZIP: &str = "gzip";
pub const COMPRESSION_LZ4: &str = "lz4";
pub const COMPRESSION_ZSTD: &str = "zstd";
pub const COMPRESSION_NONE: &str = "none";
