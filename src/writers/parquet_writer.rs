use crate::error::{ProcessingError, Result};
use crate::models::{Category, ConversionResult, VariableRecord};
use crate::utils::constants::{
    COMPRESSION_GZIP, COMPRESSION_LZ4, COMPRESSION_NONE, COMPRESSION_SNAPPY, COMPRESSION_ZSTD,
    DEFAULT_ROW_GROUP_SIZE, QC_COLUMN_SUFFIX, TIME_COLUMN,
};
use crate::utils::filename::output_file_name;
use arrow::array::*;
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use parquet::arrow::ArrowWriter;
use parquet::basic::{Compression, GzipLevel};
use parquet::file::properties::WriterProperties;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, warn};

pub struct ParquetWriter {
    compression: Compression,
    row_group_size: usize,
}

impl ParquetWriter {
    pub fn new() -> Self {
        Self {
            compression: Compression::SNAPPY,
            row_group_size: DEFAULT_ROW_GROUP_SIZE,
        }
    }

    pub fn with_compression(mut self, compression: &str) -> Result<Self> {
        self.compression = match compression.to_lowercase().as_str() {
            COMPRESSION_SNAPPY => Compression::SNAPPY,
            COMPRESSION_GZIP => Compression::GZIP(GzipLevel::default()),
            COMPRESSION_LZ4 => Compression::LZ4,
            COMPRESSION_ZSTD => Compression::ZSTD(parquet::basic::ZstdLevel::default()),
            COMPRESSION_NONE => Compression::UNCOMPRESSED,
            _ => {
                return Err(ProcessingError::Config(format!(
                    "Unsupported compression: {}",
                    compression
                )))
            }
        };
        Ok(self)
    }

    /// Write the forcing and evaluation record sets of a site into
    /// `output_dir`, forcing first. A failed write removes every file of
    /// the site already written.
    pub fn write_result(
        &self,
        result: &ConversionResult,
        output_dir: &Path,
    ) -> Result<Vec<OutputFileInfo>> {
        std::fs::create_dir_all(output_dir)?;

        let mut written: Vec<OutputFileInfo> = Vec::with_capacity(2);
        for category in [Category::Met, Category::Eval] {
            let path = output_dir.join(output_file_name(
                &result.site_code,
                &result.version_tag,
                category,
            ));
            let info = self
                .write_record_set(result, category, &path)
                .and_then(|_| self.file_info(&path));

            match info {
                Ok(info) => {
                    debug!(site = %result.site_code, path = %path.display(), rows = info.rows, "record set written");
                    written.push(info);
                }
                Err(e) => {
                    let partial = path.is_file().then_some(path.as_path());
                    for stale in written.iter().map(|w| w.path.as_path()).chain(partial) {
                        if let Err(remove_error) = std::fs::remove_file(stale) {
                            warn!(path = %stale.display(), "could not remove output: {}", remove_error);
                        }
                    }
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    /// Write one record set. Unconverted pass-through columns go with the
    /// forcing set.
    pub fn write_record_set(
        &self,
        result: &ConversionResult,
        category: Category,
        path: &Path,
    ) -> Result<()> {
        let records = result.record_set(category);
        let passthrough = match category {
            Category::Met => Some(&result.passthrough),
            Category::Eval => None,
        };

        let schema = self.create_schema(result, category, records, passthrough);
        let batch = self.records_to_batch(result, records, passthrough, schema.clone())?;

        let file = File::create(path)?;
        let props = WriterProperties::builder()
            .set_compression(self.compression)
            .set_max_row_group_size(self.row_group_size)
            .build();

        let mut writer = ArrowWriter::try_new(file, schema, Some(props))?;
        writer.write(&batch)?;
        writer.close()?;

        Ok(())
    }

    fn create_schema(
        &self,
        result: &ConversionResult,
        category: Category,
        records: &BTreeMap<String, VariableRecord>,
        passthrough: Option<&BTreeMap<String, Vec<f64>>>,
    ) -> Arc<Schema> {
        let mut fields = vec![Field::new(
            TIME_COLUMN,
            DataType::Timestamp(TimeUnit::Second, None),
            false,
        )];

        for (name, record) in records {
            let mut metadata = HashMap::new();
            metadata.insert("units".to_string(), record.unit.clone());
            metadata.insert("long_name".to_string(), record.long_name.clone());
            metadata.insert("source_name".to_string(), record.source_name.clone());
            if let Some(standard_name) = &record.standard_name {
                metadata.insert("standard_name".to_string(), standard_name.clone());
            }
            metadata.insert(
                "gap_filled_steps".to_string(),
                record.gap_filled_steps.to_string(),
            );
            fields.push(Field::new(name, DataType::Float64, true).with_metadata(metadata));
            fields.push(Field::new(
                format!("{}{}", name, QC_COLUMN_SUFFIX),
                DataType::UInt8,
                false,
            ));
        }

        for name in passthrough_names(records, passthrough) {
            let mut metadata = HashMap::new();
            metadata.insert("source_name".to_string(), name.clone());
            metadata.insert("unconverted".to_string(), "true".to_string());
            fields.push(Field::new(name, DataType::Float64, true).with_metadata(metadata));
        }

        let axis = &result.time_axis;
        let mut metadata = HashMap::new();
        metadata.insert("site_code".to_string(), result.site_code.clone());
        metadata.insert("version".to_string(), result.version_tag.clone());
        metadata.insert("record_set".to_string(), category.to_string());
        metadata.insert("time_start".to_string(), axis.start.to_string());
        metadata.insert("time_step_seconds".to_string(), axis.step_seconds.to_string());
        metadata.insert("first_year".to_string(), axis.first_year.to_string());
        metadata.insert("last_year".to_string(), axis.last_year.to_string());

        Arc::new(Schema::new_with_metadata(fields, metadata))
    }

    fn records_to_batch(
        &self,
        result: &ConversionResult,
        records: &BTreeMap<String, VariableRecord>,
        passthrough: Option<&BTreeMap<String, Vec<f64>>>,
        schema: Arc<Schema>,
    ) -> Result<RecordBatch> {
        let times: Vec<i64> = result
            .time_axis
            .timestamps()
            .map(|t| t.and_utc().timestamp())
            .collect();

        let mut columns: Vec<ArrayRef> = vec![Arc::new(TimestampSecondArray::from(times))];

        for record in records.values() {
            columns.push(Arc::new(Float64Array::from(nullable(&record.values))));
            let flags: Vec<u8> = record.qc.iter().map(|f| f.as_u8()).collect();
            columns.push(Arc::new(UInt8Array::from(flags)));
        }

        if let Some(passthrough) = passthrough {
            for name in passthrough_names(records, Some(passthrough)) {
                columns.push(Arc::new(Float64Array::from(nullable(&passthrough[&name]))));
            }
        }

        Ok(RecordBatch::try_new(schema, columns)?)
    }

    /// Column names and row count of a written file
    pub fn read_columns(&self, path: &Path) -> Result<(Vec<String>, usize)> {
        use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;

        let file = File::open(path)?;
        let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;
        let names = builder
            .schema()
            .fields()
            .iter()
            .map(|f| f.name().clone())
            .collect();

        let mut rows = 0;
        for batch in builder.build()? {
            rows += batch?.num_rows();
        }
        Ok((names, rows))
    }

    /// Row and size statistics of a written file
    pub fn file_info(&self, path: &Path) -> Result<OutputFileInfo> {
        use parquet::file::reader::{FileReader, SerializedFileReader};

        let reader = SerializedFileReader::new(File::open(path)?)?;
        let metadata = reader.metadata();

        Ok(OutputFileInfo {
            path: path.to_path_buf(),
            rows: metadata.file_metadata().num_rows(),
            row_groups: metadata.num_row_groups(),
            size_bytes: std::fs::metadata(path)?.len(),
        })
    }
}

impl Default for ParquetWriter {
    fn default() -> Self {
        Self::new()
    }
}

/// Missing values as nulls
fn nullable(values: &[f64]) -> Vec<Option<f64>> {
    values
        .iter()
        .map(|v| if v.is_nan() { None } else { Some(*v) })
        .collect()
}

/// Pass-through columns that do not collide with an output variable
fn passthrough_names(
    records: &BTreeMap<String, VariableRecord>,
    passthrough: Option<&BTreeMap<String, Vec<f64>>>,
) -> Vec<String> {
    let Some(passthrough) = passthrough else {
        return Vec::new();
    };
    passthrough
        .keys()
        .filter(|name| {
            let qc_name = name
                .strip_suffix(QC_COLUMN_SUFFIX)
                .is_some_and(|base| records.contains_key(base));
            let collides = records.contains_key(*name) || qc_name || name.as_str() == TIME_COLUMN;
            if collides {
                warn!(column = %name, "pass-through column shadows an output column, skipped");
            }
            !collides
        })
        .cloned()
        .collect()
}

/// A written record set file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputFileInfo {
    pub path: PathBuf,
    pub rows: i64,
    pub row_groups: usize,
    pub size_bytes: u64,
}

impl OutputFileInfo {
    pub fn summary(&self) -> String {
        let name = self
            .path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!(
            "{}: {} rows, {} row group(s), {:.2} MB",
            name,
            self.rows,
            self.row_groups,
            self.size_bytes as f64 / 1_048_576.0
        )
    }
}
