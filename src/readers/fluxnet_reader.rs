use crate::error::{ProcessingError, Result};
use crate::models::SiteTable;
use crate::utils::constants::{
    DEFAULT_BUFFER_SIZE, MISSING_VALUE, TIMESTAMP_COLUMN, TIMESTAMP_END_COLUMN,
    TIMESTAMP_START_COLUMN,
};
use chrono::{NaiveDate, NaiveDateTime};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

/// Which timestamp column labels the rows of a file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TimestampFormat {
    /// `TIMESTAMP_START` as `YYYYMMDDHHMM`
    Start(usize),
    /// `TIMESTAMP` as `YYYYMMDD`
    Day(usize),
}

/// Reads FLUXNET2015 comma separated archives into a [`SiteTable`]
pub struct FluxnetReader {
    buffer_size: usize,
}

impl FluxnetReader {
    pub fn new() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Read a site file. `period` is the year span declared by the file
    /// name and fixes the expected number of steps.
    pub fn read_site(&self, path: &Path, period: Option<(i32, i32)>) -> Result<SiteTable> {
        let file = File::open(path)?;
        let reader = BufReader::with_capacity(self.buffer_size, file);
        let table = self.read_from(reader).map_err(|e| match e {
            ProcessingError::InvalidFormat(msg) => {
                ProcessingError::InvalidFormat(format!("{}: {}", path.display(), msg))
            }
            other => other,
        })?;

        Ok(match period {
            Some((first, last)) => table.with_period(first, last),
            None => table,
        })
    }

    /// Column names of a file without reading its rows
    pub fn read_header(&self, path: &Path) -> Result<Vec<String>> {
        let file = File::open(path)?;
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(BufReader::with_capacity(self.buffer_size, file));
        Ok(csv_reader.headers()?.iter().map(str::to_string).collect())
    }

    pub fn read_from<R: Read>(&self, reader: R) -> Result<SiteTable> {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(false)
            .from_reader(reader);

        let headers: Vec<String> = csv_reader.headers()?.iter().map(str::to_string).collect();
        let format = Self::timestamp_format(&headers)?;
        let timestamp_index = match format {
            TimestampFormat::Start(i) | TimestampFormat::Day(i) => i,
        };

        let value_columns: Vec<(usize, &str)> = headers
            .iter()
            .enumerate()
            .filter(|(i, name)| {
                *i != timestamp_index
                    && name.as_str() != TIMESTAMP_END_COLUMN
                    && name.as_str() != TIMESTAMP_START_COLUMN
                    && name.as_str() != TIMESTAMP_COLUMN
            })
            .map(|(i, name)| (i, name.as_str()))
            .collect();

        let mut timestamps = Vec::new();
        let mut values: Vec<Vec<f64>> = vec![Vec::new(); value_columns.len()];

        for (row, record) in csv_reader.records().enumerate() {
            let record = record?;
            let raw_timestamp = record.get(timestamp_index).unwrap_or_default();
            timestamps.push(Self::parse_timestamp(raw_timestamp, format)?);

            for (slot, (index, name)) in value_columns.iter().enumerate() {
                let raw = record.get(*index).unwrap_or_default();
                let value = Self::parse_value(raw).ok_or_else(|| {
                    ProcessingError::InvalidFormat(format!(
                        "row {}: column {} has non-numeric value '{}'",
                        row + 2,
                        name,
                        raw
                    ))
                })?;
                values[slot].push(value);
            }
        }

        let columns: BTreeMap<String, Vec<f64>> = value_columns
            .into_iter()
            .zip(values)
            .map(|((_, name), column)| (name.to_string(), column))
            .collect();

        Ok(SiteTable::new(timestamps, columns))
    }

    fn timestamp_format(headers: &[String]) -> Result<TimestampFormat> {
        if let Some(i) = headers.iter().position(|h| h == TIMESTAMP_START_COLUMN) {
            return Ok(TimestampFormat::Start(i));
        }
        if let Some(i) = headers.iter().position(|h| h == TIMESTAMP_COLUMN) {
            return Ok(TimestampFormat::Day(i));
        }
        Err(ProcessingError::MissingData(format!(
            "no {} or {} column in header",
            TIMESTAMP_START_COLUMN, TIMESTAMP_COLUMN
        )))
    }

    pub fn parse_timestamp_start(raw: &str) -> Result<NaiveDateTime> {
        Ok(NaiveDateTime::parse_from_str(raw, "%Y%m%d%H%M")?)
    }

    fn parse_timestamp(raw: &str, format: TimestampFormat) -> Result<NaiveDateTime> {
        match format {
            TimestampFormat::Start(_) => Self::parse_timestamp_start(raw),
            TimestampFormat::Day(_) => {
                let date = NaiveDate::parse_from_str(raw, "%Y%m%d")?;
                Ok(date.and_time(chrono::NaiveTime::MIN))
            }
        }
    }

    /// Numeric cell, with the missing sentinel and empty cells as NaN
    fn parse_value(raw: &str) -> Option<f64> {
        if raw.is_empty() {
            return Some(f64::NAN);
        }
        let value: f64 = raw.parse().ok()?;
        if value == MISSING_VALUE {
            Some(f64::NAN)
        } else {
            Some(value)
        }
    }
}

impl Default for FluxnetReader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TimeGrid;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const HALF_HOURLY: &str = "\
TIMESTAMP_START,TIMESTAMP_END,TA_F,TA_F_QC,P_F
200501010000,200501010030,1.5,0,0
200501010030,200501010100,-9999,9,0.2
200501010100,200501010130,2.0,1,-9999
";

    #[test]
    fn test_read_half_hourly() {
        let table = FluxnetReader::new().read_from(HALF_HOURLY.as_bytes()).unwrap();

        assert_eq!(table.len(), 3);
        assert_eq!(
            table.timestamps[1],
            NaiveDate::from_ymd_opt(2005, 1, 1)
                .unwrap()
                .and_hms_opt(0, 30, 0)
                .unwrap()
        );
        let keys: Vec<&str> = table.columns.keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["P_F", "TA_F", "TA_F_QC"]);

        let ta = table.column("TA_F").unwrap();
        assert_eq!(ta[0], 1.5);
        assert!(ta[1].is_nan());
        assert!(table.column("P_F").unwrap()[2].is_nan());
    }

    #[test]
    fn test_read_daily_timestamp() {
        let data = "TIMESTAMP,TA_F\n20050101,1.0\n20050102,2.0\n";
        let table = FluxnetReader::new().read_from(data.as_bytes()).unwrap();
        assert_eq!((table.timestamps[1] - table.timestamps[0]).num_seconds(), 86_400);
    }

    #[test]
    fn test_missing_timestamp_column() {
        let data = "TA_F,P_F\n1.0,0.0\n";
        let err = FluxnetReader::new().read_from(data.as_bytes()).unwrap_err();
        assert!(matches!(err, ProcessingError::MissingData(_)));
    }

    #[test]
    fn test_non_numeric_value() {
        let data = "TIMESTAMP_START,TA_F\n200501010000,warm\n";
        let err = FluxnetReader::new().read_from(data.as_bytes()).unwrap_err();
        assert!(matches!(err, ProcessingError::InvalidFormat(_)));
    }

    #[test]
    fn test_read_site_applies_period() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(HALF_HOURLY.as_bytes()).unwrap();

        let table = FluxnetReader::new()
            .read_site(file.path(), Some((2005, 2005)))
            .unwrap();
        assert_eq!(table.period, Some((2005, 2005)));
        let grid = TimeGrid::infer("US-Ha1", &table.timestamps, table.period).unwrap();
        assert_eq!(grid.n_steps, 365 * 48);

        let header = FluxnetReader::new().read_header(file.path()).unwrap();
        assert_eq!(header[0], "TIMESTAMP_START");
        assert_eq!(header.len(), 5);
    }
}
