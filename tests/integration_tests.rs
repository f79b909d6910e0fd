use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime};
use fluxnet_processor::models::{QcFlag, SiteStatus, ThresholdPolicy};
use fluxnet_processor::processors::{ParallelProcessor, SiteConverter};
use fluxnet_processor::readers::SiteLocator;
use fluxnet_processor::registry::VariableRegistry;
use fluxnet_processor::writers::ParquetWriter;
use fluxnet_processor::ProcessingError;
use pretty_assertions::assert_eq;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const HALF_HOUR: i64 = 1800;

fn year_start(year: i32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, 1, 1)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
}

fn half_hours(first_year: i32, last_year: i32) -> Vec<NaiveDateTime> {
    let end = year_start(last_year + 1);
    let mut stamps = Vec::new();
    let mut t = year_start(first_year);
    while t < end {
        stamps.push(t);
        t += Duration::seconds(HALF_HOUR);
    }
    stamps
}

fn stamp(t: NaiveDateTime) -> String {
    t.format("%Y%m%d%H%M").to_string()
}

/// Write a FULLSET file where `ta_missing(year, step)` marks missing air
/// temperature steps
fn write_site(
    dir: &Path,
    site: &str,
    years: (i32, i32),
    ta_missing: impl Fn(i32, usize) -> bool,
) {
    let mut csv = String::from(
        "TIMESTAMP_START,TIMESTAMP_END,TA_F,TA_F_QC,SW_IN_F,LW_IN_F,VPD_F,PA_F,P_F,WS_F,\
         LE_F_MDS,LE_F_MDS_QC,H_F_MDS,NEE_VUT_REF,GPP_NT_VUT_REF,NETRAD,EXTRA_COL\n",
    );
    for (i, t) in half_hours(years.0, years.1).into_iter().enumerate() {
        let (ta, ta_qc) = if ta_missing(t.year(), i) {
            ("-9999".to_string(), 9)
        } else {
            (((i % 31) as f64).to_string(), 0)
        };
        writeln!(
            csv,
            "{},{},{},{},250,320,8.5,101.3,1,3.2,80,{},40,-3.5,6.0,150,{}",
            stamp(t),
            stamp(t + Duration::seconds(HALF_HOUR)),
            ta,
            ta_qc,
            if i % 10 == 0 { 1 } else { 0 },
            i % 7
        )
        .unwrap();
    }
    let name = format!(
        "FLX_{}_FLUXNET2015_FULLSET_HH_{}-{}_1-3.csv",
        site, years.0, years.1
    );
    fs::write(dir.join(name), csv).unwrap();
}

/// Reanalysis file with constant 10 degC air temperature
fn write_erai(dir: &Path, site: &str, years: (i32, i32)) {
    let mut csv = String::from(
        "TIMESTAMP_START,TIMESTAMP_END,TA_ERA,SW_IN_ERA,LW_IN_ERA,VPD_ERA,PA_ERA,P_ERA,WS_ERA\n",
    );
    for t in half_hours(years.0, years.1) {
        writeln!(
            csv,
            "{},{},10,200,300,5,100.5,0.5,2.5",
            stamp(t),
            stamp(t + Duration::seconds(HALF_HOUR))
        )
        .unwrap();
    }
    let name = format!("FLX_{}_FLUXNET2015_ERAI_HH_{}-{}_1-3.csv", site, years.0, years.1);
    fs::write(dir.join(name), csv).unwrap();
}

fn registry() -> VariableRegistry {
    VariableRegistry::builtin().unwrap()
}

#[test]
fn test_five_percent_missing_is_retained() {
    let input = TempDir::new().unwrap();
    write_site(input.path(), "US-Ha1", (2005, 2005), |_, i| i % 20 == 0);

    let sites = SiteLocator::new().locate(input.path(), None).unwrap();
    assert_eq!(sites.len(), 1);

    let registry = registry();
    let policy = ThresholdPolicy::new(15.0);
    let processor = ParallelProcessor::new(1);
    let result = processor
        .convert_site(&sites[0], &SiteConverter::new(&registry, &policy), &policy)
        .unwrap();

    assert_eq!(result.time_axis.n_steps, 17_520);
    assert_eq!((result.time_axis.first_year, result.time_axis.last_year), (2005, 2005));

    let tair = &result.forcing["Tair"];
    assert_eq!(tair.unit, "K");
    assert_eq!(tair.qc.iter().filter(|f| **f == QcFlag::Missing).count(), 876);
    for value in tair.values.iter().filter(|v| !v.is_nan()) {
        assert!(
            (273.15 - 1e-9..=303.15 + 1e-9).contains(value),
            "{value} outside 273.15-303.15"
        );
    }

    let rainf = &result.forcing["Rainf"];
    assert!((rainf.values[0] - 1.0 / 1800.0).abs() < 1e-15);
    assert_eq!(rainf.unit, "kg/m2/s");

    let psurf = &result.forcing["Psurf"];
    assert!((psurf.values[0] - 101_300.0).abs() < 1e-6);

    assert_eq!(result.evaluation["Qle"].qc[0], QcFlag::GoodGapfill);
    assert_eq!(result.report.unmapped_columns, vec!["EXTRA_COL".to_string()]);
    assert_eq!(result.status(), SiteStatus::Success);
}

#[test]
fn test_twenty_percent_missing_fails_site() {
    let input = TempDir::new().unwrap();
    write_site(input.path(), "US-Ha1", (2005, 2005), |_, i| i % 5 == 0);

    let sites = SiteLocator::new().locate(input.path(), None).unwrap();
    let registry = registry();
    let policy = ThresholdPolicy::new(15.0);
    let err = ParallelProcessor::new(1)
        .convert_site(&sites[0], &SiteConverter::new(&registry, &policy), &policy)
        .unwrap_err();

    match err {
        ProcessingError::EssentialVariableDropped { variable, .. } => assert_eq!(variable, "Tair"),
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_batch_writes_outputs_and_summary() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    write_site(input.path(), "US-Ha1", (2005, 2005), |_, i| i % 20 == 0);
    write_site(input.path(), "AU-Tum", (2005, 2005), |_, i| i % 5 == 0);

    let sites = SiteLocator::new().locate(input.path(), None).unwrap();
    let registry = registry();
    let policy = ThresholdPolicy::new(15.0);

    let report = ParallelProcessor::new(2)
        .with_output(ParquetWriter::new(), output.path().to_path_buf())
        .process_sites(&sites, &registry, &policy, None)
        .unwrap();

    let statuses: Vec<(&str, SiteStatus)> = report
        .sites
        .iter()
        .map(|s| (s.site_code.as_str(), s.status))
        .collect();
    assert_eq!(
        statuses,
        vec![("AU-Tum", SiteStatus::Failed), ("US-Ha1", SiteStatus::Success)]
    );

    // No output for the failed site
    assert!(!output.path().join("AU-Tum_1-3_Met.parquet").exists());

    let met = output.path().join("US-Ha1_1-3_Met.parquet");
    let flux = output.path().join("US-Ha1_1-3_Flux.parquet");
    let writer = ParquetWriter::new();
    let (columns, rows) = writer.read_columns(&met).unwrap();
    assert_eq!(rows, 17_520);
    assert_eq!(columns[0], "time");
    assert!(columns.contains(&"Tair".to_string()));
    assert!(columns.contains(&"Tair_qc".to_string()));
    assert!(columns.contains(&"EXTRA_COL".to_string()));

    let (columns, _) = writer.read_columns(&flux).unwrap();
    assert!(columns.contains(&"Qle".to_string()));
    assert!(columns.contains(&"NEE".to_string()));

    let summary_path = output.path().join("batch_summary.json");
    report.write_json(&summary_path).unwrap();
    let summary: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(summary_path).unwrap()).unwrap();
    assert_eq!(summary["sites"][0]["status"], "Failed");
    assert_eq!(summary["sites"][1]["site_code"], "US-Ha1");
    assert_eq!(summary["policy"]["missing_max"], 15.0);
    assert_eq!(summary["sites"][1]["outputs"][0]["rows"], 17_520);

    let written = &report.site("US-Ha1").unwrap().outputs;
    assert_eq!(written.len(), 2);
    assert_eq!(written[0].path, met);
    assert!(report
        .generate_summary()
        .contains("US-Ha1_1-3_Met.parquet: 17520 rows"));
    assert!(report.site("AU-Tum").unwrap().outputs.is_empty());
}

#[test]
fn test_bad_year_trims_output_window() {
    let input = TempDir::new().unwrap();
    // 2007 is 30 % missing: whole record stays under 15 %, the year does not
    let steps_2005_2006 = 2 * 17_520;
    write_site(input.path(), "US-MMS", (2005, 2007), |year, i| {
        year == 2007 && (i - steps_2005_2006) % 10 < 3
    });

    let sites = SiteLocator::new().locate(input.path(), None).unwrap();
    let registry = registry();
    let policy = ThresholdPolicy::new(15.0);
    let result = ParallelProcessor::new(1)
        .convert_site(&sites[0], &SiteConverter::new(&registry, &policy), &policy)
        .unwrap();

    assert_eq!((result.time_axis.first_year, result.time_axis.last_year), (2005, 2006));
    assert_eq!(result.time_axis.n_steps, steps_2005_2006);
    assert_eq!(result.time_axis.start, year_start(2005));
    for record in result.forcing.values().chain(result.evaluation.values()) {
        assert_eq!(record.values.len(), steps_2005_2006);
        assert_eq!(record.qc.len(), steps_2005_2006);
    }
    assert!(result.forcing["Tair"].qc.iter().all(|f| *f == QcFlag::Measured));

    let strict = ThresholdPolicy::new(15.0).with_min_consecutive_years(3);
    let err = ParallelProcessor::new(1)
        .convert_site(&sites[0], &SiteConverter::new(&registry, &strict), &strict)
        .unwrap_err();
    assert!(matches!(
        err,
        ProcessingError::InsufficientContiguousYears { found: 2, required: 3, .. }
    ));
}

#[test]
fn test_gap_fill_from_reanalysis() {
    let input = TempDir::new().unwrap();
    let aux = TempDir::new().unwrap();
    write_site(input.path(), "US-Ha1", (2005, 2005), |_, i| i % 10 == 0);
    write_erai(aux.path(), "US-Ha1", (2005, 2005));

    let sites = SiteLocator::new().locate(input.path(), Some(aux.path())).unwrap();
    assert!(sites[0].auxiliary.is_some());

    let registry = registry();
    let policy = ThresholdPolicy::new(15.0).with_gap_fill(true);
    let result = ParallelProcessor::new(1)
        .convert_site(&sites[0], &SiteConverter::new(&registry, &policy), &policy)
        .unwrap();

    let tair = &result.forcing["Tair"];
    assert_eq!(tair.gap_filled_steps, 1_752);
    assert!(!tair.qc.contains(&QcFlag::Missing));
    assert_eq!(tair.qc[0], QcFlag::MediumGapfill);
    assert!((tair.values[0] - 283.15).abs() < 1e-9);
    assert_eq!(tair.qc[1], QcFlag::Measured);
}

#[test]
fn test_gap_fill_without_reanalysis_aborts_batch() {
    let input = TempDir::new().unwrap();
    write_site(input.path(), "US-Ha1", (2005, 2005), |_, _| false);
    write_site(input.path(), "AU-Tum", (2005, 2005), |_, _| false);
    write_erai(input.path(), "AU-Tum", (2005, 2005));

    let sites = SiteLocator::new().locate(input.path(), None).unwrap();
    let registry = registry();
    let policy = ThresholdPolicy::new(15.0).with_gap_fill(true);

    let err = ParallelProcessor::new(2)
        .process_sites(&sites, &registry, &policy, None)
        .unwrap_err();
    match err {
        ProcessingError::MissingAuxiliarySource { sites } => {
            assert_eq!(sites, vec!["US-Ha1".to_string()])
        }
        other => panic!("unexpected error: {other}"),
    }
}

#[test]
fn test_conversion_is_idempotent() {
    let input = TempDir::new().unwrap();
    write_site(input.path(), "US-Ha1", (2005, 2005), |_, i| i % 25 == 0);

    let sites = SiteLocator::new().locate(input.path(), None).unwrap();
    let registry = registry();
    let policy = ThresholdPolicy::new(15.0);
    let converter = SiteConverter::new(&registry, &policy);
    let processor = ParallelProcessor::new(1);

    let first = processor.convert_site(&sites[0], &converter, &policy).unwrap();
    let second = processor.convert_site(&sites[0], &converter, &policy).unwrap();

    // NaN never compares equal, so compare the serialized form
    assert_eq!(
        serde_json::to_string(&first).unwrap(),
        serde_json::to_string(&second).unwrap()
    );
}
