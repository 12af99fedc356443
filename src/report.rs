//! Result output.
//!
//! Writes the raw records as JSON and a formatted workbook with a
//! "Test Data" sheet (one row per measurement point, spur records
//! exploded per spur and STN records per iteration) and a
//! "Test Statistics" sheet with totals, means and medians of the
//! per-operation timings.

use crate::error::BenchResult;
use crate::results::{TestKind, TestRecord};
use rust_xlsxwriter::{Format, Workbook, Worksheet};
use std::path::Path;

const DATA_HEADERS: [&str; 37] = [
    "Test Set",
    "Type",
    "Center Frequency (GHz)",
    "Power (dBm)",
    "Resource Blocks",
    "Resource Block Offset",
    "Channel Bandwidth (MHz)",
    "Modulation Type",
    "Subcarrier Spacing (kHz)",
    "Duplexing",
    "Link Direction",
    "Waveform File",
    "Setup File",
    "EVM (dB)",
    "EVM Time (s)",
    "Channel Power (dBm)",
    "ACP Lower (dB)",
    "ACP Upper (dB)",
    "Alternate Lower (dB)",
    "Alternate Upper (dB)",
    "ACLR Time (s)",
    "RBW (MHz)",
    "Spur Limit (dBm)",
    "Spur Frequency (MHz)",
    "Spur Power (dBm)",
    "Spur Measurement Time (s)",
    "Get Results Time (s)",
    "Iteration",
    "Marker (dBm)",
    "Marker Time (s)",
    "Stats Avg (dBm)",
    "Total Test Time (s)",
    "Config Summary",
    "VSG Config Time (s)",
    "VSA Config Time (s)",
    "VSA Info Time (s)",
    "Error",
];

/// One worksheet cell.
enum Cell {
    Empty,
    Int(u32),
    Num(f64),
    Text(String),
}

impl Cell {
    fn opt_num(value: Option<f64>) -> Self {
        value.map_or(Self::Empty, Self::Num)
    }
}

/// Write the records to `results_output.json` in the output directory.
pub fn write_json(records: &[TestRecord], output_dir: &Path) -> BenchResult<std::path::PathBuf> {
    let path = output_dir.join("results_output.json");
    let json = serde_json::to_string_pretty(records)?;
    std::fs::write(&path, json)?;
    tracing::info!("Saved results to: {}", path.display());
    Ok(path)
}

/// Write the records to `results_output.xlsx` in the output directory.
pub fn write_xlsx(records: &[TestRecord], output_dir: &Path) -> BenchResult<std::path::PathBuf> {
    let path = output_dir.join("results_output.xlsx");
    let mut workbook = Workbook::new();

    let data = workbook.add_worksheet().set_name("Test Data")?;
    write_data_sheet(data, records)?;

    let stats = workbook.add_worksheet().set_name("Test Statistics")?;
    write_stats_sheet(stats, records)?;

    workbook.save(&path)?;
    tracing::info!("Saved workbook to: {}", path.display());
    Ok(path)
}

fn write_data_sheet(sheet: &mut Worksheet, records: &[TestRecord]) -> BenchResult<()> {
    let header_fmt = Format::new().set_bold();
    let num_fmt = Format::new().set_num_format("0.000");

    for (col, header) in DATA_HEADERS.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, *header, &header_fmt)?;
    }

    let mut row = 1u32;
    for record in records {
        for cells in record_rows(record) {
            for (col, cell) in cells.into_iter().enumerate() {
                let col = col as u16;
                match cell {
                    Cell::Empty => {}
                    Cell::Int(v) => {
                        sheet.write_number(row, col, f64::from(v))?;
                    }
                    Cell::Num(v) if v.is_finite() => {
                        sheet.write_number_with_format(row, col, v, &num_fmt)?;
                    }
                    // Workbooks cannot hold NaN or infinity
                    Cell::Num(_) => {
                        sheet.write_string(row, col, "NaN")?;
                    }
                    Cell::Text(s) => {
                        sheet.write_string(row, col, &s)?;
                    }
                }
            }
            row += 1;
        }
    }
    Ok(())
}

/// Expand a record into its worksheet rows: one per spur for spur
/// searches, one per iteration for STN runs, otherwise a single row.
fn record_rows(record: &TestRecord) -> Vec<Vec<Cell>> {
    match record.kind {
        TestKind::SpurSearch if !record.spurs.is_empty() => record
            .spurs
            .iter()
            .map(|spur| {
                let mut row = base_row(record);
                row[23] = Cell::Num(spur.frequency_hz / 1e6);
                row[24] = Cell::Num(spur.power_dbm);
                row[31] = Cell::Num(record.measurement_time_s());
                row
            })
            .collect(),
        TestKind::Stn if !record.markers.is_empty() => {
            let total = record
                .total_test_time_s
                .unwrap_or_else(|| record.timings.values().sum());
            record
                .markers
                .iter()
                .enumerate()
                .map(|(i, marker)| {
                    let mut row = base_row(record);
                    row[27] = Cell::Int(i as u32 + 1);
                    row[28] = Cell::opt_num(marker.marker_dbm);
                    row[29] = Cell::Num(marker.meas_time_s);
                    row[30] = Cell::opt_num(record.stats.map(|s| s.avg_dbm));
                    row[31] = Cell::Num(total);
                    row
                })
                .collect()
        }
        _ => {
            let mut row = base_row(record);
            row[31] = Cell::Num(record.measurement_time_s());
            vec![row]
        }
    }
}

fn base_row(record: &TestRecord) -> Vec<Cell> {
    let timing = |key: &str| record.timings.get(key).copied().unwrap_or(0.0);
    let freq_ghz = record
        .center_frequency_hz
        .or(record.fundamental_frequency_hz)
        .map(|f| f / 1e9);

    let mut row: Vec<Cell> = Vec::with_capacity(DATA_HEADERS.len());
    row.push(Cell::Int(record.test_set));
    row.push(Cell::Text(record.kind.to_string()));
    row.push(Cell::opt_num(freq_ghz));
    row.push(Cell::opt_num(record.power_dbm));

    match &record.signal {
        Some(signal) => {
            row.push(Cell::Int(signal.resource_blocks));
            row.push(Cell::Int(signal.resource_block_offset));
            row.push(Cell::Int(signal.channel_bandwidth_mhz));
            row.push(Cell::Text(signal.modulation.clone()));
            row.push(Cell::Int(signal.subcarrier_spacing_khz));
            row.push(Cell::Text(signal.duplexing.clone()));
            row.push(Cell::Text(signal.link_direction.clone()));
        }
        None => row.extend((0..7).map(|_| Cell::Empty)),
    }

    row.push(opt_text(record.waveform_file.as_deref()));
    row.push(opt_text(record.setup_file.as_deref()));
    row.push(Cell::opt_num(record.evm_db));
    row.push(Cell::Num(timing("evm")));
    row.push(Cell::opt_num(record.aclr.map(|a| a.channel_power_dbm)));
    row.push(Cell::opt_num(record.aclr.map(|a| a.acp_lower_db)));
    row.push(Cell::opt_num(record.aclr.map(|a| a.acp_upper_db)));
    row.push(Cell::opt_num(record.aclr.map(|a| a.alt_lower_db)));
    row.push(Cell::opt_num(record.aclr.map(|a| a.alt_upper_db)));
    row.push(Cell::Num(timing("aclr")));
    row.push(Cell::opt_num(record.rbw_hz.map(|r| r / 1e6)));
    row.push(Cell::opt_num(record.spur_limit_dbm));
    row.push(Cell::Empty); // Spur Frequency (MHz)
    row.push(Cell::Empty); // Spur Power (dBm)
    row.push(Cell::Num(timing("measure")));
    row.push(Cell::Num(timing("get_results")));
    row.push(Cell::Empty); // Iteration
    row.push(Cell::Empty); // Marker (dBm)
    row.push(Cell::Empty); // Marker Time (s)
    row.push(Cell::Empty); // Stats Avg (dBm)
    row.push(Cell::Empty); // Total Test Time (s)
    row.push(Cell::Text(record.config.clone()));
    row.push(Cell::Num(timing("vsg_config")));
    row.push(Cell::Num(timing("vsa_config")));
    row.push(Cell::Num(timing("vsa_get_info")));
    row.push(opt_text(record.error.as_deref()));
    row
}

fn opt_text(value: Option<&str>) -> Cell {
    value.map_or(Cell::Empty, |s| Cell::Text(s.to_string()))
}

fn write_stats_sheet(sheet: &mut Worksheet, records: &[TestRecord]) -> BenchResult<()> {
    let header_fmt = Format::new().set_bold();
    let num_fmt = Format::new().set_num_format("0.000");

    let test_times: Vec<f64> = records
        .iter()
        .filter(|r| r.kind == TestKind::Stn)
        .filter_map(|r| r.total_test_time_s)
        .collect();
    let setup_times: Vec<f64> = records.iter().map(TestRecord::setup_time_s).collect();
    let timing_series = |key: &str| -> Vec<f64> {
        records
            .iter()
            .map(|r| r.timings.get(key).copied().unwrap_or(0.0))
            .collect()
    };
    let evm_times = timing_series("evm");
    let aclr_times = timing_series("aclr");
    let info_times = timing_series("vsa_get_info");
    let spur_measure_times = timing_series("measure");
    let spur_results_times = timing_series("get_results");
    let marker_times: Vec<f64> = records
        .iter()
        .filter(|r| r.kind == TestKind::Stn)
        .flat_map(|r| r.markers.iter().map(|m| m.meas_time_s))
        .collect();

    sheet.write_string_with_format(0, 0, "Metric", &header_fmt)?;
    sheet.write_string_with_format(0, 1, "Value", &header_fmt)?;
    sheet.write_string(1, 0, "Number of Tests")?;
    sheet.write_number(1, 1, records.len() as f64)?;

    let groups: [(&str, &[f64]); 8] = [
        ("Test Time (s)", &test_times),
        ("Setup Time (s)", &setup_times),
        ("EVM Time (s)", &evm_times),
        ("ACLR Time (s)", &aclr_times),
        ("VSA Info Time (s)", &info_times),
        ("Spur Measurement Time (s)", &spur_measure_times),
        ("Get Results Time (s)", &spur_results_times),
        ("Marker Time (s)", &marker_times),
    ];

    let mut row = 2u32;
    for (label, series) in groups {
        let entries = [
            (format!("Total {}", label), series.iter().sum::<f64>()),
            (format!("Average {}", label), mean(series)),
            (format!("Median {}", label), median(series)),
        ];
        for (metric, value) in entries {
            sheet.write_string(row, 0, &metric)?;
            sheet.write_number_with_format(row, 1, value, &num_fmt)?;
            row += 1;
        }
    }
    Ok(())
}

/// Arithmetic mean; 0.0 for an empty series.
fn mean(series: &[f64]) -> f64 {
    if series.is_empty() {
        0.0
    } else {
        series.iter().sum::<f64>() / series.len() as f64
    }
}

/// Median; 0.0 for an empty series.
fn median(series: &[f64]) -> f64 {
    if series.is_empty() {
        return 0.0;
    }
    let mut sorted = series.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
