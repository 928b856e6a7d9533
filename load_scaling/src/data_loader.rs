use anyhow::{bail, Context, Result};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use polars::prelude::*;
use std::fs::File;
use std::io::{Cursor, Read, Write};
use std::path::Path;

use crate::models::{
    ControlTotalsTable, HourlyProfileTable, OriginalEnergyTable, SummaryShapeTable,
    CONTROL_KEY_COLUMNS, PROFILE_KEY_COLUMNS,
};

fn is_gzip(path: &Path) -> bool {
    path.extension().and_then(|s| s.to_str()) == Some("gz")
}

/// Read a CSV file into a DataFrame, decompressing `.gz` files on the way.
pub fn read_csv_frame(path: &Path) -> Result<DataFrame> {
    let mut bytes = Vec::new();
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    if is_gzip(path) {
        GzDecoder::new(file)
            .read_to_end(&mut bytes)
            .with_context(|| format!("decompressing {}", path.display()))?;
    } else {
        let mut file = file;
        file.read_to_end(&mut bytes)?;
    }

    CsvReader::new(Cursor::new(bytes))
        .has_header(true)
        .infer_schema(None)
        .finish()
        .with_context(|| format!("parsing CSV {}", path.display()))
}

/// Write a DataFrame as CSV, gzip-compressed when the path ends in `.gz`.
pub fn write_csv_frame(path: &Path, df: &mut DataFrame) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let mut buffer = Vec::new();
    CsvWriter::new(&mut buffer)
        .has_header(true)
        .finish(df)
        .with_context(|| format!("serializing CSV for {}", path.display()))?;

    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    if is_gzip(path) {
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(&buffer)?;
        encoder.finish()?;
    } else {
        let mut file = file;
        file.write_all(&buffer)?;
    }
    Ok(())
}

fn require_columns(df: &DataFrame, required: &[&str], path: &Path) -> Result<()> {
    let names = df.get_column_names();
    for column in required {
        if !names.contains(column) {
            bail!("{} is missing required column '{}'", path.display(), column);
        }
    }
    Ok(())
}

fn state_columns(df: &DataFrame, key_columns: &[&str]) -> Vec<String> {
    df.get_column_names()
        .into_iter()
        .filter(|name| !key_columns.contains(name))
        .map(|name| name.to_string())
        .collect()
}

fn string_column(df: &DataFrame, name: &str) -> Result<Vec<String>> {
    let series = df.column(name)?.cast(&DataType::Utf8)?;
    Ok(series
        .utf8()?
        .into_iter()
        .map(|v| v.unwrap_or_default().to_string())
        .collect())
}

fn float_column(df: &DataFrame, name: &str) -> Result<Vec<f64>> {
    let series = df
        .column(name)?
        .cast(&DataType::Float64)
        .with_context(|| format!("column '{}' is not numeric", name))?;
    Ok(series.f64()?.into_iter().map(|v| v.unwrap_or(0.0)).collect())
}

/// Load the control-totals table: `scenario, subsector_group, year, <states...>`.
pub fn read_control_totals(path: &Path) -> Result<ControlTotalsTable> {
    let df = read_csv_frame(path)?;
    require_columns(&df, &CONTROL_KEY_COLUMNS, path)?;

    let states = state_columns(&df, &CONTROL_KEY_COLUMNS);
    let scenarios = string_column(&df, "scenario")?;
    let groups = string_column(&df, "subsector_group")?;
    let years = df.column("year")?.cast(&DataType::Int64)?;
    let years = years.i64()?;
    let state_values = states
        .iter()
        .map(|state| float_column(&df, state))
        .collect::<Result<Vec<_>>>()?;

    let mut table = ControlTotalsTable::new(states);
    for idx in 0..df.height() {
        let year = years
            .get(idx)
            .with_context(|| format!("{}: row {} has no year", path.display(), idx + 1))?;
        let values = state_values.iter().map(|column| column[idx]).collect();
        table.push(&scenarios[idx], &groups[idx], i32::try_from(year)?, values);
    }

    Ok(table)
}

/// Load an hourly profile table: `sector, subsector, weather_datetime, <states...>`.
pub fn read_profile(path: &Path) -> Result<HourlyProfileTable> {
    let df = read_csv_frame(path)?;
    require_columns(&df, &PROFILE_KEY_COLUMNS, path)?;

    let states = state_columns(&df, &PROFILE_KEY_COLUMNS);
    let columns = states
        .iter()
        .map(|state| float_column(&df, state))
        .collect::<Result<Vec<_>>>()?;

    Ok(HourlyProfileTable {
        sectors: string_column(&df, "sector")?,
        subsectors: string_column(&df, "subsector")?,
        timestamps: string_column(&df, "weather_datetime")?,
        states,
        columns,
    })
}

pub fn profile_to_frame(profile: &HourlyProfileTable) -> Result<DataFrame> {
    let mut series = vec![
        Series::new("sector", &profile.sectors),
        Series::new("subsector", &profile.subsectors),
        Series::new("weather_datetime", &profile.timestamps),
    ];
    for (state, column) in profile.states.iter().zip(&profile.columns) {
        series.push(Series::new(state, column));
    }
    Ok(DataFrame::new(series)?)
}

pub fn write_profile(path: &Path, profile: &HourlyProfileTable) -> Result<()> {
    let mut df = profile_to_frame(profile)?;
    write_csv_frame(path, &mut df)
}

pub fn summary_to_frame(summary: &SummaryShapeTable) -> Result<DataFrame> {
    let mut series = vec![
        Series::new(
            "weather_datetime",
            summary.keys.iter().map(|k| k.weather_datetime.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "state",
            summary.keys.iter().map(|k| k.state.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "sector",
            summary.keys.iter().map(|k| k.sector.as_str()).collect::<Vec<_>>(),
        ),
    ];
    for (year_idx, year) in summary.years.iter().enumerate() {
        let values: Vec<Option<f64>> = summary.values.iter().map(|row| row[year_idx]).collect();
        series.push(Series::new(&year.to_string(), values));
    }
    Ok(DataFrame::new(series)?)
}

pub fn write_summary(path: &Path, summary: &SummaryShapeTable) -> Result<()> {
    let mut df = summary_to_frame(summary)?;
    write_csv_frame(path, &mut df)
}

pub fn write_original_energy(path: &Path, table: &OriginalEnergyTable) -> Result<()> {
    let mut series = vec![
        Series::new(
            "scenario",
            table.rows.iter().map(|r| r.scenario.as_str()).collect::<Vec<_>>(),
        ),
        Series::new(
            "subsector_group",
            table.rows.iter().map(|r| r.subsector_group.as_str()).collect::<Vec<_>>(),
        ),
        Series::new("year", table.rows.iter().map(|r| r.year).collect::<Vec<_>>()),
    ];
    for (idx, state) in table.states.iter().enumerate() {
        let values: Vec<f64> = table
            .rows
            .iter()
            .map(|r| r.values.get(idx).copied().unwrap_or(0.0))
            .collect();
        series.push(Series::new(state, values));
    }
    let mut df = DataFrame::new(series)?;
    write_csv_frame(path, &mut df)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_read_control_totals() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("scaling_inputs_MWh.csv");
        fs::write(
            &path,
            "scenario,subsector_group,year,CA,TX\n\
             central,\"heating, cooling\",2025,100,40.5\n\
             central,\"heating, cooling\",2035,200,20\n",
        )
        .unwrap();

        let totals = read_control_totals(&path).unwrap();
        assert_eq!(totals.states, vec!["CA", "TX"]);
        assert_eq!(totals.rows.len(), 2);
        assert_eq!(totals.rows[0].subsector_group, "heating, cooling");
        assert_eq!(totals.rows[1].year, 2035);
        assert_eq!(totals.rows[0].values, vec![100.0, 40.5]);
    }

    #[test]
    fn test_missing_key_column_is_fatal() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "scenario,year,CA\ncentral,2025,1\n").unwrap();
        let err = read_control_totals(&path).unwrap_err();
        assert!(err.to_string().contains("subsector_group"));
    }

    #[test]
    fn test_profile_gzip_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("central").join("2030.csv.gz");

        let mut profile = HourlyProfileTable::new(vec!["CA".to_string(), "NY".to_string()]);
        profile.push_row("residential", "heating", "2012-01-01 00:00:00", &[1.0, 2.5]);
        profile.push_row("commercial", "data center", "2012-01-01 01:00:00", &[0.0, 7.0]);

        write_profile(&path, &profile).unwrap();
        let loaded = read_profile(&path).unwrap();
        assert_eq!(loaded, profile);
    }

    #[test]
    fn test_summary_frame_layout() {
        use crate::models::SummaryKey;
        let summary = SummaryShapeTable {
            keys: vec![SummaryKey {
                weather_datetime: "2012-01-01 00:00:00".to_string(),
                state: "CA".to_string(),
                sector: "residential".to_string(),
            }],
            years: vec![2025, 2030],
            values: vec![vec![Some(1.0), None]],
        };
        let df = summary_to_frame(&summary).unwrap();
        assert_eq!(
            df.get_column_names(),
            vec!["weather_datetime", "state", "sector", "2025", "2030"]
        );
        assert_eq!(df.column("2030").unwrap().null_count(), 1);
    }
}
