use anyhow::{bail, Context, Result};
use chrono::{Duration, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use load_scaling::normalizer::interpolate_annual_totals;
use load_scaling::{
    read_archive, write_archive, ArchiveFrame, BalancingAreaMap, HourlyProfileTable,
    MultiYearProfile, ProjectionConfig, RatioNormalizer, StateProfile,
};
use log::info;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::scale_processor::load_scenario;

pub const DEFAULT_WEATHER_YEAR: i32 = 2012;

/// Replace base rows whose subsector contains `subsector_contains` with the
/// matching rows of `scenario`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OverrideSpec {
    pub scenario: String,
    pub subsector_contains: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputSpec {
    pub file_name: String,
    pub scenario: String,
    #[serde(default)]
    pub overrides: Vec<OverrideSpec>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalancingAreaSpec {
    pub load_participation: PathBuf,
    pub county_to_ba: PathBuf,
}

/// Archive of observed load prepended ahead of the projection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalSpec {
    pub path: PathBuf,
    #[serde(default = "default_first_historical_year")]
    pub first_year: i32,
    #[serde(default = "default_last_historical_year")]
    pub last_year: i32,
}

fn default_first_historical_year() -> i32 {
    2010
}

fn default_last_historical_year() -> i32 {
    2024
}

impl HistoricalSpec {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            first_year: default_first_historical_year(),
            last_year: default_last_historical_year(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationPlan {
    pub weather_year: i32,
    pub projection: ProjectionConfig,
    pub outputs: Vec<OutputSpec>,
    pub balancing_areas: Option<BalancingAreaSpec>,
    pub historical: Option<HistoricalSpec>,
}

impl Default for GenerationPlan {
    fn default() -> Self {
        let output = |file_name: &str, scenario: &str| OutputSpec {
            file_name: file_name.to_string(),
            scenario: scenario.to_string(),
            overrides: Vec::new(),
        };
        let mut current_high_dc = output("EER_Current_HighDC_UCS_load_hourly.npz", "current policy");
        current_high_dc.overrides.push(OverrideSpec {
            scenario: "central high data center".to_string(),
            subsector_contains: "data center".to_string(),
        });

        Self {
            weather_year: DEFAULT_WEATHER_YEAR,
            projection: ProjectionConfig::default(),
            outputs: vec![
                output("EER_Decarb_LowDC_UCS_load_hourly.npz", "central"),
                output("EER_Current_LowDC_UCS_load_hourly.npz", "current policy"),
                output("EER_Decarb_HighDC_UCS_load_hourly.npz", "central high data center"),
                current_high_dc,
            ],
            balancing_areas: None,
            historical: None,
        }
    }
}

impl GenerationPlan {
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        serde_json::from_str(&text).with_context(|| format!("parsing plan {}", path.display()))
    }
}

/// Overwrite matching rows of `base` with the donor's values for the same
/// `(year, sector, subsector, weather_datetime)`. Returns the number of rows replaced.
pub fn apply_override(
    base: &mut BTreeMap<i32, HourlyProfileTable>,
    donor: &BTreeMap<i32, HourlyProfileTable>,
    subsector_contains: &str,
) -> Result<usize> {
    let mut replaced = 0;
    for (year, table) in base.iter_mut() {
        let rows: Vec<usize> = (0..table.height())
            .filter(|&r| table.subsectors[r].contains(subsector_contains))
            .collect();
        if rows.is_empty() {
            continue;
        }

        let donor_table = donor
            .get(year)
            .with_context(|| format!("override source has no {} table", year))?;
        let donor_rows: HashMap<(&str, &str, &str), usize> = (0..donor_table.height())
            .map(|r| {
                (
                    (
                        donor_table.sectors[r].as_str(),
                        donor_table.subsectors[r].as_str(),
                        donor_table.timestamps[r].as_str(),
                    ),
                    r,
                )
            })
            .collect();
        let donor_columns = table
            .states
            .iter()
            .map(|state| {
                donor_table
                    .state_index(state)
                    .with_context(|| format!("override source has no '{}' column", state))
            })
            .collect::<Result<Vec<_>>>()?;

        for row in rows {
            let key = (
                table.sectors[row].as_str(),
                table.subsectors[row].as_str(),
                table.timestamps[row].as_str(),
            );
            let Some(&source) = donor_rows.get(&key) else {
                bail!("override source has no row for {:?} in {}", key, year);
            };
            for (column, &donor_column) in table.columns.iter_mut().zip(&donor_columns) {
                column[row] = donor_table.columns[donor_column][source];
            }
            replaced += 1;
        }
    }
    Ok(replaced)
}

/// First `hours` hourly timestamps of `weather_year`.
pub fn hourly_timestamps(weather_year: i32, hours: usize) -> Result<Vec<String>> {
    let start = NaiveDate::from_ymd_opt(weather_year, 1, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .with_context(|| format!("invalid weather year {}", weather_year))?;
    Ok((0..hours)
        .map(|h| (start + Duration::hours(h as i64)).format("%Y-%m-%d %H:%M:%S").to_string())
        .collect())
}

fn timestamp_year(timestamp: &str) -> Option<i32> {
    timestamp.get(..4).and_then(|y| y.parse().ok())
}

/// Keep historical years in `[first_year, last_year]` whose timestamps fall in
/// the weather year, relabelled with the weather year's first `hours` hours.
pub fn select_weather_year(
    history: &MultiYearProfile,
    first_year: i32,
    last_year: i32,
    weather_year: i32,
    hours: usize,
) -> Result<MultiYearProfile> {
    let labels = hourly_timestamps(weather_year, hours)?;
    let mut rows_by_year: BTreeMap<i32, Vec<usize>> = BTreeMap::new();
    for (row, (&year, timestamp)) in history.years.iter().zip(&history.timestamps).enumerate() {
        if (first_year..=last_year).contains(&year) && timestamp_year(timestamp) == Some(weather_year) {
            rows_by_year.entry(year).or_default().push(row);
        }
    }

    let mut selected = MultiYearProfile {
        years: Vec::new(),
        timestamps: Vec::new(),
        columns: history.columns.clone(),
        values: vec![Vec::new(); history.columns.len()],
    };
    for (year, rows) in rows_by_year {
        if rows.len() < hours {
            bail!(
                "historical year {} has {} hours in {}, expected {}",
                year,
                rows.len(),
                weather_year,
                hours
            );
        }
        for (&row, label) in rows.iter().take(hours).zip(&labels) {
            selected.years.push(year);
            selected.timestamps.push(label.clone());
            for (out, column) in selected.values.iter_mut().zip(&history.values) {
                out.push(column[row]);
            }
        }
    }
    Ok(selected)
}

/// Builds the multi-year archives described by a [`GenerationPlan`].
pub struct ScenarioGenerator {
    input_dir: PathBuf,
    output_dir: PathBuf,
    plan: GenerationPlan,
    scenarios: HashMap<String, BTreeMap<i32, HourlyProfileTable>>,
}

impl ScenarioGenerator {
    pub fn new(input_dir: PathBuf, output_dir: PathBuf, plan: GenerationPlan) -> Self {
        Self {
            input_dir,
            output_dir,
            plan,
            scenarios: HashMap::new(),
        }
    }

    fn scenario(&mut self, name: &str) -> Result<BTreeMap<i32, HourlyProfileTable>> {
        if !self.scenarios.contains_key(name) {
            info!("Loading scenario {}", name);
            let years = load_scenario(&self.input_dir.join(name))?;
            if years.is_empty() {
                bail!("no year files for scenario '{}' in {}", name, self.input_dir.display());
            }
            self.scenarios.insert(name.to_string(), years);
        }
        Ok(self.scenarios[name].clone())
    }

    /// Generate every output of the plan. Returns the written paths.
    pub fn run(&mut self) -> Result<Vec<PathBuf>> {
        fs::create_dir_all(&self.output_dir)?;

        let balancing_areas = match &self.plan.balancing_areas {
            Some(spec) => Some(BalancingAreaMap::from_files(
                &spec.load_participation,
                &spec.county_to_ba,
            )?),
            None => None,
        };
        let history = match &self.plan.historical {
            Some(spec) => {
                info!("Reading historical load from {}", spec.path.display());
                let frame = read_archive(&spec.path)?;
                let history = MultiYearProfile::try_from(frame)?;
                Some(select_weather_year(
                    &history,
                    spec.first_year,
                    spec.last_year,
                    self.plan.weather_year,
                    self.plan.projection.hours_per_year,
                )?)
            }
            None => None,
        };

        let mut written = Vec::new();
        for output in self.plan.outputs.clone() {
            info!("Processing {}", output.file_name);
            let mut projected = self.project_output(&output)?;

            if let Some(map) = &balancing_areas {
                info!("Disaggregating states into balancing areas");
                projected = map.disaggregate(&projected)?;
            }
            if let Some(history) = &history {
                projected = history.concat_aligned(&projected);
            }

            let path = self.output_dir.join(&output.file_name);
            write_archive(&path, &ArchiveFrame::from(&projected))?;
            info!("Wrote {} rows to {}", projected.height(), path.display());
            written.push(path);
        }
        Ok(written)
    }

    /// State-level projection for one output, before disaggregation.
    pub fn project_output(&mut self, output: &OutputSpec) -> Result<MultiYearProfile> {
        let mut years = self.scenario(&output.scenario)?;
        for spec in &output.overrides {
            let donor = self.scenario(&spec.scenario)?;
            let replaced = apply_override(&mut years, &donor, &spec.subsector_contains)?;
            info!(
                "Replaced {} '{}' rows with values from {}",
                replaced, spec.subsector_contains, spec.scenario
            );
        }

        let shapes = years
            .iter()
            .map(|(year, table)| -> Result<(i32, StateProfile)> {
                Ok((*year, StateProfile::from_profile(table)?))
            })
            .collect::<Result<BTreeMap<i32, StateProfile>>>()?;
        let observations: Vec<(i32, Vec<f64>)> = shapes
            .iter()
            .map(|(year, shape)| (*year, shape.column_totals()))
            .collect();
        info!("Interpolating annual load");
        let totals = interpolate_annual_totals(&observations)?;

        info!("Copying and rescaling load data");
        let normalizer = RatioNormalizer::new(self.plan.projection.clone());
        let pb = ProgressBar::new(normalizer.config().years().count() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} - {msg}")?,
        );
        let projected = normalizer.project_with_progress(&shapes, &totals, |year, milestone| {
            pb.set_message(format!("{} : {}", year, milestone));
            pb.inc(1);
        })?;
        pb.finish_and_clear();

        Ok(projected)
    }
}
