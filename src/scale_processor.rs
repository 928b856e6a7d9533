use anyhow::{Context, Result};
use glob::glob;
use load_scaling::data_loader::{read_control_totals, read_profile, write_profile, write_summary};
use load_scaling::{ControlTotalsTable, HourlyProfileTable, ScalingPipeline};
use log::{info, warn};
use regex::Regex;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

/// A `<year>.csv` or `<year>.csv.gz` file inside a scenario directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct YearFile {
    pub year: i32,
    pub path: PathBuf,
}

impl YearFile {
    pub fn file_name(&self) -> &str {
        self.path
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or_default()
    }
}

/// Year files of one scenario directory, sorted by year.
/// The summary file and anything not named after a year are skipped.
pub fn discover_year_files(scenario_dir: &Path) -> Result<Vec<YearFile>> {
    let year_name = Regex::new(r"^(\d{4})\.csv(\.gz)?$")?;
    let pattern = scenario_dir.join("*.csv*");
    let pattern = pattern
        .to_str()
        .with_context(|| format!("non UTF-8 path {}", scenario_dir.display()))?;

    let mut files = Vec::new();
    for path in glob(pattern)?.filter_map(Result::ok) {
        let Some(name) = path.file_name().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(caps) = year_name.captures(name) else {
            continue;
        };
        let year: i32 = caps[1].parse()?;
        files.push(YearFile { year, path });
    }
    files.sort_by(|a, b| a.year.cmp(&b.year).then_with(|| a.path.cmp(&b.path)));
    Ok(files)
}

/// Scenario subdirectories of `input_dir`, sorted by name.
pub fn scenario_dirs(input_dir: &Path) -> Result<Vec<(String, PathBuf)>> {
    let mut dirs = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("listing scenarios in {}", input_dir.display()))?
    {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            dirs.push((name.to_string(), entry.path()));
        }
    }
    dirs.sort();
    Ok(dirs)
}

/// Load every year table of a scenario directory.
pub fn load_scenario(scenario_dir: &Path) -> Result<BTreeMap<i32, HourlyProfileTable>> {
    let mut years = BTreeMap::new();
    for file in discover_year_files(scenario_dir)? {
        let profile = read_profile(&file.path)?;
        if years.insert(file.year, profile).is_some() {
            warn!(
                "Year {} appears more than once in {}; keeping {}",
                file.year,
                scenario_dir.display(),
                file.file_name()
            );
        }
    }
    Ok(years)
}

/// Scales every scenario under the input directory and writes the scaled
/// year files and a summary file per scenario.
pub struct ScaleProcessor {
    pipeline: ScalingPipeline,
}

impl ScaleProcessor {
    pub fn new(pipeline: ScalingPipeline) -> Self {
        Self { pipeline }
    }

    pub fn process_all_scenarios(&self) -> Result<()> {
        let config = self.pipeline.config();
        info!("Reading control totals from {}", config.control_totals_path.display());
        let control_totals = read_control_totals(&config.control_totals_path)?;

        let scenarios = scenario_dirs(&config.input_dir)?;
        info!("Found {} scenario directories", scenarios.len());

        for (scenario, dir) in &scenarios {
            self.process_scenario(&control_totals, scenario, dir)?;
        }

        info!("Scaling complete: {}", config.output_dir.display());
        Ok(())
    }

    pub fn process_scenario(
        &self,
        control_totals: &ControlTotalsTable,
        scenario: &str,
        scenario_dir: &Path,
    ) -> Result<()> {
        info!("Processing scenario: {}", scenario);
        let output_dir = self.pipeline.config().output_dir.join(scenario);
        fs::create_dir_all(&output_dir)?;

        let mut scaled_years = BTreeMap::new();
        for file in discover_year_files(scenario_dir)? {
            info!("  {} ({})", file.year, file.file_name());
            let profile = read_profile(&file.path)?;
            let scaled = self
                .pipeline
                .scale_year(control_totals, scenario, file.year, &profile)
                .with_context(|| format!("scaling {} {}", scenario, file.year))?;

            write_profile(&output_dir.join(file.file_name()), &scaled)?;
            scaled_years.insert(file.year, scaled);
        }

        if scaled_years.is_empty() {
            warn!("No year files found for scenario {}", scenario);
            return Ok(());
        }

        let summary = ScalingPipeline::build_summary(&scaled_years)?;
        write_summary(
            &output_dir.join(&self.pipeline.config().summary_file_name),
            &summary,
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use load_scaling::observer::RecordingObserver;
    use load_scaling::PipelineConfig;
    use tempfile::tempdir;

    #[test]
    fn test_discover_year_files_skips_summary_and_sorts() {
        let dir = tempdir().unwrap();
        for name in ["2030.csv.gz", "2025.csv", "summary_shapes.csv", "notes.csv"] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let files = discover_year_files(dir.path()).unwrap();
        let years: Vec<i32> = files.iter().map(|f| f.year).collect();
        assert_eq!(years, vec![2025, 2030]);
        assert_eq!(files[1].file_name(), "2030.csv.gz");
    }

    #[test]
    fn test_process_scenario_writes_scaled_years_and_summary() {
        let dir = tempdir().unwrap();
        let input = dir.path().join("input");
        let scenario_dir = input.join("central");
        fs::create_dir_all(&scenario_dir).unwrap();
        fs::write(
            scenario_dir.join("2025.csv"),
            "sector,subsector,weather_datetime,texas\n\
             residential,heating,2012-01-01 00:00:00,1\n\
             residential,heating,2012-01-01 01:00:00,3\n",
        )
        .unwrap();
        let control = dir.path().join("scaling_inputs_MWh.csv");
        fs::write(&control, "scenario,subsector_group,year,texas\ncentral,heating,2025,40\n")
            .unwrap();

        let config = PipelineConfig {
            input_dir: input,
            output_dir: dir.path().join("output"),
            control_totals_path: control,
            ..Default::default()
        };
        let processor = ScaleProcessor::new(ScalingPipeline::new(
            config,
            Box::new(RecordingObserver::new()),
        ));
        processor.process_all_scenarios().unwrap();

        let scaled = read_profile(&dir.path().join("output/central/2025.csv")).unwrap();
        assert_eq!(scaled.column("texas").unwrap(), &[10.0, 30.0]);
        assert!(dir.path().join("output/central/summary_shapes.csv").exists());
    }
}
