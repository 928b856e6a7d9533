use anyhow::{bail, Result};
use log::debug;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::data_loader::profile_to_frame;
use crate::models::{
    ControlTotalsTable, HourlyProfileTable, OriginalEnergyRow, SubsectorGroup, SummaryKey,
    SummaryShapeTable,
};
use crate::observer::{ScalingEvent, ScalingObserver};
use crate::resolver::ScalingFactorResolver;
use crate::scaler::{group_totals, ProfileScaler};

pub const SUMMARY_FILE_NAME: &str = "summary_shapes.csv";
pub const ORIGINAL_ENERGY_FILE_NAME: &str = "original_energy_values.csv";

#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub control_totals_path: PathBuf,
    pub summary_file_name: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("unscaled_shapes").join("shape_outputs"),
            output_dir: PathBuf::from("scaled_shapes"),
            control_totals_path: PathBuf::from("scaling_inputs_MWh.csv"),
            summary_file_name: SUMMARY_FILE_NAME.to_string(),
        }
    }
}

/// Runs the resolver and scaler over every subsector group of a scenario year
/// and reshapes finished years into a summary table.
pub struct ScalingPipeline {
    config: PipelineConfig,
    observer: Box<dyn ScalingObserver>,
}

impl ScalingPipeline {
    pub fn new(config: PipelineConfig, observer: Box<dyn ScalingObserver>) -> Self {
        Self { config, observer }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn observer(&self) -> &dyn ScalingObserver {
        self.observer.as_ref()
    }

    /// Subsector groups declared for a scenario, in first-seen order.
    pub fn subsector_groups(&self, control_totals: &ControlTotalsTable, scenario: &str) -> Vec<SubsectorGroup> {
        let mut seen = BTreeSet::new();
        control_totals
            .rows
            .iter()
            .filter(|row| row.scenario == scenario)
            .filter(|row| seen.insert(row.subsector_group.as_str()))
            .map(|row| SubsectorGroup::parse(&row.subsector_group))
            .collect()
    }

    /// Reject groups that share subsector labels; scaling them in sequence
    /// would make the result depend on group order.
    pub fn check_disjoint(groups: &[SubsectorGroup]) -> Result<()> {
        for (idx, group) in groups.iter().enumerate() {
            for other in &groups[idx + 1..] {
                let shared = group.overlap(other);
                if !shared.is_empty() {
                    bail!(
                        "subsector groups '{}' and '{}' overlap on {:?}",
                        group.label(),
                        other.label(),
                        shared
                    );
                }
            }
        }
        Ok(())
    }

    /// Scale one year's profile against every group of the scenario.
    pub fn scale_year(
        &self,
        control_totals: &ControlTotalsTable,
        scenario: &str,
        year: i32,
        profile: &HourlyProfileTable,
    ) -> Result<HourlyProfileTable> {
        let groups = self.subsector_groups(control_totals, scenario);
        Self::check_disjoint(&groups)?;

        let resolver = ScalingFactorResolver::new(control_totals, self.observer());
        let scaler = ProfileScaler::new(self.observer());

        let mut scaled = profile.clone();
        for group in &groups {
            debug!("Scaling subsector group: {}", group.label());
            let factors = resolver.resolve(scenario, group.label(), year);
            scaled = scaler.scale(&scaled, &factors, group);
        }

        Ok(scaled)
    }

    /// Raw per-state energy of every group of the scenario, before any scaling.
    pub fn original_energy(
        &self,
        control_totals: &ControlTotalsTable,
        scenario: &str,
        year: i32,
        profile: &HourlyProfileTable,
    ) -> Vec<OriginalEnergyRow> {
        self.subsector_groups(control_totals, scenario)
            .into_iter()
            .map(|group| {
                let has_rows = profile.subsectors.iter().any(|s| group.contains(s));
                let values = if has_rows {
                    group_totals(profile, &group)
                } else {
                    self.observer.observe(ScalingEvent::EmptySubsectorGroup {
                        subsector_group: group.label().to_string(),
                        year,
                    });
                    vec![0.0; profile.states.len()]
                };
                OriginalEnergyRow {
                    scenario: scenario.to_string(),
                    subsector_group: group.label().to_string(),
                    year,
                    values,
                }
            })
            .collect()
    }

    /// Sum every year across subsectors and pivot years into columns.
    pub fn build_summary(years: &BTreeMap<i32, HourlyProfileTable>) -> Result<SummaryShapeTable> {
        let year_labels: Vec<i32> = years.keys().copied().collect();
        let mut cells: BTreeMap<SummaryKey, Vec<Option<f64>>> = BTreeMap::new();

        for (year_idx, profile) in years.values().enumerate() {
            let sums: Vec<Expr> = profile.states.iter().map(|s| col(s).sum()).collect();
            let grouped = profile_to_frame(profile)?
                .lazy()
                .group_by([col("weather_datetime"), col("sector")])
                .agg(sums)
                .collect()?;

            let timestamps = grouped.column("weather_datetime")?.utf8()?;
            let sectors = grouped.column("sector")?.utf8()?;
            for state in &profile.states {
                let totals = grouped.column(state)?.f64()?;
                for ((timestamp, sector), total) in timestamps.into_iter().zip(sectors).zip(totals) {
                    let key = SummaryKey {
                        weather_datetime: timestamp.unwrap_or_default().to_string(),
                        state: state.clone(),
                        sector: sector.unwrap_or_default().to_string(),
                    };
                    cells
                        .entry(key)
                        .or_insert_with(|| vec![None; year_labels.len()])[year_idx] = total;
                }
            }
        }

        let (keys, values): (Vec<SummaryKey>, Vec<Vec<Option<f64>>>) = cells.into_iter().unzip();
        Ok(SummaryShapeTable {
            keys,
            years: year_labels,
            values,
        })
    }
}
