use anyhow::{bail, Context, Result};
use log::warn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::models::{MultiYearProfile, StateProfile, HOURS_PER_YEAR};

/// Annual total per column, keyed by calendar year.
pub type AnnualTotals = BTreeMap<i32, Vec<f64>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectionConfig {
    /// Years whose shapes are copied forward until the next milestone.
    pub milestones: Vec<i32>,
    pub start_year: i32,
    pub end_year: i32,
    pub hours_per_year: usize,
}

impl Default for ProjectionConfig {
    fn default() -> Self {
        Self {
            milestones: vec![2025, 2030, 2035, 2040, 2045, 2050],
            start_year: 2025,
            end_year: 2050,
            hours_per_year: HOURS_PER_YEAR,
        }
    }
}

impl ProjectionConfig {
    pub fn years(&self) -> std::ops::RangeInclusive<i32> {
        self.start_year..=self.end_year
    }
}

/// Fill every year between the first and last observation.
///
/// Observations sharing a year are averaged; missing years are linearly
/// interpolated per column.
pub fn interpolate_annual_totals(observations: &[(i32, Vec<f64>)]) -> Result<AnnualTotals> {
    let mut grouped: BTreeMap<i32, (Vec<f64>, usize)> = BTreeMap::new();
    let width = observations.first().map(|(_, v)| v.len()).unwrap_or(0);

    for (year, values) in observations {
        if values.len() != width {
            bail!(
                "annual totals for {} have {} columns, expected {}",
                year,
                values.len(),
                width
            );
        }
        let entry = grouped.entry(*year).or_insert_with(|| (vec![0.0; width], 0));
        for (acc, v) in entry.0.iter_mut().zip(values) {
            *acc += v;
        }
        entry.1 += 1;
    }

    let known: BTreeMap<i32, Vec<f64>> = grouped
        .into_iter()
        .map(|(year, (sums, count))| (year, sums.into_iter().map(|s| s / count as f64).collect()))
        .collect();

    let (Some(&first), Some(&last)) = (known.keys().next(), known.keys().next_back()) else {
        return Ok(AnnualTotals::new());
    };

    let mut totals = AnnualTotals::new();
    for year in first..=last {
        if let Some(values) = known.get(&year) {
            totals.insert(year, values.clone());
            continue;
        }
        let (lo_year, lo) = known.range(..year).next_back().context("no lower year")?;
        let (hi_year, hi) = known.range(year..).next().context("no upper year")?;
        let t = f64::from(year - lo_year) / f64::from(hi_year - lo_year);
        totals.insert(
            year,
            lo.iter().zip(hi).map(|(a, b)| a + t * (b - a)).collect(),
        );
    }

    Ok(totals)
}

/// Copies milestone shapes onto every projection year and rescales them to
/// the interpolated annual totals.
pub struct RatioNormalizer {
    config: ProjectionConfig,
}

impl RatioNormalizer {
    pub fn new(config: ProjectionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ProjectionConfig {
        &self.config
    }

    /// Greatest milestone not after `year`.
    pub fn select_milestone(&self, year: i32) -> Result<i32> {
        self.config
            .milestones
            .iter()
            .copied()
            .filter(|m| *m <= year)
            .max()
            .with_context(|| format!("no milestone year at or before {}", year))
    }

    /// Shape for a single target year, rescaled so each column sums to that year's total.
    pub fn project_year(
        &self,
        shapes: &BTreeMap<i32, StateProfile>,
        totals: &AnnualTotals,
        year: i32,
    ) -> Result<StateProfile> {
        let milestone = self.select_milestone(year)?;
        let shape = shapes
            .get(&milestone)
            .with_context(|| format!("no shape available for milestone year {}", milestone))?;
        let targets = totals
            .get(&year)
            .with_context(|| format!("no interpolated annual total for {}", year))?;
        if targets.len() != shape.values.len() {
            bail!(
                "annual totals for {} have {} columns but the {} shape has {}",
                year,
                targets.len(),
                milestone,
                shape.values.len()
            );
        }

        let rows = shape.height().min(self.config.hours_per_year);
        let values = shape
            .values
            .iter()
            .zip(targets)
            .zip(&shape.columns)
            .map(|((column, target), name)| {
                let kept = &column[..rows];
                let column_total: f64 = kept.iter().sum();
                if column_total == 0.0 {
                    warn!(
                        "Column '{}' of the {} shape sums to zero; {} values will not be finite",
                        name, milestone, year
                    );
                }
                let ratio = target / column_total;
                kept.iter().map(|v| v * ratio).collect()
            })
            .collect();

        Ok(StateProfile {
            timestamps: shape.timestamps[..rows].to_vec(),
            columns: shape.columns.clone(),
            values,
        })
    }

    /// Every year of the horizon, concatenated in increasing year order.
    pub fn project(
        &self,
        shapes: &BTreeMap<i32, StateProfile>,
        totals: &AnnualTotals,
    ) -> Result<MultiYearProfile> {
        self.project_with_progress(shapes, totals, |_, _| {})
    }

    /// Like [`RatioNormalizer::project`], calling `on_year(year, milestone)`
    /// before each year is projected.
    pub fn project_with_progress(
        &self,
        shapes: &BTreeMap<i32, StateProfile>,
        totals: &AnnualTotals,
        mut on_year: impl FnMut(i32, i32),
    ) -> Result<MultiYearProfile> {
        let columns = shapes
            .values()
            .next()
            .map(|s| s.columns.clone())
            .unwrap_or_default();
        let mut projected = MultiYearProfile::new(columns);

        for year in self.config.years() {
            on_year(year, self.select_milestone(year)?);
            let profile = self.project_year(shapes, totals, year)?;
            projected.append_year(year, &profile);
        }

        Ok(projected)
    }
}
