use anyhow::Result;
use polars::prelude::*;
use std::collections::{BTreeMap, BTreeSet};

use crate::data_loader::profile_to_frame;

/// Columns of an hourly profile table that are not states.
pub const PROFILE_KEY_COLUMNS: [&str; 3] = ["sector", "subsector", "weather_datetime"];

/// Columns of a control-totals table that are not states.
pub const CONTROL_KEY_COLUMNS: [&str; 3] = ["scenario", "subsector_group", "year"];

/// Hours in a representative (non-leap) year.
pub const HOURS_PER_YEAR: usize = 8760;

/// Per-state scaling factors for one scenario / subsector group / year.
pub type ScalingFactorMap = BTreeMap<String, f64>;

/// A set of subsector labels whose combined energy is driven to one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubsectorGroup {
    label: String,
    members: BTreeSet<String>,
}

impl SubsectorGroup {
    /// Parse a comma-separated group label such as `"residential, commercial"`.
    pub fn parse(label: &str) -> Self {
        let members = label
            .split(',')
            .map(|s| s.trim().to_string())
            .collect();

        Self {
            label: label.to_string(),
            members,
        }
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn members(&self) -> &BTreeSet<String> {
        &self.members
    }

    pub fn contains(&self, subsector: &str) -> bool {
        self.members.contains(subsector)
    }

    /// Subsector labels shared with another group.
    pub fn overlap<'a>(&'a self, other: &'a SubsectorGroup) -> Vec<&'a str> {
        self.members
            .intersection(&other.members)
            .map(String::as_str)
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControlTotalRow {
    pub scenario: String,
    pub subsector_group: String,
    pub year: i32,
    /// One value per state, in the order of `ControlTotalsTable::states`.
    pub values: Vec<f64>,
}

/// Annual target energy (MWh) per scenario, subsector group, year and state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ControlTotalsTable {
    pub states: Vec<String>,
    pub rows: Vec<ControlTotalRow>,
}

impl ControlTotalsTable {
    pub fn new(states: Vec<String>) -> Self {
        Self {
            states,
            rows: Vec::new(),
        }
    }

    pub fn push(&mut self, scenario: &str, subsector_group: &str, year: i32, values: Vec<f64>) {
        self.rows.push(ControlTotalRow {
            scenario: scenario.to_string(),
            subsector_group: subsector_group.to_string(),
            year,
            values,
        });
    }

    /// Distinct scenarios in first-seen order.
    pub fn scenarios(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.rows
            .iter()
            .filter(|row| seen.insert(row.scenario.as_str()))
            .map(|row| row.scenario.as_str())
            .collect()
    }

    pub fn rows_for<'a>(
        &'a self,
        scenario: &'a str,
        subsector_group: &'a str,
    ) -> impl Iterator<Item = &'a ControlTotalRow> + 'a {
        self.rows
            .iter()
            .filter(move |row| row.scenario == scenario && row.subsector_group == subsector_group)
    }

    /// Build a factor map from one row's values.
    pub fn factor_map(&self, row: &ControlTotalRow) -> ScalingFactorMap {
        self.states
            .iter()
            .cloned()
            .zip(row.values.iter().copied())
            .collect()
    }
}

/// Hourly load per (sector, subsector, timestamp) row with one column per state.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HourlyProfileTable {
    pub sectors: Vec<String>,
    pub subsectors: Vec<String>,
    pub timestamps: Vec<String>,
    pub states: Vec<String>,
    /// Column-major values: `columns[state_idx][row_idx]`.
    pub columns: Vec<Vec<f64>>,
}

impl HourlyProfileTable {
    pub fn new(states: Vec<String>) -> Self {
        let columns = vec![Vec::new(); states.len()];
        Self {
            states,
            columns,
            ..Default::default()
        }
    }

    pub fn push_row(&mut self, sector: &str, subsector: &str, timestamp: &str, values: &[f64]) {
        self.sectors.push(sector.to_string());
        self.subsectors.push(subsector.to_string());
        self.timestamps.push(timestamp.to_string());
        for (column, value) in self.columns.iter_mut().zip(values) {
            column.push(*value);
        }
    }

    pub fn height(&self) -> usize {
        self.timestamps.len()
    }

    pub fn state_index(&self, state: &str) -> Option<usize> {
        self.states.iter().position(|s| s == state)
    }

    pub fn column(&self, state: &str) -> Option<&[f64]> {
        self.state_index(state).map(|idx| self.columns[idx].as_slice())
    }

    /// Row mask selecting every member of a subsector group.
    pub fn group_mask(&self, group: &SubsectorGroup) -> Vec<bool> {
        self.subsectors.iter().map(|s| group.contains(s)).collect()
    }
}

/// Scaled shapes of one scenario keyed by (weather_datetime, state, sector),
/// with one column per year.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SummaryShapeTable {
    pub keys: Vec<SummaryKey>,
    pub years: Vec<i32>,
    /// Row-major: `values[row][year_idx]`; `None` where a year lacks the key.
    pub values: Vec<Vec<Option<f64>>>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SummaryKey {
    pub weather_datetime: String,
    pub state: String,
    pub sector: String,
}

impl SummaryShapeTable {
    pub fn height(&self) -> usize {
        self.keys.len()
    }

    pub fn get(&self, weather_datetime: &str, state: &str, sector: &str, year: i32) -> Option<f64> {
        let year_idx = self.years.iter().position(|y| *y == year)?;
        let row = self.keys.iter().position(|k| {
            k.weather_datetime == weather_datetime && k.state == state && k.sector == sector
        })?;
        self.values[row][year_idx]
    }
}

/// Raw (pre-scaling) energy of one subsector group, shaped like a control-total row.
#[derive(Debug, Clone, PartialEq)]
pub struct OriginalEnergyRow {
    pub scenario: String,
    pub subsector_group: String,
    pub year: i32,
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OriginalEnergyTable {
    pub states: Vec<String>,
    pub rows: Vec<OriginalEnergyRow>,
}

/// One representative year summed across sectors and subsectors.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateProfile {
    pub timestamps: Vec<String>,
    pub columns: Vec<String>,
    /// Column-major values.
    pub values: Vec<Vec<f64>>,
}

impl StateProfile {
    /// Sum a profile across sectors and subsectors, one row per timestamp.
    pub fn from_profile(profile: &HourlyProfileTable) -> Result<Self> {
        let sums: Vec<Expr> = profile.states.iter().map(|s| col(s).sum()).collect();
        let grouped = profile_to_frame(profile)?
            .lazy()
            .group_by([col("weather_datetime")])
            .agg(sums)
            .sort("weather_datetime", Default::default())
            .collect()?;

        let timestamps = grouped
            .column("weather_datetime")?
            .utf8()?
            .into_iter()
            .map(|t| t.unwrap_or_default().to_string())
            .collect();
        let values = profile
            .states
            .iter()
            .map(|state| -> Result<Vec<f64>> {
                let summed = grouped.column(state)?.f64()?;
                Ok(summed.into_iter().map(|v| v.unwrap_or(0.0)).collect())
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            timestamps,
            columns: profile.states.clone(),
            values,
        })
    }

    pub fn height(&self) -> usize {
        self.timestamps.len()
    }

    pub fn column_totals(&self) -> Vec<f64> {
        self.values.iter().map(|col| col.iter().sum()).collect()
    }
}

/// Hourly table spanning several years, keyed by (year, weather_datetime).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MultiYearProfile {
    pub years: Vec<i32>,
    pub timestamps: Vec<String>,
    pub columns: Vec<String>,
    /// Column-major values.
    pub values: Vec<Vec<f64>>,
}

impl MultiYearProfile {
    pub fn new(columns: Vec<String>) -> Self {
        let values = vec![Vec::new(); columns.len()];
        Self {
            columns,
            values,
            ..Default::default()
        }
    }

    pub fn height(&self) -> usize {
        self.years.len()
    }

    /// Append a single year's profile under the given year label.
    pub fn append_year(&mut self, year: i32, profile: &StateProfile) {
        self.years.extend(std::iter::repeat(year).take(profile.height()));
        self.timestamps.extend(profile.timestamps.iter().cloned());
        for (column, values) in self.values.iter_mut().zip(&profile.values) {
            column.extend_from_slice(values);
        }
    }

    /// Rows belonging to one year.
    pub fn year_slice(&self, year: i32) -> Vec<usize> {
        self.years
            .iter()
            .enumerate()
            .filter(|(_, y)| **y == year)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns
            .iter()
            .position(|c| c == name)
            .map(|idx| self.values[idx].as_slice())
    }

    /// Rows of `self` followed by rows of `other`. Columns are the union of
    /// both, `self`'s first; a side lacking a column is filled with NaN.
    pub fn concat_aligned(&self, other: &MultiYearProfile) -> MultiYearProfile {
        let mut years = self.years.clone();
        years.extend_from_slice(&other.years);
        let mut timestamps = self.timestamps.clone();
        timestamps.extend(other.timestamps.iter().cloned());

        let mut columns = self.columns.clone();
        for name in &other.columns {
            if !columns.contains(name) {
                columns.push(name.clone());
            }
        }

        let values = columns
            .iter()
            .map(|name| {
                let mut column = match self.column(name) {
                    Some(head) => head.to_vec(),
                    None => vec![f64::NAN; self.height()],
                };
                match other.column(name) {
                    Some(tail) => column.extend_from_slice(tail),
                    None => column.extend(std::iter::repeat(f64::NAN).take(other.height())),
                }
                column
            })
            .collect();

        MultiYearProfile {
            years,
            timestamps,
            columns,
            values,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subsector_group_parsing_trims_members() {
        let group = SubsectorGroup::parse("residential space heating , commercial lighting");
        assert_eq!(group.label(), "residential space heating , commercial lighting");
        assert!(group.contains("residential space heating"));
        assert!(group.contains("commercial lighting"));
        assert_eq!(group.members().len(), 2);
    }

    #[test]
    fn test_group_overlap() {
        let a = SubsectorGroup::parse("a, b");
        let b = SubsectorGroup::parse("b, c");
        let c = SubsectorGroup::parse("d");
        assert_eq!(a.overlap(&b), vec!["b"]);
        assert!(a.overlap(&c).is_empty());
    }

    #[test]
    fn test_state_profile_sums_sectors_per_timestamp() {
        let mut profile = HourlyProfileTable::new(vec!["CA".to_string()]);
        profile.push_row("residential", "heating", "2012-01-01 01:00:00", &[1.0]);
        profile.push_row("residential", "heating", "2012-01-01 00:00:00", &[2.0]);
        profile.push_row("commercial", "lighting", "2012-01-01 00:00:00", &[3.0]);

        let summed = StateProfile::from_profile(&profile).unwrap();
        assert_eq!(summed.timestamps, vec!["2012-01-01 00:00:00", "2012-01-01 01:00:00"]);
        assert_eq!(summed.values, vec![vec![5.0, 1.0]]);
    }

    #[test]
    fn test_concat_aligned_fills_missing_columns() {
        let history = MultiYearProfile {
            years: vec![2024],
            timestamps: vec!["t".to_string()],
            columns: vec!["p2".to_string()],
            values: vec![vec![7.0]],
        };
        let projection = MultiYearProfile {
            years: vec![2025],
            timestamps: vec!["t".to_string()],
            columns: vec!["p1".to_string(), "p2".to_string()],
            values: vec![vec![1.0], vec![2.0]],
        };

        let combined = history.concat_aligned(&projection);
        assert_eq!(combined.years, vec![2024, 2025]);
        assert_eq!(combined.columns, vec!["p2", "p1"]);
        assert_eq!(combined.values[0], vec![7.0, 2.0]);
        assert!(combined.values[1][0].is_nan());
        assert_eq!(combined.values[1][1], 1.0);
    }

    #[test]
    fn test_concat_aligned_keeps_history_only_columns() {
        let history = MultiYearProfile {
            years: vec![2024, 2024],
            timestamps: vec!["t0".to_string(), "t1".to_string()],
            columns: vec!["p1".to_string(), "p99".to_string()],
            values: vec![vec![1.0, 2.0], vec![5.0, 6.0]],
        };
        let projection = MultiYearProfile {
            years: vec![2025],
            timestamps: vec!["t0".to_string()],
            columns: vec!["p1".to_string()],
            values: vec![vec![3.0]],
        };

        let combined = history.concat_aligned(&projection);
        assert_eq!(combined.columns, vec!["p1", "p99"]);
        assert_eq!(combined.values[0], vec![1.0, 2.0, 3.0]);
        assert_eq!(&combined.values[1][..2], &[5.0, 6.0]);
        assert!(combined.values[1][2].is_nan());
        assert_eq!(combined.height(), 3);
    }

    #[test]
    fn test_control_totals_scenarios_first_seen_order() {
        let mut totals = ControlTotalsTable::new(vec!["CA".to_string()]);
        totals.push("central", "a", 2025, vec![1.0]);
        totals.push("current policy", "a", 2025, vec![1.0]);
        totals.push("central", "b", 2025, vec![1.0]);
        assert_eq!(totals.scenarios(), vec!["central", "current policy"]);
    }
}
