use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

use crate::models::MultiYearProfile;

/// Continental state names (lowercase) and their postal abbreviations.
const CONTINENTAL_STATES: [(&str, &str); 49] = [
    ("alabama", "AL"),
    ("alaska", "AK"),
    ("arizona", "AZ"),
    ("arkansas", "AR"),
    ("california", "CA"),
    ("colorado", "CO"),
    ("connecticut", "CT"),
    ("delaware", "DE"),
    ("florida", "FL"),
    ("georgia", "GA"),
    ("idaho", "ID"),
    ("illinois", "IL"),
    ("indiana", "IN"),
    ("iowa", "IA"),
    ("kansas", "KS"),
    ("kentucky", "KY"),
    ("louisiana", "LA"),
    ("maine", "ME"),
    ("maryland", "MD"),
    ("massachusetts", "MA"),
    ("michigan", "MI"),
    ("minnesota", "MN"),
    ("mississippi", "MS"),
    ("missouri", "MO"),
    ("montana", "MT"),
    ("nebraska", "NE"),
    ("nevada", "NV"),
    ("new hampshire", "NH"),
    ("new jersey", "NJ"),
    ("new mexico", "NM"),
    ("new york", "NY"),
    ("north carolina", "NC"),
    ("north dakota", "ND"),
    ("ohio", "OH"),
    ("oklahoma", "OK"),
    ("oregon", "OR"),
    ("pennsylvania", "PA"),
    ("rhode island", "RI"),
    ("south carolina", "SC"),
    ("south dakota", "SD"),
    ("tennessee", "TN"),
    ("texas", "TX"),
    ("utah", "UT"),
    ("vermont", "VT"),
    ("virginia", "VA"),
    ("washington", "WA"),
    ("west virginia", "WV"),
    ("wisconsin", "WI"),
    ("wyoming", "WY"),
];

const DISTRICT_OF_COLUMBIA: &str = "district of columbia";
const MARYLAND: &str = "maryland";

#[derive(Debug, Clone, Deserialize)]
struct ParticipationRecord {
    ba: String,
    factor: f64,
}

#[derive(Debug, Clone, Deserialize)]
struct CountyToBaRecord {
    ba: String,
    state: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BaAssignment {
    pub ba: String,
    pub state: String,
    pub factor: f64,
}

/// Splits state-level load into balancing areas by static participation factors.
#[derive(Debug, Clone, Default)]
pub struct BalancingAreaMap {
    participation: HashMap<String, f64>,
    assignments: Vec<(String, String)>,
}

impl BalancingAreaMap {
    /// Load the participation table (`ba,factor`) and county-to-BA table (`ba,state,...`).
    pub fn from_files(participation_path: &Path, county_to_ba_path: &Path) -> Result<Self> {
        let mut map = Self::default();

        let mut reader = csv::Reader::from_path(participation_path)
            .with_context(|| format!("opening {}", participation_path.display()))?;
        for record in reader.deserialize::<ParticipationRecord>() {
            let record = record.with_context(|| format!("reading {}", participation_path.display()))?;
            // The first factor listed for a BA wins.
            map.participation.entry(record.ba).or_insert(record.factor);
        }

        let mut reader = csv::Reader::from_path(county_to_ba_path)
            .with_context(|| format!("opening {}", county_to_ba_path.display()))?;
        for record in reader.deserialize::<CountyToBaRecord>() {
            let record = record.with_context(|| format!("reading {}", county_to_ba_path.display()))?;
            map.assignments.push((record.ba, record.state));
        }

        Ok(map)
    }

    pub fn add_participation(&mut self, ba: &str, factor: f64) {
        self.participation.entry(ba.to_string()).or_insert(factor);
    }

    pub fn assign(&mut self, ba: &str, state: &str) {
        self.assignments.push((ba.to_string(), state.to_string()));
    }

    /// Resolved assignments, one per output BA column in output order.
    /// Repeated BAs keep their first position and their last state.
    pub fn assignments(&self) -> Result<Vec<BaAssignment>> {
        let mut resolved: Vec<BaAssignment> = Vec::new();
        for (ba, state) in &self.assignments {
            let factor = *self
                .participation
                .get(ba)
                .with_context(|| format!("no participation factor for balancing area '{}'", ba))?;
            let assignment = BaAssignment {
                ba: ba.clone(),
                state: state.clone(),
                factor,
            };
            match resolved.iter_mut().find(|a| a.ba == *ba) {
                Some(existing) => *existing = assignment,
                None => resolved.push(assignment),
            }
        }
        Ok(resolved)
    }

    /// Disaggregate a state-level projection into balancing-area columns.
    pub fn disaggregate(&self, profile: &MultiYearProfile) -> Result<MultiYearProfile> {
        let by_abbr = fold_and_abbreviate(profile);
        let assignments = self.assignments()?;

        let mut out = MultiYearProfile {
            years: profile.years.clone(),
            timestamps: profile.timestamps.clone(),
            columns: Vec::with_capacity(assignments.len()),
            values: Vec::with_capacity(assignments.len()),
        };
        for assignment in assignments {
            let column = by_abbr.get(&assignment.state).with_context(|| {
                format!(
                    "state '{}' for balancing area '{}' not found in profile",
                    assignment.state, assignment.ba
                )
            })?;
            out.values
                .push(column.iter().map(|v| v * assignment.factor).collect());
            out.columns.push(assignment.ba);
        }

        Ok(out)
    }
}

/// Fold DC into Maryland and rename full state names to abbreviations.
fn fold_and_abbreviate(profile: &MultiYearProfile) -> HashMap<String, Vec<f64>> {
    let abbreviations: HashMap<&str, &str> = CONTINENTAL_STATES.iter().copied().collect();
    let dc = profile.column(DISTRICT_OF_COLUMBIA);

    let mut columns = HashMap::new();
    for (name, values) in profile.columns.iter().zip(&profile.values) {
        if name == DISTRICT_OF_COLUMBIA {
            continue;
        }
        let values = match (name.as_str(), dc) {
            (MARYLAND, Some(dc)) => values.iter().zip(dc).map(|(md, dc)| md + dc).collect(),
            _ => values.clone(),
        };
        let key = abbreviations
            .get(name.as_str())
            .map(|abbr| abbr.to_string())
            .unwrap_or_else(|| name.clone());
        columns.insert(key, values);
    }
    columns
}
