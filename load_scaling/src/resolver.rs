use crate::models::{ControlTotalRow, ControlTotalsTable, ScalingFactorMap};
use crate::observer::{ClampBound, ScalingEvent, ScalingObserver};

/// Derives per-state scaling factors from the control-totals table.
pub struct ScalingFactorResolver<'a> {
    control_totals: &'a ControlTotalsTable,
    observer: &'a dyn ScalingObserver,
}

impl<'a> ScalingFactorResolver<'a> {
    pub fn new(control_totals: &'a ControlTotalsTable, observer: &'a dyn ScalingObserver) -> Self {
        Self {
            control_totals,
            observer,
        }
    }

    /// Resolve factors for `target_year`, interpolating linearly between the
    /// surrounding control years and clamping outside the known range.
    pub fn resolve(&self, scenario: &str, subsector_group: &str, target_year: i32) -> ScalingFactorMap {
        let rows: Vec<&ControlTotalRow> = self
            .control_totals
            .rows_for(scenario, subsector_group)
            .collect();

        if rows.is_empty() {
            self.observer.observe(ScalingEvent::MissingControlTotals {
                scenario: scenario.to_string(),
                subsector_group: subsector_group.to_string(),
            });
            return self
                .control_totals
                .states
                .iter()
                .map(|state| (state.clone(), 1.0))
                .collect();
        }

        let mut years: Vec<i32> = rows.iter().map(|row| row.year).collect();
        years.sort_unstable();
        years.dedup();

        let first = years[0];
        let last = years[years.len() - 1];

        if let Some(row) = row_for_year(&rows, target_year) {
            return self.control_totals.factor_map(row);
        }

        if target_year < first || target_year > last {
            let (used_year, bound) = if target_year < first {
                (first, ClampBound::BeforeFirst)
            } else {
                (last, ClampBound::AfterLast)
            };
            self.observer.observe(ScalingEvent::YearClamped {
                scenario: scenario.to_string(),
                subsector_group: subsector_group.to_string(),
                target_year,
                used_year,
                bound,
            });
            // Years come from `rows`, so the lookup always succeeds.
            return row_for_year(&rows, used_year)
                .map(|row| self.control_totals.factor_map(row))
                .unwrap_or_default();
        }

        let lower_year = years.iter().copied().filter(|y| *y < target_year).max().unwrap_or(first);
        let upper_year = years.iter().copied().filter(|y| *y > target_year).min().unwrap_or(last);

        match (row_for_year(&rows, lower_year), row_for_year(&rows, upper_year)) {
            (Some(lower), Some(upper)) => {
                let proportion =
                    f64::from(target_year - lower_year) / f64::from(upper_year - lower_year);
                interpolate(&self.control_totals.states, lower, upper, proportion)
            }
            _ => ScalingFactorMap::new(),
        }
    }
}

fn row_for_year<'r>(rows: &[&'r ControlTotalRow], year: i32) -> Option<&'r ControlTotalRow> {
    rows.iter().copied().find(|row| row.year == year)
}

fn interpolate(
    states: &[String],
    lower: &ControlTotalRow,
    upper: &ControlTotalRow,
    proportion: f64,
) -> ScalingFactorMap {
    states
        .iter()
        .zip(lower.values.iter().zip(&upper.values))
        .map(|(state, (lo, hi))| (state.clone(), lo + proportion * (hi - lo)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observer::RecordingObserver;

    fn totals() -> ControlTotalsTable {
        let mut totals = ControlTotalsTable::new(vec!["CA".to_string(), "TX".to_string()]);
        totals.push("central", "residential", 2025, vec![100.0, 40.0]);
        totals.push("central", "residential", 2035, vec![200.0, 20.0]);
        totals.push("central", "residential", 2050, vec![500.0, 20.0]);
        totals
    }

    #[test]
    fn test_exact_year_returns_row_verbatim() {
        let totals = totals();
        let observer = RecordingObserver::new();
        let resolver = ScalingFactorResolver::new(&totals, &observer);

        let factors = resolver.resolve("central", "residential", 2035);
        assert_eq!(factors["CA"], 200.0);
        assert_eq!(factors["TX"], 20.0);
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_interpolates_between_control_years() {
        let totals = totals();
        let observer = RecordingObserver::new();
        let resolver = ScalingFactorResolver::new(&totals, &observer);

        let factors = resolver.resolve("central", "residential", 2030);
        assert!((factors["CA"] - 150.0).abs() < 1e-9);
        assert!((factors["TX"] - 30.0).abs() < 1e-9);

        let factors = resolver.resolve("central", "residential", 2040);
        assert!((factors["CA"] - 300.0).abs() < 1e-9);
    }

    #[test]
    fn test_interpolated_factor_lies_on_segment() {
        let totals = totals();
        let observer = RecordingObserver::new();
        let resolver = ScalingFactorResolver::new(&totals, &observer);

        let lo = resolver.resolve("central", "residential", 2035);
        let hi = resolver.resolve("central", "residential", 2050);
        for year in 2036..2050 {
            let t = f64::from(year - 2035) / 15.0;
            let mid = resolver.resolve("central", "residential", year);
            for state in ["CA", "TX"] {
                let expected = lo[state] * (1.0 - t) + hi[state] * t;
                assert!((mid[state] - expected).abs() < 1e-9, "{} {}", state, year);
            }
        }
    }

    #[test]
    fn test_clamps_outside_range_with_warning() {
        let totals = totals();
        let observer = RecordingObserver::new();
        let resolver = ScalingFactorResolver::new(&totals, &observer);

        let early = resolver.resolve("central", "residential", 2020);
        assert_eq!(early["CA"], 100.0);
        let late = resolver.resolve("central", "residential", 2060);
        assert_eq!(late["CA"], 500.0);

        let events = observer.events();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            ScalingEvent::YearClamped { used_year: 2025, bound: ClampBound::BeforeFirst, .. }
        ));
        assert!(matches!(
            events[1],
            ScalingEvent::YearClamped { used_year: 2050, bound: ClampBound::AfterLast, .. }
        ));
    }

    #[test]
    fn test_missing_group_yields_identity() {
        let totals = totals();
        let observer = RecordingObserver::new();
        let resolver = ScalingFactorResolver::new(&totals, &observer);

        let factors = resolver.resolve("central", "transportation", 2030);
        assert_eq!(factors.len(), 2);
        assert!(factors.values().all(|f| *f == 1.0));
        assert_eq!(
            observer.events(),
            vec![ScalingEvent::MissingControlTotals {
                scenario: "central".to_string(),
                subsector_group: "transportation".to_string(),
            }]
        );
    }

    #[test]
    fn test_two_row_table_midpoint() {
        let mut totals = ControlTotalsTable::new(vec!["CA".to_string()]);
        totals.push("central", "g", 2025, vec![100.0]);
        totals.push("central", "g", 2035, vec![200.0]);
        let observer = RecordingObserver::new();
        let resolver = ScalingFactorResolver::new(&totals, &observer);

        let factors = resolver.resolve("central", "g", 2030);
        assert_eq!(factors["CA"], 150.0);
    }
}
