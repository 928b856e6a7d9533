use crate::models::{HourlyProfileTable, ScalingFactorMap, SubsectorGroup};
use crate::observer::{ScalingEvent, ScalingObserver};

/// Rescales the rows of one subsector group so each state's annual sum
/// matches its scaling factor, keeping the hourly shape.
pub struct ProfileScaler<'a> {
    observer: &'a dyn ScalingObserver,
}

impl<'a> ProfileScaler<'a> {
    pub fn new(observer: &'a dyn ScalingObserver) -> Self {
        Self { observer }
    }

    /// Return a rescaled copy of `profile`. Scaled values are truncated toward zero.
    pub fn scale(
        &self,
        profile: &HourlyProfileTable,
        factors: &ScalingFactorMap,
        group: &SubsectorGroup,
    ) -> HourlyProfileTable {
        let mut scaled = profile.clone();
        let mask = scaled.group_mask(group);
        let num_rows = mask.iter().filter(|m| **m).count();

        for (state, column) in scaled.states.iter().zip(scaled.columns.iter_mut()) {
            let Some(&factor) = factors.get(state) else {
                continue;
            };

            let group_sum: f64 = column
                .iter()
                .zip(&mask)
                .filter(|(_, selected)| **selected)
                .map(|(value, _)| *value)
                .sum();

            if group_sum == 0.0 && factor > 0.0 {
                if num_rows > 0 {
                    let per_hour = (factor / num_rows as f64).trunc();
                    apply_masked(column, &mask, |_| per_hour);
                    self.observer.observe(ScalingEvent::ZeroToPositive {
                        state: state.clone(),
                        subsector_group: group.label().to_string(),
                    });
                }
            } else if group_sum != 0.0 {
                let ratio = factor / group_sum;
                apply_masked(column, &mask, |value| (value * ratio).trunc());
            }
        }

        scaled
    }
}

fn apply_masked(column: &mut [f64], mask: &[bool], f: impl Fn(f64) -> f64) {
    for (value, selected) in column.iter_mut().zip(mask) {
        if *selected {
            *value = f(*value);
        }
    }
}

/// Sum of each state's values over the rows of a subsector group.
pub fn group_totals(profile: &HourlyProfileTable, group: &SubsectorGroup) -> Vec<f64> {
    let mask = profile.group_mask(group);
    profile
        .columns
        .iter()
        .map(|column| {
            column
                .iter()
                .zip(&mask)
                .filter(|(_, selected)| **selected)
                .map(|(value, _)| *value)
                .sum()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::HOURS_PER_YEAR;
    use crate::observer::RecordingObserver;

    fn profile_with(subsector_values: &[(&str, Vec<f64>)]) -> HourlyProfileTable {
        let mut profile = HourlyProfileTable::new(vec!["CA".to_string(), "TX".to_string()]);
        for (subsector, values) in subsector_values {
            for (hour, value) in values.iter().enumerate() {
                profile.push_row(
                    "residential",
                    subsector,
                    &format!("2012-01-01 {:02}:00:00", hour % 24),
                    &[*value, *value * 2.0],
                );
            }
        }
        profile
    }

    fn factors(ca: f64, tx: f64) -> ScalingFactorMap {
        [("CA".to_string(), ca), ("TX".to_string(), tx)].into_iter().collect()
    }

    #[test]
    fn test_normal_scaling_hits_target_within_truncation() {
        let profile = profile_with(&[("heating", vec![1.0, 2.0, 3.0, 4.0])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);
        let group = SubsectorGroup::parse("heating");

        let scaled = scaler.scale(&profile, &factors(1000.0, 999.0), &group);

        assert_eq!(scaled.column("CA").unwrap(), &[100.0, 200.0, 300.0, 400.0]);
        let tx_sum: f64 = group_totals(&scaled, &group)[1];
        assert!(tx_sum <= 999.0 && tx_sum > 999.0 - 4.0);
        // original untouched
        assert_eq!(profile.column("CA").unwrap(), &[1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_truncates_toward_zero() {
        let profile = profile_with(&[("heating", vec![1.0, 1.0, 1.0])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);

        let scaled = scaler.scale(&profile, &factors(5.0, 0.0), &SubsectorGroup::parse("heating"));
        // ratio 5/3 -> 1.666.. truncated to 1
        assert_eq!(scaled.column("CA").unwrap(), &[1.0, 1.0, 1.0]);
        // TX ratio 0 -> all zeros
        assert_eq!(scaled.column("TX").unwrap(), &[0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_zero_to_positive_distributes_evenly() {
        let profile = profile_with(&[("data center", vec![0.0; HOURS_PER_YEAR])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);
        let group = SubsectorGroup::parse("data center");

        let scaled = scaler.scale(&profile, &factors(8760.0, 0.0), &group);

        assert!(scaled.column("CA").unwrap().iter().all(|v| *v == 1.0));
        assert_eq!(group_totals(&scaled, &group)[0], 8760.0);
        // zero factor on a zero column leaves it alone
        assert!(scaled.column("TX").unwrap().iter().all(|v| *v == 0.0));
        assert_eq!(
            observer.events(),
            vec![ScalingEvent::ZeroToPositive {
                state: "CA".to_string(),
                subsector_group: "data center".to_string(),
            }]
        );
    }

    #[test]
    fn test_zero_to_positive_drops_remainder() {
        let profile = profile_with(&[("data center", vec![0.0; 3])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);

        let scaled = scaler.scale(&profile, &factors(10.0, 0.0), &SubsectorGroup::parse("data center"));
        assert_eq!(scaled.column("CA").unwrap(), &[3.0, 3.0, 3.0]);
    }

    #[test]
    fn test_empty_group_is_noop() {
        let profile = profile_with(&[("heating", vec![0.0, 0.0])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);

        let scaled = scaler.scale(&profile, &factors(100.0, 100.0), &SubsectorGroup::parse("cooling"));
        assert_eq!(scaled, profile);
        assert!(observer.events().is_empty());
    }

    #[test]
    fn test_identity_ratio_keeps_integral_values() {
        let values = vec![5.0, 0.0, 17.0, 3.0];
        let profile = profile_with(&[("heating", values.clone())]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);

        let scaled = scaler.scale(&profile, &factors(25.0, 50.0), &SubsectorGroup::parse("heating"));
        assert_eq!(scaled.column("CA").unwrap(), values.as_slice());
        assert_eq!(scaled.column("TX").unwrap(), &[10.0, 0.0, 34.0, 6.0]);
    }

    #[test]
    fn test_rows_outside_group_are_untouched() {
        let profile = profile_with(&[
            ("heating", vec![1.5, 2.5, 3.5]),
            ("cooling", vec![1.0, 2.0, 4.0]),
        ]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);

        let scaled = scaler.scale(&profile, &factors(70.0, 70.0), &SubsectorGroup::parse("cooling"));

        for idx in 0..3 {
            assert_eq!(
                scaled.columns[0][idx].to_bits(),
                profile.columns[0][idx].to_bits()
            );
            assert_eq!(
                scaled.columns[1][idx].to_bits(),
                profile.columns[1][idx].to_bits()
            );
        }
        assert_eq!(&scaled.column("CA").unwrap()[3..], &[10.0, 20.0, 40.0]);
        assert_eq!(&scaled.column("TX").unwrap()[3..], &[10.0, 20.0, 40.0]);
    }

    #[test]
    fn test_states_missing_from_factors_untouched() {
        let profile = profile_with(&[("heating", vec![1.0, 2.0])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);
        let only_ca: ScalingFactorMap = [("CA".to_string(), 30.0)].into_iter().collect();

        let scaled = scaler.scale(&profile, &only_ca, &SubsectorGroup::parse("heating"));
        assert_eq!(scaled.column("CA").unwrap(), &[10.0, 20.0]);
        assert_eq!(scaled.column("TX").unwrap(), &[2.0, 4.0]);
    }

    #[test]
    fn test_group_members_scaled_jointly() {
        let profile = profile_with(&[("a", vec![1.0, 1.0]), ("b", vec![2.0, 2.0])]);
        let observer = RecordingObserver::new();
        let scaler = ProfileScaler::new(&observer);

        let scaled = scaler.scale(&profile, &factors(60.0, 0.0), &SubsectorGroup::parse("a, b"));
        assert_eq!(scaled.column("CA").unwrap(), &[10.0, 10.0, 20.0, 20.0]);
    }
}
