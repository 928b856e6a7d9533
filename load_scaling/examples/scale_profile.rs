use load_scaling::observer::LogObserver;
use load_scaling::scaler::group_totals;
use load_scaling::{
    ControlTotalsTable, HourlyProfileTable, ProfileScaler, ScalingFactorResolver, SubsectorGroup,
};

fn main() {
    // Two control years for one group; 2030 falls halfway between them.
    let mut totals = ControlTotalsTable::new(vec!["CA".to_string(), "TX".to_string()]);
    totals.push("central", "space heating, water heating", 2025, vec![2400.0, 1200.0]);
    totals.push("central", "space heating, water heating", 2035, vec![4800.0, 1200.0]);

    // One day of hourly load: heating peaks in the morning, water heating is flat,
    // lighting is outside the group and stays as-is.
    let mut profile = HourlyProfileTable::new(vec!["CA".to_string(), "TX".to_string()]);
    for hour in 0..24 {
        let timestamp = format!("2012-01-01 {:02}:00:00", hour);
        let heating = match hour {
            6..=9 => 10.0,
            _ => 4.0,
        };
        profile.push_row("residential", "space heating", &timestamp, &[heating, heating / 2.0]);
        profile.push_row("residential", "water heating", &timestamp, &[2.0, 0.0]);
        profile.push_row("commercial", "lighting", &timestamp, &[3.0, 3.0]);
    }

    let observer = LogObserver;
    let resolver = ScalingFactorResolver::new(&totals, &observer);
    let scaler = ProfileScaler::new(&observer);
    let group = SubsectorGroup::parse("space heating, water heating");

    let factors = resolver.resolve("central", group.label(), 2030);
    let scaled = scaler.scale(&profile, &factors, &group);

    println!("Load Scaling Example");
    println!("====================");
    println!("Group: {}", group.label());
    for (idx, state) in profile.states.iter().enumerate() {
        println!(
            "  {}: target {:.1} MWh, before {:.1} MWh, after {:.1} MWh",
            state,
            factors[state],
            group_totals(&profile, &group)[idx],
            group_totals(&scaled, &group)[idx],
        );
    }
}
