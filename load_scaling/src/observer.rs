use log::{info, warn};
use std::cell::RefCell;

/// Which end of the control-total range a target year was clamped to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClampBound {
    BeforeFirst,
    AfterLast,
}

/// Conditions worth surfacing while scaling. None of them are errors.
#[derive(Debug, Clone, PartialEq)]
pub enum ScalingEvent {
    MissingControlTotals {
        scenario: String,
        subsector_group: String,
    },
    YearClamped {
        scenario: String,
        subsector_group: String,
        target_year: i32,
        used_year: i32,
        bound: ClampBound,
    },
    ZeroToPositive {
        state: String,
        subsector_group: String,
    },
    EmptySubsectorGroup {
        subsector_group: String,
        year: i32,
    },
}

/// Sink for scaling observations, injected into the resolver, scaler and driver.
pub trait ScalingObserver {
    fn observe(&self, event: ScalingEvent);
}

/// Forwards observations to the `log` facade.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogObserver;

impl ScalingObserver for LogObserver {
    fn observe(&self, event: ScalingEvent) {
        match event {
            ScalingEvent::MissingControlTotals {
                scenario,
                subsector_group,
            } => warn!(
                "No scaling data found for scenario '{}' and subsector group '{}'; leaving unscaled",
                scenario, subsector_group
            ),
            ScalingEvent::YearClamped {
                target_year,
                used_year,
                bound,
                ..
            } => match bound {
                ClampBound::BeforeFirst => warn!(
                    "Target year {} is before first scaling input year. Using data from {}.",
                    target_year, used_year
                ),
                ClampBound::AfterLast => warn!(
                    "Target year {} is after last scaling input year. Using data from {}.",
                    target_year, used_year
                ),
            },
            ScalingEvent::ZeroToPositive {
                state,
                subsector_group,
            } => info!(
                "Zero-to-positive scaling applied for {}, subsector_group: {}",
                state, subsector_group
            ),
            ScalingEvent::EmptySubsectorGroup {
                subsector_group,
                year,
            } => warn!(
                "No data found for subsector group '{}' in {}",
                subsector_group, year
            ),
        }
    }
}

/// Keeps every observation in memory.
#[derive(Debug, Default)]
pub struct RecordingObserver {
    events: RefCell<Vec<ScalingEvent>>,
}

impl RecordingObserver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ScalingEvent> {
        self.events.borrow().clone()
    }
}

impl ScalingObserver for RecordingObserver {
    fn observe(&self, event: ScalingEvent) {
        self.events.borrow_mut().push(event);
    }
}
