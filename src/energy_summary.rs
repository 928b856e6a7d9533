use anyhow::{bail, Context, Result};
use load_scaling::data_loader::{read_control_totals, read_profile, write_original_energy};
use load_scaling::models::OriginalEnergyTable;
use load_scaling::pipeline::ORIGINAL_ENERGY_FILE_NAME;
use load_scaling::ScalingPipeline;
use log::info;
use std::fs;
use std::path::PathBuf;

use crate::scale_processor::{discover_year_files, scenario_dirs};

/// Tabulates the unscaled energy of every subsector group so it can be
/// compared with the control totals.
pub struct EnergySummaryProcessor {
    pipeline: ScalingPipeline,
}

impl EnergySummaryProcessor {
    pub fn new(pipeline: ScalingPipeline) -> Self {
        Self { pipeline }
    }

    pub fn build_table(&self) -> Result<OriginalEnergyTable> {
        let config = self.pipeline.config();
        let control_totals = read_control_totals(&config.control_totals_path)?;
        let mut table = OriginalEnergyTable::default();

        for (scenario, dir) in scenario_dirs(&config.input_dir)? {
            info!("Summing original energy for {}", scenario);
            for file in discover_year_files(&dir)? {
                let profile = read_profile(&file.path)?;
                if table.states.is_empty() {
                    table.states = profile.states.clone();
                } else if table.states != profile.states {
                    bail!(
                        "{} has state columns that differ from earlier files",
                        file.path.display()
                    );
                }
                table.rows.extend(self.pipeline.original_energy(
                    &control_totals,
                    &scenario,
                    file.year,
                    &profile,
                ));
            }
        }

        Ok(table)
    }

    /// Write the table and return where it went.
    pub fn run(&self) -> Result<PathBuf> {
        let table = self.build_table()?;
        let output_dir = &self.pipeline.config().output_dir;
        fs::create_dir_all(output_dir)?;
        let path = output_dir.join(ORIGINAL_ENERGY_FILE_NAME);
        write_original_energy(&path, &table)
            .with_context(|| format!("writing {}", path.display()))?;
        info!("Wrote {} rows to {}", table.rows.len(), path.display());
        Ok(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use load_scaling::observer::{RecordingObserver, ScalingEvent};
    use load_scaling::{PipelineConfig, ScalingObserver};
    use std::rc::Rc;
    use tempfile::tempdir;

    struct SharedObserver(Rc<RecordingObserver>);

    impl ScalingObserver for SharedObserver {
        fn observe(&self, event: ScalingEvent) {
            self.0.observe(event);
        }
    }

    #[test]
    fn test_original_energy_sums_each_group() {
        let dir = tempdir().unwrap();
        let scenario_dir = dir.path().join("input").join("central");
        fs::create_dir_all(&scenario_dir).unwrap();
        fs::write(
            scenario_dir.join("2030.csv"),
            "sector,subsector,weather_datetime,texas\n\
             residential,heating,2012-01-01 00:00:00,2\n\
             residential,heating,2012-01-01 01:00:00,5\n\
             commercial,lighting,2012-01-01 00:00:00,9\n",
        )
        .unwrap();
        let control = dir.path().join("scaling_inputs_MWh.csv");
        fs::write(
            &control,
            "scenario,subsector_group,year,texas\n\
             central,heating,2030,1\n\
             central,data center,2030,1\n",
        )
        .unwrap();

        let recorder = Rc::new(RecordingObserver::new());
        let config = PipelineConfig {
            input_dir: dir.path().join("input"),
            output_dir: dir.path().join("out"),
            control_totals_path: control,
            ..Default::default()
        };
        let processor = EnergySummaryProcessor::new(ScalingPipeline::new(
            config,
            Box::new(SharedObserver(recorder.clone())),
        ));

        let table = processor.build_table().unwrap();
        assert_eq!(table.states, vec!["texas"]);
        assert_eq!(table.rows.len(), 2);
        assert_eq!(table.rows[0].subsector_group, "heating");
        assert_eq!(table.rows[0].values, vec![7.0]);
        assert_eq!(table.rows[1].values, vec![0.0]);
        assert!(matches!(
            recorder.events().as_slice(),
            [ScalingEvent::EmptySubsectorGroup { year: 2030, .. }]
        ));

        let path = processor.run().unwrap();
        assert!(path.ends_with(ORIGINAL_ENERGY_FILE_NAME));
    }
}
