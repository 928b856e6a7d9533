use anyhow::Result;
use clap::{Parser, Subcommand};
use load_scaling::{LogObserver, PipelineConfig, ScalingPipeline};
use log::info;
use std::path::PathBuf;

mod energy_summary;
mod scale_processor;
mod scenario_generator;

use energy_summary::EnergySummaryProcessor;
use scale_processor::ScaleProcessor;
use scenario_generator::{BalancingAreaSpec, GenerationPlan, HistoricalSpec, ScenarioGenerator};

#[derive(Parser)]
#[command(name = "load_profile_pipeline")]
#[command(about = "Scale hourly load shapes to annual control totals and build projection archives")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scale every scenario's year files to the control totals
    Scale {
        #[arg(long, default_value = "unscaled_shapes/shape_outputs")]
        input_dir: PathBuf,

        #[arg(long, default_value = "scaled_shapes")]
        output_dir: PathBuf,

        /// Control totals CSV (scenario, subsector_group, year, <states...>)
        #[arg(long, default_value = "scaling_inputs_MWh.csv")]
        scaling_inputs: PathBuf,
    },

    /// Write the unscaled energy of every subsector group
    OriginalEnergy {
        #[arg(long, default_value = "unscaled_shapes/shape_outputs")]
        input_dir: PathBuf,

        #[arg(long, default_value = "scaling_inputs_MWh.csv")]
        scaling_inputs: PathBuf,

        #[arg(long, default_value = ".")]
        output_dir: PathBuf,
    },

    /// Project scenarios across the horizon and write load archives
    Generate {
        #[arg(long, default_value = "input_data")]
        input_dir: PathBuf,

        #[arg(long, default_value = "results")]
        output_dir: PathBuf,

        /// JSON generation plan; the four standard outputs when omitted
        #[arg(long)]
        plan: Option<PathBuf>,

        /// Historical load archive prepended to every output
        #[arg(long)]
        historical: Option<PathBuf>,

        /// BA participation factors (ba, factor)
        #[arg(long, requires = "county_to_ba")]
        load_participation: Option<PathBuf>,

        /// County to BA mapping (ba, state, ...)
        #[arg(long, requires = "load_participation")]
        county_to_ba: Option<PathBuf>,
    },
}

fn pipeline(input_dir: PathBuf, output_dir: PathBuf, scaling_inputs: PathBuf) -> ScalingPipeline {
    let config = PipelineConfig {
        input_dir,
        output_dir,
        control_totals_path: scaling_inputs,
        ..Default::default()
    };
    ScalingPipeline::new(config, Box::new(LogObserver))
}

fn main() -> Result<()> {
    env_logger::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Scale {
            input_dir,
            output_dir,
            scaling_inputs,
        } => {
            let processor = ScaleProcessor::new(pipeline(input_dir, output_dir, scaling_inputs));
            processor.process_all_scenarios()?;
        }
        Command::OriginalEnergy {
            input_dir,
            scaling_inputs,
            output_dir,
        } => {
            let processor =
                EnergySummaryProcessor::new(pipeline(input_dir, output_dir, scaling_inputs));
            let path = processor.run()?;
            info!("Original energy values written to {}", path.display());
        }
        Command::Generate {
            input_dir,
            output_dir,
            plan,
            historical,
            load_participation,
            county_to_ba,
        } => {
            let mut plan = match plan {
                Some(path) => GenerationPlan::from_file(&path)?,
                None => GenerationPlan::default(),
            };
            if let Some(path) = historical {
                plan.historical = Some(match plan.historical.take() {
                    Some(spec) => HistoricalSpec { path, ..spec },
                    None => HistoricalSpec::new(path),
                });
            }
            if let (Some(load_participation), Some(county_to_ba)) = (load_participation, county_to_ba) {
                plan.balancing_areas = Some(BalancingAreaSpec {
                    load_participation,
                    county_to_ba,
                });
            }

            let mut generator = ScenarioGenerator::new(input_dir, output_dir, plan);
            for path in generator.run()? {
                info!("Generated {}", path.display());
            }
        }
    }

    Ok(())
}
