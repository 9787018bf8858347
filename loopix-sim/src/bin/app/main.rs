//! Main simulation wrapper: pipes the CLI arguments with the execution.
//! Unlike the teacher's `SimulationApp`, this is a synchronous batch
//! computation with a known end time (spec §4.3 `run(duration_ms)`) rather
//! than a long-running background runner, so there is no `ctrlc`/ stream
//! subscriber machinery to drive — just load, run, write.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;
use loopix_sim::engine::Simulation;
use loopix_sim::log;
use loopix_sim::settings::Settings;
use serde::de::DeserializeOwned;

#[derive(Parser)]
pub struct SimulationApp {
    /// JSON file path, in `Settings` format.
    #[clap(long, short)]
    input_settings: PathBuf,
    /// Where to write the `OutputArtifact` JSON. Defaults to stdout.
    #[clap(long, short)]
    output: Option<PathBuf>,
    #[clap(long, default_value = "plain")]
    log_format: log::LogFormat,
    #[clap(long, default_value = "stdout")]
    log_to: log::LogOutput,
}

impl SimulationApp {
    pub fn run(self) -> anyhow::Result<()> {
        let settings: Settings = load_json_from_file(&self.input_settings)?;

        let mut simulation = Simulation::from_settings(&settings)?;
        simulation.run(settings.run_time_ms)?;
        simulation.clean();

        let artifact = simulation.output_artifact();
        match self.output {
            Some(path) => {
                let file = File::create(&path)
                    .with_context(|| format!("creating output file {}", path.display()))?;
                artifact.write_json(file)?;
            }
            None => artifact.write_json(std::io::stdout())?,
        }
        Ok(())
    }
}

fn load_json_from_file<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let f = File::open(path).with_context(|| format!("opening settings file {}", path.display()))?;
    Ok(serde_json::from_reader(f)?)
}

fn main() -> anyhow::Result<()> {
    let app = SimulationApp::parse();
    let _guard = log::config_tracing(app.log_format, &app.log_to)?;

    if let Err(e) = app.run() {
        tracing::error!("error: {e}");
        std::process::exit(1);
    }
    Ok(())
}
