use std::process::ExitCode;
use ugv_sim::{RunConfig, Scenario, SimError, Simulation};

fn run(scenario: &str, config: Option<&str>) -> Result<String, SimError> {
    let config = match config {
        Some(path) => RunConfig::load(path)?,
        None => RunConfig::default(),
    };
    let scenario = Scenario::load(scenario)?;
    let mut sim = Simulation::from_scenario(&scenario, &config)?;
    sim.run().to_json()
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(scenario) = args.first() else {
        eprintln!("usage: ugv-sim <scenario.json> [config.toml]");
        return ExitCode::FAILURE;
    };
    match run(scenario, args.get(1).map(String::as_str)) {
        Ok(summary) => {
            println!("{}", summary);
            ExitCode::SUCCESS
        }
        Err(err) => {
            log::error!("{}", err);
            ExitCode::FAILURE
        }
    }
}
