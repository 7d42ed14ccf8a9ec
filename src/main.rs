use anyhow::{Context, Result};
use clap::Parser;
use tracerelay::cli::{Cli, Command, OutputFormat};
use tracerelay::config::RelayConfig;
use tracerelay::scenario::{run_scenario, Scenario};
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    let filter = if debug {
        EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into())
    } else {
        EnvFilter::from_default_env()
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(cli: &Cli) -> Result<RelayConfig> {
    match &cli.config {
        Some(path) => RelayConfig::load(path)
            .with_context(|| format!("loading relay config {}", path.display())),
        None => Ok(RelayConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.debug);
    let config = load_config(&cli)?;

    match &cli.command {
        Command::Run { scenario, format } => {
            let parsed = Scenario::load(scenario)
                .with_context(|| format!("loading scenario {}", scenario.display()))?;
            let report = run_scenario(&parsed, &config)
                .with_context(|| format!("replaying scenario {}", scenario.display()))?;
            match format {
                OutputFormat::Text => print!("{}", report.render_text()),
                OutputFormat::Json => {
                    println!("{}", serde_json::to_string_pretty(&report)?);
                }
            }
        }
        Command::Activation { args } => {
            let activation = &config.activation;
            let enabled = activation.is_enabled(args.as_slice());
            println!(
                "profiling {} ({}={:?}, flags {:?})",
                if enabled { "enabled" } else { "disabled" },
                activation.environ_flag,
                std::env::var(&activation.environ_flag).unwrap_or_default(),
                activation.cli_flags
            );
        }
    }
    Ok(())
}
