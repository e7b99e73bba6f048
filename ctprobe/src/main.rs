use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::Parser;
use ctprobe::{
    builtin_registry, die, run_functions, Cli, Config, FixtureSettings, JsonReporter,
    OutputFormat, Reporter, TerminalReporter,
};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    // Load config and apply CLI overrides
    let mut config = Config::load_from(cli.config.as_deref())?;
    cli.apply_to_config(&mut config);
    config.validate().context("Invalid configuration")?;
    debug!(?config, "configuration");

    let mut registry = builtin_registry(config.orchestration.seed);

    if cli.list {
        for name in registry.list() {
            println!("{}", name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let names = if cli.dut.is_empty() {
        registry.list()
    } else {
        cli.dut.clone()
    };
    registry.check_names(&names)?;

    let settings = FixtureSettings::from_config(&config).context("Invalid batch geometry")?;
    info!(
        functions = names.len(),
        batch_size = settings.geometry.batch_size(),
        drop_size = settings.geometry.drop_size(),
        tries = settings.test_tries,
        "starting"
    );

    let summaries = match run_functions(&mut registry, &names, &settings) {
        Ok(summaries) => summaries,
        Err(err) => die(&err),
    };

    let reporter: Box<dyn Reporter> = match cli.format {
        OutputFormat::Json => Box::new(JsonReporter::new()),
        OutputFormat::Terminal if cli.no_color => Box::new(TerminalReporter::without_colors()),
        OutputFormat::Terminal => Box::new(TerminalReporter::new()),
    };
    reporter.report(&summaries).context("Failed to write report")?;

    if summaries.iter().all(|s| s.constant_time) {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::from(1))
    }
}
