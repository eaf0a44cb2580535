use std::{future, path::Path, time::Duration};

use anyhow::Context;
use clap::{Args, FromArgMatches};
use cli::{ConfigArgs, ConfigCommand};
use fpsmeter::FpsMeter;
use fpsmeter_agent::{
    config::{self, AgentConfig},
    init_logger,
    vsync::Vsync,
};

const BINARY: &str = env!("CARGO_BIN_NAME");

/// Main agent function.
///
/// The steps are:
/// - parse the CLI
/// - parse the config file
/// - apply the settings from CLI and config file
/// - start the fps meter
/// - print the measured values until the stop condition
///
/// About errors: we use `anyhow::Result` and `context` instead of `expect` to get
/// nicer error messages (`expect` prints errors with `Debug`).
fn main() -> anyhow::Result<()> {
    init_logger();

    // Define the command-line interface.
    let mut cmd = clap::Command::new(BINARY).version(agent_version());
    cmd = cli::Cli::augment_args(cmd);

    // Parse CLI arguments and handle some special flags like --version and --help.
    let matches = cmd.get_matches();
    let args = match cli::Cli::from_arg_matches(&matches) {
        Ok(args) => args,
        Err(e) => e.exit(),
    };

    // Special flags like --help will exit. In other cases, we continue.
    print_welcome();

    match args.command.unwrap_or(cli::Command::Run) {
        cli::Command::Config(ConfigArgs {
            command: ConfigCommand::Regen,
        }) => {
            // (re)generate the default config
            let file = &args.common.config;
            let new_config = AgentConfig::default_string().context("could not generate the default config")?;
            std::fs::write(file, new_config).with_context(|| format!("could not write {file:?}"))?;
            log::info!("Default configuration file written to: {}", file.display());
        }
        cli::Command::Run => {
            let config = load_config(&args.common)?;
            let rt = tokio::runtime::Builder::new_multi_thread()
                .worker_threads(1)
                .enable_all()
                .build()
                .context("could not start the tokio runtime")?;
            rt.block_on(run(config, args.common.duration))?;
        }
    }
    Ok(())
}

/// Prints a short welcome message.
fn print_welcome() {
    // It is useful to have the precise version of the agent in the logs.
    log::info!("Starting fps agent '{BINARY}' v{}", agent_version());
}

/// Loads the config file and applies the overrides given on the command line.
fn load_config(args: &cli::CommonArgs) -> anyhow::Result<AgentConfig> {
    let mut config = config::load(Path::new(&args.config), !args.no_default_config)
        .context("could not load config file")?;
    if let Some(node) = &args.node {
        config.meter.node_path = Some(node.clone());
    }
    if let Some(poll_interval) = args.poll_interval {
        config.meter.poll_interval = poll_interval;
    }
    config.validate().context("invalid config")?;
    Ok(config)
}

/// Measures the frame rate and prints it, until Ctrl+C or the end of `duration`.
async fn run(config: AgentConfig, duration: Option<Duration>) -> anyhow::Result<()> {
    let mut vsync = Vsync::spawn(&config.simulation)?;
    let refresh_rate = config.display.refresh_rate;
    let mut meter = FpsMeter::builder(config.meter)
        .with_display(move || refresh_rate)
        .with_compositor(vsync.compositor())
        .build(|fps: &str| println!("fps: {fps}"))
        .context("could not create the fps meter")?;
    log::info!("Measuring with {}", meter.source_kind());
    if meter.source_kind() == fpsmeter::SourceKind::Node {
        // the simulated display is only needed by the frame sampler
        vsync.stop();
    }

    meter.set_enabled(true);
    log::debug!("Mode: {}", meter.mode());

    let ctrl_c = tokio::signal::ctrl_c();
    let deadline = async {
        match duration {
            Some(d) => tokio::time::sleep(d).await,
            None => future::pending::<()>().await,
        }
    };
    tokio::pin!(ctrl_c, deadline);
    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                res.context("could not listen for Ctrl+C")?;
                log::info!("Ctrl+C received, stopping");
                break;
            }
            _ = &mut deadline => {
                log::info!("Measurement duration elapsed, stopping");
                break;
            }
            delivered = meter.dispatch_next() => {
                if !delivered {
                    log::warn!("No more frame rate samples, stopping");
                    break;
                }
            }
        }
    }

    meter.set_enabled(false);
    meter.detach();
    Ok(())
}

/// Generates a version number from the information generated in the build script.
/// See `build.rs` at the crate root.
fn agent_version() -> String {
    const CRATE_VERSION: &str = env!("CARGO_PKG_VERSION");
    const BUILD_TIMESTAMP: &str = env!("VERGEN_BUILD_TIMESTAMP");
    const RUSTC_SEMVER: &str = env!("VERGEN_RUSTC_SEMVER");
    const CARGO_DEBUG: &str = env!("VERGEN_CARGO_DEBUG");
    format!("{CRATE_VERSION} ({BUILD_TIMESTAMP}, rustc {RUSTC_SEMVER}, debug={CARGO_DEBUG})")
}

/// Agent command-line interface (CLI).
///
/// We use `clap` to parse these options, therefore the structs
/// derive [`clap::Args`] or other clap trait implementations.
mod cli {
    use clap::{Args, Parser, Subcommand};
    use std::{path::PathBuf, time::Duration};

    // NOTE: the doc comment attached to `Cli` is used by clap as the description of
    // the application. It is displayed at the start of the help message.

    /// Frame rate agent: measure the refresh rate of the display and print it every second.
    #[derive(Parser)]
    pub struct Cli {
        #[command(subcommand)]
        pub command: Option<Command>,

        #[command(flatten)]
        pub common: CommonArgs,
    }

    #[derive(Subcommand)]
    pub enum Command {
        /// Measure the frame rate and print it.
        ///
        /// This is the default command.
        Run,

        /// Manipulate the configuration.
        Config(ConfigArgs),
    }

    #[derive(Args)]
    pub struct ConfigArgs {
        #[command(subcommand)]
        pub command: ConfigCommand,
    }

    #[derive(Subcommand)]
    pub enum ConfigCommand {
        /// Regenerate the configuration file and stop.
        ///
        /// If the file exists, it will be overwritten.
        Regen,
    }

    /// Common CLI arguments.
    #[derive(Args, Clone)]
    pub struct CommonArgs {
        /// Path to the config file.
        #[arg(long, env = "FPSMETER_CONFIG", default_value = "fpsmeter-config.toml")]
        pub config: PathBuf,

        /// If set, the config file must exist, otherwise the agent will fail to start with an error.
        #[arg(long, default_value_t = false)]
        pub no_default_config: bool,

        /// Path to the fps node, overrides `meter.node_path`.
        #[arg(long)]
        pub node: Option<PathBuf>,

        /// Interval between two reads of the fps node, overrides `meter.poll_interval`.
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        pub poll_interval: Option<Duration>,

        /// Stop after this amount of time, ex. `10s`.
        ///
        /// By default, the agent runs until it is stopped by Ctrl+C.
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        pub duration: Option<Duration>,
    }
}
