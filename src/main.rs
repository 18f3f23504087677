use bitbucket_notifier::error::NotifierError;
use bitbucket_notifier::logging::{FileLogger, TracingBuildLog, setup_logging};
use bitbucket_notifier::{Build, Notifier, load_config};
use clap::{Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

const DEFAULT_CONFIG_PATH: &str = "notifier_config.toml";

#[derive(Parser)]
#[command(name = "bitbucket-notify", about = "Report CI build status to Bitbucket")]
#[command(version)]
struct Cli {
    /// Notifier configuration file
    #[arg(long, env = "NOTIFIER_CONFIG", default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,

    /// Also write logs to rolling files in this directory
    #[arg(long, env = "NOTIFIER_LOG_DIR")]
    log_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Report that a build has started
    PreBuild {
        /// TOML file describing the build
        #[arg(short, long)]
        build: PathBuf,
    },
    /// Report the result of a finished build
    PostBuild {
        /// TOML file describing the build
        #[arg(short, long)]
        build: PathBuf,
    },
}

/// Load the build description handed over by the CI host
fn load_build(path: &Path) -> Result<Build, NotifierError> {
    let build_str = fs::read_to_string(path).map_err(|e| {
        NotifierError::Config(format!(
            "Failed to read build file '{}': {}",
            path.display(),
            e
        ))
    })?;
    Ok(toml::from_str(&build_str)?)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let file_logger = cli.log_dir.clone().map(FileLogger::new);
    let _guard = match setup_logging(file_logger.as_ref()) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Logging setup error: {}", e);
            std::process::exit(1);
        }
    };

    let config = match load_config(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            std::process::exit(1);
        }
    };
    info!("Using config at {:?}", cli.config);
    for problem in config.validate() {
        warn!("{}", problem);
    }

    let build_path = match &cli.command {
        Commands::PreBuild { build } | Commands::PostBuild { build } => build,
    };
    let build = match load_build(build_path) {
        Ok(build) => build,
        Err(e) => {
            eprintln!("Build description error: {}", e);
            std::process::exit(1);
        }
    };

    let notifier = Notifier::from_config(config);
    let console = TracingBuildLog;
    match cli.command {
        Commands::PreBuild { .. } => notifier.pre_build(&build, &console).await,
        Commands::PostBuild { .. } => notifier.post_build(&build, &console).await,
    };
}
