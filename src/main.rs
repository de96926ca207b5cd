use clap::{Parser, Subcommand};
use pmbridge::install::report;
use pmbridge::error::describe_error_code;
use pmbridge::{
    BridgeConfig, BridgeError, InstallOutcome, InstallRequest, ModuleRequest, PnpmInstaller,
};
use pmbridge::subprocess::SubprocessManager;
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, error, trace};
use tracing_subscriber::EnvFilter;

/// Install npm packages through pnpm and report what changed
#[derive(Parser)]
#[command(name = "pmbridge")]
#[command(about = "Drive pnpm installs and summarize their reporter output", long_about = None)]
struct Cli {
    /// Enable verbose output (-v for debug, -vv for trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Path to configuration file
    #[arg(short = 'c', long, global = true)]
    config: Option<PathBuf>,

    /// Package manager executable (overrides config)
    #[arg(long, global = true)]
    program: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install one or more modules
    Install {
        /// Modules to install, e.g. `left-pad` or `@babel/core@7`
        #[arg(required = true)]
        modules: Vec<String>,

        /// Save as development dependencies
        #[arg(short = 'D', long)]
        dev: bool,

        /// Directory to run the installer in (default: current directory)
        #[arg(long)]
        cwd: Option<PathBuf>,

        /// Manifest the modules are installed for
        #[arg(long)]
        package_path: Option<PathBuf>,

        /// Give up after this long, e.g. `90s` or `5m`
        #[arg(long, value_parser = humantime_serde::re::humantime::parse_duration)]
        timeout: Option<Duration>,

        /// Print the outcome as JSON instead of log lines
        #[arg(long)]
        json: bool,
    },
    /// Print the package manager version
    Version,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level)),
        )
        .with_target(cli.verbose >= 2)
        .with_writer(std::io::stderr)
        .init();

    debug!("pmbridge started with verbosity level: {}", cli.verbose);
    trace!("Full CLI args: {:?}", std::env::args().collect::<Vec<_>>());

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!("Fatal error: {:#}", e);
            let (lines, code) = describe_failure(&e);
            for line in lines {
                eprintln!("{line}");
            }
            code
        }
    };
    std::process::exit(code);
}

/// Lines printed for a fatal error, and the exit code to use
fn describe_failure(e: &anyhow::Error) -> (Vec<String>, i32) {
    match e.downcast_ref::<BridgeError>() {
        Some(err) => (
            vec![
                format!("Error: {}", err.user_message()),
                format!("  [E{:04}] {}", err.code(), describe_error_code(err.code())),
            ],
            err.exit_code(),
        ),
        None => (vec![format!("Error: {e}")], 1),
    }
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    let mut config = BridgeConfig::load(cli.config.as_deref()).await?;
    if let Some(program) = cli.program {
        config.program = program;
    }

    match cli.command {
        Commands::Install {
            modules,
            dev,
            cwd,
            package_path,
            timeout,
            json,
        } => {
            if timeout.is_some() {
                config.timeout = timeout;
            }
            config.validate()?;

            let modules = modules
                .iter()
                .map(|m| m.parse::<ModuleRequest>())
                .collect::<Result<Vec<_>, _>>()?;
            let cwd = match cwd {
                Some(dir) => dir,
                None => std::env::current_dir()?,
            };

            let mut request = InstallRequest::new(modules, cwd).save_dev(dev);
            if let Some(path) = package_path {
                request = request.with_package_path(path);
            }

            run_install(config, request, json).await
        }
        Commands::Version => {
            let installer = PnpmInstaller::new(SubprocessManager::production(), config);
            println!("{}", installer.version().await?);
            Ok(0)
        }
    }
}

async fn run_install(
    config: BridgeConfig,
    request: InstallRequest,
    json: bool,
) -> anyhow::Result<i32> {
    let label = config.program.clone();
    let installer = PnpmInstaller::new(SubprocessManager::production(), config);

    let cancel = async {
        if tokio::signal::ctrl_c().await.is_err() {
            // No signal handler available; never cancel
            futures::future::pending::<()>().await;
        }
    };

    let outcome = installer.install_with_cancellation(request, cancel).await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        report::emit(&outcome, &label);
    }

    Ok(exit_code(&outcome))
}

fn exit_code(outcome: &InstallOutcome) -> i32 {
    if outcome.is_success() {
        0
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pmbridge::ErrorCode;

    #[test]
    fn test_bridge_error_lines_and_exit_code() {
        let err = anyhow::Error::from(BridgeError::spawn_with_code(
            ErrorCode::EXEC_COMMAND_NOT_FOUND,
            "Command not found: pnpm",
            Some("pnpm".to_string()),
        ));

        let (lines, code) = describe_failure(&err);
        assert_eq!(code, 2);
        assert_eq!(lines[0], "Error: Could not start 'pnpm': Command not found: pnpm");
        assert_eq!(lines[1], "  [E4001] Installer executable not found");
    }

    #[test]
    fn test_other_errors_exit_1() {
        let (lines, code) = describe_failure(&anyhow::anyhow!("stdout closed"));
        assert_eq!(code, 1);
        assert_eq!(lines, vec!["Error: stdout closed".to_string()]);
    }
}
