//! botdeploy - main entry point

use std::path::Path;

use anyhow::{Context, Result, bail};
use tracing::{debug, error, info, warn};

use botdeploy::cli::{Cli, Commands};
use botdeploy::config_file::DeployConfig;
use botdeploy::process_guard::{self, ProcessGuard};
use botdeploy::secrets::SecretValues;
use botdeploy::step_runner::RunOptions;
use botdeploy::transport::SshTransport;
use botdeploy::workflow::DeployWorkflow;

fn main() -> Result<()> {
    if let Err(e) = botdeploy::logging::init() {
        eprintln!("warning: {}", e);
    }

    // ssh/sftp children are killed with us on SIGINT/SIGTERM/SIGHUP
    if let Err(e) = process_guard::init_signal_handlers() {
        warn!("Failed to initialize signal handlers: {}", e);
    }
    let _guard = ProcessGuard::new();

    let cli = Cli::parse_args();
    debug!(?cli, "CLI arguments parsed");

    match cli.command {
        Commands::Validate { config } => {
            let config = load_config(&config)?;
            println!(
                "✓ Configuration is valid: {} -> {}@{}:{}",
                config.repository,
                config.target.user,
                config.target.host,
                config.remote_path()
            );
        }
        Commands::Init { config, force } => init_config(&config, force)?,
        Commands::Plan { config } => {
            let config = load_config(&config)?;
            let workflow = DeployWorkflow::from_config(&config, SecretValues::placeholders(&config.secrets));
            print_plan(&workflow)?;
        }
        Commands::Render { config, out, reveal } => {
            let config = load_config(&config)?;
            let secrets = if reveal {
                SecretValues::from_env(&config.secrets)?
            } else {
                SecretValues::placeholders(&config.secrets)
            };
            let workflow = DeployWorkflow::from_config(&config, secrets);
            for path in workflow.write_artifacts(&out)? {
                println!("wrote {}", path.display());
            }
        }
        Commands::Deploy { config, sequential } => {
            let options = RunOptions {
                dry_run: cli.dry_run,
                parallel: !sequential,
            };
            deploy(&config, &options)?;
        }
    }

    Ok(())
}

fn load_config(path: &Path) -> Result<DeployConfig> {
    info!("Loading configuration from {:?}", path);
    let config = DeployConfig::load_from_file(path)?;
    config
        .validate()
        .with_context(|| format!("Invalid configuration in {:?}", path))?;
    Ok(config)
}

fn init_config(path: &Path, force: bool) -> Result<()> {
    if path.exists() && !force {
        bail!("{:?} already exists (use --force to overwrite)", path);
    }
    DeployConfig::example().save_to_file(path)?;
    println!("✓ Wrote example configuration to {}", path.display());
    Ok(())
}

fn print_plan(workflow: &DeployWorkflow) -> Result<()> {
    for stage in workflow.plan()? {
        let needs: Vec<String> = stage.needs.iter().map(|s| s.to_string()).collect();
        println!("== {} ({})", stage.stage, stage.stage.description());
        if !needs.is_empty() {
            println!("   needs: {}", needs.join(", "));
        }
        if stage.destructive {
            println!("   destructive: removes {}", workflow.remote_path());
        }
        if let Some(timeout) = stage.timeout {
            println!("   timeout: {}s", timeout.as_secs());
        }
        for line in stage.script.lines() {
            println!("   | {}", line);
        }
        if let Some(stdin) = stage.stdin {
            println!("   stdin:");
            for line in stdin.lines() {
                println!("   > {}", line);
            }
        }
        println!();
    }
    Ok(())
}

fn deploy(config_path: &Path, options: &RunOptions) -> Result<()> {
    let config = load_config(config_path)?;

    let secrets = match SecretValues::from_env(&config.secrets) {
        Ok(secrets) => secrets,
        Err(e) if options.dry_run => {
            warn!("{}; using placeholders for dry run", e);
            SecretValues::placeholders(&config.secrets)
        }
        Err(e) => return Err(e.into()),
    };

    let target = config.target();
    let transport = match SshTransport::new(target.clone()) {
        Ok(transport) => transport,
        Err(e) if options.dry_run => {
            warn!("{}; continuing because nothing is executed in a dry run", e);
            SshTransport::with_programs(target, "ssh", "sftp")
        }
        Err(e) => return Err(e).context("Cannot reach the target host"),
    };

    info!(
        repository = %config.repository,
        destination = %transport.target().destination(),
        "deploying"
    );
    let workflow = DeployWorkflow::from_config(&config, secrets);
    let report = workflow.run(&transport, options)?;

    println!("{}", report);
    if !report.is_success() {
        for failed in report.failed() {
            error!(job = %failed.name, "{}", failed.outcome);
        }
        bail!("deployment of {} failed", config.repository);
    }
    Ok(())
}
