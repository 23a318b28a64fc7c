use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use setupkit_core::{InstallOutcome, InstallPreferences, ProductConfig, Version};
use setupkit_installer::{
    read_active_run, read_current_stage, InstallLayout, InstallRequest, Installer, StageTracker,
};
use tracing::{debug, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

mod render;

use render::{
    current_output_style, format_install_report_lines, format_step_lines, print_section,
    render_status_line,
};

const EXIT_INTERNAL_ERROR: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "setupkit")]
#[command(about = "Transactional product installer", long_about = None)]
struct Cli {
    /// Product install directory.
    #[arg(long)]
    target: PathBuf,
    /// Machine state: key store, deferred removals, run journals.
    #[arg(long)]
    state_root: PathBuf,
    /// TOML file overriding the product naming and store keys.
    #[arg(long)]
    product_config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Install or update the product from an unpacked payload.
    Install {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        new_version: Version,
        #[arg(long)]
        setup: Option<PathBuf>,
        #[arg(long)]
        archive: Option<PathBuf>,
        /// First-run preferences (TOML); copied into the target on first install.
        #[arg(long)]
        prefs: Option<PathBuf>,
    },
    /// Show the installed version and any unfinished run.
    Status,
    /// Refresh existing shortcuts and registration after an OS upgrade.
    OsUpgrade,
}

fn main() -> ExitCode {
    init_tracing();
    let cli = Cli::parse();
    match run_cli(cli) {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::from(EXIT_INTERNAL_ERROR)
        }
    }
}

fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn run_cli(cli: Cli) -> Result<u8> {
    let product = load_product_config(cli.product_config.as_deref())?;
    let layout = InstallLayout::new(cli.target, cli.state_root);
    let output_style = current_output_style();
    debug!(
        product = %product.name,
        target = %layout.target_path().display(),
        "loaded product config"
    );

    match cli.command {
        Commands::Install {
            source,
            new_version,
            setup,
            archive,
            prefs,
        } => {
            let preferences = load_preferences(prefs.as_deref())?;
            let request = InstallRequest {
                src_path: source,
                new_version: new_version.clone(),
                setup_path: setup,
                archive_path: archive,
                preferences_path: prefs,
            };

            let installer = Installer::new(layout.clone(), product);
            let mut run = installer.begin_run(&new_version)?;
            if let Some(stale) = &run.stale_run {
                println!(
                    "{}",
                    render_status_line(
                        output_style,
                        "warn",
                        &format!("previous run {stale} did not finish"),
                    )
                );
            }

            let result =
                installer.install_or_update_product(&request, &preferences, &mut run.tracker);
            let report = match result {
                Ok(report) => report,
                Err(err) => {
                    if let Err(close_err) = installer.abort_run(&mut run, &err) {
                        warn!(error = %format!("{close_err:#}"), "failed to close install run");
                    }
                    return Err(err);
                }
            };
            installer.finish_run(&mut run, &report)?;

            print_section(
                output_style,
                &format!("{} {}", installer.product().name, new_version),
            );
            for line in format_install_report_lines(&report, &new_version, output_style) {
                println!("{line}");
            }
            println!(
                "{}",
                render_status_line(
                    output_style,
                    "step",
                    &format!("journal: {}", layout.run_journal_path(&run.run_id).display()),
                )
            );
            Ok(exit_code_for(report.outcome))
        }
        Commands::Status => {
            let installer = Installer::new(layout.clone(), product);
            match installer.current_version()? {
                Some(version) => println!("installed: {version}"),
                None => println!("installed: none"),
            }
            println!("target: {}", layout.target_path().display());

            if let Some(run_id) = read_active_run(&layout)? {
                let stage = read_current_stage(&layout, &run_id)?
                    .map(|stage| stage.as_str())
                    .unwrap_or("unknown");
                println!(
                    "{}",
                    render_status_line(
                        output_style,
                        "warn",
                        &format!("unfinished run {run_id} last reached stage {stage}"),
                    )
                );
            }

            let pending = layout
                .pending_removals()
                .entries()
                .context("failed to read deferred removals")?;
            let under_target = pending
                .iter()
                .filter(|path| path.starts_with(layout.target_path()))
                .count();
            if under_target > 0 {
                println!("pending removals under target: {under_target}");
            }
            Ok(0)
        }
        Commands::OsUpgrade => {
            let installer = Installer::new(layout, product);
            let mut tracker = StageTracker::detached();
            let steps = installer.handle_os_upgrade(&mut tracker);
            print_section(output_style, "os upgrade");
            for line in format_step_lines(&steps, output_style) {
                println!("{line}");
            }
            Ok(0)
        }
    }
}

fn load_product_config(path: Option<&Path>) -> Result<ProductConfig> {
    let Some(path) = path else {
        return Ok(ProductConfig::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading product config: {}", path.display()))?;
    ProductConfig::from_toml_str(&raw)
        .with_context(|| format!("invalid product config: {}", path.display()))
}

fn load_preferences(path: Option<&Path>) -> Result<InstallPreferences> {
    let Some(path) = path else {
        return Ok(InstallPreferences::default());
    };
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading preferences: {}", path.display()))?;
    InstallPreferences::from_toml_str(&raw)
        .with_context(|| format!("invalid preferences: {}", path.display()))
}

fn exit_code_for(outcome: InstallOutcome) -> u8 {
    match outcome {
        InstallOutcome::FirstInstallSuccess
        | InstallOutcome::InstallRepaired
        | InstallOutcome::NewVersionUpdated
        | InstallOutcome::InUseUpdated => 0,
        InstallOutcome::InstallFailed => 1,
        InstallOutcome::SameVersionRepairFailed => 3,
    }
}

#[cfg(test)]
mod tests;
