//! magescope - Script injection and tampering auditor.
//!
//! CLI entry point.

use clap::Parser;
use magescope::{reports_to_json, Commands, Config, ScanConfig, Scanner, SetupConfig};
use std::fs;
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::parse();

    let debug = config.verbose || matches!(&config.command, Commands::Scan(scan) if scan.debug);
    let filter = if debug {
        EnvFilter::new("magescope=debug,info")
    } else {
        EnvFilter::new("magescope=info,warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let outcome = match config.command.clone() {
        Commands::Scan(scan_config) => run_scan(scan_config, config.verbose).await,
        Commands::Setup(setup_config) => run_setup(setup_config).await,
    };

    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => code,
    }
}

async fn run_scan(scan_config: ScanConfig, verbose: bool) -> Result<(), ExitCode> {
    let targets = match scan_config.load_targets() {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to load targets: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if targets.is_empty() {
        error!("No targets specified. Use positional arguments or -f <file>.");
        return Err(ExitCode::FAILURE);
    }

    let scanner = match Scanner::new(&scan_config, verbose) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to create scanner: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if !scan_config.json {
        print_banner();
    }

    let reports = scanner.scan_multiple(targets).await;

    let json = match reports_to_json(&reports) {
        Ok(json) => json,
        Err(e) => {
            error!("Failed to serialize reports: {}", e);
            return Err(ExitCode::FAILURE);
        }
    };

    if let Some(ref output_path) = scan_config.outfile {
        if let Err(e) = fs::write(output_path, &json) {
            error!("Failed to write output file: {}", e);
            return Err(ExitCode::FAILURE);
        }
        info!("Data written to file {:?}", output_path);
    } else if scan_config.json {
        println!("{}", json);
    }

    Ok(())
}

async fn run_setup(setup_config: SetupConfig) -> Result<(), ExitCode> {
    eprintln!("Setting up Chromium browser...");
    match magescope::browser::download_chrome(setup_config.force).await {
        Ok(path) => {
            eprintln!("Chromium ready at: {}", path.display());
            Ok(())
        }
        Err(e) => {
            error!("Setup failed: {}", e);
            Err(ExitCode::FAILURE)
        }
    }
}

fn print_banner() {
    println!();
    println!("\x1b[36m╔══════════════════════════════════════════════════════════════╗\x1b[0m");
    println!("\x1b[36m║                    MAGESCOPE v0.1.0                          ║\x1b[0m");
    println!("\x1b[36m║        Static markup vs. rendered DOM script audit           ║\x1b[0m");
    println!("\x1b[36m╚══════════════════════════════════════════════════════════════╝\x1b[0m");
    println!();
}
