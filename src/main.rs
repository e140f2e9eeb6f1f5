use clap::Parser;
use gwsi_processor::cli::{args::Args, commands};
use std::process;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

fn main() {
    let args = Args::parse();

    let Some(command) = args.command else {
        show_help_and_commands();
        process::exit(0);
    };

    let runtime = tokio::runtime::Runtime::new().unwrap_or_else(|e| {
        eprintln!("Failed to create async runtime: {}", e);
        process::exit(1);
    });

    let result = runtime.block_on(async {
        // The pipeline checks the flag before every store call
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("\nReceived CTRL+C, stopping after the current store call...");
                flag.store(true, Ordering::SeqCst);
            }
        });

        commands::run(command, cancelled).await
    });

    if let Err(error) = result {
        eprintln!("Error: {:#}", error);
        process::exit(1);
    }
}

/// Show help information and available commands when no subcommand is provided
fn show_help_and_commands() {
    println!("GWSI Processor - Groundwater Site Inventory Loader");
    println!("==================================================");
    println!();
    println!("Load GWSI tables and site geometry into a PostGIS");
    println!("locations/parameters/observations schema.");
    println!();
    println!("USAGE:");
    println!("    gwsi-processor <COMMAND> [OPTIONS]");
    println!();
    println!("COMMANDS:");
    println!("    load        Load a data directory into the database");
    println!("    classify    Show how each table would be classified");
    println!("    help        Show this help message or help for specific commands");
    println!();
    println!("EXAMPLES:");
    println!("    # Load using POSTGRES_* credentials from the environment or .env:");
    println!("    gwsi-processor load --data-dir Data_Tables --geometry Shape");
    println!();
    println!("    # Preview a load without a database:");
    println!("    gwsi-processor load --dry-run --snapshot locations.parquet");
    println!();
    println!("    # Get help for specific commands:");
    println!("    gwsi-processor load --help");
}
