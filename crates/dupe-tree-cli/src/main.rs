mod commands;
mod logging;
mod progress;

use std::io::{self, Write};
use std::process;
use std::sync::atomic::Ordering;

use clap::{CommandFactory, Parser};
use colored::*;
use commands::{Cli, Commands};
use dotenv::dotenv;
use dupe_tree_core::{readable_state, AppConfig, Database, Error, NodeKind, ScanEngine};
use humansize::{format_size, BINARY};
use progress::CliReporter;
use tracing::{error, info, warn};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv().ok();

    let _guard = logging::init_logger();

    let config = match dupe_tree_core::config::load_configuration() {
        Ok(config) => config,
        Err(err) => {
            error!("Error loading configuration: {}", err);
            process::exit(1);
        }
    };

    let args = Cli::parse();

    let result = match args.command {
        Some(Commands::New { name, root }) => run_new(&config, &name, &root),
        Some(Commands::Process) => run_process(&config),
        Some(Commands::List) => run_list(&config),
        Some(Commands::Show { scan_id, json }) => run_show(&config, scan_id, json),
        Some(Commands::Dupes {
            scan_id,
            kind,
            limit,
        }) => run_dupes(&config, scan_id, kind.into(), limit),
        Some(Commands::DeleteScan { scan_id }) => run_delete_scan(&config, scan_id),
        Some(Commands::PrintConfig) => {
            println!("Configuration: {:?}", config);
            Ok(())
        }
        Some(Commands::TruncateDb) => run_truncate(&config),
        None => {
            let _ = Cli::command().print_long_help();
            Ok(())
        }
    };

    if let Err(err) = result {
        error!("Error: {}", err);
        process::exit(1);
    }

    Ok(())
}

fn human_bytes(bytes: i64) -> String {
    format_size(bytes.max(0) as u64, BINARY)
}

fn run_new(config: &AppConfig, name: &str, root: &str) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ScanEngine::new(config.clone());
    let scan_id = engine.create_scan(name, root)?;
    println!("New scan is created with id: {}", format!("{}", scan_id).green());
    Ok(())
}

fn run_process(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let engine = ScanEngine::new(config.clone());

    let cancel_token = engine.cancel_token();
    ctrlc::set_handler(move || {
        cancel_token.store(true, Ordering::SeqCst);
    })?;

    let reporter = CliReporter::new();
    let outcomes = match engine.process_pending_scans(&reporter) {
        Ok(outcomes) => outcomes,
        Err(Error::Cancelled) => {
            warn!("Received ctrl+c, stopped after the last completed phase");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    println!();
    for outcome in &outcomes {
        match &outcome.error {
            None => info!(
                "Scan {}: {} in {}",
                outcome.scan_id,
                readable_state(outcome.final_state).green(),
                format!("{:.2}s", outcome.duration.as_secs_f64()).green(),
            ),
            Some(message) => info!(
                "Scan {}: stopped at {}: {}",
                outcome.scan_id,
                readable_state(outcome.final_state).yellow(),
                message.red(),
            ),
        }
    }

    Ok(())
}

fn run_list(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.db_path)?;
    let scans = db.list_scans()?;
    if scans.is_empty() {
        println!("No scans yet");
        return Ok(());
    }

    println!(
        "{:>6}  {:<20} {:<26} {:>9} {:>9} {:>11}  {}",
        "ID", "NAME", "STATE", "FOLDERS", "FILES", "SIZE", "ROOT"
    );
    for scan in &scans {
        println!(
            "{:>6}  {:<20} {:<26} {:>9} {:>9} {:>11}  {}",
            scan.id,
            scan.name,
            readable_state(scan.state),
            scan.folder_count,
            scan.file_count,
            human_bytes(scan.total_size_in_bytes),
            scan.root_path
        );
    }
    Ok(())
}

fn run_show(config: &AppConfig, scan_id: i64, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.db_path)?;
    let details = db.scan_details(scan_id)?.ok_or(Error::ScanNotFound(scan_id))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&details)?);
        return Ok(());
    }

    let scan = &details.scan;
    println!("Scan {} '{}'", scan.id, scan.name.cyan());
    println!("  Root:    {}", scan.root_path);
    println!("  State:   {}", readable_state(scan.state));
    println!(
        "  Totals:  {} folders, {} files, {}",
        scan.folder_count,
        scan.file_count,
        human_bytes(scan.total_size_in_bytes)
    );
    for count in &details.counts {
        let state = format!("{:<22}", count.state.label());
        let state = if count.state.is_duplicate() {
            state.red()
        } else if !count.state.is_terminal() {
            state.yellow()
        } else {
            state.normal()
        };
        println!(
            "  {:<7} {} {:>9}  {}",
            count.kind,
            state,
            count.count,
            human_bytes(count.bytes)
        );
    }
    Ok(())
}

fn run_dupes(
    config: &AppConfig,
    scan_id: i64,
    kind: NodeKind,
    limit: i64,
) -> Result<(), Box<dyn std::error::Error>> {
    let db = Database::open(&config.db_path)?;
    let groups = db.duplicate_groups(scan_id, kind, 0, limit)?;
    if groups.is_empty() {
        println!("No duplicate {} groups in scan {}", kind.label().to_lowercase(), scan_id);
        return Ok(());
    }

    for group in &groups {
        println!(
            "{} x{} {} each, {} wasted",
            group.digest.to_hex()[..16].yellow(),
            group.member_count,
            human_bytes(group.size_in_bytes),
            human_bytes(group.wasted_bytes).red()
        );
        for member in db.group_members(scan_id, kind, &group.digest)? {
            println!("    {}", member.full_path);
        }
    }
    Ok(())
}

fn run_delete_scan(config: &AppConfig, scan_id: i64) -> Result<(), Box<dyn std::error::Error>> {
    if !prompt_confirm(
        &format!("Delete scan {} and all of its nodes?", scan_id),
        Some(false),
    )? {
        return Ok(());
    }
    let db = Database::open(&config.db_path)?;
    if db.delete_scan(scan_id)? {
        println!("Scan {} deleted", scan_id);
    } else {
        println!("Scan {} not found", scan_id);
    }
    Ok(())
}

fn run_truncate(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if !prompt_confirm(
        "Are you SURE you want to COMPLETELY DELETE the Database?",
        Some(false),
    )? {
        return Ok(());
    }
    let db = Database::open(&config.db_path)?;
    db.truncate_all()?;
    println!("All tables truncated");
    Ok(())
}

fn prompt_confirm(prompt: &str, default: Option<bool>) -> io::Result<bool> {
    let mut input = String::new();

    loop {
        input.clear();

        match default {
            Some(true) => print!("{} (Y/n): ", prompt),
            Some(false) | None => print!("{} (y/N): ", prompt),
        }
        io::stdout().flush()?;

        io::stdin().read_line(&mut input)?;

        match input.trim().to_uppercase().as_str() {
            "Y" => return Ok(true),
            "N" => return Ok(false),
            "" => match default {
                Some(default) => return Ok(default),
                None => continue,
            },
            _ => continue,
        }
    }
}
