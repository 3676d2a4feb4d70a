//! tracker-report: summarize a saved tracking record.
//!
//! Prints the per-part detection aggregate of a tracking record JSON file,
//! with the migration stage and pending quantity of every detected part and
//! the actual parts entered by hand.
//!
//! Usage: `tracker-report [--config <file>] <record.json>`

use std::path::PathBuf;
use std::process::ExitCode;

use part_tracker::config::TrackerConfig;
use part_tracker::migration::MigrationState;
use part_tracker::model::TrackingRecord;
use part_tracker::parts::ActualPartsList;
use part_tracker::service::decode_json;
use part_tracker::{PartStage, TrackerError, aggregate};

struct Args {
    config: Option<PathBuf>,
    record: PathBuf,
}

fn parse_args() -> Option<Args> {
    let mut config = None;
    let mut record = None;
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => config = Some(PathBuf::from(args.next()?)),
            _ if record.is_none() => record = Some(PathBuf::from(arg)),
            _ => return None,
        }
    }
    Some(Args {
        config,
        record: record?,
    })
}

fn load_config(path: Option<&PathBuf>) -> TrackerConfig {
    match path {
        Some(path) => TrackerConfig::load(path).unwrap_or_else(|e| {
            eprintln!("Ignoring config {}: {}", path.display(), e);
            TrackerConfig::default()
        }),
        None => TrackerConfig::load_or_default(),
    }
}

fn report(record: TrackingRecord) {
    let results = record.results();
    let parts = ActualPartsList::from_parts(record.actual_parts.clone().unwrap_or_default());
    let agg = aggregate(results, None);
    let mut migration = MigrationState::new();
    migration.reconcile(&agg, &parts);

    println!(
        "{} / {} ({} views, {} detected parts, {} actual parts)",
        record.switchboard_name,
        record.compartment_number,
        results.len(),
        agg.len(),
        parts.len()
    );
    println!();
    println!("{:<28} {:>6} {:>8}  {:<10} views", "part", "total", "pending", "stage");
    for part in agg.ordered(migration.migrated()) {
        let stage = match migration.stage(&part.name, &agg) {
            PartStage::Migrated => "migrated",
            PartStage::Detected => "detected",
            PartStage::Undetected => "-",
        };
        let views: Vec<String> = part
            .by_view
            .iter()
            .map(|b| format!("{}:{}", b.view, b.qty))
            .collect();
        println!(
            "{:<28} {:>6} {:>8}  {:<10} {}{}",
            part.name,
            part.total_detected,
            migration.pending_qty(&part.name).unwrap_or_default(),
            stage,
            views.join(" "),
            if part.is_multi_view { "  (multi-view)" } else { "" }
        );
    }

    let manual: Vec<_> = parts
        .parts()
        .iter()
        .filter(|p| !agg.contains(&p.material))
        .collect();
    if !manual.is_empty() {
        println!();
        println!("Entered by hand:");
        for part in manual {
            println!("  {:<26} {:>6}", part.material, part.qty);
        }
    }
}

fn run(args: &Args) -> Result<(), TrackerError> {
    let json = std::fs::read_to_string(&args.record)?;
    let record: TrackingRecord = decode_json(&json)?;
    log::debug!("Read tracking record {} from {:?}", record.id, args.record);
    report(record);
    Ok(())
}

fn main() -> ExitCode {
    let Some(args) = parse_args() else {
        eprintln!("Usage: tracker-report [--config <file>] <record.json>");
        return ExitCode::from(2);
    };

    let config = load_config(args.config.as_ref());
    env_logger::Builder::new()
        .filter_level(config.log_level.to_level_filter())
        .parse_default_env()
        .init();

    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
