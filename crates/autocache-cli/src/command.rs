use anyhow::{bail, Context, Result};
use colored::*;
use std::sync::Arc;
use tracing::info;

use autocache::{
    classify_dialog, confirm_if_safe, positive_candidates, screen_channel, AutoCacheConfig,
    BatchEvent, BatchSummary, CacheCleaner, ConfirmOutcome, MemoryTree, Scenario,
    SimulatedDevice,
};

use crate::cli::{CheckDialogArgs, OutputFormat, SimulateArgs};
use crate::utils::load_tree;

pub async fn handle_simulate(config: AutoCacheConfig, args: SimulateArgs) -> Result<()> {
    let scenario = Scenario::from_path(&args.scenario)
        .with_context(|| format!("Failed to load scenario {}", args.scenario.display()))?;
    let targets = if args.targets.is_empty() {
        scenario.apps.keys().cloned().collect()
    } else {
        args.targets
    };
    if targets.is_empty() {
        bail!("No targets given and the scenario defines no apps");
    }

    let (screen_tx, screen_rx) = screen_channel();
    let device = SimulatedDevice::new(scenario, screen_tx);
    let mut cleaner = CacheCleaner::spawn(
        config,
        Arc::new(device.clone()),
        Arc::new(device.clone()),
        screen_rx,
    )?;

    info!("Clearing cache for {} target(s)", targets.len());
    cleaner.start(targets)?;

    let mut summary = None;
    while let Some(event) = cleaner.next_event().await {
        match args.output {
            OutputFormat::Json => println!("{}", serde_json::to_string(&event)?),
            OutputFormat::Text => print_event(&event),
        }
        match event {
            BatchEvent::Finished { summary: s } => {
                summary = Some(s);
                break;
            }
            BatchEvent::Cancelled { .. } => break,
            _ => {}
        }
    }
    cleaner.shutdown().await;

    if args.output == OutputFormat::Text {
        for notice in device.notices() {
            println!("  {} {}", "notice:".yellow(), notice.text);
        }
        if let Some(summary) = &summary {
            print_summary(summary);
        }
    }
    Ok(())
}

fn print_event(event: &BatchEvent) {
    match event {
        BatchEvent::Started { total, .. } => {
            println!("{} {total} target(s)", "▶ Starting batch:".bold())
        }
        BatchEvent::TargetArmed {
            target,
            position,
            total,
            ..
        } => println!("  [{position}/{total}] {target}"),
        BatchEvent::TargetCompleted { target, .. } => {
            println!("  {} {target}", "✓".green())
        }
        BatchEvent::TargetSkipped { target, reason, .. } => {
            println!("  {} {target}: {reason}", "✗".red())
        }
        BatchEvent::Finished { .. } => {}
        BatchEvent::Cancelled { dropped, .. } => {
            println!("{} ({dropped} dropped)", "Batch cancelled".yellow())
        }
    }
}

fn print_summary(summary: &BatchSummary) {
    let line = format!(
        "Done: {} completed, {} skipped in {:.1}s",
        summary.completed.len(),
        summary.skipped.len(),
        summary.elapsed_ms as f64 / 1000.0
    );
    if summary.skipped.is_empty() {
        println!("{}", line.bold().green());
    } else {
        println!("{}", line.bold().yellow());
    }
}

pub fn handle_check_dialog(config: &AutoCacheConfig, args: CheckDialogArgs) -> Result<()> {
    let root = load_tree(&args.tree)?;
    // Clicks on a MemoryTree are only recorded, so this is a dry run
    let tree = MemoryTree::new(&root);
    let labels = &config.automation.labels;

    let mentions = classify_dialog(&tree, tree.root());
    println!(
        "Mentions: cache={} data={} storage={} -> {:?}",
        mentions.cache,
        mentions.data,
        mentions.storage,
        mentions.kind()
    );
    println!(
        "Positive candidates: {}",
        positive_candidates(&tree, labels).len()
    );

    match confirm_if_safe(&tree, labels) {
        ConfirmOutcome::Confirmed { button, kind } => {
            let label = tree.display_label(button).unwrap_or_default();
            println!(
                "{} would press '{label}' ({kind:?})",
                "CONFIRM".bold().green()
            );
        }
        ConfirmOutcome::Abstained { candidates } => println!(
            "{} {candidates} candidate(s), none in a safe dialog",
            "LEAVE OPEN".bold().yellow()
        ),
        ConfirmOutcome::NoCandidates => {
            println!("{} no positive button found", "NO DIALOG".bold())
        }
    }
    Ok(())
}

pub fn handle_show_config(config: &AutoCacheConfig) -> Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}
