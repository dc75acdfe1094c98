//! Command handlers for zonedrillctl

use crate::cli::{Cli, Commands, PollArgs};
use crate::errors::{exit_code_for_outcome, EXIT_SUCCESS};
use crate::logging;
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use zonedrill_common::config::PollSettings;
use zonedrill_common::drill::snapshotter;
use zonedrill_common::notify;
use zonedrill_common::providers::{FakeScheduler, HttpSchedulerClient};
use zonedrill_common::{
    CancelToken, ConvergenceOutcome, DrillConfig, DrillController, DrillReport,
    FileSnapshotStore, MemorySnapshotStore, PersistedSnapshot, PollConfig, ServiceKey,
    SnapshotStore,
};

/// Upper bound on waiting for result notifications before exiting
const NOTIFY_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Parse-independent entry point; returns the process exit code
pub async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(&cli)?;
    logging::init(&config.log.level, cli.verbose);

    match &cli.command {
        Commands::Failover {
            cluster,
            service,
            region,
            az,
            poll,
        } => {
            let key = ServiceKey::new(cluster.as_str(), service.as_str());
            let drill = build_controller(&cli, &config, poll, &key, region)?;
            let cancel = cancel_on_ctrl_c();
            let result = drill.failover(&key, &az.as_str().into(), &cancel).await;
            drill.flush_notifications(NOTIFY_FLUSH_TIMEOUT).await;
            let report = result?;
            print_report(&report, cli.json)?;
            Ok(exit_code_for_outcome(&report.outcome))
        }
        Commands::Restore {
            cluster,
            service,
            region,
            poll,
        } => {
            let key = ServiceKey::new(cluster.as_str(), service.as_str());
            let drill = build_controller(&cli, &config, poll, &key, region)?;
            let cancel = cancel_on_ctrl_c();
            let result = drill.restore(&key, &cancel).await;
            drill.flush_notifications(NOTIFY_FLUSH_TIMEOUT).await;
            let report = result?;
            print_report(&report, cli.json)?;
            Ok(exit_code_for_outcome(&report.outcome))
        }
        Commands::Status { cluster, service } => {
            let store = FileSnapshotStore::new(&config.snapshots.dir);
            let snapshots = select_snapshots(
                store.list()?,
                cluster.as_deref(),
                service.as_deref(),
            );
            print_snapshots(&snapshots, cli.json)?;
            Ok(EXIT_SUCCESS)
        }
        Commands::Discard { cluster, service } => {
            let key = ServiceKey::new(cluster.as_str(), service.as_str());
            let store = FileSnapshotStore::new(&config.snapshots.dir);
            if snapshotter::discard(&store, &key)? {
                println!("Discarded snapshot for {}", key);
            } else {
                println!("No snapshot saved for {}", key);
            }
            Ok(EXIT_SUCCESS)
        }
    }
}

/// Config file with global CLI overrides applied
pub fn load_config(cli: &Cli) -> Result<DrillConfig> {
    let mut config = DrillConfig::load(cli.config.as_deref())?;
    if let Some(endpoint) = &cli.endpoint {
        config.api.endpoint = endpoint.clone();
    }
    if let Some(dir) = &cli.snapshot_dir {
        config.snapshots.dir = dir.clone();
    }
    Ok(config)
}

pub fn apply_poll_overrides(settings: &mut PollSettings, args: &PollArgs) {
    if let Some(deadline) = args.deadline {
        settings.deadline_secs = deadline;
    }
    if let Some(interval) = args.interval {
        settings.base_interval_secs = interval;
    }
    if let Some(max_ticks) = args.max_ticks {
        settings.max_ticks = Some(max_ticks);
    }
}

fn build_controller(
    cli: &Cli,
    config: &DrillConfig,
    poll: &PollArgs,
    key: &ServiceKey,
    region: &str,
) -> Result<DrillController> {
    let mut settings = config.poll.clone();
    apply_poll_overrides(&mut settings, poll);
    if settings.was_clamped() {
        warn!("Poll settings out of range were clamped");
    }

    let mut drill = if cli.simulate {
        info!(region, "Simulating against an in-memory scheduler");
        let fake = simulated_scheduler(key, region);
        DrillController::new(
            Arc::new(fake.clone()),
            Arc::new(fake),
            Arc::new(MemorySnapshotStore::new()),
            region,
        )
    } else {
        let client = Arc::new(
            HttpSchedulerClient::new(&config.api, region)
                .with_context(|| format!("cannot reach scheduler at {}", config.api.endpoint))?,
        );
        DrillController::new(
            client.clone(),
            client,
            Arc::new(FileSnapshotStore::new(&config.snapshots.dir)),
            region,
        )
    }
    .with_poll_config(PollConfig::from_settings(&settings));

    if let Some(notifier) = notify::from_settings(&config.notify) {
        drill = drill.with_notifier(notifier, &config.notify.subject_prefix);
    }
    Ok(drill)
}

/// Three zones, two instances per zone, converging one tick after a change
pub fn simulated_scheduler(key: &ServiceKey, region: &str) -> FakeScheduler {
    let zones = ["a", "b", "c"];
    let subnets: Vec<String> = zones.iter().map(|z| format!("subnet-{}", z)).collect();
    let subnet_refs: Vec<&str> = subnets.iter().map(String::as_str).collect();
    let placed: Vec<&str> = subnet_refs.iter().flat_map(|s| [*s, *s]).collect();

    let mut builder = FakeScheduler::builder();
    for (zone, subnet) in zones.iter().zip(&subnets) {
        builder = builder.subnet(subnet, &format!("{}{}", region, zone));
    }
    builder
        .service(key.clone(), placed.len() as u32, &subnet_refs, &["sg-simulated"], &placed)
        .settle_after(1)
        .build()
}

fn cancel_on_ctrl_c() -> CancelToken {
    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping after the current tick");
            trigger.cancel();
        }
    });
    cancel
}

pub fn select_snapshots(
    snapshots: Vec<PersistedSnapshot>,
    cluster: Option<&str>,
    service: Option<&str>,
) -> Vec<PersistedSnapshot> {
    snapshots
        .into_iter()
        .filter(|s| cluster.map_or(true, |c| s.cluster == c))
        .filter(|s| service.map_or(true, |name| s.service == name))
        .collect()
}

fn print_report(report: &DrillReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    let kw = 12;
    println!();
    println!(
        "{} {} ({})",
        report.operation.as_str().bold(),
        report.key.to_string().bold(),
        report.region
    );

    let outcome = format!(
        "{} after {} tick(s), {}s",
        report.outcome.as_str(),
        report.outcome.ticks(),
        report.duration_secs()
    );
    let outcome = match &report.outcome {
        ConvergenceOutcome::Converged { .. } => outcome.green().to_string(),
        ConvergenceOutcome::TimedOut { .. } => outcome.red().to_string(),
        ConvergenceOutcome::Cancelled { .. } => outcome.yellow().to_string(),
    };
    print_kv("outcome", &outcome, kw);

    if let Some(plan) = &report.plan {
        print_kv(
            "excluded",
            &format!(
                "{} ({} of {} subnets)",
                plan.excluded_az,
                plan.excluded_subnets().len(),
                plan.original_subnets.len()
            ),
            kw,
        );
    }
    print_kv("target", &join(report.target_subnets.iter()), kw);

    if let Some(eviction) = &report.eviction {
        print_kv(
            "evicted",
            &format!(
                "{} ({} unresolved, {} failed)",
                eviction.count(),
                eviction.skipped_unresolved.len(),
                eviction.stop_failed.len()
            ),
            kw,
        );
    }

    if let ConvergenceOutcome::TimedOut {
        pending: Some(pending),
        ..
    } = &report.outcome
    {
        print_kv("pending", &pending.summary(), kw);
    }

    let placements = report.placements();
    if !placements.is_empty() {
        println!();
        println!("  {:<20} {:<24} {}", "INSTANCE".dimmed(), "SUBNET".dimmed(), "AZ".dimmed());
        for record in placements {
            println!(
                "  {:<20} {:<24} {}",
                record.instance_id, record.resolved_subnet, record.resolved_az
            );
        }
    }
    println!();
    Ok(())
}

fn print_snapshots(snapshots: &[PersistedSnapshot], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(snapshots)?);
        return Ok(());
    }
    if snapshots.is_empty() {
        println!("No saved snapshots");
        return Ok(());
    }

    println!(
        "{:<32} {:<14} {:<10} {:<12} {}",
        "SERVICE".dimmed(),
        "REGION".dimmed(),
        "EXCLUDED".dimmed(),
        "CAPTURED".dimmed(),
        "STATE".dimmed()
    );
    for snapshot in snapshots {
        let state = if snapshot.is_consumed() {
            "restored".dimmed().to_string()
        } else {
            "awaiting restore".yellow().to_string()
        };
        println!(
            "{:<32} {:<14} {:<10} {:<12} {}",
            snapshot.key().to_string(),
            snapshot.region,
            snapshot
                .excluded_az
                .as_ref()
                .map(|az| az.to_string())
                .unwrap_or_else(|| "-".to_string()),
            snapshot.format_age(),
            state
        );
        println!("  subnets: {}", join(snapshot.subnets.iter()));
    }
    Ok(())
}

fn print_kv(key: &str, value: &str, width: usize) {
    println!("  {:width$} {}", key, value, width = width);
}

fn join<T: std::fmt::Display>(items: impl Iterator<Item = T>) -> String {
    items.map(|i| i.to_string()).collect::<Vec<_>>().join(", ")
}
