use anyhow::{Result, anyhow};
use clap::ArgMatches;
use colored::Colorize;
use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracemap_core::explore::ExploreProgressCallback;
use tracemap_core::geo::ConfirmCallback;
use tracemap_core::model::{Graph, GraphSummary, IdentitySource, NodeGroup};
use tracemap_core::store::{GraphOrigin, GraphStore, MigrationAbort, StoredDocument};
use tracemap_core::{GraphError, SessionConfig, SessionOutcome, run_session};
use tracing::Level;

// Helper functions for argument parsing

/// Split a comma-separated target list, dropping blanks.
pub fn parse_targets(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse a comma-separated list of TCP ports
pub fn parse_ports(raw: &str) -> Result<Vec<u16>, String> {
    let mut ports = Vec::new();
    for part in raw.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.parse::<u16>() {
            Ok(0) | Err(_) => return Err(format!("Invalid TCP port '{}'", part)),
            Ok(port) if !ports.contains(&port) => ports.push(port),
            Ok(_) => {}
        }
    }

    if ports.is_empty() {
        return Err("No TCP ports given".to_string());
    }

    Ok(ports)
}

/// Interpret a reply to a yes/no prompt. `None` means ask again.
pub fn parse_answer(input: &str) -> Option<bool> {
    match input.trim().to_lowercase().as_str() {
        "y" | "yes" | "s" => Some(true),
        "n" | "no" => Some(false),
        _ => None,
    }
}

/// Keep asking until `reader` gives a recognisable answer. End of input declines.
pub fn read_confirmation<R: BufRead>(reader: &mut R, question: &str) -> bool {
    loop {
        print!("{} {} ", question.bright_cyan().bold(), "[y/n]:".bright_black());
        let _ = io::stdout().flush();

        let mut response = String::new();
        match reader.read_line(&mut response) {
            Ok(0) | Err(_) => {
                println!();
                return false;
            }
            Ok(_) => {}
        }

        match parse_answer(&response) {
            Some(answer) => return answer,
            None => println!("{} Please answer y or n", "→".yellow()),
        }
    }
}

/// Confirmation callback backed by the terminal.
pub fn terminal_confirm() -> ConfirmCallback {
    Arc::new(|question: &str| read_confirmation(&mut io::stdin().lock(), question))
}

/// Confirmation callback for `--yes`.
pub fn always_confirm() -> ConfirmCallback {
    Arc::new(|question: &str| {
        println!("{} {} {}", "→".blue(), question, "yes".green());
        true
    })
}

pub fn expand_graph_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Install the stderr log subscriber. `--quiet` wins over `-v`.
pub fn init_logging(verbosity: u8, quiet: bool) {
    let level = match (quiet, verbosity) {
        (true, _) => Level::WARN,
        (false, 0) => Level::INFO,
        (false, 1) => Level::DEBUG,
        (false, _) => Level::TRACE,
    };

    let _ = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_header(title: &str) {
    print_divider();
    println!("{}", format!("  {}", title).bright_white().bold());
    print_divider();
    println!();
}

fn session_config(args: &ArgMatches) -> SessionConfig {
    let graph = args
        .get_one::<String>("graph")
        .map(String::as_str)
        .unwrap_or(tracemap_core::store::DEFAULT_GRAPH_PATH);

    SessionConfig {
        graph_path: expand_graph_path(graph),
        show_progress_bars: !args.get_flag("no-progress"),
        ..Default::default()
    }
}

fn confirm_callback(args: &ArgMatches) -> ConfirmCallback {
    if args.get_flag("yes") {
        always_confirm()
    } else {
        terminal_confirm()
    }
}

pub async fn handle_explore(args: &ArgMatches) -> Result<()> {
    let mut config = session_config(args);

    if let Some(raw) = args.get_one::<String>("targets") {
        config.targets = parse_targets(raw);
        if config.targets.is_empty() {
            return Err(anyhow!("--targets was given but contains no targets"));
        }
    }
    if let Some(raw) = args.get_one::<String>("tcp") {
        config.tcp_ports = parse_ports(raw).map_err(|e| anyhow!(e))?;
    }
    if let Some(queries) = args.get_one::<u32>("queries") {
        config.queries = *queries;
    }
    if let Some(program) = args.get_one::<String>("traceroute") {
        config.probe_program = program.clone();
    }
    if let Some(timeout) = args.get_one::<u64>("timeout") {
        config.probe_timeout_secs = *timeout;
    }
    config.icmp = args.get_flag("icmp");

    print_header("TRACEMAP EXPLORE");
    println!(
        "{} Graph: {}",
        "→".blue(),
        config.graph_path.display().to_string().bright_white()
    );
    if config.targets.is_empty() {
        println!("{} No targets given; cataloguing only", "→".blue());
    } else {
        println!(
            "{} Targets: {}",
            "→".blue(),
            config.targets.join(", ").bright_white()
        );
        let mut variants = vec!["UDP".to_string()];
        if config.icmp {
            variants.push("ICMP".to_string());
        }
        variants.extend(config.tcp_ports.iter().map(|p| format!("TCP:{}", p)));
        println!(
            "{} Protocols: {} ({} quer{} per hop)",
            "→".blue(),
            variants.join(", ").bright_white(),
            config.queries.max(1),
            if config.queries > 1 { "ies" } else { "y" }
        );
    }
    println!();

    let graph_path = config.graph_path.clone();
    let progress_callback: ExploreProgressCallback = Arc::new(|msg: String| {
        println!("{} {}", "→".blue(), msg);
    });

    let outcome = run_session(config, confirm_callback(args), Some(progress_callback)).await?;
    report_outcome(outcome, &graph_path);
    Ok(())
}

pub async fn handle_catalog(args: &ArgMatches) -> Result<()> {
    let config = session_config(args);

    print_header("TRACEMAP CATALOG");
    println!(
        "{} Graph: {}",
        "→".blue(),
        config.graph_path.display().to_string().bright_white()
    );
    println!();

    let graph_path = config.graph_path.clone();
    let outcome = run_session(config, confirm_callback(args), None).await?;
    report_outcome(outcome, &graph_path);
    Ok(())
}

pub fn handle_show(args: &ArgMatches) -> Result<()> {
    let raw = args
        .get_one::<String>("graph")
        .map(String::as_str)
        .unwrap_or(tracemap_core::store::DEFAULT_GRAPH_PATH);
    show_graph(&expand_graph_path(raw))
}

/// Print the summary of the graph file at `path`. A corrupt file is reported,
/// not treated as an error; only an unreadable one fails.
pub fn show_graph(path: &Path) -> Result<()> {
    let store = GraphStore::new(path);

    print_header("TRACEMAP GRAPH");

    let document = match store.read_document() {
        Ok(document) => document,
        Err(e @ (GraphError::JsonError(_) | GraphError::Malformed(_))) => {
            println!(
                "{} {} is corrupt and can't be read ({})",
                "⚠".yellow().bold(),
                store.path().display().to_string().bright_white(),
                e
            );
            println!("The next explore or catalog run will start a new graph in its place.");
            println!();
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    match document {
        None => {
            println!(
                "{} No graph at {}",
                "✗".red().bold(),
                store.path().display().to_string().bright_white()
            );
        }
        Some(StoredDocument::Legacy { version, .. }) => {
            println!(
                "{} {} is a legacy graph (version {})",
                "⚠".yellow().bold(),
                store.path().display().to_string().bright_white(),
                version.as_deref().unwrap_or("unknown").yellow()
            );
            println!("Run `tracemap catalog` to migrate it.");
        }
        Some(StoredDocument::Current(document)) => {
            let timestamp = document.timestamp.clone();
            let graph = document.into_graph();
            println!(
                "{} {}",
                "✓".green().bold(),
                store.path().display().to_string().bright_white()
            );
            if let Some(ts) = timestamp {
                println!("{} Last saved: {}", "→".blue(), ts);
            }
            println!();
            print_summary(&graph.summary());
            print_explorers(&graph);
        }
    }
    println!();
    Ok(())
}

fn report_outcome(outcome: SessionOutcome, graph_path: &Path) {
    println!();
    match outcome {
        SessionOutcome::Saved {
            origin,
            identity,
            catalogued,
            exploration,
            summary,
        } => {
            match origin {
                GraphOrigin::New => println!("{} Started a new graph", "✓".green().bold()),
                GraphOrigin::Existing => println!("{} Extended the existing graph", "✓".green().bold()),
                GraphOrigin::Recovered => println!(
                    "{} The graph file was unreadable and has been replaced",
                    "⚠".yellow().bold()
                ),
                GraphOrigin::Migrated { from_version } => println!(
                    "{} Migrated graph from version {}",
                    "✓".green().bold(),
                    from_version.as_deref().unwrap_or("unknown")
                ),
            }

            if identity.is_anonymous() {
                println!(
                    "{} Explorer: {} {}",
                    "⚠".yellow().bold(),
                    identity.id.bright_white(),
                    "(anonymous, public address unavailable)".yellow()
                );
            } else {
                println!("{} Explorer: {}", "✓".green().bold(), identity.id.bright_white());
            }

            if !catalogued {
                println!(
                    "{} Cataloguing skipped; no targets were probed",
                    "→".yellow().bold()
                );
            }

            if let Some(exploration) = exploration {
                println!(
                    "{} Probed {} target(s) with {} run(s), {} without results",
                    "✓".green().bold(),
                    exploration.targets,
                    exploration.tasks_run,
                    exploration.tasks_empty
                );
                println!(
                    "  {} new nodes, {} new edges, {} latency samples",
                    exploration.stats.nodes_added.to_string().cyan(),
                    exploration.stats.edges_added.to_string().cyan(),
                    exploration.stats.latencies_recorded.to_string().cyan()
                );
            }

            println!();
            print_summary(&summary);
            println!(
                "{} Saved to {}",
                "✓".green().bold(),
                graph_path.display().to_string().bright_white()
            );
        }
        SessionOutcome::LegacyDeclined { version } => {
            println!(
                "{} Graph version {} is incompatible and was not migrated; nothing was changed.",
                "✗".red().bold(),
                version.as_deref().unwrap_or("unknown")
            );
        }
        SessionOutcome::MigrationAborted(MigrationAbort::Unrecognized) => {
            println!(
                "{} The legacy graph could not be read; nothing was changed.",
                "✗".red().bold()
            );
        }
        SessionOutcome::MigrationAborted(MigrationAbort::CatalogDeclined) => {
            println!(
                "{} Migration needs cataloguing and was cancelled; nothing was changed.",
                "✗".red().bold()
            );
        }
    }
    println!();
}

fn print_summary(summary: &GraphSummary) {
    println!("{}", "SUMMARY".bright_blue().bold());
    println!("  Nodes: {}", summary.nodes.to_string().cyan());
    for (group, count) in &summary.by_group {
        let name = if *group == NodeGroup::Unset {
            "other"
        } else {
            group.as_str()
        };
        println!("    {} {}: {}", "•".blue(), name, count);
    }
    println!("  Edges: {}", summary.edges.to_string().cyan());
    println!("  Latency samples: {}", summary.latency_samples.to_string().cyan());
    println!("  Catalogued nodes: {}", summary.catalogued.to_string().cyan());
    println!("  Explorers: {}", summary.explorers.to_string().cyan());
    println!();
}

fn print_explorers(graph: &Graph) {
    if graph.explorers.is_empty() {
        return;
    }
    println!("{}", "EXPLORERS".bright_blue().bold());
    for explorer in graph.explorers.values() {
        let source = match explorer.source {
            Some(IdentitySource::Network) => "network",
            Some(IdentitySource::Anonymous) => "anonymous",
            None => "unknown",
        };
        println!(
            "  {} {} ({}, first seen {})",
            "•".blue(),
            explorer.id.bright_white(),
            source,
            explorer.first_seen
        );
    }
}
