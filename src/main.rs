mod config;
mod error;
mod extract;
mod graph;
mod model;
mod pipeline;
mod repair;
mod report;
mod resolve;
mod scan;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use config::{Config, DEFAULT_CONFIG_FILE};
use error::RefgraphError;
use extract::Extractor;
use graph::{Hotspot, Ranked};
use pipeline::Analysis;
use rayon::ThreadPool;
use repair::{FixLog, Repairer};
use report::ValidationReport;
use resolve::Resolver;
use serde::Serialize;
use std::env;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Instant;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// refgraph - Cross-reference analyzer and repairer for markdown corpora
#[derive(Parser)]
#[command(name = "refgraph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path (relative paths are resolved against the corpus root)
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    /// Quiet mode - suppress non-essential output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Print machine-readable JSON instead of tables
    #[arg(long, global = true)]
    json: bool,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

/// Options shared by every command
#[derive(Args, Debug, Clone)]
struct RunOptions {
    /// Corpus root
    #[arg(default_value = ".")]
    root: PathBuf,

    /// Extra relocation table (YAML, or TOML by extension)
    #[arg(short, long)]
    relocations: Option<PathBuf>,

    /// Worker threads (0 = one per CPU)
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Rows in centrality tables
    #[arg(long)]
    top: Option<usize>,

    /// Report directory, relative to the root
    #[arg(long)]
    report_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate references and write the validation report
    Scan {
        #[command(flatten)]
        run: RunOptions,

        /// Print results without writing report files
        #[arg(long)]
        no_write: bool,
    },

    /// Repair broken references that have an unambiguous fix
    Fix {
        #[command(flatten)]
        run: RunOptions,

        /// Show intended changes without touching any file
        #[arg(long)]
        dry_run: bool,
    },

    /// Print cycles and centrality tables
    Graph {
        #[command(flatten)]
        run: RunOptions,
    },
}

#[derive(Clone, Copy)]
struct Output {
    quiet: bool,
    json: bool,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let output = Output {
        quiet: cli.quiet,
        json: cli.json,
    };

    let result = match &cli.command {
        Commands::Scan { run, no_write } => cmd_scan(&cli.config, run, *no_write, output),
        Commands::Fix { run, dry_run } => cmd_fix(&cli.config, run, *dry_run, output),
        Commands::Graph { run } => cmd_graph(&cli.config, run, output),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(e) => {
            eprintln!("{}: {:#}", "error".red().bold(), e);
            ExitCode::from(2)
        }
    }
}

fn init_tracing(verbose: bool) {
    let filter = EnvFilter::try_from_env("REFGRAPH_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "refgraph=debug,info" } else { "warn" })
    });

    let format = env::var("REFGRAPH_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());
    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry
                .with(fmt::layer().json().with_ansi(false).with_writer(std::io::stderr))
                .init();
        }
        _ => {
            registry
                .with(fmt::layer().compact().with_writer(std::io::stderr))
                .init();
        }
    }
}

/// Resolved settings and shared resources for one command
struct Session {
    root: PathBuf,
    config: Config,
    extractor: Extractor,
    pool: ThreadPool,
}

impl Session {
    fn open(config_path: &Path, run: &RunOptions) -> anyhow::Result<Self> {
        if !run.root.is_dir() {
            return Err(RefgraphError::InvalidRoot(run.root.clone()).into());
        }
        let root = run.root.clone();

        let config_path = if config_path.is_absolute() {
            config_path.to_path_buf()
        } else {
            root.join(config_path)
        };
        let mut config = Config::load(&config_path)?;

        if let Some(path) = &run.relocations {
            config.merge_relocations_file(path)?;
        }
        if let Some(top) = run.top {
            config.top = top;
        }
        if let Some(jobs) = run.jobs {
            config.jobs = jobs;
        }
        if let Some(dir) = &run.report_dir {
            config.report_dir = dir.clone();
        }

        let extractor = Extractor::new(&config.attribute_names, &config.tag_names)
            .context("invalid attribute or tag name in config")?;
        let pool = scan::worker_pool(config.jobs)?;

        Ok(Session {
            root,
            config,
            extractor,
            pool,
        })
    }

    fn analyze(&self) -> anyhow::Result<Analysis> {
        let analysis = pipeline::analyze(&self.root, &self.config, &self.extractor, &self.pool)
            .with_context(|| format!("failed to analyze {}", self.root.display()))?;
        Ok(analysis)
    }

    fn plan(&self, analysis: &Analysis) -> Vec<model::FixCandidate> {
        let resolver = Resolver::new(&self.root);
        let repairer = Repairer::new(
            &resolver,
            &self.extractor,
            &analysis.basename_index,
            &self.config.relocations,
        );
        repairer.plan(&analysis.edges)
    }

    fn report_dir(&self) -> PathBuf {
        self.config.report_dir_in(&self.root)
    }
}

fn cmd_scan(config_path: &Path, run: &RunOptions, no_write: bool, output: Output) -> anyhow::Result<bool> {
    let start = Instant::now();
    let session = Session::open(config_path, run)?;

    if !output.quiet && !output.json {
        println!("{} {}", "Scanning".cyan().bold(), session.root.display());
    }

    let analysis = session.analyze()?;
    let suggestions = session.plan(&analysis);
    let report = ValidationReport::build(&analysis, &suggestions, None, session.config.top);

    if !no_write {
        let dir = session.report_dir();
        let (json_path, md_path) = report::write_reports(&dir, &report)
            .with_context(|| format!("failed to write reports to {}", dir.display()))?;
        if !output.quiet && !output.json {
            println!(
                "{} {}, {}",
                "Reports written to".green(),
                json_path.display().to_string().cyan(),
                md_path.display().to_string().cyan()
            );
        }
    }

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, output.quiet);
        if !output.quiet {
            print_broken(&report);
            print_suggestions(&report);
            println!("\nCompleted in {:.2}s", start.elapsed().as_secs_f64());
        }
    }

    Ok(analysis.broken_count() == 0)
}

fn cmd_fix(config_path: &Path, run: &RunOptions, dry_run: bool, output: Output) -> anyhow::Result<bool> {
    let session = Session::open(config_path, run)?;

    if !output.quiet && !output.json {
        let verb = if dry_run { "Planning fixes for" } else { "Fixing" };
        println!("{} {}", verb.cyan().bold(), session.root.display());
    }

    let before = session.analyze()?;
    let plan = session.plan(&before);
    let log = repair::apply(&plan, &session.root, &session.pool, dry_run);

    if dry_run {
        // Nothing changed on disk, so the pre-fix state stands
        if output.json {
            println!("{}", serde_json::to_string_pretty(&log)?);
        } else {
            print_fix_log(&log, output.quiet);
        }
        return Ok(before.broken_count() == 0);
    }

    // Re-run everything to confirm the fixes converged
    let after = session.analyze()?;
    let remaining = session.plan(&after);
    let report = ValidationReport::build(&after, &remaining, Some(&log), session.config.top);

    let dir = session.report_dir();
    report::write_reports(&dir, &report)
        .with_context(|| format!("failed to write reports to {}", dir.display()))?;
    let log_path = report::write_fix_log(&dir, &log)
        .with_context(|| format!("failed to write fix log to {}", dir.display()))?;

    if output.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_fix_log(&log, output.quiet);
        print_summary(&report, output.quiet);
        if !output.quiet {
            println!("{} {}", "Fix log written to".green(), log_path.display().to_string().cyan());
        }
    }

    Ok(fix_succeeded(&after, &log))
}

/// A fix run is clean only if nothing is broken afterwards and every write landed.
fn fix_succeeded(after: &Analysis, log: &FixLog) -> bool {
    after.broken_count() == 0 && log.failed.is_empty()
}

/// JSON shape of `graph`
#[derive(Serialize)]
struct GraphView<'a> {
    documents: usize,
    edges: usize,
    cycles: Vec<Vec<String>>,
    most_depended_upon: &'a [Ranked],
    most_dependent: &'a [Ranked],
    isolated: &'a [String],
    orphaned: &'a [String],
    hotspots: &'a [Hotspot],
}

fn cmd_graph(config_path: &Path, run: &RunOptions, output: Output) -> anyhow::Result<bool> {
    let session = Session::open(config_path, run)?;
    let analysis = session.analyze()?;
    let top = session.config.top;
    let centrality = &analysis.centrality;

    let upon = &centrality.most_depended_upon[..top.min(centrality.most_depended_upon.len())];
    let dependent = &centrality.most_dependent[..top.min(centrality.most_dependent.len())];

    if output.json {
        let view = GraphView {
            documents: analysis.graph.node_count(),
            edges: analysis.graph.edge_count(),
            cycles: analysis.cycles.iter().map(|c| c.closed_path()).collect(),
            most_depended_upon: upon,
            most_dependent: dependent,
            isolated: &centrality.isolated,
            orphaned: &centrality.orphaned,
            hotspots: &analysis.hotspots,
        };
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(true);
    }

    println!("{}", "Dependency Graph".green().bold());
    println!("  Documents:  {}", analysis.graph.node_count().to_string().cyan());
    println!("  Edges:      {}", analysis.graph.edge_count().to_string().cyan());
    println!("  Cycles:     {}", analysis.cycles.len().to_string().cyan());

    if !analysis.cycles.is_empty() {
        println!("\n{}", "Circular Dependencies".yellow().bold());
        for (i, cycle) in analysis.cycles.iter().enumerate() {
            println!("  {}. {} ({} documents)", i + 1, cycle, cycle.len());
        }
    }

    print_ranking("Most Referenced", upon);
    print_ranking("Most Dependent", dependent);

    if !output.quiet {
        print_ids("Isolated", &centrality.isolated);
        print_ids("Orphaned", &centrality.orphaned);

        if !analysis.hotspots.is_empty() {
            println!("\n{}", "Hotspots".yellow().bold());
            for hotspot in &analysis.hotspots {
                match hotspot {
                    Hotspot::HighBrokenRatio { id, total, broken, .. } => {
                        println!("  {} {}/{} references broken", id.cyan(), broken, total);
                    }
                    Hotspot::DeepDependencyChain { id, direct, indirect } => {
                        println!(
                            "  {} {} direct, {} within two hops",
                            id.cyan(),
                            direct,
                            indirect
                        );
                    }
                }
            }
        }
    }

    Ok(true)
}

fn print_summary(report: &ValidationReport, quiet: bool) {
    let s = &report.summary;
    if quiet {
        println!("{} broken of {} references", s.broken, s.total_references);
        return;
    }

    println!("\n{}", "Reference Summary".green().bold());
    println!("  Documents:         {}", s.documents.to_string().cyan());
    println!("  References:        {}", s.total_references.to_string().cyan());
    println!("  Valid:             {} ({:.1}%)", s.valid.to_string().cyan(), s.validity_rate);
    println!("  External:          {}", s.external.to_string().cyan());
    let broken = if s.broken == 0 {
        s.broken.to_string().green()
    } else {
        s.broken.to_string().red()
    };
    println!("  Broken:            {} ({:.1}%)", broken, s.broken_rate);
    println!("  Files affected:    {}", s.files_with_broken.to_string().cyan());
    println!("  Cycles:            {}", s.cycles.to_string().cyan());
    println!("  Isolated:          {}", s.isolated.to_string().cyan());
    println!("  Orphaned:          {}", s.orphaned.to_string().cyan());
    if s.warnings > 0 {
        println!("  Warnings:          {}", s.warnings.to_string().yellow());
    }
}

fn print_broken(report: &ValidationReport) {
    if report.broken_by_file.is_empty() {
        return;
    }
    println!("\n{}", "Broken References".red().bold());
    for (file, entries) in &report.broken_by_file {
        println!("  {}", file.cyan());
        for entry in entries {
            println!("    line {}: {}", entry.line, entry.raw_text.yellow());
        }
    }
}

fn print_suggestions(report: &ValidationReport) {
    if report.suggestions.is_empty() {
        return;
    }
    println!("\n{}", "Suggested Fixes".green().bold());
    for s in &report.suggestions {
        println!(
            "  {}:{} {} -> {} ({})",
            s.file.cyan(),
            s.line,
            s.old,
            s.new.green(),
            s.confidence
        );
    }
}

fn print_fix_log(log: &FixLog, quiet: bool) {
    if !quiet {
        for (file, fixes) in log.by_file() {
            println!("  {}", file.cyan());
            for fix in fixes {
                println!(
                    "    line {}: {} -> {} ({})",
                    fix.line,
                    fix.old.red(),
                    fix.new.green(),
                    fix.confidence
                );
            }
        }
        for failed in &log.failed {
            println!(
                "  {} {}:{} {}",
                "failed".red().bold(),
                failed.file,
                failed.line,
                failed.reason
            );
        }
    }

    let applied = if log.dry_run { "Would apply" } else { "Applied" };
    println!(
        "{} {} fixes in {} files, {} ambiguous, {} failed",
        applied.green().bold(),
        log.applied.len(),
        log.files_modified(),
        log.ambiguous.len().to_string().yellow(),
        log.failed.len().to_string().red()
    );
}

fn print_ranking(title: &str, ranked: &[Ranked]) {
    if ranked.is_empty() {
        return;
    }
    println!("\n{}", title.green().bold());
    for (i, entry) in ranked.iter().enumerate() {
        println!("  {:>2}. {} ({})", i + 1, entry.id.cyan(), entry.degree);
    }
}

fn print_ids(title: &str, ids: &[String]) {
    if ids.is_empty() {
        return;
    }
    println!("\n{} ({})", title.green().bold(), ids.len());
    for id in ids {
        println!("  {}", id);
    }
}
