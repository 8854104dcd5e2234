// SPDX-License-Identifier: AGPL-3.0

//! `symex` - symbolic execution engine for a Python-like imperative subset.
//! CLI entry point: parses flags, drives one `PathGroup` exploration to
//! completion, and reports the outcome.

use std::rc::Rc;
use std::time::Instant;

use anyhow::{Context as AnyhowContext, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use symex_config::Config;
use symex_engine::{Budget, CompletedPath, PathGroup, State, Strategy};
use symex_functions::FunctionRegistry;

mod report;

use report::RunSummary;

#[derive(Debug, Parser)]
#[clap(
    name = "symex",
    version,
    about = "Symbolic execution engine for a Python-like imperative subset"
)]
struct Cli {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Explore every path through a program and print a summary.
    Run(Config),
    /// Explore a program and print witnesses for one variable across every
    /// completed path.
    Query(QueryArgs),
}

#[derive(Debug, Parser)]
struct QueryArgs {
    #[clap(flatten)]
    config: Config,

    /// Name of the variable to query.
    #[clap(long)]
    var: String,

    /// Context id the variable was bound in (0 is module scope).
    #[clap(long, default_value_t = symex_constants::CTX_GLOBAL)]
    ctx: u64,

    /// Which witness accessor to use when reading the variable's binding.
    #[clap(long, value_enum, default_value_t = QueryKind::Int)]
    kind: QueryKind,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum QueryKind {
    Int,
    Real,
    Str,
    List,
}

fn main() -> Result<()> {
    let exitcode = run()?;
    std::process::exit(exitcode);
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = match &cli.command {
        Command::Run(c) => load_config(c.clone())?,
        Command::Query(q) => load_config(q.config.clone())?,
    };

    install_logging(config.verbose);
    print_banner();

    let source = std::fs::read_to_string(&config.program)
        .with_context(|| format!("failed to read program: {:?}", config.program))?;
    let program = symex_ast::parse_program(&source)
        .map_err(|e| anyhow::anyhow!("failed to parse program: {e}"))?;

    let ctx = if config.solver_timeout_ms > 0 {
        symex_solver::new_context_with_timeout(config.solver_timeout_ms)
    } else {
        symex_solver::new_context()
    };

    let registry = Rc::new(FunctionRegistry::with_builtins());
    let mut state = State::new(&ctx, program, registry);
    state.loop_bound = config.loop_bound;

    let strategy = match config.strategy {
        symex_config::Strategy::Bfs => Strategy::Bfs,
        symex_config::Strategy::Dfs => Strategy::Dfs,
    };
    let budget = Budget { max_paths: config.max_paths, max_steps: config.max_steps };

    let start_time = Instant::now();
    let mut group = PathGroup::new(state, strategy, budget);
    group.explore();
    let duration = start_time.elapsed();

    match cli.command {
        Command::Run(_) => {
            let summary = RunSummary {
                completed: group.completed.len(),
                deadended: group.deadended.len(),
                errored: group.errored.len(),
                duration,
            };
            print_summary(&summary, &group);
            if config.verbose >= 1 {
                for (i, (path, err)) in group.errored.iter().enumerate() {
                    println!(
                        "  {} path {}: {} ({} statements executed)",
                        "error:".red(),
                        i,
                        err,
                        path.backtrace().len()
                    );
                }
            }
            Ok(summary.exitcode() as i32)
        }
        Command::Query(q) => {
            print_query(&mut group, &q);
            Ok(0)
        }
    }
}

/// Loads an optional TOML config file and merges the CLI-parsed flags on
/// top, so a flag left at its clap default never clobbers a value the file
/// explicitly set.
fn load_config(cli_config: Config) -> Result<Config> {
    let mut resolved = match cli_config.resolve_config_path() {
        Some(path) => Config::from_file(&path)
            .with_context(|| format!("failed to load config file: {path:?}"))?,
        None => Config::default(),
    };
    resolved.merge(cli_config);
    Ok(resolved)
}

fn install_logging(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .without_time()
        .try_init();
}

fn print_banner() {
    println!("\n{}", "symex - symbolic execution engine".cyan().bold());
}

fn print_summary(summary: &RunSummary, group: &PathGroup) {
    println!(
        "\n{} {} paths: {} {} {} {} {} {} ({}ms)",
        "Summary:".yellow().bold(),
        summary.total_paths(),
        summary.completed.to_string().green(),
        "completed".green(),
        summary.deadended.to_string().dimmed(),
        "deadended".dimmed(),
        summary.errored.to_string().red(),
        "errored".red(),
        summary.duration.as_millis()
    );
    if let Some(longest) = group.completed.iter().map(|p| p.backtrace().len()).max() {
        println!("  longest completed path: {longest} statements");
    }
}

fn print_query(group: &mut PathGroup, q: &QueryArgs) {
    if group.completed.is_empty() {
        println!("{}", "no completed paths".dimmed());
        return;
    }
    for (i, path) in group.completed.iter_mut().enumerate() {
        let witness = witness_for(path, q);
        println!("  path {i}: {} = {witness}", q.var);
    }
}

fn witness_for(path: &mut CompletedPath, q: &QueryArgs) -> String {
    match q.kind {
        QueryKind::Int => path
            .any_int(q.ctx, &q.var)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<unbound>".to_string()),
        QueryKind::Real => path
            .any_real(q.ctx, &q.var)
            .map(|v| v.to_string())
            .unwrap_or_else(|| "<unbound>".to_string()),
        QueryKind::Str => path
            .any_str(q.ctx, &q.var)
            .unwrap_or_else(|| "<unbound>".to_string()),
        QueryKind::List => path
            .any_list(q.ctx, &q.var)
            .map(|v| format!("{v:?}"))
            .unwrap_or_else(|| "<unbound>".to_string()),
    }
}
