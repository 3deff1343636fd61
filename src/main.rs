//! GoGraph - Go code graph builder
//!
//! Command-line front end: analyze a Go project into the graph store, query
//! the store, clear projects and show per-project statistics.

use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use gograph::core::config::LoggingConfig;
use gograph::storage::{NodeType, RelationshipType};
use gograph::{AnalysisReport, Config, GraphRepository, TracingProgressSink};

/// GoGraph - Go code graph builder
#[derive(Parser)]
#[command(name = "gograph")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Parse and analyze a project, then import it into the graph store
    Analyze {
        /// Path to the project root
        #[arg(short, long)]
        path: PathBuf,

        /// Project id (defaults to directory name)
        #[arg(long)]
        project: Option<String>,

        /// Build the graph without writing it
        #[arg(long)]
        dry_run: bool,

        /// List functions at or above this cyclomatic complexity
        #[arg(long, default_value_t = 10)]
        complexity_threshold: u32,
    },

    /// Run a query against the graph store
    Query {
        /// SQL text
        #[arg(short, long)]
        query: String,

        /// Named parameter, repeatable: --param name=value
        #[arg(long = "param", value_name = "KEY=VALUE")]
        params: Vec<String>,
    },

    /// Delete graph data
    Clear {
        /// Project id to clear
        #[arg(long, conflicts_with = "all", required_unless_present = "all")]
        project: Option<String>,

        /// Clear every project in the store
        #[arg(long)]
        all: bool,
    },

    /// Show counts for a project, or list all projects
    Stats {
        #[arg(long)]
        project: Option<String>,
    },
}

fn init_logging(verbose: bool, logging: &LoggingConfig) {
    let default = if verbose {
        "gograph=debug".to_string()
    } else {
        format!("gograph={}", logging.level)
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.format == "compact" {
        builder.compact().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(Config::default()),
    }
}

/// Cancel the token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling");
            child.cancel();
        }
    });
    token
}

/// `key=value` pairs into a JSON parameter map. Values that parse as JSON
/// (numbers, booleans, null, quoted strings) keep their type.
fn parse_params(raw: &[String]) -> anyhow::Result<Map<String, Value>> {
    let mut params = Map::new();
    for pair in raw {
        let (key, value) = pair
            .split_once('=')
            .with_context(|| format!("parameter '{}' is not KEY=VALUE", pair))?;
        let value = serde_json::from_str(value).unwrap_or_else(|_| Value::String(value.to_string()));
        params.insert(key.to_string(), value);
    }
    Ok(params)
}

fn project_id_for(path: &Path, project: Option<String>) -> String {
    project.unwrap_or_else(|| {
        std::fs::canonicalize(path)
            .ok()
            .and_then(|p| p.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_else(|| "unnamed".to_string())
    })
}

fn print_report(report: &AnalysisReport, complexity_threshold: u32) {
    for cycle in &report.cycles {
        println!("cycle: {}", cycle);
    }
    for degradation in &report.degradations {
        println!(
            "degraded: {} {} ({})",
            degradation.package, degradation.subject, degradation.reason
        );
    }

    let external = report.dependencies.all_external_imports();
    println!("external imports: {}", external.len());
    for path in external {
        println!("  {}", path);
    }

    let chains: usize = report.entry_chains.values().map(Vec::len).sum();
    println!(
        "entry points: {} ({} call chains)",
        report.entry_chains.len(),
        chains
    );
    if let Some(longest) = report.longest_entry_chain() {
        let hops: Vec<String> = longest.iter().map(ToString::to_string).collect();
        println!("longest chain: {}", hops.join(" -> "));
    }

    if let Some(metrics) = &report.metrics {
        for function in metrics.complex_functions(complexity_threshold) {
            println!(
                "complex: {} complexity {} ({})",
                function.function, function.complexity, function.file
            );
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_logging(cli.verbose, &config.logging);
    config.validate().context("invalid configuration")?;

    let cancel = cancel_on_interrupt();

    match cli.command {
        Commands::Analyze {
            path,
            project,
            dry_run,
            complexity_threshold,
        } => {
            let project_id = project_id_for(&path, project);
            let sink = TracingProgressSink;

            if dry_run {
                info!("Analyzing project '{}' at {:?} (dry run)", project_id, path);
                let analysis = tokio::task::block_in_place(|| {
                    gograph::analyze_project(&project_id, &path, &config, &cancel, Some(&sink))
                })?;
                print_report(&analysis.report, complexity_threshold);
                println!("{}", serde_json::to_string_pretty(&analysis.result.summary)?);
                return Ok(());
            }

            // Connect first so an unreachable store fails before any parsing
            let mut repository = GraphRepository::connect(&config.store, &cancel)
                .await
                .context("failed to connect to graph store")?;

            info!("Analyzing project '{}' at {:?}", project_id, path);
            let outcome = tokio::task::block_in_place(|| {
                gograph::run_pipeline(
                    &mut repository,
                    &project_id,
                    &path,
                    &config,
                    &cancel,
                    Some(&sink),
                )
            })?;

            print_report(&outcome.analysis.report, complexity_threshold);
            println!("{}", serde_json::to_string_pretty(&outcome.analysis.result.summary)?);
            println!("{}", serde_json::to_string_pretty(&outcome.import)?);
        }

        Commands::Query { query, params } => {
            let params = parse_params(&params)?;
            let repository = GraphRepository::connect(&config.store, &cancel).await?;
            let rows = repository.execute_query(&query, &params)?;
            println!("{}", serde_json::to_string_pretty(&rows)?);
        }

        Commands::Clear { project, all } => {
            let repository = GraphRepository::connect(&config.store, &cancel).await?;
            repository.init_schema()?;
            let stats = match project {
                Some(project_id) if !all => repository.clear_project(&project_id)?,
                _ => repository.clear_all()?,
            };
            println!(
                "Removed {} nodes and {} relationships",
                stats.nodes, stats.relationships
            );
        }

        Commands::Stats { project } => {
            let repository = GraphRepository::connect(&config.store, &cancel).await?;
            repository.init_schema()?;

            match project {
                Some(project_id) => {
                    let metadata = repository
                        .project_metadata(&project_id)?
                        .with_context(|| format!("project '{}' not found", project_id))?;
                    println!("{}", serde_json::to_string_pretty(&metadata)?);

                    println!("Nodes:");
                    for node_type in NodeType::ALL {
                        let count = repository.count_nodes(&project_id, Some(node_type))?;
                        if count > 0 {
                            println!("  {:<10} {}", node_type, count);
                        }
                    }
                    println!("Relationships:");
                    for rel_type in RelationshipType::ALL {
                        let count = repository.count_relationships(&project_id, Some(rel_type))?;
                        if count > 0 {
                            println!("  {:<10} {}", rel_type, count);
                        }
                    }
                }
                None => {
                    let projects = repository.list_projects()?;
                    if projects.is_empty() {
                        println!("No projects found.");
                    } else {
                        println!("Projects:");
                        for p in projects {
                            println!(
                                "  - {} ({} nodes, {} relationships, analyzed {})",
                                p.project_id, p.node_count, p.relationship_count, p.analyzed_at
                            );
                        }
                    }
                }
            }
        }
    }

    Ok(())
}
