//! Pathscope CLI — fuzzy path search from the terminal.
//!
//! `search` walks the root and queries it once through `pathscope-core`
//! with no daemon and no watcher. `watch` keeps a live engine running and
//! answers queries typed on stdin while the index tracks the filesystem.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use pathscope_core::{query, Engine, Error, FinderConfig, QueryPlan, SearchOptions, SearchResult};

/// Pathscope — fast fuzzy file-path search.
#[derive(Parser)]
#[command(name = "pscope", version, about)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON instead of human-readable text
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Fuzzy search for paths under a root
    Search {
        /// Search query
        query: String,

        /// Root directory (default: current directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Maximum number of results
        #[arg(long, default_value = "20")]
        limit: usize,

        /// Cap on candidates considered before ranking
        #[arg(long, default_value = "10000")]
        max_candidates: usize,
    },
    /// Watch a root and answer queries from stdin as the tree changes
    Watch {
        /// Root directory (default: current directory)
        #[arg(long)]
        root: Option<PathBuf>,

        /// Maximum number of results per query
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(&cli) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<(), Error> {
    match &cli.command {
        Commands::Search { query, root, limit, max_candidates } => {
            let root = resolve(root)?;
            let config = FinderConfig::load_root(&root)?;

            let index = pathscope_core::walk_root(&root, &config)?;
            let snapshot = index.snapshot();
            let plan = QueryPlan::new(query);
            let opts = SearchOptions { limit: *limit, max_candidates: *max_candidates };
            let results = query::search(&plan, &snapshot, opts);
            if results.is_empty() && !cli.json {
                println!("No matches for {query:?} ({} paths indexed)", index.len());
            } else {
                print_results(&results, cli.json);
            }
            Ok(())
        }
        Commands::Watch { root, limit } => {
            let root = resolve(root)?;
            let config = FinderConfig::load_root(&root)?;

            let engine = Engine::with_config(config);
            engine.add_root(&root)?;
            eprintln!("Watching {} — type a query, Ctrl-D to exit", root.display());

            for line in std::io::stdin().lines() {
                let Ok(line) = line else { break };
                let q = line.trim();
                if q.is_empty() {
                    continue;
                }
                let opts = SearchOptions { limit: *limit, max_candidates: 0 };
                print_results(&engine.search(q, opts)?, cli.json);
            }
            engine.close();
            Ok(())
        }
    }
}

fn resolve(root: &Option<PathBuf>) -> Result<PathBuf, Error> {
    let root = root.clone().unwrap_or_else(|| PathBuf::from("."));
    std::fs::canonicalize(&root).map_err(|source| Error::Io { path: root, source })
}

fn print_results(results: &[SearchResult], json: bool) {
    if json {
        match serde_json::to_string_pretty(results) {
            Ok(out) => println!("{out}"),
            Err(err) => eprintln!("Error: {err}"),
        }
        return;
    }
    for result in results {
        let marker = if result.is_dir { "/" } else { "" };
        println!("{:>8.2}  {}{marker}", result.score, result.path);
    }
}
