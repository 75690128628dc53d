use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use vault_engine::{Engine, EngineConfig, Error, VaultId};

#[derive(Debug, Parser)]
#[command(name = "vaultctl", version, about = "Vault knowledge-graph engine")]
struct Cli {
    /// Raise logging to debug and print extra diagnostics to stderr.
    #[arg(long, global = true)]
    verbose: bool,

    /// Print machine-readable JSON on stdout instead of human text.
    #[arg(long, global = true)]
    json: bool,

    /// Default vault id for commands that accept one.
    #[arg(long, env = "VAULT_ENGINE_VAULT", global = true)]
    vault: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Find vault roots (directories containing `.obsidian`) under `path`.
    Discover {
        path: PathBuf,
        /// Scan every discovered vault immediately.
        #[arg(long)]
        scan: bool,
    },
    /// Scan a vault directory, updating the Store to match the filesystem.
    Scan {
        path: PathBuf,
        /// Display name recorded for a newly discovered vault.
        #[arg(long)]
        name: Option<String>,
        /// Run `analyze` immediately after the scan completes.
        #[arg(long)]
        analyze: bool,
    },
    /// Resolve links, build the graph, compute metrics and detect clusters.
    Analyze {
        /// Vault id; falls back to `--vault`/`VAULT_ENGINE_VAULT`.
        vault_id: Option<String>,
    },
    /// List every known vault.
    Vaults,
    /// Print a vault's note/tag/link counts.
    Stats {
        /// Vault id; falls back to `--vault`/`VAULT_ENGINE_VAULT`.
        vault_id: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let json = cli.json;

    match run(cli).await {
        Ok(()) => ExitCode::from(0),
        Err(e) => {
            render_error(&e, json);
            if e.is_not_found() {
                ExitCode::from(2)
            } else {
                ExitCode::from(1)
            }
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn run(cli: Cli) -> vault_engine::Result<()> {
    let json = cli.json;
    let config = EngineConfig::load(None)?;
    let config_dir = EngineConfig::default_config_dir();
    let store_path = store_path(&config)?;
    tracing::debug!(path = %store_path.display(), "opening store");
    let last_vault_filename = config.last_vault_filename.clone();
    let engine = Engine::open(&store_path, config)?;

    match cli.command {
        Command::Discover { path, scan } => {
            let found = engine.discover_vaults(&path).await?;
            if scan {
                for vault_path in &found {
                    let result = engine.scan_vault(vault_path, None).await?;
                    write_last_vault(config_dir.as_deref(), &last_vault_filename, &result.vault_id);
                }
            }
            if json {
                print_json(&found)?;
            } else {
                for vault_path in &found {
                    println!("{}", vault_path.display());
                }
            }
        }
        Command::Scan { path, name, analyze } => {
            let result = engine.scan_vault(&path, name.as_deref()).await?;
            write_last_vault(config_dir.as_deref(), &last_vault_filename, &result.vault_id);
            if analyze {
                let summary = engine.analyze_vault(&result.vault_id).await?;
                if json {
                    print_json(&(result, summary))?;
                } else {
                    print_scan_result(&result);
                    print_analysis_summary(&summary);
                }
            } else if json {
                print_json(&result)?;
            } else {
                print_scan_result(&result);
            }
        }
        Command::Analyze { vault_id } => {
            let vault_id = resolve_vault_id(
                vault_id.or(cli.vault),
                config_dir.as_deref(),
                &last_vault_filename,
            )?;
            let summary = engine.analyze_vault(&vault_id).await?;
            write_last_vault(config_dir.as_deref(), &last_vault_filename, &vault_id);
            if json {
                print_json(&summary)?;
            } else {
                print_analysis_summary(&summary);
            }
        }
        Command::Vaults => {
            let vaults = engine.list_vaults().await?;
            if json {
                print_json(&vaults)?;
            } else {
                for vault in &vaults {
                    println!("{}  {}  ({} notes)", vault.id, vault.name, vault.note_count);
                }
            }
        }
        Command::Stats { vault_id } => {
            match vault_id.or(cli.vault) {
                Some(raw) => {
                    let vault_id = VaultId::from(raw);
                    let stats = engine.get_vault_stats(&vault_id).await?;
                    if json {
                        print_json(&stats)?;
                    } else {
                        println!("notes:        {}", stats.note_count);
                        println!("tags:         {}", stats.tag_count);
                        println!("links:        {}", stats.link_count);
                        println!("broken links: {}", stats.broken_link_count);
                        println!("size:         {} bytes", stats.total_size_bytes);
                    }
                }
                None => {
                    let stats = engine.get_global_stats().await?;
                    if json {
                        print_json(&stats)?;
                    } else {
                        println!("vaults:       {}", stats.vault_count);
                        println!("notes:        {}", stats.note_count);
                        println!("tags:         {}", stats.tag_count);
                        println!("links:        {}", stats.link_count);
                        println!("broken links: {}", stats.broken_link_count);
                        println!("size:         {} bytes", stats.total_size_bytes);
                    }
                }
            }
        }
    }

    Ok(())
}

/// Falls back to the `<config-dir>/last_vault` marker (§6) when no vault id
/// or path was given on the command line.
fn resolve_vault_id(
    raw: Option<String>,
    config_dir: Option<&Path>,
    last_vault_filename: &str,
) -> vault_engine::Result<VaultId> {
    raw.map(VaultId::from)
        .or_else(|| read_last_vault(config_dir, last_vault_filename))
        .ok_or_else(|| Error::InvalidPath("no vault specified (pass a vault id or --vault)".into()))
}

fn read_last_vault(config_dir: Option<&Path>, filename: &str) -> Option<VaultId> {
    let dir = config_dir?;
    let text = std::fs::read_to_string(dir.join(filename)).ok()?;
    let id = text.lines().next()?.trim();
    if id.is_empty() {
        None
    } else {
        Some(VaultId::from(id))
    }
}

/// Records the most recently scanned/analyzed vault, best-effort: a failure to
/// write this marker is not fatal to the command that triggered it.
fn write_last_vault(config_dir: Option<&Path>, filename: &str, vault_id: &VaultId) {
    let Some(dir) = config_dir else { return };
    if let Err(e) = std::fs::create_dir_all(dir) {
        tracing::warn!(error = %e, "could not create config dir for last_vault marker");
        return;
    }
    if let Err(e) = std::fs::write(dir.join(filename), format!("{vault_id}\n")) {
        tracing::warn!(error = %e, "could not write last_vault marker");
    }
}

fn store_path(config: &EngineConfig) -> vault_engine::Result<PathBuf> {
    let dir = EngineConfig::default_config_dir()
        .ok_or_else(|| Error::Config("could not resolve a config directory (no $HOME)".into()))?;
    Ok(dir.join(&config.store_filename))
}

fn print_json<T: serde::Serialize>(value: &T) -> vault_engine::Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::AnalysisError(format!("failed to serialize JSON output: {e}")))?;
    println!("{text}");
    Ok(())
}

fn print_scan_result(result: &vault_engine::ScanResult) {
    println!(
        "scanned {} notes: +{} ~{} -{} ({} links, {} tags, {:.2}s)",
        result.notes_scanned,
        result.notes_added,
        result.notes_updated,
        result.notes_deleted,
        result.links_found,
        result.tags_found,
        result.duration_seconds,
    );
    for error in &result.errors {
        println!("[ERROR] {error}");
    }
    for warning in &result.warnings {
        println!("[WARN] {warning}");
    }
}

fn print_analysis_summary(summary: &vault_engine::AnalysisSummary) {
    println!(
        "resolved {}/{} links ({} broken)",
        summary.link_stats.resolved, summary.link_stats.total, summary.link_stats.broken
    );
    println!(
        "graph: {} notes, {} edges, density {:.4}",
        summary.graph_stats.notes, summary.graph_stats.edges, summary.graph_stats.density
    );
    println!("clusters: {}", summary.clusters.len());
}

fn render_error(err: &vault_engine::Error, json: bool) {
    if json {
        let body = serde_json::json!({ "error": { "kind": err.kind(), "message": err.to_string() } });
        println!("{body}");
    } else {
        eprintln!("[ERROR] {err}");
    }
}
