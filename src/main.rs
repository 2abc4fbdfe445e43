//! symref CLI - incremental C/C++ symbol index and structural queries

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam::channel::Sender;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use symref::config::{self, PartDescription, ProjectDescription, SymrefConfig};
use symref::ignore::{discover_sources, is_source_file};
use symref::matcher::SourceRangesAndDiagnostics;
use symref::query::SymbolQuery;
use symref::service::{RefactoringClient, RefactoringService};
use symref::ui::{self, Icons, ProgressManager, ProgressMessage, ProgressPhase};
use symref::watcher::SourceWatcher;
use symref::{Database, FileContainer, SourceLocationKind, SymbolKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "symref")]
#[command(version)]
#[command(about = "Incremental C/C++ symbol index and structural query engine")]
#[command(long_about = r#"
symref keeps a SQLite index of the symbols, locations, macros and include edges of your
C/C++ project parts and reindexes only what changed.

Example usage:
  symref init
  symref index
  symref usages src/main.cpp 12 5
  symref query 'functionDecl(hasName("main"))' src
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Path to the config file
    #[arg(short, long, global = true, default_value = "symref.toml")]
    config: PathBuf,

    /// Path to the database file (overrides the config)
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default symref.toml and project.toml
    Init {
        /// Overwrite existing files
        #[arg(long)]
        force: bool,
    },

    /// Index the project parts described in project.toml
    Index {
        /// Project description
        #[arg(short, long, default_value = "project.toml")]
        project: PathBuf,
    },

    /// Index, then keep the index up to date while files change
    Watch {
        /// Project description
        #[arg(short, long, default_value = "project.toml")]
        project: PathBuf,

        /// Directory to watch (defaults to the project file's directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Run a structural query over sources
    Query {
        /// Matcher expression, e.g. 'functionDecl(hasName("f"))'
        query: String,

        /// Source files or directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,

        /// Matches running at once
        #[arg(long)]
        slots: Option<usize>,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Symbol locations at a position
    Locations {
        file: PathBuf,
        line: u32,
        column: u32,
    },

    /// Usages of the symbol at a position
    Usages {
        file: PathBuf,
        line: u32,
        column: u32,

        /// Only usages of this location kind (declaration, definition, reference, ...)
        #[arg(short, long)]
        kind: Option<String>,

        /// Only the declaration and the definition
        #[arg(long)]
        declarations: bool,
    },

    /// Symbols whose name starts with a prefix
    Symbols {
        prefix: String,

        /// Filter by symbol kind, repeatable
        #[arg(short, long)]
        kind: Vec<String>,
    },

    /// Show statistics about the index
    Stats,
}

/// Forwards service callbacks to the terminal.
struct CliClient {
    progress: Sender<ProgressMessage>,
    json: bool,
    /// Sources of the streaming query, and how many of them reported back
    query_total: usize,
    query_done: AtomicUsize,
}

impl CliClient {
    fn new(progress: Sender<ProgressMessage>, json: bool, query_total: usize) -> Self {
        Self {
            progress,
            json,
            query_total,
            query_done: AtomicUsize::new(0),
        }
    }

    fn print_ranges(&self, message: &SourceRangesAndDiagnostics) {
        if self.json {
            match serde_json::to_string(message) {
                Ok(line) => println!("{}", line),
                Err(e) => tracing::warn!("Cannot serialize query result: {}", e),
            }
            return;
        }
        for range in &message.source_ranges.source_ranges {
            let path = message
                .source_ranges
                .file_paths
                .get(&range.file_path_id)
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| range.file_path_id.to_string());
            let span = format!(
                "{}:{}:{}-{}:{}",
                path, range.start_line, range.start_column, range.end_line, range.end_column
            );
            println!("{}", ui::location(&span));
            for line in range.text.lines() {
                println!("  {}", ui::dim(line));
            }
        }
        for diagnostic in &message.diagnostics {
            ui::diagnostic(&diagnostic.to_string());
        }
    }
}

impl RefactoringClient for CliClient {
    fn source_ranges_and_diagnostics_for_query(&self, message: SourceRangesAndDiagnostics) {
        self.print_ranges(&message);
    }

    fn source_ranges_for_query(&self, message: SourceRangesAndDiagnostics) {
        self.print_ranges(&message);
        let done = self.query_done.fetch_add(1, Ordering::Relaxed) + 1;
        let _ = self.progress.send(ProgressMessage::Progress {
            phase: ProgressPhase::Querying,
            current: done,
            total: self.query_total,
        });
    }

    fn progress(&self, completed: usize, total: usize) {
        let _ = self.progress.send(ProgressMessage::Progress {
            phase: ProgressPhase::Indexing,
            current: completed,
            total,
        });
    }
}

struct Session {
    config: SymrefConfig,
    database_path: PathBuf,
}

impl Session {
    fn load(cli: &Cli) -> anyhow::Result<Self> {
        let config = config::load_config(Some(&cli.config))?.unwrap_or_default();
        let database_path = cli
            .database
            .clone()
            .or_else(|| config.database.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| config::default_database_path_in(Path::new(".")));
        Ok(Self { config, database_path })
    }

    fn database(&self) -> anyhow::Result<Arc<Database>> {
        config::ensure_db_dir(&self.database_path)?;
        let database = Database::open(&self.database_path)
            .with_context(|| format!("cannot open {}", self.database_path.display()))?;
        Ok(Arc::new(database))
    }

    fn service(&self, client: CliClient) -> anyhow::Result<RefactoringService> {
        Ok(RefactoringService::new(
            self.database()?,
            Arc::new(client),
            self.config.service_options(),
        )?)
    }
}

fn init_logging(cli: &Cli) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            let configured = config::load_config(Some(&cli.config))
                .ok()
                .flatten()
                .and_then(|config| config.log_filter);
            EnvFilter::new(configured.as_deref().unwrap_or("info"))
        })
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(&cli);

    match &cli.command {
        Commands::Init { force } => init(&cli, *force),
        Commands::Index { project } => {
            let session = Session::load(&cli)?;
            let start = Instant::now();
            let (service, mut progress) = index(&session, project)?;
            service.sync_indexing()?;
            let stats = service.database().stats()?;
            progress.finish_with_summary(start.elapsed(), &stats);
            Ok(())
        }
        Commands::Watch { project, path } => watch(&cli, project, path.as_deref()),
        Commands::Query { query, paths, slots, format } => {
            run_query(&cli, query, paths, *slots, format == "json")
        }
        Commands::Locations { file, line, column } => {
            let session = Session::load(&cli)?;
            let database = session.database()?;
            let Some(source) = source_id(&database, file)? else {
                ui::warn(&format!("{} is not indexed", file.display()));
                return Ok(());
            };
            let locations = SymbolQuery::new(database).locations_at(source, *line, *column)?;
            if locations.is_empty() {
                println!("∅ No symbol at {}:{}:{}", file.display(), line, column);
            }
            for location in locations {
                println!(
                    "- [{}] source {} {}:{}",
                    location.kind, location.source_id, location.line, location.column
                );
            }
            Ok(())
        }
        Commands::Usages { file, line, column, kind, declarations } => {
            let session = Session::load(&cli)?;
            let database = session.database()?;
            let Some(source) = source_id(&database, file)? else {
                ui::warn(&format!("{} is not indexed", file.display()));
                return Ok(());
            };
            let query = SymbolQuery::new(database);
            let usages = if *declarations {
                query.declarations_at(source, *line, *column)?
            } else if let Some(kind) = kind {
                let kind: SourceLocationKind = kind.parse()?;
                query.source_usages_at_by_kind(source, *line, *column, kind)?
            } else {
                query.source_usages_at(source, *line, *column)?
            };
            if usages.is_empty() {
                println!("∅ No usages found.");
            } else {
                println!("{}", ui::usages_table(&usages));
            }
            Ok(())
        }
        Commands::Symbols { prefix, kind } => {
            let session = Session::load(&cli)?;
            let kinds = if kind.is_empty() {
                SymbolKind::all().to_vec()
            } else {
                kind.iter()
                    .map(|kind| kind.parse::<SymbolKind>())
                    .collect::<Result<Vec<_>, _>>()?
            };
            let query = SymbolQuery::new(session.database()?);
            let symbols = query.symbols_with_kind_and_starts_with(&kinds, prefix)?;
            if symbols.is_empty() {
                println!("∅ No symbols found.");
            }
            for symbol in symbols {
                let location = match query.location_for_symbol_id(symbol.id, SourceLocationKind::Definition)? {
                    Some(location) => Some(location),
                    None => query.location_for_symbol_id(symbol.id, SourceLocationKind::Declaration)?,
                };
                let location = location
                    .map(|l| format!(" (source {} {}:{})", l.source_id, l.line, l.column))
                    .unwrap_or_default();
                println!("- [{}] {}{}", ui::symbol_kind(symbol.kind), symbol.name, ui::muted(&location));
                if let Some(signature) = &symbol.signature {
                    println!("  Sig: {}", signature);
                }
            }
            Ok(())
        }
        Commands::Stats => {
            let session = Session::load(&cli)?;
            let stats = session.database()?.stats()?;
            println!("{} symref statistics ({})", Icons::STATS, session.database_path.display());
            println!(
                "{}",
                ui::stats_table(&[
                    ("Symbols", stats.symbols.to_string()),
                    ("Locations", stats.locations.to_string()),
                    ("Sources", stats.sources.to_string()),
                    ("Directories", stats.directories.to_string()),
                    ("Project parts", stats.project_parts.to_string()),
                    ("Used macros", stats.used_macros.to_string()),
                    ("Source dependencies", stats.source_dependencies.to_string()),
                ])
            );
            Ok(())
        }
    }
}

fn init(cli: &Cli, force: bool) -> anyhow::Result<()> {
    let root = std::env::current_dir()?;
    let database = config::default_database_path_in(Path::new("."));
    let config = SymrefConfig {
        database: Some(database.to_string_lossy().into_owned()),
        ..Default::default()
    };
    config::write_config(&cli.config, &config, force)?;

    let project_path = config::default_project_path();
    if force || !project_path.exists() {
        let sources = if root.join("src").is_dir() { "src" } else { "." };
        let project = ProjectDescription {
            parts: vec![PartDescription {
                name: root
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "project".to_string()),
                sources: vec![PathBuf::from(sources)],
                include_paths: vec![PathBuf::from("include")],
                ..Default::default()
            }],
        };
        std::fs::write(&project_path, toml::to_string_pretty(&project)?)?;
    }

    config::ensure_db_dir(&database)?;
    config::ensure_gitignore(&root)?;
    ui::success(&format!("Wrote {} and {}", cli.config.display(), project_path.display()));
    Ok(())
}

/// Hand every part of `project` to a fresh service. Indexing runs in the background.
fn index(session: &Session, project: &Path) -> anyhow::Result<(RefactoringService, ProgressManager)> {
    let description = config::load_project(project)?;
    let base = project
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."))
        .canonicalize()?;

    ui::header(&format!("Indexing {}", project.display()));
    ui::status(Icons::DATABASE, "Database", &session.database_path.display().to_string());

    let (progress, sender) = ProgressManager::new();
    let service = session.service(CliClient::new(sender.clone(), false, 0))?;

    let mut parts = Vec::with_capacity(description.parts.len());
    for part in &description.parts {
        let id = service.project_part_id(&part.name)?;
        parts.push(part.to_container(id, &base, service.file_paths(), &session.config.excludes)?);
    }
    let sources: usize = parts.iter().map(|part| part.source_path_ids.len()).sum();
    let _ = sender.send(ProgressMessage::Started {
        phase: ProgressPhase::Indexing,
        total: sources,
    });
    let scheduled = service.update_project_parts(parts)?;
    tracing::info!("{} of {} sources scheduled for indexing", scheduled, sources);
    Ok((service, progress))
}

fn watch(cli: &Cli, project: &Path, path: Option<&Path>) -> anyhow::Result<()> {
    let session = Session::load(cli)?;
    let (service, progress) = index(&session, project)?;
    service.sync_indexing()?;

    let root = match path {
        Some(path) => path.canonicalize()?,
        None => project
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or(Path::new("."))
            .canonicalize()?,
    };
    let watcher = SourceWatcher::new(root.clone(), Arc::new(service), &session.config.excludes)
        .with_messages(progress.sender());

    println!("{} Watching for changes in {}...", Icons::EYE, root.display());
    let (_stop, stop) = crossbeam::channel::bounded::<()>(1);
    watcher.run(stop)?;
    Ok(())
}

fn run_query(
    cli: &Cli,
    query: &str,
    paths: &[PathBuf],
    slots: Option<usize>,
    json: bool,
) -> anyhow::Result<()> {
    let session = Session::load(cli)?;
    let mut sources = Vec::new();
    for path in paths {
        if path.is_dir() {
            sources.extend(discover_sources(path, &session.config.excludes));
        } else if is_source_file(path) {
            sources.push(path.canonicalize()?);
        } else {
            ui::warn(&format!("Skipping {}: not a C/C++ source", path.display()));
        }
    }
    let sources: Vec<FileContainer> = sources
        .into_iter()
        .map(|path| FileContainer::new(path, String::new()))
        .collect();

    let (mut progress, sender) = ProgressManager::new();
    let service = session.service(CliClient::new(sender.clone(), json, sources.len()))?;
    if let Some(slots) = slots {
        service.set_gatherer_processing_slot_count(slots)?;
    }
    let _ = sender.send(ProgressMessage::Started {
        phase: ProgressPhase::Querying,
        total: sources.len(),
    });
    service.request_source_ranges_for_query(query, sources, Vec::new())?;
    service.wait_until_finished()?;
    let _ = sender.send(ProgressMessage::Finished {
        phase: ProgressPhase::Querying,
    });
    progress.shutdown();
    Ok(())
}

fn source_id(database: &Arc<Database>, file: &Path) -> anyhow::Result<Option<symref::FilePathId>> {
    let file_paths = symref::FilePathCache::new(Arc::clone(database));
    let path = file.canonicalize().unwrap_or_else(|_| file.to_path_buf());
    Ok(file_paths.existing_file_path_id(&path)?)
}
