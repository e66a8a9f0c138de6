use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use colored::Colorize;
use serde::Serialize;
use tracing::{debug, info};

use cask_dispatch::{BlobDispatcher, DefaultBlobDispatcher, DispatchTable};
use cask_gc::{InMemoryRepositories, InMemoryTransactionManager};
use cask_orchestrator::{BlobOrchestrator, CaskConfig, GcStats};
use cask_provider::{MemoryStorages, PROP_RECORD, PROP_TRANSIENT};
use cask_registry::ProviderFactories;
use cask_types::{BlobInfo, Document, InMemoryDocument, NewBlob, PropertyValue, MAIN_BLOB_XPATH};

use crate::cli::*;

pub fn run_command(cli: Cli) -> anyhow::Result<()> {
    let format = cli.format;
    match cli.command {
        Command::Validate(args) => print(format, &cmd_validate(&args)?),
        Command::Dispatch(args) => print(format, &cmd_dispatch(&args)?),
        Command::Gc(args) => print(format, &cmd_gc(&args)?),
    }
}

trait Report: Serialize {
    fn render(&self);
}

fn print<R: Report>(format: OutputFormat, report: &R) -> anyhow::Result<()> {
    match format {
        OutputFormat::Text => report.render(),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(report)?),
    }
    Ok(())
}

fn load(path: &Path) -> anyhow::Result<CaskConfig> {
    CaskConfig::load(path).with_context(|| format!("loading {}", path.display()))
}

/// An in-memory deployment of `config`: every provider of kind `memory` is
/// backed by process memory, documents live in in-memory repositories.
fn deploy(config: &CaskConfig) -> anyhow::Result<(BlobOrchestrator, Arc<InMemoryRepositories>)> {
    let repositories = Arc::new(InMemoryRepositories::new());
    let cask = BlobOrchestrator::from_config(
        config,
        ProviderFactories::with_defaults(Arc::new(MemoryStorages::new())),
        Arc::clone(&repositories) as Arc<dyn cask_gc::DocumentRepositories>,
        Arc::new(InMemoryTransactionManager::new()),
    )?;
    Ok((cask, repositories))
}

// ---------------------------------------------------------------------------
// validate
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct ProviderSummary {
    name: String,
    kind: String,
    record: bool,
    transient: bool,
}

#[derive(Debug, Serialize)]
struct RuleSummary {
    clauses: Vec<String>,
    provider: String,
}

#[derive(Debug, Serialize)]
struct ValidationReport {
    mode: &'static str,
    providers: Vec<ProviderSummary>,
    rules: Vec<RuleSummary>,
    default_provider: Option<String>,
}

fn cmd_validate(args: &ValidateArgs) -> anyhow::Result<ValidationReport> {
    let config = load(&args.config)?;
    let table = config.validate()?;
    let (cask, _) = deploy(&config)?;

    let mut providers = Vec::new();
    for descriptor in &config.providers {
        let provider = cask.registry().get(&descriptor.name)?;
        providers.push(ProviderSummary {
            name: descriptor.name.clone(),
            kind: descriptor.kind.clone(),
            record: provider.is_record_mode(),
            transient: provider.is_transient(),
        });
    }
    cask.close();
    Ok(ValidationReport {
        mode: mode_name(&table),
        providers,
        rules: table
            .rules()
            .iter()
            .map(|rule| RuleSummary {
                clauses: rule.clauses().iter().map(ToString::to_string).collect(),
                provider: rule.provider().to_string(),
            })
            .collect(),
        default_provider: table.default_provider().map(str::to_string),
    })
}

fn mode_name(table: &DispatchTable) -> &'static str {
    if table.is_rule_mode() {
        "rules"
    } else {
        "repository-name"
    }
}

impl Report for ValidationReport {
    fn render(&self) {
        println!("{} Configuration valid ({} dispatch)", "✓".green().bold(), self.mode.cyan());
        for provider in &self.providers {
            let mut flags = Vec::new();
            if provider.record {
                flags.push(PROP_RECORD);
            }
            if provider.transient {
                flags.push(PROP_TRANSIENT);
            }
            let flags = if flags.is_empty() {
                String::new()
            } else {
                format!(" [{}]", flags.join(", "))
            };
            println!("  provider {} ({}){}", provider.name.bold(), provider.kind, flags.dimmed());
        }
        for rule in &self.rules {
            println!("  rule {} -> {}", rule.clauses.join(", ").yellow(), rule.provider.bold());
        }
        if let Some(default) = &self.default_provider {
            println!("  default -> {}", default.bold());
        }
    }
}

// ---------------------------------------------------------------------------
// dispatch
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct DispatchReport {
    provider: String,
    add_prefix: bool,
    read_provider: String,
}

/// Typed view of a command-line property value.
fn property_value(raw: &str) -> PropertyValue {
    match raw {
        "true" => PropertyValue::Boolean(true),
        "false" => PropertyValue::Boolean(false),
        _ => raw
            .parse::<i64>()
            .map(PropertyValue::Integer)
            .unwrap_or_else(|_| PropertyValue::String(raw.to_string())),
    }
}

fn cmd_dispatch(args: &DispatchArgs) -> anyhow::Result<DispatchReport> {
    let config = load(&args.config)?;
    let dispatcher = DefaultBlobDispatcher::new(config.validate()?);

    let mut doc = InMemoryDocument::new("cli", args.repository.as_str());
    if let Some(path) = &args.path {
        doc = doc.with_path(path.as_str());
    }
    doc.set_record(args.record);
    for property in &args.properties {
        let Some((name, value)) = property.split_once('=') else {
            bail!("property '{property}' is not NAME=VALUE");
        };
        doc.set_property(name.trim(), property_value(value.trim()));
    }

    let mut blob = NewBlob::new(&b""[..]);
    if let Some(mime_type) = &args.mime_type {
        blob = blob.with_mime_type(mime_type.as_str());
    }
    if let Some(filename) = &args.filename {
        blob = blob.with_filename(filename.as_str());
    }

    let target = dispatcher.resolve_for_write(&doc, &blob.into(), &args.xpath);
    Ok(DispatchReport {
        provider: target.provider_id,
        add_prefix: target.add_prefix,
        read_provider: dispatcher.resolve_for_read(&args.repository),
    })
}

impl Report for DispatchReport {
    fn render(&self) {
        let keys = if self.add_prefix {
            format!("{}:<key>", self.provider)
        } else {
            "<key>".to_string()
        };
        println!("{} {}", "→".green().bold(), self.provider.bold());
        println!("  stored keys: {}", keys.yellow());
        println!("  bare keys read from: {}", self.read_provider);
    }
}

// ---------------------------------------------------------------------------
// gc
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
struct StoredFile {
    file: PathBuf,
    key: String,
    referenced: bool,
}

#[derive(Debug, Serialize)]
struct GcReport {
    files: Vec<StoredFile>,
    deleted: bool,
    stats: GcStats,
}

fn mime_type_of(path: &Path) -> &'static str {
    match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase).as_deref() {
        Some("txt" | "md") => "text/plain",
        Some("html" | "htm") => "text/html",
        Some("json") => "application/json",
        Some("pdf") => "application/pdf",
        Some("png") => "image/png",
        Some("jpg" | "jpeg") => "image/jpeg",
        Some("mp4") => "video/mp4",
        Some("webm") => "video/webm",
        _ => "application/octet-stream",
    }
}

fn cmd_gc(args: &GcArgs) -> anyhow::Result<GcReport> {
    let config = load(&args.config)?;
    let (cask, repositories) = deploy(&config)?;
    repositories.add_repository(args.repository.as_str());
    info!(
        repository = %args.repository,
        referenced = args.files.len(),
        orphans = args.orphans.len(),
        "ingesting files"
    );

    let mut files = Vec::new();
    let inputs = args
        .files
        .iter()
        .map(|f| (f, true))
        .chain(args.orphans.iter().map(|f| (f, false)));
    for (index, (path, referenced)) in inputs.enumerate() {
        let content = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
        let mut blob = NewBlob::new(content).with_mime_type(mime_type_of(path));
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            blob = blob.with_filename(name);
        }

        let mut doc = InMemoryDocument::new(format!("file-{index}"), args.repository.as_str());
        let key = cask.write_blob(&blob.clone().into(), &doc, MAIN_BLOB_XPATH)?;
        debug!(file = %path.display(), key = %key, referenced, "file stored");
        if referenced {
            let mut info = BlobInfo::from_key(key.as_str());
            info.mime_type = blob.metadata.mime_type.clone();
            info.filename = blob.metadata.filename.clone();
            info.length = blob.content.len() as i64;
            let stored = cask.read_blob_ref(&info, &args.repository)?;
            doc.set_blob(MAIN_BLOB_XPATH, stored);
            repositories.add_document(doc);
        }
        files.push(StoredFile {
            file: path.clone(),
            key,
            referenced,
        });
    }

    info!(delete = args.delete, "running garbage collection");
    let stats = cask.garbage_collect_binaries(args.delete)?;
    cask.close();
    Ok(GcReport {
        files,
        deleted: args.delete,
        stats,
    })
}

impl Report for GcReport {
    fn render(&self) {
        for file in &self.files {
            let state = if file.referenced {
                "referenced".green()
            } else {
                "orphan".yellow()
            };
            println!("  {} {} ({})", file.key.dimmed(), file.file.display(), state);
        }
        let verb = if self.deleted { "removed" } else { "found" };
        println!(
            "{} GC: {} kept ({} bytes), {} garbage {} ({} bytes) in {} ms",
            "✓".green().bold(),
            self.stats.count,
            self.stats.total_bytes,
            self.stats.count_deleted,
            verb,
            self.stats.bytes_deleted,
            self.stats.duration_ms
        );
    }
}
