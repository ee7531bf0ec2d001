//! Command-line interface for groundnote.
//!
//! Provides commands for segmenting entries, running the two analysis
//! passes, validating and highlighting offline, and inspecting stored
//! analyses.

use std::io::{self, IsTerminal, Read};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::compose::validate;
use crate::config::{self, ResolvedConfig};
use crate::core::{AnalysisRecord, AnalysisStore, Analyzer};
use crate::evidence::{extract_anchor_text, highlight, offset_to_line_col, FirstPass, Segment};
use crate::text::{normalize_for_storage, Segmentation, DEFAULT_MAX_TOKENS_PER_SENTENCE};

const ANCHOR_WINDOW: usize = 80;

/// groundnote - grounded insights for journal entries
#[derive(Parser, Debug)]
#[command(name = "groundnote")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Split an entry into sentences and tokens
    Segment {
        /// Entry file (reads from stdin if not provided)
        input: Option<PathBuf>,

        /// Tokens kept per sentence
        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS_PER_SENTENCE)]
        max_tokens: usize,

        /// Print the full segmentation as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run only the evidence pass and print the first pass as JSON
    Extract {
        /// Entry file (reads from stdin if not provided)
        input: Option<PathBuf>,
    },

    /// Run both passes on an entry
    Analyze {
        /// Entry file (reads from stdin if not provided)
        input: Option<PathBuf>,

        /// Entry identifier (defaults to the file stem)
        #[arg(short, long)]
        entry_id: Option<String>,

        /// Do not append the result to the analysis store
        #[arg(long)]
        no_save: bool,

        /// Print the full analysis as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a stored composition response against a first pass
    Validate {
        /// First pass JSON file
        #[arg(long)]
        first_pass: PathBuf,

        /// Raw composition response (reads from stdin if not provided)
        #[arg(long)]
        composition: Option<PathBuf>,
    },

    /// Render an entry with its first-pass quotes marked
    Highlight {
        /// Entry file
        #[arg(long)]
        file: PathBuf,

        /// First pass JSON file
        #[arg(long)]
        first_pass: PathBuf,

        /// Print segments as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show the latest stored analysis of an entry
    Show {
        /// Entry identifier
        entry_id: String,

        /// Current entry text, for positions and staleness
        #[arg(long)]
        text: Option<PathBuf>,
    },

    /// Show resolved configuration (debug)
    Config {
        /// Also check that the model backend is reachable
        #[arg(long)]
        check: bool,
    },
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        match self.command {
            Commands::Segment {
                input,
                max_tokens,
                json,
            } => segment_entry(input, max_tokens, json),
            Commands::Extract { input } => extract_entry(input).await,
            Commands::Analyze {
                input,
                entry_id,
                no_save,
                json,
            } => analyze_entry(input, entry_id, no_save, json).await,
            Commands::Validate {
                first_pass,
                composition,
            } => validate_composition(&first_pass, composition),
            Commands::Highlight {
                file,
                first_pass,
                json,
            } => highlight_entry(&file, &first_pass, json),
            Commands::Show { entry_id, text } => show_analysis(&entry_id, text).await,
            Commands::Config { check } => show_config(check).await,
        }
    }
}

/// Read an entry from a file, or from stdin when it is piped
fn read_input(path: Option<&Path>) -> Result<String> {
    if let Some(path) = path {
        return std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read input file: {}", path.display()));
    }
    if io::stdin().is_terminal() {
        anyhow::bail!("No input provided. Pass a file or pipe to stdin");
    }
    let mut buffer = String::new();
    io::stdin()
        .read_to_string(&mut buffer)
        .context("Failed to read from stdin")?;
    Ok(buffer)
}

fn read_first_pass(path: &Path) -> Result<FirstPass> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read first pass: {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse first pass: {}", path.display()))
}

fn analyzer(config: &ResolvedConfig) -> Result<Analyzer> {
    Ok(Analyzer::from_config(config)?)
}

fn segment_entry(input: Option<PathBuf>, max_tokens: usize, json: bool) -> Result<()> {
    let source = normalize_for_storage(&read_input(input.as_deref())?);
    let segmentation = Segmentation::new(&source, max_tokens);

    if json {
        println!("{}", serde_json::to_string_pretty(&segmentation)?);
        return Ok(());
    }

    for sentence in &segmentation.sentences {
        println!(
            "[{}] {}..{} (~{}) {}",
            sentence.sid, sentence.char_start, sentence.char_end, sentence.token_count, sentence.text
        );
    }
    eprintln!(
        "\n[{} sentences, {} tokens]",
        segmentation.sentences.len(),
        segmentation.tokens.len()
    );
    Ok(())
}

async fn extract_entry(input: Option<PathBuf>) -> Result<()> {
    let text = read_input(input.as_deref())?;
    let cfg = config::load_config()?;
    let extraction = analyzer(&cfg)?.extract(&text).await?;

    println!("{}", serde_json::to_string_pretty(&extraction.first_pass)?);
    for warning in &extraction.warnings {
        eprintln!("warning: {}", warning);
    }
    eprintln!(
        "\n[{} quotes across {} chunk(s)]",
        extraction.first_pass.evidence.quotes.len(),
        extraction.chunks.len()
    );
    Ok(())
}

async fn analyze_entry(input: Option<PathBuf>, entry_id: Option<String>, no_save: bool, json: bool) -> Result<()> {
    let text = read_input(input.as_deref())?;
    let entry_id = entry_id
        .or_else(|| {
            input
                .as_deref()
                .and_then(Path::file_stem)
                .map(|s| s.to_string_lossy().into_owned())
        })
        .unwrap_or_else(|| "stdin".to_string());

    let cfg = config::load_config()?;
    let analysis = analyzer(&cfg)?.analyze(&entry_id, &text).await?;

    if !no_save {
        let store = AnalysisStore::open(&cfg.home).await?;
        let record = AnalysisRecord::new(&analysis);
        store.append(&record)?;
        eprintln!("[Saved analysis {} to {}]", record.id, store.path().display());
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&analysis)?);
        return Ok(());
    }

    let output = &analysis.second_pass;
    println!("{}", output.summary);
    println!();
    println!("{}", output.narrative_summary);
    println!();
    println!(
        "Sentiment: {} ({:+.2}, sentence {})",
        output.sentiment.label, output.sentiment.score, output.sentiment.rationale_sid
    );
    if !output.micro.next_action.is_empty() {
        println!("Next: {}", output.micro.next_action);
    }
    if !output.micro.question.is_empty() {
        println!("Ask:  {}", output.micro.question);
    }
    println!();
    println!("{}", render_segments(&analysis.highlights));
    for warning in &analysis.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn validate_composition(first_pass: &Path, composition: Option<PathBuf>) -> Result<()> {
    let first_pass = read_first_pass(first_pass)?;
    let raw = read_input(composition.as_deref())?;

    let validated = validate(&raw, &first_pass)?;
    println!("{}", serde_json::to_string_pretty(&validated.output)?);
    for warning in &validated.warnings {
        eprintln!("warning: {}", warning);
    }
    Ok(())
}

fn highlight_entry(file: &Path, first_pass: &Path, json: bool) -> Result<()> {
    let source = normalize_for_storage(&read_input(Some(file))?);
    let first_pass = read_first_pass(first_pass)?;
    let segments = highlight(&source, &first_pass.evidence.quotes);

    if json {
        println!("{}", serde_json::to_string_pretty(&segments)?);
    } else {
        println!("{}", render_segments(&segments));
    }
    Ok(())
}

async fn show_analysis(entry_id: &str, text: Option<PathBuf>) -> Result<()> {
    let cfg = config::load_config()?;
    let store = AnalysisStore::open(&cfg.home).await?;
    let record = store
        .latest(entry_id)
        .await?
        .with_context(|| format!("No stored analysis for entry: {}", entry_id))?;

    let source = match text {
        Some(path) => Some(normalize_for_storage(&read_input(Some(&path))?)),
        None => None,
    };

    println!("Entry:    {}", record.entry_id);
    println!("Analysis: {}", record.id);
    println!("Created:  {}", record.created_at);
    println!("Schema:   {}", record.schema_version);
    println!("Hash:     {}", record.text_sha256);
    if let Some(source) = &source {
        if record.is_stale(source) {
            println!("Status:   STALE (entry changed since analysis)");
        } else {
            println!("Status:   current");
        }
    }
    println!();
    println!("{}", record.second_pass.summary);
    println!();

    let quotes = &record.first_pass.evidence.quotes;
    println!("Quotes ({}):", quotes.len());
    for quote in quotes {
        let sids = quote
            .sids
            .iter()
            .map(u32::to_string)
            .collect::<Vec<_>>()
            .join(",");
        match &source {
            Some(source) if !record.is_stale(source) => {
                let pos = offset_to_line_col(source, quote.start);
                println!("  {}:{} [{}] {:?}", pos.line, pos.col, sids, quote.method);
                println!("    {}", extract_anchor_text(source, quote.start, quote.end, ANCHOR_WINDOW));
            }
            _ => {
                println!("  {}..{} [{}] {:?}", quote.start, quote.end, sids, quote.method);
                println!("    \"{}\"", quote.text);
            }
        }
    }
    Ok(())
}

/// Plain text with highlighted segments bracketed
fn render_segments(segments: &[Segment]) -> String {
    segments
        .iter()
        .map(|segment| {
            if segment.is_highlight {
                format!("[[{}]]", segment.text)
            } else {
                segment.text.clone()
            }
        })
        .collect()
}

async fn show_config(check: bool) -> Result<()> {
    let cfg = config::load_config()?;

    println!("groundnote configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:  {}", cfg.home.display());
    println!("  Store: {}", cfg.store_path().display());
    println!();
    println!("Model:");
    println!("  Backend:    {}", cfg.model.describe());
    println!("  Configured: {}", cfg.is_configured());
    println!("  API key:    {}", if cfg.model.api_key.is_some() { "set" } else { "unset" });
    if check {
        match cfg.model.build()? {
            Some(model) => match model.health_check().await {
                Ok(()) => println!("  Health:     ok"),
                Err(err) => println!("  Health:     {:#}", err),
            },
            None => println!("  Health:     (skipped, no backend)"),
        }
    }
    println!();
    println!("Limits:");
    println!("{}", serde_yaml::to_string(&cfg.limits)?);
    Ok(())
}
