//! ThoughtFlow CLI - build mind maps from the command line
//!
//! Usage: thoughtflow-cli [OPTIONS] <COMMAND>
//!
//! Output goes to stdout as JSON; logs go to stderr.

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use std::io::Read as _;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thoughtflow_lib::language::LanguageDetector;
use thoughtflow_lib::{build_pipeline, loader, MindmapRequest, Settings};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Main CLI Structure
// ============================================================================

#[derive(Parser)]
#[command(name = "thoughtflow-cli")]
#[command(version, about = "Turn documents into hierarchical mind maps", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Settings file (default: $THOUGHTFLOW_SETTINGS or the user config dir)
    #[arg(long, global = true)]
    settings: Option<PathBuf>,

    /// Detailed logging
    #[arg(long, short, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a mind map from a file, or from stdin with "-"
    Build {
        /// .txt, .md, .json or .pdf file, or "-" for stdin
        input: String,
        /// Language tag (default: auto-detect)
        #[arg(long)]
        lang: Option<String>,
        #[arg(long)]
        max_depth: Option<usize>,
        #[arg(long)]
        min_size: Option<usize>,
        /// Also generate node descriptions
        #[arg(long)]
        descriptions: bool,
        /// Pretty-print the JSON output
        #[arg(long)]
        pretty: bool,
    },
    /// Print the text extracted from a file
    Preprocess {
        file: PathBuf,
    },
    /// Detect the language of a file, or of stdin with "-"
    DetectLanguage {
        input: String,
    },
    /// Show the effective settings (API keys masked)
    Config {
        /// Write default settings to the settings path
        #[arg(long)]
        init: bool,
        /// Overwrite an existing settings file with --init
        #[arg(long)]
        force: bool,
    },
}

// ============================================================================
// Helpers
// ============================================================================

fn init_logging(verbose: bool, settings: &Settings) {
    let fallback = if verbose { settings.log_level.as_str() } else { "warn" };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback)))
        .init();
}

fn read_file(path: &Path, settings: &Settings) -> anyhow::Result<String> {
    let bytes = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    Ok(loader::extract_text(&filename, &bytes, settings.server.max_upload_bytes)?)
}

/// File contents via the loader, or raw stdin for "-"
fn read_input(input: &str, settings: &Settings) -> anyhow::Result<String> {
    if input == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("failed to read stdin")?;
        return Ok(text);
    }
    read_file(Path::new(input), settings)
}

// ============================================================================
// Commands
// ============================================================================

async fn run_cli(cli: Cli, settings: Settings) -> anyhow::Result<()> {
    match cli.command {
        Commands::Build {
            input,
            lang,
            max_depth,
            min_size,
            descriptions,
            pretty,
        } => {
            let text = read_input(&input, &settings)?;
            let builder = build_pipeline(Arc::new(settings)).await?;
            let request = MindmapRequest {
                lang,
                max_depth,
                min_size,
                with_descriptions: descriptions.then_some(true),
                ..MindmapRequest::from_document(text)
            };

            let mut response = builder.build(request).await?;
            if input != "-" {
                response.metadata.filename = Path::new(&input)
                    .file_name()
                    .map(|n| n.to_string_lossy().to_string());
            }

            let json = if pretty {
                serde_json::to_string_pretty(&response)?
            } else {
                serde_json::to_string(&response)?
            };
            println!("{}", json);
        }

        Commands::Preprocess { file } => {
            let text = read_file(&file, &settings)?;
            println!("{}", text);
        }

        Commands::DetectLanguage { input } => {
            let text = read_input(&input, &settings)?;
            let detection = LanguageDetector::new(settings.defaults.language).detect(&text);
            if detection.detected {
                println!(
                    "{}\t{}\t{:.2}",
                    detection.language.code(),
                    detection.language.name(),
                    detection.confidence
                );
            } else {
                println!(
                    "{}\t{}\t(default, detection inconclusive)",
                    detection.language.code(),
                    detection.language.name()
                );
            }
        }

        Commands::Config { init, force } => {
            if init {
                let path = Settings::resolve_path(cli.settings.as_deref())
                    .context("no settings path (set THOUGHTFLOW_SETTINGS or pass --settings)")?;
                if path.exists() && !force {
                    bail!("{} already exists (use --force to overwrite)", path.display());
                }
                Settings::default().save(&path)?;
                println!("Wrote default settings to {}", path.display());
            } else {
                println!("{}", serde_json::to_string_pretty(&settings.masked())?);
            }
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let settings = match Settings::load(cli.settings.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_logging(cli.verbose, &settings);

    if let Err(e) = run_cli(cli, settings).await {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_parses_build() {
        let cli = Cli::try_parse_from([
            "thoughtflow-cli",
            "build",
            "notes.md",
            "--lang",
            "ar",
            "--max-depth",
            "2",
            "--pretty",
        ])
        .unwrap();
        match cli.command {
            Commands::Build { input, lang, max_depth, min_size, pretty, descriptions } => {
                assert_eq!(input, "notes.md");
                assert_eq!(lang.as_deref(), Some("ar"));
                assert_eq!(max_depth, Some(2));
                assert_eq!(min_size, None);
                assert!(pretty);
                assert!(!descriptions);
            }
            _ => panic!("expected build"),
        }
    }

    #[test]
    fn test_cli_global_settings_flag() {
        let cli = Cli::try_parse_from(["thoughtflow-cli", "config", "--settings", "/tmp/s.json", "--init"]).unwrap();
        assert_eq!(cli.settings, Some(PathBuf::from("/tmp/s.json")));
        assert!(matches!(cli.command, Commands::Config { init: true, force: false }));
    }

    #[test]
    fn test_read_file_uses_loader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("doc.json");
        std::fs::write(&path, r#"{"a": "first text", "b": "second text"}"#).unwrap();
        let text = read_file(&path, &Settings::default()).unwrap();
        assert_eq!(text, "first text\nsecond text");

        let bad = dir.path().join("doc.exe");
        std::fs::write(&bad, "x").unwrap();
        assert!(read_file(&bad, &Settings::default()).is_err());
    }
}
