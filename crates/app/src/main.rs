use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use medrec_storage::SessionStore;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

mod commands;

/// Extract patient records from scanned medical documents.
#[derive(Debug, Parser)]
#[clap(
    version,
    after_help = r#"
Environment Variables:
  - GEMINI_API_KEY: API key for `explain`, unless set in the config file.
  - RUST_LOG: log filter (default "info"). Logs go to stderr.
"#
)]
struct Opts {
    /// TOML configuration file (defaults to ./medrec.toml when present).
    #[clap(long, global = true)]
    config: Option<PathBuf>,

    #[clap(subcommand)]
    subcmd: Cmd,
}

#[derive(Debug, Subcommand)]
enum Cmd {
    /// OCR documents and print the extracted fields as JSON lines.
    Process {
        /// PDF, PNG, JPG or JPEG files.
        #[clap(required = true)]
        files: Vec<PathBuf>,
    },
    /// Look up one field for a patient, from the record directory or the given documents.
    Lookup {
        /// Patient / insurance record id.
        id: String,
        /// One of: name, father, aadhar, gender, blood, address, hospital,
        /// phone, disease, medicines, bed, amount, charges.
        field: String,
        /// Documents to process before the lookup.
        #[clap(long = "file")]
        files: Vec<PathBuf>,
    },
    /// Ask the language model to explain a medical or insurance term.
    Explain {
        #[clap(required = true)]
        question: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();

    let opts = Opts::parse();
    tracing::debug!("Parsed options: {opts:?}");

    let config = commands::build_config(opts.config.as_deref(), std::env::var("GEMINI_API_KEY").ok())?;

    match opts.subcmd {
        Cmd::Process { files } => {
            let processor = Arc::new(medrec_ocr::default_processor(&config.ocr));
            let total = files.len();
            let results = commands::process_files(processor, files).await?;
            for (path, result) in &results {
                let report = commands::UploadReport::new(path, result);
                println!("{}", serde_json::to_string(&report)?);
            }
            let failed = results.iter().filter(|(_, r)| r.is_err()).count();
            if failed > 0 {
                bail!("{failed} of {total} uploads failed");
            }
        }
        Cmd::Lookup { id, field, files } => {
            let mut store = SessionStore::new(commands::load_directory(&config)?);
            if !files.is_empty() {
                let processor = Arc::new(medrec_ocr::default_processor(&config.ocr));
                let results = commands::process_files(processor, files).await?;
                commands::ingest(&mut store, results);
            }
            let output = commands::lookup(&store, &id, &field)?;
            println!("{}", serde_json::to_string(&output)?);
        }
        Cmd::Explain { question } => {
            let answer = commands::explain(&config, &question.join(" ")).await?;
            println!("{answer}");
        }
    }
    Ok(())
}
