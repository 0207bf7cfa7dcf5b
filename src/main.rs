use anyhow::Result;
use bookbinder::{
    bind, load_metadata_file, parse_metadata_pair, run, BindOutcome, BookRequest, Fetcher,
    FetcherOptions, Metadata, RunOutcome, DEFAULT_HOST,
};
use clap::{Args as ClapArgs, Parser, Subcommand};
use colored::*;
use std::path::PathBuf;
use std::process;
use std::time::Duration;
use tokio::fs;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "bookbinder")]
#[command(about = "CLI utility to download every chapter of an online book and bind them into a single PDF")]
#[command(version = "0.1.0")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download all chapters of a book and bind them (root/name/name.pdf)
    Run {
        /// Name of the book, used for the directory and the bound file
        name: String,

        /// Catalog identifier of the book, e.g. a DOI
        catalog_id: String,

        /// Directory in which the book's directory is created
        #[arg(short = 'o', long = "root", default_value = ".")]
        root: PathBuf,

        #[command(flatten)]
        fetch: FetchArgs,

        #[command(flatten)]
        meta: MetaArgs,
    },
    /// Download all chapters of a book into a directory without binding
    Fetch {
        /// Catalog identifier of the book, e.g. a DOI
        catalog_id: String,

        /// Directory to save chapters into
        dir: PathBuf,

        #[command(flatten)]
        fetch: FetchArgs,
    },
    /// Bind the PDF files of a directory into a single document
    Bind {
        /// Directory containing the chapter PDF files
        dir: PathBuf,

        /// Title of the bound file (truncated to 30 characters)
        title: String,

        #[command(flatten)]
        meta: MetaArgs,
    },
}

#[derive(ClapArgs)]
struct FetchArgs {
    /// Host that catalog and chapter addresses are resolved against
    #[arg(long = "host", default_value = DEFAULT_HOST)]
    host: String,

    /// Request timeout in seconds
    #[arg(short = 't', long = "timeout", default_value = "300.0", value_parser = parse_timeout)]
    timeout: f64,

    /// Stop after this many listing pages
    #[arg(long = "max-pages")]
    max_pages: Option<u32>,
}

impl FetchArgs {
    fn options(&self) -> FetcherOptions {
        FetcherOptions {
            host: self.host.clone(),
            timeout: Duration::from_secs_f64(self.timeout),
            max_pages: self.max_pages,
        }
    }
}

#[derive(ClapArgs)]
struct MetaArgs {
    /// Metadata entry written into the bound PDF, e.g. --meta Title="My Book"
    #[arg(short = 'm', long = "meta", value_name = "KEY=VALUE", value_parser = parse_metadata_pair)]
    entries: Vec<(String, String)>,

    /// JSON object of metadata entries; --meta values take precedence
    #[arg(long = "meta-file")]
    file: Option<PathBuf>,
}

impl MetaArgs {
    fn metadata(&self) -> Result<Option<Metadata>> {
        let mut metadata = match &self.file {
            Some(path) => load_metadata_file(path)?,
            None => Metadata::new(),
        };
        metadata.extend(self.entries.iter().cloned());

        Ok(if metadata.is_empty() { None } else { Some(metadata) })
    }
}

fn parse_timeout(s: &str) -> Result<f64, String> {
    let value = s.parse::<f64>().map_err(|_| "Not a number.")?;
    if value <= 0.0 {
        return Err("Must be a positive number.".to_string());
    }
    Ok(value)
}

async fn execute(command: Commands) -> Result<i32> {
    match command {
        Commands::Run { name, catalog_id, root, fetch, meta } => {
            let fetcher = Fetcher::new(fetch.options())?;
            let request = BookRequest {
                name,
                catalog_id,
                root,
                metadata: meta.metadata()?,
            };

            let outcome = run(&fetcher, &request).await?;
            if outcome == RunOutcome::Success {
                info!("{}", "Fin".green());
            }
            Ok(outcome.code())
        }
        Commands::Fetch { catalog_id, dir, fetch } => {
            let fetcher = Fetcher::new(fetch.options())?;
            fs::create_dir_all(&dir).await?;

            let report = fetcher.fetch(&fetcher.catalog_address(&catalog_id), &dir).await?;
            info!(
                "Visited {} pages: {} downloaded, {} already present, {} grouped",
                report.pages_visited, report.downloaded, report.skipped_existing, report.grouped
            );
            Ok(0)
        }
        Commands::Bind { dir, title, meta } => {
            let metadata = meta.metadata()?;
            match bind(&dir, &title, metadata.as_ref()).await? {
                BindOutcome::Bound(report) => {
                    info!(
                        "Bound {} files ({} duplicates skipped) into {}",
                        report.files_bound,
                        report.duplicates,
                        report.output.display().to_string().green()
                    );
                    Ok(0)
                }
                BindOutcome::TargetExists(_) => Ok(1),
            }
        }
    }
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::from_default_env()
        .add_directive("hyper=warn".parse().unwrap())
        .add_directive("bookbinder=info".parse().unwrap());

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    let args = Args::parse();

    match execute(args.command).await {
        Ok(code) => process::exit(code),
        Err(e) => {
            error!("{}", format!("Error: {:#}", e).red());
            process::exit(1);
        }
    }
}
