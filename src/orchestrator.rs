use anyhow::{Context, Result};
use colored::*;
use std::path::PathBuf;
use tokio::fs;
use tracing::{error, info};

use crate::binder::{bind, BindOutcome};
use crate::fetcher::Fetcher;
use crate::metadata::Metadata;

/// One book to download and bind.
#[derive(Debug, Clone)]
pub struct BookRequest {
    /// Used as the working directory name and as the bound file's title.
    pub name: String,
    /// e.g. a DOI such as `10.1007/978-1-4614-6170-8`.
    pub catalog_id: String,
    pub root: PathBuf,
    pub metadata: Option<Metadata>,
}

impl BookRequest {
    pub fn working_dir(&self) -> PathBuf {
        self.root.join(&self.name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    Success,
    DownloadFailed,
    BindingFailed,
}

impl RunOutcome {
    pub fn code(self) -> i32 {
        match self {
            RunOutcome::Success => 0,
            RunOutcome::DownloadFailed => 1,
            RunOutcome::BindingFailed => 2,
        }
    }
}

/// Downloads every chapter of `request` into `root/name` and binds them into
/// `root/name/name.pdf`. Only failing to create the working directory is an
/// error; component failures are reported through the outcome.
pub async fn run(fetcher: &Fetcher, request: &BookRequest) -> Result<RunOutcome> {
    let base_address = fetcher.catalog_address(&request.catalog_id);
    let path = request.working_dir();

    fs::create_dir_all(&path)
        .await
        .with_context(|| format!("Failed to create directory {}", path.display()))?;

    info!("Catalog: {}", base_address.green());
    info!("Directory: {}", path.display().to_string().blue());

    match fetcher.fetch(&base_address, &path).await {
        Ok(report) => info!(
            "Downloaded {} chapters, {} already present, {} grouped",
            report.downloaded, report.skipped_existing, report.grouped
        ),
        Err(e) => {
            error!("Download failed: {:#}", e);
            return Ok(RunOutcome::DownloadFailed);
        }
    }

    match bind(&path, &request.name, request.metadata.as_ref()).await {
        Ok(BindOutcome::Bound(report)) => {
            info!(
                "File of the bound book: {} ({} pages)",
                report.output.display().to_string().green(),
                report.page_count
            );
            Ok(RunOutcome::Success)
        }
        Ok(BindOutcome::TargetExists(output)) => {
            error!("Binding failed: {} already exists", output.display());
            Ok(RunOutcome::BindingFailed)
        }
        Err(e) => {
            error!("Binding failed: {:#}", e);
            Ok(RunOutcome::BindingFailed)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_codes_are_distinct() {
        assert_eq!(RunOutcome::Success.code(), 0);
        assert_eq!(RunOutcome::DownloadFailed.code(), 1);
        assert_eq!(RunOutcome::BindingFailed.code(), 2);
    }

    #[test]
    fn test_working_dir() {
        let request = BookRequest {
            name: "Ultrasonic".to_string(),
            catalog_id: "10.1007/978-981-287-470-2".to_string(),
            root: PathBuf::from("/data/literature"),
            metadata: None,
        };
        assert_eq!(request.working_dir(), PathBuf::from("/data/literature/Ultrasonic"));
    }
}
