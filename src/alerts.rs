use crate::error::StoreError;
use std::path::Path;
use tracing::error;

/// User-facing notifications. The GUI shell shows dialogs; headless runs log.
pub trait Alerts: Send + Sync {
    /// A store file could not be read; the store starts empty.
    fn reading_failed(&self, path: &Path, error: &StoreError);
    /// A store file could not be written; the in-memory state is kept.
    fn writing_failed(&self, path: &Path, error: &StoreError);
    fn unsupported_os(&self, os: &str);
    fn no_documents(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct LogAlerts;

impl Alerts for LogAlerts {
    fn reading_failed(&self, path: &Path, error: &StoreError) {
        error!(
            "Failed to read the configuration file {}, starting with a new configuration: {error}",
            path.display()
        );
    }

    fn writing_failed(&self, path: &Path, error: &StoreError) {
        error!("Failed to write to {}: {error}", path.display());
    }

    fn unsupported_os(&self, os: &str) {
        error!("Unsupported OS: {os}");
    }

    fn no_documents(&self) {
        error!("No documents path configured");
    }
}
