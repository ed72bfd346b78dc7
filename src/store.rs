//! One INI file on disk and its in-memory document.
//!
//! File traffic goes through a reader/writer lock (`load` reads, `save`
//! writes) that is separate from the lock guarding the document, so callers
//! mutating options never wait on disk I/O. A save renders the current
//! document inside the exclusive section, hashes it and skips the write when
//! the hash matches the last one written.

use crate::{
    alerts::Alerts,
    debounce::{Debouncer, FlushHandle},
    encoding::{self, CharsetProbe},
    error::StoreError,
    ini::{Document, KeyCase},
};
use parking_lot::RwLock;
use std::{
    fs::{self, File},
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written,
    Unchanged,
}

#[derive(Debug, Default)]
struct FileState {
    last_written: Option<blake3::Hash>,
    writes: u64,
}

pub struct Store {
    label: &'static str,
    path: PathBuf,
    key_case: KeyCase,
    render: fn(&Document) -> String,
    probe: Arc<dyn CharsetProbe>,
    doc: RwLock<Document>,
    file: RwLock<FileState>,
}

impl Store {
    pub fn new(label: &'static str, path: PathBuf, probe: Arc<dyn CharsetProbe>) -> Self {
        Self {
            label,
            path,
            key_case: KeyCase::Fold,
            render: Document::render,
            probe,
            doc: RwLock::new(Document::new(KeyCase::Fold)),
            file: RwLock::new(FileState::default()),
        }
    }

    /// Replaces how the document is turned into file text. The in-memory
    /// document is never modified by the renderer.
    pub fn with_renderer(mut self, render: fn(&Document) -> String) -> Self {
        self.render = render;
        self
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Clears the document and reads the file if it exists. On a parse or
    /// read error the document stays empty. Returns whether a file was read.
    pub fn load(&self) -> Result<bool, StoreError> {
        let _file = self.file.read();
        let mut doc = self.doc.write();
        doc.clear();

        if !self.path.is_file() {
            info!("{} not found at {}, creating new file", self.label, self.path.display());
            return Ok(false);
        }

        info!("reading {} from {}", self.label, self.path.display());
        let bytes = fs::read(&self.path).map_err(|err| StoreError::io(&self.path, err))?;
        let (text, encoding) = encoding::read_text(self.probe.as_ref(), &bytes);
        debug!("{} decoded as {}", self.label, encoding.name());
        *doc = Document::parse(&text, self.key_case).map_err(|err| StoreError::Parse {
            path: self.path.clone(),
            line: err.line,
            reason: err.reason,
        })?;
        Ok(true)
    }

    pub fn read<R>(&self, f: impl FnOnce(&Document) -> R) -> R {
        f(&*self.doc.read())
    }

    pub fn update<R>(&self, f: impl FnOnce(&mut Document) -> R) -> R {
        f(&mut *self.doc.write())
    }

    /// Writes the document if its rendering differs from the last write.
    pub fn save(&self) -> Result<SaveOutcome, StoreError> {
        let mut file = self.file.write();
        let text = (self.render)(&*self.doc.read());
        let hash = blake3::hash(text.as_bytes());
        if file.last_written == Some(hash) {
            debug!("{} unchanged, skipping write", self.label);
            return Ok(SaveOutcome::Unchanged);
        }

        info!("writing {} to {}", self.label, self.path.display());
        write_atomically(&self.path, &text)?;
        file.last_written = Some(hash);
        file.writes += 1;
        Ok(SaveOutcome::Written)
    }

    /// Number of physical writes since the store was created.
    pub fn disk_writes(&self) -> u64 {
        self.file.read().writes
    }

    /// Text the next save would write.
    pub fn rendered(&self) -> String {
        (self.render)(&*self.doc.read())
    }
}

/// Writes `text` next to `path`, syncs it to disk and renames it into place
/// so readers never see a partially written file.
pub fn write_atomically(path: &Path, text: &str) -> Result<(), StoreError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|err| StoreError::io(parent, err))?;
        }
    }

    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".tmp");
    let temp = path.with_file_name(name);

    let write = || -> std::io::Result<()> {
        let mut file = File::create(&temp)?;
        file.write_all(text.as_bytes())?;
        file.flush()?;
        file.sync_all()?;
        Ok(())
    };
    if let Err(err) = write() {
        let _ = fs::remove_file(&temp);
        return Err(StoreError::io(&temp, err));
    }
    fs::rename(&temp, path).map_err(|err| StoreError::io(path, err))?;

    // the rename itself is only durable once the directory entry is synced
    let parent = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or(Path::new("."));
    if let Err(err) = sync_dir(parent) {
        warn!("Failed to sync {}: {err}", parent.display());
    }
    Ok(())
}

#[cfg(unix)]
fn sync_dir(dir: &Path) -> std::io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) -> std::io::Result<()> {
    Ok(())
}

/// A store together with its debounced and forced write paths.
pub struct Persisted {
    store: Arc<Store>,
    scheduler: Debouncer,
    alerts: Arc<dyn Alerts>,
    delay: Duration,
}

impl Persisted {
    pub fn new(store: Store, scheduler: Debouncer, alerts: Arc<dyn Alerts>, delay: Duration) -> Self {
        Self {
            store: Arc::new(store),
            scheduler,
            alerts,
            delay,
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn alerts(&self) -> &dyn Alerts {
        self.alerts.as_ref()
    }

    /// Loads the file, reporting failures instead of returning them.
    pub fn load(&self) -> bool {
        match self.store.load() {
            Ok(_) => true,
            Err(err) => {
                error!("{err}");
                self.alerts.reading_failed(self.store.path(), &err);
                false
            }
        }
    }

    /// Arms (or re-arms) the debounced save for this store.
    pub fn schedule_write(&self) -> FlushHandle {
        let store = Arc::clone(&self.store);
        let alerts = Arc::clone(&self.alerts);
        self.scheduler.schedule(self.store.label(), self.delay, move || {
            if let Err(err) = store.save() {
                error!("{err}");
                alerts.writing_failed(store.path(), &err);
            }
        })
    }

    pub fn save(&self) -> Result<SaveOutcome, StoreError> {
        self.store.save()
    }

    /// Cancels any pending debounced save, then saves synchronously.
    pub fn flush(&self) -> Result<SaveOutcome, StoreError> {
        self.scheduler.cancel(self.store.label());
        self.store.save().map_err(|err| {
            error!("{err}");
            self.alerts.writing_failed(self.store.path(), &err);
            err
        })
    }

    pub fn is_write_pending(&self) -> bool {
        self.scheduler.is_pending(self.store.label())
    }
}
