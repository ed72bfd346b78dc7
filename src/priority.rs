use crate::{
    alerts::Alerts,
    debounce::{Debouncer, FlushHandle},
    encoding::CharsetProbe,
    error::StoreError,
    ini::Document,
    store::{Persisted, SaveOutcome, Store},
};
use serde::Serialize;
use std::{path::Path, sync::Arc, time::Duration};

pub const PRIORITY_FILE: &str = "mods.settings";

const ENABLED: &str = "enabled";
const PRIORITY: &str = "priority";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PriorityEntry {
    pub id: String,
    pub enabled: bool,
    pub priority: Option<String>,
}

/// `enabled` -> `Enabled`: first character upper case, the rest lower case.
pub fn canonical_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

fn render_canonical(doc: &Document) -> String {
    doc.map_keys(canonical_key).render()
}

/// The game's load-order file (`mods.settings`).
pub struct Priorities {
    persisted: Persisted,
}

impl Priorities {
    pub fn open(
        settings_dir: &Path,
        scheduler: Debouncer,
        alerts: Arc<dyn Alerts>,
        probe: Arc<dyn CharsetProbe>,
        delay: Duration,
    ) -> Self {
        let store = Store::new(PRIORITY_FILE, settings_dir.join(PRIORITY_FILE), probe)
            .with_renderer(render_canonical);
        Self {
            persisted: Persisted::new(store, scheduler, alerts, delay),
        }
    }

    pub fn store(&self) -> &Store {
        self.persisted.store()
    }

    pub fn path(&self) -> &Path {
        self.store().path()
    }

    pub fn load(&self) -> bool {
        self.persisted.load()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.store().read(|doc| doc.has_section(id))
    }

    pub fn get_priority(&self, id: &str) -> Option<String> {
        self.store()
            .read(|doc| doc.get(id, PRIORITY).flatten().map(str::to_string))
    }

    /// New entries start enabled. Returns false for an id that cannot be
    /// written as a section name.
    pub fn set_priority(&self, id: &str, priority: &str) -> bool {
        let stored = self.store().update(|doc| {
            if !doc.has_section(id) && !doc.set(id, ENABLED, Some("1".to_string())) {
                return false;
            }
            doc.set(id, PRIORITY, Some(priority.to_string()))
        });
        if stored {
            self.write_priority();
        }
        stored
    }

    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.store().read(|doc| {
            doc.get(id, ENABLED)
                .map(|value| value.map(str::trim) == Some("1"))
        })
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) {
        self.store().update(|doc| {
            doc.set(id, ENABLED, Some(if enabled { "1" } else { "0" }.to_string()));
        });
        self.write_priority();
    }

    /// Drops the entry and writes immediately, replacing any pending write.
    pub fn remove_priority(&self, id: &str) -> Result<SaveOutcome, StoreError> {
        self.store().update(|doc| doc.remove_section(id));
        self.persisted.flush()
    }

    /// Entries in file order.
    pub fn entries(&self) -> Vec<PriorityEntry> {
        self.store().read(|doc| {
            doc.sections()
                .map(|section| {
                    let lookup = |wanted: &str| {
                        section
                            .iter()
                            .find(|(key, _)| *key == wanted)
                            .and_then(|(_, value)| value)
                    };
                    PriorityEntry {
                        id: section.name().to_string(),
                        enabled: lookup(ENABLED).map(str::trim) == Some("1"),
                        priority: lookup(PRIORITY).map(str::to_string),
                    }
                })
                .collect()
        })
    }

    pub fn write_priority(&self) -> FlushHandle {
        self.persisted.schedule_write()
    }

    pub fn save(&self) -> Result<SaveOutcome, StoreError> {
        self.persisted.save()
    }

    pub fn flush(&self) -> Result<SaveOutcome, StoreError> {
        self.persisted.flush()
    }

    pub fn is_write_pending(&self) -> bool {
        self.persisted.is_write_pending()
    }
}
