//! Repairs the game's `user.settings` after older tools wrote section headers
//! with doubled brackets (`[[Gameplay]]`), which the game refuses to read.

use crate::{
    encoding::{self, CharsetProbe},
    error::StoreError,
    ini::{Document, KeyCase},
    store::write_atomically,
};
use std::{
    fs,
    path::{Path, PathBuf},
};
use tracing::{debug, info, warn};

pub const USER_SETTINGS_FILE: &str = "user.settings";
pub const DX12_USER_SETTINGS_FILE: &str = "dx12user.settings";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BracketRepair {
    pub path: PathBuf,
    /// `(malformed, clean)` section names whose options moved.
    pub renamed: Vec<(String, String)>,
    /// Malformed sections discarded because the clean name already existed.
    pub dropped: Vec<String>,
}

impl BracketRepair {
    pub fn changed(&self) -> bool {
        !self.renamed.is_empty() || !self.dropped.is_empty()
    }
}

fn clean_name(name: &str) -> &str {
    name.trim_start_matches('[').trim_end_matches(']')
}

/// Strips stray brackets from every section name in the file at `path`.
/// The file is rewritten only if a section was renamed or dropped.
pub fn repair_section_brackets(
    path: &Path,
    probe: &dyn CharsetProbe,
) -> Result<BracketRepair, StoreError> {
    let bytes = fs::read(path).map_err(|err| StoreError::io(path, err))?;
    let (text, detected) = encoding::read_text(probe, &bytes);
    debug!("{} decoded as {}", path.display(), detected.name());
    let doc = Document::parse(&text, KeyCase::Preserve).map_err(|err| StoreError::Parse {
        path: path.to_path_buf(),
        line: err.line,
        reason: err.reason,
    })?;

    let mut report = BracketRepair {
        path: path.to_path_buf(),
        ..BracketRepair::default()
    };
    let mut repaired = Document::new(KeyCase::Preserve);
    for section in doc.sections() {
        let name = section.name();
        let clean = clean_name(name);
        if clean == name {
            copy_into(&mut repaired, clean, section.iter());
            continue;
        }
        if clean.is_empty() || doc.has_section(clean) || repaired.has_section(clean) {
            report.dropped.push(name.to_string());
            continue;
        }
        copy_into(&mut repaired, clean, section.iter());
        report.renamed.push((name.to_string(), clean.to_string()));
    }

    if report.changed() {
        info!(
            "repairing {} section names in {}",
            report.renamed.len() + report.dropped.len(),
            path.display()
        );
        write_atomically(path, &repaired.render())?;
    }
    Ok(report)
}

fn copy_into<'a>(
    doc: &mut Document,
    section: &str,
    options: impl Iterator<Item = (&'a str, Option<&'a str>)>,
) {
    doc.add_section(section);
    for (key, value) in options {
        doc.set(section, key, value.map(str::to_string));
    }
}

/// Runs the repair on `user.settings` in `dir`. Failures are logged and
/// never stop startup.
pub fn repair_user_settings(dir: &Path, probe: &dyn CharsetProbe) -> Option<BracketRepair> {
    let path = dir.join(USER_SETTINGS_FILE);
    if !path.is_file() {
        debug!("no {} to repair in {}", USER_SETTINGS_FILE, dir.display());
        return None;
    }
    match repair_section_brackets(&path, probe) {
        Ok(report) => Some(report),
        Err(err) => {
            warn!("Failed to repair {}: {err}", path.display());
            None
        }
    }
}
