use crate::error::PathError;
use directories::{BaseDirs, UserDirs};
use std::{
    fs,
    path::{Component, Path, PathBuf},
};
use tracing::{debug, warn};

pub const GAME_NAME: &str = "The Witcher 3";
pub const GAME_EXE: &str = "witcher3.exe";
const STEAM_APP_ID: &str = "292030";
const PROTON_DOCUMENTS: &str = "pfx/drive_c/users/steamuser/My Documents";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Platform {
    Windows,
    Unix,
    Unsupported(String),
}

impl Platform {
    pub fn current() -> Self {
        Platform::from_os(std::env::consts::OS)
    }

    pub fn from_os(os: &str) -> Self {
        match os {
            "windows" => Platform::Windows,
            "linux" | "macos" => Platform::Unix,
            other => Platform::Unsupported(other.to_string()),
        }
    }
}

/// Interactive fallback when automatic resolution comes up empty.
pub trait Picker: Send + Sync {
    fn pick_directory(&self, title: &str) -> Option<PathBuf>;
    fn pick_file(&self, title: &str, start: Option<&Path>) -> Option<PathBuf>;
}

/// Picker for headless runs: every selection is cancelled.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoPicker;

impl Picker for NoPicker {
    fn pick_directory(&self, _title: &str) -> Option<PathBuf> {
        None
    }

    fn pick_file(&self, _title: &str, _start: Option<&Path>) -> Option<PathBuf> {
        None
    }
}

/// Platform-specific locations of the documents and configuration roots.
#[derive(Debug, Clone)]
pub struct Locator {
    platform: Platform,
    home: Option<PathBuf>,
}

impl Locator {
    pub fn detect() -> Self {
        let home = BaseDirs::new().map(|base| base.home_dir().to_path_buf());
        Self::new(Platform::current(), home)
    }

    pub fn new(platform: Platform, home: Option<PathBuf>) -> Self {
        Self { platform, home }
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    pub fn documents_dir(&self, picker: &dyn Picker) -> Result<PathBuf, PathError> {
        let found = match &self.platform {
            Platform::Windows => UserDirs::new()
                .and_then(|dirs| dirs.document_dir().map(normalize_path))
                .filter(|path| path.exists()),
            Platform::Unix => self
                .documents_candidates()
                .into_iter()
                .find(|candidate| candidate.exists()),
            Platform::Unsupported(os) => return Err(PathError::UnsupportedOs(os.clone())),
        };
        if let Some(path) = found {
            debug!("documents directory: {}", path.display());
            return Ok(path);
        }

        let title = format!("Select \"My Documents\" directory containing the {GAME_NAME} config directory");
        match picker.pick_directory(&title) {
            Some(path) if path.exists() => Ok(normalize_path(&path)),
            _ => Err(PathError::NoDocuments),
        }
    }

    /// Proton prefixes used by Steam on desktop Linux and the Steam Deck, in probe order.
    pub fn documents_candidates(&self) -> Vec<PathBuf> {
        let mut candidates = Vec::new();
        if let Some(home) = &self.home {
            candidates.push(home.join(".local/share/Steam/steamapps"));
            candidates.push(home.join(".steam/steam/steamapps"));
        }
        candidates.push(PathBuf::from("/home/deck/.local/share/Steam/steamapps"));
        candidates.push(PathBuf::from("/run/media/mmcblk0p1/steamapps"));

        candidates
            .into_iter()
            .map(|steamapps| {
                normalize_path(
                    &steamapps
                        .join("compatdata")
                        .join(STEAM_APP_ID)
                        .join(PROTON_DOCUMENTS),
                )
            })
            .collect()
    }

    pub fn config_dir(&self, picker: &dyn Picker) -> Result<PathBuf, PathError> {
        match &self.platform {
            Platform::Windows => self.documents_dir(picker),
            Platform::Unix => {
                let home = self.home.as_ref().ok_or(PathError::NoHome)?;
                Ok(normalize_path(&home.join(".config")))
            }
            Platform::Unsupported(os) => Err(PathError::UnsupportedOs(os.clone())),
        }
    }

    pub fn config_folder_name(&self) -> &'static str {
        match self.platform {
            Platform::Unix => "TheWitcher3ModManager",
            _ => "The Witcher 3 Mod Manager",
        }
    }
}

/// Install root for a game exe path: three levels above `bin/x64/witcher3.exe`.
pub fn game_root_of(exe: &Path) -> PathBuf {
    let mut root = exe;
    for _ in 0..3 {
        root = root.parent().unwrap_or(Path::new(""));
    }
    root.to_path_buf()
}

pub fn looks_like_game_root(path: &Path) -> bool {
    path.is_dir() && path.join("content").is_dir() && path.join("bin/x64").join(GAME_EXE).is_file()
}

/// Accepts the game exe or the install directory and returns the exe path
/// if it points into a real installation.
pub fn validate_game_exe(candidate: &Path) -> Option<PathBuf> {
    if candidate.as_os_str().is_empty() {
        return None;
    }
    let is_exe = candidate
        .extension()
        .map(|ext| ext == "exe")
        .unwrap_or(false);
    let root = if is_exe {
        game_root_of(candidate)
    } else {
        candidate.to_path_buf()
    };
    if !looks_like_game_root(&root) {
        debug!("not a game installation: {}", root.display());
        return None;
    }
    if is_exe {
        Some(normalize_path(candidate))
    } else {
        Some(normalize_path(&root.join("bin/x64").join(GAME_EXE)))
    }
}

/// Finds a directory that may differ from `path` only in letter case.
///
/// Exact matches win; otherwise the parent's children are compared
/// case-insensitively. With `create`, a missing directory is created.
pub fn verify_internal_path(path: &Path, create: bool) -> Option<PathBuf> {
    if path.as_os_str().is_empty() {
        return None;
    }
    match probe_internal_path(path, create) {
        Ok(found) => found,
        Err(err) => {
            warn!("Error checking path {}: {err}", path.display());
            None
        }
    }
}

fn probe_internal_path(path: &Path, create: bool) -> std::io::Result<Option<PathBuf>> {
    let absolute = absolute(path)?;
    if absolute.is_dir() {
        return Ok(Some(absolute));
    }

    let create_missing = |target: &Path| -> std::io::Result<Option<PathBuf>> {
        if create {
            fs::create_dir_all(target)?;
            Ok(Some(target.to_path_buf()))
        } else {
            Ok(None)
        }
    };

    let (Some(parent), Some(name)) = (absolute.parent(), absolute.file_name()) else {
        return create_missing(&absolute);
    };
    if !parent.is_dir() {
        return create_missing(&absolute);
    }

    let wanted = name.to_string_lossy().to_lowercase();
    let mut matches = Vec::new();
    for entry in fs::read_dir(parent)? {
        let entry = entry?;
        if !entry.path().is_dir() {
            continue;
        }
        if entry.file_name().to_string_lossy().to_lowercase() == wanted {
            matches.push(entry.path());
        }
    }
    matches.sort();
    if matches.len() > 1 {
        debug!(
            "{} directories match {} case-insensitively, using the first",
            matches.len(),
            absolute.display()
        );
    }
    match matches.into_iter().next() {
        Some(existing) => Ok(Some(existing)),
        None => create_missing(&absolute),
    }
}

fn absolute(path: &Path) -> std::io::Result<PathBuf> {
    if path.is_absolute() {
        Ok(normalize_path(path))
    } else {
        Ok(normalize_path(&std::env::current_dir()?.join(path)))
    }
}

/// Lexical normalization: folds `.` and `..` and turns `\` into `/`.
pub fn normalize_path(path: &Path) -> PathBuf {
    let raw = path.to_string_lossy().replace('\\', "/");
    let mut out = PathBuf::new();
    for component in Path::new(&raw).components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                let at_root = matches!(
                    out.components().next_back(),
                    None | Some(Component::RootDir) | Some(Component::Prefix(_))
                );
                if at_root && !out.as_os_str().is_empty() {
                    continue;
                }
                if at_root || out.ends_with("..") {
                    out.push("..");
                } else {
                    out.pop();
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    if out.as_os_str().is_empty() {
        out.push(".");
    }
    out
}
