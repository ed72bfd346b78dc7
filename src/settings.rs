use crate::{
    alerts::Alerts,
    debounce::{Debouncer, FlushHandle},
    encoding::CharsetProbe,
    error::{PathError, StoreError},
    paths::{self, game_root_of},
    store::{Persisted, SaveOutcome, Store},
};
use parking_lot::Mutex;
use std::{
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

pub const SETTINGS_FILE: &str = "config.ini";

pub const PATHS: &str = "PATHS";
pub const SETTINGS: &str = "SETTINGS";
pub const WINDOW: &str = "WINDOW";
pub const TOOLBAR: &str = "TOOLBAR";

const DEFAULT_THEME: &str = "Follow System";
const DEFAULT_MOD_COLUMNS: [u32; 12] = [60, 200, 50, 39, 39, 39, 39, 45, 39, 50, 45, 120];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameVersion {
    NextGen,
    Original,
}

impl GameVersion {
    pub fn as_str(self) -> &'static str {
        match self {
            GameVersion::NextGen => "ng",
            GameVersion::Original => "og",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphicsApi {
    Dx11,
    Dx12,
}

impl GraphicsApi {
    pub fn as_str(self) -> &'static str {
        match self {
            GraphicsApi::Dx11 => "dx11",
            GraphicsApi::Dx12 => "dx12",
        }
    }
}

/// Geometry of the main window as the shell reports it on exit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowLayout {
    pub width: u32,
    pub height: u32,
    /// Column widths of the installed-mods list.
    pub mod_columns: Vec<u32>,
    /// Column widths of the load-order list.
    pub load_order_columns: Vec<u32>,
    pub splitter: [u32; 2],
}

/// The application settings file (`config.ini`).
pub struct Settings {
    persisted: Persisted,
    config_dir: PathBuf,
    mods_dir: Mutex<Option<PathBuf>>,
    dlc_dir: Mutex<Option<PathBuf>>,
}

impl Settings {
    pub fn open(
        config_dir: &Path,
        scheduler: Debouncer,
        alerts: Arc<dyn Alerts>,
        probe: Arc<dyn CharsetProbe>,
        delay: Duration,
    ) -> Self {
        let store = Store::new(SETTINGS_FILE, config_dir.join(SETTINGS_FILE), probe);
        Self {
            persisted: Persisted::new(store, scheduler, alerts, delay),
            config_dir: config_dir.to_path_buf(),
            mods_dir: Mutex::new(None),
            dlc_dir: Mutex::new(None),
        }
    }

    pub fn store(&self) -> &Store {
        self.persisted.store()
    }

    pub fn path(&self) -> &Path {
        self.store().path()
    }

    /// Reads `config.ini`; a broken file is reported and the settings start empty.
    pub fn load(&self) -> bool {
        self.persisted.load()
    }

    pub fn get(&self, section: &str, option: &str) -> Option<String> {
        self.store()
            .read(|doc| doc.get(section, option).flatten().map(str::to_string))
    }

    pub fn get_or(&self, section: &str, option: &str, default: &str) -> String {
        self.get(section, option)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_nonempty(&self, section: &str, option: &str) -> Option<String> {
        self.get(section, option).filter(|value| !value.is_empty())
    }

    /// Returns false when the option cannot be stored; nothing is scheduled then.
    pub fn set(&self, section: &str, option: &str, value: &str, persist: bool) -> bool {
        let stored = self
            .store()
            .update(|doc| doc.set(section, option, Some(value.to_string())));
        if stored && persist {
            self.write_config();
        }
        stored
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.store().read(|doc| doc.has_section(section))
    }

    pub fn ensure_section(&self, section: &str) {
        self.store().update(|doc| doc.add_section(section));
    }

    pub fn write_config(&self) -> FlushHandle {
        self.persisted.schedule_write()
    }

    pub fn save(&self) -> Result<SaveOutcome, StoreError> {
        self.persisted.save()
    }

    /// Forced write used at shutdown.
    pub fn flush(&self) -> Result<SaveOutcome, StoreError> {
        self.persisted.flush()
    }

    pub fn is_write_pending(&self) -> bool {
        self.persisted.is_write_pending()
    }

    // free-form option lists (toolbar and menu entries)

    pub fn get_options(&self, section: &str) -> Vec<String> {
        self.store().read(|doc| {
            doc.section(section)
                .map(|section| section.keys().map(str::to_string).collect())
                .unwrap_or_default()
        })
    }

    pub fn set_option(&self, section: &str, option: &str) -> bool {
        self.set(section, option, "", true)
    }

    pub fn remove_option(&self, section: &str, option: &str) {
        self.store().update(|doc| doc.remove_option(section, option));
        self.write_config();
    }

    // PATHS

    pub fn documents(&self) -> Option<PathBuf> {
        self.get_nonempty(PATHS, "documents").map(PathBuf::from)
    }

    pub fn set_documents(&self, path: &Path, persist: bool) {
        self.set(PATHS, "documents", &path.to_string_lossy(), persist);
    }

    pub fn game_exe(&self) -> Option<PathBuf> {
        self.get_nonempty(PATHS, "gameexe").map(PathBuf::from)
    }

    /// Stores the exe after validating it, and forgets cached game directories.
    pub fn set_game_exe(&self, path: &Path) -> Result<PathBuf, PathError> {
        let exe = paths::validate_game_exe(path)
            .ok_or_else(|| PathError::InvalidGameExe(path.to_path_buf()))?;
        self.set(PATHS, "gameexe", &exe.to_string_lossy(), true);
        *self.mods_dir.lock() = None;
        *self.dlc_dir.lock() = None;
        Ok(exe)
    }

    pub fn script_merger(&self) -> Option<PathBuf> {
        self.get_nonempty(PATHS, "scriptmerger").map(PathBuf::from)
    }

    pub fn set_script_merger(&self, path: &Path) {
        self.set(PATHS, "scriptmerger", &path.to_string_lossy(), true);
    }

    pub fn last_path(&self) -> Option<PathBuf> {
        self.get_nonempty(PATHS, "lastpath").map(PathBuf::from)
    }

    pub fn set_last_path(&self, path: &Path) {
        self.set(PATHS, "lastpath", &path.to_string_lossy(), true);
    }

    pub fn game_launch_command(&self) -> Option<String> {
        self.get_nonempty(PATHS, "gamelaunchcommand")
    }

    pub fn set_game_launch_command(&self, command: &str) {
        self.set(PATHS, "gamelaunchcommand", command, true);
    }

    pub fn merger_launch_command(&self) -> Option<String> {
        self.get_nonempty(PATHS, "mergerlaunchcommand")
    }

    pub fn set_merger_launch_command(&self, command: &str) {
        self.set(PATHS, "mergerlaunchcommand", command, true);
    }

    // SETTINGS

    pub fn allow_popups(&self) -> Option<bool> {
        self.get_nonempty(SETTINGS, "AllowPopups")
            .map(|value| value == "1")
    }

    pub fn set_allow_popups(&self, allow: bool) {
        self.set(SETTINGS, "AllowPopups", if allow { "1" } else { "0" }, true);
    }

    pub fn language(&self) -> Option<String> {
        self.get_nonempty(SETTINGS, "language")
    }

    pub fn set_language(&self, language: &str) {
        self.set(SETTINGS, "language", language, true);
    }

    pub fn theme(&self) -> String {
        self.get_or(SETTINGS, "theme", DEFAULT_THEME)
    }

    pub fn set_theme(&self, theme: &str) {
        self.set(SETTINGS, "theme", theme, true);
    }

    // derived from the game exe, never stored

    /// `None` when the stored exe path is too short to have an install root.
    pub fn game(&self) -> Option<PathBuf> {
        self.game_exe()
            .map(|exe| game_root_of(&exe))
            .filter(|root| !root.as_os_str().is_empty())
    }

    pub fn game_version(&self) -> GameVersion {
        match self.game() {
            Some(game) if game.join("bin/x64_dx12").exists() => GameVersion::NextGen,
            _ => GameVersion::Original,
        }
    }

    pub fn graphics_api(&self) -> GraphicsApi {
        match self.game_exe() {
            Some(exe) if exe.to_string_lossy().contains("x64_dx12") => GraphicsApi::Dx12,
            _ => GraphicsApi::Dx11,
        }
    }

    pub fn mods(&self) -> Option<PathBuf> {
        self.game_subdir(&self.mods_dir, "Mods")
    }

    pub fn dlc(&self) -> Option<PathBuf> {
        self.game_subdir(&self.dlc_dir, "DLC")
    }

    fn game_subdir(&self, cache: &Mutex<Option<PathBuf>>, name: &str) -> Option<PathBuf> {
        let mut cached = cache.lock();
        if let Some(dir) = cached.as_ref() {
            return Some(dir.clone());
        }
        let game = self.game()?;
        let dir = paths::verify_internal_path(&game.join(name), true)?;
        *cached = Some(dir.clone());
        Some(dir)
    }

    pub fn menu(&self) -> Option<PathBuf> {
        self.game()
            .map(|game| game.join("bin/config/r4game/user_config_matrix/pc"))
    }

    pub fn configuration(&self) -> &Path {
        &self.config_dir
    }

    pub fn extracted(&self) -> PathBuf {
        self.config_dir.join("extracted")
    }

    // WINDOW

    pub fn window_size(&self) -> Option<(u32, u32)> {
        let width = self.get(WINDOW, "width")?.parse().ok()?;
        let height = self.get(WINDOW, "height")?.parse().ok()?;
        Some((width, height))
    }

    /// Width of a list column; `prefix` is `""` for the mod list and `"lo"`
    /// for the load-order list.
    pub fn window_section(&self, index: usize, prefix: &str) -> Option<i32> {
        self.get(WINDOW, &format!("{prefix}section{index}"))?
            .parse()
            .ok()
    }

    pub fn splitter(&self) -> Option<[u32; 2]> {
        let left = self.get(WINDOW, "hsplit0")?.parse().ok()?;
        let right = self.get(WINDOW, "hsplit1")?.parse().ok()?;
        Some([left, right])
    }

    pub fn save_window_layout(&self, layout: &WindowLayout) {
        self.store().update(|doc| {
            let mut put = |key: String, value: u32| doc.set(WINDOW, &key, Some(value.to_string()));
            put("width".to_string(), layout.width);
            put("height".to_string(), layout.height);
            for (index, width) in layout.mod_columns.iter().enumerate() {
                put(format!("section{index}"), *width);
            }
            for (index, width) in layout.load_order_columns.iter().enumerate() {
                put(format!("losection{index}"), *width);
            }
            put("hsplit0".to_string(), layout.splitter[0]);
            put("hsplit1".to_string(), layout.splitter[1]);
        });
        self.write_config();
    }

    pub fn set_default_window(&self) {
        self.store().update(|doc| {
            doc.set(WINDOW, "width", Some("1024".to_string()));
            doc.set(WINDOW, "height", Some("720".to_string()));
            for (index, width) in DEFAULT_MOD_COLUMNS.iter().enumerate() {
                doc.set(WINDOW, &format!("section{index}"), Some(width.to_string()));
            }
        });
        self.write_config();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        alerts::tests::RecordingAlerts, debounce::FlushOutcome, encoding::Chardet,
        paths::GAME_EXE,
    };
    use std::fs;

    fn open(dir: &Path, delay: Duration) -> Settings {
        Settings::open(
            dir,
            Debouncer::new(),
            Arc::new(RecordingAlerts::default()),
            Arc::new(Chardet),
            delay,
        )
    }

    fn fake_install(root: &Path, dx12: bool) -> PathBuf {
        fs::create_dir_all(root.join("content")).unwrap();
        fs::create_dir_all(root.join("bin/x64")).unwrap();
        fs::write(root.join("bin/x64").join(GAME_EXE), b"MZ").unwrap();
        if dx12 {
            fs::create_dir_all(root.join("bin/x64_dx12")).unwrap();
            fs::write(root.join("bin/x64_dx12").join(GAME_EXE), b"MZ").unwrap();
            return root.join("bin/x64_dx12").join(GAME_EXE);
        }
        root.join("bin/x64").join(GAME_EXE)
    }

    #[test]
    fn get_returns_default_for_missing_and_bare_options() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join(SETTINGS_FILE), "[TOOLBAR]\nopen_log\n").unwrap();
        let settings = open(dir.path(), Duration::from_millis(5));
        assert!(settings.load());

        assert_eq!(settings.get("TOOLBAR", "open_log"), None);
        assert_eq!(settings.get_or("PATHS", "documents", "none"), "none");
        assert_eq!(settings.theme(), "Follow System");
        assert_eq!(settings.get_options("TOOLBAR"), vec!["open_log"]);
        assert!(settings.get_options("MISSING").is_empty());
    }

    #[test]
    fn rapid_sets_produce_one_write() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_millis(40));

        let mut last = None;
        for size in 0..30 {
            settings.set(WINDOW, "hsplit0", &size.to_string(), false);
            last = Some(settings.write_config());
        }
        assert_eq!(last.unwrap().wait(), FlushOutcome::Fired);

        assert_eq!(settings.store().disk_writes(), 1);
        let raw = fs::read_to_string(settings.path()).unwrap();
        assert!(raw.contains("hsplit0=29"));
    }

    #[test]
    fn unsuppressed_set_schedules_write() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));

        settings.set(PATHS, "lastpath", "/downloads", false);
        assert!(!settings.is_write_pending());
        settings.set_theme("Dark");
        assert!(settings.is_write_pending());

        assert_eq!(settings.flush().unwrap(), SaveOutcome::Written);
        assert!(!settings.is_write_pending());
        assert_eq!(settings.flush().unwrap(), SaveOutcome::Unchanged);
    }

    #[test]
    fn option_keys_are_case_insensitive() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        settings.set_allow_popups(false);
        assert_eq!(settings.get(SETTINGS, "allowpopups").as_deref(), Some("0"));
        assert_eq!(settings.allow_popups(), Some(false));
        settings.flush().unwrap();
        let raw = fs::read_to_string(settings.path()).unwrap();
        assert_eq!(raw, "[SETTINGS]\nallowpopups=0\n\n");
    }

    #[test]
    fn toolbar_options_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        settings.set_option(TOOLBAR, "openlog");
        settings.set_option(TOOLBAR, "runmerger");
        settings.remove_option(TOOLBAR, "openlog");
        settings.flush().unwrap();

        let reloaded = open(dir.path(), Duration::from_secs(10));
        reloaded.load();
        assert_eq!(reloaded.get_options(TOOLBAR), vec!["runmerger"]);
    }

    #[test]
    fn game_exe_drives_derived_properties() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("The Witcher 3");
        let exe = fake_install(&root, true);
        fs::create_dir_all(root.join("mods")).unwrap();

        let settings = open(dir.path(), Duration::from_secs(10));
        assert_eq!(settings.game(), None);
        assert_eq!(settings.mods(), None);

        let stored = settings.set_game_exe(&exe).unwrap();
        assert_eq!(settings.game_exe(), Some(stored));
        assert_eq!(settings.game(), Some(paths::normalize_path(&root)));
        assert_eq!(settings.game_version(), GameVersion::NextGen);
        assert_eq!(settings.graphics_api(), GraphicsApi::Dx12);

        let mods = settings.mods().unwrap();
        assert!(mods.ends_with("mods"));
        let dlc = settings.dlc().unwrap();
        assert!(dlc.is_dir());
        assert!(settings
            .menu()
            .unwrap()
            .ends_with("bin/config/r4game/user_config_matrix/pc"));
        settings.flush().unwrap();
    }

    #[test]
    fn dx11_exe_on_original_install() {
        let dir = tempfile::tempdir().unwrap();
        let exe = fake_install(&dir.path().join("w3"), false);
        let settings = open(dir.path(), Duration::from_secs(10));
        settings.set_game_exe(&exe).unwrap();
        assert_eq!(settings.game_version(), GameVersion::Original);
        assert_eq!(settings.graphics_api(), GraphicsApi::Dx11);
        settings.flush().unwrap();
    }

    #[test]
    fn invalid_game_exe_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        let err = settings
            .set_game_exe(&dir.path().join("bin/x64/witcher3.exe"))
            .unwrap_err();
        assert!(matches!(err, PathError::InvalidGameExe(_)));
        assert_eq!(settings.game_exe(), None);
        assert!(!settings.is_write_pending());
    }

    #[test]
    fn window_layout_is_stored_by_column() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        settings.save_window_layout(&WindowLayout {
            width: 1280,
            height: 800,
            mod_columns: vec![60, 220, 50],
            load_order_columns: vec![300, 40],
            splitter: [700, 300],
        });

        assert_eq!(settings.window_size(), Some((1280, 800)));
        assert_eq!(settings.window_section(1, ""), Some(220));
        assert_eq!(settings.window_section(1, "lo"), Some(40));
        assert_eq!(settings.window_section(7, ""), None);
        assert_eq!(settings.splitter(), Some([700, 300]));
        settings.flush().unwrap();
    }

    #[test]
    fn default_window_layout() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        settings.set_default_window();
        assert_eq!(settings.window_size(), Some((1024, 720)));
        assert_eq!(settings.window_section(0, ""), Some(60));
        assert_eq!(settings.window_section(11, ""), Some(120));
        settings.flush().unwrap();
    }

    #[test]
    fn extracted_lives_under_config_dir() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        assert_eq!(settings.configuration(), dir.path());
        assert_eq!(settings.extracted(), dir.path().join("extracted"));
    }

    #[test]
    fn short_game_exe_has_no_game_directories() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        for exe in ["witcher3.exe", "x64/witcher3.exe", "bin/x64/witcher3.exe"] {
            assert!(settings.set(PATHS, "gameexe", exe, false));
            assert_eq!(settings.game(), None, "{exe}");
            assert_eq!(settings.mods(), None, "{exe}");
            assert_eq!(settings.dlc(), None, "{exe}");
        }
    }

    #[test]
    fn bracket_toolbar_entry_does_not_break_reload() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        settings.set_documents(Path::new("/home/geralt/docs"), false);
        assert!(settings.set_option(TOOLBAR, "[custom tool"));
        assert!(!settings.set_option(TOOLBAR, "run=fast"));
        settings.flush().unwrap();

        let reloaded = open(dir.path(), Duration::from_secs(10));
        assert!(reloaded.load());
        assert_eq!(reloaded.documents(), Some(PathBuf::from("/home/geralt/docs")));
        assert_eq!(reloaded.get_options(TOOLBAR), vec!["[custom tool"]);
    }

    #[test]
    fn refused_option_schedules_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let settings = open(dir.path(), Duration::from_secs(10));
        assert!(!settings.set(TOOLBAR, "#hidden", "", true));
        assert!(!settings.is_write_pending());
        assert!(!settings.has_section(TOOLBAR));
    }
}
