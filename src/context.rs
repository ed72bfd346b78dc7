use crate::{
    alerts::{Alerts, LogAlerts},
    debounce::{self, Debouncer},
    encoding::{CharsetProbe, Chardet},
    error::{PathError, StoreError},
    fixup::{self, BracketRepair, DX12_USER_SETTINGS_FILE, USER_SETTINGS_FILE},
    paths::{self, Locator, NoPicker, Picker, Platform, GAME_NAME},
    priority::Priorities,
    settings::{GraphicsApi, Settings, PATHS, SETTINGS, SETTINGS_FILE, TOOLBAR},
};
use anyhow::{Context, Result};
use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};
use tracing::{info, warn};

/// Location overrides given on the command line.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub documents: Option<PathBuf>,
    pub game: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

/// Everything the context needs from the outside world.
pub struct Environment {
    pub locator: Locator,
    pub picker: Arc<dyn Picker>,
    pub alerts: Arc<dyn Alerts>,
    pub probe: Arc<dyn CharsetProbe>,
    /// Checked for a portable `config.ini` before the platform config dir.
    pub working_dir: Option<PathBuf>,
    pub delay: Duration,
}

impl Environment {
    /// Headless defaults: real platform paths, logged alerts, no picker.
    pub fn detect() -> Self {
        Self {
            locator: Locator::detect(),
            picker: Arc::new(NoPicker),
            alerts: Arc::new(LogAlerts),
            probe: Arc::new(Chardet),
            working_dir: std::env::current_dir().ok(),
            delay: debounce::default_delay(),
        }
    }
}

pub struct AppContext {
    pub settings: Settings,
    pub priorities: Priorities,
    user_settings_dir: PathBuf,
    picker: Arc<dyn Picker>,
    alerts: Arc<dyn Alerts>,
    probe: Arc<dyn CharsetProbe>,
    repair: Option<BracketRepair>,
}

impl AppContext {
    /// Initializes the context and repairs the game's `user.settings` once.
    pub fn start(overrides: &Overrides, env: Environment) -> Result<Self> {
        let mut ctx = Self::initialize(overrides, env)?;
        ctx.repair = ctx.repair_user_settings();
        if let Some(report) = ctx.repair.as_ref().filter(|report| report.changed()) {
            info!("repaired section names in {}", report.path.display());
        }
        Ok(ctx)
    }

    pub fn initialize(overrides: &Overrides, env: Environment) -> Result<Self> {
        if let Platform::Unsupported(os) = env.locator.platform() {
            env.alerts.unsupported_os(os);
            return Err(PathError::UnsupportedOs(os.clone()).into());
        }

        let config_dir = resolve_config_dir(overrides, &env)?;
        fs::create_dir_all(&config_dir)
            .with_context(|| format!("Failed to create config dir {}", config_dir.display()))?;

        let scheduler = Debouncer::new();
        let settings = Settings::open(
            &config_dir,
            scheduler.clone(),
            Arc::clone(&env.alerts),
            Arc::clone(&env.probe),
            env.delay,
        );
        settings.load();

        let documents = match resolve_documents(overrides, &settings, &env) {
            Ok(documents) => documents,
            Err(err) => {
                env.alerts.no_documents();
                return Err(err).context("No documents path configured");
            }
        };

        let user_settings_dir = documents.join(GAME_NAME);
        fs::create_dir_all(&user_settings_dir).with_context(|| {
            format!(
                "Failed to create user settings dir {}",
                user_settings_dir.display()
            )
        })?;
        settings.set_documents(&documents, false);

        let priorities = Priorities::open(
            &user_settings_dir,
            scheduler,
            Arc::clone(&env.alerts),
            Arc::clone(&env.probe),
            env.delay,
        );
        priorities.load();

        if let Some(game) = &overrides.game {
            match settings.set_game_exe(game) {
                Ok(exe) => info!("game override: {}", exe.display()),
                Err(_) => warn!(
                    "game path override {} is invalid, starting with existing configuration",
                    game.display()
                ),
            }
        }

        apply_defaults(&settings);

        Ok(Self {
            settings,
            priorities,
            user_settings_dir,
            picker: env.picker,
            alerts: env.alerts,
            probe: env.probe,
            repair: None,
        })
    }

    pub fn alerts(&self) -> &dyn Alerts {
        self.alerts.as_ref()
    }

    pub fn user_settings_dir(&self) -> &Path {
        &self.user_settings_dir
    }

    /// The game's own settings file for the active renderer.
    pub fn user_settings_path(&self) -> PathBuf {
        let file = match self.settings.graphics_api() {
            GraphicsApi::Dx12 => DX12_USER_SETTINGS_FILE,
            GraphicsApi::Dx11 => USER_SETTINGS_FILE,
        };
        self.user_settings_dir.join(file)
    }

    /// Returns the configured game exe, asking the picker until it gets a
    /// valid installation. A cancelled selection is an error.
    pub fn ensure_game(&self) -> Result<PathBuf, PathError> {
        if let Some(exe) = self.settings.game_exe() {
            if paths::validate_game_exe(&exe).is_some() {
                return Ok(exe);
            }
            warn!("configured game exe {} is no longer valid", exe.display());
        }

        let title = format!("Select {GAME_NAME} executable");
        loop {
            let start = self.settings.last_path().or_else(|| self.settings.game());
            let Some(candidate) = self.picker.pick_file(&title, start.as_deref()) else {
                return Err(PathError::Cancelled);
            };
            match self.settings.set_game_exe(&candidate) {
                Ok(exe) => return Ok(exe),
                Err(err) => warn!("{err}"),
            }
        }
    }

    pub fn repair_user_settings(&self) -> Option<BracketRepair> {
        fixup::repair_user_settings(&self.user_settings_dir, self.probe.as_ref())
    }

    /// Result of the repair pass run by [`AppContext::start`].
    pub fn startup_repair(&self) -> Option<&BracketRepair> {
        self.repair.as_ref()
    }

    /// Forces both stores to disk. Both are attempted; the first error wins.
    pub fn shutdown(&self) -> Result<(), StoreError> {
        let priorities = self.priorities.flush();
        let settings = self.settings.flush();
        priorities.and(settings).map(|_| ())
    }
}

fn resolve_config_dir(overrides: &Overrides, env: &Environment) -> Result<PathBuf> {
    if let Some(config) = &overrides.config {
        return Ok(config.clone());
    }
    if let Some(cwd) = &env.working_dir {
        if cwd.join(SETTINGS_FILE).is_file() {
            info!("using portable configuration in {}", cwd.display());
            return Ok(cwd.clone());
        }
    }
    let base = env
        .locator
        .config_dir(env.picker.as_ref())
        .context("Failed to resolve the config directory")?;
    Ok(base.join(env.locator.config_folder_name()))
}

fn resolve_documents(
    overrides: &Overrides,
    settings: &Settings,
    env: &Environment,
) -> Result<PathBuf, PathError> {
    if let Some(documents) = &overrides.documents {
        if documents.exists() {
            return Ok(documents.clone());
        }
        warn!(
            "documents path override {} is invalid, starting with existing configuration",
            documents.display()
        );
    }
    if let Some(stored) = settings.documents().filter(|path| path.exists()) {
        return Ok(stored);
    }
    env.locator.documents_dir(env.picker.as_ref())
}

fn apply_defaults(settings: &Settings) {
    if settings.get(PATHS, "scriptmerger").is_none() {
        settings.set(PATHS, "scriptmerger", "", false);
    }
    if settings.allow_popups().is_none() {
        settings.set(SETTINGS, "allowpopups", "1", false);
    }
    if settings.language().is_none() {
        settings.set(SETTINGS, "language", "English.qm", false);
    }
    settings.ensure_section(TOOLBAR);
}
