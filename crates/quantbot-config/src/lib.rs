//! quantbot-config: Persistence for the scheduler document.
//!
//! The job list and stored capability level live in a single
//! human-editable TOML file. Loads are idempotent (repeated
//! initialization never clobbers in-memory edits with a stale read),
//! reloads are explicit, and saves are atomic via temp-file rename.

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use thiserror::Error;
use tracing::{debug, warn};

use quantbot_types::SchedulerConfig;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Config directory not found")]
    NoDirFound,
}

/// Resolve the quantbot config directory (~/.quantbot/).
pub fn config_dir() -> Result<PathBuf, ConfigError> {
    dirs::home_dir()
        .map(|h| h.join(".quantbot"))
        .ok_or(ConfigError::NoDirFound)
}

/// Resolve the scheduler document path (~/.quantbot/scheduler.toml).
pub fn scheduler_file_path() -> Result<PathBuf, ConfigError> {
    Ok(config_dir()?.join("scheduler.toml"))
}

/// Ensure the config directory exists.
pub fn ensure_config_dir() -> Result<PathBuf, ConfigError> {
    let dir = config_dir()?;
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[derive(Default)]
struct StoreState {
    config: SchedulerConfig,
    loaded: bool,
}

/// On-disk store for the scheduler document.
pub struct JobStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl JobStore {
    /// Create a store backed by the given file. Performs no IO.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            state: Mutex::new(StoreState::default()),
        }
    }

    /// Create a store at the default location (~/.quantbot/scheduler.toml).
    pub fn open_default() -> Result<Self, ConfigError> {
        // Load .env if present
        let _ = dotenvy::dotenv();
        Ok(Self::open(scheduler_file_path()?))
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether a load has completed since creation or the last reload.
    pub fn is_loaded(&self) -> bool {
        self.state.lock().unwrap().loaded
    }

    /// Load the scheduler document.
    ///
    /// Idempotent: once a load has succeeded, later calls return the
    /// cached document without touching the file. A missing file
    /// yields an empty document; a malformed file yields an empty
    /// document but leaves the store unloaded so a later load can
    /// still pick up a corrected file.
    ///
    /// Read failures other than NotFound (permissions, a directory in
    /// the file's place) are raised rather than degraded: an existing
    /// but unreadable document must not be treated as empty, or a
    /// later save would silently clobber it.
    pub fn load(&self) -> Result<SchedulerConfig, ConfigError> {
        let mut state = self.state.lock().unwrap();
        if state.loaded {
            return Ok(state.config.clone());
        }

        match std::fs::read_to_string(&self.path) {
            Ok(content) => match toml::from_str::<SchedulerConfig>(&content) {
                Ok(config) => {
                    debug!(
                        path = %self.path.display(),
                        jobs = config.jobs.len(),
                        "Loaded scheduler document"
                    );
                    state.config = config;
                    state.loaded = true;
                }
                Err(e) => {
                    warn!(
                        path = %self.path.display(),
                        "Malformed scheduler document, starting empty: {e}"
                    );
                    state.config = SchedulerConfig::default();
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(
                    path = %self.path.display(),
                    "No scheduler document, starting empty"
                );
                state.config = SchedulerConfig::default();
                state.loaded = true;
            }
            Err(e) => return Err(e.into()),
        }

        Ok(state.config.clone())
    }

    /// Discard the cached document and load from disk again.
    pub fn reload(&self) -> Result<SchedulerConfig, ConfigError> {
        self.state.lock().unwrap().loaded = false;
        self.load()
    }

    /// Persist the scheduler document atomically.
    ///
    /// Writes to a temp file in the same directory and renames over
    /// the target, so a kill mid-save never leaves a torn document.
    /// Top-level keys this subsystem does not understand are written
    /// back unchanged.
    pub fn save(&self, config: &SchedulerConfig) -> Result<(), ConfigError> {
        let content = toml::to_string_pretty(config)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &self.path)?;

        let mut state = self.state.lock().unwrap();
        state.config = config.clone();
        state.loaded = true;
        Ok(())
    }
}
