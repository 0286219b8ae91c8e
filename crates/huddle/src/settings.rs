use std::path::{Path, PathBuf};
use std::sync::Arc;

use arc_swap::ArcSwap;
use figment::{
    Figment,
    providers::{Env, Format, Json, Serialized},
};
use huddle_api::{LOOPBACK_BACKEND_ID, StaticAuthorizer};
use huddle_feed::{
    DEFAULT_PAGE_SIZE, DEFAULT_PREVIEW_CHARS, NotificationPolicy, NotificationScope, PanelConfig,
    UserId,
};
use serde::{Deserialize, Serialize};
use snafu::{ResultExt, Snafu};

pub const SETTINGS_DIRECTORY_NAME: &str = "huddle";
pub const SETTINGS_FILE_NAME: &str = "settings.json";
pub const ENV_PREFIX: &str = "HUDDLE_";
pub const DEFAULT_USER_ID: u64 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedSettings {
    #[serde(default = "default_backend_id")]
    pub backend_id: String,
    #[serde(default = "default_user_id")]
    pub current_user_id: u64,
    #[serde(default)]
    pub current_user_name: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
    #[serde(default)]
    pub notification_scope: NotificationScope,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
    #[serde(default = "default_true")]
    pub can_post: bool,
    #[serde(default = "default_true")]
    pub can_delete: bool,
}

impl Default for FeedSettings {
    fn default() -> Self {
        Self {
            backend_id: default_backend_id(),
            current_user_id: DEFAULT_USER_ID,
            current_user_name: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            notification_scope: NotificationScope::default(),
            preview_chars: DEFAULT_PREVIEW_CHARS,
            can_post: true,
            can_delete: true,
        }
    }
}

impl FeedSettings {
    pub fn normalized(mut self) -> Self {
        self.backend_id = if self.backend_id.trim().is_empty() {
            default_backend_id()
        } else {
            self.backend_id.trim().to_string()
        };
        if self.current_user_id == 0 {
            self.current_user_id = DEFAULT_USER_ID;
        }
        self.current_user_name = self.current_user_name.trim().to_string();
        if self.current_user_name.is_empty() {
            self.current_user_name = format!("User {}", self.current_user_id);
        }
        if self.page_size == 0 {
            self.page_size = DEFAULT_PAGE_SIZE;
        }
        if self.preview_chars == 0 {
            self.preview_chars = DEFAULT_PREVIEW_CHARS;
        }
        self
    }

    pub fn user_id(&self) -> UserId {
        UserId::new(self.current_user_id)
    }

    pub fn to_panel_config(&self) -> PanelConfig {
        PanelConfig {
            page_size: self.page_size,
            notification: NotificationPolicy::new(self.notification_scope),
            preview_chars: self.preview_chars,
        }
    }

    pub fn authorizer(&self) -> StaticAuthorizer {
        StaticAuthorizer {
            can_view: true,
            can_post: self.can_post,
            can_delete: self.can_delete,
        }
    }
}

pub struct SettingsStore {
    settings: Arc<ArcSwap<FeedSettings>>,
    config_path: PathBuf,
}

impl SettingsStore {
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .map(|path| path.join(SETTINGS_DIRECTORY_NAME))
            .unwrap_or_else(|| PathBuf::from(".huddle"))
    }

    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join(SETTINGS_FILE_NAME)
    }

    pub fn new(config_path: PathBuf) -> Self {
        let settings = load_settings(&config_path, ENV_PREFIX);
        Self {
            settings: Arc::new(ArcSwap::from_pointee(settings)),
            config_path,
        }
    }

    pub fn load() -> Self {
        Self::new(Self::default_config_path())
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn settings(&self) -> Arc<FeedSettings> {
        self.settings.load_full()
    }

    pub fn update(&self, settings: FeedSettings) -> Result<(), SettingsError> {
        let normalized_settings = settings.normalized();
        self.persist(&normalized_settings)?;
        self.settings.store(Arc::new(normalized_settings));
        Ok(())
    }

    fn persist(&self, settings: &FeedSettings) -> Result<(), SettingsError> {
        let content = serde_json::to_vec_pretty(settings).context(EncodeSnafu {
            stage: "settings-encode",
        })?;
        write_atomically(&self.config_path, &content)?;
        tracing::info!(path = %self.config_path.display(), bytes = content.len(), "settings saved");
        Ok(())
    }
}

/// Writes `content` to a sibling temp file, then renames it over `path`.
fn write_atomically(path: &Path, content: &[u8]) -> Result<(), SettingsError> {
    if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir).context(PrepareDirectorySnafu {
            stage: "settings-prepare-directory",
            path: dir,
        })?;
    }

    let staged = path.with_extension("json.tmp");
    std::fs::write(&staged, content).context(WriteStagedSnafu {
        stage: "settings-stage-file",
        path: &staged,
    })?;
    std::fs::rename(&staged, path).context(CommitSnafu {
        stage: "settings-commit-file",
        path,
    })
}

/// Layers defaults, the JSON file at `path` (when present), and `env_prefix` variables.
fn load_settings(path: &Path, env_prefix: &str) -> FeedSettings {
    if !path.exists() {
        tracing::info!(?path, "settings file not found, using defaults");
    }

    let figment = Figment::from(Serialized::defaults(FeedSettings::default()))
        .merge(Json::file(path))
        .merge(Env::prefixed(env_prefix));

    match figment.extract::<FeedSettings>() {
        Ok(settings) => settings.normalized(),
        Err(error) => {
            tracing::warn!(?path, %error, "failed to parse settings, using defaults");
            FeedSettings::default().normalized()
        }
    }
}

/// Failure to save settings. Loading never fails; it falls back to defaults instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SettingsError {
    #[snafu(display("cannot create settings directory {}: {source}", path.display()))]
    PrepareDirectory {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    #[snafu(display("cannot encode settings: {source}"))]
    Encode {
        stage: &'static str,
        source: serde_json::Error,
    },
    #[snafu(display("cannot stage settings at {}: {source}", path.display()))]
    WriteStaged {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
    // The staged file is left behind; the next save overwrites it.
    #[snafu(display("cannot move staged settings into {}: {source}", path.display()))]
    Commit {
        stage: &'static str,
        path: PathBuf,
        source: std::io::Error,
    },
}

fn default_backend_id() -> String {
    LOOPBACK_BACKEND_ID.to_string()
}

fn default_user_id() -> u64 {
    DEFAULT_USER_ID
}

fn default_page_size() -> u32 {
    DEFAULT_PAGE_SIZE
}

fn default_preview_chars() -> usize {
    DEFAULT_PREVIEW_CHARS
}

fn default_true() -> bool {
    true
}
