//! Settings for artifact recording
//!
//! Built-in defaults, user and project TOML files, environment variables
//! and per-call overrides, merged in that order and validated into a
//! [`RecorderConfig`](crate::artifact::RecorderConfig).

mod defaults;
mod merge;
mod settings;

pub use defaults::BuiltinDefaults;
pub use merge::{deep_merge, merge_layers};
pub use settings::{
    user_settings_path, Settings, SettingsLoader, SettingsOrigin, SettingsSource, ENV_BASE_PATH,
    ENV_EXCLUDE_PATTERNS, ENV_LSTRIP_PATHS, PROJECT_SETTINGS_FILE,
};
