use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::anyhow;
use tracing::{debug, error};

use crate::store::KeyValueStore;

pub const THEME_STORAGE_KEY: &str = "theme";
pub const ACTIVE_LIST_STORAGE_KEY: &str = "quicktasks_active_list";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolvedTheme {
    Light,
    Dark,
}

impl Theme {
    pub fn storage_value(self) -> &'static str {
        match self {
            Theme::Light => "light",
            Theme::Dark => "dark",
            Theme::System => "system",
        }
    }

    pub fn resolved(self, system_prefers_dark: bool) -> ResolvedTheme {
        match self {
            Theme::Light => ResolvedTheme::Light,
            Theme::Dark => ResolvedTheme::Dark,
            Theme::System if system_prefers_dark => ResolvedTheme::Dark,
            Theme::System => ResolvedTheme::Light,
        }
    }
}

impl fmt::Display for Theme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.storage_value())
    }
}

impl FromStr for Theme {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            other => Err(anyhow!("unknown theme: {other} (expected light, dark or system)")),
        }
    }
}

/// UI state that outlives a session: loaded once at startup, written back
/// whenever it changes. Independent of the task and list data.
pub struct Preferences {
    kv: Arc<dyn KeyValueStore>,
    theme: Theme,
    last_active_list: Option<String>,
}

impl Preferences {
    #[tracing::instrument(skip(kv))]
    pub fn load(kv: Arc<dyn KeyValueStore>) -> Self {
        let theme = match read(kv.as_ref(), THEME_STORAGE_KEY).as_deref() {
            Some("light") => Theme::Light,
            Some("dark") => Theme::Dark,
            _ => Theme::System,
        };
        let last_active_list = read(kv.as_ref(), ACTIVE_LIST_STORAGE_KEY)
            .map(|raw| raw.trim().to_string())
            .filter(|id| !id.is_empty());

        debug!(%theme, ?last_active_list, "loaded preferences");
        Self {
            kv,
            theme,
            last_active_list,
        }
    }

    pub fn theme(&self) -> Theme {
        self.theme
    }

    pub fn set_theme(&mut self, theme: Theme) {
        self.theme = theme;
        write(self.kv.as_ref(), THEME_STORAGE_KEY, Some(theme.storage_value()));
    }

    pub fn last_active_list(&self) -> Option<&str> {
        self.last_active_list.as_deref()
    }

    pub fn set_last_active_list(&mut self, list_id: Option<&str>) {
        if self.last_active_list.as_deref() == list_id {
            return;
        }
        self.last_active_list = list_id.map(str::to_string);
        write(self.kv.as_ref(), ACTIVE_LIST_STORAGE_KEY, list_id);
    }
}

fn read(kv: &dyn KeyValueStore, key: &str) -> Option<String> {
    match kv.get_item(key) {
        Ok(value) => value,
        Err(err) => {
            error!(key, error = %err, "failed reading preference");
            None
        }
    }
}

fn write(kv: &dyn KeyValueStore, key: &str, value: Option<&str>) {
    let result = match value {
        Some(value) => kv.set_item(key, value),
        None => kv.remove_item(key),
    };
    if let Err(err) = result {
        error!(key, error = %err, "failed persisting preference");
    }
}
