use log::{warn, LevelFilter};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use std::time::Duration;

use crate::store::{KeyValueStore, SETTINGS_ENTRY};

/// Host page class names. They change whenever the site redeploys its CSS
/// modules, so every one of them can be overridden from storage.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Selectors {
    pub chapter_name: String,
    pub chapter_row: String,
    pub selected_tab: String,
    pub juz_container: String,
    pub juz_label: String,
}

impl Default for Selectors {
    fn default() -> Self {
        Self {
            chapter_name: ".SurahPreviewRow_surahName__IHiSd".to_string(),
            chapter_row: ".SurahPreviewRow_container__Nx0i0".to_string(),
            selected_tab: ".Tabs_tabItemSelected__YXy2p".to_string(),
            juz_container: ".JuzView_juzContainer__L8HsL".to_string(),
            juz_label: ".JuzView_juzTitle__DjSou span:first-child".to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct RetryPolicy {
    pub initial_delay_ms: u32,
    pub max_delay_ms: u32,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_delay_ms: 100,
            max_delay_ms: 5_000,
            max_attempts: 20,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt` (0-based), doubling up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.max_attempts {
            return None;
        }
        let factor = 1u64.checked_shl(attempt).unwrap_or(u64::MAX);
        let millis = u64::from(self.initial_delay_ms)
            .saturating_mul(factor)
            .min(u64::from(self.max_delay_ms));
        Some(Duration::from_millis(millis))
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(default)]
pub struct Settings {
    pub selectors: Selectors,
    pub retry: RetryPolicy,
    pub debounce_ms: u32,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            selectors: Selectors::default(),
            retry: RetryPolicy::default(),
            debounce_ms: 50,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Accepts the settings entry either as an object or as a JSON string.
    pub fn from_entry(value: &Value) -> Result<Self, serde_json::Error> {
        match value {
            Value::String(raw) => serde_json::from_str(raw),
            other => serde_json::from_value(other.clone()),
        }
    }

    pub fn level_filter(&self) -> LevelFilter {
        LevelFilter::from_str(self.log_level.trim()).unwrap_or(LevelFilter::Info)
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(u64::from(self.debounce_ms))
    }
}

pub async fn load_settings(backend: &impl KeyValueStore) -> Settings {
    let entries = match backend.get(&[SETTINGS_ENTRY]).await {
        Ok(entries) => entries,
        Err(err) => {
            warn!("could not read {SETTINGS_ENTRY}, using defaults: {err}");
            return Settings::default();
        }
    };
    match entries.get(SETTINGS_ENTRY) {
        None | Some(Value::Null) => Settings::default(),
        Some(value) => Settings::from_entry(value).unwrap_or_else(|err| {
            warn!("ignoring malformed {SETTINGS_ENTRY}: {err}");
            Settings::default()
        }),
    }
}
