use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use crate::view::ViewMode;

const WHOLE_CHAPTER: &str = "all";

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChapterKey(String);

impl ChapterKey {
    pub fn from_display_name(name: &str) -> Self {
        Self(name.trim().to_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ChapterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JuzId(String);

impl JuzId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn whole() -> Self {
        Self(WHOLE_CHAPTER.to_string())
    }

    /// First run of ASCII digits in a Juz heading, e.g. `"Juz 12"` -> `"12"`.
    pub fn from_label(label: &str) -> Self {
        static RE_DIGITS: OnceLock<Regex> = OnceLock::new();
        let re_digits =
            RE_DIGITS.get_or_init(|| Regex::new(r"[0-9]+").expect("valid digit run regex"));
        re_digits
            .find(label)
            .map(|m| Self(m.as_str().to_string()))
            .unwrap_or_else(Self::whole)
    }

    pub fn is_partition(&self) -> bool {
        static RE_PARTITION: OnceLock<Regex> = OnceLock::new();
        let re_partition =
            RE_PARTITION.get_or_init(|| Regex::new(r"^[0-9]+$").expect("valid partition regex"));
        re_partition.is_match(&self.0)
    }

    pub fn is_whole(&self) -> bool {
        self.0 == WHOLE_CHAPTER
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JuzId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub key: ChapterKey,
    pub juz: JuzId,
    pub view: ViewMode,
}

impl Binding {
    pub fn new(key: ChapterKey, juz: JuzId, view: ViewMode) -> Self {
        // Outside the Juz view a control always covers the whole chapter.
        let juz = if view == ViewMode::ByJuz {
            juz
        } else {
            JuzId::whole()
        };
        Self { key, juz, view }
    }

    pub fn whole_chapter(key: ChapterKey, view: ViewMode) -> Self {
        Self::new(key, JuzId::whole(), view)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ApplyOutcome {
    pub surah_memorized: bool,
    pub parts_known: usize,
    pub discarded: usize,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    #[serde(rename = "memorizedSurah", default)]
    pub surah: BTreeMap<ChapterKey, bool>,
    #[serde(rename = "memorizedJuz", default)]
    pub juz: BTreeMap<ChapterKey, BTreeMap<JuzId, bool>>,
}

// `surah[k]` is derived from `juz[k]` on every Juz-level write.
impl Progress {
    pub fn is_checked(&self, binding: &Binding) -> bool {
        match binding.view {
            ViewMode::ByJuz => self
                .juz
                .get(&binding.key)
                .and_then(|parts| parts.get(&binding.juz))
                .copied()
                .unwrap_or(false),
            ViewMode::BySurah | ViewMode::ByRevelationOrder => {
                self.surah.get(&binding.key).copied().unwrap_or(false)
            }
        }
    }

    pub fn apply(&mut self, binding: &Binding, checked: bool) -> ApplyOutcome {
        let parts = self.juz.entry(binding.key.clone()).or_default();
        let mut discarded = 0;

        let surah_memorized = match binding.view {
            ViewMode::ByJuz => {
                parts.insert(binding.juz.clone(), checked);
                let before = parts.len();
                // Legacy drafts stored non-numeric part keys; they never count.
                parts.retain(|juz, _| juz.is_partition());
                discarded = before - parts.len();
                !parts.is_empty() && parts.values().all(|memorized| *memorized)
            }
            ViewMode::BySurah | ViewMode::ByRevelationOrder => {
                for memorized in parts.values_mut() {
                    *memorized = checked;
                }
                checked
            }
        };
        let parts_known = parts.len();

        self.surah.insert(binding.key.clone(), surah_memorized);

        ApplyOutcome {
            surah_memorized,
            parts_known,
            discarded,
        }
    }
}
