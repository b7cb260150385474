//! Everything that depends on how the host lays out its chapter lists.
//!
//! Missing or unexpected markup never fails here: it degrades to the
//! by-Surah view and to whole-chapter bindings.

use leptos::web_sys::{Document, Element};
use log::trace;
use serde::{Deserialize, Serialize};

use crate::config::Selectors;
use crate::progress::{Binding, ChapterKey, JuzId};

/// The host's three listing tabs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ViewMode {
    #[default]
    #[serde(rename = "surah")]
    BySurah,
    #[serde(rename = "juz")]
    ByJuz,
    #[serde(rename = "revelation")]
    ByRevelationOrder,
}

impl ViewMode {
    pub fn from_tab_label(label: &str) -> Self {
        let label = label.trim().to_lowercase();
        if label.contains("juz") {
            Self::ByJuz
        } else if label.contains("revelation") {
            Self::ByRevelationOrder
        } else {
            Self::BySurah
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BySurah => "surah",
            Self::ByJuz => "juz",
            Self::ByRevelationOrder => "revelation",
        }
    }

    /// Inverse of [`as_str`](Self::as_str), for values read back from `data-view`.
    pub fn from_attr(value: &str) -> Option<Self> {
        match value {
            "surah" => Some(Self::BySurah),
            "juz" => Some(Self::ByJuz),
            "revelation" => Some(Self::ByRevelationOrder),
            _ => None,
        }
    }
}

pub fn current_view(document: &Document, selectors: &Selectors) -> ViewMode {
    match document
        .query_selector(&selectors.selected_tab)
        .ok()
        .flatten()
        .and_then(|tab| tab.text_content())
    {
        Some(label) => ViewMode::from_tab_label(&label),
        None => ViewMode::default(),
    }
}

pub fn chapter_key_for(node: &Element) -> ChapterKey {
    ChapterKey::from_display_name(&node.text_content().unwrap_or_default())
}

pub fn juz_id_for(node: &Element, selectors: &Selectors) -> JuzId {
    let row = node
        .closest(&selectors.chapter_row)
        .ok()
        .flatten()
        .unwrap_or_else(|| node.clone());
    let Some(container) = row.closest(&selectors.juz_container).ok().flatten() else {
        trace!("chapter row outside any juz container");
        return JuzId::whole();
    };
    let Some(label) = container.query_selector(&selectors.juz_label).ok().flatten() else {
        trace!("juz container without a label");
        return JuzId::whole();
    };
    JuzId::from_label(&label.text_content().unwrap_or_default())
}

pub fn binding_for(node: &Element, view: ViewMode, selectors: &Selectors) -> Binding {
    let juz = match view {
        ViewMode::ByJuz => juz_id_for(node, selectors),
        ViewMode::BySurah | ViewMode::ByRevelationOrder => JuzId::whole(),
    };
    Binding::new(chapter_key_for(node), juz, view)
}
