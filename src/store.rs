use futures::lock::Mutex;
use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::cell::RefCell;
use thiserror::Error;
use wasm_bindgen::prelude::*;

use crate::progress::{Binding, Progress};

pub const SURAH_ENTRY: &str = "memorizedSurah";
pub const JUZ_ENTRY: &str = "memorizedJuz";
pub const SETTINGS_ENTRY: &str = "hifzSettings";

pub type Entries = Map<String, Value>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage call failed: {0}")]
    Js(String),
    #[error("could not encode storage entries: {0}")]
    Encode(String),
    #[error("storage returned an unexpected shape: {0}")]
    Decode(String),
}

impl From<JsValue> for StoreError {
    fn from(value: JsValue) -> Self {
        let message = value
            .dyn_ref::<js_sys::Error>()
            .map(|err| String::from(err.message()))
            .or_else(|| value.as_string())
            .unwrap_or_else(|| format!("{value:?}"));
        Self::Js(message)
    }
}

#[allow(async_fn_in_trait)]
pub trait KeyValueStore {
    async fn get(&self, keys: &[&str]) -> Result<Entries, StoreError>;
    async fn set(&self, entries: Entries) -> Result<(), StoreError>;
}

#[wasm_bindgen]
extern "C" {
    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = get)]
    async fn local_get(keys: JsValue) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_namespace = ["chrome", "storage", "local"], js_name = set)]
    async fn local_set(items: JsValue) -> Result<JsValue, JsValue>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct ChromeStorage;

impl ChromeStorage {
    pub fn is_available() -> bool {
        let mut target: JsValue = js_sys::global().into();
        for name in ["chrome", "storage", "local"] {
            target = match js_sys::Reflect::get(&target, &JsValue::from_str(name)) {
                Ok(next) if next.is_object() => next,
                _ => return false,
            };
        }
        true
    }
}

impl KeyValueStore for ChromeStorage {
    async fn get(&self, keys: &[&str]) -> Result<Entries, StoreError> {
        let keys =
            serde_wasm_bindgen::to_value(keys).map_err(|e| StoreError::Encode(e.to_string()))?;
        let raw = local_get(keys).await?;
        serde_wasm_bindgen::from_value(raw).map_err(|e| StoreError::Decode(e.to_string()))
    }

    async fn set(&self, entries: Entries) -> Result<(), StoreError> {
        // Plain objects only: the default serializer emits ES `Map`s, which storage drops.
        let items = entries
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| StoreError::Encode(e.to_string()))?;
        local_set(items).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryStorage {
    entries: RefCell<Entries>,
}

impl MemoryStorage {
    pub fn with_entries(entries: Entries) -> Self {
        Self {
            entries: RefCell::new(entries),
        }
    }

    pub fn snapshot(&self) -> Entries {
        self.entries.borrow().clone()
    }
}

impl KeyValueStore for MemoryStorage {
    async fn get(&self, keys: &[&str]) -> Result<Entries, StoreError> {
        let entries = self.entries.borrow();
        Ok(keys
            .iter()
            .filter_map(|key| entries.get(*key).map(|value| (key.to_string(), value.clone())))
            .collect())
    }

    async fn set(&self, entries: Entries) -> Result<(), StoreError> {
        self.entries.borrow_mut().extend(entries);
        Ok(())
    }
}

fn decode_entry<T: DeserializeOwned + Default>(entries: &Entries, name: &str) -> T {
    match entries.get(name) {
        None | Some(Value::Null) => T::default(),
        Some(value) => serde_json::from_value(value.clone()).unwrap_or_else(|err| {
            warn!("treating undecodable {name} as empty: {err}");
            T::default()
        }),
    }
}

fn progress_from_entries(entries: &Entries) -> Progress {
    Progress {
        surah: decode_entry(entries, SURAH_ENTRY),
        juz: decode_entry(entries, JUZ_ENTRY),
    }
}

fn progress_to_entries(progress: &Progress) -> Result<Entries, StoreError> {
    let encode = |e: serde_json::Error| StoreError::Encode(e.to_string());
    let mut entries = Entries::new();
    entries.insert(SURAH_ENTRY.to_string(), serde_json::to_value(&progress.surah).map_err(encode)?);
    entries.insert(JUZ_ENTRY.to_string(), serde_json::to_value(&progress.juz).map_err(encode)?);
    Ok(entries)
}

// Every save rewrites both maps, so all of them share one queue.
pub struct ProgressStore<S> {
    backend: S,
    write_queue: Mutex<()>,
}

impl<S: KeyValueStore> ProgressStore<S> {
    pub fn new(backend: S) -> Self {
        Self {
            backend,
            write_queue: Mutex::new(()),
        }
    }

    pub fn backend(&self) -> &S {
        &self.backend
    }

    pub async fn ensure_initialized(&self) -> Result<Progress, StoreError> {
        let _queued = self.write_queue.lock().await;
        let entries = self.backend.get(&[SURAH_ENTRY, JUZ_ENTRY]).await?;

        let missing: Entries = [SURAH_ENTRY, JUZ_ENTRY]
            .into_iter()
            .filter(|name| entries.get(*name).map_or(true, Value::is_null))
            .map(|name| (name.to_string(), Value::Object(Map::new())))
            .collect();
        if !missing.is_empty() {
            debug!("initializing {} missing progress entries", missing.len());
            self.backend.set(missing).await?;
        }

        Ok(progress_from_entries(&entries))
    }

    pub async fn fetch(&self) -> Result<Progress, StoreError> {
        let entries = self.backend.get(&[SURAH_ENTRY, JUZ_ENTRY]).await?;
        Ok(progress_from_entries(&entries))
    }

    /// Like [`fetch`](Self::fetch), but a failed read yields empty progress.
    pub async fn load(&self) -> Progress {
        self.fetch().await.unwrap_or_else(|err| {
            warn!("reading progress failed, treating as empty: {err}");
            Progress::default()
        })
    }

    /// Waits behind queued saves so a fresh control never shows a stale value.
    pub async fn read_state(&self, binding: &Binding) -> bool {
        let _queued = self.write_queue.lock().await;
        self.load().await.is_checked(binding)
    }

    /// A failed read aborts the save instead of writing over state we never saw.
    pub async fn save(&self, binding: &Binding, checked: bool) -> Result<Progress, StoreError> {
        let _queued = self.write_queue.lock().await;
        let mut progress = self.fetch().await?;
        let outcome = progress.apply(binding, checked);
        if outcome.discarded > 0 {
            debug!(
                "dropped {} malformed juz entries for {}",
                outcome.discarded, binding.key
            );
        }

        self.backend.set(progress_to_entries(&progress)?).await?;
        info!(
            "saved {} juz={} view={} checked={checked}; surah memorized={} ({} parts known)",
            binding.key,
            binding.juz,
            binding.view.as_str(),
            outcome.surah_memorized,
            outcome.parts_known
        );
        Ok(progress)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{ChapterKey, JuzId};
    use crate::view::ViewMode;
    use futures::executor::block_on;
    use serde_json::json;
    use std::cell::Cell;
    use std::future::Future;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
            if self.0 {
                Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                Poll::Pending
            }
        }
    }

    /// Suspends between read and write like the real extension storage does.
    #[derive(Default)]
    struct SlowStorage {
        inner: MemoryStorage,
        fail_reads: Cell<bool>,
        fail_writes: Cell<bool>,
        writes: Cell<usize>,
    }

    impl KeyValueStore for SlowStorage {
        async fn get(&self, keys: &[&str]) -> Result<Entries, StoreError> {
            YieldOnce(false).await;
            if self.fail_reads.get() {
                return Err(StoreError::Js("quota exceeded".to_string()));
            }
            self.inner.get(keys).await
        }

        async fn set(&self, entries: Entries) -> Result<(), StoreError> {
            YieldOnce(false).await;
            if self.fail_writes.get() {
                return Err(StoreError::Js("write rejected".to_string()));
            }
            self.writes.set(self.writes.get() + 1);
            self.inner.set(entries).await
        }
    }

    fn juz(name: &str, part: &str) -> Binding {
        Binding::new(ChapterKey::from_display_name(name), JuzId::new(part), ViewMode::ByJuz)
    }

    fn whole(name: &str, view: ViewMode) -> Binding {
        Binding::whole_chapter(ChapterKey::from_display_name(name), view)
    }

    fn entries(value: Value) -> Entries {
        match value {
            Value::Object(map) => map,
            _ => Entries::new(),
        }
    }

    #[test]
    fn initializes_missing_entries_once() {
        let store = ProgressStore::new(SlowStorage::default());

        let progress = block_on(store.ensure_initialized()).unwrap();
        assert_eq!(progress, Progress::default());
        assert_eq!(
            store.backend().inner.snapshot(),
            entries(json!({ "memorizedSurah": {}, "memorizedJuz": {} }))
        );

        block_on(store.ensure_initialized()).unwrap();
        assert_eq!(store.backend().writes.get(), 1);
    }

    #[test]
    fn initialization_keeps_existing_progress() {
        let backend = MemoryStorage::with_entries(entries(json!({
            "memorizedSurah": { "al-fatihah": true },
        })));
        let store = ProgressStore::new(backend);

        let progress = block_on(store.ensure_initialized()).unwrap();
        assert_eq!(progress.surah.len(), 1);
        assert_eq!(
            store.backend().snapshot(),
            entries(json!({ "memorizedSurah": { "al-fatihah": true }, "memorizedJuz": {} }))
        );
    }

    #[test]
    fn undecodable_entry_reads_as_empty() {
        let backend = MemoryStorage::with_entries(entries(json!({
            "memorizedSurah": ["not", "a", "map"],
            "memorizedJuz": { "yasin": { "22": true } },
        })));
        let store = ProgressStore::new(backend);

        let progress = block_on(store.load());
        assert!(progress.surah.is_empty());
        assert!(block_on(store.read_state(&juz("Yasin", "22"))));
    }

    #[test]
    fn failed_read_loads_empty_but_blocks_save() {
        let backend = SlowStorage::default();
        backend.fail_reads.set(true);
        let store = ProgressStore::new(backend);

        assert_eq!(block_on(store.load()), Progress::default());
        assert!(block_on(store.save(&juz("Yasin", "22"), true)).is_err());
        assert_eq!(store.backend().writes.get(), 0);
    }

    #[test]
    fn failed_write_is_reported_and_not_retried() {
        let backend = SlowStorage::default();
        backend.fail_writes.set(true);
        let store = ProgressStore::new(backend);

        let result = block_on(store.save(&whole("Yasin", ViewMode::BySurah), true));
        assert!(matches!(result, Err(StoreError::Js(_))));
        assert!(!block_on(store.read_state(&whole("Yasin", ViewMode::BySurah))));
    }

    #[test]
    fn save_persists_both_maps() {
        let store = ProgressStore::new(MemoryStorage::default());

        let written = block_on(store.save(&juz("Al-Fatihah", "1"), true)).unwrap();

        assert_eq!(
            store.backend().snapshot(),
            entries(json!({
                "memorizedSurah": { "al-fatihah": true },
                "memorizedJuz": { "al-fatihah": { "1": true } },
            }))
        );
        assert_eq!(written, block_on(store.load()));
    }

    #[test]
    fn fatihah_toggled_across_views() {
        let store = ProgressStore::new(MemoryStorage::default());

        block_on(store.save(&juz("Al-Fatihah", "1"), true)).unwrap();
        assert!(block_on(store.read_state(&whole("Al-Fatihah", ViewMode::BySurah))));

        block_on(store.save(&whole("Al-Fatihah", ViewMode::BySurah), false)).unwrap();
        assert_eq!(
            store.backend().snapshot(),
            entries(json!({
                "memorizedSurah": { "al-fatihah": false },
                "memorizedJuz": { "al-fatihah": { "1": false } },
            }))
        );
    }

    #[test]
    fn save_cleans_legacy_juz_keys() {
        let backend = MemoryStorage::with_entries(entries(json!({
            "memorizedSurah": {},
            "memorizedJuz": { "al-kahf": { "1": true, "x": true, "02": true } },
        })));
        let store = ProgressStore::new(backend);

        block_on(store.save(&juz("al-kahf", "1"), true)).unwrap();

        let snapshot = store.backend().snapshot();
        assert_eq!(snapshot["memorizedJuz"]["al-kahf"], json!({ "1": true, "02": true }));
        assert_eq!(snapshot["memorizedSurah"]["al-kahf"], json!(true));
    }

    #[test]
    fn repeated_save_is_idempotent() {
        let store = ProgressStore::new(MemoryStorage::default());

        block_on(store.save(&juz("Maryam", "16"), true)).unwrap();
        let once = store.backend().snapshot();
        block_on(store.save(&juz("Maryam", "16"), true)).unwrap();

        assert_eq!(store.backend().snapshot(), once);
    }

    #[test]
    fn concurrent_saves_for_same_chapter_both_land() {
        let store = ProgressStore::new(SlowStorage::default());
        let (first_part, second_part) = (juz("Al-Baqarah", "1"), juz("Al-Baqarah", "2"));

        let (first, second) = block_on(async {
            futures::join!(store.save(&first_part, true), store.save(&second_part, true))
        });
        first.unwrap();
        second.unwrap();

        let progress = block_on(store.load());
        let parts = &progress.juz[&ChapterKey::from_display_name("al-baqarah")];
        assert_eq!(parts.len(), 2);
        assert!(progress.surah[&ChapterKey::from_display_name("al-baqarah")]);
    }

    #[test]
    fn concurrent_saves_for_different_chapters_both_land() {
        let store = ProgressStore::new(SlowStorage::default());
        let yasin = whole("Yasin", ViewMode::BySurah);
        let mulk = whole("Al-Mulk", ViewMode::ByRevelationOrder);

        let (first, second) = block_on(async {
            futures::join!(store.save(&yasin, true), store.save(&mulk, true))
        });
        first.unwrap();
        second.unwrap();

        let progress = block_on(store.load());
        assert_eq!(progress.surah.len(), 2);
    }

    #[test]
    fn read_during_save_sees_the_saved_value() {
        let store = ProgressStore::new(SlowStorage::default());
        let part = juz("Al-Baqarah", "1");

        let (saved, restored) =
            block_on(async { futures::join!(store.save(&part, true), store.read_state(&part)) });

        saved.unwrap();
        assert!(restored);
    }

    #[test]
    fn unqueued_read_modify_write_loses_an_update() {
        // Two interleaved cycles that both read before either writes: the
        // second write carries a stale copy and drops the first toggle.
        let store = ProgressStore::new(MemoryStorage::default());

        let mut first = block_on(store.fetch()).unwrap();
        let mut second = block_on(store.fetch()).unwrap();
        first.apply(&juz("Al-Baqarah", "1"), true);
        second.apply(&juz("Al-Baqarah", "2"), true);
        block_on(store.backend().set(progress_to_entries(&first).unwrap())).unwrap();
        block_on(store.backend().set(progress_to_entries(&second).unwrap())).unwrap();

        let progress = block_on(store.load());
        let parts = &progress.juz[&ChapterKey::from_display_name("al-baqarah")];
        assert_eq!(parts.len(), 1);
        assert!(!parts.contains_key(&JuzId::new("1")));
    }
}
