pub mod config;
pub mod control;
pub mod injector;
pub mod progress;
pub mod store;
pub mod view;

use leptos::task::{spawn_local, Executor};
use log::{error, info, trace, warn, Level, LevelFilter};
use std::rc::Rc;
use wasm_bindgen::prelude::*;

use crate::injector::Injector;
use crate::store::{ChromeStorage, KeyValueStore, ProgressStore};

#[wasm_bindgen(start)]
pub fn start() {
    console_error_panic_hook::set_once();
    // The logger accepts everything; the effective level comes from settings.
    wasm_logger::init(wasm_logger::Config::new(Level::Trace));
    log::set_max_level(LevelFilter::Info);

    if !ChromeStorage::is_available() {
        warn!("chrome.storage.local is unavailable; not injecting checkboxes");
        return;
    }
    boot(ChromeStorage);
}

/// Starts the tracker on `backend` once the current task yields.
pub fn boot<S: KeyValueStore + 'static>(backend: S) {
    // Nothing has been mounted yet, so the task executor is not set up either.
    if Executor::init_wasm_bindgen().is_err() {
        trace!("task executor already initialized");
    }
    spawn_local(async move {
        if let Err(err) = launch(backend).await {
            error!("hifz tracker failed to start: {err:?}");
        }
    });
}

async fn launch<S: KeyValueStore + 'static>(backend: S) -> Result<(), JsValue> {
    let settings = config::load_settings(&backend).await;
    log::set_max_level(settings.level_filter());

    let store = Rc::new(ProgressStore::new(backend));
    match store.ensure_initialized().await {
        Ok(progress) => info!(
            "loaded progress: {} chapters, {} with juz parts",
            progress.surah.len(),
            progress.juz.values().filter(|parts| !parts.is_empty()).count()
        ),
        Err(err) => warn!("could not initialize progress storage: {err}"),
    }

    Injector::new(store, Rc::new(settings)).start()
}
