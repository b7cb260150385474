use leptos::prelude::*;
use leptos::task::spawn_local;
use leptos::web_sys::{
    Document, HtmlElement, HtmlInputElement, MutationObserver, MutationObserverInit,
};
use log::{debug, error, trace, warn};
use std::cell::Cell;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

use crate::config::Settings;
use crate::control::{
    mount_checkbox, read_binding, CONTROL_SELECTOR, MARKER_ATTR, MARKER_PENDING, MARKER_RESTORED,
};
use crate::progress::{Binding, ChapterKey, Progress};
use crate::store::{KeyValueStore, ProgressStore};
use crate::view::{binding_for, current_view, ViewMode};

/// Finds chapter rows, decorates them with checkboxes and keeps every copy of a
/// chapter's checkbox in step after a save.
pub struct Injector<S> {
    store: Rc<ProgressStore<S>>,
    settings: Rc<Settings>,
    retry_attempt: Cell<u32>,
    retry_scheduled: Cell<bool>,
    pending_scan: Cell<Option<TimeoutHandle>>,
}

impl<S: KeyValueStore + 'static> Injector<S> {
    pub fn new(store: Rc<ProgressStore<S>>, settings: Rc<Settings>) -> Rc<Self> {
        Rc::new(Self {
            store,
            settings,
            retry_attempt: Cell::new(0),
            retry_scheduled: Cell::new(false),
            pending_scan: Cell::new(None),
        })
    }

    pub fn start(self: &Rc<Self>) -> Result<(), JsValue> {
        self.observe()?;
        self.scan_and_inject();
        Ok(())
    }

    /// Annotates every chapter node that does not carry the marker yet.
    /// Returns how many nodes were annotated by this pass.
    pub fn scan_and_inject(self: &Rc<Self>) -> usize {
        let document = document();
        let selectors = &self.settings.selectors;
        let nodes = match document.query_selector_all(&selectors.chapter_name) {
            Ok(nodes) => nodes,
            Err(err) => {
                warn!("chapter selector {:?} rejected: {err:?}", selectors.chapter_name);
                return 0;
            }
        };
        if nodes.length() == 0 {
            self.schedule_retry();
            return 0;
        }
        self.retry_attempt.set(0);

        let view = current_view(&document, selectors);
        let mut annotated = 0;
        for idx in 0..nodes.length() {
            let Some(node) = nodes.item(idx).and_then(|n| n.dyn_into::<HtmlElement>().ok()) else {
                continue;
            };
            if node.has_attribute(MARKER_ATTR) {
                continue;
            }
            if self.annotate(node, view) {
                annotated += 1;
            }
        }
        if annotated > 0 {
            debug!("annotated {annotated} chapter rows in {} view", view.as_str());
        }
        annotated
    }

    fn annotate(self: &Rc<Self>, node: HtmlElement, view: ViewMode) -> bool {
        let binding = binding_for(&node, view, &self.settings.selectors);
        if binding.key.as_str().is_empty() {
            trace!("skipping chapter node without a name");
            return false;
        }
        // Marked before mounting so the observer callback our own insertion
        // triggers never sees this node as new.
        if node.set_attribute(MARKER_ATTR, MARKER_PENDING).is_err() {
            return false;
        }
        if view == ViewMode::ByJuz {
            debug!("juz binding {} -> {}", binding.key, binding.juz);
        }

        let this = Rc::clone(self);
        let toggled = binding.clone();
        let Some(control) = mount_checkbox(&node, &binding, move |checked| {
            this.toggle(toggled.clone(), checked)
        }) else {
            warn!("checkbox for {} did not mount", binding.key);
            return false;
        };

        let store = Rc::clone(&self.store);
        spawn_local(async move {
            control.set_checked(store.read_state(&binding).await);
            if let Err(err) = node.set_attribute(MARKER_ATTR, MARKER_RESTORED) {
                debug!("could not mark {} restored: {err:?}", binding.key);
            }
        });
        true
    }

    fn toggle(self: &Rc<Self>, binding: Binding, checked: bool) {
        let this = Rc::clone(self);
        spawn_local(async move {
            match this.store.save(&binding, checked).await {
                Ok(progress) => {
                    resync_ui(&document(), &binding.key, &progress, &this.settings);
                }
                Err(err) => {
                    error!("could not save {} ({}): {err}", binding.key, binding.juz);
                    this.resync_from_store(binding.key);
                }
            }
        });
    }

    /// Re-reads storage and refreshes every checkbox of `key`.
    pub fn resync_from_store(self: &Rc<Self>, key: ChapterKey) {
        let store = Rc::clone(&self.store);
        let settings = Rc::clone(&self.settings);
        spawn_local(async move {
            let progress = store.load().await;
            resync_ui(&document(), &key, &progress, &settings);
        });
    }

    fn observe(self: &Rc<Self>) -> Result<(), JsValue> {
        let body = document()
            .body()
            .ok_or_else(|| JsValue::from_str("document has no body"))?;
        let this = Rc::clone(self);
        let callback = Closure::<dyn FnMut()>::new(move || this.schedule_scan());
        let observer = MutationObserver::new(callback.as_ref().unchecked_ref())?;
        let options = MutationObserverInit::new();
        options.set_child_list(true);
        options.set_subtree(true);
        // The observer stays registered on <body> for the life of the page.
        observer.observe_with_options(&body, &options)?;
        callback.forget();
        Ok(())
    }

    /// Debounces mutation bursts into one scan.
    fn schedule_scan(self: &Rc<Self>) {
        if let Some(handle) = self.pending_scan.take() {
            handle.clear();
        }
        let this = Rc::clone(self);
        match set_timeout_with_handle(
            move || {
                this.pending_scan.set(None);
                this.scan_and_inject();
            },
            self.settings.debounce(),
        ) {
            Ok(handle) => self.pending_scan.set(Some(handle)),
            Err(err) => {
                warn!("could not debounce scan: {err:?}");
                self.scan_and_inject();
            }
        }
    }

    fn schedule_retry(self: &Rc<Self>) {
        if self.retry_scheduled.get() {
            return;
        }
        let attempt = self.retry_attempt.get();
        let Some(delay) = self.settings.retry.delay_for(attempt) else {
            if attempt == self.settings.retry.max_attempts {
                debug!("no chapter rows after {attempt} retries; waiting for page changes");
                self.retry_attempt.set(attempt.saturating_add(1));
            }
            return;
        };
        self.retry_attempt.set(attempt + 1);
        self.retry_scheduled.set(true);
        let this = Rc::clone(self);
        set_timeout(
            move || {
                this.retry_scheduled.set(false);
                this.scan_and_inject();
            },
            delay,
        );
    }
}

/// Sets every attached checkbox of `key` from `progress`, each according to
/// the view and part it was created for. Returns how many were updated.
pub fn resync_ui(
    document: &Document,
    key: &ChapterKey,
    progress: &Progress,
    settings: &Settings,
) -> usize {
    let Ok(controls) = document.query_selector_all(CONTROL_SELECTOR) else {
        return 0;
    };
    let fallback_view = current_view(document, &settings.selectors);
    let mut updated = 0;
    for idx in 0..controls.length() {
        let Some(control) = controls
            .item(idx)
            .and_then(|n| n.dyn_into::<HtmlInputElement>().ok())
        else {
            continue;
        };
        // Compared by value; keys are free text and do not belong in a selector.
        let Some(binding) = read_binding(&control, fallback_view) else {
            continue;
        };
        if &binding.key != key {
            continue;
        }
        control.set_checked(progress.is_checked(&binding));
        updated += 1;
    }
    trace!("resynced {updated} checkboxes for {key}");
    updated
}
