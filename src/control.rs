use leptos::mount::mount_to;
use leptos::prelude::*;
use leptos::web_sys::{Element, HtmlElement, HtmlInputElement};
use wasm_bindgen::JsCast;

use crate::progress::{Binding, ChapterKey, JuzId};
use crate::view::ViewMode;

pub const KEY_ATTR: &str = "data-surah-key";
pub const JUZ_ATTR: &str = "data-juz";
pub const VIEW_ATTR: &str = "data-view";

/// Set on the chapter node itself; its value tracks the restore step.
pub const MARKER_ATTR: &str = "data-hifz-injected";
pub const MARKER_PENDING: &str = "pending";
pub const MARKER_RESTORED: &str = "restored";

pub const CONTROL_SELECTOR: &str = "input.hifz-checkbox[data-surah-key]";

fn memorized_checkbox(binding: Binding, on_toggle: impl Fn(bool) + 'static) -> impl IntoView {
    view! {
        <input
            type="checkbox"
            class="hifz-checkbox"
            title="Memorized"
            style="margin-left: 8px; width: 16px; height: 16px; cursor: pointer;"
            data-surah-key=binding.key.to_string()
            data-juz=binding.juz.to_string()
            data-view=binding.view.as_str()
            on:click=move |ev| {
                // The row underneath is a link; keep the click to ourselves.
                // With the default prevented the browser reverts the box, so the
                // value shown afterwards is whatever the save resync writes.
                ev.stop_propagation();
                ev.prevent_default();
                on_toggle(event_target_checked(&ev));
            }
        />
    }
}

/// Appends the checkbox as the node's last child and returns it.
pub fn mount_checkbox<F>(
    node: &HtmlElement,
    binding: &Binding,
    on_toggle: F,
) -> Option<HtmlInputElement>
where
    F: Fn(bool) + 'static,
{
    let binding = binding.clone();
    mount_to(node.clone(), move || memorized_checkbox(binding, on_toggle)).forget();
    node.last_element_child()
        .and_then(|child| child.dyn_into::<HtmlInputElement>().ok())
}

/// Reads back the binding a control was created with.
pub fn read_binding(control: &Element, fallback_view: ViewMode) -> Option<Binding> {
    let key = control.get_attribute(KEY_ATTR)?;
    let juz = control
        .get_attribute(JUZ_ATTR)
        .map(JuzId::new)
        .unwrap_or_else(JuzId::whole);
    let view = control
        .get_attribute(VIEW_ATTR)
        .and_then(|value| ViewMode::from_attr(&value))
        .unwrap_or(fallback_view);
    Some(Binding::new(ChapterKey::from_display_name(&key), juz, view))
}
