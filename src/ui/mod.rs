/// yew hooks for the popup, side panel and options page
use crate::config::ThemePreference;
use crate::storage::StorageArea;
use crate::store::{ExtensionStore, StoreSnapshot};
use crate::theme::{DARK_QUERY, ThemeAttributes};
use wasm_bindgen::JsCast;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;
use web_sys::{HtmlElement, MediaQueryList, MediaQueryListEvent};
use yew::prelude::*;

/// Hydrate `store` once and re-render on every change to it
#[hook]
pub fn use_store_snapshot<A>(store: &ExtensionStore<A>) -> StoreSnapshot
where
    A: StorageArea + 'static,
{
    let snapshot = use_state(|| store.snapshot());

    {
        let snapshot = snapshot.clone();
        use_effect_with(store.clone(), move |store| {
            let watcher = store.watch(move |next| snapshot.set(next.clone()));

            let store = store.clone();
            spawn_local(async move {
                if let Err(e) = store.ensure_hydrated().await {
                    log::error!("Failed to load settings: {}", e);
                }
            });

            move || watcher.unsubscribe()
        });
    }

    (*snapshot).clone()
}

fn system_prefers_dark(media: Option<&MediaQueryList>) -> bool {
    media.is_some_and(MediaQueryList::matches)
}

fn apply_theme(attributes: &ThemeAttributes) -> Option<()> {
    let root = web_sys::window()?.document()?.document_element()?;
    let resolved = attributes.resolved.as_str();

    root.set_attribute("data-theme", resolved).ok()?;
    root.set_attribute("data-theme-preference", attributes.preference).ok()?;

    let classes = root.class_list();
    classes.toggle_with_force("dark", resolved == "dark").ok()?;
    classes.toggle_with_force("light", resolved == "light").ok()?;

    root.dyn_ref::<HtmlElement>()?
        .style()
        .set_property("color-scheme", resolved)
        .ok()
}

/// Reflect `theme` onto `<html>`; `system` also follows OS color-scheme changes
#[hook]
pub fn use_theme_sync(theme: ThemePreference) {
    use_effect_with(theme, move |theme| {
        let theme = *theme;
        let media = web_sys::window().and_then(|window| window.match_media(DARK_QUERY).ok().flatten());

        let attributes = ThemeAttributes::new(theme, system_prefers_dark(media.as_ref()));
        if apply_theme(&attributes).is_none() {
            log::warn!("Could not apply theme {}", attributes.preference);
        }

        let listener = media.filter(|_| attributes.follows_system()).map(|media| {
            let on_change = Closure::wrap(Box::new(move |event: MediaQueryListEvent| {
                apply_theme(&ThemeAttributes::new(theme, event.matches()));
            }) as Box<dyn Fn(MediaQueryListEvent)>);

            if let Err(e) = media.add_event_listener_with_callback("change", on_change.as_ref().unchecked_ref()) {
                log::warn!("Failed to follow system theme: {:?}", e);
            }
            (media, on_change)
        });

        move || {
            if let Some((media, on_change)) = listener {
                let _ = media.remove_event_listener_with_callback("change", on_change.as_ref().unchecked_ref());
            }
        }
    });
}
