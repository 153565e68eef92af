use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use futures::executor::block_on;
use serde_json::Map;

use crate::islands::Island;
use crate::registry::{loader, Component, ComponentLoadError, ComponentRegistry};
use crate::vocabulary::TagCategory;

fn island_for(component: &str) -> Island {
    Island {
        id: format!("isl-{}", component.to_ascii_lowercase()),
        component_name: component.to_string(),
        precomputed_props: Map::new(),
        prop_descriptors: vec![],
        nodes: vec![],
        mount_marker: String::new(),
    }
}

fn counting_loader(
    name: &'static str,
    calls: Arc<AtomicUsize>,
) -> crate::registry::ComponentLoader {
    loader(move || {
        calls.fetch_add(1, Ordering::SeqCst);
        async move { Ok(Component::new(name, TagCategory::Display)) }
    })
}

#[test]
fn test_load_component_is_idempotent() {
    let registry = ComponentRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register_loader("Gallery", counting_loader("Gallery", calls.clone()));

    let first = block_on(registry.load_component("Gallery")).unwrap();
    let second = block_on(registry.load_component("Gallery")).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(Arc::ptr_eq(&first, &second));
}

#[test]
fn test_case_insensitive_resolution() {
    let registry = ComponentRegistry::new();
    registry.register_loader(
        "TextElement",
        loader(|| async { Ok(Component::new("TextElement", TagCategory::Display)) }),
    );

    let a = block_on(registry.load_component("textelement")).unwrap();
    let b = block_on(registry.load_component("TEXTELEMENT")).unwrap();
    assert!(Arc::ptr_eq(&a, &b));
    assert_eq!(a.name, "TextElement");
}

#[test]
fn test_first_registration_wins() {
    let registry = ComponentRegistry::new();
    registry.register_loader(
        "Widget",
        loader(|| async { Ok(Component::new("Widget", TagCategory::Display).with_chunk("a")) }),
    );
    registry.register_loader(
        "widget",
        loader(|| async { Ok(Component::new("widget", TagCategory::Display).with_chunk("b")) }),
    );

    let resolved = block_on(registry.load_component("WIDGET")).unwrap();
    assert_eq!(resolved.chunk.as_deref(), Some("a"));
}

#[test]
fn test_lookup_miss_returns_none_without_panicking() {
    let registry = ComponentRegistry::new();
    assert!(block_on(registry.load_component("Nonexistent")).is_none());
}

#[test]
fn test_failing_loader_returns_none() {
    let registry = ComponentRegistry::new();
    registry.register_loader(
        "Cursed",
        loader(|| async {
            Err(ComponentLoadError::LoaderFailed {
                name: "Cursed".to_string(),
                reason: "chunk 404".to_string(),
            })
        }),
    );
    assert!(block_on(registry.load_component("Cursed")).is_none());
}

#[test]
fn test_preload_all_settles_despite_one_failure() {
    let registry = ComponentRegistry::new();
    for name in ["Gallery", "Marquee", "MusicPlayer"] {
        registry.register_loader(
            name,
            loader(move || async move { Ok(Component::new(name, TagCategory::Display)) }),
        );
    }
    registry.register_loader(
        "Broken",
        loader(|| async {
            Err(ComponentLoadError::LoaderFailed {
                name: "Broken".to_string(),
                reason: "network".to_string(),
            })
        }),
    );

    let islands: Vec<Island> = ["Gallery", "Marquee", "MusicPlayer", "Broken"]
        .iter()
        .map(|n| island_for(n))
        .collect();

    let preloaded = block_on(registry.preload_all(&islands));
    let report = preloaded.report();
    assert_eq!(report.requested, 4);
    assert_eq!(report.loaded, 3);
    assert_eq!(report.failed, 1);

    assert!(preloaded.get("Gallery").is_some());
    assert!(preloaded.get("Broken").is_none());
}

#[test]
fn test_preload_deduplicates_component_names() {
    let registry = ComponentRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register_loader("Gallery", counting_loader("Gallery", calls.clone()));

    let islands = vec![
        island_for("Gallery"),
        island_for("gallery"),
        island_for("GALLERY"),
    ];
    let preloaded = block_on(registry.preload_all(&islands));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(preloaded.report().requested, 1);
}

#[test]
fn test_get_loaded_before_preload_is_a_contract_violation() {
    let registry = ComponentRegistry::new();
    registry.register_loader(
        "Gallery",
        loader(|| async { Ok(Component::new("Gallery", TagCategory::Display)) }),
    );

    // Before preload: logged warning, None, no panic.
    assert!(registry.get_loaded("Gallery").is_none());

    block_on(registry.preload_all(&[island_for("Gallery")]));
    assert!(registry.get_loaded("Gallery").is_some());
}

#[test]
fn test_clear_resets_the_session() {
    let registry = ComponentRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    registry.register_loader("Gallery", counting_loader("Gallery", calls.clone()));

    block_on(registry.preload_all(&[island_for("Gallery")]));
    assert!(registry.get_loaded("Gallery").is_some());

    registry.clear();
    assert!(registry.get_loaded("Gallery").is_none());

    // Registrations survive; the next preload reloads.
    block_on(registry.preload_all(&[island_for("Gallery")]));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}
