use super::*;
use std::sync::atomic::AtomicUsize;

fn counter() -> (Arc<AtomicUsize>, impl Fn() -> usize) {
    let hits = Arc::new(AtomicUsize::new(0));
    let read = Arc::clone(&hits);
    (hits, move || read.load(Ordering::SeqCst))
}

#[test]
fn registering_outside_a_session_fails() {
    let registry = CallbackRegistry::new();
    assert_eq!(
        registry.register_callback(|| {}),
        Err(RegistryError::NoActiveSession)
    );
    assert_eq!(registry.size(), 0);
}

#[test]
fn callbacks_execute_at_most_once() {
    let registry = Arc::new(CallbackRegistry::new());
    let (hits, read) = counter();
    let session = registry.begin_render();
    let id = session
        .enter(|| {
            let hits = Arc::clone(&hits);
            registry.register_callback(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        })
        .expect("register");

    assert!(registry.has_callback(&id));
    assert!(registry.execute_callback(&id));
    assert!(!registry.execute_callback(&id));
    assert!(!registry.has_callback(&id));
    assert_eq!(read(), 1);
    drop(session);
}

#[test]
fn ids_are_unique_and_carry_the_session() {
    let registry = Arc::new(CallbackRegistry::new());
    let session = registry.begin_render();
    let ids: Vec<String> = session.enter(|| {
        (0..3)
            .map(|_| registry.register_callback(|| {}).expect("register"))
            .collect()
    });
    let prefix = format!("{}-", session.key());
    assert!(ids.iter().all(|id| id.starts_with(&prefix)));
    assert_eq!(ids.iter().collect::<std::collections::HashSet<_>>().len(), 3);
    assert_eq!(session.emitted(), ids);
}

#[test]
fn finishing_hands_over_callbacks_in_order() {
    let registry = Arc::new(CallbackRegistry::new());
    let session = registry.begin_render();
    let ids: Vec<String> = session.enter(|| {
        (0..2)
            .map(|_| registry.register_callback(|| {}).expect("register"))
            .collect()
    });
    assert_eq!(session.enter(|| registry.session_size()), 2);

    let callbacks = session.finish();
    assert_eq!(callbacks.ids(), ids.as_slice());
    assert_eq!(callbacks.len(), 2);
    assert_eq!(registry.size(), 0);

    assert_eq!(registry.retain(callbacks), 2);
    assert!(ids.iter().all(|id| registry.has_callback(id)));
}

#[test]
fn dropping_an_unfinished_session_discards_its_callbacks() {
    let registry = Arc::new(CallbackRegistry::new());
    let (hits, read) = counter();
    {
        let session = registry.begin_render();
        session
            .enter(|| {
                registry.register_callback(move || {
                    hits.fetch_add(1, Ordering::SeqCst);
                })
            })
            .expect("register");
        assert_eq!(registry.size(), 1);
    }
    assert_eq!(registry.size(), 0);
    assert_eq!(read(), 0);
}

#[test]
fn nested_sessions_do_not_share_entries() {
    let registry = Arc::new(CallbackRegistry::new());
    let outer = registry.begin_render();
    outer.enter(|| {
        registry.register_callback(|| {}).expect("outer register");
        let inner = registry.begin_render();
        inner.enter(|| {
            assert_eq!(registry.session_size(), 0);
            registry.register_callback(|| {}).expect("inner register");
            assert_eq!(registry.session_size(), 1);
        });
        assert_eq!(inner.finish().len(), 1);
        assert_eq!(registry.session_size(), 1);
    });
    assert_eq!(outer.finish().len(), 1);
}

#[test]
fn clear_only_touches_the_current_session() {
    let registry = Arc::new(CallbackRegistry::new());
    let first = registry.begin_render();
    let second = registry.begin_render();
    first.enter(|| registry.register_callback(|| {})).expect("first");
    second.enter(|| registry.register_callback(|| {})).expect("second");

    assert_eq!(first.enter(|| registry.clear()), 1);
    assert_eq!(registry.size(), 1);
    assert_eq!(second.enter(|| registry.session_size()), 1);
    // Outside a session only retained entries are cleared.
    assert_eq!(registry.clear(), 0);
    assert_eq!(registry.size(), 1);
}

#[test]
fn clear_outside_a_session_drops_retained_entries() {
    let registry = Arc::new(CallbackRegistry::new());
    let session = registry.begin_render();
    session.enter(|| registry.register_callback(|| {})).expect("register");
    registry.retain(session.finish());
    assert_eq!(registry.size(), 1);
    assert_eq!(registry.clear(), 1);
    assert_eq!(registry.size(), 0);
}

#[test]
fn panicking_callback_is_contained() {
    let registry = Arc::new(CallbackRegistry::new());
    let session = registry.begin_render();
    let id = session
        .enter(|| registry.register_callback(|| panic!("handler failed")))
        .expect("register");
    assert!(registry.execute_callback(&id));
    assert!(!registry.has_callback(&id));
}

#[test]
fn blank_ids_are_rejected() {
    assert_eq!(CallbackRegistry::validate_id("  "), Err(RegistryError::InvalidId));
    assert_eq!(CallbackRegistry::validate_id(""), Err(RegistryError::InvalidId));
    assert_eq!(CallbackRegistry::validate_id(" a-1 "), Ok("a-1"));
}

#[test]
fn discard_only_drops_retained_entries() {
    let registry = Arc::new(CallbackRegistry::new());
    let (hits, read) = counter();
    let retained = registry.begin_render();
    let old_id = retained
        .enter(|| {
            registry.register_callback(move || {
                hits.fetch_add(1, Ordering::SeqCst);
            })
        })
        .expect("register");
    registry.retain(retained.finish());

    let live = registry.begin_render();
    let live_id = live
        .enter(|| registry.register_callback(|| {}))
        .expect("register");

    assert_eq!(registry.discard(&[old_id.clone(), live_id.clone()]), 1);
    assert!(!registry.has_callback(&old_id));
    assert!(registry.has_callback(&live_id));
    assert_eq!(read(), 0);
}
