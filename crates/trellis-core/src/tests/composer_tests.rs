use super::*;
use crate::test_support::{children_of, element, TestNode};
use crate::{with_current_composer, Composition, MemoryApplier, MutableState, use_state};
use std::cell::{Cell, RefCell};

#[test]
fn slot_depths_follow_group_nesting() {
    let slots = vec![
        Slot::Group {
            key: 1,
            len: 3,
            scope: None,
        },
        Slot::Node { id: 0 },
        Slot::Group {
            key: 2,
            len: 1,
            scope: None,
        },
        Slot::Node { id: 1 },
        Slot::Node { id: 2 },
    ];
    assert_eq!(slot_depths(&slots), vec![0, 1, 1, 2, 0]);
}

#[test]
fn disposable_slot_runs_once() {
    let count = Rc::new(Cell::new(0));
    let mut slot = DisposableSlot::default();
    let first = Rc::clone(&count);
    slot.arm(Box::new(move || first.set(first.get() + 1)));
    let second = Rc::clone(&count);
    slot.arm(Box::new(move || second.set(second.get() + 10)));
    slot.run();
    slot.run();
    assert_eq!(count.get(), 1);
}

#[test]
fn panicking_disposable_is_contained() {
    let mut slot = DisposableSlot::default();
    slot.arm(Box::new(|| panic!("cleanup failed")));
    slot.run();
}

#[test]
fn emitted_node_is_reused_and_updated() {
    let mut composition = Composition::new(MemoryApplier::new());
    let tick: Rc<RefCell<Option<MutableState<u8>>>> = Rc::default();

    let tick_out = Rc::clone(&tick);
    composition
        .render(1, move || {
            let counter = use_state(|| 0u8);
            counter.get();
            *tick_out.borrow_mut() = Some(counter);
            with_current_composer(|composer| {
                composer.emit_node(|| TestNode {
                    label: "leaf",
                    ..TestNode::default()
                });
            });
        })
        .expect("render");
    let root = composition.root().expect("root");

    tick.borrow().clone().expect("state").set(1);
    composition.recompose().expect("recompose");

    assert_eq!(composition.root(), Some(root));
    let mut applier = composition.applier_mut();
    assert_eq!(applier.len(), 1);
    let updates = applier
        .with_node(root, |node: &mut TestNode| node.updates)
        .expect("leaf node");
    assert_eq!(updates, 1);
}

#[test]
fn skipped_group_keeps_its_nodes_attached() {
    let mut composition = Composition::new(MemoryApplier::new());
    let tick: Rc<RefCell<Option<MutableState<u8>>>> = Rc::default();
    let static_runs = Rc::new(Cell::new(0));

    let tick_out = Rc::clone(&tick);
    let runs = Rc::clone(&static_runs);
    composition
        .render(1, move || {
            let tick_out = Rc::clone(&tick_out);
            let runs = Rc::clone(&runs);
            element("root", move || {
                let counter = use_state(|| 0u8);
                counter.get();
                *tick_out.borrow_mut() = Some(counter);
                let runs = Rc::clone(&runs);
                with_current_composer(|composer| {
                    composer.with_group(77, |composer| {
                        if composer.inserting() {
                            runs.set(runs.get() + 1);
                            element("static", || {
                                element("nested", || {});
                            });
                        } else {
                            composer.skip_current_group();
                        }
                    });
                });
                element("dynamic", || {});
            });
        })
        .expect("render");

    let root = composition.root().expect("root");
    let before = children_of(&composition.applier_mut(), root);
    assert_eq!(before.len(), 2);

    tick.borrow().clone().expect("state").set(1);
    composition.recompose().expect("recompose");

    assert_eq!(static_runs.get(), 1);
    let applier = composition.applier_mut();
    assert_eq!(children_of(&applier, root), before);
    // The nested node still belongs to "static", not to the root.
    assert_eq!(children_of(&applier, before[0]).len(), 1);
}

#[test]
fn with_node_mut_reports_type_mismatch() {
    struct Other;
    impl Node for Other {}

    let mut composition = Composition::new(MemoryApplier::new());
    let outcome: Rc<RefCell<Option<Result<(), NodeError>>>> = Rc::default();
    let outcome_in = Rc::clone(&outcome);
    composition
        .render(1, move || {
            let id = element("typed", || {});
            let result = with_current_composer(|composer| composer.with_node_mut(id, |_: &mut Other| ()));
            *outcome_in.borrow_mut() = Some(result);
        })
        .expect("render");

    match outcome.borrow().clone() {
        Some(Err(NodeError::TypeMismatch { .. })) => {}
        other => panic!("expected type mismatch, got {other:?}"),
    };
}
