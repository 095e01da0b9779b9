use super::*;
use crate::observer::observe_reads;
use crate::runtime::TestRuntime;
use std::cell::Cell;

struct Probe {
    id: usize,
    hits: Cell<usize>,
}

impl Probe {
    fn new() -> Rc<Self> {
        Rc::new(Self {
            id: observer::next_observer_id(),
            hits: Cell::new(0),
        })
    }
}

impl Dependent for Probe {
    fn dependent_id(&self) -> usize {
        self.id
    }

    fn on_dependency_changed(&self) {
        self.hits.set(self.hits.get() + 1);
    }
}

#[test]
fn reads_subscribe_the_current_observer() {
    let state = MutableState::with_runtime(1, None);
    let probe = Probe::new();
    observe_reads(probe.clone(), || state.get());
    assert_eq!(state.watcher_count(), 1);

    state.set(2);
    assert_eq!(probe.hits.get(), 1);
    // Notification clears the subscription until the next read.
    assert_eq!(state.watcher_count(), 0);
    state.set(3);
    assert_eq!(probe.hits.get(), 1);
}

#[test]
fn repeated_reads_register_once() {
    let state = MutableState::with_runtime(0, None);
    let probe = Probe::new();
    observe_reads(probe.clone(), || {
        state.get();
        state.get();
    });
    assert_eq!(state.watcher_count(), 1);
}

#[test]
fn untracked_reads_do_not_subscribe() {
    let state = MutableState::with_runtime(0, None);
    let probe = Probe::new();
    observe_reads(probe.clone(), || {
        untracked_read(&state);
        state.get_untracked();
    });
    assert_eq!(state.watcher_count(), 0);
}

fn untracked_read(state: &MutableState<i32>) -> i32 {
    crate::observer::untracked(|| state.get())
}

#[test]
fn runtime_writes_are_reported_immediately_outside_composition() {
    let runtime = TestRuntime::new();
    let state = MutableState::with_runtime(String::from("a"), Some(runtime.handle()));
    let probe = Probe::new();
    observe_reads(probe.clone(), || state.with(|value| value.len()));

    assert!(state.set(String::from("b")));
    assert_eq!(probe.hits.get(), 1);
}

#[test]
fn writes_while_composing_wait_for_report() {
    let runtime = TestRuntime::new();
    let handle = runtime.handle();
    let state = MutableState::with_runtime(0, Some(handle.clone()));
    let probe = Probe::new();
    observe_reads(probe.clone(), || state.get());

    {
        let _composing = handle.begin_composing();
        state.set(1);
        assert_eq!(probe.hits.get(), 0);
    }
    handle.report_changed();
    assert_eq!(probe.hits.get(), 1);
}

#[test]
fn update_always_counts_as_a_write() {
    let state = MutableState::with_runtime(vec![1], None);
    let probe = Probe::new();
    observe_reads(probe.clone(), || state.with(|v| v.len()));
    let len = state.update(|v| {
        v.push(2);
        v.len()
    });
    assert_eq!(len, 2);
    assert_eq!(probe.hits.get(), 1);
}

#[test]
fn derived_state_is_lazy_and_cached() {
    let source = MutableState::with_runtime(3, None);
    let input = source.clone();
    let derived = DerivedState::new(move || input.get() + 1);
    assert_eq!(derived.computations(), 0);

    assert_eq!(derived.get(), 4);
    assert_eq!(derived.get(), 4);
    assert_eq!(derived.computations(), 1);

    source.set(10);
    assert_eq!(derived.computations(), 1);
    assert_eq!(derived.get(), 11);
    assert_eq!(derived.computations(), 2);
}

#[test]
fn derived_state_notifies_its_readers() {
    let source = MutableState::with_runtime(1, None);
    let input = source.clone();
    let derived = DerivedState::new(move || input.get() * 2);
    let probe = Probe::new();
    observe_reads(probe.clone(), || derived.get());

    source.set(2);
    assert_eq!(probe.hits.get(), 1);
    // Still dirty: further upstream writes do not re-notify.
    source.set(3);
    assert_eq!(probe.hits.get(), 1);
    assert_eq!(derived.get(), 6);
}

#[test]
fn state_view_reads_both_sources() {
    let mutable = MutableState::with_runtime(5, None);
    let view: State<i32> = mutable.as_state();
    assert_eq!(view.get(), 5);

    let derived: State<i32> = DerivedState::new(|| 7).into();
    assert_eq!(derived.value(), 7);
}
