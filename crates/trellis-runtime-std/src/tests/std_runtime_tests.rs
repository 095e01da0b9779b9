use super::{StdRuntime, StdScheduler};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use trellis_core::{location_key, use_state, Composition, MemoryApplier, MutableState, RuntimeScheduler};

#[test]
fn std_runtime_requests_frame_and_recomposes_on_state_change() {
    let runtime = StdRuntime::new();
    let mut composition = Composition::with_runtime(MemoryApplier::new(), runtime.runtime());
    let root_key = location_key(file!(), line!(), column!());

    let recompositions = Rc::new(Cell::new(0u32));
    let state_slot: Rc<RefCell<Option<MutableState<i32>>>> = Rc::default();

    let content = {
        let recompositions = Rc::clone(&recompositions);
        let state_slot = Rc::clone(&state_slot);
        move || {
            recompositions.set(recompositions.get() + 1);
            let state = use_state(|| 0);
            state.get();
            state_slot.borrow_mut().replace(state);
        }
    };

    composition.render(root_key, content).expect("initial render");
    assert_eq!(recompositions.get(), 1);
    runtime.take_frame_request();

    let state = state_slot
        .borrow()
        .clone()
        .expect("state captured during composition");
    state.set(1);

    assert!(
        runtime.take_frame_request(),
        "state.set should request a frame"
    );
    assert!(!runtime.take_frame_request());

    assert!(composition.recompose().expect("recompose after state change"));
    assert_eq!(
        recompositions.get(),
        2,
        "state change should trigger recomposition"
    );
    assert_eq!(state.get(), 1);
}

#[test]
fn frame_waker_fires_until_cleared() {
    let scheduler = StdScheduler::new();
    let wakes = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&wakes);
    scheduler.set_frame_waker(move || {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    scheduler.schedule_frame();
    scheduler.schedule_frame();
    assert_eq!(wakes.load(Ordering::SeqCst), 2);
    assert_eq!(scheduler.request_count(), 2);

    scheduler.clear_frame_waker();
    scheduler.schedule_frame();
    assert_eq!(wakes.load(Ordering::SeqCst), 2);
    assert!(scheduler.take_frame_request());
}

#[test]
fn posted_ui_work_wakes_the_host() {
    let runtime = StdRuntime::new();
    let handle = runtime.runtime_handle();
    runtime.take_frame_request();

    let ran = Arc::new(AtomicUsize::new(0));
    let flag = Arc::clone(&ran);
    let dispatcher = handle.dispatcher();
    std::thread::spawn(move || dispatcher.post(move || {
        flag.fetch_add(1, Ordering::SeqCst);
    }))
    .join()
    .expect("poster thread");

    assert!(runtime.take_frame_request());
    handle.drain_ui();
    assert_eq!(ran.load(Ordering::SeqCst), 1);
}
