use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::Arc;

use crate::composer::{dispose_slots, Composer};
use crate::node::{Applier, ApplierGuard, ConcreteApplierHost, SlotsHost};
use crate::observer;
use crate::runtime::{Runtime, RuntimeHandle};
use crate::{ComposeError, DefaultScheduler, Key, NodeId, RecomposeScope};

/// Upper bound on recompose rounds per call; content that writes the state it
/// reads on every pass would otherwise never settle.
const MAX_RECOMPOSE_ROUNDS: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompositionState {
    Created,
    Composing,
    Idle,
    Disposed,
}

pub struct Composition<A: Applier + 'static> {
    slots: Rc<SlotsHost>,
    applier: Rc<ConcreteApplierHost<A>>,
    runtime: Runtime,
    root: Option<NodeId>,
    root_key: Key,
    content: Option<Rc<dyn Fn()>>,
    state: CompositionState,
}

impl<A: Applier + 'static> Composition<A> {
    pub fn new(applier: A) -> Self {
        Self::with_runtime(applier, Runtime::new(Arc::new(DefaultScheduler)))
    }

    pub fn with_runtime(applier: A, runtime: Runtime) -> Self {
        Self {
            slots: Rc::new(SlotsHost::default()),
            applier: Rc::new(ConcreteApplierHost::new(applier)),
            runtime,
            root: None,
            root_key: 0,
            content: None,
            state: CompositionState::Created,
        }
    }

    pub fn state(&self) -> CompositionState {
        self.state
    }

    pub fn root(&self) -> Option<NodeId> {
        self.root
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.handle()
    }

    pub fn applier_mut(&self) -> ApplierGuard<'_, A> {
        ApplierGuard::new(self.applier.borrow_typed())
    }

    pub fn slot_count(&self) -> usize {
        self.slots.borrow().len()
    }

    pub fn debug_dump_slot_table_groups(&self) -> Vec<(usize, Key, Option<usize>, usize)> {
        self.slots.borrow().debug_dump_groups()
    }

    pub fn debug_dump_all_slots(&self) -> Vec<(usize, String)> {
        self.slots.borrow().debug_dump_all_slots()
    }

    /// Composes `content` from the root, then settles any invalidations the
    /// pass itself produced.
    pub fn render(&mut self, key: Key, content: impl Fn() + 'static) -> Result<(), ComposeError> {
        self.ensure_live()?;
        self.root_key = key;
        self.content = Some(Rc::new(content));
        let full = self.compose_from_root();
        let settled = self.recompose();
        full?;
        settled.map(|_| ())
    }

    /// Re-runs every invalidated scope. Returns whether anything recomposed.
    pub fn recompose(&mut self) -> Result<bool, ComposeError> {
        self.ensure_live()?;
        let runtime = self.runtime.handle();
        let mut recomposed = false;
        let mut misuses = Vec::new();
        for round in 0.. {
            if round == MAX_RECOMPOSE_ROUNDS {
                log::warn!("recomposition did not settle after {round} rounds");
                break;
            }
            runtime.drain_ui();
            runtime.report_changed();
            let scopes: Vec<RecomposeScope> = runtime
                .take_invalidated_scopes()
                .into_iter()
                .filter_map(|(id, weak)| match weak.upgrade() {
                    Some(inner) => Some(RecomposeScope { inner }),
                    None => {
                        runtime.mark_scope_recomposed(id);
                        None
                    }
                })
                .collect();
            if scopes.is_empty() {
                break;
            }
            recomposed = true;
            let composer = self.composer();
            let outcome = self.run_guarded(&composer, |composer| {
                for scope in &scopes {
                    if scope.is_invalid() && scope.is_active() {
                        composer.recompose_group(scope);
                    } else {
                        scope.mark_recomposed();
                    }
                }
            });
            match self.finish_pass(&composer, outcome) {
                Ok(()) => {}
                Err(ComposeError::StructuralMisuse(found)) => misuses.extend(found),
                Err(err) => return Err(err),
            }
        }
        if !runtime.has_invalid_scopes() && !runtime.has_pending_ui() {
            self.runtime.set_needs_frame(false);
        }
        if misuses.is_empty() {
            Ok(recomposed)
        } else {
            Err(ComposeError::StructuralMisuse(misuses))
        }
    }

    /// Disposes every remembered value and node. Later calls are no-ops.
    pub fn dispose(&mut self) {
        if self.state == CompositionState::Disposed {
            return;
        }
        self.tear_down();
        self.content = None;
        self.state = CompositionState::Disposed;
    }

    fn ensure_live(&self) -> Result<(), ComposeError> {
        if self.state == CompositionState::Disposed {
            Err(ComposeError::Disposed)
        } else {
            Ok(())
        }
    }

    fn composer(&self) -> Composer {
        Composer::new(
            Rc::clone(&self.slots),
            self.applier.clone(),
            self.runtime.handle(),
            self.root,
        )
    }

    fn compose_from_root(&mut self) -> Result<(), ComposeError> {
        let Some(content) = self.content.clone() else {
            return Ok(());
        };
        self.runtime.handle().drain_ui();
        self.slots.borrow_mut().reset();
        let composer = self.composer();
        let key = self.root_key;
        let outcome = self.run_guarded(&composer, move |composer| {
            composer.with_content_group(key, content);
            composer.finish_pass();
        });
        self.finish_pass(&composer, outcome)
    }

    fn run_guarded(
        &mut self,
        composer: &Composer,
        pass: impl FnOnce(&Composer),
    ) -> Result<(), String> {
        self.state = CompositionState::Composing;
        let depth = observer::depth();
        let result = catch_unwind(AssertUnwindSafe(|| composer.install(pass)));
        result.map_err(|payload| {
            observer::truncate(depth);
            panic_message(payload)
        })
    }

    fn finish_pass(
        &mut self,
        composer: &Composer,
        outcome: Result<(), String>,
    ) -> Result<(), ComposeError> {
        let runtime = self.runtime.handle();
        if let Err(message) = outcome {
            log::error!("composition aborted: {message}");
            drop(composer.take_side_effects());
            self.tear_down();
            runtime.report_changed();
            self.state = CompositionState::Idle;
            return Err(ComposeError::ContentPanicked { message });
        }
        self.root = composer.root();
        runtime.report_changed();
        for effect in composer.take_side_effects() {
            if catch_unwind(AssertUnwindSafe(effect)).is_err() {
                log::error!("side effect panicked");
            }
        }
        runtime.drain_ui();
        self.state = CompositionState::Idle;
        let misuses = composer.take_misuses();
        if misuses.is_empty() {
            Ok(())
        } else {
            Err(ComposeError::StructuralMisuse(misuses))
        }
    }

    fn tear_down(&mut self) {
        let removed = self.slots.borrow_mut().take_all();
        dispose_slots(removed, &*self.applier);
        self.root = None;
    }
}

impl<A: Applier + 'static> Drop for Composition<A> {
    fn drop(&mut self) {
        self.dispose();
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
#[path = "tests/composition_tests.rs"]
mod tests;
