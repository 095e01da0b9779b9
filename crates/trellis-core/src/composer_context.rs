use std::cell::RefCell;
use std::rc::Rc;

use crate::{Composer, ComposerCore};

thread_local! {
    static COMPOSER_STACK: RefCell<Vec<Rc<ComposerCore>>> = const { RefCell::new(Vec::new()) };
}

/// Pops the composer stack on drop, including during unwinding.
#[must_use = "ComposerScopeGuard pops the composer stack on drop"]
pub struct ComposerScopeGuard;

impl Drop for ComposerScopeGuard {
    fn drop(&mut self) {
        COMPOSER_STACK.with(|stack| {
            stack.borrow_mut().pop();
        });
    }
}

pub fn enter(composer: &Composer) -> ComposerScopeGuard {
    COMPOSER_STACK.with(|stack| stack.borrow_mut().push(composer.clone_core()));
    ComposerScopeGuard
}

/// Runs `f` with the innermost active composer.
///
/// # Panics
/// Panics when called outside a composition pass. Composable functions are
/// only meaningful inside one.
pub fn with_composer<R>(f: impl FnOnce(&Composer) -> R) -> R {
    let core = COMPOSER_STACK
        .with(|stack| stack.borrow().last().cloned())
        .unwrap_or_else(|| panic!("composable called outside of a composition pass"));
    f(&Composer::from_core(core))
}

pub fn try_with_composer<R>(f: impl FnOnce(&Composer) -> R) -> Option<R> {
    let core = COMPOSER_STACK.with(|stack| stack.borrow().last().cloned())?;
    Some(f(&Composer::from_core(core)))
}

pub fn is_composing() -> bool {
    COMPOSER_STACK.with(|stack| !stack.borrow().is_empty())
}
