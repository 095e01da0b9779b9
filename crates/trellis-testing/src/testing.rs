use std::sync::Arc;

use trellis_core::{ComposeError, MemoryApplier, NodeId, RuntimeHandle};
use trellis_html::{
    CallbackRegistry, HtmlComposition, HtmlRenderer, HydratedDocument, HydrationState,
    RenderError, ViewNode,
};
use trellis_runtime_std::StdRuntime;

const MAX_PUMP_ROUNDS: usize = 100;

/// Headless harness for exercising HTML compositions in tests.
///
/// `HtmlTestRule` owns a composition on a [`StdRuntime`], a private
/// [`CallbackRegistry`] and a renderer. It can render the current tree,
/// hydrate it (keeping the callbacks so they can be clicked), and drive
/// recomposition until the runtime is idle.
pub struct HtmlTestRule {
    composition: HtmlComposition,
    runtime: StdRuntime,
    registry: Arc<CallbackRegistry>,
    renderer: HtmlRenderer,
    has_content: bool,
}

impl HtmlTestRule {
    pub fn new() -> Self {
        let runtime = StdRuntime::new();
        Self {
            composition: HtmlComposition::with_runtime(runtime.runtime()),
            runtime,
            registry: Arc::new(CallbackRegistry::new()),
            renderer: HtmlRenderer::new(),
            has_content: false,
        }
    }

    /// Installs `content` and performs the initial render.
    pub fn set_content(&mut self, content: impl Fn() + 'static) -> Result<(), ComposeError> {
        self.has_content = true;
        self.composition.render(content)
    }

    /// Re-runs whatever is invalid right now. Returns whether anything
    /// recomposed.
    pub fn recomposition(&mut self) -> Result<bool, ComposeError> {
        self.composition.recompose()
    }

    /// Recomposes until no frame is requested, no scope is invalid and the
    /// UI queue is empty.
    ///
    /// # Panics
    /// Panics when the composition keeps invalidating itself.
    pub fn pump_until_idle(&mut self) -> Result<(), ComposeError> {
        let handle = self.runtime_handle();
        for _ in 0..MAX_PUMP_ROUNDS {
            let frame = self.runtime.take_frame_request();
            if !frame && !handle.has_invalid_scopes() && !handle.has_pending_ui() {
                return Ok(());
            }
            self.composition.recompose()?;
        }
        panic!("pump_until_idle did not settle after {MAX_PUMP_ROUNDS} rounds");
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.runtime.runtime_handle()
    }

    pub fn runtime(&self) -> &StdRuntime {
        &self.runtime
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    pub fn renderer(&self) -> HtmlRenderer {
        self.renderer
    }

    pub fn has_content(&self) -> bool {
        self.has_content
    }

    pub fn root_id(&self) -> Option<NodeId> {
        self.composition.root()
    }

    /// Snapshot of the composed tree.
    pub fn tree(&self) -> Result<Option<ViewNode>, ComposeError> {
        self.composition.tree()
    }

    /// Plain markup of the current tree, empty when nothing is composed.
    pub fn render_html(&self) -> Result<String, ComposeError> {
        Ok(self
            .tree()?
            .map(|tree| self.renderer.render(&tree).into_string())
            .unwrap_or_default())
    }

    /// Renders with hydration and keeps the document's callbacks in the
    /// rule's registry so [`click`](Self::click) can run them.
    pub fn hydrate(&mut self, state: HydrationState) -> Result<HydratedDocument, RenderError> {
        let tree = self.composition.tree()?.ok_or(RenderError::EmptyTree)?;
        let mut document = self
            .renderer
            .render_with_hydration(&tree, &self.registry, state)?;
        self.registry.retain(document.take_callbacks());
        Ok(document)
    }

    /// Executes the callback behind `id`, then pumps until idle. Returns
    /// whether the callback existed.
    pub fn click(&mut self, id: &str) -> Result<bool, ComposeError> {
        let found = self.registry.execute_callback(id);
        if found {
            self.pump_until_idle()?;
        } else {
            log::debug!("click on unknown callback {id}");
        }
        Ok(found)
    }

    pub fn dump_tree(&self) -> String {
        let composition = self.composition.composition();
        let applier = composition.applier_mut();
        MemoryApplier::dump_tree(&applier, composition.root())
    }

    pub fn composition(&mut self) -> &mut HtmlComposition {
        &mut self.composition
    }
}

impl Default for HtmlTestRule {
    fn default() -> Self {
        Self::new()
    }
}

/// Convenience helper for tests that only need temporary access to an
/// `HtmlTestRule`.
pub fn run_test_composition<R>(f: impl FnOnce(&mut HtmlTestRule) -> R) -> R {
    let mut rule = HtmlTestRule::new();
    f(&mut rule)
}

#[cfg(test)]
#[path = "tests/testing_tests.rs"]
mod tests;
