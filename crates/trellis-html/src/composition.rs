use std::sync::Arc;

use trellis_core::{
    ComposeError, Composition, CompositionState, MemoryApplier, NodeId, Runtime, RuntimeHandle,
};

use crate::registry::CallbackRegistry;
use crate::renderer::{HtmlRenderer, HydratedDocument, HydrationState, RenderError};
use crate::session::spawn_blocking_in_session;
use crate::view::ViewNode;

const ROOT_KEY: u64 = 0x7472_656c_6c69_7300;

/// A composition producing [`crate::HtmlNode`]s.
///
/// Like every composition it is single-threaded. To serve a request from an
/// async handler use [`compose_view`], which runs one on the blocking pool.
pub struct HtmlComposition {
    composition: Composition<MemoryApplier>,
}

impl HtmlComposition {
    pub fn new() -> Self {
        Self {
            composition: Composition::new(MemoryApplier::new()),
        }
    }

    pub fn with_runtime(runtime: Runtime) -> Self {
        Self {
            composition: Composition::with_runtime(MemoryApplier::new(), runtime),
        }
    }

    pub fn render(&mut self, content: impl Fn() + 'static) -> Result<(), ComposeError> {
        self.composition.render(ROOT_KEY, content)
    }

    pub fn recompose(&mut self) -> Result<bool, ComposeError> {
        self.composition.recompose()
    }

    pub fn root(&self) -> Option<NodeId> {
        self.composition.root()
    }

    /// Snapshot of the current tree, `None` before the first render or when
    /// the content emitted nothing.
    pub fn tree(&self) -> Result<Option<ViewNode>, ComposeError> {
        let Some(root) = self.composition.root() else {
            return Ok(None);
        };
        let applier = self.composition.applier_mut();
        Ok(Some(ViewNode::from_applier(&applier, root)?))
    }

    pub fn state(&self) -> CompositionState {
        self.composition.state()
    }

    pub fn runtime_handle(&self) -> RuntimeHandle {
        self.composition.runtime_handle()
    }

    pub fn composition(&self) -> &Composition<MemoryApplier> {
        &self.composition
    }

    pub fn composition_mut(&mut self) -> &mut Composition<MemoryApplier> {
        &mut self.composition
    }

    pub fn dispose(&mut self) {
        self.composition.dispose();
    }
}

impl Default for HtmlComposition {
    fn default() -> Self {
        Self::new()
    }
}

/// Composes `content` once on the blocking pool and returns its tree.
///
/// The caller's render session, if any, is current on the blocking thread.
pub async fn compose_view<F>(content: F) -> Result<ViewNode, RenderError>
where
    F: Fn() + Send + 'static,
{
    spawn_blocking_in_session(move || {
        let mut composition = HtmlComposition::new();
        composition.render(content)?;
        composition.tree()?.ok_or(RenderError::EmptyTree)
    })
    .await?
}

/// Composes `content` and renders it with hydration in one go.
pub async fn render_document<F>(
    content: F,
    renderer: HtmlRenderer,
    registry: Arc<CallbackRegistry>,
    state: HydrationState,
) -> Result<HydratedDocument, RenderError>
where
    F: Fn() + Send + 'static,
{
    let tree = compose_view(content).await?;
    renderer
        .render_with_hydration_async(Arc::new(tree), registry, state)
        .await
}

#[cfg(test)]
#[path = "tests/composition_tests.rs"]
mod tests;
