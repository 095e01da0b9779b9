//! HTML output for Trellis compositions.
//!
//! Composable content emits [`HtmlNode`]s through the [`Element`], [`Text`]
//! and [`Button`] primitives. [`HtmlComposition::tree`] snapshots the result
//! as a [`ViewNode`], and [`HtmlRenderer`] serializes it either as plain
//! markup or with hydration markers: deterministic `data-hid` ids, a
//! `data-onclick-id` per interactive element, and a JSON payload listing the
//! same callback ids.
//!
//! Click handlers are registered in a [`CallbackRegistry`] under the current
//! [`RenderSession`], which travels with the render task rather than with
//! the thread running it.

mod composition;
pub mod hydration_id;
mod node;
mod primitives;
mod registry;
mod renderer;
mod session;
mod view;

pub use composition::{compose_view, render_document, HtmlComposition};
pub use hydration_id::{ElementPath, HydrationIdAssigner, PathSegment};
pub use node::{Attributes, ClickHandler, HtmlNode, HtmlNodeKind};
pub use primitives::{Button, Element, Text};
pub use registry::{CallbackRegistry, CallbackSet, RegistryError};
pub use renderer::{
    HtmlRenderer, HydratedDocument, HydrationPayload, HydrationState, Markup, RenderError,
    DEFAULT_YIELD_EVERY, HYDRATION_SCRIPT_ID,
};
pub use session::{current_session_key, spawn_blocking_in_session, RenderSession, SessionKey};
pub use trellis_macros::composable;
pub use view::{ElementView, ViewNode};
