//! HTML serialization, with and without hydration markers.
//!
//! Both modes share one explicit-stack walker. In hydration mode every
//! element gets a `data-hid` attribute and every interactive element gets its
//! click handler registered in the current render session, with the id
//! written as `data-onclick-id`. The ids end up in the payload in document
//! order, so the payload's `callbacks` and the markup always agree.

use std::convert::Infallible;
use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use trellis_core::ComposeError;

use crate::hydration_id::{ElementPath, HydrationIdAssigner, PathSegment};
use crate::node::ClickHandler;
use crate::registry::{CallbackRegistry, CallbackSet, RegistryError};
use crate::view::{ElementView, ViewNode};

pub const HYDRATION_SCRIPT_ID: &str = "__trellis_hydration";

/// Elements yielded between cooperative yields in the async renderer.
pub const DEFAULT_YIELD_EVERY: usize = 64;

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Error)]
pub enum RenderError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error("failed to serialize hydration payload: {0}")]
    Payload(#[from] serde_json::Error),
    #[error("composition failed: {0}")]
    Compose(#[from] ComposeError),
    #[error("render task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
    #[error("composition produced no root element")]
    EmptyTree,
}

/// Serialized HTML.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Markup(String);

impl Markup {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Markup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<Markup> for String {
    fn from(markup: Markup) -> Self {
        markup.0
    }
}

/// Named values handed to the client alongside the markup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HydrationState {
    values: Map<String, Value>,
}

impl HydrationState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<T: Serialize + ?Sized>(
        &mut self,
        key: impl Into<String>,
        value: &T,
    ) -> Result<(), RenderError> {
        self.values.insert(key.into(), serde_json::to_value(value)?);
        Ok(())
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HydrationPayload {
    pub state: Map<String, Value>,
    pub callbacks: Vec<String>,
}

/// Result of a hydration render: markup, payload and the session's
/// callbacks, which the caller either retains in the registry or drops.
#[derive(Debug)]
pub struct HydratedDocument {
    markup: Markup,
    payload: HydrationPayload,
    script: String,
    callbacks: CallbackSet,
}

impl HydratedDocument {
    fn assemble(
        markup: String,
        state: HydrationState,
        callbacks: CallbackSet,
    ) -> Result<Self, RenderError> {
        let payload = HydrationPayload {
            state: state.values,
            callbacks: callbacks.ids().to_vec(),
        };
        let json = serde_json::to_string(&payload)?.replace('<', "\\u003c");
        let script =
            format!(r#"<script type="application/json" id="{HYDRATION_SCRIPT_ID}">{json}</script>"#);
        Ok(Self {
            markup: Markup(markup),
            payload,
            script,
            callbacks,
        })
    }

    pub fn markup(&self) -> &Markup {
        &self.markup
    }

    pub fn payload(&self) -> &HydrationPayload {
        &self.payload
    }

    /// The `<script>` element carrying the payload.
    pub fn script(&self) -> &str {
        &self.script
    }

    /// Markup followed by the payload script.
    pub fn html(&self) -> String {
        let mut html = String::with_capacity(self.markup.0.len() + self.script.len());
        html.push_str(&self.markup.0);
        html.push_str(&self.script);
        html
    }

    pub fn callbacks(&self) -> &CallbackSet {
        &self.callbacks
    }

    pub fn take_callbacks(&mut self) -> CallbackSet {
        std::mem::take(&mut self.callbacks)
    }
}

/// Where the walker sends click handlers.
trait CallbackSink {
    type Error;

    fn hydrating(&self) -> bool;

    fn register(&mut self, handler: &ClickHandler) -> Result<Option<String>, Self::Error>;
}

struct PlainSink;

impl CallbackSink for PlainSink {
    type Error = Infallible;

    fn hydrating(&self) -> bool {
        false
    }

    fn register(&mut self, _handler: &ClickHandler) -> Result<Option<String>, Infallible> {
        Ok(None)
    }
}

/// Registers handlers in whichever session is current.
struct SessionSink<'a> {
    registry: &'a CallbackRegistry,
}

impl CallbackSink for SessionSink<'_> {
    type Error = RegistryError;

    fn hydrating(&self) -> bool {
        true
    }

    fn register(&mut self, handler: &ClickHandler) -> Result<Option<String>, RegistryError> {
        let handler = handler.clone();
        self.registry
            .register_callback(move || handler.invoke())
            .map(Some)
    }
}

enum Work<'a> {
    Enter(&'a ViewNode),
    Leave(&'a str),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Progress {
    Element,
    Other,
    Done,
}

struct Walker<'a, S> {
    out: String,
    stack: Vec<Work<'a>>,
    path: ElementPath,
    /// Element children seen so far at each open depth, root level first.
    counters: Vec<usize>,
    assigner: HydrationIdAssigner,
    sink: S,
}

impl<'a, S: CallbackSink> Walker<'a, S> {
    fn new(root: &'a ViewNode, sink: S) -> Self {
        Self {
            out: String::with_capacity(256),
            stack: vec![Work::Enter(root)],
            path: ElementPath::new(),
            counters: vec![0],
            assigner: HydrationIdAssigner::new(),
            sink,
        }
    }

    fn step(&mut self) -> Result<Progress, S::Error> {
        let Some(work) = self.stack.pop() else {
            return Ok(Progress::Done);
        };
        match work {
            Work::Enter(ViewNode::Text(content)) => {
                escape_text(&mut self.out, content);
                Ok(Progress::Other)
            }
            Work::Enter(ViewNode::Element(element)) => {
                self.open(element)?;
                Ok(Progress::Element)
            }
            Work::Leave(tag) => {
                self.out.push_str("</");
                self.out.push_str(tag);
                self.out.push('>');
                self.path.pop();
                self.counters.pop();
                Ok(Progress::Other)
            }
        }
    }

    fn open(&mut self, element: &'a ElementView) -> Result<(), S::Error> {
        let index = match self.counters.last_mut() {
            Some(count) => {
                *count += 1;
                *count
            }
            None => 1,
        };
        self.path.push(PathSegment::new(element.tag.as_str(), index));

        let explicit = element.attrs.explicit_id();
        self.out.push('<');
        self.out.push_str(&element.tag);
        if let Some(id) = explicit {
            push_attr(&mut self.out, "id", id);
        }
        for (name, value) in element.attrs.iter() {
            push_attr(&mut self.out, name, value);
        }
        if self.sink.hydrating() {
            let hid = self.assigner.assign_id(&self.path, explicit);
            push_attr(&mut self.out, "data-hid", &hid);
        }
        if let Some(handler) = &element.on_click {
            if let Some(id) = self.sink.register(handler)? {
                push_attr(&mut self.out, "data-onclick-id", &id);
            }
        }
        self.out.push('>');

        if VOID_ELEMENTS.contains(&element.tag.as_str()) {
            if !element.children.is_empty() {
                log::debug!("children of void element <{}> ignored", element.tag);
            }
            self.path.pop();
            return Ok(());
        }
        self.counters.push(0);
        self.stack.push(Work::Leave(&element.tag));
        self.stack
            .extend(element.children.iter().rev().map(Work::Enter));
        Ok(())
    }

    fn run(mut self) -> Result<String, S::Error> {
        while self.step()? != Progress::Done {}
        Ok(self.out)
    }
}

fn push_attr(out: &mut String, name: &str, value: &str) {
    out.push(' ');
    out.push_str(name);
    out.push_str("=\"");
    escape_attr(out, value);
    out.push('"');
}

fn escape_text(out: &mut String, text: &str) {
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
}

fn escape_attr(out: &mut String, value: &str) {
    for ch in value.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
}

/// Serializes [`ViewNode`] trees.
#[derive(Debug, Clone, Copy)]
pub struct HtmlRenderer {
    yield_every: usize,
}

impl Default for HtmlRenderer {
    fn default() -> Self {
        Self {
            yield_every: DEFAULT_YIELD_EVERY,
        }
    }
}

impl HtmlRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    /// How many elements the async renderer writes before yielding to the
    /// scheduler. Zero never yields.
    pub fn with_yield_every(mut self, yield_every: usize) -> Self {
        self.yield_every = yield_every;
        self
    }

    pub fn yield_every(&self) -> usize {
        self.yield_every
    }

    /// Plain markup: no hydration ids, click handlers dropped.
    pub fn render(&self, tree: &ViewNode) -> Markup {
        match Walker::new(tree, PlainSink).run() {
            Ok(out) => Markup(out),
            Err(never) => match never {},
        }
    }

    /// Renders `tree` in a fresh render session on this thread.
    ///
    /// The session is closed before this returns, on success and on error,
    /// so the registry holds nothing for it afterwards. The registered
    /// callbacks travel in the returned document.
    pub fn render_with_hydration(
        &self,
        tree: &ViewNode,
        registry: &Arc<CallbackRegistry>,
        state: HydrationState,
    ) -> Result<HydratedDocument, RenderError> {
        let session = registry.begin_render();
        let markup = session.enter(|| Walker::new(tree, SessionSink { registry }).run())?;
        let callbacks = session.finish();
        HydratedDocument::assemble(markup, state, callbacks)
    }

    /// Async form of [`render_with_hydration`](Self::render_with_hydration).
    ///
    /// The session follows the render future across `.await` points, so the
    /// walk may resume on any worker thread. Dropping the future before it
    /// completes discards the session and its callbacks.
    pub async fn render_with_hydration_async(
        &self,
        tree: Arc<ViewNode>,
        registry: Arc<CallbackRegistry>,
        state: HydrationState,
    ) -> Result<HydratedDocument, RenderError> {
        let session = registry.begin_render();
        let yield_every = self.yield_every;
        let markup = session
            .scope(async {
                let mut walker = Walker::new(
                    &tree,
                    SessionSink {
                        registry: &registry,
                    },
                );
                let mut since_yield = 0usize;
                loop {
                    match walker.step()? {
                        Progress::Done => break,
                        Progress::Element => {
                            since_yield += 1;
                            if yield_every > 0 && since_yield >= yield_every {
                                since_yield = 0;
                                tokio::task::yield_now().await;
                            }
                        }
                        Progress::Other => {}
                    }
                }
                Ok::<_, RegistryError>(walker.out)
            })
            .await?;
        let callbacks = session.finish();
        HydratedDocument::assemble(markup, state, callbacks)
    }
}

#[cfg(test)]
#[path = "tests/renderer_tests.rs"]
mod tests;
