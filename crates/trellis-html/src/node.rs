use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use trellis_core::{Node, NodeId};

/// Click handler carried by interactive elements. Handlers outlive the
/// composition that produced them (they run when the client posts back), so
/// they must be shareable across threads.
#[derive(Clone)]
pub struct ClickHandler(Arc<dyn Fn() + Send + Sync + 'static>);

impl ClickHandler {
    pub fn new(handler: impl Fn() + Send + Sync + 'static) -> Self {
        Self(Arc::new(handler))
    }

    pub fn invoke(&self) {
        (self.0)()
    }

    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ClickHandler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ClickHandler(..)")
    }
}

/// Element attributes in insertion order, plus the optional explicit id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Attributes {
    id: Option<String>,
    entries: IndexMap<String, String>,
}

impl Attributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit element id. Emitted as `id="..."` and used verbatim as the
    /// hydration id.
    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets an attribute. Names that could end the tag or start another
    /// attribute (empty, whitespace, quotes, `<`, `>`, `/`, `=`) are dropped.
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        if !is_valid_attr_name(&name) {
            log::warn!("dropping attribute with invalid name {name:?}");
            return self;
        }
        if name.eq_ignore_ascii_case("id") {
            self.id = Some(value.into());
        } else {
            self.entries.insert(name, value.into());
        }
        self
    }

    pub fn explicit_id(&self) -> Option<&str> {
        self.id.as_deref()
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.id.is_none() && self.entries.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum HtmlNodeKind {
    Element {
        tag: String,
        attrs: Attributes,
        on_click: Option<ClickHandler>,
    },
    Text(String),
}

/// Node stored in the composition's applier.
#[derive(Debug, Clone)]
pub struct HtmlNode {
    pub kind: HtmlNodeKind,
    id: Option<NodeId>,
    children: Vec<NodeId>,
    parent: Option<NodeId>,
}

impl HtmlNode {
    pub fn element(tag: &str) -> Self {
        Self::from_kind(HtmlNodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs: Attributes::default(),
            on_click: None,
        })
    }

    pub fn text(content: impl Into<String>) -> Self {
        Self::from_kind(HtmlNodeKind::Text(content.into()))
    }

    fn from_kind(kind: HtmlNodeKind) -> Self {
        Self {
            kind,
            id: None,
            children: Vec::new(),
            parent: None,
        }
    }

    /// Overwrites the element's description; a text node becomes an element.
    pub fn set_element(&mut self, tag: &str, attrs: Attributes, on_click: Option<ClickHandler>) {
        self.kind = HtmlNodeKind::Element {
            tag: tag.to_ascii_lowercase(),
            attrs,
            on_click,
        };
    }

    pub fn set_text(&mut self, content: impl Into<String>) {
        self.kind = HtmlNodeKind::Text(content.into());
    }

    pub fn node_id(&self) -> Option<NodeId> {
        self.id
    }

    pub fn tag(&self) -> Option<&str> {
        match &self.kind {
            HtmlNodeKind::Element { tag, .. } => Some(tag),
            HtmlNodeKind::Text(_) => None,
        }
    }
}

impl Node for HtmlNode {
    fn set_node_id(&mut self, id: NodeId) {
        self.id = Some(id);
    }

    fn update_children(&mut self, children: &[NodeId]) {
        self.children = children.to_vec();
    }

    fn children(&self) -> Vec<NodeId> {
        self.children.clone()
    }

    fn on_attached_to_parent(&mut self, parent: NodeId) {
        self.parent = Some(parent);
    }

    fn on_removed_from_parent(&mut self) {
        self.parent = None;
    }

    fn parent(&self) -> Option<NodeId> {
        self.parent
    }
}

fn is_valid_attr_name(name: &str) -> bool {
    !name.is_empty()
        && !name.chars().any(|ch| {
            ch.is_whitespace()
                || ch.is_control()
                || matches!(ch, '"' | '\'' | '<' | '>' | '/' | '=')
        })
}
