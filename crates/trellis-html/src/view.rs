//! Owned, thread-safe snapshot of a composed HTML tree.
//!
//! The renderer works on [`ViewNode`] rather than on the applier so a tree
//! can be composed on one thread and rendered on another, or built directly
//! without a composition.

use trellis_core::{MemoryApplier, Node, NodeError, NodeId};

use crate::node::{Attributes, ClickHandler, HtmlNode, HtmlNodeKind};

#[derive(Debug, Clone)]
pub enum ViewNode {
    Element(ElementView),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct ElementView {
    pub tag: String,
    pub attrs: Attributes,
    pub on_click: Option<ClickHandler>,
    pub children: Vec<ViewNode>,
}

impl ViewNode {
    pub fn element(tag: &str) -> ElementView {
        ElementView {
            tag: tag.to_ascii_lowercase(),
            attrs: Attributes::default(),
            on_click: None,
            children: Vec::new(),
        }
    }

    pub fn text(content: impl Into<String>) -> Self {
        ViewNode::Text(content.into())
    }

    /// Copies the subtree rooted at `root` out of the applier.
    pub fn from_applier(applier: &MemoryApplier, root: NodeId) -> Result<Self, NodeError> {
        let node = applier.node_ref::<HtmlNode>(root)?;
        match &node.kind {
            HtmlNodeKind::Text(content) => Ok(ViewNode::Text(content.clone())),
            HtmlNodeKind::Element {
                tag,
                attrs,
                on_click,
            } => {
                let children = node
                    .children()
                    .into_iter()
                    .map(|child| ViewNode::from_applier(applier, child))
                    .collect::<Result<Vec<_>, _>>()?;
                Ok(ViewNode::Element(ElementView {
                    tag: tag.clone(),
                    attrs: attrs.clone(),
                    on_click: on_click.clone(),
                    children,
                }))
            }
        }
    }

    pub fn as_element(&self) -> Option<&ElementView> {
        match self {
            ViewNode::Element(element) => Some(element),
            ViewNode::Text(_) => None,
        }
    }

    /// Number of element nodes in the subtree, this one included.
    pub fn element_count(&self) -> usize {
        match self {
            ViewNode::Text(_) => 0,
            ViewNode::Element(element) => {
                1 + element
                    .children
                    .iter()
                    .map(ViewNode::element_count)
                    .sum::<usize>()
            }
        }
    }

    /// Concatenated text content of the subtree.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        self.collect_text(&mut out);
        out
    }

    fn collect_text(&self, out: &mut String) {
        match self {
            ViewNode::Text(content) => out.push_str(content),
            ViewNode::Element(element) => {
                for child in &element.children {
                    child.collect_text(out);
                }
            }
        }
    }
}

impl ElementView {
    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs = self.attrs.attr(name, value);
        self
    }

    pub fn id(mut self, id: impl Into<String>) -> Self {
        self.attrs = self.attrs.id(id);
        self
    }

    pub fn on_click(mut self, handler: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_click = Some(ClickHandler::new(handler));
        self
    }

    pub fn child(mut self, child: impl Into<ViewNode>) -> Self {
        self.children.push(child.into());
        self
    }

    pub fn children<I>(mut self, children: I) -> Self
    where
        I: IntoIterator,
        I::Item: Into<ViewNode>,
    {
        self.children.extend(children.into_iter().map(Into::into));
        self
    }

    pub fn is_interactive(&self) -> bool {
        self.on_click.is_some()
    }
}

impl From<ElementView> for ViewNode {
    fn from(element: ElementView) -> Self {
        ViewNode::Element(element)
    }
}

impl From<&str> for ViewNode {
    fn from(text: &str) -> Self {
        ViewNode::Text(text.to_string())
    }
}

impl From<String> for ViewNode {
    fn from(text: String) -> Self {
        ViewNode::Text(text)
    }
}
