//! Minimal element producers used inside a composition.
//!
//! Each call site gets its own group (keyed by the caller's location), and
//! element content runs in a content group of its own so that a state read
//! inside it recomposes only that element's children.
#![allow(non_snake_case)]

use std::rc::Rc;

use trellis_core::{caller_key, with_current_composer, Composer, Key, NodeId};

use crate::node::{Attributes, ClickHandler, HtmlNode};

const CONTENT_KEY: Key = 0x636f_6e74_656e_7400;

fn emit_element(
    composer: &Composer,
    tag: &str,
    attrs: Attributes,
    on_click: Option<ClickHandler>,
) -> NodeId {
    let id = composer.emit_node(|| HtmlNode::element(tag));
    if let Err(err) = composer.with_node_mut(id, |node: &mut HtmlNode| {
        node.set_element(tag, attrs, on_click);
    }) {
        log::warn!("element <{tag}> not updated: {err}");
    }
    id
}

fn children_of(composer: &Composer, parent: NodeId, content: Rc<dyn Fn()>) {
    composer.push_parent(parent);
    composer.with_content_group(CONTENT_KEY, content);
    composer.pop_parent();
}

/// An element whose children are produced by `content`.
#[track_caller]
pub fn Element(tag: &str, attrs: Attributes, content: impl Fn() + 'static) -> NodeId {
    let key = caller_key();
    let content: Rc<dyn Fn()> = Rc::new(content);
    with_current_composer(|composer| {
        composer.with_group(key, |composer| {
            let id = emit_element(composer, tag, attrs, None);
            children_of(composer, id, content);
            id
        })
    })
}

#[track_caller]
pub fn Text(content: impl Into<String>) -> NodeId {
    let key = caller_key();
    let content = content.into();
    with_current_composer(|composer| {
        composer.with_group(key, |composer| {
            let id = composer.emit_node(|| HtmlNode::text(content.as_str()));
            if let Err(err) = composer.with_node_mut(id, |node: &mut HtmlNode| {
                node.set_text(content);
            }) {
                log::warn!("text node not updated: {err}");
            }
            id
        })
    })
}

/// A `<button>` with a text label. `on_click` runs on the server when the
/// client posts back its callback id, so it must be `Send + Sync`.
#[track_caller]
pub fn Button(
    attrs: Attributes,
    label: impl Into<String>,
    on_click: impl Fn() + Send + Sync + 'static,
) -> NodeId {
    let key = caller_key();
    let label = label.into();
    with_current_composer(|composer| {
        composer.with_group(key, |composer| {
            let id = emit_element(composer, "button", attrs, Some(ClickHandler::new(on_click)));
            children_of(composer, id, Rc::new(move || {
                Text(label.clone());
            }));
            id
        })
    })
}

#[cfg(test)]
#[path = "tests/primitives_tests.rs"]
mod tests;
