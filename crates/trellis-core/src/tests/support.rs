use std::rc::Rc;

use crate::{caller_key, with_current_composer, Key, MemoryApplier, Node, NodeId};

pub(crate) const CONTENT_KEY: Key = 0x636f_6e74_656e_74;

#[derive(Debug, Default)]
pub(crate) struct TestNode {
    pub(crate) label: &'static str,
    pub(crate) children: Vec<NodeId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) updates: usize,
}

impl Node for TestNode {
    fn update(&mut self) {
        self.updates += 1;
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

/// Emits a [`TestNode`] whose children come from a recomposable content group.
#[track_caller]
pub(crate) fn element(label: &'static str, content: impl Fn() + 'static) -> NodeId {
    let key = caller_key();
    let content: Rc<dyn Fn()> = Rc::new(content);
    with_current_composer(|composer| {
        composer.with_group(key, |composer| {
            let id = composer.emit_node(|| TestNode {
                label,
                ..TestNode::default()
            });
            composer.push_parent(id);
            composer.with_content_group(CONTENT_KEY, Rc::clone(&content));
            composer.pop_parent();
            id
        })
    })
}

pub(crate) fn labels(applier: &MemoryApplier, ids: &[NodeId]) -> Vec<&'static str> {
    ids.iter()
        .filter_map(|id| applier.node_ref::<TestNode>(*id).ok().map(|node| node.label))
        .collect()
}

pub(crate) fn children_of(applier: &MemoryApplier, id: NodeId) -> Vec<NodeId> {
    applier
        .node_ref::<TestNode>(id)
        .map(|node| node.children.clone())
        .unwrap_or_default()
}
