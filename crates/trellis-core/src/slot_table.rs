//! Arena-backed slot table.
//!
//! Slots live in one growable `Vec`. A group is a header slot followed by `len`
//! descendant slots, so every group is the index range `start..start + 1 + len`.
//! The cursor walks the arena in visit order; open groups are tracked as frames
//! whose `end` moves as slots are inserted or reclaimed underneath them.

use std::any::Any;
use std::fmt;

use crate::{Key, NodeId, ScopeId};

pub enum Slot {
    Group {
        key: Key,
        len: usize,
        scope: Option<ScopeId>,
    },
    Value {
        data: Box<dyn Any>,
        /// Call-site key of the `remember` that created the value, if any.
        tag: Option<Key>,
    },
    Node {
        id: NodeId,
    },
}

impl Slot {
    pub fn kind(&self) -> SlotKind {
        match self {
            Slot::Group { .. } => SlotKind::Group,
            Slot::Value { .. } => SlotKind::Value,
            Slot::Node { .. } => SlotKind::Node,
        }
    }

    fn span(&self) -> usize {
        match self {
            Slot::Group { len, .. } => 1 + len,
            _ => 1,
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Group { key, len, scope } => f
                .debug_struct("Group")
                .field("key", key)
                .field("len", len)
                .field("scope", scope)
                .finish(),
            Slot::Value { .. } => f.write_str("Value"),
            Slot::Node { id } => f.debug_struct("Node").field("id", id).finish(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Group,
    Value,
    Node,
}

/// What sits at the cursor when a value slot is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueProbe {
    /// A value of the requested type; reuse it.
    Matches,
    /// A value of a different type: positional order changed between passes.
    TypeMismatch,
    /// A value of the right type written by a different call site.
    KeyMismatch,
    /// A group or node where a value was expected.
    KindMismatch(SlotKind),
    /// End of the current group or an inserting group; allocate.
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeProbe {
    Existing(NodeId),
    KindMismatch(SlotKind),
    Missing,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartGroup {
    pub index: usize,
    /// True when the group was created in this pass rather than revisited.
    pub inserted: bool,
}

#[derive(Debug, Clone, Copy)]
struct GroupFrame {
    /// Header index, `None` for the implicit root level.
    start: Option<usize>,
    /// Exclusive end of the group's span.
    end: usize,
    inserting: bool,
}

#[derive(Default)]
pub struct SlotTable {
    slots: Vec<Slot>,
    cursor: usize,
    frames: Vec<GroupFrame>,
}

impl SlotTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Starts a pass at the root level.
    pub fn reset(&mut self) {
        self.cursor = 0;
        self.frames.clear();
        self.frames.push(GroupFrame {
            start: None,
            end: self.slots.len(),
            inserting: self.slots.is_empty(),
        });
    }

    pub fn inserting(&self) -> bool {
        self.frames.last().map(|f| f.inserting).unwrap_or(true)
    }

    fn frame(&self) -> GroupFrame {
        self.frames.last().copied().unwrap_or(GroupFrame {
            start: None,
            end: self.slots.len(),
            inserting: true,
        })
    }

    fn revisiting(&self) -> bool {
        let frame = self.frame();
        !frame.inserting && self.cursor < frame.end
    }

    fn insert_at_cursor(&mut self, slot: Slot) {
        self.slots.insert(self.cursor, slot);
        for frame in &mut self.frames {
            frame.end += 1;
        }
    }

    fn remove_range(&mut self, from: usize, to: usize) -> Vec<Slot> {
        if from >= to {
            return Vec::new();
        }
        let removed: Vec<Slot> = self.slots.drain(from..to).collect();
        let count = removed.len();
        for frame in &mut self.frames {
            frame.end -= count;
        }
        removed
    }

    fn find_sibling_group(&self, key: Key) -> Option<usize> {
        let end = self.frame().end;
        let mut index = self.cursor;
        while index < end {
            let slot = &self.slots[index];
            if let Slot::Group { key: found, .. } = slot {
                if *found == key {
                    return Some(index);
                }
            }
            index += slot.span();
        }
        None
    }

    pub fn begin_group(&mut self, key: Key) -> StartGroup {
        let index = self.cursor;
        let mut inserted = true;
        if self.revisiting() {
            if let Some(found) = self.find_sibling_group(key) {
                if found != index {
                    let span = self.slots[found].span();
                    let moved: Vec<Slot> = self.slots.drain(found..found + span).collect();
                    self.slots.splice(index..index, moved);
                }
                inserted = false;
            }
        }
        let len = if inserted {
            self.insert_at_cursor(Slot::Group {
                key,
                len: 0,
                scope: None,
            });
            0
        } else {
            match &self.slots[index] {
                Slot::Group { len, .. } => *len,
                _ => 0,
            }
        };
        self.frames.push(GroupFrame {
            start: Some(index),
            end: index + 1 + len,
            inserting: inserted,
        });
        self.cursor = index + 1;
        StartGroup { index, inserted }
    }

    /// Closes the current group. Children the pass did not revisit are removed
    /// and returned so the caller can dispose of them.
    pub fn end_group(&mut self) -> Vec<Slot> {
        let frame = self.frame();
        let removed = self.remove_range(self.cursor, frame.end);
        self.close_frame();
        removed
    }

    fn close_frame(&mut self) {
        let Some(frame) = self.frames.pop() else {
            return;
        };
        if let Some(start) = frame.start {
            if let Some(Slot::Group { len, .. }) = self.slots.get_mut(start) {
                *len = frame.end - start - 1;
            }
        }
        self.cursor = frame.end;
    }

    /// Keeps every slot of the current group as-is and moves the cursor to its end.
    pub fn skip_current_group(&mut self) {
        self.cursor = self.frame().end;
    }

    /// Nodes recorded anywhere inside the current group from the cursor on.
    pub fn nodes_in_current_group(&self) -> Vec<NodeId> {
        let end = self.frame().end;
        self.slots[self.cursor.min(end)..end]
            .iter()
            .filter_map(|slot| match slot {
                Slot::Node { id } => Some(*id),
                _ => None,
            })
            .collect()
    }

    pub fn set_group_scope(&mut self, index: usize, scope_id: ScopeId) {
        if let Some(Slot::Group { scope, .. }) = self.slots.get_mut(index) {
            *scope = Some(scope_id);
        }
    }

    /// Untagged requests and untagged slots only compare types.
    pub fn probe_value<T: 'static>(&self, tag: Option<Key>) -> ValueProbe {
        if !self.revisiting() {
            return ValueProbe::Missing;
        }
        match &self.slots[self.cursor] {
            Slot::Value { data, .. } if !data.is::<T>() => ValueProbe::TypeMismatch,
            Slot::Value {
                tag: Some(stored), ..
            } if tag.is_some_and(|requested| requested != *stored) => ValueProbe::KeyMismatch,
            Slot::Value { .. } => ValueProbe::Matches,
            other => ValueProbe::KindMismatch(other.kind()),
        }
    }

    /// Moves past the slot at the cursor after a successful probe.
    pub fn advance(&mut self) -> usize {
        let index = self.cursor;
        self.cursor += 1;
        index
    }

    pub fn insert_value(&mut self, data: Box<dyn Any>, tag: Option<Key>) -> usize {
        let index = self.cursor;
        self.insert_at_cursor(Slot::Value { data, tag });
        self.cursor += 1;
        index
    }

    /// Replaces the slot at the cursor with a value, returning the old slot.
    pub fn replace_value(&mut self, data: Box<dyn Any>, tag: Option<Key>) -> (usize, Slot) {
        let index = self.cursor;
        let old = std::mem::replace(&mut self.slots[index], Slot::Value { data, tag });
        self.cursor += 1;
        (index, old)
    }

    pub fn value<T: 'static>(&self, index: usize) -> Option<&T> {
        match self.slots.get(index)? {
            Slot::Value { data, .. } => data.downcast_ref::<T>(),
            _ => None,
        }
    }

    pub fn value_mut<T: 'static>(&mut self, index: usize) -> Option<&mut T> {
        match self.slots.get_mut(index)? {
            Slot::Value { data, .. } => data.downcast_mut::<T>(),
            _ => None,
        }
    }

    /// Overwrites a value slot in place, returning the previous contents.
    pub fn write_value(&mut self, index: usize, data: Box<dyn Any>) -> Option<Box<dyn Any>> {
        match self.slots.get_mut(index)? {
            Slot::Value { data: current, .. } => Some(std::mem::replace(current, data)),
            _ => None,
        }
    }

    pub fn probe_node(&self) -> NodeProbe {
        if !self.revisiting() {
            return NodeProbe::Missing;
        }
        match &self.slots[self.cursor] {
            Slot::Node { id } => NodeProbe::Existing(*id),
            other => NodeProbe::KindMismatch(other.kind()),
        }
    }

    pub fn insert_node(&mut self, id: NodeId) {
        self.insert_at_cursor(Slot::Node { id });
        self.cursor += 1;
    }

    pub fn replace_node(&mut self, id: NodeId) -> Slot {
        let old = std::mem::replace(&mut self.slots[self.cursor], Slot::Node { id });
        self.cursor += 1;
        old
    }

    fn find_scope_group(&self, scope_id: ScopeId) -> Option<usize> {
        self.slots.iter().position(
            |slot| matches!(slot, Slot::Group { scope: Some(found), .. } if *found == scope_id),
        )
    }

    /// Group headers enclosing `target`, outermost first, ending with `target`.
    fn path_to(&self, target: usize) -> Option<Vec<usize>> {
        let mut path = Vec::new();
        let mut index = 0;
        let mut end = self.slots.len();
        while index < end {
            let span = self.slots[index].span();
            if index == target {
                path.push(index);
                return Some(path);
            }
            if target > index && target < index + span {
                path.push(index);
                end = index + span;
                index += 1;
            } else {
                index += span;
            }
        }
        None
    }

    /// Reopens the group owned by `scope_id` (and its ancestors) so its body can
    /// run again in place. Returns false when the group no longer exists.
    pub fn begin_recompose_at_scope(&mut self, scope_id: ScopeId) -> bool {
        let Some(target) = self.find_scope_group(scope_id) else {
            return false;
        };
        let Some(path) = self.path_to(target) else {
            return false;
        };
        self.frames.clear();
        self.frames.push(GroupFrame {
            start: None,
            end: self.slots.len(),
            inserting: false,
        });
        for header in path {
            let span = self.slots[header].span();
            self.frames.push(GroupFrame {
                start: Some(header),
                end: header + span,
                inserting: false,
            });
        }
        self.cursor = target + 1;
        true
    }

    /// Closes a group reopened by [`begin_recompose_at_scope`]. Ancestors only
    /// get their lengths refreshed; their other children are untouched.
    ///
    /// [`begin_recompose_at_scope`]: SlotTable::begin_recompose_at_scope
    pub fn end_recompose(&mut self) -> Vec<Slot> {
        let removed = self.end_group();
        while self.frames.len() > 1 {
            self.close_frame();
        }
        self.frames.clear();
        removed
    }

    /// Closes the root level of a full pass, returning unvisited root slots.
    pub fn finish_pass(&mut self) -> Vec<Slot> {
        while self.frames.len() > 1 {
            let removed = self.end_group();
            if !removed.is_empty() {
                log::warn!("slot table closed {} unbalanced group(s)", removed.len());
            }
        }
        let end = self.frame().end;
        let removed = self.remove_range(self.cursor, end);
        self.frames.clear();
        removed
    }

    /// Drops all bookkeeping after an aborted pass and hands back every slot.
    pub fn take_all(&mut self) -> Vec<Slot> {
        self.frames.clear();
        self.cursor = 0;
        std::mem::take(&mut self.slots)
    }

    /// `(index, key, scope, len)` for every group, in slot order.
    pub fn debug_dump_groups(&self) -> Vec<(usize, Key, Option<ScopeId>, usize)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| match slot {
                Slot::Group { key, len, scope } => Some((index, *key, *scope, *len)),
                _ => None,
            })
            .collect()
    }

    pub fn debug_dump_all_slots(&self) -> Vec<(usize, String)> {
        self.slots
            .iter()
            .enumerate()
            .map(|(index, slot)| (index, format!("{slot:?}")))
            .collect()
    }
}

#[cfg(test)]
#[path = "tests/slot_table_tests.rs"]
mod tests;
