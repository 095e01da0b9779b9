//! Deterministic element ids derived from tree position.

use std::fmt::Write as _;

use smallvec::SmallVec;

/// One step from the root towards an element: its tag and its 1-based
/// position among its element siblings.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PathSegment {
    pub tag: String,
    pub sibling_index: usize,
}

impl PathSegment {
    pub fn new(tag: impl Into<String>, sibling_index: usize) -> Self {
        Self {
            tag: tag.into(),
            sibling_index,
        }
    }
}

/// Root-to-node path built up while walking a tree.
pub type ElementPath = SmallVec<[PathSegment; 8]>;

/// Computes hydration ids.
///
/// The id of an element depends only on the tags and sibling positions on
/// its path, so the same tree shape always yields the same ids and a client
/// can rebuild them without talking to the server.
#[derive(Debug, Clone, Copy, Default)]
pub struct HydrationIdAssigner;

impl HydrationIdAssigner {
    pub fn new() -> Self {
        Self
    }

    /// `explicit` wins verbatim; duplicates are the caller's problem.
    /// Otherwise the path is joined as `tag-index-tag-index..`, for example
    /// `div-1-div-1-span-1`.
    pub fn assign_id(&self, path: &[PathSegment], explicit: Option<&str>) -> String {
        if let Some(id) = explicit {
            return id.to_string();
        }
        let mut id = String::with_capacity(path.len() * 8);
        for (depth, segment) in path.iter().enumerate() {
            if depth > 0 {
                id.push('-');
            }
            for ch in segment.tag.chars() {
                id.push(ch.to_ascii_lowercase());
            }
            let _ = write!(id, "-{}", segment.sibling_index);
        }
        id
    }
}

#[cfg(test)]
#[path = "tests/hydration_id_tests.rs"]
mod tests;
