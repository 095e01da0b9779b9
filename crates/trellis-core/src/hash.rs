//! Key hashing for groups, effects and keyed remember calls.

use std::hash::{Hash, Hasher};

use crate::Key;

#[cfg(feature = "std-hash")]
mod default {
    pub use std::collections::hash_map::DefaultHasher as KeyHasher;

    #[inline]
    pub fn new() -> KeyHasher {
        KeyHasher::new()
    }
}

#[cfg(not(feature = "std-hash"))]
mod default {
    pub use ahash::AHasher as KeyHasher;

    #[inline]
    pub fn new() -> KeyHasher {
        KeyHasher::default()
    }
}

pub use default::KeyHasher;

/// Hashes any `Hash` value into a group key.
pub fn hash_key<K: Hash + ?Sized>(key: &K) -> Key {
    let mut hasher = default::new();
    key.hash(&mut hasher);
    hasher.finish()
}

/// Derives a key from a source location. Used by `#[composable]` and the
/// `#[track_caller]` primitives so that each call site gets its own group.
pub fn location_key(file: &str, line: u32, column: u32) -> Key {
    let mut hasher = default::new();
    file.hash(&mut hasher);
    line.hash(&mut hasher);
    column.hash(&mut hasher);
    hasher.finish()
}

/// Mixes a parent key with a child discriminator (for example a list index).
pub fn combine_keys(parent: Key, child: Key) -> Key {
    parent.rotate_left(5) ^ child.wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Key of the calling source location, followed through `#[track_caller]`
/// frames.
#[track_caller]
pub fn caller_key() -> Key {
    let location = std::panic::Location::caller();
    location_key(location.file(), location.line(), location.column())
}
