use std::collections::BTreeMap;
use std::fmt;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Sentinel written in place of a `dirs`/`files` value to mean "removed
/// relative to the peer". Kept as a literal string on the wire, per the
/// `-` sentinel defined in the data model.
pub const REMOVED: &str = "-";

/// A directory entry: either a removed marker, or a (possibly empty)
/// sub-tree. `BTreeMap` keeps iteration order deterministic, which matters
/// for the pre-order diff walk in the sync orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DirEntry {
    Removed(RemovedMarker),
    Tree(SnapshotTree),
}

/// A file entry: either a removed marker, or a lowercase 32-hex-char MD5
/// content hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FileEntry {
    Removed(RemovedMarker),
    Hash(String),
}

/// Newtype so `"-"` round-trips exactly and isn't confused with a normal
/// hash string or an empty tree during (de)serialization dispatch. Encoded
/// as the literal string `"-"`, never as a unit/null, so the `untagged`
/// enums above can distinguish it from a hash string or a map.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RemovedMarker;

impl Serialize for RemovedMarker {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(REMOVED)
    }
}

impl<'de> Deserialize<'de> for RemovedMarker {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct MarkerVisitor;
        impl<'de> Visitor<'de> for MarkerVisitor {
            type Value = RemovedMarker;
            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                write!(f, "the removed sentinel \"-\"")
            }
            fn visit_str<E: de::Error>(self, v: &str) -> Result<RemovedMarker, E> {
                if v == REMOVED {
                    Ok(RemovedMarker)
                } else {
                    Err(E::custom(format!("expected \"-\", got {v:?}")))
                }
            }
        }
        deserializer.deserialize_str(MarkerVisitor)
    }
}

impl DirEntry {
    pub fn removed() -> Self {
        DirEntry::Removed(RemovedMarker)
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, DirEntry::Removed(_))
    }

    pub fn as_tree(&self) -> Option<&SnapshotTree> {
        match self {
            DirEntry::Tree(t) => Some(t),
            DirEntry::Removed(_) => None,
        }
    }
}

impl FileEntry {
    pub fn removed() -> Self {
        FileEntry::Removed(RemovedMarker)
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, FileEntry::Removed(_))
    }

    pub fn as_hash(&self) -> Option<&str> {
        match self {
            FileEntry::Hash(h) => Some(h.as_str()),
            FileEntry::Removed(_) => None,
        }
    }
}

/// Recursive directory snapshot: `dirs` maps child directory name to a
/// sub-tree (or removed marker); `files` maps file name to content hash
/// (or removed marker). An absent key means "not tracked", distinct from
/// an explicit removed marker.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotTree {
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub dirs: BTreeMap<String, DirEntry>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub files: BTreeMap<String, FileEntry>,
}

impl SnapshotTree {
    pub fn is_empty(&self) -> bool {
        self.dirs.is_empty() && self.files.is_empty()
    }
}
