use std::collections::HashMap;

/// Kind of entry a provider can hand back.
///
/// The numeric wire tag is pinned to a fixed `u32` so every client agrees on
/// the encoding regardless of platform enum widths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ItemType {
    Root,
    Folder,
    File,
}

impl ItemType {
    pub fn to_tag(self) -> u32 {
        match self {
            ItemType::Root => 0,
            ItemType::Folder => 1,
            ItemType::File => 2,
        }
    }

    pub fn from_tag(tag: u32) -> Option<Self> {
        match tag {
            0 => Some(ItemType::Root),
            1 => Some(ItemType::Folder),
            2 => Some(ItemType::File),
            _ => None,
        }
    }
}

/// A typed metadata attribute value.
///
/// The wire format carries these as variants in an `a{sv}` dict; modeling
/// them as an exhaustive enum keeps the provider side honest about what it
/// can serialize.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Int64(i64),
    Bool(bool),
    Bytes(Vec<u8>),
}

/// The atom of the external storage model.
///
/// Invariants: roots have an empty `parent_id`; every child returned by a
/// folder listing carries that folder's `item_id` as its `parent_id`;
/// `item_id` is stable across sessions for a given backend object.
#[derive(Debug, Clone, PartialEq)]
pub struct Item {
    /// Opaque provider-scoped identifier. Non-empty for non-roots.
    pub item_id: String,
    /// Identifier of the containing folder. Empty iff this is a root.
    pub parent_id: String,
    /// Human-visible leaf name.
    pub title: String,
    /// Opaque version tag. May be empty if the backend has no versions.
    pub etag: String,
    pub item_type: ItemType,
    /// Untyped extra attributes, keys unique.
    pub metadata: HashMap<String, MetadataValue>,
}

impl Item {
    pub fn new(
        item_id: impl Into<String>,
        parent_id: impl Into<String>,
        title: impl Into<String>,
        etag: impl Into<String>,
        item_type: ItemType,
    ) -> Self {
        Self {
            item_id: item_id.into(),
            parent_id: parent_id.into(),
            title: title.into(),
            etag: etag.into(),
            item_type,
            metadata: HashMap::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.item_type == ItemType::Root
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: MetadataValue) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}
