//! Bus wire records and the codec between them and the domain model.
//!
//! An item travels as `(ssssua{sv})`, an account descriptor as
//! `(soxssss)`. The item type tag is a fixed `u32` (root=0, folder=1,
//! file=2) so every client decodes the same numbering.

use std::cmp::Ordering;
use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use zbus::zvariant::{ObjectPath, OwnedObjectPath, OwnedValue, Type, Value};

use crate::item::{Item, ItemType, MetadataValue};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("unknown item type tag: {0}")]
    UnknownItemType(u32),
    #[error("unsupported metadata value for key {0}")]
    UnsupportedValue(String),
    #[error("value encoding failed: {0}")]
    Value(#[from] zbus::zvariant::Error),
}

/// An item as it crosses the bus.
#[derive(Debug, Serialize, Deserialize, Type)]
pub struct ItemRecord {
    pub item_id: String,
    pub parent_id: String,
    pub title: String,
    pub etag: String,
    pub item_type: u32,
    pub metadata: HashMap<String, OwnedValue>,
}

impl ItemRecord {
    pub fn from_item(item: &Item) -> Result<Self, WireError> {
        let mut metadata = HashMap::with_capacity(item.metadata.len());
        for (key, value) in &item.metadata {
            metadata.insert(key.clone(), encode_value(value)?);
        }
        Ok(Self {
            item_id: item.item_id.clone(),
            parent_id: item.parent_id.clone(),
            title: item.title.clone(),
            etag: item.etag.clone(),
            item_type: item.item_type.to_tag(),
            metadata,
        })
    }

    pub fn into_item(self) -> Result<Item, WireError> {
        let item_type =
            ItemType::from_tag(self.item_type).ok_or(WireError::UnknownItemType(self.item_type))?;
        let mut metadata = HashMap::with_capacity(self.metadata.len());
        for (key, value) in &self.metadata {
            metadata.insert(key.clone(), decode_value(key, value)?);
        }
        Ok(Item {
            item_id: self.item_id,
            parent_id: self.parent_id,
            title: self.title,
            etag: self.etag,
            item_type,
            metadata,
        })
    }
}

fn encode_value(value: &MetadataValue) -> Result<OwnedValue, WireError> {
    let value = match value {
        MetadataValue::String(s) => Value::from(s.as_str()),
        MetadataValue::Int64(i) => Value::from(*i),
        MetadataValue::Bool(b) => Value::from(*b),
        MetadataValue::Bytes(b) => Value::from(b.clone()),
    };
    Ok(value.try_to_owned()?)
}

fn decode_value(key: &str, value: &OwnedValue) -> Result<MetadataValue, WireError> {
    match &**value {
        Value::Str(s) => Ok(MetadataValue::String(s.as_str().to_owned())),
        Value::I64(i) => Ok(MetadataValue::Int64(*i)),
        Value::Bool(b) => Ok(MetadataValue::Bool(*b)),
        Value::Array(array) => {
            let mut bytes = Vec::with_capacity(array.len());
            for element in array.iter() {
                match element {
                    Value::U8(b) => bytes.push(*b),
                    _ => return Err(WireError::UnsupportedValue(key.to_owned())),
                }
            }
            Ok(MetadataValue::Bytes(bytes))
        }
        _ => Err(WireError::UnsupportedValue(key.to_owned())),
    }
}

/// Public descriptor of one provider account, as exchanged with the accounts
/// registry. Bit-compatible with the shape clients decode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Type)]
pub struct AccountRecord {
    /// Well-known bus name of the provider daemon.
    pub provider_id: String,
    pub object_path: OwnedObjectPath,
    pub id: i64,
    pub service_id: String,
    pub display_name: String,
    pub provider_name: String,
    pub icon_name: String,
}

impl AccountRecord {
    /// The deterministic object path for an account id.
    pub fn provider_path(account_id: u64) -> OwnedObjectPath {
        // digits and slashes only, always a valid path
        ObjectPath::from_string_unchecked(format!("/provider/{account_id}")).into()
    }

    fn sort_key(&self) -> (i64, &str, &str, &str, &str, &str, &str) {
        (
            self.id,
            &self.provider_id,
            self.object_path.as_str(),
            &self.service_id,
            &self.display_name,
            &self.provider_name,
            &self.icon_name,
        )
    }
}

impl Ord for AccountRecord {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl PartialOrd for AccountRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_item() -> Item {
        Item::new("file1", "root_id", "notes.txt", "etag-7", ItemType::File)
            .with_metadata("size_in_bytes", MetadataValue::Int64(11))
            .with_metadata("starred", MetadataValue::Bool(true))
            .with_metadata("checksum", MetadataValue::Bytes(vec![0xde, 0xad]))
            .with_metadata(
                "content_type",
                MetadataValue::String("text/plain".to_owned()),
            )
    }

    #[test]
    fn item_survives_the_codec() {
        let item = sample_item();
        let record = ItemRecord::from_item(&item).unwrap();
        assert_eq!(record.item_type, 2);
        let back = record.into_item().unwrap();
        assert_eq!(back, item);
    }

    #[test]
    fn unknown_type_tag_is_rejected() {
        let mut record = ItemRecord::from_item(&sample_item()).unwrap();
        record.item_type = 9;
        assert!(matches!(
            record.into_item(),
            Err(WireError::UnknownItemType(9))
        ));
    }

    #[test]
    fn account_order_is_keyed_on_id_first() {
        let mk = |id: i64, provider: &str| AccountRecord {
            provider_id: provider.to_owned(),
            object_path: AccountRecord::provider_path(id as u64),
            id,
            service_id: "svc".to_owned(),
            display_name: String::new(),
            provider_name: String::new(),
            icon_name: String::new(),
        };
        let mut records = vec![mk(7, "aaa"), mk(2, "zzz"), mk(2, "aaa")];
        records.sort();
        assert_eq!(records[0].provider_id, "aaa");
        assert_eq!(records[0].id, 2);
        assert_eq!(records[2].id, 7);
    }

    #[test]
    fn provider_path_is_deterministic() {
        assert_eq!(AccountRecord::provider_path(0).as_str(), "/provider/0");
        assert_eq!(AccountRecord::provider_path(42).as_str(), "/provider/42");
    }
}
