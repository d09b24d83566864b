//! Debug listing of a store's contents

use crate::types::{BrokerError, Result};
use objwire::Value;
use std::collections::BTreeMap;

/// One live object
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectInfo {
    pub object_id: String,
    pub type_id: String,
    /// `None` for objects kept alive only by the residency table
    pub refcount: Option<i64>,
    pub resident: bool,
    pub description: String,
}

/// Every live object in a store, sorted by id
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreSnapshot {
    pub address: String,
    pub objects: Vec<ObjectInfo>,
}

impl StoreSnapshot {
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, object_id: &str) -> Option<&ObjectInfo> {
        self.objects.iter().find(|info| info.object_id == object_id)
    }

    pub fn refcount(&self, object_id: &str) -> Option<i64> {
        self.get(object_id).and_then(|info| info.refcount)
    }

    pub fn of_type<'a>(&'a self, type_id: &'a str) -> impl Iterator<Item = &'a ObjectInfo> + 'a {
        self.objects.iter().filter(move |info| info.type_id == type_id)
    }

    pub fn to_value(&self) -> Value {
        let objects = self
            .objects
            .iter()
            .map(|info| {
                let mut map = BTreeMap::new();
                map.insert("id".to_string(), Value::from(info.object_id.as_str()));
                map.insert("type_id".to_string(), Value::from(info.type_id.as_str()));
                map.insert(
                    "refcount".to_string(),
                    info.refcount.map(Value::Int).unwrap_or(Value::None),
                );
                map.insert("resident".to_string(), Value::Bool(info.resident));
                map.insert("description".to_string(), Value::from(info.description.as_str()));
                Value::Map(map)
            })
            .collect();

        let mut map = BTreeMap::new();
        map.insert("address".to_string(), Value::from(self.address.as_str()));
        map.insert("objects".to_string(), Value::List(objects));
        Value::Map(map)
    }

    pub fn from_value(value: &Value) -> Result<Self> {
        let map = value.as_map().ok_or_else(|| malformed("snapshot is not a map"))?;
        let address = text(map, "address")?;
        let listed = map
            .get("objects")
            .and_then(Value::as_list)
            .ok_or_else(|| malformed("snapshot has no object list"))?;

        let mut objects = Vec::with_capacity(listed.len());
        for item in listed {
            let fields = item.as_map().ok_or_else(|| malformed("object entry is not a map"))?;
            let refcount = match fields.get("refcount") {
                Some(Value::Int(n)) => Some(*n),
                Some(Value::None) | None => None,
                Some(other) => return Err(malformed(&format!("bad refcount {other:?}"))),
            };
            objects.push(ObjectInfo {
                object_id: text(fields, "id")?,
                type_id: text(fields, "type_id")?,
                refcount,
                resident: matches!(fields.get("resident"), Some(Value::Bool(true))),
                description: text(fields, "description")?,
            });
        }
        Ok(Self { address, objects })
    }
}

fn text(map: &BTreeMap<String, Value>, key: &str) -> Result<String> {
    map.get(key)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| malformed(&format!("missing '{key}'")))
}

fn malformed(what: &str) -> BrokerError {
    BrokerError::UnexpectedResponse(format!("introspection reply: {what}"))
}
