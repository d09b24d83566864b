//! Object, reference count and residency tables
//!
//! All three live behind the store's single mutex. Removal hands the entry
//! back to the caller so the object is dropped after the lock is released.

use crate::object::SharedRef;
use crate::types::{BrokerError, Result};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::{debug, error};

/// Entry in the object table
#[derive(Clone)]
pub(crate) struct ObjectEntry {
    pub type_id: String,
    pub object: SharedRef,
    pub exposed: Arc<[String]>,
    pub redirect: Arc<BTreeMap<String, String>>,
}

impl ObjectEntry {
    pub fn exposes(&self, method: &str) -> bool {
        self.exposed.iter().any(|m| m == method)
    }
}

/// The store's tables
#[derive(Default)]
pub(crate) struct StoreTables {
    objects: HashMap<String, ObjectEntry>,
    refcounts: HashMap<String, i64>,
    resident: HashMap<String, ObjectEntry>,
}

impl StoreTables {
    /// Record an object and take one reference on behalf of the creator
    ///
    /// A count that already exists is kept: the object may be a cached
    /// instance some handle already refers to.
    pub fn insert_and_incref(&mut self, object_id: &str, entry: ObjectEntry) -> i64 {
        self.objects.insert(object_id.to_string(), entry);
        let count = self.refcounts.entry(object_id.to_string()).or_insert(0);
        *count += 1;
        *count
    }

    pub fn incref(&mut self, object_id: &str) -> Result<i64> {
        if let Some(count) = self.refcounts.get_mut(object_id) {
            *count += 1;
            return Ok(*count);
        }
        // Only internal handles referred to it so far; track it again.
        if let Some(entry) = self.resident.get(object_id) {
            self.objects.insert(object_id.to_string(), entry.clone());
            self.refcounts.insert(object_id.to_string(), 1);
            debug!(object_id, "re-enabled tracking of resident object");
            return Ok(1);
        }
        Err(BrokerError::UnknownObject(object_id.to_string()))
    }

    /// Drop one reference
    ///
    /// Returns the removed entry when the count reaches zero. Resident
    /// objects that are not counted are left alone.
    pub fn decref(&mut self, object_id: &str) -> Result<Option<ObjectEntry>> {
        let Some(count) = self.refcounts.get_mut(object_id) else {
            if self.resident.contains_key(object_id) {
                debug!(object_id, "skipping decref of resident object");
                return Ok(None);
            }
            error!(object_id, "decref of untracked object, broker-level data corruption");
            return Err(BrokerError::Consistency(format!(
                "object {object_id} has no reference count"
            )));
        };

        if *count <= 0 {
            error!(object_id, count = *count, "refcount below 1, broker-level data corruption");
            return Err(BrokerError::Consistency(format!(
                "object {object_id} has refcount {count}, not 1+"
            )));
        }

        *count -= 1;
        if *count > 0 {
            return Ok(None);
        }
        self.refcounts.remove(object_id);
        Ok(self.objects.remove(object_id))
    }

    /// Look up an object, falling back to the residency table
    pub fn get(&self, object_id: &str) -> Option<ObjectEntry> {
        self.objects
            .get(object_id)
            .or_else(|| self.resident.get(object_id))
            .cloned()
    }

    /// Snapshot an object into the residency table if it is not there yet
    pub fn pin(&mut self, object_id: &str) -> Result<()> {
        if self.resident.contains_key(object_id) {
            return Ok(());
        }
        let entry = self
            .objects
            .get(object_id)
            .cloned()
            .ok_or_else(|| BrokerError::UnknownObject(object_id.to_string()))?;
        self.resident.insert(object_id.to_string(), entry);
        Ok(())
    }

    /// Remove a residency entry; returns it when nothing else tracks the object
    pub fn unpin(&mut self, object_id: &str) -> Option<ObjectEntry> {
        let entry = self.resident.remove(object_id)?;
        if self.refcounts.contains_key(object_id) {
            None
        } else {
            Some(entry)
        }
    }

    pub fn refcount(&self, object_id: &str) -> Option<i64> {
        self.refcounts.get(object_id).copied()
    }

    pub fn is_resident(&self, object_id: &str) -> bool {
        self.resident.contains_key(object_id)
    }

    /// Number of reference-counted objects
    pub fn counted(&self) -> usize {
        self.refcounts.len()
    }

    /// Every live object id with its entry, count and residency
    pub fn entries(&self) -> Vec<(String, ObjectEntry, Option<i64>, bool)> {
        let mut out: Vec<_> = self
            .objects
            .iter()
            .map(|(id, entry)| {
                (
                    id.clone(),
                    entry.clone(),
                    self.refcounts.get(id).copied(),
                    self.resident.contains_key(id),
                )
            })
            .collect();
        out.extend(
            self.resident
                .iter()
                .filter(|(id, _)| !self.objects.contains_key(*id))
                .map(|(id, entry)| (id.clone(), entry.clone(), None, true)),
        );
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }
}
