//! Type registry
//!
//! Maps a type id to its constructor, exposed methods, result redirects and
//! handle kind. Built before the store starts and shared read-only after.

use crate::object::SharedRef;
use crate::types::{Args, BrokerError, ObjectError, Result};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Handle kind of the generic handle
pub const AUTO_HANDLE_KIND: &str = "auto";

/// Constructor function type
pub type Constructor = Arc<dyn Fn(Args) -> std::result::Result<SharedRef, ObjectError> + Send + Sync>;

/// What to do when a type id is registered twice
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum DuplicatePolicy {
    /// Replace the earlier entry
    #[default]
    Overwrite,
    /// Fail with `DuplicateType`
    Reject,
}

/// Registration record for one type
#[derive(Clone)]
pub struct TypeEntry {
    pub type_id: String,
    pub constructor: Option<Constructor>,
    /// `None` derives the set from the object at creation time
    pub exposed: Option<Vec<String>>,
    /// Method name to the type id its result is created as
    pub redirect: BTreeMap<String, String>,
    pub handle_kind: String,
    pub auto_create: bool,
}

impl TypeEntry {
    pub fn new(type_id: impl Into<String>) -> Self {
        Self {
            type_id: type_id.into(),
            constructor: None,
            exposed: None,
            redirect: BTreeMap::new(),
            handle_kind: AUTO_HANDLE_KIND.to_string(),
            auto_create: true,
        }
    }

    pub fn constructor<F>(mut self, constructor: F) -> Self
    where
        F: Fn(Args) -> std::result::Result<SharedRef, ObjectError> + Send + Sync + 'static,
    {
        self.constructor = Some(Arc::new(constructor));
        self
    }

    pub fn exposed<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.exposed = Some(methods.into_iter().map(Into::into).collect());
        self
    }

    /// Create the result of `method` as a `type_id` object and return a handle
    pub fn redirect(mut self, method: impl Into<String>, type_id: impl Into<String>) -> Self {
        self.redirect.insert(method.into(), type_id.into());
        self
    }

    pub fn handle_kind(mut self, kind: impl Into<String>) -> Self {
        self.handle_kind = kind.into();
        self
    }

    pub fn auto_create(mut self, enabled: bool) -> Self {
        self.auto_create = enabled;
        self
    }
}

impl fmt::Debug for TypeEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TypeEntry")
            .field("type_id", &self.type_id)
            .field("constructor", &self.constructor.is_some())
            .field("exposed", &self.exposed)
            .field("redirect", &self.redirect)
            .field("handle_kind", &self.handle_kind)
            .field("auto_create", &self.auto_create)
            .finish()
    }
}

/// Type id to registration map
#[derive(Debug, Default)]
pub struct Registry {
    entries: HashMap<String, Arc<TypeEntry>>,
    policy: DuplicatePolicy,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            entries: HashMap::new(),
            policy,
        }
    }

    /// Register a type
    pub fn register(&mut self, entry: TypeEntry) -> Result<()> {
        if self.entries.contains_key(&entry.type_id) {
            match self.policy {
                DuplicatePolicy::Reject => return Err(BrokerError::DuplicateType(entry.type_id)),
                DuplicatePolicy::Overwrite => {
                    warn!(type_id = %entry.type_id, "overwriting registered type")
                }
            }
        }
        debug!(
            type_id = %entry.type_id,
            handle_kind = %entry.handle_kind,
            auto_create = entry.auto_create,
            "registered type"
        );
        self.entries.insert(entry.type_id.clone(), Arc::new(entry));
        Ok(())
    }

    /// Builder-style registration
    pub fn with(mut self, entry: TypeEntry) -> Result<Self> {
        self.register(entry)?;
        Ok(self)
    }

    pub fn get(&self, type_id: &str) -> Option<Arc<TypeEntry>> {
        self.entries.get(type_id).cloned()
    }

    pub fn lookup(&self, type_id: &str) -> Result<Arc<TypeEntry>> {
        self.get(type_id)
            .ok_or_else(|| BrokerError::UnknownType(type_id.to_string()))
    }

    pub fn contains(&self, type_id: &str) -> bool {
        self.entries.contains_key(type_id)
    }

    /// Registered type ids in sorted order
    pub fn type_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.entries.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }
}
