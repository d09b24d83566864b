//! Registration-time method tables

use super::shared::{Reply, SharedObject, SharedRef};
use crate::store::CallContext;
use crate::types::{Args, ObjectError};
use async_trait::async_trait;
use futures::future::BoxFuture;
use objwire::Value;
use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

/// Future returned by a table method
pub type MethodFuture = BoxFuture<'static, Result<Reply, ObjectError>>;

/// A table method: state, call context and arguments in, reply out
pub type Method<T> = Arc<dyn Fn(Arc<T>, CallContext, Args) -> MethodFuture + Send + Sync>;

type ValueGetter<T> = Arc<dyn Fn(&T) -> Value + Send + Sync>;

/// Method name to handler map, built once per type
pub struct MethodTable<T> {
    methods: BTreeMap<String, Method<T>>,
}

impl<T: Send + Sync + 'static> MethodTable<T> {
    pub fn new() -> Self {
        Self {
            methods: BTreeMap::new(),
        }
    }

    /// Add a method
    pub fn method<F, Fut>(mut self, name: &str, handler: F) -> Self
    where
        F: Fn(Arc<T>, CallContext, Args) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Reply, ObjectError>> + Send + 'static,
    {
        self.methods.insert(
            name.to_string(),
            Arc::new(move |state, ctx, args| Box::pin(handler(state, ctx, args))),
        );
        self
    }

    pub fn get(&self, name: &str) -> Option<&Method<T>> {
        self.methods.get(name)
    }

    /// Method names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.methods.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.methods.len()
    }

    pub fn is_empty(&self) -> bool {
        self.methods.is_empty()
    }
}

impl<T: Send + Sync + 'static> Default for MethodTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// A shared object backed by a method table
pub struct TableObject<T> {
    state: Arc<T>,
    table: Arc<MethodTable<T>>,
    getter: Option<ValueGetter<T>>,
    label: String,
}

impl<T: Send + Sync + 'static> TableObject<T> {
    pub fn new(state: T, table: Arc<MethodTable<T>>) -> Self {
        Self {
            state: Arc::new(state),
            table,
            getter: None,
            label: std::any::type_name::<T>()
                .rsplit("::")
                .next()
                .unwrap_or("object")
                .to_string(),
        }
    }

    /// Answer `#GETVALUE` with a snapshot of the state
    pub fn with_value<F>(mut self, getter: F) -> Self
    where
        F: Fn(&T) -> Value + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(getter));
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = label.into();
        self
    }

    pub fn state(&self) -> &Arc<T> {
        &self.state
    }

    pub fn into_shared(self) -> SharedRef {
        Arc::new(self)
    }
}

#[async_trait]
impl<T: Send + Sync + 'static> SharedObject for TableObject<T> {
    fn public_methods(&self) -> Vec<String> {
        self.table.names()
    }

    async fn invoke(&self, ctx: &CallContext, method: &str, args: Args) -> Result<Reply, ObjectError> {
        let handler = self
            .table
            .get(method)
            .cloned()
            .ok_or_else(|| ObjectError::unsupported(format!("{} has no method '{method}'", self.label)))?;
        handler(Arc::clone(&self.state), ctx.clone(), args).await
    }

    async fn get_value(&self, _ctx: &CallContext) -> Result<Value, ObjectError> {
        match &self.getter {
            Some(getter) => Ok(getter(&self.state)),
            None => Err(ObjectError::unsupported(format!(
                "{} has no value snapshot",
                self.label
            ))),
        }
    }

    fn describe(&self) -> String {
        format!("<{} object>", self.label)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
