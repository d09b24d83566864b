//! Method and constructor arguments

use super::error::ObjectError;
use objwire::Value;
use std::collections::BTreeMap;

/// Positional and keyword arguments of a call
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Args {
    pub positional: Vec<Value>,
    pub keyword: BTreeMap<String, Value>,
}

impl Args {
    pub fn new(positional: Vec<Value>) -> Self {
        Self {
            positional,
            keyword: BTreeMap::new(),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_kwargs(mut self, keyword: BTreeMap<String, Value>) -> Self {
        self.keyword = keyword;
        self
    }

    pub fn kwarg(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.keyword.insert(name.into(), value.into());
        self
    }

    pub fn len(&self) -> usize {
        self.positional.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positional.is_empty() && self.keyword.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional.get(index)
    }

    pub fn keyword(&self, name: &str) -> Option<&Value> {
        self.keyword.get(name)
    }

    /// Positional argument `index`, or an error naming it
    pub fn required(&self, index: usize) -> Result<&Value, ObjectError> {
        self.positional.get(index).ok_or_else(|| {
            ObjectError::invalid_argument(format!(
                "missing argument {index} (got {})",
                self.positional.len()
            ))
        })
    }

    pub fn int(&self, index: usize) -> Result<i64, ObjectError> {
        let value = self.required(index)?;
        value.as_int().ok_or_else(|| {
            ObjectError::invalid_argument(format!(
                "argument {index} must be int, got {}",
                value.type_name()
            ))
        })
    }

    pub fn str(&self, index: usize) -> Result<&str, ObjectError> {
        let value = self.required(index)?;
        value.as_str().ok_or_else(|| {
            ObjectError::invalid_argument(format!(
                "argument {index} must be str, got {}",
                value.type_name()
            ))
        })
    }

    /// Keyword argument `name` as an int, falling back to `default`
    pub fn int_or(&self, name: &str, default: i64) -> Result<i64, ObjectError> {
        match self.keyword.get(name) {
            None => Ok(default),
            Some(value) => value.as_int().ok_or_else(|| {
                ObjectError::invalid_argument(format!(
                    "keyword '{name}' must be int, got {}",
                    value.type_name()
                ))
            }),
        }
    }

    pub fn into_positional(self) -> Vec<Value> {
        self.positional
    }
}

impl From<Vec<Value>> for Args {
    fn from(positional: Vec<Value>) -> Self {
        Self::new(positional)
    }
}
