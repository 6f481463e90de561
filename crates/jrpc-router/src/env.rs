use std::any::{type_name, Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::context::Context;

type CloneFn = fn(&(dyn Any + Send + Sync)) -> Option<Box<dyn Any + Send>>;

/// One type-erased value in a call environment.
///
/// Parameters bind to environment values of exactly their own type.
#[derive(Clone)]
pub struct EnvValue {
    type_id: TypeId,
    type_name: &'static str,
    value: Arc<dyn Any + Send + Sync>,
    clone: CloneFn,
}

impl EnvValue {
    pub fn new<T: Clone + Send + Sync + 'static>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: type_name::<T>(),
            value: Arc::new(value),
            clone: |value| {
                value
                    .downcast_ref::<T>()
                    .map(|v| Box::new(v.clone()) as Box<dyn Any + Send>)
            },
        }
    }

    pub fn is<T: 'static>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }

    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// A fresh copy of the value if it is a `T`.
    pub fn get<T: 'static>(&self) -> Option<T> {
        if !self.is::<T>() {
            return None;
        }
        (self.clone)(&*self.value)?
            .downcast::<T>()
            .ok()
            .map(|boxed| *boxed)
    }
}

impl fmt::Debug for EnvValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EnvValue").field(&self.type_name).finish()
    }
}

/// Walks an environment left to right, consuming what it passes.
///
/// A search that finds nothing exhausts the cursor, so every later
/// parameter falls through to argument decoding.
pub(crate) struct EnvCursor<'a> {
    remaining: &'a [EnvValue],
}

impl<'a> EnvCursor<'a> {
    pub(crate) fn new(env: &'a [EnvValue]) -> Self {
        Self { remaining: env }
    }

    pub(crate) fn bind<P: Param>(&mut self) -> Option<P> {
        while let Some((first, rest)) = self.remaining.split_first() {
            self.remaining = rest;
            if let Some(bound) = P::from_env(first) {
                return Some(bound);
            }
        }
        None
    }
}

/// A handler parameter.
///
/// Every deserializable type is a parameter: it binds from an environment
/// value of the same type when one is in reach, and is decoded from the
/// arguments otherwise. Environment-only values such as [`Context`],
/// [`Query`] and anything wrapped in [`Env`] cannot be decoded.
pub trait Param: Sized + Send + 'static {
    fn from_env(value: &EnvValue) -> Option<Self>;

    fn from_arg(value: Value) -> Result<Self, ArgError>;
}

/// Why a decoded value could not become a parameter.
#[derive(Debug)]
pub enum ArgError {
    Json(serde_json::Error),
    EnvOnly(&'static str),
}

impl<T: DeserializeOwned + Send + 'static> Param for T {
    fn from_env(value: &EnvValue) -> Option<Self> {
        value.get::<T>()
    }

    fn from_arg(value: Value) -> Result<Self, ArgError> {
        convert(value).map_err(ArgError::Json)
    }
}

/// Lenient JSON conversion.
///
/// Flag and positional arguments arrive as literals, so a number or bool may
/// stand in for a string and a string may carry a number or bool.
fn convert<T: DeserializeOwned>(value: Value) -> serde_json::Result<T> {
    let err = match serde_json::from_value::<T>(value.clone()) {
        Ok(converted) => return Ok(converted),
        Err(err) => err,
    };
    let retry = match &value {
        Value::Number(_) | Value::Bool(_) => Value::String(value.to_string()),
        Value::String(text) => match serde_json::from_str::<Value>(text) {
            Ok(parsed @ (Value::Number(_) | Value::Bool(_))) => parsed,
            _ => return Err(err),
        },
        _ => return Err(err),
    };
    serde_json::from_value(retry).map_err(|_| err)
}

/// Original query line of the connection, as dialed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query(pub String);

impl Query {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Parameter taken only from the environment.
///
/// Use it for values that are not deserializable, such as the session's
/// `Flow` or the caller's `Identity`, or for services attached with
/// `with`.
#[derive(Debug, Clone)]
pub struct Env<T>(pub T);

impl<T: Clone + Send + Sync + 'static> Param for Env<T> {
    fn from_env(value: &EnvValue) -> Option<Self> {
        value.get::<T>().map(Env)
    }

    fn from_arg(_: Value) -> Result<Self, ArgError> {
        Err(ArgError::EnvOnly(type_name::<T>()))
    }
}

impl Param for Context {
    fn from_env(value: &EnvValue) -> Option<Self> {
        value.get::<Context>()
    }

    fn from_arg(_: Value) -> Result<Self, ArgError> {
        Err(ArgError::EnvOnly(type_name::<Context>()))
    }
}

impl Param for Query {
    fn from_env(value: &EnvValue) -> Option<Self> {
        value.get::<Query>()
    }

    fn from_arg(_: Value) -> Result<Self, ArgError> {
        Err(ArgError::EnvOnly(type_name::<Query>()))
    }
}
