//
// Copyright (c) The Certa Contributors
//
// SPDX-License-Identifier: MIT
//

use std::sync::Arc;

use async_trait::async_trait;
use enum_as_inner::EnumAsInner;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::transport::TransportError;

// Stream of values produced by a telemetry subscription.
//
// Dropping the stream cancels the subscription.
pub type ValueStream =
    BoxStream<'static, Result<TypedValue, TransportError>>;

// Declared kind of the state identified by a path.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueKind {
    Bool,
    Enum,
    Uint,
    String,
}

// Opaque identifier for a piece of device or tester state.
//
// Two paths are equal when both the name and the declared kind match.
#[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
#[derive(Deserialize, Serialize)]
pub struct Path {
    name: Arc<str>,
    kind: ValueKind,
}

#[derive(Clone, Debug, EnumAsInner, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Value {
    Bool(bool),
    Enum(String),
    Uint(u64),
    String(String),
}

// A sampled value, possibly absent, tagged with its declared kind.
#[derive(Clone, Debug, Eq, PartialEq)]
#[derive(Deserialize, Serialize)]
pub struct TypedValue {
    kind: ValueKind,
    value: Option<Value>,
}

// Source of device or tester state, usually backed by a gNMI client.
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    // Reads the current value of the given path.
    async fn get(&self, path: &Path) -> Result<TypedValue, TransportError>;

    // Subscribes to updates of the given path.
    //
    // Sources without push-based subscriptions return `None`, which makes
    // the caller fall back to polling.
    fn subscribe(&self, _path: &Path) -> Option<ValueStream> {
        None
    }
}

// ===== impl ValueKind =====

impl std::fmt::Display for ValueKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueKind::Bool => write!(f, "bool"),
            ValueKind::Enum => write!(f, "enum"),
            ValueKind::Uint => write!(f, "uint"),
            ValueKind::String => write!(f, "string"),
        }
    }
}

// ===== impl Path =====

impl Path {
    pub fn new(name: impl AsRef<str>, kind: ValueKind) -> Path {
        Path {
            name: Arc::from(name.as_ref()),
            kind,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    // Returns an absent value of this path's kind.
    pub fn absent(&self) -> TypedValue {
        TypedValue::absent(self.kind)
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name)
    }
}

// ===== impl Value =====

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Bool(..) => ValueKind::Bool,
            Value::Enum(..) => ValueKind::Enum,
            Value::Uint(..) => ValueKind::Uint,
            Value::String(..) => ValueKind::String,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Bool(value) => write!(f, "{value}"),
            Value::Enum(value) => write!(f, "{value}"),
            Value::Uint(value) => write!(f, "{value}"),
            Value::String(value) => write!(f, "{value:?}"),
        }
    }
}

// ===== impl TypedValue =====

impl TypedValue {
    pub fn absent(kind: ValueKind) -> TypedValue {
        TypedValue { kind, value: None }
    }

    pub fn present(value: Value) -> TypedValue {
        TypedValue {
            kind: value.kind(),
            value: Some(value),
        }
    }

    pub fn kind(&self) -> ValueKind {
        self.kind
    }

    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    pub fn is_present(&self) -> bool {
        self.value.is_some()
    }

    pub fn as_uint(&self) -> Option<u64> {
        self.value.as_ref().and_then(|value| value.as_uint().copied())
    }
}

impl std::fmt::Display for TypedValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{value}"),
            None => write!(f, "<absent {}>", self.kind),
        }
    }
}

impl From<Value> for TypedValue {
    fn from(value: Value) -> TypedValue {
        TypedValue::present(value)
    }
}
