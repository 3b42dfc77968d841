//! Name → operation lookup, built once in a single registration pass.
//!
//! Each entry carries the per-operation wrappers the host needs: a
//! collection-open check, a write bracket, and result normalisation. Entries
//! are plain closures over `&mut H`, so the table itself is `!Send` and
//! stays on the host thread.

use std::collections::{HashMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;
use tracing::warn;

use crate::bridge::Arguments;

/// What the table's wrappers need from host state.
pub trait HostAccess {
    fn collection_open(&self) -> bool;
    /// Called before a write operation runs.
    fn begin_write(&mut self, operation: &str);
    /// Called after a write operation, whether it succeeded or not.
    fn end_write(&mut self, operation: &str);
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum OperationError {
    #[error("unknown operation: {0}")]
    Unknown(String),

    #[error("invalid arguments for `{operation}`: {reason}")]
    InvalidArguments { operation: String, reason: String },

    #[error("Collection not available (hint: Open a profile in Anki first)")]
    CollectionUnavailable,

    #[error("{}", render_handler_error(.message, .hint, .data))]
    Handler {
        message: String,
        hint: Option<String>,
        data: Option<Map<String, Value>>,
    },

    #[error("operation `{operation}` panicked: {message}")]
    Panicked { operation: String, message: String },
}

fn render_handler_error(
    message: &str,
    hint: &Option<String>,
    data: &Option<Map<String, Value>>,
) -> String {
    let mut rendered = message.to_owned();
    if let Some(hint) = hint {
        rendered.push_str(&format!(" (hint: {hint})"));
    }
    if let Some(data) = data.as_ref().filter(|d| !d.is_empty()) {
        rendered.push_str(&format!(" (context: {})", Value::Object(data.clone())));
    }
    rendered
}

impl OperationError {
    /// A domain failure with a plain message.
    pub fn handler(message: impl Into<String>) -> Self {
        OperationError::Handler {
            message: message.into(),
            hint: None,
            data: None,
        }
    }

    /// Attach an actionable suggestion. Only meaningful on `Handler` errors.
    pub fn with_hint(mut self, new_hint: impl Into<String>) -> Self {
        if let OperationError::Handler { hint, .. } = &mut self {
            *hint = Some(new_hint.into());
        }
        self
    }

    /// Attach one piece of context. Only meaningful on `Handler` errors.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        if let OperationError::Handler { data, .. } = &mut self {
            data.get_or_insert_with(Map::new)
                .insert(key.into(), value.into());
        }
        self
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RegistryError {
    #[error("operation already registered: {0}")]
    Duplicate(String),

    #[error("resource uri already registered: {0}")]
    DuplicateUri(String),
}

/// Arguments type for operations that take none.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct NoArguments {}

type Handler<H> = Box<dyn Fn(&mut H, Arguments) -> Result<Value, OperationError>>;

/// One registrable operation plus its wrapper flags.
pub struct OperationSpec<H> {
    name: String,
    description: String,
    input_schema: Value,
    requires_collection: bool,
    write: bool,
    enveloped: bool,
    resource: Option<ResourceInfo>,
    handler: Handler<H>,
}

impl<H> std::fmt::Debug for OperationSpec<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OperationSpec")
            .field("name", &self.name)
            .field("requires_collection", &self.requires_collection)
            .field("write", &self.write)
            .field("enveloped", &self.enveloped)
            .field("resource", &self.resource)
            .finish()
    }
}

impl<H: 'static> OperationSpec<H> {
    /// Typed operation: arguments are deserialized into `A`, and the JSON
    /// schema of `A` is what clients see as the input schema.
    pub fn new<A, F>(name: impl Into<String>, description: impl Into<String>, handler: F) -> Self
    where
        A: DeserializeOwned + JsonSchema,
        F: Fn(&mut H, A) -> Result<Value, OperationError> + 'static,
    {
        let name = name.into();
        let schema = schemars::schema_for!(A);
        let input_schema =
            serde_json::to_value(&schema).unwrap_or_else(|_| json!({ "type": "object" }));
        let operation = name.clone();
        Self::raw(name, description, input_schema, move |host, args| {
            let parsed: A = serde_json::from_value(Value::Object(args)).map_err(|e| {
                OperationError::InvalidArguments {
                    operation: operation.clone(),
                    reason: e.to_string(),
                }
            })?;
            handler(host, parsed)
        })
    }

    /// Untyped operation receiving the raw argument object.
    pub fn raw<F>(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
        handler: F,
    ) -> Self
    where
        F: Fn(&mut H, Arguments) -> Result<Value, OperationError> + 'static,
    {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
            requires_collection: true,
            write: false,
            enveloped: false,
            resource: None,
            handler: Box::new(handler),
        }
    }
}

impl<H> OperationSpec<H> {
    /// Bracket the handler with `begin_write`/`end_write`.
    pub fn write(mut self) -> Self {
        self.write = true;
        self
    }

    pub fn without_collection(mut self) -> Self {
        self.requires_collection = false;
        self
    }

    /// Normalise the result into a `{"success": true, ...}` object.
    pub fn enveloped(mut self) -> Self {
        self.enveloped = true;
        self
    }

    /// Publish under `uri` through `resources/*` instead of `tools/*`.
    pub fn resource(mut self, uri: impl Into<String>, title: impl Into<String>) -> Self {
        self.resource = Some(ResourceInfo {
            uri: uri.into(),
            title: title.into(),
        });
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn info(&self) -> OperationInfo {
        OperationInfo {
            name: self.name.clone(),
            description: self.description.clone(),
            input_schema: self.input_schema.clone(),
            requires_collection: self.requires_collection,
            write: self.write,
            resource: self.resource.clone(),
        }
    }
}

impl<H: HostAccess> OperationSpec<H> {
    fn invoke(&self, host: &mut H, args: Arguments) -> Result<Value, OperationError> {
        if self.requires_collection && !host.collection_open() {
            return Err(OperationError::CollectionUnavailable);
        }

        let result = if self.write {
            host.begin_write(&self.name);
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| (self.handler)(host, args)));
            host.end_write(&self.name);
            match outcome {
                Ok(result) => result,
                Err(payload) => panic::resume_unwind(payload),
            }
        } else {
            (self.handler)(host, args)
        };

        if let Err(err) = &result {
            warn!(operation = %self.name, error = %err, "operation failed");
        }

        if self.enveloped {
            result.map(normalize_result)
        } else {
            result
        }
    }
}

/// Public description of a registered operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationInfo {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
    pub requires_collection: bool,
    pub write: bool,
    /// Set for operations read through `resources/read`.
    pub resource: Option<ResourceInfo>,
}

impl OperationInfo {
    pub fn is_resource(&self) -> bool {
        self.resource.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceInfo {
    pub uri: String,
    pub title: String,
}

/// Collects specs; `build` rejects duplicates.
pub struct OperationTableBuilder<H> {
    specs: Vec<OperationSpec<H>>,
}

impl<H> Default for OperationTableBuilder<H> {
    fn default() -> Self {
        Self { specs: Vec::new() }
    }
}

impl<H> OperationTableBuilder<H> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, spec: OperationSpec<H>) -> &mut Self {
        self.specs.push(spec);
        self
    }

    pub fn build(self) -> Result<OperationTable<H>, RegistryError> {
        let mut index = HashMap::with_capacity(self.specs.len());
        let mut uris = HashSet::new();
        for (position, spec) in self.specs.iter().enumerate() {
            if index.insert(spec.name.clone(), position).is_some() {
                return Err(RegistryError::Duplicate(spec.name.clone()));
            }
            if let Some(resource) = &spec.resource {
                if !uris.insert(resource.uri.as_str()) {
                    return Err(RegistryError::DuplicateUri(resource.uri.clone()));
                }
            }
        }
        Ok(OperationTable {
            specs: self.specs,
            index,
        })
    }
}

/// Immutable after `build`. Iteration follows registration order.
pub struct OperationTable<H> {
    specs: Vec<OperationSpec<H>>,
    index: HashMap<String, usize>,
}

impl<H> std::fmt::Debug for OperationTable<H> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}

impl<H> OperationTable<H> {
    pub fn builder() -> OperationTableBuilder<H> {
        OperationTableBuilder::new()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.specs.iter().map(|s| s.name.as_str())
    }

    pub fn infos(&self) -> Vec<OperationInfo> {
        self.specs.iter().map(OperationSpec::info).collect()
    }
}

impl<H: HostAccess> OperationTable<H> {
    /// Run `name` against `host`. Must be called on the host thread.
    pub fn execute(&self, host: &mut H, name: &str, args: Arguments) -> Result<Value, OperationError> {
        let position = self
            .index
            .get(name)
            .ok_or_else(|| OperationError::Unknown(name.to_owned()))?;
        self.specs[*position].invoke(host, args)
    }
}

/// Coerce any handler result into a `{"success": true, ...}` object.
///
/// Objects that already carry a boolean `success` are left alone.
pub fn normalize_result(value: Value) -> Value {
    match value {
        Value::Null => json!({ "success": true }),
        Value::Array(items) => json!({ "success": true, "result": items }),
        Value::Object(mut map) => {
            if !matches!(map.get("success"), Some(Value::Bool(_))) {
                map.insert("success".into(), Value::Bool(true));
            }
            Value::Object(map)
        }
        scalar => json!({ "success": true, "result": scalar }),
    }
}
