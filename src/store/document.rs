//! Schemaless documents, queries and field-level update operations.
//!
//! Everything here is pure: the SQLite store loads raw documents and uses these
//! types to filter, order and patch them.

use std::cmp::Ordering;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use super::StoreError;

/// Named collections persisted by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Users,
    Teams,
    Events,
    Services,
    Messages,
    RoleRestrictions,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::Users => "users",
            Collection::Teams => "teams",
            Collection::Events => "events",
            Collection::Services => "services",
            Collection::Messages => "messages",
            Collection::RoleRestrictions => "role_restrictions",
        }
    }

    /// Human readable name of one document, used in error messages.
    pub fn singular(&self) -> &'static str {
        match self {
            Collection::Users => "User",
            Collection::Teams => "Team",
            Collection::Events => "Event",
            Collection::Services => "Service",
            Collection::Messages => "Message",
            Collection::RoleRestrictions => "Role restriction",
        }
    }

    /// Field whose normalized value must be unique within the collection.
    pub fn unique_field(&self) -> Option<&'static str> {
        match self {
            Collection::Users => Some("email"),
            Collection::Teams => Some("name"),
            _ => None,
        }
    }

    /// Derive the unique key of a document body, if the collection has one.
    pub fn unique_key(&self, data: &Value) -> Option<String> {
        let field = self.unique_field()?;
        data.get(field)
            .and_then(Value::as_str)
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
    }
}

impl Serialize for Collection {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A stored document: an id plus a JSON object body.
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    pub collection: Collection,
    pub id: String,
    pub data: Value,
    /// Per-document write counter
    pub version: i64,
}

impl Document {
    /// Decode the document body into a typed model, injecting the id as `id`.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, StoreError> {
        let mut body = match &self.data {
            Value::Object(map) => map.clone(),
            _ => Map::new(),
        };
        body.insert("id".to_string(), Value::String(self.id.clone()));
        serde_json::from_value(Value::Object(body)).map_err(|e| StoreError::Decode {
            collection: self.collection,
            id: self.id.clone(),
            message: e.to_string(),
        })
    }

    pub fn field(&self, path: &FieldPath) -> Option<&Value> {
        path.lookup(&self.data)
    }
}

/// Serialize a model into a document body. The id lives outside the body.
pub fn to_body<T: Serialize>(model: &T) -> Result<Value, serde_json::Error> {
    let mut value = serde_json::to_value(model)?;
    if let Some(map) = value.as_object_mut() {
        map.remove("id");
    }
    Ok(value)
}

/// Path into a document body, e.g. `roles` → `Keys`.
///
/// Segments are kept separate so keys such as `Media/ProPresenter` or names
/// containing dots never need escaping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath(Vec<String>);

impl FieldPath {
    pub fn new(field: impl Into<String>) -> Self {
        Self(vec![field.into()])
    }

    pub fn key(mut self, segment: impl Into<String>) -> Self {
        self.0.push(segment.into());
        self
    }

    fn lookup<'a>(&self, mut value: &'a Value) -> Option<&'a Value> {
        for segment in &self.0 {
            value = value.as_object()?.get(segment)?;
        }
        Some(value)
    }

    /// Walk to the parent object of the last segment, creating objects as needed.
    fn parent_mut<'a>(&self, root: &'a mut Value) -> Result<&'a mut Map<String, Value>, String> {
        let (_, parents) = self
            .0
            .split_last()
            .ok_or_else(|| "empty field path".to_string())?;

        let mut current = root;
        for segment in parents {
            let map = current
                .as_object_mut()
                .ok_or_else(|| format!("{} is not an object", self))?;
            current = map
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Map::new()));
            if current.is_null() {
                *current = Value::Object(Map::new());
            }
        }
        current
            .as_object_mut()
            .ok_or_else(|| format!("{} is not an object", self))
    }

    fn leaf(&self) -> &str {
        self.0.last().map(String::as_str).unwrap_or_default()
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl From<&str> for FieldPath {
    fn from(path: &str) -> Self {
        Self(path.split('.').map(str::to_string).collect())
    }
}

/// A single predicate over a document field.
#[derive(Debug, Clone, PartialEq)]
pub enum Filter {
    /// Document id equals
    IdEq(String),
    Eq(FieldPath, Value),
    Lt(FieldPath, Value),
    Gte(FieldPath, Value),
    /// Array field contains the value
    ArrayContains(FieldPath, Value),
}

impl Filter {
    pub fn eq(field: &str, value: impl Into<Value>) -> Self {
        Filter::Eq(field.into(), value.into())
    }

    pub fn lt(field: &str, value: impl Into<Value>) -> Self {
        Filter::Lt(field.into(), value.into())
    }

    pub fn gte(field: &str, value: impl Into<Value>) -> Self {
        Filter::Gte(field.into(), value.into())
    }

    pub fn array_contains(field: &str, value: impl Into<Value>) -> Self {
        Filter::ArrayContains(field.into(), value.into())
    }

    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Filter::IdEq(id) => &doc.id == id,
            Filter::Eq(path, expected) => doc
                .field(path)
                .is_some_and(|v| compare_values(v, expected) == Some(Ordering::Equal)),
            Filter::Lt(path, bound) => doc
                .field(path)
                .is_some_and(|v| compare_values(v, bound) == Some(Ordering::Less)),
            Filter::Gte(path, bound) => doc.field(path).is_some_and(|v| {
                matches!(
                    compare_values(v, bound),
                    Some(Ordering::Greater | Ordering::Equal)
                )
            }),
            Filter::ArrayContains(path, needle) => doc
                .field(path)
                .and_then(Value::as_array)
                .is_some_and(|items| items.contains(needle)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OrderBy {
    pub field: FieldPath,
    pub direction: Direction,
}

/// A collection query: all filters must match, results optionally ordered.
#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: Collection,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
}

impl Query {
    pub fn collection(collection: Collection) -> Self {
        Self {
            collection,
            filters: Vec::new(),
            order_by: None,
        }
    }

    pub fn by_id(collection: Collection, id: impl Into<String>) -> Self {
        Self::collection(collection).filter(Filter::IdEq(id.into()))
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    pub fn order_by(mut self, field: &str, direction: Direction) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn matches(&self, doc: &Document) -> bool {
        doc.collection == self.collection && self.filters.iter().all(|f| f.matches(doc))
    }

    /// Filter and order raw documents. Ties and unordered queries fall back to id order.
    pub fn apply(&self, docs: impl IntoIterator<Item = Document>) -> Vec<Document> {
        let mut selected: Vec<Document> = docs.into_iter().filter(|d| self.matches(d)).collect();

        match &self.order_by {
            Some(order) => selected.sort_by(|a, b| {
                let ord = match (a.field(&order.field), b.field(&order.field)) {
                    (Some(x), Some(y)) => compare_values(x, y).unwrap_or(Ordering::Equal),
                    (Some(_), None) => Ordering::Less,
                    (None, Some(_)) => Ordering::Greater,
                    (None, None) => Ordering::Equal,
                };
                let ord = match order.direction {
                    Direction::Asc => ord,
                    Direction::Desc => ord.reverse(),
                };
                ord.then_with(|| a.id.cmp(&b.id))
            }),
            None => selected.sort_by(|a, b| a.id.cmp(&b.id)),
        }

        selected
    }

    /// The id this query is pinned to, if it selects a single document by id.
    pub fn pinned_id(&self) -> Option<&str> {
        self.filters.iter().find_map(|f| match f {
            Filter::IdEq(id) => Some(id.as_str()),
            _ => None,
        })
    }
}

/// Compare two JSON values for filtering and ordering.
///
/// Strings that both parse as RFC 3339 timestamps compare as instants, so
/// differing fractional-second precision never changes the outcome.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => match (parse_instant(x), parse_instant(y)) {
            (Some(x), Some(y)) => Some(x.cmp(&y)),
            _ => Some(x.cmp(y)),
        },
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}

fn parse_instant(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// Field-level mutation applied to the freshest stored copy of a document.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldOp {
    Set { path: FieldPath, value: Value },
    /// Append to an array field unless already present
    AddToSet { path: FieldPath, value: Value },
    /// Remove every occurrence from an array field
    RemoveFromSet { path: FieldPath, value: Value },
    /// Write only if the field is missing or null
    SetIfAbsent { path: FieldPath, value: Value },
    /// Write only if the field currently equals `expected`
    CompareAndSet {
        path: FieldPath,
        expected: Value,
        value: Value,
    },
}

impl FieldOp {
    pub fn set(path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        FieldOp::Set {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn add_to_set(path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        FieldOp::AddToSet {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn remove_from_set(path: impl Into<FieldPath>, value: impl Into<Value>) -> Self {
        FieldOp::RemoveFromSet {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn path(&self) -> &FieldPath {
        match self {
            FieldOp::Set { path, .. }
            | FieldOp::AddToSet { path, .. }
            | FieldOp::RemoveFromSet { path, .. }
            | FieldOp::SetIfAbsent { path, .. }
            | FieldOp::CompareAndSet { path, .. } => path,
        }
    }
}

/// Why a field operation could not be applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpError {
    /// Conditional write target did not hold the expected value
    Precondition(String),
    /// The body shape does not allow the operation
    Shape(String),
}

/// Apply operations in order. Either every operation applies or `data` is left untouched.
pub fn apply_ops(data: &mut Value, ops: &[FieldOp]) -> Result<(), OpError> {
    let mut next = data.clone();
    if !next.is_object() {
        next = Value::Object(Map::new());
    }

    for op in ops {
        apply_op(&mut next, op)?;
    }

    *data = next;
    Ok(())
}

fn apply_op(root: &mut Value, op: &FieldOp) -> Result<(), OpError> {
    let path = op.path();
    let leaf = path.leaf().to_string();
    let parent = path.parent_mut(root).map_err(OpError::Shape)?;

    match op {
        FieldOp::Set { value, .. } => {
            parent.insert(leaf, value.clone());
        }
        FieldOp::AddToSet { value, .. } => {
            let slot = parent
                .entry(leaf)
                .or_insert_with(|| Value::Array(Vec::new()));
            if slot.is_null() {
                *slot = Value::Array(Vec::new());
            }
            let items = slot
                .as_array_mut()
                .ok_or_else(|| OpError::Shape(format!("{} is not an array", path)))?;
            if !items.contains(value) {
                items.push(value.clone());
            }
        }
        FieldOp::RemoveFromSet { value, .. } => match parent.get_mut(&leaf) {
            Some(Value::Array(items)) => items.retain(|item| item != value),
            Some(Value::Null) | None => {}
            Some(_) => return Err(OpError::Shape(format!("{} is not an array", path))),
        },
        FieldOp::SetIfAbsent { value, .. } => match parent.get(&leaf) {
            None | Some(Value::Null) => {
                parent.insert(leaf, value.clone());
            }
            Some(_) => return Err(OpError::Precondition(path.to_string())),
        },
        FieldOp::CompareAndSet {
            expected, value, ..
        } => {
            let current = parent.get(&leaf).unwrap_or(&Value::Null);
            if current != expected {
                return Err(OpError::Precondition(path.to_string()));
            }
            parent.insert(leaf, value.clone());
        }
    }

    Ok(())
}
