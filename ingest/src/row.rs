use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;

/// A scalar bound into an upsert statement.
#[derive(Clone, Debug, PartialEq)]
pub enum SqlValue {
    Null,
    Int(i64),
    Float(f64),
    Bool(bool),
    Text(String),
}

impl SqlValue {
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }
}

impl From<NaturalKey> for SqlValue {
    fn from(key: NaturalKey) -> Self {
        match key {
            NaturalKey::Int(id) => SqlValue::Int(id),
            NaturalKey::Text(id) => SqlValue::Text(id),
        }
    }
}

/// The vendor-assigned identifier of an entity, reused as its primary key.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum NaturalKey {
    Int(i64),
    Text(String),
}

impl NaturalKey {
    pub fn from_value(value: &SqlValue) -> Option<Self> {
        match value {
            SqlValue::Int(id) => Some(NaturalKey::Int(*id)),
            SqlValue::Text(id) if !id.is_empty() => Some(NaturalKey::Text(id.clone())),
            _ => None,
        }
    }
}

impl fmt::Display for NaturalKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NaturalKey::Int(id) => write!(f, "{id}"),
            NaturalKey::Text(id) => write!(f, "{id}"),
        }
    }
}

/// One flattened row destined for a single table.
///
/// `values` holds every column of the table's descriptor, in descriptor order.
/// Reference columns still carry the vendor ID of the referenced entity until the
/// writer resolves them through the page's identity maps.
#[derive(Clone, Debug, PartialEq)]
pub struct EntityRow {
    pub entity: &'static str,
    pub key: NaturalKey,
    pub values: IndexMap<&'static str, SqlValue>,
}

impl EntityRow {
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.values.get(column)
    }
}

/// Vendor ID to stored ID for one entity, scoped to a single page.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct IdentityMap(HashMap<NaturalKey, NaturalKey>);

impl IdentityMap {
    pub fn insert(&mut self, vendor: NaturalKey, stored: NaturalKey) {
        self.0.insert(vendor, stored);
    }

    pub fn get(&self, vendor: &NaturalKey) -> Option<&NaturalKey> {
        self.0.get(vendor)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Identity maps of every dependent entity written so far on the current page.
pub type IdentityMaps = HashMap<&'static str, IdentityMap>;
