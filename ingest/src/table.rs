//! Data-driven table descriptors.
//!
//! A descriptor says where each column of a table comes from in the vendor JSON and
//! how the value is encoded. The decomposer reads records through descriptors and the
//! writer builds its statements from them, so adding a table never needs new code.

/// How a JSON field becomes a column value.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Encoding {
    Integer,
    Float,
    Bool,
    /// Strings as-is. Numbers and booleans keep their JSON text.
    Text,
    /// ISO-8601 text normalized to `YYYY-MM-DD HH:MM:SS`.
    Timestamp,
    /// Any JSON stored as its canonical encoding.
    Opaque,
    /// The `id` of the nested object in `field`, resolved through the identity map of
    /// `entity` before writing.
    Reference { entity: &'static str },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Column {
    pub name: &'static str,
    pub field: &'static str,
    pub encoding: Encoding,
}

impl Column {
    pub const fn new(name: &'static str, encoding: Encoding) -> Self {
        Column {
            name,
            field: name,
            encoding,
        }
    }

    /// A column whose JSON field has a different name.
    pub const fn renamed(name: &'static str, field: &'static str, encoding: Encoding) -> Self {
        Column {
            name,
            field,
            encoding,
        }
    }

    pub const fn reference(name: &'static str, field: &'static str, entity: &'static str) -> Self {
        Column {
            name,
            field,
            encoding: Encoding::Reference { entity },
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
pub struct TableDescriptor {
    /// Logical name used in identity maps, logs and errors.
    pub entity: &'static str,
    pub table: &'static str,
    /// Column holding the natural key.
    pub key: &'static str,
    /// Columns of the unique key an upsert conflicts on.
    pub conflict: &'static [&'static str],
    pub columns: &'static [Column],
}

impl TableDescriptor {
    pub fn column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.columns.iter().map(|c| c.name)
    }

    /// Columns overwritten when the row already exists.
    pub fn update_columns(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.column_names()
            .filter(|name| !self.conflict.contains(name))
    }

    pub fn references(&self) -> impl Iterator<Item = (&'static str, &'static str)> + '_ {
        self.columns.iter().filter_map(|c| match c.encoding {
            Encoding::Reference { entity } => Some((c.name, entity)),
            _ => None,
        })
    }
}

/// A nested object of the top-level record that lives in its own table.
#[derive(Debug, PartialEq, Eq)]
pub struct Dependent {
    pub field: &'static str,
    pub table: &'static TableDescriptor,
}

/// How one feed's records map onto tables.
///
/// Dependents are written in the listed order, and all of them before `top`.
#[derive(Debug, PartialEq, Eq)]
pub struct FeedSchema {
    pub dependents: &'static [Dependent],
    pub top: &'static TableDescriptor,
}

impl FeedSchema {
    pub fn tables(&self) -> impl Iterator<Item = &'static TableDescriptor> + '_ {
        self.dependents
            .iter()
            .map(|d| d.table)
            .chain(std::iter::once(self.top))
    }

    pub fn dependent_table(&self, entity: &str) -> Option<&'static TableDescriptor> {
        self.dependents
            .iter()
            .map(|d| d.table)
            .find(|t| t.entity == entity)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cratejoy::{ORDERS, SUBSCRIPTION_FEED};
    use std::collections::HashSet;

    #[test]
    fn test_update_columns_skip_conflict_key() {
        let updates: Vec<_> = ORDERS.update_columns().collect();
        assert!(!updates.contains(&"id"));
        assert_eq!(updates.len(), ORDERS.columns.len() - 1);
    }

    #[test]
    fn test_references_point_at_dependents() {
        let top = SUBSCRIPTION_FEED.top;
        let references: Vec<_> = top.references().collect();
        assert_eq!(references.len(), SUBSCRIPTION_FEED.dependents.len());
        for (_, entity) in references {
            assert!(SUBSCRIPTION_FEED.dependent_table(entity).is_some());
        }
    }

    #[test]
    fn test_descriptors_are_well_formed() {
        for table in SUBSCRIPTION_FEED.tables().chain([&ORDERS]) {
            let names: HashSet<_> = table.column_names().collect();
            assert_eq!(names.len(), table.columns.len(), "{}", table.table);
            assert!(names.contains(table.key), "{}", table.table);
            for column in table.conflict {
                assert!(names.contains(column), "{}", table.table);
            }
        }
    }
}
