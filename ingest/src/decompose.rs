use crate::error::ParseError;
use crate::opaque::OpaqueValue;
use crate::row::{EntityRow, NaturalKey, SqlValue};
use crate::table::{Column, Encoding, FeedSchema, TableDescriptor};
use crate::timestamp;
use indexmap::IndexMap;
use serde_json::{Map, Value};

/// The rows of one record, dependents first.
#[derive(Clone, Debug, PartialEq)]
pub struct Decomposed {
    /// One entry per dependent of the schema, `None` when the record has no such
    /// nested object.
    pub dependents: Vec<Option<EntityRow>>,
    pub top: EntityRow,
}

impl Decomposed {
    /// Every row in the order it has to be written.
    pub fn rows(&self) -> impl Iterator<Item = &EntityRow> {
        self.dependents.iter().flatten().chain(std::iter::once(&self.top))
    }
}

/// Splits a record into the rows described by `schema`.
///
/// A nested object that is `null` or missing produces no row and leaves the
/// referencing column `NULL`. Anything malformed fails the whole record.
pub fn decompose(schema: &FeedSchema, record: &Value) -> Result<Decomposed, ParseError> {
    let object = as_object(schema.top, record)?;

    let dependents = schema
        .dependents
        .iter()
        .map(|dependent| match object.get(dependent.field) {
            None | Some(Value::Null) => Ok(None),
            Some(nested) => flatten(dependent.table, nested).map(Some),
        })
        .collect::<Result<Vec<_>, _>>()?;

    let top = flatten(schema.top, record)?;

    Ok(Decomposed { dependents, top })
}

/// Builds the row of a single table from a JSON object.
pub fn flatten(table: &'static TableDescriptor, value: &Value) -> Result<EntityRow, ParseError> {
    let object = as_object(table, value)?;

    let mut values = IndexMap::with_capacity(table.columns.len());
    for column in table.columns {
        let encoded = encode(table, column, object.get(column.field))?;
        values.insert(column.name, encoded);
    }

    let key = values
        .get(table.key)
        .and_then(NaturalKey::from_value)
        .ok_or(ParseError::MissingKey {
            entity: table.entity,
            field: table.key,
        })?;

    Ok(EntityRow {
        entity: table.entity,
        key,
        values,
    })
}

fn as_object<'a>(
    table: &TableDescriptor,
    value: &'a Value,
) -> Result<&'a Map<String, Value>, ParseError> {
    value.as_object().ok_or(ParseError::NotAnObject {
        entity: table.entity,
    })
}

fn encode(
    table: &TableDescriptor,
    column: &Column,
    value: Option<&Value>,
) -> Result<SqlValue, ParseError> {
    let unexpected = |expected: &'static str, found: &Value| ParseError::UnexpectedType {
        entity: table.entity,
        field: column.field,
        expected,
        found: found.to_string(),
    };

    let value = match (column.encoding, value) {
        (Encoding::Opaque, value) => {
            return Ok(SqlValue::Text(OpaqueValue::encode(value).into_string()));
        }
        (_, None | Some(Value::Null)) => return Ok(SqlValue::Null),
        (_, Some(value)) => value,
    };

    match column.encoding {
        Encoding::Integer => value
            .as_i64()
            .map(SqlValue::Int)
            .ok_or_else(|| unexpected("an integer", value)),
        Encoding::Float => value
            .as_f64()
            .map(SqlValue::Float)
            .ok_or_else(|| unexpected("a number", value)),
        Encoding::Bool => match value {
            Value::Bool(b) => Ok(SqlValue::Bool(*b)),
            Value::Number(n) if n.as_i64() == Some(0) => Ok(SqlValue::Bool(false)),
            Value::Number(n) if n.as_i64() == Some(1) => Ok(SqlValue::Bool(true)),
            _ => Err(unexpected("a boolean", value)),
        },
        Encoding::Text => match value {
            Value::String(s) => Ok(SqlValue::Text(s.clone())),
            Value::Number(_) | Value::Bool(_) => Ok(SqlValue::Text(value.to_string())),
            _ => Err(unexpected("a string", value)),
        },
        Encoding::Timestamp => {
            let raw = value.as_str().ok_or_else(|| unexpected("a timestamp", value))?;
            timestamp::normalize(raw)
                .map(SqlValue::Text)
                .ok_or_else(|| ParseError::Timestamp {
                    entity: table.entity,
                    field: column.field,
                    value: raw.to_string(),
                })
        }
        Encoding::Reference { .. } => match value {
            Value::Object(nested) => match nested.get("id") {
                None | Some(Value::Null) => Ok(SqlValue::Null),
                Some(id) => id
                    .as_i64()
                    .map(SqlValue::Int)
                    .ok_or_else(|| unexpected("an integer id", id)),
            },
            _ => Err(unexpected("an object", value)),
        },
        Encoding::Opaque => Ok(SqlValue::Text(OpaqueValue::encode(Some(value)).into_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cratejoy::{ORDERS, SUBSCRIPTION_FEED};
    use crate::testutils::{order_json, subscription_json};
    use serde_json::json;

    #[test]
    fn test_subscription_rows_in_dependency_order() {
        let decomposed = decompose(&SUBSCRIPTION_FEED, &subscription_json(7)).unwrap();
        let entities: Vec<_> = decomposed.rows().map(|row| row.entity).collect();
        assert_eq!(
            entities,
            vec![
                "address",
                "billing",
                "customer",
                "product",
                "product_instance",
                "term",
                "subscription"
            ]
        );
    }

    #[test]
    fn test_subscription_references_nested_keys() {
        let decomposed = decompose(&SUBSCRIPTION_FEED, &subscription_json(7)).unwrap();
        let top = &decomposed.top;
        assert_eq!(top.key, NaturalKey::Int(7));
        assert_eq!(top.get("address_id"), Some(&SqlValue::Int(1007)));
        assert_eq!(top.get("term_id"), Some(&SqlValue::Int(6007)));
        assert_eq!(
            top.get("start_date"),
            Some(&SqlValue::Text("2024-03-05 10:15:00".into()))
        );
        // end_date is null in the fixture
        assert_eq!(top.get("end_date"), Some(&SqlValue::Null));
    }

    #[test]
    fn test_opaque_fields_are_encoded() {
        let decomposed = decompose(&SUBSCRIPTION_FEED, &subscription_json(7)).unwrap();
        let billing = decomposed.dependents[1].as_ref().unwrap();
        assert_eq!(
            billing.get("rebill_weeks"),
            Some(&SqlValue::Text("[1,3]".into()))
        );
        let term = decomposed.dependents[5].as_ref().unwrap();
        let images = match term.get("images") {
            Some(SqlValue::Text(encoded)) => OpaqueValue::from(encoded.clone()),
            other => panic!("unexpected images value {other:?}"),
        };
        assert_eq!(
            images.decode().unwrap(),
            json!([{"id": 1, "subscription_type_term_id": 6007, "type": "main", "url": "https://img/1.png"}])
        );
        // credit is absent from the fixture
        assert_eq!(
            decomposed.top.get("credit"),
            Some(&SqlValue::Text("null".into()))
        );
    }

    #[test]
    fn test_renamed_column() {
        let decomposed = decompose(&SUBSCRIPTION_FEED, &subscription_json(7)).unwrap();
        let address = decomposed.dependents[0].as_ref().unwrap();
        assert_eq!(
            address.get("to_name"),
            Some(&SqlValue::Text("Ada Lovelace".into()))
        );
    }

    #[test]
    fn test_malformed_date_fails_record() {
        let mut record = subscription_json(7);
        record["start_date"] = json!("not-a-date");
        let err = decompose(&SUBSCRIPTION_FEED, &record).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Timestamp {
                entity: "subscription",
                field: "start_date",
                ..
            }
        ));
    }

    #[test]
    fn test_missing_nested_object_leaves_reference_null() {
        let mut record = subscription_json(7);
        record["address"] = Value::Null;
        let decomposed = decompose(&SUBSCRIPTION_FEED, &record).unwrap();
        assert!(decomposed.dependents[0].is_none());
        assert_eq!(decomposed.top.get("address_id"), Some(&SqlValue::Null));
        assert_eq!(decomposed.rows().count(), 6);
    }

    #[test]
    fn test_nested_object_without_id() {
        let mut record = subscription_json(7);
        record["customer"].as_object_mut().unwrap().remove("id");
        let err = decompose(&SUBSCRIPTION_FEED, &record).unwrap_err();
        assert!(matches!(
            err,
            ParseError::MissingKey {
                entity: "customer",
                ..
            }
        ));
    }

    #[test]
    fn test_wrong_type_is_rejected() {
        let mut record = subscription_json(7);
        record["store_id"] = json!("seven");
        let err = decompose(&SUBSCRIPTION_FEED, &record).unwrap_err();
        assert!(matches!(
            err,
            ParseError::UnexpectedType {
                field: "store_id",
                ..
            }
        ));
    }

    #[test]
    fn test_not_an_object() {
        let err = decompose(&SUBSCRIPTION_FEED, &json!([1, 2])).unwrap_err();
        assert!(matches!(err, ParseError::NotAnObject { .. }));
    }

    #[test]
    fn test_order_row() {
        let row = flatten(&ORDERS, &order_json(42, "2024-03-05T10:15:00Z")).unwrap();
        assert_eq!(row.key, NaturalKey::Int(42));
        assert_eq!(
            row.get("placed_at"),
            Some(&SqlValue::Text("2024-03-05 10:15:00".into()))
        );
        assert_eq!(row.get("total"), Some(&SqlValue::Float(25.5)));
        assert_eq!(row.get("is_gift"), Some(&SqlValue::Bool(false)));
        assert_eq!(
            row.get("order_gift_info"),
            Some(&SqlValue::Text(r#"{"from":"Bob"}"#.into()))
        );
    }
}
