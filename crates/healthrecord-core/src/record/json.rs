//! Conversion between JSON values and automerge objects
//!
//! Records in the ordered sequences carry arbitrary JSON. Objects become
//! maps, arrays become lists, everything else a scalar.

use automerge::transaction::Transactable;
use automerge::{AutoCommit, ObjId, ObjType, ReadDoc, ScalarValue, Value as AmValue};
use serde_json::{Map, Number, Value};

use crate::error::RecordResult;

fn scalar(value: &Value) -> ScalarValue {
    match value {
        Value::Null => ScalarValue::Null,
        Value::Bool(b) => ScalarValue::Boolean(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                ScalarValue::Int(i)
            } else if let Some(u) = n.as_u64() {
                ScalarValue::Uint(u)
            } else {
                ScalarValue::F64(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => ScalarValue::Str(s.as_str().into()),
        // Containers are written as objects by the callers below
        Value::Array(_) | Value::Object(_) => ScalarValue::Null,
    }
}

/// Write `value` under `key` of the map `obj`
pub(crate) fn put_in_map(
    doc: &mut AutoCommit,
    obj: &ObjId,
    key: &str,
    value: &Value,
) -> RecordResult<()> {
    match value {
        Value::Object(fields) => {
            let child = doc.put_object(obj, key, ObjType::Map)?;
            fill_map(doc, &child, fields)?;
        }
        Value::Array(items) => {
            let child = doc.put_object(obj, key, ObjType::List)?;
            fill_list(doc, &child, items)?;
        }
        other => doc.put(obj, key, scalar(other))?,
    }
    Ok(())
}

/// Insert `value` at `index` of the list `obj`
pub(crate) fn insert_in_list(
    doc: &mut AutoCommit,
    obj: &ObjId,
    index: usize,
    value: &Value,
) -> RecordResult<()> {
    match value {
        Value::Object(fields) => {
            let child = doc.insert_object(obj, index, ObjType::Map)?;
            fill_map(doc, &child, fields)?;
        }
        Value::Array(items) => {
            let child = doc.insert_object(obj, index, ObjType::List)?;
            fill_list(doc, &child, items)?;
        }
        other => doc.insert(obj, index, scalar(other))?,
    }
    Ok(())
}

fn fill_map(doc: &mut AutoCommit, obj: &ObjId, fields: &Map<String, Value>) -> RecordResult<()> {
    for (key, value) in fields {
        put_in_map(doc, obj, key, value)?;
    }
    Ok(())
}

fn fill_list(doc: &mut AutoCommit, obj: &ObjId, items: &[Value]) -> RecordResult<()> {
    for (index, value) in items.iter().enumerate() {
        insert_in_list(doc, obj, index, value)?;
    }
    Ok(())
}

fn scalar_to_json(value: &ScalarValue) -> Value {
    match value {
        ScalarValue::Null => Value::Null,
        ScalarValue::Boolean(b) => Value::Bool(*b),
        ScalarValue::Int(i) => Value::from(*i),
        ScalarValue::Uint(u) => Value::from(*u),
        ScalarValue::F64(f) => Number::from_f64(*f).map(Value::Number).unwrap_or(Value::Null),
        ScalarValue::Str(s) => Value::String(s.to_string()),
        ScalarValue::Timestamp(t) => Value::from(*t),
        other => Value::String(other.to_string()),
    }
}

/// Read an automerge value (scalar or object) back as JSON
pub(crate) fn read_value(doc: &AutoCommit, value: AmValue<'_>, id: &ObjId) -> RecordResult<Value> {
    match value {
        AmValue::Scalar(s) => Ok(scalar_to_json(&s)),
        AmValue::Object(ObjType::Map) | AmValue::Object(ObjType::Table) => {
            let mut fields = Map::new();
            for key in doc.keys(id) {
                if let Some((child, child_id)) = doc.get(id, key.as_str())? {
                    fields.insert(key, read_value(doc, child, &child_id)?);
                }
            }
            Ok(Value::Object(fields))
        }
        AmValue::Object(ObjType::List) => {
            let mut items = Vec::new();
            for index in 0..doc.length(id) {
                if let Some((child, child_id)) = doc.get(id, index)? {
                    items.push(read_value(doc, child, &child_id)?);
                }
            }
            Ok(Value::Array(items))
        }
        AmValue::Object(ObjType::Text) => Ok(Value::String(doc.text(id)?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use automerge::ROOT;
    use serde_json::json;

    fn roundtrip(value: Value) -> Value {
        let mut doc = AutoCommit::new();
        put_in_map(&mut doc, &ROOT, "v", &value).unwrap();
        let (am, id) = doc.get(ROOT, "v").unwrap().unwrap();
        read_value(&doc, am, &id).unwrap()
    }

    #[test]
    fn test_nested_record_survives() {
        let vital = json!({
            "id": "v-1",
            "type": "heartRate",
            "value": 72,
            "ratio": 0.5,
            "tags": ["resting", "morning"],
            "note": null,
            "flagged": false,
            "source": { "device": "watch" }
        });
        assert_eq!(roundtrip(vital.clone()), vital);
    }

    #[test]
    fn test_list_insert_preserves_order() {
        let mut doc = AutoCommit::new();
        let list = doc.put_object(ROOT, "people", ObjType::List).unwrap();
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            insert_in_list(&mut doc, &list, i, &json!({ "name": name })).unwrap();
        }
        let (am, id) = doc.get(ROOT, "people").unwrap().unwrap();
        assert_eq!(
            read_value(&doc, am, &id).unwrap(),
            json!([{ "name": "a" }, { "name": "b" }, { "name": "c" }])
        );
    }
}
