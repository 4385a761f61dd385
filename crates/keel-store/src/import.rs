//! JSON import and reference resolution.
//!
//! Every import runs in one transaction: either all records of the batch are
//! written or, on the first construction failure, none are. Imports nested
//! in an open transaction write inline and leave commit and cancel to the
//! outer write.

use keel_table::ObjectTable;
use keel_types::{json_kind, ConstructError, Entity, FieldMap, Record, RecordKey, TypeError, TypeTag, Value};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};
use crate::store::Store;

impl Store {
    /// Import one object as an `E`.
    pub fn import<E: Entity>(&self, raw: &Value) -> StoreResult<E> {
        let fields = object(raw)?.clone();
        let mut imported = self.import_entities::<E>(vec![fields])?;
        imported
            .pop()
            .ok_or_else(|| StoreError::Type(TypeError::Decode {
                type_tag: E::TYPE.to_string(),
                message: "import produced no record".into(),
            }))
    }

    /// Import an array of objects. All or nothing.
    pub fn import_all<E: Entity>(&self, raw: &Value) -> StoreResult<Vec<E>> {
        let items = array(raw)?
            .iter()
            .map(|item| object(item).cloned())
            .collect::<StoreResult<Vec<_>>>()?;
        self.import_entities::<E>(items)
    }

    /// Import an object of objects; each outer key is injected into its
    /// object under `key_field`. `null` imports nothing.
    pub fn import_keyed<E: Entity>(&self, raw: &Value, key_field: &str) -> StoreResult<Vec<E>> {
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let mut items = Vec::new();
        for (key, value) in object(raw)? {
            let mut fields = object(value)?.clone();
            fields.insert(key_field.to_string(), Value::String(key.clone()));
            items.push(fields);
        }
        self.import_entities::<E>(items)
    }

    /// Import an object of arrays of objects; each element gets its group
    /// key under `group_field`. `null` imports nothing.
    pub fn import_grouped<E: Entity>(&self, raw: &Value, group_field: &str) -> StoreResult<Vec<E>> {
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let mut items = Vec::new();
        for (group, members) in object(raw)? {
            for member in array(members)? {
                let mut fields = object(member)?.clone();
                fields.insert(group_field.to_string(), Value::String(group.clone()));
                items.push(fields);
            }
        }
        self.import_entities::<E>(items)
    }

    /// Import each `(key, value)` pair of an object as
    /// `{key_field: key, value_field: value}`. `null` imports nothing.
    pub fn import_entries<E: Entity>(
        &self,
        raw: &Value,
        key_field: &str,
        value_field: &str,
    ) -> StoreResult<Vec<E>> {
        if raw.is_null() {
            return Ok(Vec::new());
        }
        let items = object(raw)?
            .iter()
            .map(|(key, value)| {
                let mut fields = FieldMap::new();
                fields.insert(key_field.to_string(), Value::String(key.clone()));
                fields.insert(value_field.to_string(), value.clone());
                fields
            })
            .collect();
        self.import_entities::<E>(items)
    }

    /// Import one object or an array of objects with a caller-supplied
    /// constructor.
    pub fn import_with<F>(&self, type_tag: &TypeTag, raw: &Value, construct: F) -> StoreResult<Vec<Record>>
    where
        F: Fn(FieldMap) -> Result<Record, ConstructError>,
    {
        let items = match raw {
            Value::Array(values) => values
                .iter()
                .map(|item| object(item).cloned())
                .collect::<StoreResult<Vec<_>>>()?,
            other => vec![object(other)?.clone()],
        };
        self.import_batch(type_tag, items, |fields| {
            let record = construct(fields).map_err(|source| construction(type_tag, source))?;
            if &record.type_tag != type_tag {
                return Err(StoreError::Type(TypeError::TypeMismatch {
                    expected: type_tag.to_string(),
                    found: record.type_tag.to_string(),
                }));
            }
            Ok((record.clone(), record))
        })
    }

    /// Look up an array of primary keys, skipping nulls and unknown keys.
    pub fn resolve<E: Entity>(&self, ids: &Value) -> StoreResult<Vec<E>> {
        if ids.is_null() {
            return Ok(Vec::new());
        }
        let keys = array(ids)?
            .iter()
            .filter(|id| !id.is_null())
            .map(RecordKey::from_value)
            .collect::<Result<Vec<_>, _>>()?;

        self.read(|view| -> StoreResult<Vec<E>> {
            let mut found = Vec::with_capacity(keys.len());
            for key in keys {
                if let Some(entity) = view.get_entity::<E>(key)? {
                    found.push(entity);
                }
            }
            Ok(found)
        })
    }

    /// Look up a single primary key; `null` resolves to `None`.
    pub fn resolve_one<E: Entity>(&self, id: &Value) -> StoreResult<Option<E>> {
        if id.is_null() {
            return Ok(None);
        }
        let key = RecordKey::from_value(id)?;
        self.get_entity::<E>(key)
    }

    fn import_entities<E: Entity>(&self, items: Vec<FieldMap>) -> StoreResult<Vec<E>> {
        let type_tag = E::type_tag();
        self.import_batch(&type_tag, items, |fields| {
            let parsed = E::from_fields(fields).and_then(|entity| Ok((entity.to_record()?, entity)));
            parsed.map_err(|e| construction(&type_tag, e.into()))
        })
    }

    /// Construct and put every item in one transaction.
    fn import_batch<T, F>(&self, type_tag: &TypeTag, items: Vec<FieldMap>, construct: F) -> StoreResult<Vec<T>>
    where
        F: Fn(FieldMap) -> StoreResult<(Record, T)>,
    {
        let manager = self.manager();
        let session = manager.session();
        let nested = session.is_open();
        let txn = session.begin();

        let mut imported = Vec::with_capacity(items.len());
        for fields in items {
            let failure = match construct(fields) {
                Ok((record, value)) => match manager.put(record) {
                    Ok(_) => {
                        imported.push(value);
                        continue;
                    }
                    Err(e) => StoreError::from(e),
                },
                Err(e) => {
                    warn!(
                        %txn,
                        type_tag = %type_tag,
                        category = e.category(),
                        error = %e,
                        "record construction failed"
                    );
                    e
                }
            };

            if !nested {
                if let Err(e) = session.cancel() {
                    warn!(%txn, error = %e, "cancel after failed import failed");
                }
            }
            return Err(failure);
        }

        if !nested {
            self.clean_up_before_commit();
            if let Err(e) = session.commit() {
                debug!(%txn, error = %e, "import commit failed; records stay applied");
            }
        }
        debug!(%txn, type_tag = %type_tag, count = imported.len(), nested, "imported records");
        Ok(imported)
    }
}

fn object(value: &Value) -> StoreResult<&FieldMap> {
    value.as_object().ok_or_else(|| mismatch("object", value))
}

fn array(value: &Value) -> StoreResult<&Vec<Value>> {
    value
        .as_array()
        .ok_or_else(|| StoreError::Type(TypeError::NotAnArray(json_kind(value).to_string())))
}

fn construction(type_tag: &TypeTag, source: ConstructError) -> StoreError {
    StoreError::Construction {
        type_tag: type_tag.to_string(),
        source,
    }
}

fn mismatch(expected: &str, found: &Value) -> StoreError {
    StoreError::Type(TypeError::TypeMismatch {
        expected: expected.to_string(),
        found: json_kind(found).to_string(),
    })
}
