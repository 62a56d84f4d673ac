//! Inheritance strategies and the table writes they imply.
//!
//! A class hierarchy maps to tables in one of three ways:
//!
//! - `SINGLE`: one shared table, rows tagged by a discriminator column.
//! - `CLASS`: one table per class holding only locally declared columns,
//!   joined to the parent table on the primary key.
//! - `CONCRETE`: one table per class duplicating every inherited column.
//!
//! The functions here translate an entity's attribute values into the
//! per-table writes its strategy requires. They are pure: the session
//! executes the writes and feeds generated keys back in.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{ConfigError, Error};
use crate::mapper::Mapper;
use crate::registry::SchemaRegistry;
use crate::value::Value;

/// How a class hierarchy is laid out in tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum InheritanceStrategy {
    /// All classes share the root's table.
    Single,
    /// Joined tables, one per class.
    #[default]
    Class,
    /// Independent tables with duplicated columns.
    Concrete,
}

impl InheritanceStrategy {
    pub const fn as_str(&self) -> &'static str {
        match self {
            InheritanceStrategy::Single => "single",
            InheritanceStrategy::Class => "class",
            InheritanceStrategy::Concrete => "concrete",
        }
    }
}

impl fmt::Display for InheritanceStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InheritanceStrategy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "single" => Ok(InheritanceStrategy::Single),
            "class" | "joined" => Ok(InheritanceStrategy::Class),
            "concrete" => Ok(InheritanceStrategy::Concrete),
            _ => Err(Error::Config(ConfigError::new(format!(
                "invalid inheritance strategy '{}', expected one of single, class, concrete",
                s
            )))),
        }
    }
}

/// One statement's worth of column values for one table.
#[derive(Debug, Clone, PartialEq)]
pub struct TableWrite {
    pub table: String,
    /// Key column of `table` (primary key, or the parent link for CLASS children).
    pub key_column: String,
    pub values: Vec<(String, Value)>,
    /// The key column must be filled with the key generated by the first write.
    pub key_from_parent: bool,
}

/// Writes needed to insert an entity of class `mapper`, parent tables first.
pub fn plan_insert(
    registry: &SchemaRegistry,
    mapper: &Mapper,
    values: &BTreeMap<String, Value>,
) -> Vec<TableWrite> {
    let pk = values
        .get(mapper.primary_key())
        .filter(|v| !v.is_null())
        .cloned();

    match mapper.strategy() {
        InheritanceStrategy::Single => {
            let mut row = Vec::with_capacity(mapper.columns().len());
            for col in mapper.columns() {
                if Some(col.name.as_str()) == mapper.discriminator_column() {
                    if let Some(tag) = mapper.discriminator_value() {
                        row.push((col.name.clone(), Value::Text(tag.to_string())));
                    }
                    continue;
                }
                if let Some(v) = col.insert_value(values.get(&col.name)) {
                    row.push((col.name.clone(), v));
                }
            }
            vec![TableWrite {
                table: mapper.table_name().to_string(),
                key_column: mapper.key_column().to_string(),
                values: row,
                key_from_parent: false,
            }]
        }
        InheritanceStrategy::Class => registry
            .lineage(mapper.id())
            .into_iter()
            .map(|class| {
                let class = registry.mapper(class);
                let is_root = class.parent().is_none();
                let mut row = Vec::with_capacity(class.local_columns().len());
                for col in class.local_columns() {
                    if !is_root && col.name == class.key_column() {
                        if let Some(pk) = &pk {
                            row.push((col.name.clone(), pk.clone()));
                        }
                        continue;
                    }
                    if let Some(v) = col.insert_value(values.get(&col.name)) {
                        row.push((col.name.clone(), v));
                    }
                }
                TableWrite {
                    table: class.table_name().to_string(),
                    key_column: class.key_column().to_string(),
                    values: row,
                    key_from_parent: !is_root && pk.is_none(),
                }
            })
            .collect(),
        InheritanceStrategy::Concrete => {
            let row = mapper
                .columns()
                .iter()
                .filter_map(|col| {
                    col.insert_value(values.get(&col.name))
                        .map(|v| (col.name.clone(), v))
                })
                .collect();
            vec![TableWrite {
                table: mapper.table_name().to_string(),
                key_column: mapper.key_column().to_string(),
                values: row,
                key_from_parent: false,
            }]
        }
    }
}

/// Writes needed to apply `changed` column values, grouped by table.
///
/// Tables with nothing to change are left out; an empty result means no
/// UPDATE is needed.
pub fn plan_update(
    registry: &SchemaRegistry,
    mapper: &Mapper,
    changed: &[(String, Value)],
) -> Vec<TableWrite> {
    if changed.is_empty() {
        return Vec::new();
    }
    match mapper.strategy() {
        InheritanceStrategy::Class => registry
            .lineage(mapper.id())
            .into_iter()
            .filter_map(|class| {
                let class = registry.mapper(class);
                let values: Vec<(String, Value)> = changed
                    .iter()
                    .filter(|(name, _)| {
                        name != class.key_column() && class.has_local_column(name)
                    })
                    .cloned()
                    .collect();
                (!values.is_empty()).then(|| TableWrite {
                    table: class.table_name().to_string(),
                    key_column: class.key_column().to_string(),
                    values,
                    key_from_parent: false,
                })
            })
            .collect(),
        InheritanceStrategy::Single | InheritanceStrategy::Concrete => vec![TableWrite {
            table: mapper.table_name().to_string(),
            key_column: mapper.key_column().to_string(),
            values: changed.to_vec(),
            key_from_parent: false,
        }],
    }
}

/// `(table, key column)` pairs to delete from, child tables first.
pub fn plan_delete(registry: &SchemaRegistry, mapper: &Mapper) -> Vec<(String, String)> {
    match mapper.strategy() {
        InheritanceStrategy::Class => registry
            .lineage(mapper.id())
            .into_iter()
            .rev()
            .map(|class| {
                let class = registry.mapper(class);
                (
                    class.table_name().to_string(),
                    class.key_column().to_string(),
                )
            })
            .collect(),
        InheritanceStrategy::Single | InheritanceStrategy::Concrete => vec![(
            mapper.table_name().to_string(),
            mapper.key_column().to_string(),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field::ColumnDef;
    use crate::registry::EntityClass;
    use crate::relationship::Relationship;

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!(
            "SINGLE".parse::<InheritanceStrategy>().unwrap(),
            InheritanceStrategy::Single
        );
        assert_eq!(
            "concrete".parse::<InheritanceStrategy>().unwrap(),
            InheritanceStrategy::Concrete
        );
        let err = "table-per-thing".parse::<InheritanceStrategy>().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_single_insert_writes_discriminator() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                EntityClass::new("Employee")
                    .table("employees")
                    .inheritance("single")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name")),
            )
            .unwrap();
        builder
            .register(
                EntityClass::new("Engineer")
                    .inherits("Employee")
                    .column(ColumnDef::text("language")),
            )
            .unwrap();
        let registry = builder.finalize().unwrap();
        let engineer = registry.by_name("Engineer").unwrap();

        let writes = plan_insert(
            &registry,
            engineer,
            &values(&[("name", Value::from("Ada")), ("language", Value::from("rust"))]),
        );
        assert_eq!(writes.len(), 1);
        assert_eq!(writes[0].table, "employees");
        assert_eq!(
            writes[0].values,
            vec![
                ("name".to_string(), Value::from("Ada")),
                ("type".to_string(), Value::from("Engineer")),
                ("language".to_string(), Value::from("rust")),
            ]
        );
    }

    #[test]
    fn test_class_insert_update_delete() {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                EntityClass::new("Animal")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name")),
            )
            .unwrap();
        builder
            .register(
                EntityClass::new("Dog")
                    .inherits("Animal")
                    .column(ColumnDef::text("breed"))
                    .relationship("animal", Relationship::one_to_one("Animal")),
            )
            .unwrap();
        let registry = builder.finalize().unwrap();
        let dog = registry.by_name("Dog").unwrap();

        let writes = plan_insert(
            &registry,
            dog,
            &values(&[("name", Value::from("Rex")), ("breed", Value::from("lab"))]),
        );
        assert_eq!(writes.len(), 2);
        assert_eq!(writes[0].table, "animals");
        assert_eq!(writes[0].values, vec![("name".to_string(), Value::from("Rex"))]);
        assert!(!writes[0].key_from_parent);
        assert_eq!(writes[1].table, "dogs");
        assert_eq!(writes[1].key_column, "id");
        assert_eq!(writes[1].values, vec![("breed".to_string(), Value::from("lab"))]);
        assert!(writes[1].key_from_parent);

        let updates = plan_update(
            &registry,
            dog,
            &[("breed".to_string(), Value::from("pug"))],
        );
        assert_eq!(updates.len(), 1);
        assert_eq!(updates[0].table, "dogs");

        assert!(plan_update(&registry, dog, &[]).is_empty());

        let deletes = plan_delete(&registry, dog);
        assert_eq!(
            deletes,
            vec![
                ("dogs".to_string(), "id".to_string()),
                ("animals".to_string(), "id".to_string()),
            ]
        );
    }
}
