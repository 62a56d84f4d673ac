//! Polymorphic SELECT planning.
//!
//! A [`Select`] names a class plus filters, joins, ordering and paging.
//! [`Select::build`] turns it into a [`SelectPlan`]: the statement to run and
//! a [`HydrationLayout`] describing how each result row maps back to a
//! concrete class and its attribute values.
//!
//! The statement shape depends on the hierarchy's strategy:
//!
//! - SINGLE: one table, restricted by discriminator when querying a subclass.
//! - CLASS: the ancestor tables inner-joined, every descendant table
//!   left-joined; the first non-null child key picks the subclass.
//! - CONCRETE: a plain select for a leaf, or a `UNION ALL` over every
//!   non-abstract table of the hierarchy with a bound type tag per branch.
//!
//! Every selected column is aliased `table#column`.

use std::collections::{BTreeMap, HashMap};

use miniorm_core::{
    AssociationTable, ClassId, Error, InheritanceStrategy, Mapper, Result, Row, SchemaRegistry,
    Statement, Value, column_alias, quote_ident, quote_qualified,
};

use crate::clause::OrderBy;
use crate::expr::Expr;

/// Column carrying the class tag of each `UNION ALL` branch.
pub const TYPE_TAG_COLUMN: &str = "_concrete_type";

/// Alias of the `UNION ALL` subquery.
const UNION_ALIAS: &str = "poly";

#[derive(Debug, Clone)]
enum JoinTarget {
    Relationship(String),
    Through {
        association: AssociationTable,
        owner_key: Value,
    },
}

/// A SELECT query for one entity class and its subclasses.
#[derive(Debug, Clone)]
pub struct Select {
    class: ClassId,
    filter: Option<Expr>,
    joins: Vec<JoinTarget>,
    order_by: Vec<OrderBy>,
    limit: Option<u64>,
    offset: Option<u64>,
}

/// How result rows are turned back into entities.
#[derive(Debug, Clone)]
pub struct HydrationLayout {
    base: ClassId,
    detection: Detection,
    columns: HashMap<ClassId, Vec<(String, String)>>,
}

#[derive(Debug, Clone)]
enum Detection {
    Fixed,
    Discriminator {
        alias: String,
        map: Vec<(String, ClassId)>,
    },
    JoinedChildren {
        keys: HashMap<ClassId, String>,
    },
    TypeTag {
        alias: String,
        map: Vec<(String, ClassId)>,
    },
}

/// Output of [`Select::build`].
#[derive(Debug, Clone)]
pub struct SelectPlan {
    /// `None` when no table of the hierarchy can hold rows (abstract only).
    pub statement: Option<Statement>,
    pub layout: HydrationLayout,
}

/// A table visible to column resolution.
#[derive(Debug)]
struct Scope {
    alias: String,
    table: String,
    columns: Vec<String>,
}

/// Pieces shared by every strategy once the FROM clause is known.
struct Shape {
    select_list: Vec<String>,
    from: String,
    scopes: Vec<Scope>,
    key: (String, String),
    conditions: Vec<String>,
    layout: HydrationLayout,
    allow_joins: bool,
}

impl Select {
    /// Create a new SELECT for a class.
    pub fn new(class: ClassId) -> Self {
        Self {
            class,
            filter: None,
            joins: Vec::new(),
            order_by: Vec::new(),
            limit: None,
            offset: None,
        }
    }

    pub fn class(&self) -> ClassId {
        self.class
    }

    /// Add a WHERE condition, ANDed with any existing one.
    pub fn filter(mut self, expr: Expr) -> Self {
        self.filter = Some(match self.filter.take() {
            Some(existing) => existing.and(expr),
            None => expr,
        });
        self
    }

    /// Inner-join the target of a relationship, making its columns
    /// available to qualified filters.
    pub fn join(mut self, relationship: impl Into<String>) -> Self {
        self.joins.push(JoinTarget::Relationship(relationship.into()));
        self
    }

    /// Restrict to rows linked to `owner_key` through a many-to-many
    /// association table (seen from the owner's side).
    pub fn through(mut self, association: AssociationTable, owner_key: impl Into<Value>) -> Self {
        self.joins.push(JoinTarget::Through {
            association,
            owner_key: owner_key.into(),
        });
        self
    }

    /// Add ORDER BY clause.
    pub fn order_by(mut self, order: OrderBy) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set LIMIT.
    pub fn limit(mut self, n: u64) -> Self {
        self.limit = Some(n);
        self
    }

    /// Set OFFSET.
    pub fn offset(mut self, n: u64) -> Self {
        self.offset = Some(n);
        self
    }

    /// Plan the statement for this query.
    pub fn build(&self, registry: &SchemaRegistry) -> Result<SelectPlan> {
        let mapper = registry.mapper(self.class);
        let mut params = Vec::new();
        let shape = match mapper.strategy() {
            InheritanceStrategy::Single => single_table(registry, mapper, &mut params)?,
            InheritanceStrategy::Class => joined_tables(registry, mapper)?,
            InheritanceStrategy::Concrete => {
                let descendants = registry.descendants(mapper.id());
                if descendants.is_empty() {
                    if mapper.is_abstract() {
                        return Ok(empty_plan(mapper));
                    }
                    concrete_table(mapper)?
                } else {
                    match concrete_union(registry, mapper, &descendants, &mut params)? {
                        Some(shape) => shape,
                        None => return Ok(empty_plan(mapper)),
                    }
                }
            }
        };
        let plan = self.finish(registry, mapper, shape, params)?;
        if let Some(stmt) = &plan.statement {
            tracing::trace!(class = mapper.name(), sql = %stmt.sql, "Planned select");
        }
        Ok(plan)
    }

    fn finish(
        &self,
        registry: &SchemaRegistry,
        mapper: &Mapper,
        mut shape: Shape,
        mut params: Vec<Value>,
    ) -> Result<SelectPlan> {
        if !self.joins.is_empty() && !shape.allow_joins {
            return Err(Error::Custom(format!(
                "joins are not supported on polymorphic queries of CONCRETE class {}",
                mapper.name()
            )));
        }

        let (key_table, key_column) = shape.key.clone();
        let base_key = quote_qualified(&key_table, &key_column)?;
        let mut join_sql = String::new();
        let mut link_conditions: Vec<(String, Value)> = Vec::new();

        for (i, join) in self.joins.iter().enumerate() {
            match join {
                JoinTarget::Relationship(name) => {
                    let rel = mapper.relationship(name).ok_or_else(|| Error::UnknownRelationship {
                        class: mapper.name().to_string(),
                        relationship: name.clone(),
                    })?;
                    let target = registry.mapper(rel.target);

                    if let Some(assoc) = &rel.association {
                        let assoc_alias = format!("assoc_{i}");
                        let alias = unique_alias(&shape.scopes, target.table_name(), i);
                        join_sql.push_str(&format!(
                            " JOIN {} AS {} ON {} = {}",
                            quote_ident(&assoc.name)?,
                            quote_ident(&assoc_alias)?,
                            quote_qualified(&assoc_alias, &assoc.local_key)?,
                            base_key
                        ));
                        join_sql.push_str(&join_table(target.table_name(), &alias)?);
                        join_sql.push_str(&format!(
                            " ON {} = {}",
                            quote_qualified(&alias, target.key_column())?,
                            quote_qualified(&assoc_alias, &assoc.remote_key)?
                        ));
                        shape.scopes.push(scope_for(target, alias));
                    } else {
                        let fk = rel.foreign_key.as_deref().ok_or_else(|| {
                            Error::Custom(format!("relationship '{}' has no foreign key", rel.name))
                        })?;
                        if rel.owning {
                            let holder = shape
                                .scopes
                                .iter()
                                .find(|s| s.columns.iter().any(|c| c == fk))
                                .ok_or_else(|| Error::UnknownColumn {
                                    class: mapper.name().to_string(),
                                    column: fk.to_string(),
                                })?;
                            let fk_ref = quote_qualified(&holder.alias, fk)?;
                            let alias = unique_alias(&shape.scopes, target.table_name(), i);
                            join_sql.push_str(&join_table(target.table_name(), &alias)?);
                            join_sql.push_str(&format!(
                                " ON {} = {}",
                                quote_qualified(&alias, target.key_column())?,
                                fk_ref
                            ));
                            shape.scopes.push(scope_for(target, alias));
                        } else {
                            let holder = registry
                                .lineage(target.id())
                                .into_iter()
                                .rev()
                                .map(|c| registry.mapper(c))
                                .find(|m| m.has_local_column(fk))
                                .ok_or_else(|| Error::UnknownColumn {
                                    class: target.name().to_string(),
                                    column: fk.to_string(),
                                })?;
                            let alias = unique_alias(&shape.scopes, holder.table_name(), i);
                            join_sql.push_str(&join_table(holder.table_name(), &alias)?);
                            join_sql.push_str(&format!(
                                " ON {} = {}",
                                quote_qualified(&alias, fk)?,
                                base_key
                            ));
                            shape.scopes.push(scope_for(holder, alias));
                        }
                    }
                }
                JoinTarget::Through {
                    association,
                    owner_key,
                } => {
                    let alias = format!("link_{i}");
                    join_sql.push_str(&format!(
                        " JOIN {} AS {} ON {} = {}",
                        quote_ident(&association.name)?,
                        quote_ident(&alias)?,
                        quote_qualified(&alias, &association.remote_key)?,
                        base_key
                    ));
                    link_conditions.push((
                        quote_qualified(&alias, &association.local_key)?,
                        owner_key.clone(),
                    ));
                }
            }
        }

        let scopes = &shape.scopes;
        let class_name = mapper.name();
        let resolve = |table: Option<&str>, name: &str| resolve_column(scopes, class_name, table, name);

        // Discriminator conditions were bound while shaping; link and filter
        // parameters follow in textual order.
        let mut conditions = std::mem::take(&mut shape.conditions);
        for (column, key) in link_conditions {
            conditions.push(format!("{column} = ?"));
            params.push(key);
        }
        if let Some(filter) = &self.filter {
            conditions.push(filter.build_with(&resolve, &mut params)?);
        }

        let mut sql = format!(
            "SELECT {} FROM {}{}",
            shape.select_list.join(", "),
            shape.from,
            join_sql
        );
        if !conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            let orders = self
                .order_by
                .iter()
                .map(|o| o.build_with(&resolve, &mut params))
                .collect::<Result<Vec<_>>>()?;
            sql.push_str(" ORDER BY ");
            sql.push_str(&orders.join(", "));
        }
        match (self.limit, self.offset) {
            (Some(limit), offset) => {
                sql.push_str(" LIMIT ?");
                params.push(Value::BigInt(to_i64(limit)));
                if let Some(offset) = offset {
                    sql.push_str(" OFFSET ?");
                    params.push(Value::BigInt(to_i64(offset)));
                }
            }
            (None, Some(offset)) => {
                sql.push_str(" LIMIT ? OFFSET ?");
                params.push(Value::BigInt(-1));
                params.push(Value::BigInt(to_i64(offset)));
            }
            (None, None) => {}
        }

        Ok(SelectPlan {
            statement: Some(Statement::new(sql, params)),
            layout: shape.layout,
        })
    }
}

impl HydrationLayout {
    /// The queried class.
    pub fn base(&self) -> ClassId {
        self.base
    }

    /// Concrete class a row represents.
    pub fn resolve_class(&self, registry: &SchemaRegistry, row: &Row) -> ClassId {
        match &self.detection {
            Detection::Fixed => self.base,
            Detection::Discriminator { alias, map } | Detection::TypeTag { alias, map } => {
                let tag = row.get_by_name(alias).and_then(Value::as_str);
                let class = tag
                    .and_then(|t| map.iter().find(|(k, _)| k == t))
                    .map(|(_, class)| *class)
                    .filter(|class| self.columns.contains_key(class));
                if class.is_none() {
                    tracing::debug!(tag = ?tag, "Unrecognised type tag, hydrating as queried class");
                }
                class.unwrap_or(self.base)
            }
            Detection::JoinedChildren { keys } => {
                let mut current = self.base;
                'descend: loop {
                    for child in registry.mapper(current).children() {
                        let present = keys
                            .get(child)
                            .and_then(|alias| row.get_by_name(alias))
                            .is_some_and(|v| !v.is_null());
                        if present {
                            current = *child;
                            continue 'descend;
                        }
                    }
                    break current;
                }
            }
        }
    }

    /// Attribute values of `class` read from `row`.
    pub fn values(&self, class: ClassId, row: &Row) -> BTreeMap<String, Value> {
        self.columns
            .get(&class)
            .or_else(|| self.columns.get(&self.base))
            .map(|cols| {
                cols.iter()
                    .map(|(name, alias)| (name.clone(), row.value_or_null(alias)))
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn empty_plan(mapper: &Mapper) -> SelectPlan {
    SelectPlan {
        statement: None,
        layout: HydrationLayout {
            base: mapper.id(),
            detection: Detection::Fixed,
            columns: HashMap::new(),
        },
    }
}

fn single_table(registry: &SchemaRegistry, mapper: &Mapper, params: &mut Vec<Value>) -> Result<Shape> {
    let root = registry.mapper(mapper.root());
    let table = root.table_name();

    let select_list = root
        .columns()
        .iter()
        .map(|c| aliased(table, table, &c.name))
        .collect::<Result<Vec<_>>>()?;

    let candidates: Vec<ClassId> = std::iter::once(mapper.id())
        .chain(registry.descendants(mapper.id()))
        .collect();
    let columns: HashMap<ClassId, Vec<(String, String)>> = candidates
        .iter()
        .map(|&c| {
            let cols: Vec<(String, String)> = registry
                .mapper(c)
                .columns()
                .iter()
                .map(|col| (col.name.clone(), column_alias(table, &col.name)))
                .collect();
            (c, cols)
        })
        .collect();

    let mut conditions = Vec::new();
    let detection = match root.discriminator_column() {
        Some(disc) => {
            if mapper.parent().is_some() {
                let tags: Vec<Value> = candidates
                    .iter()
                    .filter_map(|&c| registry.mapper(c).discriminator_value())
                    .map(Value::from)
                    .collect();
                let placeholders = vec!["?"; tags.len()];
                conditions.push(format!(
                    "{} IN ({})",
                    quote_qualified(table, disc)?,
                    placeholders.join(", ")
                ));
                params.extend(tags);
            }
            Detection::Discriminator {
                alias: column_alias(table, disc),
                map: root.discriminator_map().to_vec(),
            }
        }
        None => Detection::Fixed,
    };

    Ok(Shape {
        select_list,
        from: quote_ident(table)?,
        scopes: vec![scope_for(root, table.to_string())],
        key: (table.to_string(), root.key_column().to_string()),
        conditions,
        layout: HydrationLayout {
            base: mapper.id(),
            detection,
            columns,
        },
        allow_joins: true,
    })
}

fn joined_tables(registry: &SchemaRegistry, mapper: &Mapper) -> Result<Shape> {
    let lineage = registry.lineage(mapper.id());
    let descendants = registry.descendants(mapper.id());
    let root = registry.mapper(lineage[0]);
    let root_key = quote_qualified(root.table_name(), root.key_column())?;

    let mut from = quote_ident(root.table_name())?;
    let mut select_list = Vec::new();
    let mut scopes = Vec::new();

    for (i, &class) in lineage.iter().chain(descendants.iter()).enumerate() {
        let m = registry.mapper(class);
        if i > 0 {
            let kind = if i < lineage.len() { "JOIN" } else { "LEFT JOIN" };
            from.push_str(&format!(
                " {kind} {} ON {} = {}",
                quote_ident(m.table_name())?,
                quote_qualified(m.table_name(), m.key_column())?,
                root_key
            ));
        }
        for col in m.local_columns() {
            select_list.push(aliased(m.table_name(), m.table_name(), &col.name)?);
        }
        scopes.push(scope_for(m, m.table_name().to_string()));
    }

    let mut columns = HashMap::new();
    for &class in std::iter::once(&mapper.id()).chain(descendants.iter()) {
        let chain = registry.lineage(class);
        let cols: Vec<(String, String)> = registry
            .mapper(class)
            .columns()
            .iter()
            .filter_map(|col| {
                chain
                    .iter()
                    .map(|&c| registry.mapper(c))
                    .find(|m| m.has_local_column(&col.name))
                    .map(|m| (col.name.clone(), column_alias(m.table_name(), &col.name)))
            })
            .collect();
        columns.insert(class, cols);
    }

    let keys: HashMap<ClassId, String> = descendants
        .iter()
        .map(|&d| {
            let m = registry.mapper(d);
            (d, column_alias(m.table_name(), m.key_column()))
        })
        .collect();

    Ok(Shape {
        select_list,
        from,
        scopes,
        key: (root.table_name().to_string(), root.key_column().to_string()),
        conditions: Vec::new(),
        layout: HydrationLayout {
            base: mapper.id(),
            detection: if descendants.is_empty() {
                Detection::Fixed
            } else {
                Detection::JoinedChildren { keys }
            },
            columns,
        },
        allow_joins: true,
    })
}

fn concrete_table(mapper: &Mapper) -> Result<Shape> {
    let table = mapper.table_name();
    let select_list = mapper
        .local_columns()
        .iter()
        .map(|c| aliased(table, table, &c.name))
        .collect::<Result<Vec<_>>>()?;
    let cols: Vec<(String, String)> = mapper
        .local_columns()
        .iter()
        .map(|c| (c.name.clone(), column_alias(table, &c.name)))
        .collect();

    Ok(Shape {
        select_list,
        from: quote_ident(table)?,
        scopes: vec![scope_for(mapper, table.to_string())],
        key: (table.to_string(), mapper.key_column().to_string()),
        conditions: Vec::new(),
        layout: HydrationLayout {
            base: mapper.id(),
            detection: Detection::Fixed,
            columns: HashMap::from([(mapper.id(), cols)]),
        },
        allow_joins: true,
    })
}

fn concrete_union(
    registry: &SchemaRegistry,
    mapper: &Mapper,
    descendants: &[ClassId],
    params: &mut Vec<Value>,
) -> Result<Option<Shape>> {
    let branches: Vec<&Mapper> = std::iter::once(mapper.id())
        .chain(descendants.iter().copied())
        .map(|c| registry.mapper(c).as_ref())
        .filter(|m| !m.is_abstract())
        .collect();
    if branches.is_empty() {
        return Ok(None);
    }

    let mut union_columns: Vec<String> = Vec::new();
    for m in std::iter::once(mapper).chain(branches.iter().copied()) {
        for col in m.columns() {
            if !union_columns.contains(&col.name) {
                union_columns.push(col.name.clone());
            }
        }
    }

    let tag = quote_ident(TYPE_TAG_COLUMN)?;
    let mut parts = Vec::with_capacity(branches.len());
    for branch in &branches {
        let mut list = Vec::with_capacity(union_columns.len() + 1);
        for name in &union_columns {
            if branch.has_column(name) {
                list.push(format!(
                    "{} AS {}",
                    quote_qualified(branch.table_name(), name)?,
                    quote_ident(name)?
                ));
            } else {
                list.push(format!("NULL AS {}", quote_ident(name)?));
            }
        }
        list.push(format!("? AS {tag}"));
        params.push(Value::Text(branch.name().to_string()));
        parts.push(format!(
            "SELECT {} FROM {}",
            list.join(", "),
            quote_ident(branch.table_name())?
        ));
    }

    let mut select_list = union_columns
        .iter()
        .map(|name| aliased(UNION_ALIAS, UNION_ALIAS, name))
        .collect::<Result<Vec<_>>>()?;
    select_list.push(aliased(UNION_ALIAS, UNION_ALIAS, TYPE_TAG_COLUMN)?);

    let columns: HashMap<ClassId, Vec<(String, String)>> = branches
        .iter()
        .map(|m| {
            let cols: Vec<(String, String)> = m
                .columns()
                .iter()
                .map(|c| (c.name.clone(), column_alias(UNION_ALIAS, &c.name)))
                .collect();
            (m.id(), cols)
        })
        .collect();
    let map: Vec<(String, ClassId)> = branches
        .iter()
        .map(|m| (m.name().to_string(), m.id()))
        .collect();

    Ok(Some(Shape {
        select_list,
        from: format!("({}) AS {}", parts.join(" UNION ALL "), quote_ident(UNION_ALIAS)?),
        scopes: vec![Scope {
            alias: UNION_ALIAS.to_string(),
            table: mapper.table_name().to_string(),
            columns: union_columns,
        }],
        key: (UNION_ALIAS.to_string(), mapper.key_column().to_string()),
        conditions: Vec::new(),
        layout: HydrationLayout {
            base: mapper.id(),
            detection: Detection::TypeTag {
                alias: column_alias(UNION_ALIAS, TYPE_TAG_COLUMN),
                map,
            },
            columns,
        },
        allow_joins: false,
    }))
}

/// `"alias"."column" AS "table#column"`.
fn aliased(alias: &str, table: &str, column: &str) -> Result<String> {
    Ok(format!(
        "{} AS {}",
        quote_qualified(alias, column)?,
        quote_ident(&column_alias(table, column))?
    ))
}

fn join_table(table: &str, alias: &str) -> Result<String> {
    if table == alias {
        Ok(format!(" JOIN {}", quote_ident(table)?))
    } else {
        Ok(format!(" JOIN {} AS {}", quote_ident(table)?, quote_ident(alias)?))
    }
}

fn unique_alias(scopes: &[Scope], table: &str, index: usize) -> String {
    if scopes.iter().any(|s| s.alias == table) {
        format!("{table}_{index}")
    } else {
        table.to_string()
    }
}

fn scope_for(mapper: &Mapper, alias: String) -> Scope {
    Scope {
        alias,
        table: mapper.table_name().to_string(),
        columns: mapper
            .local_columns()
            .iter()
            .map(|c| c.name.clone())
            .collect(),
    }
}

fn resolve_column(scopes: &[Scope], class: &str, table: Option<&str>, name: &str) -> Result<String> {
    quote_ident(name)?;
    match table {
        Some(t) => {
            quote_ident(t)?;
            let scope = scopes
                .iter()
                .find(|s| s.alias == t || s.table == t)
                .ok_or_else(|| {
                    Error::Custom(format!("table '{t}' is not part of the query for {class}"))
                })?;
            if !scope.columns.iter().any(|c| c == name) {
                return Err(Error::UnknownColumn {
                    class: scope.table.clone(),
                    column: name.to_string(),
                });
            }
            Ok(quote_qualified(&scope.alias, name)?)
        }
        None => match scopes.iter().find(|s| s.columns.iter().any(|c| c == name)) {
            Some(scope) => Ok(quote_qualified(&scope.alias, name)?),
            None => Err(Error::UnknownColumn {
                class: class.to_string(),
                column: name.to_string(),
            }),
        },
    }
}

fn to_i64(n: u64) -> i64 {
    i64::try_from(n).unwrap_or(i64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use miniorm_core::{ColumnDef, EntityClass, Relationship};
    use std::sync::Arc;

    fn pets() -> Arc<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                EntityClass::new("Owner")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name")),
            )
            .unwrap();
        builder
            .register(
                EntityClass::new("Pet")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name"))
                    .relationship("owner", Relationship::many_to_one("Owner").backref("pets"))
                    .relationship("toys", Relationship::many_to_many("Toy")),
            )
            .unwrap();
        builder
            .register(EntityClass::new("Toy").column(ColumnDef::integer("id").primary_key(true)))
            .unwrap();
        builder.finalize().unwrap()
    }

    fn employees() -> Arc<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                EntityClass::new("Employee")
                    .inheritance("single")
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name")),
            )
            .unwrap();
        builder
            .register(
                EntityClass::new("Manager")
                    .inherits("Employee")
                    .column(ColumnDef::integer("reports")),
            )
            .unwrap();
        builder.finalize().unwrap()
    }

    fn animals() -> Arc<SchemaRegistry> {
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
        builder.finalize().unwrap()
    }

    fn people() -> Arc<SchemaRegistry> {
        let mut builder = SchemaRegistry::builder();
        builder
            .register(
                EntityClass::new("Person")
                    .inheritance("concrete")
                    .table("people")
                    .abstract_class()
                    .column(ColumnDef::integer("id").primary_key(true))
                    .column(ColumnDef::text("name")),
            )
            .unwrap();
        builder
            .register(EntityClass::new("Vet").inherits("Person").column(ColumnDef::text("clinic")))
            .unwrap();
        builder
            .register(EntityClass::new("Client").inherits("Person"))
            .unwrap();
        builder.finalize().unwrap()
    }

    fn sql(plan: &SelectPlan) -> &str {
        &plan.statement.as_ref().unwrap().sql
    }

    fn params(plan: &SelectPlan) -> &[Value] {
        &plan.statement.as_ref().unwrap().params
    }

    #[test]
    fn test_plain_select_with_filter_and_paging() {
        let registry = pets();
        let pet = registry.by_name("Pet").unwrap().id();
        let plan = Select::new(pet)
            .filter(Expr::col("name").eq("Rex"))
            .order_by(OrderBy::desc("id"))
            .limit(1)
            .build(&registry)
            .unwrap();
        assert_eq!(
            sql(&plan),
            "SELECT \"pets\".\"id\" AS \"pets#id\", \"pets\".\"name\" AS \"pets#name\", \
             \"pets\".\"owner_id\" AS \"pets#owner_id\" FROM \"pets\" \
             WHERE \"pets\".\"name\" = ? ORDER BY \"pets\".\"id\" DESC LIMIT ?"
        );
        assert_eq!(params(&plan), &[Value::from("Rex"), Value::BigInt(1)]);
    }

    #[test]
    fn test_offset_without_limit() {
        let registry = pets();
        let pet = registry.by_name("Pet").unwrap().id();
        let plan = Select::new(pet).offset(5).build(&registry).unwrap();
        assert!(sql(&plan).ends_with("FROM \"pets\" LIMIT ? OFFSET ?"));
        assert_eq!(params(&plan), &[Value::BigInt(-1), Value::BigInt(5)]);
    }

    #[test]
    fn test_unknown_and_unsafe_columns() {
        let registry = pets();
        let pet = registry.by_name("Pet").unwrap().id();
        let err = Select::new(pet)
            .filter(Expr::col("colour").eq("red"))
            .build(&registry)
            .unwrap_err();
        assert!(matches!(err, Error::UnknownColumn { .. }));

        let err = Select::new(pet)
            .filter(Expr::col("name; DROP TABLE pets").eq("x"))
            .build(&registry)
            .unwrap_err();
        assert!(matches!(err, Error::IdentifierSecurity(_)));
    }

    #[test]
    fn test_join_many_to_one_and_filter_on_target() {
        let registry = pets();
        let pet = registry.by_name("Pet").unwrap().id();
        let plan = Select::new(pet)
            .join("owner")
            .filter(Expr::qualified("owners", "name").eq("Ann"))
            .build(&registry)
            .unwrap();
        assert!(sql(&plan).contains(
            "FROM \"pets\" JOIN \"owners\" ON \"owners\".\"id\" = \"pets\".\"owner_id\" \
             WHERE \"owners\".\"name\" = ?"
        ));
    }

    #[test]
    fn test_join_one_to_many_and_many_to_many() {
        let registry = pets();
        let owner = registry.by_name("Owner").unwrap().id();
        let plan = Select::new(owner).join("pets").build(&registry).unwrap();
        assert!(sql(&plan).contains("JOIN \"pets\" ON \"pets\".\"owner_id\" = \"owners\".\"id\""));

        let pet = registry.by_name("Pet").unwrap().id();
        let plan = Select::new(pet).join("toys").build(&registry).unwrap();
        assert!(sql(&plan).contains(
            "JOIN \"pets_toys\" AS \"assoc_0\" ON \"assoc_0\".\"pet_id\" = \"pets\".\"id\" \
             JOIN \"toys\" ON \"toys\".\"id\" = \"assoc_0\".\"toy_id\""
        ));

        let err = Select::new(pet).join("vet").build(&registry).unwrap_err();
        assert!(matches!(err, Error::UnknownRelationship { .. }));
    }

    #[test]
    fn test_through_association() {
        let registry = pets();
        let pet = registry.by_name("Pet").unwrap();
        let toy = registry.by_name("Toy").unwrap().id();
        let assoc = pet.relationship("toys").unwrap().association.clone().unwrap();
        let plan = Select::new(toy).through(assoc, 4).build(&registry).unwrap();
        assert!(sql(&plan).ends_with(
            "FROM \"toys\" JOIN \"pets_toys\" AS \"link_0\" ON \"link_0\".\"toy_id\" = \"toys\".\"id\" \
             WHERE \"link_0\".\"pet_id\" = ?"
        ));
        assert_eq!(params(&plan), &[Value::Int(4)]);
    }

    #[test]
    fn test_single_table_subclass_query() {
        let registry = employees();
        let manager = registry.by_name("Manager").unwrap().id();
        let plan = Select::new(manager)
            .filter(Expr::col("name").eq("Bo"))
            .build(&registry)
            .unwrap();
        assert_eq!(
            sql(&plan),
            "SELECT \"employees\".\"id\" AS \"employees#id\", \"employees\".\"name\" AS \"employees#name\", \
             \"employees\".\"type\" AS \"employees#type\", \"employees\".\"reports\" AS \"employees#reports\" \
             FROM \"employees\" WHERE \"employees\".\"type\" IN (?) AND \"employees\".\"name\" = ?"
        );
        assert_eq!(params(&plan), &[Value::from("Manager"), Value::from("Bo")]);
    }

    #[test]
    fn test_single_table_hydration_uses_discriminator() {
        let registry = employees();
        let employee = registry.by_name("Employee").unwrap().id();
        let manager = registry.by_name("Manager").unwrap().id();
        let plan = Select::new(employee).build(&registry).unwrap();
        assert!(!sql(&plan).contains("WHERE"));

        let row = Row::from_pairs([
            ("employees#id", Value::Int(1)),
            ("employees#name", Value::from("Bo")),
            ("employees#type", Value::from("Manager")),
            ("employees#reports", Value::Int(3)),
        ]);
        assert_eq!(plan.layout.resolve_class(&registry, &row), manager);
        let values = plan.layout.values(manager, &row);
        assert_eq!(values.get("reports"), Some(&Value::Int(3)));
        assert_eq!(values.get("type"), Some(&Value::from("Manager")));
    }

    #[test]
    fn test_joined_tables_select() {
        let registry = animals();
        let animal = registry.by_name("Animal").unwrap().id();
        let dog = registry.by_name("Dog").unwrap().id();
        let plan = Select::new(animal)
            .filter(Expr::col("id").eq(2))
            .build(&registry)
            .unwrap();
        assert_eq!(
            sql(&plan),
            "SELECT \"animals\".\"id\" AS \"animals#id\", \"animals\".\"name\" AS \"animals#name\", \
             \"dogs\".\"breed\" AS \"dogs#breed\", \"dogs\".\"id\" AS \"dogs#id\" \
             FROM \"animals\" LEFT JOIN \"dogs\" ON \"dogs\".\"id\" = \"animals\".\"id\" \
             WHERE \"animals\".\"id\" = ?"
        );

        let dog_row = Row::from_pairs([
            ("animals#id", Value::Int(2)),
            ("animals#name", Value::from("Rex")),
            ("dogs#breed", Value::from("lab")),
            ("dogs#id", Value::Int(2)),
        ]);
        assert_eq!(plan.layout.resolve_class(&registry, &dog_row), dog);
        let values = plan.layout.values(dog, &dog_row);
        assert_eq!(values.get("breed"), Some(&Value::from("lab")));
        assert_eq!(values.get("id"), Some(&Value::Int(2)));

        let plain_row = Row::from_pairs([
            ("animals#id", Value::Int(3)),
            ("animals#name", Value::from("Tom")),
            ("dogs#breed", Value::Null),
            ("dogs#id", Value::Null),
        ]);
        assert_eq!(plan.layout.resolve_class(&registry, &plain_row), animal);
    }

    #[test]
    fn test_joined_subclass_inner_joins_parent() {
        let registry = animals();
        let dog = registry.by_name("Dog").unwrap().id();
        let plan = Select::new(dog).build(&registry).unwrap();
        assert!(sql(&plan).contains(
            "FROM \"animals\" JOIN \"dogs\" ON \"dogs\".\"id\" = \"animals\".\"id\""
        ));
    }

    #[test]
    fn test_concrete_union_skips_abstract() {
        let registry = people();
        let person = registry.by_name("Person").unwrap().id();
        let vet = registry.by_name("Vet").unwrap().id();
        let plan = Select::new(person)
            .filter(Expr::col("name").like("A%"))
            .build(&registry)
            .unwrap();
        assert_eq!(
            sql(&plan),
            "SELECT \"poly\".\"id\" AS \"poly#id\", \"poly\".\"name\" AS \"poly#name\", \
             \"poly\".\"clinic\" AS \"poly#clinic\", \"poly\".\"_concrete_type\" AS \"poly#_concrete_type\" \
             FROM (SELECT \"vets\".\"id\" AS \"id\", \"vets\".\"name\" AS \"name\", \"vets\".\"clinic\" AS \"clinic\", \
             ? AS \"_concrete_type\" FROM \"vets\" UNION ALL \
             SELECT \"clients\".\"id\" AS \"id\", \"clients\".\"name\" AS \"name\", NULL AS \"clinic\", \
             ? AS \"_concrete_type\" FROM \"clients\") AS \"poly\" \
             WHERE \"poly\".\"name\" LIKE ?"
        );
        assert_eq!(
            params(&plan),
            &[Value::from("Vet"), Value::from("Client"), Value::from("A%")]
        );

        let row = Row::from_pairs([
            ("poly#id", Value::Int(1)),
            ("poly#name", Value::from("Al")),
            ("poly#clinic", Value::from("North")),
            ("poly#_concrete_type", Value::from("Vet")),
        ]);
        assert_eq!(plan.layout.resolve_class(&registry, &row), vet);

        let err = Select::new(person).join("x").build(&registry).unwrap_err();
        assert!(matches!(err, Error::Custom(_)));
    }

    #[test]
    fn test_concrete_leaf_is_plain_select() {
        let registry = people();
        let vet = registry.by_name("Vet").unwrap().id();
        let plan = Select::new(vet).build(&registry).unwrap();
        assert!(sql(&plan).ends_with("FROM \"vets\""));
        assert!(params(&plan).is_empty());
    }
}
