//! Entity class registration and mapper resolution.
//!
//! Classes are declared with [`EntityClass`], collected by a
//! [`RegistryBuilder`] and resolved in one pass by
//! [`RegistryBuilder::finalize`], which produces an immutable
//! [`SchemaRegistry`]. Finalize resolves relationship targets, names
//! foreign-key columns and association tables, creates backrefs, merges
//! inherited columns per strategy and validates the result.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::field::ColumnDef;
use crate::inheritance::InheritanceStrategy;
use crate::mapper::Mapper;
use crate::relationship::{
    AssociationTable, Relationship, RelationshipInfo, RelationshipKind, singular,
};
use crate::types::SqlType;

/// Index of a class within its [`SchemaRegistry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(usize);

impl ClassId {
    pub const fn index(self) -> usize {
        self.0
    }
}

/// Declaration of an entity class.
#[derive(Debug, Clone)]
pub struct EntityClass {
    name: String,
    table: Option<String>,
    parent: Option<String>,
    inheritance: Option<String>,
    discriminator: Option<String>,
    discriminator_value: Option<String>,
    is_abstract: bool,
    columns: Vec<ColumnDef>,
    relationships: Vec<(String, Relationship)>,
}

impl EntityClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: None,
            parent: None,
            inheritance: None,
            discriminator: None,
            discriminator_value: None,
            is_abstract: false,
            columns: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Table name; defaults to the lower-cased class name plus `s`.
    pub fn table(mut self, name: impl Into<String>) -> Self {
        self.table = Some(name.into());
        self
    }

    /// Subclass `parent`, which must already be registered.
    pub fn inherits(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Inheritance strategy by name: `single`, `class` or `concrete`.
    pub fn inheritance(mut self, strategy: impl Into<String>) -> Self {
        self.inheritance = Some(strategy.into());
        self
    }

    /// Discriminator column of a SINGLE hierarchy (default `type`).
    pub fn discriminator(mut self, column: impl Into<String>) -> Self {
        self.discriminator = Some(column.into());
        self
    }

    /// Tag identifying this class in a SINGLE table (default: the class name).
    pub fn discriminator_value(mut self, value: impl Into<String>) -> Self {
        self.discriminator_value = Some(value.into());
        self
    }

    /// Mark a CONCRETE base as having no rows of its own.
    pub fn abstract_class(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    pub fn column(mut self, column: ColumnDef) -> Self {
        self.columns.push(column);
        self
    }

    pub fn relationship(mut self, name: impl Into<String>, relationship: Relationship) -> Self {
        self.relationships.push((name.into(), relationship));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Debug)]
struct Declared {
    class: EntityClass,
    parent: Option<usize>,
    strategy: Option<InheritanceStrategy>,
}

/// Collects class declarations until [`finalize`](RegistryBuilder::finalize).
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    declared: Vec<Declared>,
    by_name: HashMap<String, usize>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a class. Parents must be registered before their subclasses;
    /// relationship targets may be registered later.
    pub fn register(&mut self, class: EntityClass) -> Result<ClassId> {
        let name = class.name.clone();
        if name.is_empty() {
            return Err(Error::config("<unnamed>", "class name must not be empty"));
        }
        if self.by_name.contains_key(&name) {
            return Err(Error::config(&name, "class is already registered"));
        }

        let strategy = match class.inheritance.as_deref() {
            Some(s) => Some(s.parse::<InheritanceStrategy>().map_err(|e| match e {
                Error::Config(mut cfg) => {
                    cfg.class = Some(name.clone());
                    Error::Config(cfg)
                }
                other => other,
            })?),
            None => None,
        };

        let parent = match &class.parent {
            Some(p) => Some(*self.by_name.get(p).ok_or_else(|| {
                Error::config(&name, format!("unknown parent class '{}'", p))
            })?),
            None => None,
        };

        if let (Some(own), Some(parent)) = (strategy, parent) {
            if let Some((ancestor, inherited)) = self.declared_strategy_above(parent) {
                if inherited != own {
                    return Err(Error::config(
                        &name,
                        format!(
                            "inheritance strategy '{}' conflicts with '{}' declared on {}",
                            own, inherited, ancestor
                        ),
                    ));
                }
            }
        }

        if let Some(table) = &class.table {
            if table.contains('#') {
                return Err(Error::config(
                    &name,
                    format!("table name '{}' must not contain '#'", table),
                ));
            }
        }

        for (i, col) in class.columns.iter().enumerate() {
            if class.columns[..i].iter().any(|c| c.name == col.name) {
                return Err(Error::config(
                    &name,
                    format!("column '{}' is declared twice", col.name),
                ));
            }
        }
        for (i, (rel, _)) in class.relationships.iter().enumerate() {
            if class.relationships[..i].iter().any(|(r, _)| r == rel) {
                return Err(Error::config(
                    &name,
                    format!("relationship '{}' is declared twice", rel),
                ));
            }
        }

        let index = self.declared.len();
        tracing::debug!(class = %name, parent = ?class.parent, "Registered entity class");
        self.by_name.insert(name, index);
        self.declared.push(Declared {
            class,
            parent,
            strategy,
        });
        Ok(ClassId(index))
    }

    fn declared_strategy_above(&self, mut class: usize) -> Option<(&str, InheritanceStrategy)> {
        loop {
            let d = &self.declared[class];
            if let Some(s) = d.strategy {
                return Some((d.class.name.as_str(), s));
            }
            class = d.parent?;
        }
    }

    fn name_of(&self, class: usize) -> &str {
        &self.declared[class].class.name
    }

    /// Resolve every declaration into an immutable registry.
    pub fn finalize(self) -> Result<Arc<SchemaRegistry>> {
        let n = self.declared.len();

        let mut children = vec![Vec::new(); n];
        let mut roots = vec![0; n];
        for i in 0..n {
            match self.declared[i].parent {
                Some(p) => {
                    children[p].push(i);
                    roots[i] = roots[p];
                }
                None => roots[i] = i,
            }
        }

        let strategies = self.resolve_strategies(&children)?;
        let tables = self.resolve_tables(&strategies, &roots)?;
        let pks = self.resolve_primary_keys()?;
        let key_columns = self.resolve_key_columns(&strategies, &tables, &pks)?;

        let pk_type = |class: usize| -> SqlType {
            self.declared[roots[class]]
                .class
                .columns
                .iter()
                .find(|c| c.primary_key)
                .map_or(SqlType::Integer, |c| c.sql_type)
        };

        // Relationships declared on each class, plus the foreign-key columns
        // they add to either side.
        let mut own: Vec<Vec<RelationshipInfo>> = vec![Vec::new(); n];
        let mut extra_columns: Vec<Vec<ColumnDef>> = vec![Vec::new(); n];
        let mut reverse: Vec<(usize, RelationshipInfo, bool)> = Vec::new();

        for i in 0..n {
            let class_name = self.name_of(i).to_string();
            for (name, rel) in &self.declared[i].class.relationships {
                let t = self.lookup_target(&rel.target, &tables).ok_or_else(|| {
                    Error::config(
                        &class_name,
                        format!(
                            "relationship '{}' targets unknown class '{}'",
                            name, rel.target
                        ),
                    )
                })?;

                match rel.kind {
                    RelationshipKind::ManyToOne | RelationshipKind::OneToOne => {
                        let parent_link = strategies[i] == InheritanceStrategy::Class
                            && self.declared[i].parent == Some(t);
                        let fk = rel.foreign_key.clone().unwrap_or_else(|| {
                            if parent_link {
                                pks[i].clone()
                            } else {
                                format!("{}_id", name)
                            }
                        });
                        let mut col = fk_column(&fk, pk_type(t), &tables[t], &key_columns[t]);
                        if let Some(reference) = col.foreign_key.as_mut() {
                            reference.on_delete_cascade = rel.cascade_delete;
                        }
                        if parent_link {
                            col = col.nullable(false);
                        } else if rel.kind == RelationshipKind::OneToOne {
                            col = col.unique(true);
                        }
                        push_column(&mut extra_columns[i], col);

                        own[i].push(RelationshipInfo {
                            name: name.clone(),
                            kind: rel.kind,
                            target: ClassId(t),
                            declared_by: ClassId(i),
                            foreign_key: Some(fk.clone()),
                            association: None,
                            backref: rel.backref.clone(),
                            cascade_delete: rel.cascade_delete,
                            owning: true,
                        });
                        if let Some(backref) = &rel.backref {
                            let kind = if rel.kind == RelationshipKind::ManyToOne {
                                RelationshipKind::OneToMany
                            } else {
                                RelationshipKind::OneToOne
                            };
                            reverse.push((
                                t,
                                RelationshipInfo {
                                    name: backref.clone(),
                                    kind,
                                    target: ClassId(i),
                                    declared_by: ClassId(t),
                                    foreign_key: Some(fk),
                                    association: None,
                                    backref: Some(name.clone()),
                                    cascade_delete: false,
                                    owning: false,
                                },
                                true,
                            ));
                        }
                    }
                    RelationshipKind::OneToMany => {
                        let fk = rel
                            .foreign_key
                            .clone()
                            .unwrap_or_else(|| format!("{}_id", singular(&tables[i])));
                        let mut col = fk_column(&fk, pk_type(i), &tables[i], &key_columns[i]);
                        if let Some(reference) = col.foreign_key.as_mut() {
                            reference.on_delete_cascade = rel.cascade_delete;
                        }
                        push_column(&mut extra_columns[t], col);

                        own[i].push(RelationshipInfo {
                            name: name.clone(),
                            kind: RelationshipKind::OneToMany,
                            target: ClassId(t),
                            declared_by: ClassId(i),
                            foreign_key: Some(fk.clone()),
                            association: None,
                            backref: rel.backref.clone(),
                            cascade_delete: false,
                            owning: false,
                        });
                        let reverse_name = rel
                            .backref
                            .clone()
                            .unwrap_or_else(|| singular(&tables[i]).to_string());
                        reverse.push((
                            t,
                            RelationshipInfo {
                                name: reverse_name,
                                kind: RelationshipKind::ManyToOne,
                                target: ClassId(i),
                                declared_by: ClassId(t),
                                foreign_key: Some(fk),
                                association: None,
                                backref: Some(name.clone()),
                                cascade_delete: rel.cascade_delete,
                                owning: true,
                            },
                            rel.backref.is_some(),
                        ));
                    }
                    RelationshipKind::ManyToMany => {
                        let mut assoc = AssociationTable::between(&tables[i], &tables[t]);
                        if let Some(table) = &rel.association {
                            if table.contains('#') {
                                return Err(Error::config(
                                    &class_name,
                                    format!("association table '{}' must not contain '#'", table),
                                ));
                            }
                            assoc.name = table.clone();
                        }
                        own[i].push(RelationshipInfo {
                            name: name.clone(),
                            kind: RelationshipKind::ManyToMany,
                            target: ClassId(t),
                            declared_by: ClassId(i),
                            foreign_key: None,
                            association: Some(assoc.clone()),
                            backref: rel.backref.clone(),
                            cascade_delete: false,
                            owning: false,
                        });
                        let reverse_name = rel.backref.clone().unwrap_or_else(|| tables[i].clone());
                        reverse.push((
                            t,
                            RelationshipInfo {
                                name: reverse_name,
                                kind: RelationshipKind::ManyToMany,
                                target: ClassId(i),
                                declared_by: ClassId(t),
                                foreign_key: None,
                                association: Some(assoc.reversed()),
                                backref: Some(name.clone()),
                                cascade_delete: false,
                                owning: false,
                            },
                            rel.backref.is_some(),
                        ));
                    }
                }
            }
        }

        for (t, rev, explicit) in reverse {
            self.attach_reverse(&mut own[t], t, rev, explicit)?;
        }

        // Column resolution per strategy. Parents precede children in
        // registration order, so inherited sets are ready when needed.
        let declared_columns: Vec<Vec<ColumnDef>> = (0..n)
            .map(|i| {
                let mut cols = self.declared[i].class.columns.clone();
                for col in &extra_columns[i] {
                    push_column(&mut cols, col.clone());
                }
                cols
            })
            .collect();

        let mut columns: Vec<Vec<ColumnDef>> = vec![Vec::new(); n];
        let mut local_columns: Vec<Vec<ColumnDef>> = vec![Vec::new(); n];
        let mut discriminator_columns: Vec<Option<String>> = vec![None; n];
        let mut discriminator_values: Vec<Option<String>> = vec![None; n];

        for i in 0..n {
            let parent = self.declared[i].parent;
            match strategies[i] {
                InheritanceStrategy::Single => {
                    let root = roots[i];
                    let disc = self.declared[root]
                        .class
                        .discriminator
                        .clone()
                        .unwrap_or_else(|| "type".to_string());
                    let mut cols = match parent {
                        Some(p) => columns[p].clone(),
                        None => {
                            let mut cols = declared_columns[i].clone();
                            push_column(&mut cols, ColumnDef::text(&disc).nullable(false));
                            cols
                        }
                    };
                    if parent.is_some() {
                        for col in &declared_columns[i] {
                            push_column(&mut cols, col.clone().nullable(true));
                        }
                    }
                    columns[i] = cols;
                    discriminator_columns[i] = Some(disc);
                    discriminator_values[i] = Some(
                        self.declared[i]
                            .class
                            .discriminator_value
                            .clone()
                            .unwrap_or_else(|| self.name_of(i).to_string()),
                    );
                }
                InheritanceStrategy::Class => {
                    local_columns[i] = declared_columns[i].clone();
                    let mut cols = parent.map(|p| columns[p].clone()).unwrap_or_default();
                    for col in &declared_columns[i] {
                        push_column(&mut cols, col.clone());
                    }
                    columns[i] = cols;
                }
                InheritanceStrategy::Concrete => {
                    let mut cols = parent.map(|p| columns[p].clone()).unwrap_or_default();
                    for col in &declared_columns[i] {
                        push_column(&mut cols, col.clone());
                    }
                    local_columns[i] = cols.clone();
                    columns[i] = cols;
                }
            }
        }

        // SINGLE: the shared table holds every column of the hierarchy.
        let mut discriminator_maps: Vec<Vec<(String, ClassId)>> = vec![Vec::new(); n];
        for root in (0..n).filter(|&i| self.declared[i].parent.is_none()) {
            if strategies[root] != InheritanceStrategy::Single {
                continue;
            }
            let members = preorder(root, &children);
            let mut table_columns = columns[root].clone();
            for &m in members.iter().skip(1) {
                for col in &columns[m] {
                    push_column(&mut table_columns, col.clone().nullable(true));
                }
            }
            columns[root] = table_columns.clone();
            for &m in &members {
                local_columns[m] = table_columns.clone();
            }

            let mut map: Vec<(String, ClassId)> = Vec::with_capacity(members.len());
            for &m in &members {
                let tag = discriminator_values[m].clone().unwrap_or_default();
                if let Some((_, other)) = map.iter().find(|(t, _)| *t == tag) {
                    return Err(Error::config(
                        self.name_of(m),
                        format!(
                            "discriminator value '{}' is already used by {}",
                            tag,
                            self.name_of(other.0)
                        ),
                    ));
                }
                map.push((tag, ClassId(m)));
            }
            discriminator_maps[root] = map;
        }

        // Relationships are inherited; a subclass may redeclare a name.
        let mut relationships: Vec<Vec<RelationshipInfo>> = vec![Vec::new(); n];
        for i in 0..n {
            let mut rels: Vec<RelationshipInfo> = match self.declared[i].parent {
                Some(p) => relationships[p]
                    .iter()
                    .filter(|r| !own[i].iter().any(|o| o.name == r.name))
                    .cloned()
                    .collect(),
                None => Vec::new(),
            };
            rels.extend(own[i].iter().cloned());
            relationships[i] = rels;
        }

        let mut mappers = Vec::with_capacity(n);
        let mut by_name = HashMap::with_capacity(n);
        for (i, declared) in self.declared.into_iter().enumerate() {
            let class = declared.class;
            by_name.insert(class.name.clone(), ClassId(i));
            mappers.push(Arc::new(Mapper {
                id: ClassId(i),
                name: class.name,
                table_name: tables[i].clone(),
                strategy: strategies[i],
                parent: declared.parent.map(ClassId),
                children: children[i].iter().copied().map(ClassId).collect(),
                root: ClassId(roots[i]),
                columns: std::mem::take(&mut columns[i]),
                local_columns: std::mem::take(&mut local_columns[i]),
                primary_key: pks[i].clone(),
                key_column: key_columns[i].clone(),
                relationships: std::mem::take(&mut relationships[i]),
                discriminator_column: discriminator_columns[i].take(),
                discriminator_value: discriminator_values[i].take(),
                discriminator_map: std::mem::take(&mut discriminator_maps[i]),
                is_abstract: class.is_abstract,
            }));
        }

        tracing::info!(classes = mappers.len(), "Schema registry finalized");
        Ok(Arc::new(SchemaRegistry { mappers, by_name }))
    }

    fn resolve_strategies(&self, children: &[Vec<usize>]) -> Result<Vec<InheritanceStrategy>> {
        let n = self.declared.len();
        let mut strategies = vec![InheritanceStrategy::default(); n];
        for root in (0..n).filter(|&i| self.declared[i].parent.is_none()) {
            let members = preorder(root, children);
            let mut chosen: Option<(InheritanceStrategy, usize)> = None;
            for &m in &members {
                let Some(s) = self.declared[m].strategy else {
                    continue;
                };
                match chosen {
                    None => chosen = Some((s, m)),
                    Some((c, by)) if c != s => {
                        return Err(Error::config(
                            self.name_of(m),
                            format!(
                                "inheritance strategy '{}' conflicts with '{}' declared on {}",
                                s,
                                c,
                                self.name_of(by)
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }
            let strategy = chosen.map(|(s, _)| s).unwrap_or_default();
            for m in members {
                strategies[m] = strategy;
            }
        }
        Ok(strategies)
    }

    fn resolve_tables(
        &self,
        strategies: &[InheritanceStrategy],
        roots: &[usize],
    ) -> Result<Vec<String>> {
        let n = self.declared.len();
        let mut tables: Vec<String> = Vec::with_capacity(n);
        let mut owners: HashMap<String, usize> = HashMap::new();
        for i in 0..n {
            let d = &self.declared[i];
            let table = if strategies[i] == InheritanceStrategy::Single && d.parent.is_some() {
                if d.class.table.is_some() {
                    return Err(Error::config(
                        &d.class.name,
                        "SINGLE subclasses share the root table and cannot declare their own",
                    ));
                }
                tables[roots[i]].clone()
            } else {
                let table = d
                    .class
                    .table
                    .clone()
                    .unwrap_or_else(|| default_table_name(&d.class.name));
                if let Some(&other) = owners.get(&table) {
                    return Err(Error::config(
                        &d.class.name,
                        format!("table '{}' is already mapped by {}", table, self.name_of(other)),
                    ));
                }
                owners.insert(table.clone(), i);
                table
            };
            tables.push(table);
        }
        Ok(tables)
    }

    fn resolve_primary_keys(&self) -> Result<Vec<String>> {
        let mut pks: Vec<String> = Vec::with_capacity(self.declared.len());
        for d in &self.declared {
            let local = d.class.columns.iter().find(|c| c.primary_key);
            let pk = match (d.parent, local) {
                (None, Some(col)) => col.name.clone(),
                (None, None) => {
                    return Err(Error::config(&d.class.name, "class has no primary key"));
                }
                (Some(p), None) => pks[p].clone(),
                (Some(p), Some(col)) => {
                    return Err(Error::config(
                        &d.class.name,
                        format!(
                            "primary key '{}' must be inherited from {}",
                            col.name,
                            self.name_of(p)
                        ),
                    ));
                }
            };
            pks.push(pk);
        }
        Ok(pks)
    }

    /// Table key column per class. CLASS subclasses key their table by the
    /// foreign key of their mandatory relationship to the parent.
    fn resolve_key_columns(
        &self,
        strategies: &[InheritanceStrategy],
        tables: &[String],
        pks: &[String],
    ) -> Result<Vec<String>> {
        let mut keys = Vec::with_capacity(self.declared.len());
        for (i, d) in self.declared.iter().enumerate() {
            let Some(parent) = d.parent else {
                keys.push(pks[i].clone());
                continue;
            };
            if strategies[i] != InheritanceStrategy::Class {
                keys.push(pks[i].clone());
                continue;
            }
            let link = d.class.relationships.iter().find(|(_, rel)| {
                rel.kind.is_to_one() && self.lookup_target(&rel.target, tables) == Some(parent)
            });
            match link {
                Some((_, rel)) => keys.push(rel.foreign_key.clone().unwrap_or_else(|| pks[i].clone())),
                None => {
                    return Err(Error::config(
                        &d.class.name,
                        format!(
                            "missing relationship to parent class {} required by CLASS inheritance",
                            self.name_of(parent)
                        ),
                    ));
                }
            }
        }
        Ok(keys)
    }

    /// Find a class by name, falling back to table name.
    fn lookup_target(&self, target: &str, tables: &[String]) -> Option<usize> {
        if let Some(&i) = self.by_name.get(target) {
            return Some(i);
        }
        // A SINGLE subclass shares its root's table name; the root comes first.
        tables.iter().position(|t| t == target)
    }

    fn attach_reverse(
        &self,
        rels: &mut Vec<RelationshipInfo>,
        on: usize,
        rev: RelationshipInfo,
        explicit: bool,
    ) -> Result<()> {
        if let Some(existing) = rels.iter_mut().find(|r| r.name == rev.name) {
            if is_reverse_pair(existing, &rev) {
                existing.cascade_delete |= rev.cascade_delete;
                if existing.backref.is_none() {
                    existing.backref = rev.backref;
                }
                return Ok(());
            }
            if explicit || rev.is_many_to_many() {
                return Err(Error::config(
                    self.name_of(on),
                    format!("duplicate backref '{}'", rev.name),
                ));
            }
            return Ok(());
        }

        // A many-to-many declared from both sides pairs up even when the
        // names differ from the defaults.
        if rev.is_many_to_many()
            && rels.iter().any(|r| {
                is_reverse_pair(r, &rev) && rev.backref.as_deref() != Some(r.name.as_str())
            })
        {
            return Ok(());
        }

        tracing::debug!(
            class = self.name_of(on),
            relationship = %rev.name,
            kind = rev.kind.as_str(),
            "Added reverse relationship"
        );
        rels.push(rev);
        Ok(())
    }
}

fn is_reverse_pair(existing: &RelationshipInfo, rev: &RelationshipInfo) -> bool {
    if existing.kind != rev.kind || existing.target != rev.target {
        return false;
    }
    match (&existing.association, &rev.association) {
        (Some(a), Some(b)) => a == b,
        (None, None) => existing.foreign_key == rev.foreign_key,
        _ => false,
    }
}

fn fk_column(name: &str, sql_type: SqlType, table: &str, key: &str) -> ColumnDef {
    ColumnDef::new(name, sql_type).foreign_key(table, key)
}

fn push_column(columns: &mut Vec<ColumnDef>, column: ColumnDef) {
    if !columns.iter().any(|c| c.name == column.name) {
        columns.push(column);
    }
}

fn preorder(root: usize, children: &[Vec<usize>]) -> Vec<usize> {
    let mut out = Vec::new();
    let mut stack = vec![root];
    while let Some(class) = stack.pop() {
        out.push(class);
        for &child in children[class].iter().rev() {
            stack.push(child);
        }
    }
    out
}

/// `Owner` -> `owners`.
pub fn default_table_name(class: &str) -> String {
    format!("{}s", class.to_ascii_lowercase())
}

/// Immutable, resolved mapping metadata for every registered class.
///
/// Construct once at startup and share via `Arc` with every session.
#[derive(Debug)]
pub struct SchemaRegistry {
    mappers: Vec<Arc<Mapper>>,
    by_name: HashMap<String, ClassId>,
}

impl SchemaRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::new()
    }

    /// Mapper for a class id issued by this registry.
    pub fn mapper(&self, id: ClassId) -> &Arc<Mapper> {
        &self.mappers[id.0]
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Mapper>> {
        self.by_name.get(name).map(|id| &self.mappers[id.0])
    }

    pub fn by_name(&self, name: &str) -> Result<&Arc<Mapper>> {
        self.get(name)
            .ok_or_else(|| Error::UnknownClass(name.to_string()))
    }

    pub fn mappers(&self) -> impl Iterator<Item = &Arc<Mapper>> {
        self.mappers.iter()
    }

    pub fn len(&self) -> usize {
        self.mappers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mappers.is_empty()
    }

    /// The class and its ancestors, root first.
    pub fn lineage(&self, id: ClassId) -> Vec<ClassId> {
        let mut chain = vec![id];
        let mut current = id;
        while let Some(parent) = self.mappers[current.0].parent {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// All subclasses, depth first in declaration order.
    pub fn descendants(&self, id: ClassId) -> Vec<ClassId> {
        let mut out = Vec::new();
        let mut stack: Vec<ClassId> = self.mappers[id.0].children.iter().rev().copied().collect();
        while let Some(class) = stack.pop() {
            out.push(class);
            stack.extend(self.mappers[class.0].children.iter().rev().copied());
        }
        out
    }

    /// Is `class` equal to `ancestor` or one of its subclasses?
    pub fn is_a(&self, class: ClassId, ancestor: ClassId) -> bool {
        let mut current = Some(class);
        while let Some(c) = current {
            if c == ancestor {
                return true;
            }
            current = self.mappers[c.0].parent;
        }
        false
    }
}
