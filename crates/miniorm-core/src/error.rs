//! Error types for miniorm operations.

use std::fmt;

/// The primary error type for all miniorm operations.
#[derive(Debug)]
pub enum Error {
    /// Invalid schema declaration (strategy, primary key, relationships)
    Config(ConfigError),
    /// Table or column name rejected by the identifier allow-list
    IdentifierSecurity(IdentifierError),
    /// Flush dependencies could not be ordered
    Cycle(CycleError),
    /// Statement execution errors reported by the engine
    Query(QueryError),
    /// A flush failed and the session was rolled back
    Flush(FlushError),
    /// No row exists for the requested primary key
    NotFound { class: String, pk: String },
    /// Attempt to change the primary key of a persisted instance
    ImmutablePrimaryKey { class: String, column: String },
    /// Operation not valid for the entity's current lifecycle state
    InvalidState(String),
    /// Lazy load requested on an instance with no session
    DetachedInstance { class: String },
    /// Class name not present in the schema registry
    UnknownClass(String),
    /// Column not declared on the class
    UnknownColumn { class: String, column: String },
    /// Relationship not declared on the class
    UnknownRelationship { class: String, relationship: String },
    /// Custom error with message
    Custom(String),
}

#[derive(Debug)]
pub struct ConfigError {
    pub class: Option<String>,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentifierError {
    pub identifier: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CycleError {
    /// Entities left with unresolved dependencies, as `Class(pk-or-new)`.
    pub entities: Vec<String>,
}

#[derive(Debug)]
pub struct QueryError {
    pub kind: QueryErrorKind,
    pub sql: Option<String>,
    pub message: String,
    pub source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryErrorKind {
    /// Syntax error in SQL
    Syntax,
    /// Constraint violation (unique, foreign key, not null)
    Constraint,
    /// Table or column not found
    NotFound,
    /// Other database error
    Database,
}

#[derive(Debug)]
pub struct FlushError {
    pub cause: Box<Error>,
}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            class: None,
            message: message.into(),
        }
    }

    pub fn for_class(class: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            class: Some(class.into()),
            message: message.into(),
        }
    }
}

impl QueryError {
    /// Create an error for a constraint violation raised by `sql`.
    pub fn constraint(sql: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: QueryErrorKind::Constraint,
            sql: Some(sql.into()),
            message: message.into(),
            source: None,
        }
    }

    /// Is this a constraint violation?
    pub fn is_constraint_violation(&self) -> bool {
        self.kind == QueryErrorKind::Constraint
    }
}

impl Error {
    /// Shorthand for a configuration error attributed to `class`.
    pub fn config(class: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Config(ConfigError::for_class(class, message))
    }

    /// Wrap a failure that happened while flushing.
    pub fn flush(cause: Error) -> Self {
        match cause {
            already @ Error::Flush(_) => already,
            other => Error::Flush(FlushError {
                cause: Box::new(other),
            }),
        }
    }

    /// Is this error (or the flush failure it wraps) a constraint violation?
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Error::Query(q) => q.is_constraint_violation(),
            Error::Flush(f) => f.cause.is_constraint_violation(),
            _ => false,
        }
    }

    /// Is this a NotFound error?
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Get the SQL that caused this error, if available
    pub fn sql(&self) -> Option<&str> {
        match self {
            Error::Query(q) => q.sql.as_deref(),
            Error::Flush(f) => f.cause.sql(),
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Config(e) => write!(f, "Configuration error: {}", e),
            Error::IdentifierSecurity(e) => write!(f, "{}", e),
            Error::Cycle(e) => write!(f, "{}", e),
            Error::Query(e) => write!(f, "Query error: {}", e),
            Error::Flush(e) => write!(f, "{}", e),
            Error::NotFound { class, pk } => {
                write!(f, "{} with primary key {} not found", class, pk)
            }
            Error::ImmutablePrimaryKey { class, column } => write!(
                f,
                "Cannot change primary key '{}' of a persisted {} instance",
                column, class
            ),
            Error::InvalidState(msg) => write!(f, "Invalid entity state: {}", msg),
            Error::DetachedInstance { class } => write!(
                f,
                "{} instance is not bound to a session; relationship cannot be loaded",
                class
            ),
            Error::UnknownClass(name) => write!(f, "Unknown entity class '{}'", name),
            Error::UnknownColumn { class, column } => {
                write!(f, "{} has no column '{}'", class, column)
            }
            Error::UnknownRelationship {
                class,
                relationship,
            } => write!(f, "{} has no relationship '{}'", class, relationship),
            Error::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Query(e) => e
                .source
                .as_deref()
                .map(|err| err as &(dyn std::error::Error + 'static)),
            Error::Flush(e) => Some(e.cause.as_ref()),
            _ => None,
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.class {
            Some(class) => write!(f, "{}: {}", class, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl fmt::Display for IdentifierError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Unsafe SQL identifier: {:?}", self.identifier)
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Circular dependency detected among: {}",
            self.entities.join(", ")
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl fmt::Display for FlushError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Flush failed, session rolled back: {}", self.cause)
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::Config(err)
    }
}

impl From<IdentifierError> for Error {
    fn from(err: IdentifierError) -> Self {
        Error::IdentifierSecurity(err)
    }
}

impl From<CycleError> for Error {
    fn from(err: CycleError) -> Self {
        Error::Cycle(err)
    }
}

impl From<QueryError> for Error {
    fn from(err: QueryError) -> Self {
        Error::Query(err)
    }
}

/// Result type alias for miniorm operations.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn flush_error_exposes_constraint_cause() {
        let cause = Error::Query(QueryError::constraint(
            "INSERT INTO \"owners\" (\"name\") VALUES (?)",
            "UNIQUE constraint failed: owners.name",
        ));
        let err = Error::flush(cause);

        assert!(err.is_constraint_violation());
        assert_eq!(err.sql(), Some("INSERT INTO \"owners\" (\"name\") VALUES (?)"));
        assert!(err.source().is_some());
        assert!(err.to_string().contains("rolled back"));
    }

    #[test]
    fn flush_does_not_double_wrap() {
        let err = Error::flush(Error::flush(Error::Custom("boom".to_string())));
        match err {
            Error::Flush(inner) => assert!(matches!(*inner.cause, Error::Custom(_))),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn display_messages_name_the_violation() {
        let err = Error::ImmutablePrimaryKey {
            class: "Owner".to_string(),
            column: "id".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Cannot change primary key 'id' of a persisted Owner instance"
        );

        let err = Error::config("Dog", "missing relationship to parent class Animal");
        assert_eq!(
            err.to_string(),
            "Configuration error: Dog: missing relationship to parent class Animal"
        );

        let err = Error::Cycle(CycleError {
            entities: vec!["A(new)".to_string(), "B(new)".to_string()],
        });
        assert_eq!(err.to_string(), "Circular dependency detected among: A(new), B(new)");
    }
}
