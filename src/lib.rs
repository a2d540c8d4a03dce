//! Declarative record mapping and query utilities for SQLite.
//!
//! # Intention
//!
//! - Reflect declared record models into SQL table schemas.
//! - Persist and query record instances through one uniform API.
//! - Wire relations between models bidirectionally, without hand-written
//!   join SQL.
//! - Build deferred, partially-bound predicate/arithmetic trees over
//!   field operands.
//!
//! # Architectural Boundaries
//!
//! - Only record/schema/query code belongs here; no business logic.
//! - Statements are parameterized; rendered expression text is a
//!   debugging aid, never SQL.
//! - One shared connection, one lock: statements serialize strictly and
//!   commit independently (auto-commit, no enclosing transactions).

pub mod connection;
pub mod database;
pub mod error;
pub mod expr;
pub mod field;
pub mod query;
pub mod record;
pub mod schema;
pub mod value;

pub use connection::ConnectionManager;
pub use database::Database;
pub use error::{Error, Result};
pub use expr::{EvalContext, Evaluated, ExprOp, Expression, Operand};
pub use field::{Field, FieldGroup, FieldKind, SaveAction};
pub use query::{DataManager, Query, QueryOperator, SelectOptions};
pub use record::{GroupParts, Record, ROWID};
pub use schema::{Model, ModelDef, SchemaRegistry, GROUP_SEPARATOR};
pub use value::Value;
