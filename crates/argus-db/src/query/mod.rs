//! The query builder.
//!
//! Each query type (SELECT, INSERT, UPDATE, DELETE) has its own builder with
//! chainable methods for composing clauses. Builders produce a final SQL
//! string plus a bound parameter list and execute it against the shared
//! [`crate::Database`] connection.

pub mod clause;
pub mod delete;
pub mod insert;
pub mod select;
pub mod update;

pub use delete::DeleteQuery;
pub use insert::InsertQuery;
pub use select::SelectQuery;
pub use update::UpdateQuery;
