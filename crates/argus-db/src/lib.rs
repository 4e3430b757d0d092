pub mod connection;
pub mod error;
pub mod expr;
pub mod helpers;
pub mod macros;
pub mod migration;
pub mod query;
pub mod traits;

pub use connection::Database;
pub use error::{DbError, Result};
pub use helpers::*;
pub use query::*;
pub use traits::{Expression, FromRow};
