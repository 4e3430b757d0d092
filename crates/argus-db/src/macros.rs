//! Macros for defining entity schemas.
//!
//! The [`define_entity!`] macro generates table/alias constants and typed
//! column constants for a table.

/// Defines a module with typed column constants for a database table.
///
/// # Syntax
///
/// ```ignore
/// define_entity!(
///     token {
///         table: "token",
///         alias: "t",
///         columns: {
///             ID: i64 => "tokenid",
///             NAME: String => "name"
///         }
///     }
/// );
/// ```
///
/// This expands to a module `token` with `TABLE`, `ALIAS` and one
/// `Col`-typed constant per column.
#[macro_export]
macro_rules! define_entity {
    (
        $entity:ident {
            table: $table:literal,
            alias: $alias:literal,
            columns: {
                $($col_name:ident: $col_type:ty => $db_col:literal),* $(,)?
            }
        }
    ) => {
        pub mod $entity {
            #[allow(unused_imports)]
            use $crate::expr::column::Col;

            pub const TABLE: &str = $table;
            pub const ALIAS: &str = $alias;

            $(
                $crate::define_column!($col_name, $col_type, $db_col);
            )*
        }
    };
}

#[macro_export]
macro_rules! define_column {
    // Optional types
    ($name:ident, Option<$inner:ty>, $db_col:literal) => {
        pub const $name: Col<Option<$inner>> = Col::new($db_col);
    };

    // Regular types (fallback)
    ($name:ident, $type:ty, $db_col:literal) => {
        pub const $name: Col<$type> = Col::new($db_col);
    };
}
