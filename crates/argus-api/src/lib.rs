//! Entity services for the argus management API.
//!
//! Each entity exposes CRUD-style operations over its backing tables:
//! `get` assembles one SQL statement from validated options, mutations run
//! validate → authorize → diff → persist → audit inside one transaction.
//! Caller identity is passed explicitly into every operation.

use argus_db::{migration, Database};

pub mod audit;
pub mod config;
pub mod entities;
pub mod error;
pub mod options;
pub mod output;
pub mod permission;
pub mod query;
pub mod relation;
pub mod user;
pub mod validate;

pub use config::ApiConfig;
pub use error::{ApiError, ApiResult};
pub use options::{Filter, GetOptions, GetResult, Output, SelectRelated, SortOrder};
pub use user::{ApiUser, Role};

use entities::{
    auditlog::AuditLogApi, authentication::AuthenticationApi,
    autoregistration::AutoregistrationApi, dcheck::DCheckApi, graphitem::GraphItemApi,
    hanode::HaNodeApi, housekeeping::HousekeepingApi, module::ModuleApi, settings::SettingsApi,
    token::TokenApi, valuemap::ValueMapApi,
};

/// The service registry: one handle per entity, sharing a database connection
/// and library configuration.
pub struct Api {
    pub(crate) db: Database,
    pub(crate) config: ApiConfig,
}

impl Api {
    pub fn new(db: Database, config: ApiConfig) -> Self {
        Self { db, config }
    }

    /// Opens (or creates) the database at `path` and applies pending
    /// migrations.
    pub fn open<P: AsRef<std::path::Path>>(path: P, config: ApiConfig) -> ApiResult<Self> {
        let db = Database::new(path)?;
        migration::migrate(&db)?;
        Ok(Self::new(db, config))
    }

    /// In-memory instance with a fresh schema.
    pub fn in_memory(config: ApiConfig) -> ApiResult<Self> {
        let db = Database::in_memory()?;
        migration::migrate(&db)?;
        Ok(Self::new(db, config))
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn auditlog(&self) -> AuditLogApi<'_> {
        AuditLogApi { api: self }
    }

    pub fn authentication(&self) -> AuthenticationApi<'_> {
        AuthenticationApi { api: self }
    }

    pub fn autoregistration(&self) -> AutoregistrationApi<'_> {
        AutoregistrationApi { api: self }
    }

    pub fn dchecks(&self) -> DCheckApi<'_> {
        DCheckApi { api: self }
    }

    pub fn graph_items(&self) -> GraphItemApi<'_> {
        GraphItemApi { api: self }
    }

    pub fn ha_nodes(&self) -> HaNodeApi<'_> {
        HaNodeApi { api: self }
    }

    pub fn housekeeping(&self) -> HousekeepingApi<'_> {
        HousekeepingApi { api: self }
    }

    pub fn modules(&self) -> ModuleApi<'_> {
        ModuleApi { api: self }
    }

    pub fn settings(&self) -> SettingsApi<'_> {
        SettingsApi { api: self }
    }

    pub fn tokens(&self) -> TokenApi<'_> {
        TokenApi { api: self }
    }

    pub fn valuemaps(&self) -> ValueMapApi<'_> {
        ValueMapApi { api: self }
    }
}
