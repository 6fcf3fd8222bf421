//! The closed set of operations a caller can request

use crate::schema::{InputSchema, SchemaError};
use hostgate_guard::Role;
use serde::{Serialize, Serializer};
use std::fmt::{self, Display, Formatter};

/// One whitelisted administrative operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `apps.list`: every managed application
    AppsList,
    /// `apps.status`: current release and service state
    AppsStatus,
    /// `apps.logs`: action logs of one release
    AppsLogs,
    /// `release.status`: pipeline progress of one release
    ReleaseStatus,
    /// `db.tables`: tables of the application database
    DbTables,
    /// `apps.start`
    AppsStart,
    /// `apps.stop`
    AppsStop,
    /// `apps.restart`
    AppsRestart,
    /// `db.backup`: dump into `<app>/backups`
    DbBackup,
    /// `apps.init`: create the directory layout
    AppsInit,
    /// `apps.env.set`: upsert `.env` keys
    AppsEnvSet,
    /// `db.create`
    DbCreate,
    /// `db.query`: one SQL statement
    DbQuery,
    /// `repo.clone`: clone or fast-forward `<app>/src`
    RepoClone,
    /// `supabase.ensure`: bring up the backing stack
    SupabaseEnsure,
    /// `supabase.apply`: migrations and functions
    SupabaseApply,
    /// `release.deploy`: materialize and switch `current`
    ReleaseDeploy,
    /// `apps.remove`: tear down and delete, needs confirmation
    AppsRemove,
    /// `db.drop`: needs confirmation
    DbDrop,
}

impl Capability {
    /// Registry order: by required role, then by family
    pub const ALL: [Capability; 19] = [
        Capability::AppsList,
        Capability::AppsStatus,
        Capability::AppsLogs,
        Capability::ReleaseStatus,
        Capability::DbTables,
        Capability::AppsStart,
        Capability::AppsStop,
        Capability::AppsRestart,
        Capability::DbBackup,
        Capability::AppsInit,
        Capability::AppsEnvSet,
        Capability::DbCreate,
        Capability::DbQuery,
        Capability::RepoClone,
        Capability::SupabaseEnsure,
        Capability::SupabaseApply,
        Capability::ReleaseDeploy,
        Capability::AppsRemove,
        Capability::DbDrop,
    ];

    /// Wire name, e.g. `release.deploy`
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Capability::AppsList => "apps.list",
            Capability::AppsStatus => "apps.status",
            Capability::AppsLogs => "apps.logs",
            Capability::ReleaseStatus => "release.status",
            Capability::DbTables => "db.tables",
            Capability::AppsStart => "apps.start",
            Capability::AppsStop => "apps.stop",
            Capability::AppsRestart => "apps.restart",
            Capability::DbBackup => "db.backup",
            Capability::AppsInit => "apps.init",
            Capability::AppsEnvSet => "apps.env.set",
            Capability::DbCreate => "db.create",
            Capability::DbQuery => "db.query",
            Capability::RepoClone => "repo.clone",
            Capability::SupabaseEnsure => "supabase.ensure",
            Capability::SupabaseApply => "supabase.apply",
            Capability::ReleaseDeploy => "release.deploy",
            Capability::AppsRemove => "apps.remove",
            Capability::DbDrop => "db.drop",
        }
    }

    /// Look up a capability by wire name
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|c| c.name() == name)
    }

    /// Minimum role allowed to invoke this capability
    #[must_use]
    pub const fn required_role(self) -> Role {
        match self {
            Capability::AppsList
            | Capability::AppsStatus
            | Capability::AppsLogs
            | Capability::ReleaseStatus
            | Capability::DbTables => Role::Observer,
            Capability::AppsStart
            | Capability::AppsStop
            | Capability::AppsRestart
            | Capability::DbBackup => Role::Operator,
            Capability::AppsInit
            | Capability::AppsEnvSet
            | Capability::DbCreate
            | Capability::DbQuery
            | Capability::RepoClone
            | Capability::SupabaseEnsure
            | Capability::SupabaseApply
            | Capability::ReleaseDeploy => Role::Builder,
            Capability::AppsRemove | Capability::DbDrop => Role::Admin,
        }
    }

    #[must_use]
    pub const fn description(self) -> &'static str {
        match self {
            Capability::AppsList => "List managed applications and their current release",
            Capability::AppsStatus => "Show the current release and service state of an application",
            Capability::AppsLogs => "Read the action logs of a release",
            Capability::ReleaseStatus => "Show how far a release has progressed through the pipeline",
            Capability::DbTables => "List tables of the application database",
            Capability::AppsStart => "Start the application's services",
            Capability::AppsStop => "Stop the application's services",
            Capability::AppsRestart => "Restart the application's services",
            Capability::DbBackup => "Dump the application database into its backups directory",
            Capability::AppsInit => "Create the directory layout of a new application",
            Capability::AppsEnvSet => "Set keys in the application's .env file",
            Capability::DbCreate => "Create the application database",
            Capability::DbQuery => "Run one SQL statement against the application database",
            Capability::RepoClone => "Clone or fast-forward the application source",
            Capability::SupabaseEnsure => "Make sure the application's backing stack is running",
            Capability::SupabaseApply => "Apply database migrations and deploy functions",
            Capability::ReleaseDeploy => "Materialize a release and switch the current pointer to it",
            Capability::AppsRemove => "Tear down an application and delete its directory",
            Capability::DbDrop => "Drop the application database",
        }
    }

    /// Accepted arguments, generated from the struct the handler parses
    ///
    /// # Errors
    /// Returns a [`SchemaError`] if the generated schema does not compile
    pub fn schema(self) -> Result<InputSchema, SchemaError> {
        crate::handlers::input_schema(self)
    }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Capability {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn names_are_unique_and_round_trip() {
        let names: HashSet<_> = Capability::ALL.iter().map(|c| c.name()).collect();
        assert_eq!(names.len(), Capability::ALL.len());
        for cap in Capability::ALL {
            assert_eq!(Capability::from_name(cap.name()), Some(cap));
        }
        assert_eq!(Capability::from_name("apps.shell"), None);
        assert_eq!(Capability::from_name("APPS.LIST"), None);
    }

    #[test]
    fn registry_order_is_by_role() {
        let levels: Vec<u8> = Capability::ALL.iter().map(|c| c.required_role().level()).collect();
        let mut sorted = levels.clone();
        sorted.sort_unstable();
        assert_eq!(levels, sorted);
    }

    #[test]
    fn destructive_capabilities_need_admin() {
        assert_eq!(Capability::AppsRemove.required_role(), Role::Admin);
        assert_eq!(Capability::DbDrop.required_role(), Role::Admin);
        for cap in [Capability::AppsRemove, Capability::DbDrop] {
            assert!(cap.schema().unwrap().required_names().contains(&"confirm"));
        }
    }

    #[test]
    fn every_schema_compiles_and_is_closed() {
        for cap in Capability::ALL {
            let schema = cap.schema().unwrap();
            assert_eq!(schema.to_json_schema()["additionalProperties"], false, "{cap}");
        }
    }

    #[test]
    fn deploy_schema_matches_contract() {
        let schema = Capability::ReleaseDeploy.schema().unwrap();
        let required: HashSet<_> = schema.required_names().into_iter().collect();
        assert_eq!(
            required,
            HashSet::from(["release_id", "app_slug", "project_path", "type", "service", "port", "env_required"])
        );
        assert!(schema.accepts("domain") && !required.contains("domain"));
        assert!(schema.accepts("healthcheck") && !required.contains("healthcheck"));
        assert!(!schema.accepts("command"));
    }
}
