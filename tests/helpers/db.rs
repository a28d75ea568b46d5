use migration::MigratorTrait;
use rolegate::entities;
use sea_orm::{
    ActiveModelTrait, ConnectionTrait, Database, DatabaseConnection, EntityTrait, IntoActiveModel,
    Set,
};
use tempfile::NamedTempFile;

/// Test database with automatic cleanup
pub struct TestDb {
    connection: DatabaseConnection,
    _temp_file: NamedTempFile,
}

impl TestDb {
    /// Create a new test database with migrations applied
    pub async fn new() -> Self {
        // Create temporary SQLite database file
        let temp_file = NamedTempFile::new().expect("Failed to create temp file");
        let db_path = temp_file.path().to_str().expect("Invalid temp file path");
        let db_url = format!("sqlite://{}?mode=rwc", db_path);

        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        migration::Migrator::up(&connection, None)
            .await
            .expect("Failed to run migrations");

        Self {
            connection,
            _temp_file: temp_file,
        }
    }

    /// Get database connection
    pub fn connection(&self) -> &DatabaseConnection {
        &self.connection
    }
}

/// Move the last use of a remembered login into the past.
pub async fn backdate_persistent_login(db: &DatabaseConnection, series: &str, last_used: i64) {
    let model = entities::PersistentLogin::find_by_id(series.to_string())
        .one(db)
        .await
        .expect("Failed to load persistent login")
        .expect("Persistent login not found");

    let mut active = model.into_active_model();
    active.last_used = Set(last_used);
    active
        .update(db)
        .await
        .expect("Failed to backdate persistent login");
}

/// Rename a table, making every query against the old name fail.
pub async fn rename_table(db: &DatabaseConnection, from: &str, to: &str) {
    db.execute_unprepared(&format!("ALTER TABLE {} RENAME TO {}", from, to))
        .await
        .expect("Failed to rename table");
}
