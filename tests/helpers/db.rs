use concordia::access::ConsentService;
use concordia::roles::StaticRoleDirectory;
use concordia::settings::Settings;
use migration::MigratorTrait;
use sea_orm::{Database, DatabaseConnection};
use std::sync::Arc;
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

        // Connect to database
        let connection = Database::connect(&db_url)
            .await
            .expect("Failed to connect to test database");

        // Run migrations
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

/// Service over the given database with default settings and the given
/// role directory.
pub fn make_service(db: &DatabaseConnection, roles: StaticRoleDirectory) -> ConsentService {
    make_service_with(db, Settings::default(), roles)
}

pub fn make_service_with(
    db: &DatabaseConnection,
    settings: Settings,
    roles: StaticRoleDirectory,
) -> ConsentService {
    ConsentService::new(db.clone(), &settings, Arc::new(roles))
}
