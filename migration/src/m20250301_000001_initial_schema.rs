use sea_orm_migration::{prelude::*, schema::*};

#[derive(DeriveMigrationName)]
pub struct Migration;

/// Auto-increment primary key with a backend-specific column type.
/// Postgres wants BIGSERIAL, SQLite wants plain INTEGER for rowid aliasing.
fn auto_id<T: IntoIden>(manager: &SchemaManager<'_>, col: T) -> ColumnDef {
    match manager.get_database_backend() {
        sea_orm::DatabaseBackend::Postgres => ColumnDef::new(col)
            .big_integer()
            .not_null()
            .auto_increment()
            .primary_key()
            .to_owned(),
        _ => ColumnDef::new(col)
            .integer()
            .not_null()
            .auto_increment()
            .primary_key()
            .to_owned(),
    }
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        // Enable foreign keys for SQLite
        if manager.get_database_backend() == sea_orm::DatabaseBackend::Sqlite {
            manager
                .get_connection()
                .execute_unprepared("PRAGMA foreign_keys = ON")
                .await?;
        }

        // Create consents table
        manager
            .create_table(
                Table::create()
                    .table(Consents::Table)
                    .if_not_exists()
                    .col(auto_id(manager, Consents::Id))
                    .col(string(Consents::PatientId))
                    .col(string(Consents::GrantorId))
                    .col(string(Consents::GranteeId))
                    .col(string(Consents::Purpose))
                    .col(string(Consents::DataTypes))
                    .col(
                        ColumnDef::new(Consents::Status)
                            .string()
                            .not_null()
                            .default("active"),
                    )
                    .col(big_integer(Consents::GrantedAt))
                    .col(big_integer_null(Consents::ExpiresAt))
                    .col(big_integer_null(Consents::RevokedAt))
                    .col(string_null(Consents::RevokedBy))
                    .col(string_null(Consents::RevokeReason))
                    .to_owned(),
            )
            .await?;

        // Index on patient_id + grantee_id for decision-path lookups
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consents_patient_grantee")
                    .table(Consents::Table)
                    .col(Consents::PatientId)
                    .col(Consents::GranteeId)
                    .to_owned(),
            )
            .await?;

        // Index on patient_id for per-patient consent listings
        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_consents_patient")
                    .table(Consents::Table)
                    .col(Consents::PatientId)
                    .to_owned(),
            )
            .await?;

        // Create treatment_relationships table
        manager
            .create_table(
                Table::create()
                    .table(TreatmentRelationships::Table)
                    .if_not_exists()
                    .col(auto_id(manager, TreatmentRelationships::Id))
                    .col(string(TreatmentRelationships::ProviderId))
                    .col(string(TreatmentRelationships::PatientId))
                    .col(string(TreatmentRelationships::RelationshipType))
                    .col(
                        ColumnDef::new(TreatmentRelationships::Active)
                            .big_integer()
                            .not_null()
                            .default(1),
                    )
                    .col(big_integer(TreatmentRelationships::StartedAt))
                    .col(big_integer_null(TreatmentRelationships::EndedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_relationships_provider_patient")
                    .table(TreatmentRelationships::Table)
                    .col(TreatmentRelationships::ProviderId)
                    .col(TreatmentRelationships::PatientId)
                    .to_owned(),
            )
            .await?;

        // Create phi_access_log table (append-only)
        manager
            .create_table(
                Table::create()
                    .table(PhiAccessLog::Table)
                    .if_not_exists()
                    .col(auto_id(manager, PhiAccessLog::Id))
                    .col(string(PhiAccessLog::AccessorId))
                    .col(string(PhiAccessLog::PatientId))
                    .col(string(PhiAccessLog::Purpose))
                    .col(string(PhiAccessLog::DataTypesRequested))
                    .col(big_integer_null(PhiAccessLog::ConsentId))
                    .col(big_integer_null(PhiAccessLog::RelationshipId))
                    .col(big_integer(PhiAccessLog::Granted))
                    .col(
                        ColumnDef::new(PhiAccessLog::EmergencyAccess)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(string_null(PhiAccessLog::DenialReason))
                    .col(big_integer(PhiAccessLog::CreatedAt))
                    .col(string_null(PhiAccessLog::IpAddress))
                    .col(string_null(PhiAccessLog::UserAgent))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_phi_access_log_patient_created")
                    .table(PhiAccessLog::Table)
                    .col(PhiAccessLog::PatientId)
                    .col(PhiAccessLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_phi_access_log_accessor")
                    .table(PhiAccessLog::Table)
                    .col(PhiAccessLog::AccessorId)
                    .to_owned(),
            )
            .await?;

        // Create emergency_access_log table (append-only)
        manager
            .create_table(
                Table::create()
                    .table(EmergencyAccessLog::Table)
                    .if_not_exists()
                    .col(auto_id(manager, EmergencyAccessLog::Id))
                    .col(string(EmergencyAccessLog::AccessorId))
                    .col(string(EmergencyAccessLog::PatientId))
                    .col(string(EmergencyAccessLog::Justification))
                    .col(string(EmergencyAccessLog::DataTypesRequested))
                    .col(string(EmergencyAccessLog::IncidentId))
                    .col(big_integer(EmergencyAccessLog::CreatedAt))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_emergency_access_log_created")
                    .table(EmergencyAccessLog::Table)
                    .col(EmergencyAccessLog::CreatedAt)
                    .to_owned(),
            )
            .await?;

        // Create job_executions table
        manager
            .create_table(
                Table::create()
                    .table(JobExecutions::Table)
                    .if_not_exists()
                    .col(auto_id(manager, JobExecutions::Id))
                    .col(string(JobExecutions::JobName))
                    .col(big_integer(JobExecutions::StartedAt))
                    .col(big_integer_null(JobExecutions::CompletedAt))
                    .col(big_integer_null(JobExecutions::Success))
                    .col(string_null(JobExecutions::ErrorMessage))
                    .col(big_integer_null(JobExecutions::RecordsProcessed))
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .if_not_exists()
                    .name("idx_job_executions_started")
                    .table(JobExecutions::Table)
                    .col(JobExecutions::StartedAt)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(JobExecutions::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(EmergencyAccessLog::Table).to_owned())
            .await?;
        manager
            .drop_table(Table::drop().table(PhiAccessLog::Table).to_owned())
            .await?;
        manager
            .drop_table(
                Table::drop()
                    .table(TreatmentRelationships::Table)
                    .to_owned(),
            )
            .await?;
        manager
            .drop_table(Table::drop().table(Consents::Table).to_owned())
            .await?;
        Ok(())
    }
}

#[derive(DeriveIden)]
enum Consents {
    Table,
    Id,
    PatientId,
    GrantorId,
    GranteeId,
    Purpose,
    DataTypes,
    Status,
    GrantedAt,
    ExpiresAt,
    RevokedAt,
    RevokedBy,
    RevokeReason,
}

#[derive(DeriveIden)]
enum TreatmentRelationships {
    Table,
    Id,
    ProviderId,
    PatientId,
    RelationshipType,
    Active,
    StartedAt,
    EndedAt,
}

#[derive(DeriveIden)]
enum PhiAccessLog {
    Table,
    Id,
    AccessorId,
    PatientId,
    Purpose,
    DataTypesRequested,
    ConsentId,
    RelationshipId,
    Granted,
    EmergencyAccess,
    DenialReason,
    CreatedAt,
    IpAddress,
    UserAgent,
}

#[derive(DeriveIden)]
enum EmergencyAccessLog {
    Table,
    Id,
    AccessorId,
    PatientId,
    Justification,
    DataTypesRequested,
    IncidentId,
    CreatedAt,
}

#[derive(DeriveIden)]
enum JobExecutions {
    Table,
    Id,
    JobName,
    StartedAt,
    CompletedAt,
    Success,
    ErrorMessage,
    RecordsProcessed,
}
