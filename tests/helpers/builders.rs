use chrono::Utc;
use concordia::access::types::Purpose;
use concordia::entities;
use sea_orm::{ActiveModelTrait, DatabaseConnection, Set};
use std::collections::BTreeSet;

/// Builder for seeding consents. Inserts through the entity layer so tests
/// can also construct expired or pre-revoked rows.
pub struct ConsentBuilder {
    patient_id: String,
    grantor_id: String,
    grantee_id: String,
    purpose: Purpose,
    data_types: BTreeSet<String>,
    status: String,
    granted_at: i64,
    expires_at: Option<i64>,
}

impl ConsentBuilder {
    pub fn new(patient_id: &str, grantee_id: &str) -> Self {
        Self {
            patient_id: patient_id.to_string(),
            grantor_id: patient_id.to_string(),
            grantee_id: grantee_id.to_string(),
            purpose: Purpose::Treatment,
            data_types: ["care_notes"].into_iter().map(String::from).collect(),
            status: "active".to_string(),
            granted_at: Utc::now().timestamp(),
            expires_at: None,
        }
    }

    pub fn with_grantor(mut self, grantor_id: &str) -> Self {
        self.grantor_id = grantor_id.to_string();
        self
    }

    pub fn with_purpose(mut self, purpose: Purpose) -> Self {
        self.purpose = purpose;
        self
    }

    pub fn with_data_types(mut self, data_types: impl IntoIterator<Item = &'static str>) -> Self {
        self.data_types = data_types.into_iter().map(String::from).collect();
        self
    }

    pub fn expires_in(mut self, secs: i64) -> Self {
        self.expires_at = Some(Utc::now().timestamp() + secs);
        self
    }

    pub fn expired(mut self) -> Self {
        self.granted_at = Utc::now().timestamp() - 7200;
        self.expires_at = Some(Utc::now().timestamp() - 3600);
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::consent::Model {
        let data_types_json =
            serde_json::to_string(&self.data_types).expect("Failed to encode data types");
        let consent = entities::consent::ActiveModel {
            patient_id: Set(self.patient_id),
            grantor_id: Set(self.grantor_id),
            grantee_id: Set(self.grantee_id),
            purpose: Set(self.purpose.as_str().to_string()),
            data_types: Set(data_types_json),
            status: Set(self.status),
            granted_at: Set(self.granted_at),
            expires_at: Set(self.expires_at),
            revoked_at: Set(None),
            revoked_by: Set(None),
            revoke_reason: Set(None),
            ..Default::default()
        };
        consent.insert(db).await.expect("Failed to create test consent")
    }
}

/// Builder for seeding treatment relationships. The relationship store is
/// maintained externally in production, so tests write rows directly.
pub struct RelationshipBuilder {
    provider_id: String,
    patient_id: String,
    relationship_type: String,
    active: bool,
    started_at: i64,
    ended_at: Option<i64>,
}

impl RelationshipBuilder {
    pub fn new(provider_id: &str, patient_id: &str) -> Self {
        Self {
            provider_id: provider_id.to_string(),
            patient_id: patient_id.to_string(),
            relationship_type: "primary_care".to_string(),
            active: true,
            started_at: Utc::now().timestamp() - 86400,
            ended_at: None,
        }
    }

    pub fn with_type(mut self, relationship_type: &str) -> Self {
        self.relationship_type = relationship_type.to_string();
        self
    }

    pub fn inactive(mut self) -> Self {
        self.active = false;
        self
    }

    pub fn ended(mut self) -> Self {
        self.ended_at = Some(Utc::now().timestamp() - 3600);
        self
    }

    pub async fn create(self, db: &DatabaseConnection) -> entities::treatment_relationship::Model {
        let relationship = entities::treatment_relationship::ActiveModel {
            provider_id: Set(self.provider_id),
            patient_id: Set(self.patient_id),
            relationship_type: Set(self.relationship_type),
            active: Set(if self.active { 1 } else { 0 }),
            started_at: Set(self.started_at),
            ended_at: Set(self.ended_at),
            ..Default::default()
        };
        relationship
            .insert(db)
            .await
            .expect("Failed to create test relationship")
    }
}
