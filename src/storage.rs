use crate::access::types::Purpose;
use crate::entities;
use crate::errors::ConsentError;
use crate::settings::Database as DbCfg;
use base64ct::Encoding;
use chrono::Utc;
use rand::RngCore;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Database, DatabaseConnection, EntityTrait, PaginatorTrait,
    QueryFilter, QueryOrder, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const CONSENT_STATUS_ACTIVE: &str = "active";
pub const CONSENT_STATUS_REVOKED: &str = "revoked";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientConsent {
    pub id: i64,
    pub patient_id: String,
    pub grantor_id: String,
    pub grantee_id: String,
    pub purpose: Purpose,
    pub data_types: BTreeSet<String>,
    pub status: String,
    pub granted_at: i64,
    pub expires_at: Option<i64>,
    pub revoked_at: Option<i64>,
    pub revoked_by: Option<String>,
    pub revoke_reason: Option<String>,
}

impl PatientConsent {
    /// Active means: status is active, never revoked, and not past expiry.
    pub fn is_active(&self, now: i64) -> bool {
        self.status == CONSENT_STATUS_ACTIVE
            && self.revoked_at.is_none()
            && self.expires_at.map_or(true, |exp| exp > now)
    }

    /// Full coverage: the consent's data types must be a superset of the
    /// request. Partial overlap never satisfies a request.
    pub fn covers(&self, requested: &BTreeSet<String>) -> bool {
        requested.is_subset(&self.data_types)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewConsent {
    pub patient_id: String,
    pub grantor_id: String,
    pub grantee_id: String,
    pub purpose: Purpose,
    pub data_types: BTreeSet<String>,
    pub expires_at: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevokeOutcome {
    Revoked,
    /// Only the patient or the original grantor may revoke
    Unauthorized,
    /// Unknown id, or the consent was already revoked
    NotFound,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreatmentRelationship {
    pub id: i64,
    pub provider_id: String,
    pub patient_id: String,
    pub relationship_type: String,
    pub active: bool,
    pub started_at: i64,
    pub ended_at: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewPhiAccessLog {
    pub accessor_id: String,
    pub patient_id: String,
    pub purpose: Purpose,
    pub data_types_requested: BTreeSet<String>,
    pub consent_id: Option<i64>,
    pub relationship_id: Option<i64>,
    pub granted: bool,
    pub emergency_access: bool,
    pub denial_reason: Option<String>,
    pub created_at: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEmergencyAccessLog {
    pub accessor_id: String,
    pub patient_id: String,
    pub justification: String,
    pub data_types_requested: BTreeSet<String>,
    pub incident_id: String,
    pub created_at: i64,
}

pub async fn init(cfg: &DbCfg) -> Result<DatabaseConnection, ConsentError> {
    let db = Database::connect(&cfg.url).await?;
    Ok(db)
}

fn consent_from_model(model: entities::consent::Model) -> Result<PatientConsent, ConsentError> {
    let purpose: Purpose = model
        .purpose
        .parse()
        .map_err(|e: String| ConsentError::Other(format!("consent {}: {e}", model.id)))?;
    let data_types: BTreeSet<String> = serde_json::from_str(&model.data_types)?;
    Ok(PatientConsent {
        id: model.id,
        patient_id: model.patient_id,
        grantor_id: model.grantor_id,
        grantee_id: model.grantee_id,
        purpose,
        data_types,
        status: model.status,
        granted_at: model.granted_at,
        expires_at: model.expires_at,
        revoked_at: model.revoked_at,
        revoked_by: model.revoked_by,
        revoke_reason: model.revoke_reason,
    })
}

pub async fn create_consent(
    db: &DatabaseConnection,
    input: NewConsent,
) -> Result<PatientConsent, ConsentError> {
    if input.patient_id.trim().is_empty()
        || input.grantor_id.trim().is_empty()
        || input.grantee_id.trim().is_empty()
    {
        return Err(ConsentError::BadRequest(
            "patient_id, grantor_id and grantee_id are required".to_string(),
        ));
    }
    if input.data_types.is_empty() {
        return Err(ConsentError::BadRequest(
            "a consent must name at least one data type".to_string(),
        ));
    }
    let now = Utc::now().timestamp();
    if let Some(exp) = input.expires_at {
        if exp <= now {
            return Err(ConsentError::BadRequest(
                "expires_at must be in the future".to_string(),
            ));
        }
    }

    let data_types_json = serde_json::to_string(&input.data_types)?;
    let consent = entities::consent::ActiveModel {
        patient_id: Set(input.patient_id.clone()),
        grantor_id: Set(input.grantor_id.clone()),
        grantee_id: Set(input.grantee_id.clone()),
        purpose: Set(input.purpose.as_str().to_string()),
        data_types: Set(data_types_json),
        status: Set(CONSENT_STATUS_ACTIVE.to_string()),
        granted_at: Set(now),
        expires_at: Set(input.expires_at),
        revoked_at: Set(None),
        revoked_by: Set(None),
        revoke_reason: Set(None),
        ..Default::default()
    };

    let model = consent.insert(db).await?;
    consent_from_model(model)
}

pub async fn get_consent(
    db: &DatabaseConnection,
    consent_id: i64,
) -> Result<Option<PatientConsent>, ConsentError> {
    use entities::consent::{Column, Entity};

    if let Some(model) = Entity::find()
        .filter(Column::Id.eq(consent_id))
        .one(db)
        .await?
    {
        Ok(Some(consent_from_model(model)?))
    } else {
        Ok(None)
    }
}

/// Revoke a consent on behalf of `revoked_by`. The status flip is conditional
/// on the row still being active, so concurrent revokes resolve to exactly
/// one effect; the loser sees NotFound.
pub async fn revoke_consent(
    db: &DatabaseConnection,
    consent_id: i64,
    revoked_by: &str,
    reason: Option<&str>,
) -> Result<RevokeOutcome, ConsentError> {
    use entities::consent::{ActiveModel, Column, Entity};

    let Some(existing) = Entity::find()
        .filter(Column::Id.eq(consent_id))
        .one(db)
        .await?
    else {
        return Ok(RevokeOutcome::NotFound);
    };

    if revoked_by != existing.patient_id && revoked_by != existing.grantor_id {
        return Ok(RevokeOutcome::Unauthorized);
    }

    let now = Utc::now().timestamp();
    let update = ActiveModel {
        status: Set(CONSENT_STATUS_REVOKED.to_string()),
        revoked_at: Set(Some(now)),
        revoked_by: Set(Some(revoked_by.to_string())),
        revoke_reason: Set(reason.map(|r| r.to_string())),
        ..Default::default()
    };

    let result = Entity::update_many()
        .set(update)
        .filter(Column::Id.eq(consent_id))
        .filter(Column::Status.eq(CONSENT_STATUS_ACTIVE))
        .exec(db)
        .await?;

    if result.rows_affected == 0 {
        // Lost the race, or the consent was revoked earlier
        return Ok(RevokeOutcome::NotFound);
    }
    Ok(RevokeOutcome::Revoked)
}

/// First active consent from `patient` to `grantee` for `purpose` whose data
/// types fully cover the request, oldest grant first.
pub async fn get_active_consent(
    db: &DatabaseConnection,
    patient: &str,
    grantee: &str,
    purpose: Purpose,
    requested: &BTreeSet<String>,
) -> Result<Option<PatientConsent>, ConsentError> {
    use entities::consent::{Column, Entity};

    let now = Utc::now().timestamp();
    let models = Entity::find()
        .filter(Column::PatientId.eq(patient))
        .filter(Column::GranteeId.eq(grantee))
        .filter(Column::Purpose.eq(purpose.as_str()))
        .filter(Column::Status.eq(CONSENT_STATUS_ACTIVE))
        .order_by_asc(Column::GrantedAt)
        .all(db)
        .await?;

    for model in models {
        let consent = consent_from_model(model)?;
        if consent.is_active(now) && consent.covers(requested) {
            return Ok(Some(consent));
        }
    }
    Ok(None)
}

/// Active consents for a patient, optionally narrowed to one grantee.
/// Expired rows are filtered out even when the status column still says
/// active.
pub async fn list_active_consents(
    db: &DatabaseConnection,
    patient: &str,
    grantee: Option<&str>,
) -> Result<Vec<PatientConsent>, ConsentError> {
    use entities::consent::{Column, Entity};

    let now = Utc::now().timestamp();
    let mut query = Entity::find()
        .filter(Column::PatientId.eq(patient))
        .filter(Column::Status.eq(CONSENT_STATUS_ACTIVE));
    if let Some(grantee) = grantee {
        query = query.filter(Column::GranteeId.eq(grantee));
    }
    let models = query.order_by_asc(Column::GrantedAt).all(db).await?;

    let mut consents = Vec::with_capacity(models.len());
    for model in models {
        let consent = consent_from_model(model)?;
        if consent.is_active(now) {
            consents.push(consent);
        }
    }
    Ok(consents)
}

fn relationship_from_model(model: entities::treatment_relationship::Model) -> TreatmentRelationship {
    TreatmentRelationship {
        id: model.id,
        provider_id: model.provider_id,
        patient_id: model.patient_id,
        relationship_type: model.relationship_type,
        active: model.active != 0,
        started_at: model.started_at,
        ended_at: model.ended_at,
    }
}

/// Relationship rows are maintained by the relationship-management service;
/// this side only reads them.
pub async fn get_active_relationship(
    db: &DatabaseConnection,
    provider: &str,
    patient: &str,
) -> Result<Option<TreatmentRelationship>, ConsentError> {
    use entities::treatment_relationship::{Column, Entity};

    let now = Utc::now().timestamp();
    let models = Entity::find()
        .filter(Column::ProviderId.eq(provider))
        .filter(Column::PatientId.eq(patient))
        .filter(Column::Active.eq(1))
        .all(db)
        .await?;

    Ok(models
        .into_iter()
        .map(relationship_from_model)
        .find(|rel| rel.ended_at.map_or(true, |end| end > now)))
}

// Audit log writes. Insert-only: no update or delete exists for these tables.

pub async fn insert_phi_access_log(
    db: &DatabaseConnection,
    entry: &NewPhiAccessLog,
) -> Result<i64, ConsentError> {
    let data_types_json = serde_json::to_string(&entry.data_types_requested)?;
    let row = entities::phi_access_log::ActiveModel {
        accessor_id: Set(entry.accessor_id.clone()),
        patient_id: Set(entry.patient_id.clone()),
        purpose: Set(entry.purpose.as_str().to_string()),
        data_types_requested: Set(data_types_json),
        consent_id: Set(entry.consent_id),
        relationship_id: Set(entry.relationship_id),
        granted: Set(if entry.granted { 1 } else { 0 }),
        emergency_access: Set(if entry.emergency_access { 1 } else { 0 }),
        denial_reason: Set(entry.denial_reason.clone()),
        created_at: Set(entry.created_at),
        ip_address: Set(entry.ip_address.clone()),
        user_agent: Set(entry.user_agent.clone()),
        ..Default::default()
    };
    let model = row.insert(db).await?;
    Ok(model.id)
}

pub async fn insert_emergency_access_log(
    db: &DatabaseConnection,
    entry: &NewEmergencyAccessLog,
) -> Result<i64, ConsentError> {
    let data_types_json = serde_json::to_string(&entry.data_types_requested)?;
    let row = entities::emergency_access_log::ActiveModel {
        accessor_id: Set(entry.accessor_id.clone()),
        patient_id: Set(entry.patient_id.clone()),
        justification: Set(entry.justification.clone()),
        data_types_requested: Set(data_types_json),
        incident_id: Set(entry.incident_id.clone()),
        created_at: Set(entry.created_at),
        ..Default::default()
    };
    let model = row.insert(db).await?;
    Ok(model.id)
}

pub async fn list_phi_access_logs(
    db: &DatabaseConnection,
    patient: &str,
) -> Result<Vec<entities::phi_access_log::Model>, ConsentError> {
    use entities::phi_access_log::{Column, Entity};

    let models = Entity::find()
        .filter(Column::PatientId.eq(patient))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?;
    Ok(models)
}

pub async fn list_emergency_access_logs(
    db: &DatabaseConnection,
    patient: &str,
) -> Result<Vec<entities::emergency_access_log::Model>, ConsentError> {
    use entities::emergency_access_log::{Column, Entity};

    let models = Entity::find()
        .filter(Column::PatientId.eq(patient))
        .order_by_asc(Column::CreatedAt)
        .all(db)
        .await?;
    Ok(models)
}

/// Count of break-glass grants at or after `since` (unix seconds), for the
/// periodic compliance review sweep.
pub async fn count_emergency_grants_since(
    db: &DatabaseConnection,
    since: i64,
) -> Result<u64, ConsentError> {
    use entities::emergency_access_log::{Column, Entity};

    let count = Entity::find()
        .filter(Column::CreatedAt.gte(since))
        .count(db)
        .await?;
    Ok(count)
}

/// Incident id for break-glass grants, embedded in the decision reason so a
/// reviewer can correlate the decision with the emergency log row.
pub fn random_incident_id() -> String {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("INC-{}", base64ct::Base64UrlUnpadded::encode_string(&bytes))
}
