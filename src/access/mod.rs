pub mod engine;
pub mod errors;
pub mod types;

use crate::audit::AuditLogger;
use crate::cache::{DecisionCache, RateLimiter};
use crate::errors::ConsentError;
use crate::roles::RoleDirectory;
use crate::settings::Settings;
use crate::storage::{self, NewConsent, NewPhiAccessLog, PatientConsent, RevokeOutcome};
use errors::AccessError;
use sea_orm::DatabaseConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use types::{AccessDecision, AccessRequest, DecisionKey, Purpose};

/// The consent service: decision engine, consent lifecycle, cache layer and
/// audit pipeline behind one explicitly constructed object. Built once at
/// startup and shared by reference; there is no ambient global state.
pub struct ConsentService {
    pub(crate) db: DatabaseConnection,
    pub(crate) cache: DecisionCache,
    pub(crate) audit: AuditLogger,
    pub(crate) roles: Arc<dyn RoleDirectory>,
    pub(crate) store_timeout: Duration,
    limiter: RateLimiter,
}

impl ConsentService {
    pub fn new(
        db: DatabaseConnection,
        settings: &Settings,
        roles: Arc<dyn RoleDirectory>,
    ) -> Self {
        let cache = DecisionCache::new(&settings.cache);
        let limiter = RateLimiter::new(
            settings.cache.rate_limit_per_window,
            settings.cache.rate_window_secs,
        );
        let audit = AuditLogger::new(db.clone(), settings.audit.queue_capacity);
        Self {
            db,
            cache,
            audit,
            roles,
            store_timeout: Duration::from_millis(settings.engine.store_timeout_ms),
            limiter,
        }
    }

    /// Resolve a PHI access request. Denials are `Ok` results; `Err` is
    /// reserved for infrastructure failures, which the caller must retry or
    /// escalate rather than treat as "no".
    ///
    /// Every produced decision, cached or computed, dispatches exactly one
    /// PHI access log entry.
    pub async fn check_access(
        &self,
        request: &AccessRequest,
    ) -> Result<AccessDecision, AccessError> {
        validate(request)?;

        if !self.limiter.check(&request.actor_id) {
            return Err(AccessError::RateLimited {
                actor: request.actor_id.clone(),
            });
        }

        // Emergency decisions turn on the justification and the actor's
        // role, neither of which is in the cache key, so that purpose
        // bypasses the decision cache entirely. Grants get their own
        // episode-scoped tier with a per-request incident id.
        let cacheable = request.purpose != Purpose::Emergency;

        if cacheable {
            if let Some(cached) = self.cache.get_decision(&request.cache_key()) {
                self.finish(request, &cached);
                return Ok(cached);
            }
        }

        let decision = engine::evaluate(self, request).await?;
        self.finish(request, &decision);

        if cacheable {
            self.cache.put_decision(request.cache_key(), decision.clone());
        }
        Ok(decision)
    }

    /// Audit mirror and observational bookkeeping for a produced decision.
    fn finish(&self, request: &AccessRequest, decision: &AccessDecision) {
        self.audit.record_access(NewPhiAccessLog {
            accessor_id: request.actor_id.clone(),
            patient_id: request.patient_id.clone(),
            purpose: request.purpose,
            data_types_requested: request.data_types.clone(),
            consent_id: decision.consent_id,
            relationship_id: decision.relationship_id,
            granted: decision.granted,
            emergency_access: decision.emergency_access,
            denial_reason: (!decision.granted).then(|| decision.reason.clone()),
            created_at: decision.timestamp,
            ip_address: request.ip_address.clone(),
            user_agent: request.user_agent.clone(),
        });
        if decision.granted {
            self.cache
                .record_patient_access(&request.patient_id, &request.actor_id);
        }
    }

    /// Cache-only bulk lookup. Missing keys are misses; callers fall back to
    /// `check_access` for them (which is also where auditing happens).
    pub fn batch_check(&self, keys: &[DecisionKey]) -> HashMap<DecisionKey, AccessDecision> {
        self.cache.batch_check(keys)
    }

    /// Create an active consent and drop the affected patient's cache keys
    /// before reporting success.
    pub async fn create_consent(&self, input: NewConsent) -> Result<PatientConsent, ConsentError> {
        let consent = storage::create_consent(&self.db, input).await?;
        self.cache.invalidate_patient(&consent.patient_id);
        Ok(consent)
    }

    /// Revoke a consent. Only the patient or the original grantor may revoke;
    /// a repeat revoke reports NotFound rather than silently succeeding.
    pub async fn revoke_consent(
        &self,
        consent_id: i64,
        revoked_by: &str,
        reason: Option<&str>,
    ) -> Result<RevokeOutcome, ConsentError> {
        let Some(consent) = storage::get_consent(&self.db, consent_id).await? else {
            return Ok(RevokeOutcome::NotFound);
        };
        let outcome = storage::revoke_consent(&self.db, consent_id, revoked_by, reason).await?;
        if outcome == RevokeOutcome::Revoked {
            self.cache.invalidate_patient(&consent.patient_id);
        }
        Ok(outcome)
    }

    pub async fn list_active_consents(
        &self,
        patient: &str,
        grantee: Option<&str>,
    ) -> Result<Vec<PatientConsent>, ConsentError> {
        storage::list_active_consents(&self.db, patient, grantee).await
    }

    pub fn cache(&self) -> &DecisionCache {
        &self.cache
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.audit
    }

    pub fn db(&self) -> &DatabaseConnection {
        &self.db
    }
}

fn validate(request: &AccessRequest) -> Result<(), AccessError> {
    if request.actor_id.trim().is_empty() || request.patient_id.trim().is_empty() {
        return Err(AccessError::InvalidRequest(
            "actor_id and patient_id are required".to_string(),
        ));
    }
    // An empty request must never be vacuously satisfied by some consent,
    // so it is rejected outright.
    if request.data_types.is_empty() {
        return Err(AccessError::InvalidRequest(
            "data_types must name at least one data type".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use super::types::Purpose;

    #[test]
    fn test_validate_rejects_blank_ids() {
        let request = AccessRequest::new("", "patient-1", Purpose::Treatment, ["care_notes"]);
        assert!(matches!(
            validate(&request),
            Err(AccessError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_rejects_empty_data_types() {
        let request =
            AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, Vec::<String>::new());
        assert!(matches!(
            validate(&request),
            Err(AccessError::InvalidRequest(_))
        ));
    }

    #[test]
    fn test_validate_accepts_well_formed_request() {
        let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
        assert!(validate(&request).is_ok());
    }
}
