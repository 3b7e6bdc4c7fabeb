//! The access-decision cascade. Rules are evaluated in fixed priority order
//! and short-circuit on the first match:
//!
//! 1. self-access
//! 2. break-glass emergency (role allow-list, always logged with an incident)
//! 3. explicit consent with full data-type coverage
//! 4. treatment-relationship fallback (purpose=treatment only)
//! 5. default deny
//!
//! A denial is a resolved decision, not an error. Store reads carry a short
//! deadline; a timeout surfaces as an infrastructure error so "don't know"
//! is never turned into "no".

use super::errors::AccessError;
use super::types::{AccessDecision, AccessRequest, Purpose};
use super::ConsentService;
use crate::cache::EmergencyGrant;
use crate::errors::ConsentError;
use crate::storage::{self, NewEmergencyAccessLog};
use chrono::Utc;
use std::future::Future;

pub(super) const REASON_SELF_ACCESS: &str = "self-access";
pub(super) const REASON_DEFAULT_DENY: &str = "No valid authorization found";

pub(super) async fn evaluate(
    svc: &ConsentService,
    request: &AccessRequest,
) -> Result<AccessDecision, AccessError> {
    let now = Utc::now().timestamp();

    // Rule 1: a patient always reaches their own record
    if request.actor_id == request.patient_id {
        return Ok(AccessDecision::granted(REASON_SELF_ACCESS, now));
    }

    // Rule 2: break-glass, only with a justification on record
    if request.purpose == Purpose::Emergency {
        let justification = request
            .emergency_justification
            .as_deref()
            .map(str::trim)
            .filter(|j| !j.is_empty());
        if let Some(justification) = justification {
            return emergency_access(svc, request, justification, now).await;
        }
    }

    // Rule 3: explicit consent with full coverage. A cached "no active
    // consents" flag skips the read; it can only ever skip toward the
    // later rules, never grant by itself.
    let mut uncovered = false;
    if svc.cache.consent_flag(&request.actor_id, &request.patient_id) != Some(false) {
        let matched = with_deadline(svc, "consent lookup", async {
            storage::get_active_consent(
                &svc.db,
                &request.patient_id,
                &request.actor_id,
                request.purpose,
                &request.data_types,
            )
            .await
        })
        .await?;

        if let Some(consent) = matched {
            svc.cache
                .put_consent_flag(&request.actor_id, &request.patient_id, true);
            let mut decision = AccessDecision::granted(
                format!("Authorized by patient consent for {}", request.purpose),
                now,
            );
            decision.consent_id = Some(consent.id);
            return Ok(decision);
        }

        // Refresh the quick flag and find out whether the denial is a
        // coverage gap or a missing consent altogether.
        let existing = with_deadline(svc, "consent flag refresh", async {
            storage::list_active_consents(&svc.db, &request.patient_id, Some(&request.actor_id))
                .await
        })
        .await?;
        svc.cache
            .put_consent_flag(&request.actor_id, &request.patient_id, !existing.is_empty());
        uncovered = existing.iter().any(|c| c.purpose == request.purpose);
    }

    // Rule 4: treatment relationship fallback
    if request.purpose == Purpose::Treatment {
        let relationship = with_deadline(svc, "relationship lookup", async {
            storage::get_active_relationship(&svc.db, &request.actor_id, &request.patient_id)
                .await
        })
        .await?;
        if let Some(relationship) = relationship {
            let mut decision = AccessDecision::granted(
                format!(
                    "Active {} relationship with the patient",
                    relationship.relationship_type
                ),
                now,
            );
            decision.relationship_id = Some(relationship.id);
            return Ok(decision);
        }
    }

    // Rule 5: default deny
    let reason = if uncovered {
        "Consent does not cover all requested data types"
    } else {
        REASON_DEFAULT_DENY
    };
    Ok(AccessDecision::denied(reason, now))
}

/// Break-glass path. The role allow-list is the only gate; a grant produces
/// an incident id, an emergency log entry co-written with the PHI access
/// row, and a mirror into the episode cache and alert buckets. Concurrent
/// break-glass requests by the same actor each get their own incident.
async fn emergency_access(
    svc: &ConsentService,
    request: &AccessRequest,
    justification: &str,
    now: i64,
) -> Result<AccessDecision, AccessError> {
    let lookup = svc.roles.healthcare_role(&request.actor_id);
    let role = match tokio::time::timeout(svc.store_timeout, lookup).await {
        Ok(result) => result?,
        Err(_) => {
            return Err(AccessError::Timeout {
                operation: "role lookup",
                timeout_ms: svc.store_timeout.as_millis() as u64,
            })
        }
    };

    let Some(role) = role else {
        return Ok(AccessDecision::denied(
            "Emergency access denied: no healthcare role on record",
            now,
        ));
    };
    if !role.may_break_glass() {
        return Ok(AccessDecision::denied(
            format!("Emergency access denied: role `{role}` is not authorized for break-glass"),
            now,
        ));
    }

    let incident_id = storage::random_incident_id();
    tracing::warn!(
        actor = %request.actor_id,
        patient = %request.patient_id,
        incident = %incident_id,
        "break-glass access granted, flagged for review"
    );

    svc.audit.record_emergency(NewEmergencyAccessLog {
        accessor_id: request.actor_id.clone(),
        patient_id: request.patient_id.clone(),
        justification: justification.to_string(),
        data_types_requested: request.data_types.clone(),
        incident_id: incident_id.clone(),
        created_at: now,
    });
    svc.cache.record_emergency(EmergencyGrant {
        actor_id: request.actor_id.clone(),
        patient_id: request.patient_id.clone(),
        incident_id: incident_id.clone(),
        justification: justification.to_string(),
        granted_at: now,
    });

    let mut decision = AccessDecision::granted(
        format!("Emergency access granted under incident {incident_id}, subject to mandatory review"),
        now,
    );
    decision.emergency_access = true;
    Ok(decision)
}

async fn with_deadline<T, F>(
    svc: &ConsentService,
    operation: &'static str,
    fut: F,
) -> Result<T, AccessError>
where
    F: Future<Output = Result<T, ConsentError>>,
{
    match tokio::time::timeout(svc.store_timeout, fut).await {
        Ok(result) => result.map_err(AccessError::from),
        Err(_) => Err(AccessError::Timeout {
            operation,
            timeout_ms: svc.store_timeout.as_millis() as u64,
        }),
    }
}
