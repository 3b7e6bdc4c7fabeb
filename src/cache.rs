//! Tiered decision cache. Every tier is advisory: the rule cascade stays
//! authoritative, and the service must remain correct (only slower) with the
//! whole layer disabled. TTLs bound the staleness of any cached answer and
//! are treated as compliance parameters.

use crate::access::types::{AccessDecision, DecisionKey};
use crate::settings::Cache as CacheCfg;
use chrono::Utc;
use moka::sync::Cache;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Duration;

/// A break-glass grant held for the duration of a clinical episode and
/// mirrored into the alert buckets for compliance review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmergencyGrant {
    pub actor_id: String,
    pub patient_id: String,
    pub incident_id: String,
    pub justification: String,
    pub granted_at: i64,
}

pub struct DecisionCache {
    enabled: bool,
    /// Full decisions keyed (actor, patient, purpose, requested data types)
    decisions: Cache<DecisionKey, AccessDecision>,
    /// Whether the patient has any active consent naming the actor.
    /// A cached `false` lets the engine skip the consent read; it never
    /// overrides the self, emergency, or relationship rules.
    consent_flags: Cache<(String, String), bool>,
    /// Observational only: who touched a patient's records recently.
    /// Never consulted for authorization.
    patient_access: Cache<String, HashSet<String>>,
    emergency: Cache<(String, String), EmergencyGrant>,
    alerts: Mutex<BTreeMap<i64, Vec<EmergencyGrant>>>,
    alert_bucket_secs: i64,
    alert_retention_buckets: usize,
}

impl DecisionCache {
    pub fn new(cfg: &CacheCfg) -> Self {
        let decisions = Cache::builder()
            .max_capacity(cfg.max_entries)
            .time_to_live(Duration::from_secs(cfg.decision_ttl_secs))
            .support_invalidation_closures()
            .build();
        let consent_flags = Cache::builder()
            .max_capacity(cfg.max_entries)
            .time_to_live(Duration::from_secs(cfg.consent_flag_ttl_secs))
            .support_invalidation_closures()
            .build();
        let patient_access = Cache::builder()
            .max_capacity(cfg.max_entries)
            .time_to_live(Duration::from_secs(cfg.patient_access_ttl_secs))
            .build();
        let emergency = Cache::builder()
            .max_capacity(cfg.max_entries)
            .time_to_live(Duration::from_secs(cfg.emergency_ttl_secs))
            .build();

        Self {
            enabled: cfg.enabled,
            decisions,
            consent_flags,
            patient_access,
            emergency,
            alerts: Mutex::new(BTreeMap::new()),
            alert_bucket_secs: cfg.alert_bucket_secs.max(1) as i64,
            alert_retention_buckets: cfg.alert_retention_buckets.max(1),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn get_decision(&self, key: &DecisionKey) -> Option<AccessDecision> {
        if !self.enabled {
            return None;
        }
        self.decisions.get(key)
    }

    pub fn put_decision(&self, key: DecisionKey, decision: AccessDecision) {
        if !self.enabled {
            return;
        }
        self.decisions.insert(key, decision);
    }

    /// Pipelined read over the decision tier. Missing keys are misses, never
    /// errors; callers fall back to the engine for them.
    pub fn batch_check(&self, keys: &[DecisionKey]) -> HashMap<DecisionKey, AccessDecision> {
        let mut out = HashMap::new();
        if !self.enabled {
            return out;
        }
        for key in keys {
            if let Some(decision) = self.decisions.get(key) {
                out.insert(key.clone(), decision);
            }
        }
        out
    }

    pub fn consent_flag(&self, actor: &str, patient: &str) -> Option<bool> {
        if !self.enabled {
            return None;
        }
        self.consent_flags
            .get(&(actor.to_string(), patient.to_string()))
    }

    pub fn put_consent_flag(&self, actor: &str, patient: &str, has_consent: bool) {
        if !self.enabled {
            return;
        }
        self.consent_flags
            .insert((actor.to_string(), patient.to_string()), has_consent);
    }

    pub fn record_patient_access(&self, patient: &str, actor: &str) {
        if !self.enabled {
            return;
        }
        let mut accessors = self
            .patient_access
            .get(patient)
            .unwrap_or_default();
        accessors.insert(actor.to_string());
        self.patient_access.insert(patient.to_string(), accessors);
    }

    pub fn recent_accessors(&self, patient: &str) -> Vec<String> {
        let mut accessors: Vec<String> = self
            .patient_access
            .get(patient)
            .map(|set| set.into_iter().collect())
            .unwrap_or_default();
        accessors.sort();
        accessors
    }

    /// Hold the grant for the episode window and mirror it into the current
    /// alert bucket. Runs even when the layer is disabled: the alert set
    /// feeds compliance review, not authorization.
    pub fn record_emergency(&self, grant: EmergencyGrant) {
        if self.enabled {
            self.emergency.insert(
                (grant.actor_id.clone(), grant.patient_id.clone()),
                grant.clone(),
            );
        }

        let bucket = grant.granted_at - grant.granted_at.rem_euclid(self.alert_bucket_secs);
        let mut alerts = self.alerts.lock();
        alerts.entry(bucket).or_default().push(grant);

        // Drop buckets past the retention horizon
        while alerts.len() > self.alert_retention_buckets {
            alerts.pop_first();
        }
    }

    pub fn active_emergency(&self, actor: &str, patient: &str) -> Option<EmergencyGrant> {
        if !self.enabled {
            return None;
        }
        self.emergency
            .get(&(actor.to_string(), patient.to_string()))
    }

    /// Alert buckets, newest last: (bucket start, grants in that bucket).
    pub fn emergency_alerts(&self) -> Vec<(i64, Vec<EmergencyGrant>)> {
        self.alerts
            .lock()
            .iter()
            .map(|(bucket, grants)| (*bucket, grants.clone()))
            .collect()
    }

    /// Best-effort synchronous invalidation of the primary keys touching a
    /// patient. The short TTLs remain the actual safety net when this fails.
    pub fn invalidate_patient(&self, patient: &str) {
        if !self.enabled {
            return;
        }
        let p = patient.to_string();
        if let Err(e) = self
            .decisions
            .invalidate_entries_if(move |key, _| key.patient_id == p)
        {
            tracing::warn!("decision cache invalidation failed for patient: {e}");
        }
        let p = patient.to_string();
        if let Err(e) = self
            .consent_flags
            .invalidate_entries_if(move |(_, flag_patient), _| *flag_patient == p)
        {
            tracing::warn!("consent flag invalidation failed for patient: {e}");
        }
    }
}

/// Fixed-window request counter per actor. Exceeding the limit surfaces an
/// error, never a false grant or denial.
pub struct RateLimiter {
    max_per_window: u32,
    window_secs: i64,
    windows: Mutex<HashMap<String, (i64, u32)>>,
}

impl RateLimiter {
    pub fn new(max_per_window: u32, window_secs: u64) -> Self {
        Self {
            max_per_window,
            window_secs: window_secs.max(1) as i64,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Returns false once the actor exhausts the current window.
    /// `max_per_window == 0` disables the limiter.
    pub fn check(&self, actor: &str) -> bool {
        if self.max_per_window == 0 {
            return true;
        }
        let now = Utc::now().timestamp();
        let window = now - now.rem_euclid(self.window_secs);
        let mut windows = self.windows.lock();
        let entry = windows.entry(actor.to_string()).or_insert((window, 0));
        if entry.0 != window {
            *entry = (window, 0);
        }
        entry.1 += 1;
        entry.1 <= self.max_per_window
    }
}
