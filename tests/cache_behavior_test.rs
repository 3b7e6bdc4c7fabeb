mod helpers;

use concordia::access::errors::AccessError;
use concordia::access::types::{AccessRequest, DecisionKey, HealthcareRole, Purpose};
use concordia::roles::StaticRoleDirectory;
use concordia::settings::Settings;
use concordia::storage;
use helpers::builders::ConsentBuilder;
use helpers::db::{make_service, make_service_with, TestDb};
use std::time::Duration;

#[tokio::test]
async fn test_cached_decision_is_served_within_ttl() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let consent = ConsentBuilder::new("patient-1", "dr-a")
        .with_data_types(["care_notes"])
        .create(db)
        .await;

    let mut settings = Settings::default();
    settings.cache.decision_ttl_secs = 1;
    let service = make_service_with(db, settings, StaticRoleDirectory::new());

    let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    let first = service.check_access(&request).await.expect("check failed");
    assert!(first.granted);

    // Revoke behind the service's back: no invalidation hook fires, so the
    // cached grant legitimately survives until its TTL runs out
    storage::revoke_consent(db, consent.id, "patient-1", None)
        .await
        .expect("revoke failed");

    let stale = service.check_access(&request).await.expect("check failed");
    assert!(stale.granted, "within the TTL the cached answer is served");

    // A cache hit is still an auditable access
    service.audit().flush().await;
    let logs = storage::list_phi_access_logs(db, "patient-1").await.expect("query failed");
    assert_eq!(logs.len(), 2);

    tokio::time::sleep(Duration::from_millis(1200)).await;
    let fresh = service.check_access(&request).await.expect("check failed");
    assert!(!fresh.granted, "past the TTL the engine re-evaluates");
}

#[tokio::test]
async fn test_disabled_cache_keeps_the_system_correct() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let consent = ConsentBuilder::new("patient-1", "dr-a")
        .with_data_types(["care_notes"])
        .create(db)
        .await;

    let mut settings = Settings::default();
    settings.cache.enabled = false;
    let service = make_service_with(db, settings, StaticRoleDirectory::new());

    let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    assert!(service.check_access(&request).await.expect("check failed").granted);

    storage::revoke_consent(db, consent.id, "patient-1", None)
        .await
        .expect("revoke failed");

    // With no cache there is no staleness window at all
    assert!(!service.check_access(&request).await.expect("check failed").granted);
}

#[tokio::test]
async fn test_narrow_cached_grant_does_not_answer_broader_request() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    ConsentBuilder::new("patient-1", "dr-a")
        .with_data_types(["care_notes"])
        .create(db)
        .await;

    let service = make_service(db, StaticRoleDirectory::new());

    let narrow = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    assert!(service.check_access(&narrow).await.expect("check failed").granted);

    // The cached narrow grant must not leak data types it never covered;
    // with or without the cache this request resolves the same way
    let broad = AccessRequest::new(
        "dr-a",
        "patient-1",
        Purpose::Treatment,
        ["care_notes", "medications"],
    );
    let decision = service.check_access(&broad).await.expect("check failed");
    assert!(!decision.granted);
}

#[tokio::test]
async fn test_service_revoke_invalidates_immediately() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let service = make_service(db, StaticRoleDirectory::new());

    let consent = service
        .create_consent(storage::NewConsent {
            patient_id: "patient-1".to_string(),
            grantor_id: "patient-1".to_string(),
            grantee_id: "dr-a".to_string(),
            purpose: Purpose::Treatment,
            data_types: ["care_notes".to_string()].into_iter().collect(),
            expires_at: None,
        })
        .await
        .expect("create failed");

    let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    assert!(service.check_access(&request).await.expect("check failed").granted);

    service
        .revoke_consent(consent.id, "patient-1", None)
        .await
        .expect("revoke failed");

    // No TTL wait: the mutation dropped the patient's cache keys
    assert!(!service.check_access(&request).await.expect("check failed").granted);
}

#[tokio::test]
async fn test_create_consent_invalidates_cached_denial() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let service = make_service(db, StaticRoleDirectory::new());

    let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    assert!(!service.check_access(&request).await.expect("check failed").granted);

    service
        .create_consent(storage::NewConsent {
            patient_id: "patient-1".to_string(),
            grantor_id: "patient-1".to_string(),
            grantee_id: "dr-a".to_string(),
            purpose: Purpose::Treatment,
            data_types: ["care_notes".to_string()].into_iter().collect(),
            expires_at: None,
        })
        .await
        .expect("create failed");

    // The cached denial must not outlive the grant
    assert!(service.check_access(&request).await.expect("check failed").granted);
}

#[tokio::test]
async fn test_batch_check_returns_partial_map() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    ConsentBuilder::new("patient-1", "dr-a")
        .with_data_types(["care_notes"])
        .create(db)
        .await;

    let service = make_service(db, StaticRoleDirectory::new());
    let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    service.check_access(&request).await.expect("check failed");

    let warm = request.cache_key();
    let cold = DecisionKey {
        actor_id: "dr-b".to_string(),
        patient_id: "patient-2".to_string(),
        purpose: Purpose::Treatment,
        data_types: ["care_notes".to_string()].into_iter().collect(),
    };
    let hits = service.batch_check(&[warm.clone(), cold.clone()]);

    assert!(hits.contains_key(&warm));
    assert!(!hits.contains_key(&cold), "a miss is an absent key, not an error");
}

#[tokio::test]
async fn test_rate_limit_rejects_with_an_error_not_a_denial() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    ConsentBuilder::new("patient-1", "dr-a")
        .with_data_types(["care_notes"])
        .create(db)
        .await;

    let mut settings = Settings::default();
    settings.cache.rate_limit_per_window = 2;
    // A long window so the counter cannot reset mid-test
    settings.cache.rate_window_secs = 3600;
    let service = make_service_with(db, settings, StaticRoleDirectory::new());

    let request = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    for _ in 0..2 {
        let decision = service.check_access(&request).await.expect("check failed");
        assert!(decision.granted);
    }

    let result = service.check_access(&request).await;
    assert!(
        matches!(result, Err(AccessError::RateLimited { .. })),
        "rate limiting must never masquerade as an authorization answer"
    );
}

#[tokio::test]
async fn test_recent_accessors_is_observational() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    ConsentBuilder::new("patient-1", "dr-a")
        .with_data_types(["care_notes"])
        .create(db)
        .await;

    let service = make_service(db, StaticRoleDirectory::new());

    let granted = AccessRequest::new("dr-a", "patient-1", Purpose::Treatment, ["care_notes"]);
    let denied = AccessRequest::new("dr-b", "patient-1", Purpose::Treatment, ["care_notes"]);
    service.check_access(&granted).await.expect("check failed");
    service.check_access(&denied).await.expect("check failed");

    // Only granted accesses land in the access set
    assert_eq!(service.cache().recent_accessors("patient-1"), vec!["dr-a"]);
    assert!(service.cache().recent_accessors("patient-2").is_empty());
}

#[tokio::test]
async fn test_emergency_grant_lands_in_episode_cache_and_alert_buckets() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let roles = StaticRoleDirectory::new().with_role("dr-er", HealthcareRole::CareManager);
    let service = make_service(db, roles);

    let request = AccessRequest::new("dr-er", "patient-9", Purpose::Emergency, ["vitals"])
        .with_justification("anaphylaxis, unresponsive");
    let decision = service.check_access(&request).await.expect("check failed");
    assert!(decision.granted && decision.emergency_access);

    let episode = service
        .cache()
        .active_emergency("dr-er", "patient-9")
        .expect("episode entry missing");
    assert!(decision.reason.contains(&episode.incident_id));

    let buckets = service.cache().emergency_alerts();
    assert_eq!(buckets.len(), 1);
    let (_, grants) = &buckets[0];
    assert_eq!(grants.len(), 1);
    assert_eq!(grants[0].actor_id, "dr-er");
    assert_eq!(grants[0].justification, "anaphylaxis, unresponsive");
}
