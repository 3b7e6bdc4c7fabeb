mod helpers;

use concordia::errors::ConsentError;
use concordia::storage::{self, NewConsent, RevokeOutcome};
use concordia::access::types::Purpose;
use helpers::db::TestDb;
use std::collections::BTreeSet;

fn new_consent(patient: &str, grantee: &str, data_types: &[&str]) -> NewConsent {
    NewConsent {
        patient_id: patient.to_string(),
        grantor_id: patient.to_string(),
        grantee_id: grantee.to_string(),
        purpose: Purpose::Treatment,
        data_types: data_types.iter().map(|s| s.to_string()).collect(),
        expires_at: None,
    }
}

#[tokio::test]
async fn test_create_consent_starts_active() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let consent = storage::create_consent(db, new_consent("patient-1", "dr-a", &["care_notes"]))
        .await
        .expect("create failed");

    assert_eq!(consent.status, "active");
    assert!(consent.revoked_at.is_none());

    let requested: BTreeSet<String> = ["care_notes".to_string()].into_iter().collect();
    let found = storage::get_active_consent(db, "patient-1", "dr-a", Purpose::Treatment, &requested)
        .await
        .expect("query failed");
    assert_eq!(found.map(|c| c.id), Some(consent.id));
}

#[tokio::test]
async fn test_create_consent_rejects_empty_data_types() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let result = storage::create_consent(db, new_consent("patient-1", "dr-a", &[])).await;
    assert!(matches!(result, Err(ConsentError::BadRequest(_))));
}

#[tokio::test]
async fn test_create_consent_rejects_past_expiry() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let mut input = new_consent("patient-1", "dr-a", &["care_notes"]);
    input.expires_at = Some(chrono::Utc::now().timestamp() - 10);
    let result = storage::create_consent(db, input).await;
    assert!(matches!(result, Err(ConsentError::BadRequest(_))));
}

#[tokio::test]
async fn test_revoke_by_patient() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let consent = storage::create_consent(db, new_consent("patient-1", "dr-a", &["care_notes"]))
        .await
        .expect("create failed");

    let outcome = storage::revoke_consent(db, consent.id, "patient-1", Some("done with care"))
        .await
        .expect("revoke failed");
    assert_eq!(outcome, RevokeOutcome::Revoked);

    let stored = storage::get_consent(db, consent.id)
        .await
        .expect("query failed")
        .expect("consent gone");
    assert_eq!(stored.status, "revoked");
    assert_eq!(stored.revoked_by.as_deref(), Some("patient-1"));
    assert!(stored.revoked_at.is_some());
    assert_eq!(stored.revoke_reason.as_deref(), Some("done with care"));
}

#[tokio::test]
async fn test_revoke_by_grantor() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    // A care manager granted on the patient's behalf
    let mut input = new_consent("patient-1", "dr-a", &["care_notes"]);
    input.grantor_id = "case-manager".to_string();
    let consent = storage::create_consent(db, input).await.expect("create failed");

    let outcome = storage::revoke_consent(db, consent.id, "case-manager", None)
        .await
        .expect("revoke failed");
    assert_eq!(outcome, RevokeOutcome::Revoked);
}

#[tokio::test]
async fn test_revoke_by_third_party_is_unauthorized() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let consent = storage::create_consent(db, new_consent("patient-1", "dr-a", &["care_notes"]))
        .await
        .expect("create failed");

    // Not the patient, not the grantor, and not even the grantee may revoke
    for actor in ["dr-a", "random-admin"] {
        let outcome = storage::revoke_consent(db, consent.id, actor, None)
            .await
            .expect("revoke failed");
        assert_eq!(outcome, RevokeOutcome::Unauthorized, "actor {actor}");
    }

    let stored = storage::get_consent(db, consent.id)
        .await
        .expect("query failed")
        .expect("consent gone");
    assert_eq!(stored.status, "active", "consent must be unchanged");
    assert!(stored.revoked_at.is_none());
}

#[tokio::test]
async fn test_second_revoke_reports_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    let consent = storage::create_consent(db, new_consent("patient-1", "dr-a", &["care_notes"]))
        .await
        .expect("create failed");

    let first = storage::revoke_consent(db, consent.id, "patient-1", None)
        .await
        .expect("revoke failed");
    assert_eq!(first, RevokeOutcome::Revoked);

    // The conditional update already fired; a repeat must not double-effect
    let second = storage::revoke_consent(db, consent.id, "patient-1", None)
        .await
        .expect("revoke failed");
    assert_eq!(second, RevokeOutcome::NotFound);
}

#[tokio::test]
async fn test_revoke_unknown_id_reports_not_found() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let outcome = storage::revoke_consent(db, 424242, "patient-1", None)
        .await
        .expect("revoke failed");
    assert_eq!(outcome, RevokeOutcome::NotFound);
}

#[tokio::test]
async fn test_get_active_consent_requires_full_coverage() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();
    storage::create_consent(db, new_consent("patient-1", "dr-a", &["care_notes", "vitals"]))
        .await
        .expect("create failed");

    let covered: BTreeSet<String> = ["vitals".to_string()].into_iter().collect();
    assert!(
        storage::get_active_consent(db, "patient-1", "dr-a", Purpose::Treatment, &covered)
            .await
            .expect("query failed")
            .is_some()
    );

    let uncovered: BTreeSet<String> =
        ["vitals".to_string(), "genomics".to_string()].into_iter().collect();
    assert!(
        storage::get_active_consent(db, "patient-1", "dr-a", Purpose::Treatment, &uncovered)
            .await
            .expect("query failed")
            .is_none()
    );
}

#[tokio::test]
async fn test_list_active_consents_filters_revoked_and_expired() {
    let test_db = TestDb::new().await;
    let db = test_db.connection();

    let keep = storage::create_consent(db, new_consent("patient-1", "dr-a", &["care_notes"]))
        .await
        .expect("create failed");
    let gone = storage::create_consent(db, new_consent("patient-1", "dr-b", &["care_notes"]))
        .await
        .expect("create failed");
    storage::revoke_consent(db, gone.id, "patient-1", None)
        .await
        .expect("revoke failed");
    helpers::builders::ConsentBuilder::new("patient-1", "dr-c")
        .expired()
        .create(db)
        .await;

    let active = storage::list_active_consents(db, "patient-1", None)
        .await
        .expect("query failed");
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].id, keep.id);
}
