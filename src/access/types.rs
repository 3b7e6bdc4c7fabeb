use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// Purpose of a PHI access request or consent grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Purpose {
    Treatment,
    FamilyCare,
    Emergency,
    PatientRequest,
    CareCoordination,
}

impl Purpose {
    pub fn as_str(&self) -> &'static str {
        match self {
            Purpose::Treatment => "treatment",
            Purpose::FamilyCare => "family_care",
            Purpose::Emergency => "emergency",
            Purpose::PatientRequest => "patient_request",
            Purpose::CareCoordination => "care_coordination",
        }
    }
}

impl fmt::Display for Purpose {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Purpose {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "treatment" => Ok(Purpose::Treatment),
            "family_care" => Ok(Purpose::FamilyCare),
            "emergency" => Ok(Purpose::Emergency),
            "patient_request" => Ok(Purpose::PatientRequest),
            "care_coordination" => Ok(Purpose::CareCoordination),
            other => Err(format!("unknown purpose `{other}`")),
        }
    }
}

/// Role reported by the external Auth/User service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthcareRole {
    CareStaff,
    CareManager,
    Admin,
    FamilyMember,
    Patient,
}

impl HealthcareRole {
    /// Break-glass allow-list. Everyone else is denied by role.
    pub fn may_break_glass(&self) -> bool {
        matches!(
            self,
            HealthcareRole::CareStaff | HealthcareRole::CareManager | HealthcareRole::Admin
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HealthcareRole::CareStaff => "care_staff",
            HealthcareRole::CareManager => "care_manager",
            HealthcareRole::Admin => "admin",
            HealthcareRole::FamilyMember => "family_member",
            HealthcareRole::Patient => "patient",
        }
    }
}

impl fmt::Display for HealthcareRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthcareRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "care_staff" => Ok(HealthcareRole::CareStaff),
            "care_manager" => Ok(HealthcareRole::CareManager),
            "admin" => Ok(HealthcareRole::Admin),
            "family_member" => Ok(HealthcareRole::FamilyMember),
            "patient" => Ok(HealthcareRole::Patient),
            other => Err(format!("unknown healthcare role `{other}`")),
        }
    }
}

/// A single PHI access check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessRequest {
    pub actor_id: String,
    pub patient_id: String,
    pub purpose: Purpose,
    pub data_types: BTreeSet<String>,
    #[serde(default)]
    pub emergency_justification: Option<String>,
    #[serde(default)]
    pub ip_address: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
}

impl AccessRequest {
    pub fn new(
        actor_id: impl Into<String>,
        patient_id: impl Into<String>,
        purpose: Purpose,
        data_types: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            actor_id: actor_id.into(),
            patient_id: patient_id.into(),
            purpose,
            data_types: data_types.into_iter().map(Into::into).collect(),
            emergency_justification: None,
            ip_address: None,
            user_agent: None,
        }
    }

    pub fn with_justification(mut self, justification: impl Into<String>) -> Self {
        self.emergency_justification = Some(justification.into());
        self
    }

    pub fn cache_key(&self) -> DecisionKey {
        DecisionKey {
            actor_id: self.actor_id.clone(),
            patient_id: self.patient_id.clone(),
            purpose: self.purpose,
            data_types: self.data_types.clone(),
        }
    }
}

/// The resolved outcome of a check. A denial is a successful result; it is
/// mirrored into the PHI access log, never persisted directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    pub granted: bool,
    pub reason: String,
    pub consent_id: Option<i64>,
    pub relationship_id: Option<i64>,
    #[serde(rename = "emergency")]
    pub emergency_access: bool,
    pub timestamp: i64,
}

impl AccessDecision {
    pub fn granted(reason: impl Into<String>, timestamp: i64) -> Self {
        Self {
            granted: true,
            reason: reason.into(),
            consent_id: None,
            relationship_id: None,
            emergency_access: false,
            timestamp,
        }
    }

    pub fn denied(reason: impl Into<String>, timestamp: i64) -> Self {
        Self {
            granted: false,
            reason: reason.into(),
            consent_id: None,
            relationship_id: None,
            emergency_access: false,
            timestamp,
        }
    }
}

/// Key of the full-decision cache tier. The requested data types are part
/// of the key: a decision computed for a narrow request must never be
/// served for a broader one.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DecisionKey {
    pub actor_id: String,
    pub patient_id: String,
    pub purpose: Purpose,
    pub data_types: BTreeSet<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_purpose_round_trip() {
        for p in [
            Purpose::Treatment,
            Purpose::FamilyCare,
            Purpose::Emergency,
            Purpose::PatientRequest,
            Purpose::CareCoordination,
        ] {
            assert_eq!(p.as_str().parse::<Purpose>().unwrap(), p);
        }
        assert!("surveillance".parse::<Purpose>().is_err());
    }

    #[test]
    fn test_break_glass_allow_list() {
        assert!(HealthcareRole::CareStaff.may_break_glass());
        assert!(HealthcareRole::CareManager.may_break_glass());
        assert!(HealthcareRole::Admin.may_break_glass());
        assert!(!HealthcareRole::FamilyMember.may_break_glass());
        assert!(!HealthcareRole::Patient.may_break_glass());
    }
}
