pub mod consent;
pub mod emergency_access_log;
pub mod job_execution;
pub mod phi_access_log;
pub mod treatment_relationship;

pub use consent::Entity as Consent;
pub use emergency_access_log::Entity as EmergencyAccessLog;
pub use job_execution::Entity as JobExecution;
pub use phi_access_log::Entity as PhiAccessLog;
pub use treatment_relationship::Entity as TreatmentRelationship;
