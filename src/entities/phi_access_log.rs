use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only. Rows are inserted by the audit writer and never touched again.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "phi_access_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub accessor_id: String,
    pub patient_id: String,
    pub purpose: String,
    /// JSON array of the data types the caller asked for, granted or not
    pub data_types_requested: String,
    pub consent_id: Option<i64>,
    pub relationship_id: Option<i64>,
    pub granted: i64,
    pub emergency_access: i64,
    pub denial_reason: Option<String>,
    pub created_at: i64,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
