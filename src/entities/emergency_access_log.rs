use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Append-only break-glass record, co-written with a granted PHI access row.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "emergency_access_log")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = true)]
    pub id: i64,
    pub accessor_id: String,
    pub patient_id: String,
    pub justification: String,
    pub data_types_requested: String,
    pub incident_id: String,
    pub created_at: i64,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
