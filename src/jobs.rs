use crate::entities;
use crate::errors::ConsentError;
use crate::storage;
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, IntoActiveModel, QueryFilter,
    Set,
};
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info, warn};

/// Break-glass volume that triggers a louder log line in the hourly sweep.
const EMERGENCY_REVIEW_ALERT_THRESHOLD: u64 = 10;

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(db: DatabaseConnection) -> Result<JobScheduler, ConsentError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| ConsentError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let db_clone = db.clone();

    // Emergency access review sweep - runs every hour
    let review_job = Job::new_async("0 0 * * * *", move |_uuid, _l| {
        let db = db_clone.clone();
        Box::pin(async move {
            info!("Running emergency_access_review job");
            let execution_id = start_job_execution(&db, "emergency_access_review").await.ok();

            match emergency_access_review(&db).await {
                Ok(count) => {
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, true, None, Some(count as i64)).await;
                    }
                }
                Err(e) => {
                    error!("Emergency access review failed: {}", e);
                    if let Some(id) = execution_id {
                        let _ =
                            complete_job_execution(&db, id, false, Some(e.to_string()), None).await;
                    }
                }
            }
        })
    })
    .map_err(|e| ConsentError::Other(format!("Failed to create review job: {}", e)))?;

    sched
        .add(review_job)
        .await
        .map_err(|e| ConsentError::Other(format!("Failed to add review job: {}", e)))?;

    sched
        .start()
        .await
        .map_err(|e| ConsentError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!("Job scheduler started with {} jobs", 1);

    Ok(sched)
}

/// Count break-glass grants over the trailing hour so compliance reviewers
/// have a standing signal even when nobody is watching the alert buckets.
pub async fn emergency_access_review(db: &DatabaseConnection) -> Result<u64, ConsentError> {
    let since = Utc::now().timestamp() - 3600;
    let count = storage::count_emergency_grants_since(db, since).await?;

    if count >= EMERGENCY_REVIEW_ALERT_THRESHOLD {
        warn!(
            count,
            "unusually high break-glass volume in the last hour; review the emergency access log"
        );
    } else if count > 0 {
        info!(count, "break-glass grants in the last hour pending review");
    }
    Ok(count)
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, ConsentError> {
    use entities::job_execution;

    let now = Utc::now().timestamp();

    let execution = job_execution::ActiveModel {
        job_name: Set(job_name.to_string()),
        started_at: Set(now),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
        ..Default::default()
    };

    let result = execution.insert(db).await?;
    Ok(result.id)
}

/// Record the completion of a job execution
pub async fn complete_job_execution(
    db: &DatabaseConnection,
    execution_id: i64,
    success: bool,
    error_message: Option<String>,
    records_processed: Option<i64>,
) -> Result<(), ConsentError> {
    use entities::job_execution::{Column, Entity};

    let now = Utc::now().timestamp();

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(now));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Manually trigger a job by name (useful for admin tooling)
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<(), ConsentError> {
    info!("Manually triggering job: {}", job_name);
    let execution_id = start_job_execution(db, job_name).await?;

    let result = match job_name {
        "emergency_access_review" => emergency_access_review(db).await,
        _ => {
            return Err(ConsentError::Other(format!("Unknown job name: {}", job_name)));
        }
    };

    match result {
        Ok(count) => {
            info!(
                "Manually triggered job {} completed: {} records",
                job_name, count
            );
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await?;
        }
        Err(e) => {
            error!("Manually triggered job {} failed: {}", job_name, e);
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await?;
        }
    }

    Ok(())
}
