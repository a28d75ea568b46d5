use crate::entities;
use crate::errors::GateError;
use crate::remember_me::RememberMeError;
use crate::storage::{self, DbRememberMeService};
use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ActiveValue::NotSet, ColumnTrait, DatabaseConnection, EntityTrait,
    IntoActiveModel, QueryFilter, QueryOrder, Set,
};
use std::sync::Arc;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

pub const CLEANUP_SESSIONS_JOB: &str = "cleanup_expired_sessions";
pub const CLEANUP_PERSISTENT_LOGINS_JOB: &str = "cleanup_expired_persistent_logins";

const SESSIONS_SCHEDULE: &str = "0 0 * * * *";

/// Initialize and start the job scheduler with all background tasks
pub async fn init_scheduler(
    db: DatabaseConnection,
    remember_me: Arc<DbRememberMeService>,
    persistent_login_schedule: &str,
) -> Result<JobScheduler, GateError> {
    let sched = JobScheduler::new()
        .await
        .map_err(|e| GateError::Other(format!("Failed to create job scheduler: {}", e)))?;

    let jobs: [(&'static str, &str); 2] = [
        (CLEANUP_SESSIONS_JOB, SESSIONS_SCHEDULE),
        (CLEANUP_PERSISTENT_LOGINS_JOB, persistent_login_schedule),
    ];

    for (job_name, schedule) in jobs {
        let db = db.clone();
        let remember_me = remember_me.clone();
        let job = Job::new_async(schedule, move |_uuid, _l| {
            let db = db.clone();
            let remember_me = remember_me.clone();
            Box::pin(async move {
                info!(job = job_name, "Running scheduled job");
                if let Err(e) = run_recorded(&db, &remember_me, job_name).await {
                    error!(job = job_name, error = %e, "Scheduled job failed");
                }
            })
        })
        .map_err(|e| GateError::Other(format!("Failed to create job {}: {}", job_name, e)))?;

        sched
            .add(job)
            .await
            .map_err(|e| GateError::Other(format!("Failed to add job {}: {}", job_name, e)))?;
    }

    // Start the scheduler
    sched
        .start()
        .await
        .map_err(|e| GateError::Other(format!("Failed to start job scheduler: {}", e)))?;

    info!(
        persistent_login_schedule,
        "Job scheduler started with {} jobs",
        jobs.len()
    );

    Ok(sched)
}

fn is_known_job(job_name: &str) -> bool {
    matches!(job_name, CLEANUP_SESSIONS_JOB | CLEANUP_PERSISTENT_LOGINS_JOB)
}

async fn run_job(
    db: &DatabaseConnection,
    remember_me: &DbRememberMeService,
    job_name: &str,
) -> Result<u64, GateError> {
    match job_name {
        CLEANUP_SESSIONS_JOB => storage::cleanup_expired_sessions(db).await,
        CLEANUP_PERSISTENT_LOGINS_JOB => {
            remember_me.sweep_expired().await.map_err(|e| match e {
                RememberMeError::StoreUnavailable(inner) => inner,
                other => GateError::Other(other.to_string()),
            })
        }
        _ => Err(GateError::Other(format!("Unknown job name: {}", job_name))),
    }
}

/// Run a job and record the execution in `job_executions`.
async fn run_recorded(
    db: &DatabaseConnection,
    remember_me: &DbRememberMeService,
    job_name: &str,
) -> Result<u64, GateError> {
    let execution_id = start_job_execution(db, job_name).await?;

    match run_job(db, remember_me, job_name).await {
        Ok(count) => {
            info!(job = job_name, records = count, "Job completed");
            complete_job_execution(db, execution_id, true, None, Some(count as i64)).await?;
            Ok(count)
        }
        Err(e) => {
            complete_job_execution(db, execution_id, false, Some(e.to_string()), None).await?;
            Err(e)
        }
    }
}

/// Record the start of a job execution
pub async fn start_job_execution(
    db: &DatabaseConnection,
    job_name: &str,
) -> Result<i64, GateError> {
    use entities::job_execution;

    let execution = job_execution::ActiveModel {
        id: NotSet,
        job_name: Set(job_name.to_string()),
        started_at: Set(Utc::now().timestamp()),
        completed_at: Set(None),
        success: Set(None),
        error_message: Set(None),
        records_processed: Set(None),
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
) -> Result<(), GateError> {
    use entities::job_execution::{Column, Entity};

    if let Some(execution) = Entity::find()
        .filter(Column::Id.eq(execution_id))
        .one(db)
        .await?
    {
        let mut active: entities::job_execution::ActiveModel = execution.into_active_model();
        active.completed_at = Set(Some(Utc::now().timestamp()));
        active.success = Set(Some(if success { 1 } else { 0 }));
        active.error_message = Set(error_message);
        active.records_processed = Set(records_processed);
        active.update(db).await?;
    }

    Ok(())
}

/// Most recent executions first.
pub async fn recent_job_executions(
    db: &DatabaseConnection,
    limit: u64,
) -> Result<Vec<entities::job_execution::Model>, GateError> {
    use entities::job_execution::{Column, Entity};
    use sea_orm::QuerySelect;

    Ok(Entity::find()
        .order_by_desc(Column::Id)
        .limit(limit)
        .all(db)
        .await?)
}

/// Run a job by name outside its schedule. Returns the number of records removed.
pub async fn trigger_job_manually(
    db: &DatabaseConnection,
    remember_me: &DbRememberMeService,
    job_name: &str,
) -> Result<u64, GateError> {
    if !is_known_job(job_name) {
        return Err(GateError::Other(format!("Unknown job name: {}", job_name)));
    }

    info!("Manually triggering job: {}", job_name);
    run_recorded(db, remember_me, job_name).await
}
