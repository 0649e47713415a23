//! [`Store`] over Postgres.
//!
//! Every candidate write and its activity commit in one transaction.
//! Conditional writes are `UPDATE … WHERE <column> = $expected` with
//! `rows_affected` deciding the outcome.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgConnection;
use sqlx::types::Json;
use uuid::Uuid;

use super::Db;
use super::rows::*;
use crate::error::{Error, Result};
use crate::model::*;
use crate::store::{CandidateChange, StatusWrite, Store};

async fn insert_activity(conn: &mut PgConnection, activity: &Activity) -> Result<()> {
    sqlx::query(
        "INSERT INTO activities (id, candidate_id, occurred_at, actor, depth, kind)
         VALUES ($1, $2, $3, $4, $5, $6)",
    )
    .bind(activity.id.0)
    .bind(activity.candidate_id.0)
    .bind(activity.timestamp)
    .bind(Json(&activity.actor))
    .bind(i32::try_from(activity.depth).unwrap_or(i32::MAX))
    .bind(Json(&activity.kind))
    .execute(&mut *conn)
    .await?;
    Ok(())
}

impl Db {
    async fn fetch_candidate(&self, conn: &mut PgConnection, id: CandidateId, lock: bool) -> Result<Candidate> {
        let sql = format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates WHERE id = $1{}",
            if lock { " FOR UPDATE" } else { "" }
        );
        let row: Option<CandidateRow> = sqlx::query_as(&sql)
            .bind(id.0)
            .fetch_optional(&mut *conn)
            .await?;
        row.ok_or_else(|| Error::NotFound(format!("candidate {id}")))?
            .try_into_candidate()
    }

    async fn execution_state(&self, id: ExecutionId) -> Result<Option<String>> {
        Ok(
            sqlx::query_scalar("SELECT state FROM workflow_executions WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?,
        )
    }

    async fn membership_exists(&self, process: ProcessId, candidate: CandidateId) -> Result<bool> {
        let found: Option<i32> = sqlx::query_scalar(
            "SELECT 1 FROM process_memberships WHERE process_id = $1 AND candidate_id = $2",
        )
        .bind(process.0)
        .bind(candidate.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(found.is_some())
    }

    async fn executions_where(&self, clause: &str, id: Uuid) -> Result<Vec<WorkflowExecution>> {
        let sql = format!("SELECT body FROM workflow_executions WHERE {clause} = $1 ORDER BY created_at");
        let bodies: Vec<Json<WorkflowExecution>> = sqlx::query_scalar(&sql)
            .bind(id)
            .fetch_all(self.pool())
            .await?;
        Ok(bodies.into_iter().map(|b| b.0).collect())
    }

    async fn memberships_where(&self, clause: &str, id: Option<Uuid>) -> Result<Vec<ProcessMembership>> {
        let sql = match clause {
            "" => format!("SELECT {MEMBERSHIP_COLUMNS} FROM process_memberships ORDER BY added_at"),
            column => format!(
                "SELECT {MEMBERSHIP_COLUMNS} FROM process_memberships WHERE {column} = $1 ORDER BY added_at"
            ),
        };
        let mut query = sqlx::query_as::<_, MembershipRow>(&sql);
        if let Some(id) = id {
            query = query.bind(id);
        }
        let rows = query.fetch_all(self.pool()).await?;
        Ok(rows.into_iter().map(ProcessMembership::from).collect())
    }
}

#[async_trait]
impl Store for Db {
    async fn insert_candidate(&self, candidate: &Candidate, activity: &Activity) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        sqlx::query(
            "INSERT INTO candidates (id, first_name, last_name, email, phone, source, experience_level, status, tags, scores, assignee, last_contacted_at, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)",
        )
        .bind(candidate.id.0)
        .bind(&candidate.first_name)
        .bind(&candidate.last_name)
        .bind(&candidate.email)
        .bind(&candidate.phone)
        .bind(candidate.source.as_str())
        .bind(candidate.experience_level.map(|l| l.as_str()))
        .bind(candidate.status.as_str())
        .bind(Json(&candidate.tags))
        .bind(Json(&candidate.scores))
        .bind(candidate.assignee.as_ref().map(|u| u.0.as_str()))
        .bind(candidate.last_contacted_at)
        .bind(candidate.created_at)
        .bind(candidate.updated_at)
        .execute(&mut *tx)
        .await?;
        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_candidate(&self, id: CandidateId) -> Result<Candidate> {
        let mut conn = self.pool().acquire().await?;
        self.fetch_candidate(&mut conn, id, false).await
    }

    async fn list_candidates(&self) -> Result<Vec<Candidate>> {
        let rows: Vec<CandidateRow> = sqlx::query_as(&format!(
            "SELECT {CANDIDATE_COLUMNS} FROM candidates ORDER BY created_at"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(CandidateRow::try_into_candidate).collect()
    }

    async fn compare_and_set_status(
        &self,
        id: CandidateId,
        from: CandidateStatus,
        to: CandidateStatus,
        activity: &Activity,
    ) -> Result<StatusWrite> {
        let mut tx = self.pool().begin().await?;
        let rows_affected = sqlx::query(
            "UPDATE candidates
             SET status = $1, updated_at = $2,
                 last_contacted_at = CASE WHEN $3 THEN $2 ELSE last_contacted_at END
             WHERE id = $4 AND status = $5",
        )
        .bind(to.as_str())
        .bind(activity.timestamp)
        .bind(to.counts_as_contact())
        .bind(id.0)
        .bind(from.as_str())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            let current = self.fetch_candidate(&mut tx, id, false).await?;
            return Ok(StatusWrite::Mismatch(current.status));
        }

        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(StatusWrite::Applied)
    }

    async fn update_candidate(
        &self,
        id: CandidateId,
        change: &CandidateChange,
        activity: &Activity,
    ) -> Result<bool> {
        let mut tx = self.pool().begin().await?;
        let mut candidate = self.fetch_candidate(&mut tx, id, true).await?;
        if !change.apply(&mut candidate) {
            return Ok(false);
        }
        sqlx::query(
            "UPDATE candidates SET tags = $1, scores = $2, assignee = $3, updated_at = $4 WHERE id = $5",
        )
        .bind(Json(&candidate.tags))
        .bind(Json(&candidate.scores))
        .bind(candidate.assignee.as_ref().map(|u| u.0.as_str()))
        .bind(activity.timestamp)
        .bind(id.0)
        .execute(&mut *tx)
        .await?;
        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(true)
    }

    async fn append_activity(&self, activity: &Activity) -> Result<()> {
        let mut conn = self.pool().acquire().await?;
        insert_activity(&mut conn, activity).await
    }

    async fn activities_for(&self, candidate: CandidateId) -> Result<Vec<Activity>> {
        let rows: Vec<ActivityRow> = sqlx::query_as(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities WHERE candidate_id = $1 ORDER BY seq"
        ))
        .bind(candidate.0)
        .fetch_all(self.pool())
        .await?;
        Ok(rows.into_iter().map(ActivityRow::into_activity).collect())
    }

    async fn activities_after(&self, after: u64, limit: usize) -> Result<Vec<(u64, Activity)>> {
        let after = i64::try_from(after).unwrap_or(i64::MAX);
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows: Vec<PositionedActivityRow> = sqlx::query_as(&format!(
            "SELECT seq, {ACTIVITY_COLUMNS} FROM activities WHERE seq > $1 ORDER BY seq LIMIT $2"
        ))
        .bind(after)
        .bind(limit)
        .fetch_all(self.pool())
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| (row.seq.unsigned_abs(), row.activity.into_activity()))
            .collect())
    }

    async fn activity_head(&self) -> Result<u64> {
        let head: i64 = sqlx::query_scalar("SELECT COALESCE(MAX(seq), 0) FROM activities")
            .fetch_one(self.pool())
            .await?;
        Ok(head.unsigned_abs())
    }

    async fn latest_status_change(
        &self,
        candidate: CandidateId,
        to: CandidateStatus,
    ) -> Result<Option<Activity>> {
        let row: Option<ActivityRow> = sqlx::query_as(&format!(
            "SELECT {ACTIVITY_COLUMNS} FROM activities
             WHERE candidate_id = $1 AND kind ->> 'type' = 'status_changed' AND kind -> 'to' = $2
             ORDER BY seq DESC LIMIT 1"
        ))
        .bind(candidate.0)
        .bind(Json(to))
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(ActivityRow::into_activity))
    }

    async fn insert_process(&self, process: &Process) -> Result<()> {
        sqlx::query(
            "INSERT INTO processes (id, name, description, state, stages, transitions, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(process.id.0)
        .bind(&process.name)
        .bind(&process.description)
        .bind(process.state.as_str())
        .bind(Json(&process.stages))
        .bind(process.transitions.as_ref().map(Json))
        .bind(process.created_at)
        .bind(process.updated_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_process(&self, id: ProcessId) -> Result<Process> {
        let row: Option<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {PROCESS_COLUMNS} FROM processes WHERE id = $1"
        ))
        .bind(id.0)
        .fetch_optional(self.pool())
        .await?;
        row.ok_or_else(|| Error::NotFound(format!("process {id}")))?
            .try_into_process()
    }

    async fn list_processes(&self) -> Result<Vec<Process>> {
        let rows: Vec<ProcessRow> = sqlx::query_as(&format!(
            "SELECT {PROCESS_COLUMNS} FROM processes ORDER BY created_at"
        ))
        .fetch_all(self.pool())
        .await?;
        rows.into_iter().map(ProcessRow::try_into_process).collect()
    }

    async fn set_process_state(
        &self,
        id: ProcessId,
        from: ProcessState,
        to: ProcessState,
        at: DateTime<Utc>,
    ) -> Result<Process> {
        let rows_affected = sqlx::query(
            "UPDATE processes SET state = $1, updated_at = $2 WHERE id = $3 AND state = $4",
        )
        .bind(to.as_str())
        .bind(at)
        .bind(id.0)
        .bind(from.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();

        let process = self.get_process(id).await?;
        if rows_affected == 0 {
            return Err(Error::Conflict(format!(
                "process {id} is {}, expected {from}",
                process.state
            )));
        }
        Ok(process)
    }

    async fn insert_membership(
        &self,
        membership: &ProcessMembership,
        activity: &Activity,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let rows_affected = sqlx::query(
            "INSERT INTO process_memberships (process_id, candidate_id, stage_id, entered_stage_at, added_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT (process_id, candidate_id) DO NOTHING",
        )
        .bind(membership.process_id.0)
        .bind(membership.candidate_id.0)
        .bind(membership.stage_id.as_str())
        .bind(membership.entered_stage_at)
        .bind(membership.added_at)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(Error::AlreadyMember {
                process: membership.process_id.to_string(),
                candidate: membership.candidate_id.to_string(),
            });
        }
        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn get_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
    ) -> Result<Option<ProcessMembership>> {
        let row: Option<MembershipRow> = sqlx::query_as(&format!(
            "SELECT {MEMBERSHIP_COLUMNS} FROM process_memberships WHERE process_id = $1 AND candidate_id = $2"
        ))
        .bind(process.0)
        .bind(candidate.0)
        .fetch_optional(self.pool())
        .await?;
        Ok(row.map(ProcessMembership::from))
    }

    async fn move_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
        from: &StageId,
        to: &StageId,
        activity: &Activity,
    ) -> Result<ProcessMembership> {
        let mut tx = self.pool().begin().await?;
        let row: Option<MembershipRow> = sqlx::query_as(&format!(
            "UPDATE process_memberships SET stage_id = $1, entered_stage_at = $2
             WHERE process_id = $3 AND candidate_id = $4 AND stage_id = $5
             RETURNING {MEMBERSHIP_COLUMNS}"
        ))
        .bind(to.as_str())
        .bind(activity.timestamp)
        .bind(process.0)
        .bind(candidate.0)
        .bind(from.as_str())
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            drop(tx);
            return Err(if self.membership_exists(process, candidate).await? {
                Error::Conflict(format!(
                    "candidate {candidate} is no longer in stage {from} of process {process}"
                ))
            } else {
                Error::NotFound(format!("candidate {candidate} in process {process}"))
            });
        };
        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(row.into())
    }

    async fn remove_membership(
        &self,
        process: ProcessId,
        candidate: CandidateId,
        activity: &Activity,
    ) -> Result<()> {
        let mut tx = self.pool().begin().await?;
        let rows_affected = sqlx::query(
            "DELETE FROM process_memberships WHERE process_id = $1 AND candidate_id = $2",
        )
        .bind(process.0)
        .bind(candidate.0)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!(
                "candidate {candidate} in process {process}"
            )));
        }
        insert_activity(&mut tx, activity).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn memberships_for_process(&self, process: ProcessId) -> Result<Vec<ProcessMembership>> {
        self.memberships_where("process_id", Some(process.0)).await
    }

    async fn memberships_for_candidate(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<ProcessMembership>> {
        self.memberships_where("candidate_id", Some(candidate.0))
            .await
    }

    async fn list_memberships(&self) -> Result<Vec<ProcessMembership>> {
        self.memberships_where("", None).await
    }

    async fn insert_workflow(&self, workflow: &Workflow) -> Result<()> {
        sqlx::query(
            "INSERT INTO workflows (id, name, active, version, body, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(workflow.id.0)
        .bind(&workflow.name)
        .bind(workflow.active)
        .bind(i32::try_from(workflow.version).unwrap_or(i32::MAX))
        .bind(Json(workflow))
        .bind(workflow.created_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    async fn get_workflow(&self, id: WorkflowId) -> Result<Workflow> {
        let body: Option<Json<Workflow>> =
            sqlx::query_scalar("SELECT body FROM workflows WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        body.map(|b| b.0)
            .ok_or_else(|| Error::NotFound(format!("workflow {id}")))
    }

    async fn list_workflows(&self) -> Result<Vec<Workflow>> {
        let bodies: Vec<Json<Workflow>> =
            sqlx::query_scalar("SELECT body FROM workflows ORDER BY created_at")
                .fetch_all(self.pool())
                .await?;
        Ok(bodies.into_iter().map(|b| b.0).collect())
    }

    async fn update_workflow(&self, workflow: &Workflow) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE workflows SET name = $1, active = $2, version = $3, body = $4 WHERE id = $5",
        )
        .bind(&workflow.name)
        .bind(workflow.active)
        .bind(i32::try_from(workflow.version).unwrap_or(i32::MAX))
        .bind(Json(workflow))
        .bind(workflow.id.0)
        .execute(self.pool())
        .await?
        .rows_affected();
        if rows_affected == 0 {
            return Err(Error::NotFound(format!("workflow {}", workflow.id)));
        }
        Ok(())
    }

    async fn insert_execution(&self, execution: &WorkflowExecution) -> Result<bool> {
        let rows_affected = sqlx::query(
            "INSERT INTO workflow_executions (id, workflow_id, candidate_id, trigger_key, state, resume_at, body, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (workflow_id, trigger_key) DO NOTHING",
        )
        .bind(execution.id.0)
        .bind(execution.workflow_id.0)
        .bind(execution.candidate_id.0)
        .bind(&execution.trigger_key)
        .bind(execution.state.as_str())
        .bind(execution.resume_at)
        .bind(Json(execution))
        .bind(execution.created_at)
        .bind(execution.updated_at)
        .execute(self.pool())
        .await?
        .rows_affected();
        Ok(rows_affected == 1)
    }

    async fn get_execution(&self, id: ExecutionId) -> Result<WorkflowExecution> {
        let body: Option<Json<WorkflowExecution>> =
            sqlx::query_scalar("SELECT body FROM workflow_executions WHERE id = $1")
                .bind(id.0)
                .fetch_optional(self.pool())
                .await?;
        body.map(|b| b.0)
            .ok_or_else(|| Error::NotFound(format!("execution {id}")))
    }

    async fn save_execution(
        &self,
        execution: &WorkflowExecution,
        expected: ExecutionState,
    ) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE workflow_executions SET state = $1, resume_at = $2, body = $3, updated_at = $4
             WHERE id = $5 AND state = $6",
        )
        .bind(execution.state.as_str())
        .bind(execution.resume_at)
        .bind(Json(execution))
        .bind(execution.updated_at)
        .bind(execution.id.0)
        .bind(expected.as_str())
        .execute(self.pool())
        .await?
        .rows_affected();

        if rows_affected == 0 {
            return Err(match self.execution_state(execution.id).await? {
                Some(state) => Error::Conflict(format!(
                    "execution {} is {state}, expected {expected}",
                    execution.id
                )),
                None => Error::NotFound(format!("execution {}", execution.id)),
            });
        }
        Ok(())
    }

    async fn count_executions(
        &self,
        workflow: WorkflowId,
        candidate: Option<CandidateId>,
        since: Option<DateTime<Utc>>,
    ) -> Result<u32> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workflow_executions
             WHERE workflow_id = $1
               AND state NOT IN ('skipped', 'cancelled')
               AND ($2::uuid IS NULL OR candidate_id = $2)
               AND ($3::timestamptz IS NULL OR created_at >= $3)",
        )
        .bind(workflow.0)
        .bind(candidate.map(|c| c.0))
        .bind(since)
        .fetch_one(self.pool())
        .await?;
        Ok(u32::try_from(count).unwrap_or(u32::MAX))
    }

    async fn due_executions(&self, now: DateTime<Utc>) -> Result<Vec<WorkflowExecution>> {
        let bodies: Vec<Json<WorkflowExecution>> = sqlx::query_scalar(
            "SELECT body FROM workflow_executions
             WHERE state = 'pending' AND (resume_at IS NULL OR resume_at <= $1)
             ORDER BY resume_at NULLS FIRST, created_at",
        )
        .bind(now)
        .fetch_all(self.pool())
        .await?;
        Ok(bodies.into_iter().map(|b| b.0).collect())
    }

    async fn executions_for_workflow(
        &self,
        workflow: WorkflowId,
    ) -> Result<Vec<WorkflowExecution>> {
        self.executions_where("workflow_id", workflow.0).await
    }

    async fn executions_for_candidate(
        &self,
        candidate: CandidateId,
    ) -> Result<Vec<WorkflowExecution>> {
        self.executions_where("candidate_id", candidate.0).await
    }
}
