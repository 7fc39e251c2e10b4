use crate::database::connection::DbPool;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::{FromRow, Type};
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum ProjectError {
    #[error("Project with ID {id} not found")]
    NotFound { id: Uuid },
    #[error("Cannot delete project with existing donations")]
    HasDonations,
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "project_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProjectStatus {
    Active,
    Urgent,
    Completed,
    Suspended,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Project {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub goal_amount: Decimal,
    pub current_amount: Decimal,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Project {
    pub fn is_accepting_donations(&self) -> bool {
        matches!(self.status, ProjectStatus::Active | ProjectStatus::Urgent)
    }

    pub async fn find_by_id(pool: &DbPool, id: Uuid) -> Result<Option<Self>, ProjectError> {
        let project = sqlx::query_as::<_, Project>("SELECT * FROM projects WHERE id = $1")
            .bind(id)
            .fetch_optional(pool)
            .await?;

        Ok(project)
    }

    /// Atomic aggregate bump, called only when the paired donation transition
    /// actually applied. Takes any executor so it can share the transition's
    /// transaction.
    pub async fn increment_current_amount<'e, E>(
        executor: E,
        id: Uuid,
        amount: Decimal,
    ) -> Result<(), ProjectError>
    where
        E: PgExecutor<'e>,
    {
        let result = sqlx::query(
            "UPDATE projects
             SET current_amount = current_amount + $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(amount)
        .execute(executor)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ProjectError::NotFound { id });
        }

        Ok(())
    }

    pub async fn donation_count(pool: &DbPool, id: Uuid) -> Result<i64, ProjectError> {
        let (count,): (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM donations WHERE project_id = $1")
                .bind(id)
                .fetch_one(pool)
                .await?;

        Ok(count)
    }

    /// Deletes a project only when no donation references it; the donations
    /// table keeps an ON DELETE RESTRICT foreign key as a backstop.
    pub async fn delete(pool: &DbPool, id: Uuid) -> Result<(), ProjectError> {
        if Self::donation_count(pool, id).await? > 0 {
            return Err(ProjectError::HasDonations);
        }

        let result = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await;

        match result {
            Ok(done) if done.rows_affected() == 0 => Err(ProjectError::NotFound { id }),
            Ok(_) => Ok(()),
            // A donation created between the count and the delete trips the FK.
            Err(sqlx::Error::Database(e)) if e.is_foreign_key_violation() => {
                Err(ProjectError::HasDonations)
            }
            Err(e) => Err(e.into()),
        }
    }
}
