use crate::database::connection::DbPool;
use crate::utils::receipt::{generate_receipt_number, generate_transaction_id};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgExecutor;
use sqlx::{FromRow, Type};
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum DonationError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("Project update failed: {0}")]
    Project(#[from] crate::models::project::ProjectError),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Type, PartialEq, Eq)]
#[sqlx(type_name = "payment_status", rename_all = "UPPERCASE")]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl PaymentStatus {
    /// Terminal statuses admit no further transition.
    pub fn is_terminal(self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl FromStr for PaymentStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "COMPLETED" => Ok(PaymentStatus::Completed),
            "FAILED" => Ok(PaymentStatus::Failed),
            "CANCELLED" => Ok(PaymentStatus::Cancelled),
            "TIMEOUT" => Ok(PaymentStatus::Timeout),
            _ => Err(()),
        }
    }
}

/// Result of a guarded status transition: either this caller moved the record,
/// or someone else already had and the call was a no-op.
#[derive(Debug, Clone)]
pub enum TransitionOutcome {
    Applied(Donation),
    NoOp,
}

/// Gateway result details recorded alongside a transition.
#[derive(Debug, Clone, Default)]
pub struct TransitionMetadata {
    pub result_code: Option<String>,
    pub result_desc: Option<String>,
    pub receipt_number: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Donation {
    pub id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub anonymous: bool,
    pub payment_method: String,
    pub payment_status: PaymentStatus,
    pub transaction_id: String,
    pub receipt_number: String,
    pub mpesa_checkout_request_id: Option<String>,
    pub mpesa_merchant_request_id: Option<String>,
    pub mpesa_response_code: Option<String>,
    pub mpesa_result_code: Option<String>,
    pub mpesa_result_desc: Option<String>,
    pub mpesa_receipt_number: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub project_id: Uuid,
}

#[derive(Debug, Clone)]
pub struct CreateDonation {
    pub project_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub donor_name: Option<String>,
    pub donor_email: Option<String>,
    pub message: Option<String>,
    pub anonymous: bool,
    pub payment_method: String,
}

impl Donation {
    pub async fn create(pool: &DbPool, donation: CreateDonation) -> Result<Self, DonationError> {
        let now = Utc::now();

        let donation = sqlx::query_as::<_, Donation>(
            "INSERT INTO donations (id, amount, currency, donor_name, donor_email, message, anonymous,
                 payment_method, payment_status, transaction_id, receipt_number, project_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $13)
             RETURNING *",
        )
        .bind(Uuid::new_v4())
        .bind(donation.amount)
        .bind(donation.currency)
        .bind(donation.donor_name)
        .bind(donation.donor_email)
        .bind(donation.message)
        .bind(donation.anonymous)
        .bind(donation.payment_method)
        .bind(PaymentStatus::Pending)
        .bind(generate_transaction_id())
        .bind(generate_receipt_number())
        .bind(donation.project_id)
        .bind(now)
        .fetch_one(pool)
        .await?;

        Ok(donation)
    }

    pub async fn find_by_transaction_id(
        pool: &DbPool,
        transaction_id: &str,
    ) -> Result<Option<Self>, DonationError> {
        let donation =
            sqlx::query_as::<_, Donation>("SELECT * FROM donations WHERE transaction_id = $1")
                .bind(transaction_id)
                .fetch_optional(pool)
                .await?;

        Ok(donation)
    }

    pub async fn find_by_checkout_id(
        pool: &DbPool,
        checkout_request_id: &str,
    ) -> Result<Option<Self>, DonationError> {
        let donation = sqlx::query_as::<_, Donation>(
            "SELECT * FROM donations WHERE mpesa_checkout_request_id = $1",
        )
        .bind(checkout_request_id)
        .fetch_optional(pool)
        .await?;

        Ok(donation)
    }

    /// Stores the gateway correlation ids after a successful push. Guarded on
    /// PENDING so a callback that already settled the donation is not clobbered.
    pub async fn record_push_request(
        pool: &DbPool,
        id: Uuid,
        checkout_request_id: &str,
        merchant_request_id: &str,
        response_code: &str,
    ) -> Result<Option<Self>, DonationError> {
        let donation = sqlx::query_as::<_, Donation>(
            "UPDATE donations
             SET mpesa_checkout_request_id = $2,
                 mpesa_merchant_request_id = $3,
                 mpesa_response_code = $4,
                 updated_at = now()
             WHERE id = $1 AND payment_status = 'PENDING'
             RETURNING *",
        )
        .bind(id)
        .bind(checkout_request_id)
        .bind(merchant_request_id)
        .bind(response_code)
        .fetch_optional(pool)
        .await?;

        Ok(donation)
    }

    /// The guarded transition primitive. Applies `target` only while the
    /// current status is one of `expected`; a row that has already moved on
    /// yields [`TransitionOutcome::NoOp`]. Takes any executor so callers can
    /// run it inside a transaction together with the aggregate update.
    pub async fn transition<'e, E>(
        executor: E,
        id: Uuid,
        expected: &[PaymentStatus],
        target: PaymentStatus,
        metadata: &TransitionMetadata,
    ) -> Result<TransitionOutcome, DonationError>
    where
        E: PgExecutor<'e>,
    {
        let donation = sqlx::query_as::<_, Donation>(
            "UPDATE donations
             SET payment_status = $2,
                 mpesa_result_code = COALESCE($3, mpesa_result_code),
                 mpesa_result_desc = COALESCE($4, mpesa_result_desc),
                 mpesa_receipt_number = COALESCE($5, mpesa_receipt_number),
                 completed_at = CASE WHEN $2 = 'COMPLETED' THEN now() ELSE completed_at END,
                 failed_at = CASE WHEN $2 <> 'COMPLETED' THEN now() ELSE failed_at END,
                 updated_at = now()
             WHERE id = $1 AND payment_status = ANY($6)
             RETURNING *",
        )
        .bind(id)
        .bind(target)
        .bind(metadata.result_code.as_deref())
        .bind(metadata.result_desc.as_deref())
        .bind(metadata.receipt_number.as_deref())
        .bind(expected.to_vec())
        .fetch_optional(executor)
        .await?;

        Ok(match donation {
            Some(donation) => TransitionOutcome::Applied(donation),
            None => TransitionOutcome::NoOp,
        })
    }

    /// PENDING donations created before `cutoff` that hold a checkout id,
    /// i.e. pushes whose callback never arrived.
    pub async fn find_stale_pending(
        pool: &DbPool,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<Self>, DonationError> {
        let donations = sqlx::query_as::<_, Donation>(
            "SELECT * FROM donations
             WHERE payment_status = 'PENDING'
               AND mpesa_checkout_request_id IS NOT NULL
               AND created_at < $1
             ORDER BY created_at ASC",
        )
        .bind(cutoff)
        .fetch_all(pool)
        .await?;

        Ok(donations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_is_the_only_non_terminal_status() {
        assert!(!PaymentStatus::Pending.is_terminal());
        assert!(PaymentStatus::Completed.is_terminal());
        assert!(PaymentStatus::Failed.is_terminal());
        assert!(PaymentStatus::Cancelled.is_terminal());
        assert!(PaymentStatus::Timeout.is_terminal());
    }

    #[test]
    fn status_parses_from_wire_form() {
        assert_eq!("PENDING".parse::<PaymentStatus>(), Ok(PaymentStatus::Pending));
        assert_eq!("COMPLETED".parse::<PaymentStatus>(), Ok(PaymentStatus::Completed));
        assert_eq!("TIMEOUT".parse::<PaymentStatus>(), Ok(PaymentStatus::Timeout));
        assert!("completed".parse::<PaymentStatus>().is_err());
        assert!("".parse::<PaymentStatus>().is_err());
    }

    #[test]
    fn status_serializes_screaming() {
        let json = serde_json::to_string(&PaymentStatus::Cancelled).unwrap();
        assert_eq!(json, "\"CANCELLED\"");
    }
}
