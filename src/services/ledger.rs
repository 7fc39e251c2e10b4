use crate::database::connection::DbPool;
use crate::models::donation::{
    Donation, DonationError, PaymentStatus, TransitionMetadata, TransitionOutcome,
};
use crate::models::project::Project;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::future::Future;
use uuid::Uuid;

/// Persistence seam shared by the callback and polling reconcilers. `settle`
/// is the linchpin: a guarded PENDING → terminal transition plus the project
/// aggregate credit, applied together or not at all, so that any number of
/// racing reconciliation attempts credit a donation exactly once.
pub trait DonationLedger {
    fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> impl Future<Output = Result<Option<Donation>, DonationError>> + Send;

    fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> impl Future<Output = Result<Option<Donation>, DonationError>> + Send;

    /// Guarded transition alone, no aggregate side effect.
    fn transition(
        &self,
        donation_id: Uuid,
        expected: &[PaymentStatus],
        target: PaymentStatus,
        metadata: &TransitionMetadata,
    ) -> impl Future<Output = Result<TransitionOutcome, DonationError>> + Send;

    /// Bumps the project aggregate. Callers invoke this only for a transition
    /// that reported `Applied`.
    fn credit_project(
        &self,
        project_id: Uuid,
        amount: Decimal,
    ) -> impl Future<Output = Result<(), DonationError>> + Send;

    /// Guarded transition plus, when it applies and `target` is COMPLETED,
    /// the aggregate credit — one atomic unit.
    fn settle(
        &self,
        donation_id: Uuid,
        expected: &[PaymentStatus],
        target: PaymentStatus,
        metadata: &TransitionMetadata,
    ) -> impl Future<Output = Result<TransitionOutcome, DonationError>> + Send;

    fn stale_pending(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<Vec<Donation>, DonationError>> + Send;
}

/// Postgres-backed ledger over the shared pool.
#[derive(Clone)]
pub struct PgLedger {
    pool: DbPool,
}

impl PgLedger {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

impl DonationLedger for PgLedger {
    async fn find_by_transaction_id(
        &self,
        transaction_id: &str,
    ) -> Result<Option<Donation>, DonationError> {
        Donation::find_by_transaction_id(&self.pool, transaction_id).await
    }

    async fn find_by_checkout_id(
        &self,
        checkout_request_id: &str,
    ) -> Result<Option<Donation>, DonationError> {
        Donation::find_by_checkout_id(&self.pool, checkout_request_id).await
    }

    async fn transition(
        &self,
        donation_id: Uuid,
        expected: &[PaymentStatus],
        target: PaymentStatus,
        metadata: &TransitionMetadata,
    ) -> Result<TransitionOutcome, DonationError> {
        Donation::transition(&self.pool, donation_id, expected, target, metadata).await
    }

    async fn credit_project(
        &self,
        project_id: Uuid,
        amount: Decimal,
    ) -> Result<(), DonationError> {
        Project::increment_current_amount(&self.pool, project_id, amount).await?;
        Ok(())
    }

    async fn settle(
        &self,
        donation_id: Uuid,
        expected: &[PaymentStatus],
        target: PaymentStatus,
        metadata: &TransitionMetadata,
    ) -> Result<TransitionOutcome, DonationError> {
        let mut tx = self.pool.begin().await?;

        let outcome =
            Donation::transition(&mut *tx, donation_id, expected, target, metadata).await?;

        if let TransitionOutcome::Applied(donation) = &outcome {
            if target == PaymentStatus::Completed {
                Project::increment_current_amount(&mut *tx, donation.project_id, donation.amount)
                    .await?;
            }
        }

        tx.commit().await?;

        Ok(outcome)
    }

    async fn stale_pending(&self, cutoff: DateTime<Utc>) -> Result<Vec<Donation>, DonationError> {
        Donation::find_stale_pending(&self.pool, cutoff).await
    }
}
