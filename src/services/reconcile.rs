use crate::models::donation::{
    Donation, DonationError, PaymentStatus, TransitionMetadata, TransitionOutcome,
};
use crate::services::ledger::DonationLedger;
use crate::services::mpesa::MpesaClient;
use chrono::{Duration, Utc};
use tracing::{error, info, warn};

/// Gateway result codes with a dedicated terminal state.
const RESULT_SUCCESS: i64 = 0;
const RESULT_USER_CANCELLED: i64 = 1032;
const RESULT_TIMEOUT: i64 = 1037;

/// Maps a gateway result code to the donation's terminal state. Total: any
/// code the table does not recognize is a plain failure.
pub fn target_state_for(result_code: i64) -> PaymentStatus {
    match result_code {
        RESULT_SUCCESS => PaymentStatus::Completed,
        RESULT_USER_CANCELLED => PaymentStatus::Cancelled,
        RESULT_TIMEOUT => PaymentStatus::Timeout,
        _ => PaymentStatus::Failed,
    }
}

/// A terminal gateway verdict, from either the callback or the status query.
#[derive(Debug, Clone)]
pub struct GatewayResult {
    pub code: i64,
    pub description: String,
    pub receipt_number: Option<String>,
}

#[derive(Debug, Clone)]
pub enum ReconcileOutcome {
    /// This caller won the PENDING → terminal race; for COMPLETED the project
    /// aggregate was credited in the same unit.
    Applied(Donation),
    /// Another delivery or poll settled the donation first. Not an error.
    RaceLost,
}

/// Applies a gateway verdict to a donation through the guarded transition.
/// Both the callback and the polling paths funnel through here, so redelivery
/// and callback/poll races collapse to exactly one applied transition.
pub async fn apply_result<L: DonationLedger>(
    ledger: &L,
    donation: &Donation,
    result: &GatewayResult,
) -> Result<ReconcileOutcome, DonationError> {
    let target = target_state_for(result.code);
    let metadata = TransitionMetadata {
        result_code: Some(result.code.to_string()),
        result_desc: Some(result.description.clone()),
        receipt_number: result.receipt_number.clone(),
    };

    match ledger
        .settle(donation.id, &[PaymentStatus::Pending], target, &metadata)
        .await?
    {
        TransitionOutcome::Applied(updated) => {
            info!(
                "Donation {} settled as {:?} (result code {})",
                donation.transaction_id, target, result.code
            );
            Ok(ReconcileOutcome::Applied(updated))
        }
        TransitionOutcome::NoOp => {
            info!(
                "Donation {} already settled; ignoring result code {}",
                donation.transaction_id, result.code
            );
            Ok(ReconcileOutcome::RaceLost)
        }
    }
}

#[derive(Debug, Clone)]
pub enum PollOutcome {
    /// The query returned a verdict and this caller applied it.
    Settled(Donation),
    /// A concurrent callback or poll got there first.
    AlreadySettled,
    /// No verdict yet; the donation stays PENDING untouched.
    StillPending(String),
}

/// Fallback reconciliation for a PENDING donation: query the gateway and apply
/// the verdict through the same transition rule as the callback path. Query
/// failures are soft; the donation is left as it stands.
pub async fn reconcile_via_query<L: DonationLedger>(
    client: &MpesaClient,
    ledger: &L,
    donation: &Donation,
) -> Result<PollOutcome, DonationError> {
    let Some(checkout_request_id) = donation.mpesa_checkout_request_id.as_deref() else {
        return Ok(PollOutcome::StillPending(
            "Payment has not been initiated yet".to_string(),
        ));
    };

    match client.query(checkout_request_id).await {
        Ok(query) => {
            // A malformed code is treated as a plain failure, as the callback
            // path would.
            let code = query.result_code.parse::<i64>().unwrap_or(-1);
            let result = GatewayResult {
                code,
                description: query.result_desc,
                receipt_number: None,
            };
            match apply_result(ledger, donation, &result).await? {
                ReconcileOutcome::Applied(updated) => Ok(PollOutcome::Settled(updated)),
                ReconcileOutcome::RaceLost => Ok(PollOutcome::AlreadySettled),
            }
        }
        Err(e) => {
            warn!(
                "Status query for {} failed, leaving donation PENDING: {}",
                donation.transaction_id, e
            );
            Ok(PollOutcome::StillPending(
                "Payment status check failed, but payment may still be processing".to_string(),
            ))
        }
    }
}

/// Reconciles PENDING donations whose callback never arrived. Each stale
/// donation goes through the same query fallback as an on-demand status check.
pub async fn sweep_stale<L: DonationLedger>(
    client: &MpesaClient,
    ledger: &L,
    stale_after_secs: u64,
) -> Result<usize, DonationError> {
    let cutoff = Utc::now() - Duration::seconds(stale_after_secs as i64);
    let stale = ledger.stale_pending(cutoff).await?;

    if stale.is_empty() {
        return Ok(0);
    }
    info!("Sweeping {} stale PENDING donation(s)", stale.len());

    let mut settled = 0;
    for donation in &stale {
        match reconcile_via_query(client, ledger, donation).await {
            Ok(PollOutcome::Settled(_)) => settled += 1,
            Ok(_) => {}
            Err(e) => error!(
                "Sweep failed to reconcile donation {}: {}",
                donation.transaction_id, e
            ),
        }
    }

    Ok(settled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::future::join_all;
    use rust_decimal::Decimal;
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};
    use uuid::Uuid;

    /// In-memory ledger with the same settle semantics as the Postgres one:
    /// guarded transition and aggregate credit under a single lock.
    #[derive(Default)]
    struct MemLedger {
        state: Mutex<MemState>,
    }

    #[derive(Default)]
    struct MemState {
        donations: HashMap<Uuid, Donation>,
        project_totals: HashMap<Uuid, Decimal>,
    }

    impl MemLedger {
        fn with_donation(donation: Donation) -> Self {
            let ledger = MemLedger::default();
            {
                let mut state = ledger.state.lock().unwrap();
                state.project_totals.insert(donation.project_id, Decimal::ZERO);
                state.donations.insert(donation.id, donation);
            }
            ledger
        }

        fn project_total(&self, project_id: Uuid) -> Decimal {
            *self
                .state
                .lock()
                .unwrap()
                .project_totals
                .get(&project_id)
                .unwrap()
        }

        fn status_of(&self, donation_id: Uuid) -> PaymentStatus {
            self.state.lock().unwrap().donations[&donation_id].payment_status
        }

        fn apply(
            state: &mut MemState,
            donation_id: Uuid,
            expected: &[PaymentStatus],
            target: PaymentStatus,
            metadata: &TransitionMetadata,
        ) -> TransitionOutcome {
            let Some(donation) = state.donations.get_mut(&donation_id) else {
                return TransitionOutcome::NoOp;
            };
            if !expected.contains(&donation.payment_status) {
                return TransitionOutcome::NoOp;
            }
            donation.payment_status = target;
            donation.mpesa_result_code = metadata.result_code.clone();
            donation.mpesa_result_desc = metadata.result_desc.clone();
            if metadata.receipt_number.is_some() {
                donation.mpesa_receipt_number = metadata.receipt_number.clone();
            }
            if target == PaymentStatus::Completed {
                donation.completed_at = Some(Utc::now());
            } else {
                donation.failed_at = Some(Utc::now());
            }
            TransitionOutcome::Applied(donation.clone())
        }
    }

    impl DonationLedger for MemLedger {
        async fn find_by_transaction_id(
            &self,
            transaction_id: &str,
        ) -> Result<Option<Donation>, DonationError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .donations
                .values()
                .find(|d| d.transaction_id == transaction_id)
                .cloned())
        }

        async fn find_by_checkout_id(
            &self,
            checkout_request_id: &str,
        ) -> Result<Option<Donation>, DonationError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .donations
                .values()
                .find(|d| d.mpesa_checkout_request_id.as_deref() == Some(checkout_request_id))
                .cloned())
        }

        async fn transition(
            &self,
            donation_id: Uuid,
            expected: &[PaymentStatus],
            target: PaymentStatus,
            metadata: &TransitionMetadata,
        ) -> Result<TransitionOutcome, DonationError> {
            let mut state = self.state.lock().unwrap();
            Ok(Self::apply(&mut state, donation_id, expected, target, metadata))
        }

        async fn credit_project(
            &self,
            project_id: Uuid,
            amount: Decimal,
        ) -> Result<(), DonationError> {
            let mut state = self.state.lock().unwrap();
            *state.project_totals.entry(project_id).or_default() += amount;
            Ok(())
        }

        async fn settle(
            &self,
            donation_id: Uuid,
            expected: &[PaymentStatus],
            target: PaymentStatus,
            metadata: &TransitionMetadata,
        ) -> Result<TransitionOutcome, DonationError> {
            let mut state = self.state.lock().unwrap();
            let outcome = Self::apply(&mut state, donation_id, expected, target, metadata);
            if let TransitionOutcome::Applied(donation) = &outcome {
                if target == PaymentStatus::Completed {
                    *state.project_totals.entry(donation.project_id).or_default() +=
                        donation.amount;
                }
            }
            Ok(outcome)
        }

        async fn stale_pending(
            &self,
            cutoff: chrono::DateTime<Utc>,
        ) -> Result<Vec<Donation>, DonationError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .donations
                .values()
                .filter(|d| {
                    d.payment_status == PaymentStatus::Pending
                        && d.mpesa_checkout_request_id.is_some()
                        && d.created_at < cutoff
                })
                .cloned()
                .collect())
        }
    }

    fn pending_donation(amount: u64) -> Donation {
        let now = Utc::now();
        Donation {
            id: Uuid::new_v4(),
            amount: Decimal::from(amount),
            currency: "KES".to_string(),
            donor_name: None,
            donor_email: None,
            message: None,
            anonymous: true,
            payment_method: "MPESA".to_string(),
            payment_status: PaymentStatus::Pending,
            transaction_id: "TXTEST123".to_string(),
            receipt_number: "RCTEST123".to_string(),
            mpesa_checkout_request_id: Some("C1".to_string()),
            mpesa_merchant_request_id: Some("M1".to_string()),
            mpesa_response_code: Some("0".to_string()),
            mpesa_result_code: None,
            mpesa_result_desc: None,
            mpesa_receipt_number: None,
            completed_at: None,
            failed_at: None,
            created_at: now,
            updated_at: now,
            project_id: Uuid::new_v4(),
        }
    }

    fn success_result() -> GatewayResult {
        GatewayResult {
            code: 0,
            description: "The service request is processed successfully.".to_string(),
            receipt_number: Some("NLJ7RT61SV".to_string()),
        }
    }

    #[test]
    fn transition_table_is_total() {
        assert_eq!(target_state_for(0), PaymentStatus::Completed);
        assert_eq!(target_state_for(1032), PaymentStatus::Cancelled);
        assert_eq!(target_state_for(1037), PaymentStatus::Timeout);
        assert_eq!(target_state_for(1), PaymentStatus::Failed);
        assert_eq!(target_state_for(1001), PaymentStatus::Failed);
        assert_eq!(target_state_for(-1), PaymentStatus::Failed);
        assert_eq!(target_state_for(i64::MAX), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn successful_result_completes_and_credits_once() {
        let donation = pending_donation(500);
        let project_id = donation.project_id;
        let ledger = MemLedger::with_donation(donation.clone());

        let outcome = apply_result(&ledger, &donation, &success_result())
            .await
            .unwrap();
        let ReconcileOutcome::Applied(updated) = outcome else {
            panic!("first delivery must apply");
        };
        assert_eq!(updated.payment_status, PaymentStatus::Completed);
        assert_eq!(updated.mpesa_receipt_number.as_deref(), Some("NLJ7RT61SV"));
        assert!(updated.completed_at.is_some());
        assert_eq!(ledger.project_total(project_id), Decimal::from(500));
    }

    #[tokio::test]
    async fn duplicate_delivery_does_not_credit_twice() {
        let donation = pending_donation(500);
        let project_id = donation.project_id;
        let ledger = MemLedger::with_donation(donation.clone());

        let first = apply_result(&ledger, &donation, &success_result())
            .await
            .unwrap();
        assert!(matches!(first, ReconcileOutcome::Applied(_)));

        let second = apply_result(&ledger, &donation, &success_result())
            .await
            .unwrap();
        assert!(matches!(second, ReconcileOutcome::RaceLost));

        assert_eq!(ledger.status_of(donation.id), PaymentStatus::Completed);
        assert_eq!(ledger.project_total(project_id), Decimal::from(500));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_reconciliation_credits_exactly_once() {
        let donation = pending_donation(500);
        let project_id = donation.project_id;
        let ledger = Arc::new(MemLedger::with_donation(donation.clone()));

        let attempts = (0..16).map(|_| {
            let ledger = Arc::clone(&ledger);
            let donation = donation.clone();
            tokio::spawn(async move {
                apply_result(&*ledger, &donation, &success_result()).await
            })
        });

        let outcomes: Vec<_> = join_all(attempts)
            .await
            .into_iter()
            .map(|joined| joined.unwrap().unwrap())
            .collect();

        let applied = outcomes
            .iter()
            .filter(|o| matches!(o, ReconcileOutcome::Applied(_)))
            .count();
        assert_eq!(applied, 1, "exactly one attempt must win the transition");
        assert_eq!(outcomes.len() - applied, 15);
        assert_eq!(ledger.project_total(project_id), Decimal::from(500));
    }

    #[tokio::test]
    async fn bare_transition_has_no_aggregate_side_effect() {
        let donation = pending_donation(300);
        let project_id = donation.project_id;
        let ledger = MemLedger::with_donation(donation.clone());

        let outcome = ledger
            .transition(
                donation.id,
                &[PaymentStatus::Pending],
                PaymentStatus::Completed,
                &TransitionMetadata::default(),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, TransitionOutcome::Applied(_)));
        assert_eq!(ledger.project_total(project_id), Decimal::ZERO);

        // The credit is a separate primitive, invoked only on Applied.
        ledger
            .credit_project(project_id, donation.amount)
            .await
            .unwrap();
        assert_eq!(ledger.project_total(project_id), Decimal::from(300));
    }

    #[tokio::test]
    async fn terminal_states_admit_no_transition() {
        let donation = pending_donation(250);
        let project_id = donation.project_id;
        let ledger = MemLedger::with_donation(donation.clone());

        let cancelled = GatewayResult {
            code: 1032,
            description: "Request cancelled by user".to_string(),
            receipt_number: None,
        };
        let first = apply_result(&ledger, &donation, &cancelled).await.unwrap();
        assert!(matches!(first, ReconcileOutcome::Applied(_)));
        assert_eq!(ledger.status_of(donation.id), PaymentStatus::Cancelled);

        // A late success delivery must not revive or credit the donation.
        let late = apply_result(&ledger, &donation, &success_result())
            .await
            .unwrap();
        assert!(matches!(late, ReconcileOutcome::RaceLost));
        assert_eq!(ledger.status_of(donation.id), PaymentStatus::Cancelled);
        assert_eq!(ledger.project_total(project_id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn timeout_result_does_not_touch_the_aggregate() {
        let donation = pending_donation(100);
        let project_id = donation.project_id;
        let ledger = MemLedger::with_donation(donation.clone());

        let timed_out = GatewayResult {
            code: 1037,
            description: "DS timeout user cannot be reached".to_string(),
            receipt_number: None,
        };
        let outcome = apply_result(&ledger, &donation, &timed_out).await.unwrap();
        let ReconcileOutcome::Applied(updated) = outcome else {
            panic!("timeout verdict must apply");
        };
        assert_eq!(updated.payment_status, PaymentStatus::Timeout);
        assert!(updated.failed_at.is_some());
        assert!(updated.completed_at.is_none());
        assert_eq!(ledger.project_total(project_id), Decimal::ZERO);
    }

    #[tokio::test]
    async fn unknown_result_code_fails_the_donation() {
        let donation = pending_donation(100);
        let ledger = MemLedger::with_donation(donation.clone());

        let odd = GatewayResult {
            code: 2001,
            description: "The initiator information is invalid.".to_string(),
            receipt_number: None,
        };
        let outcome = apply_result(&ledger, &donation, &odd).await.unwrap();
        assert!(matches!(outcome, ReconcileOutcome::Applied(_)));
        assert_eq!(ledger.status_of(donation.id), PaymentStatus::Failed);
    }

    #[tokio::test]
    async fn stale_pending_selects_only_old_pending_with_checkout_id() {
        let old = pending_donation(100);
        let ledger = MemLedger::with_donation(old.clone());
        {
            let mut state = ledger.state.lock().unwrap();
            state.donations.get_mut(&old.id).unwrap().created_at =
                Utc::now() - Duration::seconds(7200);

            let mut fresh = pending_donation(100);
            fresh.id = Uuid::new_v4();
            fresh.created_at = Utc::now() + Duration::seconds(3600);
            state.donations.insert(fresh.id, fresh);

            let mut no_push = pending_donation(100);
            no_push.id = Uuid::new_v4();
            no_push.mpesa_checkout_request_id = None;
            no_push.created_at = Utc::now() - Duration::seconds(7200);
            state.donations.insert(no_push.id, no_push);
        }

        let stale = ledger.stale_pending(Utc::now()).await.unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, old.id);
    }
}
