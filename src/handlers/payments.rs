use crate::config::AppConfig;
use crate::database::connection::DbPool;
use crate::models::donation::{Donation, PaymentStatus, TransitionMetadata};
use crate::requests::payment::{CallbackAck, CallbackEnvelope, InitiatePushRequest};
use crate::services::ledger::{DonationLedger, PgLedger};
use crate::services::mpesa::{MpesaClient, MpesaError};
use crate::services::reconcile::{self, GatewayResult, PollOutcome};
use crate::utils::helpers::ApiResponse;
use crate::utils::phone::normalize_phone;
use actix_web::{HttpResponse, Result, web};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

/// Initiates an STK push for an existing PENDING donation. All validation
/// happens before the gateway is contacted; a gateway failure settles the
/// donation as FAILED with the gateway code on record.
pub async fn initiate(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    client: web::Data<MpesaClient>,
    ledger: web::Data<PgLedger>,
    request: web::Json<InitiatePushRequest>,
) -> Result<HttpResponse> {
    info!("Initiating STK push for transaction {}", request.transaction_id);

    let donation = match Donation::find_by_transaction_id(&pool, &request.transaction_id).await {
        Ok(Some(donation)) => donation,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
                "Transaction not found".to_string(),
            )));
        }
        Err(e) => {
            error!("Database error loading transaction: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to load transaction".to_string(),
                )),
            );
        }
    };

    match donation.payment_status {
        PaymentStatus::Pending => {}
        PaymentStatus::Completed => {
            return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
                "Transaction already completed".to_string(),
            )));
        }
        _ => {
            return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
                "Transaction already failed".to_string(),
            )));
        }
    }

    if donation.amount < config.min_donation_amount || donation.amount > config.max_donation_amount
    {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
            "Invalid amount. Donations must be between {} and {} {}",
            config.min_donation_amount, config.max_donation_amount, config.default_currency
        ))));
    }

    let phone = match normalize_phone(&request.phone_number) {
        Ok(phone) => phone,
        Err(e) => {
            return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())));
        }
    };

    let description = request
        .description
        .clone()
        .unwrap_or_else(|| format!("Donation {}", donation.transaction_id));

    match client
        .stk_push(donation.amount, &phone, &donation.transaction_id, &description)
        .await
    {
        Ok(push) => {
            let recorded = Donation::record_push_request(
                &pool,
                donation.id,
                &push.checkout_request_id,
                &push.merchant_request_id,
                &push.response_code,
            )
            .await;
            match recorded {
                Ok(Some(_)) => {}
                Ok(None) => {
                    // Settled between our read and the push response; the
                    // reconcilers own the record from here.
                    warn!(
                        "Donation {} left PENDING before push ids could be stored",
                        donation.transaction_id
                    );
                }
                Err(e) => {
                    error!("Failed to store push correlation ids: {}", e);
                    return Ok(HttpResponse::InternalServerError().json(
                        ApiResponse::<()>::error("Failed to record push request".to_string()),
                    ));
                }
            }

            info!(
                "STK push sent for {}: checkout id {}",
                donation.transaction_id, push.checkout_request_id
            );
            Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
                json!({
                    "transaction_id": donation.transaction_id,
                    "checkout_request_id": push.checkout_request_id,
                    "merchant_request_id": push.merchant_request_id,
                }),
                push.customer_message
                    .unwrap_or_else(|| "STK push sent successfully".to_string()),
            )))
        }
        Err(e) => {
            let code = match &e {
                MpesaError::Rejected { code, .. } => code.clone(),
                MpesaError::Auth => "AUTH_FAILED".to_string(),
                _ => "ERROR".to_string(),
            };
            let metadata = TransitionMetadata {
                result_code: Some(code),
                result_desc: Some(e.to_string()),
                receipt_number: None,
            };
            if let Err(settle_err) = ledger
                .settle(
                    donation.id,
                    &[PaymentStatus::Pending],
                    PaymentStatus::Failed,
                    &metadata,
                )
                .await
            {
                error!(
                    "Failed to mark donation {} as FAILED: {}",
                    donation.transaction_id, settle_err
                );
            }

            error!("STK push failed for {}: {}", donation.transaction_id, e);
            let mut response = match &e {
                MpesaError::Rejected { .. } => HttpResponse::BadRequest(),
                MpesaError::Auth | MpesaError::Unavailable(_) => HttpResponse::BadGateway(),
                MpesaError::Config(_) => HttpResponse::InternalServerError(),
            };
            Ok(response.json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}

/// Gateway webhook. Whatever happens inside, the gateway gets `{ResultCode: 0}`
/// back; anything else triggers redelivery storms. The body is taken raw so
/// that even an unparseable payload still reaches the ack instead of being
/// bounced by the JSON extractor.
pub async fn callback(ledger: web::Data<PgLedger>, body: web::Bytes) -> Result<HttpResponse> {
    let envelope = match serde_json::from_slice::<CallbackEnvelope>(&body) {
        Ok(envelope) => envelope,
        Err(e) => {
            error!("Invalid callback format: {}", e);
            return Ok(HttpResponse::Ok().json(CallbackAck::success()));
        }
    };
    let stk_callback = envelope.body.stk_callback;
    info!(
        "Callback for checkout {} (merchant request {}): result code {}",
        stk_callback.checkout_request_id,
        stk_callback.merchant_request_id.as_deref().unwrap_or("-"),
        stk_callback.result_code
    );
    if stk_callback.result_code == 0 {
        debug!(
            "Payer {:?} paid {:?} at {:?}",
            stk_callback.phone_number(),
            stk_callback.paid_amount(),
            stk_callback.transaction_date()
        );
    }

    let donation = match ledger
        .find_by_checkout_id(&stk_callback.checkout_request_id)
        .await
    {
        Ok(Some(donation)) => donation,
        Ok(None) => {
            error!(
                "No donation on file for checkout id {}",
                stk_callback.checkout_request_id
            );
            return Ok(HttpResponse::Ok().json(CallbackAck::success()));
        }
        Err(e) => {
            error!("Database error during callback lookup: {}", e);
            return Ok(HttpResponse::Ok().json(CallbackAck::success()));
        }
    };

    let result = GatewayResult {
        code: stk_callback.result_code,
        description: stk_callback.result_desc.clone().unwrap_or_default(),
        receipt_number: stk_callback.receipt_number(),
    };
    if let Err(e) = reconcile::apply_result(ledger.get_ref(), &donation, &result).await {
        error!(
            "Callback reconciliation failed for {}: {}",
            donation.transaction_id, e
        );
    }

    Ok(HttpResponse::Ok().json(CallbackAck::success()))
}

/// Timeout route the gateway calls when a push expires undelivered. Same
/// unconditional acknowledgement as the main callback.
pub async fn timeout_callback() -> Result<HttpResponse> {
    info!("Gateway timeout callback received");
    Ok(HttpResponse::Ok().json(CallbackAck::success()))
}

#[derive(Debug, Serialize)]
pub struct PaymentStatusView {
    pub status: PaymentStatus,
    pub transaction_id: String,
    pub amount: Decimal,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mpesa_receipt_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl PaymentStatusView {
    fn new(donation: &Donation, message: Option<String>) -> Self {
        Self {
            status: donation.payment_status,
            transaction_id: donation.transaction_id.clone(),
            amount: donation.amount,
            currency: donation.currency.clone(),
            mpesa_receipt_number: donation.mpesa_receipt_number.clone(),
            completed_at: donation.completed_at,
            failed_at: donation.failed_at,
            message,
        }
    }
}

/// Client-facing status query, keyed by platform transaction id. Terminal
/// donations answer from the ledger; a PENDING donation with a checkout id
/// falls back to a gateway query through the shared reconciliation rule.
pub async fn status(
    client: web::Data<MpesaClient>,
    ledger: web::Data<PgLedger>,
    path: web::Path<String>,
) -> Result<HttpResponse> {
    let transaction_id = path.into_inner();

    let donation = match ledger.find_by_transaction_id(&transaction_id).await {
        Ok(Some(donation)) => donation,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
                "Transaction not found".to_string(),
            )));
        }
        Err(e) => {
            error!("Database error loading transaction: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to load transaction".to_string(),
                )),
            );
        }
    };

    if donation.payment_status.is_terminal() {
        return Ok(
            HttpResponse::Ok().json(ApiResponse::success(PaymentStatusView::new(&donation, None)))
        );
    }

    match reconcile::reconcile_via_query(client.get_ref(), ledger.get_ref(), &donation).await {
        Ok(PollOutcome::Settled(updated)) => Ok(HttpResponse::Ok()
            .json(ApiResponse::success(PaymentStatusView::new(&updated, None)))),
        Ok(PollOutcome::AlreadySettled) => {
            // A callback won the race while we were querying; re-read for the
            // terminal verdict.
            let settled = ledger
                .find_by_transaction_id(&transaction_id)
                .await
                .ok()
                .flatten()
                .unwrap_or(donation);
            Ok(HttpResponse::Ok()
                .json(ApiResponse::success(PaymentStatusView::new(&settled, None))))
        }
        Ok(PollOutcome::StillPending(message)) => Ok(HttpResponse::Ok().json(
            ApiResponse::success(PaymentStatusView::new(&donation, Some(message))),
        )),
        Err(e) => {
            error!(
                "Status reconciliation failed for {}: {}",
                donation.transaction_id, e
            );
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to check payment status".to_string(),
                )),
            )
        }
    }
}
