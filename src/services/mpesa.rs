use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::env;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// Cached bearer tokens nominally live 60 minutes; refresh 10 minutes early.
const TOKEN_TTL: Duration = Duration::from_secs(50 * 60);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum MpesaError {
    #[error("M-Pesa configuration error: {0}")]
    Config(String),
    #[error("Failed to authenticate with the M-Pesa API")]
    Auth,
    #[error("M-Pesa API unavailable: {0}")]
    Unavailable(String),
    #[error("M-Pesa rejected the request ({code}): {message}")]
    Rejected { code: String, message: String },
}

impl From<reqwest::Error> for MpesaError {
    fn from(e: reqwest::Error) -> Self {
        MpesaError::Unavailable(e.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct MpesaConfig {
    pub environment: String,
    pub consumer_key: String,
    pub consumer_secret: String,
    pub shortcode: String,
    pub passkey: String,
    pub callback_url: String,
}

impl MpesaConfig {
    pub fn from_env() -> Result<Self, MpesaError> {
        Ok(Self {
            environment: env::var("MPESA_ENVIRONMENT").unwrap_or_else(|_| "sandbox".to_string()),
            consumer_key: env::var("MPESA_CONSUMER_KEY")
                .map_err(|_| MpesaError::Config("MPESA_CONSUMER_KEY not set".to_string()))?,
            consumer_secret: env::var("MPESA_CONSUMER_SECRET")
                .map_err(|_| MpesaError::Config("MPESA_CONSUMER_SECRET not set".to_string()))?,
            shortcode: env::var("MPESA_SHORTCODE")
                .map_err(|_| MpesaError::Config("MPESA_SHORTCODE not set".to_string()))?,
            passkey: env::var("MPESA_PASSKEY")
                .map_err(|_| MpesaError::Config("MPESA_PASSKEY not set".to_string()))?,
            callback_url: env::var("MPESA_CALLBACK_URL")
                .map_err(|_| MpesaError::Config("MPESA_CALLBACK_URL not set".to_string()))?,
        })
    }

    fn base_url(&self) -> &'static str {
        if self.environment == "production" {
            "https://api.safaricom.co.ke"
        } else {
            "https://sandbox.safaricom.co.ke"
        }
    }
}

/// Correlation ids returned by a successful STK push.
#[derive(Debug, Clone)]
pub struct PushOutcome {
    pub checkout_request_id: String,
    pub merchant_request_id: String,
    pub response_code: String,
    pub response_description: String,
    pub customer_message: Option<String>,
}

#[derive(Debug, Clone)]
pub struct QueryOutcome {
    pub result_code: String,
    pub result_desc: String,
}

#[derive(Debug, Deserialize)]
struct AuthResponse {
    access_token: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    transaction_type: &'a str,
    amount: u64,
    party_a: &'a str,
    party_b: &'a str,
    phone_number: &'a str,
    #[serde(rename = "CallBackURL")]
    callback_url: &'a str,
    account_reference: &'a str,
    transaction_desc: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkPushResponse {
    #[serde(rename = "MerchantRequestID")]
    merchant_request_id: Option<String>,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: Option<String>,
    response_code: Option<String>,
    response_description: Option<String>,
    customer_message: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryRequest<'a> {
    business_short_code: &'a str,
    password: String,
    timestamp: String,
    #[serde(rename = "CheckoutRequestID")]
    checkout_request_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct StkQueryResponse {
    result_code: Option<String>,
    result_desc: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GatewayErrorBody {
    #[serde(rename = "errorCode")]
    error_code: Option<String>,
    #[serde(rename = "errorMessage")]
    error_message: Option<String>,
}

struct CachedToken {
    token: String,
    expires_at: Instant,
}

/// Client for the M-Pesa Daraja API: bearer-token caching, STK push and
/// push-status query. Retries are left to callers.
pub struct MpesaClient {
    http: reqwest::Client,
    config: MpesaConfig,
    token: RwLock<Option<CachedToken>>,
}

impl MpesaClient {
    pub fn new(config: MpesaConfig) -> Result<Self, MpesaError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| MpesaError::Config(format!("HTTP client build failed: {e}")))?;

        Ok(Self {
            http,
            config,
            token: RwLock::new(None),
        })
    }

    pub fn from_env() -> Result<Self, MpesaError> {
        Self::new(MpesaConfig::from_env()?)
    }

    /// Returns the cached bearer token, exchanging Basic credentials for a
    /// fresh one when the cache is empty or past its margin. Concurrent
    /// refreshes may race; the exchange is idempotent so last-writer-wins is
    /// fine.
    async fn access_token(&self) -> Result<String, MpesaError> {
        if let Ok(guard) = self.token.read() {
            if let Some(cached) = guard.as_ref() {
                if cached.expires_at > Instant::now() {
                    return Ok(cached.token.clone());
                }
            }
        }

        let url = format!(
            "{}/oauth/v1/generate?grant_type=client_credentials",
            self.config.base_url()
        );
        let response = self
            .http
            .get(&url)
            .basic_auth(&self.config.consumer_key, Some(&self.config.consumer_secret))
            .send()
            .await?;

        if !response.status().is_success() {
            warn!("M-Pesa auth rejected with status {}", response.status());
            return Err(MpesaError::Auth);
        }

        let body: AuthResponse = response.json().await.map_err(|_| MpesaError::Auth)?;
        let token = body.access_token.ok_or(MpesaError::Auth)?;

        if let Ok(mut guard) = self.token.write() {
            *guard = Some(CachedToken {
                token: token.clone(),
                expires_at: Instant::now() + TOKEN_TTL,
            });
        }
        debug!("M-Pesa access token refreshed");

        Ok(token)
    }

    /// Prompts the payer's handset to approve `amount`. On success the
    /// donation stays pending until the asynchronous callback arrives.
    pub async fn stk_push(
        &self,
        amount: Decimal,
        phone: &str,
        reference: &str,
        description: &str,
    ) -> Result<PushOutcome, MpesaError> {
        let token = self.access_token().await?;
        let timestamp = timestamp(Utc::now());
        let password = password(&self.config.shortcode, &self.config.passkey, &timestamp);

        // The gateway only accepts whole currency units.
        let whole_amount = amount
            .round()
            .to_u64()
            .ok_or_else(|| MpesaError::Rejected {
                code: "INVALID_AMOUNT".to_string(),
                message: format!("Amount {amount} is not representable"),
            })?;

        let request = StkPushRequest {
            business_short_code: &self.config.shortcode,
            password,
            timestamp,
            transaction_type: "CustomerPayBillOnline",
            amount: whole_amount,
            party_a: phone,
            party_b: &self.config.shortcode,
            phone_number: phone,
            callback_url: &self.config.callback_url,
            account_reference: reference,
            transaction_desc: description,
        };

        let url = format!("{}/mpesa/stkpush/v1/processrequest", self.config.base_url());
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: StkPushResponse = response.json().await?;
            let response_code = body.response_code.unwrap_or_else(|| "ERROR".to_string());
            if response_code != "0" {
                return Err(MpesaError::Rejected {
                    code: response_code,
                    message: body
                        .response_description
                        .unwrap_or_else(|| "STK push rejected".to_string()),
                });
            }
            return Ok(PushOutcome {
                checkout_request_id: body.checkout_request_id.unwrap_or_default(),
                merchant_request_id: body.merchant_request_id.unwrap_or_default(),
                response_code,
                response_description: body.response_description.unwrap_or_default(),
                customer_message: body.customer_message,
            });
        }

        Err(self.classify_failure(status, response).await)
    }

    /// On-demand status query for a previous push, keyed by its checkout id.
    pub async fn query(&self, checkout_request_id: &str) -> Result<QueryOutcome, MpesaError> {
        let token = self.access_token().await?;
        let timestamp = timestamp(Utc::now());
        let password = password(&self.config.shortcode, &self.config.passkey, &timestamp);

        let request = StkQueryRequest {
            business_short_code: &self.config.shortcode,
            password,
            timestamp,
            checkout_request_id,
        };

        let url = format!("{}/mpesa/stkpushquery/v1/query", self.config.base_url());
        let response = self
            .http
            .post(&url)
            .bearer_auth(&token)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if status.is_success() {
            let body: StkQueryResponse = response.json().await?;
            return Ok(QueryOutcome {
                result_code: body.result_code.unwrap_or_else(|| "ERROR".to_string()),
                result_desc: body.result_desc.unwrap_or_default(),
            });
        }

        Err(self.classify_failure(status, response).await)
    }

    async fn classify_failure(&self, status: StatusCode, response: reqwest::Response) -> MpesaError {
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return MpesaError::Auth;
        }
        if status.is_server_error() {
            return MpesaError::Unavailable(format!("gateway returned {status}"));
        }

        match response.json::<GatewayErrorBody>().await {
            Ok(body) => MpesaError::Rejected {
                code: body.error_code.unwrap_or_else(|| "ERROR".to_string()),
                message: body
                    .error_message
                    .unwrap_or_else(|| format!("gateway returned {status}")),
            },
            Err(_) => MpesaError::Rejected {
                code: "ERROR".to_string(),
                message: format!("gateway returned {status}"),
            },
        }
    }
}

/// Gateway timestamp, UTC formatted `YYYYMMDDHHMMSS`; the push and query
/// bodies derive their password from the same string.
pub fn timestamp<Tz: chrono::TimeZone>(now: DateTime<Tz>) -> String
where
    Tz::Offset: std::fmt::Display,
{
    now.format("%Y%m%d%H%M%S").to_string()
}

/// STK password: base64 of shortcode ‖ passkey ‖ timestamp.
pub fn password(shortcode: &str, passkey: &str, timestamp: &str) -> String {
    BASE64.encode(format!("{shortcode}{passkey}{timestamp}"))
}
