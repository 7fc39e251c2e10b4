use crate::config::AppConfig;
use crate::database::connection::DbPool;
use crate::models::donation::{CreateDonation, Donation, DonationError};
use crate::models::project::Project;
use crate::requests::donation::DonationRequest;
use crate::utils::helpers::ApiResponse;
use crate::utils::phone::normalize_phone;
use actix_web::{HttpResponse, Result, web};
use tracing::{error, info};

/// Creates a PENDING donation and hands back the transaction id and receipt
/// number the client needs to start the push.
pub async fn create(
    pool: web::Data<DbPool>,
    config: web::Data<AppConfig>,
    request: web::Json<DonationRequest>,
) -> Result<HttpResponse> {
    info!("Creating donation for project {}", request.project_id);

    if request.amount < config.min_donation_amount {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
            "Minimum donation is {} {}",
            config.default_currency, config.min_donation_amount
        ))));
    }
    if request.amount > config.max_donation_amount {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(format!(
            "Maximum donation is {} {}",
            config.default_currency, config.max_donation_amount
        ))));
    }

    if let Some(phone) = &request.donor_phone {
        if let Err(e) = normalize_phone(phone) {
            return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())));
        }
    }

    let project = match Project::find_by_id(&pool, request.project_id).await {
        Ok(Some(project)) => project,
        Ok(None) => {
            return Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
                "Project not found".to_string(),
            )));
        }
        Err(e) => {
            error!("Database error loading project: {}", e);
            return Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to load project".to_string(),
                )),
            );
        }
    };

    if !project.is_accepting_donations() {
        return Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(
            "Project is not accepting donations".to_string(),
        )));
    }

    let create_donation = CreateDonation {
        project_id: request.project_id,
        amount: request.amount,
        currency: request
            .currency
            .clone()
            .unwrap_or_else(|| config.default_currency.clone()),
        donor_name: request.donor_name.clone(),
        donor_email: request.donor_email.clone(),
        message: request.message.clone(),
        anonymous: request.anonymous,
        payment_method: request
            .payment_method
            .clone()
            .unwrap_or_else(|| "MPESA".to_string()),
    };

    match Donation::create(&pool, create_donation).await {
        Ok(donation) => {
            info!(
                "Created donation {} ({})",
                donation.transaction_id, donation.receipt_number
            );
            Ok(HttpResponse::Created().json(ApiResponse::success_with_message(
                donation,
                "Donation record created successfully. Proceed with payment.".to_string(),
            )))
        }
        Err(DonationError::Database(e)) => {
            error!("Database error creating donation: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to create donation".to_string(),
                )),
            )
        }
        Err(e) => {
            error!("Error creating donation: {}", e);
            Ok(HttpResponse::BadRequest().json(ApiResponse::<()>::error(e.to_string())))
        }
    }
}
