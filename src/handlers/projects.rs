use crate::database::connection::DbPool;
use crate::models::project::{Project, ProjectError};
use crate::utils::helpers::ApiResponse;
use actix_web::{HttpResponse, Result, web};
use tracing::{error, info};
use uuid::Uuid;

pub async fn get_project(pool: web::Data<DbPool>, path: web::Path<Uuid>) -> Result<HttpResponse> {
    let project_id = path.into_inner();

    match Project::find_by_id(&pool, project_id).await {
        Ok(Some(project)) => Ok(HttpResponse::Ok().json(ApiResponse::success(project))),
        Ok(None) => Ok(HttpResponse::NotFound().json(ApiResponse::<()>::error(
            "Project not found".to_string(),
        ))),
        Err(e) => {
            error!("Database error getting project: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to retrieve project".to_string(),
                )),
            )
        }
    }
}

/// Projects with donations on file form an audit trail and cannot be removed.
pub async fn delete(pool: web::Data<DbPool>, path: web::Path<Uuid>) -> Result<HttpResponse> {
    let project_id = path.into_inner();
    info!("Deleting project {}", project_id);

    match Project::delete(&pool, project_id).await {
        Ok(()) => Ok(HttpResponse::Ok().json(ApiResponse::<()>::success(()))),
        Err(ProjectError::NotFound { .. }) => Ok(HttpResponse::NotFound().json(
            ApiResponse::<()>::error("Project not found".to_string()),
        )),
        Err(ProjectError::HasDonations) => Ok(HttpResponse::Conflict().json(
            ApiResponse::<()>::error(ProjectError::HasDonations.to_string()),
        )),
        Err(ProjectError::Database(e)) => {
            error!("Database error deleting project: {}", e);
            Ok(
                HttpResponse::InternalServerError().json(ApiResponse::<()>::error(
                    "Failed to delete project".to_string(),
                )),
            )
        }
    }
}
