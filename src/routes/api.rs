use actix_web::web;

use crate::handlers;

pub fn scoped_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/donations")
            .service(web::resource("").route(web::post().to(handlers::donations::create))),
    )
    .service(
        web::scope("/payments")
            .service(
                web::resource("/mpesa/stkpush")
                    .route(web::post().to(handlers::payments::initiate)),
            )
            .service(
                web::resource("/mpesa/callback")
                    .route(web::post().to(handlers::payments::callback))
                    .route(web::get().to(handlers::payments::timeout_callback)),
            )
            .service(
                web::resource("/mpesa/timeout")
                    .route(web::post().to(handlers::payments::timeout_callback)),
            )
            .service(
                web::resource("/status/{transaction_id}")
                    .route(web::get().to(handlers::payments::status)),
            ),
    )
    .service(
        web::scope("/projects").service(
            web::resource("/{id}")
                .route(web::get().to(handlers::projects::get_project))
                .route(web::delete().to(handlers::projects::delete)),
        ),
    );
}
