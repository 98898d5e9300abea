//! # bn-api
//!
//! HTTP intake for the detector: platform events forwarded by the relay and
//! the administrative operations.

pub mod error;
pub mod handlers;
pub mod middleware;

use actix_web::web;

pub use handlers::AppState;

/// Configures every route. `/health` is open; everything else requires the
/// intake token.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health))
        .route("/events", web::post().to(handlers::post_event))
        .service(
            web::scope("/guilds/{guild}")
                .route("/config", web::get().to(handlers::get_config))
                .route("/config", web::patch().to(handlers::patch_config))
                .route("/protected", web::get().to(handlers::list_protected))
                .route("/protected/{user}", web::put().to(handlers::protect))
                .route("/protected/{user}", web::delete().to(handlers::unprotect))
                .route("/test", web::get().to(handlers::test_all))
                .route("/test", web::post().to(handlers::test_custom))
                .route("/test/{user}", web::get().to(handlers::test_member)),
        );
}
