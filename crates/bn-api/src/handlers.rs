//! # bn-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the engine.

use std::sync::Arc;

use actix_web::{web, HttpResponse};
use bn_core::{ConfigPatch, GuildId, UserId};
use bn_engine::{CustomMember, EventDispatcher, InboundEvent, LifecycleState};
use secrecy::SecretString;
use serde_json::json;
use tracing::{error, info};

use crate::error::ApiError;
use crate::middleware::Authorized;

/// State shared across all Actix-web workers.
pub struct AppState {
    pub dispatcher: Arc<EventDispatcher>,
    pub token: SecretString,
}

type ApiResult = Result<HttpResponse, ApiError>;

pub async fn health(data: web::Data<AppState>) -> HttpResponse {
    let state = data.dispatcher.state();
    let body = json!({ "state": state });
    match state {
        LifecycleState::Ready => HttpResponse::Ok().json(body),
        LifecycleState::Initializing => HttpResponse::ServiceUnavailable().json(body),
    }
}

/// Accepts a platform event and processes it in the background.
pub async fn post_event(
    _auth: Authorized,
    data: web::Data<AppState>,
    event: web::Json<InboundEvent>,
) -> HttpResponse {
    if !data.dispatcher.accepts() {
        return HttpResponse::ServiceUnavailable().json(json!({ "state": LifecycleState::Initializing }));
    }

    let event = event.into_inner();
    let name = event.name();
    let dispatcher = data.dispatcher.clone();
    actix_web::rt::spawn(async move {
        if let Err(err) = dispatcher.dispatch(event).await {
            error!(event = name, error = %err, "failed to handle event");
        }
    });
    HttpResponse::Accepted().finish()
}

pub async fn get_config(_auth: Authorized, data: web::Data<AppState>, path: web::Path<GuildId>) -> ApiResult {
    let config = data.dispatcher.engine().config(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(config))
}

/// Partial update; a change that can implicate new members triggers a sweep.
pub async fn patch_config(
    _auth: Authorized,
    data: web::Data<AppState>,
    path: web::Path<GuildId>,
    patch: web::Json<ConfigPatch>,
) -> ApiResult {
    let guild_id = path.into_inner();
    if patch.is_empty() {
        return Ok(HttpResponse::BadRequest().json(json!({ "error": "empty configuration patch" })));
    }

    let engine = data.dispatcher.engine().clone();
    let update = engine.update_config(guild_id, &patch).await?;
    if update.resweep {
        info!(%guild_id, "configuration change requires a sweep");
        actix_web::rt::spawn(async move {
            if let Err(err) = engine.sweep(guild_id).await {
                error!(%guild_id, error = %err, "sweep after configuration change failed");
            }
        });
    }
    Ok(HttpResponse::Ok().json(json!({ "config": update.config, "resweep": update.resweep })))
}

pub async fn list_protected(_auth: Authorized, data: web::Data<AppState>, path: web::Path<GuildId>) -> ApiResult {
    let users = data.dispatcher.engine().protected_users(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(users.as_slice()))
}

pub async fn protect(
    _auth: Authorized,
    data: web::Data<AppState>,
    path: web::Path<(GuildId, UserId)>,
) -> ApiResult {
    let (guild_id, user_id) = path.into_inner();
    let changed = data.dispatcher.engine().protect(guild_id, user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "changed": changed })))
}

pub async fn unprotect(
    _auth: Authorized,
    data: web::Data<AppState>,
    path: web::Path<(GuildId, UserId)>,
) -> ApiResult {
    let (guild_id, user_id) = path.into_inner();
    let changed = data.dispatcher.engine().unprotect(guild_id, user_id).await?;
    Ok(HttpResponse::Ok().json(json!({ "changed": changed })))
}

pub async fn test_member(
    _auth: Authorized,
    data: web::Data<AppState>,
    path: web::Path<(GuildId, UserId)>,
) -> ApiResult {
    let (guild_id, user_id) = path.into_inner();
    let report = data.dispatcher.engine().test_member(guild_id, user_id).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn test_custom(
    _auth: Authorized,
    data: web::Data<AppState>,
    path: web::Path<GuildId>,
    custom: web::Json<CustomMember>,
) -> ApiResult {
    let report = data.dispatcher.engine().test_custom(path.into_inner(), &custom).await?;
    Ok(HttpResponse::Ok().json(report))
}

pub async fn test_all(_auth: Authorized, data: web::Data<AppState>, path: web::Path<GuildId>) -> ApiResult {
    let scan = data.dispatcher.engine().test_all(path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(scan))
}
