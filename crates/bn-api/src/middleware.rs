//! banna/crates/bn-api/src/middleware.rs
//!
//! Request logging and intake authentication.

use std::future::{ready, Ready};

use actix_web::dev::Payload;
use actix_web::middleware::Logger;
use actix_web::{error, web, FromRequest, HttpRequest};
use secrecy::{ExposeSecret, SecretString};
use subtle::ConstantTimeEq;
use tracing::warn;

use crate::handlers::AppState;

pub const TOKEN_HEADER: &str = "X-Banna-Token";

// remote-ip "request-line" status-code response-size "referrer" "user-agent"
pub fn standard_middleware() -> Logger {
    Logger::default()
}

/// Constant-time comparison of the presented token against the secret.
fn token_matches(presented: &str, expected: &SecretString) -> bool {
    presented.as_bytes().ct_eq(expected.expose_secret().as_bytes()).into()
}

/// Extractor that admits a request only when it carries the intake token.
pub struct Authorized;

impl FromRequest for Authorized {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        let Some(state) = req.app_data::<web::Data<AppState>>() else {
            return ready(Err(error::ErrorInternalServerError("intake state missing")));
        };
        let presented = req.headers().get(TOKEN_HEADER).and_then(|v| v.to_str().ok());

        ready(match presented {
            Some(token) if token_matches(token, &state.token) => Ok(Authorized),
            _ => {
                warn!(path = req.path(), "rejected intake request without valid token");
                Err(error::ErrorUnauthorized("missing or invalid intake token"))
            }
        })
    }
}
