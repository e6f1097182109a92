use std::future::{ready, Ready};

use actix_web::http::header::AUTHORIZATION;
use actix_web::{dev::Payload, web, FromRequest, HttpRequest};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::Deserialize;

use crate::app_config::AppConfig;
use crate::entities::UserId;
use crate::error::DriveError;

/// Claims of the externally-issued session token. Only the subject is
/// consumed here; issuing and refreshing belong to the auth subsystem.
#[derive(Debug, Deserialize)]
struct SessionClaims {
    sub: String,
    #[allow(dead_code)]
    exp: i64,
}

/// The authenticated caller, extracted from `Authorization: Bearer`.
///
/// This is the boundary to the external auth subsystem: everything past an
/// extractor argument of this type may assume the owner id is genuine.
pub struct AuthedUser(pub UserId);

impl FromRequest for AuthedUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _payload: &mut Payload) -> Self::Future {
        ready(extract(req).map_err(actix_web::Error::from))
    }
}

fn extract(req: &HttpRequest) -> Result<AuthedUser, DriveError> {
    let config = req
        .app_data::<web::Data<AppConfig>>()
        .ok_or_else(|| DriveError::Internal(anyhow::anyhow!("app config not mounted")))?;

    let token = bearer_token(req).ok_or(DriveError::Unauthorized)?;

    let mut validation = Validation::new(Algorithm::HS256);
    validation.set_required_spec_claims(&["exp"]);

    let data = jsonwebtoken::decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(&config.session_token_key),
        &validation,
    )
    .map_err(|_| DriveError::Unauthorized)?;

    Ok(AuthedUser(UserId::from(data.claims.sub)))
}

pub(crate) fn bearer_token(req: &HttpRequest) -> Option<&str> {
    req.headers()
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}
