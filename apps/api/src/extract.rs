//! Request extractors.

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::principal::{Principal, Role};

pub const PRINCIPAL_ID_HEADER: &str = "x-principal-id";
pub const PRINCIPAL_ROLE_HEADER: &str = "x-principal-role";

fn header<'a>(parts: &'a Parts, name: &str) -> Result<&'a str, AppError> {
    parts
        .headers
        .get(name)
        .ok_or_else(|| AppError::Unauthorized(format!("missing {name} header")))?
        .to_str()
        .map_err(|_| AppError::Unauthorized(format!("{name} header is not valid text")))
}

/// Caller identity asserted by the authenticating gateway.
#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = header(parts, PRINCIPAL_ID_HEADER)?
            .parse::<Uuid>()
            .map_err(|_| AppError::Unauthorized(format!("{PRINCIPAL_ID_HEADER} is not a UUID")))?;
        let role = header(parts, PRINCIPAL_ROLE_HEADER)?
            .parse::<Role>()
            .map_err(AppError::Unauthorized)?;
        Ok(Principal { id, role })
    }
}
