use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::HeaderMap;
use uuid::Uuid;

use crate::models::Role;
use crate::utils::error::AppError;

/// Set by the authenticating proxy in front of this service.
pub const PROFILE_ID_HEADER: &str = "x-profile-id";
pub const PROFILE_ROLE_HEADER: &str = "x-profile-role";

/// Who is making the request. Requests without profile headers are anonymous
/// students.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Session {
    pub profile_id: Option<Uuid>,
    pub role: Role,
}

impl Session {
    pub fn anonymous() -> Self {
        Self {
            profile_id: None,
            role: Role::Student,
        }
    }

    pub fn admin(profile_id: Uuid) -> Self {
        Self {
            profile_id: Some(profile_id),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The admin's profile id, or `Forbidden`.
    pub fn require_admin(&self) -> Result<Uuid, AppError> {
        match self.profile_id {
            Some(id) if self.is_admin() => Ok(id),
            _ => Err(AppError::Forbidden(
                "Administrator privileges are required".to_string(),
            )),
        }
    }

    pub fn from_headers(headers: &HeaderMap) -> Result<Self, AppError> {
        let profile_id = header_str(headers, PROFILE_ID_HEADER)?
            .map(|raw| {
                Uuid::parse_str(raw.trim()).map_err(|_| {
                    AppError::AuthError(format!("Malformed {PROFILE_ID_HEADER} header"))
                })
            })
            .transpose()?;

        let role = match header_str(headers, PROFILE_ROLE_HEADER)? {
            Some(raw) => raw.parse().map_err(AppError::AuthError)?,
            None => Role::Student,
        };

        if role == Role::Admin && profile_id.is_none() {
            return Err(AppError::AuthError(
                "Admin sessions must carry a profile id".to_string(),
            ));
        }

        Ok(Self { profile_id, role })
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Result<Option<&'a str>, AppError> {
    headers
        .get(name)
        .map(|value| {
            value
                .to_str()
                .map_err(|_| AppError::AuthError(format!("Malformed {name} header")))
        })
        .transpose()
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Session::from_headers(&parts.headers)
    }
}
