pub mod jwt;
pub mod middleware;

use thiserror::Error;

use crate::db::{self, models::UserProfile, DbPool};
use crate::error::CoreError;

/// Why a credential was refused. Drives the WebSocket close code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    Missing,
    Expired,
    Invalid,
    InactiveAccount,
}

impl RejectReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Missing => "Token missing",
            Self::Expired => "Token expired",
            Self::Invalid => "Token invalid",
            Self::InactiveAccount => "Account not active",
        }
    }
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{}", .0.as_str())]
    Rejected(RejectReason),
    /// The identity lookup itself failed.
    #[error(transparent)]
    Lookup(#[from] CoreError),
}

impl From<AuthError> for CoreError {
    fn from(err: AuthError) -> Self {
        match err {
            AuthError::Rejected(reason) => CoreError::Unauthenticated(reason.as_str().to_string()),
            AuthError::Lookup(inner) => inner,
        }
    }
}

/// Resolve a credential token to an active account.
///
/// Rejects tokens that are missing, malformed, expired or that name no
/// active account.
pub async fn authenticate(
    db: &DbPool,
    jwt_secret: &[u8],
    token: Option<&str>,
) -> Result<UserProfile, AuthError> {
    let token = token
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .ok_or(AuthError::Rejected(RejectReason::Missing))?;

    let claims = jwt::validate_access_token(jwt_secret, token).map_err(|err| match err.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => {
            AuthError::Rejected(RejectReason::Expired)
        }
        _ => AuthError::Rejected(RejectReason::Invalid),
    })?;

    let user_id = claims.sub;
    let profile = db::with_conn(db, move |conn| {
        Ok(db::users::find_active_user(conn, &user_id)?)
    })
    .await?;

    profile.ok_or(AuthError::Rejected(RejectReason::InactiveAccount))
}
