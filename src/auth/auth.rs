use crate::config::Config;
use crate::errors::{AppError, AppResult};
use crate::{model::role::Role, models::Claims};
use actix_web::{FromRequest, HttpMessage, HttpRequest, dev::Payload, web::Data};
use futures::future::{Ready, ready};

use crate::auth::jwt::verify_token;

#[derive(Debug, Clone)]
pub struct AuthUser {
    pub user_id: u64,
    pub username: String,
    pub role: Role,
    pub tenant_id: u64,
    /// Home branch; `None` for tenant-wide accounts
    pub branch_id: Option<u64>,

    /// Present only if this user is linked to a staff record
    pub staff_id: Option<u64>,
}

impl AuthUser {
    pub fn from_claims(claims: Claims) -> AppResult<Self> {
        let role = Role::from_id(claims.role)
            .ok_or_else(|| AppError::Unauthorized("Invalid role".to_string()))?;

        Ok(AuthUser {
            user_id: claims.user_id,
            username: claims.sub,
            role,
            tenant_id: claims.tenant_id,
            branch_id: claims.branch_id,
            staff_id: claims.staff_id,
        })
    }

    /// Pick the branch an operation applies to: the requested one, or the
    /// caller's home branch. Branch-bound callers cannot reach other branches.
    pub fn resolve_branch(&self, requested: Option<u64>) -> AppResult<u64> {
        match (requested, self.branch_id) {
            (Some(requested), Some(home)) if requested != home && !self.role.spans_branches() => {
                Err(AppError::PermissionDenied {
                    reason: format!("branch {} is outside the caller's branch", requested),
                })
            }
            (Some(requested), _) => Ok(requested),
            (None, Some(home)) => Ok(home),
            (None, None) => Err(AppError::validation("branch_id", "is required")),
        }
    }

    /// Whether the caller may see data of the given branch.
    pub fn can_access_branch(&self, branch_id: u64) -> bool {
        self.role.spans_branches() || self.branch_id.map_or(true, |home| home == branch_id)
    }
}

impl FromRequest for AuthUser {
    type Error = actix_web::Error;
    type Future = Ready<Result<Self, Self::Error>>;

    fn from_request(req: &HttpRequest, _: &mut Payload) -> Self::Future {
        // set by auth_middleware on protected scopes
        if let Some(user) = req.extensions().get::<AuthUser>() {
            return ready(Ok(user.clone()));
        }

        let token = match req
            .headers()
            .get("Authorization")
            .and_then(|h| h.to_str().ok())
            .and_then(|h| h.strip_prefix("Bearer "))
        {
            Some(t) => t,
            None => return ready(Err(AppError::Unauthorized("Missing token".into()).into())),
        };

        let config = match req.app_data::<Data<Config>>() {
            Some(c) => c,
            None => return ready(Err(AppError::Internal("Config missing".into()).into())),
        };

        let result = verify_token(token, &config.jwt_secret)
            .map_err(|_| AppError::Unauthorized("Invalid token".into()))
            .and_then(AuthUser::from_claims)
            .map_err(actix_web::Error::from);

        ready(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(role: Role, branch_id: Option<u64>) -> AuthUser {
        AuthUser {
            user_id: 1,
            username: "u".into(),
            role,
            tenant_id: 1,
            branch_id,
            staff_id: None,
        }
    }

    #[test]
    fn branch_bound_callers_stay_in_their_branch() {
        let teacher = user(Role::Teacher, Some(3));
        assert_eq!(teacher.resolve_branch(None).unwrap(), 3);
        assert_eq!(teacher.resolve_branch(Some(3)).unwrap(), 3);
        assert!(matches!(
            teacher.resolve_branch(Some(4)),
            Err(AppError::PermissionDenied { .. })
        ));
        assert!(!teacher.can_access_branch(4));
    }

    #[test]
    fn admins_span_branches() {
        let admin = user(Role::Admin, Some(3));
        assert_eq!(admin.resolve_branch(Some(4)).unwrap(), 4);
        assert!(admin.can_access_branch(9));
    }

    #[test]
    fn tenant_wide_accounts_must_name_a_branch() {
        let coordinator = user(Role::Coordinator, None);
        assert!(matches!(
            coordinator.resolve_branch(None),
            Err(AppError::Validation { .. })
        ));
        assert_eq!(coordinator.resolve_branch(Some(8)).unwrap(), 8);
    }
}
