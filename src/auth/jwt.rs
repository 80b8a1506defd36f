use crate::models::Claims;
use jsonwebtoken::{DecodingKey, Validation, decode};

/// Tokens are issued by the identity service; this side only checks the
/// signature and expiry against the shared secret.
pub fn verify_token(token: &str, secret: &str) -> Result<Claims, String> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TokenType;
    use jsonwebtoken::{EncodingKey, Header, encode};

    fn sign(exp: usize, secret: &str) -> String {
        let claims = Claims {
            user_id: 7,
            sub: "coordinator".into(),
            role: 2,
            exp,
            jti: uuid::Uuid::new_v4().to_string(),
            token_type: TokenType::Access,
            tenant_id: 1,
            branch_id: Some(3),
            staff_id: None,
        };
        encode(&Header::default(), &claims, &EncodingKey::from_secret(secret.as_bytes())).unwrap()
    }

    fn in_ten_minutes() -> usize {
        chrono::Utc::now().timestamp() as usize + 600
    }

    #[test]
    fn signed_token_verifies_with_same_secret() {
        let claims = verify_token(&sign(in_ten_minutes(), "secret"), "secret").unwrap();
        assert_eq!(claims.user_id, 7);
        assert_eq!(claims.tenant_id, 1);
        assert_eq!(claims.branch_id, Some(3));
        assert_eq!(claims.token_type, TokenType::Access);
    }

    #[test]
    fn wrong_secret_is_rejected() {
        assert!(verify_token(&sign(in_ten_minutes(), "secret"), "other").is_err());
    }

    #[test]
    fn expired_token_is_rejected() {
        let an_hour_ago = chrono::Utc::now().timestamp() as usize - 3600;
        assert!(verify_token(&sign(an_hour_ago, "secret"), "secret").is_err());
    }
}
