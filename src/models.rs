use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: u64,
    pub sub: String,
    pub role: u8, // role id
    pub exp: usize,
    pub jti: String,

    pub token_type: TokenType,
    /// School (tenant) the caller acts for
    pub tenant_id: u64,
    /// Home branch; absent for tenant-wide accounts
    pub branch_id: Option<u64>,
    /// Present only if this user is linked to a staff record
    pub staff_id: Option<u64>,
}

/// Both kinds come from the identity service; only access tokens open
/// the API scope.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum TokenType {
    Access,
    Refresh,
}
