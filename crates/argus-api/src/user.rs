//! Caller identity, threaded explicitly into every operation.

/// User role, ordered by privilege.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Role {
    User = 1,
    Admin = 2,
    SuperAdmin = 3,
}

/// The authenticated caller. Resolved by the enclosing dispatch layer;
/// services never consult ambient state for identity.
#[derive(Debug, Clone)]
pub struct ApiUser {
    pub userid: i64,
    pub username: String,
    pub role: Role,
    /// User-group memberships, used by row-level permission checks.
    pub usrgrpids: Vec<i64>,
}

impl ApiUser {
    pub fn new(userid: i64, username: impl Into<String>, role: Role, usrgrpids: Vec<i64>) -> Self {
        Self {
            userid,
            username: username.into(),
            role,
            usrgrpids,
        }
    }

    pub fn is_super_admin(&self) -> bool {
        self.role == Role::SuperAdmin
    }
}
