//! The authenticated caller, as handed over by the session layer

pub const SYSTEM_USER_ID: &str = "system";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub user_id: String,
    pub tenant_id: String,
    pub roles: Vec<String>,
}

impl Principal {
    pub fn new(user_id: &str, tenant_id: &str, roles: &[&str]) -> Self {
        Self {
            user_id: user_id.to_string(),
            tenant_id: tenant_id.to_string(),
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    /// Actor used by the sweeper. Bypasses approver role checks.
    pub fn system(tenant_id: &str) -> Self {
        Self::new(SYSTEM_USER_ID, tenant_id, &[])
    }

    pub fn is_system(&self) -> bool {
        self.user_id == SYSTEM_USER_ID
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }
}
