//! Current-user identity

/// User id reported by identity providers that have no signed-in user
pub const ANONYMOUS_USER: &str = "anonymous";

/// Supplies the signed-in user, if any
pub trait IdentityProvider: Send + Sync {
    fn current_user_id(&self) -> Option<String>;
}

/// Identity fixed for the lifetime of the process
#[derive(Debug, Clone, Default)]
pub struct StaticIdentity {
    user_id: Option<String>,
}

impl StaticIdentity {
    /// Empty ids and the anonymous placeholder both mean "no user".
    pub fn new(user_id: Option<String>) -> Self {
        let user_id = user_id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty() && id != ANONYMOUS_USER);
        Self { user_id }
    }
}

impl IdentityProvider for StaticIdentity {
    fn current_user_id(&self) -> Option<String> {
        self.user_id.clone()
    }
}
