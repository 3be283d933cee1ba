use super::domain::UserId;

/// Account system holding login identities for program participants.
pub trait IdentityProvider: Send + Sync {
    fn delete_identity(&self, user_id: &UserId) -> Result<(), IdentityError>;
}

#[derive(Debug, thiserror::Error)]
pub enum IdentityError {
    #[error("identity {0} not found")]
    NotFound(UserId),
    #[error("identity provider unavailable: {0}")]
    Unavailable(String),
}
