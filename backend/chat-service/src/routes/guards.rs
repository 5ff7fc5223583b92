//! Authorization guards for the privileged REST surface.
//!
//! End-user tokens may manage their own devices; pushing notifications,
//! rewriting topic subscriptions, and evicting members are reserved for
//! service/operator identities, with eviction also open to the
//! conversation's own owners and admins.

use uuid::Uuid;

use crate::auth::AuthIdentity;
use crate::error::{AppError, AppResult};
use crate::storage::MembershipStore;

/// Only platform services and operators pass.
pub fn require_service(identity: &AuthIdentity) -> AppResult<()> {
    if identity.is_service() {
        Ok(())
    } else {
        Err(AppError::Forbidden)
    }
}

/// Service identities pass; end users pass only with a privileged role in
/// the conversation itself.
pub async fn require_conversation_privilege(
    membership: &dyn MembershipStore,
    identity: &AuthIdentity,
    conversation_id: Uuid,
) -> AppResult<()> {
    if identity.is_service() {
        return Ok(());
    }
    if membership
        .is_privileged(conversation_id, identity.user_id)
        .await?
    {
        return Ok(());
    }
    Err(AppError::Forbidden)
}
