//! One component per concern; each owns the operations of one protocol
//! family slice and shares the datamodel, the event bus and the server
//! configuration.

pub mod block;
pub mod invite;
pub mod organization;
pub mod realm;
pub mod sequester;
pub mod shamir;
pub mod user;
pub mod vlob;

use parsec_crypto::ed25519::VerifyKey;
use parsec_types::{DeviceID, UserID, UserProfile};

use crate::datamodel::OrganizationStore;

/// Author of an authenticated request, resolved against the store.
pub(crate) struct Author {
    pub device_id: DeviceID,
    pub user_id: UserID,
    pub profile: UserProfile,
    pub verify_key: VerifyKey,
}

#[derive(Debug, thiserror::Error)]
pub(crate) enum ResolveAuthorError {
    #[error("unknown device")]
    DeviceNotFound,
    #[error("author user is revoked")]
    UserRevoked,
}

/// Look up the author device and its owning user, rejecting revoked users.
///
/// Freezing, TOS and client-agent checks happen before dispatch; revocation
/// is re-checked here because it can race with the pre-check.
pub(crate) fn resolve_author(
    store: &OrganizationStore,
    device_id: DeviceID,
) -> Result<Author, ResolveAuthorError> {
    let device = store
        .devices
        .get(&device_id)
        .ok_or(ResolveAuthorError::DeviceNotFound)?;
    let user_id = device.cooked.user_id;
    let user = store
        .users
        .get(&user_id)
        .ok_or(ResolveAuthorError::DeviceNotFound)?;
    if user.is_revoked() {
        return Err(ResolveAuthorError::UserRevoked);
    }
    Ok(Author {
        device_id,
        user_id,
        profile: user.current_profile(),
        verify_key: device.cooked.verify_key.clone(),
    })
}
