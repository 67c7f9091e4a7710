//! # parsec-types
//!
//! Shared domain types for the Parsec server core: identifiers, timestamps,
//! profiles and roles, human handles, invitation vocabulary and the signed
//! certificate family.

pub mod certif;
pub mod id;
pub mod identity;
pub mod invite;
pub mod realm;
pub mod time;

pub use certif::{
    CertificateSigner, DataError, DataResult, DeviceCertificate, RealmKeyRotationCertificate,
    RealmNameCertificate, RealmRoleCertificate, RevokedUserCertificate,
    SequesterAuthorityCertificate, SequesterRevokedServiceCertificate, SequesterServiceCertificate,
    ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate,
    ShamirRecoveryShareCertificate, UserCertificate, UserUpdateCertificate,
};
pub use id::{
    BlockID, BootstrapToken, DeviceID, GreetingAttemptID, InvitationToken, OrganizationID,
    SequesterServiceID, UserID, VlobID,
};
pub use identity::{DeviceLabel, HumanHandle, MaybeRedacted, UserProfile};
pub use invite::{
    CancelledGreetingAttemptReason, GreeterOrClaimer, InvitationStatus, InvitationType,
};
pub use realm::{ActiveUsersLimit, HashAlgorithm, RealmRole, SecretKeyAlgorithm};
pub use time::DateTime;
