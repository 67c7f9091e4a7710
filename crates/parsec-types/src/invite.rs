//! Invitation and greeting vocabulary shared between the server state and
//! the protocol surface.

use serde::{Deserialize, Serialize};

/// What kind of enrollment an invitation opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationType {
    /// Enroll a brand new user (claimer identified by email).
    #[serde(rename = "USER")]
    User,
    /// Enroll an additional device for the author's own user.
    #[serde(rename = "DEVICE")]
    Device,
    /// Let a user recover its account through its Shamir recipients.
    #[serde(rename = "SHAMIR_RECOVERY")]
    ShamirRecovery,
}

/// Lifecycle state of an invitation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum InvitationStatus {
    /// Created, nobody connected on the invited side yet.
    #[serde(rename = "IDLE")]
    Idle,
    /// The claimer is connected and greeting can proceed.
    #[serde(rename = "READY")]
    Ready,
    /// Cancelled by a greeter or administrator.
    #[serde(rename = "CANCELLED")]
    Cancelled,
    /// Enrollment completed, the token is spent.
    #[serde(rename = "FINISHED")]
    Finished,
}

/// Which side of the greeting conduit is speaking.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GreeterOrClaimer {
    #[serde(rename = "GREETER")]
    Greeter,
    #[serde(rename = "CLAIMER")]
    Claimer,
}

/// Why a greeting attempt was cancelled.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum CancelledGreetingAttemptReason {
    #[serde(rename = "MANUALLY_CANCELLED")]
    ManuallyCancelled,
    #[serde(rename = "INVALID_NONCE_HASH")]
    InvalidNonceHash,
    #[serde(rename = "INVALID_SAS_CODE")]
    InvalidSasCode,
    #[serde(rename = "UNDECIPHERABLE_PAYLOAD")]
    UndecipherablePayload,
    #[serde(rename = "UNDESERIALIZABLE_PAYLOAD")]
    UndeserializablePayload,
    #[serde(rename = "INCONSISTENT_PAYLOAD")]
    InconsistentPayload,
    /// The same side joined again, superseding the attempt.
    #[serde(rename = "AUTOMATICALLY_CANCELLED")]
    AutomaticallyCancelled,
}
