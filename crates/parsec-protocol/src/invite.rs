//! Greeting conduit steps and invitation descriptions shared by the
//! authenticated and invited families.
//!
//! The conduit is a sequence of indexed slots: both sides submit their half
//! of slot `n` and each receives the peer's half once both are present.
//! The step-to-index mapping below is fixed; submitting a step whose index
//! does not line up with the conduit state is rejected by the server.

use serde::{Deserialize, Serialize};
use serde_bytes::ByteBuf;

use parsec_crypto::hash::HashDigest;
use parsec_crypto::x25519::X25519PublicKey;

use parsec_types::{DateTime, DeviceID, HumanHandle, InvitationStatus, InvitationToken, UserID};

/// Index of the first `communicate` slot; earlier slots hold the SAS
/// exchange.
pub const FIRST_COMMUNICATE_INDEX: u64 = 6;

/// Greeter half of a conduit slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum GreeterStep {
    WaitPeer { public_key: X25519PublicKey },
    GetHashedNonce,
    SendNonce { greeter_nonce: ByteBuf },
    GetNonce,
    WaitPeerTrust,
    SignifyTrust,
    Communicate { round: u64, payload: ByteBuf, last: bool },
}

/// Claimer half of a conduit slot.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum ClaimerStep {
    WaitPeer { public_key: X25519PublicKey },
    SendHashedNonce { hashed_nonce: HashDigest },
    GetNonce,
    SendNonce { claimer_nonce: ByteBuf },
    SignifyTrust,
    WaitPeerTrust,
    Communicate { round: u64, payload: ByteBuf, last: bool },
}

impl GreeterStep {
    /// Conduit slot this step belongs to.
    pub fn index(&self) -> u64 {
        match self {
            Self::WaitPeer { .. } => 0,
            Self::GetHashedNonce => 1,
            Self::SendNonce { .. } => 2,
            Self::GetNonce => 3,
            Self::WaitPeerTrust => 4,
            Self::SignifyTrust => 5,
            Self::Communicate { round, .. } => FIRST_COMMUNICATE_INDEX + round,
        }
    }
}

impl ClaimerStep {
    pub fn index(&self) -> u64 {
        match self {
            Self::WaitPeer { .. } => 0,
            Self::SendHashedNonce { .. } => 1,
            Self::GetNonce => 2,
            Self::SendNonce { .. } => 3,
            Self::SignifyTrust => 4,
            Self::WaitPeerTrust => 5,
            Self::Communicate { round, .. } => FIRST_COMMUNICATE_INDEX + round,
        }
    }
}

/// One entry of `invite_list`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteListItem {
    User {
        token: InvitationToken,
        created_on: DateTime,
        created_by: DeviceID,
        claimer_email: String,
        status: InvitationStatus,
    },
    Device {
        token: InvitationToken,
        created_on: DateTime,
        created_by: DeviceID,
        status: InvitationStatus,
    },
    ShamirRecovery {
        token: InvitationToken,
        created_on: DateTime,
        created_by: DeviceID,
        claimer_user_id: UserID,
        shamir_recovery_created_on: DateTime,
        status: InvitationStatus,
    },
}

impl InviteListItem {
    pub fn token(&self) -> InvitationToken {
        match self {
            Self::User { token, .. }
            | Self::Device { token, .. }
            | Self::ShamirRecovery { token, .. } => *token,
        }
    }
}

/// What the claimer learns from `invite_info`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InvitationInfo {
    User {
        claimer_email: String,
        created_by: UserID,
        administrators: Vec<UserGreeter>,
    },
    Device {
        claimer_user_id: UserID,
        claimer_human_handle: HumanHandle,
    },
    ShamirRecovery {
        claimer_user_id: UserID,
        claimer_human_handle: HumanHandle,
        threshold: u64,
        recipients: Vec<ShamirRecoveryRecipient>,
    },
}

/// An administrator able to greet a user invitation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserGreeter {
    pub user_id: UserID,
    pub human_handle: HumanHandle,
    pub online_status: bool,
}

/// A Shamir recipient, with its share weight so the claimer can tell when
/// the threshold is reachable.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShamirRecoveryRecipient {
    pub user_id: UserID,
    pub human_handle: HumanHandle,
    pub shares: u64,
    pub revoked_on: Option<DateTime>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_indexes_line_up() {
        let greeter = [
            GreeterStep::WaitPeer {
                public_key: parsec_crypto::x25519::PrivateKey::generate().public_key(),
            },
            GreeterStep::GetHashedNonce,
            GreeterStep::SendNonce {
                greeter_nonce: ByteBuf::from(vec![1]),
            },
            GreeterStep::GetNonce,
            GreeterStep::WaitPeerTrust,
            GreeterStep::SignifyTrust,
        ];
        for (i, step) in greeter.iter().enumerate() {
            assert_eq!(step.index(), i as u64);
        }
        let communicate = GreeterStep::Communicate {
            round: 1,
            payload: ByteBuf::new(),
            last: true,
        };
        assert_eq!(communicate.index(), 7);
    }

    #[test]
    fn test_step_roundtrip() {
        let step = ClaimerStep::SendNonce {
            claimer_nonce: ByteBuf::from(b"nonce".to_vec()),
        };
        let raw = rmp_serde::to_vec_named(&step).unwrap();
        let loaded: ClaimerStep = rmp_serde::from_slice(&raw).unwrap();
        assert_eq!(loaded, step);
    }
}
