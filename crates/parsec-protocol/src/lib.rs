//! # parsec-protocol
//!
//! Wire-level command envelopes. Each API family (`authenticated_cmds`,
//! `invited_cmds`, `anonymous_cmds`, `tos_cmds`) exposes a tagged request
//! enum plus one typed `Rep` enum per command, all MessagePack encoded.
//!
//! Requests carry a `cmd` tag, replies a `status` tag. A request whose tag
//! matches no known command decodes to the family's `UnknownCommand`
//! variant so the server can answer with a proper status instead of a
//! framing error.

pub mod anonymous;
pub mod authenticated;
pub mod invite;
pub mod invited;
pub mod tos;

use serde::de::DeserializeOwned;
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message")]
    Decode,
    #[error("message serialization failed")]
    Encode,
}

pub(crate) fn dump<T: Serialize>(obj: &T) -> Result<Vec<u8>, ProtocolError> {
    rmp_serde::to_vec_named(obj).map_err(|_| ProtocolError::Encode)
}

pub(crate) fn load<T: DeserializeOwned>(raw: &[u8]) -> Result<T, ProtocolError> {
    rmp_serde::from_slice(raw).map_err(|_| ProtocolError::Decode)
}

/// Generates `load`/`dump` on a wire type.
macro_rules! impl_wire_format {
    ($name:ty) => {
        impl $name {
            pub fn load(raw: &[u8]) -> Result<Self, $crate::ProtocolError> {
                $crate::load(raw)
            }

            pub fn dump(&self) -> Result<Vec<u8>, $crate::ProtocolError> {
                $crate::dump(self)
            }
        }
    };
}
pub(crate) use impl_wire_format;

/// Version negotiated during the HTTP handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct ApiVersion {
    pub version: u32,
    pub revision: u32,
}

impl ApiVersion {
    /// Same major version means compatible; revision only adds commands.
    pub fn is_compatible_with(&self, other: &ApiVersion) -> bool {
        self.version == other.version
    }
}

impl std::fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.version, self.revision)
    }
}

/// The version this crate speaks.
pub const API_VERSION: ApiVersion = ApiVersion {
    version: 5,
    revision: 0,
};

/// HTTP status codes used to reject a request before its command handler
/// runs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EarlyRejection {
    /// Invalid or missing authentication.
    InvalidAuthentication,
    /// Unknown organization.
    OrganizationNotFound,
    /// Invitation already used or deleted.
    InvitationAlreadyUsedOrDeleted,
    /// Malformed body.
    MalformedBody,
    /// Organization expired.
    OrganizationExpired,
    /// Author revoked.
    AuthorRevoked,
    /// Author frozen.
    AuthorFrozen,
    /// TOS not accepted or outdated.
    TosNotAccepted,
    /// Client agent not allowed by organization configuration.
    ClientAgentNotAllowed,
}

impl EarlyRejection {
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidAuthentication => 403,
            Self::OrganizationNotFound => 404,
            Self::InvitationAlreadyUsedOrDeleted => 410,
            Self::MalformedBody => 422,
            Self::OrganizationExpired => 460,
            Self::AuthorRevoked => 461,
            Self::AuthorFrozen => 462,
            Self::TosNotAccepted => 463,
            Self::ClientAgentNotAllowed => 464,
        }
    }
}
