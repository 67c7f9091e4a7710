//! `anonymous_cmds`: commands available before any authentication, most
//! notably organization bootstrap.

use serde::{Deserialize, Serialize};

use parsec_types::DateTime;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AnyCmdReq {
    Ping(ping::Req),
    OrganizationBootstrap(organization_bootstrap::Req),
    #[serde(other)]
    UnknownCommand,
}

crate::impl_wire_format!(AnyCmdReq);

pub mod ping {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub ping: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { pong: String },
        UnknownCommand,
    }

    crate::impl_wire_format!(Rep);
}

pub mod organization_bootstrap {
    use super::*;
    use parsec_crypto::ed25519::VerifyKey;
    use parsec_types::BootstrapToken;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        /// Absent for spontaneously-bootstrapped organizations.
        pub bootstrap_token: Option<BootstrapToken>,
        pub root_verify_key: VerifyKey,
        pub user_certificate: ByteBuf,
        pub device_certificate: ByteBuf,
        pub redacted_user_certificate: ByteBuf,
        pub redacted_device_certificate: ByteBuf,
        pub sequester_authority_certificate: Option<ByteBuf>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        InvalidBootstrapToken,
        AlreadyBootstrapped,
        InvalidCertificate,
        OrganizationExpired,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
    }

    crate::impl_wire_format!(Rep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rep_roundtrip() {
        let rep = organization_bootstrap::Rep::AlreadyBootstrapped;
        let raw = rep.dump().unwrap();
        assert_eq!(organization_bootstrap::Rep::load(&raw).unwrap(), rep);
    }
}
