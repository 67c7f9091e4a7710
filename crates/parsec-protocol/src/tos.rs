//! `tos_cmds`: the only commands a device may issue while its terms of
//! service acceptance is missing or outdated.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use parsec_types::DateTime;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AnyCmdReq {
    TosGet(tos_get::Req),
    TosAccept(tos_accept::Req),
    #[serde(other)]
    UnknownCommand,
}

crate::impl_wire_format!(AnyCmdReq);

pub mod tos_get {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {}

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            updated_on: DateTime,
            /// Locale to URL.
            per_locale_urls: HashMap<String, String>,
        },
        NoTos,
        UnknownCommand,
    }

    crate::impl_wire_format!(Rep);
}

pub mod tos_accept {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        /// Must match the organization's current `tos_updated_on`,
        /// proving the client saw the latest terms.
        pub tos_updated_on: DateTime,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        NoTos,
        TosMismatch,
    }

    crate::impl_wire_format!(Rep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_roundtrip() {
        let req = AnyCmdReq::TosAccept(tos_accept::Req {
            tos_updated_on: DateTime::from_rfc3339("2024-05-01T00:00:00Z").unwrap(),
        });
        let raw = req.dump().unwrap();
        assert_eq!(AnyCmdReq::load(&raw).unwrap(), req);
    }
}
