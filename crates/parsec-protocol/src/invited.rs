//! `invited_cmds`: commands issued by a claimer holding an invitation
//! token, before it owns any device.

use serde::{Deserialize, Serialize};

use parsec_types::DateTime;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AnyCmdReq {
    Ping(ping::Req),
    InviteInfo(invite_info::Req),
    InviteClaimerStartGreetingAttempt(invite_claimer_start_greeting_attempt::Req),
    InviteClaimerCancelGreetingAttempt(invite_claimer_cancel_greeting_attempt::Req),
    InviteClaimerStep(invite_claimer_step::Req),
    InviteShamirRecoveryReveal(invite_shamir_recovery_reveal::Req),
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

pub mod invite_info {
    use super::*;
    use crate::invite::InvitationInfo;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {}

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok(InvitationInfo),
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_claimer_start_greeting_attempt {
    use super::*;
    use parsec_types::{GreetingAttemptID, UserID};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub greeter: UserID,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { greeting_attempt: GreetingAttemptID },
        GreeterNotFound,
        GreeterRevoked,
        GreeterNotAllowed,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_claimer_cancel_greeting_attempt {
    use super::*;
    use parsec_types::{
        CancelledGreetingAttemptReason, GreeterOrClaimer, GreetingAttemptID,
    };

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub greeting_attempt: GreetingAttemptID,
        pub reason: CancelledGreetingAttemptReason,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        GreetingAttemptNotFound,
        GreetingAttemptNotJoined,
        GreetingAttemptAlreadyCancelled {
            origin: GreeterOrClaimer,
            reason: CancelledGreetingAttemptReason,
            timestamp: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_claimer_step {
    use super::*;
    use crate::invite::{ClaimerStep, GreeterStep};
    use parsec_types::{
        CancelledGreetingAttemptReason, GreeterOrClaimer, GreetingAttemptID,
    };

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub greeting_attempt: GreetingAttemptID,
        pub claimer_step: ClaimerStep,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            greeter_step: GreeterStep,
        },
        NotReady,
        StepMismatch,
        StepTooAdvanced,
        GreetingAttemptCancelled {
            origin: GreeterOrClaimer,
            reason: CancelledGreetingAttemptReason,
            timestamp: DateTime,
        },
        GreetingAttemptNotFound,
        GreetingAttemptNotJoined,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_shamir_recovery_reveal {
    use super::*;
    use parsec_types::InvitationToken;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub reveal_token: InvitationToken,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { ciphered_data: ByteBuf },
        BadRevealToken,
        BadInvitationType,
    }

    crate::impl_wire_format!(Rep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_roundtrip() {
        let req = AnyCmdReq::InviteClaimerStartGreetingAttempt(
            invite_claimer_start_greeting_attempt::Req {
                greeter: parsec_types::UserID::generate(),
            },
        );
        let raw = req.dump().unwrap();
        assert_eq!(AnyCmdReq::load(&raw).unwrap(), req);
    }
}
