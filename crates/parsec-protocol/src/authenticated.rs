//! `authenticated_cmds`: commands issued by an enrolled device.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use parsec_types::{DateTime, VlobID};

/// Request envelope, dispatched on the `cmd` tag.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "cmd", rename_all = "snake_case")]
pub enum AnyCmdReq {
    Ping(ping::Req),
    CertificateGet(certificate_get::Req),
    UserCreate(user_create::Req),
    DeviceCreate(device_create::Req),
    UserRevoke(user_revoke::Req),
    UserUpdate(user_update::Req),
    RealmCreate(realm_create::Req),
    RealmShare(realm_share::Req),
    RealmUnshare(realm_unshare::Req),
    RealmRename(realm_rename::Req),
    RealmRotateKey(realm_rotate_key::Req),
    RealmGetKeysBundle(realm_get_keys_bundle::Req),
    VlobCreate(vlob_create::Req),
    VlobUpdate(vlob_update::Req),
    VlobReadBatch(vlob_read_batch::Req),
    VlobReadVersions(vlob_read_versions::Req),
    VlobPollChanges(vlob_poll_changes::Req),
    BlockCreate(block_create::Req),
    BlockRead(block_read::Req),
    InviteNewUser(invite_new_user::Req),
    InviteNewDevice(invite_new_device::Req),
    InviteNewShamirRecovery(invite_new_shamir_recovery::Req),
    InviteCancel(invite_cancel::Req),
    InviteList(invite_list::Req),
    InviteGreeterStartGreetingAttempt(invite_greeter_start_greeting_attempt::Req),
    InviteGreeterCancelGreetingAttempt(invite_greeter_cancel_greeting_attempt::Req),
    InviteGreeterStep(invite_greeter_step::Req),
    ShamirRecoverySetup(shamir_recovery_setup::Req),
    ShamirRecoveryDelete(shamir_recovery_delete::Req),
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

pub mod certificate_get {
    use super::*;
    use serde_bytes::ByteBuf;

    /// Incremental fetch: only certificates strictly newer than the given
    /// per-topic watermarks are returned.
    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub common_after: Option<DateTime>,
        pub sequester_after: Option<DateTime>,
        pub shamir_recovery_after: Option<DateTime>,
        pub realm_after: HashMap<VlobID, DateTime>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            common_certificates: Vec<ByteBuf>,
            sequester_certificates: Vec<ByteBuf>,
            shamir_recovery_certificates: Vec<ByteBuf>,
            realm_certificates: HashMap<VlobID, Vec<ByteBuf>>,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod user_create {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub user_certificate: ByteBuf,
        pub device_certificate: ByteBuf,
        pub redacted_user_certificate: ByteBuf,
        pub redacted_device_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        ActiveUsersLimitReached,
        HumanHandleAlreadyTaken,
        UserAlreadyExists,
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod device_create {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub device_certificate: ByteBuf,
        pub redacted_device_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        DeviceAlreadyExists,
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod user_revoke {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub revoked_user_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        UserNotFound,
        UserAlreadyRevoked {
            last_common_certificate_timestamp: DateTime,
        },
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod user_update {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub user_update_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        UserNotFound,
        UserRevoked,
        UserNoChanges,
        UserCannotBecomeOutsider,
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod realm_create {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_role_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        RealmAlreadyExists {
            last_realm_certificate_timestamp: DateTime,
        },
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod realm_share {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_role_certificate: ByteBuf,
        /// Access to the current keys bundle, encrypted for the recipient.
        pub recipient_keys_bundle_access: ByteBuf,
        pub key_index: u64,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        RealmNotFound,
        RecipientNotFound,
        RecipientRevoked,
        RoleIncompatibleWithOutsider,
        RoleAlreadyGranted {
            last_realm_certificate_timestamp: DateTime,
        },
        BadKeyIndex {
            last_realm_certificate_timestamp: DateTime,
        },
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod realm_unshare {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_role_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        RealmNotFound,
        RecipientNotFound,
        RecipientAlreadyUnshared {
            last_realm_certificate_timestamp: DateTime,
        },
        LastOwnerCannotBeUnshared,
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod realm_rename {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_name_certificate: ByteBuf,
        /// Fail with `InitialNameAlreadyExists` instead of renaming when a
        /// name certificate already exists.
        pub initial_name_or_fail: bool,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        RealmNotFound,
        InitialNameAlreadyExists {
            last_realm_certificate_timestamp: DateTime,
        },
        BadKeyIndex {
            last_realm_certificate_timestamp: DateTime,
        },
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod realm_rotate_key {
    use super::*;
    use parsec_types::UserID;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_key_rotation_certificate: ByteBuf,
        /// One access per current non-revoked participant.
        pub per_participant_keys_bundle_access: HashMap<UserID, ByteBuf>,
        pub keys_bundle: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        RealmNotFound,
        BadKeyIndex {
            last_realm_certificate_timestamp: DateTime,
        },
        ParticipantMismatch {
            last_realm_certificate_timestamp: DateTime,
        },
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod realm_get_keys_bundle {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_id: VlobID,
        pub key_index: u64,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            keys_bundle: ByteBuf,
            keys_bundle_access: ByteBuf,
        },
        AuthorNotAllowed,
        AccessNotAvailableForAuthor,
        BadKeyIndex,
    }

    crate::impl_wire_format!(Rep);
}

pub mod vlob_create {
    use super::*;
    use parsec_types::SequesterServiceID;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_id: VlobID,
        pub vlob_id: VlobID,
        pub key_index: u64,
        pub timestamp: DateTime,
        pub blob: ByteBuf,
        /// Mandatory in a sequestered organization, one entry per active
        /// service.
        pub sequester_blob: Option<HashMap<SequesterServiceID, ByteBuf>>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        RealmNotFound,
        VlobAlreadyExists,
        BadKeyIndex {
            last_realm_certificate_timestamp: DateTime,
        },
        OrganizationNotSequestered,
        SequesterServiceMismatch {
            last_sequester_certificate_timestamp: DateTime,
        },
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod vlob_update {
    use super::*;
    use parsec_types::SequesterServiceID;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub vlob_id: VlobID,
        pub key_index: u64,
        pub timestamp: DateTime,
        pub version: u64,
        pub blob: ByteBuf,
        pub sequester_blob: Option<HashMap<SequesterServiceID, ByteBuf>>,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        VlobNotFound,
        BadVersion,
        BadKeyIndex {
            last_realm_certificate_timestamp: DateTime,
        },
        OrganizationNotSequestered,
        SequesterServiceMismatch {
            last_sequester_certificate_timestamp: DateTime,
        },
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod vlob_read_batch {
    use super::*;
    use parsec_types::DeviceID;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_id: VlobID,
        pub vlobs: Vec<VlobID>,
        /// Read the latest version at or before this time; latest overall
        /// when unset.
        pub at: Option<DateTime>,
    }

    /// `(vlob_id, key_index, author, version, created_on, blob)`
    pub type Item = (VlobID, u64, DeviceID, u64, DateTime, ByteBuf);

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            items: Vec<Item>,
            needed_common_certificate_timestamp: DateTime,
            needed_realm_certificate_timestamp: DateTime,
        },
        AuthorNotAllowed,
        RealmNotFound,
        TooManyElements,
    }

    crate::impl_wire_format!(Rep);
}

pub mod vlob_read_versions {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_id: VlobID,
        pub items: Vec<(VlobID, u64)>,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            items: Vec<super::vlob_read_batch::Item>,
            needed_common_certificate_timestamp: DateTime,
            needed_realm_certificate_timestamp: DateTime,
        },
        AuthorNotAllowed,
        RealmNotFound,
        TooManyElements,
    }

    crate::impl_wire_format!(Rep);
}

pub mod vlob_poll_changes {
    use super::*;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub realm_id: VlobID,
        pub last_checkpoint: u64,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            current_checkpoint: u64,
            changes: Vec<(VlobID, u64)>,
        },
        AuthorNotAllowed,
        RealmNotFound,
    }

    crate::impl_wire_format!(Rep);
}

pub mod block_create {
    use super::*;
    use parsec_types::BlockID;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub block_id: BlockID,
        pub realm_id: VlobID,
        pub key_index: u64,
        pub block: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        RealmNotFound,
        BlockAlreadyExists,
        BlockTooLarge,
        BadKeyIndex {
            last_realm_certificate_timestamp: DateTime,
        },
        StoreUnavailable,
    }

    crate::impl_wire_format!(Rep);
}

pub mod block_read {
    use super::*;
    use parsec_types::BlockID;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub block_id: BlockID,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            block: ByteBuf,
            key_index: u64,
            needed_realm_certificate_timestamp: DateTime,
        },
        AuthorNotAllowed,
        BlockNotFound,
        StoreUnavailable,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_new_user {
    use super::*;
    use parsec_types::InvitationToken;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub claimer_email: String,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { token: InvitationToken },
        AuthorNotAllowed,
        ClaimerEmailAlreadyEnrolled,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_new_device {
    use super::*;
    use parsec_types::InvitationToken;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {}

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { token: InvitationToken },
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_new_shamir_recovery {
    use super::*;
    use parsec_types::{InvitationToken, UserID};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub claimer_user_id: UserID,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { token: InvitationToken },
        AuthorNotAllowed,
        ShamirRecoveryNotSetup,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_cancel {
    use super::*;
    use parsec_types::InvitationToken;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub token: InvitationToken,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        AuthorNotAllowed,
        InvitationNotFound,
        InvitationAlreadyCancelled,
        InvitationCompleted,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_list {
    use super::*;
    use crate::invite::InviteListItem;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {}

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { invitations: Vec<InviteListItem> },
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_greeter_start_greeting_attempt {
    use super::*;
    use parsec_types::{GreetingAttemptID, InvitationToken};

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub token: InvitationToken,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok { greeting_attempt: GreetingAttemptID },
        AuthorNotAllowed,
        InvitationNotFound,
        InvitationCancelled,
        InvitationCompleted,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_greeter_cancel_greeting_attempt {
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
        AuthorNotAllowed,
        GreetingAttemptNotFound,
        GreetingAttemptNotJoined,
        GreetingAttemptAlreadyCancelled {
            origin: GreeterOrClaimer,
            reason: CancelledGreetingAttemptReason,
            timestamp: DateTime,
        },
        InvitationCancelled,
        InvitationCompleted,
    }

    crate::impl_wire_format!(Rep);
}

pub mod invite_greeter_step {
    use super::*;
    use crate::invite::{ClaimerStep, GreeterStep};
    use parsec_types::{
        CancelledGreetingAttemptReason, GreeterOrClaimer, GreetingAttemptID,
    };

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub greeting_attempt: GreetingAttemptID,
        pub greeter_step: GreeterStep,
    }

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok {
            claimer_step: ClaimerStep,
        },
        /// The peer has not submitted its half of this slot yet.
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
        AuthorNotAllowed,
        InvitationCancelled,
        InvitationCompleted,
    }

    crate::impl_wire_format!(Rep);
}

pub mod shamir_recovery_setup {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub shamir_recovery_brief_certificate: ByteBuf,
        pub shamir_recovery_share_certificates: Vec<ByteBuf>,
        /// Token the claimer must present to reveal `ciphered_data`.
        pub reveal_token: parsec_types::InvitationToken,
        pub ciphered_data: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        ShamirRecoveryAlreadyExists {
            last_shamir_certificate_timestamp: DateTime,
        },
        AuthorIncludedAsRecipient,
        RecipientNotFound,
        RecipientRevoked,
        ShareInconsistentTimestamp,
        ShareRecipientsMismatch,
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

pub mod shamir_recovery_delete {
    use super::*;
    use serde_bytes::ByteBuf;

    #[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
    pub struct Req {
        pub shamir_recovery_deletion_certificate: ByteBuf,
    }

    #[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
    #[serde(tag = "status", rename_all = "snake_case")]
    pub enum Rep {
        Ok,
        ShamirRecoveryNotFound,
        ShamirRecoveryAlreadyDeleted {
            last_shamir_certificate_timestamp: DateTime,
        },
        RecipientsMismatch,
        InvalidCertificate,
        TimestampOutOfBallpark {
            server_timestamp: DateTime,
            client_timestamp: DateTime,
            ballpark_client_early_offset: f64,
            ballpark_client_late_offset: f64,
        },
        RequireGreaterTimestamp {
            strictly_greater_than: DateTime,
        },
    }

    crate::impl_wire_format!(Rep);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmd_roundtrip() {
        let req = AnyCmdReq::Ping(ping::Req {
            ping: "hello".to_string(),
        });
        let raw = req.dump().unwrap();
        assert_eq!(AnyCmdReq::load(&raw).unwrap(), req);
    }

    #[test]
    fn test_unknown_command() {
        #[derive(Serialize)]
        struct Fake {
            cmd: &'static str,
        }
        let raw = rmp_serde::to_vec_named(&Fake {
            cmd: "made_up_command",
        })
        .unwrap();
        assert_eq!(AnyCmdReq::load(&raw).unwrap(), AnyCmdReq::UnknownCommand);
    }

    #[test]
    fn test_rep_status_tag() {
        let rep = user_create::Rep::RequireGreaterTimestamp {
            strictly_greater_than: DateTime::from_rfc3339("2000-01-02T00:00:00Z").unwrap(),
        };
        let raw = rep.dump().unwrap();
        assert_eq!(user_create::Rep::load(&raw).unwrap(), rep);
    }
}
