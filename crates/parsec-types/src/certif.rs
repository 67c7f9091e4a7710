//! The signed certificate family.
//!
//! A certificate is a MessagePack map signed with the author's Ed25519 key;
//! the signed container is `signature || payload` (see
//! [`parsec_crypto::ed25519`]). Certificates are immutable once stored: the
//! server validates them on submission and serves the raw signed bytes back
//! to clients, which re-verify on their side.
//!
//! Each certificate embeds a `type` tag so that a payload cannot be replayed
//! as a different kind of certificate.

use std::collections::{HashMap, HashSet};
use std::num::NonZeroU64;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use parsec_crypto::ed25519::{SigningKey, VerifyKey};
use parsec_crypto::x25519::X25519PublicKey;

use crate::id::{DeviceID, SequesterServiceID, UserID, VlobID};
use crate::identity::{DeviceLabel, HumanHandle, MaybeRedacted, UserProfile};
use crate::realm::{HashAlgorithm, RealmRole, SecretKeyAlgorithm};
use crate::time::DateTime;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DataError {
    #[error("invalid signature")]
    Signature,
    #[error("invalid serialization")]
    Serialization,
    #[error("unexpected author")]
    UnexpectedAuthor,
    #[error("unexpected user id")]
    UnexpectedUserID,
    #[error("unexpected device id")]
    UnexpectedDeviceID,
    #[error("unexpected realm id")]
    UnexpectedRealmID,
}

pub type DataResult<T> = Result<T, DataError>;

/// Author of a certificate: either the organization root key (used once,
/// during bootstrap) or an enrolled device.
///
/// On the wire this is the `author` field, `null` meaning root.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Option<DeviceID>", into = "Option<DeviceID>")]
pub enum CertificateSigner {
    Root,
    Device(DeviceID),
}

impl From<Option<DeviceID>> for CertificateSigner {
    fn from(raw: Option<DeviceID>) -> Self {
        match raw {
            Some(device_id) => Self::Device(device_id),
            None => Self::Root,
        }
    }
}

impl From<CertificateSigner> for Option<DeviceID> {
    fn from(signer: CertificateSigner) -> Self {
        match signer {
            CertificateSigner::Device(device_id) => Some(device_id),
            CertificateSigner::Root => None,
        }
    }
}

fn dump<T: Serialize>(obj: &T) -> Vec<u8> {
    // Serializing an owned struct into a buffer cannot fail
    rmp_serde::to_vec_named(obj).unwrap_or_default()
}

fn verify_and_load<T: DeserializeOwned>(
    signed: &[u8],
    author_verify_key: &VerifyKey,
) -> DataResult<T> {
    let payload = author_verify_key
        .verify_payload(signed)
        .map_err(|_| DataError::Signature)?;
    rmp_serde::from_slice(payload).map_err(|_| DataError::Serialization)
}

fn check_author(got: CertificateSigner, expected: CertificateSigner) -> DataResult<()> {
    if got != expected {
        return Err(DataError::UnexpectedAuthor);
    }
    Ok(())
}

macro_rules! impl_dump_and_sign {
    ($name:ident) => {
        impl $name {
            /// Serialize and sign with the author's key, producing the raw
            /// bytes stored and served by the server.
            pub fn dump_and_sign(&self, author_signkey: &SigningKey) -> Vec<u8> {
                author_signkey.sign_payload(&dump(self))
            }
        }
    };
}

/*
 * UserCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "UserCertificateData", from = "UserCertificateData")]
pub struct UserCertificate {
    pub author: CertificateSigner,
    pub timestamp: DateTime,

    pub user_id: UserID,
    pub human_handle: MaybeRedacted<HumanHandle>,
    pub public_key: X25519PublicKey,
    pub profile: UserProfile,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "user_certificate")]
struct UserCertificateData {
    author: CertificateSigner,
    timestamp: DateTime,
    user_id: UserID,
    human_handle: Option<HumanHandle>,
    public_key: X25519PublicKey,
    profile: UserProfile,
}

impl From<UserCertificateData> for UserCertificate {
    fn from(data: UserCertificateData) -> Self {
        let human_handle = match data.human_handle {
            Some(handle) => MaybeRedacted::Real(handle),
            None => MaybeRedacted::Redacted(HumanHandle::new_redacted(data.user_id)),
        };
        Self {
            author: data.author,
            timestamp: data.timestamp,
            user_id: data.user_id,
            human_handle,
            public_key: data.public_key,
            profile: data.profile,
        }
    }
}

impl From<UserCertificate> for UserCertificateData {
    fn from(obj: UserCertificate) -> Self {
        let human_handle = match obj.human_handle {
            MaybeRedacted::Real(handle) => Some(handle),
            MaybeRedacted::Redacted(_) => None,
        };
        Self {
            author: obj.author,
            timestamp: obj.timestamp,
            user_id: obj.user_id,
            human_handle,
            public_key: obj.public_key,
            profile: obj.profile,
        }
    }
}

impl_dump_and_sign!(UserCertificate);

impl UserCertificate {
    pub fn into_redacted(self) -> Self {
        let human_handle = MaybeRedacted::Redacted(HumanHandle::new_redacted(self.user_id));
        Self {
            human_handle,
            ..self
        }
    }

    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: CertificateSigner,
        expected_user_id: Option<UserID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        check_author(r.author, expected_author)?;
        if let Some(expected) = expected_user_id {
            if r.user_id != expected {
                return Err(DataError::UnexpectedUserID);
            }
        }
        Ok(r)
    }
}

/*
 * DeviceCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "DeviceCertificateData", from = "DeviceCertificateData")]
pub struct DeviceCertificate {
    pub author: CertificateSigner,
    pub timestamp: DateTime,

    pub user_id: UserID,
    pub device_id: DeviceID,
    pub device_label: MaybeRedacted<DeviceLabel>,
    pub verify_key: VerifyKey,
}

#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename = "device_certificate")]
struct DeviceCertificateData {
    author: CertificateSigner,
    timestamp: DateTime,
    user_id: UserID,
    device_id: DeviceID,
    device_label: Option<DeviceLabel>,
    verify_key: VerifyKey,
}

impl From<DeviceCertificateData> for DeviceCertificate {
    fn from(data: DeviceCertificateData) -> Self {
        let device_label = match data.device_label {
            Some(label) => MaybeRedacted::Real(label),
            None => MaybeRedacted::Redacted(DeviceLabel::new_redacted(data.device_id)),
        };
        Self {
            author: data.author,
            timestamp: data.timestamp,
            user_id: data.user_id,
            device_id: data.device_id,
            device_label,
            verify_key: data.verify_key,
        }
    }
}

impl From<DeviceCertificate> for DeviceCertificateData {
    fn from(obj: DeviceCertificate) -> Self {
        let device_label = match obj.device_label {
            MaybeRedacted::Real(label) => Some(label),
            MaybeRedacted::Redacted(_) => None,
        };
        Self {
            author: obj.author,
            timestamp: obj.timestamp,
            user_id: obj.user_id,
            device_id: obj.device_id,
            device_label,
            verify_key: obj.verify_key,
        }
    }
}

impl_dump_and_sign!(DeviceCertificate);

impl DeviceCertificate {
    pub fn into_redacted(self) -> Self {
        let device_label = MaybeRedacted::Redacted(DeviceLabel::new_redacted(self.device_id));
        Self {
            device_label,
            ..self
        }
    }

    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: CertificateSigner,
        expected_device_id: Option<DeviceID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        check_author(r.author, expected_author)?;
        if let Some(expected) = expected_device_id {
            if r.device_id != expected {
                return Err(DataError::UnexpectedDeviceID);
            }
        }
        Ok(r)
    }
}

/*
 * RevokedUserCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "revoked_user_certificate")]
pub struct RevokedUserCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    pub user_id: UserID,
}

impl_dump_and_sign!(RevokedUserCertificate);

impl RevokedUserCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
        expected_user_id: Option<UserID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        if let Some(expected) = expected_user_id {
            if r.user_id != expected {
                return Err(DataError::UnexpectedUserID);
            }
        }
        Ok(r)
    }
}

/*
 * UserUpdateCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "user_update_certificate")]
pub struct UserUpdateCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    pub user_id: UserID,
    pub new_profile: UserProfile,
}

impl_dump_and_sign!(UserUpdateCertificate);

impl UserUpdateCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
        expected_user_id: Option<UserID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        if let Some(expected) = expected_user_id {
            if r.user_id != expected {
                return Err(DataError::UnexpectedUserID);
            }
        }
        Ok(r)
    }
}

/*
 * RealmRoleCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "realm_role_certificate")]
pub struct RealmRoleCertificate {
    pub author: CertificateSigner,
    pub timestamp: DateTime,

    pub realm_id: VlobID,
    pub user_id: UserID,
    /// `None` revokes the user's access to the realm.
    pub role: Option<RealmRole>,
}

impl_dump_and_sign!(RealmRoleCertificate);

impl RealmRoleCertificate {
    /// Self-granted OWNER role, the first certificate of every realm.
    pub fn new_root(
        author: DeviceID,
        author_user_id: UserID,
        timestamp: DateTime,
        realm_id: VlobID,
    ) -> Self {
        Self {
            author: CertificateSigner::Device(author),
            timestamp,
            realm_id,
            user_id: author_user_id,
            role: Some(RealmRole::Owner),
        }
    }

    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: CertificateSigner,
        expected_realm_id: Option<VlobID>,
        expected_user_id: Option<UserID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        check_author(r.author, expected_author)?;
        if let Some(expected) = expected_realm_id {
            if r.realm_id != expected {
                return Err(DataError::UnexpectedRealmID);
            }
        }
        if let Some(expected) = expected_user_id {
            if r.user_id != expected {
                return Err(DataError::UnexpectedUserID);
            }
        }
        Ok(r)
    }
}

/*
 * RealmKeyRotationCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "realm_key_rotation_certificate")]
pub struct RealmKeyRotationCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    pub realm_id: VlobID,
    pub key_index: u64,
    pub encryption_algorithm: SecretKeyAlgorithm,
    pub hash_algorithm: HashAlgorithm,
    /// Encryption of the empty string under the new key, letting a reader
    /// check a candidate key without exposing anything.
    #[serde(with = "serde_bytes")]
    pub key_canary: Vec<u8>,
}

impl_dump_and_sign!(RealmKeyRotationCertificate);

impl RealmKeyRotationCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
        expected_realm_id: Option<VlobID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        if let Some(expected) = expected_realm_id {
            if r.realm_id != expected {
                return Err(DataError::UnexpectedRealmID);
            }
        }
        Ok(r)
    }
}

/*
 * RealmNameCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "realm_name_certificate")]
pub struct RealmNameCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    pub realm_id: VlobID,
    pub key_index: u64,
    #[serde(with = "serde_bytes")]
    pub encrypted_name: Vec<u8>,
}

impl_dump_and_sign!(RealmNameCertificate);

impl RealmNameCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
        expected_realm_id: Option<VlobID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        if let Some(expected) = expected_realm_id {
            if r.realm_id != expected {
                return Err(DataError::UnexpectedRealmID);
            }
        }
        Ok(r)
    }
}

/*
 * SequesterAuthorityCertificate
 */

/// Always signed by the organization root key, submitted at bootstrap.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "sequester_authority_certificate")]
pub struct SequesterAuthorityCertificate {
    pub timestamp: DateTime,
    pub verify_key: VerifyKey,
}

impl_dump_and_sign!(SequesterAuthorityCertificate);

impl SequesterAuthorityCertificate {
    pub fn verify_and_load(signed: &[u8], root_verify_key: &VerifyKey) -> DataResult<Self> {
        verify_and_load::<Self>(signed, root_verify_key)
    }
}

/*
 * SequesterServiceCertificate
 */

/// Signed by the sequester authority key, not a device key.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "sequester_service_certificate")]
pub struct SequesterServiceCertificate {
    pub timestamp: DateTime,
    pub service_id: SequesterServiceID,
    pub service_label: String,
    /// Opaque public encryption key clients use to build the service's
    /// sequester blob. The server never decrypts, so the format is free.
    #[serde(with = "serde_bytes")]
    pub encryption_key: Vec<u8>,
}

impl_dump_and_sign!(SequesterServiceCertificate);

impl SequesterServiceCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        authority_verify_key: &VerifyKey,
    ) -> DataResult<Self> {
        verify_and_load::<Self>(signed, authority_verify_key)
    }
}

/*
 * SequesterRevokedServiceCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "sequester_revoked_service_certificate")]
pub struct SequesterRevokedServiceCertificate {
    pub timestamp: DateTime,
    pub service_id: SequesterServiceID,
}

impl_dump_and_sign!(SequesterRevokedServiceCertificate);

impl SequesterRevokedServiceCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        authority_verify_key: &VerifyKey,
    ) -> DataResult<Self> {
        verify_and_load::<Self>(signed, authority_verify_key)
    }
}

/*
 * ShamirRecoveryBriefCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "shamir_recovery_brief_certificate")]
pub struct ShamirRecoveryBriefCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    /// User whose account the setup protects. Must be the author's user.
    pub user_id: UserID,
    pub threshold: NonZeroU64,
    pub per_recipient_shares: HashMap<UserID, NonZeroU64>,
}

impl_dump_and_sign!(ShamirRecoveryBriefCertificate);

impl ShamirRecoveryBriefCertificate {
    pub fn total_shares(&self) -> u64 {
        self.per_recipient_shares.values().map(|n| n.get()).sum()
    }

    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        Ok(r)
    }
}

/*
 * ShamirRecoveryShareCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "shamir_recovery_share_certificate")]
pub struct ShamirRecoveryShareCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    pub user_id: UserID,
    pub recipient: UserID,
    /// Share encrypted for the recipient; opaque to the server.
    #[serde(with = "serde_bytes")]
    pub ciphered_share: Vec<u8>,
}

impl_dump_and_sign!(ShamirRecoveryShareCertificate);

impl ShamirRecoveryShareCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
        expected_recipient: Option<UserID>,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        if let Some(expected) = expected_recipient {
            if r.recipient != expected {
                return Err(DataError::UnexpectedUserID);
            }
        }
        Ok(r)
    }
}

/*
 * ShamirRecoveryDeletionCertificate
 */

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename = "shamir_recovery_deletion_certificate")]
pub struct ShamirRecoveryDeletionCertificate {
    pub author: DeviceID,
    pub timestamp: DateTime,

    /// Timestamp of the brief certificate being deleted.
    pub setup_to_delete_timestamp: DateTime,
    /// User of the setup being deleted. Must be the author's user.
    pub setup_to_delete_user_id: UserID,
    /// Recipients of the deleted setup, so a reader can tell which share
    /// certificates become void without fetching the brief.
    pub share_recipients: HashSet<UserID>,
}

impl_dump_and_sign!(ShamirRecoveryDeletionCertificate);

impl ShamirRecoveryDeletionCertificate {
    pub fn verify_and_load(
        signed: &[u8],
        author_verify_key: &VerifyKey,
        expected_author: DeviceID,
    ) -> DataResult<Self> {
        let r = verify_and_load::<Self>(signed, author_verify_key)?;
        if r.author != expected_author {
            return Err(DataError::UnexpectedAuthor);
        }
        Ok(r)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn signing_key() -> SigningKey {
        SigningKey::generate()
    }

    #[test]
    fn test_user_certificate_roundtrip() {
        let root_key = signing_key();
        let user_id = UserID::generate();
        let certif = UserCertificate {
            author: CertificateSigner::Root,
            timestamp: DateTime::from_rfc3339("2000-01-02T00:00:00Z").unwrap(),
            user_id,
            human_handle: MaybeRedacted::Real(
                HumanHandle::new("alice@example.com", "Alice").unwrap(),
            ),
            public_key: parsec_crypto::x25519::PrivateKey::generate().public_key(),
            profile: UserProfile::Admin,
        };
        let signed = certif.dump_and_sign(&root_key);

        let loaded = UserCertificate::verify_and_load(
            &signed,
            &root_key.verify_key(),
            CertificateSigner::Root,
            Some(user_id),
        )
        .unwrap();
        assert_eq!(loaded, certif);
    }

    #[test]
    fn test_bad_signature_rejected() {
        let certif = RevokedUserCertificate {
            author: DeviceID::generate(),
            timestamp: DateTime::now(),
            user_id: UserID::generate(),
        };
        let signed = certif.dump_and_sign(&signing_key());
        let other = signing_key();
        assert_eq!(
            RevokedUserCertificate::verify_and_load(
                &signed,
                &other.verify_key(),
                certif.author,
                None
            ),
            Err(DataError::Signature)
        );
    }

    #[test]
    fn test_author_mismatch_rejected() {
        let key = signing_key();
        let certif = UserUpdateCertificate {
            author: DeviceID::generate(),
            timestamp: DateTime::now(),
            user_id: UserID::generate(),
            new_profile: UserProfile::Outsider,
        };
        let signed = certif.dump_and_sign(&key);
        assert_eq!(
            UserUpdateCertificate::verify_and_load(
                &signed,
                &key.verify_key(),
                DeviceID::generate(),
                None
            ),
            Err(DataError::UnexpectedAuthor)
        );
    }

    #[test]
    fn test_type_tag_prevents_confusion() {
        let key = signing_key();
        let certif = RevokedUserCertificate {
            author: DeviceID::generate(),
            timestamp: DateTime::now(),
            user_id: UserID::generate(),
        };
        let signed = certif.dump_and_sign(&key);
        // Same field names, different certificate type
        assert_eq!(
            UserUpdateCertificate::verify_and_load(
                &signed,
                &key.verify_key(),
                certif.author,
                None
            ),
            Err(DataError::Serialization)
        );
    }

    #[test]
    fn test_redacted_twin_roundtrips_as_redacted() {
        let key = signing_key();
        let device_id = DeviceID::generate();
        let certif = DeviceCertificate {
            author: CertificateSigner::Root,
            timestamp: DateTime::now(),
            user_id: UserID::generate(),
            device_id,
            device_label: MaybeRedacted::Real(DeviceLabel::try_from("My Laptop").unwrap()),
            verify_key: signing_key().verify_key(),
        };
        let redacted = certif.clone().into_redacted();
        let signed = redacted.dump_and_sign(&key);
        let loaded = DeviceCertificate::verify_and_load(
            &signed,
            &key.verify_key(),
            CertificateSigner::Root,
            Some(device_id),
        )
        .unwrap();
        assert!(loaded.device_label.is_redacted());
        assert_eq!(loaded, redacted);
    }

    #[test]
    fn test_realm_role_root_certificate() {
        let device_id = DeviceID::generate();
        let user_id = UserID::generate();
        let realm_id = VlobID::generate();
        let certif =
            RealmRoleCertificate::new_root(device_id, user_id, DateTime::now(), realm_id);
        assert_eq!(certif.role, Some(RealmRole::Owner));
        assert_eq!(certif.author, CertificateSigner::Device(device_id));
        assert_eq!(certif.user_id, user_id);
    }

    #[test]
    fn test_brief_total_shares() {
        let mut per_recipient_shares = HashMap::new();
        per_recipient_shares.insert(UserID::generate(), NonZeroU64::new(2).unwrap());
        per_recipient_shares.insert(UserID::generate(), NonZeroU64::new(1).unwrap());
        let certif = ShamirRecoveryBriefCertificate {
            author: DeviceID::generate(),
            timestamp: DateTime::now(),
            user_id: UserID::generate(),
            threshold: NonZeroU64::new(2).unwrap(),
            per_recipient_shares,
        };
        assert_eq!(certif.total_shares(), 3);
    }
}
