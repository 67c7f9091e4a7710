//! Shared fixtures: an in-memory server with a bootstrapped organization
//! and helpers producing real signed certificates.

#![allow(dead_code)]

use parsec_crypto::ed25519::SigningKey;
use parsec_crypto::x25519::PrivateKey;
use parsec_server::{Server, ServerConfig};
use parsec_types::{
    CertificateSigner, DateTime, DeviceCertificate, DeviceID, DeviceLabel, HashAlgorithm,
    HumanHandle, MaybeRedacted, OrganizationID, RealmKeyRotationCertificate, RealmRole,
    RealmRoleCertificate, SecretKeyAlgorithm, UserCertificate, UserID, UserProfile, VlobID,
};

/// Base timestamp used by every scenario; later steps add seconds to it.
pub const T0: &str = "2024-01-01T00:00:00Z";

pub fn t(raw: &str) -> DateTime {
    DateTime::from_rfc3339(raw).expect("valid rfc3339 literal")
}

pub fn t0() -> DateTime {
    t(T0)
}

/// A user's first device, with the signing key kept around so tests can
/// author further certificates.
pub struct TestDevice {
    pub user_id: UserID,
    pub device_id: DeviceID,
    pub signing_key: SigningKey,
}

pub struct CertSet {
    pub user: Vec<u8>,
    pub device: Vec<u8>,
    pub redacted_user: Vec<u8>,
    pub redacted_device: Vec<u8>,
}

/// Builds the four certificates enrolling a new user and its first device,
/// all at the same timestamp as `user_create` requires.
pub fn make_user_certs(
    signer: CertificateSigner,
    signer_key: &SigningKey,
    timestamp: DateTime,
    email: &str,
    label: &str,
    profile: UserProfile,
) -> (TestDevice, CertSet) {
    let user_id = UserID::generate();
    let device_id = DeviceID::generate();
    let signing_key = SigningKey::generate();
    let human_handle = HumanHandle::new(email, label).expect("valid human handle");
    let user = UserCertificate {
        author: signer,
        timestamp,
        user_id,
        human_handle: MaybeRedacted::Real(human_handle),
        public_key: PrivateKey::generate().public_key(),
        profile,
    };
    let device = DeviceCertificate {
        author: signer,
        timestamp,
        user_id,
        device_id,
        device_label: MaybeRedacted::Real(
            DeviceLabel::try_from("test-device").expect("valid device label"),
        ),
        verify_key: signing_key.verify_key(),
    };
    let certs = CertSet {
        user: user.dump_and_sign(signer_key),
        device: device.dump_and_sign(signer_key),
        redacted_user: user.clone().into_redacted().dump_and_sign(signer_key),
        redacted_device: device.clone().into_redacted().dump_and_sign(signer_key),
    };
    (
        TestDevice {
            user_id,
            device_id,
            signing_key,
        },
        certs,
    )
}

pub fn role_certificate(
    author: &TestDevice,
    timestamp: DateTime,
    realm_id: VlobID,
    user_id: UserID,
    role: Option<RealmRole>,
) -> Vec<u8> {
    RealmRoleCertificate {
        author: CertificateSigner::Device(author.device_id),
        timestamp,
        realm_id,
        user_id,
        role,
    }
    .dump_and_sign(&author.signing_key)
}

pub fn rotation_certificate(
    author: &TestDevice,
    timestamp: DateTime,
    realm_id: VlobID,
    key_index: u64,
) -> Vec<u8> {
    RealmKeyRotationCertificate {
        author: author.device_id,
        timestamp,
        realm_id,
        key_index,
        encryption_algorithm: SecretKeyAlgorithm::Chacha20Poly1305,
        hash_algorithm: HashAlgorithm::Blake3,
        key_canary: b"<canary>".to_vec(),
    }
    .dump_and_sign(&author.signing_key)
}

/// A server holding one bootstrapped organization, with `alice` as the
/// bootstrap ADMIN.
pub struct TestOrg {
    pub server: Server,
    pub id: OrganizationID,
    pub root_key: SigningKey,
    pub alice: TestDevice,
}

pub async fn bootstrapped_org() -> TestOrg {
    bootstrapped_org_with(ServerConfig::default()).await
}

pub async fn bootstrapped_org_with(config: ServerConfig) -> TestOrg {
    let server = Server::in_memory(config);
    let id: OrganizationID = "CoolOrg".parse().expect("valid organization id");
    let token = server
        .organization
        .create(id.clone(), t0(), None, None, None)
        .await
        .expect("organization create");
    let root_key = SigningKey::generate();
    let (alice, certs) = make_user_certs(
        CertificateSigner::Root,
        &root_key,
        t0(),
        "alice@example.com",
        "Alicey McAliceFace",
        UserProfile::Admin,
    );
    server
        .organization
        .bootstrap(
            &id,
            t0(),
            Some(token),
            root_key.verify_key(),
            &certs.user,
            &certs.device,
            &certs.redacted_user,
            &certs.redacted_device,
            None,
        )
        .await
        .expect("organization bootstrap");
    TestOrg {
        server,
        id,
        root_key,
        alice,
    }
}

impl TestOrg {
    /// Enroll a new user (and first device), authored by alice.
    pub async fn new_user(
        &self,
        timestamp: DateTime,
        email: &str,
        label: &str,
        profile: UserProfile,
    ) -> TestDevice {
        let (device, certs) = make_user_certs(
            CertificateSigner::Device(self.alice.device_id),
            &self.alice.signing_key,
            timestamp,
            email,
            label,
            profile,
        );
        self.server
            .user
            .create_user(
                &self.id,
                timestamp,
                self.alice.device_id,
                &certs.user,
                &certs.device,
                &certs.redacted_user,
                &certs.redacted_device,
            )
            .await
            .expect("user create");
        device
    }

    /// Create a realm owned by `owner`.
    pub async fn new_realm(&self, timestamp: DateTime, owner: &TestDevice) -> VlobID {
        let realm_id = VlobID::generate();
        let certificate =
            RealmRoleCertificate::new_root(owner.device_id, owner.user_id, timestamp, realm_id)
                .dump_and_sign(&owner.signing_key);
        self.server
            .realm
            .create(&self.id, timestamp, owner.device_id, &certificate)
            .await
            .expect("realm create");
        realm_id
    }
}
