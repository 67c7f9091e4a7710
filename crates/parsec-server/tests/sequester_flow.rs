//! Integration test: sequestered organizations, service management and the
//! sequester blob checks on vlob writes.

mod common;

use std::collections::HashMap;

use parsec_crypto::ed25519::SigningKey;
use parsec_server::components::sequester::{
    SequesterCreateServiceError, SequesterRevokeServiceError,
};
use parsec_server::components::vlob::VlobCreateError;
use parsec_server::datamodel::SequesterServiceConfig;
use parsec_server::{Server, ServerConfig};
use parsec_types::{
    CertificateSigner, OrganizationID, SequesterAuthorityCertificate,
    SequesterRevokedServiceCertificate, SequesterServiceCertificate, SequesterServiceID,
    UserProfile, VlobID,
};

use common::{make_user_certs, t0, TestDevice, TestOrg};

/// Bootstraps an organization with a sequester authority installed.
async fn sequestered_org() -> (TestOrg, SigningKey) {
    let server = Server::in_memory(ServerConfig::default());
    let id: OrganizationID = "SeqOrg".parse().expect("valid organization id");
    let token = server
        .organization
        .create(id.clone(), t0(), None, None, None)
        .await
        .expect("create");
    let root_key = SigningKey::generate();
    let authority_key = SigningKey::generate();
    let authority = SequesterAuthorityCertificate {
        timestamp: t0(),
        verify_key: authority_key.verify_key(),
    }
    .dump_and_sign(&root_key);
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
            Some(&authority),
        )
        .await
        .expect("bootstrap");
    (
        TestOrg {
            server,
            id,
            root_key,
            alice,
        },
        authority_key,
    )
}

fn service_certificate(
    authority_key: &SigningKey,
    timestamp: parsec_types::DateTime,
    service_id: SequesterServiceID,
    label: &str,
) -> Vec<u8> {
    SequesterServiceCertificate {
        timestamp,
        service_id,
        service_label: label.to_string(),
        encryption_key: b"<service encryption key>".to_vec(),
    }
    .dump_and_sign(authority_key)
}

async fn write_vlob(
    org: &TestOrg,
    author: &TestDevice,
    realm_id: VlobID,
    timestamp: parsec_types::DateTime,
    sequester_blob: Option<HashMap<SequesterServiceID, Vec<u8>>>,
) -> Result<(), VlobCreateError> {
    org.server
        .vlob
        .create(
            &org.id,
            timestamp,
            author.device_id,
            realm_id,
            VlobID::generate(),
            0,
            timestamp,
            b"<vlob blob>".to_vec(),
            sequester_blob,
        )
        .await
}

#[tokio::test]
async fn service_certificates_must_come_from_the_authority() {
    let (org, authority_key) = sequestered_org().await;
    let service_id = SequesterServiceID::generate();

    // Signed by some other key
    let rogue = service_certificate(
        &SigningKey::generate(),
        t0().add_seconds(1),
        service_id,
        "Rogue",
    );
    let outcome = org
        .server
        .sequester
        .create_service(
            &org.id,
            t0().add_seconds(1),
            &rogue,
            SequesterServiceConfig::Storage,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(SequesterCreateServiceError::InvalidCertificate)
    ));

    let certificate =
        service_certificate(&authority_key, t0().add_seconds(1), service_id, "Archival");
    org.server
        .sequester
        .create_service(
            &org.id,
            t0().add_seconds(1),
            &certificate,
            SequesterServiceConfig::Storage,
        )
        .await
        .expect("create service");

    let outcome = org
        .server
        .sequester
        .create_service(
            &org.id,
            t0().add_seconds(2),
            &certificate,
            SequesterServiceConfig::Storage,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(SequesterCreateServiceError::ServiceAlreadyExists)
    ));

    let services = org
        .server
        .sequester
        .get_organization_services(&org.id)
        .await
        .expect("services");
    assert_eq!(services.len(), 1);
    assert_eq!(services[0].service_id, service_id);
    assert_eq!(services[0].service_label, "Archival");
    assert!(services[0].revoked_on.is_none());
}

#[tokio::test]
async fn vlob_writes_must_cover_every_active_service() {
    let (org, authority_key) = sequestered_org().await;
    let service_id = SequesterServiceID::generate();
    let certificate =
        service_certificate(&authority_key, t0().add_seconds(1), service_id, "Archival");
    org.server
        .sequester
        .create_service(
            &org.id,
            t0().add_seconds(1),
            &certificate,
            SequesterServiceConfig::Storage,
        )
        .await
        .expect("create service");
    let realm_id = org.new_realm(t0().add_seconds(2), &org.alice).await;

    // Missing sequester blob
    let outcome = write_vlob(&org, &org.alice, realm_id, t0().add_seconds(3), None).await;
    assert!(matches!(
        outcome,
        Err(VlobCreateError::SequesterServiceMismatch { .. })
    ));

    // Blob keyed on the wrong service
    let mut wrong = HashMap::new();
    wrong.insert(SequesterServiceID::generate(), b"<copy>".to_vec());
    let outcome = write_vlob(&org, &org.alice, realm_id, t0().add_seconds(3), Some(wrong)).await;
    assert!(matches!(
        outcome,
        Err(VlobCreateError::SequesterServiceMismatch { .. })
    ));

    let mut blob = HashMap::new();
    blob.insert(service_id, b"<sequestered copy>".to_vec());
    write_vlob(&org, &org.alice, realm_id, t0().add_seconds(3), Some(blob))
        .await
        .expect("sequestered write");

    // Once the service is revoked, writes no longer reference it
    let revocation = SequesterRevokedServiceCertificate {
        timestamp: t0().add_seconds(4),
        service_id,
    }
    .dump_and_sign(&authority_key);
    org.server
        .sequester
        .revoke_service(&org.id, t0().add_seconds(4), &revocation)
        .await
        .expect("revoke service");
    let outcome = org
        .server
        .sequester
        .revoke_service(&org.id, t0().add_seconds(5), &revocation)
        .await;
    assert!(matches!(
        outcome,
        Err(SequesterRevokeServiceError::ServiceAlreadyRevoked)
    ));

    let mut stale = HashMap::new();
    stale.insert(service_id, b"<sequestered copy>".to_vec());
    let outcome = write_vlob(&org, &org.alice, realm_id, t0().add_seconds(6), Some(stale)).await;
    assert!(matches!(
        outcome,
        Err(VlobCreateError::SequesterServiceMismatch { .. })
    ));
    write_vlob(&org, &org.alice, realm_id, t0().add_seconds(6), Some(HashMap::new()))
        .await
        .expect("write after revocation");
}

#[tokio::test]
async fn plain_organizations_refuse_sequester_blobs() {
    let org = common::bootstrapped_org().await;
    let realm_id = org.new_realm(t0().add_seconds(1), &org.alice).await;

    let mut blob = HashMap::new();
    blob.insert(SequesterServiceID::generate(), b"<copy>".to_vec());
    let outcome = write_vlob(&org, &org.alice, realm_id, t0().add_seconds(2), Some(blob)).await;
    assert!(matches!(
        outcome,
        Err(VlobCreateError::OrganizationNotSequestered)
    ));
}
