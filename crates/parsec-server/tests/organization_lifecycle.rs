//! Integration test: organization creation, bootstrap and updates.

mod common;

use std::collections::HashMap;

use parsec_crypto::ed25519::SigningKey;
use parsec_server::components::organization::{
    OrganizationBootstrapError, OrganizationCreateError, OrganizationUpdate,
};
use parsec_server::components::user::{TosAcceptError, UserCreateError};
use parsec_server::{Server, ServerConfig};
use parsec_types::{ActiveUsersLimit, CertificateSigner, OrganizationID, UserProfile};

use common::{bootstrapped_org, make_user_certs, t0};

#[tokio::test]
async fn create_twice_is_rejected() {
    let server = Server::in_memory(ServerConfig::default());
    let id: OrganizationID = "CoolOrg".parse().expect("valid organization id");
    server
        .organization
        .create(id.clone(), t0(), None, None, None)
        .await
        .expect("first create");
    let outcome = server.organization.create(id, t0(), None, None, None).await;
    assert!(matches!(outcome, Err(OrganizationCreateError::AlreadyExists)));
}

#[tokio::test]
async fn bootstrap_rejects_bad_token_then_succeeds() {
    let server = Server::in_memory(ServerConfig::default());
    let id: OrganizationID = "CoolOrg".parse().expect("valid organization id");
    let token = server
        .organization
        .create(id.clone(), t0(), None, None, None)
        .await
        .expect("create");

    let root_key = SigningKey::generate();
    let (_alice, certs) = make_user_certs(
        CertificateSigner::Root,
        &root_key,
        t0(),
        "alice@example.com",
        "Alicey McAliceFace",
        UserProfile::Admin,
    );

    // Wrong token (None when one is expected)
    let outcome = server
        .organization
        .bootstrap(
            &id,
            t0(),
            None,
            root_key.verify_key(),
            &certs.user,
            &certs.device,
            &certs.redacted_user,
            &certs.redacted_device,
            None,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(OrganizationBootstrapError::InvalidBootstrapToken)
    ));

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
        .expect("bootstrap");

    // Redoing the bootstrap is a terminal error
    let outcome = server
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
        .await;
    assert!(matches!(
        outcome,
        Err(OrganizationBootstrapError::AlreadyBootstrapped)
    ));
}

#[tokio::test]
async fn bootstrap_rejects_non_admin_first_user() {
    let server = Server::in_memory(ServerConfig::default());
    let id: OrganizationID = "CoolOrg".parse().expect("valid organization id");
    let token = server
        .organization
        .create(id.clone(), t0(), None, None, None)
        .await
        .expect("create");

    let root_key = SigningKey::generate();
    let (_bob, certs) = make_user_certs(
        CertificateSigner::Root,
        &root_key,
        t0(),
        "bob@example.com",
        "Boby McBobFace",
        UserProfile::Standard,
    );
    let outcome = server
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
        .await;
    assert!(matches!(
        outcome,
        Err(OrganizationBootstrapError::InvalidCertificate)
    ));
}

#[tokio::test]
async fn update_tos_resets_user_acceptance() {
    let org = bootstrapped_org().await;

    let mut tos = HashMap::new();
    tos.insert(
        "en".to_string(),
        "https://example.com/tos-en.html".to_string(),
    );
    org.server
        .organization
        .update(
            &org.id,
            t0().add_seconds(10),
            OrganizationUpdate {
                tos: Some(tos),
                ..Default::default()
            },
        )
        .await
        .expect("update");

    // Accepting with the wrong updated_on is refused
    let outcome = org
        .server
        .user
        .accept_tos(&org.id, t0().add_seconds(20), org.alice.device_id, t0())
        .await;
    assert!(matches!(outcome, Err(TosAcceptError::TosMismatch)));

    org.server
        .user
        .accept_tos(
            &org.id,
            t0().add_seconds(20),
            org.alice.device_id,
            t0().add_seconds(10),
        )
        .await
        .expect("accept tos");

    // Removing the TOS makes acceptance meaningless again
    org.server
        .organization
        .update(
            &org.id,
            t0().add_seconds(30),
            OrganizationUpdate {
                tos: Some(HashMap::new()),
                ..Default::default()
            },
        )
        .await
        .expect("update");
    let outcome = org
        .server
        .user
        .accept_tos(
            &org.id,
            t0().add_seconds(40),
            org.alice.device_id,
            t0().add_seconds(30),
        )
        .await;
    assert!(matches!(outcome, Err(TosAcceptError::NoTos)));
}

#[tokio::test]
async fn topics_track_the_common_timeline() {
    let org = bootstrapped_org().await;
    let topics = org
        .server
        .organization
        .dump_topics(&org.id)
        .await
        .expect("topics");
    assert_eq!(topics.common, Some(t0()));
    assert_eq!(topics.sequester, None);
    assert_eq!(topics.shamir_recovery, None);
    assert!(topics.realms.is_empty());

    org.new_user(
        t0().add_seconds(1),
        "bob@example.com",
        "Boby McBobFace",
        UserProfile::Standard,
    )
    .await;
    let topics = org
        .server
        .organization
        .dump_topics(&org.id)
        .await
        .expect("topics");
    assert_eq!(topics.common, Some(t0().add_seconds(1)));
    assert_eq!(topics.max(), Some(t0().add_seconds(1)));
}

#[tokio::test]
async fn users_limit_caps_enrollment() {
    let server = Server::in_memory(ServerConfig::default());
    let id: OrganizationID = "TinyOrg".parse().expect("valid organization id");
    let token = server
        .organization
        .create(
            id.clone(),
            t0(),
            Some(ActiveUsersLimit::LimitedTo(1)),
            None,
            None,
        )
        .await
        .expect("create");

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
        .expect("bootstrap");

    // Alice fills the single seat, so enrolling Bob must fail
    let (_bob, certs) = make_user_certs(
        CertificateSigner::Device(alice.device_id),
        &alice.signing_key,
        t0().add_seconds(1),
        "bob@example.com",
        "Boby McBobFace",
        UserProfile::Standard,
    );
    let outcome = server
        .user
        .create_user(
            &id,
            t0().add_seconds(1),
            alice.device_id,
            &certs.user,
            &certs.device,
            &certs.redacted_user,
            &certs.redacted_device,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(UserCreateError::ActiveUsersLimitReached)
    ));
}
