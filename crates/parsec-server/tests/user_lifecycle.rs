//! Integration test: user enrollment, revocation, profile updates and the
//! certificate fetch.

mod common;

use std::collections::HashMap;

use parsec_server::components::user::{UserCreateError, UserRevokeError, UserUpdateError};
use parsec_types::{
    CertificateSigner, RealmRole, RevokedUserCertificate, UserCertificate, UserProfile,
    UserUpdateCertificate, VlobID,
};

use common::{bootstrapped_org, make_user_certs, role_certificate, t0};

#[tokio::test]
async fn enroll_and_list() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Standard,
        )
        .await;

    let users = org
        .server
        .user
        .list_users(&org.id)
        .await
        .expect("organization exists");
    assert_eq!(users.len(), 2);
    // Sorted by creation date
    assert_eq!(users[0].user_id, org.alice.user_id);
    assert_eq!(users[0].email, "alice@example.com");
    assert_eq!(users[0].profile, UserProfile::Admin);
    assert_eq!(users[1].user_id, bob.user_id);
    assert_eq!(users[1].profile, UserProfile::Standard);
    assert!(users.iter().all(|user| user.revoked_on.is_none()));
}

#[tokio::test]
async fn duplicate_email_is_rejected() {
    let org = bootstrapped_org().await;
    let (_bob, certs) = make_user_certs(
        CertificateSigner::Device(org.alice.device_id),
        &org.alice.signing_key,
        t0().add_seconds(1),
        "alice@example.com",
        "Alice Again",
        UserProfile::Standard,
    );
    let outcome = org
        .server
        .user
        .create_user(
            &org.id,
            t0().add_seconds(1),
            org.alice.device_id,
            &certs.user,
            &certs.device,
            &certs.redacted_user,
            &certs.redacted_device,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(UserCreateError::HumanHandleAlreadyTaken)
    ));
}

#[tokio::test]
async fn common_topic_timestamps_are_strictly_increasing() {
    let org = bootstrapped_org().await;
    // Same timestamp as the bootstrap certificates
    let (_bob, certs) = make_user_certs(
        CertificateSigner::Device(org.alice.device_id),
        &org.alice.signing_key,
        t0(),
        "bob@example.com",
        "Boby McBobFace",
        UserProfile::Standard,
    );
    let outcome = org
        .server
        .user
        .create_user(
            &org.id,
            t0(),
            org.alice.device_id,
            &certs.user,
            &certs.device,
            &certs.redacted_user,
            &certs.redacted_device,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(UserCreateError::RequireGreaterTimestamp { strictly_greater_than }) if strictly_greater_than == t0()
    ));

    // One second later is fine
    org.new_user(
        t0().add_seconds(1),
        "bob@example.com",
        "Boby McBobFace",
        UserProfile::Standard,
    )
    .await;
}

#[tokio::test]
async fn revocation_locks_the_user_out() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Admin,
        )
        .await;

    // Self-revocation is not a thing
    let self_revocation = RevokedUserCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(2),
        user_id: org.alice.user_id,
    }
    .dump_and_sign(&org.alice.signing_key);
    let outcome = org
        .server
        .user
        .revoke_user(
            &org.id,
            t0().add_seconds(2),
            org.alice.device_id,
            &self_revocation,
        )
        .await;
    assert!(matches!(outcome, Err(UserRevokeError::AuthorNotAllowed)));

    let revocation = RevokedUserCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(2),
        user_id: bob.user_id,
    }
    .dump_and_sign(&org.alice.signing_key);
    org.server
        .user
        .revoke_user(
            &org.id,
            t0().add_seconds(2),
            org.alice.device_id,
            &revocation,
        )
        .await
        .expect("revoke");

    // A revoked admin cannot author anything anymore
    let revenge = RevokedUserCertificate {
        author: bob.device_id,
        timestamp: t0().add_seconds(3),
        user_id: org.alice.user_id,
    }
    .dump_and_sign(&bob.signing_key);
    let outcome = org
        .server
        .user
        .revoke_user(&org.id, t0().add_seconds(3), bob.device_id, &revenge)
        .await;
    assert!(matches!(outcome, Err(UserRevokeError::AuthorNotAllowed)));

    // Revoking twice reports the current common timeline
    let again = RevokedUserCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(4),
        user_id: bob.user_id,
    }
    .dump_and_sign(&org.alice.signing_key);
    let outcome = org
        .server
        .user
        .revoke_user(&org.id, t0().add_seconds(4), org.alice.device_id, &again)
        .await;
    assert!(matches!(
        outcome,
        Err(UserRevokeError::UserAlreadyRevoked { .. })
    ));
}

#[tokio::test]
async fn revocation_postdates_realm_activity() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Standard,
        )
        .await;
    let realm_id = org.new_realm(t0().add_seconds(2), &org.alice).await;
    let grant = role_certificate(
        &org.alice,
        t0().add_seconds(3),
        realm_id,
        bob.user_id,
        Some(RealmRole::Contributor),
    );
    org.server
        .realm
        .share(
            &org.id,
            t0().add_seconds(3),
            org.alice.device_id,
            &grant,
            b"<keys bundle access>",
            0,
        )
        .await
        .expect("share");

    org.server
        .vlob
        .create(
            &org.id,
            t0().add_seconds(100),
            bob.device_id,
            realm_id,
            VlobID::generate(),
            0,
            t0().add_seconds(100),
            b"manifest".to_vec(),
            None,
        )
        .await
        .expect("vlob create");

    // The revocation must postdate the vlob activity of bob's realms
    let revocation = RevokedUserCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(4),
        user_id: bob.user_id,
    }
    .dump_and_sign(&org.alice.signing_key);
    let outcome = org
        .server
        .user
        .revoke_user(
            &org.id,
            t0().add_seconds(4),
            org.alice.device_id,
            &revocation,
        )
        .await;
    assert!(matches!(
        outcome,
        Err(UserRevokeError::RequireGreaterTimestamp { strictly_greater_than })
            if strictly_greater_than == t0().add_seconds(100)
    ));

    let revocation = RevokedUserCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(101),
        user_id: bob.user_id,
    }
    .dump_and_sign(&org.alice.signing_key);
    org.server
        .user
        .revoke_user(
            &org.id,
            t0().add_seconds(101),
            org.alice.device_id,
            &revocation,
        )
        .await
        .expect("revoke after the write");
}

#[tokio::test]
async fn profile_update_requires_an_actual_change() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Standard,
        )
        .await;

    let update = UserUpdateCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(2),
        user_id: bob.user_id,
        new_profile: UserProfile::Admin,
    }
    .dump_and_sign(&org.alice.signing_key);
    org.server
        .user
        .update_user(&org.id, t0().add_seconds(2), org.alice.device_id, &update)
        .await
        .expect("update");

    let same_again = UserUpdateCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(3),
        user_id: bob.user_id,
        new_profile: UserProfile::Admin,
    }
    .dump_and_sign(&org.alice.signing_key);
    let outcome = org
        .server
        .user
        .update_user(
            &org.id,
            t0().add_seconds(3),
            org.alice.device_id,
            &same_again,
        )
        .await;
    assert!(matches!(outcome, Err(UserUpdateError::UserNoChanges)));

    let users = org.server.user.list_users(&org.id).await.expect("users");
    let bob_info = users
        .iter()
        .find(|user| user.user_id == bob.user_id)
        .expect("bob listed");
    assert_eq!(bob_info.profile, UserProfile::Admin);
}

#[tokio::test]
async fn freeze_flag_shows_up_in_listing() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Standard,
        )
        .await;

    org.server
        .user
        .freeze_user(&org.id, bob.user_id, true)
        .await
        .expect("freeze");
    let users = org.server.user.list_users(&org.id).await.expect("users");
    let bob_info = users
        .iter()
        .find(|user| user.user_id == bob.user_id)
        .expect("bob listed");
    assert!(bob_info.is_frozen);

    org.server
        .user
        .freeze_user(&org.id, bob.user_id, false)
        .await
        .expect("unfreeze");
    let users = org.server.user.list_users(&org.id).await.expect("users");
    let bob_info = users
        .iter()
        .find(|user| user.user_id == bob.user_id)
        .expect("bob listed");
    assert!(!bob_info.is_frozen);
}

#[tokio::test]
async fn outsiders_only_see_redacted_certificates() {
    let org = bootstrapped_org().await;
    let carol = org
        .new_user(
            t0().add_seconds(1),
            "carol@example.com",
            "Caroly McCarolFace",
            UserProfile::Outsider,
        )
        .await;

    // The first common certificate is alice's root-signed user certificate
    let bundle = org
        .server
        .user
        .get_certificates(&org.id, carol.device_id, None, None, None, &HashMap::new())
        .await
        .expect("certificates");
    let alice_cert = UserCertificate::verify_and_load(
        &bundle.common[0],
        &org.root_key.verify_key(),
        CertificateSigner::Root,
        Some(org.alice.user_id),
    )
    .expect("valid certificate");
    assert!(alice_cert.human_handle.is_redacted());

    // A STANDARD author gets the real flavor
    let bundle = org
        .server
        .user
        .get_certificates(
            &org.id,
            org.alice.device_id,
            None,
            None,
            None,
            &HashMap::new(),
        )
        .await
        .expect("certificates");
    let alice_cert = UserCertificate::verify_and_load(
        &bundle.common[0],
        &org.root_key.verify_key(),
        CertificateSigner::Root,
        Some(org.alice.user_id),
    )
    .expect("valid certificate");
    assert!(!alice_cert.human_handle.is_redacted());
    assert_eq!(alice_cert.human_handle.as_ref().email(), "alice@example.com");

    // Incremental fetch: nothing newer than the last common timestamp
    let bundle = org
        .server
        .user
        .get_certificates(
            &org.id,
            org.alice.device_id,
            Some(t0().add_seconds(1)),
            None,
            None,
            &HashMap::new(),
        )
        .await
        .expect("certificates");
    assert!(bundle.common.is_empty());
}
