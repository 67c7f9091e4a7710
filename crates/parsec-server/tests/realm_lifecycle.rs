//! Integration test: realm creation, role grants, key rotation and keys
//! bundle distribution.

mod common;

use std::collections::HashMap;

use parsec_server::components::realm::{
    RealmGetKeysBundleError, RealmRenameError, RealmRotateKeyError, RealmShareError,
    RealmUnshareError,
};
use parsec_types::{RealmNameCertificate, RealmRole, UserProfile, VlobID};

use common::{bootstrapped_org, role_certificate, rotation_certificate, t0, TestDevice, TestOrg};

async fn share(
    org: &TestOrg,
    timestamp: parsec_types::DateTime,
    author: &TestDevice,
    realm_id: parsec_types::VlobID,
    recipient: &TestDevice,
    role: RealmRole,
    key_index: u64,
) -> Result<(), RealmShareError> {
    let certificate = role_certificate(author, timestamp, realm_id, recipient.user_id, Some(role));
    org.server
        .realm
        .share(
            &org.id,
            timestamp,
            author.device_id,
            &certificate,
            b"<keys bundle access>",
            key_index,
        )
        .await
}

#[tokio::test]
async fn share_and_role_matrix() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Standard,
        )
        .await;
    let carol = org
        .new_user(
            t0().add_seconds(2),
            "carol@example.com",
            "Caroly McCarolFace",
            UserProfile::Standard,
        )
        .await;
    let realm_id = org.new_realm(t0().add_seconds(3), &org.alice).await;

    share(
        &org,
        t0().add_seconds(4),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await
    .expect("share");

    // Granting the same role again is reported with the realm timeline
    let outcome = share(
        &org,
        t0().add_seconds(5),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await;
    assert!(matches!(
        outcome,
        Err(RealmShareError::RoleAlreadyGranted { .. })
    ));

    // A READER cannot share
    let outcome = share(
        &org,
        t0().add_seconds(6),
        &bob,
        realm_id,
        &carol,
        RealmRole::Reader,
        0,
    )
    .await;
    assert!(matches!(outcome, Err(RealmShareError::AuthorNotAllowed)));
}

#[tokio::test]
async fn outsiders_cannot_hold_management_roles() {
    let org = bootstrapped_org().await;
    let carol = org
        .new_user(
            t0().add_seconds(1),
            "carol@example.com",
            "Caroly McCarolFace",
            UserProfile::Outsider,
        )
        .await;
    let realm_id = org.new_realm(t0().add_seconds(2), &org.alice).await;

    let outcome = share(
        &org,
        t0().add_seconds(3),
        &org.alice,
        realm_id,
        &carol,
        RealmRole::Manager,
        0,
    )
    .await;
    assert!(matches!(
        outcome,
        Err(RealmShareError::RoleIncompatibleWithOutsider)
    ));

    share(
        &org,
        t0().add_seconds(4),
        &org.alice,
        realm_id,
        &carol,
        RealmRole::Reader,
        0,
    )
    .await
    .expect("outsider reader");
}

#[tokio::test]
async fn readers_cannot_rename() {
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
    share(
        &org,
        t0().add_seconds(3),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await
    .expect("share");

    let rename = RealmNameCertificate {
        author: bob.device_id,
        timestamp: t0().add_seconds(4),
        realm_id,
        key_index: 0,
        encrypted_name: b"<encrypted name>".to_vec(),
    }
    .dump_and_sign(&bob.signing_key);
    let outcome = org
        .server
        .realm
        .rename(&org.id, t0().add_seconds(4), bob.device_id, &rename, true)
        .await;
    assert!(matches!(outcome, Err(RealmRenameError::AuthorNotAllowed)));

    // The owner can, and the initial-name guard trips on the second one
    let rename = RealmNameCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(5),
        realm_id,
        key_index: 0,
        encrypted_name: b"<encrypted name>".to_vec(),
    }
    .dump_and_sign(&org.alice.signing_key);
    org.server
        .realm
        .rename(&org.id, t0().add_seconds(5), org.alice.device_id, &rename, true)
        .await
        .expect("initial rename");

    let rename = RealmNameCertificate {
        author: org.alice.device_id,
        timestamp: t0().add_seconds(6),
        realm_id,
        key_index: 0,
        encrypted_name: b"<another name>".to_vec(),
    }
    .dump_and_sign(&org.alice.signing_key);
    let outcome = org
        .server
        .realm
        .rename(&org.id, t0().add_seconds(6), org.alice.device_id, &rename, true)
        .await;
    assert!(matches!(
        outcome,
        Err(RealmRenameError::InitialNameAlreadyExists { .. })
    ));
}

#[tokio::test]
async fn key_rotation_gates_sharing_and_bundle_access() {
    let org = bootstrapped_org().await;
    let bob = org
        .new_user(
            t0().add_seconds(1),
            "bob@example.com",
            "Boby McBobFace",
            UserProfile::Standard,
        )
        .await;
    let carol = org
        .new_user(
            t0().add_seconds(2),
            "carol@example.com",
            "Caroly McCarolFace",
            UserProfile::Standard,
        )
        .await;
    let realm_id = org.new_realm(t0().add_seconds(3), &org.alice).await;
    share(
        &org,
        t0().add_seconds(4),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await
    .expect("share bob");

    // First rotation: key index 1, one access per current participant
    let mut accesses = HashMap::new();
    accesses.insert(org.alice.user_id, b"<alice access>".to_vec());
    accesses.insert(bob.user_id, b"<bob access>".to_vec());
    let rotation = rotation_certificate(&org.alice, t0().add_seconds(5), realm_id, 1);
    org.server
        .realm
        .rotate_key(
            &org.id,
            t0().add_seconds(5),
            org.alice.device_id,
            &rotation,
            accesses,
            b"<keys bundle v1>".to_vec(),
        )
        .await
        .expect("rotate");

    // Sharing must now reference key index 1
    let outcome = share(
        &org,
        t0().add_seconds(6),
        &org.alice,
        realm_id,
        &carol,
        RealmRole::Reader,
        0,
    )
    .await;
    assert!(matches!(outcome, Err(RealmShareError::BadKeyIndex { .. })));
    share(
        &org,
        t0().add_seconds(7),
        &org.alice,
        realm_id,
        &carol,
        RealmRole::Reader,
        1,
    )
    .await
    .expect("share carol");

    // Every member can fetch the bundle it has an access for
    let bundle = org
        .server
        .realm
        .get_keys_bundle(&org.id, carol.device_id, realm_id, 1)
        .await
        .expect("keys bundle");
    assert_eq!(bundle.keys_bundle, b"<keys bundle v1>");
    assert_eq!(bundle.keys_bundle_access, b"<keys bundle access>");

    let outcome = org
        .server
        .realm
        .get_keys_bundle(&org.id, carol.device_id, realm_id, 0)
        .await;
    assert!(matches!(outcome, Err(RealmGetKeysBundleError::BadKeyIndex)));
    let outcome = org
        .server
        .realm
        .get_keys_bundle(&org.id, carol.device_id, realm_id, 2)
        .await;
    assert!(matches!(outcome, Err(RealmGetKeysBundleError::BadKeyIndex)));

    // A rotation skipping an index or missing a participant is refused
    let rotation = rotation_certificate(&org.alice, t0().add_seconds(8), realm_id, 3);
    let outcome = org
        .server
        .realm
        .rotate_key(
            &org.id,
            t0().add_seconds(8),
            org.alice.device_id,
            &rotation,
            HashMap::new(),
            b"<keys bundle v3>".to_vec(),
        )
        .await;
    assert!(matches!(outcome, Err(RealmRotateKeyError::BadKeyIndex { .. })));

    let mut short_accesses = HashMap::new();
    short_accesses.insert(org.alice.user_id, b"<alice access>".to_vec());
    let rotation = rotation_certificate(&org.alice, t0().add_seconds(9), realm_id, 2);
    let outcome = org
        .server
        .realm
        .rotate_key(
            &org.id,
            t0().add_seconds(9),
            org.alice.device_id,
            &rotation,
            short_accesses,
            b"<keys bundle v2>".to_vec(),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(RealmRotateKeyError::ParticipantMismatch { .. })
    ));
}

#[tokio::test]
async fn unsharing_keeps_the_realm_owned() {
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
    share(
        &org,
        t0().add_seconds(3),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await
    .expect("share");

    // The only owner cannot leave
    let leave = role_certificate(
        &org.alice,
        t0().add_seconds(4),
        realm_id,
        org.alice.user_id,
        None,
    );
    let outcome = org
        .server
        .realm
        .unshare(&org.id, t0().add_seconds(4), org.alice.device_id, &leave)
        .await;
    assert!(matches!(
        outcome,
        Err(RealmUnshareError::LastOwnerCannotBeUnshared)
    ));

    let unshare = role_certificate(
        &org.alice,
        t0().add_seconds(5),
        realm_id,
        bob.user_id,
        None,
    );
    org.server
        .realm
        .unshare(&org.id, t0().add_seconds(5), org.alice.device_id, &unshare)
        .await
        .expect("unshare");

    let again = role_certificate(
        &org.alice,
        t0().add_seconds(6),
        realm_id,
        bob.user_id,
        None,
    );
    let outcome = org
        .server
        .realm
        .unshare(&org.id, t0().add_seconds(6), org.alice.device_id, &again)
        .await;
    assert!(matches!(
        outcome,
        Err(RealmUnshareError::RecipientAlreadyUnshared { .. })
    ));
}

#[tokio::test]
async fn vlob_activity_bounds_sharing() {
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

    org.server
        .vlob
        .create(
            &org.id,
            t0().add_seconds(100),
            org.alice.device_id,
            realm_id,
            VlobID::generate(),
            0,
            t0().add_seconds(100),
            b"manifest".to_vec(),
            None,
        )
        .await
        .expect("vlob create");

    // A grant antedating the realm's last vlob write is pushed forward
    let outcome = share(
        &org,
        t0().add_seconds(3),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await;
    assert!(matches!(
        outcome,
        Err(RealmShareError::RequireGreaterTimestamp { strictly_greater_than })
            if strictly_greater_than == t0().add_seconds(100)
    ));

    share(
        &org,
        t0().add_seconds(101),
        &org.alice,
        realm_id,
        &bob,
        RealmRole::Reader,
        0,
    )
    .await
    .expect("share after the write");
}
