//! Integration test: vlob versioning, reads, change polling and block
//! storage.

mod common;

use parsec_server::components::block::{BlockCreateError, BlockReadError};
use parsec_server::components::vlob::{VlobCreateError, VlobUpdateError};
use parsec_server::ServerConfig;
use parsec_types::{BlockID, RealmRole, UserProfile, VlobID};

use common::{bootstrapped_org, bootstrapped_org_with, role_certificate, t0};

#[tokio::test]
async fn vlob_versions_are_dense() {
    let org = bootstrapped_org().await;
    let realm_id = org.new_realm(t0().add_seconds(1), &org.alice).await;
    let vlob_id = VlobID::generate();

    org.server
        .vlob
        .create(
            &org.id,
            t0().add_seconds(2),
            org.alice.device_id,
            realm_id,
            vlob_id,
            0,
            t0().add_seconds(2),
            b"v1".to_vec(),
            None,
        )
        .await
        .expect("vlob create");

    let outcome = org
        .server
        .vlob
        .create(
            &org.id,
            t0().add_seconds(3),
            org.alice.device_id,
            realm_id,
            vlob_id,
            0,
            t0().add_seconds(3),
            b"again".to_vec(),
            None,
        )
        .await;
    assert!(matches!(outcome, Err(VlobCreateError::VlobAlreadyExists)));

    org.server
        .vlob
        .update(
            &org.id,
            t0().add_seconds(4),
            org.alice.device_id,
            vlob_id,
            0,
            t0().add_seconds(4),
            2,
            b"v2".to_vec(),
            None,
        )
        .await
        .expect("vlob update");

    // Skipping or repeating a version breaks the dense sequence
    for bad_version in [2, 4] {
        let outcome = org
            .server
            .vlob
            .update(
                &org.id,
                t0().add_seconds(5),
                org.alice.device_id,
                vlob_id,
                0,
                t0().add_seconds(5),
                bad_version,
                b"bad".to_vec(),
                None,
            )
            .await;
        assert!(matches!(outcome, Err(VlobUpdateError::BadVersion)));
    }
}

#[tokio::test]
async fn reads_serve_latest_timestamped_and_pinned_versions() {
    let org = bootstrapped_org().await;
    let realm_id = org.new_realm(t0().add_seconds(1), &org.alice).await;
    let vlob_id = VlobID::generate();

    org.server
        .vlob
        .create(
            &org.id,
            t0().add_seconds(2),
            org.alice.device_id,
            realm_id,
            vlob_id,
            0,
            t0().add_seconds(2),
            b"v1".to_vec(),
            None,
        )
        .await
        .expect("create");
    org.server
        .vlob
        .update(
            &org.id,
            t0().add_seconds(3),
            org.alice.device_id,
            vlob_id,
            0,
            t0().add_seconds(3),
            2,
            b"v2".to_vec(),
            None,
        )
        .await
        .expect("update");

    let latest = org
        .server
        .vlob
        .read_batch(&org.id, org.alice.device_id, realm_id, &[vlob_id], None)
        .await
        .expect("read");
    assert_eq!(latest.items.len(), 1);
    let (id, key_index, author, version, timestamp, blob) = latest.items[0].clone();
    assert_eq!(id, vlob_id);
    assert_eq!(key_index, 0);
    assert_eq!(author, org.alice.device_id);
    assert_eq!(version, 2);
    assert_eq!(timestamp, t0().add_seconds(3));
    assert_eq!(blob, b"v2");

    // Timestamped read resolves to the version live at that instant
    let pinned = org
        .server
        .vlob
        .read_batch(
            &org.id,
            org.alice.device_id,
            realm_id,
            &[vlob_id],
            Some(t0().add_seconds(2)),
        )
        .await
        .expect("read at");
    assert_eq!(pinned.items[0].3, 1);
    assert_eq!(pinned.items[0].5, b"v1");

    // Unknown vlobs and version 0 are silently skipped
    let versions = org
        .server
        .vlob
        .read_versions(
            &org.id,
            org.alice.device_id,
            realm_id,
            &[(vlob_id, 1), (vlob_id, 0), (VlobID::generate(), 1)],
        )
        .await
        .expect("read versions");
    assert_eq!(versions.items.len(), 1);
    assert_eq!(versions.items[0].3, 1);
    assert_eq!(
        versions.needed_realm_certificate_timestamp,
        t0().add_seconds(1)
    );
}

#[tokio::test]
async fn poll_changes_reports_the_checkpoint_delta() {
    let org = bootstrapped_org().await;
    let realm_id = org.new_realm(t0().add_seconds(1), &org.alice).await;
    let first = VlobID::generate();
    let second = VlobID::generate();

    for (vlob_id, offset) in [(first, 2), (second, 3)] {
        org.server
            .vlob
            .create(
                &org.id,
                t0().add_seconds(offset),
                org.alice.device_id,
                realm_id,
                vlob_id,
                0,
                t0().add_seconds(offset),
                b"data".to_vec(),
                None,
            )
            .await
            .expect("create");
    }
    org.server
        .vlob
        .update(
            &org.id,
            t0().add_seconds(4),
            org.alice.device_id,
            first,
            0,
            t0().add_seconds(4),
            2,
            b"data2".to_vec(),
            None,
        )
        .await
        .expect("update");

    let changes = org
        .server
        .vlob
        .poll_changes(&org.id, org.alice.device_id, realm_id, 0)
        .await
        .expect("poll");
    assert_eq!(changes.current_checkpoint, 3);
    let mut expected = vec![(first, 2), (second, 1)];
    expected.sort();
    assert_eq!(changes.changes, expected);

    // Only writes past the client checkpoint are reported
    let changes = org
        .server
        .vlob
        .poll_changes(&org.id, org.alice.device_id, realm_id, 2)
        .await
        .expect("poll");
    assert_eq!(changes.current_checkpoint, 3);
    assert_eq!(changes.changes, vec![(first, 2)]);

    let changes = org
        .server
        .vlob
        .poll_changes(&org.id, org.alice.device_id, realm_id, 3)
        .await
        .expect("poll");
    assert!(changes.changes.is_empty());
}

#[tokio::test]
async fn readers_cannot_write_vlobs() {
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
        Some(RealmRole::Reader),
    );
    org.server
        .realm
        .share(
            &org.id,
            t0().add_seconds(3),
            org.alice.device_id,
            &grant,
            b"<access>",
            0,
        )
        .await
        .expect("share");

    let outcome = org
        .server
        .vlob
        .create(
            &org.id,
            t0().add_seconds(4),
            bob.device_id,
            realm_id,
            VlobID::generate(),
            0,
            t0().add_seconds(4),
            b"data".to_vec(),
            None,
        )
        .await;
    assert!(matches!(outcome, Err(VlobCreateError::AuthorNotAllowed)));

    // Reading is fine
    org.server
        .vlob
        .read_batch(&org.id, bob.device_id, realm_id, &[], None)
        .await
        .expect("read");
}

#[tokio::test]
async fn block_store_round_trip_and_size_limit() {
    let config = ServerConfig {
        block_max_size: 16,
        ..ServerConfig::default()
    };
    let org = bootstrapped_org_with(config).await;
    let realm_id = org.new_realm(t0().add_seconds(1), &org.alice).await;
    let block_id = BlockID::generate();

    org.server
        .block
        .create(
            &org.id,
            t0().add_seconds(2),
            org.alice.device_id,
            block_id,
            realm_id,
            0,
            b"small payload".to_vec(),
        )
        .await
        .expect("block create");

    let outcome = org
        .server
        .block
        .create(
            &org.id,
            t0().add_seconds(3),
            org.alice.device_id,
            block_id,
            realm_id,
            0,
            b"other".to_vec(),
        )
        .await;
    assert!(matches!(outcome, Err(BlockCreateError::BlockAlreadyExists)));

    let outcome = org
        .server
        .block
        .create(
            &org.id,
            t0().add_seconds(4),
            org.alice.device_id,
            BlockID::generate(),
            realm_id,
            0,
            vec![0u8; 17],
        )
        .await;
    assert!(matches!(outcome, Err(BlockCreateError::BlockTooLarge)));

    let read = org
        .server
        .block
        .read(&org.id, org.alice.device_id, block_id)
        .await
        .expect("block read");
    assert_eq!(read.block, b"small payload");
    assert_eq!(read.key_index, 0);

    let outcome = org
        .server
        .block
        .read(&org.id, org.alice.device_id, BlockID::generate())
        .await;
    assert!(matches!(outcome, Err(BlockReadError::BlockNotFound)));
}
