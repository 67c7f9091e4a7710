//! Integration test: Shamir recovery setup, invitation, reveal and
//! deletion.

mod common;

use std::collections::HashSet;
use std::num::NonZeroU64;

use parsec_protocol::invite::InvitationInfo;
use parsec_server::components::invite::InviteNewShamirRecoveryError;
use parsec_server::components::shamir::{ShamirDeleteError, ShamirRevealError, ShamirSetupError};
use parsec_types::{
    DateTime, InvitationToken, ShamirRecoveryBriefCertificate, ShamirRecoveryDeletionCertificate,
    ShamirRecoveryShareCertificate, UserID, UserProfile,
};

use common::{bootstrapped_org, t0, TestDevice, TestOrg};

fn shares(n: u64) -> NonZeroU64 {
    NonZeroU64::new(n).expect("non-zero share count")
}

fn setup_certificates(
    author: &TestDevice,
    timestamp: DateTime,
    per_recipient_shares: &[(UserID, u64)],
) -> (Vec<u8>, Vec<Vec<u8>>) {
    let brief = ShamirRecoveryBriefCertificate {
        author: author.device_id,
        timestamp,
        user_id: author.user_id,
        threshold: shares(2),
        per_recipient_shares: per_recipient_shares
            .iter()
            .map(|(recipient, count)| (*recipient, shares(*count)))
            .collect(),
    }
    .dump_and_sign(&author.signing_key);
    let share_certs = per_recipient_shares
        .iter()
        .map(|(recipient, _)| {
            ShamirRecoveryShareCertificate {
                author: author.device_id,
                timestamp,
                user_id: author.user_id,
                recipient: *recipient,
                ciphered_share: b"<ciphered share>".to_vec(),
            }
            .dump_and_sign(&author.signing_key)
        })
        .collect();
    (brief, share_certs)
}

async fn set_up_recovery(
    org: &TestOrg,
    author: &TestDevice,
    timestamp: DateTime,
    recipients: &[(UserID, u64)],
) -> InvitationToken {
    let (brief, share_certs) = setup_certificates(author, timestamp, recipients);
    let reveal_token = InvitationToken::generate();
    org.server
        .shamir
        .setup(
            &org.id,
            timestamp,
            author.device_id,
            &brief,
            &share_certs,
            reveal_token,
            b"<ciphered recovery data>".to_vec(),
        )
        .await
        .expect("shamir setup");
    reveal_token
}

#[tokio::test]
async fn setup_validates_recipients_and_shares() {
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

    // The protected user cannot hold one of its own shares
    let (brief, share_certs) = setup_certificates(
        &bob,
        t0().add_seconds(3),
        &[(bob.user_id, 1), (org.alice.user_id, 1)],
    );
    let outcome = org
        .server
        .shamir
        .setup(
            &org.id,
            t0().add_seconds(3),
            bob.device_id,
            &brief,
            &share_certs,
            InvitationToken::generate(),
            b"<data>".to_vec(),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(ShamirSetupError::AuthorIncludedAsRecipient)
    ));

    // Shares must cover exactly the brief's recipients
    let (brief, _) = setup_certificates(
        &bob,
        t0().add_seconds(3),
        &[(org.alice.user_id, 1), (carol.user_id, 1)],
    );
    let (_, partial_shares) =
        setup_certificates(&bob, t0().add_seconds(3), &[(org.alice.user_id, 1)]);
    let outcome = org
        .server
        .shamir
        .setup(
            &org.id,
            t0().add_seconds(3),
            bob.device_id,
            &brief,
            &partial_shares,
            InvitationToken::generate(),
            b"<data>".to_vec(),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(ShamirSetupError::ShareRecipientsMismatch)
    ));

    set_up_recovery(
        &org,
        &bob,
        t0().add_seconds(3),
        &[(org.alice.user_id, 1), (carol.user_id, 1)],
    )
    .await;

    // Only one live setup per user
    let (brief, share_certs) = setup_certificates(
        &bob,
        t0().add_seconds(4),
        &[(org.alice.user_id, 1), (carol.user_id, 1)],
    );
    let outcome = org
        .server
        .shamir
        .setup(
            &org.id,
            t0().add_seconds(4),
            bob.device_id,
            &brief,
            &share_certs,
            InvitationToken::generate(),
            b"<data>".to_vec(),
        )
        .await;
    assert!(matches!(
        outcome,
        Err(ShamirSetupError::ShamirRecoveryAlreadyExists { .. })
    ));
}

#[tokio::test]
async fn recovery_invitation_and_reveal() {
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
    let reveal_token = set_up_recovery(
        &org,
        &bob,
        t0().add_seconds(3),
        &[(org.alice.user_id, 1), (carol.user_id, 2)],
    )
    .await;

    // Only share recipients may open the recovery
    let outcome = org
        .server
        .invite
        .new_for_shamir_recovery(&org.id, t0().add_seconds(4), bob.device_id, bob.user_id)
        .await;
    assert!(matches!(
        outcome,
        Err(InviteNewShamirRecoveryError::AuthorNotAllowed)
    ));

    let token = org
        .server
        .invite
        .new_for_shamir_recovery(&org.id, t0().add_seconds(4), carol.device_id, bob.user_id)
        .await
        .expect("shamir invitation");

    let info = org.server.invite.info(&org.id, token).await.expect("info");
    match info {
        InvitationInfo::ShamirRecovery {
            claimer_user_id,
            threshold,
            recipients,
            ..
        } => {
            assert_eq!(claimer_user_id, bob.user_id);
            assert_eq!(threshold, 2);
            assert_eq!(recipients.len(), 2);
            let carol_entry = recipients
                .iter()
                .find(|recipient| recipient.user_id == carol.user_id)
                .expect("carol listed");
            assert_eq!(carol_entry.shares, 2);
        }
        other => unreachable!("expected a shamir invitation, got {other:?}"),
    }

    let outcome = org
        .server
        .shamir
        .reveal(&org.id, token, InvitationToken::generate())
        .await;
    assert!(matches!(outcome, Err(ShamirRevealError::BadRevealToken)));

    let data = org
        .server
        .shamir
        .reveal(&org.id, token, reveal_token)
        .await
        .expect("reveal");
    assert_eq!(data, b"<ciphered recovery data>");
}

#[tokio::test]
async fn deletion_voids_the_setup() {
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
    let reveal_token = set_up_recovery(
        &org,
        &bob,
        t0().add_seconds(3),
        &[(org.alice.user_id, 1), (carol.user_id, 1)],
    )
    .await;
    let token = org
        .server
        .invite
        .new_for_shamir_recovery(&org.id, t0().add_seconds(4), carol.device_id, bob.user_id)
        .await
        .expect("shamir invitation");

    // The deletion certificate must name the exact recipient set
    let wrong_recipients = ShamirRecoveryDeletionCertificate {
        author: bob.device_id,
        timestamp: t0().add_seconds(5),
        setup_to_delete_timestamp: t0().add_seconds(3),
        setup_to_delete_user_id: bob.user_id,
        share_recipients: HashSet::from([org.alice.user_id]),
    }
    .dump_and_sign(&bob.signing_key);
    let outcome = org
        .server
        .shamir
        .delete(
            &org.id,
            t0().add_seconds(5),
            bob.device_id,
            &wrong_recipients,
        )
        .await;
    assert!(matches!(outcome, Err(ShamirDeleteError::RecipientsMismatch)));

    let deletion = ShamirRecoveryDeletionCertificate {
        author: bob.device_id,
        timestamp: t0().add_seconds(5),
        setup_to_delete_timestamp: t0().add_seconds(3),
        setup_to_delete_user_id: bob.user_id,
        share_recipients: HashSet::from([org.alice.user_id, carol.user_id]),
    }
    .dump_and_sign(&bob.signing_key);
    org.server
        .shamir
        .delete(&org.id, t0().add_seconds(5), bob.device_id, &deletion)
        .await
        .expect("delete");

    let outcome = org
        .server
        .shamir
        .delete(&org.id, t0().add_seconds(6), bob.device_id, &deletion)
        .await;
    assert!(matches!(
        outcome,
        Err(ShamirDeleteError::ShamirRecoveryAlreadyDeleted { .. })
    ));

    // The reveal token dies with the setup
    let outcome = org.server.shamir.reveal(&org.id, token, reveal_token).await;
    assert!(matches!(outcome, Err(ShamirRevealError::BadRevealToken)));

    // And a fresh setup can then be installed
    set_up_recovery(
        &org,
        &bob,
        t0().add_seconds(7),
        &[(org.alice.user_id, 1), (carol.user_id, 1)],
    )
    .await;
}
