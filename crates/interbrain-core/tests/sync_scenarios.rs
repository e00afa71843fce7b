mod common;

use std::time::{Duration, Instant};

use common::{follow_all, shared_node, test_config, Peer};
use interbrain_core::{Decision, DecisionOutcome, InterbrainError, SyncConfig};
use interbrain_shared::constants::{DESCRIPTOR_FILE, WRITER_REMOTE};
use interbrain_shared::{Identity, Rid};
use interbrain_vcs::{IntegrationOutcome, SimHub};

fn hashes(preview: &interbrain_core::SyncPreview, peer: &interbrain_shared::PeerId) -> Vec<String> {
    preview
        .candidates_from(peer)
        .iter()
        .map(|c| c.original_hash.to_string())
        .collect()
}

#[tokio::test]
async fn test_three_peer_cycle_settles() {
    let hub = SimHub::new();
    let (a, b, c) = (Peer::new(&hub), Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b, &c]).await;
    let rid = shared_node(&a, &[&b, &c], "Commons").await;

    let a1 = a.author(&rid, "a.md", "from a").await;
    let b1 = b.author(&rid, "b.md", "from b").await;
    let c1 = c.author(&rid, "c.md", "from c").await;

    // A takes B's change and declines C's.
    let preview = a.c.sync().preview(&rid).await.unwrap();
    assert_eq!(hashes(&preview, &b.id), vec![b1.to_string()]);
    assert_eq!(hashes(&preview, &c.id), vec![c1.to_string()]);
    let accepted = a.c.sync().accept_change(&rid, &b.id, &b1).await.unwrap();
    assert!(matches!(accepted, DecisionOutcome::Recorded { decision: Decision::Accepted, applied: Some(_), published: true }));
    a.c.sync().reject_change(&rid, &c.id, &c1).await.unwrap();

    // B takes C's change and declines A's; B's own change comes back
    // relayed through A and is recognised.
    let preview = b.c.sync().preview(&rid).await.unwrap();
    assert_eq!(hashes(&preview, &a.id), vec![a1.to_string()]);
    assert_eq!(hashes(&preview, &c.id), vec![c1.to_string()]);
    b.c.sync().accept_change(&rid, &c.id, &c1).await.unwrap();
    b.c.sync().reject_change(&rid, &a.id, &a1).await.unwrap();

    // C takes A's change and declines B's, which reaches C twice.
    let preview = c.c.sync().preview(&rid).await.unwrap();
    assert_eq!(hashes(&preview, &a.id), vec![a1.to_string(), b1.to_string()]);
    assert_eq!(hashes(&preview, &b.id), vec![b1.to_string()]);
    assert!(preview.candidates_from(&a.id)[1].relayed);
    c.c.sync().accept_change(&rid, &a.id, &a1).await.unwrap();
    c.c.sync().reject_change(&rid, &b.id, &b1).await.unwrap();

    for peer in [&a, &b, &c] {
        let preview = peer.c.sync().preview(&rid).await.unwrap();
        assert_eq!(preview.candidate_count(), 0, "{} still sees candidates", peer.id.short());
        assert_eq!(preview.failure_count(), 0);
    }

    // Re-issuing every decision changes nothing.
    let integrations = hub.integration_count();
    let ledgers = (a.ledger_len(&b.id, &rid).await, a.ledger_len(&c.id, &rid).await);
    assert_eq!(ledgers, (1, 1));
    assert!(matches!(
        a.c.sync().accept_change(&rid, &b.id, &b1).await.unwrap(),
        DecisionOutcome::AlreadyDecided { .. }
    ));
    assert!(matches!(
        a.c.sync().reject_change(&rid, &c.id, &c1).await.unwrap(),
        DecisionOutcome::AlreadyDecided { .. }
    ));
    // accepting what was rejected keeps the rejection
    match a.c.sync().accept_change(&rid, &c.id, &c1).await.unwrap() {
        DecisionOutcome::AlreadyDecided { entry } => assert_eq!(entry.decision, Decision::Rejected),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(hub.integration_count(), integrations);
    assert_eq!((a.ledger_len(&b.id, &rid).await, a.ledger_len(&c.id, &rid).await), ledgers);

    let path = a.path_of(&rid);
    assert!(path.join("b.md").exists());
    assert!(!path.join("c.md").exists());

    // discovery linked each collaborator's contact to the node
    assert!(a.c.contacts().relationships(&b.id).await.unwrap().contains(&rid));
    assert!(a.c.contacts().relationships(&c.id).await.unwrap().contains(&rid));
}

#[tokio::test]
async fn test_rejected_change_does_not_return_through_relay() {
    let hub = SimHub::new();
    let (a, b, c) = (Peer::new(&hub), Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b, &c]).await;
    let rid = shared_node(&a, &[&b, &c], "Relay").await;

    let c1 = c.author(&rid, "c.md", "from c").await;
    a.c.sync().preview(&rid).await.unwrap();
    a.c.sync().reject_change(&rid, &c.id, &c1).await.unwrap();

    // B picks the change up and republishes it under a new hash.
    b.c.sync().preview(&rid).await.unwrap();
    b.c.sync().accept_change(&rid, &c.id, &c1).await.unwrap();

    for _ in 0..2 {
        let preview = a.c.sync().preview(&rid).await.unwrap();
        assert_eq!(preview.candidate_count(), 0);
    }

    let relayed = b.c.vault().gateway().vcs().head(&b.path_of(&rid)).await.unwrap().unwrap();
    match a.c.sync().accept_change(&rid, &b.id, &relayed).await.unwrap() {
        DecisionOutcome::AlreadyDecided { entry } => {
            assert_eq!(entry.original_hash, c1);
            assert_eq!(entry.decision, Decision::Rejected);
        }
        other => panic!("unexpected {other:?}"),
    }
    assert!(!a.path_of(&rid).join("c.md").exists());
}

#[tokio::test]
async fn test_content_conflict_stays_pending() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[&b], "Contested").await;

    a.author(&rid, "notes.md", "a's version").await;
    let theirs = b.author(&rid, "notes.md", "b's version").await;

    a.c.sync().preview(&rid).await.unwrap();
    match a.c.sync().accept_change(&rid, &b.id, &theirs).await {
        Err(InterbrainError::MergeConflict { files }) => assert_eq!(files, vec!["notes.md".to_string()]),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(a.ledger_len(&b.id, &rid).await, 0);
    let preview = a.c.sync().preview(&rid).await.unwrap();
    assert_eq!(preview.candidates_from(&b.id).len(), 1);
    assert_eq!(
        std::fs::read_to_string(a.path_of(&rid).join("notes.md")).unwrap(),
        "a's version"
    );
}

#[tokio::test]
async fn test_descriptor_conflict_resolved_on_accept() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[&b], "Named").await;

    let edit = |peer: &Peer, title: &str, relationships: Vec<Rid>| {
        let path = peer.path_of(&rid);
        let mut d = interbrain_shared::Descriptor::from_json(&std::fs::read(path.join(DESCRIPTOR_FILE)).unwrap()).unwrap();
        d.title = title.into();
        d.relationships = relationships;
        std::fs::write(path.join(DESCRIPTOR_FILE), d.to_json()).unwrap();
        path
    };

    let mine = vec![Rid::new("rad:zmine")];
    let path = edit(&a, "Local name", mine.clone());
    a.c.vault().gateway().vcs().commit(&path, "Rename").await.unwrap().unwrap();

    let path = edit(&b, "Their name", vec![Rid::new("rad:ztheirs")]);
    let vcs = b.c.vault().gateway().vcs();
    let theirs = vcs.commit(&path, "Rename").await.unwrap().unwrap();
    b.c.vault().gateway().publish(&path, &rid).await.unwrap();

    a.c.sync().preview(&rid).await.unwrap();
    a.c.sync().accept_change(&rid, &b.id, &theirs).await.unwrap();

    let (_, merged) = a.c.vault().load_descriptor(&rid).await.unwrap();
    assert_eq!(merged.title, "Their name");
    assert_eq!(merged.relationships, mine);
}

#[tokio::test]
async fn test_accept_needs_delegate_status() {
    let hub = SimHub::new();
    let (a, reader) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &reader]).await;
    let rid = shared_node(&a, &[], "Owned").await;
    reader.c.vault().clone_node(&rid, &a.id, None).await.unwrap();

    let change = a.author(&rid, "owned.md", "mine").await;
    let preview = reader.c.sync().preview(&rid).await.unwrap();
    assert_eq!(preview.candidates_from(&a.id).len(), 1);

    assert!(matches!(
        reader.c.sync().accept_change(&rid, &a.id, &change).await,
        Err(InterbrainError::AuthorizationDenied(_))
    ));
    // rejecting needs no authority and touches no history
    reader.c.sync().reject_change(&rid, &a.id, &change).await.unwrap();
    assert_eq!(reader.c.sync().preview(&rid).await.unwrap().candidate_count(), 0);
}

#[tokio::test]
async fn test_unreachable_fork_is_isolated() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[&b], "Partial").await;

    let ghost = Identity::generate().peer_id();
    a.c.trust().follow(&ghost).await.unwrap();
    a.c.trust().add_delegate(&rid, &ghost, 1).await.unwrap();
    let change = b.author(&rid, "b.md", "hello").await;

    let preview = a.c.sync().preview(&rid).await.unwrap();
    assert_eq!(preview.peers.len(), 2);
    assert_eq!(preview.failure_count(), 1);
    assert_eq!(hashes(&preview, &b.id), vec![change.to_string()]);

    let run = a.c.record_run(&preview).unwrap();
    assert_eq!((run.peers_asked, run.candidates, run.failures), (2, 1, 1));
    let runs = a.c.recent_runs(&rid, 5).unwrap();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].id, run.id);
}

#[tokio::test]
async fn test_corrupt_ledger_blocks_preview() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[&b], "Guarded").await;

    let change = b.author(&rid, "b.md", "hello").await;
    a.c.sync().preview(&rid).await.unwrap();
    a.c.sync().reject_change(&rid, &b.id, &change).await.unwrap();

    let contact = a.c.contacts().contact_for(&b.id).unwrap().unwrap();
    std::fs::write(
        contact.path.join(interbrain_shared::constants::LEDGER_FILE),
        b"\x00garbage",
    )
    .unwrap();

    assert!(matches!(
        a.c.sync().preview(&rid).await,
        Err(InterbrainError::LedgerCorruption { .. })
    ));
    assert!(matches!(
        a.c.sync().accept_change(&rid, &b.id, &change).await,
        Err(InterbrainError::LedgerCorruption { .. })
    ));

    // after explicit repair the forgotten change is offered again
    a.c.memory().quarantine(&b.id).await.unwrap().unwrap();
    let preview = a.c.sync().preview(&rid).await.unwrap();
    assert_eq!(hashes(&preview, &b.id), vec![change.to_string()]);
}

#[tokio::test]
async fn test_failed_publish_keeps_the_acceptance() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[&b], "Offline").await;
    let change = b.author(&rid, "b.md", "from b").await;

    let path = a.path_of(&rid);
    let gateway = a.c.vault().gateway();
    let writer = gateway.network().writer_url(&rid).await.unwrap();
    gateway.vcs().add_remote(&path, WRITER_REMOTE, "file:///unreachable").await.unwrap();

    a.c.sync().preview(&rid).await.unwrap();
    match a.c.sync().accept_change(&rid, &b.id, &change).await.unwrap() {
        DecisionOutcome::Recorded {
            decision: Decision::Accepted,
            applied: Some(applied),
            published: false,
        } => assert_ne!(hub.published_tip(&writer), Some(applied)),
        other => panic!("unexpected {other:?}"),
    }
    assert!(path.join("b.md").exists());
    assert_eq!(a.ledger_len(&b.id, &rid).await, 1);
    assert_eq!(a.c.sync().preview(&rid).await.unwrap().candidate_count(), 0);

    // once the writer copy is reachable again, re-accepting publishes
    gateway.vcs().add_remote(&path, WRITER_REMOTE, &writer).await.unwrap();
    let integrations = hub.integration_count();
    assert!(matches!(
        a.c.sync().accept_change(&rid, &b.id, &change).await.unwrap(),
        DecisionOutcome::AlreadyDecided { .. }
    ));
    assert_eq!(hub.integration_count(), integrations);
    assert_eq!(hub.published_tip(&writer), gateway.vcs().head(&path).await.unwrap());
    assert_eq!(a.ledger_len(&b.id, &rid).await, 1);
}

#[tokio::test]
async fn test_stalled_peer_does_not_hold_up_the_others() {
    let hub = SimHub::new();
    let a = Peer::with_config(
        &hub,
        SyncConfig {
            fetch_timeout: Duration::from_millis(200),
            ..test_config()
        },
    );
    let (b, c) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b, &c]).await;
    let rid = shared_node(&a, &[&b, &c], "Patchy").await;

    let change = b.author(&rid, "b.md", "from b").await;
    c.author(&rid, "c.md", "from c").await;
    hub.stall(&c.id);

    let started = Instant::now();
    let preview = tokio::time::timeout(Duration::from_secs(5), a.c.sync().preview(&rid))
        .await
        .expect("preview hung on the stalled peer")
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(5));

    assert_eq!(hashes(&preview, &b.id), vec![change.to_string()]);
    let stalled = preview.peers.iter().find(|p| p.peer == c.id).unwrap();
    assert!(stalled.error.is_some());
    assert!(stalled.candidates.is_empty());
    assert_eq!(preview.failure_count(), 1);
}

#[tokio::test]
async fn test_merge_commits_are_not_offered() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[&b], "Merged").await;

    a.author(&rid, "a.md", "from a").await;
    let change = b.author(&rid, "b.md", "from b").await;

    // B merges A's fork instead of picking from it
    let path = b.path_of(&rid);
    let gateway = b.c.vault().gateway();
    let tracking = gateway.fetch_peer_fork(&path, &rid, &a.id).await.unwrap();
    assert!(matches!(
        gateway.merge_with_policy(&path, &tracking).await.unwrap(),
        IntegrationOutcome::Applied { .. }
    ));
    gateway.publish(&path, &rid).await.unwrap();

    let preview = a.c.sync().preview(&rid).await.unwrap();
    assert_eq!(hashes(&preview, &b.id), vec![change.to_string()]);
    assert_eq!(preview.failure_count(), 0);
}
