mod common;

use common::{follow_all, shared_node, Peer};
use interbrain_core::InterbrainError;
use interbrain_shared::{Identity, ShareLink};
use interbrain_vcs::SimHub;

#[tokio::test]
async fn test_share_link_introduces_sender() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    follow_all(&[&a, &b]).await;
    let rid = shared_node(&a, &[], "Gift").await;

    let uri = a.c.share_link(&a.identity, Some("Ada".into()), vec![rid.clone()]).await.unwrap();
    let received = b.c.receive_share_link(&uri).await.unwrap();
    assert_eq!(received.sender, a.id);
    assert_eq!(received.rids, vec![rid.clone()]);
    assert_eq!(received.added, 1);
    assert_eq!(received.contact.title, "Ada");

    // receiving twice is harmless
    let again = b.c.receive_share_link(&uri).await.unwrap();
    assert_eq!(again.added, 0);
    assert_eq!(again.contact.rid, received.contact.rid);

    let record = b.c.contacts().relationships(&a.id).await.unwrap();
    assert_eq!(record.relationships, vec![rid.clone()]);

    // the contact descriptor mirrors the record
    let (_, contact) = b.c.vault().load_descriptor(&received.contact.rid).await.unwrap();
    assert_eq!(contact.relationships, vec![rid.clone()]);
    assert_eq!(contact.peer.as_ref(), Some(&a.id));

    // the shared node can now be cloned from the sender
    b.c.vault().clone_node(&rid, &received.sender, None).await.unwrap();
}

#[tokio::test]
async fn test_own_link_refused() {
    let hub = SimHub::new();
    let a = Peer::new(&hub);
    let rid = shared_node(&a, &[], "Mine").await;
    let uri = a.c.share_link(&a.identity, None, vec![rid]).await.unwrap();
    assert!(matches!(
        a.c.receive_share_link(&uri).await,
        Err(InterbrainError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_link_names_the_network_peer_not_the_signer() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    let rid = shared_node(&a, &[], "Gift").await;

    // the daemon key is not the key the network knows this peer by
    let daemon = Identity::generate();
    assert_ne!(daemon.peer_id(), a.id);
    let uri = a.c.share_link(&daemon, None, vec![rid.clone()]).await.unwrap();

    let link = ShareLink::decode(&uri).unwrap();
    assert_eq!(link.payload.sender, a.id);
    assert_eq!(link.payload.signer, daemon.peer_id());

    let received = b.c.receive_share_link(&uri).await.unwrap();
    assert_eq!(received.sender, a.id);
    assert!(b.c.contacts().contact_for(&daemon.peer_id()).unwrap().is_none());
    b.c.vault().clone_node(&rid, &received.sender, None).await.unwrap();

    // the sender's own link is recognised by network id
    assert!(matches!(
        a.c.receive_share_link(&uri).await,
        Err(InterbrainError::InvalidInput(_))
    ));
}

#[tokio::test]
async fn test_relationships_only_grow_by_sync() {
    let hub = SimHub::new();
    let (a, b) = (Peer::new(&hub), Peer::new(&hub));
    let contacts = a.c.contacts();
    let (x, y) = (interbrain_shared::Rid::new("rad:zx"), interbrain_shared::Rid::new("rad:zy"));

    assert_eq!(contacts.sync_relationships(&b.id, &[x.clone(), y.clone()]).await.unwrap(), 2);
    assert_eq!(contacts.sync_relationships(&b.id, &[]).await.unwrap(), 0);
    assert_eq!(contacts.sync_relationships(&b.id, &[y.clone()]).await.unwrap(), 0);
    assert_eq!(contacts.relationships(&b.id).await.unwrap().relationships, vec![x.clone(), y.clone()]);

    assert!(contacts.unlink(&b.id, &x).await.unwrap());
    assert_eq!(contacts.relationships(&b.id).await.unwrap().relationships, vec![y]);
}
