mod common;

use common::{write, Peer};
use interbrain_core::InterbrainError;
use interbrain_shared::constants::DESCRIPTOR_FILE;
use interbrain_shared::{Identity, Rid};
use interbrain_vcs::SimHub;

fn canvas(files: &[&str]) -> String {
    let nodes: Vec<String> = files
        .iter()
        .enumerate()
        .map(|(i, f)| format!(r#"{{"id":"{i}","type":"file","file":"{f}","x":0,"y":0,"width":400,"height":300}}"#))
        .collect();
    format!(r#"{{"nodes":[{}],"edges":[]}}"#, nodes.join(","))
}

async fn descriptor(peer: &Peer, rid: &Rid) -> interbrain_shared::Descriptor {
    peer.c.vault().load_descriptor(rid).await.unwrap().1
}

#[tokio::test]
async fn test_composition_is_bidirectional_and_converges() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    me.author(&child.rid, "diagram.png", "png bytes").await;
    write(&parent.path, "board.canvas", &canvas(&["Child/diagram.png", "Parent/notes.md"]));
    write(&parent.path, "notes.md", "see the diagram");

    let composer = me.c.composer();
    let analysis = composer.analyze_dependencies("Parent/board.canvas".as_ref()).await.unwrap();
    assert_eq!(analysis.owning_node.rid, parent.rid);
    assert_eq!(analysis.declared_refs, vec!["Child/diagram.png", "Parent/notes.md"]);
    assert_eq!(analysis.external_refs.len(), 1);
    assert_eq!(analysis.external_refs[0].node.rid, child.rid);
    assert!(analysis.nested_refs.is_empty());

    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
    assert_eq!(report.added, vec![child.rid.clone()]);
    assert_eq!(report.rewritten, 1);

    assert!(descriptor(&me, &parent.rid).await.submodules.contains(&child.rid));
    assert!(descriptor(&me, &child.rid).await.supermodules.contains(&parent.rid));
    assert!(parent.path.join("Child").join(DESCRIPTOR_FILE).exists());
    let text = std::fs::read_to_string(parent.path.join("board.canvas")).unwrap();
    assert!(text.contains("Parent/Child/diagram.png"));

    let vcs = me.c.vault().gateway().vcs();
    let history = vcs.log(&parent.path, "HEAD").await.unwrap();
    let beacons: Vec<_> = history.iter().flat_map(|e| e.beacons()).collect();
    assert_eq!(beacons.len(), 1);
    assert_eq!(beacons[0].rid, child.rid);

    // re-running on the rewritten content finds the child nested and
    // changes nothing
    let head = vcs.head(&parent.path).await.unwrap();
    let again = composer.analyze_dependencies("Parent/board.canvas".as_ref()).await.unwrap();
    assert!(again.external_refs.is_empty());
    assert_eq!(again.nested_refs.len(), 1);
    assert_eq!(again.nested_refs[0].submodule_path, "Child");
    let report = composer.sync_dependencies(&parent.rid, &again).await.unwrap();
    assert!(report.added.is_empty() && report.removed.is_empty() && report.commits.is_empty());
    assert_eq!(vcs.head(&parent.path).await.unwrap(), head);

    // so does replaying the original analysis
    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
    assert!(report.commits.is_empty());
}

#[tokio::test]
async fn test_half_finished_composition_is_repaired() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    me.author(&child.rid, "a.md", "child").await;
    write(&parent.path, "index.md", "![[Child/a.md]]");

    let composer = me.c.composer();
    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();

    // lose the child-side back-reference, as if interrupted half way
    let mut d = descriptor(&me, &child.rid).await;
    assert!(d.remove_parent(&parent.rid));
    me.c.vault().gateway().write_descriptor(&child.path, &d).await.unwrap();

    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
    assert_eq!(report.repaired, vec![child.rid.clone()]);
    assert!(descriptor(&me, &child.rid).await.supermodules.contains(&parent.rid));

    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
    assert!(report.repaired.is_empty());
}

#[tokio::test]
async fn test_unreferenced_child_is_removed_from_both_sides() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    me.author(&child.rid, "a.md", "child").await;
    write(&parent.path, "index.md", "[[Child/a.md]]");

    let composer = me.c.composer();
    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();

    write(&parent.path, "index.md", "nothing to see");
    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    assert!(analysis.declared_refs.is_empty());
    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
    assert_eq!(report.removed, vec![child.rid.clone()]);

    assert!(!parent.path.join("Child").exists());
    assert!(!descriptor(&me, &parent.rid).await.submodules.contains(&child.rid));
    assert!(!descriptor(&me, &child.rid).await.supermodules.contains(&parent.rid));
    let vcs = me.c.vault().gateway().vcs();
    assert!(vcs.list_submodules(&parent.path).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_analysis_must_match_node() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let other = me.c.vault().create_node("Other").await.unwrap();
    write(&parent.path, "index.md", "plain");

    let analysis = me
        .c
        .composer()
        .analyze_dependencies(&parent.path.join("index.md"))
        .await
        .unwrap();
    assert!(matches!(
        me.c.composer().sync_dependencies(&other.rid, &analysis).await,
        Err(interbrain_core::InterbrainError::InvalidInput(_))
    ));
    assert!(me
        .c
        .composer()
        .analyze_dependencies("Parent/image.png".as_ref())
        .await
        .is_err());
}

#[tokio::test]
async fn test_transient_import_failure_is_retried() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    me.author(&child.rid, "a.md", "child").await;
    write(&parent.path, "index.md", "[[Child/a.md]]");

    let composer = me.c.composer();
    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    hub.fail_imports(1);
    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();

    assert_eq!(report.added, vec![child.rid.clone()]);
    assert!(descriptor(&me, &parent.rid).await.submodules.contains(&child.rid));
    assert!(descriptor(&me, &child.rid).await.supermodules.contains(&parent.rid));
    assert_eq!(
        me.c.vault().gateway().vcs().list_submodules(&parent.path).await.unwrap().len(),
        1
    );
}

#[tokio::test]
async fn test_exhausted_import_failure_leaves_no_half_link() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    me.author(&child.rid, "a.md", "child").await;
    write(&parent.path, "index.md", "[[Child/a.md]]");

    let composer = me.c.composer();
    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    hub.fail_imports(2);
    match composer.sync_dependencies(&parent.rid, &analysis).await {
        Err(InterbrainError::PartialCompositionFailure { child: failed, .. }) => assert_eq!(failed, child.rid),
        other => panic!("unexpected {other:?}"),
    }
    assert!(!descriptor(&me, &parent.rid).await.submodules.contains(&child.rid));
    assert!(!descriptor(&me, &child.rid).await.supermodules.contains(&parent.rid));

    // the child came back; re-running converges
    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
    assert_eq!(report.added, vec![child.rid.clone()]);
    assert!(descriptor(&me, &child.rid).await.supermodules.contains(&parent.rid));
}

#[tokio::test]
async fn test_never_imported_child_is_dropped_from_both_sides() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    let gateway = me.c.vault().gateway();

    // both sides list each other, but nothing was ever imported
    let mut d = descriptor(&me, &parent.rid).await;
    d.add_child(&child.rid);
    gateway.write_descriptor(&parent.path, &d).await.unwrap();
    let mut d = descriptor(&me, &child.rid).await;
    d.add_parent(&parent.rid);
    gateway.write_descriptor(&child.path, &d).await.unwrap();
    write(&parent.path, "index.md", "nothing to see");

    let composer = me.c.composer();
    let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
    let report = composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();

    assert_eq!(report.removed, vec![child.rid.clone()]);
    assert!(descriptor(&me, &parent.rid).await.submodules.is_empty());
    assert!(descriptor(&me, &child.rid).await.supermodules.is_empty());
}

#[tokio::test]
async fn test_composition_never_shrinks_relationships() {
    let hub = SimHub::new();
    let me = Peer::new(&hub);
    let parent = me.c.vault().create_node("Parent").await.unwrap();
    let child = me.c.vault().create_node("Child").await.unwrap();
    me.author(&child.rid, "a.md", "child").await;

    let friend = Identity::generate().peer_id();
    me.c.contacts().link(&friend, &parent.rid).await.unwrap();
    me.c.contacts().link(&friend, &child.rid).await.unwrap();
    let mut d = descriptor(&me, &parent.rid).await;
    d.relationships = vec![Rid::new("rad:zfriend")];
    me.c.vault().gateway().write_descriptor(&parent.path, &d).await.unwrap();

    let composer = me.c.composer();
    let mut record = me.c.contacts().relationships(&friend).await.unwrap().relationships;
    let mut private = descriptor(&me, &parent.rid).await.relationships;

    for content in ["[[Child/a.md]]", "nothing", "[[Child/a.md]]"] {
        write(&parent.path, "index.md", content);
        let analysis = composer.analyze_dependencies("Parent/index.md".as_ref()).await.unwrap();
        composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();
        composer.sync_dependencies(&parent.rid, &analysis).await.unwrap();

        let now = me.c.contacts().relationships(&friend).await.unwrap().relationships;
        assert!(record.iter().all(|rid| now.contains(rid)), "{content}: {now:?}");
        record = now;
        let now = descriptor(&me, &parent.rid).await.relationships;
        assert!(private.iter().all(|rid| now.contains(rid)), "{content}: {now:?}");
        private = now;
    }
    assert_eq!(record, vec![parent.rid.clone(), child.rid.clone()]);
    assert_eq!(private, vec![Rid::new("rad:zfriend")]);
}
