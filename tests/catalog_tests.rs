mod common;

use common::{TestDrive, body};
use matter_drive::{DriveError, models::matter::MatterKind};
use proptest::prelude::*;
use uuid::Uuid;

#[tokio::test]
async fn root_is_created_once_per_owner() {
    let drive = TestDrive::new().await;
    let owner = Uuid::new_v4();
    let first = drive.service.ensure_root(owner).await.unwrap();
    let second = drive.service.ensure_root(owner).await.unwrap();
    assert_eq!(first.id, second.id);
    assert!(first.is_root());
    assert_eq!(first.kind, MatterKind::Folder);

    let other = drive.service.ensure_root(Uuid::new_v4()).await.unwrap();
    assert_ne!(other.id, first.id);
}

#[tokio::test]
async fn duplicate_live_name_conflicts() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;

    drive.service.create_folder(root, "docs", owner).await.unwrap();
    let err = drive
        .service
        .create_folder(root, "docs", owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::NameConflict { ref name, .. } if name == "docs"));

    // Names are case-sensitive.
    drive.service.create_folder(root, "Docs", owner).await.unwrap();
}

#[tokio::test]
async fn invalid_names_are_rejected() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    for name in ["", "a/b", "..", " padded", "tab\there"] {
        let err = drive
            .service
            .create_folder(root, name, owner)
            .await
            .unwrap_err();
        assert!(matches!(err, DriveError::InvalidName { .. }), "{name:?}");
    }
}

#[tokio::test]
async fn moving_under_own_descendant_is_a_cycle() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    let a = drive.service.create_folder(root, "a", owner).await.unwrap();
    let b = drive.service.create_folder(a.id, "b", owner).await.unwrap();
    let c = drive.service.create_folder(b.id, "c", owner).await.unwrap();

    let err = drive
        .service
        .move_to(a.id, c.id, "a", owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::CycleDetected { .. }));

    let err = drive
        .service
        .move_to(a.id, a.id, "a", owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::CycleDetected { .. }));

    // Tree is untouched.
    let a_now = drive.service.get(a.id, owner).await.unwrap();
    assert_eq!(a_now.parent_id, Some(root));
}

#[tokio::test]
async fn move_renames_and_reparents_atomically() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    let docs = drive.service.create_folder(root, "docs", owner).await.unwrap();
    let archive = drive.service.create_folder(root, "archive", owner).await.unwrap();
    let file = drive
        .service
        .upload(docs.id, "a.txt", owner, body(b"hello"))
        .await
        .unwrap();

    let moved = drive
        .service
        .move_to(file.id, archive.id, "old.txt", owner)
        .await
        .unwrap();
    assert_eq!(moved.parent_id, Some(archive.id));
    assert_eq!(moved.name, "old.txt");
    assert_eq!(
        drive.service.catalog().path(file.id, owner).await.unwrap(),
        "/archive/old.txt"
    );

    // A conflicting target leaves the matter where it was.
    drive
        .service
        .upload(docs.id, "b.txt", owner, body(b"other"))
        .await
        .unwrap();
    let err = drive
        .service
        .move_to(file.id, docs.id, "b.txt", owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::NameConflict { .. }));
    let still = drive.service.get(file.id, owner).await.unwrap();
    assert_eq!(still.parent_id, Some(archive.id));
    assert_eq!(still.name, "old.txt");
}

#[tokio::test]
async fn cross_owner_access_is_refused() {
    let drive = TestDrive::new().await;
    let (alice, alice_root) = drive.new_owner().await;
    let (bob, bob_root) = drive.new_owner().await;
    let docs = drive
        .service
        .create_folder(alice_root, "docs", alice)
        .await
        .unwrap();

    // Private matters are invisible to others.
    let err = drive.service.get(docs.id, bob).await.unwrap_err();
    assert!(matches!(err, DriveError::NotFound(_)));

    drive
        .service
        .catalog()
        .set_privacy(docs.id, alice, false)
        .await
        .unwrap();
    assert_eq!(drive.service.get(docs.id, bob).await.unwrap().id, docs.id);

    let err = drive
        .service
        .rename(docs.id, "mine", bob)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::CrossOwnerForbidden(_)));

    let err = drive
        .service
        .move_to(docs.id, bob_root, "docs", alice)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::CrossOwnerForbidden(_)));

    let err = drive
        .service
        .create_folder(alice_root, "intruder", bob)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::NotFound(_)));
}

#[tokio::test]
async fn root_cannot_be_moved_renamed_or_deleted() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    let docs = drive.service.create_folder(root, "docs", owner).await.unwrap();

    let err = drive.service.rename(root, "x", owner).await.unwrap_err();
    assert!(matches!(err, DriveError::RootImmutable));
    let err = drive
        .service
        .move_to(root, docs.id, "x", owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::RootImmutable));
    let err = drive
        .service
        .delete_recursive(root, owner)
        .await
        .unwrap_err();
    assert!(matches!(err, DriveError::RootImmutable));
}

#[tokio::test]
async fn restore_fails_when_name_was_reused() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    let old = drive.service.create_folder(root, "docs", owner).await.unwrap();
    drive.service.delete_recursive(old.id, owner).await.unwrap();

    // The name is free again once the old folder is deleted.
    drive.service.create_folder(root, "docs", owner).await.unwrap();

    let err = drive.service.restore(old.id, owner).await.unwrap_err();
    assert!(matches!(err, DriveError::NameConflict { .. }));
}

#[tokio::test]
async fn listing_is_case_insensitive_then_by_creation() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    for name in ["b", "a", "C", "A"] {
        drive.service.create_folder(root, name, owner).await.unwrap();
    }

    let names: Vec<_> = drive
        .service
        .list_children(root, owner, false)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.name)
        .collect();
    assert_eq!(names, ["a", "A", "b", "C"]);
}

#[tokio::test]
async fn deleted_children_are_listed_only_on_request_and_only_for_owner() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    let gone = drive.service.create_folder(root, "gone", owner).await.unwrap();
    drive.service.create_folder(root, "kept", owner).await.unwrap();
    drive.service.delete_recursive(gone.id, owner).await.unwrap();

    let live = drive.service.list_children(root, owner, false).await.unwrap();
    assert_eq!(live.len(), 1);
    let all = drive.service.list_children(root, owner, true).await.unwrap();
    assert_eq!(all.len(), 2);
    assert!(all.iter().any(|m| m.id == gone.id && m.is_deleted));

    let err = drive.service.get(gone.id, owner).await.unwrap_err();
    assert!(matches!(err, DriveError::NotFound(_)));
}

#[tokio::test]
async fn folder_size_and_path() {
    let drive = TestDrive::new().await;
    let (owner, root) = drive.new_owner().await;
    let docs = drive.service.create_folder(root, "docs", owner).await.unwrap();
    let deep = drive.service.create_folder(docs.id, "deep", owner).await.unwrap();
    drive
        .service
        .upload(docs.id, "a.txt", owner, body(b"hello"))
        .await
        .unwrap();
    let nested = drive
        .service
        .upload(deep.id, "b.txt", owner, body(b"world!"))
        .await
        .unwrap();
    let gone = drive
        .service
        .upload(deep.id, "c.txt", owner, body(b"ignored"))
        .await
        .unwrap();
    drive.service.delete_recursive(gone.id, owner).await.unwrap();

    let catalog = drive.service.catalog();
    assert_eq!(catalog.folder_size(docs.id, owner).await.unwrap(), 11);
    assert_eq!(catalog.folder_size(deep.id, owner).await.unwrap(), 6);
    assert_eq!(catalog.folder_size(root, owner).await.unwrap(), 11);

    assert_eq!(catalog.path(root, owner).await.unwrap(), "/");
    assert_eq!(
        catalog.path(nested.id, owner).await.unwrap(),
        "/docs/deep/b.txt"
    );
}

fn check_tree(ops: Vec<(usize, usize)>) -> Result<(), TestCaseError> {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();
    rt.block_on(async move {
        let drive = TestDrive::new().await;
        let (owner, root) = drive.new_owner().await;
        let mut folders = vec![root];
        for i in 0..6 {
            let parent = folders[i / 2];
            let f = drive
                .service
                .create_folder(parent, &format!("f{i}"), owner)
                .await
                .unwrap();
            folders.push(f.id);
        }

        for (from, to) in ops {
            let matter = folders[1 + from % (folders.len() - 1)];
            let target = folders[to % folders.len()];
            let name = format!("m{}", Uuid::new_v4().simple());
            match drive.service.move_to(matter, target, &name, owner).await {
                Ok(_) | Err(DriveError::CycleDetected { .. }) => {}
                Err(err) => prop_assert!(false, "unexpected error {err}"),
            }

            // Every chain still terminates at the root.
            for id in &folders {
                let path = drive.service.catalog().path(*id, owner).await;
                prop_assert!(path.is_ok(), "broken chain: {:?}", path);
            }
        }
        Ok::<(), TestCaseError>(())
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn random_moves_never_create_cycles(ops in prop::collection::vec((0usize..16, 0usize..16), 1..20)) {
        check_tree(ops)?;
    }
}
