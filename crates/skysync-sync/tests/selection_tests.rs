//! Integration tests for SelectionService

mod common;

use tokio_util::sync::CancellationToken;

use common::{path, Harness};
use skysync_core::domain::SelectionState;
use skysync_sync::{SelectionService, SyncError};

async fn drive_with_folders(h: &Harness) -> SelectionService {
    h.drive.put("/Docs/a.txt", b"a");
    h.drive.put("/Docs/Work/b.txt", b"b");
    h.drive.put("/Docs/Personal/c.txt", b"c");
    h.drive.put("/Photos/d.jpg", b"d");
    SelectionService::new(h.drive.clone(), h.store.clone())
}

#[tokio::test]
async fn test_build_tree_lists_folders_only() {
    let h = Harness::new().await;
    let service = drive_with_folders(&h).await;

    let tree = service
        .build_tree(h.account_id(), &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(tree.len(), 4);
    assert_eq!(tree.roots().len(), 2);
    let work = tree.find(&path("/Docs/Work")).unwrap();
    let node = tree.node(work).unwrap();
    assert_eq!(node.name(), "Work");
    assert_eq!(node.state(), SelectionState::Indeterminate);
    assert!(tree.find(&path("/Docs/a.txt")).is_none());
}

#[tokio::test]
async fn test_selection_cascades_and_persists() {
    let h = Harness::new().await;
    let service = drive_with_folders(&h).await;
    let cancel = CancellationToken::new();
    let mut tree = service.build_tree(h.account_id(), &cancel).await.unwrap();

    service
        .set_selection(h.account_id(), &mut tree, &path("/Docs"), true)
        .await
        .unwrap();
    service
        .set_selection(h.account_id(), &mut tree, &path("/Docs/Personal"), false)
        .await
        .unwrap();

    let docs = tree.find(&path("/Docs")).unwrap();
    assert_eq!(tree.node(docs).unwrap().state(), SelectionState::Indeterminate);
    let work = tree.find(&path("/Docs/Work")).unwrap();
    assert_eq!(tree.node(work).unwrap().state(), SelectionState::Checked);

    let scope = service.scope(h.account_id()).await.unwrap();
    assert!(scope.is_in_scope(&path("/Docs/a.txt")));
    assert!(scope.is_in_scope(&path("/Docs/Work/b.txt")));
    assert!(!scope.is_in_scope(&path("/Docs/Personal/c.txt")));
    assert!(!scope.is_in_scope(&path("/Photos/d.jpg")));

    // a fresh tree reflects the stored choices
    let reloaded = service.load_tree(h.account_id(), &cancel).await.unwrap();
    let personal = reloaded.find(&path("/Docs/Personal")).unwrap();
    assert_eq!(reloaded.node(personal).unwrap().state(), SelectionState::Unchecked);
    let work = reloaded.find(&path("/Docs/Work")).unwrap();
    assert_eq!(reloaded.node(work).unwrap().is_selected(), Some(true));
    assert_eq!(
        service.selected_paths(h.account_id(), &cancel).await.unwrap(),
        vec![path("/Docs/Work")]
    );
}

#[tokio::test]
async fn test_single_rows_can_be_set_and_cleared() {
    let h = Harness::new().await;
    let service = drive_with_folders(&h).await;

    service
        .select_folder(h.account_id(), path("/Photos"), true)
        .await
        .unwrap();
    assert_eq!(service.selections(h.account_id()).await.unwrap().len(), 1);
    assert!(!service.scope(h.account_id()).await.unwrap().is_unrestricted());

    service
        .clear_folder(h.account_id(), &path("/Photos"))
        .await
        .unwrap();
    assert!(service.selections(h.account_id()).await.unwrap().is_empty());
    assert!(service.scope(h.account_id()).await.unwrap().is_unrestricted());
}

#[tokio::test]
async fn test_unknown_folder_is_rejected() {
    let h = Harness::new().await;
    let service = drive_with_folders(&h).await;
    let mut tree = service
        .build_tree(h.account_id(), &CancellationToken::new())
        .await
        .unwrap();

    let err = service
        .set_selection(h.account_id(), &mut tree, &path("/Nope"), true)
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::DomainError(_)));
    assert!(service.selections(h.account_id()).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_root() {
    let h = Harness::new().await;
    h.drive.set_root_missing(true);
    let service = SelectionService::new(h.drive.clone(), h.store.clone());

    let err = service
        .build_tree(h.account_id(), &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::RemoteRootNotFound(_)));
}
