//! Selective sync service
//!
//! Builds the folder tree from the remote hierarchy, applies and persists
//! the user's tri-state choices, and derives the [`SelectionScope`] the
//! engine filters with.

use std::collections::VecDeque;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use skysync_core::{
    domain::{
        newtypes::{AccountId, RelativePath},
        DomainError, FolderSelection, FolderTree, NodeId, SelectionScope,
    },
    ports::{IRemoteDrive, IStateRepository, RemoteError},
};

use crate::SyncError;

pub struct SelectionService {
    remote: Arc<dyn IRemoteDrive>,
    state_repo: Arc<dyn IStateRepository>,
}

impl SelectionService {
    pub fn new(remote: Arc<dyn IRemoteDrive>, state_repo: Arc<dyn IStateRepository>) -> Self {
        Self { remote, state_repo }
    }

    /// Folder hierarchy of the drive; every node starts `Indeterminate`.
    #[tracing::instrument(skip(self, cancel))]
    pub async fn build_tree(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<FolderTree, SyncError> {
        let root = match self.remote.get_root_item(account_id, cancel).await {
            Ok(root) => root,
            Err(RemoteError::NotFound(msg)) => return Err(SyncError::RemoteRootNotFound(msg)),
            Err(e) => return Err(e.into()),
        };

        let mut tree = FolderTree::new();
        let mut queue: VecDeque<(Option<NodeId>, _)> = VecDeque::from([(None, root.id)]);

        while let Some((parent, folder_id)) = queue.pop_front() {
            let children = self
                .remote
                .get_children(account_id, &folder_id, cancel)
                .await?;
            for child in children.into_iter().filter(|c| c.is_folder && !c.is_deleted) {
                let node = tree.add_node(parent, child.name, child.path, Some(child.id.clone()))?;
                queue.push_back((Some(node), child.id));
            }
        }

        debug!(folders = tree.len(), "Folder tree built");
        Ok(tree)
    }

    /// [`build_tree`](Self::build_tree) with the saved selections applied
    pub async fn load_tree(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<FolderTree, SyncError> {
        let mut tree = self.build_tree(account_id, cancel).await?;
        let saved = self.state_repo.get_folder_selections(&account_id).await?;
        tree.apply_saved_selections(&saved);
        Ok(tree)
    }

    /// Check or uncheck `path` in `tree` (cascading) and persist the result.
    pub async fn set_selection(
        &self,
        account_id: AccountId,
        tree: &mut FolderTree,
        path: &RelativePath,
        selected: bool,
    ) -> Result<(), SyncError> {
        let node = tree.find(path).ok_or_else(|| {
            DomainError::ValidationFailed(format!("folder not in tree: {path}"))
        })?;
        tree.set_selection(node, selected)?;
        self.save_tree(account_id, tree).await?;
        info!(account_id = %account_id, path = %path, selected, "Folder selection changed");
        Ok(())
    }

    /// Replace the stored rows with the explicit choices made in `tree`
    pub async fn save_tree(&self, account_id: AccountId, tree: &FolderTree) -> Result<(), SyncError> {
        let rows = tree.to_selections(account_id);
        self.state_repo
            .replace_folder_selections(&account_id, &rows)
            .await?;
        Ok(())
    }

    /// Store one explicit choice without loading the tree
    pub async fn select_folder(
        &self,
        account_id: AccountId,
        path: RelativePath,
        selected: bool,
    ) -> Result<(), SyncError> {
        self.state_repo
            .save_folder_selection(&FolderSelection::new(account_id, path, selected))
            .await?;
        Ok(())
    }

    /// Drop the explicit choice for `path`; it inherits from its parent again
    pub async fn clear_folder(&self, account_id: AccountId, path: &RelativePath) -> Result<(), SyncError> {
        self.state_repo
            .delete_folder_selection(&account_id, path)
            .await?;
        Ok(())
    }

    /// Top-most selected folders of the stored selection
    pub async fn selected_paths(
        &self,
        account_id: AccountId,
        cancel: &CancellationToken,
    ) -> Result<Vec<RelativePath>, SyncError> {
        Ok(self.load_tree(account_id, cancel).await?.selected_paths())
    }

    pub async fn selections(&self, account_id: AccountId) -> Result<Vec<FolderSelection>, SyncError> {
        Ok(self.state_repo.get_folder_selections(&account_id).await?)
    }

    pub async fn scope(&self, account_id: AccountId) -> Result<SelectionScope, SyncError> {
        let saved = self.state_repo.get_folder_selections(&account_id).await?;
        Ok(SelectionScope::from_selections(&saved))
    }
}
