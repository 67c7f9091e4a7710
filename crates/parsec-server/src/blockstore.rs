//! Block payload storage.
//!
//! Block metadata lives in the datamodel; the payload bytes go through
//! this trait so that an object store can back them without touching the
//! components.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use parsec_types::{BlockID, OrganizationID};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BlockStoreError {
    #[error("block not found")]
    NotFound,
    #[error("block store unavailable")]
    Unavailable,
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    async fn create(
        &self,
        organization_id: &OrganizationID,
        block_id: BlockID,
        data: Vec<u8>,
    ) -> Result<(), BlockStoreError>;

    async fn read(
        &self,
        organization_id: &OrganizationID,
        block_id: BlockID,
    ) -> Result<Vec<u8>, BlockStoreError>;
}

/// In-memory payload store.
#[derive(Default)]
pub struct MemoryBlockStore {
    blocks: RwLock<HashMap<(OrganizationID, BlockID), Vec<u8>>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BlockStore for MemoryBlockStore {
    async fn create(
        &self,
        organization_id: &OrganizationID,
        block_id: BlockID,
        data: Vec<u8>,
    ) -> Result<(), BlockStoreError> {
        let mut blocks = self.blocks.write().await;
        // Overwriting with identical content is a harmless retry
        blocks.insert((organization_id.clone(), block_id), data);
        Ok(())
    }

    async fn read(
        &self,
        organization_id: &OrganizationID,
        block_id: BlockID,
    ) -> Result<Vec<u8>, BlockStoreError> {
        self.blocks
            .read()
            .await
            .get(&(organization_id.clone(), block_id))
            .cloned()
            .ok_or(BlockStoreError::NotFound)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_roundtrip() {
        let store = MemoryBlockStore::new();
        let org: OrganizationID = "CoolOrg".parse().unwrap();
        let block_id = BlockID::generate();

        assert_eq!(
            store.read(&org, block_id).await,
            Err(BlockStoreError::NotFound)
        );
        store.create(&org, block_id, b"payload".to_vec()).await.unwrap();
        assert_eq!(store.read(&org, block_id).await.unwrap(), b"payload");
    }
}
