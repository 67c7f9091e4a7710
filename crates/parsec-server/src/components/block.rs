//! Immutable encrypted file chunks.

use std::sync::Arc;

use parsec_types::{BlockID, DateTime, DeviceID, OrganizationID, VlobID};

use crate::blockstore::{BlockStore, BlockStoreError};
use crate::components::resolve_author;
use crate::config::ServerConfig;
use crate::datamodel::{Datamodel, MemoryBlock};

#[derive(Debug, thiserror::Error)]
pub enum BlockCreateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("block already exists")]
    BlockAlreadyExists,
    #[error("block exceeds the configured size limit")]
    BlockTooLarge,
    #[error("key index is not the current one")]
    BadKeyIndex {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("block store unavailable")]
    StoreUnavailable,
}

#[derive(Debug, thiserror::Error)]
pub enum BlockReadError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("block not found")]
    BlockNotFound,
    #[error("block store unavailable")]
    StoreUnavailable,
}

#[derive(Debug)]
pub struct BlockReadResult {
    pub block: Vec<u8>,
    pub key_index: u64,
    pub needed_realm_certificate_timestamp: DateTime,
}

pub struct BlockComponent {
    datamodel: Arc<Datamodel>,
    config: Arc<ServerConfig>,
    blockstore: Arc<dyn BlockStore>,
}

impl BlockComponent {
    pub fn new(
        datamodel: Arc<Datamodel>,
        config: Arc<ServerConfig>,
        blockstore: Arc<dyn BlockStore>,
    ) -> Self {
        Self {
            datamodel,
            config,
            blockstore,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        block_id: BlockID,
        realm_id: VlobID,
        key_index: u64,
        block: Vec<u8>,
    ) -> Result<(), BlockCreateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(BlockCreateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| BlockCreateError::AuthorNotAllowed)?;
        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(BlockCreateError::RealmNotFound)?;
        let can_write = realm
            .role_of(&author.user_id)
            .map(|role| role.can_write())
            .unwrap_or(false);
        if !can_write {
            return Err(BlockCreateError::AuthorNotAllowed);
        }
        if key_index != realm.current_key_index() {
            return Err(BlockCreateError::BadKeyIndex {
                last_realm_certificate_timestamp: realm
                    .last_certificate_timestamp()
                    .unwrap_or(realm.created_on),
            });
        }
        if block.len() as u64 > self.config.block_max_size {
            return Err(BlockCreateError::BlockTooLarge);
        }
        if store.blocks.contains_key(&block_id) {
            return Err(BlockCreateError::BlockAlreadyExists);
        }

        let size = block.len() as u64;
        self.blockstore
            .create(organization_id, block_id, block)
            .await
            .map_err(|_| BlockCreateError::StoreUnavailable)?;
        store.blocks.insert(
            block_id,
            MemoryBlock {
                realm_id,
                key_index,
                author: author.device_id,
                created_on: now,
                size,
            },
        );
        Ok(())
    }

    pub async fn read(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        block_id: BlockID,
    ) -> Result<BlockReadResult, BlockReadError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(BlockReadError::OrganizationNotFound)?;
        let store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| BlockReadError::AuthorNotAllowed)?;
        let block = store
            .blocks
            .get(&block_id)
            .ok_or(BlockReadError::BlockNotFound)?;
        let realm = store
            .realms
            .get(&block.realm_id)
            .ok_or(BlockReadError::BlockNotFound)?;
        let can_read = realm
            .role_of(&author.user_id)
            .map(|role| role.can_read())
            .unwrap_or(false);
        if !can_read {
            return Err(BlockReadError::AuthorNotAllowed);
        }

        let payload = match self.blockstore.read(organization_id, block_id).await {
            Ok(payload) => payload,
            Err(BlockStoreError::NotFound) => return Err(BlockReadError::BlockNotFound),
            Err(BlockStoreError::Unavailable) => return Err(BlockReadError::StoreUnavailable),
        };
        Ok(BlockReadResult {
            block: payload,
            key_index: block.key_index,
            needed_realm_certificate_timestamp: realm
                .last_certificate_timestamp()
                .unwrap_or(realm.created_on),
        })
    }
}
