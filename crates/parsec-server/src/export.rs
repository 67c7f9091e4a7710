//! Realm export: snapshot one realm into a standalone SQLite file.
//!
//! The artifact is an external contract read by recovery tooling: it holds
//! the raw certificates ruling the realm plus every vlob atom and block
//! payload, enough to decrypt the realm offline given a keys bundle
//! access.

use std::path::Path;
use std::sync::Arc;

use rusqlite::{params, Connection};

use parsec_types::{DateTime, OrganizationID, VlobID};

use crate::blockstore::BlockStore;
use crate::datamodel::Datamodel;

/// File format marker, checked by readers before anything else.
const EXPORT_MAGIC: i64 = 87_948;
const EXPORT_VERSION: i64 = 1;

#[derive(Debug, thiserror::Error)]
pub enum RealmExportError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("organization is not bootstrapped")]
    OrganizationNotBootstrapped,
    #[error("realm not found")]
    RealmNotFound,
    #[error("block payload missing from the store")]
    BlockStoreUnavailable,
    #[error("export database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("export task failed")]
    TaskFailed,
}

struct ExportSnapshot {
    realm_id: VlobID,
    snapshot_timestamp: DateTime,
    root_verify_key: Vec<u8>,
    realm_certificates: Vec<Vec<u8>>,
    user_certificates: Vec<(Vec<u8>, Option<Vec<u8>>)>,
    device_certificates: Vec<Vec<u8>>,
    vlob_atoms: Vec<ExportVlobAtom>,
    blocks: Vec<ExportBlock>,
}

struct ExportVlobAtom {
    vlob_id: VlobID,
    version: u64,
    key_index: u64,
    blob: Vec<u8>,
    author: Vec<u8>,
    timestamp: DateTime,
}

struct ExportBlock {
    block_id: Vec<u8>,
    key_index: u64,
    author: Vec<u8>,
    size: u64,
    timestamp: DateTime,
    data: Vec<u8>,
}

pub struct RealmExporter {
    datamodel: Arc<Datamodel>,
    blockstore: Arc<dyn BlockStore>,
}

impl RealmExporter {
    pub fn new(datamodel: Arc<Datamodel>, blockstore: Arc<dyn BlockStore>) -> Self {
        Self {
            datamodel,
            blockstore,
        }
    }

    pub async fn export(
        &self,
        organization_id: &OrganizationID,
        realm_id: VlobID,
        output: &Path,
    ) -> Result<(), RealmExportError> {
        let snapshot = self.snapshot(organization_id, realm_id).await?;
        let output = output.to_owned();
        tokio::task::spawn_blocking(move || write_database(&output, &snapshot))
            .await
            .map_err(|_| RealmExportError::TaskFailed)?
    }

    /// Copy everything the export needs while holding the organization
    /// lock, so the artifact is a consistent snapshot.
    async fn snapshot(
        &self,
        organization_id: &OrganizationID,
        realm_id: VlobID,
    ) -> Result<ExportSnapshot, RealmExportError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(RealmExportError::OrganizationNotFound)?;
        let store = org.lock().await;

        let root_verify_key = store
            .root_verify_key
            .as_ref()
            .ok_or(RealmExportError::OrganizationNotBootstrapped)?
            .to_bytes()
            .to_vec();
        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(RealmExportError::RealmNotFound)?;

        let realm_certificates = realm
            .certificates
            .iter()
            .map(|stored| stored.certificate.clone())
            .collect();
        let user_certificates = store
            .users
            .values()
            .map(|user| {
                (
                    user.user_certificate.clone(),
                    user.revoked
                        .as_ref()
                        .map(|revocation| revocation.revoked_user_certificate.clone()),
                )
            })
            .collect();
        let device_certificates = store
            .devices
            .values()
            .map(|device| device.device_certificate.clone())
            .collect();

        let mut vlob_atoms = Vec::new();
        for (vlob_id, vlob) in &store.vlobs {
            if vlob.realm_id != realm_id {
                continue;
            }
            for (index, atom) in vlob.atoms.iter().enumerate() {
                vlob_atoms.push(ExportVlobAtom {
                    vlob_id: *vlob_id,
                    version: index as u64 + 1,
                    key_index: atom.key_index,
                    blob: atom.blob.clone(),
                    author: atom.author.as_bytes().to_vec(),
                    timestamp: atom.created_on,
                });
            }
        }

        let mut blocks = Vec::new();
        for (block_id, block) in &store.blocks {
            if block.realm_id != realm_id {
                continue;
            }
            let data = self
                .blockstore
                .read(organization_id, *block_id)
                .await
                .map_err(|_| RealmExportError::BlockStoreUnavailable)?;
            blocks.push(ExportBlock {
                block_id: block_id.as_bytes().to_vec(),
                key_index: block.key_index,
                author: block.author.as_bytes().to_vec(),
                size: block.size,
                timestamp: block.created_on,
                data,
            });
        }

        Ok(ExportSnapshot {
            realm_id,
            snapshot_timestamp: DateTime::now(),
            root_verify_key,
            realm_certificates,
            user_certificates,
            device_certificates,
            vlob_atoms,
            blocks,
        })
    }
}

fn write_database(output: &Path, snapshot: &ExportSnapshot) -> Result<(), RealmExportError> {
    let mut conn = Connection::open(output)?;
    conn.execute_batch(
        "
        CREATE TABLE info (
            magic INTEGER NOT NULL,
            version INTEGER NOT NULL,
            realm_id BLOB NOT NULL,
            root_verify_key BLOB NOT NULL,
            snapshot_timestamp INTEGER NOT NULL
        );
        CREATE TABLE realm_role (
            _id INTEGER PRIMARY KEY AUTOINCREMENT,
            realm_role_certificate BLOB NOT NULL
        );
        CREATE TABLE user_ (
            _id INTEGER PRIMARY KEY AUTOINCREMENT,
            user_certificate BLOB NOT NULL,
            revoked_user_certificate BLOB
        );
        CREATE TABLE device (
            _id INTEGER PRIMARY KEY AUTOINCREMENT,
            device_certificate BLOB NOT NULL
        );
        CREATE TABLE vlob_atom (
            vlob_id BLOB NOT NULL,
            version INTEGER NOT NULL,
            key_index INTEGER NOT NULL,
            blob BLOB NOT NULL,
            author BLOB NOT NULL,
            timestamp INTEGER NOT NULL,
            PRIMARY KEY (vlob_id, version)
        );
        CREATE TABLE block (
            block_id BLOB PRIMARY KEY,
            key_index INTEGER NOT NULL,
            author BLOB NOT NULL,
            size INTEGER NOT NULL,
            timestamp INTEGER NOT NULL,
            data BLOB NOT NULL
        );
        ",
    )?;

    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO info (magic, version, realm_id, root_verify_key, snapshot_timestamp)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            EXPORT_MAGIC,
            EXPORT_VERSION,
            snapshot.realm_id.as_bytes().to_vec(),
            snapshot.root_verify_key,
            snapshot.snapshot_timestamp.as_timestamp_micros(),
        ],
    )?;
    for certificate in &snapshot.realm_certificates {
        tx.execute(
            "INSERT INTO realm_role (realm_role_certificate) VALUES (?1)",
            params![certificate],
        )?;
    }
    for (certificate, revoked) in &snapshot.user_certificates {
        tx.execute(
            "INSERT INTO user_ (user_certificate, revoked_user_certificate) VALUES (?1, ?2)",
            params![certificate, revoked],
        )?;
    }
    for certificate in &snapshot.device_certificates {
        tx.execute(
            "INSERT INTO device (device_certificate) VALUES (?1)",
            params![certificate],
        )?;
    }
    for atom in &snapshot.vlob_atoms {
        tx.execute(
            "INSERT INTO vlob_atom (vlob_id, version, key_index, blob, author, timestamp)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                atom.vlob_id.as_bytes().to_vec(),
                atom.version,
                atom.key_index,
                atom.blob,
                atom.author,
                atom.timestamp.as_timestamp_micros(),
            ],
        )?;
    }
    for block in &snapshot.blocks {
        tx.execute(
            "INSERT INTO block (block_id, key_index, author, size, timestamp, data)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                block.block_id,
                block.key_index,
                block.author,
                block.size,
                block.timestamp.as_timestamp_micros(),
                block.data,
            ],
        )?;
    }
    tx.commit()?;
    Ok(())
}
