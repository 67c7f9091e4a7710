//! Versioned encrypted metadata blobs.
//!
//! Versions per vlob are dense starting at 1 and the realm checkpoint is
//! bumped by every write, which lets clients poll changes with a single
//! integer cursor.

use std::collections::HashMap;
use std::sync::Arc;

use parsec_types::{DateTime, DeviceID, OrganizationID, SequesterServiceID, VlobID};

use crate::ballpark::{check_ballpark, TimestampOutOfBallpark};
use crate::components::resolve_author;
use crate::config::ServerConfig;
use crate::datamodel::{
    Datamodel, MemoryVlob, MemoryVlobAtom, OrganizationStore, SequesterServiceConfig,
};
use crate::events::{Event, EventBus};
use crate::webhooks::WebhookDispatcher;

/// Hard cap on `vlob_read_batch` / `vlob_read_versions` items per request.
pub const VLOB_READ_MAX_ELEMENTS: usize = 1000;

#[derive(Debug, thiserror::Error)]
pub enum VlobCreateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("vlob already exists")]
    VlobAlreadyExists,
    #[error("key index is not the current one")]
    BadKeyIndex {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("organization is not sequestered")]
    OrganizationNotSequestered,
    #[error("sequester blob does not match active services")]
    SequesterServiceMismatch {
        last_sequester_certificate_timestamp: DateTime,
    },
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum VlobUpdateError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("vlob not found")]
    VlobNotFound,
    #[error("version is not the next one")]
    BadVersion,
    #[error("key index is not the current one")]
    BadKeyIndex {
        last_realm_certificate_timestamp: DateTime,
    },
    #[error("organization is not sequestered")]
    OrganizationNotSequestered,
    #[error("sequester blob does not match active services")]
    SequesterServiceMismatch {
        last_sequester_certificate_timestamp: DateTime,
    },
    #[error(transparent)]
    TimestampOutOfBallpark(#[from] TimestampOutOfBallpark),
    #[error("timestamp must be greater than {strictly_greater_than}")]
    RequireGreaterTimestamp { strictly_greater_than: DateTime },
}

#[derive(Debug, thiserror::Error)]
pub enum VlobReadError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
    #[error("too many elements requested")]
    TooManyElements,
}

#[derive(Debug, thiserror::Error)]
pub enum VlobPollChangesError {
    #[error("organization not found")]
    OrganizationNotFound,
    #[error("author not allowed")]
    AuthorNotAllowed,
    #[error("realm not found")]
    RealmNotFound,
}

/// `(vlob_id, key_index, author, version, created_on, blob)`
pub type VlobReadItem = (VlobID, u64, DeviceID, u64, DateTime, Vec<u8>);

#[derive(Debug)]
pub struct VlobReadResult {
    pub items: Vec<VlobReadItem>,
    pub needed_common_certificate_timestamp: DateTime,
    pub needed_realm_certificate_timestamp: DateTime,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VlobChanges {
    pub current_checkpoint: u64,
    pub changes: Vec<(VlobID, u64)>,
}

pub struct VlobComponent {
    datamodel: Arc<Datamodel>,
    event_bus: EventBus,
    config: Arc<ServerConfig>,
    webhooks: WebhookDispatcher,
}

/// Check a `sequester_blob` mapping against the active services; returns
/// the webhook targets to notify.
fn check_sequester_blob(
    store: &OrganizationStore,
    sequester_blob: &Option<HashMap<SequesterServiceID, Vec<u8>>>,
) -> Result<Vec<(SequesterServiceID, String, Vec<u8>)>, SequesterBlobError> {
    match (store.is_sequestered(), sequester_blob) {
        (false, None) => Ok(Vec::new()),
        (false, Some(_)) => Err(SequesterBlobError::OrganizationNotSequestered),
        (true, None) => Err(SequesterBlobError::Mismatch),
        (true, Some(blob)) => {
            let mut expected: Vec<&SequesterServiceID> =
                store.active_sequester_services().map(|(id, _)| id).collect();
            expected.sort();
            let mut provided: Vec<&SequesterServiceID> = blob.keys().collect();
            provided.sort();
            if expected != provided {
                return Err(SequesterBlobError::Mismatch);
            }
            let mut webhooks = Vec::new();
            for (service_id, service) in store.active_sequester_services() {
                if let SequesterServiceConfig::Webhook { url } = &service.config {
                    if let Some(ciphertext) = blob.get(service_id) {
                        webhooks.push((*service_id, url.clone(), ciphertext.clone()));
                    }
                }
            }
            Ok(webhooks)
        }
    }
}

enum SequesterBlobError {
    OrganizationNotSequestered,
    Mismatch,
}

impl VlobComponent {
    pub fn new(
        datamodel: Arc<Datamodel>,
        event_bus: EventBus,
        config: Arc<ServerConfig>,
        webhooks: WebhookDispatcher,
    ) -> Self {
        Self {
            datamodel,
            event_bus,
            config,
            webhooks,
        }
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn create(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        realm_id: VlobID,
        vlob_id: VlobID,
        key_index: u64,
        timestamp: DateTime,
        blob: Vec<u8>,
        sequester_blob: Option<HashMap<SequesterServiceID, Vec<u8>>>,
    ) -> Result<(), VlobCreateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(VlobCreateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| VlobCreateError::AuthorNotAllowed)?;
        check_ballpark(timestamp, now, &self.config.ballpark)?;

        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(VlobCreateError::RealmNotFound)?;
        let can_write = realm
            .role_of(&author.user_id)
            .map(|role| role.can_write())
            .unwrap_or(false);
        if !can_write {
            return Err(VlobCreateError::AuthorNotAllowed);
        }
        if key_index != realm.current_key_index() {
            return Err(VlobCreateError::BadKeyIndex {
                last_realm_certificate_timestamp: realm
                    .last_certificate_timestamp()
                    .unwrap_or(realm.created_on),
            });
        }
        // A write must postdate the realm certificates ruling it
        if let Some(strictly_greater_than) = realm.last_certificate_timestamp() {
            if timestamp <= strictly_greater_than {
                return Err(VlobCreateError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }
        if store.vlobs.contains_key(&vlob_id) {
            return Err(VlobCreateError::VlobAlreadyExists);
        }

        let webhooks = check_sequester_blob(&store, &sequester_blob).map_err(|err| match err {
            SequesterBlobError::OrganizationNotSequestered => {
                VlobCreateError::OrganizationNotSequestered
            }
            SequesterBlobError::Mismatch => VlobCreateError::SequesterServiceMismatch {
                last_sequester_certificate_timestamp: store
                    .last_sequester_timestamp
                    .unwrap_or(store.created_on),
            },
        })?;

        store.vlobs.insert(
            vlob_id,
            MemoryVlob {
                realm_id,
                atoms: vec![MemoryVlobAtom {
                    key_index,
                    blob,
                    author: author.device_id,
                    created_on: timestamp,
                    sequestered: sequester_blob,
                }],
            },
        );
        let checkpoint = self.record_write(&mut store, realm_id, vlob_id, 1, timestamp);

        self.event_bus.emit(
            organization_id,
            Event::VlobsUpdated {
                realm_id,
                checkpoint,
                vlob_id,
                version: 1,
            },
        );
        for (service_id, url, ciphertext) in webhooks {
            self.webhooks
                .dispatch(organization_id.clone(), service_id, url, vlob_id, ciphertext);
        }
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    pub async fn update(
        &self,
        organization_id: &OrganizationID,
        now: DateTime,
        author: DeviceID,
        vlob_id: VlobID,
        key_index: u64,
        timestamp: DateTime,
        version: u64,
        blob: Vec<u8>,
        sequester_blob: Option<HashMap<SequesterServiceID, Vec<u8>>>,
    ) -> Result<(), VlobUpdateError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(VlobUpdateError::OrganizationNotFound)?;
        let mut store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| VlobUpdateError::AuthorNotAllowed)?;
        check_ballpark(timestamp, now, &self.config.ballpark)?;

        let vlob = store
            .vlobs
            .get(&vlob_id)
            .ok_or(VlobUpdateError::VlobNotFound)?;
        let realm_id = vlob.realm_id;
        let current_version = vlob.atoms.len() as u64;
        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(VlobUpdateError::VlobNotFound)?;
        let can_write = realm
            .role_of(&author.user_id)
            .map(|role| role.can_write())
            .unwrap_or(false);
        if !can_write {
            return Err(VlobUpdateError::AuthorNotAllowed);
        }
        if key_index != realm.current_key_index() {
            return Err(VlobUpdateError::BadKeyIndex {
                last_realm_certificate_timestamp: realm
                    .last_certificate_timestamp()
                    .unwrap_or(realm.created_on),
            });
        }
        // Versions are dense
        if version != current_version + 1 {
            return Err(VlobUpdateError::BadVersion);
        }
        if let Some(strictly_greater_than) = realm.last_certificate_timestamp() {
            if timestamp <= strictly_greater_than {
                return Err(VlobUpdateError::RequireGreaterTimestamp {
                    strictly_greater_than,
                });
            }
        }

        let webhooks = check_sequester_blob(&store, &sequester_blob).map_err(|err| match err {
            SequesterBlobError::OrganizationNotSequestered => {
                VlobUpdateError::OrganizationNotSequestered
            }
            SequesterBlobError::Mismatch => VlobUpdateError::SequesterServiceMismatch {
                last_sequester_certificate_timestamp: store
                    .last_sequester_timestamp
                    .unwrap_or(store.created_on),
            },
        })?;

        if let Some(vlob) = store.vlobs.get_mut(&vlob_id) {
            vlob.atoms.push(MemoryVlobAtom {
                key_index,
                blob,
                author: author.device_id,
                created_on: timestamp,
                sequestered: sequester_blob,
            });
        }
        let checkpoint = self.record_write(&mut store, realm_id, vlob_id, version, timestamp);

        self.event_bus.emit(
            organization_id,
            Event::VlobsUpdated {
                realm_id,
                checkpoint,
                vlob_id,
                version,
            },
        );
        for (service_id, url, ciphertext) in webhooks {
            self.webhooks
                .dispatch(organization_id.clone(), service_id, url, vlob_id, ciphertext);
        }
        Ok(())
    }

    fn record_write(
        &self,
        store: &mut OrganizationStore,
        realm_id: VlobID,
        vlob_id: VlobID,
        version: u64,
        timestamp: DateTime,
    ) -> u64 {
        let Some(realm) = store.realms.get_mut(&realm_id) else {
            return 0;
        };
        realm.checkpoint += 1;
        realm.vlob_changes.insert(vlob_id, (realm.checkpoint, version));
        if realm.last_vlob_timestamp.map(|t| timestamp > t).unwrap_or(true) {
            realm.last_vlob_timestamp = Some(timestamp);
        }
        realm.checkpoint
    }

    pub async fn read_batch(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        realm_id: VlobID,
        vlobs: &[VlobID],
        at: Option<DateTime>,
    ) -> Result<VlobReadResult, VlobReadError> {
        self.read(organization_id, author, realm_id, |store, realm_id| {
            let mut items = Vec::new();
            for vlob_id in vlobs {
                let Some(vlob) = store.vlobs.get(vlob_id) else {
                    continue;
                };
                if vlob.realm_id != realm_id {
                    continue;
                }
                let atom = match at {
                    None => vlob.atoms.last().map(|atom| (vlob.atoms.len() as u64, atom)),
                    Some(at) => vlob
                        .atoms
                        .iter()
                        .enumerate()
                        .rev()
                        .find(|(_, atom)| atom.created_on <= at)
                        .map(|(index, atom)| (index as u64 + 1, atom)),
                };
                if let Some((version, atom)) = atom {
                    items.push((
                        *vlob_id,
                        atom.key_index,
                        atom.author,
                        version,
                        atom.created_on,
                        atom.blob.clone(),
                    ));
                }
            }
            items
        }, vlobs.len())
        .await
    }

    pub async fn read_versions(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        realm_id: VlobID,
        requested: &[(VlobID, u64)],
    ) -> Result<VlobReadResult, VlobReadError> {
        self.read(organization_id, author, realm_id, |store, realm_id| {
            let mut items = Vec::new();
            for (vlob_id, version) in requested {
                let Some(vlob) = store.vlobs.get(vlob_id) else {
                    continue;
                };
                if vlob.realm_id != realm_id || *version == 0 {
                    continue;
                }
                if let Some(atom) = vlob.atoms.get(*version as usize - 1) {
                    items.push((
                        *vlob_id,
                        atom.key_index,
                        atom.author,
                        *version,
                        atom.created_on,
                        atom.blob.clone(),
                    ));
                }
            }
            items
        }, requested.len())
        .await
    }

    async fn read<F>(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        realm_id: VlobID,
        collect: F,
        requested_len: usize,
    ) -> Result<VlobReadResult, VlobReadError>
    where
        F: FnOnce(&OrganizationStore, VlobID) -> Vec<VlobReadItem>,
    {
        if requested_len > VLOB_READ_MAX_ELEMENTS {
            return Err(VlobReadError::TooManyElements);
        }
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(VlobReadError::OrganizationNotFound)?;
        let store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| VlobReadError::AuthorNotAllowed)?;
        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(VlobReadError::RealmNotFound)?;
        let can_read = realm
            .role_of(&author.user_id)
            .map(|role| role.can_read())
            .unwrap_or(false);
        if !can_read {
            return Err(VlobReadError::AuthorNotAllowed);
        }

        let needed_common = store.last_common_timestamp.unwrap_or(store.created_on);
        let needed_realm = realm
            .last_certificate_timestamp()
            .unwrap_or(realm.created_on);
        Ok(VlobReadResult {
            items: collect(&store, realm_id),
            needed_common_certificate_timestamp: needed_common,
            needed_realm_certificate_timestamp: needed_realm,
        })
    }

    pub async fn poll_changes(
        &self,
        organization_id: &OrganizationID,
        author: DeviceID,
        realm_id: VlobID,
        last_checkpoint: u64,
    ) -> Result<VlobChanges, VlobPollChangesError> {
        let org = self
            .datamodel
            .organization(organization_id)
            .await
            .ok_or(VlobPollChangesError::OrganizationNotFound)?;
        let store = org.lock().await;

        let author = resolve_author(&store, author)
            .map_err(|_| VlobPollChangesError::AuthorNotAllowed)?;
        let realm = store
            .realms
            .get(&realm_id)
            .ok_or(VlobPollChangesError::RealmNotFound)?;
        let can_read = realm
            .role_of(&author.user_id)
            .map(|role| role.can_read())
            .unwrap_or(false);
        if !can_read {
            return Err(VlobPollChangesError::AuthorNotAllowed);
        }

        let mut changes: Vec<(VlobID, u64)> = realm
            .vlob_changes
            .iter()
            .filter(|(_, (checkpoint, _))| *checkpoint > last_checkpoint)
            .map(|(vlob_id, (_, version))| (*vlob_id, *version))
            .collect();
        changes.sort();
        Ok(VlobChanges {
            current_checkpoint: realm.checkpoint,
            changes,
        })
    }
}
