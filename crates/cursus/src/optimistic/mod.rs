/*
 *  Copyright 2025-2026 Colliery Software
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Optimistic local mirror of domain entities.
//!
//! Queued mutations are applied here synchronously at enqueue time so the
//! UI reflects the change immediately, before any network round-trip. Each
//! entity is stored arena-style as a confirmed `base` field map plus an
//! ordered list of per-field overlays, one per pending mutation — no deep
//! entity clones. Rendering a snapshot merges base then overlays in enqueue
//! order.
//!
//! Reconciliation rules:
//!
//! - A remote **confirmation** removes the mutation's overlay and folds the
//!   confirmed fields into `base`. Remote state wins over the local guess,
//!   except fields still covered by another unconfirmed overlay, which stay
//!   client-authoritative until that mutation resolves.
//! - A remote **rejection** removes exactly the rejected overlay: fields it
//!   touched fall back to `base` unless another pending overlay still
//!   covers them.
//! - Reconciling an entity that is no longer in the mirror is a no-op,
//!   never an error ("already reconciled/cleaned").
//!
//! Provisional ids assigned to local creates are remapped to the
//! server-assigned id on confirmation; an alias keeps stale handles
//! resolving so the swap is observable to any caller holding the old id.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::models::work_item::{CorrelationId, EntityId, MutationOp, MutationPayload};
use crate::sink::RemoteEntity;

/// Snapshot of an entity as the UI should render it: confirmed state plus
/// all pending optimistic overlays.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEntity {
    /// Current id (server-assigned once confirmed, provisional before).
    pub id: EntityId,
    /// Domain entity type.
    pub entity_type: String,
    /// Merged field values.
    pub fields: BTreeMap<String, Value>,
    /// True if a pending delete overlay covers the entity.
    pub deleted: bool,
    /// Ids of queued mutations not yet confirmed, in enqueue order.
    pub pending_mutation_ids: Vec<CorrelationId>,
}

impl OptimisticEntity {
    /// True while any mutation is unconfirmed; such a snapshot must not be
    /// treated as authoritative for conflict resolution.
    pub fn has_pending(&self) -> bool {
        !self.pending_mutation_ids.is_empty()
    }
}

/// A provisional-to-server id replacement produced by a confirmation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdRemap {
    pub old: EntityId,
    pub new: EntityId,
}

#[derive(Debug, Clone)]
struct Overlay {
    mutation_id: CorrelationId,
    op: MutationOp,
    fields: BTreeMap<String, Value>,
}

#[derive(Debug, Default)]
struct EntityRecord {
    entity_type: String,
    /// Last confirmed field values; empty for entities created locally and
    /// not yet acknowledged.
    base: BTreeMap<String, Value>,
    /// Pending overlays in enqueue order.
    overlays: Vec<Overlay>,
}

#[derive(Default)]
struct StoreInner {
    records: HashMap<EntityId, EntityRecord>,
    /// Stale provisional id -> current id.
    aliases: HashMap<EntityId, EntityId>,
    /// Pending mutation id -> owning entity (current id).
    mutation_index: HashMap<CorrelationId, EntityId>,
}

/// In-memory mirror of entities with queued-but-unconfirmed changes.
///
/// All methods are synchronous and safe to call from any thread.
#[derive(Default)]
pub struct OptimisticStore {
    inner: RwLock<StoreInner>,
}

impl OptimisticStore {
    /// Creates an empty mirror.
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies a mutation to the mirror and returns the provisional
    /// snapshot for immediate UI use.
    pub fn apply_locally(
        &self,
        payload: &MutationPayload,
        mutation_id: CorrelationId,
    ) -> OptimisticEntity {
        let mut inner = self.inner.write();
        let id = resolve(&inner.aliases, &payload.entity_id);

        let record = inner
            .records
            .entry(id.clone())
            .or_insert_with(|| EntityRecord {
                entity_type: payload.entity_type.clone(),
                ..EntityRecord::default()
            });
        record.overlays.push(Overlay {
            mutation_id: mutation_id.clone(),
            op: payload.op,
            fields: payload.fields.clone(),
        });
        let snapshot = render(&id, record);

        inner.mutation_index.insert(mutation_id, id);
        snapshot
    }

    /// Reconciles a remote confirmation of one mutation.
    ///
    /// Removes the overlay, folds the confirmed state into `base`, and
    /// remaps a provisional id to the server-assigned one. Returns the
    /// remap, if one happened. A confirmation for an entity that is no
    /// longer mirrored is a no-op.
    pub fn confirm(
        &self,
        mutation_id: &CorrelationId,
        remote: Option<&RemoteEntity>,
    ) -> Option<IdRemap> {
        let mut inner = self.inner.write();
        let id = inner.mutation_index.remove(mutation_id)?;
        let Some(record) = inner.records.get_mut(&id) else {
            return None;
        };

        let overlay = take_overlay(record, mutation_id)?;
        // Fold the confirmed write into the base: remote state when the
        // server returned it, otherwise the fields the overlay carried.
        match remote {
            Some(entity) => {
                for (key, value) in &entity.fields {
                    record.base.insert(key.clone(), value.clone());
                }
            }
            None => {
                for (key, value) in overlay.fields {
                    record.base.insert(key, value);
                }
            }
        }

        let new_id = remote
            .map(|entity| entity.id.clone())
            .filter(|new_id| *new_id != id);
        let Some(new_id) = new_id else {
            return None;
        };

        // Move the record under the server id and leave an alias behind so
        // callers holding the provisional id keep resolving.
        if let Some(record) = inner.records.remove(&id) {
            inner.records.insert(new_id.clone(), record);
        }
        for target in inner.aliases.values_mut() {
            if *target == id {
                *target = new_id.clone();
            }
        }
        inner.aliases.insert(id.clone(), new_id.clone());
        for target in inner.mutation_index.values_mut() {
            if *target == id {
                *target = new_id.clone();
            }
        }

        debug!(old = %id, new = %new_id, "Remapped provisional entity id");
        Some(IdRemap {
            old: id,
            new: new_id,
        })
    }

    /// Reconciles a remote rejection of one mutation: rolls back exactly
    /// the fields that mutation touched, leaving other pending overlays
    /// intact. Returns the rolled-back snapshot, or `None` if the entity
    /// was already cleaned from the mirror.
    pub fn reject(&self, mutation_id: &CorrelationId) -> Option<OptimisticEntity> {
        let mut inner = self.inner.write();
        let id = inner.mutation_index.remove(mutation_id)?;
        let record = inner.records.get_mut(&id)?;

        take_overlay(record, mutation_id)?;
        Some(render(&id, record))
    }

    /// Returns the current snapshot of an entity, resolving id aliases.
    pub fn get(&self, id: &EntityId) -> Option<OptimisticEntity> {
        let inner = self.inner.read();
        let id = resolve(&inner.aliases, id);
        inner.records.get(&id).map(|record| render(&id, record))
    }

    /// Resolves an entity id through the alias map: a stale provisional id
    /// yields the server-assigned id it was remapped to.
    pub fn resolve_id(&self, id: &EntityId) -> EntityId {
        resolve(&self.inner.read().aliases, id)
    }

    /// Drops a fully reconciled entity from the mirror. Returns false if
    /// the entity still has pending mutations (it is kept) or is unknown.
    ///
    /// Called once the caller has re-read the entity from the remote; the
    /// mirror only exists to cover the window where local state leads.
    pub fn evict_reconciled(&self, id: &EntityId) -> bool {
        let mut inner = self.inner.write();
        let id = resolve(&inner.aliases, id);
        match inner.records.get(&id) {
            Some(record) if record.overlays.is_empty() => {
                inner.records.remove(&id);
                inner.aliases.retain(|_, target| *target != id);
                true
            }
            _ => false,
        }
    }

    /// Number of mirrored entities (diagnostics).
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Returns true if the mirror is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.read().records.is_empty()
    }
}

fn resolve(aliases: &HashMap<EntityId, EntityId>, id: &EntityId) -> EntityId {
    aliases.get(id).cloned().unwrap_or_else(|| id.clone())
}

fn take_overlay(record: &mut EntityRecord, mutation_id: &CorrelationId) -> Option<Overlay> {
    let index = record
        .overlays
        .iter()
        .position(|overlay| overlay.mutation_id == *mutation_id)?;
    Some(record.overlays.remove(index))
}

fn render(id: &EntityId, record: &EntityRecord) -> OptimisticEntity {
    let mut fields = record.base.clone();
    let mut deleted = false;
    for overlay in &record.overlays {
        match overlay.op {
            MutationOp::Delete => deleted = true,
            _ => {
                for (key, value) in &overlay.fields {
                    fields.insert(key.clone(), value.clone());
                }
            }
        }
    }

    OptimisticEntity {
        id: id.clone(),
        entity_type: record.entity_type.clone(),
        fields,
        deleted,
        pending_mutation_ids: record
            .overlays
            .iter()
            .map(|overlay| overlay.mutation_id.clone())
            .collect(),
    }
}
