//! Entity store: identity allocation, alive set and creation-order iteration
//!
//! Ids are slot indices and are reused lowest-first once freed. Hashes come
//! from a monotonic counter and are never 0, so `(id, hash)` uniquely names
//! one entity lifetime. Every pass over the store walks entities in zIndex
//! (creation) order to keep ticks deterministic.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use rustc_hash::FxHashSet;
use tracing::{debug, warn};

use crate::game::constants::store::MAX_ENTITIES;
use crate::game::entity::{Entity, EntityBuilder, EntityError, EntityHandle, EntityId, EntityState};

/// Owner of every entity in one arena
pub struct EntityStore {
    slots: Vec<Option<Entity>>,
    free_ids: BinaryHeap<Reverse<EntityId>>,
    /// zIndex -> id for alive entities
    order: BTreeMap<u64, EntityId>,
    /// Hashes held by alive entities
    alive_hashes: FxHashSet<u32>,
    next_hash: u32,
    next_z_index: u64,
    max_entities: usize,
}

impl EntityStore {
    pub fn new(max_entities: usize) -> Self {
        let max_entities = max_entities.min(EntityId::MAX as usize + 1);
        Self {
            slots: Vec::with_capacity(max_entities.min(1024)),
            free_ids: BinaryHeap::new(),
            order: BTreeMap::new(),
            alive_hashes: FxHashSet::default(),
            next_hash: 1,
            next_z_index: 0,
            max_entities,
        }
    }

    /// Register a new entity and return its handle
    pub fn create(&mut self, builder: EntityBuilder) -> Result<EntityHandle, EntityError> {
        let id = match self.free_ids.pop() {
            Some(Reverse(id)) => id,
            None if self.slots.len() < self.max_entities => {
                self.slots.push(None);
                (self.slots.len() - 1) as EntityId
            }
            None => return Err(EntityError::StoreFull(self.max_entities)),
        };

        let hash = self.alloc_hash();
        let z_index = self.next_z_index;
        self.next_z_index += 1;

        debug_assert!(self.slots[id as usize].is_none(), "id {} allocated twice", id);
        let fresh = self.alive_hashes.insert(hash);
        debug_assert!(fresh, "hash {} already held by an alive entity", hash);

        let entity = Entity::new(id, hash, z_index, builder);
        debug!("Created {}", entity);
        self.slots[id as usize] = Some(entity);
        self.order.insert(z_index, id);

        Ok(EntityHandle::new(id, hash))
    }

    /// Next nonzero hash not held by an alive entity
    fn alloc_hash(&mut self) -> u32 {
        loop {
            let hash = self.next_hash;
            self.next_hash = self.next_hash.wrapping_add(1);
            if self.next_hash == 0 {
                self.next_hash = 1;
            }
            // Only reachable after the counter wraps
            if !self.alive_hashes.contains(&hash) {
                return hash;
            }
        }
    }

    /// Delete an entity, wiping its groups and freeing its id
    ///
    /// Returns `false` if the handle was already stale; a repeated delete is a
    /// no-op.
    pub fn delete(&mut self, handle: EntityHandle) -> bool {
        if !self.exists(handle) {
            debug!("Ignoring delete of stale handle {}", handle);
            return false;
        }

        let Some(mut entity) = self.slots[handle.id() as usize].take() else {
            return false;
        };
        self.alive_hashes.remove(&entity.hash());
        entity.kill();
        self.order.remove(&entity.z_index());

        debug_assert!(
            !self.free_ids.iter().any(|Reverse(id)| *id == handle.id()),
            "double free of id {}",
            handle.id()
        );
        self.free_ids.push(Reverse(handle.id()));
        debug!("Deleted {}", entity);
        true
    }

    /// Flag an entity for deletion after this tick's replication
    pub fn mark_for_deletion(&mut self, handle: EntityHandle) -> Result<(), EntityError> {
        self.get_mut(handle)?.state.insert(EntityState::NEEDS_DELETE);
        Ok(())
    }

    /// Whether the handle still names a live entity
    #[inline]
    pub fn exists(&self, handle: EntityHandle) -> bool {
        self.slot(handle.id())
            .is_some_and(|e| e.hash() != 0 && e.hash() == handle.hash())
    }

    #[inline]
    fn slot(&self, id: EntityId) -> Option<&Entity> {
        self.slots.get(id as usize).and_then(Option::as_ref)
    }

    pub fn get(&self, handle: EntityHandle) -> Result<&Entity, EntityError> {
        self.slot(handle.id())
            .filter(|e| e.hash() != 0 && e.hash() == handle.hash())
            .ok_or(EntityError::Stale(handle))
    }

    pub fn get_mut(&mut self, handle: EntityHandle) -> Result<&mut Entity, EntityError> {
        self.slots
            .get_mut(handle.id() as usize)
            .and_then(Option::as_mut)
            .filter(|e| e.hash() != 0 && e.hash() == handle.hash())
            .ok_or(EntityError::Stale(handle))
    }

    /// Resolve an optional handle, treating stale handles as absent
    pub fn resolve(&self, handle: Option<EntityHandle>) -> Option<&Entity> {
        handle.and_then(|h| self.get(h).ok())
    }

    /// Alive entities in creation order
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.order.values().filter_map(move |id| self.slot(*id))
    }

    /// Handles of alive entities in creation order
    pub fn handles(&self) -> Vec<EntityHandle> {
        self.iter().map(Entity::handle).collect()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Number of entities ever created
    pub fn z_index(&self) -> u64 {
        self.next_z_index
    }

    pub fn max_entities(&self) -> usize {
        self.max_entities
    }

    /// Run every entity's behavior once, in creation order
    ///
    /// Entities created during the pass are first ticked on the next step.
    /// A behavior that returns an error has its entity flagged for deletion;
    /// the failures are returned for logging.
    pub fn tick_entities(&mut self, tick: u64) -> Vec<(EntityHandle, EntityError)> {
        let mut failures = Vec::new();

        for handle in self.handles() {
            let behavior = match self.get_mut(handle) {
                Ok(entity) => entity.behavior.take(),
                // Deleted earlier in this pass
                Err(_) => continue,
            };
            let Some(mut behavior) = behavior else {
                continue;
            };

            let result = behavior.tick(handle, self, tick);

            if let Ok(entity) = self.get_mut(handle) {
                entity.behavior = Some(behavior);
                if let Err(e) = result {
                    warn!("Entity {} failed to tick: {}", entity, e);
                    entity.state.insert(EntityState::NEEDS_DELETE);
                    failures.push((handle, e));
                }
            }
        }

        failures
    }

    /// Delete every entity flagged `NEEDS_DELETE`
    pub fn reap(&mut self) -> usize {
        let doomed: Vec<EntityHandle> = self
            .iter()
            .filter(|e| e.state.contains(EntityState::NEEDS_DELETE))
            .map(Entity::handle)
            .collect();
        for handle in &doomed {
            self.delete(*handle);
        }
        doomed.len()
    }

    /// Wipe the dirty state of every entity touched this tick
    pub fn wipe_dirty(&mut self) -> usize {
        let mut wiped = 0;
        for id in self.order.values() {
            if let Some(entity) = self.slots[*id as usize].as_mut() {
                if entity.is_dirty() {
                    entity.wipe_state();
                    wiped += 1;
                }
            }
        }
        wiped
    }
}

impl Default for EntityStore {
    fn default() -> Self {
        Self::new(MAX_ENTITIES)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fields::{FieldGroup, GroupKind};
    use hashbrown::HashSet;

    fn shape() -> EntityBuilder {
        EntityBuilder::new("Shape").with(GroupKind::Position)
    }

    #[test]
    fn test_create_assigns_nonzero_unique_hashes() {
        let mut store = EntityStore::default();
        let handles: Vec<_> = (0..50).map(|_| store.create(shape()).unwrap()).collect();

        let hashes: HashSet<u32> = handles.iter().map(|h| h.hash()).collect();
        assert_eq!(hashes.len(), 50);
        assert!(!hashes.contains(&0));
    }

    #[test]
    fn test_ids_reused_but_hash_distinguishes() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();
        let _b = store.create(shape()).unwrap();

        assert!(store.delete(a));
        let c = store.create(shape()).unwrap();

        assert_eq!(c.id(), a.id());
        assert_ne!(c.hash(), a.hash());
        assert!(!store.exists(a));
        assert!(store.exists(c));
        assert_eq!(store.get(a).unwrap_err(), EntityError::Stale(a));
    }

    #[test]
    fn test_lowest_free_id_first() {
        let mut store = EntityStore::default();
        let handles: Vec<_> = (0..5).map(|_| store.create(shape()).unwrap()).collect();
        store.delete(handles[3]);
        store.delete(handles[1]);

        assert_eq!(store.create(shape()).unwrap().id(), 1);
        assert_eq!(store.create(shape()).unwrap().id(), 3);
        assert_eq!(store.create(shape()).unwrap().id(), 5);
    }

    #[test]
    fn test_double_delete_is_noop() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();

        assert!(store.delete(a));
        assert!(!store.delete(a));
        assert!(store.is_empty());
    }

    #[test]
    fn test_wrapped_hash_counter_skips_alive_hashes() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();
        assert_eq!(a.hash(), 1);

        store.next_hash = u32::MAX;
        let b = store.create(shape()).unwrap();
        assert_eq!(b.hash(), u32::MAX);
        // 0 is never handed out and 1 still belongs to `a`
        let c = store.create(shape()).unwrap();
        assert_eq!(c.hash(), 2);
        assert!(store.exists(a));

        store.delete(a);
        store.next_hash = 1;
        let d = store.create(shape()).unwrap();
        assert_eq!(d.hash(), 1);
        assert!(!store.exists(a));
    }

    #[test]
    fn test_many_creates_and_deletes_keep_hashes_distinct() {
        let mut store = EntityStore::new(20_000);
        let handles: Vec<EntityHandle> = (0..20_000).map(|_| store.create(shape()).unwrap()).collect();
        for handle in handles.iter().step_by(2) {
            store.delete(*handle);
        }
        for _ in 0..10_000 {
            store.create(shape()).unwrap();
        }
        let hashes: HashSet<u32> = store.iter().map(|e| e.hash()).collect();
        assert_eq!(hashes.len(), store.len());
        assert_eq!(store.len(), 20_000);
    }

    #[test]
    fn test_exists_is_monotonic() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();
        assert!(store.exists(a));
        store.delete(a);

        // Reusing the slot never revives the old handle
        for _ in 0..10 {
            store.create(shape()).unwrap();
            assert!(!store.exists(a));
        }
    }

    #[test]
    fn test_iteration_follows_creation_order() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();
        let b = store.create(shape()).unwrap();
        let c = store.create(shape()).unwrap();
        store.delete(a);
        let d = store.create(shape()).unwrap();

        // d reuses a's id but is newest
        assert_eq!(store.handles(), vec![b, c, d]);
    }

    #[test]
    fn test_store_full() {
        let mut store = EntityStore::new(2);
        store.create(shape()).unwrap();
        store.create(shape()).unwrap();
        assert_eq!(store.create(shape()).unwrap_err(), EntityError::StoreFull(2));
    }

    #[test]
    fn test_reap_deletes_flagged() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();
        let b = store.create(shape()).unwrap();
        store.mark_for_deletion(a).unwrap();

        assert_eq!(store.reap(), 1);
        assert!(!store.exists(a));
        assert!(store.exists(b));
    }

    #[test]
    fn test_wipe_dirty_leaves_everything_clean() {
        let mut store = EntityStore::default();
        let a = store.create(shape()).unwrap();
        store.get_mut(a).unwrap().position_mut().unwrap().set_x(3.0);

        assert_eq!(store.wipe_dirty(), 1);
        let entity = store.get(a).unwrap();
        assert!(entity.state.is_empty());
        assert_eq!(entity.position().unwrap().dirty_mask(), 0);
        assert_eq!(store.wipe_dirty(), 0);
    }

    #[test]
    fn test_alive_ids_unique() {
        let mut store = EntityStore::default();
        let mut handles: Vec<_> = (0..20).map(|_| store.create(shape()).unwrap()).collect();
        for h in handles.drain(..10) {
            store.delete(h);
        }
        for _ in 0..15 {
            store.create(shape()).unwrap();
        }
        let ids: HashSet<EntityId> = store.iter().map(|e| e.id()).collect();
        assert_eq!(ids.len(), store.len());
    }
}
