//! Collaborator seams toward the renderer's entity collection.

use log::debug;
use shared::Transform;
use std::collections::HashMap;

/// Opaque mesh reference supplied by the asset side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MeshHandle(pub u32);

/// Opaque material reference supplied by the asset side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MaterialHandle(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntityId(pub u64);

/// The externally owned collection of renderable entities.
///
/// Entities spawned here belong to the collection. The replication side only
/// keeps their ids to push transforms, and despawns the ones it created when
/// their remote player goes away.
pub trait EntityCollection {
    fn spawn(&mut self, mesh: MeshHandle, material: MaterialHandle, transform: Transform)
        -> EntityId;
    fn set_transform(&mut self, entity: EntityId, transform: Transform);
    fn despawn(&mut self, entity: EntityId);
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SceneEntity {
    pub mesh: MeshHandle,
    pub material: MaterialHandle,
    pub transform: Transform,
}

/// Map-backed entity collection used by the demo binary and tests.
#[derive(Debug, Default)]
pub struct SceneEntities {
    entities: HashMap<EntityId, SceneEntity>,
    next_id: u64,
}

impl SceneEntities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, entity: EntityId) -> Option<&SceneEntity> {
        self.entities.get(&entity)
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl EntityCollection for SceneEntities {
    fn spawn(
        &mut self,
        mesh: MeshHandle,
        material: MaterialHandle,
        transform: Transform,
    ) -> EntityId {
        self.next_id += 1;
        let id = EntityId(self.next_id);
        self.entities.insert(
            id,
            SceneEntity {
                mesh,
                material,
                transform,
            },
        );
        debug!("Spawned entity {:?}", id);
        id
    }

    fn set_transform(&mut self, entity: EntityId, transform: Transform) {
        if let Some(existing) = self.entities.get_mut(&entity) {
            existing.transform = transform;
        }
    }

    fn despawn(&mut self, entity: EntityId) {
        if self.entities.remove(&entity).is_some() {
            debug!("Despawned entity {:?}", entity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_spawn_assigns_unique_ids() {
        let mut scene = SceneEntities::new();
        let a = scene.spawn(MeshHandle(1), MaterialHandle(1), Transform::IDENTITY);
        let b = scene.spawn(MeshHandle(1), MaterialHandle(2), Transform::IDENTITY);

        assert_ne!(a, b);
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.get(b).unwrap().material, MaterialHandle(2));
    }

    #[test]
    fn test_set_transform_and_despawn() {
        let mut scene = SceneEntities::new();
        let id = scene.spawn(MeshHandle(1), MaterialHandle(1), Transform::IDENTITY);

        let moved = Transform::from_position(Vec3::new(4.0, 5.0, 6.0));
        scene.set_transform(id, moved);
        assert_eq!(scene.get(id).unwrap().transform, moved);

        scene.despawn(id);
        assert!(scene.is_empty());

        // Unknown ids are ignored
        scene.set_transform(id, Transform::IDENTITY);
        scene.despawn(id);
        assert!(scene.is_empty());
    }
}
