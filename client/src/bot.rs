//! Scripted local player for the headless demo client.
//!
//! Stands in for the physics/input side: walks a circle and fires straight
//! projectiles into free slots.

use glam::{Quat, Vec3};
use shared::{Transform, MAX_PROJECTILES};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BotProjectile {
    pub transform: Transform,
    pub velocity: Vec3,
    pub age: f32,
}

#[derive(Debug, Clone)]
pub struct OrbitBot {
    center: Vec3,
    radius: f32,
    angular_speed: f32,
    angle: f32,
    fire_interval: f32,
    since_fire: f32,
    projectile_speed: f32,
    projectile_lifetime: f32,
    projectiles: [Option<BotProjectile>; MAX_PROJECTILES],
}

impl OrbitBot {
    /// Creates a bot walking a circle around `center`, starting at angle
    /// `phase` in radians.
    pub fn new(center: Vec3, radius: f32, angular_speed: f32, phase: f32) -> Self {
        Self {
            center,
            radius,
            angular_speed,
            angle: phase,
            fire_interval: 0.5,
            since_fire: 0.0,
            projectile_speed: 20.0,
            projectile_lifetime: 2.0,
            projectiles: [None; MAX_PROJECTILES],
        }
    }

    pub fn with_fire_interval(mut self, seconds: f32) -> Self {
        self.fire_interval = seconds;
        self
    }

    /// Current position and heading of the bot.
    pub fn transform(&self) -> Transform {
        let offset = Vec3::new(self.angle.cos(), 0.0, self.angle.sin()) * self.radius;
        // Face along the direction of travel
        let heading = Quat::from_rotation_y(-self.angle);
        Transform::new(self.center + offset, heading)
    }

    /// Advances the walk and every live projectile.
    pub fn step(&mut self, dt: f32) -> Transform {
        self.angle = (self.angle + self.angular_speed * dt) % std::f32::consts::TAU;
        self.since_fire += dt;

        for projectile in self.projectiles.iter_mut().flatten() {
            projectile.transform.position += projectile.velocity * dt;
            projectile.age += dt;
        }

        self.transform()
    }

    /// Fires into the first free slot once the fire interval has passed.
    pub fn try_fire(&mut self) -> Option<(usize, Transform)> {
        if self.since_fire < self.fire_interval {
            return None;
        }
        let slot = self.projectiles.iter().position(Option::is_none)?;

        let origin = self.transform();
        let velocity = origin.orientation * Vec3::Z * self.projectile_speed;
        self.projectiles[slot] = Some(BotProjectile {
            transform: origin,
            velocity,
            age: 0.0,
        });
        self.since_fire = 0.0;
        Some((slot, origin))
    }

    /// Frees the slots of projectiles that outlived their lifetime.
    pub fn expire(&mut self) -> Vec<usize> {
        let lifetime = self.projectile_lifetime;
        let mut expired = Vec::new();
        for (slot, entry) in self.projectiles.iter_mut().enumerate() {
            if entry.is_some_and(|p| p.age >= lifetime) {
                *entry = None;
                expired.push(slot);
            }
        }
        expired
    }

    pub fn projectile_transforms(&self) -> [Option<Transform>; MAX_PROJECTILES] {
        self.projectiles.map(|p| p.map(|p| p.transform))
    }
}
