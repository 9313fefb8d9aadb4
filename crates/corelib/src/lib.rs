//! Core types: math re-exports and the world transform.

pub use glam::{EulerRot, Mat4, Quat, Vec3, vec3};

pub mod transform;

pub use transform::Transform;
