//! Core data structures for connect3d
//!
//! This crate provides the fundamental types shared by the connect3d
//! workspace: points, point clouds, triangle meshes, and the common
//! error type.

pub mod error;
pub mod mesh;
pub mod point;
pub mod point_cloud;

pub use error::*;
pub use mesh::*;
pub use point::*;
pub use point_cloud::*;

/// Re-export commonly used types from nalgebra
pub use nalgebra::{Matrix3, Matrix4, Point3, Vector3};

/// Common result type for connect3d operations
pub type Result<T> = std::result::Result<T, Error>;
