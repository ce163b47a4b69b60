//! Vector index and its durable snapshot.

pub mod durable;
mod index;

pub use durable::{DurableVectors, LoadReport};
pub use index::{VectorHit, VectorIndex};
