pub mod qdrant;

pub use qdrant::{QdrantDistance, QdrantStore};
