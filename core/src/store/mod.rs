mod memory;
pub mod r#trait;

pub use memory::InMemoryCollectionStore;
pub use r#trait::CollectionStore;
