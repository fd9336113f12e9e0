mod tab_registry;

pub use tab_registry::TabRegistry;
