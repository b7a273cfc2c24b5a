pub mod event;
pub mod ids;
pub mod replicated_entity;
pub mod wire;
