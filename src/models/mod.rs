pub mod entity;

pub use entity::{entity_key, fields, EntityRecord, POST_ENTITY_TYPE};
