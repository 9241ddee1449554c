//! Domain Layer
//!
//! Entities and value types of the lost-and-found board.
//! This layer has NO I/O; everything async lives in the repository and
//! service modules.

mod entity;
mod item;
mod item_id;
mod photo;
mod user;

pub use entity::{DomainError, DomainResult};
pub use item::{Category, Item, ItemDraft, ItemStatus, ItemType};
pub use item_id::ItemId;
pub use photo::{ImageFile, PhotoPayload};
pub use user::User;
