pub mod models;
pub mod secret;

pub use models::events::{SeatingEvent, Topic};
pub use secret::Masked;
