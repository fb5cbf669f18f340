pub mod events;
pub mod orders;
pub mod progress;
