//! Real-time chat client for the EV marketplace.

pub mod api;
pub mod cli;
pub mod config;
pub mod conversations;
pub mod error;
pub mod events;
pub mod polling;
pub mod reconciler;
pub mod screen;
pub mod session;
pub mod socket;
pub mod wire;

pub use api::{ChatBackend, HttpBackend};
pub use error::{ClientError, Result};
pub use events::{ChatEvent, EventBus};
pub use screen::{ChatScreen, ScreenOptions};
pub use session::{Session, SharedSession};
