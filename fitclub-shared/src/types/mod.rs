pub mod api;
pub mod auth;
pub mod change;
pub mod event;
pub mod notification;
pub mod push;

pub use api::*;
pub use auth::*;
pub use change::*;
pub use event::*;
pub use notification::*;
pub use push::*;
