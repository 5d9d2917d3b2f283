pub mod backend;
pub mod config;
pub mod context;
pub mod error;
pub mod http;
pub mod registration;
pub mod session;

pub use backend::{ChangeFeedSource, FeedSignal, NotificationBackend, PermissionStatus, PushPlatform, PushTokenBackend};
pub use config::ClientConfig;
pub use context::{ContextState, NotificationContext, Phase, Scope};
pub use error::{ClientError, ClientResult};
pub use http::HttpBackend;
pub use registration::{PushRegistrationController, PushStatus, RegistrationResult};
pub use session::{SessionDriver, SessionHandle};
