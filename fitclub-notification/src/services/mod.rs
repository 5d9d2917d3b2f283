pub mod notification_service;
pub mod push_token_service;

pub use notification_service::NotificationService;
pub use push_token_service::PushTokenRegistry;
