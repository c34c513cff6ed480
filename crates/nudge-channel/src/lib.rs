pub mod adapter;
pub mod connector;
pub mod credentials;
pub mod trust;

pub use adapter::{continue_conversation, Channel, TurnContext};
pub use connector::BotConnector;
pub use credentials::{AppCredentials, CallerIdentity};
pub use trust::TrustedServiceUrls;
