pub mod common;
pub mod dec;
pub mod error;
pub mod logger;
pub mod mailbox;
pub mod mailer;
pub mod store;
pub mod sync;
pub mod utils;
