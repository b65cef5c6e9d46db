pub mod modules;

pub use modules::error::{MailVaultError, MailVaultResult};
