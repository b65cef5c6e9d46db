pub mod base32e;
pub mod client;
pub mod mailbox;
pub mod protector;
pub mod route;
