use std::future::Future;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::error::kind::ErrorKind;
use super::error::MailVaultResult;
use crate::raise_error;

pub mod gate;
pub mod parallel;

#[derive(Debug, PartialEq, Eq, Clone, Default, Serialize, Deserialize)]
pub struct Addr {
    /// The optional display name associated with the email address (e.g., "John Doe").
    pub name: Option<String>,
    /// The email address itself (e.g., "john.doe@example.com").
    pub address: String,
}

impl Addr {
    pub fn new(address: &str) -> Self {
        Addr {
            name: None,
            address: address.into(),
        }
    }

    pub fn named(name: &str, address: &str) -> Self {
        Addr {
            name: Some(name.into()),
            address: address.into(),
        }
    }

    /// Parse `Display Name <user@host>` forms; a bare address parses as itself.
    pub fn parse(s: &str) -> Self {
        let re = Regex::new(r#"(?:(?P<name>.*)\s*)?<(?P<email>[^<>]+)>"#).unwrap();
        if let Some(caps) = re.captures(s) {
            let name: Option<String> = caps
                .name("name")
                .map(|m| m.as_str().trim().to_string())
                .filter(|n| !n.is_empty());
            let email = caps
                .name("email")
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            Addr {
                name,
                address: email,
            }
        } else {
            Addr {
                name: None,
                address: s.trim().to_string(),
            }
        }
    }

    pub fn normalized(&self) -> String {
        normalize_address(&self.address)
    }
}

/// Uniqueness form of an address: the domain is uppercased, the local part
/// and the display form stay untouched. All address comparisons go through
/// this.
pub fn normalize_address(address: &str) -> String {
    match address.rsplit_once('@') {
        Some((local, domain)) => format!("{}@{}", local, domain.to_uppercase()),
        None => address.to_string(),
    }
}

pub fn validate_email(email: &str) -> MailVaultResult<()> {
    use std::str::FromStr;
    let parsed = email_address::EmailAddress::from_str(email).map_err(|_| {
        raise_error!(
            format!("Invalid email format: {}", email),
            ErrorKind::InvalidArgument
        )
    })?;
    if email != parsed.email() {
        return Err(raise_error!(
            format!("Invalid email format: {}", email),
            ErrorKind::InvalidArgument
        ));
    }
    Ok(())
}

/// Fail fast with `Canceled` when the caller's token has fired.
pub fn ensure_active(token: &CancellationToken) -> MailVaultResult<()> {
    if token.is_cancelled() {
        return Err(raise_error!(
            "operation canceled by caller".into(),
            ErrorKind::Canceled
        ));
    }
    Ok(())
}

/// Race a future against the caller's token. Used around network calls so a
/// mid-flight cancellation aborts the call without touching local state.
pub async fn run_cancellable<T, F>(token: &CancellationToken, fut: F) -> MailVaultResult<T>
where
    F: Future<Output = MailVaultResult<T>>,
{
    tokio::select! {
        biased;
        _ = token.cancelled() => Err(raise_error!(
            "operation canceled by caller".into(),
            ErrorKind::Canceled
        )),
        res = fut => res,
    }
}
