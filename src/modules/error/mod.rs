use kind::ErrorKind;
use snafu::{Location, Snafu};

pub mod kind;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum MailVaultError {
    #[snafu(display("{message}"))]
    Generic {
        message: String,
        #[snafu(implicit)]
        location: Location,
        kind: ErrorKind,
    },
}

pub type MailVaultResult<T, E = MailVaultError> = std::result::Result<T, E>;

impl MailVaultError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            MailVaultError::Generic { kind, .. } => *kind,
        }
    }

    pub fn is_canceled(&self) -> bool {
        self.kind() == ErrorKind::Canceled
    }
}
