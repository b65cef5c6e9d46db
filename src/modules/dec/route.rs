use sha2::{Digest, Sha256};

use crate::modules::dec::base32e;
use crate::modules::error::kind::ErrorKind;
use crate::modules::error::MailVaultResult;
use crate::raise_error;

/// Domain prefix of the routing hash; part of the wire contract.
pub const ROUTE_DOMAIN: &str = "tuvi.dec.route.v1";

/// Canonical names end in this zone until the production namespace opens.
pub const NAME_SUFFIX: &str = ".test";

pub const PUBLIC_KEY_LEN: usize = 32;

/// Decentralized networks by index; name claims are limited to the first.
pub const DEC_NETWORKS: &[&str] = &["decnet", "decnet.beta"];

/// A decentralized address: Base32E public key at a network tag.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DecAddress {
    /// Base32E public key, kept in the case the address carried.
    pub public_key: String,
    pub network: String,
}

impl DecAddress {
    pub fn to_address(&self) -> String {
        format!("{}@{}", self.public_key, self.network)
    }
}

/// Parse and validate `base32e@network-tag`. Fails with `InvalidArgument`
/// on anything that is not a well-formed key-shaped local part.
pub fn parse_dec_address(address: &str) -> MailVaultResult<DecAddress> {
    let (local, network) = address.rsplit_once('@').ok_or_else(|| {
        raise_error!(
            format!("'{}' is not a decentralized address", address),
            ErrorKind::InvalidArgument
        )
    })?;
    validate_public_key(local)?;
    if network.is_empty() {
        return Err(raise_error!(
            format!("'{}' has no network tag", address),
            ErrorKind::InvalidArgument
        ));
    }
    Ok(DecAddress {
        public_key: local.into(),
        network: network.into(),
    })
}

/// Whether an address parses as decentralized.
pub fn is_dec_address(address: &str) -> bool {
    parse_dec_address(address).is_ok()
}

pub fn validate_public_key(public_key: &str) -> MailVaultResult<()> {
    let bytes = base32e::decode(public_key)?;
    if bytes.len() != PUBLIC_KEY_LEN {
        return Err(raise_error!(
            format!(
                "Public key must decode to {} bytes, got {}",
                PUBLIC_KEY_LEN,
                bytes.len()
            ),
            ErrorKind::InvalidArgument
        ));
    }
    Ok(())
}

/// Routing identifier of a recipient:
/// `hex(sha256("tuvi.dec.route.v1|" + uppercase(pub_key)))`.
pub fn mailbox_id(public_key: &str) -> MailVaultResult<String> {
    validate_public_key(public_key)?;
    let mut hasher = Sha256::new();
    hasher.update(ROUTE_DOMAIN.as_bytes());
    hasher.update(b"|");
    hasher.update(public_key.to_uppercase().as_bytes());
    Ok(hex::encode(hasher.finalize()))
}

/// Canonical claim form of a display name: lowercased, whitespace and `+`
/// stripped, zone suffix appended.
pub fn canonical_name(name: &str) -> MailVaultResult<String> {
    let cleaned: String = name
        .to_lowercase()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '+')
        .collect();
    if cleaned.is_empty() {
        return Err(raise_error!(
            "Claim name cannot be empty".into(),
            ErrorKind::InvalidArgument
        ));
    }
    Ok(format!("{}{}", cleaned, NAME_SUFFIX))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_key() -> String {
        base32e::encode(&[7u8; 32])
    }

    #[test]
    fn mailbox_id_is_case_stable() {
        let key = test_key();
        let id = mailbox_id(&key).unwrap();
        assert_eq!(id.len(), 64);
        assert_eq!(mailbox_id(&key.to_uppercase()).unwrap(), id);
    }

    #[test]
    fn mailbox_id_rejects_bad_keys() {
        assert!(mailbox_id("").is_err());
        assert!(mailbox_id("not base32!").is_err());
        // Valid alphabet, wrong length.
        assert!(mailbox_id("abcdef").is_err());
    }

    #[test]
    fn canonical_name_strips_and_suffixes() {
        assert_eq!(canonical_name("Alice Smith").unwrap(), "alicesmith.test");
        assert_eq!(canonical_name("bob+tag").unwrap(), "bobtag.test");
        assert!(canonical_name("  + ").is_err());
    }

    #[test]
    fn address_parsing() {
        let key = test_key();
        let parsed = parse_dec_address(&format!("{}@decnet", key)).unwrap();
        assert_eq!(parsed.network, "decnet");
        assert!(!is_dec_address("user@example.com"));
        assert!(!is_dec_address(&key));
    }
}
