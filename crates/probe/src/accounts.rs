use secp256k1::SecretKey;
use std::collections::HashMap;
use thiserror::Error;
use web3::{
    signing::{Key, SecretKeyRef},
    types::H160,
};

#[derive(Debug, Error)]
pub enum AccountError {
    #[error("No account named '{0}' in the configured account registry")]
    Unknown(String),
}

/// The named accounts this probe may originate calls from.
#[derive(Clone, Debug)]
pub struct AccountRegistry {
    keys: HashMap<String, SecretKey>,
}

impl AccountRegistry {
    pub fn new(keys: HashMap<String, SecretKey>) -> Self {
        Self { keys }
    }

    pub fn resolve(&self, name: &str) -> Result<Signer, AccountError> {
        self.keys
            .get(name)
            .copied()
            .map(|secret_key| Signer { secret_key })
            .ok_or_else(|| AccountError::Unknown(name.to_string()))
    }
}

/// An identity capable of originating calls, resolved from a named account.
#[derive(Clone, Debug)]
pub struct Signer {
    secret_key: SecretKey,
}

impl Signer {
    /// The on-chain address derived from the account's secret key.
    pub fn address(&self) -> H160 {
        SecretKeyRef::new(&self.secret_key).address()
    }
}
