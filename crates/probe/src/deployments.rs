use serde::Deserialize;
use std::{
    fs, io,
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;
use web3::types::H160;

#[derive(Debug, Error)]
pub enum DeploymentError {
    #[error("No deployment record for contract '{name}' at {}", path.display())]
    NotFound { name: String, path: PathBuf },
    #[error("Failed to read the deployment record for contract '{name}'")]
    Io {
        name: String,
        #[source]
        source: io::Error,
    },
    #[error("The deployment record for contract '{name}' is not valid JSON")]
    Json {
        name: String,
        #[source]
        source: serde_json::Error,
    },
}

/// A deployment artifact, as written by the deployment tooling. Only the
/// fields the probe needs are kept; everything else in the record is ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct Deployment {
    pub address: H160,
    pub abi: serde_json::Value,
}

/// Maps contract names to their deployment artifacts, stored as one JSON file
/// per contract under `<deployments_dir>/<network>/`.
pub struct DeploymentRegistry {
    dir: PathBuf,
}

impl DeploymentRegistry {
    pub fn new(deployments_dir: impl AsRef<Path>, network: &str) -> Self {
        Self {
            dir: deployments_dir.as_ref().join(network),
        }
    }

    pub fn get(&self, name: &str) -> Result<Deployment, DeploymentError> {
        let path = self.dir.join(format!("{name}.json"));
        let text = fs::read_to_string(&path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => DeploymentError::NotFound {
                name: name.to_string(),
                path: path.clone(),
            },
            _ => DeploymentError::Io {
                name: name.to_string(),
                source,
            },
        })?;
        let deployment: Deployment =
            serde_json::from_str(&text).map_err(|source| DeploymentError::Json {
                name: name.to_string(),
                source,
            })?;
        debug!(contract = name, address = ?deployment.address, "Loaded deployment record.");
        Ok(deployment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> DeploymentRegistry {
        DeploymentRegistry::new(
            format!("{}/test/deployments", env!("CARGO_MANIFEST_DIR")),
            "bsc",
        )
    }

    #[test]
    fn resolves_the_lottery_deployment() {
        let deployment = registry().get("Lottery").unwrap();
        assert_eq!(
            format!("{:?}", deployment.address),
            "0x5fbdb2315678afecb367f032d93f642f64180aa3"
        );
        assert!(deployment.abi.is_array());
    }

    #[test]
    fn unknown_contract_is_not_found() {
        let err = registry().get("Raffle").unwrap_err();
        assert!(matches!(err, DeploymentError::NotFound { name, .. } if name == "Raffle"));
    }

    #[test]
    fn malformed_record_is_rejected() {
        let err = registry().get("Broken").unwrap_err();
        assert!(matches!(err, DeploymentError::Json { .. }));
    }
}
