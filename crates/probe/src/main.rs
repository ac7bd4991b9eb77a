mod accounts;
mod config;
mod contracts;
mod deployments;
mod diagnostics;

use anyhow::Context;
use config::Config;
use contracts::Lottery;
use deployments::DeploymentRegistry;
use diagnostics::init_logging;
use std::time::Duration;
use tracing::{debug, info};
use web3::{transports::Http, Web3};

/// The contract under inspection, as named by its deployment record.
const CONTRACT_NAME: &str = "Lottery";
/// The named account that deployed the contract. Its address is sent as the
/// `from` field of the read-only call.
const DEPLOYER_ACCOUNT: &str = "deployer";

// These two values pin the query to one activity at one point in the chain's
// history. They were picked while chasing a specific counter discrepancy and
// carry no general meaning.
const COUNTER_ID: u64 = 3;
const BLOCK_HEIGHT: u64 = 33_530_163;

#[tokio::main]
async fn main() {
    let config = match Config::parse() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{err}");
            std::process::exit(1);
        }
    };
    init_logging(config.log_level);

    match run(&config).await {
        Ok(()) => println!("main: exit"),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(1);
        }
    }
}

/// One pass over the whole diagnostic sequence: signer, deployment record,
/// contract handle, pinned query. Strictly sequential, single attempt.
async fn run(config: &Config) -> anyhow::Result<()> {
    let signer = config.accounts.resolve(DEPLOYER_ACCOUNT)?;
    debug!(deployer = ?signer.address(), "Resolved the deployer account.");

    let registry = DeploymentRegistry::new(&config.deployments_dir, &config.network);
    let deployment = registry.get(CONTRACT_NAME)?;
    info!(
        contract = CONTRACT_NAME,
        address = ?deployment.address,
        network = %config.network,
        "Resolved the deployment record."
    );

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(60))
        .build()
        .context("Failed to build the JSON-RPC HTTP client")?;
    let transport = Http::with_client(client, config.jrpc_url.clone());
    let lottery = Lottery::at(&Web3::new(transport).eth(), &deployment)?;

    let info = lottery
        .activity_info(COUNTER_ID, signer.address(), BLOCK_HEIGHT)
        .await
        .context("Failed to query the Lottery contract")?;
    println!("counter at block {BLOCK_HEIGHT}: {}", info.counter);
    Ok(())
}

pub fn hex_string(bytes: &[u8]) -> String {
    format!("0x{}", hex::encode(bytes))
}
