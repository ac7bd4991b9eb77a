use crate::deployments::Deployment;
use crate::hex_string;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, trace};
use web3::{
    api::Eth,
    ethabi::{self, Token},
    types::{BlockId, BlockNumber, Bytes, CallRequest, H160, U256, U64},
    Transport,
};

const GET_ACTIVITY_INFO: &str = "getActivityInfo";
const COUNTER_FIELD: &str = "counter";

#[derive(Debug, Error)]
pub enum ContractError {
    #[error("The deployment ABI is not a valid contract interface")]
    InvalidAbi(#[from] serde_json::Error),
    #[error(transparent)]
    Abi(#[from] ethabi::Error),
    #[error("JSON-RPC call failed: {0}")]
    Rpc(#[from] web3::Error),
    #[error("The 'getActivityInfo' output has no usable 'counter' field")]
    MissingCounter,
}

/// The slice of `getActivityInfo`'s return value the probe cares about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivityInfo {
    pub counter: U256,
}

/// An ABI-typed handle to a deployed Lottery instance.
pub struct Lottery<T>
where
    T: Clone + Transport,
{
    eth: Eth<T>,
    address: H160,
    function: ethabi::Function,
    counter_slot: CounterSlot,
}

impl<T> Lottery<T>
where
    T: Clone + Transport,
{
    /// Binds a handle to the address recorded in `deployment`, using the ABI
    /// carried by the same record.
    pub fn at(eth: &Eth<T>, deployment: &Deployment) -> Result<Self, ContractError> {
        let interface: ethabi::Contract = serde_json::from_value(deployment.abi.clone())?;
        let function = interface.function(GET_ACTIVITY_INFO)?.clone();
        let counter_slot = locate_counter(&deployment.abi)?;
        Ok(Self {
            eth: eth.clone(),
            address: deployment.address,
            function,
            counter_slot,
        })
    }

    /// Queries `getActivityInfo(counter_id)` as a read-only call evaluated at
    /// the given historical block height. A single attempt, no retries.
    pub async fn activity_info(
        &self,
        counter_id: u64,
        from: H160,
        block_height: u64,
    ) -> Result<ActivityInfo, ContractError> {
        let data = self.function.encode_input(&[Token::Uint(counter_id.into())])?;
        trace!(calldata = %hex_string(&data), block_height, "Querying the Lottery contract.");

        let request = CallRequest {
            from: Some(from),
            to: Some(self.address),
            data: Some(Bytes(data)),
            ..Default::default()
        };
        let block = BlockId::Number(BlockNumber::Number(U64::from(block_height)));
        let output = self.eth.call(request, Some(block)).await?;

        let tokens = self.function.decode_output(&output.0)?;
        let counter = self.counter_slot.extract(&tokens)?;
        debug!(%counter, block_height, "The Lottery contract answered.");
        Ok(ActivityInfo { counter })
    }
}

/// Where the `counter` value lives in the decoded call output.
///
/// [`ethabi::ParamType`] drops the names of tuple components, so the position
/// is resolved upfront from the raw ABI JSON instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CounterSlot {
    /// A named top-level output parameter.
    Output(usize),
    /// A named component of a single struct-shaped (tuple) output.
    Component(usize),
}

impl CounterSlot {
    fn extract(self, tokens: &[Token]) -> Result<U256, ContractError> {
        let token = match self {
            CounterSlot::Component(position) => match tokens {
                [Token::Tuple(components)] => components.get(position),
                _ => None,
            },
            CounterSlot::Output(position) => tokens.get(position),
        };
        token
            .cloned()
            .and_then(Token::into_uint)
            .ok_or(ContractError::MissingCounter)
    }
}

fn locate_counter(abi: &Value) -> Result<CounterSlot, ContractError> {
    let outputs = abi
        .as_array()
        .into_iter()
        .flatten()
        .find(|entry| {
            entry.get("type").and_then(Value::as_str) == Some("function")
                && entry.get("name").and_then(Value::as_str) == Some(GET_ACTIVITY_INFO)
        })
        .and_then(|function| function.get("outputs").and_then(Value::as_array))
        .ok_or(ContractError::MissingCounter)?;

    let named_position = |params: &[Value]| {
        params
            .iter()
            .position(|param| param.get("name").and_then(Value::as_str) == Some(COUNTER_FIELD))
    };

    match outputs.as_slice() {
        [only] if only.get("type").and_then(Value::as_str) == Some("tuple") => {
            let components = only
                .get("components")
                .and_then(Value::as_array)
                .ok_or(ContractError::MissingCounter)?;
            named_position(components)
                .map(CounterSlot::Component)
                .ok_or(ContractError::MissingCounter)
        }
        params => named_position(params)
            .map(CounterSlot::Output)
            .ok_or(ContractError::MissingCounter),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployments::DeploymentRegistry;
    use jsonrpc_core::Call;
    use serde_json::json;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::{Arc, Mutex};
    use web3::{RequestId, Web3};

    const BLOCK_HEIGHT: u64 = 33_530_163;

    /// Replays canned JSON-RPC responses and records every request sent.
    #[derive(Debug, Clone)]
    struct MockTransport {
        requests: Arc<Mutex<Vec<(String, Vec<Value>)>>>,
        responses: Arc<Mutex<VecDeque<Result<Value, web3::Error>>>>,
    }

    impl MockTransport {
        fn replying(responses: Vec<Result<Value, web3::Error>>) -> Self {
            Self {
                requests: Arc::new(Mutex::new(Vec::new())),
                responses: Arc::new(Mutex::new(responses.into())),
            }
        }

        fn requests(&self) -> Vec<(String, Vec<Value>)> {
            self.requests.lock().unwrap().clone()
        }
    }

    impl Transport for MockTransport {
        type Out = Pin<Box<dyn Future<Output = web3::error::Result<Value>>>>;

        fn prepare(&self, method: &str, params: Vec<Value>) -> (RequestId, Call) {
            let mut requests = self.requests.lock().unwrap();
            requests.push((method.to_string(), params.clone()));
            (requests.len(), web3::helpers::build_request(1, method, params))
        }

        fn send(&self, _id: RequestId, _request: Call) -> Self::Out {
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(web3::Error::Unreachable));
            Box::pin(std::future::ready(response))
        }
    }

    fn fixture_deployment() -> Deployment {
        DeploymentRegistry::new(
            format!("{}/test/deployments", env!("CARGO_MANIFEST_DIR")),
            "bsc",
        )
        .get("Lottery")
        .unwrap()
    }

    fn deployment_with_abi(abi: Value) -> Deployment {
        serde_json::from_value(json!({
            "address": "0x5fbdb2315678afecb367f032d93f642f64180aa3",
            "abi": abi,
        }))
        .unwrap()
    }

    /// ABI-encodes an `ActivityInfo` struct return matching the fixture ABI.
    fn encoded_activity_info(counter: u64) -> Value {
        let output = ethabi::encode(&[Token::Tuple(vec![
            Token::Uint(3u64.into()),
            Token::Uint(counter.into()),
            Token::Uint(34_000_000u64.into()),
            Token::Bool(true),
        ])]);
        json!(hex_string(&output))
    }

    #[tokio::test]
    async fn queries_the_counter_at_the_pinned_block() {
        let transport = MockTransport::replying(vec![Ok(encoded_activity_info(42))]);
        let deployment = fixture_deployment();
        let lottery = Lottery::at(&Web3::new(transport.clone()).eth(), &deployment).unwrap();
        let from = H160::repeat_byte(0x11);

        let info = lottery.activity_info(3, from, BLOCK_HEIGHT).await.unwrap();
        assert_eq!(info.counter, U256::from(42u64));

        let requests = transport.requests();
        assert_eq!(requests.len(), 1, "a single eth_call, no retries");
        let (method, params) = &requests[0];
        assert_eq!(method, "eth_call");
        assert_eq!(params[1], json!("0x1ffa133"));
        assert_eq!(params[0]["to"], json!(format!("{:?}", deployment.address)));
        assert_eq!(params[0]["from"], json!(format!("{:?}", from)));
    }

    #[tokio::test]
    async fn a_revert_propagates_as_an_rpc_error() {
        let revert = web3::Error::Rpc(jsonrpc_core::Error {
            code: jsonrpc_core::ErrorCode::ServerError(3),
            message: "execution reverted".to_string(),
            data: None,
        });
        let transport = MockTransport::replying(vec![Err(revert)]);
        let lottery =
            Lottery::at(&Web3::new(transport).eth(), &fixture_deployment()).unwrap();

        let result = lottery
            .activity_info(3, H160::repeat_byte(0x11), BLOCK_HEIGHT)
            .await;
        assert!(matches!(result, Err(ContractError::Rpc(_))));
    }

    #[tokio::test]
    async fn flat_named_outputs_are_supported() {
        let abi = json!([{
            "type": "function",
            "name": "getActivityInfo",
            "stateMutability": "view",
            "inputs": [{"name": "activityId", "type": "uint256"}],
            "outputs": [
                {"name": "activityId", "type": "uint256"},
                {"name": "counter", "type": "uint256"},
            ],
        }]);
        let output = ethabi::encode(&[Token::Uint(3u64.into()), Token::Uint(42u64.into())]);
        let transport = MockTransport::replying(vec![Ok(json!(hex_string(&output)))]);
        let lottery =
            Lottery::at(&Web3::new(transport).eth(), &deployment_with_abi(abi)).unwrap();

        let info = lottery
            .activity_info(3, H160::repeat_byte(0x11), BLOCK_HEIGHT)
            .await
            .unwrap();
        assert_eq!(info.counter, U256::from(42u64));
    }

    #[test]
    fn a_missing_counter_field_is_an_error() {
        let abi = json!([{
            "type": "function",
            "name": "getActivityInfo",
            "stateMutability": "view",
            "inputs": [{"name": "activityId", "type": "uint256"}],
            "outputs": [{"name": "total", "type": "uint256"}],
        }]);
        let transport = MockTransport::replying(vec![]);
        let result = Lottery::at(&Web3::new(transport).eth(), &deployment_with_abi(abi));
        assert!(matches!(result, Err(ContractError::MissingCounter)));
    }

    #[test]
    fn an_abi_without_the_accessor_is_an_error() {
        let abi = json!([{
            "type": "function",
            "name": "enterLottery",
            "stateMutability": "payable",
            "inputs": [{"name": "activityId", "type": "uint256"}],
            "outputs": [],
        }]);
        let transport = MockTransport::replying(vec![]);
        let result = Lottery::at(&Web3::new(transport).eth(), &deployment_with_abi(abi));
        assert!(matches!(result, Err(ContractError::Abi(_))));
    }
}
