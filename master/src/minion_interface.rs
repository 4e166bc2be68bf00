//! RPC client used by the master to reach into minions: the monitor's
//! liveness `query` and the best-effort `cancel_task` fan-out.

use std::time::Duration;

use jsonrpc_client_http::HttpTransport;

use charon_proto::minion as pb;
use errors::*;

const QUERY_TIMEOUT_SECS: u64 = 5;
const CANCEL_TIMEOUT_SECS: u64 = 2;
const CANCEL_TRIES: u32 = 2;

pub trait MinionRpc: Send + Sync {
    fn query(&self, endpoint: &str) -> Result<pb::QueryResponse>;

    fn cancel_task(&self, endpoint: &str, request: &pb::CancelTaskRequest)
        -> Result<pb::CancelTaskResponse>;
}

jsonrpc_client!(pub struct MinionClient {
    pub fn query(&mut self, request: pb::QueryRequest) -> RpcRequest<pb::QueryResponse>;
    pub fn cancel_task(&mut self, request: pb::CancelTaskRequest)
        -> RpcRequest<pb::CancelTaskResponse>;
});

pub struct MinionInterface {
    query_transport: HttpTransport,
    cancel_transport: HttpTransport,
}

impl MinionInterface {
    pub fn new() -> Result<Self> {
        let query_transport = HttpTransport::new()
            .timeout(Duration::from_secs(QUERY_TIMEOUT_SECS))
            .standalone()
            .chain_err(|| "Error building query transport")?;
        let cancel_transport = HttpTransport::new()
            .timeout(Duration::from_secs(CANCEL_TIMEOUT_SECS))
            .standalone()
            .chain_err(|| "Error building cancel transport")?;
        Ok(MinionInterface {
            query_transport: query_transport,
            cancel_transport: cancel_transport,
        })
    }
}

impl MinionRpc for MinionInterface {
    fn query(&self, endpoint: &str) -> Result<pb::QueryResponse> {
        let handle = self.query_transport
            .handle(&format!("http://{}", endpoint))
            .chain_err(|| format!("Error building transport handle for {}", endpoint))?;
        let mut client = MinionClient::new(handle);
        client
            .query(pb::QueryRequest { detail: false })
            .call()
            .chain_err(|| format!("Failed to query minion at {}", endpoint))
    }

    fn cancel_task(&self, endpoint: &str, request: &pb::CancelTaskRequest)
        -> Result<pb::CancelTaskResponse> {
        let handle = self.cancel_transport
            .handle(&format!("http://{}", endpoint))
            .chain_err(|| format!("Error building transport handle for {}", endpoint))?;
        let mut client = MinionClient::new(handle);

        let mut last_err: Option<Error> = None;
        for _ in 0..CANCEL_TRIES {
            match client.cancel_task(request.clone()).call() {
                Ok(response) => return Ok(response),
                Err(err) => {
                    last_err = Some(Error::with_chain(
                        err,
                        format!("Failed to cancel task on {}", endpoint),
                    ))
                }
            }
        }
        Err(last_err.unwrap_or_else(|| "cancel task failed".into()))
    }
}
