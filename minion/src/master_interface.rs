//! RPC client used by the minion to pull work from and report back to the
//! master. Transport failures surface as errors; the task loop retries
//! them with backoff.

use std::time::Duration;

use jsonrpc_client_http::HttpTransport;

use charon_proto::master as master_pb;
use errors::*;

const RPC_TIMEOUT_SECS: u64 = 5;

pub trait MasterRpc: Send + Sync {
    fn assign_task(&self, request: &master_pb::AssignTaskRequest)
        -> Result<master_pb::AssignTaskResponse>;

    fn finish_task(&self, request: &master_pb::FinishTaskRequest)
        -> Result<master_pb::FinishTaskResponse>;
}

jsonrpc_client!(pub struct MasterClient {
    pub fn assign_task(&mut self, request: master_pb::AssignTaskRequest)
        -> RpcRequest<master_pb::AssignTaskResponse>;
    pub fn finish_task(&mut self, request: master_pb::FinishTaskRequest)
        -> RpcRequest<master_pb::FinishTaskResponse>;
});

pub struct MasterInterface {
    transport: HttpTransport,
    master_endpoint: String,
}

impl MasterInterface {
    pub fn new(master_endpoint: &str) -> Result<Self> {
        let transport = HttpTransport::new()
            .timeout(Duration::from_secs(RPC_TIMEOUT_SECS))
            .standalone()
            .chain_err(|| "Error building master transport")?;
        Ok(MasterInterface {
            transport: transport,
            master_endpoint: master_endpoint.to_owned(),
        })
    }

    fn client(&self) -> Result<MasterClient<::jsonrpc_client_http::HttpHandle>> {
        let handle = self.transport
            .handle(&format!("http://{}", self.master_endpoint))
            .chain_err(|| {
                format!("Error building transport handle for {}", self.master_endpoint)
            })?;
        Ok(MasterClient::new(handle))
    }
}

impl MasterRpc for MasterInterface {
    fn assign_task(&self, request: &master_pb::AssignTaskRequest)
        -> Result<master_pb::AssignTaskResponse> {
        self.client()?
            .assign_task(request.clone())
            .call()
            .chain_err(|| "Failed to fetch task from master")
    }

    fn finish_task(&self, request: &master_pb::FinishTaskRequest)
        -> Result<master_pb::FinishTaskResponse> {
        self.client()?
            .finish_task(request.clone())
            .call()
            .chain_err(|| "Failed to report task to master")
    }
}
