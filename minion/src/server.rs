//! JSON-RPC surface of the minion: the master's liveness probe and the
//! duplicate-attempt cancellation.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpc_core::{Error as RpcError, IoHandler, Params, Value};
use jsonrpc_http_server::{Server, ServerBuilder};
use serde_json;

use charon_proto::minion as minion_pb;
use errors::*;
use minion::MinionImpl;

pub fn start_server(minion: Arc<MinionImpl>, addr: &SocketAddr) -> Result<Server> {
    let mut io = IoHandler::new();
    {
        let minion = Arc::clone(&minion);
        io.add_method(
            "query",
            move |params: Params| -> ::std::result::Result<Value, RpcError> {
                let (request,): (minion_pb::QueryRequest,) = params.parse()?;
                serde_json::to_value(minion.query(request))
                    .map_err(|_| RpcError::internal_error())
            },
        );
    }
    {
        let minion = Arc::clone(&minion);
        io.add_method(
            "cancel_task",
            move |params: Params| -> ::std::result::Result<Value, RpcError> {
                let (request,): (minion_pb::CancelTaskRequest,) = params.parse()?;
                serde_json::to_value(minion.cancel_task(request))
                    .map_err(|_| RpcError::internal_error())
            },
        );
    }

    ServerBuilder::new(io)
        .start_http(addr)
        .chain_err(|| format!("Unable to start minion RPC server on {}", addr))
}
