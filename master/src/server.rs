//! JSON-RPC surface of the master. Every method takes a single request
//! struct and returns a response struct; transport errors never carry
//! scheduling information.

use std::net::SocketAddr;
use std::sync::Arc;

use jsonrpc_core::{Error as RpcError, IoHandler, Params, Value};
use jsonrpc_http_server::{Server, ServerBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json;

use errors::*;
use master_service::MasterService;

fn register<Req, Resp, F>(io: &mut IoHandler, name: &'static str, handler: F)
where
    Req: DeserializeOwned + 'static,
    Resp: Serialize + 'static,
    F: Fn(Req) -> Resp + Send + Sync + 'static,
{
    io.add_method(name, move |params: Params| -> ::std::result::Result<Value, RpcError> {
        let (request,): (Req,) = params.parse()?;
        let response = handler(request);
        serde_json::to_value(response).map_err(|_| RpcError::internal_error())
    });
}

pub fn start_server(service: Arc<MasterService>, addr: &SocketAddr) -> Result<Server> {
    let mut io = IoHandler::new();
    {
        let service = Arc::clone(&service);
        register(&mut io, "assign_task", move |request| {
            service.assign_task(request)
        });
    }
    {
        let service = Arc::clone(&service);
        register(&mut io, "finish_task", move |request| {
            service.finish_task(request)
        });
    }
    {
        let service = Arc::clone(&service);
        register(&mut io, "submit_job", move |request| {
            service.submit_job(request)
        });
    }
    {
        let service = Arc::clone(&service);
        register(&mut io, "update_job", move |request| {
            service.update_job(request)
        });
    }
    {
        let service = Arc::clone(&service);
        register(&mut io, "kill_job", move |request| service.kill_job(request));
    }
    {
        let service = Arc::clone(&service);
        register(&mut io, "list_jobs", move |request| {
            service.list_jobs(request)
        });
    }
    {
        let service = Arc::clone(&service);
        register(&mut io, "show_job", move |request| service.show_job(request));
    }

    ServerBuilder::new(io)
        .start_http(addr)
        .chain_err(|| format!("Unable to start master RPC server on {}", addr))
}
