extern crate charon_proto;
extern crate chrono;
#[macro_use]
extern crate clap;
#[macro_use]
extern crate error_chain;
#[macro_use]
extern crate jsonrpc_client_core;
extern crate jsonrpc_client_http;
extern crate jsonrpc_core;
extern crate jsonrpc_http_server;
#[macro_use]
extern crate log;
extern crate rand;
extern crate serde;
#[macro_use]
extern crate serde_derive;
extern crate serde_json;
extern crate util;

mod errors {
    error_chain! {
        foreign_links {
            Io(::std::io::Error);
        }
        links {
            Util(::util::errors::Error, ::util::errors::ErrorKind);
        }
    }
}

mod config;
mod gru;
mod job_tracker;
mod master_service;
mod minion_interface;
mod parser;
mod resource_manager;
mod server;
#[cfg(test)]
mod test_support;

use std::net::SocketAddr;
use std::path::Path;
use std::str::FromStr;
use std::sync::Arc;

use config::MasterConfig;
use errors::*;
use gru::NullBackend;
use master_service::MasterService;
use minion_interface::MinionInterface;
use util::data_layer::{AbstractionLayer, NFSAbstractionLayer, NullAbstractionLayer};
use util::init_logger;
use util::naming::{FileNameService, NameService};

fn run() -> Result<()> {
    println!("Charon Master!");
    init_logger().chain_err(|| "Failed to initialise logging.")?;

    let matches = parser::parse_command_line();
    let config: Arc<MasterConfig> = Arc::new(parser::config_from_matches(&matches).chain_err(
        || "Error parsing command line",
    )?);
    let advertised = matches
        .value_of("endpoint")
        .map(|endpoint| endpoint.to_owned())
        .unwrap_or_else(|| format!("localhost:{}", config.port));

    let fs: Arc<AbstractionLayer> = match config.data_root {
        Some(ref root) => Arc::new(NFSAbstractionLayer::new(Path::new(root))),
        None => Arc::new(NullAbstractionLayer::new()),
    };
    let rpc = Arc::new(MinionInterface::new().chain_err(
        || "Error building minion interface",
    )?);
    let backend = Arc::new(NullBackend::new());
    let service = MasterService::new(Arc::clone(&config), backend, fs, rpc);

    let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", config.port)).chain_err(
        || "Invalid listen address",
    )?;
    let server = server::start_server(service, &addr).chain_err(
        || "Error starting master RPC server",
    )?;

    let naming = FileNameService::new(config.naming_root.clone());
    naming
        .put(&config.master_path, &advertised)
        .chain_err(|| "Unable to publish master endpoint")?;
    info!(
        "master endpoint published: {} -> {}",
        config.master_path,
        advertised
    );

    server.wait();
    Ok(())
}

// Macro to generate a quick error_chain main function.
// https://github.com/rust-lang-nursery/error-chain/blob/master/examples/quickstart.rs
quick_main!(run);
