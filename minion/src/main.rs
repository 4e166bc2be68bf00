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
extern crate libc;
#[macro_use]
extern crate log;
extern crate rand;
extern crate serde_json;
extern crate util;
extern crate uuid;

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
mod executor;
mod master_interface;
mod minion;
mod parser;
mod server;
mod watch_dog;

use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;

use config::MinionConfig;
use errors::*;
use executor::{CommandExecutor, Executor};
use master_interface::MasterInterface;
use minion::MinionImpl;
use util::init_logger;
use util::naming::{FileNameService, NameService};
use watch_dog::{WatchDog, WatchFlags};

fn resolve_master(config: &MinionConfig) -> Result<String> {
    if let Some(ref master) = config.master_override {
        return Ok(master.clone());
    }
    let naming = FileNameService::new(config.naming_root.clone());
    match naming.get(&config.master_path).chain_err(
        || "Unable to reach the naming service",
    )? {
        Some(endpoint) => Ok(endpoint),
        None => Err(
            format!("no master registered under {}", config.master_path).into(),
        ),
    }
}

fn run() -> Result<()> {
    println!("Charon Minion!");
    init_logger().chain_err(|| "Failed to initialise logging.")?;

    let matches = parser::parse_command_line();
    let config: Arc<MinionConfig> = Arc::new(parser::config_from_matches(&matches).chain_err(
        || "Error parsing command line",
    )?);

    let master_endpoint = resolve_master(&config)?;
    info!("minion will work for master at {}", master_endpoint);

    let executor: Arc<Executor> = Arc::new(CommandExecutor::new());
    let master = Arc::new(MasterInterface::new(&master_endpoint).chain_err(
        || "Error building master interface",
    )?);
    let endpoint = config
        .endpoint
        .clone()
        .unwrap_or_else(|| format!("localhost:{}", config.port));
    let watch = Arc::new(WatchFlags::new());
    let minion = Arc::new(MinionImpl::new(
        Arc::clone(&config),
        endpoint.clone(),
        Arc::clone(&executor),
        master,
        Arc::clone(&watch),
    ));
    info!("minion bind endpoint on: {}", endpoint);
    info!("minion will work on job: {}", config.jobid);

    if config.kill_task {
        // Launched by the cluster as the stop command: surface the ghost
        // allocation and leave.
        return minion.check_unfinished_task();
    }

    let addr = SocketAddr::from_str(&format!("0.0.0.0:{}", config.port)).chain_err(
        || "Invalid listen address",
    )?;
    let _server = server::start_server(Arc::clone(&minion), &addr).chain_err(
        || "Error starting minion RPC server",
    )?;

    WatchDog::new(
        Arc::clone(&watch),
        &executor,
        config.flow_limit_10gb,
        config.flow_limit_1gb,
    ).spawn();

    minion.run()
}

// Macro to generate a quick error_chain main function.
// https://github.com/rust-lang-nursery/error-chain/blob/master/examples/quickstart.rs
quick_main!(run);
