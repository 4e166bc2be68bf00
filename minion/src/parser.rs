use std::str::FromStr;

use clap::{App, Arg, ArgMatches};

use charon_proto::job as pb;
use config::MinionConfig;
use errors::*;

pub fn parse_command_line<'a>() -> ArgMatches<'a> {
    App::new("minion")
        .version(crate_version!())
        .about("Task worker of the charon mapreduce framework")
        .arg(
            Arg::with_name("jobid")
                .long("jobid")
                .help("The job this minion works for")
                .takes_value(true)
                .required(true),
        )
        .arg(
            Arg::with_name("work-mode")
                .long("work-mode")
                .help("One of map, reduce, map-only")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("naming-root")
                .long("naming-root")
                .help("Root directory of the file-backed naming service")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("master-path")
                .long("master-path")
                .help("Naming key under which the master publishes itself")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("master")
                .long("master")
                .short("m")
                .help("Master endpoint, bypassing the naming service")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("kill-task")
                .long("kill-task")
                .help("Report the breakpoint as killed and exit"),
        )
        .arg(
            Arg::with_name("suspend-time")
                .long("suspend-time")
                .help("Upper bound of the random backoff, in seconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("flow-limit-10gb")
                .long("flow-limit-10gb")
                .help("NIC throughput ceiling on 10 GbE hosts, bytes/s")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("flow-limit-1gb")
                .long("flow-limit-1gb")
                .help("NIC throughput ceiling on 1 GbE hosts, bytes/s")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .help("Port the minion RPC service listens on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("endpoint")
                .long("endpoint")
                .help("Endpoint advertised to the master, host:port")
                .takes_value(true),
        )
        .get_matches()
}

fn override_arg<T: FromStr>(matches: &ArgMatches, name: &str, field: &mut T) -> Result<()> {
    if let Some(value) = matches.value_of(name) {
        *field = value.parse().map_err(|_| {
            Error::from(format!("Invalid value for --{}: {}", name, value))
        })?;
    }
    Ok(())
}

fn parse_work_mode(raw: &str) -> Result<pb::WorkMode> {
    match raw {
        "map" => Ok(pb::WorkMode::Map),
        "reduce" => Ok(pb::WorkMode::Reduce),
        "map-only" => Ok(pb::WorkMode::MapOnly),
        other => Err(format!("unknown work mode: {}", other).into()),
    }
}

pub fn config_from_matches(matches: &ArgMatches) -> Result<MinionConfig> {
    let mut config = MinionConfig::default();
    config.jobid = matches.value_of("jobid").unwrap_or("").to_owned();
    if let Some(raw) = matches.value_of("work-mode") {
        config.work_mode = parse_work_mode(raw)?;
    }
    override_arg(matches, "naming-root", &mut config.naming_root)?;
    override_arg(matches, "master-path", &mut config.master_path)?;
    if let Some(master) = matches.value_of("master") {
        config.master_override = Some(master.to_owned());
    }
    config.kill_task = matches.is_present("kill-task");
    override_arg(matches, "suspend-time", &mut config.suspend_time)?;
    override_arg(matches, "flow-limit-10gb", &mut config.flow_limit_10gb)?;
    override_arg(matches, "flow-limit-1gb", &mut config.flow_limit_1gb)?;
    override_arg(matches, "port", &mut config.port)?;
    if let Some(endpoint) = matches.value_of("endpoint") {
        config.endpoint = Some(endpoint.to_owned());
    }
    Ok(config)
}
