use std::str::FromStr;

use clap::{App, Arg, ArgMatches};

use config::MasterConfig;
use errors::*;

pub fn parse_command_line<'a>() -> ArgMatches<'a> {
    App::new("master")
        .version(crate_version!())
        .about("Job tracking master of the charon mapreduce framework")
        .arg(
            Arg::with_name("port")
                .long("port")
                .short("p")
                .help("Port the master RPC service listens on")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("endpoint")
                .long("endpoint")
                .help("Endpoint advertised to minions, host:port")
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
            Arg::with_name("data-root")
                .long("data-root")
                .help("Mount point of the shared job filesystem")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("deploy-step")
                .long("deploy-step")
                .help("Fan-out with which worker groups are deployed")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("input-block-size")
                .long("input-block-size")
                .help("Largest input range a single map item covers, in bytes")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("parallel-attempts")
                .long("parallel-attempts")
                .help("Most attempts of one item allowed to run at once")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("replica-begin")
                .long("replica-begin")
                .help("Number of trailing items treated as end-game items")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("replica-begin-percent")
                .long("replica-begin-percent")
                .help("Percentage of trailing items treated as end-game items")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("replica-num")
                .long("replica-num")
                .help("Speculative replicas queued per end-game item")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("left-percent")
                .long("left-percent")
                .help("Percentage of minions kept when work runs out")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("first-sleeptime")
                .long("first-sleeptime")
                .help("Monitor delay before any attempt completed, in seconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("time-tolerance")
                .long("time-tolerance")
                .help("Longest monitor sleep, in seconds")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("gc-interval")
                .long("gc-interval")
                .help("Seconds a retracted job is kept before collection")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("retry-bound")
                .long("retry-bound")
                .help("Default per-item retry budget")
                .takes_value(true),
        )
        .arg(
            Arg::with_name("max-counters-per-job")
                .long("max-counters-per-job")
                .help("Most distinct counter keys a job may accumulate")
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

pub fn config_from_matches(matches: &ArgMatches) -> Result<MasterConfig> {
    let mut config = MasterConfig::default();
    override_arg(matches, "port", &mut config.port)?;
    override_arg(matches, "naming-root", &mut config.naming_root)?;
    override_arg(matches, "master-path", &mut config.master_path)?;
    if let Some(data_root) = matches.value_of("data-root") {
        config.data_root = Some(data_root.to_owned());
    }
    override_arg(matches, "deploy-step", &mut config.deploy_step)?;
    override_arg(matches, "input-block-size", &mut config.input_block_size)?;
    override_arg(matches, "parallel-attempts", &mut config.parallel_attempts)?;
    override_arg(matches, "replica-begin", &mut config.replica_begin)?;
    override_arg(
        matches,
        "replica-begin-percent",
        &mut config.replica_begin_percent,
    )?;
    override_arg(matches, "replica-num", &mut config.replica_num)?;
    override_arg(matches, "left-percent", &mut config.left_percent)?;
    override_arg(matches, "first-sleeptime", &mut config.first_sleeptime)?;
    override_arg(matches, "time-tolerance", &mut config.time_tolerance)?;
    override_arg(matches, "gc-interval", &mut config.gc_interval)?;
    override_arg(matches, "retry-bound", &mut config.retry_bound)?;
    override_arg(
        matches,
        "max-counters-per-job",
        &mut config.max_counters_per_job,
    )?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_arguments() {
        let matches = App::new("master").get_matches_from(vec!["master"]);
        let config = config_from_matches(&matches).unwrap();
        assert_eq!(9917, config.port);
        assert_eq!(5, config.parallel_attempts);
        assert_eq!(None, config.data_root);
    }
}
