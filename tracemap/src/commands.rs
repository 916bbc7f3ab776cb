use crate::CLAP_STYLING;
use clap::{arg, command};
use tracemap_core::store::DEFAULT_GRAPH_PATH;
use tracemap_probe::runner::DEFAULT_PROBE_PROGRAM;

fn graph_arg() -> clap::Arg {
    arg!(-g --"graph" <PATH>)
        .required(false)
        .help("Graph file to load and update")
        .default_value(DEFAULT_GRAPH_PATH)
}

fn yes_arg() -> clap::Arg {
    arg!(-y --"yes")
        .required(false)
        .help("Answer yes to every confirmation prompt")
        .action(clap::ArgAction::SetTrue)
}

fn no_progress_arg() -> clap::Arg {
    arg!(--"no-progress")
        .required(false)
        .help("Hide progress bars")
        .action(clap::ArgAction::SetTrue)
}

pub(crate) fn command_argument_builder() -> clap::Command {
    clap::Command::new("tracemap")
        .version(env!("CARGO_PKG_VERSION"))
        .bin_name("tracemap")
        .styles(CLAP_STYLING)
        .arg(
            arg!(-q --"quiet" "Suppress banner and non-essential output")
                .required(false)
                .global(true),
        )
        .arg(
            arg!(-v --"verbose" "Increase log verbosity (-v debug, -vv trace)")
                .required(false)
                .action(clap::ArgAction::Count)
                .global(true),
        )
        .subcommand_required(false)
        .subcommand(
            command!("explore")
                .about(
                    "Trace routes to one or more targets and merge them into the graph. \
                Public addresses are geolocated before probing.",
                )
                .arg(graph_arg())
                .arg(
                    arg!(-t --"targets" <TARGETS>)
                        .required(false)
                        .help("Comma-separated hostnames or addresses to trace"),
                )
                .arg(
                    arg!(-n --"queries" <NUM>)
                        .required(false)
                        .help("Probes sent per hop")
                        .value_parser(clap::value_parser!(u32))
                        .default_value("1"),
                )
                .arg(
                    arg!(--"icmp")
                        .required(false)
                        .help("Also trace with ICMP echo")
                        .action(clap::ArgAction::SetTrue),
                )
                .arg(
                    arg!(--"tcp" <PORTS>)
                        .required(false)
                        .help("Also trace with TCP SYN to each comma-separated port"),
                )
                .arg(
                    arg!(--"traceroute" <PROGRAM>)
                        .required(false)
                        .help("Traceroute executable to run")
                        .default_value(DEFAULT_PROBE_PROGRAM),
                )
                .arg(
                    arg!(--"timeout" <SECONDS>)
                        .required(false)
                        .help("Seconds before a single traceroute run is abandoned (default: 180)")
                        .value_parser(clap::value_parser!(u64)),
                )
                .arg(yes_arg())
                .arg(no_progress_arg()),
        )
        .subcommand(
            command!("catalog")
                .about(
                    "Geolocate uncatalogued public addresses and save the graph. Same as \
                explore without targets.",
                )
                .arg(graph_arg())
                .arg(yes_arg())
                .arg(no_progress_arg()),
        )
        .subcommand(
            command!("show")
                .about("Print a summary of the graph file without changing it")
                .arg(graph_arg()),
        )
}
