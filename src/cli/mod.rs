pub mod actions;
pub mod config;
pub mod console;

use clap::{Arg, ArgMatches, Command};

/// Parse command line arguments and return ArgMatches.
pub fn parse_args() -> ArgMatches {
    command().get_matches()
}

pub fn command() -> Command {
    Command::new("twinport")
        .about("Loopback tester for a pair of serial ports")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Load port names and test timing from a TOML file")
                .value_name("FILE"),
        )
        .arg(
            Arg::new("port-a")
                .long("port-a")
                .help("Serial port used as Port1")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("port-b")
                .long("port-b")
                .help("Serial port used as Port2")
                .value_name("NAME"),
        )
        .arg(
            Arg::new("simulate")
                .long("simulate")
                .short('s')
                .help("Use an in-memory echo pair instead of serial ports")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("run")
                .long("run")
                .short('r')
                .help("Run one test without the console and exit (0 when every step passed)")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("list-ports")
                .long("list-ports")
                .short('l')
                .help("List all available serial ports and exit")
                .action(clap::ArgAction::SetTrue),
        )
        .arg(
            Arg::new("json")
                .long("json")
                .short('j')
                .help("Output one-shot results in JSON format")
                .action(clap::ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let matches = command()
            .try_get_matches_from(["twinport", "--port-a", "/dev/ttyUSB0", "--simulate", "--run"])
            .unwrap();
        assert_eq!(
            matches.get_one::<String>("port-a").map(String::as_str),
            Some("/dev/ttyUSB0")
        );
        assert!(matches.get_flag("simulate"));
        assert!(matches.get_flag("run"));
        assert!(!matches.get_flag("json"));
    }
}
