//! # Command Line Interface
//!
//! Dispatch commands to `commands` module.

use env_logger;
#[cfg(windows)]
use colored;
use volkit::commands;
use volkit::commands::CommandError;
mod cli;

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    #[cfg(windows)]
    colored::control::set_virtual_terminal(true).unwrap();

    let main_cmd = cli::build_cli();
    let matches = main_cmd.get_matches();

    let result = match matches.subcommand() {
        Some(("completions",cmd)) => commands::completions::generate(cli::build_cli(),cmd),
        Some(("info",cmd)) => commands::scan::info(cmd),
        Some(("check",cmd)) => commands::scan::check(cmd),
        Some(("dir",cmd)) => commands::scan::dir(cmd),
        Some(("copy",cmd)) => commands::scan::copy(cmd),
        Some(("save",cmd)) => commands::save::save(cmd),
        Some(("crc",cmd)) => commands::save::crc(cmd),
        Some(("diff",cmd)) => commands::diff::diff(cmd),
        Some(("restore",cmd)) => commands::restore::restore(cmd),
        Some(("read",cmd)) => commands::sector::read(cmd),
        Some(("write",cmd)) => commands::sector::write(cmd),
        _ => {
            log::error!("No subcommand was found, try `volkit --help`");
            Err(Box::new(CommandError::InvalidCommand) as Box<dyn std::error::Error>)
        }
    };

    match result {
        Ok(rc) => std::process::exit(rc),
        Err(e) => {
            eprintln!("ERROR: {}",e);
            std::process::exit(2);
        }
    }
}
