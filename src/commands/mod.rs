//! # CLI Subcommands
//!
//! Contains modules that run the subcommands.  Each returns the process
//! exit code: 0 for success, 1 when a walk completed but found hard
//! errors, with fatal errors propagating to `main` as code 2.

pub mod scan;
pub mod save;
pub mod diff;
pub mod restore;
pub mod sector;
pub mod completions;

use clap::ArgMatches;
use std::str::FromStr;
use crate::dio;
use crate::dio::BlockSource;
use crate::fs::Flavor;
use crate::DYNERR;

#[derive(thiserror::Error,Debug)]
pub enum CommandError {
    #[error("Command could not be interpreted")]
    InvalidCommand,
    #[error("One of the parameters was out of range")]
    OutOfRange,
    #[error("Options were combined in an unsupported way")]
    BadOptionCombination,
    #[error("File not found")]
    FileNotFound
}

/// The global switches, threaded from the command line into every verb.
pub struct Globals {
    pub writable: bool,
    pub ignore_lock: bool,
    pub hex: bool,
    pub force: Option<Flavor>
}

impl Globals {
    pub fn from_matches(cmd: &ArgMatches) -> Result<Self,DYNERR> {
        let force = match cmd.get_one::<String>("fs") {
            Some(s) => Some(Flavor::from_str(s)?),
            None => None
        };
        Ok(Self {
            writable: cmd.get_flag("writable"),
            ignore_lock: cmd.get_flag("ignore-lock"),
            hex: cmd.get_flag("hex"),
            force
        })
    }
}

/// Open a block source with the global switches applied.
pub fn open_source(name: &str,allowed: u8,for_write: bool,globals: &Globals,show_geometry: bool)
    -> Result<Box<dyn BlockSource>,DYNERR> {
    let cfg = dio::OpenCfg {
        write_enable: globals.writable,
        ignore_lock: globals.ignore_lock,
        show_geometry
    };
    dio::open(name,allowed,for_write,&cfg)
}

/// Print a labeled list of numbers, wrapped the way terminals like.
pub fn print_list(label: &str,items: &[String]) {
    if items.len()==0 {
        return;
    }
    let mut line = label.to_string();
    for item in items {
        if line.len() + item.len() + 1 >= 79 {
            println!("{}",line);
            line = " ".to_string();
        }
        line += " ";
        line += item;
    }
    println!("{}",line);
}
