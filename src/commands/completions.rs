//! ## Shell completions

use clap::ArgMatches;
use clap_complete::{generate as clap_generate,Shell};
use crate::DYNERR;
use super::CommandError;

pub fn generate(mut main_cmd: clap::Command,cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let shell = match cmd.get_one::<String>("shell").map(|s| s.as_str()) {
        Some("bash") => Shell::Bash,
        Some("elvish") => Shell::Elvish,
        Some("fish") => Shell::Fish,
        Some("powershell") => Shell::PowerShell,
        Some("zsh") => Shell::Zsh,
        _ => return Err(Box::new(CommandError::InvalidCommand))
    };
    clap_generate(shell,&mut main_cmd,"volkit",&mut std::io::stdout());
    Ok(0)
}
