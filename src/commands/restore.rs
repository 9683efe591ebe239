//! ## `restore`: copy sectors from a snapshot back to a volume
//!
//! The one deliberately destructive verb.  It demands the write-enable
//! switch, asks for typed confirmation, verifies that every sector it is
//! about to write can be read from the snapshot first, and can save the
//! overwritten sectors into a backup snapshot of their own.

use clap::ArgMatches;
use std::io::BufRead;
use crate::dio::{self,OpenCfg,DIO_DISK,DIO_SNAPSHOT,SECTOR_SIZE};
use crate::dio::save::{SaveFile,SaveKind};
use crate::fs::Report;
use crate::{parse_number,DYNERR};
use super::Globals;

pub fn restore(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let target = cmd.get_one::<String>("TARGET").expect("required argument");
    let source = cmd.get_one::<String>("SOURCE").expect("required argument");
    let maybe_sector = cmd.get_one::<String>("SECTOR");
    let backup = cmd.get_one::<String>("backup");

    if !cmd.get_flag("yes") {
        println!("Do you really want to overwrite the file system data structures");
        print!("of \"{}\" (type \"YES!\" to confirm)? ",target);
        use std::io::Write;
        std::io::stdout().flush()?;
        let mut line = String::new();
        std::io::stdin().lock().read_line(&mut line)?;
        if line.trim_end() != "YES!" {
            return Ok(0);
        }
    }

    eprintln!("Preliminary actions...");
    // the snapshot side opens read-only no matter what the switches say
    let read_cfg = OpenCfg { write_enable: false, ignore_lock: globals.ignore_lock, show_geometry: false };
    let mut src = dio::open(source,DIO_SNAPSHOT,false,&read_cfg)?;
    let write_cfg = OpenCfg { write_enable: globals.writable, ignore_lock: globals.ignore_lock, show_geometry: false };
    let mut dst = dio::open(target,DIO_DISK | DIO_SNAPSHOT,true,&write_cfg)?;

    let sectors: Vec<u32> = match maybe_sector {
        Some(s) => vec![parse_number(s)?],
        None => {
            let mut v = src.snapshot_map().expect("snapshot has a map").to_vec();
            v.sort_unstable();
            v
        }
    };

    // make sure the snapshot holds everything we are about to write
    let mut buf = [0u8;SECTOR_SIZE];
    for secno in &sectors {
        src.read_sector(*secno,&mut buf)?;
    }

    if let Some(backup_name) = backup {
        let mut cap = SaveFile::create(backup_name,target,SaveKind::Snapshot)?;
        for secno in &sectors {
            dst.read_sector(*secno,&mut buf)?;
            cap.rec_sectors(&buf,*secno)?;
        }
        cap.close()?;
    }

    eprintln!("Writing...DO NOT INTERRUPT!...");
    let mut rpt = Report::new();
    let mut bad: u32 = 0;
    for secno in &sectors {
        src.read_sector(*secno,&mut buf)?;
        if let Err(e) = dst.write_sector(*secno,&buf) {
            rpt.warning(1,format!("Cannot write sector #{}: {}",secno,e));
            bad += 1;
        }
    }
    match bad {
        0 => {
            eprintln!("Done");
            Ok(0)
        },
        1 => {
            eprintln!("Done, 1 sector not written");
            Ok(2)
        },
        n => {
            eprintln!("Done, {} sectors not written",n);
            Ok(2)
        }
    }
}
