//! ## Capture verbs: `save` and `crc`
//!
//! `save` walks the volume with capture enabled, so the snapshot ends up
//! holding exactly the sectors that carry file system structure.  `crc`
//! does not need a walker at all; it checksums every sector in order.

use clap::ArgMatches;
use crate::crc::Crc32;
use crate::dio::{DIO_DISK,DIO_SNAPSHOT};
use crate::dio::save::{SaveFile,SaveKind};
use crate::fs::{self,Volume,ScanCfg,Report};
use crate::DYNERR;
use super::{Globals,open_source};

pub fn save(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let target = cmd.get_one::<String>("out").expect("required argument");
    let mut cfg = ScanCfg::new();
    cfg.hex = globals.hex;
    cfg.save = true;
    cfg.verbose = cmd.get_flag("verbose");
    let mut rpt = Report::new();
    let src = open_source(src_name,DIO_DISK | DIO_SNAPSHOT,false,&globals,false)?;
    let cap = SaveFile::create(target,src_name,SaveKind::Snapshot)?;
    let mut vol = Volume::with_capture(src,cap);
    match fs::scan_volume(&mut vol,&cfg,&mut rpt,globals.force) {
        Ok(()) => {
            if let Some(cap) = vol.take_capture() {
                cap.close()?;
            }
        },
        Err(e) => {
            if let Some(cap) = vol.take_capture() {
                cap.discard();
            }
            return Err(e);
        }
    }
    rpt.totals(false);
    Ok(rpt.exit_code())
}

pub fn crc(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let target = cmd.get_one::<String>("out").expect("required argument");
    let mut rpt = Report::new();
    let mut src = open_source(src_name,DIO_DISK,false,&globals,false)?;
    let mut cap = SaveFile::create(target,src_name,SaveKind::Crc)?;
    let kernel = Crc32::new();
    let total = src.total_sectors();
    let mut crcs: Vec<u32> = Vec::with_capacity(total as usize);
    for secno in 0..total {
        match src.checksum(&kernel,secno) {
            Ok(crc) => crcs.push(crc),
            Err(_) => {
                rpt.warning(1,format!("Sector #{} not readable",secno));
                crcs.push(0);
            }
        }
    }
    cap.put_crcs(&crcs)?;
    cap.close()?;
    rpt.totals(false);
    Ok(rpt.exit_code())
}
