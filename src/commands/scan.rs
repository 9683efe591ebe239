//! ## Walker-driven verbs: `info`, `check`, `dir`, `copy`
//!
//! All four configure a walk over the volume; they differ only in which
//! flags of the `ScanCfg` they raise and what they do with the outcome.

use clap::ArgMatches;
use log::error;
use crate::dio::{DIO_DISK,DIO_SNAPSHOT};
use crate::dio::save::{SaveFile,SaveKind};
use crate::fs::{self,Volume,ScanCfg,Report};
use crate::{parse_number,DYNERR};
use super::{Globals,CommandError,open_source};

/// Run the walk and fold the find-success unwind into a normal return.
/// Returns true if the walk located its target.
fn run_walk(vol: &mut Volume,cfg: &ScanCfg,rpt: &mut Report,globals: &Globals) -> Result<bool,DYNERR> {
    match fs::scan_volume(vol,cfg,rpt,globals.force) {
        Ok(()) => Ok(false),
        Err(e) => {
            if let Some(fs::Error::Found) = e.downcast_ref::<fs::Error>() {
                return Ok(true);
            }
            // a fatal error invalidates any partial capture
            if let Some(cap) = vol.take_capture() {
                cap.discard();
            }
            Err(e)
        }
    }
}

pub fn info(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let maybe_path = cmd.get_one::<String>("file");
    let maybe_sector = cmd.get_one::<String>("sector");
    let mut cfg = ScanCfg::new();
    cfg.hex = globals.hex;
    cfg.what_cluster = cmd.get_flag("cluster");
    cfg.show_eas = cmd.get_flag("eas");
    cfg.show_unused = cmd.get_flag("unused");
    cfg.show_free_frag = cmd.get_flag("free-frag");
    match (maybe_path,maybe_sector) {
        (Some(_),Some(_)) => {
            error!("give a path or a sector number, not both");
            return Err(Box::new(CommandError::BadOptionCombination));
        },
        (Some(path),None) => {
            if cfg.show_free_frag || cfg.show_unused || cfg.what_cluster {
                error!("-u, -c and --free-frag do not apply to a path search");
                return Err(Box::new(CommandError::BadOptionCombination));
            }
            cfg.find = Some(path.to_string());
            cfg.locate = true;
        },
        (None,Some(num)) => {
            if cfg.show_free_frag || cfg.show_unused || cfg.show_eas {
                error!("-u, -e and --free-frag do not apply to a sector description");
                return Err(Box::new(CommandError::BadOptionCombination));
            }
            cfg.what = Some(parse_number(num)?);
        },
        (None,None) => {
            if cfg.what_cluster || cfg.show_eas {
                error!("-c and -e need a sector number or path");
                return Err(Box::new(CommandError::BadOptionCombination));
            }
            cfg.info = true;
        }
    }
    let mut rpt = Report::new();
    let src = open_source(src_name,DIO_DISK | DIO_SNAPSHOT,false,&globals,cfg.info)?;
    if let (Some(ws),false) = (cfg.what,cfg.what_cluster) {
        if let Some(chs) = src.cyl_head_sec(ws) {
            println!("Sector {}: Cylinder {}, head {}, sector {}",cfg.sec(ws),chs.cyl,chs.head,chs.sec);
        }
    }
    let mut vol = Volume::new(src);
    run_walk(&mut vol,&cfg,&mut rpt,&globals)?;
    rpt.totals(false);
    Ok(rpt.exit_code())
}

pub fn check(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let mut cfg = ScanCfg::new();
    cfg.hex = globals.hex;
    cfg.check = true;
    cfg.pedantic = cmd.get_flag("pedantic");
    cfg.show_frag = cmd.get_flag("frag");
    cfg.summary = cmd.get_flag("summary");
    cfg.check_unused = cmd.get_flag("unused");
    cfg.verbose = cmd.get_flag("verbose");
    let mut rpt = Report::new();
    let src = open_source(src_name,DIO_DISK | DIO_SNAPSHOT,false,&globals,false)?;
    let mut vol = Volume::new(src);
    run_walk(&mut vol,&cfg,&mut rpt,&globals)?;
    rpt.totals(true);
    Ok(rpt.exit_code())
}

pub fn dir(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let path = cmd.get_one::<String>("file").expect("required argument");
    let mut cfg = ScanCfg::new();
    cfg.hex = globals.hex;
    cfg.find = Some(path.to_string());
    cfg.dir = true;
    let mut rpt = Report::new();
    let src = open_source(src_name,DIO_DISK | DIO_SNAPSHOT,false,&globals,false)?;
    let mut vol = Volume::new(src);
    run_walk(&mut vol,&cfg,&mut rpt,&globals)?;
    rpt.totals(false);
    Ok(rpt.exit_code())
}

pub fn copy(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let path = cmd.get_one::<String>("file").expect("required argument");
    let target = cmd.get_one::<String>("out").expect("required argument");
    let mut cfg = ScanCfg::new();
    cfg.hex = globals.hex;
    cfg.find = Some(path.to_string());
    cfg.copy = true;
    let mut rpt = Report::new();
    let src = open_source(src_name,DIO_DISK,false,&globals,false)?;
    let cap = SaveFile::create(target,src_name,SaveKind::Raw)?;
    let mut vol = Volume::with_capture(src,cap);
    let found = run_walk(&mut vol,&cfg,&mut rpt,&globals)?;
    if !found {
        // the walker closes the capture when it finds the file
        if let Some(cap) = vol.take_capture() {
            cap.discard();
        }
        error!("\"{}\" was not copied",path);
        return Err(Box::new(CommandError::FileNotFound));
    }
    rpt.totals(false);
    Ok(rpt.exit_code())
}
