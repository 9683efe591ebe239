//! ## Single-sector verbs: `read` and `write`

use clap::ArgMatches;
use log::error;
use crate::dio::{DIO_DISK,DIO_SNAPSHOT,SECTOR_SIZE};
use crate::dio::save::{SaveFile,SaveKind};
use crate::{parse_number,DYNERR};
use super::{Globals,CommandError,open_source};

pub fn read(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let src_name = cmd.get_one::<String>("dimg").expect("required argument");
    let target = cmd.get_one::<String>("out").expect("required argument");
    let secno = parse_number(cmd.get_one::<String>("sector").expect("required argument"))?;
    let mut src = open_source(src_name,DIO_DISK | DIO_SNAPSHOT,false,&globals,false)?;
    let mut cap = SaveFile::create(target,src_name,SaveKind::Raw)?;
    let mut buf = [0u8;SECTOR_SIZE];
    src.read_sector(secno,&mut buf)?;
    cap.raw_write(&buf)?;
    cap.close()?;
    Ok(0)
}

pub fn write(cmd: &ArgMatches) -> Result<i32,DYNERR> {
    let globals = Globals::from_matches(cmd)?;
    let dst_name = cmd.get_one::<String>("dimg").expect("required argument");
    let src_name = cmd.get_one::<String>("in").expect("required argument");
    let secno = parse_number(cmd.get_one::<String>("sector").expect("required argument"))?;
    let data = std::fs::read(src_name)?;
    if data.len() != SECTOR_SIZE {
        error!("the source file must contain exactly 512 bytes");
        return Err(Box::new(CommandError::OutOfRange));
    }
    let mut dst = open_source(dst_name,DIO_DISK | DIO_SNAPSHOT,true,&globals,false)?;
    dst.write_sector(secno,&data)?;
    Ok(0)
}
