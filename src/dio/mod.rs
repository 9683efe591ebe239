//! # Block Source Module
//!
//! Every action works through the `BlockSource` trait, which presents a
//! volume as a flat array of 512-byte sectors.  There are three backends:
//! a live drive or flat sector image (`device`), a sparse snapshot file
//! (`snapshot`), and a CRC sidecar (`crcfile`), which stores per-sector
//! checksums but no data.
//!
//! The `save` submodule is the other half of the story: while a walk is
//! running, every sector the walker reads can be mirrored into a snapshot
//! or CRC file under construction, so that the capture contains exactly
//! the sectors that carry file-system structure.
//!
//! Stored sectors in snapshot files have their first 32-bit word XORed
//! with a scramble constant so that no sector in a snapshot carries a live
//! file-system signature; a mounted driver will therefore never mistake a
//! snapshot for the volume it was taken from.

pub mod device;
pub mod snapshot;
pub mod crcfile;
pub mod save;

use std::io::{Read,Seek,SeekFrom};
use log::debug;
use regex::Regex;
use crate::crc::Crc32;
use crate::{STDRESULT,DYNERR};

pub const SECTOR_SIZE: usize = 512;

/// Magic number of a CRC sidecar file.
pub const CRC_MAGIC: u32 = 0xac994df4;
/// Magic number of a snapshot file.
pub const SNAPSHOT_MAGIC: u32 = 0xaf974803;
/// XORed with the first 32-bit word of every stored snapshot sector.
pub const SNAPSHOT_SCRAMBLE: u32 = 0x551234af;

/// Bits for `open`'s allowed-kind argument.
pub const DIO_DISK: u8 = 0x01;
pub const DIO_SNAPSHOT: u8 = 0x02;
pub const DIO_CRC: u8 = 0x04;

/// Enumerates block source errors.  The `Display` trait will print the
/// equivalent long message.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("a drive cannot be used for this action")]
    DriveNotAllowed,
    #[error("not a snapshot file")]
    NotSnapshot,
    #[error("not a CRC file")]
    NotCrc,
    #[error("neither a snapshot file nor a CRC file")]
    UnknownFileKind,
    #[error("file format too new, please upgrade this program")]
    FormatTooNew,
    #[error("sector not found in snapshot file")]
    SectorNotPresent,
    #[error("unable to access sector")]
    SectorAccess,
    #[error("cannot lock drive")]
    LockFailed,
    #[error("use the -w option for actions that write sectors")]
    WriteNotEnabled,
    #[error("do not use the -w option for actions that don't write sectors")]
    WriteEnabledReadOnly,
    #[error("the target file must not be on the source drive")]
    TargetOnSource,
    #[error("source does not support this request")]
    Unsupported
}

#[derive(PartialEq,Clone,Copy)]
pub enum SourceKind {
    Disk,
    Snapshot,
    Crc
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self,f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Disk => write!(f,"disk"),
            Self::Snapshot => write!(f,"snapshot file"),
            Self::Crc => write!(f,"CRC file")
        }
    }
}

/// Geometry coordinates of a sector on a device with known layout.
pub struct CylHeadSec {
    pub cyl: u32,
    pub head: u32,
    pub sec: u32
}

/// Options threaded from the command line into `open`.
pub struct OpenCfg {
    pub write_enable: bool,
    pub ignore_lock: bool,
    /// print the device geometry while opening (the `info` action)
    pub show_geometry: bool
}

impl OpenCfg {
    pub fn new() -> Self {
        Self { write_enable: false, ignore_lock: false, show_geometry: false }
    }
}

/// The main trait for reading sectors from any backend.  Reading can
/// mutate the object because the backend may be tracking file positions
/// or lazily loading tables.
pub trait BlockSource {
    fn kind(&self) -> SourceKind;
    /// Total sector count, 0 when unknown (snapshots of unknown volumes).
    fn total_sectors(&self) -> u32;
    /// Read exactly one 512-byte sector into `buf`.
    fn read_sector(&mut self,n: u32,buf: &mut [u8]) -> STDRESULT;
    /// Write exactly one 512-byte sector.  Never extends the backend.
    fn write_sector(&mut self,n: u32,dat: &[u8]) -> STDRESULT;
    /// Per-sector CRC.  Backends without stored CRCs read the sector and
    /// compute one.
    fn checksum(&mut self,kernel: &Crc32,n: u32) -> Result<u32,DYNERR> {
        let mut buf = [0u8;SECTOR_SIZE];
        self.read_sector(n,&mut buf)?;
        Ok(kernel.compute(&buf))
    }
    /// Pull lookup tables into memory ahead of a long run of `checksum`
    /// calls; a no-op for backends with nothing to preload.
    fn preload(&mut self) -> STDRESULT {
        Ok(())
    }
    /// Geometry coordinates, devices with a known layout only.
    fn cyl_head_sec(&self,_n: u32) -> Option<CylHeadSec> {
        None
    }
    /// The logical sector numbers present, snapshots only, capture order.
    fn snapshot_map(&self) -> Option<&[u32]> {
        None
    }
    /// Read `count` consecutive sectors into one buffer.
    fn read_sectors(&mut self,n: u32,count: u32) -> Result<Vec<u8>,DYNERR> {
        let mut ans = vec![0;count as usize * SECTOR_SIZE];
        for i in 0..count as usize {
            self.read_sector(n + i as u32,&mut ans[i*SECTOR_SIZE..(i+1)*SECTOR_SIZE])?;
        }
        Ok(ans)
    }
}

/// Return the drive letter if `name` has drive spec syntax (e.g. "C:").
pub fn drive_spec(name: &str) -> Option<char> {
    let patt = Regex::new(r"^[A-Za-z]:$").expect("unreachable");
    match patt.is_match(name) {
        true => name.chars().next().map(|c| c.to_ascii_uppercase()),
        false => None
    }
}

/// Obtain access to a disk, snapshot file, or CRC file.  The kind is
/// inferred from the name syntax and the file magic, and must be one of
/// the kinds in `allowed`.  Writing requires the write-enable switch; the
/// switch must not be given to read-only actions.
pub fn open(name: &str,allowed: u8,for_write: bool,cfg: &OpenCfg) -> Result<Box<dyn BlockSource>,DYNERR> {
    if for_write && !cfg.write_enable {
        return Err(Box::new(Error::WriteNotEnabled));
    }
    if !for_write && cfg.write_enable {
        return Err(Box::new(Error::WriteEnabledReadOnly));
    }
    if drive_spec(name).is_some() {
        if allowed & DIO_DISK == 0 {
            return Err(Box::new(Error::DriveNotAllowed));
        }
        return Ok(Box::new(device::Device::open(name,for_write,cfg)?));
    }
    // A regular file: classify by magic.
    let magic = match std::fs::File::open(name) {
        Ok(mut f) => {
            let mut word = [0u8;4];
            match f.seek(SeekFrom::Start(0)).and(f.read_exact(&mut word)) {
                Ok(()) => Some(u32::from_le_bytes(word)),
                Err(_) => None
            }
        },
        Err(e) => return Err(Box::new(e))
    };
    match magic {
        Some(SNAPSHOT_MAGIC) => {
            if allowed & DIO_SNAPSHOT == 0 {
                return Err(Box::new(match allowed & DIO_CRC { 0 => Error::UnknownFileKind, _ => Error::NotCrc }));
            }
            debug!("{} identified as a snapshot file",name);
            Ok(Box::new(snapshot::Snapshot::open(name,for_write)?))
        },
        Some(CRC_MAGIC) => {
            if allowed & DIO_CRC == 0 {
                return Err(Box::new(match allowed & DIO_SNAPSHOT { 0 => Error::UnknownFileKind, _ => Error::NotSnapshot }));
            }
            debug!("{} identified as a CRC file",name);
            Ok(Box::new(crcfile::CrcFile::open(name,for_write)?))
        },
        _ => {
            // No magic: treat as a flat sector image, which gets the same
            // handling as a live drive.
            if allowed & DIO_DISK == 0 {
                return Err(Box::new(match allowed & (DIO_SNAPSHOT | DIO_CRC) {
                    DIO_SNAPSHOT => Error::NotSnapshot,
                    DIO_CRC => Error::NotCrc,
                    _ => Error::UnknownFileKind
                }));
            }
            debug!("{} treated as a sector image",name);
            Ok(Box::new(device::Device::open(name,for_write,cfg)?))
        }
    }
}

#[test]
fn test_drive_spec() {
    assert_eq!(drive_spec("C:"),Some('C'));
    assert_eq!(drive_spec("a:"),Some('A'));
    assert_eq!(drive_spec("C:\\file"),None);
    assert_eq!(drive_spec("image.img"),None);
}
