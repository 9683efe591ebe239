//! ## CRC sidecar backend
//!
//! A CRC file holds a per-sector checksum for every sector of a volume,
//! but no data.  It can stand in for one side of a `diff`.  The whole
//! table is preloaded when it is small enough to be worth it.

use std::io::{Read,Seek,SeekFrom};
use binrw::BinRead;
use crate::crc::Crc32;
use crate::{STDRESULT,DYNERR};
use super::{BlockSource,SourceKind,Error,SECTOR_SIZE,CRC_MAGIC};

/// Preload ceiling for the in-memory CRC table.
const LOAD_LIMIT: u64 = 8*1024*1024;

#[derive(BinRead)]
#[br(little)]
struct Header {
    magic: u32,
    sector_count: u32,
    version: u32
}

pub struct CrcFile {
    file: std::fs::File,
    sector_count: u32,
    vec: Option<Vec<u32>>
}

impl CrcFile {
    pub fn open(name: &str,for_write: bool) -> Result<Self,DYNERR> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(for_write)
            .open(name)?;
        let hdr = Header::read_le(&mut file)?;
        if hdr.magic != CRC_MAGIC {
            return Err(Box::new(Error::NotCrc));
        }
        if hdr.version > 1 {
            return Err(Box::new(Error::FormatTooNew));
        }
        Ok(Self { file, sector_count: hdr.sector_count, vec: None })
    }
    /// Read the whole CRC table into memory, unless there are too many.
    pub fn load(&mut self) -> STDRESULT {
        if self.vec.is_some() || self.sector_count as u64 * 4 >= LOAD_LIMIT {
            return Ok(());
        }
        self.file.seek(SeekFrom::Start(SECTOR_SIZE as u64))?;
        let mut raw = vec![0u8;self.sector_count as usize * 4];
        self.file.read_exact(&mut raw)?;
        self.vec = Some(raw.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0],c[1],c[2],c[3]]))
            .collect());
        Ok(())
    }
}

impl BlockSource for CrcFile {
    fn kind(&self) -> SourceKind {
        SourceKind::Crc
    }
    fn total_sectors(&self) -> u32 {
        self.sector_count
    }
    fn read_sector(&mut self,_n: u32,_buf: &mut [u8]) -> STDRESULT {
        Err(Box::new(Error::Unsupported))
    }
    fn write_sector(&mut self,_n: u32,_dat: &[u8]) -> STDRESULT {
        Err(Box::new(Error::Unsupported))
    }
    fn preload(&mut self) -> STDRESULT {
        self.load()
    }
    fn checksum(&mut self,_kernel: &Crc32,n: u32) -> Result<u32,DYNERR> {
        if n >= self.sector_count {
            return Err(Box::new(Error::SectorAccess));
        }
        if let Some(vec) = &self.vec {
            return Ok(vec[n as usize]);
        }
        self.file.seek(SeekFrom::Start(SECTOR_SIZE as u64 + n as u64 * 4))?;
        let mut word = [0u8;4];
        self.file.read_exact(&mut word)?;
        Ok(u32::from_le_bytes(word))
    }
}
