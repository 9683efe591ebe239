//! ## Snapshot backend
//!
//! A snapshot file stores an arbitrary subset of a volume's sectors: a
//! 512-byte header, the sector records in capture order, and a trailing
//! map of the logical sector numbers they correspond to.  On open, the
//! map is loaded and a chained hash is built over it so that lookup by
//! logical sector is cheap no matter how the capture was ordered.
//!
//! Version 1 files are scrambled: the first 32-bit word of every stored
//! record is XORed with `SNAPSHOT_SCRAMBLE`.

use std::io::{Read,Write,Seek,SeekFrom};
use binrw::BinRead;
use log::debug;
use crate::{STDRESULT,DYNERR};
use super::{BlockSource,SourceKind,Error,SECTOR_SIZE,SNAPSHOT_MAGIC,SNAPSHOT_SCRAMBLE};

/// Size of the hash table used for speeding up snapshot lookups.
const HASH_SIZE: usize = 997;

/// Marks the end of a hash chain; an impossible record index.
const HASH_END: u32 = 0xffffffff;

#[derive(BinRead)]
#[br(little)]
struct Header {
    magic: u32,
    sector_count: u32,
    map_pos: u32,
    version: u32
}

pub struct Snapshot {
    file: std::fs::File,
    sector_count: u32,
    version: u32,
    /// logical sector number of each record, in record order
    map: Vec<u32>,
    /// chains records whose logical sectors collide in the head array
    hash_next: Vec<u32>,
    hash_start: [u32;HASH_SIZE]
}

impl Snapshot {
    pub fn open(name: &str,for_write: bool) -> Result<Self,DYNERR> {
        let mut file = std::fs::OpenOptions::new()
            .read(true)
            .write(for_write)
            .open(name)?;
        let hdr = Header::read_le(&mut file)?;
        if hdr.magic != SNAPSHOT_MAGIC {
            return Err(Box::new(Error::NotSnapshot));
        }
        if hdr.version > 1 {
            return Err(Box::new(Error::FormatTooNew));
        }
        // Load the sector map.
        file.seek(SeekFrom::Start(hdr.map_pos as u64))?;
        let mut raw = vec![0u8;hdr.sector_count as usize * 4];
        file.read_exact(&mut raw)?;
        let map: Vec<u32> = raw.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0],c[1],c[2],c[3]]))
            .collect();
        // Initialize hashing.
        let mut hash_start = [HASH_END;HASH_SIZE];
        let mut hash_next = vec![HASH_END;hdr.sector_count as usize];
        for (i,lsn) in map.iter().enumerate() {
            let hash = (*lsn as usize) % HASH_SIZE;
            hash_next[i] = hash_start[hash];
            hash_start[hash] = i as u32;
        }
        debug!("snapshot holds {} sectors, version {}",hdr.sector_count,hdr.version);
        Ok(Self {
            file,
            sector_count: hdr.sector_count,
            version: hdr.version,
            map,
            hash_next,
            hash_start
        })
    }
    /// Record index of logical sector `n`, or None if not captured.
    fn find(&self,n: u32) -> Option<u32> {
        let mut j = self.hash_start[(n as usize) % HASH_SIZE];
        while j != HASH_END {
            if self.map[j as usize]==n {
                return Some(j);
            }
            j = self.hash_next[j as usize];
        }
        None
    }
    pub fn sector_count(&self) -> u32 {
        self.sector_count
    }
    /// All captured logical sector numbers in ascending order.
    pub fn sorted_sectors(&self) -> Vec<u32> {
        let mut ans = self.map.clone();
        ans.sort_unstable();
        ans
    }
}

impl BlockSource for Snapshot {
    fn kind(&self) -> SourceKind {
        SourceKind::Snapshot
    }
    fn total_sectors(&self) -> u32 {
        // count of original volume sectors is not recorded
        0
    }
    fn read_sector(&mut self,n: u32,buf: &mut [u8]) -> STDRESULT {
        let idx = match self.find(n) {
            Some(j) => j,
            None => return Err(Box::new(Error::SectorNotPresent))
        };
        self.file.seek(SeekFrom::Start((idx as u64 + 1) * SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut buf[0..SECTOR_SIZE])?;
        if self.version >= 1 {
            let word = u32::from_le_bytes([buf[0],buf[1],buf[2],buf[3]]) ^ SNAPSHOT_SCRAMBLE;
            buf[0..4].copy_from_slice(&u32::to_le_bytes(word));
        }
        Ok(())
    }
    fn write_sector(&mut self,n: u32,dat: &[u8]) -> STDRESULT {
        if dat.len() < SECTOR_SIZE {
            return Err(Box::new(Error::SectorAccess));
        }
        let idx = match self.find(n) {
            Some(j) => j,
            None => return Err(Box::new(Error::SectorNotPresent))
        };
        let mut raw = dat[0..SECTOR_SIZE].to_vec();
        if self.version >= 1 {
            let word = u32::from_le_bytes([raw[0],raw[1],raw[2],raw[3]]) ^ SNAPSHOT_SCRAMBLE;
            raw[0..4].copy_from_slice(&u32::to_le_bytes(word));
        }
        self.file.seek(SeekFrom::Start((idx as u64 + 1) * SECTOR_SIZE as u64))?;
        self.file.write_all(&raw)?;
        self.file.flush()?;
        Ok(())
    }
    fn snapshot_map(&self) -> Option<&[u32]> {
        Some(&self.map)
    }
}
