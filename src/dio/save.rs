//! ## Capture writer
//!
//! While a walk runs, sectors the walker reads can be mirrored into a
//! capture file.  Three modes:
//!
//! * `Snapshot` — an append-only deduplicating log of 512-byte records;
//! on close the logical-sector map is appended and the header rewritten
//! with the final map offset and count.  Records are scrambled on the way
//! out, exactly as the snapshot backend expects to find them.
//! * `Crc` — on close a header plus a dense per-sector CRC vector.
//! * `Raw` — a plain byte stream, used by the `copy` and `read` actions.
//!
//! A fatal error during the walk discards the partial capture; the file
//! is only worth keeping if the walk got to the finalize step.

use std::collections::HashSet;
use std::io::{Write,Seek,SeekFrom};
use std::path::{Path,PathBuf};
use crate::{STDRESULT,DYNERR};
use super::{Error,SECTOR_SIZE,SNAPSHOT_MAGIC,SNAPSHOT_SCRAMBLE,CRC_MAGIC,drive_spec};

#[derive(PartialEq,Clone,Copy)]
pub enum SaveKind {
    Raw,
    Snapshot,
    Crc
}

pub struct SaveFile {
    file: std::fs::File,
    path: PathBuf,
    kind: SaveKind,
    /// logical sector of each record, in capture order
    map: Vec<u32>,
    seen: HashSet<u32>,
    crc_count: u32
}

impl SaveFile {
    /// Create a capture file.  `avoid` is the source being captured; a
    /// target on the same drive (or the same path) would overwrite the
    /// thing being captured and is refused.
    pub fn create(target: &str,avoid: &str,kind: SaveKind) -> Result<Self,DYNERR> {
        if let Some(drive) = drive_spec(avoid) {
            let target_drive = match drive_spec(target) {
                Some(d) => Some(d),
                None => target.chars().next().filter(|_| target.len() > 1 && target.as_bytes()[1]==b':').map(|c| c.to_ascii_uppercase())
            };
            if target_drive==Some(drive) {
                return Err(Box::new(Error::TargetOnSource));
            }
        } else if Path::new(target)==Path::new(avoid) {
            return Err(Box::new(Error::TargetOnSource));
        }
        let mut file = std::fs::File::create(target)?;
        if kind != SaveKind::Raw {
            // header placeholder, rewritten on close
            file.write_all(&[0u8;SECTOR_SIZE])?;
        }
        Ok(Self {
            file,
            path: PathBuf::from(target),
            kind,
            map: Vec::new(),
            seen: HashSet::new(),
            crc_count: 0
        })
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
    /// Mirror `count = dat.len()/512` sectors starting at logical sector
    /// `sec` into a snapshot capture.  Each logical sector is captured at
    /// most once; repeats are ignored.
    pub fn rec_sectors(&mut self,dat: &[u8],sec: u32) -> STDRESULT {
        if self.kind != SaveKind::Snapshot {
            return Ok(());
        }
        for (i,raw) in dat.chunks_exact(SECTOR_SIZE).enumerate() {
            let lsn = sec + i as u32;
            if !self.seen.insert(lsn) {
                continue;
            }
            self.map.push(lsn);
            let mut rec = raw.to_vec();
            // scramble so no stored sector carries a live signature
            let word = u32::from_le_bytes([rec[0],rec[1],rec[2],rec[3]]) ^ SNAPSHOT_SCRAMBLE;
            rec[0..4].copy_from_slice(&u32::to_le_bytes(word));
            self.file.write_all(&rec)?;
        }
        Ok(())
    }
    /// Append bytes to a raw capture.
    pub fn raw_write(&mut self,dat: &[u8]) -> STDRESULT {
        self.file.write_all(dat)?;
        Ok(())
    }
    /// Write the dense CRC vector of a CRC capture.
    pub fn put_crcs(&mut self,crcs: &[u32]) -> STDRESULT {
        let mut raw: Vec<u8> = Vec::with_capacity(crcs.len()*4);
        for c in crcs {
            raw.extend_from_slice(&u32::to_le_bytes(*c));
        }
        self.file.write_all(&raw)?;
        self.crc_count = crcs.len() as u32;
        Ok(())
    }
    /// Finalize the capture: append the sector map and rewrite the header.
    pub fn close(mut self) -> STDRESULT {
        match self.kind {
            SaveKind::Snapshot => {
                let map_pos = self.file.stream_position()?;
                let mut raw: Vec<u8> = Vec::with_capacity(self.map.len()*4);
                for lsn in &self.map {
                    raw.extend_from_slice(&u32::to_le_bytes(*lsn));
                }
                self.file.write_all(&raw)?;
                let mut hdr = [0u8;SECTOR_SIZE];
                hdr[0..4].copy_from_slice(&u32::to_le_bytes(SNAPSHOT_MAGIC));
                hdr[4..8].copy_from_slice(&u32::to_le_bytes(self.map.len() as u32));
                hdr[8..12].copy_from_slice(&u32::to_le_bytes(map_pos as u32));
                hdr[12..16].copy_from_slice(&u32::to_le_bytes(1)); // scrambled
                self.file.seek(SeekFrom::Start(0))?;
                self.file.write_all(&hdr)?;
            },
            SaveKind::Crc => {
                let mut hdr = [0u8;SECTOR_SIZE];
                hdr[0..4].copy_from_slice(&u32::to_le_bytes(CRC_MAGIC));
                hdr[4..8].copy_from_slice(&u32::to_le_bytes(self.crc_count));
                hdr[8..12].copy_from_slice(&u32::to_le_bytes(1));
                self.file.seek(SeekFrom::Start(0))?;
                self.file.write_all(&hdr)?;
            },
            SaveKind::Raw => {}
        }
        self.file.flush()?;
        Ok(())
    }
    /// Delete a partial capture after a fatal error.
    pub fn discard(self) {
        let path = self.path.clone();
        drop(self.file);
        let _ = std::fs::remove_file(path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dio::{BlockSource,snapshot::Snapshot};

    #[test]
    fn snapshot_header_literal() {
        // one all-zero sector with logical number 4096
        let dir = tempfile::tempdir().expect("no temp dir");
        let target = dir.path().join("one.snp");
        let tname = target.to_str().unwrap();
        let mut save = SaveFile::create(tname,"none.img",SaveKind::Snapshot).expect("create failed");
        save.rec_sectors(&[0u8;512],4096).expect("write failed");
        save.close().expect("close failed");
        let raw = std::fs::read(tname).expect("read failed");
        assert_eq!(raw.len(),512+512+4);
        assert_eq!(&raw[0..4],&[0x03,0x48,0x97,0xaf]);
        assert_eq!(&raw[4..8],&[0x01,0x00,0x00,0x00]);
        assert_eq!(&raw[8..12],&[0x00,0x04,0x00,0x00]);
        assert_eq!(&raw[12..16],&[0x01,0x00,0x00,0x00]);
        assert_eq!(&raw[512..516],&[0xaf,0x34,0x12,0x55]);
        assert_eq!(&raw[1024..1028],&[0x00,0x10,0x00,0x00]);
    }

    #[test]
    fn snapshot_round_trip() {
        let dir = tempfile::tempdir().expect("no temp dir");
        let target = dir.path().join("trip.snp");
        let tname = target.to_str().unwrap();
        let mut save = SaveFile::create(tname,"none.img",SaveKind::Snapshot).expect("create failed");
        let mut sec17 = [0u8;512];
        sec17[0..8].copy_from_slice(&[0x49,0x18,0x91,0xf9,0xc5,0x29,0x52,0xfa]);
        let sec99 = [0x5au8;512];
        save.rec_sectors(&sec17,17).expect("write failed");
        save.rec_sectors(&sec99,99).expect("write failed");
        // repeats must not grow the capture
        save.rec_sectors(&sec17,17).expect("write failed");
        save.close().expect("close failed");
        let mut snp = Snapshot::open(tname,false).expect("open failed");
        let mut buf = [0u8;512];
        snp.read_sector(17,&mut buf).expect("read failed");
        assert_eq!(buf,sec17);
        snp.read_sector(99,&mut buf).expect("read failed");
        assert_eq!(buf,sec99);
        assert!(snp.read_sector(18,&mut buf).is_err());
        assert_eq!(snp.sector_count(),2);
    }

    #[test]
    fn snapshot_hash_collisions() {
        // 997 apart lands in the same hash bucket
        let dir = tempfile::tempdir().expect("no temp dir");
        let target = dir.path().join("chain.snp");
        let tname = target.to_str().unwrap();
        let mut save = SaveFile::create(tname,"none.img",SaveKind::Snapshot).expect("create failed");
        for lsn in [5u32,5+997,5+2*997] {
            let mut raw = [0u8;512];
            raw[100..104].copy_from_slice(&lsn.to_le_bytes());
            save.rec_sectors(&raw,lsn).expect("write failed");
        }
        save.close().expect("close failed");
        let mut snp = Snapshot::open(tname,false).expect("open failed");
        let mut buf = [0u8;512];
        for lsn in [5+2*997,5u32,5+997] {
            snp.read_sector(lsn,&mut buf).expect("read failed");
            assert_eq!(u32::from_le_bytes([buf[100],buf[101],buf[102],buf[103]]),lsn);
        }
        assert!(snp.read_sector(5+3*997,&mut buf).is_err());
    }

    #[test]
    fn snapshot_rewrite_in_place() {
        let dir = tempfile::tempdir().expect("no temp dir");
        let target = dir.path().join("rw.snp");
        let tname = target.to_str().unwrap();
        let mut save = SaveFile::create(tname,"none.img",SaveKind::Snapshot).expect("create failed");
        save.rec_sectors(&[0x11u8;512],40).expect("write failed");
        save.close().expect("close failed");
        let mut snp = Snapshot::open(tname,true).expect("open failed");
        let newdat = [0x77u8;512];
        snp.write_sector(40,&newdat).expect("write failed");
        // never extends: absent sectors are refused
        assert!(snp.write_sector(41,&newdat).is_err());
        let mut buf = [0u8;512];
        snp.read_sector(40,&mut buf).expect("read failed");
        assert_eq!(buf,newdat);
    }

    #[test]
    fn scramble_idempotent() {
        let word: u32 = 0xf995e849;
        assert_eq!(word ^ SNAPSHOT_SCRAMBLE ^ SNAPSHOT_SCRAMBLE,word);
    }

    #[test]
    fn refuses_same_target() {
        assert!(SaveFile::create("same.img","same.img",SaveKind::Raw).is_err());
        assert!(SaveFile::create("C:\\out.snp","C:",SaveKind::Snapshot).is_err());
    }
}
