//! ## Device backend
//!
//! Direct access to a drive or flat sector image through the host file
//! system.  The walker's contract is that on-disk data must not shift
//! underneath it, so the backing file is locked exclusively for the whole
//! walk and released on every exit path; a failed lock is an error unless
//! the user asked to proceed regardless.
//!
//! Geometry (sectors per track, heads, hidden sectors) is taken from the
//! BIOS parameter block in sector 0 when one is present, which is what
//! makes `cyl_head_sec` possible.  The total sector count comes from the
//! backing length.

use std::io::{Read,Write,Seek,SeekFrom};
use log::warn;
use crate::bios::bpb::BootSector;
use crate::{STDRESULT,DYNERR};
use super::{BlockSource,SourceKind,CylHeadSec,OpenCfg,Error,SECTOR_SIZE};

pub struct Device {
    file: std::fs::File,
    total: u32,
    spt: u32,
    heads: u32,
    hidden: u32,
    locked: bool
}

impl Device {
    pub fn open(name: &str,for_write: bool,cfg: &OpenCfg) -> Result<Self,DYNERR> {
        let file = std::fs::OpenOptions::new()
            .read(true)
            .write(for_write)
            .open(name)?;
        let locked = match file.try_lock() {
            Ok(()) => true,
            Err(_) => {
                if for_write || !cfg.ignore_lock {
                    return Err(Box::new(Error::LockFailed));
                }
                warn!("cannot lock {}, results are not reliable without locking",name);
                false
            }
        };
        let len = file.metadata()?.len();
        let total = (len / SECTOR_SIZE as u64) as u32;
        let mut ans = Self { file, total, spt: 0, heads: 0, hidden: 0, locked };
        // Geometry from the BPB, if sector 0 holds one.
        let mut boot = [0u8;SECTOR_SIZE];
        if ans.read_sector(0,&mut boot).is_ok() {
            if let Ok(bpb) = BootSector::from_bytes(&boot) {
                if bpb.bytes_per_sec()==512 && bpb.secs_per_track() > 0 && bpb.heads() > 0 {
                    ans.spt = bpb.secs_per_track() as u32;
                    ans.heads = bpb.heads() as u32;
                    ans.hidden = bpb.hidden_secs() as u32;
                }
            }
        }
        if cfg.show_geometry {
            println!("BIOS parameter block:");
            println!("  Sectors per track:        {}",ans.spt);
            println!("  Heads:                    {}",ans.heads);
            println!("  Total number of sectors:  {}",ans.total);
            println!("  Hidden sectors:           {}",ans.hidden);
        }
        Ok(ans)
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.locked {
            let _ = self.file.unlock();
        }
    }
}

impl BlockSource for Device {
    fn kind(&self) -> SourceKind {
        SourceKind::Disk
    }
    fn total_sectors(&self) -> u32 {
        self.total
    }
    fn read_sector(&mut self,n: u32,buf: &mut [u8]) -> STDRESULT {
        self.file.seek(SeekFrom::Start(n as u64 * SECTOR_SIZE as u64))?;
        self.file.read_exact(&mut buf[0..SECTOR_SIZE])?;
        Ok(())
    }
    fn write_sector(&mut self,n: u32,dat: &[u8]) -> STDRESULT {
        if dat.len() < SECTOR_SIZE {
            return Err(Box::new(Error::SectorAccess));
        }
        self.file.seek(SeekFrom::Start(n as u64 * SECTOR_SIZE as u64))?;
        self.file.write_all(&dat[0..SECTOR_SIZE])?;
        self.file.flush()?;
        Ok(())
    }
    fn cyl_head_sec(&self,n: u32) -> Option<CylHeadSec> {
        if self.spt==0 || self.heads==0 {
            return None;
        }
        let abs = n + self.hidden;
        Some(CylHeadSec {
            sec: abs % self.spt + 1,
            head: (abs / self.spt) % self.heads,
            cyl: abs / self.spt / self.heads
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_from_bpb() {
        let dir = tempfile::tempdir().expect("no temp dir");
        let path = dir.path().join("geom.img");
        let mut img = vec![0u8;64*512];
        img[11] = 0x00; img[12] = 0x02;     // 512 bytes per sector
        img[13] = 1;
        img[14] = 1;
        img[16] = 2;
        img[19] = 64;                       // total
        img[24] = 9;                        // sectors per track
        img[26] = 2;                        // heads
        std::fs::write(&path,&img).expect("could not write image");
        let cfg = OpenCfg::new();
        let dev = Device::open(path.to_str().unwrap(),false,&cfg).expect("open failed");
        assert_eq!(dev.total_sectors(),64);
        // logical sector 0 is cylinder 0, head 0, sector 1
        let chs = dev.cyl_head_sec(0).expect("no geometry");
        assert_eq!((chs.cyl,chs.head,chs.sec),(0,0,1));
        // one full track later we are on the next head
        let chs = dev.cyl_head_sec(9).expect("no geometry");
        assert_eq!((chs.cyl,chs.head,chs.sec),(0,1,1));
        let chs = dev.cyl_head_sec(19).expect("no geometry");
        assert_eq!((chs.cyl,chs.head,chs.sec),(1,0,2));
    }
}
