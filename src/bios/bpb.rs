//! ## BIOS Parameter Block Module
//!
//! This contains the boot sector layout shared by FAT volumes and (in its
//! geometry fields) HPFS volumes.  Field set follows the MS-DOS 3.x boot
//! sector with the extended signature tail, which is what decides whether
//! a volume is handed to the FAT or the HPFS walker.

use log::debug;
use crate::DYNERR;

pub const BOOT_SECTOR_SIZE: usize = 512;

/// Boot sector image plus decoded accessors.  All integers little-endian,
/// decoded on access.
pub struct BootSector {
    raw: [u8;BOOT_SECTOR_SIZE]
}

fn lu16(raw: &[u8],off: usize) -> u16 {
    u16::from_le_bytes([raw[off],raw[off+1]])
}

fn lu32(raw: &[u8],off: usize) -> u32 {
    u32::from_le_bytes([raw[off],raw[off+1],raw[off+2],raw[off+3]])
}

impl BootSector {
    pub fn from_bytes(buf: &[u8]) -> Result<Self,DYNERR> {
        if buf.len() < BOOT_SECTOR_SIZE {
            return Err(Box::new(crate::dio::Error::SectorAccess));
        }
        let mut raw = [0u8;BOOT_SECTOR_SIZE];
        raw.copy_from_slice(&buf[0..BOOT_SECTOR_SIZE]);
        Ok(Self { raw })
    }
    pub fn oem(&self) -> &[u8] {
        &self.raw[3..11]
    }
    pub fn bytes_per_sec(&self) -> u16 {
        lu16(&self.raw,11)
    }
    pub fn secs_per_clus(&self) -> u8 {
        self.raw[13]
    }
    pub fn res_secs(&self) -> u16 {
        lu16(&self.raw,14)
    }
    pub fn num_fats(&self) -> u8 {
        self.raw[16]
    }
    pub fn root_entries(&self) -> u16 {
        lu16(&self.raw,17)
    }
    /// 16-bit sector count, superceded by the 32-bit count if 0
    pub fn small_secs(&self) -> u16 {
        lu16(&self.raw,19)
    }
    pub fn media(&self) -> u8 {
        self.raw[21]
    }
    pub fn secs_per_fat(&self) -> u16 {
        lu16(&self.raw,22)
    }
    pub fn secs_per_track(&self) -> u16 {
        lu16(&self.raw,24)
    }
    pub fn heads(&self) -> u16 {
        lu16(&self.raw,26)
    }
    pub fn hidden_secs(&self) -> u16 {
        lu16(&self.raw,28)
    }
    pub fn large_secs(&self) -> u32 {
        lu32(&self.raw,32)
    }
    pub fn drive_num(&self) -> u8 {
        self.raw[36]
    }
    /// 40 (0x28) or 41 (0x29) means the volume id, label, and type fields
    /// that follow are valid.
    pub fn extended_sig(&self) -> u8 {
        self.raw[38]
    }
    pub fn vol_id(&self) -> u32 {
        lu32(&self.raw,39)
    }
    pub fn vol_label(&self) -> &[u8] {
        &self.raw[43..54]
    }
    pub fn vol_type(&self) -> &[u8] {
        &self.raw[54..62]
    }
    /// total sectors, choosing the 16- or 32-bit field
    pub fn tot_secs(&self) -> u32 {
        match self.small_secs() {
            0 => self.large_secs(),
            n => n as u32
        }
    }
    /// Identifies an HPFS volume (extended signature 40 with type "HPFS").
    pub fn is_hpfs(&self) -> bool {
        self.extended_sig()==40 && &self.raw[54..58]==b"HPFS"
    }
    /// Identifies an HPOFS volume, which is recognized but not supported.
    pub fn is_hpofs(&self) -> bool {
        self.extended_sig()==41 && &self.raw[54..59]==b"HPOFS"
    }
    /// Loose plausibility test used when classifying an unlabeled image.
    pub fn verify(&self) -> bool {
        let mut ans = true;
        if self.bytes_per_sec() != 512 {
            debug!("unsupported bytes per sector {}",self.bytes_per_sec());
            ans = false;
        }
        if ![1,2,4,8,16,32,64,128].contains(&self.secs_per_clus()) {
            debug!("invalid sectors per cluster {}",self.secs_per_clus());
            ans = false;
        }
        if self.res_secs()==0 {
            debug!("invalid count of reserved sectors 0");
            ans = false;
        }
        if self.num_fats()==0 {
            debug!("invalid count of FATs 0");
            ans = false;
        }
        if self.small_secs()==0 && self.large_secs()==0 {
            debug!("invalid sector count 0");
            ans = false;
        }
        ans
    }
}

#[test]
fn test_accessors() {
    let mut buf = vec![0u8;512];
    buf[11] = 0x00; buf[12] = 0x02;     // 512 bytes per sector
    buf[13] = 2;                        // sectors per cluster
    buf[14] = 1;                        // reserved
    buf[16] = 2;                        // FATs
    buf[17] = 0x70;                     // 112 root entries
    buf[19] = 0x40; buf[20] = 0x06;     // 1600 sectors
    buf[22] = 3;
    buf[24] = 16;
    buf[26] = 2;
    buf[38] = 40;
    buf[54..58].copy_from_slice(b"HPFS");
    let boot = BootSector::from_bytes(&buf).expect("bad size");
    assert_eq!(boot.bytes_per_sec(),512);
    assert_eq!(boot.secs_per_clus(),2);
    assert_eq!(boot.root_entries(),112);
    assert_eq!(boot.tot_secs(),1600);
    assert_eq!(boot.secs_per_track(),16);
    assert_eq!(boot.heads(),2);
    assert!(boot.is_hpfs());
    assert!(boot.verify());
}
