//! ## HPFS on-disk records
//!
//! Fixed-layout records (Superblock, Spareblock, FNODE, ALSEC headers,
//! code page sectors) decoded with `binrw`; variable-length DIRENTs and
//! FEA lists are decoded by hand where they are walked.  Everything on
//! the wire is little-endian.

use binrw::BinRead;
use chrono::DateTime;
use num_derive::FromPrimitive;
use crate::fs::accounting::UsageClass;

pub const SUPER_SIG1: u32 = 0xf995e849;
pub const SUPER_SIG2: u32 = 0xfa53e9c5;
pub const SPARE_SIG1: u32 = 0xf9911849;
pub const SPARE_SIG2: u32 = 0xfa5229c5;

pub const ALSEC_SIG: u32 = 0x37e40aae;
pub const DIRBLK_SIG: u32 = 0x77e40aae;
pub const FNODE_SIG: u32 = 0xf7e40aae;

pub const CPINFO_SIG: u32 = 0x494521f7;
pub const CPDATA_SIG: u32 = 0x894521f7;

/// Spare block flags.
pub const SPF_DIRT: u8 = 0x01;
pub const SPF_SPARE: u8 = 0x02;
pub const SPF_HFUSED: u8 = 0x04;
pub const SPF_BADSEC: u8 = 0x08;
pub const SPF_BADBM: u8 = 0x10;
pub const SPF_FASTFMT: u8 = 0x20;
pub const SPF_VER: u8 = 0x80;

/// FNODE belongs to a directory.
pub const FNF_DIR: u8 = 0x01;

/// ALNODEs follow the ALBLK (otherwise ALLEAFs).
pub const ABF_NODE: u8 = 0x80;
/// The ALBLK's parent is the FNODE.
pub const ABF_FNP: u8 = 0x20;

/// DIRENT flags.
pub const DF_SPEC: u8 = 0x01;
pub const DF_ACL: u8 = 0x02;
pub const DF_BTP: u8 = 0x04;
pub const DF_END: u8 = 0x08;
pub const DF_ATTR: u8 = 0x10;
pub const DF_PERM: u8 = 0x20;
pub const DF_XACL: u8 = 0x40;
pub const DF_NEEDEAS: u8 = 0x80;

/// Name is not FAT-compatible (attribute byte, HPFS only).
pub const ATTR_NONFAT: u8 = 0x40;

/// seen-vector tags for cycle detection, one bit per structure kind
pub const SEEN_FNODE: u8 = 0x01;
pub const SEEN_DIRBLK: u8 = 0x02;
pub const SEEN_ALSEC: u8 = 0x04;
pub const SEEN_BADLIST: u8 = 0x08;
pub const SEEN_CPINFOSEC: u8 = 0x10;

/// Usage classes of the per-sector accounting vector.
#[derive(FromPrimitive,PartialEq,Eq,Clone,Copy)]
pub enum HpfsUse {
    Empty = 0,
    Super = 1,
    Spare = 2,
    BitmapInd = 3,
    Bitmap = 4,
    DirblkBitmap = 5,
    SpareDirblk = 6,
    BandDirblk = 7,
    Dirblk = 8,
    Fnode = 9,
    Sid = 10,
    CpInfoSec = 11,
    CpDataSec = 12,
    Bad = 13,
    HotfixList = 14,
    Hotfix = 15,
    BadList = 16,
    File = 17,
    Alsec = 18,
    Ea = 19,
    Boot = 20,
    Loader = 21,
    Acl = 22
}

impl UsageClass for HpfsUse {
    const EMPTY: Self = HpfsUse::Empty;
    fn as_str(&self) -> &'static str {
        match self {
            HpfsUse::Empty => "empty",
            HpfsUse::Super => "super block",
            HpfsUse::Spare => "spare block",
            HpfsUse::BitmapInd => "bitmap indirect block",
            HpfsUse::Bitmap => "bitmap",
            HpfsUse::DirblkBitmap => "DIRBLK band bitmap",
            HpfsUse::SpareDirblk => "spare DIRBLK",
            HpfsUse::BandDirblk => "DIRBLK band",
            HpfsUse::Dirblk => "DIRBLK",
            HpfsUse::Fnode => "FNODE",
            HpfsUse::Sid => "SID",
            HpfsUse::CpInfoSec => "code page info",
            HpfsUse::CpDataSec => "code page data",
            HpfsUse::Bad => "bad sector",
            HpfsUse::HotfixList => "hotfix list",
            HpfsUse::Hotfix => "hotfix sector",
            HpfsUse::BadList => "bad block list",
            HpfsUse::File => "file data",
            HpfsUse::Alsec => "allocation sector",
            HpfsUse::Ea => "extended attributes",
            HpfsUse::Boot => "boot sector",
            HpfsUse::Loader => "loader",
            HpfsUse::Acl => "ACL"
        }
    }
    fn as_u8(&self) -> u8 {
        *self as u8
    }
    fn upgrade_ok(old: Self,new: Self) -> bool {
        // Spare DIRBLKs and the DIRBLK band may become DIRBLKs; a code
        // page data sector can legitimately be visited twice.
        match (old,new) {
            (HpfsUse::SpareDirblk,HpfsUse::Dirblk) => true,
            (HpfsUse::BandDirblk,HpfsUse::Dirblk) => true,
            (HpfsUse::CpDataSec,HpfsUse::CpDataSec) => true,
            _ => false
        }
    }
}

/// The 32-bit rotating checksum HPFS stores for the Superblock and
/// Spareblock: add each byte, then rotate left by 7 bits.
pub fn checksum(buf: &[u8]) -> u32 {
    let mut sum: u32 = 0;
    for b in buf {
        sum = sum.wrapping_add(*b as u32).rotate_left(7);
    }
    sum
}

#[derive(BinRead)]
#[br(little)]
pub struct SuperBlock {
    pub sig1: u32,
    pub sig2: u32,
    pub version: u8,
    pub func_version: u8,
    pub dummy: u16,
    pub root_fnode: u32,
    pub sectors_on_vol: u32,
    pub num_bad_sects: u32,
    pub bitmap_ind: u32,
    pub bitmap_ind_spare: u32,
    pub bad_list: u32,
    pub bad_list_spare: u32,
    pub last_chkdsk: u32,
    pub last_optimize: u32,
    pub dirblk_band_sectors: u32,
    pub first_dirblk: u32,
    pub last_dirblk: u32,
    pub dirblk_map: u32,
    pub vol_name: [u8;32],
    pub sid_tab: u32
}

#[derive(BinRead)]
#[br(little)]
pub struct SpareBlock {
    pub sig1: u32,
    pub sig2: u32,
    pub flag: u8,
    pub align: [u8;3],
    pub hotfix_list: u32,
    pub hotfixes_used: u32,
    pub max_hotfixes: u32,
    pub spare_dirblks_free: u32,
    pub spare_dirblks_max: u32,
    pub cpinfo: u32,
    pub code_pages: u32,
    /// extra[0] is the recorded Superblock checksum, extra[1] the
    /// recorded Spareblock checksum
    pub extra: [u32;17],
    pub spare_dirblks: [u32;101]
}

/// Spareblock checksum recipe: flags masked down to the bits that are
/// stable across mounts and the block's own checksum slot zeroed.
pub fn spareblock_checksum(raw: &[u8]) -> u32 {
    let mut copy = raw[0..512].to_vec();
    copy[8] &= SPF_VER | SPF_FASTFMT;
    copy[44..48].copy_from_slice(&[0,0,0,0]);
    checksum(&copy)
}

/// A storage pointer: a byte run length plus either the first sector of
/// the run or the sector of an ALSEC mapping the data.
#[derive(BinRead)]
#[br(little)]
pub struct Sptr {
    pub cb_run: u32,
    pub lsn: u32
}

#[derive(BinRead)]
#[br(little)]
pub struct AuxInfo {
    pub sp: Sptr,
    /// length of data stored inside the FNODE
    pub fnl: u16,
    /// nonzero when `sp.lsn` points at an ALSEC
    pub dat: u8
}

#[derive(BinRead)]
#[br(little)]
pub struct AlBlk {
    pub flag: u8,
    pub pad: [u8;3],
    pub free: u8,
    pub used: u8,
    pub off_free: u16
}

pub const ALBLK_SIZE: u32 = 8;
pub const ALLEAF_SIZE: u32 = 12;
pub const ALNODE_SIZE: u32 = 8;

/// Maps a run of `run` file sectors starting at logical sector `log` to
/// physical sectors starting at `phys`.
pub struct AlLeaf {
    pub log: u32,
    pub run: u32,
    pub phys: u32
}

/// Internal node: child ALSEC at `phys`, covering logical sectors below
/// `log` (the last child uses the 0xFFFFFFFF sentinel).
pub struct AlNode {
    pub log: u32,
    pub phys: u32
}

pub fn leaf_at(payload: &[u8],i: usize) -> AlLeaf {
    let off = i * ALLEAF_SIZE as usize;
    AlLeaf {
        log: u32::from_le_bytes([payload[off],payload[off+1],payload[off+2],payload[off+3]]),
        run: u32::from_le_bytes([payload[off+4],payload[off+5],payload[off+6],payload[off+7]]),
        phys: u32::from_le_bytes([payload[off+8],payload[off+9],payload[off+10],payload[off+11]])
    }
}

pub fn node_at(payload: &[u8],i: usize) -> AlNode {
    let off = i * ALNODE_SIZE as usize;
    AlNode {
        log: u32::from_le_bytes([payload[off],payload[off+1],payload[off+2],payload[off+3]]),
        phys: u32::from_le_bytes([payload[off+4],payload[off+5],payload[off+6],payload[off+7]])
    }
}

#[derive(BinRead)]
#[br(little)]
pub struct Fnode {
    pub sig: u32,
    pub sr_hist: u32,
    pub fr_hist: u32,
    /// length byte plus the first 15 characters of the name
    pub name: [u8;16],
    pub cont_dir: u32,
    pub acl: AuxInfo,
    pub hist_bits: u8,
    pub ea: AuxInfo,
    pub flag: u8,
    pub alb: AlBlk,
    /// 8 ALLEAFs or 12 ALNODEs
    pub storage: [u8;96],
    pub vlen: u32,
    pub ref_count: u32,
    pub uid: [u8;16],
    pub acl_base: u16,
    pub spare: [u8;10]
}

/// first byte of the FNODE's variable area
pub const FNODE_FREE_OFFSET: u32 = 196;

#[derive(BinRead)]
#[br(little)]
pub struct AlsecHeader {
    pub sig: u32,
    pub self_lsn: u32,
    pub parent_lsn: u32,
    pub alb: AlBlk
}

/// byte offset of the ALLEAF/ALNODE array inside an ALSEC
pub const ALSEC_PAYLOAD: usize = 20;

#[derive(BinRead)]
#[br(little)]
pub struct DirblkHeader {
    pub sig: u32,
    pub first_free: u32,
    pub change: u32,
    pub parent: u32,
    pub this_dir: u32
}

/// byte offset of the first DIRENT inside a DIRBLK
pub const DIRBLK_FIRST: usize = 20;
pub const DIRBLK_BYTES: usize = 2048;
/// fixed part of a DIRENT, including the first name byte
pub const DIRENT_SIZE: u32 = 32;

/// One decoded DIRENT.
pub struct Dirent {
    pub len: u32,
    pub flags: u8,
    pub attr: u8,
    pub fnode: u32,
    pub tim_mod: u32,
    pub fsize: u32,
    pub tim_access: u32,
    pub tim_create: u32,
    pub ea_len: u32,
    pub flex: u8,
    pub code_page: u8,
    pub name_len: u8,
    pub name: Vec<u8>,
    pub down: Option<u32>
}

impl Dirent {
    pub fn is_end(&self) -> bool {
        self.flags & DF_END != 0
    }
    pub fn is_dotdot(&self) -> bool {
        self.flags & DF_SPEC != 0
    }
}

#[derive(BinRead)]
#[br(little)]
pub struct CpInfoEntry {
    pub country: u16,
    pub codepage: u16,
    pub cksum: u32,
    pub data_sector: u32,
    pub index: u16,
    pub dbcs_ranges: u16
}

#[derive(BinRead)]
#[br(little)]
pub struct CpInfoHeader {
    pub sig: u32,
    pub count: u32,
    pub first_index: u32,
    pub next: u32
}

#[derive(BinRead)]
#[br(little)]
pub struct CpDataHeader {
    pub sig: u32,
    pub count: u16,
    pub first_index: u16,
    pub cksum: [u32;3],
    pub offset: [u16;3]
}

/// fixed part of a CPDATAENTRY (country, code page, range count, 128-byte
/// case table), excluding the DBCS range array
pub const CPDATA_ENTRY_FIXED: u32 = 134;

/// Our own representation of one code page.
pub struct CodePage {
    pub country: u16,
    pub codepage: u16,
    pub cksum: u32,
    pub data_sector: u32,
    pub dbcs_ranges: u16,
    /// whether a data sector supplied the case table
    pub hit: bool,
    pub case_map: [u8;256],
    pub case_map_changed: [bool;256]
}

impl CodePage {
    pub fn new(info: &CpInfoEntry) -> Self {
        let mut case_map = [0u8;256];
        for i in 0..256 {
            case_map[i] = (i as u8).to_ascii_uppercase();
        }
        Self {
            country: info.country,
            codepage: info.codepage,
            cksum: info.cksum,
            data_sector: info.data_sector,
            dbcs_ranges: info.dbcs_ranges,
            hit: false,
            case_map,
            case_map_changed: [false;256]
        }
    }
}

/// HPFS timestamps count seconds from the Unix epoch; anything earlier
/// than 1980 cannot have been written by a working system.
pub const MIN_TIME: u32 = 315532800;

/// Timestamp with decoded form, for structure descriptions.
pub fn format_time(x: u32) -> String {
    if x==0 {
        return "never".to_string();
    }
    if x < MIN_TIME {
        return format!("0x{:x}",x);
    }
    match DateTime::from_timestamp(x as i64,0) {
        Some(t) => format!("0x{:x} ({})",x,t.format("%Y-%m-%d %H:%M:%S")),
        None => format!("0x{:x}",x)
    }
}

/// Timestamp for `dir` listings.
pub fn format_dir_time(x: u32) -> String {
    if x < MIN_TIME {
        return "????-??-?? ??:??:??".to_string();
    }
    match DateTime::from_timestamp(x as i64,0) {
        Some(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "????-??-?? ??:??:??".to_string()
    }
}

/// Whether `name` would be a valid name on a FAT file system.  The
/// space character counts as valid; that is what HPFS.IFS does.
pub fn is_fat_name(name: &[u8]) -> bool {
    if name.first()==Some(&b'.') {
        return name==b"." || name==b"..";
    }
    let dot = name.iter().position(|c| *c==b'.');
    let n = dot.unwrap_or(name.len());
    if n > 8 {
        return false;
    }
    if let Some(p) = dot {
        if p > 0 && name[p-1]==b' ' {
            return false;
        }
        if name.len() - (p + 1) > 3 {
            return false;
        }
        if name[p+1..].contains(&b'.') {
            return false;
        }
    }
    !name.iter().any(|c| *c < 0x20 || b"\"*+,/;:<=>?[\\]|".contains(c))
}

/// Whether `name` is a valid HPFS name; `.` and `..` are not.
pub fn is_hpfs_name(name: &[u8]) -> bool {
    if name.len()==0 {
        return false;
    }
    if name.iter().any(|c| *c < 0x20 || b"\"*/:<>?\\|".contains(c)) {
        return false;
    }
    let last = name[name.len()-1];
    last != b'.' && last != b' '
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotating_checksum() {
        let buf: Vec<u8> = (0u8..16).collect();
        assert_eq!(checksum(&buf),0x61f65364);
        assert_eq!(checksum(b""),0);
    }

    #[test]
    fn fat_name_compat() {
        assert!(is_fat_name(b"CONFIG.SYS"));
        assert!(is_fat_name(b"NOEXT"));
        assert!(is_fat_name(b".."));
        assert!(!is_fat_name(b"LONGBASENAME.TXT"));
        assert!(!is_fat_name(b"TWO.DOT.S"));
        assert!(!is_fat_name(b"A.LONGEXT"));
        assert!(is_fat_name(b"HAS SPACE"));
    }

    #[test]
    fn hpfs_name_rules() {
        assert!(is_hpfs_name(b"a perfectly long HPFS name.txt"));
        assert!(!is_hpfs_name(b"bad*name"));
        assert!(!is_hpfs_name(b"trailing."));
        assert!(!is_hpfs_name(b"trailing "));
        assert!(!is_hpfs_name(b""));
    }

    #[test]
    fn spare_checksum_recipe() {
        let mut raw = vec![0u8;512];
        raw[8] = SPF_DIRT | SPF_VER;
        raw[44..48].copy_from_slice(&[0xde,0xad,0xbe,0xef]);
        let mut expect = vec![0u8;512];
        expect[8] = SPF_VER;
        assert_eq!(spareblock_checksum(&raw),checksum(&expect));
    }
}
