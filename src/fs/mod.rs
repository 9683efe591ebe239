//! # File System Walkers
//!
//! A walker interprets the structural metadata of one volume: it reads
//! sectors through a `Volume`, classifies every allocation unit it can
//! reach, verifies the invariants the on-disk format promises, and emits
//! findings into a `Report`.  There is one walker per supported file
//! system, under `fat` and `hpfs`.
//!
//! Walkers are driven by a `ScanCfg`, an explicit record of which action
//! is running (`check`, `info`, `save`, a path search, ...).  A walker
//! never aborts on a structural anomaly; it warns and continues, cutting
//! off only the corrupt branch.  The only conditions that unwind through
//! the recursion are fatal errors (unreadable critical sector, missing
//! magic) and the successful completion of a path-directed search, both
//! carried as `fs::Error` values.

pub mod accounting;
pub mod fat;
pub mod hpfs;

use colored::Colorize;
use crate::bios::bpb::BootSector;
use crate::dio::{BlockSource,SourceKind};
use crate::dio::save::SaveFile;
use crate::{escaped_string,DYNERR};

/// File attributes, shared by FAT directory entries and HPFS DIRENTs.
pub const ATTR_READONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_LABEL: u8 = 0x08;
pub const ATTR_DIR: u8 = 0x10;
pub const ATTR_ARCHIVED: u8 = 0x20;

/// Enumerates walker errors.  Everything that is not one of these is a
/// counted warning, not an error.
#[derive(thiserror::Error,Debug)]
pub enum Error {
    #[error("{0}")]
    Fatal(String),
    /// path-directed walk located its target; mapped to success upstream
    #[error("path was located")]
    Found,
    #[error("\"{0}\" not found in \"{1}\"")]
    NotFound(String,String),
    #[error("HPOFS not supported")]
    UnsupportedFileSystem
}

/// Which file system to force, bypassing the boot sector signature.
#[derive(PartialEq,Clone,Copy)]
pub enum Flavor {
    Fat,
    Hpfs
}

impl std::str::FromStr for Flavor {
    type Err = Error;
    fn from_str(s: &str) -> Result<Self,Self::Err> {
        match s {
            "fat" => Ok(Self::Fat),
            "hpfs" => Ok(Self::Hpfs),
            _ => Err(Error::UnsupportedFileSystem)
        }
    }
}

/// Explicit configuration record for one walk.  The action verbs map onto
/// combinations of these flags; the walkers branch on them to activate or
/// suppress sub-work.
pub struct ScanCfg {
    /// verify invariants
    pub check: bool,
    /// describe structures
    pub info: bool,
    /// mirror reads into a snapshot capture
    pub save: bool,
    /// describe the unit holding this sector (or cluster, on FAT)
    pub what: Option<u32>,
    /// `what` is a cluster number rather than a sector number
    pub what_cluster: bool,
    /// path-directed walk: find this path, then stop
    pub find: Option<String>,
    /// describe where the found path is stored
    pub locate: bool,
    /// list the found directory instead of recursing further
    pub dir: bool,
    /// stream the found file's bytes to the capture
    pub copy: bool,
    pub pedantic: bool,
    /// print every path as it is visited
    pub verbose: bool,
    /// list allocated-but-unreachable ranges during check
    pub check_unused: bool,
    /// list unallocated ranges during info
    pub show_unused: bool,
    pub show_frag: bool,
    pub show_free_frag: bool,
    /// list extended attribute names
    pub show_eas: bool,
    pub summary: bool,
    /// print sector numbers in hexadecimal
    pub hex: bool
}

impl ScanCfg {
    pub fn new() -> Self {
        Self {
            check: false, info: false, save: false,
            what: None, what_cluster: false,
            find: None, locate: false, dir: false, copy: false,
            pedantic: false, verbose: false,
            check_unused: false, show_unused: false,
            show_frag: false, show_free_frag: false, show_eas: false,
            summary: false, hex: false
        }
    }
    /// format one sector number per the number base switch
    pub fn sec(&self,n: u32) -> String {
        match self.hex {
            true => format!("#0x{:08x}",n),
            false => format!("#{}",n)
        }
    }
    /// format a range of sector numbers
    pub fn sec_range(&self,start: u32,count: u32) -> String {
        match count {
            1 => format!("sector {}",self.sec(start)),
            _ => format!("{} sectors {}-{}",count,self.sec(start),self.sec(start+count-1))
        }
    }
}

/// Counted findings of a walk.  Severity 0 are warnings, severity 1 are
/// errors a repair tool would act on; the exit code reflects severity 1.
pub struct Report {
    counts: [u32;2]
}

impl Report {
    pub fn new() -> Self {
        Self { counts: [0,0] }
    }
    fn prolog(level: usize) -> String {
        let tag = match level {
            0 => "WARNING: ",
            _ => "ERROR: "
        };
        match atty::is(atty::Stream::Stderr) {
            true if level==0 => tag.yellow().to_string(),
            true => tag.red().to_string(),
            false => tag.to_string()
        }
    }
    /// Emit a finding of the given severity and count it.
    pub fn warning(&mut self,level: usize,msg: String) {
        eprintln!("{}{}",Self::prolog(level),msg);
        self.counts[level.min(1)] += 1;
    }
    /// Continue the previous finding with an indented detail line.
    pub fn cont(&self,msg: String) {
        eprintln!("  {}",msg);
    }
    pub fn count(&self,level: usize) -> u32 {
        self.counts[level.min(1)]
    }
    /// Print totals; unconditionally if `always`, else only when nonzero.
    pub fn totals(&self,always: bool) {
        if always || self.counts[0] != 0 || self.counts[1] != 0 {
            println!("Total warnings: {}, total errors: {}",self.counts[0],self.counts[1]);
        }
    }
    /// 0 if the walk is clean enough to call success, 1 otherwise
    pub fn exit_code(&self) -> i32 {
        match self.counts[1] {
            0 => 0,
            _ => 1
        }
    }
}

/// A block source plus the capture being written, if any.  Every read a
/// walker issues goes through here, so a single `record` argument at the
/// read site decides whether the sector lands in the capture.
pub struct Volume {
    src: Box<dyn BlockSource>,
    cap: Option<SaveFile>
}

impl Volume {
    pub fn new(src: Box<dyn BlockSource>) -> Self {
        Self { src, cap: None }
    }
    pub fn with_capture(src: Box<dyn BlockSource>,cap: SaveFile) -> Self {
        Self { src, cap: Some(cap) }
    }
    /// Read `count` sectors starting at `sec`.  Failure is always fatal:
    /// a walker that cannot read has nothing left to verify.  If `record`
    /// is set and a capture is attached, the sectors are mirrored.
    pub fn read(&mut self,sec: u32,count: u32,record: bool) -> Result<Vec<u8>,DYNERR> {
        let buf = match self.src.read_sectors(sec,count) {
            Ok(buf) => buf,
            Err(e) => return Err(Box::new(Error::Fatal(format!("cannot read sector #{}: {}",sec,e))))
        };
        if record {
            if let Some(cap) = &mut self.cap {
                cap.rec_sectors(&buf,sec)?;
            }
        }
        Ok(buf)
    }
    pub fn kind(&self) -> SourceKind {
        self.src.kind()
    }
    pub fn total_sectors(&self) -> u32 {
        self.src.total_sectors()
    }
    pub fn capture(&mut self) -> Option<&mut SaveFile> {
        self.cap.as_mut()
    }
    pub fn take_capture(&mut self) -> Option<SaveFile> {
        self.cap.take()
    }
}

/// An immutable chain of path components, stored in a push-only arena so
/// that links can be handed down through recursion as plain ids.  Nothing
/// is freed until the walk ends.
#[derive(Clone,Copy,PartialEq,Eq)]
pub struct PathId(u32);

pub struct PathArena {
    parents: Vec<Option<PathId>>,
    names: Vec<String>
}

impl PathArena {
    pub fn new() -> Self {
        Self { parents: Vec::new(), names: Vec::new() }
    }
    /// the root link, named by the empty string
    pub fn root(&mut self) -> PathId {
        self.push_opt(None,"")
    }
    pub fn push(&mut self,parent: PathId,name: &str) -> PathId {
        self.push_opt(Some(parent),name)
    }
    fn push_opt(&mut self,parent: Option<PathId>,name: &str) -> PathId {
        self.parents.push(parent);
        self.names.push(name.to_string());
        PathId(self.names.len() as u32 - 1)
    }
    pub fn name(&self,id: PathId) -> &str {
        &self.names[id.0 as usize]
    }
    pub fn parent(&self,id: PathId) -> Option<PathId> {
        self.parents[id.0 as usize]
    }
    /// Format the chain as `\dir\file`, optionally appending `last`.
    pub fn format_with(&self,id: PathId,last: Option<&str>) -> String {
        let mut parts: Vec<&str> = Vec::new();
        let mut curs = Some(id);
        while let Some(link) = curs {
            parts.push(&self.names[link.0 as usize]);
            curs = self.parents[link.0 as usize];
        }
        parts.reverse();
        if let Some(name) = last {
            parts.push(name);
        }
        let mut ans = String::new();
        for p in parts {
            if !ans.ends_with('\\') {
                ans.push('\\');
            }
            ans += p;
        }
        if ans.len()==0 {
            ans.push('\\');
        }
        ans
    }
    pub fn format(&self,id: PathId) -> String {
        self.format_with(id,None)
    }
    /// length in characters, counting one separator per component
    pub fn chain_len(&self,id: PathId) -> usize {
        let mut ans: isize = -1;
        let mut curs = Some(id);
        while let Some(link) = curs {
            ans += self.names[link.0 as usize].len() as isize + 1;
            curs = self.parents[link.0 as usize];
        }
        ans.max(0) as usize
    }
}

/// Splits the requested path into components as the walk descends.  Both
/// separators are accepted on the command line; internally it is all
/// backslashes, as on the volumes themselves.
pub struct Finder {
    rest: String,
    comp: String
}

impl Finder {
    pub fn new(path: &str) -> Self {
        let mut rest = path.replace('/',"\\");
        if rest.starts_with('\\') {
            rest.remove(0);
        }
        Self { rest, comp: String::new() }
    }
    /// true when the previously split component was the last one
    pub fn at_target(&self) -> bool {
        self.rest.len()==0
    }
    pub fn comp(&self) -> &str {
        &self.comp
    }
    /// Split the next component off the remaining path.
    pub fn next_component(&mut self) -> Result<(),DYNERR> {
        if self.rest.ends_with('\\') {
            return Err(Box::new(Error::Fatal("trailing backslash".to_string())));
        }
        let (comp,rest) = match self.rest.split_once('\\') {
            Some((c,r)) => (c.to_string(),r.to_string()),
            None => (self.rest.clone(),String::new())
        };
        if comp.len() > 255 {
            return Err(Box::new(Error::Fatal("path name component too long".to_string())));
        }
        self.comp = comp;
        self.rest = rest;
        Ok(())
    }
}

/// A resizable histogram counting how many objects had k extents.
pub struct Extents {
    counts: Vec<u32>
}

impl Extents {
    pub fn new() -> Self {
        Self { counts: Vec::new() }
    }
    pub fn add(&mut self,count: usize) {
        if count >= self.counts.len() {
            self.counts.resize((count | 0xff) + 1,0);
        }
        self.counts[count] += 1;
    }
    pub fn show(&self,msg: &str) {
        println!();
        println!("Fragmentation of {}:",msg);
        println!("Extents | Number");
        println!("--------+-------");
        for (i,n) in self.counts.iter().enumerate() {
            if *n != 0 {
                println!("{:7} | {}",i,n);
            }
        }
    }
}

/// Apply the selected action to an entire volume.  The file system is
/// chosen by the boot sector signature unless forced.
pub fn scan_volume(vol: &mut Volume,cfg: &ScanCfg,rpt: &mut Report,force: Option<Flavor>) -> crate::STDRESULT {
    let boot_raw = vol.read(0,1,true)?;
    let boot = BootSector::from_bytes(&boot_raw)?;
    if cfg.info {
        println!("Boot sector:");
        println!("  OEM:                      {}",escaped_string(boot.oem(),false));
        println!("  Bytes per sector:         {}",boot.bytes_per_sec());
        println!("  Sectors per cluster:      {}",boot.secs_per_clus());
        println!("  Reserved sectors:         {}",boot.res_secs());
        println!("  FATs:                     {}",boot.num_fats());
        println!("  Root directory entries:   {}",boot.root_entries());
        println!("  Sectors:                  {}",boot.tot_secs());
        println!("  Media descriptor:         0x{:x}",boot.media());
        println!("  Sectors per FAT:          {}",boot.secs_per_fat());
        println!("  Sectors per track:        {}",boot.secs_per_track());
        println!("  Heads:                    {}",boot.heads());
        println!("  Hidden sectors:           {}",boot.hidden_secs());
        println!("  Drive number:             {}",boot.drive_num());
        println!("  Extended signature:       0x{:x}",boot.extended_sig());
        if boot.extended_sig()==40 || boot.extended_sig()==41 {
            println!("  Volume ID:                0x{:08x}",boot.vol_id());
            println!("  Volume label:             {}",escaped_string(boot.vol_label(),true));
            println!("  Volume type:              {}",escaped_string(boot.vol_type(),false));
        }
    }
    match force {
        Some(Flavor::Hpfs) => hpfs::scan(vol,cfg,rpt),
        Some(Flavor::Fat) => fat::scan(vol,cfg,rpt,&boot),
        None if boot.is_hpfs() => hpfs::scan(vol,cfg,rpt),
        None if boot.is_hpofs() => Err(Box::new(Error::UnsupportedFileSystem)),
        None => fat::scan(vol,cfg,rpt,&boot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_chains() {
        let mut arena = PathArena::new();
        let root = arena.root();
        let os2 = arena.push(root,"OS2");
        let dll = arena.push(os2,"DLL");
        assert_eq!(arena.format(root),"\\");
        assert_eq!(arena.format(dll),"\\OS2\\DLL");
        assert_eq!(arena.format_with(os2,Some("SYSTEM.INI")),"\\OS2\\SYSTEM.INI");
        assert_eq!(arena.chain_len(dll),8);
        assert_eq!(arena.chain_len(root),0);
    }

    #[test]
    fn extent_histogram() {
        let mut e = Extents::new();
        e.add(1);
        e.add(1);
        e.add(3);
        e.add(1000);
        assert_eq!(e.counts[1],2);
        assert_eq!(e.counts[3],1);
        assert_eq!(e.counts[1000],1);
        assert_eq!(e.counts.len(),(1000 | 0xff) + 1);
    }

    #[test]
    fn finder_components() {
        let mut f = Finder::new("/OS2/DLL/PMWIN.DLL");
        f.next_component().expect("split failed");
        assert_eq!(f.comp(),"OS2");
        assert!(!f.at_target());
        f.next_component().expect("split failed");
        assert_eq!(f.comp(),"DLL");
        f.next_component().expect("split failed");
        assert_eq!(f.comp(),"PMWIN.DLL");
        assert!(f.at_target());
    }
}
