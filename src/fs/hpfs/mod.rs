//! ## HPFS walker
//!
//! Interprets an HPFS volume.  Everything is anchored in the Superblock
//! (sector 16) and Spareblock (sector 17): from there the walker visits
//! the bitmap indirect block and the per-band allocation bitmaps, the bad
//! block list, the hotfix table, the code page chain, and finally the
//! FNODE/DIRBLK tree of every directory and the allocation tree of every
//! file, cross-checking each structure against the others as it goes.
//!
//! The walk is breadth-last: fixed structures are accounted first so that
//! the reachability walk can detect files trampling on them.

mod types;
mod cp;
mod dirblk;
mod alloc;
mod ea;

pub use types::{HpfsUse,checksum,spareblock_checksum};
use types::*;
use std::io::Cursor;
use binrw::BinRead;
use log::debug;
use crate::fs::accounting::{UsageMap,UsageClass,SeenMap,ShadowMap};
use crate::fs::{Volume,ScanCfg,Report,PathArena,PathId,Finder,Extents,Error};
use crate::dio::SourceKind;
use crate::STDRESULT;

struct HpfsScan<'a> {
    vol: &'a mut Volume,
    cfg: &'a ScanCfg,
    rpt: &'a mut Report,
    arena: PathArena,
    finder: Option<Finder>,
    total_sectors: u32,
    usage: UsageMap<HpfsUse>,
    seen: SeenMap,
    shadow: ShadowMap,
    /// whether this action fills and cross-checks the shadow bitmap
    track_alloc: bool,
    code_pages: Vec<CodePage>,
    cpdata_visited: Vec<u32>,
    dirband_start: u32,
    dirband_end: u32,
    dirblk_total: u32,
    dirblk_outside: u32,
    alsec_count: u32,
    file_count: u32,
    dir_count: u32,
    /// block size in sectors, >1 only for the multimedia format
    sectors_per_block: u32,
    file_extents: Extents,
    ea_extents: Extents,
    /// set after warning once that host case tables are unavailable
    no_case_data: bool,
    /// dotted display label of the current ALSEC position
    alsec_number: String,
    case_map: [u8;256],
    what_sector: Option<u32>
}

/// Apply the selected action to an HPFS volume.
pub fn scan(vol: &mut Volume,cfg: &ScanCfg,rpt: &mut Report) -> STDRESULT {
    if cfg.what.is_some() && cfg.what_cluster {
        return Err(Box::new(Error::Fatal("cluster numbers not supported on HPFS".to_string())));
    }
    // Everything is anchored in the Superblock and Spareblock.
    let superb_raw = vol.read(16,1,true)?;
    let superb = SuperBlock::read_le(&mut Cursor::new(&superb_raw))?;
    if superb.sig1 != SUPER_SIG1 || superb.sig2 != SUPER_SIG2 {
        return Err(Box::new(Error::Fatal("invalid signature of superblock, this is not an HPFS partition".to_string())));
    }
    let spareb_raw = vol.read(17,1,true)?;
    let spareb = SpareBlock::read_le(&mut Cursor::new(&spareb_raw))?;
    if spareb.sig1 != SPARE_SIG1 || spareb.sig2 != SPARE_SIG2 {
        return Err(Box::new(Error::Fatal("invalid signature of spare block".to_string())));
    }
    let total_sectors = superb.sectors_on_vol;
    if let Some(ws) = cfg.what {
        if ws >= total_sectors {
            rpt.warning(0,format!("Sector number {} is too big",cfg.sec(ws)));
        }
    }
    if vol.kind()==SourceKind::Disk && vol.total_sectors() > 0 && total_sectors > vol.total_sectors() {
        rpt.warning(1,"HPFS extends beyond end of partition indicated by BPB".to_string());
    }
    let track_alloc = cfg.check || cfg.info || cfg.what.is_some();
    let mut case_map = [0u8;256];
    for i in 0..256 {
        case_map[i] = (i as u8).to_ascii_uppercase();
    }
    debug!("HPFS volume, {} sectors, {} code pages",total_sectors,spareb.code_pages);
    let mut walker = HpfsScan {
        vol, cfg, rpt,
        arena: PathArena::new(),
        finder: cfg.find.as_ref().map(|p| Finder::new(p)),
        total_sectors,
        usage: UsageMap::new(total_sectors as usize,true),
        seen: SeenMap::new(total_sectors as usize),
        shadow: ShadowMap::new(total_sectors as usize),
        track_alloc,
        code_pages: Vec::new(),
        cpdata_visited: Vec::new(),
        dirband_start: superb.first_dirblk,
        dirband_end: superb.last_dirblk,
        dirblk_total: 0,
        dirblk_outside: 0,
        alsec_count: 0,
        file_count: 0,
        dir_count: 0,
        sectors_per_block: match superb.func_version {
            4 => 1 << spareb.align[1],
            _ => 1
        },
        file_extents: Extents::new(),
        ea_extents: Extents::new(),
        no_case_data: false,
        alsec_number: String::new(),
        case_map,
        what_sector: cfg.what
    };
    walker.run(&superb,&superb_raw,&spareb,&spareb_raw)
}

impl <'a> HpfsScan<'a> {
    fn path(&self,id: PathId) -> String {
        self.arena.format(id)
    }

    /// Claim `count` sectors starting at `secno` for `what`, warning on
    /// conflicts, out-of-range sector numbers, and (once the shadow
    /// bitmap is complete) sectors the volume says are free.
    fn use_sectors(&mut self,secno: u32,count: u32,what: HpfsUse,path: Option<PathId>) {
        for n in secno..secno.saturating_add(count) {
            if n >= self.total_sectors {
                match path {
                    None => self.rpt.warning(1,format!("Sector number {} ({}) is too big",
                        self.cfg.sec(n),what.as_str())),
                    Some(p) => self.rpt.warning(1,format!("Sector number {} ({} for \"{}\") is too big",
                        self.cfg.sec(n),what.as_str(),self.path(p)))
                };
                break;
            }
            if let Err(old) = self.usage.claim(n,what,path) {
                self.rpt.warning(1,format!("Sector {} usage conflict: {} vs. {}",
                    self.cfg.sec(n),old.as_str(),what.as_str()));
                if let Some(p0) = self.usage.path(n) {
                    self.rpt.cont(format!("File 1: \"{}\"",self.arena.format(p0)));
                }
                if let Some(p) = path {
                    self.rpt.cont(format!("File 2: \"{}\"",self.arena.format(p)));
                }
            }
            if self.shadow.ready && !self.shadow.allocated(n) {
                self.rpt.warning(1,format!("Sector {} used ({}) but not marked as allocated",
                    self.cfg.sec(n),what.as_str()));
                if let Some(p) = path {
                    self.rpt.cont(format!("File: \"{}\"",self.arena.format(p)));
                }
            }
        }
    }

    /// Set and check `have seen` bits; true means a cycle.
    fn have_seen(&mut self,secno: u32,count: u32,tag: u8,msg: &str) -> bool {
        let dups = self.seen.mark(secno,count,tag);
        for n in &dups {
            self.rpt.warning(1,format!("Sector {} already used for {}",self.cfg.sec(*n),msg));
        }
        dups.len() > 0
    }

    fn fnode_warning(&mut self,level: usize,secno: u32,path: PathId,msg: String) {
        self.rpt.warning(level,format!("FNODE {} (\"{}\"): {}",self.cfg.sec(secno),self.path(path),msg));
    }

    /// Process the bad block list: 4-sector blocks whose first word
    /// chains to the next block, zero-terminated; the other 511 words
    /// hold bad sector numbers (zero entries unused).
    fn do_bad(&mut self,mut secno: u32,total: u32) -> STDRESULT {
        let mut used: u32 = 0;
        let mut rest = total;
        while secno != 0 {
            if self.have_seen(secno,4,SEEN_BADLIST,"bad block list") {
                break;
            }
            self.use_sectors(secno,4,HpfsUse::BadList,None);
            let buf = self.vol.read(secno,4,true)?;
            let list: Vec<u32> = buf.chunks_exact(4)
                .map(|c| u32::from_le_bytes([c[0],c[1],c[2],c[3]]))
                .collect();
            if self.cfg.info {
                println!("Sectors {}-{}: Bad block list",self.cfg.sec(secno),self.cfg.sec(secno+3));
                println!("  Sector number of next bad block: {}",self.cfg.sec(list[0]));
            } else if let Some(ws) = self.what_sector {
                if ws >= secno && ws < secno + 4 {
                    println!("Sector {}: Bad block list (+{})",self.cfg.sec(ws),ws-secno);
                }
            }
            for i in 1..512.min(rest as usize + 1) {
                if list[i] != 0 {
                    used += 1;
                    if self.cfg.info {
                        println!("  Bad sector: {}",self.cfg.sec(list[i]));
                    } else if self.what_sector==Some(list[i]) {
                        println!("Sector {}: Bad sector",self.cfg.sec(list[i]));
                    }
                    self.use_sectors(list[i],1,HpfsUse::Bad,None);
                }
            }
            secno = list[0];
            rest = rest.saturating_sub(511);
        }
        if rest != 0 || secno != 0 {
            self.rpt.warning(1,"Wrong length of bad block list".to_string());
        }
        if used != total {
            self.rpt.warning(1,"Wrong number of bad blocks".to_string());
        }
        Ok(())
    }

    /// Process the hotfix table: three parallel arrays of bad sector,
    /// replacement sector, and owning FNODE sector.
    fn do_hotfix_list(&mut self,secno: u32,total: u32) -> STDRESULT {
        let mut total = total;
        if total > 512/3 {
            self.rpt.warning(1,"Maximum number of hotfixes is too big".to_string());
            total = 512/3;
        }
        if self.cfg.info {
            println!("Sectors {}-{}: Hotfix list",self.cfg.sec(secno),self.cfg.sec(secno+3));
        } else if let Some(ws) = self.what_sector {
            if ws >= secno && ws < secno + 4 {
                println!("Sector {}: Hotfix list (+{})",self.cfg.sec(ws),ws-secno);
            }
        }
        self.use_sectors(secno,4,HpfsUse::HotfixList,None);
        let buf = self.vol.read(secno,4,true)?;
        let list: Vec<u32> = buf.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0],c[1],c[2],c[3]]))
            .collect();
        for i in 0..total as usize {
            let hsecno = list[i + total as usize];
            if hsecno==0 {
                self.rpt.warning(1,"Hotfix sector number is zero".to_string());
            } else if hsecno >= self.total_sectors {
                self.rpt.warning(1,format!("Hotfix sector number {} is too big",self.cfg.sec(hsecno)));
            } else if self.usage.get(hsecno)==HpfsUse::Empty {
                if self.cfg.info {
                    println!("  Hotfix sector: {} for {}, FNODE {}",self.cfg.sec(hsecno),
                        self.cfg.sec(list[i]),self.cfg.sec(list[i + 2*total as usize]));
                }
                if self.what_sector==Some(hsecno) {
                    println!("Sector {}: Hotfix sector for {}, FNODE {}",self.cfg.sec(hsecno),
                        self.cfg.sec(list[i]),self.cfg.sec(list[i + 2*total as usize]));
                }
                self.use_sectors(hsecno,1,HpfsUse::Hotfix,None);
                if !self.shadow.allocated(hsecno) {
                    self.rpt.warning(1,format!("Hotfix sector {} not marked as allocated",self.cfg.sec(hsecno)));
                }
            }
        }
        Ok(())
    }

    /// Show a run of free sectors.
    fn show_unalloc(&self,start: u32,count: u32) {
        match count {
            1 => println!("  Unallocated: 1 sector {}",self.cfg.sec(start)),
            _ => println!("  Unallocated: {} sectors {}-{}",count,self.cfg.sec(start),self.cfg.sec(start+count-1))
        }
    }

    /// List free runs in one bitmap; returns the number of free sectors.
    fn list_free_runs(&self,bitmap: &[u8],base: u32,size: u32) -> u32 {
        let mut start = 0;
        let mut count = 0;
        let mut total = 0;
        for j in 0..size {
            if bitmap[(j >> 3) as usize] & (1 << (j & 7)) != 0 {
                if count==0 {
                    start = base + j;
                }
                count += 1;
            } else if count != 0 {
                self.show_unalloc(start,count);
                total += count;
                count = 0;
            }
        }
        if count != 0 {
            self.show_unalloc(start,count);
            total += count;
        }
        total
    }

    /// Process the bitmap block of one 8 MiB band.
    fn do_bitmap(&mut self,secno: u32,band: u32,show: bool) -> STDRESULT {
        if self.cfg.info || show {
            println!("Bitmap for band {} is in sectors {}-{}",band,self.cfg.sec(secno),self.cfg.sec(secno+3));
        }
        if let Some(ws) = self.what_sector {
            if ws >= secno && ws < secno + 4 {
                println!("Sector {}: Bitmap for band {} (+{})",self.cfg.sec(ws),band,ws-secno);
            }
        }
        self.use_sectors(secno,4,HpfsUse::Bitmap,None);
        let bitmap = self.vol.read(secno,4,true)?;
        let first_sec = band * 2048 * 8;
        if self.track_alloc {
            self.shadow.load(first_sec,&bitmap);
        }
        if self.cfg.info && self.cfg.show_unused {
            let total = self.list_free_runs(&bitmap,first_sec,2048*8);
            println!("  Unallocated sectors in band {}: {}",band,total);
        } else if let Some(ws) = self.what_sector {
            if ws >= secno && ws < secno + 4 {
                self.list_free_runs(&bitmap[((ws-secno)*512) as usize..((ws-secno+1)*512) as usize],
                    (band*2048 + (ws-secno)*512)*8,512*8);
            }
        }
        if let Some(ws) = self.what_sector {
            if ws >= first_sec && ws < first_sec + 2048*8 {
                let rel = ws - first_sec;
                let state = match bitmap[(rel >> 3) as usize] & (1 << (rel & 7)) {
                    0 => "allocated",
                    _ => "unallocated"
                };
                println!("Allocation bit for sector {} ({}) is in sector {},",self.cfg.sec(ws),state,
                    self.cfg.sec(secno + rel/(512*8)));
                println!("  byte 0x{:x}, bit {}",(rel % (512*8)) / 8,rel % 8);
            }
        }
        Ok(())
    }

    /// Process the bitmap indirect block: the list of per-band bitmap
    /// locations.  Filling the shadow bitmap completes here.
    fn do_bitmap_indirect(&mut self,secno: u32) -> STDRESULT {
        let bands = (self.total_sectors + 2048*8 - 1) / (2048*8);
        let blocks = (bands + 511) / 512;
        if self.cfg.info {
            println!("Sectors {}-{}: Bitmap indirect block",self.cfg.sec(secno),self.cfg.sec(secno + 4*blocks - 1));
        } else if let Some(ws) = self.what_sector {
            if ws >= secno && ws < secno + 4*blocks {
                println!("Sector {}: Bitmap indirect block (+{})",self.cfg.sec(ws),ws-secno);
            }
        }
        self.use_sectors(secno,4*blocks,HpfsUse::BitmapInd,None);
        let buf = self.vol.read(secno,4*blocks,true)?;
        let list: Vec<u32> = buf.chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0],c[1],c[2],c[3]]))
            .collect();
        for i in 0..bands as usize {
            let bsecno = list[i];
            if bsecno==0 {
                self.rpt.warning(1,format!("Bitmap indirect block starting at {}: Entry {} is zero",
                    self.cfg.sec(secno),i));
                break;
            }
            let show = self.what_sector==Some(secno + i as u32/(512/4));
            self.do_bitmap(bsecno,i as u32,show)?;
        }
        if self.cfg.check {
            for i in bands as usize..(blocks*512) as usize {
                if list[i] != 0 {
                    self.rpt.warning(1,format!("Bitmap indirect block starting at {}: Too many entries",
                        self.cfg.sec(secno)));
                    break;
                }
            }
        }
        if self.track_alloc {
            let nfree = self.shadow.free_count();
            let mut resvd = (self.total_sectors / 50).min(4096);
            if self.cfg.info {
                println!("Number of reserved sectors:    {} ({} used)",resvd,
                    match resvd > nfree { true => resvd - nfree, false => 0 });
            }
            if resvd > nfree {
                if self.cfg.check {
                    self.rpt.warning(0,format!("Reserved sectors are in use ({})",resvd-nfree));
                }
                resvd = 0;
            }
            if self.cfg.info {
                println!("Number of unallocated sectors: {} ({} available)",nfree,nfree-resvd);
            }
            self.shadow.ready = true;
        }
        Ok(())
    }

    /// Show the fragmentation histogram of free space.
    fn do_free_frag(&self) {
        // A free run cannot span more than two bands.
        const MAX_FREE: u32 = 32768;
        let mut counts = vec![0u32;MAX_FREE as usize];
        let mut count: u32 = 0;
        for j in 0..self.total_sectors {
            if !self.shadow.allocated(j) {
                count += 1;
            } else if count != 0 {
                if count < MAX_FREE {
                    counts[count as usize] += 1;
                }
                count = 0;
            }
        }
        if count != 0 && count < MAX_FREE {
            counts[count as usize] += 1;
        }
        println!();
        println!("Fragmentation of free space:");
        println!("Fragment size | Number of fragments of that size");
        println!("--------------+---------------------------------");
        let mut start = 1;
        while start < MAX_FREE {
            let end = (2*start).min(MAX_FREE);
            let total: u32 = (start..end).map(|k| counts[k as usize]).sum();
            println!(" {:5}-{:<5}  | {}",start,end-1,total);
            start *= 2;
        }
        println!();
    }

    /// Complain about used sectors marked free, and count lost sectors
    /// (allocated but unreachable).
    fn check_alloc(&mut self) {
        let mut i: u32 = 0;
        let mut first = true;
        while i < self.total_sectors {
            if self.usage.get(i) != HpfsUse::Empty && !self.shadow.allocated(i) {
                let start = i;
                let start_what = self.usage.get(i);
                let start_path = self.usage.path(i);
                while i < self.total_sectors
                    && self.usage.get(i) != HpfsUse::Empty && !self.shadow.allocated(i)
                    && self.usage.get(i)==start_what && self.usage.path(i)==start_path {
                    i += 1;
                }
                if first {
                    self.rpt.warning(1,"There are used sectors which are not marked as allocated:".to_string());
                    first = false;
                }
                self.rpt.warning(1,format!("Used ({}) but not marked as allocated: {}",
                    start_what.as_str(),self.cfg.sec_range(start,i-start)));
                if let Some(p) = start_path {
                    self.rpt.cont(format!("File: \"{}\"",self.arena.format(p)));
                }
            } else {
                i += 1;
            }
        }
        let mut count: u32 = 0;
        i = 0;
        while i < self.total_sectors {
            if self.usage.get(i)==HpfsUse::Empty && self.shadow.allocated(i) {
                let start = i;
                while i < self.total_sectors
                    && self.usage.get(i)==HpfsUse::Empty && self.shadow.allocated(i) {
                    i += 1;
                }
                if self.cfg.check_unused {
                    self.rpt.warning(0,format!("Unused but marked as allocated: {}",self.cfg.sec_range(start,i-start)));
                }
                count += i - start;
                // sectors 18 and 19 are always allocated but never used
                if start <= 18 && 18 < i {
                    count -= 1;
                }
                if start <= 19 && 19 < i {
                    count -= 1;
                }
            } else {
                i += 1;
            }
        }
        if count==1 {
            self.rpt.warning(0,"The file system has 1 lost sector".to_string());
        } else if count > 1 {
            self.rpt.warning(0,format!("The file system has {} lost sectors",count));
        }
    }

    /// Cross-check the DIRBLK band bitmap against the walk's findings.
    /// One bit per DIRBLK; a set bit means the DIRBLK is available.
    fn do_dirblk_bitmap(&mut self,bsecno: u32,start: u32,count: u32) -> STDRESULT {
        let mut sectors = (count + 512*8 - 1) / (512*8);
        if sectors > 4 {
            self.rpt.warning(1,"DIRBLK band too big".to_string());
            sectors = 4;
        }
        let bitmap = self.vol.read(bsecno,sectors,true)?;
        let mut dsecno = start;
        for i in 0..count {
            if dsecno >= self.total_sectors {
                break;
            }
            if bitmap[(i >> 3) as usize] & (1 << (i & 7)) != 0 {
                if self.usage.get(dsecno) != HpfsUse::BandDirblk {
                    self.rpt.warning(1,format!("Sector {} is marked available in the DIRBLK bitmap, but is used as {}",
                        self.cfg.sec(dsecno),self.usage.get(dsecno).as_str()));
                }
            } else {
                if self.usage.get(dsecno) != HpfsUse::Dirblk {
                    self.rpt.warning(1,format!("Sector {} is marked used in the DIRBLK bitmap, but is used as {}",
                        self.cfg.sec(dsecno),self.usage.get(dsecno).as_str()));
                }
            }
            dsecno += 4;
        }
        Ok(())
    }

    /// Spare DIRBLKs which are recorded as handed out must have turned
    /// into DIRBLKs.
    fn check_sparedirblk(&mut self,list: &[u32],total: u32,free: u32) {
        for i in free..total.min(list.len() as u32) {
            let secno = list[i as usize];
            if secno < self.total_sectors && self.usage.get(secno) != HpfsUse::Dirblk {
                self.rpt.warning(1,format!("Spare DIRBLK {} is not used for a DIRBLK",self.cfg.sec(secno)));
            }
        }
    }

    /// Process the FNODE of a file or directory: validate it against the
    /// DIRENT that referenced it, then walk its directory tree or its
    /// allocation tree, then its extended attributes and ACL.
    fn do_fnode(&mut self,secno: u32,path: PathId,dir_flag: bool,parent_fnode: u32,
                file_size: u32,ea_size: u32,check_ea_size: bool,need_eas: bool,list: bool) -> STDRESULT {
        let found = match &self.finder {
            Some(f) => f.at_target(),
            None => false
        };
        let mut show = found && self.cfg.locate;
        if show {
            println!("FNODE: {}",self.cfg.sec(secno));
        }
        if self.what_sector==Some(secno) {
            println!("Sector {}: FNODE for \"{}\"",self.cfg.sec(secno),self.path(path));
            show = true;
        }
        if self.have_seen(secno,1,SEEN_FNODE,"FNODE") {
            return Ok(());
        }
        self.use_sectors(secno,1,HpfsUse::Fnode,Some(path));
        let raw = self.vol.read(secno,1,true)?;
        let fnode = Fnode::read_le(&mut Cursor::new(&raw))?;
        if fnode.sig != FNODE_SIG {
            self.fnode_warning(1,secno,path,"Bad signature".to_string());
            if found {
                return Err(Box::new(Error::Found));
            }
            return Ok(());
        }
        match dir_flag {
            true => self.dir_count += 1,
            false => self.file_count += 1
        };
        let fn_fsize = fnode.vlen;
        if (fnode.flag & FNF_DIR != 0) != dir_flag {
            self.fnode_warning(1,secno,path,"Incorrect directory bit".to_string());
        }
        if fnode.cont_dir != parent_fnode {
            self.fnode_warning(1,secno,path,"Wrong pointer to containing directory".to_string());
        }
        if self.cfg.check {
            if (fnode.ref_count==0)==need_eas {
                self.fnode_warning(1,secno,path,"Need-EA bit of DIRENT is wrong".to_string());
            }
            let name = self.arena.name(path).as_bytes().to_vec();
            let n16 = name.len().min(16);
            let n15 = name.len().min(15);
            if fnode.name[0] as usize != name.len() && fnode.name[0..n16]==name[0..n16] {
                self.fnode_warning(0,secno,path,"Truncated name mangled by OS/2 2.0 bug".to_string());
            } else if fnode.name[0] as usize != name.len() {
                self.fnode_warning(1,secno,path,format!("Wrong full name length ({} vs. {})",fnode.name[0],name.len()));
            } else if fnode.name[1..1+n15] != name[0..n15] {
                self.fnode_warning(1,secno,path,"Wrong truncated name".to_string());
            }
            if !dir_flag && file_size != fn_fsize {
                self.fnode_warning(1,secno,path,"File size does not match DIRENT".to_string());
            }
            if self.cfg.pedantic {
                for (i,b) in fnode.spare.iter().enumerate() {
                    if *b != 0 {
                        self.fnode_warning(0,secno,path,format!("abSpare[{}] is 0x{:02x}",i,b));
                    }
                }
            }
        }
        if show {
            let mut flags = format!("  Flags:                       0x{:02x}",fnode.flag);
            if fnode.flag & FNF_DIR != 0 {
                flags += " dir";
            }
            println!("{}",flags);
            println!("  Size of file:                {}",fn_fsize);
            println!("  Number of `need' EAs:        {}",fnode.ref_count);
            println!("  Offset of first ACE:         {}",fnode.acl_base);
            println!("  ACL size in FNODE:           {}",fnode.acl.fnl);
            println!("  External ACL size:           {}",fnode.acl.sp.cb_run);
        }
        if dir_flag {
            let root_dirblk = leaf_at(&fnode.storage,0).phys;
            if show {
                println!("  Root DIRBLK sector:          {}",self.cfg.sec(root_dirblk));
            }
            if self.cfg.copy && found {
                return Err(Box::new(Error::Fatal("directories cannot be copied".to_string())));
            }
            if self.finder.is_some() && !found && !list {
                self.finder.as_mut().unwrap().next_component()?;
            }
            if !found || list {
                let mut ctx = dirblk::DirCtx::new(self.code_pages.len() as u32);
                self.do_dirblk(root_dirblk,path,secno,secno,Some(&mut ctx),0,list)?;
                if !ctx.dotdot {
                    self.rpt.warning(1,format!("Missing \"..\" entry in directory \"{}\"",self.path(path)));
                }
            }
            if self.finder.is_some() && !found {
                let comp = self.finder.as_ref().map(|f| f.comp().to_string()).unwrap_or_default();
                return Err(Box::new(Error::NotFound(comp,self.path(path))));
            }
        } else {
            let mut file_sec: u32 = 0;
            let mut disk_sec: u32 = 0;
            let mut extents: u32 = 0;
            self.alsec_number.clear();
            let copy_size = match found && self.cfg.copy { true => fn_fsize, false => 0 };
            let expected = (fn_fsize + 511) / 512;
            let height = self.do_storage(secno,&fnode.alb,&fnode.storage,8,path,
                &mut file_sec,&mut disk_sec,expected,secno,0,HpfsUse::File,
                &mut extents,show,copy_size,&mut None)?;
            if show {
                println!("  Allocation tree height:      {}",height);
                println!("  Number of sectors:           {}",file_sec);
                println!("  Number of extents:           {}",extents);
            }
            if self.cfg.show_frag {
                self.file_extents.add(extents as usize);
            }
            if (file_sec as u64) * 512 < fn_fsize as u64 {
                self.fnode_warning(1,secno,path,"Not enough sectors allocated".to_string());
            }
            if file_sec > expected {
                self.fnode_warning(1,secno,path,format!("Too many sectors allocated ({})",file_sec-expected));
            }
        }
        // ACL entries come first in the FNODE's variable area, then EAs.
        let ea_base = fnode.acl_base as u32 + fnode.acl.fnl as u32;
        self.do_auxinfo(&raw,&fnode.ea,ea_base,secno,path,HpfsUse::Ea,
            ea_size,check_ea_size,fnode.ref_count,show)?;
        self.do_auxinfo(&raw,&fnode.acl,fnode.acl_base as u32,secno,path,HpfsUse::Acl,
            0,false,0,show)?;
        if found {
            if self.cfg.copy {
                if let Some(cap) = self.vol.take_capture() {
                    cap.close()?;
                }
            }
            return Err(Box::new(Error::Found));
        }
        Ok(())
    }

    fn run(&mut self,superb: &SuperBlock,superb_raw: &[u8],spareb: &SpareBlock,spareb_raw: &[u8]) -> STDRESULT {
        let superb_chksum = checksum(&superb_raw[0..512]);
        let spareb_chksum = spareblock_checksum(spareb_raw);
        let dirband_sectors = superb.dirblk_band_sectors;

        // Fixed layout: boot, loader, Superblock, Spareblock.
        if self.what_sector==Some(0) {
            println!("Sector {}: Boot sector",self.cfg.sec(0));
        }
        self.use_sectors(0,1,HpfsUse::Boot,None);
        if let Some(ws) = self.what_sector {
            if ws >= 1 && ws < 16 {
                println!("Sector {}: Boot loader",self.cfg.sec(ws));
            }
        }
        self.use_sectors(1,15,HpfsUse::Loader,None);
        self.use_sectors(16,1,HpfsUse::Super,None);
        if self.cfg.info || self.what_sector==Some(16) {
            println!("Sector {}: Super block",self.cfg.sec(16));
            println!("  HPFS Version:                       {}",superb.version);
            let func = match superb.func_version {
                2 => " (<=4GB)",
                3 => " (>4GB)",
                4 => " (multimedia)",
                _ => ""
            };
            println!("  Functional version:                 {}{}",superb.func_version,func);
            println!("  Root directory FNODE at:            {}",self.cfg.sec(superb.root_fnode));
            println!("  Total number of sectors:            {}",superb.sectors_on_vol);
            println!("  Number of bad sectors:              {}",superb.num_bad_sects);
            println!("  Bitmap indirect block at:           {}",self.cfg.sec(superb.bitmap_ind));
            println!("  Bad block list starts at:           {}",self.cfg.sec(superb.bad_list));
            println!("  Time of last chkdsk:                {}",format_time(superb.last_chkdsk));
            println!("  Time of last optimization:          {}",format_time(superb.last_optimize));
            println!("  Number of sectors in DIRBLK band:   {}",superb.dirblk_band_sectors);
            println!("  First sector in DIRBLK band:        {}",self.cfg.sec(superb.first_dirblk));
            println!("  Last sector in DIRBLK band:         {}",self.cfg.sec(superb.last_dirblk));
            println!("  First sector of DIRBLK band bitmap: {}",self.cfg.sec(superb.dirblk_map));
            println!("  Sector number of user ID table:     {}",self.cfg.sec(superb.sid_tab));
            println!("  Check sum (computed):               0x{:08x}",superb_chksum);
        }
        self.use_sectors(17,1,HpfsUse::Spare,None);
        if self.cfg.info || self.what_sector==Some(17) {
            println!("Sector {}: Spare block",self.cfg.sec(17));
            let mut flags = format!("  Spare block flags:                  0x{:02x} (",spareb.flag);
            flags += match spareb.flag & SPF_DIRT { 0 => "clean", _ => "dirty" };
            if spareb.flag & SPF_SPARE != 0 { flags += " spare"; }
            if spareb.flag & SPF_HFUSED != 0 { flags += " hotfix"; }
            if spareb.flag & SPF_BADSEC != 0 { flags += " badsec"; }
            if spareb.flag & SPF_BADBM != 0 { flags += " badbmp"; }
            if spareb.flag & SPF_FASTFMT != 0 { flags += " fastfmt"; }
            if spareb.flag & SPF_VER != 0 { flags += " version"; }
            println!("{})",flags);
            println!("  Block size:                         {}",self.sectors_per_block * 512);
            println!("  Hotfix sector mapping table at:     {}",self.cfg.sec(spareb.hotfix_list));
            println!("  Number of hotfixes used:            {}",spareb.hotfixes_used);
            println!("  Maximum number of hotfixes:         {}",spareb.max_hotfixes);
            println!("  Number of free spare DIRBLKs:       {}",spareb.spare_dirblks_free);
            println!("  Total number of spare DIRBLKs:      {}",spareb.spare_dirblks_max);
            println!("  Code page information sector at:    {}",self.cfg.sec(spareb.cpinfo));
            println!("  Number of code pages:               {}",spareb.code_pages);
            println!("  Checksum of Super block:            0x{:08x}",spareb.extra[0]);
            println!("  Checksum of Spare block:            0x{:08x}",spareb.extra[1]);
            println!("  Check sum (computed):               0x{:08x}",spareb_chksum);
            for i in 0..spareb.spare_dirblks_max.min(101) as usize {
                println!("  Spare DIRBLK at {}",self.cfg.sec(spareb.spare_dirblks[i]));
            }
        }

        // DIRBLK band and its private bitmap.
        let band_len = match self.dirband_end >= self.dirband_start {
            true => self.dirband_end - self.dirband_start + 1,
            false => 0
        };
        if let Some(ws) = self.what_sector {
            if ws >= self.dirband_start && ws < self.dirband_start.saturating_add(band_len) {
                println!("Sector {} is in the DIRBLK band",self.cfg.sec(ws));
            }
        }
        self.use_sectors(self.dirband_start,band_len,HpfsUse::BandDirblk,None);
        if self.cfg.info {
            println!("Sectors {}-{}: DIRBLK band bitmap",self.cfg.sec(superb.dirblk_map),self.cfg.sec(superb.dirblk_map+3));
        }
        if let Some(ws) = self.what_sector {
            if ws >= superb.dirblk_map && ws < superb.dirblk_map + 4 {
                println!("Sector {} is in the DIRBLK band bitmap (+{})",self.cfg.sec(ws),ws-superb.dirblk_map);
            }
        }
        self.use_sectors(superb.dirblk_map,4,HpfsUse::DirblkBitmap,None);

        // 8 sectors reserved for user IDs, currently unused by the OS.
        if let Some(ws) = self.what_sector {
            if ws >= superb.sid_tab && ws < superb.sid_tab + 8 {
                println!("Sector {}: User ID",self.cfg.sec(ws));
            }
        }
        self.use_sectors(superb.sid_tab,8,HpfsUse::Sid,None);

        // Spare DIRBLKs.
        for i in 0..spareb.spare_dirblks_max.min(101) as usize {
            let s = spareb.spare_dirblks[i];
            if let Some(ws) = self.what_sector {
                if ws >= s && ws < s + 4 {
                    println!("Sector {}: Spare DIRBLK (+{})",self.cfg.sec(ws),ws-s);
                }
            }
            self.use_sectors(s,4,HpfsUse::SpareDirblk,None);
        }

        // Superblock and Spareblock consistency.
        if self.cfg.check {
            if self.dirband_start > self.dirband_end {
                self.rpt.warning(1,format!("SUPERBLK {}: DIRBLK band start greater than DIRBLK band end",self.cfg.sec(16)));
            }
            if dirband_sectors & 3 != 0 {
                self.rpt.warning(1,format!("SUPERBLK {}: Number of DIRBLK band sectors is not a multiple of 4",self.cfg.sec(16)));
            }
            if self.dirband_start.wrapping_add(dirband_sectors).wrapping_sub(1) != self.dirband_end {
                self.rpt.warning(1,format!("SUPERBLK {}: Wrong DIRBLK band size",self.cfg.sec(16)));
            }
            if superb.dirblk_map & 3 != 0 {
                self.rpt.warning(1,format!("SUPERBLK {}: DIRBLK band bitmap not on a 2K boundary",self.cfg.sec(16)));
            }
            if (spareb.flag & SPF_HFUSED==0) != (spareb.hotfixes_used==0) {
                self.rpt.warning(1,format!("SPAREBLK {}: Hotfix bit is wrong",self.cfg.sec(17)));
            }
            if (spareb.flag & SPF_BADSEC==0) != (superb.num_bad_sects==0) {
                self.rpt.warning(1,format!("SPAREBLK {}: Bad sector bit is wrong",self.cfg.sec(17)));
            }
            if (spareb.flag & SPF_SPARE==0) != (spareb.spare_dirblks_free==spareb.spare_dirblks_max) {
                self.rpt.warning(1,format!("SPAREBLK {}: Spare DIRBLK bit is wrong",self.cfg.sec(17)));
            }
            if spareb.spare_dirblks_free > spareb.spare_dirblks_max {
                self.rpt.warning(1,format!("SPAREBLK {}: Number of free spare DIRBLKs exceeds maximum number",self.cfg.sec(17)));
            }
            if spareb.extra[0] != superb_chksum {
                self.rpt.warning(1,format!("SPAREBLK {}: Incorrect checksum for Super block",self.cfg.sec(17)));
            }
            if spareb.extra[1] != spareb_chksum {
                self.rpt.warning(1,format!("SPAREBLK {}: Incorrect checksum for Spare block",self.cfg.sec(17)));
            }
            if superb.func_version==4 {
                // samples of the multimedia format are rare; flag values
                // that differ from the known ones
                if spareb.align[0] != 8 {
                    self.rpt.warning(0,format!("SPAREBLK {}: .bAlign[0] is {}",self.cfg.sec(17),spareb.align[0]));
                }
                if spareb.align[1] != 9 {
                    self.rpt.warning(0,format!("SPAREBLK {}: .bAlign[1] is {}",self.cfg.sec(17),spareb.align[1]));
                }
            }
            if self.cfg.pedantic && spareb.align[2] != 0 {
                self.rpt.warning(0,format!("SPAREBLK {}: .bAlign[2] is {}",self.cfg.sec(17),spareb.align[2]));
            }
        }

        if self.cfg.check || self.cfg.info || self.cfg.save || self.what_sector.is_some() {
            self.do_bad(superb.bad_list,superb.num_bad_sects)?;
            self.do_hotfix_list(spareb.hotfix_list,spareb.max_hotfixes)?;
            self.do_bitmap_indirect(superb.bitmap_ind)?;
        }
        if self.cfg.check || self.cfg.info || self.cfg.save || self.what_sector.is_some() || self.finder.is_some() {
            self.do_cpinfosec(spareb.cpinfo,spareb.code_pages)?;
        }

        // The interesting part: walk every directory and file.
        if self.cfg.check || self.cfg.save || self.what_sector.is_some() || self.finder.is_some() {
            let root = self.arena.root();
            let list = self.cfg.dir && self.finder.as_ref().map(|f| f.at_target()).unwrap_or(false);
            self.do_fnode(superb.root_fnode,root,true,superb.root_fnode,0,0,false,false,list)?;
        }

        if self.cfg.check || self.cfg.save {
            self.do_dirblk_bitmap(superb.dirblk_map,self.dirband_start,dirband_sectors/4)?;
        }
        if self.cfg.check {
            self.check_sparedirblk(&spareb.spare_dirblks,spareb.spare_dirblks_max,spareb.spare_dirblks_free);
            self.check_alloc();
            if self.cfg.summary {
                println!("Number of directories: {}",self.dir_count);
                println!("Number of files:       {}",self.file_count);
                println!("Number of DIRBLKs:     {} ({} outside DIRBLK band)",self.dirblk_total,self.dirblk_outside);
                println!("Number of ALSECs:      {}",self.alsec_count);
            }
        }
        if self.cfg.info && self.cfg.show_free_frag {
            self.do_free_frag();
        }
        if self.cfg.show_frag {
            self.file_extents.show("file data");
            self.ea_extents.show("extended attributes");
        }
        Ok(())
    }
}
