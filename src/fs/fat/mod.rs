//! ## FAT walker
//!
//! Interprets a FAT12/FAT16 volume: geometry from the boot sector, all
//! FAT copies read and cross-compared, recursive reachability walk from
//! the root directory with VFAT long-name reassembly, the OS/2
//! `EA DATA. SF` extended-attribute file, and a final sweep for lost
//! clusters.  Every structural anomaly is a counted warning; the walk
//! continues past anything that leaves it a coherent place to stand.

mod types;
mod ea;

pub use types::{FatUse,short_name_checksum};
use types::*;
use log::debug;
use crate::bios::bpb::BootSector;
use crate::bios::fat as bios_fat;
use crate::fs::accounting::{UsageMap,UsageClass};
use crate::fs::{Volume,ScanCfg,Report,PathArena,PathId,Finder,Error};
use crate::{escaped_string,STDRESULT,DYNERR};

/// Pick the FAT entry width from the cluster count.  The threshold is
/// the historical one used by the file system drivers themselves.
pub fn fat_bits(total_clusters: u32) -> usize {
    match total_clusters.wrapping_sub(2) > 4085 {
        true => 16,
        false => 12
    }
}

struct FatScan<'a> {
    vol: &'a mut Volume,
    cfg: &'a ScanCfg,
    rpt: &'a mut Report,
    arena: PathArena,
    finder: Option<Finder>,
    first_sector: u32,
    total_sectors: u32,
    total_clusters: u32,
    secs_per_clus: u32,
    bytes_per_clus: u32,
    secs_per_fat: u32,
    num_fats: u32,
    root_entries: u32,
    root_sectors: u32,
    data_sector: u32,
    what_sector: Option<u32>,
    what_cluster: Option<u32>,
    fat: Vec<u16>,
    usage: UsageMap<FatUse>,
    case_map: [u8;256],
    ea: ea::EaData
}

/// Apply the selected action to a FAT volume.
pub fn scan(vol: &mut Volume,cfg: &ScanCfg,rpt: &mut Report,boot: &BootSector) -> STDRESULT {
    let mut walker = FatScan::new(vol,cfg,rpt,boot)?;
    walker.run()
}

impl <'a> FatScan<'a> {
    fn new(vol: &'a mut Volume,cfg: &'a ScanCfg,rpt: &'a mut Report,boot: &BootSector) -> Result<Self,DYNERR> {
        if boot.bytes_per_sec() != 512 {
            return Err(Box::new(Error::Fatal(format!("sector size {} is not supported",boot.bytes_per_sec()))));
        }
        if boot.secs_per_clus()==0 {
            return Err(Box::new(Error::Fatal("cluster size is zero".to_string())));
        }
        if boot.num_fats()==0 {
            return Err(Box::new(Error::Fatal("number of FATs is zero".to_string())));
        }
        let first_sector = boot.res_secs() as u32;
        let secs_per_clus = boot.secs_per_clus() as u32;
        let bytes_per_clus = secs_per_clus * 512;
        let secs_per_fat = boot.secs_per_fat() as u32;
        let num_fats = boot.num_fats() as u32;
        let mut total_sectors = boot.tot_secs();
        if total_sectors < first_sector {
            return Err(Box::new(Error::Fatal("number of reserved sectors exceeds total number of sectors".to_string())));
        }
        total_sectors -= first_sector;
        let root_entries = boot.root_entries() as u32;
        let root_sectors = (root_entries + 512/32 - 1) / (512/32);
        if total_sectors < num_fats * secs_per_fat + root_sectors {
            return Err(Box::new(Error::Fatal("disk too small for FATs and root directory".to_string())));
        }
        let total_clusters = 2 + (total_sectors - num_fats * secs_per_fat - root_sectors) / secs_per_clus;
        if total_clusters < 2 {
            return Err(Box::new(Error::Fatal("disk too small, no data clusters".to_string())));
        }
        if total_clusters > 0xffff {
            rpt.warning(0,"too many clusters".to_string());
        }
        let data_sector = first_sector + num_fats * secs_per_fat + root_sectors;
        let mut case_map = [0u8;256];
        for i in 0..256 {
            case_map[i] = (i as u8).to_ascii_uppercase();
        }
        let finder = cfg.find.as_ref().map(|p| Finder::new(p));
        debug!("FAT volume, {} clusters of {} bytes",total_clusters-2,bytes_per_clus);
        Ok(Self {
            vol, cfg, rpt,
            arena: PathArena::new(),
            finder,
            first_sector, total_sectors, total_clusters,
            secs_per_clus, bytes_per_clus, secs_per_fat, num_fats,
            root_entries, root_sectors, data_sector,
            what_sector: cfg.what.filter(|_| !cfg.what_cluster),
            what_cluster: cfg.what.filter(|_| cfg.what_cluster),
            fat: Vec::new(),
            usage: UsageMap::new(total_clusters as usize,true),
            case_map,
            ea: ea::EaData::new()
        })
    }

    fn cluster_to_sector(&self,c: u32) -> u32 {
        (c - 2) * self.secs_per_clus + self.data_sector
    }
    fn sector_to_cluster(&self,s: u32) -> u32 {
        (s - self.data_sector) / self.secs_per_clus + 2
    }
    fn cluster_range(&self,start: u32,count: u32) -> String {
        match count {
            1 => format!("cluster {}",start),
            _ => format!("{} clusters {}-{}",count,start,start+count-1)
        }
    }
    fn path(&self,id: PathId) -> String {
        self.arena.format(id)
    }
    /// Compare two names under the case map; 0 for equal.
    fn compare_fname(&self,p1: &[u8],p2: &[u8]) -> std::cmp::Ordering {
        let m = &self.case_map;
        let a: Vec<u8> = p1.iter().map(|c| m[*c as usize]).collect();
        let b: Vec<u8> = p2.iter().map(|c| m[*c as usize]).collect();
        a.cmp(&b)
    }

    /// Claim a cluster for a file or directory.  Returns false when a
    /// cycle has been detected (the cluster already belongs to the same
    /// path), which must truncate the chain walk.
    fn use_cluster(&mut self,cluster: u32,what: FatUse,path: PathId) -> bool {
        match self.usage.claim(cluster,what,Some(path)) {
            Ok(()) => true,
            Err(old) => {
                self.rpt.warning(1,format!("Cluster {} usage conflict: {} vs. {}",cluster,old.as_str(),what.as_str()));
                if let Some(p0) = self.usage.path(cluster) {
                    self.rpt.cont(format!("File 1: \"{}\"",self.arena.format(p0)));
                }
                self.rpt.cont(format!("File 2: \"{}\"",self.arena.format(path)));
                self.usage.path(cluster) != Some(path)
            }
        }
    }

    /// Read one FAT copy, warning when the stored size disagrees with
    /// the size the cluster count demands.
    fn read_fat(&mut self,secno: u32,fatno: u32) -> Result<Vec<u16>,DYNERR> {
        if let Some(what) = self.what_sector {
            if what >= secno && what < secno + self.secs_per_fat {
                println!("Sector {}: FAT {} (+{})",self.cfg.sec(what),fatno+1,what-secno);
            }
        }
        let clusters = self.total_clusters;
        let bits = fat_bits(clusters);
        let sectors = match bits {
            16 => (clusters * 2 + 511) / 512,
            _ => (clusters * 3 + 1023) / 1024
        };
        if sectors != self.secs_per_fat {
            self.rpt.warning(1,format!("incorrect FAT size: {} vs. {}",sectors,self.secs_per_fat));
        }
        let raw = self.vol.read(secno,sectors,true)?;
        Ok(match bits {
            16 => bios_fat::decode_fat16(&raw,clusters as usize),
            _ => bios_fat::decode_fat12(&raw,clusters as usize)
        })
    }

    /// Read every FAT copy, warn on mismatches, and keep the first copy
    /// as the operational table.
    fn do_fats(&mut self) -> STDRESULT {
        let mut fats: Vec<Vec<u16>> = Vec::new();
        let mut secno = self.first_sector;
        for i in 0..self.num_fats {
            if self.cfg.info {
                println!("FAT {}:                      {}",i+1,self.cfg.sec_range(secno,self.secs_per_fat));
            }
            fats.push(self.read_fat(secno,i)?);
            secno += self.secs_per_fat;
        }
        for i in 0..fats.len() {
            for j in i+1..fats.len() {
                if fats[i] != fats[j] {
                    self.rpt.warning(1,format!("FATs {} and {} differ",i,j));
                    let list: Vec<String> = (0..self.total_clusters as usize)
                        .filter(|k| fats[i][*k] != fats[j][*k])
                        .map(|k| k.to_string())
                        .collect();
                    self.rpt.cont(format!("Differing clusters: {}",list.join(" ")));
                }
            }
        }
        self.fat = fats.swap_remove(0);
        let mut free = 0;
        let mut bad = 0;
        for i in 2..self.total_clusters as usize {
            match self.fat[i] {
                0 => free += 1,
                FAT_BAD => bad += 1,
                _ => {}
            }
        }
        if self.cfg.info {
            println!("Number of free clusters:    {}",free);
            println!("Number of bad clusters:     {}",bad);
        }
        Ok(())
    }

    fn dirent_warning(&mut self,level: usize,secno: u32,path: PathId,name: &[u8],msg: String) {
        self.rpt.warning(level,format!("Directory sector {} (\"{}\"): {}: {}",
            self.cfg.sec(secno),self.path(path),escaped_string(name,false),msg));
    }

    /// End of a directory: a dangling long name is an error, and a find
    /// that reached the end without a match has failed.
    fn do_enddir(&mut self,path: PathId,vfat: &mut Vfat,found: bool) -> STDRESULT {
        if vfat.active {
            self.rpt.warning(1,format!("\"{}\": No real directory entry after VFAT name",self.path(path)));
            vfat.reset();
        }
        if self.finder.is_some() {
            if found {
                return Err(Box::new(Error::Found));
            }
            let comp = self.finder.as_ref().map(|f| f.comp().to_string()).unwrap_or_default();
            return Err(Box::new(Error::NotFound(comp,self.path(path))));
        }
        Ok(())
    }

    /// Walk the cluster chain of a file or directory, classifying every
    /// cluster; for directories, process the entries of each cluster.
    fn do_file(&mut self,start_cluster: u32,dir_flag: bool,path: PathId,parent_cluster: u32,
               file_size: u32,ea_index: u16,list: bool) -> STDRESULT {
        let found = match &self.finder {
            Some(f) => f.at_target(),
            None => false
        };
        let show = self.cfg.locate && found;
        if found && self.cfg.copy && dir_flag {
            return Err(Box::new(Error::Fatal("directories cannot be copied".to_string())));
        }
        let mut count: u32 = 0;
        let mut cluster = start_cluster;
        let mut dirent_index: u32 = 0;
        let mut vfat = Vfat::new();
        let mut extents: u32 = 0;
        let mut ext_start: u32 = 0;
        let mut ext_length: u32 = 0;
        if cluster != 0 {
            while cluster < FAT_EOC as u32 {
                if ext_length==0 {
                    extents += 1; ext_start = cluster; ext_length = 1;
                } else if cluster == ext_start + ext_length {
                    ext_length += 1;
                } else {
                    if show {
                        println!("File data in {}",self.cluster_range(ext_start,ext_length));
                    }
                    extents += 1; ext_start = cluster; ext_length = 1;
                }
                if cluster==0 {
                    self.rpt.warning(1,format!("\"{}\": References unused cluster",self.path(path)));
                    break;
                } else if cluster==FAT_BAD as u32 {
                    self.rpt.warning(1,format!("\"{}\": References bad cluster",self.path(path)));
                    break;
                } else if cluster < 2 || cluster >= self.total_clusters {
                    self.rpt.warning(1,format!("\"{}\": {}: Invalid cluster number",self.path(path),cluster));
                    break;
                } else {
                    let what = match dir_flag { true => FatUse::Dir, false => FatUse::File };
                    if !self.use_cluster(cluster,what,path) {
                        self.rpt.warning(1,format!("\"{}\": Cycle after {} clusters",self.path(path),count));
                        break;
                    }
                    if let Some(wc) = self.what_cluster {
                        if wc==cluster {
                            println!("Cluster {}: Relative cluster {} of \"{}\"",wc,count,self.path(path));
                        }
                    }
                    if let Some(ws) = self.what_sector {
                        let sec1 = self.cluster_to_sector(cluster);
                        if ws >= sec1 && ws < sec1 + self.secs_per_clus {
                            println!("Sector {}: Relative sector {} of \"{}\"",self.cfg.sec(ws),
                                count * self.secs_per_clus + ws - sec1,self.path(path));
                        }
                    }
                    if dir_flag && (!found || !list) {
                        self.do_dir(self.cluster_to_sector(cluster),self.bytes_per_clus/32,path,&mut vfat,
                            parent_cluster,start_cluster,Some(cluster),dirent_index,
                            found && self.cfg.dir)?;
                        dirent_index += self.bytes_per_clus/32;
                    }
                    if self.cfg.copy && found && (count as u64) * (self.bytes_per_clus as u64) < file_size as u64 {
                        let buf = self.vol.read(self.cluster_to_sector(cluster),self.secs_per_clus,false)?;
                        let n = (file_size - count * self.bytes_per_clus).min(self.bytes_per_clus) as usize;
                        match self.vol.capture() {
                            Some(cap) => cap.raw_write(&buf[0..n])?,
                            None => return Err(Box::new(Error::Fatal("no target for copy".to_string())))
                        };
                    }
                    cluster = self.fat[cluster as usize] as u32;
                    count += 1;
                }
            }
        }
        if dir_flag && !found {
            self.do_enddir(path,&mut vfat,false)?;
        }
        if show {
            if ext_length != 0 {
                println!("File data in {}",self.cluster_range(ext_start,ext_length));
            }
            println!("Number of clusters: {}",count);
            println!("Number of extents:  {}",extents);
        }
        if ea_index != 0 {
            self.do_ea(path,ea_index as u32,show)?;
        }
        if self.cfg.check && !dir_flag {
            if (count as u64) * (self.bytes_per_clus as u64) < file_size as u64 {
                self.rpt.warning(1,format!("\"{}\": Not enough clusters allocated",self.path(path)));
            }
            if count as u64 > (file_size as u64 + self.bytes_per_clus as u64 - 1) / self.bytes_per_clus as u64 {
                self.rpt.warning(1,format!("\"{}\": Too many clusters allocated",self.path(path)));
            }
        }
        if found {
            if self.cfg.copy {
                if let Some(cap) = self.vol.take_capture() {
                    cap.close()?;
                }
            }
            if !self.cfg.dir {
                return Err(Box::new(Error::Found));
            }
        }
        Ok(())
    }

    fn show_dir_line(&self,e: &DirEntry,name: &[u8]) {
        let mut line = format!("{} {} ",format_date(e.date),format_time(e.time));
        if e.attr & ATTR_DIR != 0 {
            line += "     <DIR>      ";
        } else {
            line += &format!("{:10} {}{}{}{}{}",e.size,
                match e.attr & ATTR_READONLY { 0 => '-', _ => 'R' },
                match e.attr & ATTR_HIDDEN { 0 => '-', _ => 'H' },
                match e.attr & ATTR_SYSTEM { 0 => '-', _ => 'S' },
                match e.attr & ATTR_LABEL { 0 => '-', _ => 'V' },
                match e.attr & ATTR_ARCHIVED { 0 => '-', _ => 'A' });
        }
        println!("{} {}",line,escaped_string(name,false));
    }

    fn show_entry(&self,e: &DirEntry,name: &[u8],dirent_index: u32,path: PathId,vfat: &Vfat) {
        println!("Directory entry {} of \"{}\":",dirent_index,self.path(path));
        println!("  Name:             {}",escaped_string(name,false));
        let mut attrs = format!("  Attributes:       0x{:02x}",e.attr);
        if e.attr & ATTR_DIR != 0 { attrs += " dir"; }
        if e.attr & ATTR_READONLY != 0 { attrs += " r/o"; }
        if e.attr & ATTR_HIDDEN != 0 { attrs += " hidden"; }
        if e.attr & ATTR_SYSTEM != 0 { attrs += " system"; }
        if e.attr & ATTR_LABEL != 0 { attrs += " label"; }
        if e.attr & ATTR_ARCHIVED != 0 { attrs += " arch"; }
        println!("{}",attrs);
        println!("  Cluster:          {}",e.cluster);
        println!("  Time:             0x{:04x} ({})",e.time,format_time(e.time));
        println!("  Date:             0x{:04x} ({})",e.date,format_date(e.date));
        println!("  Size:             {}",e.size);
        println!("  EA pointer:       {}",e.ea);
        if vfat.active {
            match vfat.unprintable {
                true => println!("  VFAT name:        (not printable)"),
                false => println!("  VFAT name:        \"{}\"",vfat.name())
            }
        }
    }

    /// Process one directory entry.
    fn do_dirent(&mut self,secno: u32,e: &DirEntry,raw: &[u8],path: PathId,vfat: &mut Vfat,
                 parent_cluster: u32,start_cluster: u32,dirent_index: u32,
                 label_flag: &mut bool,mut show: bool,list: bool) -> STDRESULT {
        if e.is_free() {
            if vfat.active {
                self.rpt.warning(1,format!("\"{}\": Unused directory entry after VFAT name (sector {})",
                    self.path(path),self.cfg.sec(secno)));
                vfat.reset();
            }
            return Ok(());
        }
        if e.is_vfat() {
            let v = VfatEntry::from_bytes(raw);
            if show {
                println!("Directory entry {} of \"{}\":",dirent_index,self.path(path));
                println!("  VFAT name frag:   \"{}\"",vfat_frag_string(&v));
            }
            for prob in vfat.fragment(&v) {
                let msg = match prob {
                    VfatProblem::InvalidName => "Invalid VFAT name",
                    VfatProblem::NoRealEntry => "No real directory entry after VFAT name",
                    VfatProblem::NotTerminated => "VFAT name not null-terminated",
                    VfatProblem::WrongIndex => "Incorrect VFAT name index",
                    VfatProblem::BadChecksum => "Incorrect VFAT checksum",
                    VfatProblem::TooLong => "VFAT name too long",
                    VfatProblem::Incomplete => "Incomplete VFAT name"
                };
                self.rpt.warning(1,format!("\"{}\": {} (sector {})",self.path(path),msg,self.cfg.sec(secno)));
            }
            return Ok(());
        }

        let cluster = e.cluster as u32;
        let name = e.name_bytes();
        let mut found = false;

        if vfat.active {
            for prob in vfat.finish(&e.name) {
                match prob {
                    VfatProblem::Incomplete => self.rpt.warning(1,format!("\"{}\": Incomplete VFAT name for {} (sector {})",
                        self.path(path),escaped_string(&name,false),self.cfg.sec(secno))),
                    _ => self.rpt.warning(1,format!("\"{}\": Checksum mismatch for {} (sector {})",
                        self.path(path),escaped_string(&name,false),self.cfg.sec(secno)))
                }
            }
            vfat.active = true;     // keep the name available for display
        }

        if self.finder.is_some() && !show && !list {
            let comp = self.finder.as_ref().map(|f| f.comp().as_bytes().to_vec()).unwrap_or_default();
            if self.compare_fname(&name,&comp) != std::cmp::Ordering::Equal {
                vfat.reset();
                return Ok(());
            }
            if self.finder.as_ref().map(|f| f.at_target()).unwrap_or(false) {
                found = true;
                if self.cfg.locate {
                    println!("Directory entry in sector {}",self.cfg.sec(secno));
                    show = true;
                }
                if self.cfg.dir {
                    show = true;
                }
            }
        }

        if list || (self.cfg.dir && show && e.attr & ATTR_DIR==0) {
            self.show_dir_line(e,&name);
        }
        if show && !self.cfg.dir {
            self.show_entry(e,&name,dirent_index,path,vfat);
        }

        if self.cfg.check {
            if !valid_date(e.date) {
                self.dirent_warning(0,secno,path,&name,format!("Invalid date (0x{:04x})",e.date));
            }
            if !valid_time(e.time) {
                self.dirent_warning(0,secno,path,&name,format!("Invalid time (0x{:04x})",e.time));
            }
            if e.attr & !0x3f != 0 {
                self.dirent_warning(0,secno,path,&name,"Undefined attribute bit is set".to_string());
            }
            if e.name[0] != b'.' {
                let bad = e.name.iter().any(|c| *c != 0x05
                    && (*c < 0x20 || b"\"*+,./;:<=>?[\\]|".contains(c)));
                if bad {
                    self.dirent_warning(1,secno,path,&name,"Invalid character in file name".to_string());
                }
            }
        }

        if e.name[0]==b'.' {
            let dots = match e.name[1]==b'.' { true => 2, false => 1 };
            if vfat.active {
                self.dirent_warning(1,secno,path,&name,"Must not have a VFAT name".to_string());
                vfat.reset();
            }
            if !self.cfg.check {
                vfat.reset();
                return Ok(());
            }
            if e.name[dots..] != b"           "[dots..] {
                self.dirent_warning(1,secno,path,&name,"File name starting with \".\"".to_string());
            } else if e.attr & ATTR_DIR==0 {
                self.dirent_warning(1,secno,path,&name,"Not a directory".to_string());
            } else {
                let expected = match dots { 1 => start_cluster, _ => parent_cluster };
                if cluster != expected {
                    self.dirent_warning(1,secno,path,&name,format!("Incorrect cluster ({} vs. {})",cluster,expected));
                }
            }
            vfat.reset();
            return Ok(());
        }

        if self.cfg.verbose {
            eprintln!("{}",self.arena.format_with(path,Some(&String::from_utf8_lossy(&name))));
        }

        if self.cfg.check && e.attr & ATTR_LABEL != 0 {
            if self.arena.parent(path).is_some() {
                self.dirent_warning(1,secno,path,&name,"Unexpected volume label".to_string());
            } else if *label_flag {
                self.dirent_warning(1,secno,path,&name,"More than one volume label".to_string());
            } else {
                *label_flag = true;
            }
        }

        let skip_walk = match (self.what_sector,self.what_cluster) {
            (Some(ws),None) => ws < self.data_sector,
            _ => false
        };
        if e.attr & ATTR_LABEL==0 && !list && !skip_walk {
            let name_str = String::from_utf8_lossy(&name).to_string();
            let link = self.arena.push(path,&name_str);
            self.do_file(cluster,e.attr & ATTR_DIR != 0,link,start_cluster,e.size,e.ea,list)?;
        }
        if found && !list {
            return Err(Box::new(Error::Found));
        }
        vfat.reset();
        Ok(())
    }

    /// Process `entries` directory entries stored in consecutive sectors
    /// starting at `secno`.
    fn do_dir(&mut self,mut secno: u32,mut entries: u32,path: PathId,vfat: &mut Vfat,
              parent_cluster: u32,start_cluster: u32,this_cluster: Option<u32>,
              mut dirent_index: u32,list: bool) -> STDRESULT {
        if self.finder.is_some() && dirent_index==0 {
            self.finder.as_mut().unwrap().next_component()?;
        }
        let mut label_flag = false;
        while entries != 0 {
            let mut show = false;
            if let Some(wc) = self.what_cluster {
                if Some(wc)==this_cluster {
                    println!("Cluster {}: Directory \"{}\"",wc,self.path(path));
                    show = true;
                }
            }
            if let Some(ws) = self.what_sector {
                if ws==secno {
                    println!("Sector {}: Directory \"{}\"",self.cfg.sec(ws),self.path(path));
                    show = true;
                }
            }
            let buf = self.vol.read(secno,1,true)?;
            let n = (512/32).min(entries);
            for i in 0..n as usize {
                let raw = &buf[i*32..(i+1)*32];
                let e = DirEntry::from_bytes(raw);
                if e.is_end() {
                    return Ok(());
                }
                self.do_dirent(secno,&e,raw,path,vfat,parent_cluster,start_cluster,
                    dirent_index,&mut label_flag,show,list)?;
                dirent_index += 1;
            }
            secno += 1;
            entries = entries.saturating_sub(512/32);
        }
        Ok(())
    }

    /// Walk the root directory (and everything below it).
    fn do_root_dir(&mut self) -> STDRESULT {
        let secno = self.first_sector + self.num_fats * self.secs_per_fat;
        let mut list = false;
        if let Some(f) = &self.finder {
            if f.at_target() {
                if self.cfg.locate {
                    println!("Root directory in {}",self.cfg.sec_range(secno,self.root_sectors));
                }
                if self.cfg.dir {
                    list = true;
                } else {
                    return Err(Box::new(Error::Found));
                }
            }
        }
        if self.cfg.info {
            println!("Root directory:             {}",self.cfg.sec_range(secno,self.root_sectors));
        }
        if let Some(ws) = self.what_sector {
            if ws >= secno && ws < secno + self.root_sectors {
                println!("Sector {}: Root directory (+{})",self.cfg.sec(ws),ws-secno);
            }
        }
        self.find_ea_data(secno)?;
        self.read_ea_data()?;
        if self.cfg.save || self.cfg.check || self.cfg.what.is_some() || self.finder.is_some() {
            let root = self.arena.root();
            let mut vfat = Vfat::new();
            self.do_dir(secno,self.root_entries,root,&mut vfat,0,0,None,0,list)?;
            self.do_enddir(root,&mut vfat,list)?;
        }
        Ok(())
    }

    fn allocated(&self,i: usize) -> bool {
        self.fat[i] != 0 && self.fat[i] != FAT_BAD
    }

    /// Sweep the FAT for clusters marked allocated but never reached.
    fn check_alloc(&mut self) {
        let mut i = 2;
        let mut count = 0;
        while (i as u32) < self.total_clusters {
            if self.usage.get(i as u32)==FatUse::Empty && self.allocated(i) {
                let start = i;
                while (i as u32) < self.total_clusters
                    && self.usage.get(i as u32)==FatUse::Empty && self.allocated(i) {
                    i += 1;
                }
                if self.cfg.check_unused {
                    self.rpt.warning(0,format!("Unused but marked as allocated: {}",
                        self.cluster_range(start as u32,(i-start) as u32)));
                }
                count += i - start;
            } else {
                i += 1;
            }
        }
        if count==1 {
            self.rpt.warning(0,"The file system has 1 lost cluster".to_string());
        } else if count > 1 {
            self.rpt.warning(0,format!("The file system has {} lost clusters",count));
        }
    }

    fn run(&mut self) -> STDRESULT {
        if self.cfg.info {
            println!("Number of clusters:         {}",self.total_clusters - 2);
            println!("First data sector:          {}",self.cfg.sec(self.data_sector));
        }
        if let Some(wc) = self.what_cluster {
            if wc < 2 || wc >= self.total_clusters {
                return Err(Box::new(Error::Fatal("invalid cluster number".to_string())));
            }
            self.what_sector = Some(self.cluster_to_sector(wc));
        }
        if self.what_sector==Some(0) && self.what_cluster.is_none() {
            println!("Sector {}: Boot sector",self.cfg.sec(0));
        }
        self.do_fats()?;
        if let Some(wc) = self.what_cluster {
            println!("Cluster {}: {}",wc,self.cfg.sec_range(self.cluster_to_sector(wc),self.secs_per_clus));
            match self.fat[wc as usize] {
                FAT_BAD => println!("Cluster {}: Cluster contains bad sector",wc),
                n if n >= FAT_EOC => println!("Cluster {}: Last cluster of a file or directory",wc),
                0 => println!("Cluster {}: Unused",wc),
                _ => println!("Cluster {}: Used",wc)
            }
        } else if let Some(ws) = self.what_sector {
            if ws >= self.data_sector && ws < self.total_sectors {
                let i = self.sector_to_cluster(ws);
                if i >= 2 && i < self.total_clusters {
                    println!("Sector {}: Cluster {}",self.cfg.sec(ws),i);
                    match self.fat[i as usize] {
                        FAT_BAD => println!("Sector {}: Cluster contains bad sector",self.cfg.sec(ws)),
                        n if n >= FAT_EOC => println!("Sector {}: In last cluster of a file or directory",self.cfg.sec(ws)),
                        0 => println!("Sector {}: In an unused cluster",self.cfg.sec(ws)),
                        _ => println!("Sector {}: In a used cluster",self.cfg.sec(ws))
                    }
                }
            }
        }
        self.do_root_dir()?;
        if self.cfg.check {
            self.check_alloc();
        }
        Ok(())
    }
}

/// printable form of one fragment's code units, for the what display
fn vfat_frag_string(v: &VfatEntry) -> String {
    let mut ans = String::new();
    let units = v.units();
    let mut n = 13;
    while n > 0 && units[n-1]==0xffff {
        n -= 1;
    }
    for u in &units[0..n] {
        if *u >= 0x20 && *u <= 0xff {
            ans.push(char::from_u32(*u as u32).unwrap_or('?'));
        } else {
            ans += &format!("<0x{:x}>",u);
        }
    }
    ans
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bitness_threshold() {
        assert_eq!(fat_bits(2 + 4085),12);
        assert_eq!(fat_bits(2 + 4086),16);
        assert_eq!(fat_bits(2),12);
    }
}
