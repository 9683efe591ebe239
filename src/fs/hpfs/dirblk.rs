//! ## DIRBLK B-tree walk
//!
//! A directory's FNODE points at the root DIRBLK of a B-tree.  Each
//! DIRBLK is a 2048-byte block holding a sorted run of variable-length
//! DIRENTs, the last of which is an end sentinel; an entry may carry a
//! down pointer to a child DIRBLK in its last four bytes.  The walk is
//! in-order, so file names must come out strictly ascending under the
//! per-entry code page's case folding; the `..` sentinel sorts below
//! everything and the end sentinel above everything.

use std::io::Cursor;
use binrw::BinRead;
use super::HpfsScan;
use super::types::*;
use crate::fs::{PathId,Error,ATTR_READONLY,ATTR_HIDDEN,ATTR_SYSTEM,ATTR_LABEL,ATTR_DIR,ATTR_ARCHIVED};
use crate::{escaped_string,STDRESULT};

pub(super) const MAX_DIRBLK_LEVELS: usize = 32;

/// Per-directory state threaded through the B-tree recursion: the name
/// ordering window, the per-level down-pointer-presence record, the
/// running entry index, and whether `..` has been seen.
pub(super) struct DirCtx {
    pub sort_name: Vec<u8>,
    pub sort_cp: u32,
    pub down: [i8;MAX_DIRBLK_LEVELS],
    pub index: i32,
    pub dotdot: bool
}

impl DirCtx {
    pub fn new(code_page_count: u32) -> Self {
        Self {
            sort_name: Vec::new(),
            sort_cp: code_page_count,
            down: [-1;MAX_DIRBLK_LEVELS],
            index: 0,
            dotdot: false
        }
    }
}

impl <'a> HpfsScan<'a> {
    pub(super) fn dirblk_warning(&mut self,level: usize,secno: u32,path: PathId,msg: String) {
        self.rpt.warning(level,format!("DIRBLK {} (\"{}\"): {}",self.cfg.sec(secno),self.path(path),msg));
    }

    pub(super) fn dirent_warning(&mut self,level: usize,secno: u32,path: PathId,index: i32,
                                 name: Option<&[u8]>,msg: String) {
        let tag = match name {
            Some(n) => format!("DIRENT {} ({}): ",index,escaped_string(n,false)),
            None => format!("DIRENT {}: ",index)
        };
        self.rpt.warning(level,format!("DIRBLK {} (\"{}\"): {}{}",self.cfg.sec(secno),self.path(path),tag,msg));
    }

    /// Compare two names under their code pages' case maps.
    pub(super) fn compare_cp(&self,p1: &[u8],cp1: u32,p2: &[u8],cp2: u32) -> std::cmp::Ordering {
        let map1 = match cp1 < self.code_pages.len() as u32 {
            true => &self.code_pages[cp1 as usize].case_map,
            false => &self.case_map
        };
        let map2 = match cp2 < self.code_pages.len() as u32 {
            true => &self.code_pages[cp2 as usize].case_map,
            false => &self.case_map
        };
        let a: Vec<u8> = p1.iter().map(|c| map1[*c as usize]).collect();
        let b: Vec<u8> = p2.iter().map(|c| map2[*c as usize]).collect();
        a.cmp(&b)
    }

    /// Basic sanity checks for the DIRENT at `pos`.  Returns None when
    /// the entry is too damaged to walk past.
    pub(super) fn check_dirent(&mut self,block: &[u8],pos: usize,warn: bool,secno: u32,
                               path: PathId,index: i32) -> Option<Dirent> {
        if pos + DIRENT_SIZE as usize > DIRBLK_BYTES {
            if warn {
                self.dirent_warning(1,secno,path,index,None,"Extends beyond end of DIRBLK".to_string());
            }
            return None;
        }
        let len = u16::from_le_bytes([block[pos],block[pos+1]]) as u32;
        if pos + len as usize > DIRBLK_BYTES {
            if warn {
                self.dirent_warning(1,secno,path,index,None,"Extends beyond end of DIRBLK".to_string());
            }
            return None;
        }
        if len < DIRENT_SIZE {
            if warn {
                self.dirent_warning(1,secno,path,index,None,"Length too small (case 1)".to_string());
            }
            return None;
        }
        let flags = block[pos+2];
        let name_len = block[pos+30];
        let needed = (DIRENT_SIZE - 1 + name_len as u32 + 3) & !3;
        let needed = needed + match flags & DF_BTP { 0 => 0, _ => 4 };
        if len < needed {
            if warn {
                self.dirent_warning(1,secno,path,index,None,"Length too small (case 2)".to_string());
            }
            return None;
        }
        if len & 3 != 0 {
            if warn {
                self.dirent_warning(1,secno,path,index,None,"Length is not a multiple of 4".to_string());
            }
            return None;
        }
        let raw_name = block[pos+31..pos+31+name_len as usize].to_vec();
        let name: Vec<u8>;
        if flags & DF_END != 0 {
            name = b"[END]".to_vec();
            if self.cfg.check && (name_len != 1 || raw_name != vec![0xff]) {
                self.dirent_warning(0,secno,path,index,None,"Wrong name for end entry".to_string());
            }
        } else if flags & DF_SPEC != 0 {
            name = b"..".to_vec();
            if self.cfg.check && (name_len != 2 || raw_name != vec![1,1]) {
                self.dirent_warning(0,secno,path,index,None,"Wrong name for \"..\" entry".to_string());
            }
        } else {
            name = raw_name;
        }
        let down = match flags & DF_BTP {
            0 => None,
            _ => Some(u32::from_le_bytes([
                block[pos+len as usize-4],block[pos+len as usize-3],
                block[pos+len as usize-2],block[pos+len as usize-1]]))
        };
        Some(Dirent {
            len,
            flags,
            attr: block[pos+3],
            fnode: u32::from_le_bytes([block[pos+4],block[pos+5],block[pos+6],block[pos+7]]),
            tim_mod: u32::from_le_bytes([block[pos+8],block[pos+9],block[pos+10],block[pos+11]]),
            fsize: u32::from_le_bytes([block[pos+12],block[pos+13],block[pos+14],block[pos+15]]),
            tim_access: u32::from_le_bytes([block[pos+16],block[pos+17],block[pos+18],block[pos+19]]),
            tim_create: u32::from_le_bytes([block[pos+20],block[pos+21],block[pos+22],block[pos+23]]),
            ea_len: u32::from_le_bytes([block[pos+24],block[pos+25],block[pos+26],block[pos+27]]),
            flex: block[pos+28],
            code_page: block[pos+29],
            name_len,
            name,
            down
        })
    }

    /// Everything the `info <sector>` action wants to know about one
    /// directory entry.
    fn show_dirent(&self,block: &[u8],pos: usize,p: &Dirent,indent: usize) {
        let pad = " ".repeat(indent);
        println!("{}Length:                      {}",pad,p.len);
        let mut flags = format!("{}Flags:                       0x{:02x}",pad,p.flags);
        if p.flags & DF_SPEC != 0 { flags += " .."; }
        if p.flags & DF_END != 0 { flags += " end"; }
        if p.flags & DF_ATTR != 0 { flags += " EA"; }
        if p.flags & DF_NEEDEAS != 0 { flags += " need-EA"; }
        if p.flags & DF_PERM != 0 { flags += " perms"; }
        if p.flags & DF_ACL != 0 { flags += " ACL"; }
        if p.flags & DF_XACL != 0 { flags += " explicit-ACL"; }
        println!("{}",flags);
        if !p.is_end() {
            let mut attrs = format!("{}Attributes:                  0x{:02x}",pad,p.attr);
            if p.attr & ATTR_DIR != 0 { attrs += " dir"; }
            if p.attr & ATTR_READONLY != 0 { attrs += " r/o"; }
            if p.attr & ATTR_HIDDEN != 0 { attrs += " hidden"; }
            if p.attr & ATTR_SYSTEM != 0 { attrs += " system"; }
            if p.attr & ATTR_LABEL != 0 { attrs += " label"; }
            if p.attr & ATTR_ARCHIVED != 0 { attrs += " arch"; }
            if p.attr & ATTR_NONFAT != 0 { attrs += " non-FAT"; }
            println!("{}",attrs);
            println!("{}FNODE:                       {}",pad,self.cfg.sec(p.fnode));
            println!("{}Time of creation:            {}",pad,format_time(p.tim_create));
            println!("{}Time of last modification:   {}",pad,format_time(p.tim_mod));
            println!("{}Time of last access:         {}",pad,format_time(p.tim_access));
            println!("{}Size of file:                {}",pad,p.fsize);
            println!("{}Size of extended attributes: {}",pad,p.ea_len);
            println!("{}Number of ACEs:              {}",pad,p.flex & 7);
            let cpindex = (p.code_page & 0x7f) as u32;
            match cpindex < self.code_pages.len() as u32 {
                true => println!("{}Code page:                   {}",pad,self.code_pages[cpindex as usize].codepage),
                false => println!("{}Code page index:             {}",pad,cpindex)
            }
            if p.code_page & 0x80 != 0 {
                println!("{}Name contains DBCS characters",pad);
            }
            if p.flags & DF_ACL != 0 {
                let mut gap = p.len - (DIRENT_SIZE - 1 + p.name_len as u32);
                if p.flags & DF_BTP != 0 {
                    gap -= 4;
                }
                let gap_start = pos + 31 + p.name_len as usize;
                let dump: Vec<String> = (0..gap as usize)
                    .map(|i| format!("{:02x}",block[gap_start+i]))
                    .collect();
                if gap > 0 {
                    println!("{}ACE data:                    {}",pad,dump.join(" "));
                }
            }
        }
        if let Some(down) = p.down {
            println!("{}Down pointer:                {}",pad,self.cfg.sec(down));
        }
    }

    /// A `dir`-style listing line.
    pub(super) fn show_dir_line(&self,p: &Dirent,name: &[u8]) {
        let mut line = format!("{} ",format_dir_time(p.tim_mod));
        if p.attr & ATTR_DIR != 0 {
            line += "     <DIR>      ";
        } else {
            line += &format!("{:10} {}{}{}{}{}",p.fsize,
                match p.attr & ATTR_READONLY { 0 => '-', _ => 'R' },
                match p.attr & ATTR_HIDDEN { 0 => '-', _ => 'H' },
                match p.attr & ATTR_SYSTEM { 0 => '-', _ => 'S' },
                match p.attr & ATTR_LABEL { 0 => '-', _ => 'V' },
                match p.attr & ATTR_ARCHIVED { 0 => '-', _ => 'A' });
        }
        println!("{} {}",line,escaped_string(name,false));
    }

    /// Show the DIRENTs overlapping the requested sector.
    fn do_dirblk_what(&mut self,block: &[u8],secno: u32,path: PathId,hdr: &DirblkHeader) {
        let ws = match self.what_sector {
            Some(ws) => ws,
            None => return
        };
        if ws==secno {
            println!("  Change count(?):           {}",hdr.change >> 1);
            println!("  Offset to first free byte: 0x{:x}",hdr.first_free);
            println!("  Pointer to parent:         {}",self.cfg.sec(hdr.parent));
            println!("  Pointer to this directory: {}",self.cfg.sec(hdr.this_dir));
        }
        let mut pos = DIRBLK_FIRST;
        let mut index = 0;
        loop {
            let p = match self.check_dirent(block,pos,false,secno,path,index) {
                Some(p) => p,
                None => break
            };
            if secno + (pos as u32)/512 <= ws && secno + (pos as u32 + p.len - 1)/512 >= ws {
                let partial = match secno + (pos as u32)/512 != ws || secno + (pos as u32 + p.len - 1)/512 != ws {
                    true => "Partial ",
                    false => ""
                };
                println!("  {}DIRENT {} (offset 0x{:x}):",partial,index,pos);
                println!("    Name: {}",escaped_string(&p.name,false));
                self.show_dirent(block,pos,&p,4);
            }
            pos += p.len as usize;
            if p.is_end() {
                break;
            }
            index += 1;
        }
    }

    /// Search one DIRBLK for the current path component; recurse down
    /// the B-tree or into the matched FNODE.
    fn do_dirblk_find(&mut self,block: &[u8],secno: u32,path: PathId,parent_fnode: u32) -> STDRESULT {
        let mut pos = DIRBLK_FIRST;
        let mut index = 0;
        loop {
            let p = match self.check_dirent(block,pos,true,secno,path,index) {
                Some(p) => p,
                None => break
            };
            let comp = self.finder.as_ref().map(|f| f.comp().as_bytes().to_vec()).unwrap_or_default();
            let cmp = match (p.is_end(),p.is_dotdot()) {
                (true,_) => std::cmp::Ordering::Greater,
                (_,true) => std::cmp::Ordering::Less,
                _ => {
                    let cpindex = (p.code_page & 0x7f) as u32;
                    self.compare_cp(&p.name,cpindex,&comp,self.code_pages.len() as u32)
                }
            };
            match cmp {
                std::cmp::Ordering::Less => {
                    // keep scanning this block
                    pos += p.len as usize;
                    index += 1;
                },
                std::cmp::Ordering::Equal => {
                    let at_target = self.finder.as_ref().map(|f| f.at_target()).unwrap_or(false);
                    if at_target {
                        if self.cfg.locate {
                            println!("Directory entry {} of DIRBLK {}+{} ({})",index,
                                self.cfg.sec(secno),(pos as u32)/512,self.cfg.sec(secno + (pos as u32)/512));
                            self.show_dirent(block,pos,&p,2);
                        }
                        let mut list = false;
                        if self.cfg.dir {
                            if p.attr & ATTR_DIR != 0 {
                                list = true;
                            } else {
                                self.show_dir_line(&p,&p.name);
                                return Err(Box::new(Error::Found));
                            }
                        }
                        if !p.is_dotdot() {
                            let name = String::from_utf8_lossy(&p.name).to_string();
                            let link = self.arena.push(path,&name);
                            self.do_fnode(p.fnode,link,p.attr & ATTR_DIR != 0,
                                parent_fnode,p.fsize,p.ea_len,true,p.flags & DF_NEEDEAS != 0,list)?;
                        }
                        return Err(Box::new(Error::Found));
                    }
                    // deeper components remain, so this must be a directory
                    if p.attr & ATTR_DIR==0 {
                        return Err(Box::new(Error::Fatal(format!("\"{}\" is not a directory",
                            self.arena.format_with(path,Some(&String::from_utf8_lossy(&p.name)))))));
                    }
                    let name = String::from_utf8_lossy(&p.name).to_string();
                    let link = self.arena.push(path,&name);
                    return self.do_fnode(p.fnode,link,true,parent_fnode,0,p.ea_len,true,
                        p.flags & DF_NEEDEAS != 0,false);
                },
                std::cmp::Ordering::Greater => {
                    match p.down {
                        Some(down) => return self.do_dirblk(down,path,parent_fnode,secno,None,0,false),
                        None => break
                    }
                }
            }
        }
        let comp = self.finder.as_ref().map(|f| f.comp().to_string()).unwrap_or_default();
        Err(Box::new(Error::NotFound(comp,self.path(path))))
    }

    /// Record what kind of entry (leaf or node) lives at `level`; mixed
    /// kinds at one level break the B-tree shape.
    fn check_dirent_down(&mut self,ctx: &mut DirCtx,level: usize,secno: u32,path: PathId,
                         index: i32,flag: i8) {
        if level < MAX_DIRBLK_LEVELS {
            if ctx.down[level]==-1 {
                ctx.down[level] = flag;
            } else if ctx.down[level] != flag {
                let which = match flag { 0 => "Undesired", _ => "Missing" };
                self.dirent_warning(1,secno,path,index,None,format!("{} down pointer",which));
            }
        }
    }

    /// In-order traversal of one DIRBLK for check/save/what walks.
    fn do_dirblk_recurse(&mut self,block: &[u8],secno: u32,path: PathId,parent_fnode: u32,
                         ctx: &mut DirCtx,level: usize,list: bool) -> STDRESULT {
        let mut pos = DIRBLK_FIRST;
        let mut index = 0;
        loop {
            let p = match self.check_dirent(block,pos,true,secno,path,index) {
                Some(p) => p,
                None => break
            };
            if let Some(down) = p.down {
                self.do_dirblk(down,path,parent_fnode,secno,Some(&mut *ctx),level+1,list)?;
                self.check_dirent_down(ctx,level,secno,path,index,1);
            } else {
                self.check_dirent_down(ctx,level,secno,path,index,0);
            }
            if !p.is_end() {
                let pname: Vec<u8> = match p.is_dotdot() {
                    true => {
                        if ctx.dotdot {
                            self.dirent_warning(1,secno,path,index,Some(&p.name),"More than one \"..\" entry".to_string());
                        } else if ctx.index != 0 {
                            self.dirent_warning(1,secno,path,index,Some(&p.name),"\"..\" entry is not the first entry".to_string());
                        }
                        ctx.dotdot = true;
                        Vec::new()
                    },
                    false => p.name.clone()
                };
                if self.cfg.verbose {
                    eprintln!("{}",self.arena.format_with(path,Some(&String::from_utf8_lossy(&p.name))));
                }
                if self.cfg.check && p.name.len() + self.arena.chain_len(path) > 255 {
                    self.dirent_warning(1,secno,path,index,Some(&p.name),"Path name too long".to_string());
                }
                let cpindex = (p.code_page & 0x7f) as u32;
                if cpindex >= self.code_pages.len() as u32 {
                    self.dirent_warning(1,secno,path,index,Some(&p.name),"Code page index too big".to_string());
                } else if self.cfg.pedantic {
                    let changed = pname.iter().any(|c| self.code_pages[cpindex as usize].case_map_changed[*c as usize]);
                    if changed {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),"Case mapping changed".to_string());
                    }
                }
                let sort_name = ctx.sort_name.clone();
                let sort_cp = ctx.sort_cp;
                if self.compare_cp(&sort_name,sort_cp,&pname,cpindex)==std::cmp::Ordering::Greater {
                    self.dirent_warning(1,secno,path,index,None,
                        format!("File names are not in ascending order ({} vs {})",
                            escaped_string(&sort_name,false),escaped_string(&pname,false)));
                }
                ctx.sort_name = pname.clone();
                ctx.sort_cp = cpindex;
                if self.cfg.check {
                    for (t,label) in [(p.tim_mod,"Modification"),(p.tim_access,"Access"),(p.tim_create,"Creation")] {
                        if t != 0 && t < MIN_TIME {
                            self.dirent_warning(1,secno,path,index,Some(&p.name),
                                format!("{} time is out of range ({})",label,t));
                        }
                    }
                    if !p.is_dotdot() {
                        if !is_hpfs_name(&p.name) {
                            self.dirent_warning(1,secno,path,index,Some(&p.name),"Invalid character in file name".to_string());
                        } else if is_fat_name(&p.name)==(p.attr & ATTR_NONFAT != 0) {
                            self.dirent_warning(1,secno,path,index,Some(&p.name),"Incorrect FAT compatibility bit".to_string());
                        }
                    }
                    if p.attr & (0x80 | ATTR_LABEL) != 0 {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),"Undefined attribute bit is set".to_string());
                    }
                    // The ACL heuristics below are based on a few
                    // samples; the exact meaning is unknown.
                    if p.flags & DF_PERM != 0 {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),"DF_PERM bit is set, meaning unknown".to_string());
                    }
                    if p.flags & (DF_ACL | DF_XACL)==DF_XACL {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),"DF_XACL is set without DF_ACL".to_string());
                    }
                    let mut gap = p.len - (DIRENT_SIZE - 1 + p.name_len as u32);
                    if p.flags & DF_BTP != 0 {
                        gap -= 4;
                    }
                    if gap > 3 && p.flags & DF_ACL==0 {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),
                            format!("DF_ACL should be set (up to {} bytes of ACEs)",gap));
                    }
                    if p.flex & 7 != 0 && p.flags & DF_ACL==0 {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),
                            format!("DF_ACL should be set (ACE count: {})",p.flex & 7));
                    }
                    let ace_size = (p.flex & 7) as u32 * 4;
                    let mut temp_size = (DIRENT_SIZE - 1 + p.name_len as u32 + ace_size + 3) & !3;
                    if p.flags & DF_BTP != 0 {
                        temp_size += 4;
                    }
                    if temp_size != p.len {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),
                            format!("ACE count/size mismatch ({}/{})",p.flex & 7,gap));
                    }
                    if p.flex & !7 != 0 {
                        self.dirent_warning(0,secno,path,index,Some(&p.name),
                            format!("Bits with unknown meaning are set in bFlex (0x{:02x})",p.flex & !7));
                    }
                }
                if list {
                    self.show_dir_line(&p,&p.name);
                } else if !p.is_dotdot() {
                    let name = String::from_utf8_lossy(&p.name).to_string();
                    let link = self.arena.push(path,&name);
                    self.do_fnode(p.fnode,link,p.attr & ATTR_DIR != 0,parent_fnode,
                        p.fsize,p.ea_len,true,p.flags & DF_NEEDEAS != 0,list)?;
                }
            }
            pos += p.len as usize;
            if p.is_end() {
                break;
            }
            ctx.index += 1;
            index += 1;
        }
        let hdr_free = u32::from_le_bytes([block[4],block[5],block[6],block[7]]);
        if pos as u32 != hdr_free {
            self.dirblk_warning(1,secno,path,"Wrong offset to first free byte".to_string());
        }
        Ok(())
    }

    /// Process one DIRBLK: validate the header, then either search it
    /// (find-directed walks) or traverse it in order.
    pub(super) fn do_dirblk(&mut self,secno: u32,path: PathId,parent_fnode: u32,parent: u32,
                            ctx: Option<&mut DirCtx>,level: usize,list: bool) -> STDRESULT {
        if let Some(ws) = self.what_sector {
            if ws >= secno && ws < secno + 4 {
                println!("Sector {}: DIRBLK of \"{}\" (+{})",self.cfg.sec(ws),self.path(path),ws-secno);
            }
        }
        if self.have_seen(secno,4,SEEN_DIRBLK,"DIRBLK") {
            return Ok(());
        }
        self.use_sectors(secno,4,HpfsUse::Dirblk,Some(path));
        if secno & 3 != 0 {
            self.dirblk_warning(1,secno,path,"Sector number is not a multiple of 4".to_string());
        }
        let block = self.vol.read(secno,4,true)?;
        let hdr = DirblkHeader::read_le(&mut Cursor::new(&block))?;
        if hdr.sig != DIRBLK_SIG {
            self.dirblk_warning(1,secno,path,"Bad signature".to_string());
            return Ok(());
        }
        self.dirblk_total += 1;
        if secno < self.dirband_start || secno > self.dirband_end {
            self.dirblk_outside += 1;
        }
        if hdr.this_dir != secno {
            self.dirblk_warning(1,secno,path,"Wrong self pointer".to_string());
        }
        if hdr.parent != parent {
            self.dirblk_warning(1,secno,path,"Wrong parent pointer".to_string());
        }
        if self.cfg.check {
            if (hdr.change & 1==0) != (level != 0) {
                self.dirblk_warning(1,secno,path,"`top-most' bit is incorrect".to_string());
            }
        }
        if self.what_sector.map(|ws| ws >= secno && ws < secno + 4).unwrap_or(false) {
            self.do_dirblk_what(&block,secno,path,&hdr);
        }
        if self.finder.is_some() && !list {
            return self.do_dirblk_find(&block,secno,path,parent_fnode);
        }
        match ctx {
            Some(ctx) => self.do_dirblk_recurse(&block,secno,path,parent_fnode,ctx,level,list),
            None => {
                let mut fresh = DirCtx::new(self.code_pages.len() as u32);
                self.do_dirblk_recurse(&block,secno,path,parent_fnode,&mut fresh,level,list)
            }
        }
    }
}
