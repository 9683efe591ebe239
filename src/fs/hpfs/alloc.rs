//! ## Allocation tree walk
//!
//! A file's sectors are mapped by a two-level structure: an ALBLK inside
//! the FNODE with up to 8 leaves or 12 nodes, and external ALSECs with
//! up to 40 leaves or 60 nodes.  Leaves map contiguous runs; internal
//! entries carry the logical sector their subtree starts at, with a
//! 0xFFFFFFFF sentinel on the last child.  Walked left to right, the
//! leaves must cover the object exactly, and all subtrees of a node must
//! have the same height.

use std::io::Cursor;
use binrw::BinRead;
use super::HpfsScan;
use super::types::*;
use crate::fs::PathId;
use crate::DYNERR;

impl <'a> HpfsScan<'a> {
    fn alsec_warning(&mut self,level: usize,secno: u32,path: PathId,msg: String) {
        self.rpt.warning(level,format!("ALSEC {} (\"{}\"): {}",self.cfg.sec(secno),self.path(path),msg));
    }

    fn alloc_warning(&mut self,level: usize,secno: u32,path: PathId,fnode_flag: bool,msg: String) {
        let kind = match fnode_flag { true => "FNODE", false => "ALSEC" };
        self.rpt.warning(level,format!("{} {} (\"{}\"): {}",kind,self.cfg.sec(secno),self.path(path),msg));
    }

    /// Process one ALBLK (either embedded in an FNODE or inside an
    /// ALSEC).  `payload` holds the packed leaf/node array.  Advances
    /// `exp_file_sec` over the logical sectors covered and returns the
    /// height of the subtree.
    pub(super) fn do_storage(&mut self,secno: u32,alb: &AlBlk,payload: &[u8],leaf_count: u32,
                             path: PathId,exp_file_sec: &mut u32,next_disk_sec: &mut u32,
                             total_secs_obj: u32,parent_fnode: u32,alsec_level: i32,
                             what: HpfsUse,extents: &mut u32,show: bool,copy_size: u32,
                             collect: &mut Option<Vec<u8>>) -> Result<i32,DYNERR> {
        let fnode_flag = leaf_count==8;
        if show {
            let kind = match alb.flag & ABF_NODE { 0 => "Leaf", _ => "Node" };
            println!("  {} count:                  {}",kind,alb.used);
        }
        let what_text = match what {
            HpfsUse::Ea => "EA data",
            HpfsUse::File => "file data",
            HpfsUse::Acl => "ACL",
            _ => "???"
        };
        // ABF_FNP marks the ALBLK whose parent is the FNODE, which is
        // the one reached at level 1 of this recursion.
        if (alb.flag & ABF_FNP != 0) != (alsec_level==1) {
            self.alloc_warning(1,secno,path,fnode_flag,
                format!("ABF_FNP bit is wrong ({})",(alb.flag & ABF_FNP != 0) as u8));
        }
        let mut n = alb.used as u32;
        if alb.flag & ABF_NODE != 0 {
            let node_count = leaf_count + leaf_count/2;
            if alb.free as u32 + alb.used as u32 != node_count {
                self.alloc_warning(1,secno,path,fnode_flag,"Wrong number of ALNODEs".to_string());
                n = n.min(node_count);
            }
            if n * ALNODE_SIZE + ALBLK_SIZE != alb.off_free as u32 {
                self.alloc_warning(1,secno,path,fnode_flag,"Offset to free entry is wrong".to_string());
            }
            let nlen = self.alsec_number.len();
            let mut max_height = 0;
            for i in 0..n as usize {
                self.alsec_number.truncate(nlen);
                self.alsec_number += &format!(".{}",i);
                let node = node_at(payload,i);
                let height = self.do_alsec(node.phys,path,exp_file_sec,next_disk_sec,
                    total_secs_obj,parent_fnode,secno,alsec_level,what,extents,
                    show,copy_size,collect)?;
                let expected = match i + 1==n as usize {
                    true => 0xffffffff,
                    false => *exp_file_sec
                };
                if node.log != expected {
                    self.alloc_warning(1,secno,path,fnode_flag,
                        format!("Wrong file sector in ALNODE ({} vs. {})",node.log,expected));
                }
                if i==0 {
                    max_height = height;
                } else if height != max_height {
                    self.alloc_warning(1,secno,path,fnode_flag,"Unbalanced allocation tree".to_string());
                    max_height = max_height.max(height);
                }
            }
            self.alsec_number.truncate(nlen);
            return Ok(max_height);
        }
        if alb.free as u32 + alb.used as u32 != leaf_count {
            self.alloc_warning(1,secno,path,fnode_flag,"Wrong number of ALLEAFs".to_string());
            n = n.min(leaf_count);
        }
        if n * ALLEAF_SIZE + ALBLK_SIZE != alb.off_free as u32 {
            self.alloc_warning(1,secno,path,fnode_flag,"Offset to free entry is wrong".to_string());
        }
        *extents += n;
        for i in 0..n as usize {
            let leaf = leaf_at(payload,i);
            if leaf.log != *exp_file_sec {
                self.alloc_warning(1,secno,path,fnode_flag,
                    format!("Wrong file sector ({} vs. {})",leaf.log,*exp_file_sec));
            }
            if self.cfg.pedantic && *next_disk_sec != 0 && leaf.phys==*next_disk_sec {
                self.alloc_warning(0,secno,path,fnode_flag,"Contiguous runs of disk sectors".to_string());
            }
            *next_disk_sec = leaf.phys.wrapping_add(leaf.run);
            if show {
                println!("  {} in {} (file sector {})",what_text,
                    self.cfg.sec_range(leaf.phys,leaf.run),leaf.log);
            }
            if let Some(ws) = self.what_sector {
                if ws >= leaf.phys && ws.wrapping_sub(leaf.phys) < leaf.run {
                    println!("Sector {}: Sector {} of {} for \"{}\" (+{})",self.cfg.sec(ws),
                        *exp_file_sec + ws - leaf.phys,what_text,self.path(path),ws-leaf.phys);
                }
            }
            if self.cfg.check && self.sectors_per_block > 1 && what==HpfsUse::File {
                // block-aligned layout expected by the multimedia format
                if leaf.run < self.sectors_per_block && exp_file_sec.wrapping_add(leaf.run) < total_secs_obj {
                    self.alloc_warning(1,secno,path,fnode_flag,"Too fragmented for the `multimedia format'".to_string());
                }
                if leaf.phys & 3 != 0 {
                    self.alloc_warning(1,secno,path,fnode_flag,"Run not properly aligned for the `multimedia format'".to_string());
                }
            }
            self.use_sectors(leaf.phys,leaf.run,what,Some(path));
            let pos = *exp_file_sec as u64 * 512;
            if let Some(buf) = collect.as_mut() {
                if (*exp_file_sec as u64 + leaf.run as u64) * 512 > buf.len() as u64 {
                    self.alloc_warning(1,secno,path,fnode_flag,"Run extends past the mapped object".to_string());
                } else {
                    let data = self.vol.read(leaf.phys,leaf.run,true)?;
                    buf[pos as usize..pos as usize + data.len()].copy_from_slice(&data);
                }
            }
            let mut sec = leaf.phys;
            let mut stream_pos = pos;
            for _j in 0..leaf.run {
                if stream_pos >= copy_size as u64 {
                    break;
                }
                let data = self.vol.read(sec,1,false)?;
                let count = (copy_size as u64 - stream_pos).min(512) as usize;
                match self.vol.capture() {
                    Some(cap) => cap.raw_write(&data[0..count])?,
                    None => return Err(Box::new(crate::fs::Error::Fatal("no target for copy".to_string())))
                };
                sec += 1;
                stream_pos += 512;
            }
            *exp_file_sec = exp_file_sec.wrapping_add(leaf.run);
        }
        Ok(0)
    }

    /// Process an external ALSEC and the ALBLK inside it.  Returns the
    /// height of the subtree it roots.
    pub(super) fn do_alsec(&mut self,secno: u32,path: PathId,exp_file_sec: &mut u32,
                           next_disk_sec: &mut u32,total_secs_obj: u32,parent_fnode: u32,
                           parent_alblk: u32,alsec_level: i32,what: HpfsUse,extents: &mut u32,
                           show: bool,copy_size: u32,collect: &mut Option<Vec<u8>>) -> Result<i32,DYNERR> {
        if show {
            println!("ALSEC({}): {}",self.alsec_number,self.cfg.sec(secno));
        }
        if self.what_sector==Some(secno) {
            println!("Sector {}: Allocation sector (ALSEC) for \"{}\"",self.cfg.sec(secno),self.path(path));
        }
        if self.have_seen(secno,1,SEEN_ALSEC,"ALSEC") {
            return Ok(1);
        }
        self.use_sectors(secno,1,HpfsUse::Alsec,Some(path));
        let raw = self.vol.read(secno,1,true)?;
        let hdr = AlsecHeader::read_le(&mut Cursor::new(&raw))?;
        if hdr.sig != ALSEC_SIG {
            self.alsec_warning(1,secno,path,"Bad signature".to_string());
            return Ok(1);
        }
        self.alsec_count += 1;
        if hdr.self_lsn != secno {
            self.alsec_warning(1,secno,path,"Incorrect self pointer".to_string());
        }
        if hdr.parent_lsn != parent_alblk {
            self.alsec_warning(1,secno,path,"Incorrect parent pointer".to_string());
        }
        let height = self.do_storage(secno,&hdr.alb,&raw[ALSEC_PAYLOAD..],40,path,
            exp_file_sec,next_disk_sec,total_secs_obj,parent_fnode,alsec_level + 1,
            what,extents,show,copy_size,collect)?;
        Ok(height + 1)
    }
}
