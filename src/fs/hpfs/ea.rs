//! ## Extended attributes and ACLs
//!
//! Both hang off AUXINFO structures in the FNODE.  The data is stored in
//! exactly one of three places: inside the FNODE's variable area, in one
//! external run of sectors, or in sectors mapped by an ALSEC tree.  A
//! single extended attribute inside the FEA list repeats the same three
//! choices for its value.  ACL contents are not interpreted, only
//! accounted.

use super::HpfsScan;
use super::types::*;
use crate::fs::PathId;
use crate::{escaped_string,STDRESULT};

impl <'a> HpfsScan<'a> {
    /// Process the FEA list in `buf`: validate each attribute's storage,
    /// account its sectors, and cross-check the totals the FNODE claims.
    fn do_auxinfo_ea(&mut self,buf: &[u8],secno: u32,path: PathId,ea_size: u32,
                     check_ea_size: bool,ea_need: u32,show: bool) -> STDRESULT {
        let buf_size = buf.len() as u32;
        let mut pos: u32 = 0;
        let mut size: u32 = 0;
        let mut need: u32 = 0;
        while pos < buf_size {
            if pos + 4 > buf_size {
                self.fnode_warning(1,secno,path,"Truncated FEA structure".to_string());
                break;
            }
            let base = pos as usize;
            let flag = buf[base];
            let cb_name = buf[base+1] as u32;
            let cb_value = u16::from_le_bytes([buf[base+2],buf[base+3]]) as u32;
            if pos + 4 + cb_name + 1 + cb_value > buf_size {
                self.fnode_warning(1,secno,path,"Truncated FEA structure".to_string());
                break;
            }
            let name = buf[base+4..base+4+cb_name as usize].to_vec();
            if buf[base+4+cb_name as usize] != 0 {
                self.fnode_warning(1,secno,path,
                    "Name of extended attribute not terminated by a null character".to_string());
            }
            if flag & 0x80 != 0 {
                need += 1;
            }
            match flag & 0x7f {
                0x00 => {
                    // value stored inline, right after the FEA header
                    if self.cfg.show_eas {
                        println!("  Extended attribute {} ({} bytes) is stored inline",
                            escaped_string(&name,false),cb_value);
                    }
                    size += 4 + cb_name + 1 + cb_value;
                    if self.cfg.show_frag {
                        self.ea_extents.add(0);
                    }
                },
                0x01 => {
                    // value in one external run, located by an SPTR
                    if cb_value != 8 {
                        self.fnode_warning(1,secno,path,"Incorrect size of FEA structure".to_string());
                    } else {
                        let sp = base + 4 + cb_name as usize + 1;
                        let start = u32::from_le_bytes([buf[sp+4],buf[sp+5],buf[sp+6],buf[sp+7]]);
                        let bytes = u32::from_le_bytes([buf[sp],buf[sp+1],buf[sp+2],buf[sp+3]]);
                        let count = (bytes + 511)/512;
                        if self.cfg.show_eas {
                            println!("  Extended attribute {} ({} bytes) is stored in {}",
                                escaped_string(&name,false),bytes,self.cfg.sec_range(start,count));
                        } else if show {
                            println!("  Extended attributes in {}",self.cfg.sec_range(start,count));
                        }
                        if let Some(ws) = self.what_sector {
                            if ws >= start && ws.wrapping_sub(start) < count {
                                println!("Sector {}: EA data for \"{}\"",self.cfg.sec(ws),self.path(path));
                            }
                        }
                        self.use_sectors(start,count,HpfsUse::Ea,Some(path));
                        size += 4 + cb_name + 1 + bytes;
                        if self.cfg.show_frag {
                            self.ea_extents.add(1);
                        }
                    }
                },
                0x03 => {
                    // value in several runs, mapped by an ALSEC
                    if cb_value != 8 {
                        self.fnode_warning(1,secno,path,"Incorrect size of FEA structure".to_string());
                    } else {
                        let sp = base + 4 + cb_name as usize + 1;
                        let start = u32::from_le_bytes([buf[sp+4],buf[sp+5],buf[sp+6],buf[sp+7]]);
                        let bytes = u32::from_le_bytes([buf[sp],buf[sp+1],buf[sp+2],buf[sp+3]]);
                        if self.cfg.show_eas {
                            println!("  Extended attribute {} ({} bytes) is stored in sectors mapped by ALSEC {}",
                                escaped_string(&name,false),bytes,self.cfg.sec(start));
                        }
                        let mut file_sec: u32 = 0;
                        let mut disk_sec: u32 = 0;
                        let mut extents: u32 = 0;
                        self.alsec_number = "0".to_string();
                        let expected = (bytes + 511)/512;
                        self.do_alsec(start,path,&mut file_sec,&mut disk_sec,expected,
                            secno,secno,0,HpfsUse::Ea,&mut extents,show,0,&mut None)?;
                        if self.cfg.show_eas {
                            println!("  Number of sectors for this EA: {}",file_sec);
                        }
                        // HPFS.IFS never assigns more than one ALSEC's
                        // worth of extents to an EA, truncating it.
                        if (file_sec as u64) * 512 < bytes as u64 {
                            self.fnode_warning(1,secno,path,format!("Not enough sectors allocated for EA {}",
                                escaped_string(&name,false)));
                        }
                        if file_sec > expected {
                            self.fnode_warning(1,secno,path,format!("Too many sectors allocated for EA {} ({})",
                                escaped_string(&name,false),file_sec-expected));
                        }
                        size += 4 + cb_name + 1 + bytes;
                        if self.cfg.show_frag {
                            self.ea_extents.add(extents as usize);
                        }
                    }
                },
                _ => {
                    self.fnode_warning(1,secno,path,format!("Invalid FEA flag 0x{:02x} for extended attribute {}",
                        flag,escaped_string(&name,false)));
                    break;
                }
            }
            pos += 4 + cb_name + 1 + cb_value;
        }
        if check_ea_size && size != ea_size {
            self.fnode_warning(1,secno,path,format!("Incorrect EA size ({} vs. {})",size,ea_size));
        }
        if need != ea_need {
            self.fnode_warning(1,secno,path,format!("Incorrect number of `need' EAs ({} vs. {})",need,ea_need));
        }
        Ok(())
    }

    fn do_auxinfo_buf(&mut self,buf: &[u8],what: HpfsUse,secno: u32,path: PathId,
                      ea_size: u32,check_ea_size: bool,ea_need: u32,show: bool) -> STDRESULT {
        match what {
            HpfsUse::Ea => self.do_auxinfo_ea(buf,secno,path,ea_size,check_ea_size,ea_need,show),
            // ACL contents are unknown territory
            _ => Ok(())
        }
    }

    /// Process one AUXINFO structure (EAs or ACL).  `fnode_raw` is the
    /// FNODE's sector image, `base` the offset of in-FNODE data.
    pub(super) fn do_auxinfo(&mut self,fnode_raw: &[u8],aux: &AuxInfo,base: u32,secno: u32,
                             path: PathId,what: HpfsUse,ea_size: u32,check_ea_size: bool,
                             ea_need: u32,show: bool) -> STDRESULT {
        let which = match what { HpfsUse::Ea => "EA", _ => "ACL" };
        let which_long = match what { HpfsUse::Ea => "EAs", _ => "ACL" };
        let run_length = aux.sp.cb_run;
        let start = aux.sp.lsn;
        let fnode_length = aux.fnl as u32;
        // data lives inside the FNODE or outside it, never both
        if run_length != 0 && fnode_length != 0 {
            self.fnode_warning(1,secno,path,format!("Both internal and external {}",which));
        }
        if run_length != 0 {
            let buf_size = run_length;
            let mut collect: Option<Vec<u8>> = None;
            if aux.dat != 0 {
                // mapped by an ALSEC tree
                if self.cfg.locate {
                    match what {
                        HpfsUse::Ea => println!("  Extended attributes (FEA structures, {} bytes) in sectors mapped by ALSEC {}",
                            run_length,self.cfg.sec(start)),
                        _ => println!("  ACL ({} bytes) in sectors mapped by ALSEC {}",run_length,self.cfg.sec(start))
                    };
                }
                if buf_size <= 0x10_0000 {
                    collect = Some(vec![0u8;((buf_size + 511) & !511) as usize]);
                }
                let mut file_sec: u32 = 0;
                let mut disk_sec: u32 = 0;
                let mut extents: u32 = 0;
                self.alsec_number = "0".to_string();
                let expected = (run_length + 511)/512;
                self.do_alsec(start,path,&mut file_sec,&mut disk_sec,expected,
                    secno,secno,0,what,&mut extents,show,0,&mut collect)?;
                if (file_sec as u64) * 512 < run_length as u64 {
                    self.fnode_warning(1,secno,path,format!("Not enough sectors allocated for {}",which_long));
                }
                if file_sec > expected {
                    self.fnode_warning(1,secno,path,format!("Too many sectors allocated for {} ({})",
                        which_long,file_sec-expected));
                }
            } else {
                // one run of sectors
                let count = (run_length + 511)/512;
                if self.cfg.locate {
                    match what {
                        HpfsUse::Ea => println!("  Extended attributes (FEA structures, {} bytes) in {}",
                            run_length,self.cfg.sec_range(start,count)),
                        _ => println!("  ACL ({} bytes) in {}",run_length,self.cfg.sec_range(start,count))
                    };
                }
                if let Some(ws) = self.what_sector {
                    if ws >= start && ws.wrapping_sub(start) < count {
                        match what {
                            HpfsUse::Ea => println!("Sector {}: Extended attributes (FEA structures) for \"{}\" (+{})",
                                self.cfg.sec(ws),self.path(path),ws-start),
                            _ => println!("Sector {}: ACL for \"{}\" (+{})",self.cfg.sec(ws),self.path(path),ws-start)
                        };
                    }
                }
                self.use_sectors(start,count,what,Some(path));
                if buf_size <= 0x10_0000 {
                    collect = Some(self.vol.read(start,count,true)?);
                }
            }
            match collect {
                Some(buf) => self.do_auxinfo_buf(&buf[0..buf_size as usize],what,secno,path,
                    ea_size,check_ea_size,ea_need,show)?,
                None => self.fnode_warning(1,secno,path,format!("{} too big for examination",which_long))
            };
        } else if fnode_length != 0 {
            if self.cfg.locate {
                match what {
                    HpfsUse::Ea => println!("  Extended attributes (FEA structures, {} bytes at 0x{:x}) in FNODE {}",
                        fnode_length,base,self.cfg.sec(secno)),
                    _ => println!("  ACL ({} bytes at 0x{:x}) in FNODE {}",fnode_length,base,self.cfg.sec(secno))
                };
            }
            if base < FNODE_FREE_OFFSET {
                self.fnode_warning(1,secno,path,format!("{} offset invalid",which));
            } else if base + fnode_length > 512 {
                self.fnode_warning(1,secno,path,format!("{} beyond end of FNODE",which));
            } else {
                self.do_auxinfo_buf(&fnode_raw[base as usize..(base+fnode_length) as usize],
                    what,secno,path,ea_size,check_ea_size,ea_need,show)?;
            }
        }
        Ok(())
    }
}
