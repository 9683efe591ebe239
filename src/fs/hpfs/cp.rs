//! ## Code page chain
//!
//! HPFS records every code page the volume has seen: a linked chain of
//! CPINFOSEC sectors lists them, and each entry points at a CPDATASEC
//! holding the 128-entry case-folding table (plus DBCS ranges) for one
//! code page.  File name comparison in the directory B-trees runs
//! through these tables, so they are loaded before the tree walk.
//!
//! OS/2 could cross-validate the tables against the host's own NLS
//! services; with no host tables to compare against, the walker says so
//! once and takes the on-disk tables at face value.

use std::io::Cursor;
use binrw::BinRead;
use super::HpfsScan;
use super::types::*;
use crate::STDRESULT;

impl <'a> HpfsScan<'a> {
    /// Process one code page entry in a data sector; `entry` spans the
    /// fixed part plus the DBCS ranges and `cs` is its stored checksum.
    fn do_cpdata(&mut self,secno: u32,entry: &[u8],cs: u32,index: usize) {
        let country = u16::from_le_bytes([entry[0],entry[1]]);
        let codepage = u16::from_le_bytes([entry[2],entry[3]]);
        for i in 0..128 {
            self.code_pages[index].case_map[128+i] = entry[6+i];
        }
        if !self.no_case_data {
            self.rpt.warning(0,"No host case mapping data -- cannot check case mapping tables".to_string());
            self.no_case_data = true;
        }
        let cs2 = checksum(entry);
        if cs != cs2 {
            self.rpt.warning(1,format!("CPDATASEC {}: Incorrect checksum for {}/{}",
                self.cfg.sec(secno),country,codepage));
        }
    }

    /// Process a code page data sector, filling in the case tables of
    /// the code pages it carries.
    fn do_cpdatasec(&mut self,di: usize) -> STDRESULT {
        let secno = self.code_pages[di].data_sector;
        if self.cpdata_visited.contains(&secno) {
            return Ok(());
        }
        self.cpdata_visited.push(secno);
        if self.cfg.info || self.what_sector==Some(secno) {
            println!("Sector {}: Code page data sector",self.cfg.sec(secno));
        }
        self.use_sectors(secno,1,HpfsUse::CpDataSec,None);
        let raw = self.vol.read(secno,1,true)?;
        let hdr = CpDataHeader::read_le(&mut Cursor::new(&raw))?;
        if hdr.sig != CPDATA_SIG {
            self.rpt.warning(1,format!("CPDATASEC {}: Bad signature",self.cfg.sec(secno)));
            return Ok(());
        }
        let mut dcount = hdr.count as usize;
        if dcount > 3 {
            self.rpt.warning(1,format!("CPDATASEC {}: Too many code pages",self.cfg.sec(secno)));
            dcount = 3;
        }
        let mut used = [false;512];
        for j in 0..dcount {
            let index = hdr.first_index as usize + j;
            if index >= self.code_pages.len() {
                self.rpt.warning(1,format!("CPDATASEC {}: Index too big",self.cfg.sec(secno)));
                continue;
            }
            self.code_pages[index].hit = true;
            for c in 0..256 {
                self.code_pages[index].case_map[c] = (c as u8).to_ascii_uppercase();
                self.code_pages[index].case_map_changed[c] = false;
            }
            if hdr.cksum[j] != self.code_pages[index].cksum {
                self.rpt.warning(1,format!("CPDATASEC {}: Wrong checksum for code page {}",
                    self.cfg.sec(secno),index));
            }
            let offset = hdr.offset[j] as usize;
            let mut len = CPDATA_ENTRY_FIXED as usize;
            if offset < 26 || offset + len > 512 {
                self.rpt.warning(1,format!("CPDATASEC {}: Invalid offset: {}",self.cfg.sec(secno),offset));
                continue;
            }
            let ranges = u16::from_le_bytes([raw[offset+4],raw[offset+5]]);
            if ranges != self.code_pages[index].dbcs_ranges {
                self.rpt.warning(1,format!("CPDATASEC {}: Incorrect number of DBCS ranges",self.cfg.sec(secno)));
                continue;
            }
            len += (ranges as usize + 1) * 2;
            if offset + len > 512 {
                self.rpt.warning(1,format!("CPDATASEC {}: Invalid offset: {}",self.cfg.sec(secno),offset));
                continue;
            }
            if used[offset..offset+len].iter().any(|u| *u) {
                self.rpt.warning(1,format!("CPDATASEC {}: Overlapping data",self.cfg.sec(secno)));
                continue;
            }
            for u in used[offset..offset+len].iter_mut() {
                *u = true;
            }
            let entry = raw[offset..offset+len].to_vec();
            self.do_cpdata(secno,&entry,hdr.cksum[j],index);
        }
        Ok(())
    }

    /// Walk the CPINFOSEC chain, then load the data sector of every code
    /// page found.
    pub(super) fn do_cpinfosec(&mut self,first: u32,count_declared: u32) -> STDRESULT {
        self.code_pages = Vec::with_capacity(count_declared as usize);
        let mut secno = first;
        let mut count: u32 = 0;
        loop {
            if self.cfg.info || self.what_sector==Some(secno) {
                println!("Sector {}: Code page information sector",self.cfg.sec(secno));
            }
            if self.have_seen(secno,1,SEEN_CPINFOSEC,"code page information") {
                break;
            }
            self.use_sectors(secno,1,HpfsUse::CpInfoSec,None);
            let raw = self.vol.read(secno,1,true)?;
            let hdr = CpInfoHeader::read_le(&mut Cursor::new(&raw))?;
            if hdr.sig != CPINFO_SIG {
                self.rpt.warning(1,format!("CPINFOSEC {}: Bad signature",self.cfg.sec(secno)));
                break;
            }
            if hdr.first_index != count {
                self.rpt.warning(1,format!("CPINFOSEC {}: Wrong code page index",self.cfg.sec(secno)));
            }
            let mut n = hdr.count as usize;
            if n > 31 {
                self.rpt.warning(1,format!("CPINFOSEC {}: Too many code pages",self.cfg.sec(secno)));
                n = 31;
            }
            for i in 0..n {
                let entry = CpInfoEntry::read_le(&mut Cursor::new(&raw[16+16*i..32+16*i]))?;
                if self.cfg.info || self.what_sector==Some(secno) {
                    println!("  Code page index {}: code page {}, country {}",i,entry.codepage,entry.country);
                }
                if entry.index as u32 != count {
                    self.rpt.warning(1,format!("CPINFOSEC {}: Incorrect index",self.cfg.sec(secno)));
                }
                self.code_pages.push(CodePage::new(&entry));
                count += 1;
            }
            if hdr.next==0 {
                break;
            }
            secno = hdr.next;
        }
        if count != count_declared {
            self.rpt.warning(1,"Wrong number of code pages in code page information sectors".to_string());
            if count > count_declared {
                self.code_pages.truncate(count_declared as usize);
            }
        }
        self.cpdata_visited.clear();
        for i in 0..self.code_pages.len() {
            self.do_cpdatasec(i)?;
        }
        for i in 0..self.code_pages.len() {
            if !self.code_pages[i].hit {
                self.rpt.warning(1,format!("No code page data for code page index {}",i));
            }
        }
        Ok(())
    }
}
