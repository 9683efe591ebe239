// test of the HPFS walker against a synthetic mini volume
use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::process::Command;
use volkit::dio::{self,OpenCfg,DIO_DISK,DIO_SNAPSHOT};
use volkit::fs::{self,Volume,ScanCfg,Report};
use volkit::fs::hpfs::{checksum,spareblock_checksum};

const TOTAL_SECTORS: usize = 1024;
const ROOT_FNODE: usize = 24;
const ROOT_DIRBLK: usize = 32;
const GOOD_TIME: u32 = 0x30000000;
/// every test file maps one two-sector run
const FILE_SIZE: u32 = 1024;
/// data runs start here, two sectors per file
const DATA_START: usize = 84;

fn put_u16(img: &mut [u8],off: usize,val: u16) {
    img[off..off+2].copy_from_slice(&val.to_le_bytes());
}

fn put_u32(img: &mut [u8],off: usize,val: u32) {
    img[off..off+4].copy_from_slice(&val.to_le_bytes());
}

fn boot_sector(img: &mut Vec<u8>) {
    img[3..11].copy_from_slice(b"VOLKIT  ");
    put_u16(img,11,512);
    img[13] = 1;
    put_u16(img,14,1);
    put_u16(img,24,17);         // sectors per track
    put_u16(img,26,2);          // heads
    img[38] = 40;               // extended signature
    img[54..58].copy_from_slice(b"HPFS");
    img[510] = 0x55;
    img[511] = 0xaa;
}

/// For a directory, `ptr` is the root DIRBLK; for a file, the start of
/// its single two-sector run.
fn fnode(img: &mut Vec<u8>,secno: usize,name: &[u8],dir: bool,cont_dir: u32,ptr: u32) {
    let base = secno*512;
    put_u32(img,base,0xf7e40aae);
    img[base+12] = name.len() as u8;
    img[base+13..base+13+name.len().min(15)].copy_from_slice(&name[0..name.len().min(15)]);
    put_u32(img,base+28,cont_dir);
    img[base+55] = match dir { true => 1, false => 0 };
    img[base+60] = 7;                           // free leaves
    img[base+61] = 1;                           // used leaves
    put_u16(img,base+62,8+12);                  // offset to free entry
    match dir {
        true => {
            // the first leaf points at the root DIRBLK
            put_u32(img,base+72,ptr);
        },
        false => {
            // one leaf: logical 0, two sectors, at `ptr`
            put_u32(img,base+68,2);
            put_u32(img,base+72,ptr);
            put_u32(img,base+160,FILE_SIZE);
        }
    }
}

fn dirent(block: &mut [u8],pos: usize,flags: u8,attr: u8,fnode: u32,fsize: u32,name: &[u8]) -> usize {
    let len = (31 + name.len() + 3) & !3;
    put_u16(block,pos,len as u16);
    block[pos+2] = flags;
    block[pos+3] = attr;
    put_u32(block,pos+4,fnode);
    let times = match flags & 0x08 { 0 => GOOD_TIME, _ => 0 };
    put_u32(block,pos+8,times);
    put_u32(block,pos+12,fsize);
    put_u32(block,pos+16,times);
    put_u32(block,pos+20,times);
    block[pos+30] = name.len() as u8;
    block[pos+31..pos+31+name.len()].copy_from_slice(name);
    pos + len
}

/// A consistent 1024-sector HPFS volume with one code page and a root
/// directory holding the named files, whose FNODEs land at the given
/// sectors.
fn build_image(files: &[(&[u8],usize)]) -> Vec<u8> {
    let mut img = vec![0u8;TOTAL_SECTORS*512];
    boot_sector(&mut img);

    // Superblock
    let sb = 16*512;
    put_u32(&mut img,sb,0xf995e849);
    put_u32(&mut img,sb+4,0xfa53e9c5);
    img[sb+8] = 2;                              // version
    img[sb+9] = 2;                              // functional version
    put_u32(&mut img,sb+12,ROOT_FNODE as u32);
    put_u32(&mut img,sb+16,TOTAL_SECTORS as u32);
    put_u32(&mut img,sb+20,0);                  // bad sectors
    put_u32(&mut img,sb+24,20);                 // bitmap indirect block
    put_u32(&mut img,sb+32,0);                  // bad block list
    put_u32(&mut img,sb+40,GOOD_TIME);          // last chkdsk
    put_u32(&mut img,sb+48,16);                 // DIRBLK band sectors
    put_u32(&mut img,sb+52,32);                 // first DIRBLK
    put_u32(&mut img,sb+56,47);                 // last DIRBLK
    put_u32(&mut img,sb+60,28);                 // DIRBLK band bitmap
    img[sb+64..sb+71].copy_from_slice(b"TESTVOL");
    put_u32(&mut img,sb+96,48);                 // SID table

    // Spareblock
    let sp = 17*512;
    put_u32(&mut img,sp,0xf9911849);
    put_u32(&mut img,sp+4,0xfa5229c5);
    put_u32(&mut img,sp+12,56);                 // hotfix list
    put_u32(&mut img,sp+16,0);                  // hotfixes used
    put_u32(&mut img,sp+20,3);                  // max hotfixes
    put_u32(&mut img,sp+24,2);                  // free spare DIRBLKs
    put_u32(&mut img,sp+28,2);                  // max spare DIRBLKs
    put_u32(&mut img,sp+32,68);                 // code page info sector
    put_u32(&mut img,sp+36,1);                  // code page count
    put_u32(&mut img,sp+108,60);                // spare DIRBLKs
    put_u32(&mut img,sp+112,64);

    // bitmap indirect block: band 0's bitmap lives at 72
    put_u32(&mut img,20*512,72);

    // hotfix list: three replacement sectors at 76..78
    for i in 0..3 {
        put_u32(&mut img,56*512 + (3+i)*4,76 + i as u32);
    }

    // code page info sector
    let cpi = 68*512;
    put_u32(&mut img,cpi,0x494521f7);
    put_u32(&mut img,cpi+4,1);                  // one entry
    put_u32(&mut img,cpi+8,0);                  // first index
    put_u32(&mut img,cpi+12,0);                 // no next sector
    put_u16(&mut img,cpi+16,1);                 // country
    put_u16(&mut img,cpi+18,850);               // code page
    put_u32(&mut img,cpi+24,69);                // data sector
    put_u16(&mut img,cpi+28,0);                 // index on volume
    put_u16(&mut img,cpi+30,0);                 // DBCS ranges

    // code page data sector
    let cpd = 69*512;
    put_u32(&mut img,cpd,0x894521f7);
    put_u16(&mut img,cpd+4,1);
    put_u16(&mut img,cpd+6,0);
    put_u16(&mut img,cpd+20,26);                // offset of the entry
    put_u16(&mut img,cpd+26,1);                 // country
    put_u16(&mut img,cpd+28,850);               // code page
    put_u16(&mut img,cpd+30,0);                 // DBCS ranges
    for i in 0..128 {
        img[cpd+32+i] = (128+i) as u8;          // upper-half case map
    }
    let cpcheck = checksum(&img[cpd+26..cpd+26+136]);
    put_u32(&mut img,cpi+20,cpcheck);
    put_u32(&mut img,cpd+8,cpcheck);

    // root FNODE and the files
    fnode(&mut img,ROOT_FNODE,b"",true,ROOT_FNODE as u32,ROOT_DIRBLK as u32);
    for (i,(name,secno)) in files.iter().enumerate() {
        fnode(&mut img,*secno,name,false,ROOT_FNODE as u32,(DATA_START + 2*i) as u32);
    }

    // root DIRBLK
    let db = ROOT_DIRBLK*512;
    put_u32(&mut img,db,0x77e40aae);
    put_u32(&mut img,db+8,1);                   // change count, top-most bit
    put_u32(&mut img,db+12,ROOT_FNODE as u32);
    put_u32(&mut img,db+16,ROOT_DIRBLK as u32);
    {
        let block = &mut img[db..db+2048];
        let mut pos = 20;
        pos = dirent(block,pos,0x01,0x10,ROOT_FNODE as u32,0,&[1,1]);
        for (name,secno) in files {
            pos = dirent(block,pos,0,0x20,*secno as u32,FILE_SIZE,name);
        }
        pos = dirent(block,pos,0x08,0,0,0,&[0xff]);
        put_u32(block,4,pos as u32);            // offset to first free
    }

    // DIRBLK band bitmap: only the first DIRBLK of the band is used
    img[28*512] = 0b00001110;

    // allocation bitmap for band 0 (set bit = free)
    let bm = 72*512;
    for b in img[bm..bm+2048].iter_mut() {
        *b = 0xff;
    }
    let mut mark_used = |img: &mut Vec<u8>,secno: usize| {
        img[bm + secno/8] &= !(1u8 << (secno % 8));
    };
    for s in 0..20 {
        mark_used(&mut img,s);                  // boot, loader, super, spare, 18/19
    }
    for s in 20..24 { mark_used(&mut img,s); }  // bitmap indirect
    mark_used(&mut img,ROOT_FNODE);
    for s in 28..32 { mark_used(&mut img,s); }  // DIRBLK band bitmap
    for s in 32..48 { mark_used(&mut img,s); }  // DIRBLK band
    for s in 48..56 { mark_used(&mut img,s); }  // SID table
    for s in 56..60 { mark_used(&mut img,s); }  // hotfix list
    for s in 60..68 { mark_used(&mut img,s); }  // spare DIRBLKs
    mark_used(&mut img,68);
    mark_used(&mut img,69);
    for s in 72..76 { mark_used(&mut img,s); }  // the bitmap itself
    for s in 76..79 { mark_used(&mut img,s); }  // hotfix replacements
    for (i,(_name,secno)) in files.iter().enumerate() {
        mark_used(&mut img,*secno);
        mark_used(&mut img,DATA_START + 2*i);
        mark_used(&mut img,DATA_START + 2*i + 1);
    }
    // bits past the end of the volume read as allocated
    for s in TOTAL_SECTORS..2048*8 {
        img[bm + s/8] &= !(1u8 << (s % 8));
    }

    // checksums recorded in the Spareblock
    let superb_cks = checksum(&img[16*512..17*512].to_vec());
    put_u32(&mut img,sp+40,superb_cks);
    let spareb_cks = spareblock_checksum(&img[17*512..18*512].to_vec());
    put_u32(&mut img,sp+44,spareb_cks);
    img
}

fn write_image(dir: &std::path::Path,name: &str,img: &[u8]) -> String {
    let path = dir.join(name);
    std::fs::write(&path,img).expect("could not write image");
    path.to_str().unwrap().to_string()
}

fn run_check(path: &str,pedantic: bool) -> (u32,u32) {
    let mut cfg = ScanCfg::new();
    cfg.check = true;
    cfg.pedantic = pedantic;
    let mut rpt = Report::new();
    let src = dio::open(path,DIO_DISK | DIO_SNAPSHOT,false,&OpenCfg::new()).expect("open failed");
    let mut vol = Volume::new(src);
    fs::scan_volume(&mut vol,&cfg,&mut rpt,None).expect("walk failed");
    (rpt.count(0),rpt.count(1))
}

#[test]
fn clean_volume_checks_clean() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let files: Vec<(&[u8],usize)> = vec![(b"ABB",80),(b"ABC",81),(b"ABD",82)];
    let img = write_image(dir.path(),"hpfs.img",&build_image(&files));
    // one soft warning is expected: no host case tables to check against
    assert_eq!(run_check(&img,false),(1,0));

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["check","-d",&img]).assert().success();
}

#[test]
fn misordered_names_draw_one_error() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let files: Vec<(&[u8],usize)> = vec![(b"ABC",80),(b"ABD",81),(b"ABB",82)];
    let img = write_image(dir.path(),"misorder.img",&build_image(&files));
    let (soft,hard) = run_check(&img,false);
    assert_eq!(hard,1);
    assert_eq!(soft,1);

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["check","-d",&img]).assert().failure().code(1)
        .stderr(predicate::str::contains("not in ascending order"));
}

#[test]
fn broken_spare_checksum_is_flagged() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let files: Vec<(&[u8],usize)> = vec![(b"ABB",80)];
    let mut img = build_image(&files);
    img[17*512 + 44] ^= 0xff;       // recorded Spareblock checksum
    let path = write_image(dir.path(),"badsum.img",&img);
    let (_soft,hard) = run_check(&path,false);
    assert_eq!(hard,1);
}

#[test]
fn what_sector_describes_structures() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let files: Vec<(&[u8],usize)> = vec![(b"ABB",80)];
    let img = write_image(dir.path(),"hpfs.img",&build_image(&files));

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["info","-d",&img,"-s","16"]).assert().success()
        .stdout(predicate::str::contains("Super block"));

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["info","-d",&img,"-s","80"]).assert().success()
        .stdout(predicate::str::contains("FNODE"));
}

#[test]
fn dir_lists_the_root() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let files: Vec<(&[u8],usize)> = vec![(b"ABB",80),(b"ABC",81)];
    let img = write_image(dir.path(),"hpfs.img",&build_image(&files));

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["dir","-d",&img,"-f","/"]).assert().success()
        .stdout(predicate::str::contains("ABB").and(predicate::str::contains("ABC")));

    let mut cmd = Command::cargo_bin("volkit").expect("cargo failure");
    cmd.args(["dir","-d",&img,"-f","/NOSUCH"]).assert().failure().code(2);
}

#[test]
fn cycle_in_dirblk_tree_is_cut() {
    let dir = tempfile::tempdir().expect("no temp dir");
    let files: Vec<(&[u8],usize)> = vec![(b"ABB",80)];
    let mut img = build_image(&files);
    // point the root FNODE's DIRBLK leaf back at a DIRBLK that lists a
    // down pointer to itself
    let db = ROOT_DIRBLK*512;
    {
        let block = &mut img[db..db+2048];
        let mut pos = 20;
        pos = dirent(block,pos,0x01,0x10,ROOT_FNODE as u32,0,&[1,1]);
        // entry with a down pointer to the same DIRBLK
        let len = ((31 + 3 + 3) & !3) + 4;
        put_u16(block,pos,len as u16);
        block[pos+2] = 0x04;                    // down pointer present
        block[pos+3] = 0x20;
        put_u32(block,pos+4,80);
        put_u32(block,pos+8,GOOD_TIME);
        put_u32(block,pos+12,FILE_SIZE);
        put_u32(block,pos+16,GOOD_TIME);
        put_u32(block,pos+20,GOOD_TIME);
        block[pos+30] = 3;
        block[pos+31..pos+34].copy_from_slice(b"ABB");
        put_u32(block,pos+len-4,ROOT_DIRBLK as u32);
        pos += len;
        pos = dirent(block,pos,0x08,0,0,0,&[0xff]);
        put_u32(block,4,pos as u32);
    }
    let path = write_image(dir.path(),"cycle.img",&img);
    // the walk terminates, flagging the repeated DIRBLK
    let (_soft,hard) = run_check(&path,false);
    assert!(hard >= 1);
}
