//! ## Accounting substrate
//!
//! Both walkers keep the same books while they run: one usage class per
//! allocation unit (cluster on FAT, sector on HPFS), an optional
//! back-reference from each unit to the path it was first reached from, a
//! per-structure-type "seen" bit vector for cycle detection, and a shadow
//! copy of the volume's own allocation bitmap for cross-checking.
//!
//! The class vectors are byte-backed so that a 2 GB volume costs only a
//! few megabytes of bookkeeping; classes round-trip through `u8` via
//! `FromPrimitive`.

use bit_vec::BitVec;
use num_traits::FromPrimitive;
use super::PathId;

/// A closed set of usage classes, one per file system.
pub trait UsageClass: Copy + Eq + FromPrimitive {
    const EMPTY: Self;
    fn as_str(&self) -> &'static str;
    fn as_u8(&self) -> u8;
    /// whether a unit already classified `old` may be reclassified `new`
    fn upgrade_ok(old: Self,new: Self) -> bool;
}

/// Per-unit usage classification with optional reachability paths.
pub struct UsageMap<C: UsageClass> {
    classes: Vec<u8>,
    paths: Option<Vec<Option<PathId>>>,
    marker: std::marker::PhantomData<C>
}

impl <C: UsageClass> UsageMap<C> {
    /// `track_paths` trades memory for better conflict messages
    pub fn new(total: usize,track_paths: bool) -> Self {
        Self {
            classes: vec![C::EMPTY.as_u8();total],
            paths: match track_paths {
                true => Some(vec![None;total]),
                false => None
            },
            marker: std::marker::PhantomData
        }
    }
    pub fn len(&self) -> usize {
        self.classes.len()
    }
    pub fn get(&self,n: u32) -> C {
        C::from_u8(self.classes[n as usize]).expect("class vector corrupted")
    }
    pub fn path(&self,n: u32) -> Option<PathId> {
        match &self.paths {
            Some(v) => v[n as usize],
            None => None
        }
    }
    /// Record the class and path of unit `n`; the caller has already
    /// settled any conflict.
    pub fn set(&mut self,n: u32,what: C,path: Option<PathId>) {
        self.classes[n as usize] = what.as_u8();
        if let Some(v) = &mut self.paths {
            v[n as usize] = path;
        }
    }
    /// Try to claim unit `n` as `what`.  Returns the previous class when
    /// the claim conflicts with an earlier one, so the caller can warn.
    pub fn claim(&mut self,n: u32,what: C,path: Option<PathId>) -> Result<(),C> {
        let old = self.get(n);
        if old != C::EMPTY && !C::upgrade_ok(old,what) {
            return Err(old);
        }
        self.set(n,what,path);
        Ok(())
    }
}

/// Per-sector bits recording which structure kinds have interpreted the
/// sector, used to break pointer cycles within structural types.
pub struct SeenMap {
    bits: Vec<u8>
}

impl SeenMap {
    pub fn new(total: usize) -> Self {
        Self { bits: vec![0;total] }
    }
    /// Set `count` seen bits of kind `tag` starting at `secno`.  Returns
    /// the sectors that were already tagged, which signal a cycle.
    pub fn mark(&mut self,secno: u32,count: u32,tag: u8) -> Vec<u32> {
        let mut dup = Vec::new();
        for i in 0..count {
            let n = (secno + i) as usize;
            if n >= self.bits.len() {
                break;
            }
            if self.bits[n] & tag != 0 {
                dup.push(n as u32);
            } else {
                self.bits[n] |= tag;
            }
        }
        dup
    }
}

/// Shadow of the volume's declared allocation state, one bit per sector.
/// On disk a set bit means *free*; the same convention is kept here.
/// Consumers must not trust the shadow until `ready` is set, after the
/// whole bitmap has been read.
pub struct ShadowMap {
    free: BitVec,
    pub ready: bool
}

impl ShadowMap {
    pub fn new(total: usize) -> Self {
        Self { free: BitVec::from_elem(total,false), ready: false }
    }
    pub fn allocated(&self,n: u32) -> bool {
        !self.free.get(n as usize).unwrap_or(false)
    }
    /// Load one on-disk bitmap block.  Bit k of byte i covers sector
    /// `base + 8i + k` (LSB first, as on disk).
    pub fn load(&mut self,base: u32,bitmap: &[u8]) {
        for (i,byte) in bitmap.iter().enumerate() {
            for k in 0..8 {
                let n = base as usize + i*8 + k;
                if n < self.free.len() {
                    self.free.set(n,byte & (1 << k) != 0);
                }
            }
        }
    }
    /// Count free sectors in the shadow.
    pub fn free_count(&self) -> u32 {
        self.free.iter().filter(|b| *b).count() as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_derive::FromPrimitive;

    #[derive(PartialEq,Eq,Clone,Copy,Debug,FromPrimitive)]
    enum Cls {
        Empty = 0,
        A = 1,
        B = 2
    }

    impl UsageClass for Cls {
        const EMPTY: Self = Cls::Empty;
        fn as_str(&self) -> &'static str {
            match self { Cls::Empty => "empty", Cls::A => "a", Cls::B => "b" }
        }
        fn as_u8(&self) -> u8 {
            *self as u8
        }
        fn upgrade_ok(old: Self,new: Self) -> bool {
            old==Cls::A && new==Cls::B
        }
    }

    #[test]
    fn claims_and_conflicts() {
        let mut map: UsageMap<Cls> = UsageMap::new(8,true);
        assert!(map.claim(3,Cls::A,None).is_ok());
        assert!(map.claim(3,Cls::B,None).is_ok());     // permitted upgrade
        assert_eq!(map.claim(3,Cls::A,None),Err(Cls::B));
        assert_eq!(map.get(3),Cls::B);
    }

    #[test]
    fn seen_bits() {
        let mut seen = SeenMap::new(16);
        assert_eq!(seen.mark(4,4,0x02),Vec::<u32>::new());
        assert_eq!(seen.mark(6,4,0x02),vec![6,7]);
        assert_eq!(seen.mark(6,1,0x01),Vec::<u32>::new());
    }

    #[test]
    fn shadow_bit_order() {
        let mut shadow = ShadowMap::new(32);
        shadow.load(16,&[0x01]);
        assert!(!shadow.allocated(16));
        assert!(shadow.allocated(17));
        assert!(shadow.allocated(15));
    }
}
