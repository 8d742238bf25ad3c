/*!
 * Chained Hash Map with Progressive Resizing
 *
 * Two fixed-size tables back the map: `newer` takes every insert, `older`
 * is the remnant of the last resize and only ever shrinks. Each map
 * operation moves a bounded number of nodes from `older` into `newer`,
 * so growing the map never stalls a single request on a full rehash.
 */

/// Average chain length that triggers a resize.
const K_MAX_LOAD_FACTOR: usize = 8;

/// Upper bound on migration steps per map operation.
const K_RESIZING_WORK: usize = 128;

/// Bucket count of the first table.
const K_INITIAL_BUCKETS: usize = 4;

/// FNV-style byte hash used to route keys to buckets.
///
/// Only used for bucket selection and as a cheap pre-filter; callers
/// always confirm a hit with a real key comparison.
#[inline]
pub fn str_hash(data: &[u8]) -> u64 {
    let mut h: u32 = 0x811C_9DC5;
    for &b in data {
        h = h.wrapping_add(b as u32).wrapping_mul(0x0100_0193);
    }
    h as u64
}

type Link<T> = Option<Box<HNode<T>>>;

struct HNode<T> {
    next: Link<T>,
    hcode: u64,
    val: T,
}

/// A fixed-size table of singly linked chains.
struct HTab<T> {
    slots: Vec<Link<T>>,
    mask: usize,
    size: usize,
}

impl<T> HTab<T> {
    fn empty() -> Self {
        Self {
            slots: Vec::new(),
            mask: 0,
            size: 0,
        }
    }

    fn with_buckets(n: usize) -> Self {
        debug_assert!(n.is_power_of_two());
        let mut slots = Vec::with_capacity(n);
        slots.resize_with(n, || None);
        Self {
            slots,
            mask: n - 1,
            size: 0,
        }
    }

    #[inline]
    fn buckets(&self) -> usize {
        self.slots.len()
    }

    fn push(&mut self, mut node: Box<HNode<T>>) {
        let pos = node.hcode as usize & self.mask;
        node.next = self.slots[pos].take();
        self.slots[pos] = Some(node);
        self.size += 1;
    }

    /// Returns the link that points at the matching node.
    fn find_slot<F>(&mut self, hcode: u64, eq: &mut F) -> Option<&mut Link<T>>
    where
        F: FnMut(&T) -> bool,
    {
        if self.slots.is_empty() {
            return None;
        }
        let pos = hcode as usize & self.mask;
        let mut slot = &mut self.slots[pos];
        loop {
            let hit = match slot.as_deref() {
                None => return None,
                Some(node) => node.hcode == hcode && eq(&node.val),
            };
            if hit {
                return Some(slot);
            }
            slot = &mut slot.as_mut()?.next;
        }
    }

    fn pop<F>(&mut self, hcode: u64, eq: &mut F) -> Option<Box<HNode<T>>>
    where
        F: FnMut(&T) -> bool,
    {
        let slot = self.find_slot(hcode, eq)?;
        let mut node = slot.take()?;
        *slot = node.next.take();
        self.size -= 1;
        Some(node)
    }
}

/// Hash map keyed by caller-computed hash codes.
///
/// Equality is supplied per call, so the map never needs to know what a
/// key is. Values are owned by their chain node and dropped with it.
pub struct HMap<T> {
    newer: HTab<T>,
    older: Option<HTab<T>>,
    migrate_pos: usize,
}

impl<T> Default for HMap<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> HMap<T> {
    pub fn new() -> Self {
        Self {
            newer: HTab::empty(),
            older: None,
            migrate_pos: 0,
        }
    }

    /// Number of live entries across both tables.
    #[inline]
    pub fn len(&self) -> usize {
        self.newer.size + self.older.as_ref().map_or(0, |t| t.size)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True while entries are still being moved out of the older table.
    pub fn is_resizing(&self) -> bool {
        self.older.is_some()
    }

    /// Bucket count of the live table.
    pub fn buckets(&self) -> usize {
        self.newer.buckets()
    }

    /// Insert a value without checking for an existing equal key.
    pub fn insert(&mut self, hcode: u64, val: T) {
        if self.newer.slots.is_empty() {
            self.newer = HTab::with_buckets(K_INITIAL_BUCKETS);
        }
        self.newer.push(Box::new(HNode {
            next: None,
            hcode,
            val,
        }));
        if self.older.is_none() {
            let load = self.newer.size / self.newer.buckets();
            if load > K_MAX_LOAD_FACTOR {
                self.start_resizing();
            }
        }
        self.help_resizing();
    }

    /// Find the value with hash `hcode` for which `eq` holds.
    pub fn lookup<F>(&mut self, hcode: u64, mut eq: F) -> Option<&mut T>
    where
        F: FnMut(&T) -> bool,
    {
        self.help_resizing();
        if let Some(slot) = self.newer.find_slot(hcode, &mut eq) {
            return slot.as_mut().map(|n| &mut n.val);
        }
        let older = self.older.as_mut()?;
        older
            .find_slot(hcode, &mut eq)
            .and_then(|slot| slot.as_mut())
            .map(|n| &mut n.val)
    }

    /// Remove and return the value with hash `hcode` for which `eq` holds.
    pub fn pop<F>(&mut self, hcode: u64, mut eq: F) -> Option<T>
    where
        F: FnMut(&T) -> bool,
    {
        self.help_resizing();
        if let Some(node) = self.newer.pop(hcode, &mut eq) {
            return Some(node.val);
        }
        let older = self.older.as_mut()?;
        let node = older.pop(hcode, &mut eq)?;
        if older.size == 0 {
            self.older = None;
        }
        Some(node.val)
    }

    /// Lazily walk every live value, live table first.
    pub fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        std::iter::once(&self.newer)
            .chain(self.older.as_ref())
            .flat_map(|t| t.slots.iter())
            .flat_map(|slot| std::iter::successors(slot.as_deref(), |n| n.next.as_deref()))
            .map(|n| &n.val)
    }

    fn start_resizing(&mut self) {
        debug_assert!(self.older.is_none());
        let doubled = HTab::with_buckets(self.newer.buckets() * 2);
        self.older = Some(std::mem::replace(&mut self.newer, doubled));
        self.migrate_pos = 0;
    }

    /// Move a bounded slice of the older table into the live one.
    fn help_resizing(&mut self) {
        let Some(older) = self.older.as_mut() else {
            return;
        };
        let mut work = 0;
        while work < K_RESIZING_WORK && older.size > 0 {
            let slot = &mut older.slots[self.migrate_pos];
            match slot.take() {
                Some(mut node) => {
                    *slot = node.next.take();
                    older.size -= 1;
                    self.newer.push(node);
                }
                None => self.migrate_pos += 1,
            }
            work += 1;
        }
        if older.size == 0 {
            self.older = None;
        }
    }
}
