//! Three-tier value cache owned by one engine.
//!
//! 1. Per-sheet snapshots of every resident stored value, loaded once per
//!    pass and patched in place for edited inputs.
//! 2. Computed formula results keyed by cell and [`OutputMode`].
//! 3. A bounded LRU of materialized ranges keyed by sheet and area.
//!
//! Reads go through [`CacheView`], which consults the tiers cheapest first.

mod range_lru;
mod view;

pub use range_lru::RangeLru;
pub use view::CacheView;

use std::hash::BuildHasherDefault;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use rustc_hash::{FxHashMap, FxHashSet, FxHasher};

use gridcalc_common::{CellAddr, CellValue, OutputMode, RangeArea, RangeData, SheetId};

use super::node::CellId;

pub type RangeKey = (SheetId, RangeArea);

type FxBuild = BuildHasherDefault<FxHasher>;

/// Typed stored values of one sheet plus its used extent.
#[derive(Debug, Default, Clone)]
pub struct SheetSnapshot {
    values: FxHashMap<CellAddr, CellValue>,
    /// Invalidated cells whose current value must come from the host.
    forgotten: FxHashSet<CellAddr>,
    max_row: u32,
    max_col: u32,
}

impl SheetSnapshot {
    pub fn from_cells(cells: Vec<(CellAddr, CellValue)>) -> Self {
        let mut snap = SheetSnapshot::default();
        snap.values.reserve(cells.len());
        for (addr, value) in cells {
            snap.set(addr, value);
        }
        snap
    }

    pub fn get(&self, addr: CellAddr) -> Option<&CellValue> {
        self.values.get(&addr)
    }

    /// Store a value; `Empty` removes the entry but keeps the extent.
    pub fn set(&mut self, addr: CellAddr, value: CellValue) {
        self.extend_to(addr);
        self.forgotten.remove(&addr);
        if value.is_empty() {
            self.values.remove(&addr);
        } else {
            self.values.insert(addr, value);
        }
    }

    /// Drop a cell's value without claiming it is empty.
    pub fn forget(&mut self, addr: CellAddr) {
        self.values.remove(&addr);
        self.forgotten.insert(addr);
    }

    pub fn is_forgotten(&self, addr: CellAddr) -> bool {
        self.forgotten.contains(&addr)
    }

    pub fn extend_to(&mut self, addr: CellAddr) {
        self.max_row = self.max_row.max(addr.row);
        self.max_col = self.max_col.max(addr.col);
    }

    /// `(max_row, max_col)`; zero on an empty sheet.
    pub fn extent(&self) -> (u32, u32) {
        (self.max_row, self.max_col)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub snapshot_sheets: usize,
    pub computed_entries: usize,
    pub range_entries: usize,
    pub range_hits: u64,
    pub range_misses: u64,
    pub range_evictions: u64,
}

pub struct CacheSubsystem {
    snapshots: RwLock<FxHashMap<SheetId, SheetSnapshot>>,
    computed: DashMap<(CellId, OutputMode), CellValue, FxBuild>,
    ranges: Mutex<RangeLru<RangeKey, Arc<RangeData>>>,
    range_hits: AtomicU64,
    range_misses: AtomicU64,
    range_evictions: AtomicU64,
}

impl CacheSubsystem {
    pub fn new(range_capacity: usize) -> Self {
        Self {
            snapshots: RwLock::new(FxHashMap::default()),
            computed: DashMap::with_hasher(FxBuild::default()),
            ranges: Mutex::new(RangeLru::new(range_capacity)),
            range_hits: AtomicU64::new(0),
            range_misses: AtomicU64::new(0),
            range_evictions: AtomicU64::new(0),
        }
    }

    /* ─────────────── snapshot tier ─────────────── */

    pub fn load_snapshot(&self, sheet: SheetId, snapshot: SheetSnapshot) {
        self.snapshots.write().insert(sheet, snapshot);
    }

    pub fn has_snapshot(&self, sheet: SheetId) -> bool {
        self.snapshots.read().contains_key(&sheet)
    }

    /// `Some(Empty)` for a cell absent from a loaded snapshot; `None` when
    /// the sheet has no snapshot or the cell was invalidated.
    pub fn snapshot_value(&self, cell: CellId) -> Option<CellValue> {
        let snaps = self.snapshots.read();
        let snap = snaps.get(&cell.sheet)?;
        if snap.is_forgotten(cell.addr) {
            return None;
        }
        Some(snap.get(cell.addr).cloned().unwrap_or_default())
    }

    pub fn extent(&self, sheet: SheetId) -> Option<(u32, u32)> {
        self.snapshots.read().get(&sheet).map(SheetSnapshot::extent)
    }

    /// Grow a sheet's extent to cover `addrs` (formula cells with no stored
    /// value still bound whole-column reads).
    pub fn extend_extent(&self, sheet: SheetId, addrs: impl IntoIterator<Item = CellAddr>) {
        let mut snaps = self.snapshots.write();
        let snap = snaps.entry(sheet).or_default();
        for addr in addrs {
            snap.extend_to(addr);
        }
    }

    /// Record an edited input: patch the snapshot and drop any computed
    /// entry the cell had.
    pub fn set_input(&self, cell: CellId, value: CellValue) {
        self.snapshots
            .write()
            .entry(cell.sheet)
            .or_default()
            .set(cell.addr, value);
        self.computed.remove(&(cell, OutputMode::Raw));
        self.computed.remove(&(cell, OutputMode::Display));
    }

    /* ─────────────── computed tier ─────────────── */

    pub fn computed(&self, cell: CellId, mode: OutputMode) -> Option<CellValue> {
        self.computed.get(&(cell, mode)).map(|v| v.value().clone())
    }

    /// Store a raw result, returning the previous raw result. Any display
    /// rendering of the old value is dropped.
    pub fn store_computed(&self, cell: CellId, value: CellValue) -> Option<CellValue> {
        self.computed.remove(&(cell, OutputMode::Display));
        self.computed.insert((cell, OutputMode::Raw), value)
    }

    /// Display rendering of a computed result, rendered once and cached.
    pub fn display_value(&self, cell: CellId) -> Option<CellValue> {
        if let Some(v) = self.computed.get(&(cell, OutputMode::Display)) {
            return Some(v.value().clone());
        }
        let rendered = self.computed(cell, OutputMode::Raw)?.render(OutputMode::Display);
        self.computed
            .insert((cell, OutputMode::Display), rendered.clone());
        Some(rendered)
    }

    pub fn retain_computed(&self, mut keep: impl FnMut(CellId) -> bool) {
        self.computed.retain(|(cell, _), _| keep(*cell));
    }

    /* ─────────────── range tier ─────────────── */

    pub fn range(&self, key: &RangeKey) -> Option<Arc<RangeData>> {
        let hit = self.ranges.lock().get(key).cloned();
        match hit {
            Some(_) => self.range_hits.fetch_add(1, Ordering::Relaxed),
            None => self.range_misses.fetch_add(1, Ordering::Relaxed),
        };
        hit
    }

    pub fn insert_range(&self, key: RangeKey, data: Arc<RangeData>) {
        if self.ranges.lock().insert(key, data).is_some() {
            self.range_evictions.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn contains_range(&self, key: &RangeKey) -> bool {
        self.ranges.lock().contains(key)
    }

    /// Drop range entries overlapping any of `cells`. Returns the number of
    /// entries removed.
    pub fn invalidate_ranges_touching(&self, cells: &[CellId]) -> usize {
        if cells.is_empty() {
            return 0;
        }
        let mut by_column: FxHashMap<(SheetId, u32), Vec<u32>> = FxHashMap::default();
        for c in cells {
            by_column
                .entry((c.sheet, c.addr.col))
                .or_default()
                .push(c.addr.row);
        }
        let mut cols_by_sheet: FxHashMap<SheetId, Vec<u32>> = FxHashMap::default();
        for &(sheet, col) in by_column.keys() {
            cols_by_sheet.entry(sheet).or_default().push(col);
        }

        self.ranges.lock().retain(|(sheet, area)| {
            let Some(cols) = cols_by_sheet.get(sheet) else {
                return true;
            };
            let touched = cols
                .iter()
                .filter(|&&col| col >= area.start_col && col <= area.end_col)
                .any(|&col| {
                    by_column[&(*sheet, col)]
                        .iter()
                        .any(|&row| row >= area.start_row && row <= area.end_row)
                });
            !touched
        })
    }

    /// Drop range entries intersecting whole columns of `sheet`.
    pub fn invalidate_columns(&self, sheet: SheetId, cols: &[u32]) -> usize {
        self.ranges.lock().retain(|(s, area)| {
            *s != sheet
                || !cols
                    .iter()
                    .any(|&c| c >= area.start_col && c <= area.end_col)
        })
    }

    pub fn clear_ranges(&self) {
        self.ranges.lock().clear();
    }

    /* ─────────────── invalidation ─────────────── */

    /// Fine-grained: forget one cell in every tier.
    pub fn invalidate_cell(&self, cell: CellId) {
        self.invalidate_cells(std::slice::from_ref(&cell));
    }

    /// Fine-grained: forget many cells with one range sweep.
    pub fn invalidate_cells(&self, cells: &[CellId]) {
        {
            let mut snaps = self.snapshots.write();
            for c in cells {
                if let Some(snap) = snaps.get_mut(&c.sheet) {
                    snap.forget(c.addr);
                }
            }
        }
        for c in cells {
            self.computed.remove(&(*c, OutputMode::Raw));
            self.computed.remove(&(*c, OutputMode::Display));
        }
        self.invalidate_ranges_touching(cells);
    }

    /// Coarse: forget everything cached for `sheet`.
    pub fn invalidate_sheet(&self, sheet: SheetId) {
        self.snapshots.write().remove(&sheet);
        self.computed.retain(|(cell, _), _| cell.sheet != sheet);
        self.ranges.lock().retain(|(s, _)| *s != sheet);
    }

    pub fn clear(&self) {
        self.snapshots.write().clear();
        self.computed.clear();
        self.ranges.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            snapshot_sheets: self.snapshots.read().len(),
            computed_entries: self.computed.len(),
            range_entries: self.ranges.lock().len(),
            range_hits: self.range_hits.load(Ordering::Relaxed),
            range_misses: self.range_misses.load(Ordering::Relaxed),
            range_evictions: self.range_evictions.load(Ordering::Relaxed),
        }
    }
}
