use std::sync::Arc;

use gridcalc_common::{
    CellAddr, CellError, CellReader, CellValue, OutputMode, RangeArea, RangeData, SheetId,
    WorkbookSource,
};

use super::{CacheSubsystem, SheetSnapshot};
use crate::engine::node::CellId;
use crate::engine::sheet_registry::SheetRegistry;

/// Evaluator-facing read access: computed results first, then the sheet
/// snapshot, then the host. Cheap to clone.
#[derive(Clone)]
pub struct CacheView {
    cache: Arc<CacheSubsystem>,
    source: Arc<dyn WorkbookSource>,
    registry: Arc<SheetRegistry>,
}

impl CacheView {
    pub fn new(
        cache: Arc<CacheSubsystem>,
        source: Arc<dyn WorkbookSource>,
        registry: Arc<SheetRegistry>,
    ) -> Self {
        Self {
            cache,
            source,
            registry,
        }
    }

    pub fn cache(&self) -> &CacheSubsystem {
        &self.cache
    }

    pub fn registry(&self) -> &SheetRegistry {
        &self.registry
    }

    pub fn cell_value(&self, cell: CellId) -> CellValue {
        if let Some(v) = self.cache.computed(cell, OutputMode::Raw) {
            return v;
        }
        if let Some(v) = self.cache.snapshot_value(cell) {
            return v;
        }
        self.source
            .raw_value(self.registry.name(cell.sheet), cell.addr)
    }

    /// Materialized values of `area`, clipped to the sheet's used extent,
    /// served from the range LRU when possible.
    pub fn range_values(&self, sheet: SheetId, area: RangeArea) -> Arc<RangeData> {
        let key = (sheet, area);
        if let Some(hit) = self.cache.range(&key) {
            return hit;
        }
        let data = Arc::new(self.materialize(sheet, area));
        self.cache.insert_range(key, data.clone());
        data
    }

    fn materialize(&self, sheet: SheetId, area: RangeArea) -> RangeData {
        let (max_row, max_col) = match self.cache.extent(sheet) {
            Some(extent) => extent,
            None => self.load_snapshot(sheet),
        };
        let Some(clipped) = area
            .clip_rows(max_row)
            .and_then(|a| a.clip_cols(max_col))
        else {
            return RangeData::empty(area);
        };

        let mut values = Vec::with_capacity(clipped.cell_count() as usize);
        for addr in clipped.cells() {
            values.push(self.cell_value(CellId::new(sheet, addr)));
        }
        RangeData::new(area, clipped.height(), clipped.width(), values)
    }

    /// Lazily snapshot a sheet the engine has not loaded yet.
    fn load_snapshot(&self, sheet: SheetId) -> (u32, u32) {
        let cells = self
            .source
            .cells(self.registry.name(sheet))
            .unwrap_or_default();
        let snap = SheetSnapshot::from_cells(cells);
        let extent = snap.extent();
        self.cache.load_snapshot(sheet, snap);
        extent
    }

    fn sheet_id(&self, sheet: &str) -> Result<SheetId, CellError> {
        self.registry
            .get_id(sheet)
            .ok_or_else(|| CellError::new_ref().with_message(format!("unknown sheet '{sheet}'")))
    }
}

impl CellReader for CacheView {
    fn cell(&self, sheet: &str, addr: CellAddr) -> Result<CellValue, CellError> {
        let id = self.sheet_id(sheet)?;
        Ok(self.cell_value(CellId::new(id, addr)))
    }

    fn range(&self, sheet: &str, area: RangeArea) -> Result<Arc<RangeData>, CellError> {
        let id = self.sheet_id(sheet)?;
        Ok(self.range_values(id, area))
    }
}
