use dp_query_types::{Aggregate, Instant, PvName, SampledBlock, SupportedType, TableConfig, TableError, Value};
use indexmap::IndexMap;

/// The read surface both table flavors expose (§4.7). Cell/column accessors
/// return owned values rather than borrowed slices so a single trait object
/// can serve either a one-block `StaticTable` or a many-block `LazyTable`
/// without exposing either's internal storage shape.
pub trait Table: Send + Sync + std::fmt::Debug {
    fn row_count(&self) -> usize;
    fn column_count(&self) -> usize;
    fn column_names(&self) -> Vec<PvName>;
    fn timestamps(&self) -> Vec<Instant>;
    fn has_column(&self, name: &PvName) -> bool;
    fn column_type(&self, name: &PvName) -> Option<SupportedType>;
    fn column_by_index(&self, col: usize) -> Option<Vec<Value>>;
    fn column_by_name(&self, name: &PvName) -> Option<Vec<Value>>;
}

fn pv_union(blocks: &[SampledBlock]) -> IndexMap<PvName, SupportedType> {
    let mut union = IndexMap::new();
    for block in blocks {
        for name in block.column_names() {
            union
                .entry(name.clone())
                .or_insert_with(|| block.column_type(name).expect("column_names implies column_type"));
        }
    }
    union
}

/// One contiguous `N_total x M_total` matrix with every block's rows
/// concatenated in order and every column extended with the absent
/// sentinel for blocks that didn't carry it (§4.7).
#[derive(Debug)]
pub struct StaticTable {
    pv_order: IndexMap<PvName, SupportedType>,
    timestamps: Vec<Instant>,
    // row-major: values[row][col]
    values: Vec<Vec<Value>>,
}

impl StaticTable {
    pub fn from_aggregate(aggregate: &Aggregate) -> Self {
        let pv_order = pv_union(aggregate.blocks());
        let mut timestamps = Vec::new();
        let mut values = Vec::new();

        for block in aggregate.blocks() {
            for row in 0..block.row_count() {
                timestamps.push(block.timestamps()[row]);
                let mut extended_row = Vec::with_capacity(pv_order.len());
                for name in pv_order.keys() {
                    let cell = match block.column_index(name) {
                        Some(col) => block.cell(row, col).expect("row/col within bounds").clone(),
                        None => Value::Absent,
                    };
                    extended_row.push(cell);
                }
                values.push(extended_row);
            }
        }

        Self {
            pv_order,
            timestamps,
            values,
        }
    }
}

impl Table for StaticTable {
    fn row_count(&self) -> usize {
        self.timestamps.len()
    }

    fn column_count(&self) -> usize {
        self.pv_order.len()
    }

    fn column_names(&self) -> Vec<PvName> {
        self.pv_order.keys().cloned().collect()
    }

    fn timestamps(&self) -> Vec<Instant> {
        self.timestamps.clone()
    }

    fn has_column(&self, name: &PvName) -> bool {
        self.pv_order.contains_key(name)
    }

    fn column_type(&self, name: &PvName) -> Option<SupportedType> {
        self.pv_order.get(name).cloned()
    }

    fn column_by_index(&self, col: usize) -> Option<Vec<Value>> {
        if col >= self.column_count() {
            return None;
        }
        Some(self.values.iter().map(|row| row[col].clone()).collect())
    }

    fn column_by_name(&self, name: &PvName) -> Option<Vec<Value>> {
        let col = self.pv_order.get_index_of(name)?;
        self.column_by_index(col)
    }
}

/// Keeps blocks separate; row/column access routes to the owning block by
/// binary search over block start times, synthesizing absent columns for
/// blocks that don't carry a given PV (§4.7).
#[derive(Debug)]
pub struct LazyTable {
    pv_order: IndexMap<PvName, SupportedType>,
    blocks: Vec<SampledBlock>,
}

impl LazyTable {
    pub fn from_aggregate(aggregate: Aggregate) -> Self {
        let pv_order = pv_union(aggregate.blocks());
        let blocks = aggregate.blocks().to_vec();
        Self { pv_order, blocks }
    }

    /// Locates the block (if any) whose time range contains `ts`, via
    /// binary search over block start times.
    pub fn block_for_instant(&self, ts: Instant) -> Option<&SampledBlock> {
        let idx = self
            .blocks
            .binary_search_by(|block| block.timestamps()[0].cmp(&ts))
            .unwrap_or_else(|insertion_point| insertion_point.saturating_sub(1));
        let block = self.blocks.get(idx)?;
        block.time_range()?.contains_point(ts).then_some(block)
    }
}

impl Table for LazyTable {
    fn row_count(&self) -> usize {
        self.blocks.iter().map(SampledBlock::row_count).sum()
    }

    fn column_count(&self) -> usize {
        self.pv_order.len()
    }

    fn column_names(&self) -> Vec<PvName> {
        self.pv_order.keys().cloned().collect()
    }

    fn timestamps(&self) -> Vec<Instant> {
        self.blocks.iter().flat_map(|b| b.timestamps().iter().copied()).collect()
    }

    fn has_column(&self, name: &PvName) -> bool {
        self.pv_order.contains_key(name)
    }

    fn column_type(&self, name: &PvName) -> Option<SupportedType> {
        self.pv_order.get(name).cloned()
    }

    fn column_by_index(&self, col: usize) -> Option<Vec<Value>> {
        let name = self.pv_order.get_index(col)?.0;
        self.column_by_name(name)
    }

    fn column_by_name(&self, name: &PvName) -> Option<Vec<Value>> {
        if !self.pv_order.contains_key(name) {
            return None;
        }
        Some(
            self.blocks
                .iter()
                .flat_map(|block| match block.column_by_name(name) {
                    Some(values) => values.into_iter().cloned().collect::<Vec<_>>(),
                    None => vec![Value::Absent; block.row_count()],
                })
                .collect(),
        )
    }
}

/// Chooses Static if the default favors it and the aggregate's total size
/// fits any configured cap; otherwise falls back to Lazy if enabled; else
/// fails with `NotRepresentable` (§4.7's selection policy).
pub fn select_table(aggregate: Aggregate, config: &TableConfig) -> Result<Box<dyn Table>, TableError> {
    let total_cells = aggregate.blocks().iter().map(|b| b.row_count() * b.column_count()).sum::<usize>();
    let fits_static_cap = !config.static_has_max_size || total_cells <= config.static_max_size;

    if config.static_is_default && fits_static_cap {
        Ok(Box::new(StaticTable::from_aggregate(&aggregate)))
    } else if config.dynamic_enable {
        Ok(Box::new(LazyTable::from_aggregate(aggregate)))
    } else {
        Err(TableError::NotRepresentable)
    }
}

#[cfg(test)]
mod tests {
    use indexmap::IndexMap as Im;
    use pretty_assertions::assert_eq;

    use super::*;

    fn ts(n: i128) -> Instant {
        Instant::from_nanos(n)
    }

    fn pv(name: &str) -> PvName {
        PvName::new(name).unwrap()
    }

    fn block(start: i128, x: Option<i64>, y: Option<i64>) -> SampledBlock {
        let mut names = Vec::new();
        let mut types = Im::new();
        let mut row = Vec::new();
        if let Some(v) = x {
            names.push(pv("X"));
            types.insert(pv("X"), SupportedType::Int64);
            row.push(Value::Int64(v));
        }
        if let Some(v) = y {
            names.push(pv("Y"));
            types.insert(pv("Y"), SupportedType::Int64);
            row.push(Value::Int64(v));
        }
        SampledBlock::new(vec![ts(start)], names, types, vec![row])
    }

    fn two_block_aggregate() -> Aggregate {
        let mut agg = Aggregate::new();
        agg.push(block(0, Some(1), None)).unwrap();
        agg.push(block(1, None, Some(2))).unwrap();
        agg
    }

    #[test]
    fn static_table_extends_missing_columns_with_absent() {
        let table = StaticTable::from_aggregate(&two_block_aggregate());
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_count(), 2);
        assert_eq!(table.column_by_name(&pv("X")).unwrap(), vec![Value::Int64(1), Value::Absent]);
        assert_eq!(table.column_by_name(&pv("Y")).unwrap(), vec![Value::Absent, Value::Int64(2)]);
    }

    #[test]
    fn lazy_table_synthesizes_absent_columns_on_demand() {
        let table = LazyTable::from_aggregate(two_block_aggregate());
        assert_eq!(table.row_count(), 2);
        assert_eq!(table.column_by_name(&pv("X")).unwrap(), vec![Value::Int64(1), Value::Absent]);
    }

    #[test]
    fn lazy_table_locates_block_by_binary_search() {
        let table = LazyTable::from_aggregate(two_block_aggregate());
        assert!(table.block_for_instant(ts(0)).is_some());
        assert!(table.block_for_instant(ts(1)).is_some());
        assert!(table.block_for_instant(ts(5)).is_none());
    }

    #[test]
    fn selection_prefers_static_by_default() {
        let config = TableConfig::default();
        let table = select_table(two_block_aggregate(), &config).unwrap();
        assert_eq!(table.row_count(), 2);
    }

    #[test]
    fn selection_falls_back_to_lazy_when_static_cap_exceeded() {
        let config = TableConfig {
            static_is_default: true,
            static_has_max_size: true,
            static_max_size: 1,
            dynamic_enable: true,
        };
        let table = select_table(two_block_aggregate(), &config).unwrap();
        // Both flavors satisfy the same `Table` surface; this just exercises
        // the fallback branch without downcasting to a concrete type.
        assert_eq!(table.column_count(), 2);
    }

    #[test]
    fn selection_fails_when_neither_flavor_is_available() {
        let config = TableConfig {
            static_is_default: false,
            static_has_max_size: false,
            static_max_size: 0,
            dynamic_enable: false,
        };
        assert!(matches!(select_table(two_block_aggregate(), &config), Err(TableError::NotRepresentable)));
    }
}
