// # Storage Module
//
// The storage-engine contract the planner compiles against: temp-table
// creation for materialising operators and the scan-cost hook the
// materialisation cost model consults. The in-memory heap engine is the
// default implementation and the one the tests run on.

use crate::common::catalog::{Catalog, Column, KeyInfo, KeyPart, Table};
use crate::common::TableId;
use crate::error::Result;
use crate::optimizer::access_path::DedupReason;

/// Request to create a temporary table for a materialising operator.
#[derive(Debug, Clone)]
pub struct TempTableSpec {
    pub name: String,
    pub column_names: Vec<String>,
    pub dedup_reason: DedupReason,
    pub estimated_rows: f64,
    pub row_width: u32,
}

/// The slice of the storage engine the planner needs.
pub trait StorageEngine {
    /// Create a temp table and register it in the catalog. A
    /// deduplicating request also gets a hash key over all columns.
    fn create_temp_table(&self, catalog: &mut Catalog, spec: &TempTableSpec) -> Result<TableId>;

    /// Cost of scanning the given (temp) table once, if the engine can
    /// estimate it.
    fn scan_cost(&self, table: &Table) -> Option<f64>;
}

/// In-memory heap engine.
#[derive(Debug, Default)]
pub struct HeapEngine;

impl HeapEngine {
    pub fn new() -> Self {
        Self
    }
}

/// Cost per row of scanning an in-memory temp table.
const HEAP_SCAN_ROW_COST: f64 = 0.1;

impl StorageEngine for HeapEngine {
    fn create_temp_table(&self, catalog: &mut Catalog, spec: &TempTableSpec) -> Result<TableId> {
        let id = catalog.len() as TableId;
        let mut table = Table::new(id, spec.name.clone());
        table.is_temp = true;
        table.columns = spec.column_names.iter().map(Column::new).collect();
        table.stats.records = spec.estimated_rows.max(0.0);
        table.record_buffer_length = spec.row_width.max(8);
        if spec.dedup_reason != DedupReason::None {
            let parts: Vec<KeyPart> = (0..spec.column_names.len())
                .map(|i| KeyPart {
                    field: i as u32,
                    length: 8,
                })
                .collect();
            let mut key = KeyInfo::new("<auto_distinct_key>", parts);
            key.unique = true;
            key.hash_dedup = true;
            for part in &key.parts {
                table.columns[part.field as usize].part_of_key |= 1;
            }
            table.key_info.push(key);
        }
        Ok(catalog.add(table))
    }

    fn scan_cost(&self, table: &Table) -> Option<f64> {
        Some(table.stats.records.max(0.0) * HEAP_SCAN_ROW_COST)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_temp_table_plain() {
        let mut catalog = Catalog::new();
        let engine = HeapEngine::new();
        let spec = TempTableSpec {
            name: "<temporary>".to_string(),
            column_names: vec!["a".to_string(), "b".to_string()],
            dedup_reason: DedupReason::None,
            estimated_rows: 100.0,
            row_width: 16,
        };
        let id = engine.create_temp_table(&mut catalog, &spec).unwrap();
        let table = catalog.table(id);
        assert!(table.is_temp);
        assert_eq!(table.columns.len(), 2);
        assert!(table.key_info.is_empty());
    }

    #[test]
    fn test_dedup_temp_table_gets_hash_key() {
        let mut catalog = Catalog::new();
        let engine = HeapEngine::new();
        let spec = TempTableSpec {
            name: "<union temporary>".to_string(),
            column_names: vec!["a".to_string()],
            dedup_reason: DedupReason::ForUnion,
            estimated_rows: 10.0,
            row_width: 8,
        };
        let id = engine.create_temp_table(&mut catalog, &spec).unwrap();
        let table = catalog.table(id);
        assert_eq!(table.key_info.len(), 1);
        assert!(table.key_info[0].hash_dedup);
        assert!(table.key_info[0].unique);
    }

    #[test]
    fn test_scan_cost_scales_with_rows() {
        let engine = HeapEngine::new();
        let mut table = Table::new(0, "t");
        table.stats.records = 50.0;
        assert_eq!(engine.scan_cost(&table), Some(5.0));
    }
}
