// Catalog metadata consumed by the cost model and the plan finaliser.
//
// This is the contract surface of the external catalog: table statistics,
// key layout and histograms. The planner reads these; the derived-key
// synthesiser also rewrites key metadata on derived tables.

use crate::common::TableId;

/// Basic per-table statistics maintained by the storage engine
#[derive(Debug, Clone)]
pub struct TableStats {
    /// Estimated row count
    pub records: f64,
    /// Storage engine block size in bytes
    pub block_size: u32,
}

/// Single-column histogram, as exposed by the statistics subsystem
#[derive(Debug, Clone)]
pub struct Histogram {
    num_distinct: f64,
    null_fraction: f64,
}

impl Histogram {
    pub fn new(num_distinct: f64, null_fraction: f64) -> Self {
        Self {
            num_distinct,
            null_fraction,
        }
    }

    pub fn get_num_distinct_values(&self) -> f64 {
        self.num_distinct
    }

    pub fn get_null_values_fraction(&self) -> f64 {
        self.null_fraction
    }
}

/// One column of a table
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub histogram: Option<Histogram>,
    /// Bitmap of the keys in `Table::key_info` this column is part of.
    /// Rewritten when derived keys are compacted.
    pub part_of_key: u64,
}

impl Column {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            histogram: None,
            part_of_key: 0,
        }
    }

    pub fn with_histogram(mut self, histogram: Histogram) -> Self {
        self.histogram = Some(histogram);
        self
    }
}

/// One part (column reference) of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPart {
    /// Column index within the owning table
    pub field: u32,
    /// Stored length of the part in bytes
    pub length: u32,
}

/// One key (index) of a table
#[derive(Debug, Clone)]
pub struct KeyInfo {
    pub name: String,
    pub parts: Vec<KeyPart>,
    /// Total stored key length in bytes
    pub key_length: u32,
    /// `records_per_key[i]` is the average number of rows per distinct
    /// prefix of length `i + 1`. Empty when unknown.
    pub records_per_key: Vec<f64>,
    pub unique: bool,
    /// Key created to deduplicate a materialised result (UNION etc.)
    pub hash_dedup: bool,
    /// Key proposed by the derived-key synthesiser; subject to pruning
    /// after planning.
    pub synthesized: bool,
}

impl KeyInfo {
    pub fn new(name: impl Into<String>, parts: Vec<KeyPart>) -> Self {
        let key_length = parts.iter().map(|p| p.length).sum();
        Self {
            name: name.into(),
            parts,
            key_length,
            records_per_key: Vec::new(),
            unique: false,
            hash_dedup: false,
            synthesized: false,
        }
    }

    /// Rows per distinct prefix of `prefix_len` parts, if known.
    pub fn records_per_prefix(&self, prefix_len: usize) -> Option<f64> {
        if prefix_len == 0 {
            return None;
        }
        self.records_per_key.get(prefix_len - 1).copied()
    }
}

/// Table metadata
#[derive(Debug, Clone)]
pub struct Table {
    pub id: TableId,
    pub name: String,
    pub columns: Vec<Column>,
    pub stats: TableStats,
    /// Length of the server-side record buffer in bytes
    pub record_buffer_length: u32,
    /// Length of the engine's row reference (primary key image) in bytes
    pub ref_length: u32,
    pub key_info: Vec<KeyInfo>,
    /// Position of the primary key in `key_info`, if the table has one
    pub primary_key: Option<usize>,
    /// True if the primary key is the clustered index
    pub primary_key_is_clustered: bool,
    /// Bitmap of keys that cover the current read set
    pub covering_keys: u64,
    /// Number of fields in the current read set
    pub read_set_fields: u32,
    /// True for a materialised derived table (subquery or CTE)
    pub is_derived: bool,
    /// True if the derived table materialises the result of a set
    /// operation (UNION / INTERSECT / EXCEPT); such results cannot be
    /// indexed by synthesized keys.
    pub derived_from_set_operation: bool,
    /// True for temp tables created by the plan finaliser
    pub is_temp: bool,
    /// Set by the finaliser when a sort below cannot use addon fields
    /// and must carry row ids instead.
    pub force_rowid: bool,
}

impl Table {
    pub fn new(id: TableId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            columns: Vec::new(),
            stats: TableStats {
                records: 0.0,
                block_size: 16384,
            },
            record_buffer_length: 128,
            ref_length: 8,
            key_info: Vec::new(),
            primary_key: None,
            primary_key_is_clustered: false,
            covering_keys: 0,
            read_set_fields: 1,
            is_derived: false,
            derived_from_set_operation: false,
            is_temp: false,
            force_rowid: false,
        }
    }

    pub fn is_missing_primary_key(&self) -> bool {
        self.primary_key.is_none()
    }

    /// True if `key_idx` is the clustered primary key.
    pub fn is_clustered_primary_key(&self, key_idx: usize) -> bool {
        !self.is_missing_primary_key()
            && self.primary_key == Some(key_idx)
            && self.primary_key_is_clustered
    }

    pub fn is_covering_key(&self, key_idx: usize) -> bool {
        self.covering_keys & (1u64 << key_idx) != 0
    }

    pub fn histogram(&self, field: u32) -> Option<&Histogram> {
        self.columns.get(field as usize)?.histogram.as_ref()
    }
}

/// Table directory for one query compilation
#[derive(Debug, Default)]
pub struct Catalog {
    tables: Vec<Table>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a table; its id must equal its position.
    pub fn add(&mut self, table: Table) -> TableId {
        let id = self.tables.len() as TableId;
        assert_eq!(table.id, id, "table id must match catalog position");
        self.tables.push(table);
        id
    }

    pub fn table(&self, id: TableId) -> &Table {
        &self.tables[id as usize]
    }

    pub fn table_mut(&mut self, id: TableId) -> &mut Table {
        &mut self.tables[id as usize]
    }

    pub fn len(&self) -> usize {
        self.tables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_length_from_parts() {
        let key = KeyInfo::new(
            "k0",
            vec![
                KeyPart { field: 0, length: 8 },
                KeyPart { field: 1, length: 4 },
            ],
        );
        assert_eq!(key.key_length, 12);
        assert_eq!(key.records_per_prefix(1), None);
    }

    #[test]
    fn test_clustered_primary_key() {
        let mut t = Table::new(0, "t");
        t.key_info.push(KeyInfo::new("PRIMARY", vec![KeyPart { field: 0, length: 8 }]));
        assert!(!t.is_clustered_primary_key(0));
        t.primary_key = Some(0);
        t.primary_key_is_clustered = true;
        assert!(t.is_clustered_primary_key(0));
        assert!(!t.is_clustered_primary_key(1));
    }
}
