use crate::common::{HeapNo, IndexId, PageNo, SpaceId};
use crate::record::{RecField, Record};

/// Which record of several with the same hashed prefix is indexed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashSide {
    /// The leftmost record of an equal-prefix run
    Left,
    /// The rightmost record of an equal-prefix run
    Right,
}

/// Prefix parameters a page was hashed under
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageHashState {
    pub n_fields: usize,
    pub n_bytes: usize,
    pub side: HashSide,
}

/// An index leaf page: ordered records with stable heap numbers.
///
/// The heap number of a record never changes and is never reused, so
/// hash-index entries can address records across unrelated inserts and
/// deletes on the same page. Every record mutation bumps the modify
/// clock; hashed-state changes do not.
#[derive(Debug)]
pub struct Page {
    pub space: SpaceId,
    pub page_no: PageNo,
    pub index_id: IndexId,
    records: Vec<Record>,
    next_heap_no: HeapNo,
    modify_clock: u64,
    hash_state: Option<PageHashState>,
}

impl Page {
    pub fn new(space: SpaceId, page_no: PageNo, index_id: IndexId) -> Self {
        Self {
            space,
            page_no,
            index_id,
            records: Vec::new(),
            next_heap_no: 0,
            modify_clock: 0,
            hash_state: None,
        }
    }

    /// Records in key order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn n_records(&self) -> usize {
        self.records.len()
    }

    pub fn modify_clock(&self) -> u64 {
        self.modify_clock
    }

    pub fn hash_state(&self) -> Option<PageHashState> {
        self.hash_state
    }

    pub fn is_hashed(&self) -> bool {
        self.hash_state.is_some()
    }

    pub fn set_hash_state(&mut self, state: PageHashState) {
        self.hash_state = Some(state);
    }

    pub fn clear_hash_state(&mut self) {
        self.hash_state = None;
    }

    pub fn record_by_heap_no(&self, heap_no: HeapNo) -> Option<&Record> {
        self.records.iter().find(|r| r.heap_no == heap_no)
    }

    /// Key-order position of the record with the given heap number.
    pub fn position_of(&self, heap_no: HeapNo) -> Option<usize> {
        self.records.iter().position(|r| r.heap_no == heap_no)
    }

    /// Record immediately before the given one in key order.
    pub fn prev_record(&self, heap_no: HeapNo) -> Option<&Record> {
        let pos = self.position_of(heap_no)?;
        if pos == 0 {
            None
        } else {
            self.records.get(pos - 1)
        }
    }

    /// Record immediately after the given one in key order.
    pub fn next_record(&self, heap_no: HeapNo) -> Option<&Record> {
        let pos = self.position_of(heap_no)?;
        self.records.get(pos + 1)
    }

    /// Append a record at the end of the key order.
    pub fn append_record(&mut self, fields: Vec<RecField>) -> HeapNo {
        self.insert_at(self.records.len(), fields)
    }

    /// Insert a record at a key-order position. Bumps the modify clock.
    pub fn insert_at(&mut self, pos: usize, fields: Vec<RecField>) -> HeapNo {
        let heap_no = self.next_heap_no;
        self.next_heap_no += 1;
        self.records.insert(pos.min(self.records.len()), Record::new(heap_no, fields));
        self.modify_clock += 1;
        heap_no
    }

    /// Insert a record directly after `prev` in key order, or first if
    /// `prev` is None. Bumps the modify clock.
    pub fn insert_after(&mut self, prev: Option<HeapNo>, fields: Vec<RecField>) -> Option<HeapNo> {
        let pos = match prev {
            None => 0,
            Some(h) => self.position_of(h)? + 1,
        };
        Some(self.insert_at(pos, fields))
    }

    /// Remove a record. Bumps the modify clock. The heap number is not
    /// reused.
    pub fn delete_record(&mut self, heap_no: HeapNo) -> Option<Record> {
        let pos = self.position_of(heap_no)?;
        self.modify_clock += 1;
        Some(self.records.remove(pos))
    }

    /// Remove every record, e.g. after the records were moved to another
    /// page during a split. Bumps the modify clock.
    pub fn take_records(&mut self) -> Vec<Record> {
        self.modify_clock += 1;
        std::mem::take(&mut self.records)
    }
}
