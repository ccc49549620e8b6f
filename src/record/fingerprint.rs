// Record-prefix fingerprint.
//
// The fold of a record under a prefix spec `(n_fields, n_bytes)` combines
// the tree id, the weight bytes of the first `n_fields` complete fields,
// and the first `n_bytes` weight bytes of the following field. xxh3 gives
// the avalanche quality the hash chains need; the seed is the tree id, so
// identical prefixes in different indexes land in different chains.

use xxhash_rust::xxh3::Xxh3;

use crate::common::{IndexId, Value};
use crate::record::{field_weight_bytes, FieldType, RecField, Tuple};

/// Marker fed to the hasher before each field so that field boundaries
/// and NULLs cannot alias each other.
const FIELD_PRESENT: u8 = 0x01;
const FIELD_NULL: u8 = 0x00;

struct Folder {
    hasher: Xxh3,
}

impl Folder {
    fn new(tree_id: IndexId) -> Self {
        Self {
            hasher: Xxh3::with_seed(tree_id),
        }
    }

    fn add_field(&mut self, weight: Option<&[u8]>) {
        match weight {
            Some(bytes) => {
                self.hasher.update(&[FIELD_PRESENT]);
                self.hasher.update(&(bytes.len() as u64).to_le_bytes());
                self.hasher.update(bytes);
            }
            None => self.hasher.update(&[FIELD_NULL]),
        }
    }

    /// The incomplete tail: only the first `n_bytes` of the weight
    /// rendering participate.
    fn add_tail(&mut self, weight: Option<&[u8]>, n_bytes: usize) {
        match weight {
            Some(bytes) => {
                let used = bytes.len().min(n_bytes);
                self.hasher.update(&[FIELD_PRESENT]);
                self.hasher.update(&(used as u64).to_le_bytes());
                self.hasher.update(&bytes[..used]);
            }
            None => self.hasher.update(&[FIELD_NULL]),
        }
    }

    fn finish(self) -> u64 {
        self.hasher.digest()
    }
}

fn fold_weights<'a, I>(fields: I, types: &[FieldType], n_fields: usize, n_bytes: usize, tree_id: IndexId) -> u64
where
    I: Iterator<Item = &'a Value>,
{
    let mut folder = Folder::new(tree_id);
    for (i, value) in fields.enumerate() {
        let ftype = types.get(i).copied().unwrap_or(FieldType::Binary);
        let weight = field_weight_bytes(value, ftype);
        if i < n_fields {
            folder.add_field(weight.as_deref());
        } else if i == n_fields && n_bytes > 0 {
            folder.add_tail(weight.as_deref(), n_bytes);
            break;
        } else {
            break;
        }
    }
    folder.finish()
}

/// Fingerprint of a record prefix.
pub fn fold_record(
    fields: &[RecField],
    types: &[FieldType],
    n_fields: usize,
    n_bytes: usize,
    tree_id: IndexId,
) -> u64 {
    fold_weights(
        fields.iter().map(|f| &f.value),
        types,
        n_fields,
        n_bytes,
        tree_id,
    )
}

/// Fingerprint of a search tuple prefix. Agrees with `fold_record` for
/// any record the tuple compares equal to under the same prefix spec.
pub fn fold_tuple(
    tuple: &Tuple,
    types: &[FieldType],
    n_fields: usize,
    n_bytes: usize,
    tree_id: IndexId,
) -> u64 {
    fold_weights(tuple.fields.iter(), types, n_fields, n_bytes, tree_id)
}

/// True if the tuple has enough fields to compute a fold under the given
/// prefix spec.
pub fn tuple_covers_prefix(tuple: &Tuple, n_fields: usize, n_bytes: usize) -> bool {
    if n_bytes > 0 {
        tuple.fields.len() > n_fields
    } else {
        tuple.fields.len() >= n_fields
    }
}
