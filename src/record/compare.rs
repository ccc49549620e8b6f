// Prefix comparison of records and search tuples.
//
// The comparator orders by declared field type through the same weight
// rendering the fingerprint hashes, so equal prefixes always fold equal.
// Fields that cannot be ordered (mismatched kinds, externally stored
// values whose stored prefixes do not overlap conclusively) short-circuit
// to Equal and raise the `incomparable` flag; the caller decides what
// that means for its operation.

use std::cmp::Ordering;

use crate::common::Value;
use crate::record::{field_weight_bytes, FieldType, RecField, Record, Tuple};

/// Outcome of a prefix comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrefixOrdering {
    pub ordering: Ordering,
    /// True if some field pair could not be ordered; `ordering` is then
    /// Equal by convention and must not be trusted as a total order.
    pub incomparable: bool,
    /// Number of leading fields that compared fully equal
    pub matched_fields: usize,
    /// Number of equal weight bytes within the first unequal field
    pub matched_bytes: usize,
}

impl PrefixOrdering {
    fn decided(self) -> bool {
        self.ordering != Ordering::Equal || self.incomparable
    }
}

struct FieldCmp {
    ordering: Ordering,
    incomparable: bool,
    matched_bytes: usize,
}

fn common_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b.iter()).take_while(|(x, y)| x == y).count()
}

fn cmp_weights(a: &[u8], b: &[u8]) -> FieldCmp {
    FieldCmp {
        ordering: a.cmp(b),
        incomparable: false,
        matched_bytes: common_prefix_len(a, b),
    }
}

/// Compare two externally stored fields by their locally stored prefixes.
/// If one stored prefix is a strict prefix of the other, the order of the
/// full values is unknowable from what is stored.
fn cmp_external(a: &[u8], b: &[u8]) -> FieldCmp {
    let common = common_prefix_len(a, b);
    if common == a.len() && common == b.len() {
        return FieldCmp {
            ordering: Ordering::Equal,
            incomparable: false,
            matched_bytes: common,
        };
    }
    if common == a.len() || common == b.len() {
        return FieldCmp {
            ordering: Ordering::Equal,
            incomparable: true,
            matched_bytes: common,
        };
    }
    FieldCmp {
        ordering: a[common].cmp(&b[common]),
        incomparable: false,
        matched_bytes: common,
    }
}

fn value_kind(v: &Value) -> u8 {
    match v {
        Value::Null => 0,
        Value::Boolean(_) => 1,
        Value::Integer(_) => 2,
        Value::Float(_) => 3,
        Value::String(_) => 4,
        Value::Bytes(_) => 5,
    }
}

fn cmp_field(a: &RecField, b: &RecField, ftype: FieldType) -> FieldCmp {
    // NULL sorts before every non-NULL value.
    match (a.value.is_null(), b.value.is_null()) {
        (true, true) => {
            return FieldCmp {
                ordering: Ordering::Equal,
                incomparable: false,
                matched_bytes: 0,
            }
        }
        (true, false) => {
            return FieldCmp {
                ordering: Ordering::Less,
                incomparable: false,
                matched_bytes: 0,
            }
        }
        (false, true) => {
            return FieldCmp {
                ordering: Ordering::Greater,
                incomparable: false,
                matched_bytes: 0,
            }
        }
        (false, false) => {}
    }

    if a.externally_stored || b.externally_stored {
        let (Value::Bytes(pa), Value::Bytes(pb)) = (&a.value, &b.value) else {
            return FieldCmp {
                ordering: Ordering::Equal,
                incomparable: true,
                matched_bytes: 0,
            };
        };
        return cmp_external(pa, pb);
    }

    if value_kind(&a.value) != value_kind(&b.value) {
        return FieldCmp {
            ordering: Ordering::Equal,
            incomparable: true,
            matched_bytes: 0,
        };
    }

    let wa = field_weight_bytes(&a.value, ftype);
    let wb = field_weight_bytes(&b.value, ftype);
    match (wa, wb) {
        (Some(wa), Some(wb)) => cmp_weights(&wa, &wb),
        _ => FieldCmp {
            ordering: Ordering::Equal,
            incomparable: true,
            matched_bytes: 0,
        },
    }
}

fn cmp_field_slices(
    a: &[RecField],
    b: &[RecField],
    types: &[FieldType],
    n_fields: usize,
    n_bytes: usize,
) -> PrefixOrdering {
    let mut out = PrefixOrdering {
        ordering: Ordering::Equal,
        incomparable: false,
        matched_fields: 0,
        matched_bytes: 0,
    };

    for i in 0..n_fields {
        match (a.get(i), b.get(i)) {
            (Some(fa), Some(fb)) => {
                let ftype = types.get(i).copied().unwrap_or(FieldType::Binary);
                let cmp = cmp_field(fa, fb, ftype);
                if cmp.incomparable {
                    out.incomparable = true;
                    return out;
                }
                if cmp.ordering != Ordering::Equal {
                    out.ordering = cmp.ordering;
                    out.matched_bytes = cmp.matched_bytes;
                    return out;
                }
                out.matched_fields += 1;
            }
            (None, None) => return out,
            (None, Some(_)) => {
                out.ordering = Ordering::Less;
                return out;
            }
            (Some(_), None) => {
                out.ordering = Ordering::Greater;
                return out;
            }
        }
    }

    if n_bytes > 0 {
        if let (Some(fa), Some(fb)) = (a.get(n_fields), b.get(n_fields)) {
            let ftype = types.get(n_fields).copied().unwrap_or(FieldType::Binary);
            let cmp = cmp_field(fa, fb, ftype);
            if cmp.incomparable {
                out.incomparable = true;
                return out;
            }
            // Only the first n_bytes weight bytes participate; a
            // difference beyond them does not order the prefix.
            if cmp.ordering != Ordering::Equal && cmp.matched_bytes < n_bytes {
                out.ordering = cmp.ordering;
            }
            out.matched_bytes = cmp.matched_bytes.min(n_bytes);
        }
    }
    out
}

/// Total-order two records over the prefix `(n_fields, n_bytes)`.
pub fn cmp_records(
    a: &Record,
    b: &Record,
    types: &[FieldType],
    n_fields: usize,
    n_bytes: usize,
) -> PrefixOrdering {
    cmp_field_slices(&a.fields, &b.fields, types, n_fields, n_bytes)
}

/// Compare a search tuple against a record over the whole tuple. A tuple
/// that is a prefix of the record compares Equal; `matched_fields` and
/// `matched_bytes` report how far the match reached, which is what the
/// cursor's `up_match` / `low_match` are built from.
pub fn cmp_tuple_record(tuple: &Tuple, rec: &Record, types: &[FieldType]) -> PrefixOrdering {
    let tuple_fields: Vec<RecField> = tuple.fields.iter().cloned().map(RecField::new).collect();
    let n = tuple_fields.len();
    let mut out = cmp_field_slices(&tuple_fields, &rec.fields[..rec.fields.len().min(n)], types, n, 0);
    if !out.decided() && rec.fields.len() >= n {
        // Tuple exhausted against a longer or equal record: prefix match.
        out.ordering = Ordering::Equal;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::fingerprint::fold_record;

    const TYPES: &[FieldType] = &[FieldType::Integer, FieldType::Text, FieldType::Binary];

    fn rec(values: Vec<Value>) -> Record {
        Record::from_values(0, values)
    }

    #[test]
    fn test_integer_order() {
        let a = rec(vec![Value::Integer(-3)]);
        let b = rec(vec![Value::Integer(10)]);
        assert_eq!(cmp_records(&a, &b, TYPES, 1, 0).ordering, Ordering::Less);
        assert_eq!(cmp_records(&b, &a, TYPES, 1, 0).ordering, Ordering::Greater);
    }

    #[test]
    fn test_null_sorts_first() {
        let a = rec(vec![Value::Null]);
        let b = rec(vec![Value::Integer(0)]);
        assert_eq!(cmp_records(&a, &b, TYPES, 1, 0).ordering, Ordering::Less);
        assert_eq!(cmp_records(&a, &a, TYPES, 1, 0).ordering, Ordering::Equal);
    }

    #[test]
    fn test_matched_fields_and_bytes() {
        let a = rec(vec![
            Value::Integer(1),
            Value::String("abc".into()),
            Value::Bytes(vec![1, 2, 3]),
        ]);
        let b = rec(vec![
            Value::Integer(1),
            Value::String("abc".into()),
            Value::Bytes(vec![1, 2, 9]),
        ]);
        let out = cmp_records(&a, &b, TYPES, 3, 0);
        assert_eq!(out.ordering, Ordering::Less);
        assert_eq!(out.matched_fields, 2);
        assert_eq!(out.matched_bytes, 2);
    }

    #[test]
    fn test_partial_byte_prefix_ignores_later_bytes() {
        let a = rec(vec![Value::Integer(1), Value::String("ab".into()), Value::Bytes(vec![5, 6])]);
        let b = rec(vec![Value::Integer(1), Value::String("ab".into()), Value::Bytes(vec![5, 7])]);
        // Divergence is at tail byte 1, beyond a 1-byte prefix.
        let out = cmp_records(&a, &b, TYPES, 2, 1);
        assert_eq!(out.ordering, Ordering::Equal);
        assert!(!out.incomparable);
    }

    #[test]
    fn test_incomparable_kind_mismatch() {
        let a = rec(vec![Value::Integer(1)]);
        let b = rec(vec![Value::String("1".into())]);
        let out = cmp_records(&a, &b, TYPES, 1, 0);
        assert_eq!(out.ordering, Ordering::Equal);
        assert!(out.incomparable);
    }

    #[test]
    fn test_external_prefix_agreement() {
        let a = Record::new(0, vec![RecField::external(vec![1, 2, 3])]);
        let b = Record::new(1, vec![RecField::external(vec![1, 2, 3])]);
        let c = Record::new(2, vec![RecField::external(vec![1, 2])]);
        let d = Record::new(3, vec![RecField::external(vec![1, 9])]);
        assert_eq!(cmp_records(&a, &b, TYPES, 1, 0).ordering, Ordering::Equal);
        assert!(!cmp_records(&a, &b, TYPES, 1, 0).incomparable);
        // Strict prefix: order unknowable from stored bytes.
        assert!(cmp_records(&a, &c, TYPES, 1, 0).incomparable);
        // Divergence within the common stored prefix orders normally.
        assert_eq!(cmp_records(&a, &d, TYPES, 1, 0).ordering, Ordering::Less);
    }

    #[test]
    fn test_equal_prefix_implies_equal_fold() {
        let a = rec(vec![Value::Integer(7), Value::String("HeLLo".into())]);
        let b = rec(vec![Value::Integer(7), Value::String("hello".into())]);
        let out = cmp_records(&a, &b, TYPES, 2, 0);
        assert_eq!(out.ordering, Ordering::Equal);
        assert!(!out.incomparable);
        assert_eq!(
            fold_record(&a.fields, TYPES, 2, 0, 99),
            fold_record(&b.fields, TYPES, 2, 0, 99)
        );
    }

    #[test]
    fn test_tuple_prefix_compares_equal() {
        let t = Tuple::new(vec![Value::Integer(5)]);
        let r = rec(vec![Value::Integer(5), Value::String("x".into())]);
        let out = cmp_tuple_record(&t, &r, TYPES);
        assert_eq!(out.ordering, Ordering::Equal);
        assert_eq!(out.matched_fields, 1);
    }
}
