//! Version resolution shared by the scan executors, and construction of the
//! column-masked undo logs installed by the write executors.

use stratum::transaction::{UndoLink, UndoLog};
use stratum::{TupleMeta, TXN_START_ID};

use crate::errors::ExecutionError;
use crate::executor::ExecutorContext;
use crate::tuple::Tuple;
use crate::types::Schema;

/// Column positions selected by a modified-fields mask.
fn masked_attrs(mask: &[bool]) -> Vec<usize> {
    mask.iter()
        .enumerate()
        .filter_map(|(i, &m)| if m { Some(i) } else { None })
        .collect()
}

/// Replays undo logs head-to-tail over the base tuple, column-wise under
/// each log's mask. Returns `None` when the resulting version is deleted:
/// with no logs that is the base's own deletion marker, otherwise the last
/// log's.
pub fn reconstruct_tuple(
    schema: &Schema,
    base_tuple: &Tuple,
    base_meta: &TupleMeta,
    undo_logs: &[UndoLog],
) -> Result<Option<Tuple>, ExecutionError> {
    match undo_logs.last() {
        None if base_meta.is_deleted => return Ok(None),
        Some(last) if last.is_deleted => return Ok(None),
        _ => {}
    }

    let mut tuple = base_tuple.clone();
    for log in undo_logs {
        let attrs = masked_attrs(&log.modified_fields);
        if attrs.is_empty() {
            continue;
        }
        let partial_schema = schema.project(&attrs);
        let partial = Tuple::decode(&partial_schema, &log.tuple)?;
        for (slot, &column) in attrs.iter().enumerate() {
            tuple.set_value(column, partial.value(slot).clone());
        }
    }
    Ok(Some(tuple))
}

/// Resolves the version of a row visible to the context's transaction.
///
/// The base tuple answers directly when its stamp is at or below the read
/// timestamp, or names this transaction. Otherwise the undo chain is
/// walked from the head, collecting logs until one reconstructs a version
/// this transaction may see; an exhausted chain means the row is invisible.
pub fn visible_tuple(
    ctx: &ExecutorContext,
    schema: &Schema,
    rid: stratum::Rid,
    base_meta: &TupleMeta,
    base_tuple: &Tuple,
) -> Result<Option<Tuple>, ExecutionError> {
    let read_ts = ctx.txn.read_ts();
    let txn_id = ctx.txn.id();

    if base_meta.ts <= read_ts || base_meta.ts == txn_id {
        return reconstruct_tuple(schema, base_tuple, base_meta, &[]);
    }

    let mut logs = Vec::new();
    let mut link = ctx.txn_mgr.undo_link(rid);
    loop {
        let Some(current) = link.filter(UndoLink::is_valid) else {
            return Ok(None);
        };
        let Some(log) = ctx.txn_mgr.read_undo_log(current) else {
            // The owning transaction was garbage-collected; nothing below
            // this point is reachable by a live reader.
            return Ok(None);
        };
        let reaches_snapshot = log.ts <= read_ts || log.ts == txn_id;
        link = Some(log.prev_version);
        logs.push(log);
        if reaches_snapshot {
            return reconstruct_tuple(schema, base_tuple, base_meta, &logs);
        }
    }
}

/// First-updater-wins test: a row may be written unless its base stamp
/// names another live writer or a commit past this transaction's snapshot.
pub fn write_conflicts(base_meta: &TupleMeta, read_ts: u64, txn_id: u64) -> bool {
    (base_meta.ts >= TXN_START_ID || base_meta.ts > read_ts) && base_meta.ts != txn_id
}

/// Builds the undo log for the first write of a transaction to a row:
/// the pre-image of every column the write changes.
pub fn build_undo_log(
    schema: &Schema,
    old_tuple: &Tuple,
    new_tuple: &Tuple,
    base_meta: &TupleMeta,
    prev_version: Option<UndoLink>,
) -> UndoLog {
    let mut modified_fields = vec![false; schema.column_count()];
    for i in 0..schema.column_count() {
        modified_fields[i] = old_tuple.value(i) != new_tuple.value(i);
    }
    let attrs = masked_attrs(&modified_fields);
    let partial_schema = schema.project(&attrs);
    let tuple = old_tuple.project(&attrs).encode(&partial_schema);
    UndoLog {
        is_deleted: base_meta.is_deleted,
        modified_fields,
        tuple,
        ts: base_meta.ts,
        prev_version: prev_version.unwrap_or(UndoLink::INVALID),
    }
}

/// Extends a transaction's own earlier undo log for a later write to the
/// same row. The mask grows monotonically; captured pre-image values are
/// taken from the version the log already reconstructs to, so they never
/// change.
pub fn merge_undo_log(
    schema: &Schema,
    existing: &UndoLog,
    pre_image: &Tuple,
    new_tuple: &Tuple,
) -> UndoLog {
    let mut modified_fields = existing.modified_fields.clone();
    modified_fields.resize(schema.column_count(), false);
    for i in 0..schema.column_count() {
        if pre_image.value(i) != new_tuple.value(i) {
            modified_fields[i] = true;
        }
    }
    let attrs = masked_attrs(&modified_fields);
    let partial_schema = schema.project(&attrs);
    let tuple = pre_image.project(&attrs).encode(&partial_schema);
    UndoLog {
        is_deleted: existing.is_deleted,
        modified_fields,
        tuple,
        ts: existing.ts,
        prev_version: existing.prev_version,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Column, TypeId, Value};

    fn schema() -> Schema {
        Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new("b", TypeId::Integer),
            Column::new("c", TypeId::Integer),
        ])
    }

    fn row(a: i64, b: i64, c: i64) -> Tuple {
        Tuple::new(vec![
            Value::Integer(a),
            Value::Integer(b),
            Value::Integer(c),
        ])
    }

    fn log_for(schema: &Schema, mask: [bool; 3], values: &Tuple, ts: u64) -> UndoLog {
        let attrs: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(i, &m)| if m { Some(i) } else { None })
            .collect();
        let partial_schema = schema.project(&attrs);
        UndoLog {
            is_deleted: false,
            modified_fields: mask.to_vec(),
            tuple: values.project(&attrs).encode(&partial_schema),
            ts,
            prev_version: UndoLink::INVALID,
        }
    }

    #[test]
    fn base_tuple_survives_with_no_logs() {
        let schema = schema();
        let base = row(1, 2, 3);
        let meta = TupleMeta::new(1, false);
        let got = reconstruct_tuple(&schema, &base, &meta, &[]).unwrap();
        assert_eq!(got, Some(base));
    }

    #[test]
    fn deleted_base_without_logs_is_invisible() {
        let schema = schema();
        let base = row(1, 2, 3);
        let meta = TupleMeta::new(1, true);
        assert!(reconstruct_tuple(&schema, &base, &meta, &[]).unwrap().is_none());
    }

    #[test]
    fn logs_apply_head_to_tail_under_their_masks() {
        let schema = schema();
        let base = row(10, 20, 30);
        let meta = TupleMeta::new(5, false);

        // Head restores column a to 1; the older log restores b to 2.
        let head = log_for(&schema, [true, false, false], &row(1, 0, 0), 3);
        let tail = log_for(&schema, [false, true, false], &row(0, 2, 0), 1);
        let got = reconstruct_tuple(&schema, &base, &meta, &[head, tail])
            .unwrap()
            .unwrap();
        assert_eq!(got, row(1, 2, 30));
    }

    #[test]
    fn trailing_delete_marker_hides_the_row() {
        let schema = schema();
        let base = row(1, 2, 3);
        let meta = TupleMeta::new(5, false);
        let deleted = UndoLog {
            is_deleted: true,
            modified_fields: vec![false, false, false],
            tuple: Vec::new(),
            ts: 1,
            prev_version: UndoLink::INVALID,
        };
        assert!(reconstruct_tuple(&schema, &base, &meta, &[deleted])
            .unwrap()
            .is_none());
    }

    #[test]
    fn conflict_predicate_matches_first_updater_wins() {
        let me = TXN_START_ID + 5;
        let other = TXN_START_ID + 9;

        // Another live writer holds the row.
        assert!(write_conflicts(&TupleMeta::new(other, false), 3, me));
        // Committed after my snapshot.
        assert!(write_conflicts(&TupleMeta::new(4, false), 3, me));
        // Committed at or before my snapshot.
        assert!(!write_conflicts(&TupleMeta::new(3, false), 3, me));
        // My own write.
        assert!(!write_conflicts(&TupleMeta::new(me, false), 3, me));
    }

    #[test]
    fn built_log_captures_only_changed_columns() {
        let schema = schema();
        let old = row(1, 2, 3);
        let new = row(1, 9, 3);
        let meta = TupleMeta::new(4, false);
        let log = build_undo_log(&schema, &old, &new, &meta, None);
        assert_eq!(log.modified_fields, vec![false, true, false]);
        assert_eq!(log.ts, 4);

        // Replaying the log over the new image restores the old one.
        let restored = reconstruct_tuple(&schema, &new, &TupleMeta::new(9, false), &[log])
            .unwrap()
            .unwrap();
        assert_eq!(restored, old);
    }

    #[test]
    fn merged_log_grows_the_mask_and_keeps_pre_images() {
        let schema = schema();
        let pre_image = row(1, 2, 3);
        let first_new = row(1, 9, 3);
        let meta = TupleMeta::new(4, false);
        let first = build_undo_log(&schema, &pre_image, &first_new, &meta, None);

        // Second write in the same transaction touches column c.
        let second_new = row(1, 9, 77);
        let merged = merge_undo_log(&schema, &first, &pre_image, &second_new);
        assert_eq!(merged.modified_fields, vec![false, true, true]);
        assert_eq!(merged.ts, 4);

        let restored = reconstruct_tuple(&schema, &second_new, &TupleMeta::new(9, false), &[merged])
            .unwrap()
            .unwrap();
        assert_eq!(restored, pre_image);
    }
}
