use std::sync::Arc;

use stratum::transaction::UndoLink;
use stratum::{Rid, TupleMeta};

use crate::catalog::{TableInfo, TableOid};
use crate::errors::ExecutionError;
use crate::executor::visibility::{
    build_undo_log, merge_undo_log, reconstruct_tuple, write_conflicts,
};
use crate::executor::{count_schema, Executor, ExecutorContext, ExecutorResult};
use crate::expression::Expression;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Records the pre-image of a write in the transaction's undo logs and
/// chains it into the row's version history. A row this transaction wrote
/// earlier keeps its single log, whose mask grows monotonically; a row it
/// inserted needs no log at all.
pub(super) fn record_pre_image(
    ctx: &ExecutorContext,
    schema: &Schema,
    rid: Rid,
    base_meta: &TupleMeta,
    old_tuple: &Tuple,
    new_tuple: &Tuple,
) -> Result<(), ExecutionError> {
    let txn = &ctx.txn;
    if base_meta.ts == txn.id() {
        let Some(link) = ctx.txn_mgr.undo_link(rid).filter(UndoLink::is_valid) else {
            // Inserted by this transaction; its insert log already says the
            // row did not exist before.
            return Ok(());
        };
        if link.prev_txn != txn.id() {
            return Err(ExecutionError::Internal(format!(
                "row {rid:?} is stamped by this transaction but chained to another"
            )));
        }
        let existing = txn.undo_log(link.prev_log_idx).ok_or_else(|| {
            ExecutionError::Internal(format!("dangling undo log index {}", link.prev_log_idx))
        })?;
        let pre_image = reconstruct_tuple(schema, old_tuple, base_meta, std::slice::from_ref(&existing))?
            .ok_or_else(|| {
                ExecutionError::Internal(format!("pre-image of {rid:?} resolves to a deletion"))
            })?;
        let merged = merge_undo_log(schema, &existing, &pre_image, new_tuple);
        txn.modify_undo_log(link.prev_log_idx, merged);
    } else {
        let prev = ctx.txn_mgr.undo_link(rid);
        let log = build_undo_log(schema, old_tuple, new_tuple, base_meta, prev);
        let log_idx = txn.append_undo_log(log);
        ctx.txn_mgr.update_undo_link(
            rid,
            UndoLink {
                prev_txn: txn.id(),
                prev_log_idx: log_idx,
            },
        );
    }
    Ok(())
}

/// Statement-level update: drains its child collecting target rows under
/// first-updater-wins conflict detection, then rewrites each survivor in
/// place, installs undo logs and refreshes the indexes. Yields one tuple
/// carrying the affected-row count.
pub struct UpdateExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    table_oid: TableOid,
    target_exprs: Vec<Expression>,
    child: Box<dyn Executor + 'a>,
    output_schema: Schema,
    done: bool,
}

impl<'a> UpdateExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        table_oid: TableOid,
        target_exprs: Vec<Expression>,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        let table = ctx.catalog.table_by_oid(table_oid)?;
        Ok(Self {
            ctx,
            table,
            table_oid,
            target_exprs,
            child,
            output_schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for UpdateExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.done = false;
        self.child.init()
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        if self.done {
            return Ok(None);
        }
        self.done = true;

        let txn = &self.ctx.txn;
        let schema = &self.table.schema;
        let heap = &self.table.heap;
        let indexes = self.ctx.catalog.table_indexes(&self.table.name);

        // Phase one: collect targets, surfacing conflicts before anything
        // is modified.
        let mut targets: Vec<Rid> = Vec::new();
        while let Some((_, rid)) = self.child.next()? {
            let base_meta = heap.get_tuple_meta(rid)?;
            if write_conflicts(&base_meta, txn.read_ts(), txn.id()) {
                txn.set_tainted();
                return Err(ExecutionError::WriteWriteConflict(rid));
            }
            if base_meta.is_deleted {
                continue;
            }
            targets.push(rid);
        }

        // Phase two: rewrite the survivors.
        let mut count = 0i64;
        for rid in targets {
            let (base_meta, payload) = heap.get_tuple(rid)?;
            let old_tuple = Tuple::decode(schema, &payload)?;

            let mut new_values = Vec::with_capacity(schema.column_count());
            for expr in &self.target_exprs {
                new_values.push(expr.evaluate(&old_tuple, schema)?);
            }
            let new_tuple = Tuple::new(new_values);

            record_pre_image(self.ctx, schema, rid, &base_meta, &old_tuple, &new_tuple)?;
            heap.update_tuple_in_place(
                &TupleMeta::new(txn.id(), false),
                &new_tuple.encode(schema),
                rid,
            )?;

            for index in &indexes {
                let old_key = index.key_for(&old_tuple);
                let new_key = index.key_for(&new_tuple);
                if old_key != new_key {
                    index.index.remove(&old_key)?;
                    index.index.insert(&new_key, &rid)?;
                }
            }
            txn.append_write_set(self.table_oid, rid);
            count += 1;
        }

        crate::granite_debug_log!("[UpdateExecutor] {} rows in {}", count, self.table.name);
        Ok(Some((
            Tuple::new(vec![Value::Integer(count)]),
            Rid::INVALID,
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
