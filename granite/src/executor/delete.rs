use std::sync::Arc;

use stratum::{Rid, TupleMeta};

use crate::catalog::{TableInfo, TableOid};
use crate::errors::ExecutionError;
use crate::executor::update::record_pre_image;
use crate::executor::visibility::write_conflicts;
use crate::executor::{count_schema, Executor, ExecutorContext, ExecutorResult};
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Statement-level delete: collects targets under first-updater-wins
/// conflict detection, then stamps each survivor deleted with a null-filled
/// payload, logging the pre-image and dropping its index entries. Yields
/// one tuple carrying the affected-row count.
pub struct DeleteExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    table_oid: TableOid,
    child: Box<dyn Executor + 'a>,
    output_schema: Schema,
    done: bool,
}

impl<'a> DeleteExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        table_oid: TableOid,
        child: Box<dyn Executor + 'a>,
    ) -> Result<Self, ExecutionError> {
        let table = ctx.catalog.table_by_oid(table_oid)?;
        Ok(Self {
            ctx,
            table,
            table_oid,
            child,
            output_schema: count_schema(),
            done: false,
        })
    }
}

impl Executor for DeleteExecutor<'_> {
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

        let mut count = 0i64;
        for rid in targets {
            let (base_meta, payload) = heap.get_tuple(rid)?;
            let old_tuple = Tuple::decode(schema, &payload)?;
            let blank = Tuple::null_tuple(schema);

            record_pre_image(self.ctx, schema, rid, &base_meta, &old_tuple, &blank)?;
            heap.update_tuple_in_place(
                &TupleMeta::new(txn.id(), true),
                &blank.encode(schema),
                rid,
            )?;

            for index in &indexes {
                index.index.remove(&index.key_for(&old_tuple))?;
            }
            txn.append_write_set(self.table_oid, rid);
            count += 1;
        }

        crate::granite_debug_log!("[DeleteExecutor] {} rows from {}", count, self.table.name);
        Ok(Some((
            Tuple::new(vec![Value::Integer(count)]),
            Rid::INVALID,
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
