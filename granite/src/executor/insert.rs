use std::sync::Arc;

use stratum::transaction::{UndoLink, UndoLog};
use stratum::{Rid, TupleMeta};

use crate::catalog::{TableInfo, TableOid};
use crate::errors::ExecutionError;
use crate::executor::{count_schema, Executor, ExecutorContext, ExecutorResult};
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Inserts every child tuple into the heap stamped with the writer's
/// transaction id, records a "did not exist" undo log, maintains every
/// index over the table, and reports the affected-row count.
pub struct InsertExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    table_oid: TableOid,
    child: Box<dyn Executor + 'a>,
    output_schema: Schema,
    done: bool,
}

impl<'a> InsertExecutor<'a> {
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

impl Executor for InsertExecutor<'_> {
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
        let indexes = self.ctx.catalog.table_indexes(&self.table.name);
        let mut count = 0i64;

        while let Some((tuple, _)) = self.child.next()? {
            let meta = TupleMeta::new(txn.id(), false);
            let payload = tuple.encode(&self.table.schema);
            let rid = self
                .table
                .heap
                .insert_tuple(&meta, &payload)?
                .ok_or_else(|| {
                    ExecutionError::Internal("tuple does not fit an empty table page".into())
                })?;

            // Walking past this version must end in "row did not exist".
            txn.append_undo_log(UndoLog {
                is_deleted: true,
                modified_fields: vec![false; self.table.schema.column_count()],
                tuple: Vec::new(),
                ts: txn.id(),
                prev_version: UndoLink::INVALID,
            });
            txn.append_write_set(self.table_oid, rid);

            for index in &indexes {
                index.index.insert(&index.key_for(&tuple), &rid)?;
            }
            count += 1;
        }

        crate::granite_debug_log!("[InsertExecutor] {} rows into {}", count, self.table.name);
        Ok(Some((
            Tuple::new(vec![Value::Integer(count)]),
            Rid::INVALID,
        )))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
