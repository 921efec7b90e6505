use std::sync::Arc;

use stratum::heap::TableIterator;

use crate::catalog::{TableInfo, TableOid};
use crate::errors::ExecutionError;
use crate::executor::visibility::visible_tuple;
use crate::executor::{Executor, ExecutorContext, ExecutorResult};
use crate::expression::Expression;
use crate::tuple::Tuple;
use crate::types::Schema;

/// Walks the table heap in RID order, resolving each row to the version
/// visible under the transaction's snapshot and applying the optional
/// filter predicate.
pub struct SeqScanExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    filter: Option<Expression>,
    iter: Option<TableIterator>,
}

impl<'a> SeqScanExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        table_oid: TableOid,
        filter: Option<Expression>,
    ) -> Result<Self, ExecutionError> {
        let table = ctx.catalog.table_by_oid(table_oid)?;
        Ok(Self {
            ctx,
            table,
            filter,
            iter: None,
        })
    }
}

impl Executor for SeqScanExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.iter = Some(self.table.heap.make_iterator()?);
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        let iter = self
            .iter
            .as_mut()
            .ok_or_else(|| ExecutionError::Internal("seq scan used before init".into()))?;

        while let Some((rid, meta, payload)) = iter.next()? {
            let base_tuple = Tuple::decode(&self.table.schema, &payload)?;
            let Some(tuple) =
                visible_tuple(self.ctx, &self.table.schema, rid, &meta, &base_tuple)?
            else {
                continue;
            };
            if let Some(filter) = &self.filter {
                if !filter.matches(&tuple, &self.table.schema)? {
                    continue;
                }
            }
            return Ok(Some((tuple, rid)));
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.table.schema
    }
}
