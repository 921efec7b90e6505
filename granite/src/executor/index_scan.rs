use std::sync::Arc;

use stratum::Rid;

use crate::catalog::{IndexInfo, IndexKey, IndexOid, TableInfo, TableOid};
use crate::errors::ExecutionError;
use crate::executor::visibility::visible_tuple;
use crate::executor::{Executor, ExecutorContext, ExecutorResult};
use crate::expression::Expression;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Point lookup through a hash index. The index may hand back a stale RID
/// (the row has moved on under MVCC churn); the same visibility resolution
/// as the sequential scan filters it, and the residual predicate re-checks
/// the reconstructed version.
pub struct IndexScanExecutor<'a> {
    ctx: &'a ExecutorContext,
    table: Arc<TableInfo>,
    index: Arc<IndexInfo>,
    pred_key: Value,
    filter: Option<Expression>,
    candidates: Vec<Rid>,
    cursor: usize,
}

impl<'a> IndexScanExecutor<'a> {
    pub fn new(
        ctx: &'a ExecutorContext,
        table_oid: TableOid,
        index_oid: IndexOid,
        pred_key: Value,
        filter: Option<Expression>,
    ) -> Result<Self, ExecutionError> {
        let table = ctx.catalog.table_by_oid(table_oid)?;
        let index = ctx.catalog.index_by_oid(index_oid)?;
        Ok(Self {
            ctx,
            table,
            index,
            pred_key,
            filter,
            candidates: Vec::new(),
            cursor: 0,
        })
    }
}

impl Executor for IndexScanExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        let key = IndexKey::from_value(&self.pred_key);
        self.candidates = self.index.index.get(&key)?.into_iter().collect();
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        while self.cursor < self.candidates.len() {
            let rid = self.candidates[self.cursor];
            self.cursor += 1;

            let (meta, payload) = self.table.heap.get_tuple(rid)?;
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
