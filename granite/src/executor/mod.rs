//! Pull-based executor pipeline. Every node exposes `init` and `next`;
//! `next` yields one tuple per call. Trees are built from plan nodes over a
//! shared executor context.

use std::sync::Arc;

use stratum::transaction::{Transaction, TransactionManager};
use stratum::{BufferPoolManager, Rid};

use crate::catalog::Catalog;
use crate::errors::ExecutionError;
use crate::plan::PlanNode;
use crate::tuple::Tuple;
use crate::types::{Column, Schema, TypeId};

mod aggregate;
mod delete;
mod filter;
mod index_scan;
mod insert;
mod join;
mod limit;
mod seq_scan;
mod sort;
mod update;
mod values;
pub mod visibility;

pub use aggregate::AggregationExecutor;
pub use delete::DeleteExecutor;
pub use filter::FilterExecutor;
pub use index_scan::IndexScanExecutor;
pub use insert::InsertExecutor;
pub use join::NestedLoopJoinExecutor;
pub use limit::{LimitExecutor, TopNExecutor};
pub use seq_scan::SeqScanExecutor;
pub use sort::SortExecutor;
pub use update::UpdateExecutor;
pub use values::ValuesExecutor;

/// One tuple of executor output with its physical address; computed rows
/// carry `Rid::INVALID`.
pub type ExecutorResult = Option<(Tuple, Rid)>;

pub trait Executor {
    fn init(&mut self) -> Result<(), ExecutionError>;
    fn next(&mut self) -> Result<ExecutorResult, ExecutionError>;
    fn output_schema(&self) -> &Schema;
}

/// Shared services for one statement's executor tree.
pub struct ExecutorContext {
    pub bpm: Arc<BufferPoolManager>,
    pub catalog: Arc<Catalog>,
    pub txn_mgr: Arc<TransactionManager>,
    pub txn: Arc<Transaction>,
    /// Hint that this tree serves a delete statement.
    pub is_delete: bool,
}

/// Output schema of the statement-level executors: one integer column
/// carrying the affected-row count.
pub fn count_schema() -> Schema {
    Schema::new(vec![Column::new("count", TypeId::Integer)])
}

pub fn build_executor<'a>(
    plan: &PlanNode,
    ctx: &'a ExecutorContext,
) -> Result<Box<dyn Executor + 'a>, ExecutionError> {
    Ok(match plan {
        PlanNode::SeqScan { table_oid, filter } => {
            Box::new(SeqScanExecutor::new(ctx, *table_oid, filter.clone())?)
        }
        PlanNode::IndexScan {
            table_oid,
            index_oid,
            pred_key,
            filter,
        } => Box::new(IndexScanExecutor::new(
            ctx,
            *table_oid,
            *index_oid,
            pred_key.clone(),
            filter.clone(),
        )?),
        PlanNode::Values { schema, rows } => {
            Box::new(ValuesExecutor::new(schema.clone(), rows.clone()))
        }
        PlanNode::Filter { predicate, child } => Box::new(FilterExecutor::new(
            build_executor(child, ctx)?,
            predicate.clone(),
        )),
        PlanNode::Insert { table_oid, child } => Box::new(InsertExecutor::new(
            ctx,
            *table_oid,
            build_executor(child, ctx)?,
        )?),
        PlanNode::Update {
            table_oid,
            target_exprs,
            child,
        } => Box::new(UpdateExecutor::new(
            ctx,
            *table_oid,
            target_exprs.clone(),
            build_executor(child, ctx)?,
        )?),
        PlanNode::Delete { table_oid, child } => Box::new(DeleteExecutor::new(
            ctx,
            *table_oid,
            build_executor(child, ctx)?,
        )?),
        PlanNode::Aggregation {
            group_bys,
            aggregates,
            child,
        } => Box::new(AggregationExecutor::new(
            build_executor(child, ctx)?,
            group_bys.clone(),
            aggregates.clone(),
        )),
        PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left,
            right,
        } => Box::new(NestedLoopJoinExecutor::new(
            build_executor(left, ctx)?,
            build_executor(right, ctx)?,
            predicate.clone(),
            *join_type,
        )),
        PlanNode::Sort { order_bys, child } => Box::new(SortExecutor::new(
            build_executor(child, ctx)?,
            order_bys.clone(),
        )),
        PlanNode::Limit { limit, child } => {
            Box::new(LimitExecutor::new(build_executor(child, ctx)?, *limit))
        }
        PlanNode::TopN {
            n,
            order_bys,
            child,
        } => Box::new(TopNExecutor::new(
            build_executor(child, ctx)?,
            order_bys.clone(),
            *n,
        )),
    })
}

/// Builds, initializes and drains an executor tree, returning every yielded
/// tuple.
pub fn execute(
    plan: &PlanNode,
    ctx: &ExecutorContext,
) -> Result<Vec<(Tuple, Rid)>, ExecutionError> {
    let mut root = build_executor(plan, ctx)?;
    root.init()?;
    let mut rows = Vec::new();
    while let Some(row) = root.next()? {
        rows.push(row);
    }
    Ok(rows)
}
