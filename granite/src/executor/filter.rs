use crate::errors::ExecutionError;
use crate::executor::{Executor, ExecutorResult};
use crate::expression::Expression;
use crate::types::Schema;

/// Predicate gate over a child executor. Plans usually lose this node to
/// the merge-filter-scan rewrite; it remains for predicates the scans
/// cannot absorb.
pub struct FilterExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    predicate: Expression,
}

impl<'a> FilterExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, predicate: Expression) -> Self {
        Self { child, predicate }
    }
}

impl Executor for FilterExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        while let Some((tuple, rid)) = self.child.next()? {
            if self.predicate.matches(&tuple, self.child.output_schema())? {
                return Ok(Some((tuple, rid)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
