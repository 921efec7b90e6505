use std::collections::VecDeque;

use stratum::Rid;

use crate::errors::ExecutionError;
use crate::executor::{Executor, ExecutorResult};
use crate::expression::Expression;
use crate::plan::JoinType;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Nested-loop join: materializes both children at `init`, computes the
/// full result list, and dequeues from it. For a left join every unmatched
/// left tuple is emitted padded with nulls on the right.
pub struct NestedLoopJoinExecutor<'a> {
    left: Box<dyn Executor + 'a>,
    right: Box<dyn Executor + 'a>,
    predicate: Expression,
    join_type: JoinType,
    output_schema: Schema,
    results: VecDeque<Tuple>,
}

impl<'a> NestedLoopJoinExecutor<'a> {
    pub fn new(
        left: Box<dyn Executor + 'a>,
        right: Box<dyn Executor + 'a>,
        predicate: Expression,
        join_type: JoinType,
    ) -> Self {
        let output_schema = left.output_schema().join(right.output_schema());
        Self {
            left,
            right,
            predicate,
            join_type,
            output_schema,
            results: VecDeque::new(),
        }
    }
}

impl Executor for NestedLoopJoinExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.left.init()?;
        self.right.init()?;
        self.results.clear();

        let mut left_tuples = Vec::new();
        while let Some((tuple, _)) = self.left.next()? {
            left_tuples.push(tuple);
        }
        let mut right_tuples = Vec::new();
        while let Some((tuple, _)) = self.right.next()? {
            right_tuples.push(tuple);
        }

        let left_schema = self.left.output_schema();
        let right_schema = self.right.output_schema();
        for left_tuple in &left_tuples {
            let mut matched = false;
            for right_tuple in &right_tuples {
                let verdict = self
                    .predicate
                    .evaluate_join(left_tuple, left_schema, right_tuple, right_schema)?;
                if verdict.as_boolean().unwrap_or(false) {
                    matched = true;
                    let mut values = left_tuple.values().to_vec();
                    values.extend(right_tuple.values().iter().cloned());
                    self.results.push_back(Tuple::new(values));
                }
            }
            if !matched && self.join_type == JoinType::Left {
                let mut values = left_tuple.values().to_vec();
                values.extend(vec![Value::Null; right_schema.column_count()]);
                self.results.push_back(Tuple::new(values));
            }
        }
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        Ok(self.results.pop_front().map(|tuple| (tuple, Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
