use std::cmp::Ordering;

use stratum::Rid;

use crate::errors::ExecutionError;
use crate::executor::{Executor, ExecutorResult};
use crate::plan::OrderBy;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

pub(super) fn compare_keys(a: &[Value], b: &[Value], order_bys: &[OrderBy]) -> Ordering {
    for (i, order_by) in order_bys.iter().enumerate() {
        let ordering = a[i].cmp(&b[i]);
        let ordering = if order_by.order.is_descending() {
            ordering.reverse()
        } else {
            ordering
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Materializes its child and yields tuples under a stable sort over the
/// `(direction, expression)` pairs; an unspecified direction is ascending.
pub struct SortExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    order_bys: Vec<OrderBy>,
    sorted: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl<'a> SortExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, order_bys: Vec<OrderBy>) -> Self {
        Self {
            child,
            order_bys,
            sorted: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for SortExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.sorted.clear();
        self.cursor = 0;

        let schema = self.child.output_schema().clone();
        let mut keyed: Vec<(Vec<Value>, Tuple, Rid)> = Vec::new();
        while let Some((tuple, rid)) = self.child.next()? {
            let mut key = Vec::with_capacity(self.order_bys.len());
            for order_by in &self.order_bys {
                key.push(order_by.expr.evaluate(&tuple, &schema)?);
            }
            keyed.push((key, tuple, rid));
        }

        keyed.sort_by(|a, b| compare_keys(&a.0, &b.0, &self.order_bys));
        self.sorted = keyed.into_iter().map(|(_, tuple, rid)| (tuple, rid)).collect();
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        let Some(row) = self.sorted.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(row.clone()))
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
