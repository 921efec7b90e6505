//! LIMIT and TOP-N. The optimizer rewrites a limit over a sort into the
//! bounded-heap top-n, which must yield exactly the sequence the pair
//! would have.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use stratum::Rid;

use crate::errors::ExecutionError;
use crate::executor::{Executor, ExecutorResult};
use crate::plan::OrderBy;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Passes through the first N child tuples.
pub struct LimitExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    limit: usize,
    returned: usize,
}

impl<'a> LimitExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, limit: usize) -> Self {
        Self {
            child,
            limit,
            returned: 0,
        }
    }
}

impl Executor for LimitExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.returned = 0;
        self.child.init()
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        if self.returned >= self.limit {
            return Ok(None);
        }
        match self.child.next()? {
            Some(row) => {
                self.returned += 1;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}

/// A sort-key cell that knows its direction, so plain lexicographic
/// ordering of the key vector realises the order-by.
#[derive(PartialEq, Eq)]
struct DirectedValue {
    value: Value,
    descending: bool,
}

impl PartialOrd for DirectedValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for DirectedValue {
    fn cmp(&self, other: &Self) -> Ordering {
        let ordering = self.value.cmp(&other.value);
        if self.descending {
            ordering.reverse()
        } else {
            ordering
        }
    }
}

/// Heap entry ordered by the directed sort key with the arrival sequence
/// as the tie-break, so equal keys keep their input order exactly like a
/// stable sort followed by a limit.
struct HeapEntry {
    key: Vec<DirectedValue>,
    seq: usize,
    tuple: Tuple,
    rid: Rid,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key).then(self.seq.cmp(&other.seq))
    }
}

/// Keeps the N smallest tuples under the order-by in a bounded max-heap:
/// the heap's top is the current worst candidate and is popped whenever a
/// better tuple arrives.
pub struct TopNExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    order_bys: Vec<OrderBy>,
    n: usize,
    results: Vec<(Tuple, Rid)>,
    cursor: usize,
}

impl<'a> TopNExecutor<'a> {
    pub fn new(child: Box<dyn Executor + 'a>, order_bys: Vec<OrderBy>, n: usize) -> Self {
        Self {
            child,
            order_bys,
            n,
            results: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for TopNExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.results.clear();
        self.cursor = 0;
        if self.n == 0 {
            return Ok(());
        }

        let schema = self.child.output_schema().clone();
        let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::new();
        let mut seq = 0usize;
        while let Some((tuple, rid)) = self.child.next()? {
            let mut key = Vec::with_capacity(self.order_bys.len());
            for order_by in &self.order_bys {
                key.push(DirectedValue {
                    value: order_by.expr.evaluate(&tuple, &schema)?,
                    descending: order_by.order.is_descending(),
                });
            }
            heap.push(HeapEntry {
                key,
                seq,
                tuple,
                rid,
            });
            seq += 1;
            if heap.len() > self.n {
                heap.pop();
            }
        }

        self.results = heap
            .into_sorted_vec()
            .into_iter()
            .map(|entry| (entry.tuple, entry.rid))
            .collect();
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        let Some(row) = self.results.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some(row.clone()))
    }

    fn output_schema(&self) -> &Schema {
        self.child.output_schema()
    }
}
