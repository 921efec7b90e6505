use stratum::Rid;

use crate::errors::ExecutionError;
use crate::executor::{Executor, ExecutorResult};
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

/// Emits a fixed list of row literals; the usual child of `Insert`.
pub struct ValuesExecutor {
    schema: Schema,
    rows: Vec<Vec<Value>>,
    cursor: usize,
}

impl ValuesExecutor {
    pub fn new(schema: Schema, rows: Vec<Vec<Value>>) -> Self {
        Self {
            schema,
            rows,
            cursor: 0,
        }
    }
}

impl Executor for ValuesExecutor {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.cursor = 0;
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        let Some(row) = self.rows.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((Tuple::new(row.clone()), Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.schema
    }
}
