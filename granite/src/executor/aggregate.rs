use std::collections::HashMap;

use stratum::Rid;

use crate::errors::ExecutionError;
use crate::executor::{Executor, ExecutorResult};
use crate::expression::Expression;
use crate::plan::{AggregateExpr, AggregationType};
use crate::tuple::Tuple;
use crate::types::{Column, Schema, TypeId, Value};

fn initial_value(kind: AggregationType) -> Value {
    match kind {
        AggregationType::CountStar => Value::Integer(0),
        _ => Value::Null,
    }
}

fn combine(kind: AggregationType, state: &mut Value, input: Value) {
    match kind {
        AggregationType::CountStar => {
            if let Value::Integer(n) = state {
                *n += 1;
            }
        }
        AggregationType::Count => {
            if !input.is_null() {
                *state = match state {
                    Value::Integer(n) => Value::Integer(*n + 1),
                    _ => Value::Integer(1),
                };
            }
        }
        AggregationType::Sum => {
            if let Some(v) = input.as_integer() {
                *state = match state {
                    Value::Integer(n) => Value::Integer(*n + v),
                    _ => Value::Integer(v),
                };
            }
        }
        AggregationType::Min => {
            if !input.is_null() && (state.is_null() || input < *state) {
                *state = input;
            }
        }
        AggregationType::Max => {
            if !input.is_null() && (state.is_null() || input > *state) {
                *state = input;
            }
        }
    }
}

/// Hash aggregation: builds a table keyed by the group-by values, folding
/// each child tuple into per-group running states. Over empty input with no
/// group-by clause it yields exactly one row of initial aggregate values.
pub struct AggregationExecutor<'a> {
    child: Box<dyn Executor + 'a>,
    group_bys: Vec<Expression>,
    aggregates: Vec<AggregateExpr>,
    output_schema: Schema,
    results: Vec<Tuple>,
    cursor: usize,
}

impl<'a> AggregationExecutor<'a> {
    pub fn new(
        child: Box<dyn Executor + 'a>,
        group_bys: Vec<Expression>,
        aggregates: Vec<AggregateExpr>,
    ) -> Self {
        let mut columns = Vec::new();
        for (i, expr) in group_bys.iter().enumerate() {
            let name = match expr {
                Expression::ColumnRef { column_index, .. } => child
                    .output_schema()
                    .column(*column_index)
                    .name
                    .clone(),
                _ => format!("group_{i}"),
            };
            columns.push(Column::new(name, TypeId::Integer));
        }
        for (i, agg) in aggregates.iter().enumerate() {
            let name = match agg.kind {
                AggregationType::CountStar => format!("count_star_{i}"),
                AggregationType::Count => format!("count_{i}"),
                AggregationType::Sum => format!("sum_{i}"),
                AggregationType::Min => format!("min_{i}"),
                AggregationType::Max => format!("max_{i}"),
            };
            columns.push(Column::new(name, TypeId::Integer));
        }
        Self {
            child,
            group_bys,
            aggregates,
            output_schema: Schema::new(columns),
            results: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for AggregationExecutor<'_> {
    fn init(&mut self) -> Result<(), ExecutionError> {
        self.child.init()?;
        self.results.clear();
        self.cursor = 0;

        let mut groups: HashMap<Vec<Value>, Vec<Value>> = HashMap::new();
        // Insertion order of groups, for deterministic output.
        let mut order: Vec<Vec<Value>> = Vec::new();

        let child_schema = self.child.output_schema().clone();
        while let Some((tuple, _)) = self.child.next()? {
            let mut key = Vec::with_capacity(self.group_bys.len());
            for expr in &self.group_bys {
                key.push(expr.evaluate(&tuple, &child_schema)?);
            }
            if !groups.contains_key(&key) {
                order.push(key.clone());
                let initial = self
                    .aggregates
                    .iter()
                    .map(|agg| initial_value(agg.kind))
                    .collect();
                groups.insert(key.clone(), initial);
            }
            let states = groups.get_mut(&key).expect("group present after insert");
            for (agg, state) in self.aggregates.iter().zip(states.iter_mut()) {
                let input = agg.expr.evaluate(&tuple, &child_schema)?;
                combine(agg.kind, state, input);
            }
        }

        if groups.is_empty() && self.group_bys.is_empty() {
            // Aggregating an empty relation still produces one row.
            self.results.push(Tuple::new(
                self.aggregates
                    .iter()
                    .map(|agg| initial_value(agg.kind))
                    .collect(),
            ));
            return Ok(());
        }

        for key in order {
            let states = groups.remove(&key).expect("group recorded at insertion");
            let mut values = key;
            values.extend(states);
            self.results.push(Tuple::new(values));
        }
        Ok(())
    }

    fn next(&mut self) -> Result<ExecutorResult, ExecutionError> {
        let Some(tuple) = self.results.get(self.cursor) else {
            return Ok(None);
        };
        self.cursor += 1;
        Ok(Some((tuple.clone(), Rid::INVALID)))
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}
