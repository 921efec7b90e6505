//! Row expressions: column references, constants, comparisons, boolean
//! connectives and integer arithmetic.

use crate::errors::ExecutionError;
use crate::tuple::Tuple;
use crate::types::{Schema, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicOp {
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `tuple_index` selects the side in a join context; single-tuple
    /// evaluation uses side 0.
    ColumnRef {
        tuple_index: usize,
        column_index: usize,
    },
    Constant(Value),
    Comparison {
        op: ComparisonOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Logic {
        op: LogicOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    Arithmetic {
        op: ArithmeticOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
}

impl Expression {
    pub fn column(column_index: usize) -> Expression {
        Expression::ColumnRef {
            tuple_index: 0,
            column_index,
        }
    }

    pub fn join_column(tuple_index: usize, column_index: usize) -> Expression {
        Expression::ColumnRef {
            tuple_index,
            column_index,
        }
    }

    pub fn constant(value: Value) -> Expression {
        Expression::Constant(value)
    }

    pub fn comparison(op: ComparisonOp, left: Expression, right: Expression) -> Expression {
        Expression::Comparison {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    pub fn equals(left: Expression, right: Expression) -> Expression {
        Self::comparison(ComparisonOp::Eq, left, right)
    }

    pub fn evaluate(&self, tuple: &Tuple, schema: &Schema) -> Result<Value, ExecutionError> {
        self.evaluate_inner(&[(tuple, schema)])
    }

    pub fn evaluate_join(
        &self,
        left: &Tuple,
        left_schema: &Schema,
        right: &Tuple,
        right_schema: &Schema,
    ) -> Result<Value, ExecutionError> {
        self.evaluate_inner(&[(left, left_schema), (right, right_schema)])
    }

    fn evaluate_inner(&self, tuples: &[(&Tuple, &Schema)]) -> Result<Value, ExecutionError> {
        match self {
            Expression::ColumnRef {
                tuple_index,
                column_index,
            } => {
                let (tuple, schema) = tuples.get(*tuple_index).ok_or_else(|| {
                    ExecutionError::Internal(format!(
                        "column reference to missing tuple side {tuple_index}"
                    ))
                })?;
                if *column_index >= schema.column_count() {
                    return Err(ExecutionError::ColumnNotFound(format!(
                        "column #{column_index}"
                    )));
                }
                Ok(tuple.value(*column_index).clone())
            }
            Expression::Constant(value) => Ok(value.clone()),
            Expression::Comparison { op, left, right } => {
                let lhs = left.evaluate_inner(tuples)?;
                let rhs = right.evaluate_inner(tuples)?;
                // Comparison against NULL never matches.
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Boolean(false));
                }
                let ordering = lhs.cmp(&rhs);
                let result = match op {
                    ComparisonOp::Eq => ordering.is_eq(),
                    ComparisonOp::NotEq => !ordering.is_eq(),
                    ComparisonOp::Lt => ordering.is_lt(),
                    ComparisonOp::LtEq => ordering.is_le(),
                    ComparisonOp::Gt => ordering.is_gt(),
                    ComparisonOp::GtEq => ordering.is_ge(),
                };
                Ok(Value::Boolean(result))
            }
            Expression::Logic { op, left, right } => {
                let lhs = left.evaluate_inner(tuples)?.as_boolean().unwrap_or(false);
                let rhs = right.evaluate_inner(tuples)?.as_boolean().unwrap_or(false);
                Ok(Value::Boolean(match op {
                    LogicOp::And => lhs && rhs,
                    LogicOp::Or => lhs || rhs,
                }))
            }
            Expression::Arithmetic { op, left, right } => {
                let lhs = left.evaluate_inner(tuples)?;
                let rhs = right.evaluate_inner(tuples)?;
                if lhs.is_null() || rhs.is_null() {
                    return Ok(Value::Null);
                }
                let (Some(a), Some(b)) = (lhs.as_integer(), rhs.as_integer()) else {
                    return Err(ExecutionError::TypeMismatch(format!(
                        "arithmetic over {lhs:?} and {rhs:?}"
                    )));
                };
                Ok(Value::Integer(match op {
                    ArithmeticOp::Add => a.wrapping_add(b),
                    ArithmeticOp::Subtract => a.wrapping_sub(b),
                }))
            }
        }
    }

    /// True when the expression evaluates to boolean true for the tuple.
    pub fn matches(&self, tuple: &Tuple, schema: &Schema) -> Result<bool, ExecutionError> {
        Ok(self.evaluate(tuple, schema)?.as_boolean().unwrap_or(false))
    }
}
