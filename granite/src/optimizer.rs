//! Plan rewrite rules, applied bottom-up over the plan tree:
//! fold a trailing filter into a bare sequential scan, turn an
//! equality-on-indexed-column scan into an index scan, and fuse
//! limit-over-sort into top-n.

use crate::catalog::Catalog;
use crate::expression::{ComparisonOp, Expression};
use crate::plan::PlanNode;

pub fn optimize(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = merge_filter_scan(plan);
    let plan = seq_scan_as_index_scan(plan, catalog);
    sort_limit_as_top_n(plan)
}

fn rewrite_children(plan: PlanNode, rewrite: &impl Fn(PlanNode) -> PlanNode) -> PlanNode {
    match plan {
        PlanNode::Filter { predicate, child } => PlanNode::Filter {
            predicate,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::Insert { table_oid, child } => PlanNode::Insert {
            table_oid,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::Update {
            table_oid,
            target_exprs,
            child,
        } => PlanNode::Update {
            table_oid,
            target_exprs,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::Delete { table_oid, child } => PlanNode::Delete {
            table_oid,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::Aggregation {
            group_bys,
            aggregates,
            child,
        } => PlanNode::Aggregation {
            group_bys,
            aggregates,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left,
            right,
        } => PlanNode::NestedLoopJoin {
            join_type,
            predicate,
            left: Box::new(rewrite(*left)),
            right: Box::new(rewrite(*right)),
        },
        PlanNode::Sort { order_bys, child } => PlanNode::Sort {
            order_bys,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::Limit { limit, child } => PlanNode::Limit {
            limit,
            child: Box::new(rewrite(*child)),
        },
        PlanNode::TopN {
            n,
            order_bys,
            child,
        } => PlanNode::TopN {
            n,
            order_bys,
            child: Box::new(rewrite(*child)),
        },
        leaf @ (PlanNode::SeqScan { .. } | PlanNode::IndexScan { .. } | PlanNode::Values { .. }) => {
            leaf
        }
    }
}

/// `Filter(SeqScan)` becomes `SeqScan(filter)` when the scan carries no
/// predicate of its own.
pub fn merge_filter_scan(plan: PlanNode) -> PlanNode {
    let plan = rewrite_children(plan, &merge_filter_scan);
    if let PlanNode::Filter { predicate, child } = plan {
        if let PlanNode::SeqScan {
            table_oid,
            filter: None,
        } = *child
        {
            return PlanNode::SeqScan {
                table_oid,
                filter: Some(predicate),
            };
        }
        return PlanNode::Filter { predicate, child };
    }
    plan
}

/// A scan filtered by `col = const` uses a hash index when one covers
/// exactly that column. The predicate stays on the scan to re-check
/// reconstructed versions.
pub fn seq_scan_as_index_scan(plan: PlanNode, catalog: &Catalog) -> PlanNode {
    let plan = rewrite_children(plan, &|p| seq_scan_as_index_scan(p, catalog));
    let PlanNode::SeqScan {
        table_oid,
        filter: Some(predicate),
    } = plan
    else {
        return plan;
    };

    let equality = match &predicate {
        Expression::Comparison {
            op: ComparisonOp::Eq,
            left,
            right,
        } => match (left.as_ref(), right.as_ref()) {
            (
                Expression::ColumnRef {
                    tuple_index: 0,
                    column_index,
                },
                Expression::Constant(value),
            ) => Some((*column_index, value.clone())),
            _ => None,
        },
        _ => None,
    };

    let Some((column_index, pred_key)) = equality else {
        return PlanNode::SeqScan {
            table_oid,
            filter: Some(predicate),
        };
    };
    let Ok(table) = catalog.table_by_oid(table_oid) else {
        return PlanNode::SeqScan {
            table_oid,
            filter: Some(predicate),
        };
    };
    for index in catalog.table_indexes(&table.name) {
        if index.key_attr == column_index {
            return PlanNode::IndexScan {
                table_oid,
                index_oid: index.oid,
                pred_key,
                filter: Some(predicate),
            };
        }
    }
    PlanNode::SeqScan {
        table_oid,
        filter: Some(predicate),
    }
}

/// `Limit(Sort)` becomes `TopN`.
pub fn sort_limit_as_top_n(plan: PlanNode) -> PlanNode {
    let plan = rewrite_children(plan, &sort_limit_as_top_n);
    if let PlanNode::Limit { limit, child } = plan {
        if let PlanNode::Sort { order_bys, child } = *child {
            return PlanNode::TopN {
                n: limit,
                order_bys,
                child,
            };
        }
        return PlanNode::Limit { limit, child };
    }
    plan
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::plan::{OrderBy, OrderByType};
    use crate::types::{Column, Schema, TypeId, Value};
    use std::sync::Arc;
    use stratum::disk::DiskManager;
    use stratum::BufferPoolManager;
    use tempfile::tempdir;

    fn test_catalog(dir: &tempfile::TempDir) -> Catalog {
        let dm = DiskManager::open(dir.path().join("opt.db")).unwrap();
        Catalog::new(Arc::new(BufferPoolManager::new(64, 2, dm)))
    }

    fn int_table(catalog: &Catalog) -> u32 {
        let schema = Schema::new(vec![
            Column::new("a", TypeId::Integer),
            Column::new("b", TypeId::Integer),
        ]);
        catalog.create_table("t", schema).unwrap().oid
    }

    #[test]
    fn filter_folds_into_bare_seq_scan() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(&dir);
        let oid = int_table(&catalog);

        let plan = PlanNode::Filter {
            predicate: Expression::equals(
                Expression::column(0),
                Expression::constant(Value::Integer(1)),
            ),
            child: Box::new(PlanNode::SeqScan {
                table_oid: oid,
                filter: None,
            }),
        };
        let rewritten = merge_filter_scan(plan);
        assert!(matches!(
            rewritten,
            PlanNode::SeqScan {
                filter: Some(_),
                ..
            }
        ));
    }

    #[test]
    fn filter_over_filtered_scan_is_left_alone() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(&dir);
        let oid = int_table(&catalog);

        let pred = Expression::equals(
            Expression::column(0),
            Expression::constant(Value::Integer(1)),
        );
        let plan = PlanNode::Filter {
            predicate: pred.clone(),
            child: Box::new(PlanNode::SeqScan {
                table_oid: oid,
                filter: Some(pred),
            }),
        };
        assert!(matches!(merge_filter_scan(plan), PlanNode::Filter { .. }));
    }

    #[test]
    fn equality_on_indexed_column_becomes_index_scan() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(&dir);
        let oid = int_table(&catalog);
        let index = catalog.create_index("t_a_idx", "t", 0).unwrap();

        let plan = PlanNode::SeqScan {
            table_oid: oid,
            filter: Some(Expression::equals(
                Expression::column(0),
                Expression::constant(Value::Integer(7)),
            )),
        };
        match seq_scan_as_index_scan(plan, &catalog) {
            PlanNode::IndexScan {
                index_oid,
                pred_key,
                ..
            } => {
                assert_eq!(index_oid, index.oid);
                assert_eq!(pred_key, Value::Integer(7));
            }
            other => panic!("expected IndexScan, got {other:?}"),
        }

        // Equality on a non-indexed column stays a sequential scan.
        let plan = PlanNode::SeqScan {
            table_oid: oid,
            filter: Some(Expression::equals(
                Expression::column(1),
                Expression::constant(Value::Integer(7)),
            )),
        };
        assert!(matches!(
            seq_scan_as_index_scan(plan, &catalog),
            PlanNode::SeqScan { .. }
        ));
    }

    #[test]
    fn limit_over_sort_fuses_into_top_n() {
        let dir = tempdir().unwrap();
        let catalog = test_catalog(&dir);
        let oid = int_table(&catalog);

        let plan = PlanNode::Limit {
            limit: 3,
            child: Box::new(PlanNode::Sort {
                order_bys: vec![OrderBy {
                    order: OrderByType::Default,
                    expr: Expression::column(0),
                }],
                child: Box::new(PlanNode::SeqScan {
                    table_oid: oid,
                    filter: None,
                }),
            }),
        };
        match sort_limit_as_top_n(plan) {
            PlanNode::TopN { n, order_bys, .. } => {
                assert_eq!(n, 3);
                assert_eq!(order_bys.len(), 1);
            }
            other => panic!("expected TopN, got {other:?}"),
        }

        // A limit over anything else stays a limit.
        let plan = PlanNode::Limit {
            limit: 3,
            child: Box::new(PlanNode::SeqScan {
                table_oid: oid,
                filter: None,
            }),
        };
        assert!(matches!(sort_limit_as_top_n(plan), PlanNode::Limit { .. }));
    }
}
