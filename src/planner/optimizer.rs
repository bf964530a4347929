//! Plan rewrite rules applied after planning.
//!
//! Two rewrites, mirroring what the upstream optimizer pipeline feeds the
//! core: an equi-predicate nested-loop join becomes a nested-index join
//! when the inner side is a bare scan with a matching index (a hash join
//! otherwise), and a limit over a sort collapses into top-n.

use crate::catalog::Catalog;
use crate::expression::{CompareOp, Expression};
use crate::planner::physical::PlanNode;
use anyhow::Result;

/// Rewrite a plan bottom-up.
pub fn optimize(plan: PlanNode, catalog: &Catalog) -> Result<PlanNode> {
    let plan = optimize_children(plan, catalog)?;
    let plan = rewrite_nested_loop_join(plan, catalog)?;
    Ok(rewrite_sort_limit(plan))
}

fn optimize_children(plan: PlanNode, catalog: &Catalog) -> Result<PlanNode> {
    Ok(match plan {
        PlanNode::Filter { predicate, child } => PlanNode::Filter {
            predicate,
            child: Box::new(optimize(*child, catalog)?),
        },
        PlanNode::Projection { expressions, child } => PlanNode::Projection {
            expressions,
            child: Box::new(optimize(*child, catalog)?),
        },
        PlanNode::Insert { table_oid, child } => PlanNode::Insert {
            table_oid,
            child: Box::new(optimize(*child, catalog)?),
        },
        PlanNode::Delete { table_oid, child } => PlanNode::Delete {
            table_oid,
            child: Box::new(optimize(*child, catalog)?),
        },
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => PlanNode::NestedLoopJoin {
            left: Box::new(optimize(*left, catalog)?),
            right: Box::new(optimize(*right, catalog)?),
            predicate,
            join_type,
        },
        PlanNode::NestedIndexJoin {
            left,
            index_oid,
            left_key,
            join_type,
        } => PlanNode::NestedIndexJoin {
            left: Box::new(optimize(*left, catalog)?),
            index_oid,
            left_key,
            join_type,
        },
        PlanNode::HashJoin {
            left,
            right,
            left_key,
            right_key,
            join_type,
        } => PlanNode::HashJoin {
            left: Box::new(optimize(*left, catalog)?),
            right: Box::new(optimize(*right, catalog)?),
            left_key,
            right_key,
            join_type,
        },
        PlanNode::Aggregate {
            child,
            group_bys,
            aggregates,
        } => PlanNode::Aggregate {
            child: Box::new(optimize(*child, catalog)?),
            group_bys,
            aggregates,
        },
        PlanNode::Sort { child, order_bys } => PlanNode::Sort {
            child: Box::new(optimize(*child, catalog)?),
            order_bys,
        },
        PlanNode::Limit { child, limit } => PlanNode::Limit {
            child: Box::new(optimize(*child, catalog)?),
            limit,
        },
        PlanNode::TopN {
            child,
            order_bys,
            n,
        } => PlanNode::TopN {
            child: Box::new(optimize(*child, catalog)?),
            order_bys,
            n,
        },
        leaf => leaf,
    })
}

/// `nested_loop(pred: l == r)` becomes `nested_index` when the inner side
/// is an unfiltered scan of a table with an index on the join column, and
/// a `hash_join` otherwise.
fn rewrite_nested_loop_join(plan: PlanNode, catalog: &Catalog) -> Result<PlanNode> {
    let (left, right, predicate, join_type) = match plan {
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => (left, right, predicate, join_type),
        other => return Ok(other),
    };

    let left_width = left.output_width(catalog)?;
    let Some((left_col, right_col)) = equi_join_columns(&predicate, left_width) else {
        return Ok(PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        });
    };

    if let PlanNode::SeqScan {
        table_oid,
        predicate: None,
    } = *right
    {
        for index in catalog.table_indexes(table_oid) {
            if index.key_attrs == [right_col] {
                return Ok(PlanNode::NestedIndexJoin {
                    left,
                    index_oid: index.oid,
                    left_key: Expression::Column(left_col),
                    join_type,
                });
            }
        }
    }

    Ok(PlanNode::HashJoin {
        left,
        right,
        left_key: Expression::Column(left_col),
        right_key: Expression::Column(right_col),
        join_type,
    })
}

/// `limit(sort(..))` becomes `top_n`.
fn rewrite_sort_limit(plan: PlanNode) -> PlanNode {
    let (child, limit) = match plan {
        PlanNode::Limit { child, limit } => (child, limit),
        other => return other,
    };
    if let PlanNode::Sort { child, order_bys } = *child {
        PlanNode::TopN {
            child,
            order_bys,
            n: limit,
        }
    } else {
        PlanNode::Limit { child, limit }
    }
}

/// Extract `(left column, right column)` from an equality between one
/// column of each side, addressed through the concatenated row.
fn equi_join_columns(predicate: &Expression, left_width: usize) -> Option<(usize, usize)> {
    let Expression::Compare {
        op: CompareOp::Equal,
        left,
        right,
    } = predicate
    else {
        return None;
    };
    let (Expression::Column(a), Expression::Column(b)) = (left.as_ref(), right.as_ref())
    else {
        return None;
    };
    if *a < left_width && *b >= left_width {
        Some((*a, *b - left_width))
    } else if *b < left_width && *a >= left_width {
        Some((*b, *a - left_width))
    } else {
        None
    }
}
