//! Physical plan nodes and the executor builder.
//!
//! Plan trees arrive from an upstream planner/optimizer; any tree honoring
//! the iterator contract is valid. `build_executor` turns a node into its
//! operator, wiring children recursively.

use crate::access::value::Value;
use crate::catalog::{Catalog, IndexOid, TableOid};
use crate::executor::{
    DeleteExecutor, ExecutionContext, Executor, FilterExecutor, HashAggregateExecutor,
    HashJoinExecutor, IndexScanExecutor, InsertExecutor, LimitExecutor,
    NestedIndexJoinExecutor, NestedLoopJoinExecutor, ProjectionExecutor, SeqScanExecutor,
    SortExecutor, TopNExecutor, ValuesExecutor,
};
use crate::expression::Expression;
use anyhow::{Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinType {
    Inner,
    Left,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AggregateFunction {
    CountStar,
    Count,
    Sum,
    Min,
    Max,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

#[derive(Debug, Clone, PartialEq)]
pub enum PlanNode {
    SeqScan {
        table_oid: TableOid,
        predicate: Option<Expression>,
    },
    IndexScan {
        index_oid: IndexOid,
    },
    Filter {
        predicate: Expression,
        child: Box<PlanNode>,
    },
    Projection {
        expressions: Vec<Expression>,
        child: Box<PlanNode>,
    },
    Values {
        rows: Vec<Vec<Value>>,
    },
    Insert {
        table_oid: TableOid,
        child: Box<PlanNode>,
    },
    Delete {
        table_oid: TableOid,
        child: Box<PlanNode>,
    },
    NestedLoopJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        predicate: Expression,
        join_type: JoinType,
    },
    NestedIndexJoin {
        left: Box<PlanNode>,
        index_oid: IndexOid,
        left_key: Expression,
        join_type: JoinType,
    },
    HashJoin {
        left: Box<PlanNode>,
        right: Box<PlanNode>,
        left_key: Expression,
        right_key: Expression,
        join_type: JoinType,
    },
    Aggregate {
        child: Box<PlanNode>,
        group_bys: Vec<Expression>,
        aggregates: Vec<(AggregateFunction, Expression)>,
    },
    Sort {
        child: Box<PlanNode>,
        order_bys: Vec<(Expression, SortOrder)>,
    },
    Limit {
        child: Box<PlanNode>,
        limit: usize,
    },
    TopN {
        child: Box<PlanNode>,
        order_bys: Vec<(Expression, SortOrder)>,
        n: usize,
    },
}

impl PlanNode {
    /// Number of columns this node produces; the optimizer uses it to
    /// split join predicates across sides.
    pub fn output_width(&self, catalog: &Catalog) -> Result<usize> {
        match self {
            PlanNode::SeqScan { table_oid, .. } => {
                match catalog.table(*table_oid) {
                    Some(table) => Ok(table.schema.len()),
                    None => bail!("Table {} not found", table_oid),
                }
            }
            PlanNode::IndexScan { index_oid } => {
                let index = catalog
                    .index(*index_oid)
                    .ok_or_else(|| anyhow::anyhow!("Index {} not found", index_oid))?;
                match catalog.table(index.table_oid) {
                    Some(table) => Ok(table.schema.len()),
                    None => bail!("Table {} not found", index.table_oid),
                }
            }
            PlanNode::Filter { child, .. } => child.output_width(catalog),
            PlanNode::Projection { expressions, .. } => Ok(expressions.len()),
            PlanNode::Values { rows } => Ok(rows.first().map_or(0, |r| r.len())),
            PlanNode::Insert { .. } | PlanNode::Delete { .. } => Ok(1),
            PlanNode::NestedLoopJoin { left, right, .. }
            | PlanNode::HashJoin { left, right, .. } => {
                Ok(left.output_width(catalog)? + right.output_width(catalog)?)
            }
            PlanNode::NestedIndexJoin {
                left, index_oid, ..
            } => {
                let index = catalog
                    .index(*index_oid)
                    .ok_or_else(|| anyhow::anyhow!("Index {} not found", index_oid))?;
                let inner = match catalog.table(index.table_oid) {
                    Some(table) => table.schema.len(),
                    None => bail!("Table {} not found", index.table_oid),
                };
                Ok(left.output_width(catalog)? + inner)
            }
            PlanNode::Aggregate {
                group_bys,
                aggregates,
                ..
            } => Ok(group_bys.len() + aggregates.len()),
            PlanNode::Sort { child, .. }
            | PlanNode::Limit { child, .. }
            | PlanNode::TopN { child, .. } => child.output_width(catalog),
        }
    }
}

/// Build the operator tree for a plan.
pub fn build_executor(plan: &PlanNode, ctx: ExecutionContext) -> Result<Box<dyn Executor>> {
    Ok(match plan {
        PlanNode::SeqScan {
            table_oid,
            predicate,
        } => Box::new(SeqScanExecutor::new(*table_oid, predicate.clone(), ctx)),
        PlanNode::IndexScan { index_oid } => {
            Box::new(IndexScanExecutor::new(*index_oid, ctx))
        }
        PlanNode::Filter { predicate, child } => {
            let child = build_executor(child, ctx)?;
            Box::new(FilterExecutor::new(predicate.clone(), child))
        }
        PlanNode::Projection { expressions, child } => {
            let child = build_executor(child, ctx)?;
            Box::new(ProjectionExecutor::new(expressions.clone(), child))
        }
        PlanNode::Values { rows } => Box::new(ValuesExecutor::new(rows.clone())),
        PlanNode::Insert { table_oid, child } => {
            let source = build_executor(child, ctx.clone())?;
            Box::new(InsertExecutor::new(*table_oid, source, ctx))
        }
        PlanNode::Delete { table_oid, child } => {
            let source = build_executor(child, ctx.clone())?;
            Box::new(DeleteExecutor::new(*table_oid, source, ctx))
        }
        PlanNode::NestedLoopJoin {
            left,
            right,
            predicate,
            join_type,
        } => {
            let left = build_executor(left, ctx.clone())?;
            let right = build_executor(right, ctx)?;
            Box::new(NestedLoopJoinExecutor::new(
                left,
                right,
                predicate.clone(),
                *join_type,
            ))
        }
        PlanNode::NestedIndexJoin {
            left,
            index_oid,
            left_key,
            join_type,
        } => {
            let left = build_executor(left, ctx.clone())?;
            Box::new(NestedIndexJoinExecutor::new(
                left,
                *index_oid,
                left_key.clone(),
                *join_type,
                ctx,
            ))
        }
        PlanNode::HashJoin {
            left,
            right,
            left_key,
            right_key,
            join_type,
        } => {
            let left = build_executor(left, ctx.clone())?;
            let right = build_executor(right, ctx)?;
            Box::new(HashJoinExecutor::new(
                left,
                right,
                left_key.clone(),
                right_key.clone(),
                *join_type,
            ))
        }
        PlanNode::Aggregate {
            child,
            group_bys,
            aggregates,
        } => {
            let child = build_executor(child, ctx)?;
            Box::new(HashAggregateExecutor::new(
                child,
                group_bys.clone(),
                aggregates.clone(),
            ))
        }
        PlanNode::Sort { child, order_bys } => {
            let child = build_executor(child, ctx)?;
            Box::new(SortExecutor::new(child, order_bys.clone()))
        }
        PlanNode::Limit { child, limit } => {
            let child = build_executor(child, ctx)?;
            Box::new(LimitExecutor::new(child, *limit))
        }
        PlanNode::TopN {
            child,
            order_bys,
            n,
        } => {
            let child = build_executor(child, ctx)?;
            Box::new(TopNExecutor::new(child, order_bys.clone(), *n))
        }
    })
}

/// Run a plan to completion, collecting the produced rows.
pub fn execute_plan(plan: &PlanNode, ctx: ExecutionContext) -> Result<Vec<Vec<Value>>> {
    let mut executor = build_executor(plan, ctx)?;
    executor.init()?;
    let mut rows = Vec::new();
    while let Some(tuple) = executor.next()? {
        rows.push(crate::access::value::deserialize_values(&tuple.data)?);
    }
    Ok(rows)
}

