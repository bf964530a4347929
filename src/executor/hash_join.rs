//! Hash join executor.

use crate::access::tuple::Tuple;
use crate::access::value::{Value, deserialize_values};
use crate::catalog::Schema;
use crate::executor::{Executor, synthetic_tuple};
use crate::expression::Expression;
use crate::planner::physical::JoinType;
use anyhow::Result;
use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

/// Hash join: both sides are materialized into hash tables keyed by a
/// 128-bit hash of the join key's string form; probing walks the left
/// buckets in build order and re-checks real equality inside a bucket.
pub struct HashJoinExecutor {
    left: Box<dyn Executor>,
    right: Box<dyn Executor>,
    left_key: Expression,
    right_key: Expression,
    join_type: JoinType,
    /// Left buckets in build order: (key hash, rows with their key value).
    left_groups: Vec<(u128, Vec<(Vec<Value>, Value)>)>,
    right_groups: HashMap<u128, Vec<(Vec<Value>, Value)>>,
    group_pos: usize,
    left_pos: usize,
    right_pos: usize,
    left_matched: bool,
    output_schema: Schema,
}

/// String-form 128-bit key hash: two independent 64-bit hashes over the
/// rendered value.
fn hash_key(value: &Value) -> u128 {
    let rendered = value.to_string();
    let mut low = DefaultHasher::new();
    rendered.hash(&mut low);
    let mut high = DefaultHasher::new();
    (rendered, 0x9e3779b9u32).hash(&mut high);
    (high.finish() as u128) << 64 | low.finish() as u128
}

impl HashJoinExecutor {
    pub fn new(
        left: Box<dyn Executor>,
        right: Box<dyn Executor>,
        left_key: Expression,
        right_key: Expression,
        join_type: JoinType,
    ) -> Self {
        Self {
            left,
            right,
            left_key,
            right_key,
            join_type,
            left_groups: Vec::new(),
            right_groups: HashMap::new(),
            group_pos: 0,
            left_pos: 0,
            right_pos: 0,
            left_matched: false,
            output_schema: Schema::new(Vec::new()),
        }
    }

    fn emit(left: &[Value], right: &[Value]) -> Tuple {
        let mut combined = left.to_vec();
        combined.extend_from_slice(right);
        synthetic_tuple(&combined)
    }
}

impl Executor for HashJoinExecutor {
    fn init(&mut self) -> Result<()> {
        self.left.init()?;
        self.right.init()?;

        self.left_groups.clear();
        self.right_groups.clear();
        let mut left_index: HashMap<u128, usize> = HashMap::new();

        while let Some(tuple) = self.left.next()? {
            let values = deserialize_values(&tuple.data)?;
            let key = self.left_key.evaluate(&values)?;
            let hash = hash_key(&key);
            match left_index.get(&hash) {
                Some(&pos) => self.left_groups[pos].1.push((values, key)),
                None => {
                    left_index.insert(hash, self.left_groups.len());
                    self.left_groups.push((hash, vec![(values, key)]));
                }
            }
        }
        while let Some(tuple) = self.right.next()? {
            let values = deserialize_values(&tuple.data)?;
            let key = self.right_key.evaluate(&values)?;
            let hash = hash_key(&key);
            self.right_groups.entry(hash).or_default().push((values, key));
        }

        let mut columns = self.left.output_schema().columns.clone();
        columns.extend(self.right.output_schema().columns.clone());
        self.output_schema = Schema::new(columns);

        self.group_pos = 0;
        self.left_pos = 0;
        self.right_pos = 0;
        self.left_matched = false;
        Ok(())
    }

    fn next(&mut self) -> Result<Option<Tuple>> {
        while self.group_pos < self.left_groups.len() {
            let (hash, left_rows) = &self.left_groups[self.group_pos];

            if self.left_pos >= left_rows.len() {
                self.group_pos += 1;
                self.left_pos = 0;
                self.right_pos = 0;
                self.left_matched = false;
                continue;
            }

            let (left_values, left_key) = &left_rows[self.left_pos];
            let bucket = self.right_groups.get(hash);
            let bucket_len = bucket.map_or(0, |rows| rows.len());

            if self.right_pos >= bucket_len {
                // This left row is done with its bucket.
                let emit_padding = self.join_type == JoinType::Left && !self.left_matched;
                let padded = if emit_padding {
                    let padding = vec![Value::Null; self.right.output_schema().len()];
                    Some(Self::emit(left_values, &padding))
                } else {
                    None
                };
                self.left_pos += 1;
                self.right_pos = 0;
                self.left_matched = false;
                if let Some(tuple) = padded {
                    return Ok(Some(tuple));
                }
                continue;
            }

            let (right_values, right_key) =
                &bucket.expect("non-empty bucket")[self.right_pos];
            self.right_pos += 1;
            if !left_key.is_null() && left_key == right_key {
                self.left_matched = true;
                return Ok(Some(Self::emit(left_values, right_values)));
            }
        }
        Ok(None)
    }

    fn output_schema(&self) -> &Schema {
        &self.output_schema
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::test_support::collect_rows;
    use crate::executor::values::ValuesExecutor;

    fn left_side() -> ValuesExecutor {
        ValuesExecutor::new(vec![
            vec![Value::Int32(1), Value::String("a".into())],
            vec![Value::Int32(2), Value::String("b".into())],
            vec![Value::Int32(3), Value::String("c".into())],
        ])
    }

    fn right_side() -> ValuesExecutor {
        ValuesExecutor::new(vec![
            vec![Value::Int32(2), Value::Int32(200)],
            vec![Value::Int32(1), Value::Int32(100)],
            vec![Value::Int32(1), Value::Int32(150)],
        ])
    }

    fn executor(join_type: JoinType) -> HashJoinExecutor {
        HashJoinExecutor::new(
            Box::new(left_side()),
            Box::new(right_side()),
            Expression::column(0),
            Expression::column(0),
            join_type,
        )
    }

    #[test]
    fn test_inner_join() -> Result<()> {
        let mut executor = executor(JoinType::Inner);
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 3);
        // Left build order is preserved: both matches for key 1 first.
        assert_eq!(rows[0][0], Value::Int32(1));
        assert_eq!(rows[1][0], Value::Int32(1));
        assert_eq!(rows[2][0], Value::Int32(2));
        assert_eq!(rows[2][3], Value::Int32(200));

        Ok(())
    }

    #[test]
    fn test_left_join_pads_unmatched() -> Result<()> {
        let mut executor = executor(JoinType::Left);
        executor.init()?;
        let rows = collect_rows(&mut executor)?;

        assert_eq!(rows.len(), 4);
        let padded: Vec<_> = rows
            .iter()
            .filter(|r| r[2] == Value::Null)
            .collect();
        assert_eq!(padded.len(), 1);
        assert_eq!(padded[0][0], Value::Int32(3));

        Ok(())
    }

    #[test]
    fn test_null_keys_never_match() -> Result<()> {
        let left = ValuesExecutor::new(vec![vec![Value::Null, Value::Int32(1)]]);
        let right = ValuesExecutor::new(vec![vec![Value::Null, Value::Int32(2)]]);

        let mut executor = HashJoinExecutor::new(
            Box::new(left),
            Box::new(right),
            Expression::column(0),
            Expression::column(0),
            JoinType::Inner,
        );
        executor.init()?;
        assert!(collect_rows(&mut executor)?.is_empty());

        Ok(())
    }
}
