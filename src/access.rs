pub mod btree;
pub mod heap;
pub mod tuple;
pub mod value;

pub use btree::BPlusTree;
pub use heap::{TableHeap, TableScanner};
pub use tuple::{Tuple, TupleId};
pub use value::{DataType, Value, deserialize_values, serialize_values};
