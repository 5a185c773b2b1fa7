pub mod column;
pub mod family;
pub mod row;
pub mod value;

pub use column::Column;
pub use family::ColumnFamily;
pub use row::{DirtyBits, Row, RowKey};
pub use value::{Value, ValueKind};
