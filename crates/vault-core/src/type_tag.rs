//! Row and transpose type descriptors.
//!
//! Callers use these strings to learn how a dataset's data is laid out without
//! a side channel. The grammar:
//!
//! ```text
//! column    := array? base unit?
//! array     := '*' rank?          (rank omitted when it is 1)
//! base      := 'i' | 'v' | 'c' | 's' | 't'
//! unit      := '[' text ']'
//! row       := '*(' column+ ')'   (extended datasets)
//!            | '*2v'              (legacy and simple datasets)
//! transpose := '(' column+ ')'    with each column's rank raised by one
//! ```

use crate::column::ColumnRef;

fn array_prefix(rank: usize) -> String {
    match rank {
        0 => String::new(),
        1 => "*".to_string(),
        n => format!("*{}", n),
    }
}

/// Tag for a single column, with its array rank raised by `extra_rank`.
pub fn column_tag(column: &ColumnRef<'_>, extra_rank: usize) -> String {
    let mut tag = array_prefix(column.shape.rank() + extra_rank);
    tag.push(column.datatype.code());
    if !column.unit.is_empty() {
        tag.push('[');
        tag.push_str(column.unit);
        tag.push(']');
    }
    tag
}

/// Row type of a dataset whose rows are a plain 2-D float array.
pub const SIMPLE_ROW_TYPE: &str = "*2v";

/// Row type for typed (extended) datasets: a list of records.
pub fn row_type(columns: &[ColumnRef<'_>]) -> String {
    let fields: String = columns.iter().map(|c| column_tag(c, 0)).collect();
    format!("*({})", fields)
}

/// Transpose type for typed datasets: one array per column.
pub fn transpose_type(columns: &[ColumnRef<'_>]) -> String {
    let fields: String = columns.iter().map(|c| column_tag(c, 1)).collect();
    format!("({})", fields)
}
