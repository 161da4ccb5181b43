//! Tabular value model.
//!
//! Typed representation of a parsed dataset: ordered unique headers, ordered
//! rows, and per-column type inference. Every pipeline step consumes one
//! `TabularValue` and produces a new one.

pub mod csv_io;
pub mod types;
pub mod value;

pub use csv_io::{cell_text, from_csv_str, read_csv, to_csv_string, write_csv};
pub use types::{classify, is_blank, ColumnType};
pub use value::{Row, TabularValue};
