//! File import for the raw extract and dimension tables.
//!
//! An import reads one tabular file, maps its bilingual headers onto the
//! target entity's canonical fields, parses each row into a typed record,
//! de-duplicates by natural key and writes the survivors in fixed-size
//! batches. Row and batch problems are collected into an [`ImportReport`];
//! only whole-file problems abort the run.

pub mod dedupe;
pub mod entities;
pub mod parse;
pub mod pipeline;
pub mod reader;
pub mod synonyms;

pub use dedupe::dedupe_by_key;
pub use entities::RowError;
pub use parse::ParseError;
pub use pipeline::{run_import, ImportReport, ImportRequest, ImportSettings, ImportStatus};
pub use reader::{read_table, ReadError, Table};
pub use synonyms::{resolve_columns, ColumnMap, FieldSpec};
