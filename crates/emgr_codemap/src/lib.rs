//! Native code address ranges and the methods that own them.

mod table;

pub use table::{CodeChunk, CodeTable, CodeTableError, CodeTableStats};
