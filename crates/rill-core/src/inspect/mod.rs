//! Value inspection: the formatter and keyed echo tables.

mod format;
mod table;

pub use format::{DEFAULT_LIMIT, ELLIPSIS, FormatOptions, Indent, Quote, format, format_number};
pub use table::KeyedEchoAggregator;
