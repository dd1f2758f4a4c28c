//! Recurrence engine: structured specs, natural-language parsing, the
//! RRULE codec and scoped series edits.

mod parse;
pub mod rrule;
mod series;
mod spec;

pub use parse::{parse_strict, ParsedRecurrence, RecurrenceParser};
pub use series::{OccurrencePatch, RecurrenceSeries, SeriesPatch};
pub use spec::{resolve_local, Frequency, RecurrenceSpec};
