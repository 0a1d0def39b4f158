//! Stream writer: turn datasets into descriptors and data frames.
//!
//! [`StreamFormatter`] emits, for each dataset, whatever the dataset refers
//! to before the packet that refers to it. Record-aligned coordinates and
//! auxiliary planes share the packet of the data; other dependencies go out
//! as one-shot packets whose IDs are freed right after.

mod encoding;
mod formatter;
mod names;

pub use crate::config::{FormatterConfig, JoinMode};
pub use encoding::{
    Precision, ascii_for_values, binary_for_values, choose_transfer_type, estimate_precision,
};
pub use formatter::StreamFormatter;
pub use names::NameRegistry;
