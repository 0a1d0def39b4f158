//! Stream reader: rebuild datasets from packets.
//!
//! Reading happens in two phases. While the stream flows, every declared name
//! collects its records in a [`JoinAccumulator`]; nothing is linked yet
//! because a plane may refer to a name declared later. When a dataset is
//! requested, references (`DEPEND_n`, `PLANE_0`, error bars, bundle members,
//! join children) are resolved by name and joins are flattened where their
//! slices line up.
//!
//! ## Joins
//!
//! A name declared again at the same slice rank opens another slice:
//!
//! - declared rank equal to the slice rank: the slices are concatenated along
//!   the record axis, as when several streams are appended to one file
//! - declared rank one above the slice rank: the slices stay a join, one
//!   slice per declaration
//!
//! A repeat at a different slice rank is a [`RankMismatch`](crate::QStreamError::RankMismatch).

mod builder;
mod handler;
mod resolve;

pub use builder::{JoinAccumulator, PlaneBuilder};
pub use handler::DataSetStreamHandler;
