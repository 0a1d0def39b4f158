//! Provider implementations

pub mod framed;

pub use framed::FramedProvider;
