//! Error types for stream processing.
//!
//! All errors implement the `std::error::Error` trait and carry enough context
//! (packet ID, dataset name, field text) to locate the offending packet.
//!
//! ## Error Categories
//!
//! - **Protocol violations**: a data frame referencing an undeclared or retired
//!   packet ID, packet ID exhaustion, a rank mismatch on a join. Fatal to the
//!   stream.
//! - **Descriptor errors**: an XML descriptor that cannot be interpreted. Fatal
//!   for that packet type.
//! - **Time field errors**: a malformed `timeN` field. Fatal, since there is no
//!   safe numeric sentinel for a time.
//! - **Resolution errors**: a by-name reference that names no dataset on the
//!   stream.
//! - **Upstream errors**: an `<exception>` packet sent in-band by the producer.
//!
//! Malformed ASCII numeric fields and properties without a serializer are not
//! errors: the reader substitutes `NaN` or drops the property and logs it.
//!
//! ```rust
//! use qstream::QStreamError;
//!
//! let error = QStreamError::protocol(Some(5), "data frame references undeclared packet id");
//! assert!(!error.is_recoverable());
//! assert!(error.to_string().contains("05"));
//! for suggestion in error.recovery_suggestions() {
//!     println!("  - {}", suggestion);
//! }
//! ```

use thiserror::Error;

use crate::protocol::PacketId;

/// Result type alias for stream operations.
pub type Result<T, E = QStreamError> = std::result::Result<T, E>;

/// Main error type for stream operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum QStreamError {
    #[error("I/O error while {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Protocol violation{}: {details}", format_packet(.packet_id))]
    Protocol { packet_id: Option<PacketId>, details: String },

    #[error("No free packet IDs: all {live} packet descriptor IDs are live")]
    IdsExhausted { live: usize },

    #[error("Rank mismatch for '{name}': expected rank {expected}, found {found}")]
    RankMismatch { name: String, expected: usize, found: usize },

    #[error("Invalid descriptor{}: {details}", format_packet(.packet_id))]
    Descriptor {
        packet_id: Option<PacketId>,
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Parse error in {context}: {details}")]
    Parse { context: String, details: String },

    #[error("Malformed time field '{field}': {details}")]
    TimeFormat { field: String, details: String },

    #[error("Property {property} of '{name}' references '{reference}', which is not on the stream")]
    UnresolvedReference { name: String, property: String, reference: String },

    #[error("Dataset '{name}' not found on the stream")]
    DataSetNotFound { name: String },

    #[error("Unsupported encoding '{encoding}'")]
    UnsupportedEncoding { encoding: String },

    #[error("Buffer operation failed: {context}")]
    Buffer { context: String, needed: usize, available: usize },

    #[error("Configuration error: {details}")]
    Config {
        details: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Upstream source failed ({kind}): {message}")]
    Upstream { kind: String, message: String },
}

fn format_packet(packet_id: &Option<PacketId>) -> String {
    match packet_id {
        Some(id) => format!(" in packet [{}]", id),
        None => String::new(),
    }
}

impl QStreamError {
    /// Returns whether the stream can continue after this error.
    ///
    /// Every error that reaches a caller aborts the current read or write;
    /// only buffer errors (a caller handed the codec a short slice) leave the
    /// stream itself intact.
    pub fn is_recoverable(&self) -> bool {
        match self {
            QStreamError::Buffer { .. } => true,
            QStreamError::DataSetNotFound { .. } => true,
            QStreamError::UnresolvedReference { .. } => true,
            QStreamError::Io { .. } => false,
            QStreamError::Protocol { .. } => false,
            QStreamError::IdsExhausted { .. } => false,
            QStreamError::RankMismatch { .. } => false,
            QStreamError::Descriptor { .. } => false,
            QStreamError::Parse { .. } => false,
            QStreamError::TimeFormat { .. } => false,
            QStreamError::UnsupportedEncoding { .. } => false,
            QStreamError::Config { .. } => false,
            QStreamError::Upstream { .. } => false,
        }
    }

    /// Returns whether this error is a violation of the framing protocol.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            QStreamError::Protocol { .. }
                | QStreamError::IdsExhausted { .. }
                | QStreamError::RankMismatch { .. }
        )
    }

    /// Packet ID the error occurred in, when known.
    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            QStreamError::Protocol { packet_id, .. } => *packet_id,
            QStreamError::Descriptor { packet_id, .. } => *packet_id,
            _ => None,
        }
    }

    /// Returns suggested recovery actions for this error.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            QStreamError::Io { .. } => vec![
                "Check the file or channel is readable",
                "Verify the producer is still writing",
            ],
            QStreamError::Protocol { .. } => vec![
                "Verify the stream was not truncated or spliced",
                "Check the producer declares each packet before sending data",
            ],
            QStreamError::IdsExhausted { .. } => vec![
                "Retire one-shot packet descriptors after sending them",
                "Reduce the number of concurrently live packet types",
            ],
            QStreamError::RankMismatch { .. } => vec![
                "Check repeated datasets keep the same rank",
                "Use distinct names for datasets of different rank",
            ],
            QStreamError::Descriptor { .. } => vec![
                "Check the descriptor XML is well formed",
                "Verify the encoding and length attributes",
            ],
            QStreamError::Parse { .. } => vec![
                "Check data format compatibility",
                "Verify source data integrity",
            ],
            QStreamError::TimeFormat { .. } => vec![
                "Check the time field width matches its declared encoding",
                "Verify timestamps are ISO-8601",
            ],
            QStreamError::UnresolvedReference { .. } => vec![
                "Read the whole stream before resolving datasets",
                "Check the producer sends every referenced dependency",
            ],
            QStreamError::DataSetNotFound { .. } => vec![
                "Check dataset name spelling",
                "List available names with DataSetStreamHandler::names",
            ],
            QStreamError::UnsupportedEncoding { .. } => vec![
                "Use one of double, float, int2, int4, int8, asciiN, hexN, timeN",
                "Update the reader to a compatible version",
            ],
            QStreamError::Buffer { .. } => vec![
                "Pass a buffer of exactly size_bytes() bytes",
                "Check record offsets against the packet descriptor",
            ],
            QStreamError::Config { .. } => vec![
                "Check the YAML configuration syntax",
                "Remove unknown or out-of-range settings",
            ],
            QStreamError::Upstream { .. } => vec![
                "Inspect the producer's logs",
                "Retry the request once the source recovers",
            ],
        }
    }

    /// Helper constructor for I/O errors with context.
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        QStreamError::Io { context: context.into(), source }
    }

    /// Helper constructor for protocol violations.
    pub fn protocol(packet_id: Option<u8>, details: impl Into<String>) -> Self {
        QStreamError::Protocol { packet_id: packet_id.map(PacketId::new), details: details.into() }
    }

    /// Helper constructor for descriptor errors.
    pub fn descriptor(packet_id: Option<PacketId>, details: impl Into<String>) -> Self {
        QStreamError::Descriptor { packet_id, details: details.into(), source: None }
    }

    /// Helper constructor for descriptor errors wrapping an underlying failure.
    pub fn descriptor_with_source(
        packet_id: Option<PacketId>,
        details: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        QStreamError::Descriptor { packet_id, details: details.into(), source: Some(source) }
    }

    /// Helper constructor for parse errors.
    pub fn parse(context: impl Into<String>, details: impl Into<String>) -> Self {
        QStreamError::Parse { context: context.into(), details: details.into() }
    }

    /// Helper constructor for malformed time fields.
    pub fn time_format(field: impl Into<String>, details: impl Into<String>) -> Self {
        QStreamError::TimeFormat { field: field.into(), details: details.into() }
    }

    /// Helper constructor for short buffers.
    pub fn buffer(context: impl Into<String>, needed: usize, available: usize) -> Self {
        QStreamError::Buffer { context: context.into(), needed, available }
    }

    /// Attach a packet ID to a descriptor or protocol error that lacks one.
    pub fn in_packet(self, id: PacketId) -> Self {
        match self {
            QStreamError::Protocol { packet_id: None, details } => {
                QStreamError::Protocol { packet_id: Some(id), details }
            }
            QStreamError::Descriptor { packet_id: None, details, source } => {
                QStreamError::Descriptor { packet_id: Some(id), details, source }
            }
            other => other,
        }
    }
}

impl From<std::io::Error> for QStreamError {
    fn from(err: std::io::Error) -> Self {
        QStreamError::Io { context: "accessing the byte channel".to_string(), source: err }
    }
}

impl From<serde_yaml_ng::Error> for QStreamError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        QStreamError::Config { details: err.to_string(), source: Some(Box::new(err)) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[cfg(test)]
    mod property_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
          #[test]
          fn protocol_errors_name_their_packet(id in 0u8..100u8, details in ".*") {
            let error = QStreamError::protocol(Some(id), details.clone());
            let message = error.to_string();
            let expected = format!("[{:02}]", id);
            prop_assert!(message.contains(&expected));
            prop_assert!(message.contains(&details));
            prop_assert_eq!(error.packet_id(), Some(PacketId::new(id)));
            prop_assert!(error.is_protocol_violation());
          }

          #[test]
          fn error_messages_carry_their_context(
            name in "\\w+",
            property in "[A-Z_]+[0-9]",
            reference in "\\w+",
            expected in 0usize..5usize,
            found in 0usize..5usize,
          ) {
            let unresolved = QStreamError::UnresolvedReference {
                name: name.clone(),
                property: property.clone(),
                reference: reference.clone(),
            };
            let message = unresolved.to_string();
            prop_assert!(message.contains(&name));
            prop_assert!(message.contains(&property));
            prop_assert!(message.contains(&reference));

            let mismatch = QStreamError::RankMismatch { name: name.clone(), expected, found };
            let message = mismatch.to_string();
            prop_assert!(message.contains(&expected.to_string()));
            prop_assert!(message.contains(&found.to_string()));
          }

          #[test]
          fn io_conversion_preserves_source(reason in ".*") {
            let io_err = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, reason.clone());
            let converted: QStreamError = io_err.into();
            match converted {
              QStreamError::Io { source, .. } => {
                prop_assert_eq!(source.to_string(), reason);
              }
              _ => prop_assert!(false, "Expected Io error from io::Error conversion"),
            }
          }
        }
    }

    #[test]
    fn error_traits_validation() {
        fn assert_send_sync_static<T: Send + Sync + 'static>() {}
        assert_send_sync_static::<QStreamError>();

        let error = QStreamError::protocol(None, "test");
        let _: &dyn std::error::Error = &error;
    }

    #[test]
    fn untracked_protocol_errors_omit_packet() {
        let error = QStreamError::protocol(None, "unexpected byte 0x41 at frame boundary");
        assert_eq!(
            error.to_string(),
            "Protocol violation: unexpected byte 0x41 at frame boundary"
        );
        assert_eq!(error.packet_id(), None);
    }

    #[test]
    fn in_packet_fills_missing_context_only() {
        let error =
            QStreamError::descriptor(None, "missing id attribute").in_packet(PacketId::new(3));
        assert_eq!(error.packet_id(), Some(PacketId::new(3)));

        let error = QStreamError::protocol(Some(7), "x").in_packet(PacketId::new(3));
        assert_eq!(error.packet_id(), Some(PacketId::new(7)));
    }

    #[test]
    fn recovery_methods_work() {
        let exhausted = QStreamError::IdsExhausted { live: 99 };
        let missing = QStreamError::DataSetNotFound { name: "flux".into() };

        assert!(!exhausted.is_recoverable());
        assert!(exhausted.is_protocol_violation());
        assert!(missing.is_recoverable());

        for suggestion in exhausted.recovery_suggestions() {
            assert!(suggestion.len() > 5);
        }
        assert!(!missing.recovery_suggestions().is_empty());
    }

    #[test]
    fn descriptor_errors_chain_their_source() {
        let source = std::io::Error::other("unexpected end of element");
        let error = QStreamError::descriptor_with_source(
            Some(PacketId::new(2)),
            "cannot parse <packet>",
            Box::new(source),
        );
        let chained = std::error::Error::source(&error).map(|s| s.to_string());
        assert_eq!(chained.as_deref(), Some("unexpected end of element"));
    }
}
