//! Singer Protocol
//!
//! Decoding of SCHEMA / RECORD / STATE / ACTIVATE_VERSION lines and
//! emission of the final state line.

pub mod message;

pub use message::{
    emit_state, parse_line, ActivateVersionMessage, Message, ProtocolError, RecordMessage,
    SchemaMessage,
};
