//! Wire format core
//!
//! Byte-order primitives, the self-describing field-table codec, and the
//! frame model (incremental builder plus writer) shared by every layer above.

mod builder;
mod error;
mod frame;
pub mod method;
mod table;
pub mod wire;
mod writer;

pub use builder::FrameBuilder;
pub use error::{Error, Result};
pub use frame::{Frame, FrameKind};
pub use method::Method;
pub use table::{FieldValue, Table};
pub use writer::{FrameWriter, encode_frame};

/// Protocol header sent as the first bytes of every connection
pub const PROTOCOL_HEADER: [u8; 8] = *b"AMQP\x00\x00\x09\x01";

/// Fixed sentinel byte terminating every frame
pub const FRAME_END: u8 = 0xCE;

/// Frame header size: kind (1) + channel (2) + payload size (4)
pub const FRAME_HEADER_SIZE: usize = 7;

/// Default maximum frame payload size (128 KiB) before tuning negotiation
pub const DEFAULT_FRAME_MAX: usize = 128 * 1024;

/// Maximum nesting depth for tables/arrays inside field values.
///
/// The format itself sets no bound; the cap keeps a hostile peer from
/// driving decode recursion into stack exhaustion.
pub const MAX_FIELD_NESTING: usize = 32;
