//! sedmesh core: message envelope, trace/transaction context, body codecs,
//! and error codes shared by the SDK.

pub mod codec;
pub mod context;
pub mod error;
pub mod keys;
pub mod message;

pub use codec::{Codec, CodecError};
pub use context::{TraceContext, TxContext};
pub use error::{FieldError, Validate, ValidationResult};
pub use message::{Message, Properties, TopicAttributes};

