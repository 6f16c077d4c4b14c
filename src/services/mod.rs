//! Request processing stages
//!
//! Each stage is a small stateless service used by
//! [`RemovalPipeline`](crate::pipeline::RemovalPipeline).

pub mod decode;
pub mod format;
pub mod normalize;
pub mod payload;

pub use decode::ImageDecoder;
pub use format::ResponseEncoder;
pub use normalize::SizeNormalizer;
pub use payload::{PayloadValidator, DATA_URI_MARKER};
