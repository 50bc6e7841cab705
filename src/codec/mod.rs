//! Codecs
//!
//! - [`timeseries`]: the delimited per-tag reading stream
//! - [`text`]: the flat text payload of a tag result
//! - [`xml`]: the self-describing XML document of a `ReadResult`

mod error;
mod separators;
pub mod text;
pub mod timeseries;
pub mod xml;

pub use error::{CodecError, CodecResult};
pub use separators::{Separators, ESCAPE};
pub use timeseries::{decode_reading, decode_readings, encode_readings, format_value, Readings};
