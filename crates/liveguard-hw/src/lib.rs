//! liveguard-hw: capture boundary with frames, pixel conversion, frame sources.
//!
//! Converts platform camera layouts (BGRA, NV12) into the byte layouts the
//! inference engines read, and defines the contract capture code implements
//! to deliver frames.

pub mod convert;
pub mod frame;
pub mod source;

pub use convert::{convert, ConvertedBuffer};
pub use frame::{FormatError, Frame, PixelFormat, Plane};
pub use source::{DirectorySource, FrameSource, SourceError, VecSource, DEFAULT_ORIENTATION};
