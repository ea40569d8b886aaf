//! Volume container decoding and random-access sampling
//!
//! # Architecture
//!
//! The container format is a text header terminated by a blank line,
//! followed by a raw binary payload. [`header`] turns the text into a typed
//! [`VolumeHeader`]; [`reader`] samples single elements from the payload by
//! byte-offset arithmetic through the [`VoxelSource`] contract. Volumes in
//! other container families participate by implementing [`VoxelSource`] in
//! their own reader.

pub mod header;
pub mod reader;

pub use header::{
    AxisKind, Centering, CoordinateFrame, DataFileSpec, ElementType, Encoding, Endianness,
    FormatError, VolumeHeader,
};
pub use reader::{ArrayVoxelSource, VoxelGridReader, VoxelSource};
