//! Random-access voxel sampling
//!
//! [`VoxelGridReader`] samples single scalar elements from a raw-encoded
//! volume by direct byte-offset arithmetic. It never loads or caches the
//! payload: region and displacement grids are far larger than is practical
//! to hold resident, so every sample is one bounded read against a held-open
//! file handle.
//!
//! The linear offset is row-major over the axes in declared (fastest-first)
//! order, which for a 3-D grid is `x + y*sx + z*sx*sy`. The bounds check is
//! against the total element count, matching the container's flat storage
//! order; an offset at or past the end yields `None` rather than a read.
//!
//! [`VoxelSource`] is the sampling contract shared with readers for other
//! container families: the transform stages only ever see this trait, so an
//! externally decoded volume plugs in without touching the pipeline.

use byteorder::{BigEndian, ByteOrder, LittleEndian, ReadBytesExt};
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use crate::error::{Result, TransformError};
use crate::volume::header::{
    find_data_boundary, ElementType, Endianness, FormatError, VolumeHeader,
};

/// Largest header text we will scan for the blank-line boundary
pub const MAX_HEADER_BYTES: usize = 1 << 20;

const HEADER_CHUNK_BYTES: usize = 8 * 1024;

/// Random-access sampling contract shared by all volume readers
///
/// The index is one entry per axis in the grid's declared order. Out-of-range
/// indices yield `Ok(None)`; `Err` is reserved for I/O faults and contract
/// misuse (wrong arity, released handle).
pub trait VoxelSource: Send {
    /// Per-axis extents in declared (fastest-first) order
    fn extents(&self) -> &[u64];

    /// Read one scalar element, or `None` when the index is out of range
    fn sample(&mut self, index: &[u64]) -> Result<Option<f64>>;

    /// Release the underlying handle; further samples fail
    fn release(&mut self);
}

/// Samples scalar elements from a decoded volume via one open file handle
#[derive(Debug)]
pub struct VoxelGridReader {
    header: VolumeHeader,
    path: PathBuf,
    file: Option<File>,
    endianness: Endianness,
    element_size: u64,
    total_elements: u64,
}

impl VoxelGridReader {
    /// Open a volume for sampling: decode the header, validate that the
    /// payload supports random access, and keep the handle for the reader's
    /// lifetime.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::open(&path)?;
        let prefix = read_header_prefix(&mut file)?;
        let header = VolumeHeader::parse(&prefix)?;

        if !header.encoding.is_seekable() {
            return Err(FormatError::EncodingNotSeekable(header.encoding.name().to_string()).into());
        }
        if header.data_file.is_some() {
            return Err(FormatError::InvalidValue {
                field: "data file".to_string(),
                message: "detached payloads cannot be sampled".to_string(),
            }
            .into());
        }

        tracing::debug!(
            "Opened volume {}: {} axes {:?}, {} elements of {}",
            path.display(),
            header.dimension,
            header.sizes,
            header.total_elements(),
            header.element_type,
        );

        Ok(Self {
            endianness: header.endianness.unwrap_or_else(Endianness::native),
            element_size: header.element_size() as u64,
            total_elements: header.total_elements(),
            header,
            path,
            file: Some(file),
        })
    }

    /// The decoded header
    pub fn header(&self) -> &VolumeHeader {
        &self.header
    }

    /// Path this reader was opened from
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Convenience sampling for 3-D grids
    pub fn sample3(&mut self, x: u64, y: u64, z: u64) -> Result<Option<f64>> {
        self.sample(&[x, y, z])
    }

    /// Linear element offset for an index, `None` when any stride arithmetic
    /// overflows (necessarily out of range)
    fn linear_offset(&self, index: &[u64]) -> Option<u64> {
        let mut offset: u64 = 0;
        let mut stride: u64 = 1;
        for (&i, &size) in index.iter().zip(self.header.sizes.iter()) {
            offset = offset.checked_add(i.checked_mul(stride)?)?;
            stride = stride.checked_mul(size)?;
        }
        Some(offset)
    }
}

impl VoxelSource for VoxelGridReader {
    fn extents(&self) -> &[u64] {
        &self.header.sizes
    }

    fn sample(&mut self, index: &[u64]) -> Result<Option<f64>> {
        if index.len() != self.header.dimension {
            return Err(TransformError::Sample(format!(
                "index has {} components but {} has {} axes",
                index.len(),
                self.path.display(),
                self.header.dimension
            )));
        }
        let offset = match self.linear_offset(index) {
            Some(offset) if offset < self.total_elements => offset,
            _ => return Ok(None),
        };
        let position = (self.header.data_offset as u64)
            .checked_add(offset.checked_mul(self.element_size).ok_or_else(|| {
                TransformError::Sample("element offset overflows file position".to_string())
            })?)
            .ok_or_else(|| {
                TransformError::Sample("element offset overflows file position".to_string())
            })?;

        let file = self.file.as_mut().ok_or_else(|| {
            TransformError::Sample(format!("volume {} already released", self.path.display()))
        })?;
        file.seek(SeekFrom::Start(position))?;
        let value = match self.endianness {
            Endianness::Little => read_element::<LittleEndian, _>(file, self.header.element_type)?,
            Endianness::Big => read_element::<BigEndian, _>(file, self.header.element_type)?,
        };
        Ok(Some(value))
    }

    fn release(&mut self) {
        if self.file.take().is_some() {
            tracing::debug!("Released volume {}", self.path.display());
        }
    }
}

impl Drop for VoxelGridReader {
    fn drop(&mut self) {
        // Backstop so handles close on every exit path, including unwinds.
        self.release();
    }
}

/// In-memory voxel source for small grids
///
/// Holds the whole payload resident, so it is only suitable for grids that
/// are known to be small: synthetic fixtures, identity displacement fields,
/// downsampled previews. Shares the flat-offset bounds policy of
/// [`VoxelGridReader`].
#[derive(Debug, Clone)]
pub struct ArrayVoxelSource {
    extents: Vec<u64>,
    values: Vec<f64>,
    released: bool,
}

impl ArrayVoxelSource {
    /// Grid of the given extents with every element set to `value`
    pub fn filled(extents: Vec<u64>, value: f64) -> Self {
        let total: u64 = extents.iter().product();
        Self {
            extents,
            values: vec![value; total as usize],
            released: false,
        }
    }

    /// Grid of the given extents backed by explicit values in flat
    /// (fastest-axis-first) order
    pub fn from_values(extents: Vec<u64>, values: Vec<f64>) -> Result<Self> {
        let total: u64 = extents.iter().product();
        if values.len() as u64 != total {
            return Err(TransformError::Sample(format!(
                "{} values supplied for a grid of {} elements",
                values.len(),
                total
            )));
        }
        Ok(Self {
            extents,
            values,
            released: false,
        })
    }
}

impl VoxelSource for ArrayVoxelSource {
    fn extents(&self) -> &[u64] {
        &self.extents
    }

    fn sample(&mut self, index: &[u64]) -> Result<Option<f64>> {
        if self.released {
            return Err(TransformError::Sample(
                "in-memory grid already released".to_string(),
            ));
        }
        if index.len() != self.extents.len() {
            return Err(TransformError::Sample(format!(
                "index has {} components but grid has {} axes",
                index.len(),
                self.extents.len()
            )));
        }
        let mut offset: u64 = 0;
        let mut stride: u64 = 1;
        for (&i, &size) in index.iter().zip(self.extents.iter()) {
            offset = match i.checked_mul(stride).and_then(|o| offset.checked_add(o)) {
                Some(offset) => offset,
                None => return Ok(None),
            };
            stride = match stride.checked_mul(size) {
                Some(stride) => stride,
                None => return Ok(None),
            };
        }
        Ok(self.values.get(offset as usize).copied())
    }

    fn release(&mut self) {
        self.released = true;
    }
}

/// Decode one element with the declared byte order. The swap only happens
/// when the declared order differs from the host's and the element is wider
/// than one byte; `byteorder` compiles matching orders down to plain loads.
fn read_element<E: ByteOrder, R: Read>(
    reader: &mut R,
    element_type: ElementType,
) -> std::io::Result<f64> {
    Ok(match element_type {
        ElementType::Int8 => reader.read_i8()? as f64,
        ElementType::UInt8 => reader.read_u8()? as f64,
        ElementType::Int16 => reader.read_i16::<E>()? as f64,
        ElementType::UInt16 => reader.read_u16::<E>()? as f64,
        ElementType::Int32 => reader.read_i32::<E>()? as f64,
        ElementType::UInt32 => reader.read_u32::<E>()? as f64,
        ElementType::Int64 => reader.read_i64::<E>()? as f64,
        ElementType::UInt64 => reader.read_u64::<E>()? as f64,
        ElementType::Float => reader.read_f32::<E>()? as f64,
        ElementType::Double => reader.read_f64::<E>()?,
    })
}

/// Read file bytes until the header/data boundary is covered so the header
/// can be parsed without pulling the payload in.
fn read_header_prefix(file: &mut File) -> Result<Vec<u8>> {
    let mut buffer = Vec::with_capacity(HEADER_CHUNK_BYTES);
    let mut chunk = [0u8; HEADER_CHUNK_BYTES];
    loop {
        let read = file.read(&mut chunk)?;
        if read == 0 {
            // Let the parser report the missing separator.
            return Ok(buffer);
        }
        buffer.extend_from_slice(&chunk[..read]);
        if find_data_boundary(&buffer).is_some() {
            return Ok(buffer);
        }
        if buffer.len() > MAX_HEADER_BYTES {
            return Err(FormatError::MissingSeparator.into());
        }
    }
}
