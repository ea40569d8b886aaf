//! Volume container header decoding
//!
//! Parses the text header of an NRRD-style volume container into typed
//! metadata. The container is a text header terminated by a blank line,
//! followed by a raw binary payload. Header lines are either a comment
//! (`# ...`), a `key:=value` pair, or a `field: value` specification.
//!
//! # Main Types
//!
//! - [`VolumeHeader`] - Fully decoded header with validated required fields
//! - [`ElementType`] - Scalar element type vocabulary with C-style synonyms
//! - [`Endianness`] / [`Encoding`] - Payload byte order and encoding
//! - [`AxisKind`] / [`Centering`] / [`CoordinateFrame`] - Per-axis and space
//!   vocabularies; unknown words are kept as `Other` with a warning
//! - [`DataFileSpec`] - Detached-payload forms (single file, pattern, list)
//! - [`FormatError`] - Everything that makes a header unusable
//!
//! # Field names
//!
//! Field names are case-insensitive and whitespace-insensitive: names are
//! lowercased and inner whitespace is removed before dispatch, which folds
//! every documented synonym pair ("block size"/"blocksize", "data
//! file"/"datafile", "axis mins"/"axismins", ...) onto one canonical key.
//! Unrecognized fields do not fail the parse; they are kept verbatim in
//! [`VolumeHeader::opaque_fields`] and logged.
//!
//! # Example
//!
//! ```ignore
//! let header = VolumeHeader::parse(&buffer)?;
//! assert_eq!(header.dimension, 3);
//! let elements = header.total_elements();
//! ```

use std::collections::HashMap;
use std::fmt;
use thiserror::Error;

/// Magic token on the first header line
pub const MAGIC: &str = "NRRD";

/// Highest container version this decoder accepts
pub const MAX_SUPPORTED_VERSION: u32 = 5;

/// Axis count limit, matching the container format's own maximum
pub const MAX_DIMENSION: usize = 16;

/// Errors that make a volume header unusable
#[derive(Error, Debug)]
pub enum FormatError {
    /// First line does not carry the magic token
    #[error("Unrecognized magic in first line {0:?}")]
    BadMagic(String),

    /// Magic is present but the version is not supported
    #[error("Unsupported container version {0}")]
    UnsupportedVersion(u32),

    /// Header bytes are not valid UTF-8
    #[error("Header is not valid UTF-8 text")]
    HeaderNotText,

    /// No blank line separates the header from the payload
    #[error("No blank line separates header from data")]
    MissingSeparator,

    /// A header line is neither comment, field, nor key-value pair
    #[error("Malformed header line {0:?}")]
    MalformedLine(String),

    /// A required field was never declared
    #[error("Missing required field `{0}`")]
    MissingField(&'static str),

    /// A per-axis array disagrees with the declared dimensionality
    #[error("Field `{field}` has {actual} entries, expected {expected} (one per axis)")]
    AxisCountMismatch {
        field: &'static str,
        expected: usize,
        actual: usize,
    },

    /// A field value does not match its grammar
    #[error("Invalid value for `{field}`: {message}")]
    InvalidValue { field: String, message: String },

    /// The element type word is not in the supported vocabulary
    #[error("Unsupported element type {0:?}")]
    UnsupportedElementType(String),

    /// The payload encoding cannot be sampled by direct byte offset
    #[error("Encoding `{0}` does not support random access")]
    EncodingNotSeekable(String),
}

/// Scalar element type of the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementType {
    /// 8-bit signed integer
    Int8,
    /// 8-bit unsigned integer
    UInt8,
    /// 16-bit signed integer
    Int16,
    /// 16-bit unsigned integer
    UInt16,
    /// 32-bit signed integer
    Int32,
    /// 32-bit unsigned integer
    UInt32,
    /// 64-bit signed integer
    Int64,
    /// 64-bit unsigned integer
    UInt64,
    /// 32-bit floating point
    Float,
    /// 64-bit floating point
    Double,
}

impl ElementType {
    /// Every supported element type, in width order
    pub const ALL: [ElementType; 10] = [
        ElementType::Int8,
        ElementType::UInt8,
        ElementType::Int16,
        ElementType::UInt16,
        ElementType::Int32,
        ElementType::UInt32,
        ElementType::Int64,
        ElementType::UInt64,
        ElementType::Float,
        ElementType::Double,
    ];

    /// Parse a type word, accepting the format's C-style synonym families
    /// ("uchar", "unsigned short int", "int32_t", ...)
    pub fn parse(word: &str) -> Option<Self> {
        let folded = word
            .trim()
            .to_ascii_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ");
        Some(match folded.as_str() {
            "signed char" | "int8" | "int8_t" => ElementType::Int8,
            "uchar" | "unsigned char" | "uint8" | "uint8_t" => ElementType::UInt8,
            "short" | "short int" | "signed short" | "signed short int" | "int16" | "int16_t" => {
                ElementType::Int16
            }
            "ushort" | "unsigned short" | "unsigned short int" | "uint16" | "uint16_t" => {
                ElementType::UInt16
            }
            "int" | "signed int" | "int32" | "int32_t" => ElementType::Int32,
            "uint" | "unsigned int" | "uint32" | "uint32_t" => ElementType::UInt32,
            "longlong" | "long long" | "long long int" | "signed long long"
            | "signed long long int" | "int64" | "int64_t" => ElementType::Int64,
            "ulonglong" | "unsigned long long" | "unsigned long long int" | "uint64"
            | "uint64_t" => ElementType::UInt64,
            "float" => ElementType::Float,
            "double" => ElementType::Double,
            _ => return None,
        })
    }

    /// Element width in bytes
    pub fn size(&self) -> usize {
        match self {
            ElementType::Int8 | ElementType::UInt8 => 1,
            ElementType::Int16 | ElementType::UInt16 => 2,
            ElementType::Int32 | ElementType::UInt32 | ElementType::Float => 4,
            ElementType::Int64 | ElementType::UInt64 | ElementType::Double => 8,
        }
    }

    /// Canonical lowercase name
    pub fn name(&self) -> &'static str {
        match self {
            ElementType::Int8 => "int8",
            ElementType::UInt8 => "uint8",
            ElementType::Int16 => "int16",
            ElementType::UInt16 => "uint16",
            ElementType::Int32 => "int32",
            ElementType::UInt32 => "uint32",
            ElementType::Int64 => "int64",
            ElementType::UInt64 => "uint64",
            ElementType::Float => "float",
            ElementType::Double => "double",
        }
    }
}

impl fmt::Display for ElementType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Payload byte order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Endianness {
    /// Least significant byte first
    Little,
    /// Most significant byte first
    Big,
}

impl Endianness {
    /// Parse the `endian` field value
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "little" => Some(Endianness::Little),
            "big" => Some(Endianness::Big),
            _ => None,
        }
    }

    /// Byte order of the machine running this code
    pub fn native() -> Self {
        if cfg!(target_endian = "big") {
            Endianness::Big
        } else {
            Endianness::Little
        }
    }
}

impl fmt::Display for Endianness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Endianness::Little => write!(f, "little"),
            Endianness::Big => write!(f, "big"),
        }
    }
}

/// Payload encoding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    /// Raw binary, the only encoding that supports random access
    Raw,
    /// Whitespace-separated text numbers
    Ascii,
    /// Hexadecimal text
    Hex,
    /// Gzip-compressed binary
    Gzip,
    /// Bzip2-compressed binary
    Bzip2,
}

impl Encoding {
    /// Parse the `encoding` field value, accepting documented synonyms
    pub fn parse(word: &str) -> Option<Self> {
        match word.trim().to_ascii_lowercase().as_str() {
            "raw" => Some(Encoding::Raw),
            "txt" | "text" | "ascii" => Some(Encoding::Ascii),
            "hex" => Some(Encoding::Hex),
            "gz" | "gzip" => Some(Encoding::Gzip),
            "bz2" | "bzip2" => Some(Encoding::Bzip2),
            _ => None,
        }
    }

    /// Text encodings carry no byte order
    pub fn is_textual(&self) -> bool {
        matches!(self, Encoding::Ascii | Encoding::Hex)
    }

    /// Whether a sample can be read by seeking to a byte offset
    pub fn is_seekable(&self) -> bool {
        matches!(self, Encoding::Raw)
    }

    /// Canonical name for diagnostics
    pub fn name(&self) -> &'static str {
        match self {
            Encoding::Raw => "raw",
            Encoding::Ascii => "ascii",
            Encoding::Hex => "hex",
            Encoding::Gzip => "gzip",
            Encoding::Bzip2 => "bzip2",
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Semantic kind of one axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AxisKind {
    /// Ordinary sampled dimension
    Domain,
    /// Spatial dimension
    Space,
    /// Temporal dimension
    Time,
    /// Unstructured list axis
    List,
    /// Point tuple axis
    Point,
    /// Scalar per sample
    Scalar,
    /// Contravariant vector components
    Vector,
    /// Covariant vector components
    CovariantVector,
    /// Surface normal components
    Normal,
    /// Placeholder axis
    Stub,
    /// Any word outside the vocabulary, kept verbatim
    Other(String),
}

impl AxisKind {
    /// Parse one kind word; unknown words are tolerated as [`AxisKind::Other`]
    pub fn parse(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "domain" => AxisKind::Domain,
            "space" => AxisKind::Space,
            "time" => AxisKind::Time,
            "list" => AxisKind::List,
            "point" => AxisKind::Point,
            "scalar" => AxisKind::Scalar,
            "vector" => AxisKind::Vector,
            "covariant-vector" => AxisKind::CovariantVector,
            "normal" => AxisKind::Normal,
            "stub" => AxisKind::Stub,
            other => {
                tracing::warn!("Unrecognized axis kind {:?}, keeping as opaque", word);
                AxisKind::Other(other.to_string())
            }
        }
    }
}

/// Sample centering of one axis
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Centering {
    /// Samples are centered in cells
    Cell,
    /// Samples sit on nodes
    Node,
    /// Centering unknown or inapplicable
    None,
    /// Any word outside the vocabulary, kept verbatim
    Other(String),
}

impl Centering {
    /// Parse one centering word
    pub fn parse(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "cell" => Centering::Cell,
            "node" => Centering::Node,
            "none" | "???" => Centering::None,
            other => {
                tracing::warn!("Unrecognized centering {:?}, keeping as opaque", word);
                Centering::Other(other.to_string())
            }
        }
    }
}

/// World coordinate frame of the volume
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinateFrame {
    /// right-anterior-superior
    RightAnteriorSuperior,
    /// left-anterior-superior
    LeftAnteriorSuperior,
    /// left-posterior-superior
    LeftPosteriorSuperior,
    /// right-anterior-superior plus time
    RightAnteriorSuperiorTime,
    /// left-anterior-superior plus time
    LeftAnteriorSuperiorTime,
    /// left-posterior-superior plus time
    LeftPosteriorSuperiorTime,
    /// Scanner-native XYZ
    ScannerXyz,
    /// Scanner-native XYZ plus time
    ScannerXyzTime,
    /// Unnamed right-handed 3-D frame
    ThreeDRightHanded,
    /// Unnamed left-handed 3-D frame
    ThreeDLeftHanded,
    /// Right-handed 3-D frame plus time
    ThreeDRightHandedTime,
    /// Left-handed 3-D frame plus time
    ThreeDLeftHandedTime,
    /// Any word outside the vocabulary, kept verbatim
    Other(String),
}

impl CoordinateFrame {
    /// Parse the `space` field value
    pub fn parse(word: &str) -> Self {
        match word.trim().to_ascii_lowercase().as_str() {
            "right-anterior-superior" | "ras" => CoordinateFrame::RightAnteriorSuperior,
            "left-anterior-superior" | "las" => CoordinateFrame::LeftAnteriorSuperior,
            "left-posterior-superior" | "lps" => CoordinateFrame::LeftPosteriorSuperior,
            "right-anterior-superior-time" | "rast" => CoordinateFrame::RightAnteriorSuperiorTime,
            "left-anterior-superior-time" | "last" => CoordinateFrame::LeftAnteriorSuperiorTime,
            "left-posterior-superior-time" | "lpst" => CoordinateFrame::LeftPosteriorSuperiorTime,
            "scanner-xyz" => CoordinateFrame::ScannerXyz,
            "scanner-xyz-time" => CoordinateFrame::ScannerXyzTime,
            "3d-right-handed" => CoordinateFrame::ThreeDRightHanded,
            "3d-left-handed" => CoordinateFrame::ThreeDLeftHanded,
            "3d-right-handed-time" => CoordinateFrame::ThreeDRightHandedTime,
            "3d-left-handed-time" => CoordinateFrame::ThreeDLeftHandedTime,
            other => {
                tracing::warn!("Unrecognized coordinate frame {:?}, keeping as opaque", word);
                CoordinateFrame::Other(other.to_string())
            }
        }
    }
}

/// Where the payload lives when it is not attached after the header
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataFileSpec {
    /// One detached file
    Single(String),
    /// printf-style filename pattern with an index range
    Pattern {
        /// Format string containing a `%d`-style conversion
        format: String,
        /// First index
        min: i64,
        /// Last index
        max: i64,
        /// Index step
        step: i64,
        /// How many of the slowest axes each file covers
        subdim: Option<usize>,
    },
    /// Explicit file list; the list terminates the header, every following
    /// header line is a filename
    List {
        /// How many of the slowest axes each file covers
        subdim: Option<usize>,
        /// Files in slowest-axis order
        files: Vec<String>,
    },
}

/// Fully decoded volume header
///
/// Required fields (`dimension`, `element_type`, `encoding`, `sizes`, and
/// `endianness` when the element is wider than one byte and the encoding is
/// binary) are validated at parse time; everything else is optional
/// metadata carried through as declared.
#[derive(Debug, Clone)]
pub struct VolumeHeader {
    /// Container format version from the magic line
    pub version: u32,
    /// Declared axis count
    pub dimension: usize,
    /// Scalar element type of the payload
    pub element_type: ElementType,
    /// Payload encoding
    pub encoding: Encoding,
    /// Payload byte order; `None` only for single-byte or textual payloads
    pub endianness: Option<Endianness>,
    /// Per-axis extents, fastest axis first
    pub sizes: Vec<u64>,
    /// Per-axis sample spacing
    pub spacings: Option<Vec<f64>>,
    /// Per-axis sample thickness
    pub thicknesses: Option<Vec<f64>>,
    /// Per-axis world minimum
    pub axis_mins: Option<Vec<f64>>,
    /// Per-axis world maximum
    pub axis_maxs: Option<Vec<f64>>,
    /// Per-axis labels
    pub labels: Option<Vec<String>>,
    /// Per-axis units
    pub units: Option<Vec<String>>,
    /// Per-axis semantic kinds
    pub kinds: Option<Vec<AxisKind>>,
    /// Per-axis sample centering
    pub centerings: Option<Vec<Centering>>,
    /// World coordinate frame
    pub space: Option<CoordinateFrame>,
    /// World dimension when declared without a named frame
    pub space_dimension: Option<usize>,
    /// Units of the world axes
    pub space_units: Option<Vec<String>>,
    /// World position of the first sample
    pub space_origin: Option<Vec<f64>>,
    /// Per-axis world direction vectors; `None` entries mark non-spatial axes
    pub space_directions: Option<Vec<Option<Vec<f64>>>>,
    /// Measurement frame vectors
    pub measurement_frame: Option<Vec<Vec<f64>>>,
    /// Element size for block-typed payloads (informational only)
    pub block_size: Option<u64>,
    /// Declared payload minimum
    pub min: Option<f64>,
    /// Declared payload maximum
    pub max: Option<f64>,
    /// Pre-quantization minimum
    pub old_min: Option<f64>,
    /// Pre-quantization maximum
    pub old_max: Option<f64>,
    /// Free-text content description
    pub content: Option<String>,
    /// Deprecated sample count field, carried as text
    pub number: Option<String>,
    /// Units of the sample values themselves
    pub sample_units: Option<String>,
    /// Text lines to skip before the payload in detached files
    pub line_skip: Option<i64>,
    /// Bytes to skip before the payload in detached files (-1 = from end)
    pub byte_skip: Option<i64>,
    /// Detached payload location, when the payload is not attached
    pub data_file: Option<DataFileSpec>,
    /// `key:=value` pairs, verbatim
    pub key_values: HashMap<String, String>,
    /// Unrecognized fields, verbatim
    pub opaque_fields: HashMap<String, String>,
    /// Byte offset of the attached payload within the parsed buffer
    pub data_offset: usize,
}

/// Accumulates fields during the parse; [`RawHeader::finalize`] enforces the
/// cross-field invariants and produces the typed header.
#[derive(Debug, Default)]
struct RawHeader {
    version: u32,
    dimension: Option<usize>,
    element_type: Option<ElementType>,
    encoding: Option<Encoding>,
    endianness: Option<Endianness>,
    sizes: Option<Vec<u64>>,
    spacings: Option<Vec<f64>>,
    thicknesses: Option<Vec<f64>>,
    axis_mins: Option<Vec<f64>>,
    axis_maxs: Option<Vec<f64>>,
    labels: Option<Vec<String>>,
    units: Option<Vec<String>>,
    kinds: Option<Vec<AxisKind>>,
    centerings: Option<Vec<Centering>>,
    space: Option<CoordinateFrame>,
    space_dimension: Option<usize>,
    space_units: Option<Vec<String>>,
    space_origin: Option<Vec<f64>>,
    space_directions: Option<Vec<Option<Vec<f64>>>>,
    measurement_frame: Option<Vec<Vec<f64>>>,
    block_size: Option<u64>,
    min: Option<f64>,
    max: Option<f64>,
    old_min: Option<f64>,
    old_max: Option<f64>,
    content: Option<String>,
    number: Option<String>,
    sample_units: Option<String>,
    line_skip: Option<i64>,
    byte_skip: Option<i64>,
    data_file: Option<DataFileSpec>,
    key_values: HashMap<String, String>,
    opaque_fields: HashMap<String, String>,
}

impl VolumeHeader {
    /// Decode a header from a buffer holding the text header and (usually)
    /// the attached binary payload. Only the bytes up to the blank-line
    /// boundary are interpreted; the buffer may be a prefix of the file as
    /// long as it covers the boundary.
    pub fn parse(buffer: &[u8]) -> Result<Self, FormatError> {
        let (header_end, data_offset) =
            find_data_boundary(buffer).ok_or(FormatError::MissingSeparator)?;
        let text =
            std::str::from_utf8(&buffer[..header_end]).map_err(|_| FormatError::HeaderNotText)?;
        Self::parse_text(text, data_offset)
    }

    fn parse_text(text: &str, data_offset: usize) -> Result<Self, FormatError> {
        let mut lines = text.lines();
        let magic_line = lines.next().unwrap_or("");
        let version = parse_magic(magic_line)?;

        let mut raw = RawHeader {
            version,
            ..RawHeader::default()
        };
        let mut capturing_files = false;

        for line in lines {
            if capturing_files {
                let name = line.trim();
                if !name.is_empty() {
                    if let Some(DataFileSpec::List { files, .. }) = raw.data_file.as_mut() {
                        files.push(name.to_string());
                    }
                }
                continue;
            }
            if line.trim().is_empty() || line.starts_with('#') {
                continue;
            }
            let colon = match line.find(':') {
                Some(pos) => pos,
                None => return Err(FormatError::MalformedLine(line.to_string())),
            };
            if line.as_bytes().get(colon + 1) == Some(&b'=') {
                raw.key_values
                    .insert(line[..colon].to_string(), line[colon + 2..].to_string());
                continue;
            }
            let name = &line[..colon];
            let value = line[colon + 1..].trim();
            capturing_files = raw.assign(&canonical_field_name(name), name, value)?;
        }

        raw.finalize(data_offset)
    }

    /// Element width in bytes
    pub fn element_size(&self) -> usize {
        self.element_type.size()
    }

    /// Total element count across all axes. Validated against overflow at
    /// parse time.
    pub fn total_elements(&self) -> u64 {
        self.sizes.iter().product()
    }

    /// The three spatial direction vectors and the origin, when the header
    /// declares enough world metadata to place voxels in space. `None`
    /// entries in `space directions` (non-spatial axes) are skipped.
    pub fn spatial_frame(&self) -> Option<(Vec<[f64; 3]>, [f64; 3])> {
        let directions = self.space_directions.as_ref()?;
        let origin = self.space_origin.as_ref()?;
        if origin.len() != 3 {
            return None;
        }
        let mut axes = Vec::new();
        for direction in directions.iter().flatten() {
            if direction.len() != 3 {
                return None;
            }
            axes.push([direction[0], direction[1], direction[2]]);
        }
        if axes.len() != 3 {
            return None;
        }
        Some((axes, [origin[0], origin[1], origin[2]]))
    }
}

impl RawHeader {
    /// Dispatch one field. Returns true when the field terminates the header
    /// and the remaining lines form a file list.
    fn assign(&mut self, canonical: &str, name: &str, value: &str) -> Result<bool, FormatError> {
        match canonical {
            "dimension" => {
                let dim = parse_usize("dimension", value)?;
                if dim == 0 || dim > MAX_DIMENSION {
                    return Err(invalid(
                        "dimension",
                        format!("must be between 1 and {}", MAX_DIMENSION),
                    ));
                }
                self.dimension = Some(dim);
            }
            "type" => {
                self.element_type = Some(
                    ElementType::parse(value)
                        .ok_or_else(|| FormatError::UnsupportedElementType(value.to_string()))?,
                );
            }
            "encoding" => {
                self.encoding = Some(
                    Encoding::parse(value)
                        .ok_or_else(|| invalid("encoding", format!("unknown word {:?}", value)))?,
                );
            }
            "endian" => {
                self.endianness = Some(
                    Endianness::parse(value)
                        .ok_or_else(|| invalid("endian", "expected `little` or `big`"))?,
                );
            }
            "sizes" => {
                let sizes = parse_int_list("sizes", value)?;
                if sizes.iter().any(|&s| s <= 0) {
                    return Err(invalid("sizes", "every extent must be positive"));
                }
                self.sizes = Some(sizes.into_iter().map(|s| s as u64).collect());
            }
            "spacings" => self.spacings = Some(parse_double_list("spacings", value)?),
            "thicknesses" => self.thicknesses = Some(parse_double_list("thicknesses", value)?),
            "axismins" => self.axis_mins = Some(parse_double_list("axis mins", value)?),
            "axismaxs" => self.axis_maxs = Some(parse_double_list("axis maxs", value)?),
            "labels" => self.labels = Some(parse_quoted_list("labels", value)?),
            "units" => self.units = Some(parse_quoted_list("units", value)?),
            "kinds" => {
                self.kinds = Some(value.split_whitespace().map(AxisKind::parse).collect());
            }
            "centers" | "centerings" => {
                self.centerings = Some(value.split_whitespace().map(Centering::parse).collect());
            }
            "space" => self.space = Some(CoordinateFrame::parse(value)),
            "spacedimension" => {
                self.space_dimension = Some(parse_usize("space dimension", value)?)
            }
            "spaceunits" => self.space_units = Some(parse_quoted_list("space units", value)?),
            "spaceorigin" => self.space_origin = Some(parse_vector("space origin", value)?),
            "spacedirections" => {
                let mut directions = Vec::new();
                for token in split_vector_tokens(value) {
                    if token.eq_ignore_ascii_case("none") {
                        directions.push(None);
                    } else {
                        directions.push(Some(parse_vector("space directions", &token)?));
                    }
                }
                self.space_directions = Some(directions);
            }
            "measurementframe" => {
                let mut frame = Vec::new();
                for token in split_vector_tokens(value) {
                    frame.push(parse_vector("measurement frame", &token)?);
                }
                self.measurement_frame = Some(frame);
            }
            "min" => self.min = Some(parse_double("min", value)?),
            "max" => self.max = Some(parse_double("max", value)?),
            "oldmin" => self.old_min = Some(parse_double("old min", value)?),
            "oldmax" => self.old_max = Some(parse_double("old max", value)?),
            "blocksize" => {
                let size = parse_int("block size", value)?;
                if size <= 0 {
                    return Err(invalid("block size", "must be positive"));
                }
                self.block_size = Some(size as u64);
            }
            "lineskip" => {
                let skip = parse_int("line skip", value)?;
                if skip < 0 {
                    return Err(invalid("line skip", "must be non-negative"));
                }
                self.line_skip = Some(skip);
            }
            "byteskip" => {
                let skip = parse_int("byte skip", value)?;
                if skip < -1 {
                    return Err(invalid("byte skip", "must be -1 or non-negative"));
                }
                self.byte_skip = Some(skip);
            }
            "content" => self.content = Some(value.to_string()),
            "number" => self.number = Some(value.to_string()),
            "sampleunits" => self.sample_units = Some(value.to_string()),
            "datafile" => {
                let spec = parse_data_file(value)?;
                let is_list = matches!(spec, DataFileSpec::List { .. });
                self.data_file = Some(spec);
                // A LIST payload owns the rest of the header as filenames.
                return Ok(is_list);
            }
            _ => {
                tracing::warn!(
                    "Unrecognized header field {:?} kept as opaque (value {:?})",
                    name,
                    value
                );
                self.opaque_fields
                    .insert(canonical.to_string(), value.to_string());
            }
        }
        Ok(false)
    }

    fn finalize(self, data_offset: usize) -> Result<VolumeHeader, FormatError> {
        let dimension = self.dimension.ok_or(FormatError::MissingField("dimension"))?;
        let element_type = self.element_type.ok_or(FormatError::MissingField("type"))?;
        let encoding = self.encoding.ok_or(FormatError::MissingField("encoding"))?;
        let sizes = self.sizes.ok_or(FormatError::MissingField("sizes"))?;

        if self.endianness.is_none() && element_type.size() > 1 && !encoding.is_textual() {
            return Err(FormatError::MissingField("endian"));
        }

        check_axis_len("sizes", &sizes, dimension)?;
        check_axis_opt("spacings", self.spacings.as_ref(), dimension)?;
        check_axis_opt("thicknesses", self.thicknesses.as_ref(), dimension)?;
        check_axis_opt("axis mins", self.axis_mins.as_ref(), dimension)?;
        check_axis_opt("axis maxs", self.axis_maxs.as_ref(), dimension)?;
        check_axis_opt("labels", self.labels.as_ref(), dimension)?;
        check_axis_opt("units", self.units.as_ref(), dimension)?;
        check_axis_opt("kinds", self.kinds.as_ref(), dimension)?;
        check_axis_opt("centers", self.centerings.as_ref(), dimension)?;
        check_axis_opt("space directions", self.space_directions.as_ref(), dimension)?;

        let mut total: u64 = 1;
        for &size in &sizes {
            total = total
                .checked_mul(size)
                .ok_or_else(|| invalid("sizes", "total element count overflows"))?;
        }

        Ok(VolumeHeader {
            version: self.version,
            dimension,
            element_type,
            encoding,
            endianness: self.endianness,
            sizes,
            spacings: self.spacings,
            thicknesses: self.thicknesses,
            axis_mins: self.axis_mins,
            axis_maxs: self.axis_maxs,
            labels: self.labels,
            units: self.units,
            kinds: self.kinds,
            centerings: self.centerings,
            space: self.space,
            space_dimension: self.space_dimension,
            space_units: self.space_units,
            space_origin: self.space_origin,
            space_directions: self.space_directions,
            measurement_frame: self.measurement_frame,
            block_size: self.block_size,
            min: self.min,
            max: self.max,
            old_min: self.old_min,
            old_max: self.old_max,
            content: self.content,
            number: self.number,
            sample_units: self.sample_units,
            line_skip: self.line_skip,
            byte_skip: self.byte_skip,
            data_file: self.data_file,
            key_values: self.key_values,
            opaque_fields: self.opaque_fields,
            data_offset,
        })
    }
}

/// Find the blank line ending the header. Returns (header length, payload
/// offset). Tolerates bare and carriage-return-prefixed line endings.
pub(crate) fn find_data_boundary(buffer: &[u8]) -> Option<(usize, usize)> {
    let mut i = 0;
    while i + 1 < buffer.len() {
        if buffer[i] == b'\n' {
            if buffer[i + 1] == b'\n' {
                return Some((i + 1, i + 2));
            }
            if buffer[i + 1] == b'\r' && buffer.get(i + 2) == Some(&b'\n') {
                return Some((i + 1, i + 3));
            }
        }
        i += 1;
    }
    None
}

fn parse_magic(line: &str) -> Result<u32, FormatError> {
    let rest = line
        .strip_prefix(MAGIC)
        .ok_or_else(|| FormatError::BadMagic(line.to_string()))?;
    let version: u32 = rest
        .trim()
        .parse()
        .map_err(|_| FormatError::BadMagic(line.to_string()))?;
    if version == 0 || version > MAX_SUPPORTED_VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }
    Ok(version)
}

/// Lowercase and strip inner whitespace so every synonym spelling of a field
/// name lands on one canonical key.
fn canonical_field_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_whitespace())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

fn invalid(field: &str, message: impl Into<String>) -> FormatError {
    FormatError::InvalidValue {
        field: field.to_string(),
        message: message.into(),
    }
}

fn parse_int(field: &str, value: &str) -> Result<i64, FormatError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("{:?} is not an integer", value)))
}

fn parse_usize(field: &str, value: &str) -> Result<usize, FormatError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("{:?} is not a non-negative integer", value)))
}

/// Floats use Rust's own grammar, which already accepts the format's `nan`,
/// `inf` and `-inf` literals case-insensitively.
fn parse_double(field: &str, value: &str) -> Result<f64, FormatError> {
    value
        .trim()
        .parse()
        .map_err(|_| invalid(field, format!("{:?} is not a number", value)))
}

fn parse_int_list(field: &str, value: &str) -> Result<Vec<i64>, FormatError> {
    let list: Result<Vec<_>, _> = value
        .split_whitespace()
        .map(|word| parse_int(field, word))
        .collect();
    let list = list?;
    if list.is_empty() {
        return Err(invalid(field, "expected at least one integer"));
    }
    Ok(list)
}

fn parse_double_list(field: &str, value: &str) -> Result<Vec<f64>, FormatError> {
    let list: Result<Vec<_>, _> = value
        .split_whitespace()
        .map(|word| parse_double(field, word))
        .collect();
    let list = list?;
    if list.is_empty() {
        return Err(invalid(field, "expected at least one number"));
    }
    Ok(list)
}

/// Parse a list of double-quoted strings, e.g. `"x" "y" "z"`
fn parse_quoted_list(field: &str, value: &str) -> Result<Vec<String>, FormatError> {
    let mut items = Vec::new();
    let mut rest = value;
    while let Some(start) = rest.find('"') {
        let after = &rest[start + 1..];
        let end = after
            .find('"')
            .ok_or_else(|| invalid(field, "unterminated quoted string"))?;
        items.push(after[..end].to_string());
        rest = &after[end + 1..];
    }
    if items.is_empty() {
        return Err(invalid(field, "expected quoted strings"));
    }
    Ok(items)
}

/// Parse a parenthesized vector, e.g. `(1, 0, 0.5)`
fn parse_vector(field: &str, value: &str) -> Result<Vec<f64>, FormatError> {
    let inner = value
        .trim()
        .strip_prefix('(')
        .and_then(|v| v.strip_suffix(')'))
        .ok_or_else(|| invalid(field, format!("{:?} is not a parenthesized vector", value)))?;
    let components: Result<Vec<_>, _> = inner
        .split(',')
        .map(|word| parse_double(field, word))
        .collect();
    let components = components?;
    if components.is_empty() {
        return Err(invalid(field, "empty vector"));
    }
    Ok(components)
}

/// Split a value into whitespace-separated tokens, keeping parenthesized
/// vectors (which may contain spaces) together.
fn split_vector_tokens(value: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for c in value.chars() {
        match c {
            '(' => {
                depth += 1;
                current.push(c);
            }
            ')' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            c if c.is_whitespace() && depth == 0 => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            c => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

fn parse_data_file(value: &str) -> Result<DataFileSpec, FormatError> {
    let tokens: Vec<&str> = value.split_whitespace().collect();
    if tokens.is_empty() {
        return Err(invalid("data file", "empty value"));
    }
    if tokens[0].eq_ignore_ascii_case("list") {
        let subdim = match tokens.get(1) {
            Some(word) => Some(parse_usize("data file", word)?),
            None => None,
        };
        return Ok(DataFileSpec::List {
            subdim,
            files: Vec::new(),
        });
    }
    if tokens.len() >= 4 && tokens[0].contains('%') {
        let subdim = match tokens.get(4) {
            Some(word) => Some(parse_usize("data file", word)?),
            None => None,
        };
        return Ok(DataFileSpec::Pattern {
            format: tokens[0].to_string(),
            min: parse_int("data file", tokens[1])?,
            max: parse_int("data file", tokens[2])?,
            step: parse_int("data file", tokens[3])?,
            subdim,
        });
    }
    Ok(DataFileSpec::Single(value.trim().to_string()))
}

fn check_axis_len(field: &'static str, values: &[u64], dimension: usize) -> Result<(), FormatError> {
    if values.len() != dimension {
        return Err(FormatError::AxisCountMismatch {
            field,
            expected: dimension,
            actual: values.len(),
        });
    }
    Ok(())
}

fn check_axis_opt<T>(
    field: &'static str,
    values: Option<&Vec<T>>,
    dimension: usize,
) -> Result<(), FormatError> {
    if let Some(values) = values {
        if values.len() != dimension {
            return Err(FormatError::AxisCountMismatch {
                field,
                expected: dimension,
                actual: values.len(),
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn parse_str(text: &str) -> Result<VolumeHeader, FormatError> {
        VolumeHeader::parse(text.as_bytes())
    }

    #[test]
    fn test_parse_minimal_header() {
        let header = parse_str("NRRD0001\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 3 4\n\npayload").unwrap();
        assert_eq!(header.version, 1);
        assert_eq!(header.dimension, 3);
        assert_eq!(header.element_type, ElementType::UInt8);
        assert_eq!(header.encoding, Encoding::Raw);
        assert_eq!(header.sizes, vec![2, 3, 4]);
        assert_eq!(header.total_elements(), 24);
        assert_eq!(header.element_size(), 1);
        // Single-byte payloads carry no byte order.
        assert_eq!(header.endianness, None);
        // Payload starts right after the blank line.
        assert_eq!(header.data_offset, "NRRD0001\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 3 4\n\n".len());
    }

    #[test]
    fn test_missing_required_fields() {
        let complete = [
            "dimension: 2",
            "type: uint16",
            "encoding: raw",
            "endian: little",
            "sizes: 4 4",
        ];
        for (index, missing) in ["dimension", "type", "encoding", "sizes"].iter().enumerate() {
            let mut lines = vec!["NRRD0005"];
            for (i, field) in complete.iter().enumerate() {
                if i != index {
                    lines.push(field);
                }
            }
            let text = format!("{}\n\n", lines.join("\n"));
            let err = parse_str(&text).unwrap_err();
            assert!(
                matches!(err, FormatError::MissingField(f) if f == *missing),
                "expected missing `{}`, got {:?}",
                missing,
                err
            );
        }
    }

    #[test]
    fn test_endian_required_for_wide_binary_types() {
        let err = parse_str("NRRD0005\ndimension: 1\ntype: uint16\nencoding: raw\nsizes: 4\n\n")
            .unwrap_err();
        assert!(matches!(err, FormatError::MissingField("endian")));

        // Declaring the order fixes it.
        let header =
            parse_str("NRRD0005\ndimension: 1\ntype: uint16\nencoding: raw\nendian: big\nsizes: 4\n\n")
                .unwrap();
        assert_eq!(header.endianness, Some(Endianness::Big));

        // Textual encodings carry no byte order.
        let header =
            parse_str("NRRD0005\ndimension: 1\ntype: uint16\nencoding: ascii\nsizes: 4\n\n")
                .unwrap();
        assert_eq!(header.endianness, None);
    }

    #[test]
    fn test_field_name_synonyms_fold() {
        let a = parse_str(
            "NRRD0005\ndimension: 1\ntype: uint8\nencoding: raw\nsizes: 4\nBLOCK SIZE: 16\n\n",
        )
        .unwrap();
        let b = parse_str(
            "NRRD0005\ndimension: 1\ntype: uint8\nencoding: raw\nsizes: 4\nblocksize: 16\n\n",
        )
        .unwrap();
        assert_eq!(a.block_size, Some(16));
        assert_eq!(b.block_size, Some(16));

        let c = parse_str(
            "NRRD0005\ndimension: 2\ntype: uint8\nencoding: raw\nsizes: 2 2\nAxis Mins: 0 1\n\n",
        )
        .unwrap();
        assert_eq!(c.axis_mins, Some(vec![0.0, 1.0]));
    }

    #[test]
    fn test_comments_and_key_values() {
        let header = parse_str(
            "NRRD0005\n# produced by the imaging rig\ndimension: 1\ntype: uint8\nencoding: raw\nsizes: 4\nrig:=confocal-2\n\n",
        )
        .unwrap();
        assert_eq!(header.key_values.get("rig").map(String::as_str), Some("confocal-2"));
        assert!(header.opaque_fields.is_empty());
    }

    #[test]
    fn test_bad_magic_and_version() {
        let err = parse_str("NOTNRRD\ndimension: 1\n\n").unwrap_err();
        assert!(matches!(err, FormatError::BadMagic(_)));

        let err = parse_str("NRRD0009\ndimension: 1\ntype: uint8\nencoding: raw\nsizes: 4\n\n")
            .unwrap_err();
        assert!(matches!(err, FormatError::UnsupportedVersion(9)));
    }

    #[test]
    fn test_axis_count_mismatch() {
        let err = parse_str(
            "NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 2 2\nspacings: 1.0 1.0\n\n",
        )
        .unwrap_err();
        match err {
            FormatError::AxisCountMismatch {
                field,
                expected,
                actual,
            } => {
                assert_eq!(field, "spacings");
                assert_eq!(expected, 3);
                assert_eq!(actual, 2);
            }
            other => panic!("expected axis mismatch, got {:?}", other),
        }

        let err = parse_str("NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 2\n\n")
            .unwrap_err();
        assert!(matches!(err, FormatError::AxisCountMismatch { field: "sizes", .. }));
    }

    #[test]
    fn test_space_fields() {
        let header = parse_str(
            "NRRD0005\ndimension: 3\ntype: float\nencoding: raw\nendian: little\nsizes: 4 4 4\nspace: left-posterior-superior\nspace directions: (10,0,0) (0, 10, 0) (0,0,10)\nspace origin: (-5.5, 0, 2)\nspace units: \"microns\" \"microns\" \"microns\"\n\n",
        )
        .unwrap();
        assert_eq!(header.space, Some(CoordinateFrame::LeftPosteriorSuperior));
        let (axes, origin) = header.spatial_frame().unwrap();
        assert_eq!(axes[0], [10.0, 0.0, 0.0]);
        assert_eq!(axes[1], [0.0, 10.0, 0.0]);
        assert_eq!(axes[2], [0.0, 0.0, 10.0]);
        assert_eq!(origin, [-5.5, 0.0, 2.0]);
        assert_eq!(
            header.space_units,
            Some(vec!["microns".to_string(), "microns".to_string(), "microns".to_string()])
        );
    }

    #[test]
    fn test_space_directions_with_none_axis() {
        let header = parse_str(
            "NRRD0005\ndimension: 4\ntype: float\nencoding: raw\nendian: little\nsizes: 3 4 4 4\nspace directions: none (1,0,0) (0,1,0) (0,0,1)\nspace origin: (0,0,0)\n\n",
        )
        .unwrap();
        let directions = header.space_directions.as_ref().unwrap();
        assert_eq!(directions.len(), 4);
        assert!(directions[0].is_none());
        let (axes, _) = header.spatial_frame().unwrap();
        assert_eq!(axes.len(), 3);
    }

    #[test]
    fn test_nan_and_inf_literals() {
        let header = parse_str(
            "NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 2 2\naxis mins: nan -inf 0\nmax: inf\n\n",
        )
        .unwrap();
        let mins = header.axis_mins.unwrap();
        assert!(mins[0].is_nan());
        assert_eq!(mins[1], f64::NEG_INFINITY);
        assert_eq!(mins[2], 0.0);
        assert_eq!(header.max, Some(f64::INFINITY));
    }

    #[test]
    fn test_data_file_list_terminates_header() {
        let header = parse_str(
            "NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 2 2\ndata file: LIST\nslice-000.raw\nslice-001.raw\nodd: name.raw\n\n",
        )
        .unwrap();
        match header.data_file.unwrap() {
            DataFileSpec::List { subdim, files } => {
                assert_eq!(subdim, None);
                // The colon line is a filename, not a field.
                assert_eq!(files, vec!["slice-000.raw", "slice-001.raw", "odd: name.raw"]);
            }
            other => panic!("expected list, got {:?}", other),
        }
        assert!(header.opaque_fields.is_empty());
    }

    #[test]
    fn test_data_file_single_and_pattern() {
        let header = parse_str(
            "NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 2 2\ndata file: volume.raw\n\n",
        )
        .unwrap();
        assert_eq!(
            header.data_file,
            Some(DataFileSpec::Single("volume.raw".to_string()))
        );

        let header = parse_str(
            "NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 2 2 2\ndata file: slice-%03d.raw 0 1 1\n\n",
        )
        .unwrap();
        assert_eq!(
            header.data_file,
            Some(DataFileSpec::Pattern {
                format: "slice-%03d.raw".to_string(),
                min: 0,
                max: 1,
                step: 1,
                subdim: None,
            })
        );
    }

    #[test]
    fn test_unrecognized_field_is_tolerated() {
        let header = parse_str(
            "NRRD0005\ndimension: 1\ntype: uint8\nencoding: raw\nsizes: 4\nflavor: extra strange\n\n",
        )
        .unwrap();
        assert_eq!(
            header.opaque_fields.get("flavor").map(String::as_str),
            Some("extra strange")
        );
    }

    #[test]
    fn test_unrecognized_enum_words_are_tolerated() {
        let header = parse_str(
            "NRRD0005\ndimension: 2\ntype: uint8\nencoding: raw\nsizes: 2 2\nkinds: domain hyperbolic\ncenters: cell sideways\nspace: wonderland\n\n",
        )
        .unwrap();
        assert_eq!(
            header.kinds,
            Some(vec![AxisKind::Domain, AxisKind::Other("hyperbolic".to_string())])
        );
        assert_eq!(
            header.centerings,
            Some(vec![Centering::Cell, Centering::Other("sideways".to_string())])
        );
        assert_eq!(
            header.space,
            Some(CoordinateFrame::Other("wonderland".to_string()))
        );
    }

    #[test]
    fn test_crlf_line_endings() {
        let header = parse_str(
            "NRRD0005\r\ndimension: 1\r\ntype: uint16\r\nencoding: raw\r\nendian: little\r\nsizes: 4\r\n\r\ndata",
        )
        .unwrap();
        assert_eq!(header.dimension, 1);
        assert_eq!(header.sizes, vec![4]);
        let expected_offset =
            "NRRD0005\r\ndimension: 1\r\ntype: uint16\r\nencoding: raw\r\nendian: little\r\nsizes: 4\r\n\r\n"
                .len();
        assert_eq!(header.data_offset, expected_offset);
    }

    #[test]
    fn test_missing_separator() {
        let err = parse_str("NRRD0005\ndimension: 1\ntype: uint8\nencoding: raw\nsizes: 4\n")
            .unwrap_err();
        assert!(matches!(err, FormatError::MissingSeparator));
    }

    #[test]
    fn test_element_type_synonyms() {
        assert_eq!(ElementType::parse("unsigned short int"), Some(ElementType::UInt16));
        assert_eq!(ElementType::parse("UCHAR"), Some(ElementType::UInt8));
        assert_eq!(ElementType::parse("signed  long   long"), Some(ElementType::Int64));
        assert_eq!(ElementType::parse("int32_t"), Some(ElementType::Int32));
        assert_eq!(ElementType::parse("double"), Some(ElementType::Double));
        assert_eq!(ElementType::parse("quaternion"), None);
    }

    #[test]
    fn test_sizes_must_be_positive() {
        let err = parse_str("NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 4 0 2\n\n")
            .unwrap_err();
        assert!(matches!(err, FormatError::InvalidValue { .. }));
    }

    #[test]
    fn test_total_element_overflow() {
        let err = parse_str(
            "NRRD0005\ndimension: 3\ntype: uint8\nencoding: raw\nsizes: 4294967295 4294967295 4294967295\n\n",
        )
        .unwrap_err();
        assert!(matches!(err, FormatError::InvalidValue { .. }));
    }

    #[test]
    fn test_malformed_line_fails() {
        let err = parse_str("NRRD0005\ndimension: 1\nthis line has no delimiter\n\n").unwrap_err();
        assert!(matches!(err, FormatError::MalformedLine(_)));
    }

    proptest! {
        // Decoding a well-formed header reproduces the declared axis count,
        // element type and byte order exactly.
        #[test]
        fn prop_header_round_trip(
            type_index in 0usize..ElementType::ALL.len(),
            big_endian in proptest::bool::ANY,
            sizes in proptest::collection::vec(1u64..64, 1..5),
        ) {
            let element_type = ElementType::ALL[type_index];
            let endian = if big_endian { "big" } else { "little" };
            let size_words: Vec<String> = sizes.iter().map(|s| s.to_string()).collect();
            let text = format!(
                "NRRD0005\ndimension: {}\ntype: {}\nencoding: raw\nendian: {}\nsizes: {}\n\n",
                sizes.len(),
                element_type.name(),
                endian,
                size_words.join(" "),
            );
            let header = VolumeHeader::parse(text.as_bytes()).unwrap();
            prop_assert_eq!(header.dimension, sizes.len());
            prop_assert_eq!(header.element_type, element_type);
            prop_assert_eq!(
                header.endianness,
                Some(if big_endian { Endianness::Big } else { Endianness::Little })
            );
            prop_assert_eq!(header.sizes, sizes);
        }
    }
}
