//! Common test utilities and helpers

#![allow(dead_code)] // Test utilities may not all be used in every test file

pub mod builders;

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracemap::atlas::{AtlasVersion, BrainRegion, RegionCatalog};
use tracemap::types::RegionId;

/// Region id the standard ontology maps the fixture structure to under the
/// legacy atlas
pub const LEGACY_REGION: RegionId = RegionId(9);

/// Region id under the current atlas
pub const CURRENT_REGION: RegionId = RegionId(11);

/// Assert two floats are approximately equal
pub fn assert_float_eq(a: f64, b: f64, epsilon: f64) {
    assert!(
        (a - b).abs() < epsilon,
        "Expected {} to be approximately equal to {} (epsilon: {})",
        a,
        b,
        epsilon
    );
}

fn header_text(element: &str, sizes: &[u64]) -> String {
    let sizes_line = sizes
        .iter()
        .map(|s| s.to_string())
        .collect::<Vec<_>>()
        .join(" ");
    format!(
        "NRRD0004\ndimension: {}\ntype: {}\nencoding: raw\nendian: little\nsizes: {}\n\n",
        sizes.len(),
        element,
        sizes_line
    )
}

/// Write a raw little-endian 32-bit float volume
pub fn write_float_volume(path: &Path, sizes: &[u64], values: &[f32]) {
    let mut bytes = header_text("float", sizes).into_bytes();
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    fs::write(path, bytes).unwrap();
}

/// Write a raw little-endian 32-bit unsigned label volume
pub fn write_uint_volume(path: &Path, sizes: &[u64], values: &[u32]) {
    let mut bytes = header_text("uint32", sizes).into_bytes();
    for value in values {
        bytes.extend_from_slice(&value.to_le_bytes());
    }
    fs::write(path, bytes).unwrap();
}

/// Write the two-version ontology used across the integration fixtures:
/// structure id 5 maps to [`LEGACY_REGION`] and [`CURRENT_REGION`]
pub fn write_ontology(path: &Path) {
    let text = r#"{
    "ccfv2.5": [
        {"id": 9, "structure_id": 5, "name": "Cerebellum", "acronym": "CB"}
    ],
    "ccfv3.0": [
        {"id": 11, "structure_id": 5, "name": "Cerebellum", "acronym": "CB"}
    ]
}"#;
    fs::write(path, text).unwrap();
}

/// In-memory catalog matching [`write_ontology`]
pub fn standard_catalog() -> RegionCatalog {
    RegionCatalog::new()
        .with_region(
            AtlasVersion::CcfV25,
            BrainRegion::new(LEGACY_REGION, AtlasFixture::STRUCTURE_ID, "Cerebellum")
                .with_acronym("CB"),
        )
        .with_region(
            AtlasVersion::CcfV30,
            BrainRegion::new(CURRENT_REGION, AtlasFixture::STRUCTURE_ID, "Cerebellum")
                .with_acronym("CB"),
        )
}

/// The full set of on-disk inputs one transform run needs: a displacement
/// field, both region-label volumes and an ontology file, all inside one
/// temporary directory that lives as long as the fixture.
pub struct AtlasFixture {
    pub dir: TempDir,
    pub displacement: PathBuf,
    pub legacy_volume: PathBuf,
    pub alternate_volume: PathBuf,
    pub ontology: PathBuf,
}

impl AtlasFixture {
    /// Extent of every spatial axis in the fixture volumes
    pub const EXTENT: u64 = 8;

    /// Structure id filling both region volumes
    pub const STRUCTURE_ID: i64 = 5;

    /// Zero displacement field plus constant region labels mapped by
    /// [`standard_catalog`]
    pub fn identity() -> Self {
        Self::with_displacement([0.0, 0.0, 0.0])
    }

    /// Constant displacement field plus constant region labels. None of the
    /// volumes carry space metadata, so world coordinates address voxel
    /// indices directly.
    pub fn with_displacement(displacement: [f64; 3]) -> Self {
        let dir = TempDir::new().unwrap();
        let e = Self::EXTENT;
        let spatial = (e * e * e) as usize;

        // Component axis first: every run of three consecutive elements is
        // one voxel's displacement vector.
        let mut field = Vec::with_capacity(spatial * 3);
        for _ in 0..spatial {
            field.push(displacement[0] as f32);
            field.push(displacement[1] as f32);
            field.push(displacement[2] as f32);
        }
        let displacement_path = dir.path().join("registration.nrrd");
        write_float_volume(&displacement_path, &[3, e, e, e], &field);

        let labels = vec![Self::STRUCTURE_ID as u32; spatial];
        let legacy_volume = dir.path().join("annotation_25.nrrd");
        write_uint_volume(&legacy_volume, &[e, e, e], &labels);
        let alternate_volume = dir.path().join("annotation_30.nrrd");
        write_uint_volume(&alternate_volume, &[e, e, e], &labels);

        let ontology = dir.path().join("ontology.json");
        write_ontology(&ontology);

        Self {
            dir,
            displacement: displacement_path,
            legacy_volume,
            alternate_volume,
            ontology,
        }
    }
}
