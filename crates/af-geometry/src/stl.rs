//! STL serialization of extruded surfaces.
//!
//! STL stores unshared triangles with a facet normal each. Reading welds
//! corners with bit-identical coordinates back into shared vertices.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use af_core::Point3;
use tracing::info;

use crate::error::{GeometryError, GeometryResult};
use crate::extrude::MeshAsset;
use crate::surface::TriSurface;

pub const SOLID_NAME: &str = "airfoil";

/// STL file format variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StlFormat {
    /// ASCII text format (human-readable, larger file size)
    Ascii,
    /// Binary format (compact, faster to read/write)
    #[default]
    Binary,
}

/// Write `asset` to `path`, creating parent directories.
pub fn serialize(asset: &MeshAsset, path: &Path, format: StlFormat) -> GeometryResult<PathBuf> {
    let export_err = |source: std::io::Error| GeometryError::ExportFailure {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(export_err)?;
    }
    let file = File::create(path).map_err(export_err)?;
    let mut writer = BufWriter::new(file);

    match format {
        StlFormat::Ascii => write_ascii(&mut writer, asset.surface()),
        StlFormat::Binary => write_binary(&mut writer, asset.surface()),
    }
    .and_then(|_| writer.flush())
    .map_err(export_err)?;

    info!(
        path = %path.display(),
        triangles = asset.triangles().len(),
        ?format,
        "wrote STL"
    );
    Ok(path.to_path_buf())
}

fn write_ascii<W: Write>(w: &mut W, surface: &TriSurface) -> std::io::Result<()> {
    writeln!(w, "solid {}", SOLID_NAME)?;
    for (tri, normal) in surface.triangles().iter().zip(surface.normals()) {
        writeln!(
            w,
            "  facet normal {:e} {:e} {:e}",
            normal.x as f32, normal.y as f32, normal.z as f32
        )?;
        writeln!(w, "    outer loop")?;
        for &i in tri {
            let p = surface.vertices()[i];
            writeln!(
                w,
                "      vertex {:e} {:e} {:e}",
                p.x as f32, p.y as f32, p.z as f32
            )?;
        }
        writeln!(w, "    endloop")?;
        writeln!(w, "  endfacet")?;
    }
    writeln!(w, "endsolid {}", SOLID_NAME)?;
    Ok(())
}

fn write_binary<W: Write>(w: &mut W, surface: &TriSurface) -> std::io::Result<()> {
    // 80-byte header
    let mut header = [0u8; 80];
    let text = format!("binary STL - {}", SOLID_NAME);
    header[..text.len()].copy_from_slice(text.as_bytes());
    w.write_all(&header)?;

    w.write_all(&(surface.triangles().len() as u32).to_le_bytes())?;

    for (tri, normal) in surface.triangles().iter().zip(surface.normals()) {
        for v in [normal.x, normal.y, normal.z] {
            w.write_all(&(v as f32).to_le_bytes())?;
        }
        for &i in tri {
            let p = surface.vertices()[i];
            for v in [p.x, p.y, p.z] {
                w.write_all(&(v as f32).to_le_bytes())?;
            }
        }
        // attribute byte count
        w.write_all(&0u16.to_le_bytes())?;
    }
    Ok(())
}

/// Read an ASCII or binary STL file.
pub fn read_stl(path: &Path) -> GeometryResult<TriSurface> {
    let bytes = fs::read(path)?;
    if is_binary(&bytes) {
        read_binary(&bytes)
    } else {
        let text = String::from_utf8(bytes)
            .map_err(|_| GeometryError::InvalidStl("ASCII STL is not valid UTF-8".to_string()))?;
        read_ascii(&text)
    }
}

/// Binary STL has an exact size: 80 header + 4 count + 50 per triangle.
/// Some binary headers start with "solid", so size wins over the keyword.
fn is_binary(bytes: &[u8]) -> bool {
    if bytes.len() < 84 {
        return false;
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    let expected = 84 + count * 50;
    expected == bytes.len() || !bytes.trim_ascii_start().starts_with(b"solid")
}

#[derive(Default)]
struct Welder {
    index: HashMap<[u32; 3], usize>,
    vertices: Vec<Point3>,
}

impl Welder {
    fn add(&mut self, p: [f32; 3]) -> usize {
        let key = p.map(f32::to_bits);
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.vertices.len();
        self.vertices
            .push(Point3::new(p[0] as f64, p[1] as f64, p[2] as f64));
        self.index.insert(key, i);
        i
    }
}

fn read_binary(bytes: &[u8]) -> GeometryResult<TriSurface> {
    if bytes.len() < 84 {
        return Err(GeometryError::InvalidStl("file shorter than header".to_string()));
    }
    let count = u32::from_le_bytes([bytes[80], bytes[81], bytes[82], bytes[83]]) as usize;
    if bytes.len() < 84 + count * 50 {
        return Err(GeometryError::InvalidStl(format!(
            "header declares {count} triangles but file is truncated"
        )));
    }

    let read_f32 = |off: usize| {
        f32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
    };

    let mut welder = Welder::default();
    let mut triangles = Vec::with_capacity(count);
    for t in 0..count {
        let base = 84 + t * 50 + 12; // skip normal
        let mut tri = [0usize; 3];
        for (k, slot) in tri.iter_mut().enumerate() {
            let off = base + k * 12;
            *slot = welder.add([read_f32(off), read_f32(off + 4), read_f32(off + 8)]);
        }
        triangles.push(tri);
    }
    Ok(TriSurface::new(welder.vertices, triangles))
}

fn read_ascii(text: &str) -> GeometryResult<TriSurface> {
    let mut welder = Welder::default();
    let mut triangles = Vec::new();
    let mut corners: Vec<usize> = Vec::with_capacity(3);

    for (lineno, line) in text.lines().enumerate() {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some("vertex") => {
                let mut xyz = [0f32; 3];
                for slot in &mut xyz {
                    *slot = parts
                        .next()
                        .and_then(|s| s.parse::<f32>().ok())
                        .ok_or_else(|| GeometryError::Parse {
                            line: lineno + 1,
                            message: "expected three vertex coordinates".to_string(),
                        })?;
                }
                corners.push(welder.add(xyz));
            }
            Some("endloop") => {
                if corners.len() != 3 {
                    return Err(GeometryError::Parse {
                        line: lineno + 1,
                        message: format!("facet has {} vertices", corners.len()),
                    });
                }
                triangles.push([corners[0], corners[1], corners[2]]);
                corners.clear();
            }
            _ => {}
        }
    }

    if triangles.is_empty() {
        return Err(GeometryError::InvalidStl("no facets found".to_string()));
    }
    Ok(TriSurface::new(welder.vertices, triangles))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curve::build;
    use crate::extrude::{DomainBounds, export};
    use crate::pointset::PointSet;
    use tempfile::tempdir;

    fn asset() -> MeshAsset {
        let pts = PointSet::from_xy(&[
            (0.0, 0.0),
            (0.3, 0.08),
            (1.0, 0.0),
            (0.3, -0.04),
        ]);
        export(&build(&pts).unwrap(), 0.1, DomainBounds::default()).unwrap()
    }

    #[test]
    fn binary_round_trip_preserves_topology() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("airfoil.stl");
        let mesh = asset();
        serialize(&mesh, &path, StlFormat::Binary).unwrap();

        let bytes = fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 84 + 50 * mesh.triangles().len());

        let back = read_stl(&path).unwrap();
        assert_eq!(back.vertices().len(), mesh.vertices().len());
        assert_eq!(back.triangles().len(), mesh.triangles().len());
        back.check_closed_outward().unwrap();
    }

    #[test]
    fn ascii_round_trip_preserves_topology() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("airfoil.stl");
        let mesh = asset();
        serialize(&mesh, &path, StlFormat::Ascii).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.starts_with("solid airfoil"));
        assert!(text.trim_end().ends_with("endsolid airfoil"));

        let back = read_stl(&path).unwrap();
        assert_eq!(back.vertices().len(), mesh.vertices().len());
        assert_eq!(back.triangles().len(), mesh.triangles().len());
        back.check_closed_outward().unwrap();
    }

    #[test]
    fn serialization_is_deterministic() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("a.stl");
        let b = dir.path().join("b.stl");
        serialize(&asset(), &a, StlFormat::Binary).unwrap();
        serialize(&asset(), &b, StlFormat::Binary).unwrap();
        assert_eq!(fs::read(a).unwrap(), fs::read(b).unwrap());
    }

    #[test]
    fn unwritable_target_is_export_failure() {
        let dir = tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let err = serialize(&asset(), &blocker.join("airfoil.stl"), StlFormat::Binary).unwrap_err();
        assert!(matches!(err, GeometryError::ExportFailure { .. }));
    }
}
