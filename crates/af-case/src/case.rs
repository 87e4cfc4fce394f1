//! Case directory layout and generation.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use af_geometry::{MeshAsset, StlFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dicts::{self, MeshLayout};
use crate::error::{CaseError, CaseResult};
use crate::params::SimulationParameters;
use crate::validate::ValidationError;

pub const CASE_MANIFEST: &str = "case.yaml";
pub const MESH_DIR: &str = "Mesh";
pub const RUN_DIR: &str = "Run";
pub const STL_RELATIVE: &str = "Mesh/constant/triSurface/airfoil.stl";

/// Every file `configure` writes, relative to the case root.
pub const INPUT_FILES: &[&str] = &[
    CASE_MANIFEST,
    "Mesh/Allrun",
    "Mesh/system/blockMeshDict",
    "Mesh/system/snappyHexMeshDict",
    "Mesh/system/surfaceFeatureExtractDict",
    "Mesh/system/extrudeMeshDict",
    "Mesh/system/controlDict",
    "Mesh/system/fvSchemes",
    "Mesh/system/fvSolution",
    "Mesh/system/meshQualityDict",
    STL_RELATIVE,
    "Run/Allrun",
    "Run/system/controlDict",
    "Run/system/fvSchemes",
    "Run/system/fvSolution",
    "Run/constant/transportProperties",
    "Run/constant/turbulenceProperties",
    "Run/0/U",
    "Run/0/p",
];

/// Contents of `case.yaml`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CaseManifest {
    pub parameters: SimulationParameters,
    pub geometry: String,
    pub chord: f64,
    pub reynolds_number: f64,
}

/// Handle to a generated case on disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaseDirectory {
    root: PathBuf,
}

impl CaseDirectory {
    /// Open an existing case; its manifest must be present.
    pub fn open(root: impl Into<PathBuf>) -> CaseResult<Self> {
        let case = Self { root: root.into() };
        if !case.manifest_path().is_file() {
            return Err(CaseError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("no {CASE_MANIFEST} in {}", case.root.display()),
            )));
        }
        Ok(case)
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn mesh_dir(&self) -> PathBuf {
        self.root.join(MESH_DIR)
    }

    pub fn run_dir(&self) -> PathBuf {
        self.root.join(RUN_DIR)
    }

    pub fn stl_path(&self) -> PathBuf {
        self.root.join(STL_RELATIVE)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(CASE_MANIFEST)
    }

    pub fn load_manifest(&self) -> CaseResult<CaseManifest> {
        let content = fs::read_to_string(self.manifest_path())?;
        Ok(serde_yaml::from_str(&content)?)
    }
}

fn write_file(root: &Path, rel: &str, contents: &str) -> io::Result<()> {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, contents)
}

#[cfg(unix)]
fn make_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}

#[cfg(not(unix))]
fn make_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

/// Claim `root` as a brand new directory.
fn create_fresh(root: &Path) -> CaseResult<()> {
    if root.exists() {
        return Err(CaseError::CaseExists {
            path: root.to_path_buf(),
        });
    }
    if let Some(parent) = root.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::create_dir(root).map_err(|e| match e.kind() {
        io::ErrorKind::AlreadyExists => CaseError::CaseExists {
            path: root.to_path_buf(),
        },
        _ => CaseError::Io(e),
    })
}

fn mesh_layout(mesh: &MeshAsset, params: &SimulationParameters) -> Result<MeshLayout, ValidationError> {
    let domain = params.domain;
    let mut x_min = f64::INFINITY;
    for v in mesh.vertices() {
        if !domain.contains(af_core::Point2::new(v.x, v.y)) {
            return Err(ValidationError::InvalidValue {
                field: "domain".to_string(),
                value: format!(
                    "[{}, {}] x [{}, {}]",
                    domain.x_min, domain.x_max, domain.y_min, domain.y_max
                ),
                reason: format!("geometry point ({}, {}) lies outside", v.x, v.y),
            });
        }
        x_min = x_min.min(v.x);
    }
    Ok(MeshLayout {
        domain,
        depth: mesh.depth(),
        // Between the inlet and the leading edge, so never inside the body.
        location_in_mesh: (
            0.5 * (domain.x_min + x_min),
            0.5 * (domain.y_min + domain.y_max),
            0.5 * mesh.depth(),
        ),
    })
}

fn chord_of(mesh: &MeshAsset) -> f64 {
    let (lo, hi) = mesh
        .vertices()
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), v| {
            (lo.min(v.x), hi.max(v.x))
        });
    if hi >= lo { hi - lo } else { 0.0 }
}

fn write_case(
    root: &Path,
    mesh: &MeshAsset,
    params: &SimulationParameters,
    layout: &MeshLayout,
    stl_format: StlFormat,
) -> CaseResult<()> {
    let chord = chord_of(mesh);
    let manifest = CaseManifest {
        parameters: params.clone(),
        geometry: STL_RELATIVE.to_string(),
        chord,
        reynolds_number: params.reynolds_number(chord),
    };
    write_file(root, CASE_MANIFEST, &serde_yaml::to_string(&manifest)?)?;

    let files = [
        ("Mesh/Allrun", dicts::mesh_allrun()),
        ("Mesh/system/blockMeshDict", dicts::block_mesh_dict(params, layout)),
        ("Mesh/system/snappyHexMeshDict", dicts::snappy_hex_mesh_dict(params, layout)),
        ("Mesh/system/surfaceFeatureExtractDict", dicts::surface_feature_extract_dict()),
        ("Mesh/system/extrudeMeshDict", dicts::extrude_mesh_dict(layout)),
        ("Mesh/system/controlDict", dicts::control_dict("snappyHexMesh", 1, 1)),
        ("Mesh/system/fvSchemes", dicts::fv_schemes()),
        ("Mesh/system/fvSolution", dicts::mesh_fv_solution()),
        ("Mesh/system/meshQualityDict", dicts::mesh_quality_dict()),
        ("Run/Allrun", dicts::run_allrun()),
        (
            "Run/system/controlDict",
            dicts::control_dict("simpleFoam", params.max_iterations, params.max_iterations),
        ),
        ("Run/system/fvSchemes", dicts::fv_schemes()),
        ("Run/system/fvSolution", dicts::fv_solution(params)),
        ("Run/constant/transportProperties", dicts::transport_properties(params)),
        ("Run/constant/turbulenceProperties", dicts::turbulence_properties()),
        ("Run/0/U", dicts::velocity_field(params)),
        ("Run/0/p", dicts::pressure_field()),
    ];
    for (rel, contents) in &files {
        write_file(root, rel, contents)?;
        debug!(file = rel, "wrote case file");
    }
    make_executable(&root.join("Mesh/Allrun"))?;
    make_executable(&root.join("Run/Allrun"))?;

    af_geometry::serialize(mesh, &root.join(STL_RELATIVE), stl_format)?;
    Ok(())
}

/// Generate a complete case under `root`, which must not exist yet.
/// Parameters are validated before anything touches the filesystem.
pub fn configure(
    mesh: &MeshAsset,
    params: &SimulationParameters,
    root: &Path,
) -> CaseResult<CaseDirectory> {
    configure_with(mesh, params, root, StlFormat::Binary)
}

/// [`configure`] with an explicit encoding for the geometry file.
pub fn configure_with(
    mesh: &MeshAsset,
    params: &SimulationParameters,
    root: &Path,
    stl_format: StlFormat,
) -> CaseResult<CaseDirectory> {
    params.validate()?;
    let layout = mesh_layout(mesh, params)?;
    create_fresh(root)?;

    if let Err(err) = write_case(root, mesh, params, &layout, stl_format) {
        let _ = fs::remove_dir_all(root);
        return Err(err);
    }
    info!(case = %root.display(), "configured case");
    Ok(CaseDirectory {
        root: root.to_path_buf(),
    })
}

/// Copy the inputs of `existing` into the fresh directory `dest`. Outputs of
/// earlier runs (logs, meshes, time directories) are not carried over.
pub fn prepare_rerun(existing: &CaseDirectory, dest: &Path) -> CaseResult<CaseDirectory> {
    create_fresh(dest)?;
    let copy_all = || -> io::Result<()> {
        for rel in INPUT_FILES {
            let to = dest.join(rel);
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent)?;
            }
            // fs::copy keeps permission bits, so Allrun stays executable.
            fs::copy(existing.root().join(rel), &to)?;
        }
        Ok(())
    };
    if let Err(err) = copy_all() {
        let _ = fs::remove_dir_all(dest);
        return Err(err.into());
    }
    info!(from = %existing.root().display(), to = %dest.display(), "prepared rerun case");
    Ok(CaseDirectory {
        root: dest.to_path_buf(),
    })
}
