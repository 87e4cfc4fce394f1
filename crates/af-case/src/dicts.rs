//! OpenFOAM dictionary text for the meshing and solving stages.

use af_geometry::DomainBounds;

use crate::params::SimulationParameters;

/// Settings that depend on the geometry rather than on the parameters alone.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MeshLayout {
    pub domain: DomainBounds,
    pub depth: f64,
    pub location_in_mesh: (f64, f64, f64),
}

fn header(class: &str, location: &str, object: &str) -> String {
    format!(
        "FoamFile\n{{\n    version     2.0;\n    format      ascii;\n    class       {class};\n    location    \"{location}\";\n    object      {object};\n}}\n\n"
    )
}

fn cells(extent: f64, size: f64) -> usize {
    ((extent / size - 1e-9).ceil() as usize).max(1)
}

pub fn block_mesh_dict(params: &SimulationParameters, layout: &MeshLayout) -> String {
    let d = layout.domain;
    let h = params.resolution.background_cell_size();
    let (nx, ny) = (cells(d.width(), h), cells(d.height(), h));
    let z = layout.depth;
    let mut s = header("dictionary", "system", "blockMeshDict");
    s.push_str("convertToMeters 1;\n\nvertices\n(\n");
    for zz in [0.0, z] {
        for (x, y) in [
            (d.x_min, d.y_min),
            (d.x_max, d.y_min),
            (d.x_max, d.y_max),
            (d.x_min, d.y_max),
        ] {
            s.push_str(&format!("    ({x} {y} {zz})\n"));
        }
    }
    s.push_str(&format!(
        ");\n\nblocks\n(\n    hex (0 1 2 3 4 5 6 7) ({nx} {ny} 1) simpleGrading (1 1 1)\n);\n\nedges\n(\n);\n\n"
    ));
    s.push_str(
        "boundary\n(\n\
         \x20   inlet\n    {\n        type patch;\n        faces ((0 4 7 3));\n    }\n\
         \x20   outlet\n    {\n        type patch;\n        faces ((1 2 6 5));\n    }\n\
         \x20   top\n    {\n        type symmetryPlane;\n        faces ((3 7 6 2));\n    }\n\
         \x20   bottom\n    {\n        type symmetryPlane;\n        faces ((0 1 5 4));\n    }\n\
         \x20   frontAndBack\n    {\n        type empty;\n        faces ((0 3 2 1) (4 5 6 7));\n    }\n\
         );\n",
    );
    s
}

pub fn surface_feature_extract_dict() -> String {
    let mut s = header("dictionary", "system", "surfaceFeatureExtractDict");
    s.push_str(
        "airfoil.stl\n{\n    extractionMethod    extractFromSurface;\n    includedAngle       150;\n    writeObj            no;\n}\n",
    );
    s
}

pub fn snappy_hex_mesh_dict(params: &SimulationParameters, layout: &MeshLayout) -> String {
    let level = params.refinement_level;
    let (lx, ly, lz) = layout.location_in_mesh;
    let mut s = header("dictionary", "system", "snappyHexMeshDict");
    s.push_str(&format!(
        "castellatedMesh true;\nsnap            true;\naddLayers       false;\n\n\
         geometry\n{{\n    airfoil.stl\n    {{\n        type triSurfaceMesh;\n        name airfoil;\n    }}\n}}\n\n\
         castellatedMeshControls\n{{\n    maxLocalCells 1000000;\n    maxGlobalCells 4000000;\n    minRefinementCells 0;\n    nCellsBetweenLevels 3;\n\n\
         \x20   features\n    (\n        {{ file \"airfoil.eMesh\"; level {level}; }}\n    );\n\n\
         \x20   refinementSurfaces\n    {{\n        airfoil\n        {{\n            level ({level} {level});\n            patchInfo {{ type wall; }}\n        }}\n    }}\n\n\
         \x20   resolveFeatureAngle 30;\n    refinementRegions {{}}\n\n\
         \x20   locationInMesh ({lx} {ly} {lz});\n    allowFreeStandingZoneFaces true;\n}}\n\n\
         snapControls\n{{\n    nSmoothPatch 3;\n    tolerance 2.0;\n    nSolveIter 100;\n    nRelaxIter 5;\n    nFeatureSnapIter 10;\n}}\n\n\
         addLayersControls\n{{\n    relativeSizes true;\n    layers {{}}\n    expansionRatio 1.0;\n    finalLayerThickness 0.3;\n    minThickness 0.1;\n}}\n\n\
         meshQualityControls\n{{\n    #include \"meshQualityDict\"\n}}\n\n\
         mergeTolerance 1e-6;\n"
    ));
    s
}

pub fn extrude_mesh_dict(layout: &MeshLayout) -> String {
    let mut s = header("dictionary", "system", "extrudeMeshDict");
    s.push_str(&format!(
        "constructFrom patch;\nsourceCase \".\";\nsourcePatches (frontAndBack);\nexposedPatchName frontAndBack;\n\
         flipNormals false;\nextrudeModel linearNormal;\nnLayers 1;\nexpansionRatio 1.0;\n\
         linearNormalCoeffs\n{{\n    thickness {};\n}}\n\nmergeFaces false;\n",
        layout.depth
    ));
    s
}

pub fn mesh_quality_dict() -> String {
    let mut s = header("dictionary", "system", "meshQualityDict");
    s.push_str(
        "maxNonOrtho 65;\nmaxBoundarySkewness 20;\nmaxInternalSkewness 4;\nmaxConcave 80;\n\
         minVol 1e-13;\nminTetQuality 1e-15;\nminArea -1;\nminTwist 0.02;\nminDeterminant 0.001;\n\
         minFaceWeight 0.05;\nminVolRatio 0.01;\nminTriangleTwist -1;\nnSmoothScale 4;\nerrorReduction 0.75;\n",
    );
    s
}

/// `controlDict` for either stage. Meshing only needs a single write.
pub fn control_dict(application: &str, end_time: u32, write_interval: u32) -> String {
    let mut s = header("dictionary", "system", "controlDict");
    s.push_str(&format!(
        "application     {application};\nstartFrom       startTime;\nstartTime       0;\n\
         stopAt          endTime;\nendTime         {end_time};\ndeltaT          1;\n\
         writeControl    timeStep;\nwriteInterval   {write_interval};\npurgeWrite      0;\n\
         writeFormat     ascii;\nwritePrecision  8;\nwriteCompression off;\ntimeFormat      general;\n\
         timePrecision   6;\nrunTimeModifiable true;\n"
    ));
    s
}

pub fn fv_schemes() -> String {
    let mut s = header("dictionary", "system", "fvSchemes");
    s.push_str(
        "ddtSchemes\n{\n    default steadyState;\n}\n\n\
         gradSchemes\n{\n    default Gauss linear;\n}\n\n\
         divSchemes\n{\n    default none;\n    div(phi,U) bounded Gauss linearUpwind grad(U);\n    div((nuEff*dev2(T(grad(U))))) Gauss linear;\n}\n\n\
         laplacianSchemes\n{\n    default Gauss linear corrected;\n}\n\n\
         interpolationSchemes\n{\n    default linear;\n}\n\n\
         snGradSchemes\n{\n    default corrected;\n}\n",
    );
    s
}

pub fn fv_solution(params: &SimulationParameters) -> String {
    let tol = params.tolerance;
    let mut s = header("dictionary", "system", "fvSolution");
    s.push_str(&format!(
        "solvers\n{{\n    p\n    {{\n        solver GAMG;\n        tolerance {tol:e};\n        relTol 0.1;\n        smoother GaussSeidel;\n    }}\n\n\
         \x20   U\n    {{\n        solver smoothSolver;\n        smoother symGaussSeidel;\n        tolerance {tol:e};\n        relTol 0.1;\n    }}\n}}\n\n\
         SIMPLE\n{{\n    nNonOrthogonalCorrectors 0;\n    consistent yes;\n\n\
         \x20   residualControl\n    {{\n        p {tol:e};\n        U {tol:e};\n    }}\n}}\n\n\
         relaxationFactors\n{{\n    equations\n    {{\n        U 0.9;\n        \".*\" 0.9;\n    }}\n}}\n"
    ));
    s
}

/// Placeholder solver settings for the meshing stage, which never solves.
pub fn mesh_fv_solution() -> String {
    let mut s = header("dictionary", "system", "fvSolution");
    s.push_str("solvers\n{\n}\n");
    s
}

pub fn transport_properties(params: &SimulationParameters) -> String {
    let mut s = header("dictionary", "constant", "transportProperties");
    s.push_str(&format!(
        "transportModel  Newtonian;\n\nnu              {:e};\n\nrho             {};\n",
        params.kinematic_viscosity_m2_s, params.density_kg_m3
    ));
    s
}

pub fn turbulence_properties() -> String {
    let mut s = header("dictionary", "constant", "momentumTransport");
    s.push_str("simulationType  laminar;\n");
    s
}

pub fn velocity_field(params: &SimulationParameters) -> String {
    let u = params.velocity_mps;
    let mut s = header("volVectorField", "0", "U");
    s.push_str(&format!(
        "dimensions      [0 1 -1 0 0 0 0];\n\ninternalField   uniform ({u} 0 0);\n\n\
         boundaryField\n{{\n\
         \x20   inlet\n    {{\n        type            fixedValue;\n        value           uniform ({u} 0 0);\n    }}\n\
         \x20   outlet\n    {{\n        type            zeroGradient;\n    }}\n\
         \x20   airfoil\n    {{\n        type            noSlip;\n    }}\n\
         \x20   top\n    {{\n        type            symmetryPlane;\n    }}\n\
         \x20   bottom\n    {{\n        type            symmetryPlane;\n    }}\n\
         \x20   frontAndBack\n    {{\n        type            empty;\n    }}\n}}\n"
    ));
    s
}

pub fn pressure_field() -> String {
    let mut s = header("volScalarField", "0", "p");
    s.push_str(
        "dimensions      [0 2 -2 0 0 0 0];\n\ninternalField   uniform 0;\n\n\
         boundaryField\n{\n\
         \x20   inlet\n    {\n        type            zeroGradient;\n    }\n\
         \x20   outlet\n    {\n        type            fixedValue;\n        value           uniform 0;\n    }\n\
         \x20   airfoil\n    {\n        type            zeroGradient;\n    }\n\
         \x20   top\n    {\n        type            symmetryPlane;\n    }\n\
         \x20   bottom\n    {\n        type            symmetryPlane;\n    }\n\
         \x20   frontAndBack\n    {\n        type            empty;\n    }\n}\n",
    );
    s
}

pub fn mesh_allrun() -> String {
    "#!/bin/sh\ncd \"${0%/*}\" || exit 1\nset -e\n\n\
     blockMesh\nsurfaceFeatureExtract\nsnappyHexMesh -overwrite\nextrudeMesh\ncheckMesh\n"
        .to_string()
}

pub fn run_allrun() -> String {
    "#!/bin/sh\ncd \"${0%/*}\" || exit 1\nset -e\n\n\
     simpleFoam\npostProcess -func writeCellCentres -latestTime\n"
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::Resolution;

    fn layout() -> MeshLayout {
        MeshLayout {
            domain: DomainBounds::default(),
            depth: 0.1,
            location_in_mesh: (-2.5, 0.0, 0.05),
        }
    }

    #[test]
    fn block_mesh_cell_count_follows_resolution() {
        let params = SimulationParameters {
            resolution: Resolution::Coarse,
            ..Default::default()
        };
        let text = block_mesh_dict(&params, &layout());
        assert!(text.contains("(150 100 1)"), "{text}");
        assert!(text.contains("object      blockMeshDict;"));
    }

    #[test]
    fn velocity_boundary_conditions() {
        let params = SimulationParameters {
            velocity_mps: 25.0,
            ..Default::default()
        };
        let text = velocity_field(&params);
        assert!(text.contains("value           uniform (25 0 0);"));
        assert!(text.contains("noSlip"));
        assert!(pressure_field().contains("fixedValue"));
    }

    #[test]
    fn solver_controls_carry_tolerance_and_iterations() {
        let params = SimulationParameters {
            tolerance: 1e-4,
            ..Default::default()
        };
        assert!(fv_solution(&params).contains("p 1e-4;"));
        assert!(control_dict("simpleFoam", 750, 750).contains("endTime         750;"));
    }

    #[test]
    fn snappy_uses_refinement_level_and_location() {
        let params = SimulationParameters {
            refinement_level: 5,
            ..Default::default()
        };
        let text = snappy_hex_mesh_dict(&params, &layout());
        assert!(text.contains("level (5 5);"));
        assert!(text.contains("locationInMesh (-2.5 0 0.05);"));
    }
}
