//! Reading solved fields back from OpenFOAM ASCII output.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{RunnerError, RunnerResult};

/// Cell values of the final solution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultFields {
    /// Name of the time directory the fields came from.
    pub time: String,
    pub pressure: Vec<f64>,
    pub velocity: Vec<[f64; 3]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_centres: Option<Vec<[f64; 3]>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FieldSummary {
    pub max_pressure: f64,
    pub min_pressure: f64,
    pub max_velocity: f64,
    pub cell_count: usize,
}

impl ResultFields {
    pub fn cell_count(&self) -> usize {
        self.pressure.len()
    }

    pub fn velocity_magnitudes(&self) -> Vec<f64> {
        self.velocity
            .iter()
            .map(|[x, y, z]| (x * x + y * y + z * z).sqrt())
            .collect()
    }

    pub fn summary(&self) -> FieldSummary {
        let (min_p, max_p) = self
            .pressure
            .iter()
            .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &p| {
                (lo.min(p), hi.max(p))
            });
        let max_u = self
            .velocity_magnitudes()
            .into_iter()
            .fold(0.0_f64, f64::max);
        FieldSummary {
            max_pressure: if self.pressure.is_empty() { 0.0 } else { max_p },
            min_pressure: if self.pressure.is_empty() { 0.0 } else { min_p },
            max_velocity: max_u,
            cell_count: self.cell_count(),
        }
    }

    /// `x y z value` rows for one field, for plotting or external tools.
    pub fn to_table(&self, field: &str) -> Option<String> {
        let centres = self.cell_centres.as_ref();
        let mut out = String::new();
        match field {
            "p" => {
                out.push_str("# x y z p\n");
                for (i, p) in self.pressure.iter().enumerate() {
                    let c = centres.and_then(|c| c.get(i)).copied().unwrap_or([f64::NAN; 3]);
                    out.push_str(&format!("{} {} {} {}\n", c[0], c[1], c[2], p));
                }
            }
            "U" => {
                out.push_str("# x y z Ux Uy Uz\n");
                for (i, u) in self.velocity.iter().enumerate() {
                    let c = centres.and_then(|c| c.get(i)).copied().unwrap_or([f64::NAN; 3]);
                    out.push_str(&format!(
                        "{} {} {} {} {} {}\n",
                        c[0], c[1], c[2], u[0], u[1], u[2]
                    ));
                }
            }
            _ => return None,
        }
        Some(out)
    }
}

/// Largest numeric time directory under `dir`, ignoring the initial `0`.
pub fn latest_time_dir(dir: &Path) -> RunnerResult<Option<(String, PathBuf)>> {
    let mut best: Option<(f64, String, PathBuf)> = None;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        let Ok(t) = name.parse::<f64>() else {
            continue;
        };
        if !t.is_finite() || t <= 0.0 {
            continue;
        }
        if best.as_ref().is_none_or(|(bt, _, _)| t > *bt) {
            best = Some((t, name, entry.path()));
        }
    }
    Ok(best.map(|(_, name, path)| (name, path)))
}

/// Load `p`, `U` and, when present, `C` from the latest time directory.
pub fn read_latest(run_dir: &Path) -> RunnerResult<ResultFields> {
    let (time, dir) = latest_time_dir(run_dir)?.ok_or_else(|| RunnerError::ResultParse {
        path: run_dir.to_path_buf(),
        message: "no solution time directory".to_string(),
    })?;

    let p = read_field(&dir.join("p"))?;
    let u = read_field(&dir.join("U"))?;
    let c_path = dir.join("C");
    let c = if c_path.is_file() {
        Some((read_field(&c_path)?, c_path))
    } else {
        None
    };

    let cells = [Some(&p), Some(&u), c.as_ref().map(|(f, _)| f)]
        .into_iter()
        .flatten()
        .filter_map(InternalField::len)
        .max()
        .unwrap_or(1);

    let pressure = p.scalars(cells).ok_or_else(|| mismatch(&dir.join("p"), "scalar"))?;
    let velocity = u.vectors(cells).ok_or_else(|| mismatch(&dir.join("U"), "vector"))?;
    let cell_centres = match c {
        Some((field, path)) => Some(field.vectors(cells).ok_or_else(|| mismatch(&path, "vector"))?),
        None => None,
    };

    Ok(ResultFields {
        time,
        pressure,
        velocity,
        cell_centres,
    })
}

fn mismatch(path: &Path, kind: &str) -> RunnerError {
    RunnerError::ResultParse {
        path: path.to_path_buf(),
        message: format!("expected a {kind} field with a consistent cell count"),
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Value {
    Scalar(f64),
    Vector([f64; 3]),
}

#[derive(Debug, Clone, PartialEq)]
enum InternalField {
    Uniform(Value),
    List(Vec<Value>),
}

impl InternalField {
    fn len(&self) -> Option<usize> {
        match self {
            InternalField::Uniform(_) => None,
            InternalField::List(v) => Some(v.len()),
        }
    }

    fn expand(&self, cells: usize) -> Option<Vec<Value>> {
        match self {
            InternalField::Uniform(v) => Some(vec![v.clone(); cells]),
            InternalField::List(v) if v.len() == cells => Some(v.clone()),
            InternalField::List(_) => None,
        }
    }

    fn scalars(&self, cells: usize) -> Option<Vec<f64>> {
        self.expand(cells)?
            .into_iter()
            .map(|v| match v {
                Value::Scalar(s) => Some(s),
                Value::Vector(_) => None,
            })
            .collect()
    }

    fn vectors(&self, cells: usize) -> Option<Vec<[f64; 3]>> {
        self.expand(cells)?
            .into_iter()
            .map(|v| match v {
                Value::Vector(v) => Some(v),
                Value::Scalar(_) => None,
            })
            .collect()
    }
}

fn read_field(path: &Path) -> RunnerResult<InternalField> {
    let text = fs::read_to_string(path).map_err(|e| RunnerError::ResultParse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;
    parse_internal_field(&text).map_err(|message| RunnerError::ResultParse {
        path: path.to_path_buf(),
        message,
    })
}

/// Tokenizer over OpenFOAM ASCII text with `//` and `/* */` comments removed.
fn tokens(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut current = String::new();
    let mut chars = text.chars().peekable();
    let flush = |current: &mut String, out: &mut Vec<String>| {
        if !current.is_empty() {
            out.push(std::mem::take(current));
        }
    };
    while let Some(c) = chars.next() {
        match c {
            '/' if chars.peek() == Some(&'/') => {
                flush(&mut current, &mut out);
                for c in chars.by_ref() {
                    if c == '\n' {
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                flush(&mut current, &mut out);
                chars.next();
                let mut prev = ' ';
                for c in chars.by_ref() {
                    if prev == '*' && c == '/' {
                        break;
                    }
                    prev = c;
                }
            }
            '(' | ')' | ';' | '{' | '}' => {
                flush(&mut current, &mut out);
                out.push(c.to_string());
            }
            c if c.is_whitespace() => flush(&mut current, &mut out),
            c => current.push(c),
        }
    }
    flush(&mut current, &mut out);
    out
}

fn parse_number(tok: Option<&String>) -> Result<f64, String> {
    let tok = tok.ok_or("unexpected end of field")?;
    tok.parse::<f64>()
        .map_err(|_| format!("expected a number, found '{tok}'"))
}

fn parse_value<'a>(it: &mut impl Iterator<Item = &'a String>) -> Result<Value, String> {
    let first = it.next().ok_or("unexpected end of field")?;
    if first == "(" {
        let x = parse_number(it.next())?;
        let y = parse_number(it.next())?;
        let z = parse_number(it.next())?;
        match it.next().map(String::as_str) {
            Some(")") => Ok(Value::Vector([x, y, z])),
            other => Err(format!("expected ')', found {other:?}")),
        }
    } else {
        Ok(Value::Scalar(parse_number(Some(first))?))
    }
}

fn parse_internal_field(text: &str) -> Result<InternalField, String> {
    let toks = tokens(text);
    let pos = toks
        .iter()
        .position(|t| t == "internalField")
        .ok_or("missing internalField")?;
    let mut it = toks[pos + 1..].iter();
    match it.next().map(String::as_str) {
        Some("uniform") => Ok(InternalField::Uniform(parse_value(&mut it)?)),
        Some("nonuniform") => {
            let kind = it.next().ok_or("missing list type")?;
            if !kind.starts_with("List<") {
                return Err(format!("unsupported list type '{kind}'"));
            }
            let count_tok = it.next().ok_or("missing list length")?;
            let count: usize = count_tok
                .parse()
                .map_err(|_| format!("invalid list length '{count_tok}'"))?;
            if it.next().map(String::as_str) != Some("(") {
                return Err("expected '(' after list length".to_string());
            }
            // Every value takes at least one token, so a longer declared
            // length can only come from a truncated or corrupt file.
            if count > it.len() {
                return Err(format!(
                    "declared length {count} exceeds the {} tokens left in the file",
                    it.len()
                ));
            }
            let mut values = Vec::with_capacity(count);
            for read in 0..count {
                if it.as_slice().first().map(String::as_str) == Some(")") {
                    return Err(format!("list has {read} values, declared {count}"));
                }
                values.push(parse_value(&mut it)?);
            }
            if it.next().map(String::as_str) != Some(")") {
                return Err(format!("list longer than declared length {count}"));
            }
            Ok(InternalField::List(values))
        }
        other => Err(format!("unexpected internalField form {other:?}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P_FIELD: &str = r#"
/*--------------------------------*- C++ -*----------------------------------*\
  =========                 |
\*---------------------------------------------------------------------------*/
FoamFile
{
    version     2.0;
    format      ascii;
    class       volScalarField;
    object      p;
}
// * * * * * * * * * * //

dimensions      [0 2 -2 0 0 0 0];

internalField   nonuniform List<scalar>
3
(
0.5
-1.25e-1
2
)
;

boundaryField
{
    inlet { type zeroGradient; }
}
"#;

    const U_FIELD: &str = "FoamFile { class volVectorField; object U; }\n\
        internalField nonuniform List<vector> 3((1 0 0) (2 0.5 0) (0 -3 0));\n\
        boundaryField { }\n";

    #[test]
    fn parses_nonuniform_lists() {
        let p = parse_internal_field(P_FIELD).unwrap();
        assert_eq!(p.len(), Some(3));
        assert_eq!(p.scalars(3), Some(vec![0.5, -0.125, 2.0]));
        let u = parse_internal_field(U_FIELD).unwrap();
        assert_eq!(u.vectors(3).unwrap()[1], [2.0, 0.5, 0.0]);
        assert_eq!(u.scalars(3), None);
    }

    #[test]
    fn uniform_fields_expand() {
        let f = parse_internal_field("internalField uniform (1 2 3);").unwrap();
        assert_eq!(f.vectors(2), Some(vec![[1.0, 2.0, 3.0]; 2]));
        let f = parse_internal_field("internalField uniform 0;").unwrap();
        assert_eq!(f.scalars(4), Some(vec![0.0; 4]));
    }

    #[test]
    fn malformed_fields_are_errors() {
        assert!(parse_internal_field("dimensions [0 0 0 0 0 0 0];").is_err());
        assert!(parse_internal_field("internalField nonuniform List<scalar> 3 (1 2);").is_err());
        assert!(parse_internal_field("internalField nonuniform List<scalar> 1 (1 2);").is_err());
        assert!(parse_internal_field("internalField uniform abc;").is_err());
    }

    #[test]
    fn oversized_list_length_is_rejected_without_allocating() {
        let err = parse_internal_field(
            "internalField nonuniform List<scalar> 99999999999999999 (1 2);",
        )
        .unwrap_err();
        assert!(err.contains("declared length"), "{err}");

        let err = parse_internal_field("internalField nonuniform List<scalar> 3 (1 2) ; ; ;")
            .unwrap_err();
        assert_eq!(err, "list has 2 values, declared 3");
    }

    #[test]
    fn truncated_field_file_is_a_result_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("7")).unwrap();
        fs::write(
            dir.path().join("7/p"),
            "internalField nonuniform List<scalar> 18446744073709551615 (0.5",
        )
        .unwrap();
        fs::write(dir.path().join("7/U"), U_FIELD).unwrap();
        assert!(matches!(
            read_latest(dir.path()),
            Err(RunnerError::ResultParse { .. })
        ));
    }

    #[test]
    fn reads_latest_time_directory() {
        let dir = tempfile::tempdir().unwrap();
        for t in ["0", "50", "100", "constant"] {
            fs::create_dir_all(dir.path().join(t)).unwrap();
        }
        fs::write(dir.path().join("100/p"), P_FIELD).unwrap();
        fs::write(dir.path().join("100/U"), U_FIELD).unwrap();
        let fields = read_latest(dir.path()).unwrap();
        assert_eq!(fields.time, "100");
        assert_eq!(fields.cell_count(), 3);
        assert!(fields.cell_centres.is_none());

        let s = fields.summary();
        assert_eq!(s.max_pressure, 2.0);
        assert_eq!(s.min_pressure, -0.125);
        assert_eq!(s.max_velocity, 3.0);
        assert!(fields.to_table("p").unwrap().lines().count() == 4);
        assert!(fields.to_table("T").is_none());
    }

    #[test]
    fn missing_time_directory_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("0")).unwrap();
        assert!(matches!(
            read_latest(dir.path()),
            Err(RunnerError::ResultParse { .. })
        ));
    }

    #[test]
    fn inconsistent_cell_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir_all(dir.path().join("10")).unwrap();
        fs::write(dir.path().join("10/p"), P_FIELD).unwrap();
        fs::write(
            dir.path().join("10/U"),
            "internalField nonuniform List<vector> 1((1 0 0));",
        )
        .unwrap();
        assert!(matches!(
            read_latest(dir.path()),
            Err(RunnerError::ResultParse { .. })
        ));
    }
}
