//! Landmark correspondence files.
//!
//! One correspondence per line: fixed `x y z` followed by moving `x y z`,
//! in voxel coordinates, separated by whitespace and/or commas. Blank lines
//! and lines starting with `#` are ignored.

use anyhow::{Context, Result};
use morphreg_core::{LandmarkSet, Point3};
use std::path::Path;

/// Parse landmark correspondences from text. `source` names the origin in
/// error messages.
pub fn parse_landmarks(text: &str, source: &str) -> Result<LandmarkSet> {
    let mut fixed = Vec::new();
    let mut moving = Vec::new();

    for (line_no, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let values = line
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|token| !token.is_empty())
            .map(|token| {
                token.parse::<f64>().with_context(|| {
                    format!("{}:{}: invalid coordinate '{}'", source, line_no + 1, token)
                })
            })
            .collect::<Result<Vec<f64>>>()?;

        if values.len() != 6 {
            anyhow::bail!(
                "{}:{}: expected 6 coordinates (fixed xyz, moving xyz), found {}",
                source,
                line_no + 1,
                values.len()
            );
        }
        if let Some(v) = values.iter().find(|v| !v.is_finite()) {
            anyhow::bail!("{}:{}: non-finite coordinate {}", source, line_no + 1, v);
        }

        fixed.push(Point3::new(values[0], values[1], values[2]));
        moving.push(Point3::new(values[3], values[4], values[5]));
    }

    LandmarkSet::new(fixed, moving).with_context(|| format!("{}: invalid landmark set", source))
}

/// Read and parse a landmark file.
pub fn read_landmarks<P: AsRef<Path>>(path: P) -> Result<LandmarkSet> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read landmark file {}", path.display()))?;
    parse_landmarks(&text, &path.display().to_string())
}
