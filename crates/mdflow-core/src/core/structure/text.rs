use super::{
    Component, Coordinates, Residue, SimulationBox, Structure, StructureError, StructureIo,
};
use nalgebra::{Point3, Vector3};
use regex::Regex;
use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

const NM_TO_ANGSTROM: f64 = 10.0;
const RST7_FIELD_WIDTH: usize = 12;
const RST7_VALUES_PER_LINE: usize = 6;

static FORTRAN_FORMAT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\((\d+)[aAiIeEfF](\d+)").expect("Failed to compile FORMAT pattern")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Format {
    GromacsTopology,
    AmberTopology,
    Gro,
    Rst7,
}

impl Format {
    fn detect(path: &Path) -> Result<Self, StructureError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase());
        match ext.as_deref() {
            Some("top") | Some("itp") => Ok(Format::GromacsTopology),
            Some("parm7") | Some("prmtop") => Ok(Format::AmberTopology),
            Some("gro") => Ok(Format::Gro),
            Some("rst7") | Some("inpcrd") | Some("restrt") | Some("crd") => Ok(Format::Rst7),
            _ => Err(StructureError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }
}

/// Plain-text reader/writer for GROMACS (`.top`, `.gro`) and Amber (`.parm7`, `.rst7`) files.
///
/// Only the information carried by [`Structure`] is read. Parameter files are written
/// by textual recombination of the component sources, never by re-deriving parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct TextStructureIo;

impl TextStructureIo {
    pub fn new() -> Self {
        Self
    }
}

impl StructureIo for TextStructureIo {
    fn read_topology(&self, path: &Path) -> Result<Structure, StructureError> {
        let format = Format::detect(path)?;
        let text = read_text(path)?;
        match format {
            Format::GromacsTopology => read_gromacs_topology(path, &text),
            Format::AmberTopology => read_amber_topology(path, &text),
            _ => Err(StructureError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn read_coordinates(&self, path: &Path) -> Result<Coordinates, StructureError> {
        let format = Format::detect(path)?;
        let text = read_text(path)?;
        match format {
            Format::Gro => read_gro(path, &text),
            Format::Rst7 => read_rst7(path, &text),
            _ => Err(StructureError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn write_parameters(&self, structure: &Structure, path: &Path) -> Result<(), StructureError> {
        match Format::detect(path)? {
            Format::GromacsTopology => {
                let content = render_gromacs_topology(structure, path)?;
                write_text(path, &content)
            }
            Format::AmberTopology => copy_amber_parameters(structure, path),
            _ => Err(StructureError::UnsupportedFormat {
                path: path.to_path_buf(),
            }),
        }
    }

    fn write_coordinates(
        &self,
        structure: &Structure,
        path: &Path,
    ) -> Result<(), StructureError> {
        let coordinates = structure
            .coordinates
            .as_ref()
            .ok_or(StructureError::MissingCoordinates)?;
        if coordinates.positions.len() != structure.atom_count() {
            return Err(StructureError::AtomCountMismatch {
                expected: structure.atom_count(),
                found: coordinates.positions.len(),
            });
        }
        let content = match Format::detect(path)? {
            Format::Gro => render_gro(structure, coordinates),
            Format::Rst7 => render_rst7(structure, coordinates),
            _ => {
                return Err(StructureError::UnsupportedFormat {
                    path: path.to_path_buf(),
                });
            }
        };
        write_text(path, &content)
    }
}

fn read_text(path: &Path) -> Result<String, StructureError> {
    fs::read_to_string(path).map_err(|e| StructureError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn write_text(path: &Path, content: &str) -> Result<(), StructureError> {
    debug!("Writing {} bytes to {:?}", content.len(), path);
    fs::write(path, content).map_err(|e| StructureError::Io {
        path: path.to_path_buf(),
        source: e,
    })
}

fn parse_error(path: &Path, line: usize, message: impl Into<String>) -> StructureError {
    StructureError::Parse {
        path: path.to_path_buf(),
        line,
        message: message.into(),
    }
}

fn title_of(structure: &Structure) -> String {
    let names: Vec<&str> = structure.components.iter().map(|c| c.name.as_str()).collect();
    if names.is_empty() {
        "mdflow".to_string()
    } else {
        names.join(" | ")
    }
}

// --- GROMACS topology ---

#[derive(Debug)]
struct TopSection {
    header: Option<String>,
    lines: Vec<(usize, String)>,
}

impl TopSection {
    fn is(&self, name: &str) -> bool {
        self.header.as_deref() == Some(name)
    }

    fn ends_molecule(&self) -> bool {
        self.is("moleculetype") || self.is("system") || self.is("molecules")
    }
}

/// Splits a topology into `[ header ]` sections, stripping comments and blank lines.
fn split_top_sections(text: &str) -> Vec<TopSection> {
    let mut sections = vec![TopSection {
        header: None,
        lines: Vec::new(),
    }];

    for (idx, raw) in text.lines().enumerate() {
        let content = raw.split(';').next().unwrap_or_default().trim_end();
        if content.trim().is_empty() {
            continue;
        }
        let trimmed = content.trim();
        if let Some(inner) = trimmed.strip_prefix('[').and_then(|s| s.strip_suffix(']')) {
            sections.push(TopSection {
                header: Some(inner.trim().to_ascii_lowercase()),
                lines: Vec::new(),
            });
            continue;
        }
        if let Some(current) = sections.last_mut() {
            current.lines.push((idx + 1, content.to_string()));
        }
    }

    sections
}

fn first_molecule_type(path: &Path, sections: &[TopSection]) -> Result<usize, StructureError> {
    sections
        .iter()
        .position(|s| s.is("moleculetype"))
        .ok_or_else(|| parse_error(path, 0, "no [ moleculetype ] section"))
}

fn read_gromacs_topology(path: &Path, text: &str) -> Result<Structure, StructureError> {
    let sections = split_top_sections(text);
    let mol_idx = first_molecule_type(path, &sections)?;
    let name = sections[mol_idx]
        .lines
        .first()
        .and_then(|(_, line)| line.split_whitespace().next())
        .ok_or_else(|| parse_error(path, 0, "[ moleculetype ] has no name"))?
        .to_string();

    let mut residues: Vec<Residue> = Vec::new();
    let mut current: Option<(String, String)> = None;
    let molecule = sections[mol_idx + 1..]
        .iter()
        .take_while(|s| !s.ends_molecule())
        .filter(|s| s.is("atoms"));

    for section in molecule {
        for (line_no, line) in &section.lines {
            if line.trim_start().starts_with('#') {
                continue;
            }
            let cols: Vec<&str> = line.split_whitespace().collect();
            if cols.len() < 5 {
                return Err(parse_error(path, *line_no, "[ atoms ] line has fewer than 5 columns"));
            }
            let key = (cols[2].to_string(), cols[3].to_string());
            if current.as_ref() != Some(&key) {
                residues.push(Residue {
                    name: key.1.clone(),
                    atoms: Vec::new(),
                });
                current = Some(key);
            }
            if let Some(residue) = residues.last_mut() {
                residue.atoms.push(cols[4].to_string());
            }
        }
    }

    if residues.is_empty() {
        return Err(parse_error(
            path,
            0,
            format!("molecule type '{}' has no atoms", name),
        ));
    }

    debug!(
        "Read molecule type '{}' with {} residue(s) from {:?}",
        name,
        residues.len(),
        path
    );

    Ok(Structure {
        residues,
        components: vec![Component {
            name,
            source: path.to_path_buf(),
            copies: 1,
        }],
        coordinates: None,
    })
}

fn render_section(out: &mut String, header: &str, lines: &[String]) {
    out.push_str(&format!("[ {} ]\n", header));
    for line in lines {
        out.push_str(line);
        out.push('\n');
    }
    out.push('\n');
}

/// Combines the component topologies into one master topology.
///
/// Sections preceding the first molecule type are merged with duplicate lines removed
/// (only the first `[ defaults ]` is kept); each distinct molecule type is emitted once,
/// followed by `[ system ]` and a `[ molecules ]` table of copy counts.
fn render_gromacs_topology(structure: &Structure, path: &Path) -> Result<String, StructureError> {
    if structure.components.is_empty() {
        return Err(StructureError::Unsupported(
            "cannot write parameters for a structure without components".to_string(),
        ));
    }

    let mut leading: Vec<String> = Vec::new();
    let mut preamble: Vec<(String, Vec<String>)> = Vec::new();
    let mut molecules: Vec<String> = Vec::new();
    let mut seen_sources: HashSet<PathBuf> = HashSet::new();

    for component in &structure.components {
        if !seen_sources.insert(component.source.clone()) {
            continue;
        }
        let text = read_text(&component.source)?;
        let sections = split_top_sections(&text);
        let mol_idx = first_molecule_type(&component.source, &sections)?;

        for section in &sections[..mol_idx] {
            let lines = section.lines.iter().map(|(_, l)| l.clone());
            match &section.header {
                None => extend_unique(&mut leading, lines),
                Some(header) if header == "system" || header == "molecules" => {}
                Some(header) => match preamble.iter_mut().find(|(h, _)| h == header) {
                    Some(_) if header == "defaults" => {}
                    Some((_, existing)) => extend_unique(existing, lines),
                    None => preamble.push((header.clone(), lines.collect())),
                },
            }
        }

        let mut block = String::new();
        let molecule = std::iter::once(&sections[mol_idx])
            .chain(sections[mol_idx + 1..].iter().take_while(|s| !s.ends_molecule()));
        for section in molecule {
            let lines: Vec<String> = section.lines.iter().map(|(_, l)| l.clone()).collect();
            if let Some(header) = &section.header {
                render_section(&mut block, header, &lines);
            }
        }
        molecules.push(block);
    }

    let mut out = String::from("; Generated by mdflow\n\n");
    for line in &leading {
        out.push_str(line);
        out.push('\n');
    }
    if !leading.is_empty() {
        out.push('\n');
    }
    for (header, lines) in &preamble {
        render_section(&mut out, header, lines);
    }
    for block in &molecules {
        out.push_str(block);
    }

    let system_name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| title_of(structure));
    render_section(&mut out, "system", &[system_name]);

    let table: Vec<String> = structure
        .components
        .iter()
        .map(|c| format!("{:<16}{:>8}", c.name, c.copies))
        .collect();
    render_section(&mut out, "molecules", &table);

    Ok(out)
}

fn extend_unique(target: &mut Vec<String>, lines: impl Iterator<Item = String>) {
    for line in lines {
        if !target.iter().any(|existing| existing.trim() == line.trim()) {
            target.push(line);
        }
    }
}

// --- Amber topology ---

fn read_parm7_flags(path: &Path, text: &str) -> Result<HashMap<String, Vec<String>>, StructureError> {
    let mut flags: HashMap<String, Vec<String>> = HashMap::new();
    let mut current: Option<(String, usize)> = None;

    for (idx, line) in text.lines().enumerate() {
        if let Some(rest) = line.strip_prefix("%FLAG") {
            let name = rest.trim().to_string();
            flags.entry(name.clone()).or_default();
            current = Some((name, 0));
            continue;
        }
        if let Some(rest) = line.strip_prefix("%FORMAT") {
            let width = FORTRAN_FORMAT
                .captures(rest)
                .and_then(|c| c.get(2))
                .and_then(|m| m.as_str().parse::<usize>().ok())
                .filter(|w| *w > 0)
                .ok_or_else(|| parse_error(path, idx + 1, format!("unreadable format '{}'", rest)))?;
            if let Some((_, w)) = current.as_mut() {
                *w = width;
            }
            continue;
        }
        if line.starts_with('%') {
            continue;
        }
        let Some((name, width)) = current.as_ref() else {
            continue;
        };
        if *width == 0 {
            return Err(parse_error(path, idx + 1, format!("%FLAG {} has no %FORMAT", name)));
        }
        let values = flags.entry(name.clone()).or_default();
        for chunk in line.as_bytes().chunks(*width) {
            let value = String::from_utf8_lossy(chunk).trim().to_string();
            if !value.is_empty() {
                values.push(value);
            }
        }
    }

    Ok(flags)
}

fn read_amber_topology(path: &Path, text: &str) -> Result<Structure, StructureError> {
    let mut flags = read_parm7_flags(path, text)?;
    let mut take = |flag: &str| {
        flags
            .remove(flag)
            .ok_or_else(|| parse_error(path, 0, format!("missing %FLAG {}", flag)))
    };
    let atom_names = take("ATOM_NAME")?;
    let labels = take("RESIDUE_LABEL")?;
    let pointers = take("RESIDUE_POINTER")?
        .iter()
        .map(|p| p.parse::<usize>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| parse_error(path, 0, format!("invalid RESIDUE_POINTER: {}", e)))?;

    if pointers.len() != labels.len() {
        return Err(parse_error(
            path,
            0,
            "RESIDUE_LABEL and RESIDUE_POINTER lengths differ",
        ));
    }

    let mut residues = Vec::with_capacity(labels.len());
    for (i, label) in labels.into_iter().enumerate() {
        let start = pointers[i].saturating_sub(1);
        let end = pointers
            .get(i + 1)
            .map(|p| p.saturating_sub(1))
            .unwrap_or(atom_names.len());
        if start > end || end > atom_names.len() {
            return Err(parse_error(
                path,
                0,
                format!("residue {} points outside the atom list", i + 1),
            ));
        }
        residues.push(Residue {
            name: label,
            atoms: atom_names[start..end].to_vec(),
        });
    }

    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("MOL")
        .to_string();

    Ok(Structure {
        residues,
        components: vec![Component {
            name,
            source: path.to_path_buf(),
            copies: 1,
        }],
        coordinates: None,
    })
}

fn copy_amber_parameters(structure: &Structure, path: &Path) -> Result<(), StructureError> {
    match structure.components.as_slice() {
        [single] if single.copies == 1 => {
            if single.source != path {
                fs::copy(&single.source, path).map_err(|e| StructureError::Io {
                    path: path.to_path_buf(),
                    source: e,
                })?;
            }
            Ok(())
        }
        _ => Err(StructureError::Unsupported(
            "combining or replicating Amber parameter files requires tleap or ParmEd".to_string(),
        )),
    }
}

// --- Coordinates ---

fn parse_float(path: &Path, line: usize, field: &str) -> Result<f64, StructureError> {
    field
        .trim()
        .parse::<f64>()
        .map_err(|_| parse_error(path, line, format!("invalid number '{}'", field.trim())))
}

fn read_gro(path: &Path, text: &str) -> Result<Coordinates, StructureError> {
    let lines: Vec<&str> = text.lines().collect();
    let count: usize = lines
        .get(1)
        .and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| parse_error(path, 2, "missing atom count"))?;
    if lines.len() < count + 3 {
        return Err(parse_error(path, lines.len(), "file ends before the box line"));
    }

    let mut positions = Vec::with_capacity(count);
    for (offset, line) in lines[2..2 + count].iter().enumerate() {
        let line_no = offset + 3;
        let field = |start: usize| {
            line.get(start..start + 8)
                .ok_or_else(|| parse_error(path, line_no, "atom line is too short"))
        };
        let x = parse_float(path, line_no, field(20)?)?;
        let y = parse_float(path, line_no, field(28)?)?;
        let z = parse_float(path, line_no, field(36)?)?;
        positions.push(Point3::new(x, y, z) * NM_TO_ANGSTROM);
    }

    let box_line_no = count + 3;
    let values = lines[2 + count]
        .split_whitespace()
        .map(|v| parse_float(path, box_line_no, v).map(|v| v * NM_TO_ANGSTROM))
        .collect::<Result<Vec<_>, _>>()?;
    let cell = match values.as_slice() {
        [a, b, c] if *a == 0.0 && *b == 0.0 && *c == 0.0 => None,
        [a, b, c] => Some(SimulationBox::rectangular(*a, *b, *c)),
        [v1x, v2y, v3z, v1y, v1z, v2x, v2z, v3x, v3y] => Some(SimulationBox::from_vectors(
            Vector3::new(*v1x, *v1y, *v1z),
            Vector3::new(*v2x, *v2y, *v2z),
            Vector3::new(*v3x, *v3y, *v3z),
        )),
        _ => return Err(parse_error(path, box_line_no, "box line must have 3 or 9 values")),
    };

    Ok(Coordinates { positions, cell })
}

fn truncated(value: &str, width: usize) -> &str {
    match value.char_indices().nth(width) {
        Some((idx, _)) => &value[..idx],
        None => value,
    }
}

fn render_gro(structure: &Structure, coordinates: &Coordinates) -> String {
    let mut out = format!("{}\n{:5}\n", title_of(structure), coordinates.positions.len());
    for (i, ((resnr, residue, atom), position)) in structure
        .atom_names()
        .zip(&coordinates.positions)
        .enumerate()
    {
        let nm = *position / NM_TO_ANGSTROM;
        out.push_str(&format!(
            "{:>5}{:<5}{:>5}{:>5}{:8.3}{:8.3}{:8.3}\n",
            resnr % 100_000,
            truncated(&residue.name, 5),
            truncated(atom, 5),
            (i + 1) % 100_000,
            nm.x,
            nm.y,
            nm.z
        ));
    }
    match &coordinates.cell {
        None => out.push_str(&format!("{:10.5}{:10.5}{:10.5}\n", 0.0, 0.0, 0.0)),
        Some(cell) if cell.is_rectangular() => {
            let l = cell.lengths / NM_TO_ANGSTROM;
            out.push_str(&format!("{:10.5}{:10.5}{:10.5}\n", l.x, l.y, l.z));
        }
        Some(cell) => {
            let [a, b, c] = cell.vectors().map(|v| v / NM_TO_ANGSTROM);
            let values = [a.x, b.y, c.z, a.y, a.z, b.x, b.z, c.x, c.y];
            let line: String = values.iter().map(|v| format!("{:10.5}", v)).collect();
            out.push_str(&line);
            out.push('\n');
        }
    }
    out
}

fn read_rst7(path: &Path, text: &str) -> Result<Coordinates, StructureError> {
    let lines: Vec<&str> = text.lines().collect();
    let count: usize = lines
        .get(1)
        .and_then(|l| l.split_whitespace().next())
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| parse_error(path, 2, "missing atom count"))?;

    let mut values = Vec::new();
    for (offset, line) in lines.iter().enumerate().skip(2) {
        for chunk in line.as_bytes().chunks(RST7_FIELD_WIDTH) {
            let field = String::from_utf8_lossy(chunk);
            if field.trim().is_empty() {
                continue;
            }
            values.push(parse_float(path, offset + 1, &field)?);
        }
    }

    let n = 3 * count;
    let cell = match values.len() {
        len if len == n || len == 2 * n => None,
        len if len == n + 6 || len == 2 * n + 6 => {
            let b = &values[len - 6..];
            Some(SimulationBox {
                lengths: Vector3::new(b[0], b[1], b[2]),
                angles: Vector3::new(b[3], b[4], b[5]),
            })
        }
        len => {
            return Err(parse_error(
                path,
                lines.len(),
                format!("expected coordinates for {} atoms, found {} values", count, len),
            ));
        }
    };

    let positions = values[..n]
        .chunks(3)
        .map(|xyz| Point3::new(xyz[0], xyz[1], xyz[2]))
        .collect();

    Ok(Coordinates { positions, cell })
}

fn render_rst7(structure: &Structure, coordinates: &Coordinates) -> String {
    let mut out = format!("{}\n{:6}\n", title_of(structure), coordinates.positions.len());
    let values: Vec<f64> = coordinates
        .positions
        .iter()
        .flat_map(|p| [p.x, p.y, p.z])
        .collect();
    for row in values.chunks(RST7_VALUES_PER_LINE) {
        let line: String = row.iter().map(|v| format!("{:12.7}", v)).collect();
        out.push_str(&line);
        out.push('\n');
    }
    if let Some(cell) = &coordinates.cell {
        let line: String = cell
            .lengths
            .iter()
            .chain(cell.angles.iter())
            .map(|v| format!("{:12.7}", v))
            .collect();
        out.push_str(&line);
        out.push('\n');
    }
    out
}
