//! Unit-type and incident-kind catalogs.
//!
//! The catalog is loaded once at startup from three line-oriented files and
//! shared read-only afterwards:
//!
//! - `env.conf`: `key = value` pairs (`queue`, `width`, `height`)
//! - `unit_types.conf`: `[name][count][speed][x;y]`
//! - `incident_kinds.conf`: `[name] [priority] Type:count,time;Type:count,time`
//!
//! Blank lines and lines starting with `#` are ignored in every file.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use serde::Serialize;

use crate::error::CatalogError;
use crate::geo::Position;
use crate::scheduler::priority::Priority;

pub const ENV_FILE: &str = "env.conf";
pub const UNIT_TYPES_FILE: &str = "unit_types.conf";
pub const INCIDENT_KINDS_FILE: &str = "incident_kinds.conf";

/// Largest unit count accepted for a pool or a single requirement.
pub const MAX_UNIT_COUNT: usize = 10_000;
/// Largest service time, in time units, accepted for a requirement.
pub const MAX_TIME_TO_MANAGE: u64 = 1_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnitType {
    pub name: String,
    /// Grid cells covered per time unit. Always positive.
    pub speed: u32,
    pub base: Position,
}

impl UnitType {
    pub fn new(name: impl Into<String>, speed: u32, base: Position) -> Self {
        Self {
            name: name.into(),
            speed,
            base,
        }
    }
}

/// How many units of a type the center operates.
#[derive(Debug, Clone)]
pub struct UnitPool {
    pub unit_type: Arc<UnitType>,
    pub count: usize,
}

#[derive(Debug, Clone)]
pub struct Requirement {
    pub unit_type: Arc<UnitType>,
    pub count: usize,
    /// Time units a unit of this type spends on scene.
    pub time_to_manage: u64,
}

#[derive(Debug, Clone)]
pub struct IncidentKind {
    pub name: String,
    pub priority: i32,
    pub requirements: Vec<Requirement>,
}

impl IncidentKind {
    /// The requirement a unit of `unit_type` is serving, if any.
    pub fn requirement_for(&self, unit_type: &str) -> Option<&Requirement> {
        self.requirements
            .iter()
            .find(|r| r.unit_type.name == unit_type)
    }

    /// Total number of units needed across all requirements.
    pub fn total_units(&self) -> usize {
        self.requirements
            .iter()
            .fold(0usize, |total, r| total.saturating_add(r.count))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MapBounds {
    pub width: i32,
    pub height: i32,
}

impl MapBounds {
    pub fn contains(&self, position: Position) -> bool {
        (0..self.width).contains(&position.x) && (0..self.height).contains(&position.y)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvConfig {
    /// Name of the ingestion channel, used as a label in logs.
    pub queue: String,
    pub bounds: MapBounds,
}

#[derive(Debug, Clone)]
pub struct Catalog {
    pub env: EnvConfig,
    pub unit_pools: Vec<UnitPool>,
    pub kinds: Vec<Arc<IncidentKind>>,
}

impl Catalog {
    /// Load the three catalog files from `dir`.
    pub async fn load(dir: &Path) -> Result<Self, CatalogError> {
        let env = read_file(&dir.join(ENV_FILE)).await?;
        let unit_types = read_file(&dir.join(UNIT_TYPES_FILE)).await?;
        let incident_kinds = read_file(&dir.join(INCIDENT_KINDS_FILE)).await?;
        Self::from_sources(&env, &unit_types, &incident_kinds)
    }

    /// Parse a catalog from in-memory file contents.
    pub fn from_sources(
        env: &str,
        unit_types: &str,
        incident_kinds: &str,
    ) -> Result<Self, CatalogError> {
        let env = parse_env(env)?;
        let unit_pools = parse_unit_types(unit_types)?;
        let kinds = parse_incident_kinds(incident_kinds, &unit_pools)?;

        tracing::info!(
            queue = %env.queue,
            width = env.bounds.width,
            height = env.bounds.height,
            unit_types = unit_pools.len(),
            incident_kinds = kinds.len(),
            "Catalog loaded"
        );

        Ok(Self {
            env,
            unit_pools,
            kinds,
        })
    }

    pub fn kind(&self, name: &str) -> Option<&Arc<IncidentKind>> {
        self.kinds.iter().find(|k| k.name == name)
    }

    pub fn unit_type(&self, name: &str) -> Option<&Arc<UnitType>> {
        self.unit_pools
            .iter()
            .map(|p| &p.unit_type)
            .find(|t| t.name == name)
    }

    pub fn total_units(&self) -> usize {
        self.unit_pools
            .iter()
            .fold(0usize, |total, p| total.saturating_add(p.count))
    }
}

async fn read_file(path: &Path) -> Result<String, CatalogError> {
    tokio::fs::read_to_string(path)
        .await
        .map_err(|source| CatalogError::Read {
            path: path.to_path_buf(),
            source,
        })
}

/// Non-empty, non-comment lines with their 1-based line numbers.
fn content_lines(source: &str) -> impl Iterator<Item = (usize, &str)> {
    source
        .lines()
        .enumerate()
        .map(|(i, line)| (i + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

fn malformed(file: &str, line: usize, reason: impl Into<String>) -> CatalogError {
    CatalogError::Malformed {
        file: file.to_string(),
        line,
        reason: reason.into(),
    }
}

/// Split `[a][b] rest` into the bracketed fields and the trailing text.
fn bracketed_fields(line: &str) -> Option<(Vec<&str>, &str)> {
    let mut fields = Vec::new();
    let mut rest = line.trim_start();
    while let Some(stripped) = rest.strip_prefix('[') {
        let end = stripped.find(']')?;
        fields.push(stripped[..end].trim());
        rest = stripped[end + 1..].trim_start();
    }
    Some((fields, rest))
}

fn parse_number<T: std::str::FromStr>(
    file: &str,
    line: usize,
    field: &str,
    value: &str,
) -> Result<T, CatalogError> {
    value
        .trim()
        .parse()
        .map_err(|_| malformed(file, line, format!("{} '{}' is not a number", field, value)))
}

/// `parse_number` with an inclusive upper limit.
fn parse_bounded<T>(
    file: &str,
    line: usize,
    field: &str,
    value: &str,
    max: T,
) -> Result<T, CatalogError>
where
    T: std::str::FromStr + PartialOrd + std::fmt::Display,
{
    let parsed: T = parse_number(file, line, field, value)?;
    if parsed > max {
        return Err(malformed(
            file,
            line,
            format!("{} {} exceeds the limit of {}", field, parsed, max),
        ));
    }
    Ok(parsed)
}

fn parse_env(source: &str) -> Result<EnvConfig, CatalogError> {
    let mut queue = String::from("incidents");
    let mut width = None;
    let mut height = None;

    for (line_no, line) in content_lines(source) {
        let (key, value) = line
            .split_once('=')
            .ok_or_else(|| malformed(ENV_FILE, line_no, "expected key = value"))?;
        let (key, value) = (key.trim(), value.trim());
        match key {
            "queue" => queue = value.to_string(),
            "width" => width = Some(parse_number::<i32>(ENV_FILE, line_no, "width", value)?),
            "height" => height = Some(parse_number::<i32>(ENV_FILE, line_no, "height", value)?),
            other => tracing::warn!(key = other, line = line_no, "Ignoring unknown env key"),
        }
    }

    let width = width.unwrap_or(0);
    let height = height.unwrap_or(0);
    if width <= 0 || height <= 0 {
        return Err(CatalogError::InvalidBounds { width, height });
    }

    Ok(EnvConfig {
        queue,
        bounds: MapBounds { width, height },
    })
}

fn parse_unit_types(source: &str) -> Result<Vec<UnitPool>, CatalogError> {
    let mut pools: Vec<UnitPool> = Vec::new();

    for (line_no, line) in content_lines(source) {
        let (fields, rest) = bracketed_fields(line)
            .ok_or_else(|| malformed(UNIT_TYPES_FILE, line_no, "unclosed bracket"))?;
        if fields.len() != 4 || !rest.is_empty() {
            return Err(malformed(
                UNIT_TYPES_FILE,
                line_no,
                "expected [name][count][speed][x;y]",
            ));
        }

        let name = fields[0];
        if name.is_empty() {
            return Err(malformed(UNIT_TYPES_FILE, line_no, "empty unit type name"));
        }
        if pools.iter().any(|p| p.unit_type.name == name) {
            return Err(CatalogError::Duplicate {
                file: UNIT_TYPES_FILE.to_string(),
                line: line_no,
                name: name.to_string(),
            });
        }

        let count = parse_bounded(
            UNIT_TYPES_FILE,
            line_no,
            "count",
            fields[1],
            MAX_UNIT_COUNT,
        )?;
        let speed: i64 = parse_number(UNIT_TYPES_FILE, line_no, "speed", fields[2])?;
        let speed = u32::try_from(speed)
            .ok()
            .filter(|s| *s > 0)
            .ok_or_else(|| CatalogError::InvalidSpeed {
                file: UNIT_TYPES_FILE.to_string(),
                line: line_no,
                name: name.to_string(),
                speed,
            })?;

        let (x, y) = fields[3]
            .split_once(';')
            .ok_or_else(|| malformed(UNIT_TYPES_FILE, line_no, "base must be x;y"))?;
        let base = Position::new(
            parse_number(UNIT_TYPES_FILE, line_no, "base x", x)?,
            parse_number(UNIT_TYPES_FILE, line_no, "base y", y)?,
        );

        pools.push(UnitPool {
            unit_type: Arc::new(UnitType::new(name, speed, base)),
            count,
        });
    }

    Ok(pools)
}

fn parse_incident_kinds(
    source: &str,
    pools: &[UnitPool],
) -> Result<Vec<Arc<IncidentKind>>, CatalogError> {
    let mut kinds: Vec<Arc<IncidentKind>> = Vec::new();

    for (line_no, line) in content_lines(source) {
        let (fields, rest) = bracketed_fields(line)
            .ok_or_else(|| malformed(INCIDENT_KINDS_FILE, line_no, "unclosed bracket"))?;
        if fields.len() != 2 {
            return Err(malformed(
                INCIDENT_KINDS_FILE,
                line_no,
                "expected [name] [priority] requirements",
            ));
        }

        let name = fields[0];
        if name.is_empty() {
            return Err(malformed(INCIDENT_KINDS_FILE, line_no, "empty incident name"));
        }
        if kinds.iter().any(|k| k.name == name) {
            return Err(CatalogError::Duplicate {
                file: INCIDENT_KINDS_FILE.to_string(),
                line: line_no,
                name: name.to_string(),
            });
        }

        let priority: i32 = parse_number(INCIDENT_KINDS_FILE, line_no, "priority", fields[1])?;
        if Priority::from_level(priority).is_none() {
            tracing::warn!(
                kind = name,
                priority,
                line = line_no,
                "Priority outside the deadline table, incidents of this kind will be canceled"
            );
        }

        let mut requirements = Vec::new();
        let mut seen = HashSet::new();
        for entry in rest.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (type_name, numbers) = entry.split_once(':').ok_or_else(|| {
                malformed(INCIDENT_KINDS_FILE, line_no, "requirement must be Type:count,time")
            })?;
            let (count, time) = numbers.split_once(',').ok_or_else(|| {
                malformed(INCIDENT_KINDS_FILE, line_no, "requirement must be Type:count,time")
            })?;
            let type_name = type_name.trim();

            let unit_type = pools
                .iter()
                .find(|p| p.unit_type.name == type_name)
                .map(|p| p.unit_type.clone())
                .ok_or_else(|| CatalogError::UnknownUnitType {
                    file: INCIDENT_KINDS_FILE.to_string(),
                    line: line_no,
                    name: type_name.to_string(),
                })?;
            if !seen.insert(type_name) {
                return Err(CatalogError::Duplicate {
                    file: INCIDENT_KINDS_FILE.to_string(),
                    line: line_no,
                    name: type_name.to_string(),
                });
            }

            requirements.push(Requirement {
                unit_type,
                count: parse_bounded(
                    INCIDENT_KINDS_FILE,
                    line_no,
                    "count",
                    count,
                    MAX_UNIT_COUNT,
                )?,
                time_to_manage: parse_bounded(
                    INCIDENT_KINDS_FILE,
                    line_no,
                    "time",
                    time,
                    MAX_TIME_TO_MANAGE,
                )?,
            });
        }

        if requirements.is_empty() {
            return Err(CatalogError::EmptyRequirements {
                file: INCIDENT_KINDS_FILE.to_string(),
                line: line_no,
                name: name.to_string(),
            });
        }

        kinds.push(Arc::new(IncidentKind {
            name: name.to_string(),
            priority,
            requirements,
        }));
    }

    Ok(kinds)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bracketed_fields_splits_trailing_text() {
        let (fields, rest) = bracketed_fields("[Fire] [2] Truck:1,4").unwrap();
        assert_eq!(fields, vec!["Fire", "2"]);
        assert_eq!(rest, "Truck:1,4");
    }

    #[test]
    fn bracketed_fields_rejects_unclosed() {
        assert!(bracketed_fields("[Fire").is_none());
    }

    #[test]
    fn total_units_saturates() {
        let truck = Arc::new(UnitType::new("Truck", 5, Position::new(0, 0)));
        let kind = IncidentKind {
            name: "Swarm".to_string(),
            priority: 0,
            requirements: vec![
                Requirement {
                    unit_type: truck.clone(),
                    count: usize::MAX,
                    time_to_manage: 1,
                },
                Requirement {
                    unit_type: truck,
                    count: 2,
                    time_to_manage: 1,
                },
            ],
        };
        assert_eq!(kind.total_units(), usize::MAX);
    }

    #[test]
    fn parse_bounded_rejects_values_over_limit() {
        assert_eq!(parse_bounded::<u64>("f", 1, "time", "10", 10).unwrap(), 10);
        let err = parse_bounded::<u64>("f", 3, "time", "11", 10).unwrap_err();
        assert!(matches!(err, CatalogError::Malformed { line: 3, .. }));
    }

    #[test]
    fn map_bounds_are_half_open() {
        let bounds = MapBounds {
            width: 10,
            height: 5,
        };
        assert!(bounds.contains(Position::new(0, 0)));
        assert!(bounds.contains(Position::new(9, 4)));
        assert!(!bounds.contains(Position::new(10, 0)));
        assert!(!bounds.contains(Position::new(0, -1)));
    }
}
