use crate::error::{EngineError, Result};
use crate::models::box_record::{BoxRecord, BoxUpdate, NewBox};
use log::warn;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

const REQUIRED_COLUMNS: [&str; 6] =
    ["n_boite", "adresse", "commune", "cp", "conteneur", "volume_moyen"];
const WEEK_PREFIX: &str = "semaine_";

/// Indexed table of boxes (id → record) sharing one catalog-wide week index.
#[derive(Debug, Clone, Default)]
pub struct BoxCatalog {
    week_count: usize,
    boxes: BTreeMap<u32, BoxRecord>,
    source: SourceLayout,
}

/// Header and raw rows of the file the catalog was read from. Columns the
/// catalog does not model are written back untouched.
#[derive(Debug, Clone, Default)]
struct SourceLayout {
    header: Vec<String>,
    rows: BTreeMap<u32, Vec<String>>,
}

/// What a header cell maps to on write-back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Required(usize),
    Week(usize),
    Other,
}

impl Column {
    fn classify(name: &str) -> Self {
        let name = name.trim();
        if let Some(idx) = REQUIRED_COLUMNS.iter().position(|c| *c == name) {
            return Column::Required(idx);
        }
        match week_of(name) {
            Some(week) => Column::Week(week),
            None => Column::Other,
        }
    }
}

fn week_of(name: &str) -> Option<usize> {
    name.strip_prefix(WEEK_PREFIX)
        .and_then(|n| n.parse::<usize>().ok())
        .filter(|week| *week > 0)
}

impl BoxCatalog {
    /// Build a catalog from already-parsed records. Every record is padded or
    /// checked against `week_count`.
    pub fn new(week_count: usize, records: Vec<BoxRecord>) -> Result<Self> {
        if week_count == 0 {
            return Err(EngineError::Schema("no weekly observation columns".to_string()));
        }

        let mut boxes = BTreeMap::new();
        for mut record in records {
            if record.weekly_fill.len() > week_count {
                return Err(EngineError::Schema(format!(
                    "box #{} has {} weekly readings, catalog has {week_count} weeks",
                    record.id,
                    record.weekly_fill.len()
                )));
            }
            record.weekly_fill.resize(week_count, None);
            let id = record.id;
            if boxes.insert(id, record).is_some() {
                return Err(EngineError::Schema(format!("duplicate box id {id}")));
            }
        }

        Ok(Self {
            week_count,
            boxes,
            source: SourceLayout::default(),
        })
    }

    pub fn week_count(&self) -> usize {
        self.week_count
    }

    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    pub fn contains(&self, id: u32) -> bool {
        self.boxes.contains_key(&id)
    }

    pub fn get(&self, id: u32) -> Option<&BoxRecord> {
        self.boxes.get(&id)
    }

    /// Records in ascending id order
    pub fn iter(&self) -> impl Iterator<Item = &BoxRecord> {
        self.boxes.values()
    }

    pub fn ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.boxes.keys().copied()
    }

    pub fn insert(&mut self, new_box: NewBox) -> Result<&BoxRecord> {
        validate_new_box(&new_box)?;
        if self.boxes.contains_key(&new_box.id) {
            return Err(EngineError::Duplicate(new_box.id));
        }

        let record = BoxRecord {
            id: new_box.id,
            address: new_box.address.trim().to_string(),
            municipality: new_box.municipality.trim().to_string(),
            postal_code: new_box.postal_code.trim().to_string(),
            container_type: new_box.container_type.trim().to_string(),
            weekly_fill: vec![None; self.week_count],
            average_fill: Some(new_box.average_fill),
        };

        Ok(self.boxes.entry(record.id).or_insert(record))
    }

    pub fn remove(&mut self, id: u32) -> Result<BoxRecord> {
        let record = self.boxes.remove(&id).ok_or(EngineError::NotFound(id))?;
        self.source.rows.remove(&id);
        Ok(record)
    }

    /// Applies every field of `update` or none of them.
    pub fn update(&mut self, id: u32, update: BoxUpdate) -> Result<&BoxRecord> {
        let week_count = self.week_count;
        let record = self.boxes.get_mut(&id).ok_or(EngineError::NotFound(id))?;
        validate_update(&update, week_count)?;

        if let Some(address) = update.address {
            record.address = address.trim().to_string();
        }
        if let Some(municipality) = update.municipality {
            record.municipality = municipality.trim().to_string();
        }
        if let Some(postal_code) = update.postal_code {
            record.postal_code = postal_code.trim().to_string();
        }
        if let Some(container_type) = update.container_type {
            record.container_type = container_type.trim().to_string();
        }
        if let Some(average_fill) = update.average_fill {
            record.average_fill = Some(average_fill);
        }
        if let Some(weekly_fill) = update.weekly_fill {
            record.weekly_fill = weekly_fill;
        }

        Ok(record)
    }
}

fn validate_new_box(new_box: &NewBox) -> Result<()> {
    require_text("address", &new_box.address)?;
    require_text("municipality", &new_box.municipality)?;
    require_text("postal_code", &new_box.postal_code)?;
    require_text("container_type", &new_box.container_type)?;
    require_fill("average_fill", new_box.average_fill)
}

fn validate_update(update: &BoxUpdate, week_count: usize) -> Result<()> {
    if update.is_empty() {
        return Err(EngineError::InvalidInput("update contains no fields".to_string()));
    }

    let text_fields = [
        ("address", &update.address),
        ("municipality", &update.municipality),
        ("postal_code", &update.postal_code),
        ("container_type", &update.container_type),
    ];
    for (name, value) in text_fields {
        if let Some(value) = value {
            require_text(name, value)?;
        }
    }

    if let Some(average_fill) = update.average_fill {
        require_fill("average_fill", average_fill)?;
    }

    if let Some(weekly_fill) = &update.weekly_fill {
        if weekly_fill.len() != week_count {
            return Err(EngineError::InvalidInput(format!(
                "weekly_fill has {} entries, catalog has {week_count} weeks",
                weekly_fill.len()
            )));
        }
        for reading in weekly_fill.iter().flatten() {
            require_fill("weekly_fill", *reading)?;
        }
    }

    Ok(())
}

fn require_text(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(EngineError::InvalidInput(format!("{field} must not be empty")));
    }
    Ok(())
}

pub(crate) fn require_fill(field: &str, value: f64) -> Result<()> {
    if !value.is_finite() || !(0.0..=10.0).contains(&value) {
        return Err(EngineError::InvalidInput(format!(
            "{field} must be within 0–10, got {value}"
        )));
    }
    Ok(())
}

/// Load the catalog from a CSV export (`n_boite`, `adresse`, ..., `semaine_1..N`).
pub fn load_catalog_csv(path: &Path) -> Result<BoxCatalog> {
    let reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_path(path)
        .map_err(|e| {
            EngineError::Persistence(format!("Failed to open catalog {}: {e}", path.display()))
        })?;
    read_catalog(reader)
}

pub fn read_catalog<R: std::io::Read>(mut reader: csv::Reader<R>) -> Result<BoxCatalog> {
    let headers = reader
        .headers()
        .map_err(|e| EngineError::Schema(format!("unreadable header row: {e}")))?
        .clone();

    let column = |name: &str| headers.iter().position(|h| h.trim() == name);
    let missing: Vec<&str> = REQUIRED_COLUMNS
        .iter()
        .copied()
        .filter(|name| column(name).is_none())
        .collect();
    if !missing.is_empty() {
        return Err(EngineError::Schema(format!("missing columns: {}", missing.join(", "))));
    }

    // (column position, 1-based week)
    let week_columns: Vec<(usize, usize)> = headers
        .iter()
        .enumerate()
        .filter_map(|(pos, h)| week_of(h.trim()).map(|week| (pos, week)))
        .collect();
    let week_count = week_columns.iter().map(|(_, week)| *week).max().unwrap_or(0);
    if week_count == 0 {
        return Err(EngineError::Schema("no week columns found".to_string()));
    }

    let [id_col, address_col, municipality_col, postal_col, container_col, average_col] =
        REQUIRED_COLUMNS.map(|name| column(name).unwrap_or_default());

    let mut records = Vec::new();
    let mut raw_rows = BTreeMap::new();
    for (line, row) in reader.records().enumerate() {
        let row = row.map_err(|e| EngineError::Schema(format!("row {}: {e}", line + 1)))?;
        let cell = |pos: usize| row.get(pos).unwrap_or("").trim();

        let id = parse_id(cell(id_col)).ok_or_else(|| {
            EngineError::Schema(format!("row {}: invalid n_boite '{}'", line + 1, cell(id_col)))
        })?;
        let average_fill = parse_numeric(cell(average_col)).map_err(|raw| {
            EngineError::Schema(format!("row {}: volume_moyen '{raw}' is not numeric", line + 1))
        })?;

        let mut weekly_fill = vec![None; week_count];
        for &(pos, week) in &week_columns {
            weekly_fill[week - 1] = parse_numeric(cell(pos)).map_err(|raw| {
                EngineError::Schema(format!(
                    "row {}: {WEEK_PREFIX}{week} '{raw}' is not numeric",
                    line + 1
                ))
            })?;
        }

        raw_rows.insert(id, row.iter().map(str::to_string).collect());
        records.push(BoxRecord {
            id,
            address: cell(address_col).to_string(),
            municipality: cell(municipality_col).to_string(),
            postal_code: normalize_postal_code(cell(postal_col)),
            container_type: cell(container_col).to_string(),
            weekly_fill,
            average_fill,
        });
    }

    let mut catalog = BoxCatalog::new(week_count, records)?;
    catalog.source = SourceLayout {
        header: headers.iter().map(str::to_string).collect(),
        rows: raw_rows,
    };
    Ok(catalog)
}

/// Write the catalog back in the column layout it was loaded from. Columns the
/// catalog does not model keep their cells; added boxes leave them empty.
/// The file is staged next to `path` and renamed over it, so a failed write
/// leaves the previous catalog in place.
pub fn write_catalog_csv(path: &Path, catalog: &BoxCatalog) -> Result<()> {
    let staging = staging_path(path);
    let written = write_rows(&staging, catalog)
        .and_then(|()| fs::rename(&staging, path).map_err(EngineError::from));
    if written.is_err() && staging.exists() {
        if let Err(e) = fs::remove_file(&staging) {
            warn!("Could not remove staged catalog {}: {e}", staging.display());
        }
    }
    written
}

fn staging_path(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "catalog.csv".to_string());
    path.with_file_name(format!(".{name}.tmp"))
}

fn write_rows(path: &Path, catalog: &BoxCatalog) -> Result<()> {
    let header = output_header(catalog);
    let columns: Vec<Column> = header.iter().map(|h| Column::classify(h)).collect();

    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(&header)?;

    for record in catalog.iter() {
        let mut row = catalog.source.rows.get(&record.id).cloned().unwrap_or_default();
        row.resize(header.len(), String::new());

        for (cell, column) in row.iter_mut().zip(&columns) {
            let raw = cell.trim();
            let value = match *column {
                Column::Required(0) => {
                    keep_raw(raw, parse_id(raw) == Some(record.id), record.id.to_string())
                }
                Column::Required(1) => text_cell(raw, &record.address),
                Column::Required(2) => text_cell(raw, &record.municipality),
                Column::Required(3) => keep_raw(
                    raw,
                    normalize_postal_code(raw) == record.postal_code,
                    record.postal_code.clone(),
                ),
                Column::Required(4) => text_cell(raw, &record.container_type),
                Column::Required(_) => numeric_cell(raw, record.average_fill),
                Column::Week(week) => numeric_cell(raw, record.reading(week)),
                Column::Other => continue,
            };
            *cell = value;
        }
        writer.write_record(&row)?;
    }

    writer.flush()?;
    Ok(())
}

/// Source header, plus any week column the catalog has but the file lacked.
fn output_header(catalog: &BoxCatalog) -> Vec<String> {
    let mut header = if catalog.source.header.is_empty() {
        REQUIRED_COLUMNS.iter().map(|c| c.to_string()).collect()
    } else {
        catalog.source.header.clone()
    };

    let present: Vec<usize> = header.iter().filter_map(|h| week_of(h.trim())).collect();
    header.extend(
        (1..=catalog.week_count())
            .filter(|week| !present.contains(week))
            .map(|week| format!("{WEEK_PREFIX}{week}")),
    );
    header
}

// Unchanged cells keep their source spelling ("1260.0", "5.0", "NA").
fn keep_raw(raw: &str, unchanged: bool, value: String) -> String {
    if unchanged {
        raw.to_string()
    } else {
        value
    }
}

fn text_cell(raw: &str, value: &str) -> String {
    keep_raw(raw, raw == value, value.to_string())
}

fn numeric_cell(raw: &str, value: Option<f64>) -> String {
    let unchanged = parse_numeric(raw).is_ok_and(|parsed| parsed == value);
    keep_raw(raw, unchanged, value.map(|v| v.to_string()).unwrap_or_default())
}

/// Ids exported from spreadsheets sometimes carry a `.0` suffix
fn parse_id(raw: &str) -> Option<u32> {
    raw.parse::<u32>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|v| v.fract() == 0.0 && *v >= 0.0 && *v <= f64::from(u32::MAX))
            .map(|v| v as u32)
    })
}

/// Blank and NA-like cells are unknown; anything else must parse.
fn parse_numeric(raw: &str) -> std::result::Result<Option<f64>, String> {
    let lowered = raw.to_ascii_lowercase();
    if raw.is_empty() || ["na", "nan", "null", "none"].contains(&lowered.as_str()) {
        return Ok(None);
    }
    raw.replace(',', ".")
        .parse::<f64>()
        .map(|v| v.is_finite().then_some(v))
        .map_err(|_| raw.to_string())
}

fn normalize_postal_code(raw: &str) -> String {
    raw.strip_suffix(".0").unwrap_or(raw).to_string()
}
