//! Exportación de los envíos de un proyecto a CSV, Excel (.xlsx) o JSON.

use std::str::FromStr;

use anyhow::{anyhow, Result};
use rust_xlsxwriter::{Format, Workbook};
use serde_json::{Map, Value};

use crate::dataset::Record;

const ROW_NUMBER_HEADER: &str = "No.";
const UTF8_BOM: &str = "\u{FEFF}";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Excel,
    Json,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Excel => "xlsx",
            ExportFormat::Json => "json",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "excel" | "xlsx" => Ok(ExportFormat::Excel),
            "json" => Ok(ExportFormat::Json),
            _ => Err(anyhow!("Unsupported format. Use csv, excel, or json.")),
        }
    }
}

/// Fichero generado, listo para servir como descarga.
#[derive(Debug, Clone)]
pub struct ExportFile {
    pub filename: String,
    pub content_type: String,
    pub body: Vec<u8>,
}

/// Columnas internas de Kobo o de la propia aplicación.
pub fn is_system_column(column: &str) -> bool {
    column.starts_with('_')
        || column.starts_with("meta/")
        || ["_url", "_auth", "_original", "_processed"]
            .iter()
            .any(|marker| column.contains(marker))
}

/// Columnas a exportar. La fuente es `_original_columns` del primer envío si
/// existe, si no las columnas disponibles del proyecto.
pub fn export_columns(
    records: &[Record],
    available_columns: &[String],
    selected_columns: &[String],
    include_all: bool,
) -> Vec<String> {
    let original = records
        .first()
        .and_then(|r| r.get("_original_columns"))
        .and_then(Value::as_array)
        .map(|cols| cols.iter().filter_map(Value::as_str).map(str::to_string).collect::<Vec<_>>());
    let source = original.unwrap_or_else(|| available_columns.to_vec());

    if include_all {
        return source;
    }
    if !selected_columns.is_empty() {
        return selected_columns.to_vec();
    }
    source.into_iter().filter(|c| !is_system_column(c)).collect()
}

fn cell<'a>(record: &'a Record, column: &str) -> Option<&'a Value> {
    match record.get(column) {
        None | Some(Value::Null) => None,
        Some(Value::String(s)) if s.is_empty() => None,
        Some(value) => Some(value),
    }
}

fn cell_string(record: &Record, column: &str) -> String {
    match cell(record, column) {
        None => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

pub fn to_csv(records: &[Record], columns: &[String]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(UTF8_BOM.as_bytes().to_vec());
    writer.write_record(std::iter::once(ROW_NUMBER_HEADER).chain(columns.iter().map(String::as_str)))?;
    for (index, record) in records.iter().enumerate() {
        let row = std::iter::once((index + 1).to_string())
            .chain(columns.iter().map(|c| cell_string(record, c)));
        writer.write_record(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("Error generando el CSV: {}", e.error()))
}

pub fn to_xlsx(records: &[Record], columns: &[String]) -> Result<Vec<u8>> {
    let mut workbook = Workbook::new();
    let bold = Format::new().set_bold();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Data")?;

    sheet.write_string_with_format(0, 0, ROW_NUMBER_HEADER, &bold)?;
    for (c, column) in columns.iter().enumerate() {
        sheet.write_string_with_format(0, (c + 1) as u16, column.as_str(), &bold)?;
    }

    for (index, record) in records.iter().enumerate() {
        let row = (index + 1) as u32;
        sheet.write_number(row, 0, (index + 1) as f64)?;
        for (c, column) in columns.iter().enumerate() {
            let col = (c + 1) as u16;
            match cell(record, column) {
                None => {}
                Some(Value::Number(n)) => {
                    sheet.write_number(row, col, n.as_f64().unwrap_or_default())?;
                }
                Some(_) => {
                    sheet.write_string(row, col, cell_string(record, column))?;
                }
            }
        }
    }

    Ok(workbook.save_to_buffer()?)
}

/// Array JSON con la clave `No` seguida de las columnas exportadas.
pub fn to_json(records: &[Record], columns: &[String]) -> Result<Vec<u8>> {
    let rows = records
        .iter()
        .enumerate()
        .map(|(index, record)| {
            let mut row = Map::new();
            row.insert("No".to_string(), Value::from(index + 1));
            for column in columns {
                let value = cell(record, column).cloned().unwrap_or_else(|| Value::String(String::new()));
                row.insert(column.clone(), value);
            }
            Value::Object(row)
        })
        .collect::<Vec<_>>();
    Ok(serde_json::to_vec_pretty(&rows)?)
}

pub fn export(format: ExportFormat, project_name: &str, records: &[Record], columns: &[String]) -> Result<ExportFile> {
    let body = match format {
        ExportFormat::Csv => to_csv(records, columns)?,
        ExportFormat::Excel => to_xlsx(records, columns)?,
        ExportFormat::Json => to_json(records, columns)?,
    };
    let filename = format!("{}_data.{}", project_name.replace(['"', '/', '\\'], "_"), format.extension());
    let content_type = mime_guess::from_path(&filename)
        .first_or_octet_stream()
        .essence_str()
        .to_string();
    Ok(ExportFile {
        filename,
        content_type,
        body,
    })
}
