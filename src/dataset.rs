//! Registros de entrada del análisis (un envío de Kobo = un `Record`) y
//! utilidades para leer sus valores escalares.

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::{Map, Value};

/// Un envío: nombre de columna → valor escalar (o JSON anidado).
pub type Record = Map<String, Value>;

/// Conjunto de registros analizado en una ejecución.
#[derive(Debug, Clone, Copy)]
pub struct Dataset<'a> {
    pub id: &'a str,
    pub records: &'a [Record],
    pub columns: &'a [String],
}

impl<'a> Dataset<'a> {
    pub fn new(id: &'a str, records: &'a [Record], columns: &'a [String]) -> Self {
        Self { id, records, columns }
    }
}

/// Texto de una celda. `None` si la columna falta o es `null`.
/// Los valores anidados (arrays/objetos) se devuelven como JSON compacto.
pub fn cell_text(record: &Record, column: &str) -> Option<String> {
    match record.get(column)? {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        other => Some(other.to_string()),
    }
}

/// Texto de la celda recortado, sólo si no está vacío.
pub fn non_empty_text(record: &Record, column: &str) -> Option<String> {
    cell_text(record, column)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Clave normalizada para agrupar valores categóricos.
pub fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

pub fn parse_number(value: &str) -> Option<f64> {
    value.trim().parse::<f64>().ok().filter(|n| n.is_finite())
}

/// Número de una celda; los booleanos y valores no numéricos se ignoran.
pub fn cell_number(record: &Record, column: &str) -> Option<f64> {
    match record.get(column)? {
        Value::Number(n) => n.as_f64().filter(|n| n.is_finite()),
        Value::String(s) => parse_number(s),
        _ => None,
    }
}

/// Interpreta fechas en los formatos que devuelve Kobo (RFC 3339, fecha y
/// hora sin zona, o sólo fecha). Las horas sin zona se asumen UTC.
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    let value = value.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(value, fmt) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// Columnas disponibles: las claves del primer envío, en su orden.
pub fn columns_of_first(records: &[Record]) -> Vec<String> {
    records
        .first()
        .map(|r| r.keys().cloned().collect())
        .unwrap_or_default()
}


#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cell_text_handles_scalars_and_nested_values() {
        let record = fixtures::records(vec![json!({
            "a": "x", "b": 3, "c": true, "d": null, "e": [1, 2]
        })])
        .remove(0);
        assert_eq!(cell_text(&record, "a").as_deref(), Some("x"));
        assert_eq!(cell_text(&record, "b").as_deref(), Some("3"));
        assert_eq!(cell_text(&record, "c").as_deref(), Some("true"));
        assert_eq!(cell_text(&record, "d"), None);
        assert_eq!(cell_text(&record, "missing"), None);
        assert_eq!(cell_text(&record, "e").as_deref(), Some("[1,2]"));
    }

    #[test]
    fn blank_strings_are_not_values() {
        let record = fixtures::records(vec![json!({"a": "   "})]).remove(0);
        assert_eq!(non_empty_text(&record, "a"), None);
    }

    #[test]
    fn parses_kobo_dates() {
        assert!(parse_date("2024-03-01T10:15:00.000+03:00").is_some());
        assert!(parse_date("2024-03-01 10:15:00").is_some());
        assert_eq!(
            parse_date("2024-03-01").map(|d| d.to_rfc3339()),
            Some("2024-03-01T00:00:00+00:00".to_string())
        );
        assert!(parse_date("yesterday").is_none());
    }

    #[test]
    fn numbers_reject_non_finite_and_text() {
        assert_eq!(parse_number(" -2.5 "), Some(-2.5));
        assert_eq!(parse_number("abc"), None);
        assert_eq!(parse_number("NaN"), None);
    }
}
