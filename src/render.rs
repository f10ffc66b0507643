//! Renderizador de gráficos: convierte una configuración aceptada y los
//! envíos en series listas para dibujar. Sin estado; no toca la base de datos.

use std::collections::BTreeMap;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::{
    dataset::{cell_number, non_empty_text, normalize, parse_date, Record},
    suggestions::{ChartBindings, ChartType},
};

const LINE_BORDER: &str = "#3b82f6";
const LINE_FILL: &str = "rgba(59, 130, 246, 0.1)";
const SCATTER_FILL: &str = "rgba(59, 130, 246, 0.6)";

/// Máximo de intervalos de un histograma.
pub const MAX_BINS: u32 = 100;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RenderError {
    #[error("el gráfico {chart_type} necesita la columna '{binding}'")]
    MissingBinding {
        chart_type: &'static str,
        binding: &'static str,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SeriesValues {
    Values(Vec<f64>),
    Points(Vec<Point>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Colors {
    One(String),
    Many(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Series {
    pub label: String,
    pub data: SeriesValues,
    pub background_color: Colors,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub border_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<bool>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderMetadata {
    pub chart_type: ChartType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    pub total_data_points: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub labels: Vec<String>,
    pub datasets: Vec<Series>,
    pub raw_data: Vec<Value>,
    pub metadata: RenderMetadata,
}

/// Paleta HSL determinista: `count` tonos equiespaciados desplazados por
/// `hue_shift` (fracción de vuelta).
pub fn generate_colors(count: usize, hue_shift: f64) -> Vec<String> {
    (0..count)
        .map(|i| {
            let hue = (i as f64 * 360.0 / count as f64 + hue_shift * 360.0) % 360.0;
            format!("hsl({}, 70%, 60%)", hue.round())
        })
        .collect()
}

fn require<'b>(value: Option<&'b str>, chart_type: ChartType, binding: &'static str) -> Result<&'b str, RenderError> {
    value.ok_or(RenderError::MissingBinding {
        chart_type: chart_type.as_str(),
        binding,
    })
}

pub fn render(chart_type: ChartType, bindings: &ChartBindings, records: &[Record]) -> Result<ChartData, RenderError> {
    let single = bindings.column.as_deref().or(bindings.x_column.as_deref());

    let (labels, datasets, raw_data) = match chart_type {
        ChartType::Pie | ChartType::Doughnut => {
            let column = require(single, chart_type, "column")?;
            with_percentages(grouped_counts(column, records, column.to_string()))
        }
        ChartType::Bar => match bindings.y_column.as_deref() {
            None => {
                let column = require(single, chart_type, "column")?;
                match bindings.bins.filter(|b| *b > 0) {
                    Some(bins) if records.iter().any(|r| cell_number(r, column).is_some()) => {
                        histogram(column, bins.min(MAX_BINS) as usize, records)
                    }
                    _ => grouped_counts(column, records, format!("Count of {column}")),
                }
            }
            Some(y) => {
                let x = require(bindings.x_column.as_deref().or(bindings.column.as_deref()), chart_type, "xColumn")?;
                // Agrupar por la propia columna x equivale a no agrupar.
                let group = bindings.group_by.as_deref().filter(|g| *g != x);
                grouped_sums(x, y, group, records)
            }
        },
        ChartType::Line | ChartType::Area => {
            let date = require(
                bindings.date_column.as_deref().or(bindings.x_column.as_deref()),
                chart_type,
                "dateColumn",
            )?;
            let value = require(
                bindings.value_column.as_deref().or(bindings.y_column.as_deref()),
                chart_type,
                "valueColumn",
            )?;
            daily_average(date, value, chart_type == ChartType::Area, records)
        }
        ChartType::Scatter => {
            let x = require(bindings.x_column.as_deref(), chart_type, "xColumn")?;
            let y = require(bindings.y_column.as_deref(), chart_type, "yColumn")?;
            scatter(x, y, records)
        }
    };

    Ok(ChartData {
        labels,
        datasets,
        raw_data,
        metadata: RenderMetadata {
            chart_type,
            data_source: bindings.data_source.clone(),
            total_data_points: records.len(),
        },
    })
}

type Rendered = (Vec<String>, Vec<Series>, Vec<Value>);

/// Conteo por valor recortado. Se agrupa sin distinguir mayúsculas y se
/// conserva como etiqueta la primera grafía vista.
fn grouped_counts(column: &str, records: &[Record], label: String) -> Rendered {
    let mut counts: IndexMap<String, (String, usize)> = IndexMap::new();
    for value in records.iter().filter_map(|r| non_empty_text(r, column)) {
        counts.entry(normalize(&value)).or_insert((value, 0)).1 += 1;
    }

    let labels: Vec<String> = counts.values().map(|(l, _)| l.clone()).collect();
    let data: Vec<f64> = counts.values().map(|(_, c)| *c as f64).collect();
    let raw = counts
        .values()
        .map(|(label, count)| json!({ "label": label, "count": count }))
        .collect();

    let series = Series {
        label,
        data: SeriesValues::Values(data),
        background_color: Colors::Many(generate_colors(labels.len(), 0.0)),
        border_color: None,
        fill: None,
    };
    (labels, vec![series], raw)
}

fn with_percentages(mut rendered: Rendered) -> Rendered {
    let total: u64 = rendered
        .2
        .iter()
        .filter_map(|r| r.get("count").and_then(Value::as_u64))
        .sum();
    for row in &mut rendered.2 {
        let count = row.get("count").and_then(Value::as_u64).unwrap_or(0);
        let pct = if total == 0 { 0.0 } else { count as f64 * 100.0 / total as f64 };
        row["percentage"] = json!(format!("{pct:.1}"));
    }
    rendered
}

/// Histograma de ancho fijo sobre [min, max].
fn histogram(column: &str, bins: usize, records: &[Record]) -> Rendered {
    let numbers: Vec<f64> = records.iter().filter_map(|r| cell_number(r, column)).collect();
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    // Columna constante: un único intervalo.
    let bins = if max > min { bins } else { 1 };
    let width = if max > min { (max - min) / bins as f64 } else { 0.0 };

    let mut counts = vec![0usize; bins];
    for n in &numbers {
        let idx = if width > 0.0 { ((n - min) / width).floor() as usize } else { 0 };
        counts[idx.min(bins - 1)] += 1;
    }

    let labels: Vec<String> = (0..bins)
        .map(|i| {
            let lo = min + width * i as f64;
            let hi = if i + 1 == bins { max } else { lo + width };
            format!("{} - {}", round2(lo), round2(hi))
        })
        .collect();
    let raw = labels
        .iter()
        .zip(&counts)
        .map(|(range, count)| json!({ "range": range, "count": count }))
        .collect();

    let series = Series {
        label: column.to_string(),
        data: SeriesValues::Values(counts.iter().map(|c| *c as f64).collect()),
        background_color: Colors::Many(generate_colors(bins, 0.0)),
        border_color: None,
        fill: None,
    };
    (labels, vec![series], raw)
}

fn round2(n: f64) -> f64 {
    (n * 100.0).round() / 100.0
}

/// Suma de y por cada valor de x dentro de cada grupo ("all" sin grupo).
fn grouped_sums(x: &str, y: &str, group_by: Option<&str>, records: &[Record]) -> Rendered {
    let mut labels: IndexMap<String, ()> = IndexMap::new();
    let mut groups: IndexMap<String, IndexMap<String, f64>> = IndexMap::new();
    let mut raw = Vec::new();

    for record in records {
        let Some(x_value) = non_empty_text(record, x) else {
            continue;
        };
        labels.entry(x_value.clone()).or_insert(());
        let Some(y_value) = cell_number(record, y) else {
            continue;
        };
        let group = group_by
            .and_then(|g| non_empty_text(record, g))
            .unwrap_or_else(|| "all".to_string());

        *groups
            .entry(group.clone())
            .or_default()
            .entry(x_value.clone())
            .or_insert(0.0) += y_value;
        raw.push(json!({ "x": x_value, "y": y_value, "group": group }));
    }

    let labels: Vec<String> = labels.into_keys().collect();
    let group_count = groups.len().max(1);
    let datasets = groups
        .iter()
        .enumerate()
        .map(|(i, (group, sums))| Series {
            label: group.clone(),
            data: SeriesValues::Values(labels.iter().map(|l| sums.get(l).copied().unwrap_or(0.0)).collect()),
            background_color: Colors::One(
                generate_colors(1, i as f64 / group_count as f64)
                    .pop()
                    .unwrap_or_default(),
            ),
            border_color: None,
            fill: None,
        })
        .collect();

    (labels, datasets, raw)
}

/// Media diaria de `value` por fecha de calendario, en orden ascendente.
fn daily_average(date: &str, value: &str, fill: bool, records: &[Record]) -> Rendered {
    let mut days: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in records {
        let day = non_empty_text(record, date).and_then(|d| parse_date(&d));
        if let (Some(day), Some(n)) = (day, cell_number(record, value)) {
            let entry = days.entry(day.format("%Y-%m-%d").to_string()).or_insert((0.0, 0));
            entry.0 += n;
            entry.1 += 1;
        }
    }

    let labels: Vec<String> = days.keys().cloned().collect();
    let averages: Vec<f64> = days.values().map(|(sum, count)| sum / *count as f64).collect();
    let raw = days
        .iter()
        .zip(&averages)
        .map(|((day, (_, count)), avg)| json!({ "date": day, "value": avg, "count": count }))
        .collect();

    let series = Series {
        label: value.to_string(),
        data: SeriesValues::Values(averages),
        background_color: Colors::One(LINE_FILL.to_string()),
        border_color: Some(LINE_BORDER.to_string()),
        fill: fill.then_some(true),
    };
    (labels, vec![series], raw)
}

fn scatter(x: &str, y: &str, records: &[Record]) -> Rendered {
    let points: Vec<Point> = records
        .iter()
        .filter_map(|r| Some(Point { x: cell_number(r, x)?, y: cell_number(r, y)? }))
        .collect();
    let raw = points.iter().map(|p| json!({ "x": p.x, "y": p.y })).collect();

    let series = Series {
        label: format!("{y} vs {x}"),
        data: SeriesValues::Points(points),
        background_color: Colors::One(SCATTER_FILL.to_string()),
        border_color: None,
        fill: None,
    };
    (Vec::new(), vec![series], raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures;

    fn bindings(value: Value) -> ChartBindings {
        serde_json::from_value(value).expect("configuración válida")
    }

    fn values(series: &Series) -> &[f64] {
        match &series.data {
            SeriesValues::Values(v) => v,
            SeriesValues::Points(_) => panic!("se esperaban valores"),
        }
    }

    #[test]
    fn colors_are_deterministic_hsl() {
        assert_eq!(
            generate_colors(4, 0.0),
            vec!["hsl(0, 70%, 60%)", "hsl(90, 70%, 60%)", "hsl(180, 70%, 60%)", "hsl(270, 70%, 60%)"]
        );
        assert_eq!(generate_colors(1, 0.5), vec!["hsl(180, 70%, 60%)"]);
        assert!(generate_colors(0, 0.0).is_empty());
    }

    #[test]
    fn pie_groups_case_insensitively_with_percentages() {
        let records = fixtures::records(vec![
            json!({"crop": "Maize"}),
            json!({"crop": "maize "}),
            json!({"crop": "teff"}),
            json!({"crop": ""}),
        ]);
        let data = render(ChartType::Pie, &bindings(json!({"column": "crop"})), &records).expect("render");
        assert_eq!(data.labels, vec!["Maize", "teff"]);
        assert_eq!(values(&data.datasets[0]), &[2.0, 1.0]);
        assert_eq!(data.raw_data[0]["percentage"], "66.7");
        assert_eq!(data.raw_data[1]["percentage"], "33.3");
        assert_eq!(data.metadata.total_data_points, 4);
    }

    #[test]
    fn bar_with_bins_builds_histogram() {
        let records = fixtures::records((0..=10).map(|i| json!({"plot_area": i})).collect());
        let data = render(
            ChartType::Bar,
            &bindings(json!({"column": "plot_area", "bins": 5})),
            &records,
        )
        .expect("render");
        assert_eq!(data.labels.len(), 5);
        assert_eq!(data.labels[0], "0 - 2");
        assert_eq!(values(&data.datasets[0]), &[2.0, 2.0, 2.0, 2.0, 3.0]);
    }

    #[test]
    fn constant_column_histogram_has_one_bin() {
        let records = fixtures::records((0..4).map(|_| json!({"plot_area": 3})).collect());
        let data = render(ChartType::Bar, &bindings(json!({"column": "plot_area", "bins": 8})), &records)
            .expect("render");
        assert_eq!(data.labels, vec!["3 - 3"]);
        assert_eq!(values(&data.datasets[0]), &[4.0]);
    }

    #[test]
    fn oversized_bin_count_is_capped() {
        let records = fixtures::records((0..=1000).map(|i| json!({"plot_area": i})).collect());
        let data = render(
            ChartType::Bar,
            &bindings(json!({"column": "plot_area", "bins": 4_000_000_000u32})),
            &records,
        )
        .expect("render");
        assert_eq!(data.labels.len(), MAX_BINS as usize);
        assert_eq!(values(&data.datasets[0]).iter().sum::<f64>(), 1001.0);
    }

    #[test]
    fn bins_on_text_column_fall_back_to_counts() {
        let records = fixtures::records(vec![json!({"zone": "a"}), json!({"zone": "b"})]);
        let data = render(ChartType::Bar, &bindings(json!({"column": "zone", "bins": 8})), &records)
            .expect("render");
        assert_eq!(data.labels, vec!["a", "b"]);
        assert_eq!(data.datasets[0].label, "Count of zone");
    }

    #[test]
    fn grouped_bar_sums_and_skips_bad_values() {
        let records = fixtures::records(vec![
            json!({"region": "north", "area": "2.5"}),
            json!({"region": "north", "area": 1.5}),
            json!({"region": "south", "area": "n/a"}),
            json!({"region": "south", "area": 4}),
            json!({"area": 9}),
        ]);
        let data = render(
            ChartType::Bar,
            &bindings(json!({"xColumn": "region", "yColumn": "area", "groupBy": "region"})),
            &records,
        )
        .expect("render");
        assert_eq!(data.labels, vec!["north", "south"]);
        assert_eq!(data.datasets.len(), 1);
        assert_eq!(data.datasets[0].label, "all");
        assert_eq!(values(&data.datasets[0]), &[4.0, 4.0]);
        assert_eq!(data.raw_data.len(), 3);
    }

    #[test]
    fn grouped_bar_with_distinct_group_yields_one_series_per_group() {
        let records = fixtures::records(vec![
            json!({"region": "north", "area": 1, "sex": "f"}),
            json!({"region": "south", "area": 2, "sex": "m"}),
            json!({"region": "south", "area": 3, "sex": "f"}),
        ]);
        let data = render(
            ChartType::Bar,
            &bindings(json!({"xColumn": "region", "yColumn": "area", "groupBy": "sex"})),
            &records,
        )
        .expect("render");
        assert_eq!(data.datasets.len(), 2);
        assert_eq!(values(&data.datasets[0]), &[1.0, 3.0]);
        assert_eq!(values(&data.datasets[1]), &[0.0, 2.0]);
    }

    #[test]
    fn line_averages_per_day_in_order() {
        let records = fixtures::records(vec![
            json!({"visit_date": "2024-03-02T09:00:00Z", "income": 10}),
            json!({"visit_date": "2024-03-01", "income": 4}),
            json!({"visit_date": "2024-03-02T17:30:00Z", "income": 20}),
            json!({"visit_date": "bad", "income": 1}),
        ]);
        let cfg = bindings(json!({"dateColumn": "visit_date", "valueColumn": "income"}));
        let data = render(ChartType::Line, &cfg, &records).expect("render");
        assert_eq!(data.labels, vec!["2024-03-01", "2024-03-02"]);
        assert_eq!(values(&data.datasets[0]), &[4.0, 15.0]);
        assert_eq!(data.datasets[0].fill, None);

        let area = render(ChartType::Area, &cfg, &records).expect("render");
        assert_eq!(area.datasets[0].fill, Some(true));
    }

    #[test]
    fn scatter_keeps_only_complete_points() {
        let records = fixtures::records(vec![
            json!({"a": 1, "b": "2"}),
            json!({"a": "x", "b": 3}),
            json!({"a": 5, "b": 5}),
        ]);
        let data = render(ChartType::Scatter, &bindings(json!({"xColumn": "a", "yColumn": "b"})), &records)
            .expect("render");
        assert_eq!(
            data.datasets[0].data,
            SeriesValues::Points(vec![Point { x: 1.0, y: 2.0 }, Point { x: 5.0, y: 5.0 }])
        );
        assert_eq!(data.datasets[0].label, "b vs a");
    }

    #[test]
    fn missing_bindings_are_errors() {
        let err = render(ChartType::Scatter, &bindings(json!({"xColumn": "a"})), &[]).unwrap_err();
        assert_eq!(
            err,
            RenderError::MissingBinding { chart_type: "scatter", binding: "yColumn" }
        );
        assert!(render(ChartType::Pie, &ChartBindings::default(), &[]).is_err());
    }
}
