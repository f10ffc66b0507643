//! Clasificador de columnas: dominio semántico, relevancia, tipo de valor y
//! estadísticas resumidas de cada columna de un conjunto de envíos.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    dataset::{non_empty_text, normalize, parse_date, parse_number, Record},
    rules::{AnalysisRules, ColumnDomain, PriorityTier},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ValueType {
    Numeric,
    Categorical,
    Date,
    Boolean,
    Geographic,
    Image,
    Text,
    Empty,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AreaCategory {
    Small,
    Medium,
    Large,
    VeryLarge,
}

impl AreaCategory {
    pub fn from_mean(mean: f64) -> Self {
        if mean < 1.0 {
            Self::Small
        } else if mean < 5.0 {
            Self::Medium
        } else if mean < 20.0 {
            Self::Large
        } else {
            Self::VeryLarge
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueCount {
    pub value: String,
    pub count: usize,
}

/// Estadísticas según el tipo de valor. Los tipos sin estadísticas se
/// serializan como `{}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SummaryStatistics {
    #[serde(rename_all = "camelCase")]
    Numeric {
        min: f64,
        max: f64,
        mean: f64,
        median: f64,
        sum: f64,
        #[serde(skip_serializing_if = "Option::is_none")]
        area_category: Option<AreaCategory>,
    },
    #[serde(rename_all = "camelCase")]
    Categorical {
        distinct_values: usize,
        most_common: Vec<ValueCount>,
    },
    Date {
        earliest: String,
        latest: String,
    },
    None {},
}

/// Perfil derivado de una columna. Se recalcula en cada análisis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColumnProfile {
    pub name: String,
    pub domain: ColumnDomain,
    pub priority: PriorityTier,
    pub value_type: ValueType,
    pub total_count: usize,
    pub non_empty_count: usize,
    pub completeness: f64,
    pub relevance_score: f64,
    pub unique_value_count: usize,
    pub sample_values: Vec<String>,
    pub statistics: SummaryStatistics,
}

impl ColumnProfile {
    pub fn is_system(&self) -> bool {
        self.priority == PriorityTier::System
    }

    pub fn has_values(&self) -> bool {
        self.non_empty_count > 0 && self.value_type != ValueType::Empty
    }
}

/// Clasificador sin estado: sólo consulta las tablas de `AnalysisRules`.
#[derive(Debug, Clone, Copy)]
pub struct ColumnClassifier<'r> {
    rules: &'r AnalysisRules,
}

impl<'r> ColumnClassifier<'r> {
    pub fn new(rules: &'r AnalysisRules) -> Self {
        Self { rules }
    }

    /// Relevancia 0.5 base, ajustada por nivel de prioridad y por palabras
    /// clave fuertes; nunca supera 1.0.
    pub fn relevance(&self, column: &str, tier: PriorityTier) -> f64 {
        let w = &self.rules.weights;
        let mut score = w.base_relevance;
        score += match tier {
            PriorityTier::High => w.high_tier_boost,
            PriorityTier::Medium => w.medium_tier_boost,
            PriorityTier::Low | PriorityTier::System => 0.0,
        };
        if self.rules.strong_indicator.is_match(column) {
            score += w.indicator_boost;
        }
        score.clamp(0.0, 1.0)
    }

    /// Inferencia del tipo de valor; la primera regla que se cumple gana.
    /// `values` son los valores no vacíos de la columna.
    pub fn infer_value_type(&self, column: &str, domain: ColumnDomain, values: &[String]) -> ValueType {
        if values.is_empty() {
            return ValueType::Empty;
        }
        let p = &self.rules.values;
        let gates = &self.rules.gates;

        if p.image_name.is_match(column) || values.iter().any(|v| p.image_value.is_match(v)) {
            return ValueType::Image;
        }
        if p.date_name.is_match(column) || values.iter().any(|v| p.date_value.is_match(v)) {
            return ValueType::Date;
        }
        if p.geographic_name.is_match(column) {
            return ValueType::Geographic;
        }

        let total = values.len() as f64;
        let share = |re: &regex::Regex| values.iter().filter(|v| re.is_match(v)).count() as f64 / total;

        if share(&p.boolean_value) > gates.majority_ratio {
            return ValueType::Boolean;
        }
        if domain == ColumnDomain::LandArea || share(&p.numeric_value) > gates.majority_ratio {
            return ValueType::Numeric;
        }

        let unique = unique_count(values);
        if domain == ColumnDomain::Geographic
            || unique <= gates.max_categorical_unique
            || (unique as f64 / total) < gates.categorical_unique_ratio
        {
            return ValueType::Categorical;
        }
        ValueType::Text
    }

    /// Perfil completo de una columna sobre todos los registros.
    pub fn profile(&self, column: &str, records: &[Record]) -> ColumnProfile {
        let (domain, priority) = self.rules.classify_name(column);
        let values: Vec<String> = records
            .iter()
            .filter_map(|r| non_empty_text(r, column))
            .collect();

        let total_count = records.len();
        let non_empty_count = values.len();
        let completeness = if total_count == 0 {
            0.0
        } else {
            non_empty_count as f64 / total_count as f64
        };

        let value_type = self.infer_value_type(column, domain, &values);
        let statistics = summarize(value_type, domain, &values, self.rules.gates.top_values);

        ColumnProfile {
            name: column.to_string(),
            domain,
            priority,
            value_type,
            total_count,
            non_empty_count,
            completeness,
            relevance_score: self.relevance(column, priority),
            unique_value_count: unique_count(&values),
            sample_values: values.iter().take(self.rules.gates.sample_size).cloned().collect(),
            statistics,
        }
    }

    /// Perfiles de todas las columnas, en el orden recibido.
    pub fn profile_all(&self, columns: &[String], records: &[Record]) -> IndexMap<String, ColumnProfile> {
        columns
            .iter()
            .map(|c| (c.clone(), self.profile(c, records)))
            .collect()
    }
}

fn unique_count(values: &[String]) -> usize {
    values.iter().map(|v| normalize(v)).collect::<HashSet<_>>().len()
}

/// Estadísticas de los valores no vacíos. Los valores que no se pueden
/// interpretar se descartan.
pub fn summarize(
    value_type: ValueType,
    domain: ColumnDomain,
    values: &[String],
    top_values: usize,
) -> SummaryStatistics {
    match value_type {
        ValueType::Numeric => {
            let numbers: Vec<f64> = values.iter().filter_map(|v| parse_number(v)).collect();
            numeric_summary(&numbers, domain)
        }
        ValueType::Categorical => categorical_summary(values, top_values),
        ValueType::Date => {
            let mut dates: Vec<_> = values.iter().filter_map(|v| parse_date(v)).collect();
            dates.sort();
            match (dates.first(), dates.last()) {
                (Some(earliest), Some(latest)) => SummaryStatistics::Date {
                    earliest: earliest.to_rfc3339(),
                    latest: latest.to_rfc3339(),
                },
                _ => SummaryStatistics::None {},
            }
        }
        _ => SummaryStatistics::None {},
    }
}

fn numeric_summary(numbers: &[f64], domain: ColumnDomain) -> SummaryStatistics {
    if numbers.is_empty() {
        return SummaryStatistics::None {};
    }
    let sum: f64 = numbers.iter().sum();
    let mean = sum / numbers.len() as f64;
    let min = numbers.iter().copied().fold(f64::INFINITY, f64::min);
    let max = numbers.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    SummaryStatistics::Numeric {
        min,
        max,
        mean,
        median: median(numbers),
        sum,
        area_category: (domain == ColumnDomain::LandArea).then(|| AreaCategory::from_mean(mean)),
    }
}

pub fn median(numbers: &[f64]) -> f64 {
    let mut sorted = numbers.to_vec();
    sorted.sort_by(f64::total_cmp);
    let mid = sorted.len() / 2;
    if sorted.is_empty() {
        0.0
    } else if sorted.len() % 2 == 1 {
        sorted[mid]
    } else {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    }
}

fn categorical_summary(values: &[String], top_values: usize) -> SummaryStatistics {
    let mut counts: IndexMap<String, usize> = IndexMap::new();
    for value in values {
        *counts.entry(normalize(value)).or_insert(0) += 1;
    }
    let distinct_values = counts.len();
    let mut ranked: Vec<ValueCount> = counts
        .into_iter()
        .map(|(value, count)| ValueCount { value, count })
        .collect();
    // Orden estable: a igual frecuencia se mantiene el orden de aparición.
    ranked.sort_by(|a, b| b.count.cmp(&a.count));
    ranked.truncate(top_values);

    SummaryStatistics::Categorical {
        distinct_values,
        most_common: ranked,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::fixtures;
    use serde_json::json;

    fn rules() -> AnalysisRules {
        AnalysisRules::standard().expect("patrones válidos")
    }

    fn strings(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn relevance_rewards_tier_and_indicators() {
        let rules = rules();
        let c = ColumnClassifier::new(&rules);
        assert_eq!(c.relevance("notes", PriorityTier::Low), 0.5);
        assert!((c.relevance("soil_type", PriorityTier::Medium) - 0.7).abs() < 1e-9);
        assert!((c.relevance("district", PriorityTier::High) - 0.8).abs() < 1e-9);
        assert_eq!(c.relevance("region", PriorityTier::High), 1.0);
    }

    #[test]
    fn value_type_precedence() {
        let rules = rules();
        let c = ColumnClassifier::new(&rules);
        let g = ColumnDomain::General;

        assert_eq!(c.infer_value_type("farm_photo", g, &strings(&["a.jpg"])), ValueType::Image);
        assert_eq!(c.infer_value_type("x", g, &strings(&["pic.PNG", "1"])), ValueType::Image);
        assert_eq!(c.infer_value_type("visit_date", g, &strings(&["soon"])), ValueType::Date);
        assert_eq!(c.infer_value_type("x", g, &strings(&["2024-01-05"])), ValueType::Date);
        assert_eq!(c.infer_value_type("gps", g, &strings(&["9.1 38.7"])), ValueType::Geographic);
        assert_eq!(c.infer_value_type("x", g, &strings(&["yes", "No", "1", "0"])), ValueType::Boolean);
        assert_eq!(c.infer_value_type("x", g, &strings(&["1.5", "-2", "7", "x"])), ValueType::Numeric);
        assert_eq!(c.infer_value_type("x", g, &strings(&["a", "b", "a"])), ValueType::Categorical);
        assert_eq!(c.infer_value_type("x", g, &[]), ValueType::Empty);
    }

    #[test]
    fn domain_overrides_force_numeric_and_categorical() {
        let rules = rules();
        let c = ColumnClassifier::new(&rules);
        let words: Vec<String> = (0..40).map(|i| format!("plot {i}")).collect();
        assert_eq!(c.infer_value_type("plot_area", ColumnDomain::LandArea, &words), ValueType::Numeric);
        assert_eq!(c.infer_value_type("kebele", ColumnDomain::Geographic, &words), ValueType::Categorical);
        assert_eq!(c.infer_value_type("comment", ColumnDomain::General, &words), ValueType::Text);
    }

    #[test]
    fn completeness_is_zero_without_records() {
        let rules = rules();
        let profile = ColumnClassifier::new(&rules).profile("region", &[]);
        assert_eq!(profile.completeness, 0.0);
        assert_eq!(profile.non_empty_count, 0);
        assert_eq!(profile.value_type, ValueType::Empty);
        assert!(profile.sample_values.is_empty());
        assert_eq!(profile.statistics, SummaryStatistics::None {});
    }

    #[test]
    fn completeness_counts_missing_and_blank_cells() {
        let rules = rules();
        let records = fixtures::records(vec![
            json!({"crop": "maize"}),
            json!({"crop": ""}),
            json!({"crop": null}),
            json!({}),
        ]);
        let profile = ColumnClassifier::new(&rules).profile("crop", &records);
        assert_eq!(profile.total_count, 4);
        assert_eq!(profile.non_empty_count, 1);
        assert!((profile.completeness - 0.25).abs() < 1e-9);
    }

    #[test]
    fn constant_numeric_column_statistics() {
        let rules = rules();
        let records = fixtures::records((0..6).map(|_| json!({"plot_count": 5})).collect());
        let profile = ColumnClassifier::new(&rules).profile("plot_count", &records);
        assert_eq!(profile.value_type, ValueType::Numeric);
        assert_eq!(
            profile.statistics,
            SummaryStatistics::Numeric {
                min: 5.0,
                max: 5.0,
                mean: 5.0,
                median: 5.0,
                sum: 30.0,
                area_category: None,
            }
        );
    }

    #[test]
    fn land_area_gets_size_category_and_drops_bad_values() {
        let rules = rules();
        let records = fixtures::records(vec![
            json!({"farm_size_ha": "2"}),
            json!({"farm_size_ha": "4"}),
            json!({"farm_size_ha": "unknown"}),
        ]);
        let profile = ColumnClassifier::new(&rules).profile("farm_size_ha", &records);
        // "farm" coincide antes con uso de suelo: no hay categoría de superficie.
        assert_eq!(profile.domain, ColumnDomain::LandUse);

        let records = fixtures::records(vec![
            json!({"plot_area": "2"}),
            json!({"plot_area": "4"}),
            json!({"plot_area": "unknown"}),
        ]);
        let profile = ColumnClassifier::new(&rules).profile("plot_area", &records);
        assert_eq!(profile.value_type, ValueType::Numeric);
        match profile.statistics {
            SummaryStatistics::Numeric { mean, area_category, .. } => {
                assert!((mean - 3.0).abs() < 1e-9);
                assert_eq!(area_category, Some(AreaCategory::Medium));
            }
            other => panic!("estadísticas inesperadas: {other:?}"),
        }
    }

    #[test]
    fn categorical_statistics_keep_top_five() {
        let rules = rules();
        let mut values = Vec::new();
        for (name, n) in [("A", 6), ("b", 5), ("c", 4), ("d", 3), ("e", 2), ("f", 1)] {
            for _ in 0..n {
                values.push(json!({ "crop_type": name }));
            }
        }
        values.push(json!({ "crop_type": " a " }));
        let records = fixtures::records(values);
        let profile = ColumnClassifier::new(&rules).profile("crop_type", &records);
        assert_eq!(profile.value_type, ValueType::Categorical);
        assert_eq!(profile.unique_value_count, 6);
        match profile.statistics {
            SummaryStatistics::Categorical { distinct_values, most_common } => {
                assert_eq!(distinct_values, 6);
                assert_eq!(most_common.len(), 5);
                assert_eq!(most_common[0], ValueCount { value: "a".into(), count: 7 });
                assert_eq!(most_common[4].value, "e");
            }
            other => panic!("estadísticas inesperadas: {other:?}"),
        }
    }

    #[test]
    fn date_statistics_report_range() {
        let rules = rules();
        let records = fixtures::records(vec![
            json!({"visit_date": "2024-05-02"}),
            json!({"visit_date": "not a date"}),
            json!({"visit_date": "2024-01-15"}),
        ]);
        let profile = ColumnClassifier::new(&rules).profile("visit_date", &records);
        assert_eq!(profile.value_type, ValueType::Date);
        assert_eq!(
            profile.statistics,
            SummaryStatistics::Date {
                earliest: "2024-01-15T00:00:00+00:00".into(),
                latest: "2024-05-02T00:00:00+00:00".into(),
            }
        );
    }

    #[test]
    fn median_handles_even_and_odd() {
        assert_eq!(median(&[3.0, 1.0, 2.0]), 2.0);
        assert_eq!(median(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }
}
