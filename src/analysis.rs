//! Orquestación del análisis: perfiles → sugerencias → calidad.
//!
//! Pipeline síncrono y sin estado compartido; los llamadores lo ejecutan
//! dentro de `spawn_blocking` cuando el volumen lo justifica.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    classifier::{ColumnClassifier, ColumnProfile},
    dataset::Dataset,
    quality::{DataQualityReport, DomainInsights},
    rules::AnalysisRules,
    suggestions::{ChartSuggestion, SuggestionEngine},
};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AnalysisError {
    #[error("el conjunto de datos '{0}' no tiene columnas")]
    NoColumns(String),
    #[error("el conjunto de datos '{0}' contiene un nombre de columna vacío")]
    BlankColumn(String),
    #[error("columna duplicada '{column}' en el conjunto de datos '{dataset}'")]
    DuplicateColumn { dataset: String, column: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    pub column_profiles: IndexMap<String, ColumnProfile>,
    pub suggestions: Vec<ChartSuggestion>,
    pub data_quality: DataQualityReport,
    pub domain_insights: DomainInsights,
}

fn validate(dataset: &Dataset<'_>) -> Result<(), AnalysisError> {
    if dataset.columns.is_empty() {
        return Err(AnalysisError::NoColumns(dataset.id.to_string()));
    }
    let mut seen = HashSet::new();
    for column in dataset.columns {
        if column.trim().is_empty() {
            return Err(AnalysisError::BlankColumn(dataset.id.to_string()));
        }
        if !seen.insert(column.as_str()) {
            return Err(AnalysisError::DuplicateColumn {
                dataset: dataset.id.to_string(),
                column: column.clone(),
            });
        }
    }
    Ok(())
}

/// Ejecuta el análisis completo. Un conjunto sin registros no es un error:
/// produce perfiles vacíos, ninguna sugerencia y puntuación 0.
pub fn analyze_dataset(rules: &AnalysisRules, dataset: Dataset<'_>) -> Result<AnalysisResult, AnalysisError> {
    if let Err(e) = validate(&dataset) {
        warn!(dataset = dataset.id, error = %e, "Análisis rechazado");
        return Err(e);
    }

    let column_profiles = ColumnClassifier::new(rules).profile_all(dataset.columns, dataset.records);
    let suggestions = SuggestionEngine::new(rules).suggest(&column_profiles);
    let data_quality = DataQualityReport::assess(rules, &column_profiles, dataset.records.len());
    let domain_insights = DomainInsights::from_profiles(&column_profiles);

    info!(
        dataset = dataset.id,
        records = dataset.records.len(),
        columns = dataset.columns.len(),
        suggestions = suggestions.len(),
        quality = data_quality.score,
        "Análisis completado"
    );

    Ok(AnalysisResult {
        column_profiles,
        suggestions,
        data_quality,
        domain_insights,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        classifier::ValueType,
        dataset::fixtures,
        rules::{ColumnDomain, PriorityTier},
        suggestions::ChartType,
    };
    use serde_json::json;

    fn rules() -> AnalysisRules {
        AnalysisRules::standard().expect("patrones válidos")
    }

    #[test]
    fn empty_dataset_yields_empty_analysis() {
        let rules = rules();
        let columns = fixtures::columns(&["region", "plot_area"]);
        let result = analyze_dataset(&rules, Dataset::new("d1", &[], &columns)).expect("análisis");

        assert!(result.suggestions.is_empty());
        assert_eq!(result.data_quality.score, 0);
        for profile in result.column_profiles.values() {
            assert_eq!(profile.completeness, 0.0);
            assert_eq!(profile.value_type, ValueType::Empty);
        }
    }

    #[test]
    fn farm_survey_end_to_end() {
        let rules = rules();
        let regions = ["Amhara", "Oromia", "Tigray", "Sidama"];
        let records = fixtures::records(
            (0..20)
                .map(|i| {
                    let region = regions[i % 4];
                    let area = if i == 7 { serde_json::Value::Null } else { json!(format!("{}.5", i % 6 + 1)) };
                    json!({
                        "_id": i + 1000,
                        "region": region,
                        "land_area_ha": area,
                        "maize_yield_kg": 800 + i * 35,
                    })
                })
                .collect(),
        );
        let columns = fixtures::columns(&["_id", "region", "land_area_ha", "maize_yield_kg"]);
        let result = analyze_dataset(&rules, Dataset::new("farm", &records, &columns)).expect("análisis");

        let id = &result.column_profiles["_id"];
        assert_eq!(id.priority, PriorityTier::System);
        assert_eq!(id.domain, ColumnDomain::System);
        let region = &result.column_profiles["region"];
        assert_eq!(region.domain, ColumnDomain::Geographic);
        assert_eq!(region.value_type, ValueType::Categorical);
        assert_eq!(result.column_profiles["land_area_ha"].value_type, ValueType::Numeric);

        // (0.5 + 1.0 + 0.95 + 1.0) / 4
        assert!(result.data_quality.score > 60);
        assert_eq!(result.data_quality.score, 86);
        assert_eq!(result.data_quality.total_columns, 4);
        assert_eq!(result.data_quality.meaningful_columns, 3);

        assert!(result.suggestions.iter().any(|s| s.name == "Land Area by region"));
        assert!(result.suggestions.iter().any(|s| s.chart_type == ChartType::Scatter));
        assert!(result.suggestions.iter().all(|s| !s.configuration.references("_id")));
    }

    #[test]
    fn structural_errors_are_reported() {
        let rules = rules();
        assert_eq!(
            analyze_dataset(&rules, Dataset::new("d1", &[], &[])),
            Err(AnalysisError::NoColumns("d1".into()))
        );
        let blank = fixtures::columns(&["region", "  "]);
        assert_eq!(
            analyze_dataset(&rules, Dataset::new("d1", &[], &blank)),
            Err(AnalysisError::BlankColumn("d1".into()))
        );
        let dup = fixtures::columns(&["region", "region"]);
        assert!(matches!(
            analyze_dataset(&rules, Dataset::new("d1", &[], &dup)),
            Err(AnalysisError::DuplicateColumn { .. })
        ));
    }

    #[test]
    fn analysis_is_idempotent_and_bounded() {
        let rules = rules();
        let records = fixtures::records(
            (0..25)
                .map(|i| {
                    let region = ["a", "b", "c"][i % 3];
                    json!({
                        "_id": i,
                        "_submission_time": "2024-04-01T08:00:00",
                        "region": region,
                        "land_area_ha": i % 7 + 1,
                        "maize_yield_kg": 500 + i * 20,
                        "household_income": 1000 + i * 13,
                        "harvest_date": format!("2024-04-{:02}", i % 28 + 1),
                    })
                })
                .collect(),
        );
        let columns = crate::dataset::columns_of_first(&records);
        let first = analyze_dataset(&rules, Dataset::new("d", &records, &columns)).expect("análisis");
        let second = analyze_dataset(&rules, Dataset::new("d", &records, &columns)).expect("análisis");
        assert_eq!(first, second);

        assert!(first.suggestions.len() <= 15);
        for profile in first.column_profiles.values() {
            assert!((0.0..=1.0).contains(&profile.completeness));
            assert!((0.0..=1.0).contains(&profile.relevance_score));
        }
        for s in &first.suggestions {
            assert!(!s.configuration.references("_id"));
            assert!(!s.configuration.references("_submission_time"));
        }
        assert!(first.suggestions.iter().any(|s| s.chart_type == ChartType::Line));
        assert_eq!(first.data_quality.analyzed_submissions, 25);
        assert!(first.domain_insights.geographic.has_regions);
    }
}
