//! Informe de calidad de datos y resumen de dominios de un análisis.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::{ColumnProfile, ValueType},
    rules::{AnalysisRules, ColumnDomain},
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataQualityReport {
    /// 0..=100
    pub score: u32,
    pub issues: Vec<String>,
    pub total_columns: usize,
    pub meaningful_columns: usize,
    pub analyzed_submissions: usize,
}

impl DataQualityReport {
    pub fn assess(rules: &AnalysisRules, profiles: &IndexMap<String, ColumnProfile>, record_count: usize) -> Self {
        let total_columns = profiles.len();
        let score = if total_columns == 0 {
            0
        } else {
            let sum: f64 = profiles
                .values()
                .map(|p| p.completeness * p.relevance_score)
                .sum();
            (100.0 * sum / total_columns as f64).round().clamp(0.0, 100.0) as u32
        };

        let mut issues = Vec::new();
        for p in profiles.values() {
            if p.completeness < 0.5 {
                issues.push(format!(
                    "Low data completeness in {} ({:.1}%)",
                    p.name,
                    p.completeness * 100.0
                ));
            }
            if p.value_type == ValueType::Empty {
                issues.push(format!("Unable to determine data type for {}", p.name));
            }
        }

        let meaningful_columns = profiles
            .values()
            .filter(|p| !p.is_system() && p.relevance_score > rules.gates.chart_relevance)
            .count();

        Self {
            score,
            issues,
            total_columns,
            meaningful_columns,
            analyzed_submissions: record_count,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgricultureInsight {
    pub has_data: bool,
    pub column_count: usize,
    pub domains: Vec<ColumnDomain>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeographicInsight {
    pub has_regions: bool,
    pub region_columns: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QualityInsight {
    pub high_quality_ratio: f64,
    pub total_columns: usize,
}

/// Vista por dominios de los perfiles, para el panel del proyecto.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DomainInsights {
    pub agriculture: AgricultureInsight,
    pub geographic: GeographicInsight,
    pub data_quality: QualityInsight,
}

impl DomainInsights {
    pub fn from_profiles(profiles: &IndexMap<String, ColumnProfile>) -> Self {
        let agricultural: Vec<&ColumnProfile> = profiles
            .values()
            .filter(|p| p.domain.is_agricultural())
            .collect();
        let mut domains: Vec<ColumnDomain> = Vec::new();
        for p in &agricultural {
            if !domains.contains(&p.domain) {
                domains.push(p.domain);
            }
        }

        let region_columns: Vec<String> = profiles
            .values()
            .filter(|p| p.domain == ColumnDomain::Geographic)
            .map(|p| p.name.clone())
            .collect();

        let high_quality = profiles
            .values()
            .filter(|p| p.completeness > 0.8 && p.relevance_score > 0.6)
            .count();
        let high_quality_ratio = if profiles.is_empty() {
            0.0
        } else {
            high_quality as f64 / profiles.len() as f64
        };

        Self {
            agriculture: AgricultureInsight {
                has_data: !agricultural.is_empty(),
                column_count: agricultural.len(),
                domains,
            },
            geographic: GeographicInsight {
                has_regions: !region_columns.is_empty(),
                region_columns,
            },
            data_quality: QualityInsight {
                high_quality_ratio,
                total_columns: profiles.len(),
            },
        }
    }
}
