//! Tablas de patrones y constantes de puntuación del análisis.
//!
//! `AnalysisRules` se construye una vez al arrancar y se comparte por
//! referencia; nada la muta en tiempo de ejecución. Las reglas de dominio
//! forman una lista ORDENADA: la primera que coincide gana.

use regex::{Regex, RegexSet};
use serde::{Deserialize, Serialize};

/// Categoría semántica asignada a una columna por su nombre.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ColumnDomain {
    System,
    Geographic,
    LandUse,
    LandArea,
    CropProduction,
    Livestock,
    Economic,
    Environmental,
    Demographic,
    Infrastructure,
    Measurement,
    Quality,
    Status,
    Count,
    Percentage,
    General,
}

impl ColumnDomain {
    /// Dominios agrícolas (todos los de prioridad alta salvo el geográfico).
    pub fn is_agricultural(self) -> bool {
        matches!(
            self,
            Self::LandUse | Self::LandArea | Self::CropProduction | Self::Livestock
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriorityTier {
    High,
    Medium,
    Low,
    System,
}

/// Una regla de clasificación: si el nombre coincide con algún patrón,
/// la columna recibe `domain` y `tier`.
#[derive(Debug, Clone)]
pub struct DomainRule {
    pub domain: ColumnDomain,
    pub tier: PriorityTier,
    patterns: RegexSet,
}

impl DomainRule {
    /// Los patrones se evalúan sin distinguir mayúsculas.
    pub fn new(
        domain: ColumnDomain,
        tier: PriorityTier,
        patterns: &[&str],
    ) -> Result<Self, regex::Error> {
        let patterns = RegexSet::new(patterns.iter().map(|p| format!("(?i){p}")))?;
        Ok(Self { domain, tier, patterns })
    }

    pub fn matches(&self, column: &str) -> bool {
        self.patterns.is_match(column)
    }
}

/// Patrones usados para inferir el tipo de valor de una columna.
#[derive(Debug, Clone)]
pub struct ValuePatterns {
    pub image_name: Regex,
    pub image_value: Regex,
    pub date_name: Regex,
    pub date_value: Regex,
    pub geographic_name: Regex,
    pub boolean_value: Regex,
    pub numeric_value: Regex,
}

impl ValuePatterns {
    pub fn standard() -> Result<Self, regex::Error> {
        Ok(Self {
            image_name: Regex::new(r"(?i)(_url$|_attachment$|photo|image|picture)")?,
            image_value: Regex::new(r"(?i)(\.(jpg|jpeg|png|gif|bmp|webp)$|attachment|download_url)")?,
            date_name: Regex::new(r"(?i)(date|time|timestamp)")?,
            date_value: Regex::new(r"^\d{4}-\d{2}-\d{2}")?,
            geographic_name: Regex::new(r"(?i)(gps|location|latitude|longitude|address)")?,
            boolean_value: Regex::new(r"(?i)^(true|false|yes|no|1|0)$")?,
            numeric_value: Regex::new(r"^-?\d*\.?\d+$")?,
        })
    }
}

/// Patrones (x, y) que indican una posible relación entre dos columnas
/// numéricas, con el incremento de relevancia que aportan.
#[derive(Debug, Clone)]
pub struct CorrelationBoost {
    pub x: Regex,
    pub y: Regex,
    pub boost: f64,
}

/// Constantes de puntuación. Sólo importa el orden relativo que producen.
#[derive(Debug, Clone)]
pub struct ScoringWeights {
    pub base_relevance: f64,
    pub high_tier_boost: f64,
    pub medium_tier_boost: f64,
    pub indicator_boost: f64,
    pub correlation_base: f64,
    pub same_domain_boost: f64,
    pub correlation_threshold: f64,
    pub min_chart_relevance: f64,
    pub agriculture_weight: f64,
    pub correlation_weight: f64,
    pub trend_weight: f64,
    pub insight_weight: f64,
    pub general_weight: f64,
}

impl Default for ScoringWeights {
    fn default() -> Self {
        Self {
            base_relevance: 0.5,
            high_tier_boost: 0.3,
            medium_tier_boost: 0.2,
            indicator_boost: 0.2,
            correlation_base: 0.6,
            same_domain_boost: 0.2,
            correlation_threshold: 0.75,
            min_chart_relevance: 0.7,
            agriculture_weight: 4.0,
            correlation_weight: 3.0,
            trend_weight: 2.5,
            insight_weight: 2.0,
            general_weight: 1.0,
        }
    }
}

/// Umbrales de calidad y límites de resultados.
#[derive(Debug, Clone)]
pub struct QualityGates {
    pub meaningful_completeness: f64,
    pub meaningful_relevance: f64,
    pub max_meaningful_columns: usize,
    pub chart_min_values: usize,
    pub chart_completeness: f64,
    pub chart_relevance: f64,
    pub max_land_use_categories: usize,
    pub max_pie_categories: usize,
    pub max_categorical_unique: usize,
    pub categorical_unique_ratio: f64,
    pub majority_ratio: f64,
    pub histogram_bins: u32,
    pub max_agriculture_charts: usize,
    pub max_insight_charts: usize,
    pub max_correlation_charts: usize,
    pub max_trend_charts: usize,
    pub max_suggestions: usize,
    pub sample_size: usize,
    pub top_values: usize,
}

impl Default for QualityGates {
    fn default() -> Self {
        Self {
            meaningful_completeness: 0.6,
            meaningful_relevance: 0.5,
            max_meaningful_columns: 20,
            chart_min_values: 5,
            chart_completeness: 0.7,
            chart_relevance: 0.6,
            max_land_use_categories: 8,
            max_pie_categories: 10,
            max_categorical_unique: 15,
            categorical_unique_ratio: 0.4,
            majority_ratio: 0.7,
            histogram_bins: 8,
            max_agriculture_charts: 5,
            max_insight_charts: 6,
            max_correlation_charts: 3,
            max_trend_charts: 2,
            max_suggestions: 15,
            sample_size: 5,
            top_values: 5,
        }
    }
}

/// Configuración inmutable del clasificador y del motor de sugerencias.
#[derive(Debug, Clone)]
pub struct AnalysisRules {
    pub domain_rules: Vec<DomainRule>,
    pub strong_indicator: Regex,
    pub values: ValuePatterns,
    pub correlation_boosts: Vec<CorrelationBoost>,
    pub weights: ScoringWeights,
    pub gates: QualityGates,
}

impl AnalysisRules {
    /// Tablas por defecto, orientadas a encuestas agrícolas.
    pub fn standard() -> Result<Self, regex::Error> {
        use ColumnDomain as D;
        use PriorityTier as T;

        let domain_rules = vec![
            DomainRule::new(
                D::System,
                T::System,
                &[
                    r"^_id$", r"^_uuid$", r"^_submission_time$", r"^_validation_status$",
                    r"^_tags$", r"^_notes$", r"^_status$", r"^_attachments$",
                    r"^formhub/uuid$", r"^_xform_id_string$", r"^__version__$",
                    r"^deviceid$", r"^simserial$", r"^phonenumber$", r"^meta/",
                    r"^_geolocation", r"^start$", r"^end$", r"^today$",
                ],
            )?,
            DomainRule::new(
                D::Geographic,
                T::High,
                &["region", "zone", "woreda", "kebele", "district", "location", "village"],
            )?,
            DomainRule::new(
                D::LandUse,
                T::High,
                &["land.*use", "land.*cover", "grazing", "forest", "cultivation", "farm", "agriculture"],
            )?,
            DomainRule::new(
                D::LandArea,
                T::High,
                &["area", "hectare", "acre", "size", "total.*land", "plot.*size"],
            )?,
            DomainRule::new(
                D::CropProduction,
                T::High,
                &["yield", "production", "harvest", "crop", "planting"],
            )?,
            DomainRule::new(
                D::Livestock,
                T::High,
                &["livestock", "cattle", "goat", "sheep", "poultry", "animal"],
            )?,
            DomainRule::new(
                D::Economic,
                T::Medium,
                &["income", "price", "cost", "revenue", "market", "sale", "profit"],
            )?,
            DomainRule::new(
                D::Environmental,
                T::Medium,
                &["rainfall", "temperature", "soil", "water", "climate", "irrigation"],
            )?,
            DomainRule::new(
                D::Demographic,
                T::Medium,
                &["household", "family", "population", "age", "gender", "education"],
            )?,
            DomainRule::new(
                D::Infrastructure,
                T::Medium,
                &["equipment", "tool", "machine", "vehicle", "facility"],
            )?,
            DomainRule::new(
                D::Measurement,
                T::Medium,
                &["height", "weight", "length", "width", "depth", "volume"],
            )?,
            DomainRule::new(
                D::Quality,
                T::Medium,
                &["quality", "rating", "score", "grade", "satisfaction"],
            )?,
            DomainRule::new(D::Status, T::Low, &["status", "condition", "state", "phase"])?,
            DomainRule::new(D::Count, T::Low, &["number", "count", "quantity", "amount", "total"])?,
            DomainRule::new(
                D::Percentage,
                T::Low,
                &["percentage", "percent", "ratio", "proportion"],
            )?,
        ];

        let correlation_boosts = vec![
            CorrelationBoost {
                x: Regex::new(r"(?i)(area|size)")?,
                y: Regex::new(r"(?i)(production|yield)")?,
                boost: 0.3,
            },
            CorrelationBoost {
                x: Regex::new(r"(?i)(income|price)")?,
                y: Regex::new(r"(?i)(production|yield)")?,
                boost: 0.2,
            },
            CorrelationBoost {
                x: Regex::new(r"(?i)(rainfall|water)")?,
                y: Regex::new(r"(?i)(yield|production)")?,
                boost: 0.25,
            },
        ];

        Ok(Self {
            domain_rules,
            strong_indicator: Regex::new(r"(?i)(region|area|yield|income|production)")?,
            values: ValuePatterns::standard()?,
            correlation_boosts,
            weights: ScoringWeights::default(),
            gates: QualityGates::default(),
        })
    }

    /// Sustituye la tabla de dominios (p. ej. para otro tipo de encuesta)
    /// sin tocar la lógica de clasificación ni de ranking.
    pub fn with_domain_rules(mut self, domain_rules: Vec<DomainRule>) -> Self {
        self.domain_rules = domain_rules;
        self
    }

    /// Primera regla que coincide con el nombre; `General`/`Low` si ninguna.
    pub fn classify_name(&self, column: &str) -> (ColumnDomain, PriorityTier) {
        self.domain_rules
            .iter()
            .find(|rule| rule.matches(column))
            .map(|rule| (rule.domain, rule.tier))
            .unwrap_or((ColumnDomain::General, PriorityTier::Low))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rules() -> AnalysisRules {
        AnalysisRules::standard().expect("patrones válidos")
    }

    #[test]
    fn system_columns_match_before_domains() {
        let rules = rules();
        for name in ["_id", "_submission_time", "meta/instanceID", "_geolocation", "start", "today"] {
            assert_eq!(rules.classify_name(name).1, PriorityTier::System, "{name}");
        }
        // Sólo coincidencias exactas para los nombres cortos.
        assert_eq!(rules.classify_name("start_date").0, ColumnDomain::General);
    }

    #[test]
    fn first_matching_rule_wins() {
        let rules = rules();
        // "land_use_area" coincide con uso de suelo y con superficie.
        assert_eq!(rules.classify_name("land_use_area").0, ColumnDomain::LandUse);
        // "village" es geográfico aunque contenga "age".
        assert_eq!(rules.classify_name("village").0, ColumnDomain::Geographic);
        assert_eq!(rules.classify_name("maize_yield_kg").0, ColumnDomain::CropProduction);
        assert_eq!(rules.classify_name("Household_Income"), (ColumnDomain::Economic, PriorityTier::Medium));
    }

    #[test]
    fn unmatched_names_fall_back_to_general() {
        assert_eq!(
            rules().classify_name("notes"),
            (ColumnDomain::General, PriorityTier::Low)
        );
    }

    #[test]
    fn domain_table_is_swappable() {
        let custom = vec![DomainRule::new(ColumnDomain::Economic, PriorityTier::High, &["^coffee"])
            .expect("patrón válido")];
        let rules = rules().with_domain_rules(custom);
        assert_eq!(
            rules.classify_name("Coffee_Sales"),
            (ColumnDomain::Economic, PriorityTier::High)
        );
        assert_eq!(rules.classify_name("region").0, ColumnDomain::General);
    }
}
