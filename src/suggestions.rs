//! Motor de sugerencias de gráficos.
//!
//! Flujo:
//!   1. Filtro de calidad: columnas "significativas", ordenadas por relevancia (top 20).
//!   2. Cuatro estrategias independientes generan candidatos: agrícola,
//!      distribución/comparación, correlación por pares y tendencia temporal.
//!   3. Deduplicación por firma (tipo, columna x, columna y).
//!   4. Filtro de relevancia mínima, orden por peso de etiqueta y recorte a 15.

use std::collections::HashSet;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::{
    classifier::{ColumnProfile, ValueType},
    rules::{AnalysisRules, ColumnDomain},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartType {
    Bar,
    Line,
    Pie,
    Doughnut,
    Scatter,
    Area,
}

impl ChartType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bar => "bar",
            Self::Line => "line",
            Self::Pie => "pie",
            Self::Doughnut => "doughnut",
            Self::Scatter => "scatter",
            Self::Area => "area",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "bar" | "horizontalbar" => Some(Self::Bar),
            "line" => Some(Self::Line),
            "pie" => Some(Self::Pie),
            "doughnut" => Some(Self::Doughnut),
            "scatter" => Some(Self::Scatter),
            "area" => Some(Self::Area),
            _ => None,
        }
    }
}

/// Etiqueta de origen de una sugerencia; determina su peso en el ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DomainTag {
    Agriculture,
    Correlation,
    Trend,
    Insight,
    General,
}

impl DomainTag {
    pub fn weight(self, rules: &AnalysisRules) -> f64 {
        let w = &rules.weights;
        match self {
            Self::Agriculture => w.agriculture_weight,
            Self::Correlation => w.correlation_weight,
            Self::Trend => w.trend_weight,
            Self::Insight => w.insight_weight,
            Self::General => w.general_weight,
        }
    }
}

/// Columnas enlazadas a un gráfico. Es también lo que se persiste como
/// `config_data` de una configuración de gráfico.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartBindings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub x_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub y_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_by: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub date_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value_column: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bins: Option<u32>,
}

impl ChartBindings {
    /// Columna principal del eje x (o la única columna del gráfico).
    pub fn primary_x(&self) -> Option<&str> {
        self.x_column
            .as_deref()
            .or(self.column.as_deref())
            .or(self.date_column.as_deref())
    }

    pub fn primary_y(&self) -> Option<&str> {
        self.y_column.as_deref().or(self.value_column.as_deref())
    }

    #[cfg(test)]
    pub fn references(&self, column: &str) -> bool {
        [
            &self.column,
            &self.x_column,
            &self.y_column,
            &self.group_by,
            &self.date_column,
            &self.value_column,
        ]
        .into_iter()
        .any(|c| c.as_deref() == Some(column))
    }

    fn single(source: &str, column: &str) -> Self {
        Self {
            data_source: Some(source.to_string()),
            column: Some(column.to_string()),
            ..Self::default()
        }
    }

    fn grouped(source: &str, x: &str, y: &str) -> Self {
        Self {
            data_source: Some(source.to_string()),
            x_column: Some(x.to_string()),
            y_column: Some(y.to_string()),
            group_by: Some(x.to_string()),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartSuggestion {
    pub name: String,
    pub chart_type: ChartType,
    pub configuration: ChartBindings,
    pub relevance_score: f64,
    pub domain_tag: DomainTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ChartSuggestion {
    fn new(name: String, chart_type: ChartType, configuration: ChartBindings, score: f64, tag: DomainTag) -> Self {
        Self {
            name,
            chart_type,
            configuration,
            relevance_score: score.clamp(0.0, 1.0),
            domain_tag: tag,
            description: None,
        }
    }

    fn described(mut self, description: String) -> Self {
        self.description = Some(description);
        self
    }

    fn signature(&self) -> (ChartType, Option<String>, Option<String>) {
        (
            self.chart_type,
            self.configuration.primary_x().map(str::to_string),
            self.configuration.primary_y().map(str::to_string),
        )
    }
}

/// Motor sin estado sobre unas reglas inmutables.
#[derive(Debug, Clone, Copy)]
pub struct SuggestionEngine<'r> {
    rules: &'r AnalysisRules,
}

impl<'r> SuggestionEngine<'r> {
    pub fn new(rules: &'r AnalysisRules) -> Self {
        Self { rules }
    }

    /// Columnas con datos suficientes para cualquier gráfico: no vacías,
    /// completas y relevantes. Ordenadas por relevancia y recortadas.
    pub fn meaningful_columns<'p>(&self, profiles: &'p IndexMap<String, ColumnProfile>) -> Vec<&'p ColumnProfile> {
        let g = &self.rules.gates;
        let mut meaningful: Vec<&ColumnProfile> = profiles
            .values()
            .filter(|p| {
                !p.is_system()
                    && p.has_values()
                    && p.completeness > g.meaningful_completeness
                    && p.relevance_score > g.meaningful_relevance
            })
            .collect();
        meaningful.sort_by(|a, b| b.relevance_score.total_cmp(&a.relevance_score));
        meaningful.truncate(g.max_meaningful_columns);
        meaningful
    }

    /// Control más estricto que se aplica a cada columna de un gráfico agrícola.
    fn is_good_for_chart(&self, profile: &ColumnProfile) -> bool {
        let g = &self.rules.gates;
        profile.has_values()
            && profile.non_empty_count >= g.chart_min_values
            && profile.completeness > g.chart_completeness
            && profile.relevance_score > g.chart_relevance
    }

    /// Genera, deduplica, ordena y recorta las sugerencias.
    pub fn suggest(&self, profiles: &IndexMap<String, ColumnProfile>) -> Vec<ChartSuggestion> {
        let meaningful = self.meaningful_columns(profiles);

        let mut candidates = Vec::new();
        candidates.extend(self.agriculture_charts(profiles));
        candidates.extend(self.insight_charts(&meaningful));
        candidates.extend(self.correlation_charts(&meaningful));
        candidates.extend(self.trend_charts(&meaningful));

        self.rank(deduplicate(candidates))
    }

    fn rank(&self, candidates: Vec<ChartSuggestion>) -> Vec<ChartSuggestion> {
        let mut ranked: Vec<ChartSuggestion> = candidates
            .into_iter()
            .filter(|c| c.relevance_score >= self.rules.weights.min_chart_relevance)
            .collect();
        ranked.sort_by(|a, b| {
            b.domain_tag
                .weight(self.rules)
                .total_cmp(&a.domain_tag.weight(self.rules))
                .then_with(|| b.relevance_score.total_cmp(&a.relevance_score))
        });
        ranked.truncate(self.rules.gates.max_suggestions);
        ranked
    }

    /// Gráficos agrícolas sobre TODOS los perfiles (no sólo el top 20).
    pub fn agriculture_charts(&self, profiles: &IndexMap<String, ColumnProfile>) -> Vec<ChartSuggestion> {
        let first_of = |domain: ColumnDomain| {
            profiles
                .values()
                .find(|p| p.domain == domain && !p.is_system() && p.has_values())
        };
        let region = first_of(ColumnDomain::Geographic);
        let mut charts = Vec::new();

        if let Some(region) = region {
            if let Some(area) = first_of(ColumnDomain::LandArea).filter(|p| self.is_good_for_chart(p)) {
                charts.push(
                    ChartSuggestion::new(
                        format!("Land Area by {}", region.name),
                        ChartType::Bar,
                        ChartBindings::grouped("agriculture", &region.name, &area.name),
                        0.95,
                        DomainTag::Agriculture,
                    )
                    .described("Distribution of land area across different regions".to_string()),
                );
            }
            if let Some(prod) = first_of(ColumnDomain::CropProduction).filter(|p| self.is_good_for_chart(p)) {
                charts.push(ChartSuggestion::new(
                    format!("Production by {}", region.name),
                    ChartType::Bar,
                    ChartBindings::grouped("agriculture", &region.name, &prod.name),
                    0.92,
                    DomainTag::Agriculture,
                ));
            }
        }

        if let Some(land_use) = first_of(ColumnDomain::LandUse) {
            if self.is_good_for_chart(land_use)
                && land_use.unique_value_count <= self.rules.gates.max_land_use_categories
            {
                charts.push(ChartSuggestion::new(
                    "Land Use Distribution".to_string(),
                    ChartType::Pie,
                    ChartBindings::single("agriculture", &land_use.name),
                    0.88,
                    DomainTag::Agriculture,
                ));
            }
        }

        if let (Some(livestock), Some(region)) = (first_of(ColumnDomain::Livestock), region) {
            if self.is_good_for_chart(livestock) {
                charts.push(ChartSuggestion::new(
                    "Livestock by Region".to_string(),
                    ChartType::Bar,
                    ChartBindings::grouped("agriculture", &region.name, &livestock.name),
                    0.87,
                    DomainTag::Agriculture,
                ));
            }
        }

        charts.truncate(self.rules.gates.max_agriculture_charts);
        charts
    }

    /// Distribuciones de categóricas, histogramas de numéricas y una comparación.
    pub fn insight_charts(&self, meaningful: &[&ColumnProfile]) -> Vec<ChartSuggestion> {
        let g = &self.rules.gates;
        let categorical: Vec<&ColumnProfile> = meaningful
            .iter()
            .copied()
            .filter(|p| p.value_type == ValueType::Categorical && p.unique_value_count <= g.max_pie_categories)
            .take(3)
            .collect();
        let numeric: Vec<&ColumnProfile> = meaningful
            .iter()
            .copied()
            .filter(|p| p.value_type == ValueType::Numeric)
            .take(2)
            .collect();

        let mut charts = Vec::new();
        for col in &categorical {
            charts.push(ChartSuggestion::new(
                format!("Distribution: {}", col.name),
                ChartType::Pie,
                ChartBindings::single("insight", &col.name),
                0.85,
                DomainTag::Insight,
            ));
        }
        for col in &numeric {
            let mut bindings = ChartBindings::single("insight", &col.name);
            bindings.bins = Some(g.histogram_bins);
            charts.push(ChartSuggestion::new(
                format!("Values: {}", col.name),
                ChartType::Bar,
                bindings,
                0.82,
                DomainTag::Insight,
            ));
        }
        if let (Some(cat), Some(num)) = (categorical.first(), numeric.first()) {
            charts.push(ChartSuggestion::new(
                format!("{} by {}", num.name, cat.name),
                ChartType::Bar,
                ChartBindings::grouped("comparison", &cat.name, &num.name),
                0.88,
                DomainTag::Insight,
            ));
        }

        charts.truncate(g.max_insight_charts);
        charts
    }

    /// Relevancia de un par numérico (x, y): base más los incrementos por
    /// dominio compartido y por patrones de relación conocidos.
    pub fn pair_relevance(&self, x: &ColumnProfile, y: &ColumnProfile) -> f64 {
        let w = &self.rules.weights;
        let mut relevance = w.correlation_base;
        if x.domain == y.domain {
            relevance += w.same_domain_boost;
        }
        for boost in &self.rules.correlation_boosts {
            if boost.x.is_match(&x.name) && boost.y.is_match(&y.name) {
                relevance += boost.boost;
            }
        }
        relevance
    }

    /// Diagramas de dispersión entre las 5 numéricas más relevantes.
    /// No se filtran columnas de varianza cero.
    pub fn correlation_charts(&self, meaningful: &[&ColumnProfile]) -> Vec<ChartSuggestion> {
        let numeric: Vec<&ColumnProfile> = meaningful
            .iter()
            .copied()
            .filter(|p| p.value_type == ValueType::Numeric)
            .take(5)
            .collect();

        let mut charts = Vec::new();
        for (i, x) in numeric.iter().enumerate() {
            for y in &numeric[i + 1..] {
                let relevance = self.pair_relevance(x, y);
                if relevance < self.rules.weights.correlation_threshold {
                    continue;
                }
                charts.push(
                    ChartSuggestion::new(
                        format!("{} vs {}", x.name, y.name),
                        ChartType::Scatter,
                        ChartBindings {
                            data_source: Some("correlation".to_string()),
                            x_column: Some(x.name.clone()),
                            y_column: Some(y.name.clone()),
                            ..ChartBindings::default()
                        },
                        relevance,
                        DomainTag::Correlation,
                    )
                    .described(format!("Relationship between {} and {}", x.name, y.name)),
                );
            }
        }

        charts.truncate(self.rules.gates.max_correlation_charts);
        charts
    }

    /// Serie temporal de la primera numérica sobre la primera columna de fecha.
    pub fn trend_charts(&self, meaningful: &[&ColumnProfile]) -> Vec<ChartSuggestion> {
        let date = meaningful.iter().find(|p| p.value_type == ValueType::Date);
        let value = meaningful.iter().find(|p| p.value_type == ValueType::Numeric);

        let mut charts = Vec::new();
        if let (Some(date), Some(value)) = (date, value) {
            charts.push(ChartSuggestion::new(
                format!("Trend: {} Over Time", value.name),
                ChartType::Line,
                ChartBindings {
                    data_source: Some("trend".to_string()),
                    date_column: Some(date.name.clone()),
                    value_column: Some(value.name.clone()),
                    ..ChartBindings::default()
                },
                0.9,
                DomainTag::Trend,
            ));
        }
        charts.truncate(self.rules.gates.max_trend_charts);
        charts
    }
}

/// Conserva la primera sugerencia de cada firma (tipo, x, y).
pub fn deduplicate(candidates: Vec<ChartSuggestion>) -> Vec<ChartSuggestion> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.signature()))
        .collect()
}
