//! Cliente HTTP de la API v2 de KoboToolbox: formularios (assets) y envíos.

use anyhow::{anyhow, Result};
use futures::{stream, StreamExt};
use reqwest::{header, Client, Response};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use url::Url;

use crate::dataset::{columns_of_first, Record};

/// Formulario tal como lo lista `/assets/`.
#[derive(Debug, Clone, Deserialize)]
pub struct KoboAsset {
    pub uid: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default, rename = "owner__username")]
    pub owner_username: Option<String>,
    #[serde(default)]
    pub date_created: Option<String>,
    #[serde(default, rename = "deployment__active")]
    pub deployment_active: Option<bool>,
}

/// Formulario con sus envíos descargados. Un fallo al descargar los envíos
/// de un formulario queda en `error` sin invalidar el resto.
#[derive(Debug, Clone, Serialize)]
pub struct FetchedProject {
    pub uid: String,
    pub name: String,
    #[serde(rename = "owner__username")]
    pub owner_username: Option<String>,
    pub date_created: Option<String>,
    #[serde(rename = "deployment__active")]
    pub deployment_active: bool,
    pub submissions: Vec<Record>,
    pub total_submissions: usize,
    pub available_columns: Vec<String>,
    pub selected_columns: Vec<String>,
    pub data_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Heurística mínima: páginas de error servidas como HTML.
pub fn looks_like_html(body: &str) -> bool {
    let head = body.trim_start();
    head.starts_with("<!DOCTYPE") || head.starts_with("<!doctype") || body.contains("<html")
}

#[derive(Debug, Clone)]
pub struct KoboClient {
    http: Client,
    base: Url,
}

impl KoboClient {
    pub fn new(base: Url) -> Self {
        Self {
            http: Client::new(),
            base,
        }
    }

    pub fn data_url(&self, project_uid: &str) -> Result<Url> {
        Ok(self.base.join(&format!("assets/{project_uid}/data/"))?)
    }

    async fn get(&self, url: Url, token: &str) -> Result<Response> {
        let response = self
            .http
            .get(url)
            .header(header::AUTHORIZATION, format!("Token {token}"))
            .header(header::ACCEPT, "application/json")
            .send()
            .await?;
        Ok(response)
    }

    /// Lee el cuerpo como JSON validando HTML, estado HTTP y formato.
    async fn read_json(response: Response) -> Result<Value> {
        let status = response.status();
        let body = response.text().await?;

        if looks_like_html(&body) {
            return Err(anyhow!(
                "Respuesta inválida de la API: se recibió HTML en lugar de JSON. Revisa el token de API."
            ));
        }
        let value: Value = serde_json::from_str(&body).map_err(|_| {
            let preview: String = body.chars().take(100).collect();
            anyhow!("Respuesta JSON inválida: {preview}...")
        })?;

        if !status.is_success() {
            let detail = value
                .get("detail")
                .or_else(|| value.get("message"))
                .and_then(Value::as_str)
                .unwrap_or("Error desconocido");
            return Err(anyhow!("La API devolvió {}: {detail}", status.as_u16()));
        }
        Ok(value)
    }

    fn results(value: &Value) -> Result<&Vec<Value>> {
        value
            .get("results")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow!("Formato de respuesta inválido: falta el campo 'results'"))
    }

    pub async fn list_assets(&self, token: &str) -> Result<Vec<KoboAsset>> {
        let url = self.base.join("assets/")?;
        let value = Self::read_json(self.get(url, token).await?).await?;
        let assets = Self::results(&value)?
            .iter()
            .filter_map(|a| serde_json::from_value::<KoboAsset>(a.clone()).ok())
            .collect::<Vec<_>>();
        info!("Kobo: {} formularios encontrados", assets.len());
        Ok(assets)
    }

    /// Todos los envíos de un formulario, siguiendo la paginación `next`.
    pub async fn fetch_submissions(&self, token: &str, project_uid: &str) -> Result<Vec<Record>> {
        let mut next = Some(self.data_url(project_uid)?);
        let mut records = Vec::new();

        while let Some(url) = next.take() {
            let value = Self::read_json(self.get(url, token).await?).await?;
            records.extend(Self::results(&value)?.iter().filter_map(|v| match v {
                Value::Object(map) => Some(map.clone()),
                _ => None,
            }));
            next = value
                .get("next")
                .and_then(Value::as_str)
                .map(Url::parse)
                .transpose()?;
        }
        Ok(records)
    }

    async fn fetch_project(&self, token: &str, asset: KoboAsset) -> FetchedProject {
        let data_url = self
            .data_url(&asset.uid)
            .map(|u| u.to_string())
            .unwrap_or_default();
        let (submissions, error) = match self.fetch_submissions(token, &asset.uid).await {
            Ok(records) => (records, None),
            Err(e) => {
                warn!("Error descargando envíos de {}: {e}", asset.uid);
                (Vec::new(), Some(format!("No se pudieron descargar los datos del formulario: {e}")))
            }
        };
        let available_columns = columns_of_first(&submissions);

        FetchedProject {
            uid: asset.uid,
            name: asset.name.unwrap_or_else(|| "Untitled Project".to_string()),
            owner_username: asset.owner_username,
            date_created: asset.date_created,
            deployment_active: asset.deployment_active.unwrap_or(false),
            total_submissions: submissions.len(),
            selected_columns: available_columns.clone(),
            available_columns,
            submissions,
            data_url,
            error,
        }
    }

    /// Descarga los envíos de cada formulario con como mucho `concurrency`
    /// peticiones en vuelo. Conserva el orden de `assets`.
    pub async fn fetch_projects(&self, token: &str, assets: Vec<KoboAsset>, concurrency: usize) -> Vec<FetchedProject> {
        stream::iter(assets)
            .map(|asset| self.fetch_project(token, asset))
            .buffered(concurrency.max(1))
            .collect::<Vec<_>>()
            .await
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use testing::fake_kobo;

    #[test]
    fn detects_html_bodies() {
        assert!(looks_like_html("  <!DOCTYPE html><p>x</p>"));
        assert!(looks_like_html("error <html>"));
        assert!(!looks_like_html("{\"results\": []}"));
    }

    #[tokio::test]
    async fn fetches_assets_and_paginated_submissions() {
        let client = KoboClient::new(fake_kobo().await);
        let assets = client.list_assets("good").await.unwrap();
        assert_eq!(assets.len(), 2);
        assert_eq!(assets[0].owner_username.as_deref(), Some("ana"));

        let projects = client.fetch_projects("good", assets, 3).await;
        assert_eq!(projects[0].uid, "aA1");
        assert_eq!(projects[0].total_submissions, 2);
        assert_eq!(projects[0].available_columns, vec!["_id".to_string(), "region".to_string()]);
        assert!(projects[0].error.is_none());

        assert_eq!(projects[1].name, "Untitled Project");
        assert!(projects[1].error.as_deref().unwrap_or_default().contains("404"));
    }

    #[tokio::test]
    async fn reports_html_and_api_errors() {
        let client = KoboClient::new(fake_kobo().await);
        let err = client.list_assets("html").await.unwrap_err().to_string();
        assert!(err.contains("HTML"));
        let err = client.list_assets("bad").await.unwrap_err().to_string();
        assert!(err.contains("401") && err.contains("Invalid token."));
    }
}
