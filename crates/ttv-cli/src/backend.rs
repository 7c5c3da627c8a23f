//! Payload providers: a local content directory or the visualization backend over HTTP.

use std::collections::BTreeMap;
use std::future::Future;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use ttv_core::{DatasetMeta, EpochId, LabelDictionary, RawEpochPayload, Rgb, null_as_default};
use ttv_source::{Config, DirSource, EpochSource};

/// Something the host can fetch epoch payloads from.
pub trait PayloadFetch: Send + Sync + 'static {
    fn fetch(&self, epoch: EpochId) -> impl Future<Output = Result<RawEpochPayload>> + Send;
}

pub enum Backend {
    Dir(DirSource),
    Http(HttpBackend),
}

impl Backend {
    /// HTTP when `[backend] host` is configured, otherwise the content directory.
    pub fn open(content: &Path, config: &Config) -> Result<Self> {
        match &config.backend.host {
            Some(host) => {
                let backend = HttpBackend::new(
                    host,
                    &content.to_string_lossy(),
                    &config.backend.vis_id,
                    Duration::from_secs(config.backend.timeout_secs),
                )?;
                Ok(Backend::Http(backend))
            }
            None => {
                let source = DirSource::open(content)
                    .with_context(|| format!("failed to open content directory {}", content.display()))?;
                Ok(Backend::Dir(source))
            }
        }
    }

    pub async fn meta(&self) -> Result<DatasetMeta> {
        match self {
            Backend::Dir(source) => {
                let source = source.clone();
                let meta = tokio::task::spawn_blocking(move || source.meta()).await??;
                Ok(meta)
            }
            Backend::Http(http) => http.meta().await,
        }
    }
}

impl PayloadFetch for Backend {
    async fn fetch(&self, epoch: EpochId) -> Result<RawEpochPayload> {
        match self {
            Backend::Dir(source) => {
                let source = source.clone();
                let payload = tokio::task::spawn_blocking(move || source.epoch(epoch)).await??;
                Ok(payload)
            }
            Backend::Http(http) => http.epoch(epoch).await,
        }
    }
}

// --- HTTP ---

pub struct HttpBackend {
    client: reqwest::Client,
    host: String,
    content_path: String,
    vis_id: String,
}

#[derive(Deserialize)]
struct TrainingProcessInfo {
    #[serde(default, deserialize_with = "null_as_default")]
    available_epochs: Vec<Value>,
    #[serde(default, deserialize_with = "null_as_default")]
    color_list: Vec<Vec<f64>>,
    #[serde(default, deserialize_with = "null_as_default")]
    label_text_list: Vec<String>,
}

#[derive(Deserialize)]
struct ProjectionResponse {
    #[serde(default, alias = "proj", deserialize_with = "null_as_default")]
    projection: Vec<Vec<f64>>,
}

#[derive(Default, Deserialize)]
struct NeighborsResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    neighbors: Vec<Vec<usize>>,
}

#[derive(Deserialize)]
struct LabelResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    label: Vec<i64>,
}

#[derive(Default, Deserialize)]
struct PredictionResponse {
    #[serde(default, deserialize_with = "null_as_default")]
    prediction: Vec<Vec<f64>>,
}

#[derive(Deserialize)]
struct BackgroundResponse {
    background_image_base64: Option<String>,
}

#[derive(Deserialize)]
struct TextResponse {
    #[serde(default, alias = "text_list", deserialize_with = "null_as_default")]
    text_data: Vec<String>,
}

impl HttpBackend {
    pub fn new(host: &str, content_path: &str, vis_id: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            client,
            host: host.trim_end_matches('/').to_string(),
            content_path: content_path.to_string(),
            vis_id: vis_id.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.host)
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, body: Value) -> Result<T> {
        let url = self.url(path);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("POST {url} failed"))?
            .error_for_status()
            .with_context(|| format!("POST {url} failed"))?;
        response
            .json()
            .await
            .with_context(|| format!("POST {url}: unexpected response body"))
    }

    async fn post_or_default<T: DeserializeOwned + Default>(
        &self,
        path: &str,
        body: Value,
        epoch: EpochId,
        what: &str,
    ) -> T {
        match self.post(path, body).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(epoch, "{what} unavailable: {e:#}");
                T::default()
            }
        }
    }

    pub async fn meta(&self) -> Result<DatasetMeta> {
        let url = self.url("/getTrainingProcessInfo");
        let info: TrainingProcessInfo = self
            .client
            .get(&url)
            .query(&[("content_path", self.content_path.as_str())])
            .send()
            .await
            .with_context(|| format!("GET {url} failed"))?
            .error_for_status()
            .with_context(|| format!("GET {url} failed"))?
            .json()
            .await
            .with_context(|| format!("GET {url}: unexpected response body"))?;

        let texts = match self
            .post::<TextResponse>("/getAllText", json!({ "content_path": self.content_path }))
            .await
        {
            Ok(t) => t.text_data,
            Err(e) => {
                tracing::debug!("no sample text available: {e:#}");
                Vec::new()
            }
        };

        Ok(DatasetMeta {
            available_epochs: parse_epochs(&info.available_epochs)?,
            labels: label_dictionary(&info.color_list, &info.label_text_list),
            texts,
            index_sets: BTreeMap::new(),
        })
    }

    /// Assemble one epoch from the projection, attribute and neighbour endpoints.
    pub async fn epoch(&self, epoch: EpochId) -> Result<RawEpochPayload> {
        let content_path = &self.content_path;
        let vis_id = &self.vis_id;
        let epoch_str = epoch.to_string();

        let projection: ProjectionResponse = self
            .post(
                "/updateProjection",
                json!({ "content_path": content_path, "vis_id": vis_id, "epoch": epoch_str }),
            )
            .await?;
        let labels: LabelResponse = self
            .post(
                "/getAttributes",
                json!({ "content_path": content_path, "epoch": epoch_str, "attributes": ["label"] }),
            )
            .await?;
        // Without neighbours or predictions the epoch still renders, just plainer.
        let original: NeighborsResponse = self
            .post_or_default(
                "/getOriginalNeighbors",
                json!({ "content_path": content_path, "epoch": epoch }),
                epoch,
                "original-space neighbors",
            )
            .await;
        let projected: NeighborsResponse = self
            .post_or_default(
                "/getProjectionNeighbors",
                json!({ "content_path": content_path, "vis_id": vis_id, "epoch": epoch }),
                epoch,
                "projection-space neighbors",
            )
            .await;
        let predictions: PredictionResponse = self
            .post_or_default(
                "/getAttributes",
                json!({ "content_path": content_path, "epoch": epoch_str, "attributes": ["prediction"] }),
                epoch,
                "predictions",
            )
            .await;
        let background_image = match self
            .post::<BackgroundResponse>(
                "/getBackground",
                json!({ "content_path": content_path, "vis_id": vis_id, "epoch": epoch_str }),
            )
            .await
        {
            Ok(b) => b
                .background_image_base64
                .map(|b64| format!("data:image/png;base64,{b64}")),
            Err(e) => {
                tracing::debug!(epoch, "no background: {e:#}");
                None
            }
        };

        Ok(RawEpochPayload {
            projection: projection.projection,
            prediction_probabilities: predictions.prediction,
            original_space_neighbors: original.neighbors,
            projection_space_neighbors: projected.neighbors,
            background_image,
            labels: labels.label,
        })
    }
}

/// The backend lists epochs as numbers or numeric strings.
fn parse_epochs(values: &[Value]) -> Result<Vec<EpochId>> {
    values
        .iter()
        .map(|v| {
            let parsed = match v {
                Value::Number(n) => n.as_u64().and_then(|n| EpochId::try_from(n).ok()),
                Value::String(s) => s.trim().parse().ok(),
                _ => None,
            };
            match parsed {
                Some(epoch) => Ok(epoch),
                None => bail!("invalid epoch id in available_epochs: {v}"),
            }
        })
        .collect()
}

/// Label `i` gets `names[i]` and `colors[i]`. Colour channels are clamped to `0..=255`.
fn label_dictionary(colors: &[Vec<f64>], names: &[String]) -> LabelDictionary {
    let mut dict = LabelDictionary::default();
    for (i, name) in names.iter().enumerate() {
        dict.names.insert(i as i64, name.clone());
    }
    for (i, channels) in colors.iter().enumerate() {
        if channels.len() < 3 {
            tracing::warn!(label = i, "colour entry has fewer than three channels");
            continue;
        }
        let rgb: Rgb = [
            channels[0].clamp(0.0, 255.0) as u8,
            channels[1].clamp(0.0, 255.0) as u8,
            channels[2].clamp(0.0, 255.0) as u8,
        ];
        dict.colors.insert(i as i64, rgb);
    }
    dict
}
