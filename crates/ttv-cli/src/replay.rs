//! Scripted interaction replay.
//!
//! One JSON object per line, addressed to a surface by position:
//!
//! ```text
//! {"action": "epoch", "surface": 0, "epoch": 2}
//! {"action": "hover", "surface": 1, "id": 3}
//! {"action": "click", "surface": 0, "id": 4}
//! {"action": "search", "surface": 0, "query": "label:1"}
//! {"action": "publish", "surface": 3, "key": "attentionData", "value": [0.1, 0.9]}
//! {"action": "receive", "surface": 2, "envelope": {"command": "focusModeSwitch", "data": {...}}}
//! ```
//!
//! Blank lines and lines starting with `#` are skipped.

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ttv_core::{EpochId, Envelope, Reaction, SurfaceId, SurfaceSnapshot, SyncKey};

use crate::backend::PayloadFetch;
use crate::host::Host;

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "action", rename_all = "camelCase")]
pub enum Action {
    Epoch { surface: usize, epoch: EpochId },
    Hover { surface: usize, id: Option<usize> },
    Click { surface: usize, id: usize },
    Search { surface: usize, query: String },
    /// Share a detail property such as `attentionData` with the other surfaces.
    Publish { surface: usize, key: String, value: Value },
    /// Deliver a raw envelope to one surface, as if another surface had sent it.
    Receive { surface: usize, envelope: Envelope },
}

impl Action {
    fn surface(&self) -> usize {
        match self {
            Action::Epoch { surface, .. }
            | Action::Hover { surface, .. }
            | Action::Click { surface, .. }
            | Action::Search { surface, .. }
            | Action::Publish { surface, .. }
            | Action::Receive { surface, .. } => *surface,
        }
    }
}

pub fn parse_script(text: &str) -> Result<Vec<Action>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(i, line)| {
            serde_json::from_str(line).with_context(|| format!("script line {}: invalid action", i + 1))
        })
        .collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplayReport {
    pub actions: usize,
    pub delivered: u64,
    pub surfaces: Vec<SurfaceSnapshot>,
    /// Commands the surfaces addressed to the backend, as sent.
    pub backend_requests: Vec<Value>,
}

/// Run `actions` against `host`. Every epoch switch also warms the
/// neighbouring epochs in the background; those finish before the report.
pub async fn replay<F: PayloadFetch>(host: &mut Host, fetcher: &Arc<F>, actions: &[Action]) -> Result<ReplayReport> {
    let ids: Vec<SurfaceId> = host.surfaces().iter().map(|s| s.id()).collect();
    let mut backend_requests = Vec::new();
    let mut prefetches = Vec::new();
    host.settle(fetcher.as_ref()).await?;

    for (n, action) in actions.iter().enumerate() {
        let Some(&id) = ids.get(action.surface()) else {
            bail!(
                "action {}: no surface {} (host has {})",
                n + 1,
                action.surface(),
                ids.len()
            );
        };
        let publish_key = match action {
            Action::Publish { key, .. } => match SyncKey::parse(key) {
                Some(key) => Some(key),
                None => bail!("action {}: {key:?} is not a shared property", n + 1),
            },
            _ => None,
        };
        tracing::debug!(?action, "replaying");
        let requests = host
            .interact(id, fetcher.as_ref(), |s| match action {
                Action::Epoch { epoch, .. } => s.switch_epoch(*epoch),
                Action::Hover { id, .. } => s.hover(*id),
                Action::Click { id, .. } => s.click(*id),
                Action::Search { query, .. } => s.set_search(query),
                Action::Receive { envelope, .. } => s.handle_envelope(envelope),
                Action::Publish { value, .. } => {
                    if let Some(key) = publish_key {
                        s.publish(key, value.clone());
                    }
                    Reaction::Nothing
                }
            })
            .await?;
        backend_requests.extend(requests.iter().map(|m| m.encode().to_json()));
        if matches!(action, Action::Epoch { .. })
            && let Some(handle) = host.prefetch(id, Arc::clone(fetcher))
        {
            prefetches.push(handle);
        }
    }
    for handle in prefetches {
        match handle.await {
            Ok(warmed) => tracing::debug!(warmed, "prefetch finished"),
            Err(e) => tracing::warn!("prefetch task failed: {e}"),
        }
    }
    host.share_cached().await;

    Ok(ReplayReport {
        actions: actions.len(),
        delivered: host.delivered(),
        surfaces: host.surfaces().iter().map(|s| s.snapshot()).collect(),
        backend_requests,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::SharedEpochCache;
    use serde_json::json;
    use ttv_core::{DatasetMeta, RawEpochPayload, SurfaceRole};

    struct Fixed;

    impl PayloadFetch for Fixed {
        async fn fetch(&self, _epoch: EpochId) -> Result<RawEpochPayload> {
            Ok(RawEpochPayload {
                projection: vec![vec![0.0, 0.0], vec![1.0, 0.0], vec![0.0, 1.0]],
                labels: vec![0, 1, 1],
                original_space_neighbors: vec![vec![1], vec![0], vec![]],
                ..Default::default()
            })
        }
    }

    #[test]
    fn test_parse_script_skips_comments() {
        let script = r#"
            # warm up
            {"action": "epoch", "surface": 0, "epoch": 1}

            {"action": "hover", "surface": 1, "id": null}
        "#;
        let actions = parse_script(script).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Epoch { surface: 0, epoch: 1 },
                Action::Hover { surface: 1, id: None },
            ]
        );
    }

    #[test]
    fn test_parse_script_reports_line() {
        let err = parse_script("{\"action\": \"epoch\", \"surface\": 0, \"epoch\": 1}\n{\"action\": \"jump\"}")
            .unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[tokio::test]
    async fn test_replay_converges_surfaces() {
        let mut host = Host::new(SharedEpochCache::default());
        host.add_surface(SurfaceRole::Plot);
        host.add_surface(SurfaceRole::Tokens);
        let meta = DatasetMeta {
            available_epochs: vec![1, 2],
            ..Default::default()
        };
        host.load_content("/runs/demo", meta).await;

        let actions = vec![
            Action::Epoch { surface: 0, epoch: 1 },
            Action::Click { surface: 1, id: 2 },
            Action::Hover { surface: 0, id: Some(1) },
            Action::Receive {
                surface: 1,
                envelope: Envelope::new(ttv_core::Command::CalculateEvents, json!({"epoch": 1})),
            },
        ];
        let report = replay(&mut host, &Arc::new(Fixed), &actions).await.unwrap();

        assert_eq!(report.actions, 4);
        for snapshot in &report.surfaces {
            assert_eq!(snapshot.epoch, Some(1));
            assert_eq!(snapshot.highlight.hovered_id, Some(1));
            assert_eq!(snapshot.highlight.locked_ids.iter().copied().collect::<Vec<_>>(), vec![2]);
            // Epoch 2 arrives through prefetch.
            assert_eq!(snapshot.cached_epochs, vec![1, 2]);
        }
        assert_eq!(report.backend_requests.len(), 1);
        assert_eq!(report.backend_requests[0]["command"], "calculateEvents");
    }

    #[tokio::test]
    async fn test_replay_publish_reaches_other_surfaces() {
        let mut host = Host::new(SharedEpochCache::default());
        host.add_surface(SurfaceRole::Plot);
        host.add_surface(SurfaceRole::Detail);
        host.load_content("/runs/demo", DatasetMeta::default()).await;

        let actions = parse_script(
            r#"{"action": "publish", "surface": 1, "key": "attentionData", "value": [0.25, 0.75]}"#,
        )
        .unwrap();
        let report = replay(&mut host, &Arc::new(Fixed), &actions).await.unwrap();
        for snapshot in &report.surfaces {
            assert_eq!(snapshot.properties["attentionData"], json!([0.25, 0.75]));
        }

        let bad = [Action::Publish {
            surface: 0,
            key: "cursorColor".into(),
            value: json!("red"),
        }];
        let err = replay(&mut host, &Arc::new(Fixed), &bad).await.unwrap_err();
        assert!(err.to_string().contains("not a shared property"));
    }

    #[tokio::test]
    async fn test_replay_rejects_unknown_surface() {
        let mut host = Host::new(SharedEpochCache::default());
        host.add_surface(SurfaceRole::Plot);
        let err = replay(&mut host, &Arc::new(Fixed), &[Action::Click { surface: 3, id: 0 }])
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no surface 3"));
    }
}
