use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use tracing::{debug, error, info, warn};

use crate::engine::panel::{DashboardGroup, PanelDescriptor};
use crate::error::Result;
use crate::range::DateRange;
use crate::store::DataStore;

const RANGE_PLACEHOLDER: &str = "range(start: v.timeRangeStart, stop:v.timeRangeStop)";
const DEFAULT_WINDOW: &str = "aggregateWindow(every: 10s, fn: last)";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

// ======================================================
// CLIENT
// ======================================================

/// Status and body of one HTTP exchange.
#[derive(Debug, Clone)]
pub struct Reply {
    pub status: u16,
    pub body:   String,
}

impl Reply {
    /// The query endpoint answers 400 for queries that ran with warnings;
    /// the body is still a result document.
    pub fn is_usable_query(&self) -> bool {
        self.status == 200 || self.status == 400
    }
}

#[async_trait]
pub trait MetricsClient: Send + Sync {
    async fn get(&self, path: &str) -> Result<Reply>;
    async fn post(&self, path: &str, body: &Value) -> Result<Reply>;
}

/// Grafana HTTP API with bearer-token auth.
pub struct GrafanaHttp {
    client:   Client,
    base_url: String,
    token:    String,
}

impl GrafanaHttp {
    pub fn new(base_url: &str, token: &str) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(GrafanaHttp {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token: token.to_string(),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

#[async_trait]
impl MetricsClient for GrafanaHttp {
    async fn get(&self, path: &str) -> Result<Reply> {
        let res = self
            .client
            .get(self.url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .send()
            .await?;
        let status = res.status().as_u16();
        Ok(Reply { status, body: res.text().await? })
    }

    async fn post(&self, path: &str, body: &Value) -> Result<Reply> {
        let res = self
            .client
            .post(self.url(path))
            .bearer_auth(&self.token)
            .header("Accept", "application/json")
            .json(body)
            .send()
            .await?;
        let status = res.status().as_u16();
        Ok(Reply { status, body: res.text().await? })
    }
}

// ======================================================
// QUERY TEMPLATING
// ======================================================

/// Put the report range into a panel query. Non-binary panels of a day
/// window also get an aggregation window sized to the range.
pub fn template_query(query: &str, range: &DateRange, binary: bool) -> String {
    let concrete = format!(
        "range(start: {}, stop:{})",
        range.start_query(),
        range.end_query()
    );
    let mut out = query.replace(RANGE_PLACEHOLDER, &concrete);

    if let (Some(minutes), false) = (range.aggregate_minutes(), binary) {
        out = out.replace(
            DEFAULT_WINDOW,
            &format!("aggregateWindow(every: {}m, fn: last)", minutes),
        );
    }
    out
}

/// Panel `id` of a dashboard document, looking inside row panels too.
pub fn find_panel(dashboard: &Value, id: u64) -> Option<&Value> {
    fn search(panels: &[Value], id: u64) -> Option<&Value> {
        for panel in panels {
            if panel.get("id").and_then(Value::as_u64) == Some(id) {
                return Some(panel);
            }
            if let Some(nested) = panel.get("panels").and_then(Value::as_array) {
                if let Some(found) = search(nested, id) {
                    return Some(found);
                }
            }
        }
        None
    }

    let panels = dashboard.get("dashboard")?.get("panels")?.as_array()?;
    search(panels, id)
}

/// The `{"queries": [...]}` body for a panel, or `None` when the panel has
/// no datasource or no targets.
pub fn build_query(panel_json: &Value, panel: &PanelDescriptor, range: &DateRange) -> Option<Value> {
    let has_datasource = panel_json
        .get("datasource")
        .map_or(false, |d| !d.is_null());
    let targets = panel_json.get("targets").and_then(Value::as_array)?;
    if !has_datasource || targets.is_empty() {
        return None;
    }

    let queries: Vec<Value> = targets
        .iter()
        .cloned()
        .map(|mut target| {
            if let Some(query) = target.get("query").and_then(Value::as_str) {
                let templated = template_query(query, range, panel.is_binary);
                target["query"] = Value::String(templated);
            }
            target
        })
        .collect();

    Some(json!({ "queries": queries }))
}

// ======================================================
// FETCH
// ======================================================

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FetchSummary {
    pub saved:   usize,
    pub skipped: usize,
}

/// Fetch every panel of `group` and save the raw responses. Failures are
/// logged per panel; the panel is then rendered from an empty dataset.
/// Files left by an earlier run are removed before each panel is queried.
pub async fn fetch_group<C: MetricsClient + ?Sized>(
    client: &C,
    store:  &DataStore,
    group:  &DashboardGroup,
    range:  &DateRange,
) -> Result<FetchSummary> {
    let mut summary = FetchSummary::default();

    let dashboard = match dashboard_document(client, group).await {
        Some(dashboard) => dashboard,
        None => {
            for panel in &group.panels {
                clear_previous(store, group, panel);
            }
            summary.skipped = group.panels.len();
            return Ok(summary);
        }
    };

    for panel in &group.panels {
        clear_previous(store, group, panel);

        let Some(panel_json) = find_panel(&dashboard, panel.id) else {
            warn!(dashboard = %group.uid, panel = panel.id, "panel not found in dashboard");
            summary.skipped += 1;
            continue;
        };

        let Some(body) = build_query(panel_json, panel, range) else {
            warn!(panel = %panel.name, "panel has no datasource or queries");
            summary.skipped += 1;
            continue;
        };
        debug!(panel = %panel.name, body = %body, "querying datasource");

        let reply = match client.post("/api/ds/query", &body).await {
            Ok(reply) => reply,
            Err(e) => {
                error!(panel = %panel.name, error = %e, "query request failed");
                summary.skipped += 1;
                continue;
            }
        };
        if !reply.is_usable_query() {
            error!(panel = %panel.name, status = reply.status, body = %reply.body, "query failed");
            summary.skipped += 1;
            continue;
        }

        if let Err(e) = store.save_json(group, panel, &reply.body) {
            error!(panel = %panel.name, error = %e, "could not save query response");
            summary.skipped += 1;
            continue;
        }
        summary.saved += 1;
    }

    info!(
        group = %group.key,
        saved = summary.saved,
        skipped = summary.skipped,
        "dashboard fetched"
    );
    Ok(summary)
}

/// The dashboard document of `group`, or `None` after logging why it could
/// not be had.
async fn dashboard_document<C: MetricsClient + ?Sized>(client: &C, group: &DashboardGroup) -> Option<Value> {
    let reply = match client.get(&format!("/api/dashboards/uid/{}", group.uid)).await {
        Ok(reply) => reply,
        Err(e) => {
            error!(dashboard = %group.uid, error = %e, "dashboard request failed");
            return None;
        }
    };
    if reply.status != 200 {
        error!(dashboard = %group.uid, status = reply.status, "dashboard metadata unavailable");
        return None;
    }
    match serde_json::from_str(&reply.body) {
        Ok(dashboard) => Some(dashboard),
        Err(e) => {
            error!(dashboard = %group.uid, error = %e, "dashboard metadata is not valid JSON");
            None
        }
    }
}

fn clear_previous(store: &DataStore, group: &DashboardGroup, panel: &PanelDescriptor) {
    if let Err(e) = store.clear_panel(group, panel) {
        warn!(panel = %panel.name, error = %e, "could not remove previous panel data");
    }
}

// ======================================================
// TESTS
// ======================================================
