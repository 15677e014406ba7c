//! Query orchestration: template lookup, validation, clause building, cache,
//! rendering and execution.

use std::sync::Arc;
use std::time::{Duration, Instant};

use arc_swap::ArcSwap;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};

use crate::cache::{CacheLookup, CacheStats, Fingerprint, RenderCache};
use crate::clause::{SortParam, build_group_clause, build_sort_clause};
use crate::error::ServiceError;
use crate::executor::{Executor, Row};
use crate::params::validate;
use crate::registry::{ExternalDefinitions, LoadReport, SampleRequest, TemplateRegistry};
use crate::render::{Binds, render};

/// A request to render (and possibly execute) one business query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderRequest {
    pub biz_type: String,
    pub parameters: Map<String, Value>,
    /// Comma separated GROUP BY fields.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_parameters: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_parameters: Option<Vec<SortParam>>,
}

impl RenderRequest {
    pub fn new(biz_type: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            biz_type: biz_type.into(),
            parameters,
            group_parameters: None,
            sort_parameters: None,
        }
    }

    pub fn with_group(mut self, fields: impl Into<String>) -> Self {
        self.group_parameters = Some(fields.into());
        self
    }

    pub fn with_sort(mut self, sort: Vec<SortParam>) -> Self {
        self.sort_parameters = Some(sort);
        self
    }
}

/// Rendered SQL ready for execution.
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedQuery {
    pub sql: String,
    pub binds: Binds,
    pub cache_hit: bool,
    /// Time spent preparing, including the cache lookup.
    pub render_duration: Duration,
}

/// Result of executing a business query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueryResponse {
    pub data: Vec<Row>,
    pub row_count: usize,
    pub db_execution_time_ms: u64,
    pub template_time_ms: u64,
    pub total_time_ms: u64,
    pub cache_hit: bool,
}

/// Orchestrates rendering and execution of business queries.
///
/// The registry sits behind an [`ArcSwap`] so reads are lock-free and a
/// reload replaces it as a whole.
#[derive(Debug)]
pub struct QueryService {
    registry: ArcSwap<TemplateRegistry>,
    cache: RenderCache,
}

impl QueryService {
    pub fn new(registry: TemplateRegistry, cache: RenderCache) -> Self {
        Self {
            registry: ArcSwap::from_pointee(registry),
            cache,
        }
    }

    /// Current registry snapshot.
    pub fn registry(&self) -> Arc<TemplateRegistry> {
        self.registry.load_full()
    }

    /// Render SQL for a request, serving from the cache when possible.
    pub fn prepare(&self, request: &RenderRequest) -> Result<PreparedQuery, ServiceError> {
        let started = Instant::now();

        // Taken before the registry snapshot: a reload in between must not
        // leave a render from the old registry in the cache.
        let cache_epoch = self.cache.epoch();
        let registry = self.registry.load();

        let template = registry
            .get(&request.biz_type)
            .ok_or_else(|| ServiceError::UnknownBizType(request.biz_type.clone()))?;

        let params = validate(&template, &request.parameters)?;
        let group = build_group_clause(request.group_parameters.as_deref())?;
        let sort = build_sort_clause(request.sort_parameters.as_deref().unwrap_or_default())?;

        let fingerprint = Fingerprint::compute(
            template.biz_type(),
            &params,
            group.as_ref(),
            sort.as_ref(),
        );

        let (result, cache_hit) = match self.cache.lookup(&fingerprint) {
            CacheLookup::Hit(result) => {
                debug!(
                    biz_type = %request.biz_type,
                    fingerprint = %fingerprint.as_str(),
                    "Render cache hit"
                );
                (result, true)
            }
            CacheLookup::Miss { epoch } => {
                let result = render(&template, &params, group.as_ref(), sort.as_ref()).map_err(|e| {
                    error!(biz_type = %request.biz_type, error = %e, "Template render failed");
                    e
                })?;
                if epoch == cache_epoch {
                    self.cache.store(fingerprint, result.clone(), epoch);
                }
                debug!(
                    biz_type = %request.biz_type,
                    render_us = result.render_duration.as_micros() as u64,
                    "Rendered template"
                );
                (result, false)
            }
        };

        Ok(PreparedQuery {
            sql: result.sql,
            binds: result.binds,
            cache_hit,
            render_duration: started.elapsed(),
        })
    }

    /// Prepare a request and run it through `executor`.
    pub async fn execute(
        &self,
        executor: &dyn Executor,
        request: &RenderRequest,
    ) -> Result<QueryResponse, ServiceError> {
        let started = Instant::now();
        let prepared = self.prepare(request)?;

        let db_started = Instant::now();
        let data = executor
            .fetch_rows(&prepared.sql, &prepared.binds)
            .await
            .map_err(|e| {
                error!(biz_type = %request.biz_type, error = %e, "Query execution failed");
                e
            })?;
        let db_execution_time_ms = db_started.elapsed().as_millis() as u64;

        let response = QueryResponse {
            row_count: data.len(),
            data,
            db_execution_time_ms,
            template_time_ms: prepared.render_duration.as_millis() as u64,
            total_time_ms: started.elapsed().as_millis() as u64,
            cache_hit: prepared.cache_hit,
        };

        info!(
            biz_type = %request.biz_type,
            row_count = response.row_count,
            total_time_ms = response.total_time_ms,
            cache_hit = response.cache_hit,
            "Query complete"
        );
        Ok(response)
    }

    /// Business types and their descriptions.
    pub fn list_templates(&self) -> IndexMap<String, String> {
        self.registry.load().list()
    }

    pub fn sample(&self, biz_type: &str) -> Option<SampleRequest> {
        self.registry.load().sample(biz_type)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn clear_cache(&self) {
        self.cache.clear();
        info!("Render cache cleared");
    }

    /// Rebuild the registry from built-ins plus `external`, swap it in and
    /// clear the cache.
    pub fn reload_templates(&self, external: ExternalDefinitions) -> LoadReport {
        let mut registry = TemplateRegistry::builtin();
        let report = registry.load(external);
        if !report.skipped.is_empty() {
            warn!(skipped = ?report.skipped, "Some template definitions were skipped");
        }

        let count = registry.len();
        self.registry.store(Arc::new(registry));
        self.cache.clear();

        info!(templates = count, "Template registry reloaded");
        report
    }
}
