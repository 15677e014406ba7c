//! Template registry: the business-type → template lookup table.
//!
//! The registry is built once at startup from the built-in definitions,
//! optionally merged with externally supplied definitions, and then treated as
//! immutable. Reloading builds a new registry and swaps it in as a whole (see
//! [`crate::service::QueryService::reload_templates`]).

use std::path::Path;
use std::sync::Arc;

use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::builtin;
use crate::params::ParamType;
use crate::template::{Template, TemplateDefinition, TemplateError};

/// Errors reading an external definitions file.
#[derive(Debug, Error)]
pub enum DefinitionsError {
    #[error("Failed to read template definitions from {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Template definitions in {path} are not a JSON object of business types: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Raw external definitions keyed by business type.
///
/// Values stay untyped so one malformed entry can be skipped without
/// discarding the rest.
pub type ExternalDefinitions = IndexMap<String, Value>;

/// Read external definitions from a JSON file.
///
/// A missing file yields an empty set.
pub fn load_definitions_file(
    path: impl AsRef<Path>,
) -> Result<ExternalDefinitions, DefinitionsError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            info!(path = %shown, "No external template definitions file");
            return Ok(ExternalDefinitions::new());
        }
        Err(source) => {
            return Err(DefinitionsError::Io {
                path: shown,
                source,
            });
        }
    };

    serde_json::from_str(&content).map_err(|source| DefinitionsError::Parse {
        path: shown,
        source,
    })
}

/// Outcome of merging external definitions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    /// New business types added.
    pub loaded: Vec<String>,
    /// Business types whose existing template was replaced.
    pub overridden: Vec<String>,
    /// Business types skipped because their definition was malformed.
    pub skipped: Vec<String>,
}

/// Sample request for a business type, for API discovery.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SampleRequest {
    pub biz_type: String,
    pub parameters: IndexMap<String, Value>,
    pub description: String,
    pub required_params: Vec<String>,
    pub optional_params: Vec<String>,
}

/// Registry of templates by business type.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: IndexMap<String, Arc<Template>>,
}

impl TemplateRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry holding the built-in templates.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (biz_type, definition) in builtin::definitions() {
            if let Err(e) = registry.register(biz_type, definition) {
                error!(biz_type, error = %e, "Built-in template is invalid, skipping");
            }
        }
        registry
    }

    /// Register a template, replacing any existing one for the same business type.
    ///
    /// Returns the replaced template, if any.
    pub fn register(
        &mut self,
        biz_type: impl Into<String>,
        definition: TemplateDefinition,
    ) -> Result<Option<Arc<Template>>, TemplateError> {
        let biz_type = biz_type.into();
        let template = Template::new(biz_type.clone(), definition)?;
        Ok(self.templates.insert(biz_type, Arc::new(template)))
    }

    /// Merge external definitions into the registry.
    ///
    /// External definitions win on collision. Malformed entries are skipped
    /// with a warning.
    pub fn load(&mut self, external: ExternalDefinitions) -> LoadReport {
        let mut report = LoadReport::default();

        for (biz_type, raw) in external {
            let definition = match serde_json::from_value::<TemplateDefinition>(raw) {
                Ok(definition) => definition,
                Err(e) => {
                    warn!(
                        biz_type = %biz_type,
                        error = %e,
                        "Skipping malformed template definition"
                    );
                    report.skipped.push(biz_type);
                    continue;
                }
            };

            match self.register(biz_type.clone(), definition) {
                Ok(Some(_)) => {
                    info!(biz_type = %biz_type, "External template overrides existing definition");
                    report.overridden.push(biz_type);
                }
                Ok(None) => {
                    info!(biz_type = %biz_type, "Loaded external template");
                    report.loaded.push(biz_type);
                }
                Err(e) => {
                    warn!(biz_type = %biz_type, error = %e, "Skipping invalid template definition");
                    report.skipped.push(biz_type);
                }
            }
        }

        info!(
            loaded = report.loaded.len(),
            overridden = report.overridden.len(),
            skipped = report.skipped.len(),
            "External template definitions merged"
        );
        report
    }

    pub fn get(&self, biz_type: &str) -> Option<Arc<Template>> {
        self.templates.get(biz_type).cloned()
    }

    pub fn contains(&self, biz_type: &str) -> bool {
        self.templates.contains_key(biz_type)
    }

    /// Business types and their descriptions, in registration order.
    pub fn list(&self) -> IndexMap<String, String> {
        self.templates
            .iter()
            .map(|(k, t)| (k.clone(), t.description().to_string()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Build a sample request: every required parameter plus the first optional one.
    pub fn sample(&self, biz_type: &str) -> Option<SampleRequest> {
        let template = self.templates.get(biz_type)?;

        let mut parameters = IndexMap::new();
        for name in template.required() {
            parameters.insert(name.clone(), required_sample(template.param_type(name)));
        }
        if let Some(name) = template.optional().first() {
            parameters.insert(name.clone(), optional_sample(template.param_type(name)));
        }

        Some(SampleRequest {
            biz_type: biz_type.to_string(),
            parameters,
            description: template.description().to_string(),
            required_params: template.required().to_vec(),
            optional_params: template.optional().to_vec(),
        })
    }
}

fn required_sample(param_type: ParamType) -> Value {
    match param_type {
        ParamType::Integer => Value::from(1),
        ParamType::Date => Value::from("2023-01-01"),
        ParamType::Boolean => Value::Bool(true),
        ParamType::Float => Value::from(1.0),
        ParamType::String => Value::from("sample_value"),
    }
}

fn optional_sample(param_type: ParamType) -> Value {
    match param_type {
        ParamType::Integer => Value::from(100),
        ParamType::Date => Value::from("2023-12-31"),
        ParamType::Boolean => Value::Bool(true),
        ParamType::Float => Value::from(10.5),
        ParamType::String => Value::from("optional_value"),
    }
}
