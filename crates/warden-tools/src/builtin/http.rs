//! HTTP fetch tool.

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};

use warden_types::{ExecutionContext, Permission};

use crate::builtin::MAX_OUTPUT_BYTES;
use crate::definition::ToolDefinition;
use crate::schema::Schema;

/// `http.fetch` -- GET a URL and return the response body.
///
/// The `url` argument is what the policy layer's domain allow-list is
/// matched against before this tool is ever dispatched.
pub struct HttpFetchTool;

#[async_trait::async_trait]
impl ToolDefinition for HttpFetchTool {
    fn name(&self) -> &str {
        "http.fetch"
    }

    fn category(&self) -> &str {
        "network"
    }

    fn description(&self) -> &str {
        "Fetch a URL over HTTP GET and return status and body"
    }

    fn input_schema(&self) -> Schema {
        Schema::object().required("url", Schema::string("Absolute http(s) URL"))
    }

    fn output_schema(&self) -> Schema {
        Schema::object()
            .required("status", Schema::integer("HTTP status code"))
            .required("body", Schema::string("Response body (truncated)"))
    }

    fn required_permissions(&self) -> Vec<Permission> {
        vec![Permission::Network]
    }

    async fn execute(&self, input: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let url = input["url"].as_str().unwrap_or_default();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            bail!("url must be absolute http(s): {url}");
        }

        let response = reqwest::get(url)
            .await
            .with_context(|| format!("request failed: {url}"))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .with_context(|| format!("failed to read response body: {url}"))?;

        let body = if body.len() > MAX_OUTPUT_BYTES {
            body[..MAX_OUTPUT_BYTES].to_string()
        } else {
            body
        };

        Ok(json!({ "status": status, "body": body }))
    }
}
