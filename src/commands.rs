//! CLI command implementations. Output goes to stdout.

use std::path::Path;

use anyhow::{bail, Context, Result};
use serde_json::{Map, Value};

use api_harness_core::models::Credentials;

use crate::config::Config;
use crate::context::AppContext;
use crate::execution::auto::infer_parameters;
use crate::execution::ExecutionResult;
use crate::inference::InferenceSettings;

/// Parse `key=value` (string) and `key:=json` (raw JSON) arguments.
pub fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>> {
    let mut map = Map::new();
    for pair in pairs {
        if let Some((key, raw)) = pair.split_once(":=") {
            let value: Value = serde_json::from_str(raw)
                .with_context(|| format!("invalid JSON value for '{}'", key))?;
            map.insert(key.to_string(), value);
        } else if let Some((key, value)) = pair.split_once('=') {
            map.insert(key.to_string(), Value::String(value.to_string()));
        } else {
            bail!("expected key=value or key:=json, got '{}'", pair);
        }
        if map.keys().any(|k| k.is_empty()) {
            bail!("empty key in '{}'", pair);
        }
    }
    Ok(map)
}

pub async fn run_analyze(
    config: &Config,
    path: &Path,
    project: &str,
    settings: InferenceSettings,
) -> Result<()> {
    let bytes = std::fs::read(path)
        .with_context(|| format!("Failed to read document: {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".to_string());

    let ctx = AppContext::open(config).await?;
    let ingested = ctx
        .pipeline
        .ingest(project, &filename, None, &bytes, settings)
        .await?;
    println!("document {} ({})", ingested.document.id, ingested.document.mime_type);

    let Some(ticket) = ingested.ticket else {
        bail!(
            "staging failed: {}",
            ingested.document.error_message.unwrap_or_default()
        );
    };
    println!("analyzing...");
    match ticket.wait().await {
        Some(outcome) => println!("status: {}", outcome.status()),
        None => bail!("analysis worker stopped before the job finished"),
    }

    print_catalog(&ctx, &ingested.document.id).await
}

pub async fn run_apis(config: &Config, document_id: &str) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    print_catalog(&ctx, document_id).await
}

async fn print_catalog(ctx: &AppContext, document_id: &str) -> Result<()> {
    let document = ctx
        .store
        .get_document(document_id)
        .await?
        .with_context(|| format!("document not found: {}", document_id))?;
    println!("--- Document {} [{}] ---", document.id, document.status);
    if let Some(err) = &document.error_message {
        println!("error: {}", err);
    }

    let apis = ctx.store.list_document_apis(document_id).await?;
    if apis.is_empty() {
        println!("No APIs discovered.");
        return Ok(());
    }
    for api in apis {
        println!();
        println!("{}  {}", api.id, api.name);
        println!("  base_url:        {}", api.base_url);
        println!("  auth_type:       {}", api.auth_type);
        println!("  auto_executable: {}", api.auto_executable);
        for ep in ctx.store.list_endpoints(&api.id).await? {
            println!(
                "  {:<7} {:<40} {} [{}]",
                ep.method,
                ep.path,
                ep.id,
                ep.category.as_deref().unwrap_or("-")
            );
        }
    }
    Ok(())
}

pub async fn run_configure(config: &Config, api_id: &str, pairs: &[String]) -> Result<()> {
    let credentials = Credentials(parse_pairs(pairs)?);
    if credentials.is_empty() {
        bail!("no credentials given");
    }
    let ctx = AppContext::open(config).await?;
    if ctx.store.get_api(api_id).await?.is_none() {
        bail!("API not found: {}", api_id);
    }
    let saved = ctx.store.upsert_configuration(api_id, &credentials).await?;
    println!(
        "Configuration {} saved for API {} ({} keys, {}).",
        saved.id,
        api_id,
        credentials.0.len(),
        saved.test_status.as_str()
    );
    Ok(())
}

pub async fn run_execute(
    config: &Config,
    api_id: &str,
    endpoint_id: &str,
    params: &[String],
) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let api = ctx
        .store
        .get_api(api_id)
        .await?
        .with_context(|| format!("API not found: {}", api_id))?;
    let endpoint = ctx
        .store
        .get_endpoint(endpoint_id)
        .await?
        .filter(|e| e.api_id == api.id)
        .with_context(|| format!("endpoint {} not found on API {}", endpoint_id, api_id))?;

    let credentials = ctx.effective_credentials(&api).await?;
    let mut parameters = infer_parameters(&endpoint.parameters, &credentials);
    parameters.extend(parse_pairs(params)?);

    let result = ctx
        .engine
        .execute(
            &api,
            &endpoint,
            &credentials,
            parameters,
            ctx.engine.default_trust(),
        )
        .await;
    print_result(&result);
    if let Some(data) = &result.data {
        println!("{}", serde_json::to_string_pretty(data)?);
    }
    Ok(())
}

pub async fn run_auto_execute(config: &Config, api_id: &str) -> Result<()> {
    let ctx = AppContext::open(config).await?;
    let api = ctx
        .store
        .get_api(api_id)
        .await?
        .with_context(|| format!("API not found: {}", api_id))?;
    let credentials = ctx.effective_credentials(&api).await?;

    let report = ctx
        .engine
        .auto_execute(&api, &credentials, ctx.engine.default_trust())
        .await?;
    for result in &report.results {
        print_result(result);
    }
    println!();
    println!(
        "{}/{} endpoints succeeded{}",
        report.summary.succeeded,
        report.summary.total,
        if report.summary.token_acquired {
            " (session token acquired)"
        } else {
            ""
        }
    );
    Ok(())
}

fn print_result(result: &ExecutionResult) {
    let status = result
        .status_code
        .map(|c| c.to_string())
        .unwrap_or_else(|| "---".to_string());
    let verdict = if result.success { "ok" } else { "FAIL" };
    println!(
        "{:<4} {} {:<7} {:<40} {:>6}ms  {}",
        verdict,
        status,
        result.method,
        result.path,
        result.duration_ms,
        result
            .error
            .clone()
            .unwrap_or_else(|| format!("{} records", result.record_count))
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn pairs_accept_strings_and_raw_json() {
        let map = parse_pairs(&[
            "username=007".to_string(),
            "limit:=10".to_string(),
            "token=a=b".to_string(),
        ])
        .unwrap();
        assert_eq!(map["username"], json!("007"));
        assert_eq!(map["limit"], json!(10));
        assert_eq!(map["token"], json!("a=b"));
    }

    #[test]
    fn pairs_reject_malformed_input() {
        assert!(parse_pairs(&["novalue".to_string()]).is_err());
        assert!(parse_pairs(&["=x".to_string()]).is_err());
        assert!(parse_pairs(&["n:={".to_string()]).is_err());
    }
}
