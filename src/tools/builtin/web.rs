//! Web tools
//!
//! `fetch_url` retrieves a page over HTTP. Text and JSON bodies are returned
//! (truncated for the model); other content is summarized by size.

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::header::CONTENT_TYPE;
use schemars::JsonSchema;
use serde::Deserialize;

use super::truncate_chars;
use crate::tools::descriptor::ToolDescriptor;
use crate::tools::registry::ToolError;

/// Longest text body handed back to the model
const MAX_TEXT_CHARS: usize = 5000;

/// Longest error body quoted in an HTTP error
const MAX_ERROR_CHARS: usize = 200;

const FETCH_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize, JsonSchema)]
pub struct FetchUrlArgs {
    /// URL to fetch
    pub url: String,
    /// HTTP method, GET or POST (default: GET)
    pub method: Option<String>,
}

/// Descriptors for `fetch_url`, using a client with a 30 second timeout
pub fn web_tools() -> Result<Vec<ToolDescriptor>, ToolError> {
    let client = reqwest::Client::builder()
        .timeout(FETCH_TIMEOUT)
        .user_agent(concat!("agentflow/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| ToolError::InvalidDefinition(format!("building HTTP client: {}", e)))?;

    Ok(vec![fetch_url_tool(client)?])
}

/// `fetch_url` backed by the given client
pub fn fetch_url_tool(client: reqwest::Client) -> Result<ToolDescriptor, ToolError> {
    ToolDescriptor::from_typed_async(
        "fetch_url",
        "Fetch content from a URL",
        move |args: FetchUrlArgs| fetch_url(client.clone(), args),
    )
}

async fn fetch_url(client: reqwest::Client, args: FetchUrlArgs) -> anyhow::Result<String> {
    let method = args
        .method
        .as_deref()
        .unwrap_or("GET")
        .to_ascii_uppercase();
    let request = match method.as_str() {
        "GET" => client.get(&args.url),
        "POST" => client.post(&args.url),
        other => bail!("unsupported HTTP method '{}'", other),
    };

    let response = request
        .send()
        .await
        .with_context(|| format!("requesting {}", args.url))?;
    let status = response.status();
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();
    let body = response
        .bytes()
        .await
        .with_context(|| format!("reading response from {}", args.url))?;

    if !status.is_success() {
        let text = String::from_utf8_lossy(&body);
        let (quoted, _) = truncate_chars(&text, MAX_ERROR_CHARS);
        bail!("HTTP error {}: {}", status.as_u16(), quoted);
    }

    let header = format!("Status: {}\nContent-Type: {}", status.as_u16(), content_type);
    if !(content_type.contains("application/json") || content_type.contains("text/")) {
        return Ok(format!("{}\nContent length: {} bytes", header, body.len()));
    }

    let text = String::from_utf8_lossy(&body);
    let (kept, truncated) = truncate_chars(&text, MAX_TEXT_CHARS);
    let mut output = format!("{}\n\n{}", header, kept);
    if truncated {
        output.push_str(&format!(
            "\n\n... (truncated, total length: {} chars)",
            text.chars().count()
        ));
    }
    Ok(output)
}
