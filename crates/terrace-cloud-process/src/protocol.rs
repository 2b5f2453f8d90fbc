//! JSON messages exchanged with the provider command
//!
//! One request is written to stdin per spawn:
//!
//! ```json
//! {"operation": "realize", "kind": "azure:resources:ResourceGroup", "id": "rg",
//!  "inputs": {"location": "westeurope"}, "outputs": null, "settings": {}}
//! ```
//!
//! and one response is read from stdout, either `{"outputs": {...}}` or
//! `{"error": "..."}`. An empty stdout is accepted as empty outputs.

use crate::error::{ProcessError, Result};
use serde::{Deserialize, Serialize};
use terrace_cloud::Properties;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operation {
    Realize,
    Invoke,
    Destroy,
    CheckAuth,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Realize => "realize",
            Operation::Invoke => "invoke",
            Operation::Destroy => "destroy",
            Operation::CheckAuth => "check-auth",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Request<'a> {
    pub operation: Operation,
    pub kind: &'a str,
    pub id: &'a str,
    pub inputs: &'a Properties,
    pub outputs: Option<&'a Properties>,
    pub settings: &'a Properties,
}

#[derive(Debug, Default, Deserialize)]
pub struct Response {
    #[serde(default)]
    pub outputs: Option<Properties>,
    #[serde(default)]
    pub error: Option<String>,
}

impl Response {
    pub fn parse(stdout: &str) -> Result<Self> {
        if stdout.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_json::from_str(stdout.trim())
            .map_err(|e| ProcessError::InvalidResponse(format!("{e}: {}", preview(stdout))))
    }

    pub fn into_outputs(self) -> Result<Properties> {
        match self.error {
            Some(message) => Err(ProcessError::Reported(message)),
            None => Ok(self.outputs.unwrap_or_default()),
        }
    }
}

fn preview(text: &str) -> String {
    let text = text.trim();
    match text.char_indices().nth(120) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}
