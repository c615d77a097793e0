//! Network description templates.
//!
//! A description template is a JSON document containing `$NAME$` placeholder
//! tokens drawn from a fixed vocabulary of resolution parameters. Rendering
//! substitutes every placeholder with the value computed by the shape
//! adapter; unknown tokens are rejected so a malformed template fails loudly
//! instead of silently shipping an unparameterized description to the
//! inference engine.
//!
//! The rendered description is materialized to a uniquely named transient
//! file for the duration of one instantiation call, then parsed back into a
//! [`NetworkManifest`].

use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;
use tempfile::NamedTempFile;

use crate::error::ErrorKind;
use crate::shape::ResolutionParams;

/// Recognized placeholder names.
const PLACEHOLDER_KEYS: [&str; 6] = [
    "TARGET_WIDTH",
    "TARGET_HEIGHT",
    "ADAPTED_WIDTH",
    "ADAPTED_HEIGHT",
    "SCALE_WIDTH",
    "SCALE_HEIGHT",
];

fn placeholder_value(key: &str, params: &ResolutionParams) -> Option<String> {
    let value = match key {
        "TARGET_WIDTH" => params.target_width.to_string(),
        "TARGET_HEIGHT" => params.target_height.to_string(),
        "ADAPTED_WIDTH" => params.adapted_width.to_string(),
        "ADAPTED_HEIGHT" => params.adapted_height.to_string(),
        "SCALE_WIDTH" => params.scale_width.to_string(),
        "SCALE_HEIGHT" => params.scale_height.to_string(),
        _ => return None,
    };
    Some(value)
}

/// Substitute every `$NAME$` token in `template` with its computed value.
///
/// An unrecognized token between two `$` delimiters is a configuration
/// error. A lone trailing `$` with no closing delimiter is copied through
/// verbatim.
pub fn render_template(template: &str, params: &ResolutionParams) -> Result<String> {
    let mut result = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find('$') {
        result.push_str(&rest[..start]);
        let after = &rest[start + 1..];

        match after.find('$') {
            Some(end) => {
                let token = &after[..end];
                match placeholder_value(token, params) {
                    Some(value) => result.push_str(&value),
                    None => {
                        return Err(anyhow::Error::new(ErrorKind::Configuration)).with_context(
                            || format!("unknown placeholder '${token}$' in network template"),
                        );
                    }
                }
                rest = &after[end + 1..];
            }
            None => {
                result.push('$');
                rest = after;
            }
        }
    }

    result.push_str(rest);
    Ok(result)
}

/// Concrete network description: what the template becomes once the
/// resolution parameters are substituted in.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct NetworkManifest {
    /// The two frame input slot names, in the order the network binds them.
    pub inputs: Vec<String>,
    /// Name of the flow-prediction output tensor.
    pub flow_output: String,
    pub target_width: u32,
    pub target_height: u32,
    pub adapted_width: u32,
    pub adapted_height: u32,
    pub scale_width: f64,
    pub scale_height: f64,
}

impl NetworkManifest {
    pub fn parse(rendered: &str) -> Result<Self> {
        let manifest: Self = serde_json::from_str(rendered)
            .context(ErrorKind::Configuration)
            .context("rendered network description is not valid JSON")?;

        if manifest.inputs.len() != 2 {
            return Err(anyhow::Error::new(ErrorKind::Configuration)).with_context(|| {
                format!(
                    "network description must declare exactly 2 input slots, found {}",
                    manifest.inputs.len()
                )
            });
        }

        Ok(manifest)
    }
}

/// Render the template at `template_path` and write the concrete description
/// to a uniquely named transient file.
///
/// The returned handle keeps the artifact alive; dropping it removes the
/// file (a failed removal only leaks the temp file).
pub fn materialize(
    template_path: &Path,
    params: &ResolutionParams,
) -> Result<(NamedTempFile, NetworkManifest)> {
    let template = std::fs::read_to_string(template_path)
        .context(ErrorKind::Configuration)
        .with_context(|| {
            format!(
                "cannot read network template: {}",
                template_path.display()
            )
        })?;

    let rendered = render_template(&template, params)?;
    let manifest = NetworkManifest::parse(&rendered)?;

    let mut artifact = tempfile::Builder::new()
        .prefix("flowcap-net-")
        .suffix(".json")
        .tempfile()
        .context("failed to create transient description file")?;
    artifact
        .write_all(rendered.as_bytes())
        .context("failed to write transient description file")?;
    artifact
        .flush()
        .context("failed to flush transient description file")?;

    Ok((artifact, manifest))
}
