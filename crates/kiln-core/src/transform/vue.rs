//! Vue single-file component adapter.
//!
//! Splits a `.vue` file into its blocks and assembles a component module:
//! the script block is compiled like any other script, the template is
//! attached as the runtime `template` option (compiled in the browser), and
//! each style block is injected as a `<style>` element.

use super::adapter::{AdapterContext, AdapterError, AdapterInput, FrameworkAdapter};
use super::vanilla::{compile, VanillaAdapter};
use super::TransformResult;
use crate::compiler::TranspileSpec;
use async_trait::async_trait;

/// One `<tag attrs>content</tag>` block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SfcBlock {
    pub attrs: String,
    pub content: String,
}

impl SfcBlock {
    /// Value of `name="..."` in the opening tag.
    #[must_use]
    pub fn attr(&self, name: &str) -> Option<&str> {
        let needle = format!("{name}=");
        let start = self.attrs.find(&needle)? + needle.len();
        let rest = &self.attrs[start..];
        let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
        let inner = &rest[1..];
        inner.find(quote).map(|end| &inner[..end])
    }

    /// Whether a bare attribute like `setup` or `scoped` is present.
    #[must_use]
    pub fn has_flag(&self, name: &str) -> bool {
        self.attrs
            .split(|c: char| c.is_whitespace() || c == '=')
            .any(|token| token == name)
    }
}

/// The blocks of a single-file component.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SfcDescriptor {
    pub script: Option<SfcBlock>,
    pub template: Option<SfcBlock>,
    pub styles: Vec<SfcBlock>,
}

fn malformed(reason: impl Into<String>) -> AdapterError {
    AdapterError::Malformed {
        kind: "vue",
        reason: reason.into(),
    }
}

/// Find the block opened by `<tag` at or after `from`.
///
/// Returns the block and the offset just past its closing tag. With
/// `outermost`, the closing tag is the last one in the file, which lets
/// templates contain nested `<template>` elements.
fn find_block(
    source: &str,
    tag: &str,
    from: usize,
    outermost: bool,
) -> Result<Option<(SfcBlock, usize)>, AdapterError> {
    let open = format!("<{tag}");
    let close = format!("</{tag}>");
    let Some(rel_start) = source[from..].find(&open) else {
        return Ok(None);
    };
    let start = from + rel_start;
    let tag_end = source[start..]
        .find('>')
        .map(|i| start + i)
        .ok_or_else(|| malformed(format!("unterminated <{tag}> tag")))?;
    let attrs = source[start + open.len()..tag_end].trim().to_string();
    let body_start = tag_end + 1;
    let close_at = if outermost {
        source[body_start..].rfind(&close)
    } else {
        source[body_start..].find(&close)
    }
    .map(|i| body_start + i)
    .ok_or_else(|| malformed(format!("missing </{tag}>")))?;

    let block = SfcBlock {
        attrs,
        content: source[body_start..close_at].to_string(),
    };
    Ok(Some((block, close_at + close.len())))
}

/// Split a single-file component into blocks.
pub fn parse_sfc(source: &str) -> Result<SfcDescriptor, AdapterError> {
    let script = find_block(source, "script", 0, false)?.map(|(block, _)| block);
    let template = find_block(source, "template", 0, true)?.map(|(block, _)| block);

    let mut styles = Vec::new();
    let mut cursor = 0;
    while let Some((block, next)) = find_block(source, "style", cursor, false)? {
        styles.push(block);
        cursor = next;
    }

    if script.is_none() && template.is_none() {
        return Err(malformed("no <script> or <template> block"));
    }
    Ok(SfcDescriptor {
        script,
        template,
        styles,
    })
}

fn js_string(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

/// Assemble the component module from compiled script code.
fn assemble(
    descriptor: &SfcDescriptor,
    script_code: &str,
    file_id: &str,
    vue2: bool,
) -> String {
    let mut out = String::new();
    if vue2 {
        out.push_str("import Vue from \"vue\";\n");
    }

    match script_code.find("export default") {
        Some(at) => {
            out.push_str(&script_code[..at]);
            out.push_str("const __sfc__ =");
            out.push_str(&script_code[at + "export default".len()..]);
        }
        None => {
            out.push_str(script_code);
            out.push_str("\nconst __sfc__ = {};");
        }
    }
    out.push('\n');

    if let Some(template) = &descriptor.template {
        out.push_str(&format!(
            "__sfc__.template = {};\n",
            js_string(template.content.trim())
        ));
    }

    for style in &descriptor.styles {
        out.push_str(&format!(
            "(() => {{\n  const style = document.createElement('style');\n  style.setAttribute('data-kiln-sfc', {});\n  style.textContent = {};\n  document.head.appendChild(style);\n}})();\n",
            js_string(file_id),
            js_string(&style.content)
        ));
    }

    if vue2 {
        out.push_str("export default Vue.extend(__sfc__);\n");
    } else {
        out.push_str("export default __sfc__;\n");
    }
    out
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VueAdapter;

#[async_trait]
impl FrameworkAdapter for VueAdapter {
    fn name(&self) -> &'static str {
        "vue"
    }

    async fn transform(
        &self,
        cx: &AdapterContext<'_>,
        input: &AdapterInput<'_>,
    ) -> Result<TransformResult, AdapterError> {
        let is_sfc = input
            .path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("vue"));
        if !is_sfc {
            return VanillaAdapter.transform(cx, input).await;
        }

        let descriptor = parse_sfc(input.source)?;

        let script_code = match &descriptor.script {
            Some(script) if script.has_flag("setup") => {
                return Err(AdapterError::Unsupported(
                    "<script setup> needs the Vue SFC compiler".to_string(),
                ));
            }
            Some(script) if matches!(script.attr("lang"), Some("ts" | "tsx")) => {
                let virtual_path = input.path.with_extension("vue.ts");
                compile(TranspileSpec::new(virtual_path), &script.content)
                    .await?
                    .code
            }
            Some(script) => script.content.clone(),
            None => String::new(),
        };

        let vue2 = cx.versions.major("vue").await == Some(2);
        let code = assemble(
            &descriptor,
            &script_code,
            &input.path.display().to_string(),
            vue2,
        );
        Ok(TransformResult {
            code,
            source_map: None,
            dependencies: vec!["vue".to_string()],
        })
    }
}
