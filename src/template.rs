//! Profile templates.
//!
//! A template is a JSON document whose string values may contain `{{field}}`
//! placeholders. Filling is a pure function of template and answers; how the
//! answers are collected (flags, prompts) is up to the caller.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;

use crate::error::{Error, IoContext, Result};
use crate::paths::Paths;
use crate::profiles::validate_profile_name;

/// Every placeholder name used in `template`, sorted
pub fn template_fields(template: &Value) -> BTreeSet<String> {
    let mut fields = BTreeSet::new();
    visit_strings(template, &mut |s| {
        for field in placeholders(s) {
            fields.insert(field.to_string());
        }
    });
    fields
}

/// Replace every `{{field}}` with its answer
///
/// # Errors
/// `MissingTemplateField` for the first placeholder without an answer.
pub fn fill_template(template: &Value, answers: &BTreeMap<String, String>) -> Result<Value> {
    Ok(match template {
        Value::String(s) => Value::String(fill_str(s, answers)?),
        Value::Array(items) => Value::Array(
            items
                .iter()
                .map(|v| fill_template(v, answers))
                .collect::<Result<_>>()?,
        ),
        Value::Object(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                out.insert(k.clone(), fill_template(v, answers)?);
            }
            Value::Object(out)
        }
        other => other.clone(),
    })
}

fn fill_str(s: &str, answers: &BTreeMap<String, String>) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        let field = rest[start + 2..start + 2 + len].trim();
        let answer = answers
            .get(field)
            .ok_or_else(|| Error::MissingTemplateField(field.to_string()))?;
        out.push_str(&rest[..start]);
        out.push_str(answer);
        rest = &rest[start + 2 + len + 2..];
    }
    out.push_str(rest);
    Ok(out)
}

fn placeholders(s: &str) -> Vec<&str> {
    let mut found = Vec::new();
    let mut rest = s;
    while let Some(start) = rest.find("{{") {
        let Some(len) = rest[start + 2..].find("}}") else {
            break;
        };
        found.push(rest[start + 2..start + 2 + len].trim());
        rest = &rest[start + 2 + len + 2..];
    }
    found
}

fn visit_strings(value: &Value, f: &mut impl FnMut(&str)) {
    match value {
        Value::String(s) => f(s),
        Value::Array(items) => items.iter().for_each(|v| visit_strings(v, &mut *f)),
        Value::Object(map) => map.values().for_each(|v| visit_strings(v, &mut *f)),
        _ => {}
    }
}

/// Load `templates/<name>.json`
pub fn load_template(paths: &Paths, name: &str) -> Result<Value> {
    validate_profile_name(name)?;
    let path = paths.template_file(name);
    let bytes = crate::fs_utils::read_optional(&path)?
        .ok_or_else(|| Error::NotFound(format!("templates/{}", name)))?;
    serde_json::from_slice(&bytes).map_err(|e| Error::invalid_content(&path, e))
}

/// Names of the templates in `templates/`
pub fn list_templates(paths: &Paths) -> Result<Vec<String>> {
    let dir = &paths.templates_dir;
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut names = Vec::new();
    for entry in fs::read_dir(dir).at(dir)? {
        let path = entry.at(dir)?.path();
        if path.extension().and_then(|e| e.to_str()) == Some("json")
            && let Some(stem) = path.file_stem().and_then(|s| s.to_str())
        {
            names.push(stem.to_string());
        }
    }
    names.sort();
    Ok(names)
}
