//! Text Template Engine
//!
//! Small text template dialect used for endpoint URLs, headers and payloads.
//! Templates reference fields of a JSON value tree (`{{ .Subject.ID }}`) and
//! may pipe the resolved value through built-in functions
//! (`{{ .Token | urlenc }}`). Templates are parsed eagerly so that
//! misconfiguration surfaces at load time, before the first request.

// Layer 1: Standard library imports
use std::fmt;

// Layer 2: Third-party crate imports
use serde_json::Value;

// Layer 3: Internal module imports
use crate::error::{PipelineError, PipelineResult};

mod functions;

use functions::PipeFunction;

/// A compiled text template
#[derive(Clone)]
pub struct Template {
    source: String,
    segments: Vec<Segment>,
}

#[derive(Clone)]
enum Segment {
    Literal(String),
    Expression {
        path: Vec<String>,
        pipes: Vec<(&'static str, PipeFunction)>,
    },
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Template")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

impl Template {
    /// Parse a template source
    ///
    /// Fails with a template error on unbalanced markers, malformed field
    /// paths or unknown pipe functions.
    pub fn new(source: &str) -> PipelineResult<Self> {
        let mut segments = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find("{{") {
            if !rest[..start].is_empty() {
                segments.push(Segment::Literal(rest[..start].to_string()));
            }

            let after = &rest[start + 2..];
            let end = after.find("}}").ok_or_else(|| {
                PipelineError::template(format!(
                    "failed to create template: unbalanced '{{{{' in {source:?}"
                ))
            })?;

            segments.push(Self::parse_expression(source, after[..end].trim())?);
            rest = &after[end + 2..];
        }

        if rest.contains("}}") {
            return Err(PipelineError::template(format!(
                "failed to create template: unbalanced '}}}}' in {source:?}"
            )));
        }

        if !rest.is_empty() {
            segments.push(Segment::Literal(rest.to_string()));
        }

        Ok(Self {
            source: source.to_string(),
            segments,
        })
    }

    fn parse_expression(source: &str, expr: &str) -> PipelineResult<Segment> {
        let mut parts = expr.split('|').map(str::trim);

        let field = parts.next().unwrap_or_default();
        let path = Self::parse_field_path(source, field)?;

        let mut pipes = Vec::new();
        for name in parts {
            let function = functions::lookup(name).ok_or_else(|| {
                PipelineError::template(format!(
                    "failed to create template: unknown function {name:?} in {source:?}"
                ))
            })?;
            pipes.push((function.0, function.1));
        }

        Ok(Segment::Expression { path, pipes })
    }

    fn parse_field_path(source: &str, field: &str) -> PipelineResult<Vec<String>> {
        let stripped = field.strip_prefix('.').ok_or_else(|| {
            PipelineError::template(format!(
                "failed to create template: expected field access starting with '.', got {field:?} in {source:?}"
            ))
        })?;

        // `{{ . }}` renders the root value
        if stripped.is_empty() {
            return Ok(Vec::new());
        }

        let mut path = Vec::new();
        for segment in stripped.split('.') {
            if segment.is_empty()
                || !segment
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
            {
                return Err(PipelineError::template(format!(
                    "failed to create template: invalid field path {field:?} in {source:?}"
                )));
            }
            path.push(segment.to_string());
        }

        Ok(path)
    }

    /// Render the template against a JSON value tree
    pub fn render(&self, values: &Value) -> PipelineResult<String> {
        let mut out = String::new();

        for segment in &self.segments {
            match segment {
                Segment::Literal(text) => out.push_str(text),
                Segment::Expression { path, pipes } => {
                    let mut value = self.resolve(values, path)?.clone();
                    for (name, pipe) in pipes {
                        value = pipe(value).map_err(|reason| {
                            PipelineError::template(format!(
                                "failed to render template {:?}: function {name:?}: {reason}",
                                self.source
                            ))
                        })?;
                    }
                    out.push_str(&stringify(&value));
                }
            }
        }

        Ok(out)
    }

    fn resolve<'a>(&self, values: &'a Value, path: &[String]) -> PipelineResult<&'a Value> {
        let mut current = values;
        for segment in path {
            current = current.get(segment).ok_or_else(|| {
                PipelineError::template(format!(
                    "failed to render template {:?}: no value for field {segment:?}",
                    self.source
                ))
            })?;
        }
        Ok(current)
    }

    /// The original template source
    pub fn source(&self) -> &str {
        &self.source
    }

    /// Check whether a string still contains template markers
    pub fn has_markers(s: &str) -> bool {
        s.contains("{{")
    }
}

fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_plain_text_renders_unchanged() {
        let template = Template::new("https://foo.bar/jwks").unwrap();
        assert_eq!(
            template.render(&json!({})).unwrap(),
            "https://foo.bar/jwks"
        );
    }

    #[test]
    fn test_field_access() {
        let template = Template::new("https://foo.bar/{{ .Foo }}").unwrap();
        let rendered = template.render(&json!({"Foo": "bar"})).unwrap();
        assert_eq!(rendered, "https://foo.bar/bar");
    }

    #[test]
    fn test_nested_field_access() {
        let template = Template::new("{{ .Subject.ID }}").unwrap();
        let rendered = template
            .render(&json!({"Subject": {"ID": "anonymous"}}))
            .unwrap();
        assert_eq!(rendered, "anonymous");
    }

    #[test]
    fn test_pipe_functions_are_applied_in_order() {
        let template = Template::new("{{ .Name | upper | urlenc }}").unwrap();
        let rendered = template.render(&json!({"Name": "foo bar"})).unwrap();
        assert_eq!(rendered, "FOO%20BAR");
    }

    #[test]
    fn test_json_pipe_serializes_value() {
        let template = Template::new("{{ .Attrs | json }}").unwrap();
        let rendered = template
            .render(&json!({"Attrs": {"a": 1, "b": true}}))
            .unwrap();
        assert_eq!(rendered, r#"{"a":1,"b":true}"#);
    }

    #[test]
    fn test_b64_roundtrip() {
        let encode = Template::new("{{ .V | b64enc }}").unwrap();
        let encoded = encode.render(&json!({"V": "foo:bar"})).unwrap();

        let decode = Template::new("{{ .V | b64dec }}").unwrap();
        let decoded = decode.render(&json!({ "V": encoded })).unwrap();
        assert_eq!(decoded, "foo:bar");
    }

    #[test]
    fn test_missing_opening_dot_is_a_parse_error() {
        let err = Template::new("{{ Foo }}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Template);
        assert!(err.message().contains("failed to create template"));
    }

    #[test]
    fn test_unbalanced_markers_are_a_parse_error() {
        let err = Template::new("https://foo.bar/{{ .Foo }").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Template);
    }

    #[test]
    fn test_unknown_function_is_a_parse_error() {
        let err = Template::new("{{ .Foo | nope }}").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Template);
        assert!(err.message().contains("nope"));
    }

    #[test]
    fn test_missing_field_is_a_render_error() {
        let template = Template::new("{{ .Foo }}").unwrap();
        let err = template.render(&json!({"Bar": 1})).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Template);
        assert!(err.message().contains("Foo"));
    }

    #[test]
    fn test_marker_detection() {
        assert!(Template::has_markers("https://foo.bar/jwks/{{ .Foo }}"));
        assert!(!Template::has_markers("https://foo.bar/jwks"));
    }
}
