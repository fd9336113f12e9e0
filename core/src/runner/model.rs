use std::fmt;

use chrono::{DateTime, Utc};
use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use super::headers::parse_header_text;
use crate::capture::Header;

/// Ordered request headers of a template.
///
/// Accepts a flat JSON object (`{"Accept": "*/*"}`), line-delimited
/// `Name: Value` text, or a list of `{name, value}` pairs. Always serializes
/// as a flat object in stored order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TemplateHeaders(pub Vec<Header>);

impl TemplateHeaders {
    pub fn as_slice(&self) -> &[Header] {
        &self.0
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self(pairs.into_iter().map(|(k, v)| Header::new(k, v)).collect())
    }
}

impl Serialize for TemplateHeaders {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for h in &self.0 {
            map.serialize_entry(&h.name, &h.value)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TemplateHeaders {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct HeadersVisitor;

        impl<'de> Visitor<'de> for HeadersVisitor {
            type Value = TemplateHeaders;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a header map, `Name: Value` lines, or a list of name/value pairs")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                Ok(TemplateHeaders(parse_header_text(v)))
            }

            fn visit_unit<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(TemplateHeaders::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<Self::Value, E> {
                Ok(TemplateHeaders::default())
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::with_capacity(access.size_hint().unwrap_or(0));
                while let Some((name, value)) = access.next_entry::<String, serde_json::Value>()? {
                    let value = match value {
                        serde_json::Value::String(s) => s,
                        serde_json::Value::Null => String::new(),
                        other => other.to_string(),
                    };
                    out.push(Header::new(name, value));
                }
                Ok(TemplateHeaders(out))
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
                let mut out = Vec::new();
                while let Some(h) = access.next_element::<Header>()? {
                    out.push(h);
                }
                Ok(TemplateHeaders(out))
            }
        }

        deserializer.deserialize_any(HeadersVisitor)
    }
}

/// A request to replay.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayTemplate {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: TemplateHeaders,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

fn default_method() -> String {
    "GET".to_string()
}

impl ReplayTemplate {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: TemplateHeaders::default(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    #[default]
    Sequential,
    Parallel,
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    #[serde(default)]
    pub mode: ExecutionMode,
    #[serde(default)]
    pub inter_request_delay_ms: u64,
    #[serde(default = "default_follow_redirects")]
    pub follow_redirects: bool,
    /// When set, only statuses in `200..400` count as success.
    #[serde(default)]
    pub validate_status_range: bool,
    #[serde(default)]
    pub header_overrides: TemplateHeaders,
    #[serde(default)]
    pub use_variable_substitution: bool,
}

fn default_follow_redirects() -> bool {
    true
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            mode: ExecutionMode::Sequential,
            inter_request_delay_ms: 0,
            follow_redirects: default_follow_redirects(),
            validate_status_range: false,
            header_overrides: TemplateHeaders::default(),
            use_variable_substitution: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunnerCollection {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub templates: Vec<ReplayTemplate>,
    #[serde(default)]
    pub execution_config: ExecutionConfig,
    #[serde(default)]
    pub run_count: u64,
    #[serde(default)]
    pub last_run_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl RunnerCollection {
    pub fn new(name: impl Into<String>, templates: Vec<ReplayTemplate>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            description: String::new(),
            templates,
            execution_config: ExecutionConfig::default(),
            run_count: 0,
            last_run_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_run(&mut self, at: DateTime<Utc>) {
        self.run_count += 1;
        self.last_run_at = Some(at);
    }

    /// Takes the editable fields from `edited`. Counters and `created_at`
    /// stay as they are.
    pub fn apply_edit(&mut self, edited: RunnerCollection, at: DateTime<Utc>) {
        self.name = edited.name;
        self.description = edited.description;
        self.templates = edited.templates;
        self.execution_config = edited.execution_config;
        self.updated_at = at;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of replaying one template. `status` is 0 when the transport
/// failed before any response arrived.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayOutcome {
    pub index: usize,
    pub url: String,
    pub method: String,
    pub status: u16,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default)]
    pub size_bytes: Option<u64>,
    #[serde(default)]
    pub response_headers: Vec<Header>,
    #[serde(default)]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
}

impl ReplayOutcome {
    pub fn failed(index: usize, template: &ReplayTemplate, error: impl Into<String>) -> Self {
        Self {
            index,
            url: template.url.clone(),
            method: template.method.clone(),
            status: 0,
            success: false,
            duration_ms: 0,
            size_bytes: None,
            response_headers: Vec::new(),
            error: Some(error.into()),
            started_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunExecution {
    pub id: String,
    #[serde(default)]
    pub collection_id: Option<String>,
    pub mode: ExecutionMode,
    pub status: RunStatus,
    pub total: usize,
    pub completed: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// One entry per attempted template, in template order.
    #[serde(default)]
    pub results: Vec<ReplayOutcome>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub ended_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_headers_accept_map_text_and_list() {
        let from_map: ReplayTemplate = serde_json::from_str(
            r#"{"url":"https://a.test/","headers":{"Accept":"*/*","X-Retry":3}}"#,
        )
        .unwrap();
        assert_eq!(
            from_map.headers,
            TemplateHeaders::from_pairs([("Accept", "*/*"), ("X-Retry", "3")])
        );

        let from_text: ReplayTemplate = serde_json::from_str(
            r#"{"url":"https://a.test/","headers":"Accept: */*\nAuthorization: Bearer a:b\n\n"}"#,
        )
        .unwrap();
        assert_eq!(
            from_text.headers,
            TemplateHeaders::from_pairs([("Accept", "*/*"), ("Authorization", "Bearer a:b")])
        );

        let from_list: ReplayTemplate = serde_json::from_str(
            r#"{"url":"https://a.test/","headers":[{"name":"Accept","value":"*/*"}]}"#,
        )
        .unwrap();
        assert_eq!(from_list.headers, TemplateHeaders::from_pairs([("Accept", "*/*")]));
    }

    #[test]
    fn test_headers_serialize_as_map_in_order() {
        let headers = TemplateHeaders::from_pairs([("Z-Last", "1"), ("A-First", "2")]);
        assert_eq!(
            serde_json::to_string(&headers).unwrap(),
            r#"{"Z-Last":"1","A-First":"2"}"#
        );
    }

    #[test]
    fn test_template_defaults() {
        let t: ReplayTemplate = serde_json::from_str(r#"{"url":"https://a.test/"}"#).unwrap();
        assert_eq!(t.method, "GET");
        assert!(t.headers.as_slice().is_empty());
        assert!(t.body.is_none());

        let cfg: ExecutionConfig = serde_json::from_str("{}").unwrap();
        assert!(cfg.follow_redirects);
        assert_eq!(cfg.mode, ExecutionMode::Sequential);
    }
}
