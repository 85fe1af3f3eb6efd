//! Host option store and per-event option evaluation
//!
//! The host hands the sink a flat `key -> string` option map. Static options are
//! read once at init; dynamic options are compiled into a cached evaluator
//! closure and re-evaluated for every event against a [`DynamicContext`].
//!
//! Dynamic values use the host template syntax `{{attribute}}`, optionally mixed
//! with literal text (`sensors/{{room}}/temperature`).

use crate::config::ConfigError;
use crate::event::{AttributeValue, Event};
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

static TEMPLATE_REFERENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\{\{\s*([^{}\s]+)\s*\}\}").expect("valid regex"));

/// Per-event evaluation context: attribute bindings of the current event
#[derive(Debug, Clone, Copy)]
pub struct DynamicContext<'a> {
    bindings: &'a Event,
}

impl<'a> DynamicContext<'a> {
    pub fn new(bindings: &'a Event) -> Self {
        Self { bindings }
    }

    /// Context for payloads that are not mappings; every lookup misses
    pub fn empty() -> DynamicContext<'static> {
        static EMPTY: Event = Event::new();
        DynamicContext { bindings: &EMPTY }
    }

    pub fn get(&self, attribute: &str) -> Option<&'a AttributeValue> {
        self.bindings.get(attribute)
    }
}

type Evaluator = dyn Fn(&DynamicContext<'_>) -> Option<String> + Send + Sync;

/// A cached option handle that yields its value for a given event
#[derive(Clone)]
pub struct DynamicOption {
    key: String,
    raw: String,
    default: String,
    evaluator: Arc<Evaluator>,
}

impl DynamicOption {
    /// Compile an option value in host template syntax
    pub fn from_template(
        key: impl Into<String>,
        raw: impl Into<String>,
        default: impl Into<String>,
    ) -> Self {
        let raw = raw.into();
        let segments = TemplateSegment::parse(&raw);
        let evaluator: Arc<Evaluator> = if segments
            .iter()
            .all(|s| matches!(s, TemplateSegment::Literal(_)))
        {
            let literal = raw.clone();
            Arc::new(move |_ctx: &DynamicContext<'_>| Some(literal.clone()))
        } else {
            Arc::new(move |ctx: &DynamicContext<'_>| TemplateSegment::render(&segments, ctx))
        };

        Self {
            key: key.into(),
            raw,
            default: default.into(),
            evaluator,
        }
    }

    /// Wrap a host-supplied evaluator; `None` from the closure selects the default
    pub fn with_evaluator<F>(key: impl Into<String>, default: impl Into<String>, evaluator: F) -> Self
    where
        F: Fn(&DynamicContext<'_>) -> Option<String> + Send + Sync + 'static,
    {
        let default = default.into();
        Self {
            key: key.into(),
            raw: default.clone(),
            default,
            evaluator: Arc::new(evaluator),
        }
    }

    /// Effective value of the option for one event
    pub fn evaluate(&self, context: &DynamicContext<'_>) -> String {
        (self.evaluator)(context).unwrap_or_else(|| {
            tracing::debug!(
                option = %self.key,
                default = %self.default,
                "Dynamic option could not be resolved, using default"
            );
            self.default.clone()
        })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// The configured value before evaluation
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn default_value(&self) -> &str {
        &self.default
    }

    pub fn is_static(&self) -> bool {
        !is_template(&self.raw)
    }
}

impl fmt::Debug for DynamicOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DynamicOption")
            .field("key", &self.key)
            .field("raw", &self.raw)
            .field("default", &self.default)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
enum TemplateSegment {
    Literal(String),
    Attribute(String),
}

impl TemplateSegment {
    fn parse(raw: &str) -> Vec<TemplateSegment> {
        let mut segments = Vec::new();
        let mut last = 0;
        for captures in TEMPLATE_REFERENCE.captures_iter(raw) {
            let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
                continue;
            };
            if whole.start() > last {
                segments.push(TemplateSegment::Literal(raw[last..whole.start()].to_string()));
            }
            segments.push(TemplateSegment::Attribute(name.as_str().to_string()));
            last = whole.end();
        }
        if last < raw.len() {
            segments.push(TemplateSegment::Literal(raw[last..].to_string()));
        }
        segments
    }

    /// Substitute attribute references; any unresolved reference fails the whole render
    fn render(segments: &[TemplateSegment], ctx: &DynamicContext<'_>) -> Option<String> {
        let mut out = String::new();
        for segment in segments {
            match segment {
                TemplateSegment::Literal(text) => out.push_str(text),
                TemplateSegment::Attribute(name) => match ctx.get(name) {
                    None | Some(AttributeValue::Null) => return None,
                    Some(value) => out.push_str(&value.to_string()),
                },
            }
        }
        Some(out)
    }
}

/// Whether a raw option value references event attributes
pub fn is_template(raw: &str) -> bool {
    TEMPLATE_REFERENCE.is_match(raw)
}

/// Host boolean convention: case-insensitive "true" is true, anything else false
pub fn parse_lenient_bool(value: &str) -> bool {
    value.eq_ignore_ascii_case("true")
}

/// Key-indexed option store handed to the sink at init
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OptionHolder {
    values: HashMap<String, String>,
}

impl OptionHolder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Read a required static option
    pub fn validate_and_get_static_value(&self, key: &str) -> Result<String, ConfigError> {
        let value = self
            .get(key)
            .ok_or_else(|| ConfigError::MissingOption(key.to_string()))?;
        Self::reject_template(key, value)?;
        Ok(value.to_string())
    }

    /// Read an optional static option, falling back to `default`
    pub fn static_value_or(&self, key: &str, default: &str) -> Result<String, ConfigError> {
        match self.get(key) {
            Some(value) => {
                Self::reject_template(key, value)?;
                Ok(value.to_string())
            }
            None => Ok(default.to_string()),
        }
    }

    /// Register a dynamic option; an absent key evaluates to `default` for every event
    pub fn get_or_create_option(&self, key: &str, default: &str) -> DynamicOption {
        let raw = self.get(key).unwrap_or(default);
        DynamicOption::from_template(key, raw, default)
    }

    fn reject_template(key: &str, value: &str) -> Result<(), ConfigError> {
        if is_template(value) {
            return Err(ConfigError::DynamicStaticOption {
                key: key.to_string(),
                value: value.to_string(),
            });
        }
        Ok(())
    }
}

impl<K, V> FromIterator<(K, V)> for OptionHolder
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            values: iter
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event;
    use proptest::prelude::*;

    #[test]
    fn test_literal_option_ignores_context() {
        let option = DynamicOption::from_template("topic", "alerts", "null");
        let event = event! { "topic" => "other" };

        assert_eq!(option.evaluate(&DynamicContext::new(&event)), "alerts");
        assert!(option.is_static());
    }

    #[test]
    fn test_template_resolves_attribute() {
        let option = DynamicOption::from_template("quality.of.service", "{{qos}}", "1");
        let event = event! { "qos" => 2 };

        assert_eq!(option.evaluate(&DynamicContext::new(&event)), "2");
        assert!(!option.is_static());
    }

    #[test]
    fn test_template_mixed_with_literal_text() {
        let option = DynamicOption::from_template("topic", "sensors/{{ room }}/{{kind}}", "null");
        let event = event! { "room" => "kitchen", "kind" => "temp" };

        assert_eq!(
            option.evaluate(&DynamicContext::new(&event)),
            "sensors/kitchen/temp"
        );
    }

    #[test]
    fn test_unresolved_reference_falls_back_to_default() {
        let option = DynamicOption::from_template("topic", "sensors/{{room}}", "fallback");
        let missing = event! { "other" => 1 };
        let null = event! { "room" => AttributeValue::Null };

        assert_eq!(option.evaluate(&DynamicContext::new(&missing)), "fallback");
        assert_eq!(option.evaluate(&DynamicContext::new(&null)), "fallback");
        assert_eq!(option.evaluate(&DynamicContext::empty()), "fallback");
    }

    #[test]
    fn test_host_supplied_evaluator() {
        let option = DynamicOption::with_evaluator("message.retain", "false", |ctx| {
            ctx.get("sticky").map(|v| v.to_string())
        });
        let sticky = event! { "sticky" => true };

        assert_eq!(option.evaluate(&DynamicContext::new(&sticky)), "true");
        assert_eq!(option.evaluate(&DynamicContext::empty()), "false");
    }

    #[test]
    fn test_template_segment_parsing() {
        assert_eq!(
            TemplateSegment::parse("a/{{b}}/c"),
            vec![
                TemplateSegment::Literal("a/".to_string()),
                TemplateSegment::Attribute("b".to_string()),
                TemplateSegment::Literal("/c".to_string()),
            ]
        );
        assert_eq!(
            TemplateSegment::parse("{x}"),
            vec![TemplateSegment::Literal("{x}".to_string())]
        );
    }

    #[test]
    fn test_option_holder_static_values() {
        let holder = OptionHolder::new()
            .with("url", "tcp://localhost:1883")
            .with("client.id", "{{id}}");

        assert_eq!(
            holder.validate_and_get_static_value("url").unwrap(),
            "tcp://localhost:1883"
        );
        assert_eq!(holder.static_value_or("username", "").unwrap(), "");
        assert!(matches!(
            holder.validate_and_get_static_value("password"),
            Err(ConfigError::MissingOption(_))
        ));
        assert!(matches!(
            holder.static_value_or("client.id", ""),
            Err(ConfigError::DynamicStaticOption { .. })
        ));
    }

    #[test]
    fn test_option_holder_creates_default_option() {
        let holder: OptionHolder = [("topic", "{{room}}")].into_iter().collect();

        let topic = holder.get_or_create_option("topic", "null");
        let qos = holder.get_or_create_option("quality.of.service", "1");

        assert_eq!(topic.raw(), "{{room}}");
        assert_eq!(topic.default_value(), "null");
        assert_eq!(qos.raw(), "1");
        assert_eq!(qos.evaluate(&DynamicContext::empty()), "1");
    }

    #[test]
    fn test_lenient_bool_known_literals() {
        assert!(parse_lenient_bool("true"));
        assert!(parse_lenient_bool("True"));
        assert!(parse_lenient_bool("TRUE"));
        assert!(!parse_lenient_bool("false"));
        assert!(!parse_lenient_bool("yes"));
        assert!(!parse_lenient_bool("1"));
        assert!(!parse_lenient_bool(""));
        assert!(!parse_lenient_bool(" true"));
    }

    proptest! {
        #[test]
        fn prop_lenient_bool_only_accepts_true(s in "[a-zA-Z ]{0,6}") {
            prop_assert_eq!(parse_lenient_bool(&s), s.to_ascii_lowercase() == "true");
        }

        #[test]
        fn prop_literal_without_braces_is_returned_verbatim(s in "[a-zA-Z0-9/_ .-]*") {
            let option = DynamicOption::from_template("topic", s.clone(), "null");
            prop_assert_eq!(option.evaluate(&DynamicContext::empty()), s);
        }
    }
}
