//! Merges server-side test options with user-supplied overrides into a
//! submission payload, and resolves the effective CI execution rule.

use std::collections::HashMap;

use regex::Regex;
use url::Url;

use crate::model::{ExecutionRule, InternalTest, Override, TestPayload};
use crate::report::Reporter;

/// The strictest of the override's `executionRule` and the test's own
/// `options.ci.executionRule` wins, under the total order
/// `skipped > non_blocking > blocking`.
pub fn resolve_execution_rule(test: &InternalTest, overrides: Option<&Override>) -> ExecutionRule {
    let test_rule = test.execution_rule();
    match overrides.and_then(|o| o.execution_rule) {
        Some(override_rule) => std::cmp::max(override_rule, test_rule),
        None => test_rule,
    }
}

/// Builds the payload submitted to the backend for one test.
///
/// When `overrides` is `None` or empty, only `{public_id, executionRule}` is
/// returned. Otherwise the recognised override fields are carried over, and
/// `startUrl` (if present, and if the test accepts one) is rendered through
/// the URL-template rule.
pub async fn build_payload<R: Reporter + ?Sized>(
    test: &InternalTest,
    public_id: &str,
    overrides: Option<&Override>,
    reporter: &R,
) -> TestPayload {
    let execution_rule = resolve_execution_rule(test, overrides);

    let mut resolved = match overrides {
        Some(o) if !o.is_empty() => o.clone(),
        _ => {
            return TestPayload {
                public_id: public_id.to_string(),
                execution_rule,
                overrides: Override::default(),
            };
        }
    };

    if let Some(start_url) = resolved.start_url.take() {
        if test.accepts_start_url() {
            let context = UrlContext::from_test(test);
            let rendered = render_url_template(&start_url, context.as_ref(), reporter).await;
            resolved.start_url = Some(rendered);
        }
        // Tests that don't accept a startUrl silently drop it: the backend
        // only recognises the field for browser tests and http-subtype api
        // tests (spec.md §4.2).
    }

    TestPayload {
        public_id: public_id.to_string(),
        execution_rule,
        overrides: resolved,
    }
}

/// Reserved URL-template lookup keys derived from a test's request URL.
#[derive(Debug, Clone, Default)]
struct UrlContext {
    values: HashMap<&'static str, String>,
}

impl UrlContext {
    fn from_test(test: &InternalTest) -> Option<Self> {
        let raw_url = test.config.request.url.as_ref()?;
        Self::from_url_str(raw_url)
    }

    fn from_url_str(raw_url: &str) -> Option<Self> {
        let parsed = Url::parse(raw_url).ok()?;
        let mut values = HashMap::new();
        values.insert("URL", raw_url.to_string());
        values.insert("PROTOCOL", format!("{}:", parsed.scheme()));
        let host = parsed.host_str().unwrap_or_default().to_string();
        values.insert("HOST", format!("{}{}", host, port_suffix(&parsed)));
        values.insert("HOSTNAME", host.clone());
        values.insert(
            "ORIGIN",
            format!(
                "{}://{}{}",
                parsed.scheme(),
                host,
                port_suffix(&parsed)
            ),
        );
        values.insert(
            "PORT",
            parsed.port().map(|p| p.to_string()).unwrap_or_default(),
        );
        values.insert("PATHNAME", parsed.path().to_string());
        values.insert("PARAMS", parsed.query().unwrap_or_default().to_string());
        values.insert(
            "HASH",
            parsed
                .fragment()
                .map(|f| format!("#{f}"))
                .unwrap_or_default(),
        );

        if let Some((subdomain, domain)) = split_subdomain(&host) {
            values.insert("SUBDOMAIN", subdomain);
            values.insert("DOMAIN", domain);
        } else {
            values.insert("DOMAIN", host);
        }

        Some(Self { values })
    }
}

fn port_suffix(url: &Url) -> String {
    match url.port() {
        Some(p) => format!(":{p}"),
        None => String::new(),
    }
}

/// Splits `host` into `(subdomain, rest)` when the host has at least three
/// labels and the top-level label looks like a 2-5 character TLD.
///
/// This is a deliberate simplification over a full public-suffix list; see
/// DESIGN.md for the Open Question decision.
fn split_subdomain(host: &str) -> Option<(String, String)> {
    let labels: Vec<&str> = host.split('.').collect();
    if labels.len() < 3 {
        return None;
    }
    let tld = *labels.last().unwrap();
    if !(2..=5).contains(&tld.len()) {
        return None;
    }
    let subdomain = labels[0].to_string();
    let domain = labels[1..].join(".");
    Some((subdomain, domain))
}

static TEMPLATE_PATTERN: std::sync::OnceLock<Regex> = std::sync::OnceLock::new();

fn template_pattern() -> &'static Regex {
    TEMPLATE_PATTERN.get_or_init(|| Regex::new(r"\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").unwrap())
}

const RESERVED_KEYS: &[&str] = &[
    "URL", "DOMAIN", "SUBDOMAIN", "HOST", "HOSTNAME", "ORIGIN", "PROTOCOL", "PORT", "PATHNAME",
    "PARAMS", "HASH",
];

/// Renders `{{ NAME }}` placeholders using the process environment merged
/// with the URL-derived reserved keys (URL-derived values win on collision
/// for reserved names; a warning is logged through `reporter` in that
/// case). Unresolved placeholders are left verbatim. If the test's URL
/// failed to parse (`context` is `None`), only the environment is used.
async fn render_url_template<R: Reporter + ?Sized>(
    template: &str,
    context: Option<&UrlContext>,
    reporter: &R,
) -> String {
    if context.is_none() {
        reporter
            .log("startUrl template: test request URL failed to parse, using environment only")
            .await;
    }

    template_pattern()
        .replace_all(template, |caps: &regex::Captures| {
            let name = &caps[1];
            if let Some(ctx) = context {
                if let Some(value) = ctx.values.get(name) {
                    if RESERVED_KEYS.contains(&name) && std::env::var(name).is_ok() {
                        // Warning is best-effort (sync context inside replace_all);
                        // emitted via tracing so it isn't lost.
                        tracing::warn!(
                            key = name,
                            "environment variable shadows reserved URL-template key; URL-derived value wins"
                        );
                    }
                    return value.clone();
                }
            }
            std::env::var(name).unwrap_or_else(|_| caps[0].to_string())
        })
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{CiOptions, RequestConfig, TestConfig, TestOptions, TestType};
    use crate::report::NullReporter;

    fn test_with_url(url: &str, test_type: TestType, subtype: Option<&str>) -> InternalTest {
        InternalTest {
            public_id: "abc-def-ghi".into(),
            test_type,
            subtype: subtype.map(|s| s.to_string()),
            config: TestConfig {
                request: RequestConfig {
                    url: Some(url.to_string()),
                },
            },
            options: TestOptions {
                ci: CiOptions {
                    execution_rule: None,
                },
            },
        }
    }

    #[test]
    fn strictest_rule_wins_override_tightens() {
        let test = test_with_url("https://x.example.com", TestType::Api, Some("http"));
        let mut test = test;
        test.options.ci.execution_rule = Some(ExecutionRule::Blocking);
        let overrides = Override {
            execution_rule: Some(ExecutionRule::NonBlocking),
            ..Default::default()
        };
        assert_eq!(
            resolve_execution_rule(&test, Some(&overrides)),
            ExecutionRule::NonBlocking
        );
    }

    #[test]
    fn strictest_rule_wins_test_tightens() {
        let mut test = test_with_url("https://x.example.com", TestType::Api, Some("http"));
        test.options.ci.execution_rule = Some(ExecutionRule::Skipped);
        let overrides = Override {
            execution_rule: Some(ExecutionRule::Blocking),
            ..Default::default()
        };
        assert_eq!(
            resolve_execution_rule(&test, Some(&overrides)),
            ExecutionRule::Skipped
        );
    }

    #[test]
    fn default_rule_is_blocking_when_unset() {
        let test = test_with_url("https://x.example.com", TestType::Api, Some("http"));
        assert_eq!(resolve_execution_rule(&test, None), ExecutionRule::Blocking);
    }

    #[tokio::test]
    async fn empty_override_yields_bare_payload() {
        let test = test_with_url("https://x.example.com", TestType::Api, Some("http"));
        let reporter = NullReporter;
        let payload = build_payload(&test, "abc-def-ghi", None, &reporter).await;
        assert!(payload.overrides.is_empty());
        assert_eq!(payload.execution_rule, ExecutionRule::Blocking);
    }

    #[tokio::test]
    async fn url_template_round_trip_with_no_placeholders() {
        let reporter = NullReporter;
        let rendered = render_url_template("https://static.example.com/path", None, &reporter).await;
        assert_eq!(rendered, "https://static.example.com/path");
    }

    #[tokio::test]
    async fn url_template_renders_reserved_keys() {
        let ctx = UrlContext::from_url_str("https://api.shop.example.com/v1").unwrap();
        let reporter = NullReporter;
        let rendered = render_url_template(
            "{{PROTOCOL}}//{{SUBDOMAIN}}.staging.{{DOMAIN}}{{PATHNAME}}",
            Some(&ctx),
            &reporter,
        )
        .await;
        assert_eq!(rendered, "https://api.staging.shop.example.com/v1");
    }

    #[tokio::test]
    async fn url_template_leaves_unresolved_placeholders_verbatim() {
        let reporter = NullReporter;
        let rendered =
            render_url_template("{{NOT_A_REAL_KEY_XYZ}}", None, &reporter).await;
        assert_eq!(rendered, "{{NOT_A_REAL_KEY_XYZ}}");
    }

    #[test]
    fn malformed_url_degrades_to_no_context() {
        assert!(UrlContext::from_url_str("not a url").is_none());
    }

    #[test]
    fn subdomain_split_requires_three_labels_and_short_tld() {
        assert_eq!(
            split_subdomain("api.shop.example.com"),
            Some(("api".to_string(), "shop.example.com".to_string()))
        );
        assert_eq!(split_subdomain("example.com"), None);
    }

    #[tokio::test]
    async fn start_url_is_dropped_for_tests_that_dont_accept_it() {
        let test = test_with_url("https://x.example.com", TestType::Api, Some("grpc"));
        let reporter = NullReporter;
        let overrides = Override {
            start_url: Some("{{URL}}/extra".into()),
            ..Default::default()
        };
        let payload = build_payload(&test, "abc-def-ghi", Some(&overrides), &reporter).await;
        assert_eq!(payload.overrides.start_url, None);
    }
}
