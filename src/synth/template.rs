use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::store::{Settings, UpdateConfig};
use crate::version::Version;

/// Fixed part of every file-watch update's config
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaselineTemplate {
    pub features: Vec<String>,
    pub endpoints: BTreeMap<String, String>,
    pub settings: Settings,
    /// First statement of the generated code; `{file}` and `{timestamp}` are
    /// substituted.
    pub banner: String,
}

impl Default for BaselineTemplate {
    fn default() -> Self {
        Self {
            features: ["enhanced_tracking", "auto_screenshots", "crash_analytics", "realtime_sync"]
                .into_iter()
                .map(String::from)
                .collect(),
            endpoints: BTreeMap::from([
                ("sync".to_string(), "/api/sync".to_string()),
                ("events".to_string(), "/api/events".to_string()),
                ("crashes".to_string(), "/api/crashes".to_string()),
            ]),
            settings: Settings {
                max_events: Some(5000),
                sync_interval: Some(1000),
                enable_debug_logs: Some(true),
                ..Default::default()
            },
            banner: "console.log('⚡ Real-time update from {file} at {timestamp}');".to_string(),
        }
    }
}

/// Diagnostic-print statements lifted from a changed file, in file order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CodeFragment(Vec<String>);

impl CodeFragment {
    pub fn extract(pattern: &Regex, text: &str) -> Self {
        Self(pattern.find_iter(text).map(|m| m.as_str().to_string()).collect())
    }

    pub fn statements(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn render(&self) -> String {
        self.0.join("; ")
    }
}

/// Merge the baseline with what was derived from the changed file.
pub fn build_config(
    template: &BaselineTemplate,
    version: &Version,
    changed_file: &str,
    timestamp: &DateTime<Utc>,
    fragment: &CodeFragment,
) -> UpdateConfig {
    let mut settings = template.settings.clone();
    settings.last_changed = Some(changed_file.to_string());

    let banner = template
        .banner
        .replace("{file}", changed_file)
        .replace("{timestamp}", &timestamp.to_rfc3339_opts(SecondsFormat::Millis, true));
    let code = if fragment.is_empty() {
        banner
    } else {
        format!("{banner} {}", fragment.render())
    };

    UpdateConfig {
        version: version.to_string(),
        features: template.features.clone(),
        endpoints: template.endpoints.clone(),
        settings,
        code,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn pattern() -> Regex {
        Regex::new(r"console\.log\([^)]+\)").unwrap()
    }

    #[test]
    fn extracts_log_statements_in_order() {
        let text = "const a = 1;\nconsole.log('first');\nfoo();\nconsole.log(\"second\", a);\n";
        let fragment = CodeFragment::extract(&pattern(), text);
        assert_eq!(
            fragment.statements(),
            ["console.log('first')", "console.log(\"second\", a)"]
        );
        assert_eq!(fragment.render(), "console.log('first'); console.log(\"second\", a)");
    }

    #[test]
    fn no_statements_gives_empty_fragment() {
        assert!(CodeFragment::extract(&pattern(), "export const x = 1;").is_empty());
        // empty argument lists are not diagnostics
        assert!(CodeFragment::extract(&pattern(), "console.log()").is_empty());
    }

    #[test]
    fn config_merges_baseline_and_file() {
        let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 0, 0).unwrap();
        let fragment = CodeFragment::extract(&pattern(), "console.log('x')");
        let config = build_config(
            &BaselineTemplate::default(),
            &Version::new(1, 0, 3),
            "foo.ts",
            &ts,
            &fragment,
        );

        assert_eq!(config.version, "1.0.3");
        assert_eq!(config.features.len(), 4);
        assert_eq!(config.endpoints["crashes"], "/api/crashes");
        assert_eq!(config.settings.max_events, Some(5000));
        assert_eq!(config.settings.last_changed.as_deref(), Some("foo.ts"));
        assert_eq!(
            config.code,
            "console.log('⚡ Real-time update from foo.ts at 2024-01-15T10:00:00.000Z'); console.log('x')"
        );
    }

    #[test]
    fn code_is_banner_only_without_fragment() {
        let template = BaselineTemplate {
            banner: "// {file}".into(),
            ..Default::default()
        };
        let config = build_config(
            &template,
            &Version::new(1, 0, 3),
            "bar.js",
            &Utc::now(),
            &CodeFragment::default(),
        );
        assert_eq!(config.code, "// bar.js");
    }
}
