//! HTML rendering of alert messages.
//!
//! Campaign-derived text is escaped before it is embedded in markup, and
//! identifiers are filtered to `[A-Za-z0-9_-]` before they become part of
//! a dashboard URL.

use std::collections::BTreeMap;
use std::fmt::Write;

use super::{Alert, Severity};

/// Escape the characters that are significant in Telegram-flavoured HTML.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Keep only characters that are safe inside a URL path segment.
pub fn sanitize_identifier(id: &str) -> String {
    id.chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

fn severity_icon(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "🔴",
        Severity::High => "🟠",
        Severity::Medium => "🟡",
        Severity::Low => "🔵",
    }
}

fn module_link(dashboard_url: &str, module_id: &str) -> String {
    format!(
        "{}/modules/{}",
        dashboard_url.trim_end_matches('/'),
        sanitize_identifier(module_id)
    )
}

/// Render one alert as a standalone message.
pub fn format_alert(module_id: &str, alert: &Alert, dashboard_url: &str) -> String {
    let mut text = format!(
        "{} <b>{}</b> · <code>{}</code>\n<b>{}</b>\n{}",
        severity_icon(alert.severity),
        alert.severity.as_str().to_uppercase(),
        escape_html(module_id),
        escape_html(&alert.alert_type),
        escape_html(&alert.message),
    );

    if let Some(action) = &alert.recommended_action {
        let _ = write!(text, "\n💡 {}", escape_html(action));
    }

    let _ = write!(
        text,
        "\n<a href=\"{}\">Open in dashboard</a>",
        escape_html(&module_link(dashboard_url, module_id))
    );
    text
}

/// Render a summary of many alerts as a single message.
///
/// `groups` pairs a module id with the alerts it produced.
pub fn format_batch(groups: &[(&str, &[Alert])], dashboard_url: &str) -> String {
    let total: usize = groups.iter().map(|(_, alerts)| alerts.len()).sum();

    let mut by_severity: BTreeMap<Severity, usize> = BTreeMap::new();
    for (_, alerts) in groups {
        for alert in alerts.iter() {
            *by_severity.entry(alert.severity).or_default() += 1;
        }
    }

    let mut text = format!(
        "📊 <b>{} alerts from {} module{}</b>\n",
        total,
        groups.len(),
        if groups.len() == 1 { "" } else { "s" }
    );

    for severity in Severity::ALL {
        if let Some(count) = by_severity.get(&severity) {
            let _ = write!(
                text,
                "\n{} {}: {}",
                severity_icon(severity),
                severity.as_str(),
                count
            );
        }
    }

    text.push('\n');
    for (module_id, alerts) in groups {
        let _ = write!(
            text,
            "\n<a href=\"{}\">{}</a>: {} alert{}",
            escape_html(&module_link(dashboard_url, module_id)),
            escape_html(module_id),
            alerts.len(),
            if alerts.len() == 1 { "" } else { "s" }
        );

        if let Some(worst) = alerts.iter().min_by_key(|a| a.severity) {
            let _ = write!(text, "\n  • {}", escape_html(&worst.message));
        }
    }

    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escape_html_replaces_markup_characters() {
        assert_eq!(
            escape_html(r#"<b>"Tom & Jerry"</b>"#),
            "&lt;b&gt;&quot;Tom &amp; Jerry&quot;&lt;/b&gt;"
        );
    }

    #[test]
    fn escape_html_leaves_plain_text_alone() {
        assert_eq!(escape_html("Campaign 42 ok"), "Campaign 42 ok");
    }

    #[test]
    fn sanitize_identifier_strips_path_traversal() {
        assert_eq!(sanitize_identifier("../../admin?x=1"), "adminx1");
        assert_eq!(sanitize_identifier("spend_spike-v2"), "spend_spike-v2");
    }

    #[test]
    fn format_alert_escapes_campaign_text() {
        let alert = Alert::new("zone_quality", Severity::High, "Zone <script> burns budget")
            .with_action("Block zone & review");
        let text = format_alert("zone_quality", &alert, "https://dash.example.com/");

        assert!(text.contains("Zone &lt;script&gt; burns budget"));
        assert!(text.contains("Block zone &amp; review"));
        assert!(text.contains("href=\"https://dash.example.com/modules/zone_quality\""));
        assert!(!text.contains("<script>"));
    }

    #[test]
    fn format_alert_sanitises_link_identifier() {
        let alert = Alert::new("t", Severity::Low, "m");
        let text = format_alert("x/../../evil\"", &alert, "https://dash.example.com");
        assert!(text.contains("href=\"https://dash.example.com/modules/xevil\""));
    }

    #[test]
    fn format_batch_counts_by_severity_and_module() {
        let alerts = vec![
            Alert::new("a", Severity::Critical, "first"),
            Alert::new("a", Severity::Low, "second"),
            Alert::new("a", Severity::Low, "third"),
        ];
        let other = vec![Alert::new("b", Severity::High, "fourth")];
        let text = format_batch(
            &[("spend_spike", &alerts), ("zone_quality", &other)],
            "https://dash.example.com",
        );

        assert!(text.contains("4 alerts from 2 modules"));
        assert!(text.contains("critical: 1"));
        assert!(text.contains("high: 1"));
        assert!(text.contains("low: 2"));
        assert!(!text.contains("medium:"));
        assert!(text.contains("spend_spike</a>: 3 alerts"));
        assert!(text.contains("zone_quality</a>: 1 alert\n"));
        assert!(text.contains("• first"));
    }
}
