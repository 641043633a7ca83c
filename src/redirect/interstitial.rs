//! The page returned for a tracked link
//!
//! It sends the visitor on immediately and reports engagement in the
//! background: once after three seconds, and on `pagehide` if that fires
//! later. Only reports of three seconds or more are sent, since the first
//! report is the one that is kept.
//!
//! The navigation starts as soon as the script runs, so the page usually
//! unloads well before three seconds and nothing is reported. A time is
//! recorded only when the destination takes three seconds or more to
//! replace this page. It measures how long the visitor waited on the
//! interstitial, not time spent on the destination site, and a qualified
//! click means exactly that.

use url::Url;

use crate::models::QUALIFIED_ENGAGEMENT_SECS;

pub const ENGAGEMENT_PATH: &str = "/internal/confirm-engagement";

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// JSON string literal that is safe inside a `<script>` element
fn js_string(raw: &str) -> String {
    serde_json::Value::from(raw)
        .to_string()
        .replace('<', "\\u003c")
        .replace('>', "\\u003e")
}

pub fn render(destination: &Url, event_id: Option<i64>) -> String {
    let href = escape_html(destination.as_str());
    let target = js_string(destination.as_str());
    let endpoint = js_string(ENGAGEMENT_PATH);
    let event = event_id.map_or_else(|| "null".to_string(), |id| id.to_string());

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="robots" content="noindex">
<meta name="referrer" content="no-referrer-when-downgrade">
<title>Redirecting…</title>
<noscript><meta http-equiv="refresh" content="0;url={href}"></noscript>
</head>
<body>
<p>Redirecting to <a href="{href}">{href}</a></p>
<script>
(function () {{
  var target = {target};
  var eventID = {event};
  var started = Date.now();
  var sent = false;
  function report() {{
    if (sent || eventID === null) return;
    var seconds = Math.floor((Date.now() - started) / 1000);
    if (seconds < {min_secs}) return;
    sent = true;
    var body = JSON.stringify({{ eventID: eventID, timeOnSiteSeconds: seconds }});
    if (navigator.sendBeacon) {{
      navigator.sendBeacon({endpoint}, body);
    }} else {{
      fetch({endpoint}, {{ method: "POST", body: body, keepalive: true }});
    }}
  }}
  setTimeout(report, {min_secs} * 1000);
  window.addEventListener("pagehide", report);
  window.location.replace(target);
}})();
</script>
</body>
</html>
"#,
        min_secs = QUALIFIED_ENGAGEMENT_SECS,
    )
}
