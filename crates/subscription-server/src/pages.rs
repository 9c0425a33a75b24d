//! Server-rendered Pages
//!
//! Plain HTML strings; the pages only need a plan list, the current status
//! and buttons that call the JSON endpoints.

use subscription_core::{PlanCatalog, SubscriptionInfo, UserInfo};

/// Escape text for HTML element and attribute content
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.chars() {
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

fn layout(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="ja">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{title}</title>
</head>
<body>
{body}
<script>
async function post(path, body) {{
  const res = await fetch(path, {{
    method: "POST",
    credentials: "same-origin",
    headers: {{ "Content-Type": "application/json" }},
    body: JSON.stringify(body || {{}})
  }});
  const data = await res.json();
  if (!res.ok) {{ alert(data.error); return; }}
  window.location.href = data.checkout_url || data.portal_url;
}}
</script>
</body>
</html>"#,
        title = escape_html(title),
        body = body
    )
}

/// Plans, and the user's current subscription when signed in
pub fn subscription_page(user: Option<&UserInfo>, info: Option<&SubscriptionInfo>, catalog: &PlanCatalog) -> String {
    let mut body = String::from("<h1>Subscription</h1>\n");

    match (user, info) {
        (Some(user), Some(info)) => {
            body.push_str(&format!("<p>Signed in as {}</p>\n", escape_html(&user.display_name)));
            if info.is_active {
                body.push_str(&format!(
                    "<p>Current plan: <strong>{}</strong> ({})</p>\n",
                    escape_html(info.plan_name.as_deref().unwrap_or("-")),
                    escape_html(info.subscription_status.as_deref().unwrap_or("-")),
                ));
                if let Some(end) = info.current_period_end {
                    body.push_str(&format!("<p>Renews on {}</p>\n", end.format("%Y-%m-%d")));
                }
                body.push_str(
                    "<button onclick=\"post('/subscription/create-portal-session')\">Manage subscription</button>\n",
                );
                return layout("Subscription", &body);
            }
        }
        (Some(user), None) => {
            body.push_str(&format!("<p>Signed in as {}</p>\n", escape_html(&user.display_name)));
        }
        (None, _) => body.push_str("<p>Please log in to subscribe.</p>\n"),
    }

    body.push_str("<ul>\n");
    for price in catalog.prices() {
        let name = escape_html(price.tier.as_str());
        let button = if user.is_some() {
            format!(
                " <button onclick=\"post('/subscription/create-checkout-session', {{plan_name: '{}'}})\">Subscribe</button>",
                name
            )
        } else {
            String::new()
        };
        body.push_str(&format!("<li>{} - {} / month{}</li>\n", name, price.amount, button));
    }
    body.push_str("</ul>\n");

    layout("Subscription", &body)
}

pub fn success_page(user: &UserInfo, info: &SubscriptionInfo) -> String {
    let status = if info.is_active {
        format!(
            "<p>Your {} plan is active.</p>",
            escape_html(info.plan_name.as_deref().unwrap_or("-"))
        )
    } else {
        // The webhook may not have arrived yet
        "<p>Your payment is being processed. This page will show your plan shortly.</p>".to_string()
    };

    let body = format!(
        "<h1>Thank you, {}</h1>\n{}\n<p><a href=\"/subscription\">Back to subscription</a></p>",
        escape_html(&user.display_name),
        status
    );
    layout("Subscription complete", &body)
}
