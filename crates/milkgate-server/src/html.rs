//! HTML pages for the user-visible authorization steps
//!
//! Plain string templates; the facade renders only the state transitions
//! a user must see (authorize form, intermediate grant page, setup form,
//! error pages).

/// Minimal HTML attribute/body escaping
pub fn escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#39;")
}

fn hidden(name: &str, value: &str) -> String {
    format!(
        r#"<input type="hidden" name="{name}" value="{}">"#,
        escape(value)
    )
}

/// Parameters echoed through the authorize form
pub struct AuthorizeFormParams<'a> {
    pub client_id: &'a str,
    pub redirect_uri: &'a str,
    pub state: &'a str,
    pub resource: &'a str,
    pub code_challenge: &'a str,
    pub code_challenge_method: &'a str,
    pub csrf_state: &'a str,
}

/// GET /oauth/authorize — confirmation form with the flow parameters as
/// hidden fields plus an optional upstream API key input.
pub fn authorize_page(params: &AuthorizeFormParams<'_>) -> String {
    let fields = [
        hidden("client_id", params.client_id),
        hidden("redirect_uri", params.redirect_uri),
        hidden("state", params.state),
        hidden("resource", params.resource),
        hidden("code_challenge", params.code_challenge),
        hidden("code_challenge_method", params.code_challenge_method),
        hidden("csrf_state", params.csrf_state),
    ]
    .join("\n      ");
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Connect Remember The Milk</title></head>
<body>
  <h1>Connect your Remember The Milk account</h1>
  <p>The application <strong>{client}</strong> is requesting access to
  your tasks. Continuing opens Remember The Milk to grant permission.</p>
  <form method="post" action="/oauth/authorize">
      {fields}
      <label for="api_key">Upstream API key (optional):</label>
      <input type="text" id="api_key" name="api_key" autocomplete="off">
      <button type="submit">Continue</button>
  </form>
</body>
</html>"#,
        client = escape(params.client_id),
    )
}

/// Page shown between form submission and the upstream grant: the signed
/// link to Remember The Milk plus a poller that watches `/oauth/check-auth`.
pub fn intermediate_page(auth_url: &str, code: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorize with Remember The Milk</title></head>
<body>
  <h1>One more step</h1>
  <p><a href="{auth_url}" target="_blank" rel="noopener">Open Remember The Milk</a>
  in a new window and click <em>"OK, I'll allow it"</em>.</p>
  <p>This page continues automatically once access is granted.</p>
  <p id="status">Waiting for authorization&hellip;</p>
  <script>
    const code = "{code}";
    const poll = setInterval(async () => {{
      try {{
        const rsp = await fetch("/oauth/check-auth?code=" + encodeURIComponent(code));
        const body = await rsp.json();
        if (body.authorized) {{
          clearInterval(poll);
          window.location = "/oauth/callback?code=" + encodeURIComponent(code);
        }} else if (body.error) {{
          clearInterval(poll);
          document.getElementById("status").textContent =
            "Authorization failed: " + body.error;
        }}
      }} catch (err) {{
        // transient; keep polling
      }}
    }}, 3000);
  </script>
</body>
</html>"#,
        auth_url = escape(auth_url),
        code = escape(code),
    )
}

/// Friendly error page for `/oauth/authorize` failures
pub fn error_page(reason: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Authorization Error</title></head>
<body>
  <h1>Authorization Error</h1>
  <p>{}</p>
  <p><a href="javascript:history.back()">Go back</a> and try again.</p>
</body>
</html>"#,
        escape(reason)
    )
}

/// GET /setup — upstream credential capture form
pub fn setup_page(error: Option<&str>) -> String {
    let notice = match error {
        Some(reason) => format!(r#"<p class="error">{}</p>"#, escape(reason)),
        None => String::new(),
    };
    format!(
        r#"<!DOCTYPE html>
<html>
<head><title>Milkgate Setup</title></head>
<body>
  <h1>Upstream API credentials</h1>
  {notice}
  <p>Enter the API key and shared secret issued by Remember The Milk.
  They are verified against the API and stored encrypted.</p>
  <form method="post" action="/setup">
      <label for="api_key">API key:</label>
      <input type="text" id="api_key" name="api_key" autocomplete="off"><br>
      <label for="api_secret">Shared secret:</label>
      <input type="password" id="api_secret" name="api_secret" autocomplete="off"><br>
      <button type="submit">Save</button>
  </form>
</body>
</html>"#
    )
}

/// POST /setup success page
pub fn setup_success_page() -> String {
    r#"<!DOCTYPE html>
<html>
<head><title>Milkgate Setup</title></head>
<body>
  <h1>Credentials saved</h1>
  <p>Your upstream credentials were verified and stored encrypted.
  You can now authorize clients through this server.</p>
</body>
</html>"#
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape() {
        assert_eq!(
            escape(r#"<a b="c">&'"#),
            "&lt;a b=&quot;c&quot;&gt;&amp;&#39;"
        );
    }

    #[test]
    fn test_authorize_page_embeds_params() {
        let page = authorize_page(&AuthorizeFormParams {
            client_id: "c1",
            redirect_uri: "http://app/cb",
            state: "S1",
            resource: "",
            code_challenge: "",
            code_challenge_method: "",
            csrf_state: "tok-123",
        });
        assert!(page.contains(r#"name="csrf_state" value="tok-123""#));
        assert!(page.contains(r#"name="redirect_uri" value="http://app/cb""#));
        assert!(page.contains(r#"name="api_key""#));
    }

    #[test]
    fn test_authorize_page_escapes_injection() {
        let page = authorize_page(&AuthorizeFormParams {
            client_id: r#""><script>alert(1)</script>"#,
            redirect_uri: "",
            state: "",
            resource: "",
            code_challenge: "",
            code_challenge_method: "",
            csrf_state: "",
        });
        assert!(!page.contains("<script>alert"));
    }

    #[test]
    fn test_intermediate_page_links_grant_url() {
        let page = intermediate_page(
            "https://www.rememberthemilk.com/services/auth/?api_key=k&perms=delete&frob=F1&api_sig=s",
            "code-1",
        );
        assert!(page.contains("frob=F1"));
        assert!(page.contains("/oauth/check-auth?code="));
    }
}
