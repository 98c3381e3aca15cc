//! Pure-HTTP document: HTML parsing plus form submission simulation.
//!
//! There is no script engine, so `dispatch_input_event` has nothing to notify
//! and clicking a control submits its enclosing form the way a browser would.
//! Controls outside any form post the filled fields back to the page URL.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::{anyhow, bail};
use async_trait::async_trait;
use regex::Regex;
use reqwest::{Method, Url};
use scraper::{ElementRef, Html, Selector};

use crate::document::{Browser, Document, ElementHandle};

/// Desktop Chrome, so the portal serves its desktop layout
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Opens [`HttpDocument`]s with their own cookie jar
pub struct HttpBrowser {
    user_agent: String,
    timeout: Duration,
}

impl HttpBrowser {
    pub fn new(user_agent: impl Into<String>, timeout: Duration) -> Self {
        Self {
            user_agent: user_agent.into(),
            timeout,
        }
    }
}

impl Browser for HttpBrowser {
    fn open(&self) -> anyhow::Result<Box<dyn Document>> {
        let client = reqwest::Client::builder()
            .cookie_store(true)
            .user_agent(self.user_agent.as_str())
            .timeout(self.timeout)
            .build()?;
        Ok(Box::new(HttpDocument::new(client)))
    }
}

struct Page {
    url: Url,
    html: String,
}

struct Submission {
    method: Method,
    action: Url,
    fields: Vec<(String, String)>,
}

pub struct HttpDocument {
    client: reqwest::Client,
    page: Option<Page>,
    values: HashMap<ElementHandle, String>,
}

impl HttpDocument {
    pub fn new(client: reqwest::Client) -> Self {
        Self {
            client,
            page: None,
            values: HashMap::new(),
        }
    }

    fn current_page(&self) -> anyhow::Result<&Page> {
        self.page.as_ref().ok_or_else(|| anyhow!("no page loaded"))
    }

    async fn replace_page(&mut self, response: reqwest::Response) -> anyhow::Result<()> {
        let url = response.url().clone();
        let html = response.text().await?;
        tracing::debug!("Loaded {} ({} bytes)", url, html.len());
        self.page = Some(Page { url, html });
        self.values.clear();
        Ok(())
    }

    /// Work out what a browser would send when `element` is clicked
    fn submission_for(&self, element: &ElementHandle) -> anyhow::Result<Submission> {
        let page = self.current_page()?;
        let html = Html::parse_document(&page.html);
        let clicked = resolve(&html, element)?;

        let overrides = self
            .values
            .iter()
            .map(|(handle, value)| resolve(&html, handle).map(|el| (el, value.as_str())))
            .collect::<anyhow::Result<Vec<_>>>()?;

        let form = clicked
            .ancestors()
            .filter_map(ElementRef::wrap)
            .find(|el| el.value().name() == "form");

        let Some(form) = form else {
            let mut fields = overrides
                .iter()
                .map(|(el, value)| {
                    let name = el
                        .value()
                        .attr("name")
                        .or_else(|| el.value().id())
                        .ok_or_else(|| anyhow!("filled field has neither name nor id"))?;
                    Ok((name.to_string(), value.to_string()))
                })
                .collect::<anyhow::Result<Vec<_>>>()?;
            fields.sort();
            return Ok(Submission {
                method: Method::POST,
                action: page.url.clone(),
                fields,
            });
        };

        let method = match form.value().attr("method") {
            Some(m) if m.trim().eq_ignore_ascii_case("post") => Method::POST,
            _ => Method::GET,
        };
        let action = match form.value().attr("action").map(str::trim) {
            Some(action) if !action.is_empty() => page.url.join(action)?,
            _ => page.url.clone(),
        };

        let controls = selector("input, select, textarea")?;
        let options = selector("option")?;
        let mut fields = Vec::new();
        for control in form.select(&controls) {
            let el = control.value();
            let Some(name) = el.attr("name") else {
                continue;
            };
            if el.attr("disabled").is_some() {
                continue;
            }
            let filled = overrides
                .iter()
                .find(|(o, _)| o.id() == control.id())
                .map(|(_, value)| value.to_string());
            let value = match el.name() {
                "input" => {
                    let kind = el.attr("type").unwrap_or("text").to_ascii_lowercase();
                    match kind.as_str() {
                        "submit" | "button" | "image" | "reset" | "file" => continue,
                        "checkbox" | "radio" => {
                            if el.attr("checked").is_none() {
                                continue;
                            }
                            el.attr("value").unwrap_or("on").to_string()
                        }
                        _ => filled.unwrap_or_else(|| el.attr("value").unwrap_or_default().to_string()),
                    }
                }
                "textarea" => filled.unwrap_or_else(|| control.text().collect()),
                "select" => {
                    let mut all = control.select(&options).peekable();
                    let first = all.peek().copied();
                    let chosen = all.find(|o| o.value().attr("selected").is_some()).or(first);
                    match chosen {
                        Some(option) => option
                            .value()
                            .attr("value")
                            .map(str::to_string)
                            .unwrap_or_else(|| option.text().collect::<String>().trim().to_string()),
                        None => continue,
                    }
                }
                _ => continue,
            };
            fields.push((name.to_string(), value));
        }
        if is_button(&clicked) {
            if let Some(name) = clicked.value().attr("name") {
                let value = clicked.value().attr("value").unwrap_or_default();
                fields.push((name.to_string(), value.to_string()));
            }
        }

        Ok(Submission {
            method,
            action,
            fields,
        })
    }
}

#[async_trait]
impl Document for HttpDocument {
    async fn load(&mut self, url: &str) -> anyhow::Result<()> {
        tracing::debug!("Loading {}", url);
        let response = self.client.get(url).send().await?.error_for_status()?;
        self.replace_page(response).await
    }

    fn query_selector(&self, selectors: &[&str]) -> Option<ElementHandle> {
        let page = self.page.as_ref()?;
        let html = Html::parse_document(&page.html);
        selectors.iter().find_map(|s| match selector(s) {
            Ok(sel) => html.select(&sel).next().map(|_| ElementHandle::new(*s)),
            Err(e) => {
                tracing::debug!("{}", e);
                None
            }
        })
    }

    fn set_value(&mut self, element: &ElementHandle, text: &str) -> anyhow::Result<()> {
        let html = Html::parse_document(&self.current_page()?.html);
        let el = resolve(&html, element)?;
        if !matches!(el.value().name(), "input" | "textarea") {
            bail!("{} is a <{}>, not a text control", element, el.value().name());
        }
        self.values.insert(element.clone(), text.to_string());
        Ok(())
    }

    fn dispatch_input_event(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        let html = Html::parse_document(&self.current_page()?.html);
        resolve(&html, element)?;
        tracing::trace!("input event on {} (no listeners without a script engine)", element);
        Ok(())
    }

    async fn click(&mut self, element: &ElementHandle) -> anyhow::Result<()> {
        let mut submission = self.submission_for(element)?;
        tracing::debug!(
            "Submitting {} {} ({} field(s))",
            submission.method,
            submission.action,
            submission.fields.len()
        );
        let request = if submission.method == Method::GET {
            submission.action.set_query(None);
            self.client.get(submission.action).query(&submission.fields)
        } else {
            self.client.post(submission.action).form(&submission.fields)
        };
        let response = request.send().await?.error_for_status()?;
        self.replace_page(response).await
    }

    fn read_text(&self) -> String {
        let Some(page) = self.page.as_ref() else {
            return String::new();
        };
        let html = Html::parse_document(&page.html);
        let root = match selector("body") {
            Ok(body) => html.select(&body).next().unwrap_or_else(|| html.root_element()),
            Err(_) => html.root_element(),
        };
        let text: Vec<&str> = root.text().flat_map(str::split_whitespace).collect();
        text.join(" ")
    }

    fn state_field(&self, name: &str) -> Option<String> {
        page_state_field(&self.page.as_ref()?.html, name)
    }
}

fn selector(s: &str) -> anyhow::Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("invalid selector {:?}: {}", s, e))
}

fn resolve<'a>(html: &'a Html, element: &ElementHandle) -> anyhow::Result<ElementRef<'a>> {
    let sel = selector(&element.selector)?;
    html.select(&sel)
        .next()
        .ok_or_else(|| anyhow!("element {} is no longer on the page", element))
}

fn is_button(el: &ElementRef) -> bool {
    match el.value().name() {
        "button" => true,
        "input" => matches!(
            el.value().attr("type").map(str::to_ascii_lowercase).as_deref(),
            Some("submit") | Some("image")
        ),
        _ => false,
    }
}

/// Reads top-level field `name` of the `CONFIG = {...}` object published by an inline script
fn page_state_field(html: &str, name: &str) -> Option<String> {
    let document = Html::parse_document(html);
    let scripts = selector("script").ok()?;
    let assignment = Regex::new(r"\bCONFIG\s*=\s*\{").ok()?;
    let field = Regex::new(&format!(
        r#"(?:^|[{{,\s])["']?{}["']?\s*:\s*["']([^"']*)["']"#,
        regex::escape(name)
    ))
    .ok()?;

    document.select(&scripts).find_map(|script| {
        let source: String = script.text().collect();
        let start = assignment.find(&source)?.end() - 1;
        let object = top_level_object(&source[start..]);
        field.captures(&object).map(|c| c[1].to_string())
    })
}

/// The object literal opening at the start of `source`, up to its matching
/// close, with nested objects and arrays blanked out. Brackets inside string
/// literals do not count.
fn top_level_object(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut escaped = false;

    for c in source.chars() {
        let before = depth;
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' | '`' => quote = Some(c),
                '{' | '[' => depth += 1,
                '}' | ']' => depth = depth.saturating_sub(1),
                _ => {}
            },
        }
        out.push(if before.max(depth) <= 1 { c } else { ' ' });
        if before > 0 && depth == 0 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::{
        matchers::{body_string_contains, method, path, query_param},
        Mock, MockServer, ResponseTemplate,
    };

    const DESKTOP_PAGE: &str = r#"<html><body>
        <form id="login-form" action="/cgi-bin/login" method="post">
          <input type="hidden" name="ac_id" value="1">
          <input id="username" name="username" type="text">
          <input id="password" name="password" type="password">
          <input type="checkbox" name="remember" value="yes">
          <select name="domain"><option value="">campus</option><option value="@cmcc" selected>cmcc</option></select>
          <button id="login-account" name="action" value="login">Log in</button>
        </form>
        </body></html>"#;

    async fn document_at(server: &MockServer, page: &str) -> HttpDocument {
        Mock::given(method("GET"))
            .and(path("/srun_portal_pc"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(server)
            .await;
        let mut doc = HttpDocument::new(reqwest::Client::new());
        doc.load(&format!("{}/srun_portal_pc?ac_id=1&theme=basic2", server.uri()))
            .await
            .unwrap();
        doc
    }

    #[test]
    fn reads_named_field_from_config_object() {
        let html = r#"<script>
            var CONFIG = { ip: "10.0.0.7", page: 'success', nested: { page: "other" } };
        </script>"#;
        assert_eq!(page_state_field(html, "page").as_deref(), Some("success"));
        assert_eq!(page_state_field(html, "ip").as_deref(), Some("10.0.0.7"));
    }

    #[test]
    fn config_field_lookup_is_exact() {
        let html = r#"<script>window.CONFIG = {"pageName": "success", "subpage": "success"};</script>"#;
        assert_eq!(page_state_field(html, "page"), None);
        assert_eq!(page_state_field(html, "pageName").as_deref(), Some("success"));
    }

    #[test]
    fn field_outside_config_is_ignored() {
        let html = r#"<script>var OTHER = { page: 'success' }; var CONFIG = { page: 'account' };</script>
            <p>"page": "success"</p>"#;
        assert_eq!(page_state_field(html, "page").as_deref(), Some("account"));
        assert_eq!(page_state_field("<p>page: 'success'</p>", "page"), None);
    }

    #[test]
    fn nested_field_does_not_shadow_top_level() {
        let html = r#"<script>var CONFIG = { route: { page: "success" }, page: "account" };</script>"#;
        assert_eq!(page_state_field(html, "page").as_deref(), Some("account"));

        let html = r#"<script>var CONFIG = { steps: [{ page: 'success' }], page: 'account' };</script>"#;
        assert_eq!(page_state_field(html, "page").as_deref(), Some("account"));

        let html = r#"<script>var CONFIG = { route: { page: "success" } };</script>"#;
        assert_eq!(page_state_field(html, "page"), None);
    }

    #[test]
    fn braces_inside_strings_do_not_end_the_object() {
        let html = r#"<script>var CONFIG = { title: "a } b", hint: 'x{', page: "success" };</script>"#;
        assert_eq!(page_state_field(html, "page").as_deref(), Some("success"));
    }

    #[tokio::test]
    async fn clicking_form_button_posts_every_successful_control() {
        let server = MockServer::start().await;
        let mut doc = document_at(&server, DESKTOP_PAGE).await;
        Mock::given(method("POST"))
            .and(path("/cgi-bin/login"))
            .and(body_string_contains("ac_id=1"))
            .and(body_string_contains("username=alice"))
            .and(body_string_contains("password=s3cret"))
            .and(body_string_contains("domain=%40cmcc"))
            .and(body_string_contains("action=login"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<p>Welcome   back</p>"))
            .expect(1)
            .mount(&server)
            .await;

        let user = doc.query_selector(&["#username"]).unwrap();
        let pass = doc.query_selector(&["#password"]).unwrap();
        let button = doc.query_selector(&["#login-account"]).unwrap();
        doc.set_value(&user, "alice").unwrap();
        doc.dispatch_input_event(&user).unwrap();
        doc.set_value(&pass, "s3cret").unwrap();
        doc.click(&button).await.unwrap();

        assert_eq!(doc.read_text(), "Welcome back");
        let requests = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&requests.last().unwrap().body).to_string();
        assert!(!body.contains("remember"), "unchecked checkbox sent: {}", body);
    }

    #[tokio::test]
    async fn button_outside_form_posts_filled_fields_to_page() {
        let server = MockServer::start().await;
        let page = r#"<div id="app">
            <input type="text" placeholder="account">
            <input type="password" name="password">
            <button class="login-btn">Login</button></div>"#;
        let mut doc = document_at(&server, page).await;
        Mock::given(method("POST"))
            .and(path("/srun_portal_pc"))
            .and(body_string_contains("password=pw"))
            .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
            .expect(1)
            .mount(&server)
            .await;

        let pass = doc.query_selector(&["input[type=\"password\"]"]).unwrap();
        let button = doc.query_selector(&["button"]).unwrap();
        doc.set_value(&pass, "pw").unwrap();
        doc.click(&button).await.unwrap();
    }

    #[tokio::test]
    async fn filled_field_without_name_or_id_cannot_be_posted() {
        let server = MockServer::start().await;
        let page = r#"<input type="text"><button>Login</button>"#;
        let mut doc = document_at(&server, page).await;

        let user = doc.query_selector(&["input[type=\"text\"]"]).unwrap();
        let button = doc.query_selector(&["button"]).unwrap();
        doc.set_value(&user, "alice").unwrap();
        assert!(doc.click(&button).await.is_err());
    }

    #[tokio::test]
    async fn get_form_replaces_action_query() {
        let server = MockServer::start().await;
        let page = r#"<form action="/search?stale=1"><input name="q" id="q"><input type="submit" id="go"></form>"#;
        let mut doc = document_at(&server, page).await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "portal"))
            .respond_with(ResponseTemplate::new(200).set_body_string("results"))
            .expect(1)
            .mount(&server)
            .await;

        let q = doc.query_selector(&["#q"]).unwrap();
        let go = doc.query_selector(&["#go"]).unwrap();
        doc.set_value(&q, "portal").unwrap();
        doc.click(&go).await.unwrap();

        let requests = server.received_requests().await.unwrap();
        assert_eq!(requests.last().unwrap().url.query(), Some("q=portal"));
    }

    #[tokio::test]
    async fn query_selector_tries_selectors_in_order_and_skips_invalid() {
        let server = MockServer::start().await;
        let doc = document_at(&server, DESKTOP_PAGE).await;

        let found = doc
            .query_selector(&["#missing", "input[", "input[type=\"password\"]", "#username"])
            .unwrap();
        assert_eq!(found, ElementHandle::new("input[type=\"password\"]"));
        assert_eq!(doc.query_selector(&["#missing"]), None);
    }

    #[tokio::test]
    async fn set_value_rejects_non_text_controls() {
        let server = MockServer::start().await;
        let mut doc = document_at(&server, DESKTOP_PAGE).await;

        let button = doc.query_selector(&["#login-account"]).unwrap();
        assert!(doc.set_value(&button, "x").is_err());
    }

    #[tokio::test]
    async fn load_fails_on_http_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let mut doc = HttpDocument::new(reqwest::Client::new());
        assert!(doc.load(&server.uri()).await.is_err());
        assert_eq!(doc.query_selector(&["body"]), None);
    }
}
