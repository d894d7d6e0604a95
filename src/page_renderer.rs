//! Rendered-page capability backed by a headless browser service.

use std::time::Duration;

use log::{debug, warn};

use crate::config::{Birthdate, StorefrontConfig};
use crate::error::{PipelineError, Result};
use crate::http_transport::map_ureq_error;

/// Returns fully rendered HTML for a URL.
pub trait PageRenderer {
    fn render(&self, url: &str) -> Result<String>;

    /// Startup check that the renderer is reachable. Failure is a
    /// `Configuration` error.
    fn probe(&self) -> Result<()> {
        Ok(())
    }
}

/// Puppeteer function run by Browserless for every page.
///
/// Dismisses the age gate, scrolls to trigger lazy images, returns the DOM.
const RENDER_FUNCTION: &str = r#"
export default async function ({ page, context }) {
  await page.goto(context.url, { waitUntil: "networkidle2", timeout: context.timeoutMs });
  const sleep = (ms) => new Promise((resolve) => setTimeout(resolve, ms));
  await sleep(2000);

  const fill = async (placeholder, value) => {
    const input = await page.$(`input[placeholder='${placeholder}']`);
    if (!input) return false;
    await input.click({ clickCount: 3 });
    await input.type(value);
    return true;
  };
  const gated = await fill("MM", context.month);
  if (gated) {
    await fill("DD", context.day);
    await fill("YYYY", context.year);
    const buttons = await page.$$("button");
    for (const button of buttons) {
      const label = (await page.evaluate((el) => el.textContent || "", button)).toLowerCase();
      const kind = await page.evaluate((el) => el.getAttribute("type") || "", button);
      if (label.includes("continue") || label.includes("submit") || kind === "submit") {
        await button.click();
        break;
      }
    }
    await sleep(3000);
  }

  await page.evaluate(() => window.scrollTo(0, document.body.scrollHeight));
  await sleep(2000);
  await page.evaluate(() => window.scrollTo(0, 0));
  await sleep(1000);

  return { data: await page.content(), type: "text/html" };
}
"#;

/// Renders pages through a Browserless `/function` endpoint.
pub struct BrowserlessRenderer {
    http_client: ureq::Agent,
    endpoint: String,
    token: Option<String>,
    birthdate: Birthdate,
    render_timeout: Duration,
}

impl BrowserlessRenderer {
    pub fn new(config: &StorefrontConfig) -> Self {
        let render_timeout = Duration::from_secs(config.render_timeout_secs.max(1));
        let http_client = ureq::AgentBuilder::new()
            .timeout_connect(Duration::from_secs(10))
            .timeout(render_timeout + Duration::from_secs(15))
            .build();
        let token = Some(config.browserless_token.trim().to_string()).filter(|t| !t.is_empty());
        Self {
            http_client,
            endpoint: config.browserless_endpoint.trim_end_matches('/').to_string(),
            token,
            birthdate: config.age_gate_birthdate.clone(),
            render_timeout,
        }
    }

    fn endpoint_url(&self, path: &str) -> String {
        match &self.token {
            Some(token) => format!(
                "{}{}?token={}",
                self.endpoint,
                path,
                urlencoding::encode(token)
            ),
            None => format!("{}{}", self.endpoint, path),
        }
    }
}

impl PageRenderer for BrowserlessRenderer {
    fn render(&self, url: &str) -> Result<String> {
        let function_url = self.endpoint_url("/function");
        debug!("Rendering {url}");
        let body = serde_json::json!({
            "code": RENDER_FUNCTION,
            "context": {
                "url": url,
                "month": self.birthdate.month,
                "day": self.birthdate.day,
                "year": self.birthdate.year,
                "timeoutMs": self.render_timeout.as_millis() as u64,
            },
        });
        let response = self
            .http_client
            .post(&function_url)
            .set("Content-Type", "application/json")
            .send_json(body)
            .map_err(|error| map_ureq_error(url, error))?;
        let html = response.into_string().map_err(|error| PipelineError::Network {
            url: url.to_string(),
            message: format!("Failed to read rendered page: {error}"),
        })?;
        if looks_like_age_gate(&html) {
            warn!("Page {url} still shows an age verification form");
        }
        Ok(html)
    }

    fn probe(&self) -> Result<()> {
        let version_url = self.endpoint_url("/json/version");
        self.http_client
            .get(&version_url)
            .call()
            .map(|_| ())
            .map_err(|error| {
                PipelineError::Configuration(format!(
                    "browser service at {} is unavailable ({})",
                    self.endpoint,
                    map_ureq_error(&version_url, error)
                ))
            })
    }
}

/// True when the HTML still carries the birthdate form.
pub fn looks_like_age_gate(html: &str) -> bool {
    html.contains("placeholder=\"MM\"") && html.contains("placeholder=\"YYYY\"")
        || html.contains("placeholder='MM'") && html.contains("placeholder='YYYY'")
}

#[cfg(test)]
mod tests {
    use super::{looks_like_age_gate, BrowserlessRenderer, PageRenderer};
    use crate::config::StorefrontConfig;
    use crate::error::PipelineError;

    #[test]
    fn test_age_gate_detection() {
        let gate = r#"<form><input placeholder="MM"><input placeholder="DD"><input placeholder="YYYY"></form>"#;
        assert!(looks_like_age_gate(gate));
        assert!(!looks_like_age_gate("<main><h3>Zelda</h3></main>"));
    }

    #[test]
    fn test_endpoint_url_appends_encoded_token() {
        let config = StorefrontConfig {
            browserless_endpoint: "http://browser:3000/".to_string(),
            browserless_token: "a b".to_string(),
            ..StorefrontConfig::default()
        };
        let renderer = BrowserlessRenderer::new(&config);
        assert_eq!(
            renderer.endpoint_url("/function"),
            "http://browser:3000/function?token=a%20b"
        );
    }

    #[test]
    fn test_endpoint_url_without_token() {
        let renderer = BrowserlessRenderer::new(&StorefrontConfig::default());
        assert_eq!(
            renderer.endpoint_url("/json/version"),
            "http://127.0.0.1:3000/json/version"
        );
    }

    #[test]
    fn test_probe_unreachable_service_is_configuration_error() {
        let listener =
            std::net::TcpListener::bind(("127.0.0.1", 0)).expect("loopback bind should succeed");
        let port = listener
            .local_addr()
            .expect("listener should have an address")
            .port();
        drop(listener);

        let config = StorefrontConfig {
            browserless_endpoint: format!("http://127.0.0.1:{port}"),
            ..StorefrontConfig::default()
        };
        let renderer = BrowserlessRenderer::new(&config);
        assert!(matches!(
            renderer.probe(),
            Err(PipelineError::Configuration(_))
        ));
    }
}
