use std::thread;
use std::time::{Duration, Instant};

use camino::Utf8Path;
use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, USER_AGENT};
use serde_json::{Value, json};
use tracing::{debug, info, warn};

use crate::driver::{LinkHandle, PageDriver};
use crate::error::MeshError;

const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ALERT_POLL_MS: u64 = 250;

const ROW_LABEL_SCRIPT: &str = "const row = arguments[0].closest('tr'); \
     if (!row || !row.cells || row.cells.length === 0) { return null; } \
     return row.cells[0].innerText.trim();";

const CLICK_SCRIPT: &str = "arguments[0].click();";

const DISMISS_SCRIPT: &str = "const button = document.querySelector(arguments[0]); \
     if (!button) { return false; } \
     button.click(); \
     return true;";

#[derive(Debug, Clone)]
pub struct BrowserOptions {
    pub webdriver_url: String,
    pub headless: bool,
    pub link_selector: String,
    pub modal_close_selector: String,
    pub page_settle: Duration,
}

/// A Chrome session driven over the W3C WebDriver protocol (e.g. chromedriver).
///
/// The session is deleted when the value is dropped.
pub struct WebDriverSession {
    client: Client,
    session_url: String,
    options: BrowserOptions,
}

impl WebDriverSession {
    pub fn start(options: BrowserOptions, download_dir: &Utf8Path) -> Result<Self, MeshError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("mesh-fetch/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| MeshError::WebDriverHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(60))
            .build()
            .map_err(|err| MeshError::WebDriverHttp(err.to_string()))?;

        let mut args = vec!["--no-sandbox".to_string()];
        if options.headless {
            args.push("--headless=new".to_string());
        }
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": {
                        "args": args,
                        "prefs": {
                            "download.default_directory": download_dir.as_str(),
                            "download.prompt_for_download": false,
                            "download.directory_upgrade": true,
                            "profile.default_content_setting_values.automatic_downloads": 1,
                            "profile.default_content_setting_values.popups": 0,
                            "safebrowsing.enabled": true
                        }
                    }
                }
            }
        });

        let base = options.webdriver_url.trim_end_matches('/').to_string();
        let response = client
            .post(format!("{base}/session"))
            .json(&capabilities)
            .send()
            .map_err(|err| MeshError::WebDriverHttp(err.to_string()))?;
        let value = Self::handle_status(response)?;
        let session_id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| MeshError::WebDriverHttp("session response without id".to_string()))?;
        info!(session_id, "started WebDriver session");

        Ok(Self {
            client,
            session_url: format!("{base}/session/{session_id}"),
            options,
        })
    }

    pub fn navigate(&self, url: &str) -> Result<(), MeshError> {
        info!(url, "opening listing page");
        self.post("url", json!({ "url": url }))?;
        thread::sleep(self.options.page_settle);
        Ok(())
    }

    fn handle_status(response: reqwest::blocking::Response) -> Result<Value, MeshError> {
        let status = response.status();
        let body: Value = response
            .json()
            .map_err(|err| MeshError::WebDriverHttp(err.to_string()))?;
        let value = body.get("value").cloned().unwrap_or(Value::Null);
        if status.is_success() {
            return Ok(value);
        }
        let message = value
            .get("message")
            .and_then(Value::as_str)
            .or_else(|| value.get("error").and_then(Value::as_str))
            .unwrap_or("WebDriver request failed")
            .to_string();
        Err(MeshError::WebDriverStatus {
            status: status.as_u16(),
            message,
        })
    }

    fn get(&self, path: &str) -> Result<Value, MeshError> {
        let response = self
            .client
            .get(format!("{}/{path}", self.session_url))
            .send()
            .map_err(|err| MeshError::WebDriverHttp(err.to_string()))?;
        Self::handle_status(response)
    }

    fn post(&self, path: &str, body: Value) -> Result<Value, MeshError> {
        let response = self
            .client
            .post(format!("{}/{path}", self.session_url))
            .json(&body)
            .send()
            .map_err(|err| MeshError::WebDriverHttp(err.to_string()))?;
        Self::handle_status(response)
    }

    fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, MeshError> {
        self.post(
            "execute/sync",
            json!({ "script": script, "args": args }),
        )
    }

    fn element_ref(link: &LinkHandle) -> Value {
        json!({ ELEMENT_KEY: link.element })
    }

    fn alert_text(&self) -> Result<Option<String>, MeshError> {
        match self.get("alert/text") {
            Ok(value) => Ok(Some(value.as_str().unwrap_or_default().to_string())),
            Err(MeshError::WebDriverStatus { status: 404, .. }) => Ok(None),
            Err(err) => Err(err),
        }
    }
}

impl PageDriver for WebDriverSession {
    fn list_download_links(&self) -> Result<Vec<LinkHandle>, MeshError> {
        let found = self.post(
            "elements",
            json!({ "using": "css selector", "value": self.options.link_selector }),
        )?;
        let elements = found
            .as_array()
            .ok_or_else(|| MeshError::PageDriver("element search returned no list".to_string()))?;

        let mut links = Vec::with_capacity(elements.len());
        for element in elements {
            let Some(id) = element.get(ELEMENT_KEY).and_then(Value::as_str) else {
                continue;
            };
            let mut link = LinkHandle {
                element: id.to_string(),
                label: None,
            };
            link.label = row_label(
                &link.element,
                self.execute(ROW_LABEL_SCRIPT, vec![Self::element_ref(&link)]),
            );
            links.push(link);
        }
        info!(count = links.len(), "found download links");
        Ok(links)
    }

    fn click(&self, link: &LinkHandle) -> Result<(), MeshError> {
        self.execute(CLICK_SCRIPT, vec![Self::element_ref(link)])
            .map(|_| ())
            .map_err(|err| MeshError::PageDriver(format!("click failed: {err}")))
    }

    fn dismiss_modal_if_present(&self) -> Result<bool, MeshError> {
        let closed = self
            .execute(
                DISMISS_SCRIPT,
                vec![Value::String(self.options.modal_close_selector.clone())],
            )?
            .as_bool()
            .unwrap_or(false);
        if closed {
            info!("survey popup closed");
        } else {
            debug!("no survey popup present");
        }
        Ok(closed)
    }

    fn accept_confirmation_if_present(&self, timeout: Duration) -> Result<bool, MeshError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(text) = self.alert_text()? {
                info!(text = %text, "accepting download confirmation");
                self.post("alert/accept", json!({}))?;
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(Duration::from_millis(ALERT_POLL_MS));
        }
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        match self.client.delete(&self.session_url).send() {
            Ok(_) => info!("WebDriver session closed"),
            Err(err) => warn!(error = %err, "failed to close WebDriver session"),
        }
    }
}

/// Labels only steer filing in discovery mode, so a row whose label script
/// fails still gets downloaded.
fn row_label(element: &str, result: Result<Value, MeshError>) -> Option<String> {
    match result {
        Ok(value) => value
            .as_str()
            .map(str::to_string)
            .filter(|label| !label.is_empty()),
        Err(err) => {
            warn!(element, error = %err, "could not read row label");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn row_label_falls_back_when_script_fails() {
        let failed = Err(MeshError::WebDriverStatus {
            status: 404,
            message: "stale element reference".to_string(),
        });
        assert_eq!(row_label("e1", failed), None);
        assert_eq!(row_label("e1", Ok(json!(""))), None);
        assert_eq!(row_label("e1", Ok(Value::Null)), None);
        assert_eq!(row_label("e1", Ok(json!("大阪"))), Some("大阪".to_string()));
    }
}
