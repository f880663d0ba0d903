// Chrome launch options for a new WebDriver session.

use fantoccini::wd::Capabilities;
use serde_json::{json, Map, Value};

use crate::config::AppConfig;

const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Chrome launch options, rendered into `goog:chromeOptions` capabilities.
#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub profile_dir: Option<String>,
    pub binary: Option<String>,
    pub window_size: (u32, u32),
    pub disable_images: bool,
    pub user_agent: Option<String>,
    pub extra_args: Vec<String>,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            profile_dir: None,
            binary: None,
            window_size: (1920, 1080),
            disable_images: true,
            user_agent: Some(DEFAULT_USER_AGENT.to_string()),
            extra_args: Vec::new(),
        }
    }
}

impl ChromeOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            headless: config.headless,
            profile_dir: config.chrome_profile_dir.clone(),
            binary: config.chrome_bin.clone(),
            ..Default::default()
        }
    }

    pub fn args(&self) -> Vec<String> {
        let mut args = Vec::new();
        if self.headless {
            args.push("--headless=new".to_string());
            args.push("--disable-gpu".to_string());
        }
        if let Some(dir) = &self.profile_dir {
            args.push(format!("--user-data-dir={dir}"));
        }
        args.extend(
            [
                "--no-sandbox",
                "--disable-dev-shm-usage",
                "--disable-blink-features=AutomationControlled",
                "--disable-extensions",
            ]
            .map(String::from),
        );
        args.push(format!(
            "--window-size={},{}",
            self.window_size.0, self.window_size.1
        ));
        if self.disable_images {
            args.push("--blink-settings=imagesEnabled=false".to_string());
        }
        if let Some(agent) = &self.user_agent {
            args.push(format!("--user-agent={agent}"));
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }

    /// Capabilities handed to `ClientBuilder::capabilities`.
    pub fn to_capabilities(&self) -> Capabilities {
        let mut chrome = Map::new();
        chrome.insert("args".into(), json!(self.args()));
        if let Some(binary) = &self.binary {
            chrome.insert("binary".into(), json!(binary));
        }
        if self.disable_images {
            chrome.insert(
                "prefs".into(),
                json!({ "profile.managed_default_content_settings.images": 2 }),
            );
        }

        let mut caps = Capabilities::new();
        caps.insert("browserName".into(), json!("chrome"));
        caps.insert("goog:chromeOptions".into(), Value::Object(chrome));
        caps
    }
}
