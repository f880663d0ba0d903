// Browser session seam.
//
// BrowserSession is the only way the harvester touches a page. Every call is
// fallible and any handle may come back `SessionError::Stale`: virtualized
// lists recycle their nodes, so handles are re-queried on every pass and
// never held across a scroll.

use std::sync::atomic::{AtomicBool, Ordering};

use anyhow::{Context, Result};
use async_trait::async_trait;
use fantoccini::elements::{Element, ElementRef};
use fantoccini::{Client, ClientBuilder, Locator};
use serde_json::Value;
use tracing::{info, warn};

use crate::capabilities::ChromeOptions;
use crate::config::AppConfig;
use crate::error::SessionError;

/// Opaque reference to a DOM node. Only valid until the page mutates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeHandle(String);

impl NodeHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

/// Argument passed to an injected script.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptArg {
    Node(NodeHandle),
    Value(Value),
}

impl From<&NodeHandle> for ScriptArg {
    fn from(node: &NodeHandle) -> Self {
        ScriptArg::Node(node.clone())
    }
}

impl From<i64> for ScriptArg {
    fn from(n: i64) -> Self {
        ScriptArg::Value(Value::from(n))
    }
}

#[async_trait]
pub trait BrowserSession: Send + Sync {
    async fn open(&self, url: &str) -> Result<(), SessionError>;

    /// All nodes currently matching `selector`. May be empty.
    async fn query_all(&self, selector: &str) -> Result<Vec<NodeHandle>, SessionError>;

    /// Descendants of `node` matching `selector`.
    async fn query_within(
        &self,
        node: &NodeHandle,
        selector: &str,
    ) -> Result<Vec<NodeHandle>, SessionError>;

    async fn text(&self, node: &NodeHandle) -> Result<String, SessionError>;

    async fn attribute(&self, node: &NodeHandle, name: &str)
        -> Result<Option<String>, SessionError>;

    async fn click(&self, node: &NodeHandle) -> Result<(), SessionError>;

    async fn run_script(&self, code: &str, args: &[ScriptArg]) -> Result<Value, SessionError>;

    /// Release the browser. Safe to call more than once.
    async fn close(&self) -> Result<(), SessionError>;
}

// ---------------------------------------------------------------------------
// WebDriver-backed session
// ---------------------------------------------------------------------------

pub struct WebDriverSession {
    client: Client,
    closed: AtomicBool,
}

impl WebDriverSession {
    pub async fn start(config: &AppConfig) -> Result<Self> {
        let options = ChromeOptions::from_config(config);
        if let Some(dir) = &options.profile_dir {
            info!(profile_dir = dir.as_str(), "Using Chrome profile");
        }

        let mut builder = ClientBuilder::native();
        builder.capabilities(options.to_capabilities());
        let client = builder
            .connect(&config.webdriver_url)
            .await
            .with_context(|| format!("Failed to start browser via {}", config.webdriver_url))?;
        info!(webdriver_url = config.webdriver_url.as_str(), "Browser session started");

        Ok(Self {
            client,
            closed: AtomicBool::new(false),
        })
    }

    fn element(&self, node: &NodeHandle) -> Element {
        Element::from_element_id(self.client.clone(), ElementRef::from(node.0.clone()))
    }

    fn handles(elements: Vec<Element>) -> Vec<NodeHandle> {
        elements
            .iter()
            .map(|element| NodeHandle(element.element_id().to_string()))
            .collect()
    }

    fn ensure_open(&self) -> Result<(), SessionError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SessionError::Transport("session already closed".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl BrowserSession for WebDriverSession {
    async fn open(&self, url: &str) -> Result<(), SessionError> {
        self.ensure_open()?;
        self.client
            .goto(url)
            .await
            .map_err(|e| SessionError::Navigation(e.to_string()))
    }

    async fn query_all(&self, selector: &str) -> Result<Vec<NodeHandle>, SessionError> {
        self.ensure_open()?;
        let elements = self.client.find_all(Locator::Css(selector)).await?;
        Ok(Self::handles(elements))
    }

    async fn query_within(
        &self,
        node: &NodeHandle,
        selector: &str,
    ) -> Result<Vec<NodeHandle>, SessionError> {
        self.ensure_open()?;
        let elements = self.element(node).find_all(Locator::Css(selector)).await?;
        Ok(Self::handles(elements))
    }

    async fn text(&self, node: &NodeHandle) -> Result<String, SessionError> {
        self.ensure_open()?;
        Ok(self.element(node).text().await?)
    }

    async fn attribute(
        &self,
        node: &NodeHandle,
        name: &str,
    ) -> Result<Option<String>, SessionError> {
        self.ensure_open()?;
        Ok(self.element(node).attr(name).await?)
    }

    async fn click(&self, node: &NodeHandle) -> Result<(), SessionError> {
        self.ensure_open()?;
        Ok(self.element(node).click().await?)
    }

    async fn run_script(&self, code: &str, args: &[ScriptArg]) -> Result<Value, SessionError> {
        self.ensure_open()?;
        let args = args
            .iter()
            .map(|arg| match arg {
                ScriptArg::Node(node) => serde_json::to_value(self.element(node))
                    .map_err(|e| SessionError::Script(format!("unencodable element: {e}"))),
                ScriptArg::Value(value) => Ok(value.clone()),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(self.client.execute(code, args).await?)
    }

    async fn close(&self) -> Result<(), SessionError> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        if let Err(e) = self.client.clone().close().await {
            warn!(error = %e, "Error closing WebDriver session");
            return Err(e.into());
        }
        Ok(())
    }
}
