//! Deferred DOM mutations performed by the fixture page.
//!
//! [`DeferredUiMutator`] writes into the result node, injects a link into the
//! delayed target after a timeout, and detaches/reattaches elements so that
//! handles captured by an automation client go stale. It owns no document or
//! timer queue of its own; both are injected.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use thiserror::Error;

use crate::config::FixtureConfig;
use crate::dom::{DomError, DomHost};
use crate::logging::FixtureLogger;
use crate::markup::{normalize_space, parse_anchors};
use crate::scheduler::{Scheduler, TimerId};
use crate::script::{FixtureCall, ScriptError};

/// Visible text of the link injected by [`DeferredUiMutator::on_ready`].
pub const DELAYED_LINK_TEXT: &str = "Delayed Link";

/// Callback run around an element recreation.
pub type EffectCallback = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum MutatorError {
    #[error(transparent)]
    Dom(#[from] DomError),
    #[error(transparent)]
    Script(#[from] ScriptError),
    #[error("no link with text '{text}' in '{container}'")]
    LinkNotFound { container: String, text: String },
}

impl MutatorError {
    pub fn is_stale_reference(&self) -> bool {
        matches!(self, MutatorError::Dom(DomError::StaleElementReference))
    }
}

/// Options for [`DeferredUiMutator::make_element_stale`].
#[derive(Default)]
pub struct StaleOptions {
    /// Delay before the recreation; the configured default when `None`.
    pub timeout: Option<Duration>,
    pub on_start: Option<EffectCallback>,
    pub on_end: Option<EffectCallback>,
}

impl StaleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn on_start(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_start = Some(Box::new(callback));
        self
    }

    pub fn on_end(mut self, callback: impl FnOnce() + Send + 'static) -> Self {
        self.on_end = Some(Box::new(callback));
        self
    }
}

impl fmt::Debug for StaleOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaleOptions")
            .field("timeout", &self.timeout)
            .field("on_start", &self.on_start.is_some())
            .field("on_end", &self.on_end.is_some())
            .finish()
    }
}

/// One effect of a stale-element firing.
pub enum StaleStep {
    Start(EffectCallback),
    Recreate(String),
    End(EffectCallback),
}

impl StaleStep {
    pub fn label(&self) -> &'static str {
        match self {
            StaleStep::Start(_) => "start",
            StaleStep::Recreate(_) => "recreate",
            StaleStep::End(_) => "end",
        }
    }
}

/// The effects a single stale-element timer runs, in order:
/// start callback, recreation, end callback.
pub struct StaleSequence {
    steps: Vec<StaleStep>,
}

impl StaleSequence {
    pub fn new(
        element_id: impl Into<String>,
        on_start: Option<EffectCallback>,
        on_end: Option<EffectCallback>,
    ) -> Self {
        let mut steps = Vec::with_capacity(3);
        steps.extend(on_start.map(StaleStep::Start));
        steps.push(StaleStep::Recreate(element_id.into()));
        steps.extend(on_end.map(StaleStep::End));
        Self { steps }
    }

    pub fn labels(&self) -> Vec<&'static str> {
        self.steps.iter().map(StaleStep::label).collect()
    }

    /// Run every step in order, stopping at the first failed recreation.
    pub fn run(self, mutator: &DeferredUiMutator) -> Result<(), MutatorError> {
        for step in self.steps {
            match step {
                StaleStep::Start(callback) | StaleStep::End(callback) => callback(),
                StaleStep::Recreate(element_id) => mutator.recreate_element(&element_id)?,
            }
        }
        Ok(())
    }
}

struct MutatorInner {
    dom: Arc<dyn DomHost>,
    scheduler: Arc<dyn Scheduler>,
    config: FixtureConfig,
    logger: FixtureLogger,
}

/// Performs the fixture page's DOM mutations against an injected host.
///
/// Cloning is cheap and clones share the same host, scheduler and logger.
#[derive(Clone)]
pub struct DeferredUiMutator {
    inner: Arc<MutatorInner>,
}

impl fmt::Debug for DeferredUiMutator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredUiMutator")
            .field("config", &self.inner.config)
            .field("logger", &self.inner.logger)
            .finish()
    }
}

impl DeferredUiMutator {
    pub fn new(
        dom: Arc<dyn DomHost>,
        scheduler: Arc<dyn Scheduler>,
        config: FixtureConfig,
    ) -> Self {
        let logger = FixtureLogger::new(config.verbose);
        Self::with_logger(dom, scheduler, config, logger)
    }

    pub fn with_logger(
        dom: Arc<dyn DomHost>,
        scheduler: Arc<dyn Scheduler>,
        config: FixtureConfig,
        logger: FixtureLogger,
    ) -> Self {
        Self {
            inner: Arc::new(MutatorInner {
                dom,
                scheduler,
                config,
                logger,
            }),
        }
    }

    pub fn config(&self) -> &FixtureConfig {
        &self.inner.config
    }

    pub fn logger(&self) -> &FixtureLogger {
        &self.inner.logger
    }

    pub fn dom(&self) -> &Arc<dyn DomHost> {
        &self.inner.dom
    }

    /// Write `value` verbatim into the result node.
    pub fn set_result(&self, value: &str) -> Result<(), MutatorError> {
        let dom = &self.inner.dom;
        let node = dom.get_node_by_id(&self.inner.config.result_id)?;
        dom.set_content(&node, value)?;
        self.inner.logger.debug(
            "result updated",
            Some("mutator"),
            Some(json!({ "value": value })),
        );
        Ok(())
    }

    /// Restore the default result message.
    pub fn reset(&self) -> Result<(), MutatorError> {
        let message = self.inner.config.default_message.clone();
        self.set_result(&message)
    }

    /// Current content of the result node.
    pub fn result_text(&self) -> Result<String, MutatorError> {
        let dom = &self.inner.dom;
        let node = dom.get_node_by_id(&self.inner.config.result_id)?;
        Ok(dom.content(&node)?)
    }

    /// Markup injected into the delayed target.
    pub fn delayed_link_markup(&self) -> String {
        let call = FixtureCall::Result(self.inner.config.delayed_link_value.clone());
        format!("<a href=\"{}\"> {DELAYED_LINK_TEXT} </a>", call.to_href())
    }

    /// Reset the result node, then schedule the delayed link injection.
    pub fn on_ready(&self) -> Result<TimerId, MutatorError> {
        self.reset()?;

        let delay = self.inner.config.ready_delay();
        let mutator = self.clone();
        let id = self.inner.scheduler.schedule_once(
            delay,
            Box::new(move || {
                if let Err(err) = mutator.inject_delayed_link() {
                    mutator.report_timer_failure("delayed link injection", &err);
                }
            }),
        );

        self.inner.logger.info(
            "delayed link scheduled",
            Some("timer"),
            Some(json!({
                "timer": id,
                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
            })),
        );
        Ok(id)
    }

    fn inject_delayed_link(&self) -> Result<(), MutatorError> {
        let dom = &self.inner.dom;
        let target = dom.get_node_by_id(&self.inner.config.delayed_target_id)?;
        dom.set_content(&target, &self.delayed_link_markup())?;
        self.inner.logger.info(
            "delayed link injected",
            Some("timer"),
            Some(json!({ "target": self.inner.config.delayed_target_id })),
        );
        Ok(())
    }

    /// Detach the element and put the same node back where it was.
    ///
    /// The document looks the same afterwards, but every handle to the element
    /// (or its descendants) captured before the call is stale.
    pub fn recreate_element(&self, element_id: &str) -> Result<(), MutatorError> {
        let dom = &self.inner.dom;
        let element = dom.get_node_by_id(element_id)?;
        let parent = dom.parent(&element)?;
        let next = dom.next_sibling(&element)?;

        let detached = dom.remove_child(&parent, &element)?;
        dom.insert_before(&parent, &detached, next.as_ref())?;

        self.inner.logger.debug(
            "element recreated",
            Some("dom"),
            Some(json!({ "element": element_id })),
        );
        Ok(())
    }

    /// After `options.timeout` (or the configured default), run the start
    /// callback, recreate the element, then run the end callback.
    pub fn make_element_stale(&self, element_id: &str, options: StaleOptions) -> TimerId {
        let StaleOptions {
            timeout,
            on_start,
            on_end,
        } = options;
        // A zero timeout counts as unset.
        let delay = timeout
            .filter(|timeout| !timeout.is_zero())
            .unwrap_or_else(|| self.inner.config.stale_timeout());
        let sequence = StaleSequence::new(element_id, on_start, on_end);
        let labels = sequence.labels();

        let mutator = self.clone();
        let id = self.inner.scheduler.schedule_once(
            delay,
            Box::new(move || {
                if let Err(err) = sequence.run(&mutator) {
                    mutator.report_timer_failure("stale element recreation", &err);
                }
            }),
        );

        self.inner.logger.debug(
            "stale element scheduled",
            Some("timer"),
            Some(json!({
                "timer": id,
                "element": element_id,
                "delay_ms": u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "steps": labels,
            })),
        );
        id
    }

    /// Execute a fixture link call.
    pub fn activate(&self, call: &FixtureCall) -> Result<(), MutatorError> {
        self.inner.logger.debug(
            "activating fixture call",
            Some("mutator"),
            Some(json!({ "call": call.to_string() })),
        );
        match call {
            FixtureCall::Result(value) => self.set_result(value),
            FixtureCall::Reset => self.reset(),
            FixtureCall::RecreateElement(element_id) => self.recreate_element(element_id),
            FixtureCall::MakeElementStale {
                element_id,
                timeout,
            } => {
                let options = StaleOptions {
                    timeout: *timeout,
                    ..StaleOptions::default()
                };
                self.make_element_stale(element_id, options);
                Ok(())
            }
        }
    }

    /// Follow the first link in `container_id` whose normalised text is `text`.
    ///
    /// A matching link without an href does nothing.
    pub fn click_link(&self, container_id: &str, text: &str) -> Result<(), MutatorError> {
        let dom = &self.inner.dom;
        let container = dom.get_node_by_id(container_id)?;
        let content = dom.content(&container)?;
        let wanted = normalize_space(text);

        let anchor = parse_anchors(&content)
            .into_iter()
            .find(|anchor| anchor.text == wanted)
            .ok_or_else(|| MutatorError::LinkNotFound {
                container: container_id.to_string(),
                text: wanted.clone(),
            })?;

        match anchor.href {
            Some(href) => self.activate(&FixtureCall::parse_href(&href)?),
            None => Ok(()),
        }
    }

    /// Timer callbacks have no caller to return to; failures go to the log.
    fn report_timer_failure(&self, what: &str, err: &MutatorError) {
        self.inner.logger.error(
            format!("{what} failed: {err}"),
            Some("timer"),
            None,
        );
    }
}
