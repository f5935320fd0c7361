//! Fixture page facade.
//!
//! [`FixturePage`] bundles an [`InMemoryDom`], a scheduler and the
//! [`DeferredUiMutator`] wired to both, and exposes the operations an
//! automation client performs against the page: locating elements, reading
//! their text, asserting on visible text and clicking links by their label.

use std::sync::Arc;

use crate::config::FixtureConfig;
use crate::dom::{DomError, DomHost, InMemoryDom, NodeRef};
use crate::logging::FixtureLogger;
use crate::markup::{normalize_space, parse_anchors, visible_text};
use crate::mutator::{DeferredUiMutator, MutatorError};
use crate::scheduler::{Scheduler, TimerId};
use crate::script::FixtureCall;
use crate::wait::{StepError, WaitOptions};

/// Element that `makeElementStale` links on the links page target.
pub const STALE_TARGET_ID: &str = "stale_target";

/// Links rendered into the `#links` container of [`FixturePage::links_page`]:
/// (label, call).
fn standard_links() -> Vec<(&'static str, FixtureCall)> {
    vec![
        ("Link 1", FixtureCall::Result("link_1".into())),
        ("Link 2", FixtureCall::Result("link_2".into())),
        ("Link 3", FixtureCall::Result("link_3".into())),
        ("Spaces between me", FixtureCall::Result("space_between_me".into())),
        ("Edit", FixtureCall::Result("Edit link clicked".into())),
        ("Reset", FixtureCall::Reset),
        (
            "Make stale",
            FixtureCall::MakeElementStale {
                element_id: STALE_TARGET_ID.into(),
                timeout: None,
            },
        ),
    ]
}

/// A fixture document driven by a [`DeferredUiMutator`].
pub struct FixturePage<S: Scheduler + 'static> {
    dom: Arc<InMemoryDom>,
    scheduler: Arc<S>,
    mutator: DeferredUiMutator,
}

impl<S: Scheduler + 'static> FixturePage<S> {
    /// Wrap an existing document. The document must already contain the
    /// configured result and delayed-target elements for the mutator to work.
    pub fn new(config: FixtureConfig, dom: Arc<InMemoryDom>, scheduler: Arc<S>) -> Self {
        let logger = FixtureLogger::new(config.verbose);
        Self::with_logger(config, dom, scheduler, logger)
    }

    pub fn with_logger(
        config: FixtureConfig,
        dom: Arc<InMemoryDom>,
        scheduler: Arc<S>,
        logger: FixtureLogger,
    ) -> Self {
        let host: Arc<dyn DomHost> = dom.clone();
        let timers: Arc<dyn Scheduler> = scheduler.clone();
        let mutator = DeferredUiMutator::with_logger(host, timers, config, logger);
        Self {
            dom,
            scheduler,
            mutator,
        }
    }

    /// Build the "links" fixture document:
    /// `body > [h1, p#result, div#wait_for, div#links, p#stale_target]`.
    pub fn links_page(config: FixtureConfig, scheduler: Arc<S>) -> Result<Self, DomError> {
        let dom = Arc::new(InMemoryDom::new());
        let body = dom.body();

        dom.create_element(&body, "h1", None, "Links")?;
        dom.create_element(&body, "p", Some(config.result_id.as_str()), "")?;
        dom.create_element(&body, "div", Some(config.delayed_target_id.as_str()), "")?;

        let links = standard_links()
            .into_iter()
            .map(|(label, call)| format!("<a href=\"{}\">{label}</a>", call.to_href()))
            .collect::<Vec<_>>()
            .join("\n");
        dom.create_element(&body, "div", Some("links"), &links)?;
        dom.create_element(&body, "p", Some(STALE_TARGET_ID), "I will go stale")?;

        Ok(Self::new(config, dom, scheduler))
    }

    /// Run the page's ready handler.
    pub fn load(&self) -> Result<TimerId, MutatorError> {
        self.mutator.on_ready()
    }

    pub fn dom(&self) -> &Arc<InMemoryDom> {
        &self.dom
    }

    pub fn scheduler(&self) -> &Arc<S> {
        &self.scheduler
    }

    pub fn mutator(&self) -> &DeferredUiMutator {
        &self.mutator
    }

    pub fn config(&self) -> &FixtureConfig {
        self.mutator.config()
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::from_config(self.config())
    }

    pub fn find_element(&self, id: &str) -> Result<NodeRef, StepError> {
        Ok(self.dom.get_node_by_id(id)?)
    }

    /// Visible text of the element behind `node`; fails on stale handles.
    pub fn element_text(&self, node: &NodeRef) -> Result<String, StepError> {
        Ok(visible_text(&self.dom.inner_html(node)?))
    }

    /// Text of the result paragraph.
    pub fn result_text(&self) -> Result<String, StepError> {
        let node = self.find_element(&self.config().result_id)?;
        self.element_text(&node)
    }

    /// Assert that `text` appears somewhere in the visible document.
    pub fn should_see(&self, text: &str) -> Result<(), StepError> {
        let wanted = normalize_space(text);
        if visible_text(&self.dom.to_html()).contains(&wanted) {
            Ok(())
        } else {
            Err(StepError::assertion(format!("expected to see '{wanted}'")))
        }
    }

    /// Click the first link, anywhere in the document, labelled `text`.
    pub fn click_link(&self, text: &str) -> Result<(), StepError> {
        let wanted = normalize_space(text);
        for node in self.dom.attached_nodes() {
            let content = self.dom.content(&node)?;
            let Some(anchor) = parse_anchors(&content)
                .into_iter()
                .find(|anchor| anchor.text == wanted)
            else {
                continue;
            };
            if let Some(href) = anchor.href {
                let call = FixtureCall::parse_href(&href).map_err(MutatorError::from)?;
                self.mutator.activate(&call)?;
            }
            return Ok(());
        }
        Err(StepError::assertion(format!("link '{wanted}' not found")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::ManualScheduler;

    fn page() -> FixturePage<ManualScheduler> {
        FixturePage::links_page(FixtureConfig::default(), Arc::new(ManualScheduler::new()))
            .expect("links page")
    }

    #[test]
    fn links_page_layout() {
        let page = page();
        let html = page.dom().to_html();
        assert!(html.starts_with("<body><h1>Links</h1><p id=\"result\"></p><div id=\"wait_for\"></div>"));
        assert!(html.contains("<a href=\"javascript:result('link_3')\">Link 3</a>"));
        assert!(html.ends_with("<p id=\"stale_target\">I will go stale</p></body>"));
    }

    #[test]
    fn load_resets_result() {
        let page = page();
        page.load().unwrap();
        assert_eq!(page.result_text().unwrap(), "No results yet.");
        page.should_see("No results yet.").unwrap();
    }

    #[test]
    fn click_link_by_label() {
        let page = page();
        page.click_link("Spaces   between me").unwrap();
        assert_eq!(page.result_text().unwrap(), "space_between_me");

        page.click_link("Reset").unwrap();
        assert_eq!(page.result_text().unwrap(), "No results yet.");
    }

    #[test]
    fn missing_link_is_an_assertion_failure() {
        let page = page();
        let err = page.click_link("Delayed Link").unwrap_err();
        assert!(matches!(err, StepError::Assertion(_)));
        assert!(err.is_retryable());
    }

    #[test]
    fn should_see_fails_for_absent_text() {
        let page = page();
        let err = page.should_see("delayed_link").unwrap_err();
        assert_eq!(err.to_string(), "assertion failed: expected to see 'delayed_link'");
    }

    #[test]
    fn element_text_fails_once_stale() {
        let page = page();
        let target = page.find_element(STALE_TARGET_ID).unwrap();
        assert_eq!(page.element_text(&target).unwrap(), "I will go stale");

        page.click_link("Make stale").unwrap();
        page.scheduler().advance_time(500);

        let err = page.element_text(&target).unwrap_err();
        assert!(matches!(err, StepError::Dom(DomError::StaleElementReference)));
        let fresh = page.find_element(STALE_TARGET_ID).unwrap();
        assert_eq!(page.element_text(&fresh).unwrap(), "I will go stale");
    }
}
