//! Card host runtime.
//!
//! `CardRuntime` owns the host document, the virtual clock and task queue,
//! and the card table. All card work runs on one logical thread: drivers
//! call `advance` to move virtual time forward, and feed external stimuli
//! (image settlement, pointer clicks) through the runtime handle.
//!
//! Event handlers never run under the core lock. Mutations push their
//! emissions into an outbox that is drained after the lock drops, so a
//! handler may re-enter the public API freely.

mod scheduler;

pub(crate) use scheduler::{Scheduler, TaskId, TaskKind};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{Value, json};

use crate::boundary::{Boundary, ClickTarget, IMG_FAILED_CLASS};
use crate::card::{Card, CardId, CardState};
use crate::config::{CardOptions, HostConfig, validate_options};
use crate::dom::{Document, NodeId};
use crate::error::{CardError, Result};
use crate::events::{EventPayload, EventType, Handler};
use crate::geometry::Size;
use crate::logging::{LogLevel, event_with_fields};
use crate::metrics::RuntimeMetrics;

/// One event ready for dispatch: the handler snapshot taken at emission
/// time plus the payload they all receive.
pub(crate) struct Emission {
    pub handlers: Vec<Handler>,
    pub payload: EventPayload,
}

pub(crate) struct RuntimeCore {
    pub config: HostConfig,
    pub doc: Document,
    pub scheduler: Scheduler,
    pub cards: HashMap<CardId, CardState>,
    /// Host node -> owning card, for routing stimuli by ancestry.
    pub hosts: HashMap<NodeId, CardId>,
    pub allow: crate::sanitize::AllowList,
    pub outbox: Vec<Emission>,
    pub next_card: u64,
    pub last_metrics_emit: Duration,
}

impl RuntimeCore {
    fn new(config: HostConfig) -> Self {
        Self {
            config,
            doc: Document::new(),
            scheduler: Scheduler::new(),
            cards: HashMap::new(),
            hosts: HashMap::new(),
            allow: crate::sanitize::AllowList::default(),
            outbox: Vec::new(),
            next_card: 0,
            last_metrics_emit: Duration::ZERO,
        }
    }

    pub(crate) fn log(&self, level: LogLevel, target: &str, message: &str, fields: Vec<(String, Value)>) {
        if let Some(logger) = &self.config.logger {
            let _ = logger.log_event(event_with_fields(level, target, message, fields));
        }
    }

    pub(crate) fn with_metrics(&self, op: impl FnOnce(&mut RuntimeMetrics)) {
        if let Some(handle) = &self.config.metrics {
            op(&mut handle.lock().expect("metrics mutex poisoned"));
        }
    }

    /// Queue an event for dispatch. No-op once the card is destroyed.
    pub(crate) fn emit(&mut self, card_id: CardId, event: EventType, fields: Vec<(String, Value)>) {
        let handlers = {
            let Some(card) = self.cards.get(&card_id) else {
                return;
            };
            if card.destroyed {
                return;
            }
            card.listeners.handlers(event)
        };
        self.with_metrics(|metrics| metrics.record_event_dispatched());
        if handlers.is_empty() {
            return;
        }
        let mut payload = EventPayload::new();
        payload.insert("card".to_string(), json!(card_id.to_string()));
        payload.insert("event".to_string(), json!(event.as_str()));
        for (key, value) in fields {
            payload.insert(key, value);
        }
        self.outbox.push(Emission { handlers, payload });
    }

    pub(crate) fn emit_error(&mut self, card_id: CardId, message: String) {
        self.emit(
            card_id,
            EventType::Error,
            vec![("message".to_string(), json!(message))],
        );
    }

    fn handle_task(&mut self, task: TaskId, kind: TaskKind) {
        match kind {
            TaskKind::Debounce(card) => self.on_debounce(card, task),
            TaskKind::PassTimeout(card) => self.on_pass_timeout(card, task),
            TaskKind::WaitTimeout(card) => self.on_wait_timeout(card, task),
            TaskKind::Frame(card) => self.on_frame(card, task),
            TaskKind::Relaunch(card, width) => self.on_relaunch(card, width),
        }
    }

    fn maybe_emit_metrics(&mut self) {
        let interval = self.config.metrics_interval;
        if interval.is_zero() {
            return;
        }
        let (Some(logger), Some(handle)) = (&self.config.logger, &self.config.metrics) else {
            return;
        };
        let now = self.scheduler.now();
        if now < self.last_metrics_emit + interval {
            return;
        }
        self.last_metrics_emit = now;
        let snapshot = handle.lock().expect("metrics mutex poisoned").snapshot(now);
        let _ = logger.log_event(snapshot.to_log_event(&self.config.metrics_target));
    }

    fn build_card(&mut self, container: NodeId, options: CardOptions) -> Result<CardId> {
        if let Err(err) = validate_options(&options, &self.config.resize_bounds) {
            self.log(
                LogLevel::Error,
                "card::runtime",
                "card_rejected",
                vec![("reason".to_string(), json!(err.to_string()))],
            );
            return Err(err);
        }
        if !self.doc.is_alive(container) {
            let err = CardError::validation("container", "mount target is not in the document");
            self.log(
                LogLevel::Error,
                "card::runtime",
                "card_rejected",
                vec![("reason".to_string(), json!(err.to_string()))],
            );
            return Err(err);
        }
        let boundary = Boundary::build(&mut self.doc, &options)?;
        if let Err(err) = boundary.set_markup(&mut self.doc, &options.html, &self.allow) {
            self.doc.remove_subtree(boundary.host);
            self.log(
                LogLevel::Error,
                "card::runtime",
                "card_rejected",
                vec![("reason".to_string(), json!(err.to_string()))],
            );
            return Err(err);
        }
        for (key, value) in &options.data {
            boundary.apply_field(&mut self.doc, key, value);
        }
        self.doc.append_child(container, boundary.host);

        self.next_card += 1;
        let id = CardId::from_raw(self.next_card);
        self.hosts.insert(boundary.host, id);
        let target_width = options.target_width;
        self.cards.insert(id, CardState::new(id, options, boundary));

        self.with_metrics(|metrics| metrics.record_card_created());
        self.log(
            LogLevel::Info,
            "card::runtime",
            "card_created",
            vec![
                ("card".to_string(), json!(id.to_string())),
                ("target_width".to_string(), json!(target_width)),
            ],
        );
        self.request_resize(id, None);
        Ok(id)
    }

    fn owner_of(&self, node: NodeId) -> Option<CardId> {
        self.doc
            .ancestors_inclusive(node)
            .into_iter()
            .find_map(|ancestor| self.hosts.get(&ancestor).copied())
    }

    /// Record an image transition and route it to the owning card's active
    /// settlement waits. Returns false for a duplicate transition.
    fn settle_image(&mut self, node: NodeId, natural: Option<Size>) -> bool {
        let ok = natural.is_some();
        let changed = match natural {
            Some(size) => self.doc.mark_image_loaded(node, size),
            None => self.doc.mark_image_failed(node),
        };
        if !changed {
            return false;
        }
        if !ok {
            self.doc.add_class(node, IMG_FAILED_CLASS);
        }
        if let Some(owner) = self.owner_of(node) {
            self.note_image_settled(owner, node, ok);
        }
        true
    }

    fn handle_click(&mut self, target: NodeId) {
        let Some(card_id) = self.owner_of(target) else {
            return;
        };
        let (boundary, editable) = {
            let Some(card) = self.cards.get(&card_id) else {
                return;
            };
            (card.boundary, card.options.editable)
        };
        match boundary.delegated_click(&self.doc, target, editable) {
            ClickTarget::Image { key, .. } => self.emit(
                card_id,
                EventType::ImgClick,
                vec![("key".to_string(), json!(key))],
            ),
            ClickTarget::Field { key, .. } => self.emit(
                card_id,
                EventType::FieldClick,
                vec![("key".to_string(), json!(key))],
            ),
            ClickTarget::Background => self.emit(card_id, EventType::CardClick, Vec::new()),
        }
    }
}

/// Drain the emission outbox and run handlers outside the lock. Handlers
/// may push further emissions; the loop runs until the outbox stays empty.
pub(crate) fn dispatch_pending(core: &Arc<Mutex<RuntimeCore>>) {
    loop {
        let batch = {
            let mut guard = core.lock().expect("runtime mutex poisoned");
            std::mem::take(&mut guard.outbox)
        };
        if batch.is_empty() {
            return;
        }
        for emission in batch {
            for handler in &emission.handlers {
                handler(&emission.payload);
            }
        }
    }
}

/// Cloneable handle to the card host. All clones share one core.
#[derive(Clone)]
pub struct CardRuntime {
    core: Arc<Mutex<RuntimeCore>>,
}

impl Default for CardRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl CardRuntime {
    pub fn new() -> Self {
        Self::with_config(HostConfig::default())
    }

    pub fn with_config(config: HostConfig) -> Self {
        Self {
            core: Arc::new(Mutex::new(RuntimeCore::new(config))),
        }
    }

    /// Create a detached mount target in the host document.
    pub fn create_container(&self) -> NodeId {
        self.core
            .lock()
            .expect("runtime mutex poisoned")
            .doc
            .create_element("card-root")
    }

    /// Run the construction pipeline and mount the card into `container`.
    /// The first resize is scheduled, not run; drive it with [`advance`].
    ///
    /// [`advance`]: CardRuntime::advance
    pub fn create_card(&self, container: NodeId, options: CardOptions) -> Result<Card> {
        let built = {
            let mut core = self.core.lock().expect("runtime mutex poisoned");
            core.build_card(container, options)
        };
        dispatch_pending(&self.core);
        built.map(|id| Card::new(id, Arc::clone(&self.core)))
    }

    /// Construct many cards, one result per config. A failing config does
    /// not abort the rest of the batch.
    pub fn batch_create(
        &self,
        configs: impl IntoIterator<Item = (NodeId, CardOptions)>,
    ) -> Vec<Result<Card>> {
        configs
            .into_iter()
            .map(|(container, options)| self.create_card(container, options))
            .collect()
    }

    /// Move virtual time forward by `delta`, running every task that comes
    /// due, in (due, enqueue) order. Emissions are dispatched after each
    /// task so handlers observe a consistent document.
    pub fn advance(&self, delta: Duration) {
        let limit = {
            let core = self.core.lock().expect("runtime mutex poisoned");
            core.scheduler.now() + delta
        };
        loop {
            let ran = {
                let mut core = self.core.lock().expect("runtime mutex poisoned");
                match core.scheduler.pop_due(limit) {
                    Some((task, kind)) => {
                        core.handle_task(task, kind);
                        core.maybe_emit_metrics();
                        true
                    }
                    None => {
                        core.scheduler.settle_clock(limit);
                        core.maybe_emit_metrics();
                        false
                    }
                }
            };
            dispatch_pending(&self.core);
            if !ran {
                break;
            }
        }
    }

    /// Run tasks already due at the current instant without moving time.
    pub fn pump(&self) {
        self.advance(Duration::ZERO);
    }

    /// Current virtual time.
    pub fn now(&self) -> Duration {
        self.core.lock().expect("runtime mutex poisoned").scheduler.now()
    }

    /// External stimulus: an image finished loading with `natural` size.
    /// Returns false when the node already settled (duplicate event).
    pub fn image_loaded(&self, node: NodeId, natural: Size) -> bool {
        let changed = {
            let mut core = self.core.lock().expect("runtime mutex poisoned");
            core.settle_image(node, Some(natural))
        };
        dispatch_pending(&self.core);
        changed
    }

    /// External stimulus: an image load failed. The element receives the
    /// failure marker class and counts as settled-failed.
    pub fn image_failed(&self, node: NodeId) -> bool {
        let changed = {
            let mut core = self.core.lock().expect("runtime mutex poisoned");
            core.settle_image(node, None)
        };
        dispatch_pending(&self.core);
        changed
    }

    /// External stimulus: a pointer click landed on `target`. Classified by
    /// delegation inside the owning card's boundary.
    pub fn click(&self, target: NodeId) {
        {
            let mut core = self.core.lock().expect("runtime mutex poisoned");
            core.handle_click(target);
        }
        dispatch_pending(&self.core);
    }

    /// Read-only access to the host document.
    pub fn inspect<R>(&self, op: impl FnOnce(&Document) -> R) -> R {
        let core = self.core.lock().expect("runtime mutex poisoned");
        op(&core.doc)
    }

    pub fn metrics(&self) -> Option<Arc<Mutex<RuntimeMetrics>>> {
        self.core
            .lock()
            .expect("runtime mutex poisoned")
            .config
            .metrics_handle()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::HIDDEN_CLASS;
    use crate::engine::EnginePhase;
    use crate::logging::{Logger, MemorySink};
    use std::collections::BTreeMap;
    use std::sync::Mutex;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn metered_runtime() -> (CardRuntime, Arc<Mutex<RuntimeMetrics>>) {
        let mut config = HostConfig::default();
        config.enable_metrics();
        let handle = config.metrics_handle().unwrap();
        (CardRuntime::with_config(config), handle)
    }

    fn make_card(runtime: &CardRuntime, html: &str) -> Card {
        let container = runtime.create_container();
        runtime
            .create_card(container, CardOptions::default().with_html(html))
            .unwrap()
    }

    fn overlay_hidden(runtime: &CardRuntime, card: &Card) -> bool {
        let host = card.host_node().unwrap();
        runtime.inspect(|doc| {
            let overlay = doc.children(host)[1];
            doc.has_class(overlay, HIDDEN_CLASS)
        })
    }

    fn host_style(runtime: &CardRuntime, card: &Card, property: &str) -> Option<String> {
        let host = card.host_node().unwrap();
        runtime.inspect(|doc| doc.style(host, property).map(str::to_string))
    }

    fn content_style(runtime: &CardRuntime, card: &Card, property: &str) -> Option<String> {
        let content = card.content_node().unwrap();
        runtime.inspect(|doc| doc.style(content, property).map(str::to_string))
    }

    fn first_image(runtime: &CardRuntime, card: &Card) -> NodeId {
        let content = card.content_node().unwrap();
        runtime.inspect(|doc| doc.images_under(content)[0])
    }

    #[test]
    fn first_resize_settles_after_creation() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, "<p>hello</p>");
        assert!(!overlay_hidden(&runtime, &card));

        runtime.advance(ms(200));
        assert!(overlay_hidden(&runtime, &card));
        assert_eq!(card.phase(), EnginePhase::Idle);
        assert_eq!(card.applied_scale(), 1.0);
        assert_eq!(host_style(&runtime, &card, "width").as_deref(), Some("160px"));
        // "hello" measures 40x16 at the fixed character cell.
        assert_eq!(host_style(&runtime, &card, "height").as_deref(), Some("16px"));
    }

    #[test]
    fn rapid_resizes_coalesce_into_one_pass() {
        let (runtime, metrics) = metered_runtime();
        let card = make_card(&runtime, "<p>hello</p>");
        card.resize(Some(200.0));
        card.resize(Some(300.0));
        runtime.advance(ms(200));

        let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snapshot.resize_passes, 1);
        assert_eq!(snapshot.coalesced_requests, 2);
        // Last width wins.
        assert_eq!(host_style(&runtime, &card, "width").as_deref(), Some("300px"));
    }

    #[test]
    fn out_of_range_widths_are_dropped_silently() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, "<p>hello</p>");
        runtime.advance(ms(200));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        card.on(
            crate::events::EventType::Error,
            Arc::new(move |payload| sink.lock().unwrap().push(payload.clone())),
        );
        card.resize(Some(50.0));
        runtime.advance(ms(200));

        assert_eq!(host_style(&runtime, &card, "width").as_deref(), Some("160px"));
        assert_eq!(card.phase(), EnginePhase::Idle);
        assert!(errors.lock().unwrap().is_empty());
    }

    #[test]
    fn measurement_cache_survives_resizes_but_not_content_changes() {
        let (runtime, metrics) = metered_runtime();
        let card = make_card(&runtime, "<p>hello</p>");
        runtime.advance(ms(200));
        card.resize(Some(200.0));
        runtime.advance(ms(200));

        let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snapshot.measurements, 1);
        assert_eq!(snapshot.measurement_cache_hits, 1);

        card.set_html("<p>goodbye</p>");
        runtime.advance(ms(200));
        let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snapshot.measurements, 2);
    }

    #[test]
    fn content_mutated_mid_pass_is_remeasured_at_settlement() {
        let mut config = HostConfig::default();
        config.debounce = ms(10);
        config.enable_metrics();
        let metrics = config.metrics_handle().unwrap();
        let runtime = CardRuntime::with_config(config);
        let card = make_card(&runtime, r#"<p data-field="label">ab</p>"#);
        runtime.advance(ms(50));
        assert_eq!(card.applied_scale(), 1.0);

        // New markup brings a pending image, so the next pass suspends.
        card.set_html(r#"<img src="late.png"/><p data-field="label">ab</p>"#);
        runtime.advance(ms(15));
        assert_eq!(card.phase(), EnginePhase::Scaling);

        // Mutate the content while the pass is suspended on the image.
        let mut data = BTreeMap::new();
        data.insert("label".to_string(), "y".repeat(100));
        card.set_content(None, data);
        runtime.advance(ms(15));
        assert_eq!(card.phase(), EnginePhase::Scaling);

        let img = first_image(&runtime, &card);
        assert!(runtime.image_loaded(img, Size::new(40.0, 16.0)));
        runtime.advance(ms(100));

        // The applied scale reflects the mutated content (100 characters,
        // natural width 800), not the snapshot taken before the mutation.
        assert_eq!(card.phase(), EnginePhase::Idle);
        assert_eq!(card.applied_scale(), 0.2);
        assert_eq!(content_style(&runtime, &card, "width").as_deref(), Some("800px"));
        let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snapshot.measurements, 2);
        assert_eq!(snapshot.measurement_cache_hits, 1);
    }

    #[test]
    fn set_html_swaps_markup_without_content_change_events() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, "<p>a</p>");
        let fired = Arc::new(Mutex::new(Vec::new()));
        let log = fired.clone();
        card.on(
            crate::events::EventType::ContentChange,
            Arc::new(move |payload| log.lock().unwrap().push(payload.clone())),
        );

        card.set_html("<p>b</p>");
        runtime.advance(ms(200));
        assert!(fired.lock().unwrap().is_empty());

        // Field-data changes still announce themselves with field and value.
        let mut data = BTreeMap::new();
        data.insert("k".to_string(), "v".to_string());
        card.set_content(None, data);
        let events = fired.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["field"].as_str(), Some("k"));
        assert_eq!(events[0]["value"].as_str(), Some("v"));
    }

    #[test]
    fn scale_clamps_to_the_allowed_range() {
        let runtime = CardRuntime::new();
        // 200 characters on one line: natural width 1600, raw scale 0.1.
        let wide = make_card(&runtime, &format!("<p>{}</p>", "x".repeat(200)));
        let narrow = make_card(&runtime, "<p>hi</p>");
        runtime.advance(ms(200));

        assert_eq!(wide.applied_scale(), 0.2);
        assert_eq!(content_style(&runtime, &wide, "width").as_deref(), Some("800px"));
        assert_eq!(
            content_style(&runtime, &wide, "transform").as_deref(),
            Some("scale(0.2)")
        );
        // Content narrower than the target never scales up.
        assert_eq!(narrow.applied_scale(), 1.0);
    }

    #[test]
    fn pass_blocks_on_pending_images_until_settlement() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<img src="a.png"/>"#);
        runtime.advance(ms(60));
        // Debounce fired, pass is waiting on the image.
        assert!(!overlay_hidden(&runtime, &card));
        assert_eq!(card.phase(), EnginePhase::Scaling);

        let img = first_image(&runtime, &card);
        assert!(runtime.image_loaded(img, Size::new(100.0, 50.0)));
        runtime.advance(ms(20));
        assert!(overlay_hidden(&runtime, &card));
        assert_eq!(host_style(&runtime, &card, "height").as_deref(), Some("50px"));
    }

    #[test]
    fn settlement_timeout_completes_the_pass_and_marks_pending_images() {
        let sink = MemorySink::new();
        let mut config = HostConfig::default();
        config.debounce = ms(10);
        config.image_timeout = ms(100);
        config.logger = Some(Logger::new(sink.clone()));
        config.enable_metrics();
        let metrics = config.metrics_handle().unwrap();
        let runtime = CardRuntime::with_config(config);
        let card = make_card(&runtime, r#"<img src="slow.png" width="80" height="40"/>"#);

        runtime.advance(ms(300));
        assert!(overlay_hidden(&runtime, &card));
        assert_eq!(card.phase(), EnginePhase::Idle);

        let img = first_image(&runtime, &card);
        assert!(runtime.inspect(|doc| doc.has_class(img, IMG_FAILED_CLASS)));
        let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snapshot.settlement_timeouts, 1);

        let events = sink.events();
        let timed_out: Vec<_> = events
            .iter()
            .filter(|event| event.message == "settlement_timed_out")
            .collect();
        assert_eq!(timed_out.len(), 1);
        assert_eq!(timed_out[0].fields["pending"].as_u64(), Some(1));
        let requested = events
            .iter()
            .find(|event| event.message == "resize_requested")
            .unwrap();
        assert_eq!(requested.fields["phase"].as_str(), Some("debouncing"));
    }

    #[test]
    fn duplicate_image_settlement_is_rejected() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<img src="a.png"/>"#);
        let img = first_image(&runtime, &card);
        assert!(runtime.image_loaded(img, Size::new(10.0, 10.0)));
        assert!(!runtime.image_failed(img));
        assert!(!runtime.image_loaded(img, Size::new(20.0, 20.0)));
    }

    #[test]
    fn handlers_run_in_registration_order_with_card_id() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<span data-field="name">?</span>"#);
        let order = Arc::new(Mutex::new(Vec::new()));

        let first = order.clone();
        card.on(
            crate::events::EventType::ContentChange,
            Arc::new(move |payload| {
                first
                    .lock()
                    .unwrap()
                    .push(("a", payload["card"].as_str().unwrap().to_string()));
            }),
        );
        let second = order.clone();
        card.on(
            crate::events::EventType::ContentChange,
            Arc::new(move |payload| {
                second
                    .lock()
                    .unwrap()
                    .push(("b", payload["card"].as_str().unwrap().to_string()));
            }),
        );

        let mut data = BTreeMap::new();
        data.insert("name".to_string(), "Ada".to_string());
        card.set_content(None, data);

        let seen = order.lock().unwrap().clone();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0].0, "a");
        assert_eq!(seen[1].0, "b");
        assert_eq!(seen[0].1, card.id().to_string());
    }

    #[test]
    fn destroyed_cards_ignore_every_operation() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, "<p>x</p>");
        runtime.advance(ms(200));
        let host = card.host_node().unwrap();

        card.destroy();
        card.destroy();
        assert!(card.is_destroyed());
        assert!(runtime.inspect(|doc| !doc.is_alive(host)));

        let events = Arc::new(Mutex::new(0usize));
        let counter = events.clone();
        card.on(
            crate::events::EventType::ContentChange,
            Arc::new(move |_| *counter.lock().unwrap() += 1),
        );
        card.set_html("<p>y</p>").resize(Some(300.0));
        runtime.advance(ms(500));
        assert_eq!(*events.lock().unwrap(), 0);

        let wait = card.wait_for_images(None);
        assert!(wait.is_resolved());
    }

    #[test]
    fn destroy_mid_pass_aborts_at_the_next_task_boundary() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<img src="a.png"/>"#);
        runtime.advance(ms(60));
        assert_eq!(card.phase(), EnginePhase::Scaling);
        let img = first_image(&runtime, &card);

        card.destroy();
        // The arena transition still happens, but no card consumes it.
        assert!(runtime.image_loaded(img, Size::new(10.0, 10.0)));
        runtime.advance(ms(10_000));
        assert_eq!(card.phase(), EnginePhase::Idle);
    }

    #[test]
    fn wait_for_images_resolves_on_settlement() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<img src="a.png"/><img src="b.png"/>"#);
        let content = card.content_node().unwrap();
        let images = runtime.inspect(|doc| doc.images_under(content));

        let wait = card.wait_for_images(None);
        assert!(!wait.is_resolved());

        runtime.image_loaded(images[0], Size::new(10.0, 10.0));
        assert!(!wait.is_resolved());
        runtime.image_failed(images[1]);

        let report = wait.report().unwrap();
        assert!(!report.all_loaded);
        assert_eq!(report.failed, 1);
        assert_eq!(report.total, 2);
        assert!(!report.timed_out);
    }

    #[test]
    fn wait_for_images_times_out_on_the_virtual_clock() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<img src="a.png"/>"#);
        let wait = card.wait_for_images(Some(ms(50)));

        runtime.advance(ms(40));
        assert!(!wait.is_resolved());
        runtime.advance(ms(20));
        let report = wait.report().unwrap();
        assert!(report.timed_out);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn zero_image_content_resolves_waits_immediately() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, "<p>no images</p>");
        let report = card.wait_for_images(None).report().unwrap();
        assert!(report.all_loaded);
        assert_eq!(report.total, 0);
    }

    #[test]
    fn batch_create_collects_per_config_results() {
        let runtime = CardRuntime::new();
        let container = runtime.create_container();
        let results = runtime.batch_create([
            (container, CardOptions::default().with_html("<p>ok</p>")),
            (container, CardOptions::default().with_target_width(12.0)),
            (container, CardOptions::default().with_html("<p>also ok</p>")),
        ]);

        assert!(results[0].is_ok());
        assert!(matches!(results[1], Err(CardError::Validation { .. })));
        assert!(results[2].is_ok());
        assert_ne!(
            results[0].as_ref().unwrap().id(),
            results[2].as_ref().unwrap().id()
        );
    }

    #[test]
    fn create_card_rejects_unparseable_markup() {
        let runtime = CardRuntime::new();
        let container = runtime.create_container();
        let err = runtime
            .create_card(
                container,
                CardOptions::default().with_html(r#"<p title="broken>"#),
            )
            .unwrap_err();
        assert!(matches!(err, CardError::Markup(_)));
        assert!(runtime.inspect(|doc| doc.children(container).is_empty()));
    }

    #[test]
    fn clicks_classify_by_nearest_ancestor() {
        let runtime = CardRuntime::new();
        let container = runtime.create_container();
        let card = runtime
            .create_card(
                container,
                CardOptions::default()
                    .with_html(r#"<div data-field="bio"><img src="a.png" data-key="pic"/></div>"#)
                    .editable(true),
            )
            .unwrap();
        let content = card.content_node().unwrap();
        let (field, img) = runtime.inspect(|doc| {
            let field = doc.children(content)[0];
            (field, doc.children(field)[0])
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        for event in [
            crate::events::EventType::ImgClick,
            crate::events::EventType::FieldClick,
            crate::events::EventType::CardClick,
        ] {
            let log = seen.clone();
            card.on(
                event,
                Arc::new(move |payload| {
                    log.lock().unwrap().push((
                        payload["event"].as_str().unwrap().to_string(),
                        payload
                            .get("key")
                            .and_then(|value| value.as_str())
                            .map(str::to_string),
                    ));
                }),
            );
        }

        runtime.click(img);
        runtime.click(field);
        runtime.click(content);

        let seen = seen.lock().unwrap().clone();
        assert_eq!(
            seen,
            vec![
                ("img-click".to_string(), Some("pic".to_string())),
                ("field-click".to_string(), Some("bio".to_string())),
                ("card-click".to_string(), None),
            ]
        );
    }

    #[test]
    fn non_editable_cards_emit_only_card_click() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<img src="a.png" data-key="pic"/>"#);
        let img = first_image(&runtime, &card);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        card.on(
            crate::events::EventType::CardClick,
            Arc::new(move |payload| {
                log.lock()
                    .unwrap()
                    .push(payload["event"].as_str().unwrap().to_string());
            }),
        );
        runtime.click(img);
        assert_eq!(*seen.lock().unwrap(), vec!["card-click".to_string()]);
    }

    #[test]
    fn pending_width_relaunches_with_the_last_request() {
        let mut config = HostConfig::default();
        config.debounce = ms(10);
        config.enable_metrics();
        let metrics = config.metrics_handle().unwrap();
        let runtime = CardRuntime::with_config(config);
        let card = make_card(&runtime, r#"<img src="a.png"/>"#);

        runtime.advance(ms(20));
        assert_eq!(card.phase(), EnginePhase::Scaling);

        // Arrives mid-pass: remembered, not run.
        card.resize(Some(350.0));
        card.resize(Some(400.0));
        runtime.advance(ms(15));
        assert_eq!(card.phase(), EnginePhase::Scaling);

        let img = first_image(&runtime, &card);
        runtime.image_loaded(img, Size::new(100.0, 50.0));
        runtime.advance(ms(100));

        assert_eq!(host_style(&runtime, &card, "width").as_deref(), Some("400px"));
        assert_eq!(card.phase(), EnginePhase::Idle);
        let snapshot = metrics.lock().unwrap().snapshot(Duration::ZERO);
        assert_eq!(snapshot.resize_passes, 2);
    }

    #[test]
    fn operation_failures_emit_error_and_leave_the_card_unchanged() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, "<p>original</p>");
        runtime.advance(ms(200));

        let errors = Arc::new(Mutex::new(Vec::new()));
        let sink = errors.clone();
        card.on(
            crate::events::EventType::Error,
            Arc::new(move |payload| {
                sink.lock()
                    .unwrap()
                    .push(payload["message"].as_str().unwrap().to_string());
            }),
        );
        card.set_html(r#"<p title="broken>"#);

        assert_eq!(errors.lock().unwrap().len(), 1);
        let content = card.content_node().unwrap();
        let text = runtime.inspect(|doc| {
            let p = doc.children(content)[0];
            doc.text(doc.children(p)[0]).unwrap().to_string()
        });
        assert_eq!(text, "original");
    }

    #[test]
    fn handlers_may_reenter_the_public_api() {
        let runtime = CardRuntime::new();
        let card = make_card(&runtime, r#"<span data-field="n">?</span>"#);
        let reentered = Arc::new(Mutex::new(false));

        let flag = reentered.clone();
        let inner = card.clone();
        card.on(
            crate::events::EventType::ContentChange,
            Arc::new(move |_| {
                inner.resize(Some(200.0));
                *flag.lock().unwrap() = true;
            }),
        );

        let mut data = BTreeMap::new();
        data.insert("n".to_string(), "1".to_string());
        card.set_content(None, data);
        assert!(*reentered.lock().unwrap());

        runtime.advance(ms(200));
        assert_eq!(host_style(&runtime, &card, "width").as_deref(), Some("200px"));
    }

    #[test]
    fn card_ids_stay_unique_across_destruction() {
        let runtime = CardRuntime::new();
        let first = make_card(&runtime, "<p>a</p>");
        first.destroy();
        let second = make_card(&runtime, "<p>b</p>");
        assert_ne!(first.id(), second.id());
    }

    #[test]
    fn metrics_snapshots_are_emitted_on_the_virtual_interval() {
        let sink = MemorySink::new();
        let mut config = HostConfig::default();
        config.logger = Some(Logger::new(sink.clone()));
        config.enable_metrics();
        config.metrics_interval = ms(100);
        let runtime = CardRuntime::with_config(config);
        make_card(&runtime, "<p>x</p>");

        runtime.advance(ms(250));
        let snapshots: Vec<_> = sink
            .events()
            .into_iter()
            .filter(|event| event.message == "runtime_metrics")
            .collect();
        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].target, "card::runtime.metrics");
    }
}
