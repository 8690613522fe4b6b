use std::collections::BTreeMap;
use std::time::Duration;

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use shadowcard::logging::{LogEvent, LogSink};
use shadowcard::{
    Card, CardOptions, CardRuntime, HostConfig, Logger, LoggingResult, Size,
};

#[derive(Clone, Default)]
struct NullSink;

impl LogSink for NullSink {
    fn log(&self, _event: &LogEvent) -> LoggingResult<()> {
        Ok(())
    }
}

const CARD_HTML: &str = concat!(
    r#"<div class="profile">"#,
    r#"<h2 data-field="name">?</h2>"#,
    r#"<img src="avatar.png" data-key="avatar"/>"#,
    r#"<p data-field="bio">?</p>"#,
    "</div>",
);

fn build_runtime() -> CardRuntime {
    let mut config = HostConfig::default();
    config.logger = Some(Logger::new(NullSink));
    config.enable_metrics();
    config.metrics_interval = Duration::from_millis(250);
    CardRuntime::with_config(config)
}

fn build_card(runtime: &CardRuntime) -> Card {
    let container = runtime.create_container();
    runtime
        .create_card(
            container,
            CardOptions::default()
                .with_html(CARD_HTML)
                .with_field("name", "Ada Lovelace")
                .with_field("bio", "Analytical engines and their operators."),
        )
        .expect("card")
}

fn settle_images(runtime: &CardRuntime, card: &Card) {
    let content = card.content_node().expect("content");
    let images = runtime.inspect(|doc| doc.images_under(content));
    for image in images {
        runtime.image_loaded(image, Size::new(96.0, 96.0));
    }
}

/// Full lifecycle: create, settle images, churn content, coalesced
/// resizes, destroy.
fn card_lifecycle(c: &mut Criterion) {
    c.bench_function("card_lifecycle", |b| {
        b.iter(|| {
            let runtime = build_runtime();
            let card = build_card(&runtime);
            settle_images(&runtime, &card);
            runtime.advance(Duration::from_millis(100));

            for step in 0..10u32 {
                let mut data = BTreeMap::new();
                data.insert("bio".to_string(), format!("revision {step}"));
                card.set_content(None, data);
                card.resize(Some(black_box(200.0 + f64::from(step) * 40.0)));
            }
            runtime.advance(Duration::from_millis(500));
            card.destroy();
            runtime.advance(Duration::from_millis(100));
        });
    });
}

/// Resize storm against a settled card: exercises debounce coalescing and
/// the measurement cache.
fn resize_storm(c: &mut Criterion) {
    c.bench_function("resize_storm", |b| {
        b.iter(|| {
            let runtime = build_runtime();
            let card = build_card(&runtime);
            settle_images(&runtime, &card);
            runtime.advance(Duration::from_millis(100));

            for round in 0..50u32 {
                card.resize(Some(black_box(160.0 + f64::from(round % 20) * 10.0)));
                runtime.advance(Duration::from_millis(5));
            }
            runtime.advance(Duration::from_millis(500));
        });
    });
}

criterion_group!(benches, card_lifecycle, resize_storm);
criterion_main!(benches);
