//! Integration test verifying that `#[instrument]` annotations produce
//! the expected spans on repository and cache client operations.

#![allow(clippy::expect_used)]

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use microbase_storage::{
    RollPageParam,
    testutil::{SampleDoc, memory_cache_client, sample_repository},
};
use tracing::{Event, Subscriber, field::Visit};
use tracing_subscriber::{layer::SubscriberExt, registry::LookupSpan};

// ---------------------------------------------------------------------------
// Collecting layer: records span names and event messages
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Collector {
    spans: Arc<Mutex<Vec<String>>>,
    messages: Arc<Mutex<Vec<String>>>,
}

struct MessageVisitor<'a>(&'a mut String);

impl Visit for MessageVisitor<'_> {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            *self.0 = format!("{value:?}");
        }
    }
}

impl<S> tracing_subscriber::Layer<S> for Collector
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_new_span(
        &self,
        _attrs: &tracing::span::Attributes<'_>,
        id: &tracing::span::Id,
        ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        if let Some(span) = ctx.span(id) {
            self.spans.lock().expect("lock poisoned").push(span.name().to_owned());
        }
    }

    fn on_event(&self, event: &Event<'_>, _ctx: tracing_subscriber::layer::Context<'_, S>) {
        let mut message = String::new();
        event.record(&mut MessageVisitor(&mut message));
        self.messages.lock().expect("lock poisoned").push(message);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[tokio::test]
async fn repository_create_creates_span() {
    let collector = Collector::default();
    let spans = Arc::clone(&collector.spans);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let (repo, _) = sample_repository();
    repo.create(SampleDoc::named("a")).await.expect("create should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "create"), "expected a 'create' span, got: {recorded:?}");
}

#[tokio::test]
async fn roll_page_logs_rendered_query() {
    let collector = Collector::default();
    let spans = Arc::clone(&collector.spans);
    let messages = Arc::clone(&collector.messages);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let (repo, _) = sample_repository();
    repo.roll_page(&RollPageParam::default(), None).await.expect("roll page should succeed");

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "roll_page"), "expected a 'roll_page' span, got: {recorded:?}");
    let logged = messages.lock().expect("lock poisoned");
    assert!(logged.iter().any(|m| m == "roll page query"), "expected the query log, got: {logged:?}");
}

#[tokio::test]
async fn cache_lock_creates_span() {
    let collector = Collector::default();
    let spans = Arc::clone(&collector.spans);
    let _guard = tracing::subscriber::set_default(tracing_subscriber::registry().with(collector));

    let (cache, _) = memory_cache_client();
    cache.lock("k", Duration::from_secs(1)).await;

    let recorded = spans.lock().expect("lock poisoned");
    assert!(recorded.iter().any(|s| s == "lock"), "expected a 'lock' span, got: {recorded:?}");
}
