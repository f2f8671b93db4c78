//! Events emitted on the scan and copy pools carry the run's span.

use deploy_sync::config::AppConfig;
use deploy_sync::context::RunContext;
use deploy_sync::core::{RunOutcome, pipeline};
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};
use tempfile::tempdir;
use tracing::{Event, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

/// Records each event's target and whether a `sync_run` span encloses it.
#[derive(Clone, Default)]
struct RunScopeRecorder {
    events: Arc<Mutex<Vec<(String, bool)>>>,
}

impl<S> Layer<S> for RunScopeRecorder
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &Event<'_>, ctx: Context<'_, S>) {
        let in_run = ctx
            .event_scope(event)
            .is_some_and(|mut scope| scope.any(|span| span.name() == "sync_run"));

        self.events
            .lock()
            .unwrap()
            .push((event.metadata().target().to_string(), in_run));
    }
}

fn create_file(path: &Path, content: &[u8]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    fs::write(path, content).unwrap();
}

#[test]
fn worker_events_are_recorded_inside_the_run_span() {
    let recorder = RunScopeRecorder::default();
    tracing_subscriber::registry().with(recorder.clone()).init();

    let temp = tempdir().unwrap();
    let source = temp.path().join("app");
    let dest = temp.path().join("deploy");
    create_file(&source.join("public/a.txt"), &[b'a'; 10]);
    create_file(&source.join("public/img/b.png"), &[b'b'; 1000]);
    create_file(&source.join("server.js"), &[b's'; 50]);

    let ctx = RunContext::new(AppConfig {
        source_root: source,
        destination_root: Some(dest),
        items: vec!["public".to_string(), "server.js".to_string()],
        ..AppConfig::default()
    });
    let summary = pipeline::run(&ctx).unwrap();
    assert_eq!(summary.outcome(), RunOutcome::Complete);

    let events = recorder.events.lock().unwrap();
    let pool_events: Vec<_> = events
        .iter()
        .filter(|(target, _)| {
            target.starts_with("deploy_sync::core::copier")
                || target.starts_with("deploy_sync::core::enumerator")
        })
        .collect();

    // Two "Scanned item" lines plus per-file copy events.
    assert!(pool_events.len() >= 5, "too few events: {pool_events:?}");
    for (target, in_run) in pool_events {
        assert!(*in_run, "event from {target} logged outside the run span");
    }
}
