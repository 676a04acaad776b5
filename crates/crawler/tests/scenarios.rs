//! End-to-end crawls against a scripted browsing context

mod support;

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::time::Duration;

use browser::{ContextError, PageEvent, ResourceType};
use crawler::{
    crawl, CrawlError, CrawlSession, JsonFileSink, NoBootstrap, RequestOutcome, StorageBootstrap,
    VisitStatus,
};
use support::{ready, settings, BrokenBootstrap, MemorySink, PageScript, ScriptedContext, BASE};

#[tokio::test(start_paused = true)]
async fn test_clean_page_succeeds_with_exit_zero() {
    let context = ScriptedContext::new()
        .page("/ok", PageScript::loads().error("Error: something minor"))
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(ready(context.clone()), &NoBootstrap, settings(&["/ok"]), &sink)
        .await
        .unwrap();

    assert_eq!(outcome.results.len(), 1);
    let page = &outcome.results[0];
    assert_eq!(page.status, VisitStatus::Success);
    assert_eq!(page.url.as_deref(), Some("http://app.test/ok"));
    assert!(page.load_ms.is_some());
    assert_eq!(page.counts.structural_error, 0);
    assert_eq!(page.counts.duplicate_attribute, 0);
    assert_eq!(page.counts.generic_error, 1);
    assert_eq!(outcome.exit_code(), 0);

    assert_eq!(sink.reports().len(), 1);
    assert_eq!(context.close_calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_duplicate_attribute_fails_the_run() {
    let context = ScriptedContext::new()
        .page(
            "/classes",
            PageScript::loads()
                .warn("[Vue warn]: Template compilation error: Duplicate attribute.")
                .warn("Warning: X"),
        )
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(ready(context), &NoBootstrap, settings(&["/classes"]), &sink)
        .await
        .unwrap();

    let counts = outcome.results[0].counts;
    assert_eq!(counts.structural_error, 1);
    assert_eq!(counts.duplicate_attribute, 1);
    assert_eq!(counts.generic_warning, 1);
    assert_eq!(counts.framework_error, 0);
    assert_eq!(counts.generic_error, 0);
    assert_eq!(outcome.results[0].status, VisitStatus::Success);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_api_budget_blocks_overflow() {
    let context = ScriptedContext::new()
        .page("/busy", PageScript::loads().api_requests(25))
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(ready(context.clone()), &NoBootstrap, settings(&["/busy"]), &sink)
        .await
        .unwrap();

    let requests = &outcome.results[0].requests;
    let allowed = requests
        .iter()
        .filter(|r| r.outcome == RequestOutcome::Allowed)
        .count();
    let over_budget = requests
        .iter()
        .filter(|r| r.outcome == RequestOutcome::BlockedByBudget)
        .count();
    assert_eq!(allowed, 20);
    assert_eq!(over_budget, 5);

    // the first twenty spent the budget, the rest were aborted
    let aborted = context.aborted.lock().unwrap().clone();
    assert_eq!(aborted, (20..25).map(|i| format!("api-{}", i)).collect::<Vec<_>>());
    // settle (5s) outlasts the 3s throttle, so every allowed call was released
    assert_eq!(context.continued.lock().unwrap().len(), 20);

    assert_eq!(outcome.summary.requests.blocked_by_budget, 5);
    assert_eq!(outcome.summary.requests.max_api_calls_per_visit, 20);
}

#[tokio::test(start_paused = true)]
async fn test_throttled_calls_outliving_the_visit_are_aborted() {
    let context = ScriptedContext::new()
        .page("/quick", PageScript::loads().api_requests(2))
        .into_arc();
    let sink = MemorySink::default();
    let mut settings = settings(&["/quick"]);
    settings.timings.settle_delay = Duration::from_millis(1000);

    let outcome = crawl(ready(context.clone()), &NoBootstrap, settings, &sink)
        .await
        .unwrap();

    // settle (1s) ends the visit before the 3s throttle elapses
    let page = &outcome.results[0];
    assert!(page
        .requests
        .iter()
        .all(|r| r.outcome == RequestOutcome::Expired));
    assert!(context.continued.lock().unwrap().is_empty());
    assert_eq!(*context.aborted.lock().unwrap(), vec!["api-0", "api-1"]);
    assert_eq!(page.allowed_api_requests(), 0);
    assert_eq!(outcome.summary.requests.expired, 2);
    assert_eq!(outcome.summary.requests.allowed, 0);
}

#[tokio::test(start_paused = true)]
async fn test_http_error_document_fails_visit() {
    let context = ScriptedContext::new()
        .page(
            "/missing",
            PageScript::loads()
                .response("/missing", 404, ResourceType::Document)
                .error("Failed to load resource: the server responded with a status of 404"),
        )
        .page(
            "/broken",
            PageScript::loads().response("/broken", 500, ResourceType::Document),
        )
        .page(
            "/ok",
            PageScript::loads().response("/ok", 200, ResourceType::Document),
        )
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(
        ready(context),
        &NoBootstrap,
        settings(&["/missing", "/broken", "/ok"]),
        &sink,
    )
    .await
    .unwrap();

    let missing = &outcome.results[0];
    assert_eq!(missing.status, VisitStatus::Failed);
    let reason = missing.failure.as_ref().unwrap();
    assert_eq!(reason.category(), "navigation");
    assert_eq!(reason.to_string(), "navigation failed: HTTP 404");
    assert!(missing.load_ms.is_none());
    // what the page logged is still collected
    assert_eq!(missing.counts.generic_error, 1);

    assert_eq!(
        outcome.results[1].failure.as_ref().unwrap().to_string(),
        "navigation failed: HTTP 500"
    );
    assert_eq!(outcome.results[2].status, VisitStatus::Success);
    assert_eq!(outcome.summary.failed, 2);
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_timeout_fails_visit_and_crawl_continues() {
    let context = ScriptedContext::new()
        .page("/slow", PageScript::hangs())
        .page("/ok", PageScript::loads())
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(
        ready(context.clone()),
        &NoBootstrap,
        settings(&["/slow", "/ok"]),
        &sink,
    )
    .await
    .unwrap();

    let slow = &outcome.results[0];
    assert_eq!(slow.route, "/slow");
    assert_eq!(slow.status, VisitStatus::Failed);
    assert_eq!(slow.failure.as_ref().unwrap().category(), "navigation");
    assert!(slow.load_ms.is_none());
    assert!(slow.duration_ms >= 30_000);

    assert_eq!(outcome.results[1].route, "/ok");
    assert_eq!(outcome.results[1].status, VisitStatus::Success);
    assert_eq!(
        context.navigations(),
        vec![format!("{}/slow", BASE), format!("{}/ok", BASE)]
    );
    assert_eq!(outcome.exit_code(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_navigation_error_and_crash_are_isolated() {
    let context = ScriptedContext::new()
        .page("/refused", PageScript::fails("net::ERR_CONNECTION_REFUSED"))
        .page("/crash", PageScript::crashes().warn("Warning: before crash"))
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(
        ready(context),
        &NoBootstrap,
        settings(&["/refused", "/crash", "/fine"]),
        &sink,
    )
    .await
    .unwrap();

    let refused = outcome.results[0].failure.as_ref().unwrap();
    assert_eq!(refused.category(), "navigation");
    assert!(refused.to_string().contains("ERR_CONNECTION_REFUSED"));

    let crash = &outcome.results[1];
    let reason = crash.failure.as_ref().unwrap();
    assert_eq!(reason.category(), "context");
    assert_eq!(reason.to_string(), "page crashed");
    // diagnostics seen before the crash are kept
    assert_eq!(crash.counts.generic_warning, 1);

    assert_eq!(outcome.results[2].status, VisitStatus::Success);
    assert_eq!(outcome.summary.failed, 2);
    assert_eq!(outcome.summary.successful, 1);
}

#[tokio::test(start_paused = true)]
async fn test_listener_is_detached_after_every_visit() {
    let context = ScriptedContext::new()
        .page("/a", PageScript::loads().warn("Warning: a"))
        .page("/b", PageScript::hangs())
        .page("/c", PageScript::crashes())
        .into_arc();
    let session = CrawlSession::new(context.clone(), settings(&["/a", "/b", "/c"]));

    let results = session.run(&NoBootstrap).await.unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(context.attaches.load(Ordering::SeqCst), 3);
    assert_eq!(context.detaches.load(Ordering::SeqCst), 3);
    assert!(!context.is_listening());
    // the warning from /a never leaks into later visits
    assert_eq!(results[1].diagnostics.len(), 0);
    assert_eq!(results[2].counts.generic_warning, 0);
}

#[tokio::test(start_paused = true)]
async fn test_cooldown_between_visits_only() {
    let context = ScriptedContext::new().into_arc();
    let mut config = settings(&["/a", "/b", "/c"]);
    config.timings.settle_delay = Duration::from_millis(1000);
    config.timings.idle_quiet = Duration::from_millis(100);
    config.cooldown = Duration::from_millis(8000);

    let started = tokio::time::Instant::now();
    let results = CrawlSession::new(context, config)
        .run(&NoBootstrap)
        .await
        .unwrap();
    let elapsed = started.elapsed();

    assert_eq!(results.len(), 3);
    // three visits of ~1.15s each plus two cooldowns
    assert!(elapsed >= Duration::from_millis(16_000 + 3 * 1_150));
    assert!(elapsed < Duration::from_millis(16_000 + 3 * 1_150 + 500));
}

#[tokio::test(start_paused = true)]
async fn test_unresolvable_route_is_a_failed_visit() {
    let context = ScriptedContext::new().into_arc();
    let mut config = settings(&["/relative", "http://app.test/absolute"]);
    config.base_url = None;

    let results = CrawlSession::new(context.clone(), config)
        .run(&NoBootstrap)
        .await
        .unwrap();

    assert_eq!(results[0].status, VisitStatus::Failed);
    assert_eq!(results[0].failure.as_ref().unwrap().category(), "navigation");
    assert!(results[0].url.is_none());
    assert_eq!(results[1].status, VisitStatus::Success);
    assert_eq!(context.attaches.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_blocked_types_and_api_responses() {
    let context = ScriptedContext::new()
        .page(
            "/dashboard",
            PageScript::loads()
                .emit(PageEvent::RequestPaused {
                    id: "img".to_string(),
                    url: format!("{}/logo.png", BASE),
                    resource_type: ResourceType::Image,
                })
                .emit(PageEvent::RequestPaused {
                    id: "js".to_string(),
                    url: format!("{}/app.js", BASE),
                    resource_type: ResourceType::Script,
                })
                .response("/dashboard", 200, ResourceType::Document)
                .response("/api/users/17", 200, ResourceType::Api)
                .response("/api/users/18", 500, ResourceType::Api)
                .response("/app.js", 200, ResourceType::Script),
        )
        .into_arc();
    let sink = MemorySink::default();

    let outcome = crawl(ready(context.clone()), &NoBootstrap, settings(&["/dashboard"]), &sink)
        .await
        .unwrap();

    let page = &outcome.results[0];
    // a failing API call is reported, it does not fail the page
    assert_eq!(page.status, VisitStatus::Success);
    assert_eq!(page.requests[0].outcome, RequestOutcome::BlockedByType);
    assert_eq!(page.requests[1].outcome, RequestOutcome::Allowed);
    assert_eq!(*context.aborted.lock().unwrap(), vec!["img"]);
    assert_eq!(*context.continued.lock().unwrap(), vec!["js"]);

    assert_eq!(page.api_calls.len(), 2);
    let api = &outcome.summary.api;
    assert_eq!((api.total, api.successful, api.failed), (2, 1, 1));
    assert_eq!(api.by_endpoint["http://app.test/api/users/:id"].total, 2);
}

#[tokio::test(start_paused = true)]
async fn test_bootstrap_failure_is_fatal_but_cleans_up() {
    let context = ScriptedContext::new().into_arc();
    let sink = MemorySink::default();

    let err = crawl(ready(context.clone()), &BrokenBootstrap, settings(&["/ok"]), &sink)
        .await
        .unwrap_err();

    assert!(matches!(err, CrawlError::Bootstrap(_)));
    assert!(context.navigations().is_empty());
    assert_eq!(context.close_calls.load(Ordering::SeqCst), 1);

    let reports = sink.reports();
    assert_eq!(reports.len(), 1);
    assert_eq!(reports[0].0.total_pages, 0);
    assert!(reports[0].1.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_context_open_failure_still_flushes_report() {
    let sink = MemorySink::default();

    let err = crawl(
        async { Err(ContextError::Closed) },
        &NoBootstrap,
        settings(&["/ok"]),
        &sink,
    )
    .await
    .unwrap_err();

    assert!(matches!(err, CrawlError::Context(_)));
    assert_eq!(sink.reports().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_storage_bootstrap_runs_once_by_default() {
    let context = ScriptedContext::new().into_arc();
    let bootstrap = StorageBootstrap::new(
        format!("{}/login", BASE),
        BTreeMap::from([("token".to_string(), "t0k3n".to_string())]),
    );

    CrawlSession::new(context.clone(), settings(&["/a", "/b"]))
        .run(&bootstrap)
        .await
        .unwrap();

    assert_eq!(
        context.navigations(),
        vec![
            format!("{}/login", BASE),
            format!("{}/a", BASE),
            format!("{}/b", BASE),
        ]
    );
    assert_eq!(context.evaluated.lock().unwrap().len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_reauthentication_before_each_visit_is_not_recorded() {
    let context = ScriptedContext::new()
        // login page traffic must not count against any visit
        .page("/login", PageScript::loads().api_requests(3).warn("Warning: login"))
        .into_arc();
    let bootstrap = StorageBootstrap::new(
        format!("{}/login", BASE),
        BTreeMap::from([("token".to_string(), "t0k3n".to_string())]),
    );
    let mut config = settings(&["/a", "/b"]);
    config.reauthenticate_each_visit = true;

    let results = CrawlSession::new(context.clone(), config)
        .run(&bootstrap)
        .await
        .unwrap();

    assert_eq!(
        context.navigations(),
        vec![
            format!("{}/login", BASE),
            format!("{}/a", BASE),
            format!("{}/login", BASE),
            format!("{}/b", BASE),
        ]
    );
    assert_eq!(context.evaluated.lock().unwrap().len(), 2);
    for result in &results {
        assert_eq!(result.status, VisitStatus::Success);
        assert!(result.requests.is_empty());
        assert!(result.diagnostics.is_empty());
    }
}

#[tokio::test(start_paused = true)]
async fn test_failed_reauthentication_fails_only_that_visit() {
    let context = ScriptedContext::new().into_arc();
    let mut config = settings(&["/a", "/b"]);
    config.reauthenticate_each_visit = true;

    let results = CrawlSession::new(context.clone(), config)
        .run(&BrokenBootstrap)
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    for result in &results {
        assert_eq!(result.status, VisitStatus::Failed);
        assert_eq!(result.failure.as_ref().unwrap().category(), "context");
    }
    assert_eq!(context.attaches.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_json_report_written_for_run() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("reports/page-health.json");
    let context = ScriptedContext::new()
        .page("/bad", PageScript::loads().error("Unterminated string in tag <div"))
        .page("/slow", PageScript::hangs())
        .into_arc();
    let sink = JsonFileSink::new(&path);

    crawl(ready(context), &NoBootstrap, settings(&["/bad", "/slow"]), &sink)
        .await
        .unwrap();

    let report: serde_json::Value =
        serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
    assert_eq!(report["summary"]["totalPages"], 2);
    assert_eq!(report["summary"]["failed"], 1);
    assert_eq!(report["summary"]["totalStructural"], 1);
    assert_eq!(report["summary"]["ranking"][0]["route"], "/bad");
    assert_eq!(report["pages"][0]["counts"]["structural-error"], 1);
    assert_eq!(report["pages"][1]["status"], "failed");
    assert_eq!(report["pages"][1]["failure"]["category"], "navigation");
    assert_eq!(report["pages"][1]["failure"]["kind"], "navigation-timeout");
}
