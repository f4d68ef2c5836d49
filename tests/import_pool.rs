use std::thread;
use std::time::Duration;

use strata::error::{ParseFailure, StrataError};
use strata::import::{DocumentMetadata, ImportJob, ImportPool};
use strata::parse::{DocumentParser, FieldParser};
use strata::settings::ImportSettings;
use strata::value::Value;

/// Understands a few commands in the document text: `sleep <ms>`, `hang`,
/// `panic`, `fail`, `function`. Anything else parses to the text itself.
#[derive(Clone)]
struct ScriptedParser;

impl DocumentParser for ScriptedParser {
    fn parse(&self, path: &str, contents: &str, _metadata: &DocumentMetadata) -> Result<Value, ParseFailure> {
        let contents = contents.trim();
        if let Some(ms) = contents.strip_prefix("sleep ") {
            thread::sleep(Duration::from_millis(ms.parse().unwrap_or(0)));
        }
        match contents {
            "hang" => loop {
                thread::sleep(Duration::from_secs(3600));
            },
            "panic" => panic!("parser blew up on {path}"),
            "fail" => Err(ParseFailure::at_line("unexpected token", 7)),
            "function" => Ok(Value::array(vec![Value::function(Some("f"), |_| Value::Null)])),
            _ => Ok(Value::object([("path", Value::from(path)), ("contents", Value::from(contents))])),
        }
    }
}

fn settings(workers: usize, timeout_ms: Option<u64>) -> ImportSettings {
    ImportSettings { workers, timeout_ms }
}

fn job(path: &str, contents: &str) -> ImportJob {
    ImportJob::new(path, contents, DocumentMetadata::default())
}

fn path_field(value: &Value) -> Option<&str> {
    value.as_object().and_then(|o| o.get("path")).and_then(Value::as_str)
}

#[tokio::test]
async fn results_are_correlated_by_job_not_by_order() {
    let pool = ImportPool::start(ScriptedParser, &settings(2, None));
    let slow = pool.submit(job("x.md", "sleep 300")).expect("submitted");
    let fast = pool.submit(job("y.md", "quick")).expect("submitted");
    assert_ne!(slow.id(), fast.id());

    let y = fast.await;
    assert_eq!(y.path, "y.md");
    assert_eq!(y.value.as_ref().ok().and_then(path_field), Some("y.md"));
    // x is still being parsed
    assert_eq!(pool.outstanding(), 1);

    let x = slow.await;
    assert_eq!(x.path, "x.md");
    assert_eq!(x.value.as_ref().ok().and_then(path_field), Some("x.md"));
    pool.shutdown();
}

#[tokio::test]
async fn import_all_keeps_submission_order() {
    let pool = ImportPool::start(ScriptedParser, &settings(3, None));
    let jobs = vec![job("a.md", "sleep 120"), job("b.md", "sleep 10"), job("c.md", "plain")];
    let results = pool.import_all(jobs).await;
    let paths: Vec<&str> = results.iter().map(|r| r.path.as_str()).collect();
    assert_eq!(paths, vec!["a.md", "b.md", "c.md"]);
    assert!(results.iter().all(|r| r.value.is_ok()));
    pool.shutdown();
}

#[tokio::test]
async fn panics_are_contained_and_the_worker_survives() {
    // a single worker has to survive the panic to answer the second job
    let pool = ImportPool::start(ScriptedParser, &settings(1, None));
    let broken = pool.import(job("bad.md", "panic")).await;
    match broken.value {
        Err(StrataError::Parse { path, failure }) => {
            assert_eq!(path, "bad.md");
            assert!(failure.message.contains("parser blew up on bad.md"), "{}", failure.message);
        }
        other => panic!("expected a parse failure, got {other:?}"),
    }
    let fine = pool.import(job("good.md", "hello")).await;
    assert!(fine.value.is_ok());
    pool.shutdown();
}

#[tokio::test]
async fn typed_failures_cross_the_boundary() {
    let pool = ImportPool::start(ScriptedParser, &settings(1, None));
    let result = pool.import(job("f.md", "fail")).await;
    match result.value {
        Err(StrataError::Parse { failure, .. }) => {
            assert_eq!(failure, ParseFailure::at_line("unexpected token", 7));
        }
        other => panic!("expected a parse failure, got {other:?}"),
    }
    pool.shutdown();
}

#[tokio::test]
async fn functions_never_leave_a_worker() {
    let pool = ImportPool::start(ScriptedParser, &settings(1, None));
    let result = pool.import(job("fn.md", "function")).await;
    match result.value {
        Err(StrataError::Parse { failure, .. }) => assert!(failure.message.contains("function")),
        other => panic!("expected a parse failure, got {other:?}"),
    }
    pool.shutdown();
}

#[tokio::test]
async fn resubmission_is_equivalent() {
    let pool = ImportPool::start(FieldParser::new(), &settings(2, None));
    let text = "rating:: 4\nwhen:: 2024-05-01\nrefs:: [[A]], [[B]]\n#tagged\n";
    let first = pool.import(job("n.md", text)).await.value.expect("first parse");
    let second = pool.import(job("n.md", text)).await.value.expect("second parse");
    assert_eq!(first, second);
    pool.shutdown();
}

#[tokio::test]
async fn drain_waits_for_outstanding_jobs() {
    let pool = ImportPool::start(ScriptedParser, &settings(2, None));
    let tickets: Vec<_> = (0..4)
        .map(|i| pool.submit(job(&format!("{i}.md"), "sleep 50")).expect("submitted"))
        .collect();
    pool.drain().await;
    assert_eq!(pool.outstanding(), 0);
    for ticket in tickets {
        assert!(ticket.await.value.is_ok());
    }
    pool.shutdown();
}

#[tokio::test]
async fn slow_jobs_time_out_without_blocking_others() {
    let pool = ImportPool::start(ScriptedParser, &settings(2, Some(100)));
    let (slow, fast) = tokio::join!(pool.import(job("slow.md", "sleep 600")), pool.import(job("fast.md", "ok")));
    match slow.value {
        Err(StrataError::Timeout { path, millis }) => {
            assert_eq!(path, "slow.md");
            assert_eq!(millis, 100);
        }
        other => panic!("expected a timeout, got {other:?}"),
    }
    assert!(fast.value.is_ok());
    // nobody waits on the slow job any more
    assert_eq!(pool.outstanding(), 0);
    pool.drain().await;
    pool.shutdown();
}

#[tokio::test]
async fn a_job_that_never_answers_does_not_block_the_pool() {
    let pool = ImportPool::start(ScriptedParser, &settings(2, Some(50)));
    let stuck = pool.import(job("h.md", "hang")).await;
    assert!(matches!(stuck.value, Err(StrataError::Timeout { millis: 50, .. })), "{:?}", stuck.value);
    assert_eq!(pool.outstanding(), 0);

    let drained = tokio::time::timeout(Duration::from_millis(500), pool.drain()).await;
    assert!(drained.is_ok(), "drain has to finish once the job timed out");

    // the other worker is still free
    let fine = pool.import(job("ok.md", "hello")).await;
    assert!(fine.value.is_ok());

    let stopped = tokio::time::timeout(Duration::from_secs(5), tokio::task::spawn_blocking(move || pool.shutdown())).await;
    assert!(stopped.is_ok(), "shutdown has to leave the stuck worker behind");
}

#[test]
fn shutdown_answers_queued_jobs_first() {
    let pool = ImportPool::start(ScriptedParser, &settings(1, None));
    let tickets: Vec<_> = (0..3)
        .map(|i| pool.submit(job(&format!("{i}.md"), "sleep 20")).expect("submitted"))
        .collect();
    pool.shutdown();
    let rt = tokio::runtime::Builder::new_current_thread().build().expect("runtime");
    for ticket in tickets {
        assert!(rt.block_on(ticket).value.is_ok());
    }
}
