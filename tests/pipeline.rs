//! End-to-end runs against mock instances.

use assert_cmd::Command;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fleetcheck::analysis::{Rating, OFFLINE_SCORE};
use fleetcheck::config::{Credentials, FleetConfig, OrchestratorConfig, RetryConfig};
use fleetcheck::instance::{InstanceDescriptor, InstanceDirectory, Protocol};
use fleetcheck::services::ServiceCatalog;
use fleetcheck::RunInputs;

const YOUTUBE_URL: &str = "https://youtube.com/watch?v=jNQXAC9IVRw";
const VIMEO_URL: &str = "https://vimeo.com/225408543";

/// Legacy instance: YouTube redirects, Vimeo errors.
async fn legacy_instance() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("HEAD"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "version": "7.15-dev",
            "commit": "1a2b3c4",
            "branch": "current",
            "startTime": "1700000000000"
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/json"))
        .and(body_json(json!({ "url": YOUTUBE_URL })))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({"status": "redirect", "url": "https://cdn.example/v.mp4"})),
        )
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/json"))
        .and(body_json(json!({ "url": VIMEO_URL })))
        .respond_with(
            ResponseTemplate::new(400)
                .set_body_json(json!({"status": "error", "text": "i couldn't <b>process</b> it"})),
        )
        .mount(&server)
        .await;
    server
}

async fn front_end() -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<!doctype html><html><head><meta name="application-name" content="cobalt"></head></html>"#,
        ))
        .mount(&server)
        .await;
    server
}

fn quick_config() -> FleetConfig {
    FleetConfig {
        orchestrator: OrchestratorConfig {
            workers: Some(4),
            stall_window_secs: 1,
        },
        retry: RetryConfig {
            max_attempts: 5,
            min_backoff_ms: 1,
            max_backoff_ms: 2,
        },
        ..FleetConfig::default()
    }
}

fn catalog() -> ServiceCatalog {
    ServiceCatalog::from_map([("YouTube", YOUTUBE_URL), ("Vimeo", VIMEO_URL)])
}

#[tokio::test]
async fn test_full_run_scores_online_and_offline() {
    let api = legacy_instance().await;
    let web = front_end().await;
    let online_host = api.address().to_string();

    let directory = InstanceDirectory::from_descriptors([
        InstanceDescriptor {
            api: online_host.clone(),
            front_end: Some(web.address().to_string()),
            protocol: Protocol::Http,
        },
        InstanceDescriptor {
            api: "127.0.0.1:9".to_string(),
            front_end: Some("127.0.0.1:9".to_string()),
            protocol: Protocol::Http,
        },
    ]);
    let inputs = RunInputs {
        directory,
        catalog: catalog(),
        credentials: Credentials::default(),
    };

    let report = fleetcheck::run(&quick_config(), inputs).await.unwrap();
    assert_eq!(report.instances.len(), 2);
    assert_eq!(report.online_count(), 1);

    let online = &report.instances[0];
    assert_eq!(online.api, online_host);
    assert_eq!(online.version.as_deref(), Some("7.15"));
    assert_eq!(online.start_time, 1_700_000_000_000);
    assert!(online.frontend_online);
    assert_eq!(online.tests.len(), 3);
    assert!(online.tests["youtube"].status);
    assert!(online.tests["frontend"].status);
    assert!(!online.tests["vimeo"].status);
    assert_eq!(
        online.tests["vimeo"].message.as_deref(),
        Some("i couldn't process it")
    );
    assert!((online.score - 200.0 / 3.0).abs() < 1e-9);
    assert_eq!(online.rating, Some(Rating::Decent));

    let offline = &report.instances[1];
    assert!(!offline.online);
    assert_eq!(offline.score, OFFLINE_SCORE);
    assert!(offline.rating.is_none());
    assert!(offline.tests.is_empty());
    assert!(!offline.frontend_online);

    assert_eq!(report.services["youtube"].passed, 1);
    assert_eq!(report.services["youtube"].total, 1);
    assert_eq!(report.services["vimeo"].passed, 0);
    assert_eq!(
        report.oldest.as_ref().map(|o| o.api.as_str()),
        Some(online_host.as_str())
    );
}

#[tokio::test]
async fn test_shared_start_time_is_reported_as_duplicate() {
    let first = legacy_instance().await;
    let second = legacy_instance().await;

    let directory = InstanceDirectory::from_descriptors([first.address(), second.address()].map(
        |addr| InstanceDescriptor {
            api: addr.to_string(),
            front_end: None,
            protocol: Protocol::Http,
        },
    ));
    let inputs = RunInputs {
        directory,
        catalog: catalog(),
        credentials: Credentials::default(),
    };

    let report = fleetcheck::run(&quick_config(), inputs).await.unwrap();
    assert_eq!(report.duplicates.len(), 1);
    assert_eq!(report.duplicates[0].start_time, 1_700_000_000_000);
    assert_eq!(report.duplicates[0].apis.len(), 2);
    assert!(report.instances.iter().all(|i| i.online));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_run_writes_report() {
    let api = legacy_instance().await;
    let dir = tempfile::tempdir().unwrap();

    let instances = dir.path().join("instances");
    std::fs::write(
        &instances,
        format!("# fleet\n{},None,http\n127.0.0.1:9,None,http\n", api.address()),
    )
    .unwrap();
    let tests = dir.path().join("tests.json");
    std::fs::write(
        &tests,
        json!({ "YouTube": YOUTUBE_URL, "Vimeo": VIMEO_URL }).to_string(),
    )
    .unwrap();
    let config = dir.path().join("fleetcheck.toml");
    std::fs::write(
        &config,
        "[retry]\nmin_backoff_ms = 1\nmax_backoff_ms = 2\n\n[orchestrator]\nworkers = 2\nstall_window_secs = 1\n",
    )
    .unwrap();
    let output = dir.path().join("report.json");

    Command::cargo_bin("fleetcheck")
        .unwrap()
        .arg("--config")
        .arg(&config)
        .arg("run")
        .arg("--instances")
        .arg(&instances)
        .arg("--tests")
        .arg(&tests)
        .arg("--api-keys")
        .arg(dir.path().join("apikeys.json"))
        .arg("--output")
        .arg(&output)
        .assert()
        .success()
        .stdout(predicates::str::contains("1 online"));

    let report: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
    let instances = report["instances"].as_array().unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0]["score"], 50.0);
    assert_eq!(instances[1]["score"], -1.0);
    assert_eq!(instances[1]["version"], "Offline");
}
