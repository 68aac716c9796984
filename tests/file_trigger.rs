mod common;

use std::time::Duration;

use common::{next_json, test_config, Running, KEY};
use serde_json::Value;
use tempfile::TempDir;
use tokio::time::sleep;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn source_edit_is_pushed_and_pullable() {
    let dir = TempDir::new().unwrap();
    let src = dir.path().join("src");
    std::fs::create_dir_all(src.join("node_modules")).unwrap();
    let file = src.join("foo.ts");
    std::fs::write(&file, "export const x = 1;").unwrap();

    let mut config = test_config();
    config.watch.enabled = true;
    config.watch.paths = vec![format!("{}/**/*.ts", src.display())];

    let relay = Running::start(config).await;
    assert!(relay.watching);

    let mut ws = relay.connect_ws(KEY).await;
    assert_eq!(next_json(&mut ws).await.unwrap()["type"], "connected");
    sleep(Duration::from_millis(200)).await;

    // Dependency directories never trigger anything
    std::fs::write(src.join("node_modules/dep.ts"), "console.log('dep')").unwrap();
    std::fs::write(&file, "export const x = 2;\nconsole.log('x is', x);\n").unwrap();

    let update = next_json(&mut ws).await.expect("no update pushed");
    assert_eq!(update["version"], "1.0.3");
    assert_eq!(update["rollback"], "1.0.2");
    assert_eq!(update["source"], "file-watch");
    assert_eq!(update["changedFile"], "foo.ts");
    assert_eq!(update["config"]["settings"]["lastChanged"], "foo.ts");
    assert_eq!(update["config"]["features"].as_array().unwrap().len(), 4);

    let pulled: Value = reqwest::Client::new()
        .get(relay.url("/api/ota"))
        .query(&[("apiKey", KEY), ("currentVersion", "1.0.2")])
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(pulled["source"], "file-watch");
    assert!(pulled["version"].as_str().unwrap() >= "1.0.3");

    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn missing_watch_root_leaves_pull_path_running() {
    let mut config = test_config();
    config.watch.enabled = true;
    config.watch.paths = vec!["/no/such/sdk/src/**/*.ts".to_string()];

    let relay = Running::start(config).await;
    assert!(!relay.watching);

    let response = reqwest::Client::new()
        .get(relay.url("/api/ota"))
        .query(&[("apiKey", KEY), ("currentVersion", "1.0.0")])
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    relay.shutdown().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn one_missing_root_keeps_the_others_watched() {
    let dir = TempDir::new().unwrap();

    let mut config = test_config();
    config.watch.enabled = true;
    config.watch.paths = vec![
        "/no/such/sdk/src/**/*.ts".to_string(),
        format!("{}/**/*.ts", dir.path().display()),
    ];

    let relay = Running::start(config).await;
    assert!(relay.watching);

    relay.shutdown().await;
}
