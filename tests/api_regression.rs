use std::{io, net::TcpListener, time::Duration};

use paragliding::{config::Config, server};
use reqwest::{Client, StatusCode, header, redirect::Policy};
use serde_json::Value;
use tempfile::TempDir;
use tokio::{task::JoinHandle, time::sleep};

type TestResult<T> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const IGC: &str = "AXXXABC FLIGHT:1\r\nHFDTE020718\r\nHFPLTPILOTINCHARGE: Miguel Angel Gordillo\r\nHFGTYGLIDERTYPE: RV8\r\nHFGIDGLIDERID: EC-XLL\r\nB1101355206343N00006198WA0058700558\r\nB1101455206259N00006130WA0059300566\r\n";

fn allocate_port() -> io::Result<u16> {
    let listener = TcpListener::bind(("127.0.0.1", 0))?;
    let port = listener.local_addr()?.port();
    drop(listener);
    Ok(port)
}

fn spawn_server(config: Config) -> JoinHandle<paragliding::error::Result<()>> {
    tokio::spawn(async move { server::run(config).await })
}

async fn wait_for_api(base_url: &str) -> TestResult<()> {
    let client = Client::new();
    for _ in 0..40 {
        if let Ok(resp) = client.get(format!("{base_url}/paragliding/api/")).send().await {
            if resp.status().is_success() {
                return Ok(());
            }
        }
        sleep(Duration::from_millis(100)).await;
    }
    Err("server did not become ready in time".into())
}

async fn ingest(client: &Client, base_url: &str, content: &str) -> TestResult<reqwest::Response> {
    Ok(client
        .post(format!("{base_url}/paragliding/api/track/"))
        .body(serde_json::to_string(content)?)
        .send()
        .await?)
}

#[tokio::test(flavor = "multi_thread")]
async fn track_and_ticker_flow() -> TestResult<()> {
    let temp = TempDir::new()?;
    let mut config = Config::default();
    config.data_dir = temp.path().join("data");
    config.ticker_cap = 1;
    config.port = match allocate_port() {
        Ok(port) => port,
        Err(err) if err.kind() == io::ErrorKind::PermissionDenied => {
            eprintln!("skipping api regression test: port binding not permitted ({err})");
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };
    config.ensure_data_dir()?;

    let base_url = format!("http://127.0.0.1:{}", config.port);
    let server_handle = spawn_server(config);
    wait_for_api(&base_url).await?;
    let client = Client::new();

    let info: Value = client
        .get(format!("{base_url}/paragliding/api/"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(info["info"], "Service for Paragliding tracks.");
    assert_eq!(info["version"], "v1");
    assert!(info["uptime"].as_str().unwrap_or_default().starts_with('P'));

    let no_redirect = Client::builder().redirect(Policy::none()).build()?;
    let redirect = no_redirect
        .get(format!("{base_url}/paragliding/"))
        .send()
        .await?;
    assert_eq!(redirect.status(), StatusCode::SEE_OTHER);
    assert_eq!(
        redirect.headers()[header::LOCATION],
        "/paragliding/api/"
    );

    // Empty sequence is reported distinctly from an unknown id.
    let empty = client
        .get(format!("{base_url}/paragliding/api/ticker/"))
        .send()
        .await?;
    assert_eq!(empty.status(), StatusCode::BAD_REQUEST);
    let body: Value = empty.json().await?;
    assert_eq!(body["code"], "no_tracks");

    let malformed = ingest(&client, &base_url, "definitely not a flight log").await?;
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    let body: Value = malformed.json().await?;
    assert_eq!(body["code"], "malformed_input");

    for expected in ["igc1", "igc2", "igc3"] {
        let id: String = ingest(&client, &base_url, IGC)
            .await?
            .error_for_status()?
            .json()
            .await?;
        assert_eq!(id, expected);
    }

    let ids: Vec<String> = client
        .get(format!("{base_url}/paragliding/api/track"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(ids, vec!["igc1", "igc2", "igc3"]);

    let track: Value = client
        .get(format!("{base_url}/paragliding/api/track/igc2/"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(track["pilot"], "Miguel Angel Gordillo");
    assert_eq!(track["glider"], "RV8");
    assert_eq!(track["glider_id"], "EC-XLL");
    assert_eq!(track["track_src_url"], IGC);
    assert_eq!(track["H_date"], "2018-07-02T11:01:35Z");

    let pilot = client
        .get(format!("{base_url}/paragliding/api/track/igc2/pilot/"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    assert_eq!(pilot, "Miguel Angel Gordillo");

    let unknown_field = client
        .get(format!("{base_url}/paragliding/api/track/igc2/altitude/"))
        .send()
        .await?;
    assert_eq!(unknown_field.status(), StatusCode::NOT_FOUND);

    let unknown_id = client
        .get(format!("{base_url}/paragliding/api/track/igc42/"))
        .send()
        .await?;
    assert_eq!(unknown_id.status(), StatusCode::BAD_REQUEST);
    let body: Value = unknown_id.json().await?;
    assert_eq!(body["code"], "not_found");

    let latest = client
        .get(format!("{base_url}/paragliding/api/ticker/latest"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    let newest: Value = client
        .get(format!("{base_url}/paragliding/api/track/igc3/"))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(newest["timestamp"], latest.as_str());
    assert_eq!(latest.len(), 16);

    let ticker: Value = client
        .get(format!("{base_url}/paragliding/api/ticker/"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(ticker["t_latest"], latest.as_str());
    assert_eq!(ticker["tracks"], serde_json::json!(["igc1", "igc2"]));
    assert!(ticker["processing"].is_u64());

    let stop = ticker["t_stop"].as_str().unwrap_or_default().to_string();
    let after: Value = client
        .get(format!("{base_url}/paragliding/api/ticker/{stop}"))
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    assert_eq!(after["tracks"], serde_json::json!(["igc3"]));

    let count = client
        .get(format!("{base_url}/admin/api/tracks_count"))
        .send()
        .await?
        .text()
        .await?;
    assert_eq!(count, "3");

    let removed = client
        .delete(format!("{base_url}/admin/api/tracks"))
        .send()
        .await?
        .error_for_status()?
        .text()
        .await?;
    assert_eq!(removed, "3");

    let id: String = ingest(&client, &base_url, IGC).await?.json().await?;
    assert_eq!(id, "igc4", "numbering continues after a clear");

    let missing = client
        .get(format!("{base_url}/paragliding/api/nothing/here"))
        .send()
        .await?;
    assert_eq!(missing.status(), StatusCode::NOT_FOUND);

    let metrics = client.get(format!("{base_url}/metrics")).send().await?;
    assert_eq!(metrics.status(), StatusCode::OK);
    assert!(metrics.text().await?.contains("paragliding_tracks_ingested_total"));

    server_handle.abort();
    let _ = server_handle.await;
    Ok(())
}
