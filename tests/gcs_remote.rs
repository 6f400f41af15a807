use std::io::Read as _;
use std::sync::mpsc;
use std::thread;

use booksync::store::remote::{GcsRemoteStore, RemoteStore};

#[derive(Debug)]
struct Seen {
    method: String,
    url: String,
    authorization: Option<String>,
    content_type: Option<String>,
    body: Vec<u8>,
}

/// Serves `statuses.len()` requests, answering each with the next status.
fn spawn_gcs_stub(statuses: Vec<u16>) -> (String, mpsc::Receiver<Seen>, thread::JoinHandle<()>) {
    let server = tiny_http::Server::http("127.0.0.1:0").expect("start tiny_http server");
    let base_url = format!("http://{}", server.server_addr());
    let (tx, rx) = mpsc::channel();

    let handle = thread::spawn(move || {
        for status in statuses {
            let Ok(mut request) = server.recv() else {
                break;
            };
            let header = |name: &str| {
                request
                    .headers()
                    .iter()
                    .find(|h| h.field.as_str().as_str().eq_ignore_ascii_case(name))
                    .map(|h| h.value.as_str().to_owned())
            };
            let authorization = header("Authorization");
            let content_type = header("Content-Type");
            let mut body = Vec::new();
            let _ = request.as_reader().read_to_end(&mut body);
            let _ = tx.send(Seen {
                method: request.method().as_str().to_owned(),
                url: request.url().to_owned(),
                authorization,
                content_type,
                body,
            });
            let _ = request.respond(tiny_http::Response::from_string("{}").with_status_code(status));
        }
    });

    (base_url, rx, handle)
}

#[tokio::test]
async fn uploads_use_media_endpoint_with_encoded_name() -> anyhow::Result<()> {
    let (base, rx, handle) = spawn_gcs_stub(vec![200]);
    let store = GcsRemoteStore::new("my-bucket")
        .with_api_base(&base)
        .with_static_token("test-token");
    assert_eq!(store.uri(), "gs://my-bucket");

    let session = store.open_session().await?;
    session
        .put_bytes("books/guide/map.json", b"{\"map\":[]}".to_vec(), "application/json")
        .await?;
    drop(session);
    handle.join().expect("stub thread");

    let seen = rx.recv()?;
    assert_eq!(seen.method, "POST");
    assert_eq!(
        seen.url,
        "/upload/storage/v1/b/my-bucket/o?uploadType=media&name=books%2Fguide%2Fmap.json"
    );
    assert_eq!(seen.authorization.as_deref(), Some("Bearer test-token"));
    assert_eq!(seen.content_type.as_deref(), Some("application/json"));
    assert_eq!(seen.body, b"{\"map\":[]}");
    Ok(())
}

#[tokio::test]
async fn delete_treats_missing_object_as_success() -> anyhow::Result<()> {
    let (base, rx, handle) = spawn_gcs_stub(vec![404, 500]);
    let store = GcsRemoteStore::new("my-bucket")
        .with_api_base(&base)
        .with_static_token("test-token");
    let session = store.open_session().await?;

    session.remove("docs/abc.json").await?;
    let err = session
        .remove("docs/def.json")
        .await
        .expect_err("server error must surface");
    assert!(format!("{err:#}").contains("500"));
    drop(session);
    handle.join().expect("stub thread");

    let first = rx.recv()?;
    assert_eq!(first.method, "DELETE");
    assert_eq!(first.url, "/storage/v1/b/my-bucket/o/docs%2Fabc.json");
    Ok(())
}

#[tokio::test]
async fn failed_upload_reports_status() -> anyhow::Result<()> {
    let (base, _rx, handle) = spawn_gcs_stub(vec![403]);
    let store = GcsRemoteStore::new("my-bucket")
        .with_api_base(&base)
        .with_static_token("test-token");
    let session = store.open_session().await?;

    let err = session
        .put_bytes("files/x.png", vec![1, 2, 3], "image/png")
        .await
        .expect_err("forbidden");
    assert!(format!("{err:#}").contains("403"));
    drop(session);
    handle.join().expect("stub thread");
    Ok(())
}
