use docchat_core::{ApiError, ChatMessage, Config, RagClient, StatusResponse};
use serde_json::json;
use wiremock::matchers::{body_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PDF: &[u8] = b"%PDF-1.4\n1 0 obj\n<<>>\nendobj\n";

#[tokio::test]
async fn history_is_parsed_as_messages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/history"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"role": "user", "content": "hello"},
            {"role": "assistant", "content": "hi there"},
        ])))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let history = client.fetch_history().await.unwrap();
    assert_eq!(
        history,
        vec![ChatMessage::user("hello"), ChatMessage::assistant("hi there")]
    );
}

#[tokio::test]
async fn non_success_status_is_network_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(503))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let err = client.fetch_status().await.unwrap_err();
    assert!(matches!(err, ApiError::Network { .. }), "{err:?}");
}

#[tokio::test]
async fn status_with_null_filename() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/status"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"filename": null})))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    assert_eq!(
        client.fetch_status().await.unwrap(),
        StatusResponse { filename: None }
    );
}

#[tokio::test]
async fn health_reports_version_and_tolerates_odd_bodies() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "healthy", "version": "2.3.0"})),
        )
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let first = client.check_health().await.unwrap();
    assert_eq!(first.version.as_deref(), Some("2.3.0"));
    let second = client.check_health().await.unwrap();
    assert_eq!(second.version, None);
}

#[tokio::test]
async fn unreachable_service_fails_health() {
    let uri = {
        let server = MockServer::start().await;
        server.uri()
    };
    let client = RagClient::new(&uri);
    assert!(client.check_health().await.is_err());
}

#[tokio::test]
async fn upload_sends_multipart_file_field() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("name=\"file\""))
        .and(body_string_contains("filename=\"paper.pdf\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "filename": "paper.pdf",
            "status": "Uploaded & Indexed",
            "chunks": 12
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let response = client.upload_document("paper.pdf", PDF.to_vec()).await.unwrap();
    assert_eq!(response.filename, "paper.pdf");
    assert_eq!(response.chunks, 12);
}

#[tokio::test]
async fn upload_error_carries_server_detail() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(413).set_body_json(json!({
            "detail": "File too large. Maximum size is 50MB."
        })))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let err = client.upload_document("paper.pdf", PDF.to_vec()).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Upload {
            message: "File too large. Maximum size is 50MB.".to_string()
        }
    );
}

#[tokio::test]
async fn upload_error_without_body_is_generic() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let err = client.upload_document("paper.pdf", PDF.to_vec()).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::Upload {
            message: "Upload failed".to_string()
        }
    );
}

#[tokio::test]
async fn invalid_document_never_reaches_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let err = client
        .upload_document("notes.txt", b"plain text".to_vec())
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidDocument { .. }));
}

#[tokio::test]
async fn upload_path_reads_file_from_disk() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .and(body_string_contains("filename=\"report.pdf\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "filename": "report.pdf",
            "status": "Loaded from Cache",
            "chunks": 0
        })))
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("report.pdf");
    std::fs::write(&file, PDF).unwrap();

    let client = RagClient::new(&server.uri());
    let response = client.upload_path(&file).await.unwrap();
    assert_eq!(response.status, "Loaded from Cache");
}

#[tokio::test]
async fn reset_and_clear_hit_their_routes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/reset"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "Session Reset"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/clear_chat"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(json!({"status": "Chat History Cleared"})),
        )
        .expect(1)
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    assert_eq!(client.reset_session().await.unwrap().status, "Session Reset");
    assert_eq!(client.clear_chat().await.unwrap().status, "Chat History Cleared");
}

#[tokio::test]
async fn chat_request_posts_question_json() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .and(body_json(json!({"question": "why?"})))
        .respond_with(ResponseTemplate::new(200).set_body_string(""))
        .expect(1)
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    assert!(client.send_chat_message("why?").await.is_ok());
}

#[tokio::test]
async fn chat_request_failure_uses_body_text() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("no document indexed"))
        .mount(&server)
        .await;

    let client = RagClient::new(&server.uri());
    let err = match client.send_chat_message("q").await {
        Ok(_) => panic!("expected failure"),
        Err(err) => err,
    };
    assert_eq!(
        err,
        ApiError::ChatRequest {
            message: "no document indexed".to_string()
        }
    );
}

#[tokio::test]
async fn oversized_file_is_rejected_from_its_size_alone() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/upload"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let dir = tempfile::tempdir().unwrap();
    let file = dir.path().join("huge.pdf");
    let handle = std::fs::File::create(&file).unwrap();
    // Sparse: the size is reported without the bytes existing on disk
    handle.set_len(3 * 1024 * 1024).unwrap();

    let mut config = Config::new();
    config.api_url = server.uri();
    config.max_upload_mb = 1;
    let client = RagClient::from_config(&config);

    let err = client.upload_path(&file).await.unwrap_err();
    assert_eq!(
        err,
        ApiError::InvalidDocument {
            message: "File too large. Maximum size is 1MB.".to_string()
        }
    );
}

#[tokio::test]
async fn missing_file_is_an_invalid_document() {
    let client = RagClient::new("http://127.0.0.1:9");
    let err = client
        .upload_path(std::path::Path::new("/nonexistent/docchat/paper.pdf"))
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::InvalidDocument { .. }), "{err:?}");
}
