use super::*;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn config_for(server: &MockServer) -> OllamaConfig {
    OllamaConfig {
        host: server.address().ip().to_string(),
        port: server.address().port(),
        embedding_dimension: 3,
        retry_attempts: 1,
        ..OllamaConfig::default()
    }
}

#[test]
fn client_configuration() {
    let config = OllamaConfig {
        protocol: "http".to_string(),
        host: "test-host".to_string(),
        port: 1234,
        model: "test-model".to_string(),
        embedding_dimension: 384,
        timeout_seconds: 5,
        retry_attempts: 2,
    };
    let client = OllamaClient::new(&config).expect("Failed to create client");

    assert_eq!(client.model(), "test-model");
    assert_eq!(client.dimension(), 384);
    assert_eq!(client.base_url.host_str(), Some("test-host"));
    assert_eq!(client.base_url.port(), Some(1234));
    assert_eq!(client.retry_attempts, 2);
}

#[test]
fn client_builder_methods() {
    let config = OllamaConfig {
        retry_attempts: 0,
        ..OllamaConfig::default()
    };
    let client = OllamaClient::new(&config)
        .expect("Failed to create client")
        .with_timeout(Duration::from_secs(60));

    // At least one attempt is always made
    assert_eq!(client.retry_attempts, 1);
    assert_eq!(client.dimension(), DEFAULT_EMBEDDING_DIMENSION as usize);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn embed_posts_input_and_reads_first_vector() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .and(body_json(serde_json::json!({
            "model": "nomic-embed-text:latest",
            "input": "finding aid"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "model": "nomic-embed-text:latest",
            "embeddings": [[0.25, -0.5, 1.0]]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))?;
    let vector = client.embed("finding aid")?;

    assert_eq!(vector, vec![0.25, -0.5, 1.0]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn empty_embeddings_yield_empty_vector() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "embeddings": [] })),
        )
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))?;
    assert!(client.embed("museum")?.is_empty());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_errors_are_not_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(404))
        .expect(1)
        .mount(&server)
        .await;

    let config = OllamaConfig {
        retry_attempts: 3,
        ..config_for(&server)
    };
    let client = OllamaClient::new(&config)?;
    let err = client.embed("museum").expect_err("404 fails");
    assert!(format!("{err:#}").contains("HTTP 404"));

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_errors_are_retried() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/embed"))
        .respond_with(ResponseTemplate::new(500))
        .expect(2)
        .mount(&server)
        .await;

    let config = OllamaConfig {
        retry_attempts: 2,
        ..config_for(&server)
    };
    let client = OllamaClient::new(&config)?;
    assert!(client.embed("museum").is_err());

    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn health_check_requires_model() -> Result<()> {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/tags"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "models": [{"name": "nomic-embed-text:latest", "size": 274302450}]
        })))
        .mount(&server)
        .await;

    let client = OllamaClient::new(&config_for(&server))?;
    client.health_check()?;

    let other = OllamaClient::new(&OllamaConfig {
        model: "mxbai-embed-large".to_string(),
        ..config_for(&server)
    })?;
    let err = other.health_check().expect_err("model missing");
    assert!(format!("{err:#}").contains("mxbai-embed-large"));

    Ok(())
}
