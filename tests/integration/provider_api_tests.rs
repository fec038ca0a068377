/*!
 * Chat-completion provider against a local stub server
 */

use serde_json::json;
use std::sync::Arc;

use crate::common::{StubResponse, TestProject, spawn_http_stub, test_config, wait_for_job};
use lingodeck::app_config::ProviderConfig;
use lingodeck::database::ProjectStore;
use lingodeck::database::models::{ProtectedTerm, TermCategory, TranslationStatus};
use lingodeck::errors::ProviderError;
use lingodeck::jobs::{JobService, JobState, StartJobRequest};
use lingodeck::protection::analyze_terms;
use lingodeck::providers::openai::ChatCompletionProvider;
use lingodeck::providers::{BatchItem, BatchRequest, HttpProviderFactory, TranslationProvider};

fn stub_provider(url: &str) -> ChatCompletionProvider {
    let config = ProviderConfig::custom("stub", url, "secret-key", vec!["stub-model".to_string()]);
    ChatCompletionProvider::new(&config, "You are a translator.".to_string()).unwrap()
}

fn request(texts: &[(&str, &str)], protected_terms: Vec<ProtectedTerm>) -> BatchRequest {
    BatchRequest {
        items: texts
            .iter()
            .map(|(key, text)| BatchItem {
                key_path: key.to_string(),
                source_text: text.to_string(),
            })
            .collect(),
        protected_terms,
        context: Some("Online shop".to_string()),
        source_language: "en".to_string(),
        target_language: "fr".to_string(),
        model: "stub-model".to_string(),
    }
}

/// Test a well-formed reply with token usage
#[tokio::test]
async fn test_translate_batch_withArrayReply_shouldMapItemsInOrder() {
    let (url, bodies) = spawn_http_stub(vec![StubResponse::chat(r#"["Bonjour {name}", "Au revoir"]"#, 12, 4)])
        .await
        .unwrap();
    let provider = stub_provider(&url);

    let response = provider
        .translate_batch(&request(&[("a", "Hello {name}"), ("b", "Goodbye")], vec![]))
        .await
        .unwrap();

    assert_eq!(response.translations.len(), 2);
    assert_eq!(response.translations[0].key_path, "a");
    assert_eq!(response.translations[0].translated_text, "Bonjour {name}");
    assert_eq!(response.translations[1].translated_text, "Au revoir");
    assert_eq!(response.usage.prompt_tokens, 12);
    assert_eq!(response.usage.completion_tokens, 4);

    let bodies = bodies.lock();
    assert_eq!(bodies.len(), 1);
    let sent: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(sent["model"], "stub-model");
    assert_eq!(sent["messages"][0]["role"], "system");
    assert!(sent["messages"][1]["content"].as_str().unwrap().contains("Online shop"));
}

/// Test that fenced replies and short arrays are tolerated
#[tokio::test]
async fn test_translate_batch_withFencedShortReply_shouldOmitMissingKeys() {
    let (url, _) = spawn_http_stub(vec![StubResponse::chat("Voici:\n```json\n[\"Un\"]\n```", 5, 1)])
        .await
        .unwrap();
    let provider = stub_provider(&url);

    let response = provider
        .translate_batch(&request(&[("a", "One"), ("b", "Two")], vec![]))
        .await
        .unwrap();

    assert_eq!(response.translations.len(), 1);
    assert_eq!(response.translations[0].key_path, "a");
    assert_eq!(response.translations[0].translated_text, "Un");
}

/// Test that protected terms never reach the provider and come back intact
#[tokio::test]
async fn test_translate_batch_withProtectedTerm_shouldSendPlaceholder() {
    let (url, bodies) = spawn_http_stub(vec![StubResponse::chat(r#"["Bienvenue chez __PROT_0__"]"#, 6, 3)])
        .await
        .unwrap();
    let provider = stub_provider(&url);
    let terms = vec![ProtectedTerm {
        id: 1,
        project_id: 1,
        term: "Acme".to_string(),
        category: TermCategory::Brand,
        is_regex: false,
        key_scopes: vec![],
    }];

    let response = provider
        .translate_batch(&request(&[("home.title", "Welcome to Acme")], terms))
        .await
        .unwrap();

    assert_eq!(response.translations[0].translated_text, "Bienvenue chez Acme");
    let body = bodies.lock()[0].clone();
    assert!(body.contains("__PROT_0__"));
    assert!(!body.contains("Acme"));
}

/// Test the classification of HTTP failures
#[tokio::test]
async fn test_translate_batch_withErrorStatus_shouldClassify() {
    let cases: Vec<(StubResponse, fn(&ProviderError) -> bool)> = vec![
        (StubResponse::status(401, r#"{"error":"bad key"}"#), |e| {
            matches!(e, ProviderError::AuthenticationError(_))
        }),
        (StubResponse::status(429, "slow down"), |e| {
            matches!(e, ProviderError::RateLimitExceeded(_))
        }),
        (StubResponse::status(500, "boom"), |e| {
            matches!(e, ProviderError::ServerError { status_code: 500, .. })
        }),
        (StubResponse::status(404, "no such model"), |e| {
            matches!(e, ProviderError::UnsupportedModel(_))
        }),
        (StubResponse::status(200, "<html>oops</html>"), |e| {
            matches!(e, ProviderError::ParseError(_))
        }),
        (StubResponse::chat("I cannot translate that.", 1, 1), |e| {
            matches!(e, ProviderError::ParseError(_))
        }),
    ];

    for (response, expected) in cases {
        let label = format!("{} {}", response.status, response.body);
        let (url, _) = spawn_http_stub(vec![response]).await.unwrap();
        let err = stub_provider(&url)
            .translate_batch(&request(&[("a", "One")], vec![]))
            .await
            .unwrap_err();
        assert!(expected(&err), "{} classified as {:?}", label, err);
    }
}

/// Test that nothing is sent for an empty batch
#[tokio::test]
async fn test_translate_batch_withNoItems_shouldNotCallEndpoint() {
    let (url, bodies) = spawn_http_stub(vec![StubResponse::status(500, "unexpected")])
        .await
        .unwrap();

    let response = stub_provider(&url).translate_batch(&request(&[], vec![])).await.unwrap();
    assert!(response.translations.is_empty());
    assert!(bodies.lock().is_empty());
}

async fn stub_service(project: &TestProject, url: &str) -> JobService {
    let mut config = test_config();
    config
        .providers
        .push(ProviderConfig::custom("stub", url, "secret-key", vec!["stub-model".to_string()]));
    let store: Arc<dyn ProjectStore> = Arc::new(project.repo.clone());
    JobService::new(store, config, Arc::new(HttpProviderFactory))
}

fn stub_request(project: &TestProject) -> StartJobRequest {
    let mut request = StartJobRequest::new(project.project.id, vec!["fr".to_string()]);
    request.provider = Some("stub".to_string());
    request
}

/// Test a whole job through the HTTP provider
#[tokio::test]
async fn test_job_withCustomHttpProvider_shouldStoreTranslations() {
    let project = TestProject::new(json!({"a": {"b": "Hello {name}", "c": "Goodbye"}})).await.unwrap();
    let (url, bodies) = spawn_http_stub(vec![StubResponse::chat(r#"["Bonjour {name}", "Au revoir"]"#, 10, 5)])
        .await
        .unwrap();
    let service = stub_service(&project, &url).await;

    let job_id = service.start_job(stub_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Completed);
    let result = snapshot.result.unwrap();
    assert_eq!(result.total_translated, 2);
    assert_eq!(result.token_usage.total(), 15);
    assert_eq!(bodies.lock().len(), 1);

    let translations = project.translations("fr").await.unwrap();
    assert_eq!(
        translations["a.b"],
        ("Bonjour {name}".to_string(), TranslationStatus::AiTranslated)
    );
}

/// Test that a rejected key fails the job after one request
#[tokio::test]
async fn test_job_withUnauthorizedEndpoint_shouldFailWithoutRetry() {
    let project = TestProject::new(json!({"a": "Hello"})).await.unwrap();
    let (url, bodies) = spawn_http_stub(vec![StubResponse::status(401, r#"{"error":"invalid api key"}"#)])
        .await
        .unwrap();
    let service = stub_service(&project, &url).await;

    let job_id = service.start_job(stub_request(&project)).await.unwrap();
    let snapshot = wait_for_job(&service, &job_id).await;

    assert_eq!(snapshot.state, JobState::Failed);
    assert!(snapshot.error.unwrap().contains("Authentication error"));
    assert_eq!(bodies.lock().len(), 1);
    assert!(project.translations("fr").await.unwrap().is_empty());
}

/// Test term suggestions from a fenced object reply
#[tokio::test]
async fn test_analyze_terms_withFencedReply_shouldReturnCategorizedTerms() {
    let reply = "```json\n{\"brand\": [\"Acme\", \"Acme\"], \"technical\": [\"API\"], \"url\": [\"acme.io\"], \"code\": []}\n```";
    let (url, bodies) = spawn_http_stub(vec![StubResponse::chat(reply, 40, 12)]).await.unwrap();
    let texts = vec![
        "Welcome to Acme, {name}".to_string(),
        "Read the API docs on acme.io".to_string(),
        "{count}".to_string(),
    ];

    let report = analyze_terms(&stub_provider(&url), "stub-model", &texts).await.unwrap();

    assert_eq!(report.analysis.brand, vec!["Acme"]);
    assert_eq!(report.analysis.technical, vec!["API"]);
    assert_eq!(report.analysis.url, vec!["acme.io"]);
    assert!(report.analysis.code.is_empty());
    assert_eq!(report.analysed_texts, 2);
    assert_eq!(report.failed_requests, 0);
    assert_eq!(report.usage.total(), 52);

    let bodies = bodies.lock();
    assert_eq!(bodies.len(), 1);
    let sent: serde_json::Value = serde_json::from_str(&bodies[0]).unwrap();
    assert_eq!(sent["model"], "stub-model");
    assert!(sent["messages"][0]["content"].as_str().unwrap().contains("term analyzer"));
    let prompt = sent["messages"][1]["content"].as_str().unwrap();
    assert!(prompt.contains("Welcome to Acme"));
    assert!(!prompt.contains("{name}"));
}

/// Test that one failed chunk does not lose the others
#[tokio::test]
async fn test_analyze_terms_withFailingFirstChunk_shouldKeepLaterChunks() {
    let (url, bodies) = spawn_http_stub(vec![
        StubResponse::status(503, "overloaded"),
        StubResponse::chat(r#"{"brand": ["Acme"], "technical": [], "url": [], "code": ["onClick"]}"#, 10, 5),
    ])
    .await
    .unwrap();
    let texts: Vec<String> = (0..150).map(|i| format!("Item {} sold by Acme", i)).collect();

    let report = analyze_terms(&stub_provider(&url), "stub-model", &texts).await.unwrap();

    assert_eq!(bodies.lock().len(), 2);
    assert_eq!(report.failed_requests, 1);
    assert_eq!(report.analysed_texts, 150);
    assert_eq!(report.analysis.brand, vec!["Acme"]);
    assert_eq!(report.analysis.code, vec!["onClick"]);
}

/// Test that analysis errors surface when nothing succeeds
#[tokio::test]
async fn test_analyze_terms_withErrorStatus_shouldReturnError() {
    let (url, _) = spawn_http_stub(vec![StubResponse::status(401, "bad key")]).await.unwrap();
    let texts = vec!["Welcome to Acme".to_string()];
    let err = analyze_terms(&stub_provider(&url), "stub-model", &texts).await.unwrap_err();
    assert!(matches!(err, ProviderError::AuthenticationError(_)));

    let (url, bodies) = spawn_http_stub(vec![StubResponse::chat("Nothing to protect.", 3, 2)]).await.unwrap();
    let err = analyze_terms(&stub_provider(&url), "stub-model", &texts).await.unwrap_err();
    assert!(matches!(err, ProviderError::ParseError(_)));
    assert_eq!(bodies.lock().len(), 1);
}
