use moki_core::chat::ChatClient;
use moki_core::completion::{RequestContext, SenderType};
use moki_core::conversation::Conversation;
use moki_core::get_completion_llm;
use moki_core::model::{ModelConfig, ModelProvider};
use moki_core::resource::{ResourceFetcher, ResourceManager};
use serde_json::{Value, json};
use std::sync::Arc;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

fn event_stream_body(tokens: &[&str]) -> String {
    let mut body = tokens
        .iter()
        .map(|token| {
            let event = json!({
                "id": "chatcmpl-1",
                "object": "chat.completion.chunk",
                "created": 1684,
                "model": "gpt-3.5-turbo",
                "choices": [{
                    "delta": {"content": token},
                    "index": 0,
                    "finish_reason": Value::Null
                }]
            });
            format!("data: {event}\n\n")
        })
        .collect::<String>();
    body.push_str("data: [DONE]\n\n");
    body
}

async fn client_for(server: &MockServer) -> ChatClient {
    let model = get_completion_llm(ModelConfig {
        name: "gpt-3.5-turbo".to_string(),
        provider: ModelProvider::Openai,
        base_url: server.uri(),
        api_key: "sk-test".to_string(),
    })
    .unwrap();
    ChatClient::new(model, 0.2)
}

#[tokio::test]
async fn test_question_with_url_resource_streams_answer() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/docs/tar"))
        .respond_with(ResponseTemplate::new(200).set_body_string("tar -xzf file.tar.gz"))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_raw(event_stream_body(&["tar ", "-xzf"]), "text/event-stream")
                .insert_header("Connection", "close"),
        )
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let conversation = Arc::new(Conversation::new("You are Moki.", 0, 200));
    let resources = ResourceManager::new(ResourceFetcher::new());
    let input = format!("how to extract? -url:{}/docs/tar", server.uri());

    let managed = resources
        .manage_resources(&conversation, &input)
        .await
        .unwrap();
    assert_eq!(managed.input, "how to extract?");
    assert_eq!(
        managed.resources,
        vec![format!("url:{}/docs/tar", server.uri())]
    );

    let (mut rx, mut err_rx, handle) = client.spawn_stream_request(
        RequestContext::background(),
        conversation.clone(),
        managed.input,
    );
    let mut tokens = Vec::new();
    while let Some(token) = rx.recv().await {
        tokens.push(token);
    }
    assert_eq!(err_rx.recv().await, None);
    handle.await.unwrap();

    assert_eq!(tokens, vec!["tar ", "-xzf"]);
    let senders: Vec<_> = conversation.messages().iter().map(|m| m.sender).collect();
    assert_eq!(
        senders,
        vec![
            SenderType::System,
            SenderType::System,
            SenderType::User,
            SenderType::Assistant
        ]
    );
    assert_eq!(
        conversation.last_assistant_message().unwrap().text,
        "tar -xzf"
    );

    // The resource reached the provider as a named system message.
    let requests = server.received_requests().await.unwrap();
    let completion = requests
        .iter()
        .find(|r| r.url.path() == "/chat/completions")
        .unwrap();
    let body: Value = serde_json::from_slice(&completion.body).unwrap();
    assert_eq!(body["max_tokens"], 200);
    assert_eq!(body["messages"][1]["role"], "system");
    assert!(
        body["messages"][1]["content"]
            .to_string()
            .contains("tar -xzf file.tar.gz")
    );
}

#[tokio::test]
async fn test_rejected_stream_leaves_prompt_unanswered() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({
            "error": {
                "message": "Incorrect API key provided",
                "type": "invalid_request_error",
                "param": null,
                "code": "invalid_api_key"
            }
        })))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let conversation = Arc::new(Conversation::new("You are Moki.", 0, 0));

    let (mut rx, mut err_rx, handle) =
        client.spawn_stream_request(RequestContext::background(), conversation.clone(), "hi");
    assert_eq!(rx.recv().await, None);
    let error = err_rx.recv().await.unwrap();
    handle.await.unwrap();

    assert!(error.to_string().starts_with("Request failed"));
    assert_eq!(conversation.len(), 2);
    assert_eq!(conversation.last_assistant_message(), None);
}
