//! OpenAI Chat Completions API provider

use async_stream::stream;
use async_trait::async_trait;
use futures::StreamExt;
use reqwest_eventsource::{Event, EventSource};
use serde::{Deserialize, Serialize};

use super::LlmProvider;
use crate::{
    error::{Error, Result},
    stream::{MessageEvent, MessageEventStream, decode_arguments},
    types::{
        AssistantMetadata, Content, Context, Message, Model, RequestOptions, ResponseFormat,
        StopReason, ToolChoice, Usage,
    },
};

/// OpenAI API client. Works against any endpoint speaking the Chat Completions protocol.
pub struct OpenAIProvider {
    client: reqwest::Client,
    api_key: String,
}

impl OpenAIProvider {
    /// Create a new OpenAI provider with an API key
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
        }
    }

    fn post(&self, model: &Model) -> reqwest::RequestBuilder {
        let url = format!("{}/chat/completions", model.base_url);
        let mut builder = self.client.post(url).bearer_auth(&self.api_key);
        for (key, value) in &model.headers {
            builder = builder.header(key.as_str(), value.as_str());
        }
        builder
    }

    fn build_request(
        &self,
        model: &Model,
        context: &Context,
        options: &RequestOptions,
        stream: bool,
    ) -> OpenAIRequest {
        let mut messages = Vec::new();

        if let Some(ref system_prompt) = context.system_prompt {
            messages.push(OpenAIMessage {
                role: "system".to_string(),
                content: Some(system_prompt.clone()),
                tool_calls: None,
            });
        }

        for msg in &context.messages {
            messages.push(convert_message(msg));
        }

        let tools = if context.tools.is_empty() {
            None
        } else {
            Some(
                context
                    .tools
                    .iter()
                    .map(|t| OpenAITool {
                        tool_type: "function".to_string(),
                        function: OpenAIFunction {
                            name: t.name.clone(),
                            description: Some(t.description.clone()),
                            parameters: Some(t.parameters.clone()),
                        },
                    })
                    .collect(),
            )
        };

        let tool_choice = match (tools.is_some(), options.tool_choice) {
            (false, _) => None,
            (true, Some(choice)) => Some(choice),
            (true, None) => Some(ToolChoice::Auto),
        };

        OpenAIRequest {
            model: model.id.clone(),
            messages,
            stream,
            max_tokens: Some(options.max_tokens.unwrap_or(model.max_tokens)),
            temperature: options.temperature,
            tools,
            tool_choice: tool_choice.map(|c| c.as_str().to_string()),
            response_format: options.response_format.as_ref().map(convert_response_format),
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAIProvider {
    async fn complete(
        &self,
        model: &Model,
        context: &Context,
        options: &RequestOptions,
    ) -> Result<Message> {
        let request = self.build_request(model, context, options, false);
        tracing::debug!(model = %model.id, messages = request.messages.len(), "chat completion request");

        let response = self.post(model).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(Error::from_status(status.as_u16(), &text));
        }

        let body: CompletionResponse = response.json().await?;
        parse_completion(body, &model.id)
    }

    async fn stream(
        &self,
        model: &Model,
        context: &Context,
        options: &RequestOptions,
    ) -> Result<MessageEventStream> {
        let request = self.build_request(model, context, options, true);
        let request_builder = self.post(model).json(&request);

        let event_source = EventSource::new(request_builder)
            .map_err(|e| Error::Sse(format!("Failed to create event source: {}", e)))?;

        Ok(Box::pin(create_stream(event_source, model.clone())))
    }
}

fn convert_response_format(format: &ResponseFormat) -> serde_json::Value {
    match format {
        ResponseFormat::JsonSchema { name, schema } => serde_json::json!({
            "type": "json_schema",
            "json_schema": {
                "name": name,
                "schema": schema,
            }
        }),
    }
}

fn convert_message(msg: &Message) -> OpenAIMessage {
    match msg {
        Message::User { .. } => OpenAIMessage {
            role: "user".to_string(),
            content: Some(msg.text()),
            tool_calls: None,
        },
        Message::Assistant { content, .. } => {
            let mut text_parts = Vec::new();
            let mut tool_calls = Vec::new();

            for c in content {
                match c {
                    Content::Text { text } => text_parts.push(text.clone()),
                    Content::ToolCall {
                        id,
                        name,
                        arguments,
                    } => {
                        tool_calls.push(OpenAIToolCall {
                            id: id.clone(),
                            call_type: "function".to_string(),
                            function: OpenAIFunctionCall {
                                name: name.clone(),
                                arguments: arguments.to_string(),
                            },
                        });
                    }
                }
            }

            OpenAIMessage {
                role: "assistant".to_string(),
                content: if text_parts.is_empty() {
                    None
                } else {
                    Some(text_parts.join(""))
                },
                tool_calls: if tool_calls.is_empty() {
                    None
                } else {
                    Some(tool_calls)
                },
            }
        }
    }
}

fn parse_completion(body: CompletionResponse, model_id: &str) -> Result<Message> {
    let choice = body
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| Error::UnexpectedResponse("completion has no choices".to_string()))?;

    let mut content = Vec::new();
    if let Some(text) = choice.message.content.filter(|t| !t.is_empty()) {
        content.push(Content::Text { text });
    }
    for call in choice.message.tool_calls.unwrap_or_default() {
        content.push(Content::ToolCall {
            id: call.id,
            name: call.function.name,
            arguments: decode_arguments(&call.function.arguments),
        });
    }

    let usage = body
        .usage
        .map(|u| Usage {
            input: u.prompt_tokens,
            output: u.completion_tokens,
        })
        .unwrap_or_default();

    Ok(Message::Assistant {
        content,
        metadata: AssistantMetadata {
            model: Some(body.model.unwrap_or_else(|| model_id.to_string())),
            usage,
            stop_reason: choice
                .finish_reason
                .as_deref()
                .and_then(StopReason::from_finish_reason),
            timestamp: chrono::Utc::now().timestamp_millis(),
        },
    })
}

fn create_stream(
    mut event_source: EventSource,
    model: Model,
) -> impl futures::Stream<Item = MessageEvent> {
    stream! {
        let mut accumulated_text = String::new();
        let mut tool_calls: Vec<(String, String, String)> = Vec::new(); // (id, name, args)
        let mut finish_reason: Option<String> = None;
        let mut usage = Usage::default();

        let start_message = Message::Assistant {
            content: vec![],
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                ..Default::default()
            },
        };
        yield MessageEvent::Start { message: start_message };

        while let Some(event) = event_source.next().await {
            match event {
                Ok(Event::Open) => {}
                Ok(Event::Message(msg)) => {
                    if msg.data == "[DONE]" {
                        break;
                    }

                    let chunk: std::result::Result<StreamChunk, _> = serde_json::from_str(&msg.data);
                    match chunk {
                        Ok(chunk) => {
                            for choice in &chunk.choices {
                                if let Some(ref content) = choice.delta.content {
                                    accumulated_text.push_str(content);
                                    yield MessageEvent::TextDelta {
                                        content_index: 0,
                                        delta: content.clone(),
                                    };
                                }

                                if let Some(ref tcs) = choice.delta.tool_calls {
                                    for tc in tcs {
                                        let idx = tc.index as usize;
                                        while tool_calls.len() <= idx {
                                            tool_calls.push((String::new(), String::new(), String::new()));
                                        }
                                        if let Some(ref id) = tc.id {
                                            tool_calls[idx].0 = id.clone();
                                        }
                                        if let Some(ref function) = tc.function {
                                            if let Some(ref name) = function.name {
                                                tool_calls[idx].1 = name.clone();
                                                yield MessageEvent::ToolCallStart {
                                                    content_index: idx + 1,
                                                    id: tool_calls[idx].0.clone(),
                                                    name: name.clone(),
                                                };
                                            }
                                            if let Some(ref args) = function.arguments {
                                                tool_calls[idx].2.push_str(args);
                                                yield MessageEvent::ToolCallDelta {
                                                    content_index: idx + 1,
                                                    delta: args.clone(),
                                                };
                                            }
                                        }
                                    }
                                }

                                if let Some(ref reason) = choice.finish_reason {
                                    finish_reason = Some(reason.clone());
                                }
                            }

                            if let Some(ref stream_usage) = chunk.usage {
                                usage.input = stream_usage.prompt_tokens;
                                usage.output = stream_usage.completion_tokens;
                            }
                        }
                        Err(e) => {
                            yield MessageEvent::Error {
                                message: format!("Failed to parse chunk: {}", e),
                                status: None,
                            };
                            return;
                        }
                    }
                }
                Err(reqwest_eventsource::Error::StreamEnded) => break,
                Err(reqwest_eventsource::Error::InvalidStatusCode(status, response)) => {
                    let body = response.text().await.unwrap_or_default();
                    yield MessageEvent::Error {
                        message: body,
                        status: Some(status.as_u16()),
                    };
                    return;
                }
                Err(e) => {
                    yield MessageEvent::Error {
                        message: format!("SSE error: {}", e),
                        status: None,
                    };
                    return;
                }
            }
        }
        event_source.close();

        let mut content = Vec::new();
        if !accumulated_text.is_empty() {
            content.push(Content::Text {
                text: accumulated_text,
            });
        }
        for (id, name, args) in tool_calls {
            if !id.is_empty() && !name.is_empty() {
                content.push(Content::ToolCall {
                    id,
                    name,
                    arguments: decode_arguments(&args),
                });
            }
        }

        let stop_reason = finish_reason
            .as_deref()
            .and_then(StopReason::from_finish_reason);

        let final_message = Message::Assistant {
            content,
            metadata: AssistantMetadata {
                model: Some(model.id.clone()),
                usage: usage.clone(),
                stop_reason,
                timestamp: chrono::Utc::now().timestamp_millis(),
            },
        };

        yield MessageEvent::Done {
            message: final_message,
            stop_reason: stop_reason.unwrap_or(StopReason::Stop),
            usage,
        };
    }
}

// Request types

#[derive(Debug, Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<OpenAIMessage>,
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tools: Option<Vec<OpenAITool>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIMessage {
    role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Serialize)]
struct OpenAITool {
    #[serde(rename = "type")]
    tool_type: String,
    function: OpenAIFunction,
}

#[derive(Debug, Serialize)]
struct OpenAIFunction {
    name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    parameters: Option<serde_json::Value>,
}

#[derive(Debug, Serialize)]
struct OpenAIToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: OpenAIFunctionCall,
}

#[derive(Debug, Serialize)]
struct OpenAIFunctionCall {
    name: String,
    arguments: String,
}

// Non-streaming response types

#[derive(Debug, Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<CompletionChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct CompletionChoice {
    message: ResponseMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Debug, Deserialize)]
struct ResponseToolCall {
    id: String,
    function: ResponseFunction,
}

#[derive(Debug, Deserialize)]
struct ResponseFunction {
    name: String,
    #[serde(default)]
    arguments: String,
}

// Streaming response types

#[derive(Debug, Deserialize)]
struct StreamChunk {
    choices: Vec<StreamChoice>,
    #[serde(default)]
    usage: Option<StreamUsage>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    content: Option<String>,
    tool_calls: Option<Vec<StreamToolCall>>,
}

#[derive(Debug, Deserialize)]
struct StreamToolCall {
    index: i32,
    id: Option<String>,
    function: Option<StreamFunction>,
}

#[derive(Debug, Deserialize)]
struct StreamFunction {
    name: Option<String>,
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamUsage {
    prompt_tokens: u32,
    completion_tokens: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::collect_message;
    use crate::types::Tool;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_model(server: &MockServer) -> Model {
        Model::openai("gpt-test").with_base_url(server.uri())
    }

    fn weather_tool() -> Tool {
        Tool::new(
            "weather",
            "Get the weather",
            serde_json::json!({
                "type": "object",
                "properties": { "query": { "type": "string" } },
                "required": ["query"]
            }),
        )
    }

    #[test]
    fn test_build_request_structured_output() {
        let provider = OpenAIProvider::new("key");
        let model = Model::openai("gpt-test");
        let mut context = Context::with_system("classify");
        context.push(Message::user("hi"));
        let options = RequestOptions::default()
            .with_json_schema("router", serde_json::json!({"type": "object"}));

        let request = provider.build_request(&model, &context, &options, false);
        let json = serde_json::to_value(&request).unwrap();

        assert_eq!(json["messages"][0]["role"], "system");
        assert_eq!(json["messages"][1]["content"], "hi");
        assert_eq!(json["response_format"]["type"], "json_schema");
        assert_eq!(json["response_format"]["json_schema"]["name"], "router");
        assert!(json.get("tools").is_none());
        assert!(json.get("tool_choice").is_none());
        assert_eq!(json["stream"], false);
    }

    #[test]
    fn test_build_request_defaults_tool_choice_to_auto() {
        let provider = OpenAIProvider::new("key");
        let model = Model::openai("gpt-test");
        let mut context = Context::with_system("weather specialist");
        context.add_tool(weather_tool());

        let request = provider.build_request(&model, &context, &RequestOptions::default(), true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tool_choice"], "auto");
        assert_eq!(json["tools"][0]["function"]["name"], "weather");

        let required = RequestOptions::default().with_tool_choice(ToolChoice::Required);
        let request = provider.build_request(&model, &context, &required, true);
        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["tool_choice"], "required");
    }

    #[test]
    fn test_convert_assistant_tool_call_serializes_arguments() {
        let msg = Message::assistant_with_content(vec![Content::tool_call(
            "call_1",
            "weather",
            serde_json::json!({"query": "Paris"}),
        )]);
        let converted = convert_message(&msg);
        assert!(converted.content.is_none());
        let calls = converted.tool_calls.unwrap();
        assert_eq!(calls[0].function.arguments, r#"{"query":"Paris"}"#);
    }

    #[tokio::test]
    async fn test_complete_parses_tool_call_arguments() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(header("authorization", "Bearer test-key"))
            .and(body_partial_json(serde_json::json!({"tool_choice": "auto"})))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "model": "gpt-test",
                "choices": [{
                    "message": {
                        "content": null,
                        "tool_calls": [{
                            "id": "call_9",
                            "type": "function",
                            "function": { "name": "weather", "arguments": "{\"query\":\"Paris\"}" }
                        }]
                    },
                    "finish_reason": "tool_calls"
                }],
                "usage": { "prompt_tokens": 12, "completion_tokens": 3 }
            })))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key");
        let mut context = Context::with_system("weather specialist");
        context.push(Message::user("weather in Paris?"));
        context.add_tool(weather_tool());

        let msg = provider
            .complete(&test_model(&server), &context, &RequestOptions::default())
            .await
            .unwrap();

        let calls = msg.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "call_9");
        assert_eq!(calls[0].2, &serde_json::json!({"query": "Paris"}));
        match msg {
            Message::Assistant { metadata, .. } => {
                assert_eq!(metadata.stop_reason, Some(StopReason::ToolUse));
                assert_eq!(metadata.usage.input, 12);
            }
            _ => panic!("expected assistant"),
        }
    }

    async fn complete_with_status(status: u16) -> Error {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(status).set_body_string("nope"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key");
        provider
            .complete(&test_model(&server), &Context::default(), &RequestOptions::default())
            .await
            .unwrap_err()
    }

    #[tokio::test]
    async fn test_complete_maps_status_codes() {
        assert!(complete_with_status(401).await.is_auth());
        assert!(matches!(
            complete_with_status(429).await,
            Error::RateLimited { .. }
        ));
        assert!(complete_with_status(500).await.is_server_error());
    }

    #[tokio::test]
    async fn test_stream_collects_text() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Ahoy\"},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\", matey\"},\"finish_reason\":\"stop\"}]}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .and(body_partial_json(serde_json::json!({"stream": true})))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key");
        let stream = provider
            .stream(&test_model(&server), &Context::default(), &RequestOptions::default())
            .await
            .unwrap();
        let msg = collect_message(stream).await.unwrap();
        assert_eq!(msg.text(), "Ahoy, matey");
    }

    #[tokio::test]
    async fn test_stream_assembles_tool_call_deltas() {
        let server = MockServer::start().await;
        let body = concat!(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_7\",",
            "\"type\":\"function\",\"function\":{\"name\":\"weather\",\"arguments\":\"\"}}]},",
            "\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"function\":{\"arguments\":\"{\\\"query\\\":\"}}]},\"finish_reason\":null}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,",
            "\"function\":{\"arguments\":\"\\\"Paris\\\"}\"}}]},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":20,\"completion_tokens\":6}}\n\n",
            "data: [DONE]\n\n",
        );
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(body, "text/event-stream"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key");
        let mut context = Context::with_system("weather specialist");
        context.add_tool(weather_tool());
        let mut stream = provider
            .stream(&test_model(&server), &context, &RequestOptions::default())
            .await
            .unwrap();

        let mut deltas = Vec::new();
        let mut done = None;
        while let Some(event) = stream.next().await {
            match event {
                MessageEvent::ToolCallDelta { delta, .. } => deltas.push(delta),
                MessageEvent::Done {
                    message,
                    stop_reason,
                    usage,
                } => done = Some((message, stop_reason, usage)),
                MessageEvent::Error { message, .. } => panic!("stream failed: {}", message),
                _ => {}
            }
        }

        assert_eq!(deltas.concat(), r#"{"query":"Paris"}"#);
        let (message, stop_reason, usage) = done.expect("stream ended without done");
        assert_eq!(stop_reason, StopReason::ToolUse);
        assert_eq!(usage.input, 20);
        assert_eq!(usage.output, 6);
        let calls = message.tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].0, "call_7");
        assert_eq!(calls[0].1, "weather");
        assert_eq!(calls[0].2, &serde_json::json!({"query": "Paris"}));
    }

    #[tokio::test]
    async fn test_stream_reports_http_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/chat/completions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let provider = OpenAIProvider::new("test-key");
        let stream = provider
            .stream(&test_model(&server), &Context::default(), &RequestOptions::default())
            .await
            .unwrap();
        let err = collect_message(stream).await.unwrap_err();
        assert!(err.is_server_error(), "got {:?}", err);
    }
}
