//! Gemini Live API client
//!
//! Duplex WebSocket session: the write half is owned by a [`LiveSink`], the
//! read half is drained by a background task that turns server messages into
//! [`LiveEvent`]s on an mpsc channel.

use super::{
    speech_config, Content, FunctionCall, FunctionResponse, GeminiError, GenerationConfig, Part,
    ResponseModality, Result,
};

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const LIVE_ENDPOINT: &str = "wss://generativelanguage.googleapis.com/ws/google.ai.generativelanguage.v1beta.GenerativeService.BidiGenerateContent";

/// Session setup message.
#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct BidiGenerateContentSetup {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generation_config: Option<GenerationConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tools: Option<Value>,
}

/// A chunk of realtime media input
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MediaChunk {
    pub mime_type: String,
    pub data: String,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RealtimeInput {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub media_chunks: Vec<MediaChunk>,
}

#[derive(Debug, Serialize, Deserialize, Default, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToolResponse {
    pub function_responses: Vec<FunctionResponse>,
}

/// Message sent from client to server.
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(rename_all = "camelCase")]
pub enum ClientMessage {
    Setup(BidiGenerateContentSetup),
    RealtimeInput(RealtimeInput),
    ToolResponse(ToolResponse),
}

/// Server -> client messages
#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ServerMessage {
    SetupComplete {
        #[serde(rename = "setupComplete")]
        setup_complete: Value,
    },
    ServerContent {
        #[serde(rename = "serverContent")]
        server_content: Value,
    },
    ToolCall {
        #[serde(rename = "toolCall")]
        tool_call: Value,
    },
    ToolCallCancellation {
        #[serde(rename = "toolCallCancellation")]
        tool_call_cancellation: Value,
    },
    GoAway {
        #[serde(rename = "goAway")]
        go_away: Value,
    },
}

/// Event decoded from the live stream
#[derive(Debug, Clone, PartialEq)]
pub enum LiveEvent {
    SetupComplete,
    /// Base64 PCM16 audio at the output sample rate
    Audio(String),
    Text(String),
    ToolCall(Vec<FunctionCall>),
    ToolCallCancellation(Vec<String>),
    Interrupted,
    TurnComplete,
    /// Server will disconnect soon
    GoAway,
}

/// Parameters of a live session
#[derive(Debug, Clone)]
pub struct LiveSetup {
    pub model: String,
    pub system_instruction: String,
    /// `[{"functionDeclarations": [...]}]`
    pub tools: Value,
    pub voice: String,
    pub response_modality: ResponseModality,
}

impl LiveSetup {
    fn into_message(self) -> ClientMessage {
        let model = if self.model.starts_with("models/") {
            self.model
        } else {
            format!("models/{}", self.model)
        };

        ClientMessage::Setup(BidiGenerateContentSetup {
            model,
            generation_config: Some(GenerationConfig {
                response_modalities: vec![self.response_modality.as_str().to_string()],
                speech_config: Some(speech_config(&self.voice)),
                ..Default::default()
            }),
            system_instruction: Some(Content {
                role: None,
                parts: vec![Part::text(self.system_instruction)],
            }),
            tools: Some(self.tools),
        })
    }
}

/// Write half of a live session
#[async_trait]
pub trait LiveSink: Send {
    /// Send one base64 PCM16 chunk as realtime input
    async fn send_audio(&mut self, data: String, mime_type: &str) -> Result<()>;

    async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// An established live session
pub struct LiveConnection {
    pub sink: Box<dyn LiveSink>,
    pub events: mpsc::Receiver<Result<LiveEvent>>,
}

#[async_trait]
pub trait LiveConnector: Send + Sync {
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection>;
}

/// Connects to the Gemini Live WebSocket endpoint
#[derive(Debug, Clone)]
pub struct GeminiLiveConnector {
    url: String,
    setup_timeout: Duration,
}

impl GeminiLiveConnector {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            setup_timeout: Duration::from_secs(10),
        }
    }

    /// Connector for the public endpoint
    pub fn from_api_key(api_key: &str) -> Self {
        Self::new(format!("{}?key={}", LIVE_ENDPOINT, api_key))
    }

    pub fn with_setup_timeout(mut self, timeout: Duration) -> Self {
        self.setup_timeout = timeout;
        self
    }
}

#[async_trait]
impl LiveConnector for GeminiLiveConnector {
    async fn connect(&self, setup: LiveSetup) -> Result<LiveConnection> {
        info!("Connecting to Gemini Live API");
        let (ws_stream, resp) = connect_async(self.url.as_str()).await?;
        debug!("WebSocket connection response: {:?}", resp.status());

        // Split the WebSocket into separate sink (write) and stream (read) halves
        let (sink, stream) = ws_stream.split();
        let (event_tx, mut event_rx) = mpsc::channel::<Result<LiveEvent>>(100);
        let reader = tokio::spawn(read_loop(stream, event_tx));

        let mut live_sink = GeminiLiveSink {
            writer: sink,
            reader: Some(reader),
        };

        info!("Sending setup message with model: {}", setup.model);
        if let Err(e) = live_sink.send(&setup.into_message()).await {
            let _ = live_sink.close().await;
            return Err(e);
        }

        let waited = tokio::time::timeout(self.setup_timeout, wait_for_setup_complete(&mut event_rx)).await;
        match waited {
            Ok(Ok(())) => {
                info!("Gemini live session setup complete");
                Ok(LiveConnection {
                    sink: Box::new(live_sink),
                    events: event_rx,
                })
            }
            Ok(Err(e)) => {
                error!("Failed to complete Gemini session setup: {}", e);
                let _ = live_sink.close().await;
                Err(e)
            }
            Err(_) => {
                error!("Timeout waiting for setup complete message");
                let _ = live_sink.close().await;
                Err(GeminiError::Timeout)
            }
        }
    }
}

/// Wait for the setup complete message, skipping anything else.
async fn wait_for_setup_complete(rx: &mut mpsc::Receiver<Result<LiveEvent>>) -> Result<()> {
    while let Some(event) = rx.recv().await {
        match event? {
            LiveEvent::SetupComplete => return Ok(()),
            other => debug!("Ignoring {:?} before setup complete", other),
        }
    }
    Err(GeminiError::SetupNotComplete)
}

struct GeminiLiveSink {
    writer: SplitSink<WsStream, Message>,
    reader: Option<JoinHandle<()>>,
}

impl GeminiLiveSink {
    async fn send(&mut self, msg: &ClientMessage) -> Result<()> {
        let json = serde_json::to_string(msg)?;
        debug!("Sending message ({} bytes)", json.len());
        self.writer.send(Message::text(json)).await?;
        Ok(())
    }
}

#[async_trait]
impl LiveSink for GeminiLiveSink {
    async fn send_audio(&mut self, data: String, mime_type: &str) -> Result<()> {
        let msg = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: mime_type.to_string(),
                data,
            }],
        });
        self.send(&msg).await
    }

    async fn send_tool_response(&mut self, responses: Vec<FunctionResponse>) -> Result<()> {
        info!("Sending {} tool response(s)", responses.len());
        let msg = ClientMessage::ToolResponse(ToolResponse {
            function_responses: responses,
        });
        self.send(&msg).await
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        // Closing the sink sends the close frame
        self.writer.close().await?;
        Ok(())
    }
}

impl Drop for GeminiLiveSink {
    fn drop(&mut self) {
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
    }
}

/// Drain the read half until it closes or the receiver goes away.
async fn read_loop(mut stream: SplitStream<WsStream>, tx: mpsc::Sender<Result<LiveEvent>>) {
    info!("Inbound message task started");

    while let Some(message_result) = stream.next().await {
        let text = match message_result {
            Ok(Message::Text(text)) => text.as_str().to_string(),
            // Binary frames carry the same JSON payloads
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes.to_vec()) {
                Ok(text) => text,
                Err(_) => {
                    debug!("Received non-UTF-8 binary message ({} bytes)", bytes.len());
                    continue;
                }
            },
            Ok(Message::Close(frame)) => {
                info!("WebSocket closed: {:?}", frame);
                let _ = tx.send(Err(GeminiError::ConnectionClosed)).await;
                return;
            }
            Ok(_) => continue,
            Err(e) => {
                error!("WebSocket error: {:?}", e);
                let _ = tx.send(Err(GeminiError::WebSocket(e))).await;
                return;
            }
        };

        match parse_server_message(&text) {
            Ok(events) => {
                for event in events {
                    if tx.send(Ok(event)).await.is_err() {
                        debug!("Event receiver dropped, stopping reader");
                        return;
                    }
                }
            }
            Err(e) => {
                warn!("Failed to parse server message: {}", e);
                debug!("Raw message: {}", text);
            }
        }
    }

    info!("Inbound message task terminated");
    let _ = tx.send(Err(GeminiError::ConnectionClosed)).await;
}

/// Decode one server JSON message into zero or more events.
pub fn parse_server_message(text: &str) -> Result<Vec<LiveEvent>> {
    let message: ServerMessage = serde_json::from_str(text)?;
    let events = match message {
        ServerMessage::SetupComplete { .. } => vec![LiveEvent::SetupComplete],
        ServerMessage::ServerContent { server_content } => parse_server_content(&server_content),
        ServerMessage::ToolCall { tool_call } => {
            let calls: Vec<FunctionCall> = match tool_call.get("functionCalls") {
                Some(calls) => serde_json::from_value(calls.clone())?,
                None => Vec::new(),
            };
            vec![LiveEvent::ToolCall(calls)]
        }
        ServerMessage::ToolCallCancellation {
            tool_call_cancellation,
        } => {
            let ids = tool_call_cancellation
                .get("ids")
                .and_then(Value::as_array)
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| id.as_str().map(str::to_string))
                        .collect()
                })
                .unwrap_or_default();
            vec![LiveEvent::ToolCallCancellation(ids)]
        }
        ServerMessage::GoAway { .. } => vec![LiveEvent::GoAway],
    };
    Ok(events)
}

fn parse_server_content(content: &Value) -> Vec<LiveEvent> {
    let mut events = Vec::new();

    if content.get("interrupted").and_then(Value::as_bool) == Some(true) {
        events.push(LiveEvent::Interrupted);
    }

    if let Some(parts) = content
        .get("modelTurn")
        .and_then(|t| t.get("parts"))
        .and_then(Value::as_array)
    {
        for part in parts {
            if let Some(data) = part
                .get("inlineData")
                .and_then(|d| d.get("data"))
                .and_then(Value::as_str)
            {
                if !data.is_empty() {
                    events.push(LiveEvent::Audio(data.to_string()));
                }
            } else if let Some(text) = part.get("text").and_then(Value::as_str) {
                if !text.is_empty() {
                    events.push(LiveEvent::Text(text.to_string()));
                }
            }
        }
    }

    if content.get("turnComplete").and_then(Value::as_bool) == Some(true) {
        events.push(LiveEvent::TurnComplete);
    }

    events
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::ToolRegistry;

    #[test]
    fn test_setup_message_serialization() {
        let setup = LiveSetup {
            model: "gemini-live-test".to_string(),
            system_instruction: "Current page: /kanban".to_string(),
            tools: ToolRegistry::crm().tools_json(),
            voice: "Kore".to_string(),
            response_modality: ResponseModality::Audio,
        };

        let json = serde_json::to_value(setup.into_message()).unwrap();
        let setup = &json["setup"];
        assert_eq!(setup["model"], "models/gemini-live-test");
        assert_eq!(setup["generationConfig"]["responseModalities"][0], "AUDIO");
        assert_eq!(
            setup["generationConfig"]["speechConfig"]["voiceConfig"]["prebuiltVoiceConfig"]["voiceName"],
            "Kore"
        );
        assert_eq!(setup["systemInstruction"]["parts"][0]["text"], "Current page: /kanban");
        assert_eq!(setup["tools"][0]["functionDeclarations"][1]["name"], "searchCompanies");
    }

    #[test]
    fn test_client_message_shapes() {
        let audio = ClientMessage::RealtimeInput(RealtimeInput {
            media_chunks: vec![MediaChunk {
                mime_type: "audio/pcm;rate=16000".to_string(),
                data: "AAA=".to_string(),
            }],
        });
        let json = serde_json::to_value(&audio).unwrap();
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["mimeType"], "audio/pcm;rate=16000");
        assert_eq!(json["realtimeInput"]["mediaChunks"][0]["data"], "AAA=");

        let response = ClientMessage::ToolResponse(ToolResponse {
            function_responses: vec![FunctionResponse {
                id: Some("fc-1".to_string()),
                name: "navigateTo".to_string(),
                response: serde_json::json!({"result": {"success": true}}),
            }],
        });
        let json = serde_json::to_value(&response).unwrap();
        assert_eq!(json["toolResponse"]["functionResponses"][0]["id"], "fc-1");
    }

    #[test]
    fn test_parse_setup_and_tool_call() {
        let events = parse_server_message(r#"{"setupComplete": {}}"#).unwrap();
        assert_eq!(events, vec![LiveEvent::SetupComplete]);

        let msg = serde_json::json!({
            "toolCall": {"functionCalls": [
                {"id": "1", "name": "navigateTo", "args": {"page": "inbox"}},
                {"id": "2", "name": "searchCompanies", "args": {"query": "nova"}}
            ]}
        })
        .to_string();
        match parse_server_message(&msg).unwrap().as_slice() {
            [LiveEvent::ToolCall(calls)] => {
                assert_eq!(calls.len(), 2);
                assert_eq!(calls[0].id.as_deref(), Some("1"));
                assert_eq!(calls[1].args["query"], "nova");
            }
            other => panic!("Unexpected events: {:?}", other),
        }

        let msg = r#"{"toolCallCancellation": {"ids": ["2"]}}"#;
        assert_eq!(
            parse_server_message(msg).unwrap(),
            vec![LiveEvent::ToolCallCancellation(vec!["2".to_string()])]
        );
    }

    #[test]
    fn test_parse_server_content_variants() {
        let msg = serde_json::json!({
            "serverContent": {
                "modelTurn": {"parts": [
                    {"inlineData": {"mimeType": "audio/pcm;rate=24000", "data": "AQID"}},
                    {"text": "hi"},
                    {"inlineData": {"data": ""}}
                ]},
                "turnComplete": true
            }
        })
        .to_string();
        assert_eq!(
            parse_server_message(&msg).unwrap(),
            vec![
                LiveEvent::Audio("AQID".to_string()),
                LiveEvent::Text("hi".to_string()),
                LiveEvent::TurnComplete,
            ]
        );

        let msg = r#"{"serverContent": {"interrupted": true}}"#;
        assert_eq!(parse_server_message(msg).unwrap(), vec![LiveEvent::Interrupted]);

        let msg = r#"{"goAway": {"timeLeft": "10s"}}"#;
        assert_eq!(parse_server_message(msg).unwrap(), vec![LiveEvent::GoAway]);
    }

    #[test]
    fn test_parse_rejects_unknown_message() {
        assert!(parse_server_message(r#"{"somethingElse": 1}"#).is_err());
        assert!(parse_server_message("not json").is_err());
    }
}
