//! Tool execution against the CRM and the router.
//!
//! Every outcome, including backend failures, is turned into a [`ToolResult`]
//! that goes back to the model. Nothing here returns `Err`.

use super::registry::{ToolRegistry, LOG_ACTIVITY, NAVIGATE_TO, SEARCH_COMPANIES};
use crate::crm::{CrmService, NewActivity};
use crate::events::{ActionIcon, ActionNotice, AppEvent, EventHub};
use crate::gemini::{FunctionCall, FunctionResponse};
use crate::navigation::{Navigator, Page};
use crate::transcript::{Message, Transcript};

use futures_util::future::join_all;
use serde::ser::{Serialize, SerializeMap, Serializer};
use serde_json::{json, Map, Value};
use smallvec::SmallVec;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_NOTICE_TTL: Duration = Duration::from_secs(3);

/// Outcome of a tool call, as reported back to the model
#[derive(Debug, Clone, PartialEq)]
pub enum ToolResult {
    /// `{"success": true, ...data}`
    Success(Map<String, Value>),
    /// `{"error": message}`
    Error(String),
}

impl ToolResult {
    pub fn ok() -> Self {
        Self::Success(Map::new())
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|e| json!({ "error": e.to_string() }))
    }
}

impl Serialize for ToolResult {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Success(data) => {
                let mut map = serializer.serialize_map(Some(data.len() + 1))?;
                map.serialize_entry("success", &true)?;
                for (k, v) in data.iter().filter(|(k, _)| k.as_str() != "success") {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
            Self::Error(msg) => {
                let mut map = serializer.serialize_map(Some(1))?;
                map.serialize_entry("error", msg)?;
                map.end()
            }
        }
    }
}

fn str_arg<'a>(args: &'a Value, key: &str) -> &'a str {
    args.get(key).and_then(Value::as_str).unwrap_or_default()
}

/// Runs tool calls and reports the side effects to the rest of the app
#[derive(Clone)]
pub struct ToolExecutor {
    registry: ToolRegistry,
    crm: Arc<dyn CrmService>,
    navigator: Arc<dyn Navigator>,
    hub: EventHub,
    transcript: Transcript,
    notice_ttl: Duration,
    next_notice: Arc<AtomicU64>,
}

impl ToolExecutor {
    pub fn new(
        crm: Arc<dyn CrmService>,
        navigator: Arc<dyn Navigator>,
        hub: EventHub,
        transcript: Transcript,
    ) -> Self {
        Self {
            registry: ToolRegistry::crm(),
            crm,
            navigator,
            hub,
            transcript,
            notice_ttl: DEFAULT_NOTICE_TTL,
            next_notice: Arc::new(AtomicU64::new(1)),
        }
    }

    pub fn with_notice_ttl(mut self, ttl: Duration) -> Self {
        self.notice_ttl = ttl;
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    pub fn navigator(&self) -> &Arc<dyn Navigator> {
        &self.navigator
    }

    pub fn transcript(&self) -> &Transcript {
        &self.transcript
    }

    /// Run one tool call by name.
    pub async fn execute(&self, name: &str, args: &Value) -> ToolResult {
        let missing = self.registry.missing_required(name, args);
        if !missing.is_empty() {
            debug!("{} called without {:?}", name, missing);
        }

        let result = match name {
            NAVIGATE_TO => {
                self.announce("Navigation".to_string(), ActionIcon::MapPin);
                self.navigate(args)
            }
            SEARCH_COMPANIES => {
                let query = str_arg(args, "query");
                self.announce(format!("Search: {}", query), ActionIcon::Search);
                self.search(query).await
            }
            LOG_ACTIVITY => {
                self.announce("Activity logged".to_string(), ActionIcon::Activity);
                self.log_activity(args).await
            }
            other => {
                warn!("Model requested unknown tool {}", other);
                self.announce(format!("Unknown tool: {}", other), ActionIcon::Wrench);
                ToolResult::Error(format!("unknown tool: {}", other))
            }
        };

        self.transcript.push(Message::tool(name, args.clone()));
        result
    }

    /// Run a whole batch concurrently; one response per call, in call order.
    pub async fn execute_batch(&self, calls: &[FunctionCall]) -> SmallVec<[FunctionResponse; 4]> {
        let results = join_all(calls.iter().map(|call| self.execute(&call.name, &call.args))).await;

        calls
            .iter()
            .zip(results)
            .map(|(call, result)| FunctionResponse {
                id: call.id.clone(),
                name: call.name.clone(),
                response: json!({ "result": result.to_value() }),
            })
            .collect()
    }

    fn navigate(&self, args: &Value) -> ToolResult {
        let page = str_arg(args, "page");
        let id = args.get("id").and_then(Value::as_str);

        match Page::parse(page).map(|p| (p, p.path(id))) {
            Some((_, Some(path))) => self.navigator.navigate(&path),
            Some((p, None)) => warn!("{} needs an id, staying put", p.as_str()),
            None => warn!("Unknown page '{}', staying put", page),
        }
        ToolResult::ok()
    }

    async fn search(&self, query: &str) -> ToolResult {
        match self.crm.search_companies(query).await {
            Ok(results) => match serde_json::to_value(results) {
                Ok(Value::Object(data)) => ToolResult::Success(data),
                Ok(_) => ToolResult::ok(),
                Err(e) => ToolResult::Error(e.to_string()),
            },
            Err(e) => {
                warn!("searchCompanies failed: {}", e);
                ToolResult::Error(e.to_string())
            }
        }
    }

    async fn log_activity(&self, args: &Value) -> ToolResult {
        let company_id = str_arg(args, "companyId");
        let activity = NewActivity {
            kind: str_arg(args, "type").to_string(),
            title: str_arg(args, "title").to_string(),
            description: args
                .get("description")
                .and_then(Value::as_str)
                .map(str::to_string),
        };

        match self.crm.add_activity(company_id, activity).await {
            Ok(()) => {
                info!("Logged activity on company {}", company_id);
                ToolResult::ok()
            }
            Err(e) => {
                warn!("logActivity failed: {}", e);
                ToolResult::Error(e.to_string())
            }
        }
    }

    /// Show a transient notice and tell listeners the CRM data may have moved.
    fn announce(&self, label: String, icon: ActionIcon) {
        let id = self.next_notice.fetch_add(1, Ordering::Relaxed);
        self.hub
            .publish(AppEvent::ActionStarted(ActionNotice { id, label, icon }));
        self.hub.publish(AppEvent::CompaniesUpdated);

        let hub = self.hub.clone();
        let ttl = self.notice_ttl;
        tokio::spawn(async move {
            tokio::time::sleep(ttl).await;
            hub.publish(AppEvent::ActionExpired { id });
        });
    }
}
