//! "While you were away" briefing.
//!
//! Summarizes recent CRM activity into wins, urgent follow-ups and a general
//! picture, either through the text model or, without one, with a simple
//! heuristic. Summaries are cached per activity set for half an hour. The
//! summary can also be read out loud through the speech model.

use crate::audio::{pcm, AudioError};
use crate::crm::{ActivityKind, ActivityRecord, CrmError, CrmService, Importance};
use crate::gemini::{
    speech_config, Content, GeminiError, GenerateRequest, GenerationConfig, GenerativeModel,
    ResponseModality,
};
use crate::retry::{retry_with_backoff, BusyKind, RetryPolicy, Sleeper, TokioSleeper};

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, info, warn};

pub const DEFAULT_SUMMARY_MODEL: &str = "gemini-3-flash-preview";
pub const DEFAULT_TTS_MODEL: &str = "gemini-2.5-flash-preview-tts";
pub const DEFAULT_TTS_VOICE: &str = "Fenrir";

/// Activities used for a context reminder when nothing happened recently
const CONTEXT_ACTIVITIES: usize = 15;
const DEFAULT_WINDOW_DAYS: i64 = 7;

#[derive(Debug, thiserror::Error)]
pub enum BriefingError {
    #[error("CRM error: {0}")]
    Crm(#[from] CrmError),

    #[error("{}", .kind.user_message())]
    Backend {
        kind: BusyKind,
        #[source]
        source: GeminiError,
    },

    #[error("empty AI response")]
    EmptyResponse,

    #[error("malformed briefing: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("no generative model configured")]
    NoModel,

    #[error("no audio in speech response")]
    NoAudio,

    #[error("audio error: {0}")]
    Audio(#[from] AudioError),
}

impl From<GeminiError> for BriefingError {
    fn from(source: GeminiError) -> Self {
        Self::Backend {
            kind: BusyKind::classify(&source.to_string()),
            source,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Briefing {
    #[serde(default)]
    pub wins: Vec<String>,
    #[serde(default)]
    pub urgent: Vec<String>,
    #[serde(default)]
    pub general: Vec<String>,
}

impl Briefing {
    /// Text read out by [`BriefingService::speak`]
    pub fn speech_script(&self, context_mode: bool) -> String {
        let mut script = if context_mode {
            "Context briefing. ".to_string()
        } else {
            "Summary of your absence. ".to_string()
        };
        if !self.wins.is_empty() {
            script.push_str(&format!("Key points: {}. ", self.wins.join(". ")));
        }
        if !self.urgent.is_empty() {
            script.push_str(&format!("To watch: {}. ", self.urgent.join(". ")));
        }
        if !self.general.is_empty() {
            script.push_str(&format!("In short: {}", self.general.join(". ")));
        }
        script
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct BriefingReport {
    pub briefing: Briefing,
    /// Length of the summarized window, in whole days rounded up
    pub days_away: i64,
    /// Nothing new happened; the briefing recaps the latest history instead
    pub context_mode: bool,
}

struct CachedBriefing {
    briefing: Briefing,
    at: DateTime<Utc>,
    activity_hash: String,
}

fn activity_hash(activities: &[ActivityRecord]) -> String {
    activities
        .iter()
        .map(|a| format!("{}{}", a.activity.id, a.activity.date.to_rfc3339()))
        .collect::<Vec<_>>()
        .join("|")
}

/// Briefing built without a model
fn heuristic(activities: &[ActivityRecord]) -> Briefing {
    Briefing {
        wins: activities
            .iter()
            .filter(|a| a.activity.kind == ActivityKind::Meeting)
            .take(2)
            .map(|a| format!("Meeting with {}: {}", a.company_name, a.activity.title))
            .collect(),
        urgent: activities
            .iter()
            .filter(|a| a.company_importance == Importance::High)
            .take(2)
            .map(|a| format!("Follow up on priority account {}", a.company_name))
            .collect(),
        general: activities
            .iter()
            .take(3)
            .map(|a| format!("{} at {}", a.activity.title, a.company_name))
            .collect(),
    }
}

fn response_schema() -> serde_json::Value {
    let list = json!({ "type": "ARRAY", "items": { "type": "STRING" } });
    json!({
        "type": "OBJECT",
        "properties": { "wins": list, "urgent": list, "general": list }
    })
}

fn prompt(activities: &[ActivityRecord], context_mode: bool, days_away: i64) -> String {
    let framing = if context_mode {
        "There is no new activity. Here is the recent history, for a strategic CONTEXT REMINDER.".to_string()
    } else {
        format!("Here is what happened in the CRM over the last {} days.", days_away)
    };
    let data = serde_json::to_string(activities).unwrap_or_default();

    format!(
        "You are an expert CRM assistant. Analyse this REAL DATA from the database to write a briefing.
{framing}

RAW DATA (activities): {data}

STRICT RULES:
1. Only mention facts present in the data. Invent nothing.
2. \"wins\": successes (new meetings, stages reached).
3. \"urgent\": high priority accounts (importance: high) that need a follow-up.
4. \"general\": the general mood of recent exchanges.
5. Answer in structured JSON. Language: French. Be punchy."
    )
}

pub struct BriefingService {
    crm: Arc<dyn CrmService>,
    model: Option<Arc<dyn GenerativeModel>>,
    sleeper: Arc<dyn Sleeper>,
    summary_model: String,
    tts_model: String,
    voice: String,
    summary_policy: RetryPolicy,
    speech_policy: RetryPolicy,
    cache_ttl: ChronoDuration,
    cache: Mutex<Option<CachedBriefing>>,
}

impl BriefingService {
    pub fn new(crm: Arc<dyn CrmService>, model: Option<Arc<dyn GenerativeModel>>) -> Self {
        Self {
            crm,
            model,
            sleeper: Arc::new(TokioSleeper),
            summary_model: DEFAULT_SUMMARY_MODEL.to_string(),
            tts_model: DEFAULT_TTS_MODEL.to_string(),
            voice: DEFAULT_TTS_VOICE.to_string(),
            summary_policy: RetryPolicy::summary(),
            speech_policy: RetryPolicy::speech(),
            cache_ttl: ChronoDuration::minutes(30),
            cache: Mutex::new(None),
        }
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn with_models(mut self, summary: impl Into<String>, tts: impl Into<String>) -> Self {
        self.summary_model = summary.into();
        self.tts_model = tts.into();
        self
    }

    pub fn with_voice(mut self, voice: impl Into<String>) -> Self {
        self.voice = voice.into();
        self
    }

    /// Build the briefing for a user last seen at `last_login`.
    pub async fn generate(
        &self,
        last_login: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<BriefingReport, BriefingError> {
        let mut since = now - ChronoDuration::days(DEFAULT_WINDOW_DAYS);
        if let Some(last_login) = last_login {
            if now - last_login > ChronoDuration::days(1) {
                since = last_login;
            }
        }
        let window = (now - since).num_seconds().unsigned_abs();
        let days_away = window.div_ceil(86_400) as i64;

        let mut activities = self.crm.activities_since(since).await?;
        let context_mode = activities.is_empty();
        if context_mode {
            let mut all: Vec<ActivityRecord> = self
                .crm
                .all_companies()
                .await?
                .into_iter()
                .flat_map(|c| {
                    c.activities.into_iter().map(move |activity| ActivityRecord {
                        activity,
                        company_id: c.id.clone(),
                        company_name: c.name.clone(),
                        company_importance: c.importance,
                    })
                })
                .collect();
            all.sort_by(|a, b| b.activity.date.cmp(&a.activity.date));
            all.truncate(CONTEXT_ACTIVITIES);
            activities = all;
        }
        debug!(
            "Briefing over {} activities (context mode: {})",
            activities.len(),
            context_mode
        );

        let report = |briefing| BriefingReport {
            briefing,
            days_away,
            context_mode,
        };

        if activities.is_empty() {
            return Ok(report(Briefing {
                general: vec!["No activity data found in the CRM.".to_string()],
                ..Default::default()
            }));
        }

        let hash = activity_hash(&activities);
        if let Some(cached) = self.cached(&hash, now) {
            debug!("Briefing served from cache");
            return Ok(report(cached));
        }

        let Some(model) = self.model.clone() else {
            info!("No model configured, using heuristic briefing");
            return Ok(report(heuristic(&activities)));
        };

        let request = GenerateRequest {
            model: self.summary_model.clone(),
            contents: vec![Content::user_text(prompt(&activities, context_mode, days_away))],
            system_instruction: None,
            tools: None,
            generation_config: Some(GenerationConfig {
                response_mime_type: Some("application/json".to_string()),
                response_schema: Some(response_schema()),
                ..Default::default()
            }),
        };
        let response = retry_with_backoff(&self.summary_policy, self.sleeper.as_ref(), || {
            let model = model.clone();
            let request = request.clone();
            async move { model.generate(request).await }
        })
        .await
        .map_err(|e| {
            warn!("Briefing generation failed: {}", e);
            BriefingError::from(e)
        })?;

        let text = response
            .text()
            .filter(|t| !t.trim().is_empty())
            .ok_or(BriefingError::EmptyResponse)?;
        let briefing: Briefing = serde_json::from_str(&text)?;

        if let Ok(mut cache) = self.cache.lock() {
            *cache = Some(CachedBriefing {
                briefing: briefing.clone(),
                at: now,
                activity_hash: hash,
            });
        }
        Ok(report(briefing))
    }

    fn cached(&self, hash: &str, now: DateTime<Utc>) -> Option<Briefing> {
        let cache = self.cache.lock().ok()?;
        cache
            .as_ref()
            .filter(|c| c.activity_hash == hash && now - c.at < self.cache_ttl)
            .map(|c| c.briefing.clone())
    }

    /// Synthesize `script` to 24 kHz mono samples.
    pub async fn speak(&self, script: &str) -> Result<Vec<f32>, BriefingError> {
        let model = self.model.clone().ok_or(BriefingError::NoModel)?;
        let request = GenerateRequest {
            model: self.tts_model.clone(),
            contents: vec![Content::user_text(script)],
            system_instruction: None,
            tools: None,
            generation_config: Some(GenerationConfig {
                response_modalities: vec![ResponseModality::Audio.as_str().to_string()],
                speech_config: Some(speech_config(&self.voice)),
                ..Default::default()
            }),
        };

        let response = retry_with_backoff(&self.speech_policy, self.sleeper.as_ref(), || {
            let model = model.clone();
            let request = request.clone();
            async move { model.generate(request).await }
        })
        .await?;

        let data = response.inline_data().ok_or(BriefingError::NoAudio)?;
        Ok(pcm::decode(data)?)
    }
}
