//! CRM data service seam and an in-memory reference backend.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Mutex;

#[derive(Debug, thiserror::Error)]
pub enum CrmError {
    #[error("company not found: {0}")]
    CompanyNotFound(String),

    #[error("invalid activity: {0}")]
    InvalidActivity(String),

    #[error("backend error: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActivityKind {
    Email,
    Meeting,
    Note,
    Call,
}

impl ActivityKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "email" => Some(Self::Email),
            "meeting" => Some(Self::Meeting),
            "note" => Some(Self::Note),
            "call" => Some(Self::Call),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contact {
    pub id: String,
    pub name: String,
    pub emails: Vec<String>,
    pub role: String,
    #[serde(default)]
    pub is_main_contact: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Activity {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: ActivityKind,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub date: DateTime<Utc>,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Company {
    pub id: String,
    pub name: String,
    pub importance: Importance,
    pub pipeline_stage: String,
    pub contacts: Vec<Contact>,
    pub activities: Vec<Activity>,
}

/// Activity flattened with the company it belongs to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityRecord {
    #[serde(flatten)]
    pub activity: Activity,
    pub company_id: String,
    pub company_name: String,
    pub company_importance: Importance,
}

/// Contact search hit, tagged with its company
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactHit {
    #[serde(flatten)]
    pub contact: Contact,
    pub company_id: String,
    pub company_name: String,
}

/// Compact company entry returned by searches
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompanySummary {
    pub id: String,
    pub name: String,
    pub importance: Importance,
    pub pipeline_stage: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub companies: Vec<CompanySummary>,
    pub contacts: Vec<ContactHit>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewActivity {
    pub kind: String,
    pub title: String,
    pub description: Option<String>,
}

#[async_trait]
pub trait CrmService: Send + Sync {
    async fn search_companies(&self, query: &str) -> Result<SearchResults, CrmError>;

    async fn add_activity(&self, company_id: &str, activity: NewActivity) -> Result<(), CrmError>;

    /// Activities dated at or after `since`, newest first
    async fn activities_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityRecord>, CrmError>;

    async fn all_companies(&self) -> Result<Vec<Company>, CrmError>;
}

/// Process-local CRM store
pub struct InMemoryCrm {
    companies: Mutex<Vec<Company>>,
    user: String,
}

impl InMemoryCrm {
    pub fn new(companies: Vec<Company>) -> Self {
        Self {
            companies: Mutex::new(companies),
            user: "Lexia Copilot".to_string(),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Vec<Company>>, CrmError> {
        self.companies
            .lock()
            .map_err(|_| CrmError::Backend("company store poisoned".to_string()))
    }

    /// Store pre-filled with a few sample accounts
    pub fn seeded() -> Self {
        let at = |s: &str| {
            DateTime::parse_from_rfc3339(s)
                .map(|d| d.with_timezone(&Utc))
                .unwrap_or_default()
        };

        let companies = vec![
            Company {
                id: "1".to_string(),
                name: "TechFlow Solutions".to_string(),
                importance: Importance::High,
                pipeline_stage: "proposal".to_string(),
                contacts: vec![Contact {
                    id: "c1".to_string(),
                    name: "Alice Johnson".to_string(),
                    emails: vec!["alice@techflow.com".to_string()],
                    role: "CTO".to_string(),
                    is_main_contact: true,
                }],
                activities: vec![
                    Activity {
                        id: "a1".to_string(),
                        kind: ActivityKind::Email,
                        title: "Introductory Email".to_string(),
                        description: Some("Sent capabilities deck.".to_string()),
                        date: at("2023-10-20T09:00:00Z"),
                        user: "John Doe".to_string(),
                    },
                    Activity {
                        id: "a2".to_string(),
                        kind: ActivityKind::Meeting,
                        title: "Discovery Call".to_string(),
                        description: Some("Discussed seat requirements and budget.".to_string()),
                        date: at("2023-10-22T14:00:00Z"),
                        user: "John Doe".to_string(),
                    },
                ],
            },
            Company {
                id: "2".to_string(),
                name: "Green Energy Corp".to_string(),
                importance: Importance::Medium,
                pipeline_stage: "exchange".to_string(),
                contacts: vec![Contact {
                    id: "c2".to_string(),
                    name: "Bob Smith".to_string(),
                    emails: vec!["bob@greenenergy.com".to_string()],
                    role: "Procurement".to_string(),
                    is_main_contact: true,
                }],
                activities: vec![Activity {
                    id: "a5".to_string(),
                    kind: ActivityKind::Call,
                    title: "Follow-up call".to_string(),
                    description: None,
                    date: at("2023-10-25T16:30:00Z"),
                    user: "Jane Smith".to_string(),
                }],
            },
            Company {
                id: "3".to_string(),
                name: "Nova Retail".to_string(),
                importance: Importance::Low,
                pipeline_stage: "entry_point".to_string(),
                contacts: Vec::new(),
                activities: Vec::new(),
            },
        ];
        Self::new(companies)
    }
}

#[async_trait]
impl CrmService for InMemoryCrm {
    async fn search_companies(&self, query: &str) -> Result<SearchResults, CrmError> {
        let needle = query.trim().to_lowercase();
        let companies = self.lock()?;
        let mut results = SearchResults::default();

        for company in companies.iter() {
            if company.name.to_lowercase().contains(&needle) {
                results.companies.push(CompanySummary {
                    id: company.id.clone(),
                    name: company.name.clone(),
                    importance: company.importance,
                    pipeline_stage: company.pipeline_stage.clone(),
                });
            }
            for contact in &company.contacts {
                let matches = contact.name.to_lowercase().contains(&needle)
                    || contact
                        .emails
                        .iter()
                        .any(|e| e.to_lowercase().contains(&needle));
                if matches {
                    results.contacts.push(ContactHit {
                        contact: contact.clone(),
                        company_id: company.id.clone(),
                        company_name: company.name.clone(),
                    });
                }
            }
        }

        Ok(results)
    }

    async fn add_activity(&self, company_id: &str, activity: NewActivity) -> Result<(), CrmError> {
        let kind = ActivityKind::parse(&activity.kind)
            .ok_or_else(|| CrmError::InvalidActivity(format!("unknown type '{}'", activity.kind)))?;
        if activity.title.trim().is_empty() {
            return Err(CrmError::InvalidActivity("title is required".to_string()));
        }

        let mut companies = self.lock()?;
        let company = companies
            .iter_mut()
            .find(|c| c.id == company_id)
            .ok_or_else(|| CrmError::CompanyNotFound(company_id.to_string()))?;

        let now = Utc::now();
        company.activities.insert(
            0,
            Activity {
                id: format!("act-{}", now.timestamp_millis()),
                kind,
                title: activity.title,
                description: activity.description,
                date: now,
                user: self.user.clone(),
            },
        );
        Ok(())
    }

    async fn activities_since(&self, since: DateTime<Utc>) -> Result<Vec<ActivityRecord>, CrmError> {
        let companies = self.lock()?;
        let mut records: Vec<ActivityRecord> = companies
            .iter()
            .flat_map(|c| {
                c.activities
                    .iter()
                    .filter(move |a| a.date >= since)
                    .map(move |a| ActivityRecord {
                        activity: a.clone(),
                        company_id: c.id.clone(),
                        company_name: c.name.clone(),
                        company_importance: c.importance,
                    })
            })
            .collect();
        records.sort_by(|a, b| b.activity.date.cmp(&a.activity.date));
        Ok(records)
    }

    async fn all_companies(&self) -> Result<Vec<Company>, CrmError> {
        Ok(self.lock()?.clone())
    }
}
