//! Page routing used by the `navigateTo` tool.

use crate::events::{AppEvent, EventHub};
use std::sync::{Arc, Mutex};
use tracing::info;

/// Pages the assistant is allowed to open
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Page {
    Dashboard,
    Kanban,
    Directory,
    PeopleDirectory,
    Inbox,
    Toolbox,
    Settings,
    CompanyDetail,
}

impl Page {
    pub const ALL: [Page; 8] = [
        Page::Dashboard,
        Page::Kanban,
        Page::Directory,
        Page::PeopleDirectory,
        Page::Inbox,
        Page::Toolbox,
        Page::Settings,
        Page::CompanyDetail,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dashboard => "dashboard",
            Self::Kanban => "kanban",
            Self::Directory => "directory",
            Self::PeopleDirectory => "people_directory",
            Self::Inbox => "inbox",
            Self::Toolbox => "toolbox",
            Self::Settings => "settings",
            Self::CompanyDetail => "company_detail",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }

    /// Route for this page. `company_detail` needs an id and has no route
    /// without one.
    pub fn path(&self, id: Option<&str>) -> Option<String> {
        let path = match self {
            Self::Dashboard => "/",
            Self::Kanban => "/kanban",
            Self::Directory => "/directory",
            Self::PeopleDirectory => "/annuaire",
            Self::Inbox => "/inbox",
            Self::Toolbox => "/toolbox",
            Self::Settings => "/settings",
            Self::CompanyDetail => {
                let id = id.filter(|id| !id.is_empty())?;
                return Some(format!("/company/{}", id));
            }
        };
        Some(path.to_string())
    }
}

/// Something that can move the application to another route
pub trait Navigator: Send + Sync {
    fn navigate(&self, path: &str);
    fn current_path(&self) -> String;
}

/// In-process navigator tracking the current location
#[derive(Clone)]
pub struct Router {
    location: Arc<Mutex<String>>,
    hub: EventHub,
}

impl Router {
    pub fn new(hub: EventHub) -> Self {
        Self {
            location: Arc::new(Mutex::new("/".to_string())),
            hub,
        }
    }
}

impl Navigator for Router {
    fn navigate(&self, path: &str) {
        if let Ok(mut location) = self.location.lock() {
            *location = path.to_string();
        }
        info!("Navigated to {}", path);
        self.hub.publish(AppEvent::Navigated {
            path: path.to_string(),
        });
    }

    fn current_path(&self) -> String {
        self.location
            .lock()
            .map(|l| l.clone())
            .unwrap_or_else(|_| "/".to_string())
    }
}
