//! Static catalog of the actions the model may call.

use serde_json::{json, Map, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArgKind {
    String,
    Number,
    Boolean,
    Object,
}

impl ArgKind {
    fn as_str(&self) -> &'static str {
        match self {
            Self::String => "STRING",
            Self::Number => "NUMBER",
            Self::Boolean => "BOOLEAN",
            Self::Object => "OBJECT",
        }
    }
}

/// Schema of a single named argument
#[derive(Debug, Clone, PartialEq)]
pub struct ArgSchema {
    pub name: &'static str,
    pub kind: ArgKind,
    pub required: bool,
    pub enum_values: &'static [&'static str],
}

impl ArgSchema {
    fn string(name: &'static str) -> Self {
        Self {
            name,
            kind: ArgKind::String,
            required: false,
            enum_values: &[],
        }
    }

    fn required(mut self) -> Self {
        self.required = true;
        self
    }

    fn one_of(mut self, values: &'static [&'static str]) -> Self {
        self.enum_values = values;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ToolDeclaration {
    pub name: &'static str,
    pub description: &'static str,
    pub parameters: Vec<ArgSchema>,
}

impl ToolDeclaration {
    /// Render as a Gemini function declaration
    pub fn to_function_declaration(&self) -> Value {
        let mut properties = Map::new();
        for arg in &self.parameters {
            let mut schema = json!({ "type": arg.kind.as_str() });
            if !arg.enum_values.is_empty() {
                schema["enum"] = json!(arg.enum_values);
            }
            properties.insert(arg.name.to_string(), schema);
        }
        let required: Vec<&str> = self
            .parameters
            .iter()
            .filter(|a| a.required)
            .map(|a| a.name)
            .collect();

        json!({
            "name": self.name,
            "description": self.description,
            "parameters": {
                "type": "OBJECT",
                "properties": properties,
                "required": required,
            }
        })
    }
}

pub const NAVIGATE_TO: &str = "navigateTo";
pub const SEARCH_COMPANIES: &str = "searchCompanies";
pub const LOG_ACTIVITY: &str = "logActivity";

const PAGES: &[&str] = &[
    "dashboard",
    "kanban",
    "directory",
    "people_directory",
    "inbox",
    "toolbox",
    "settings",
    "company_detail",
];

const ACTIVITY_TYPES: &[&str] = &["email", "meeting", "note", "call"];

#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDeclaration>,
}

impl ToolRegistry {
    /// The CRM action catalog, in declaration order
    pub fn crm() -> Self {
        let tools = vec![
            ToolDeclaration {
                name: NAVIGATE_TO,
                description: "Navigate to a specific page of the CRM.",
                parameters: vec![
                    ArgSchema::string("page").required().one_of(PAGES),
                    ArgSchema::string("id"),
                ],
            },
            ToolDeclaration {
                name: SEARCH_COMPANIES,
                description: "Search companies by keyword.",
                parameters: vec![ArgSchema::string("query").required()],
            },
            ToolDeclaration {
                name: LOG_ACTIVITY,
                description: "Record a customer activity.",
                parameters: vec![
                    ArgSchema::string("companyId").required(),
                    ArgSchema::string("type").required().one_of(ACTIVITY_TYPES),
                    ArgSchema::string("title").required(),
                    ArgSchema::string("description"),
                ],
            },
        ];
        Self { tools }
    }

    pub fn list(&self) -> &[ToolDeclaration] {
        &self.tools
    }

    pub fn get(&self, name: &str) -> Option<&ToolDeclaration> {
        self.tools.iter().find(|t| t.name == name)
    }

    /// `[{"functionDeclarations": [...]}]`, the shape both Gemini endpoints take
    pub fn tools_json(&self) -> Value {
        let decls: Vec<Value> = self
            .tools
            .iter()
            .map(ToolDeclaration::to_function_declaration)
            .collect();
        json!([{ "functionDeclarations": decls }])
    }

    /// Required argument names absent from `args`. Informational only.
    pub fn missing_required(&self, name: &str, args: &Value) -> Vec<&'static str> {
        let Some(decl) = self.get(name) else {
            return Vec::new();
        };
        decl.parameters
            .iter()
            .filter(|a| a.required && args.get(a.name).map_or(true, Value::is_null))
            .map(|a| a.name)
            .collect()
    }
}
