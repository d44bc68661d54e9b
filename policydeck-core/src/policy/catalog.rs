//! The fixed catalog of tools shown in the console, grouped into sections.

use serde::{Deserialize, Serialize};

/// How much damage a tool can do if misused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RiskLevel::Low => write!(f, "low"),
            RiskLevel::Medium => write!(f, "medium"),
            RiskLevel::High => write!(f, "high"),
        }
    }
}

/// A single tool in the catalog.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogTool {
    pub id: &'static str,
    pub description: &'static str,
    pub risk: RiskLevel,
}

/// A named group of tools that the console toggles together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogSection {
    pub id: &'static str,
    pub label: &'static str,
    pub tools: &'static [CatalogTool],
}

const fn tool(id: &'static str, description: &'static str, risk: RiskLevel) -> CatalogTool {
    CatalogTool {
        id,
        description,
        risk,
    }
}

/// Every section in display order.
pub const SECTIONS: &[CatalogSection] = &[
    CatalogSection {
        id: "files",
        label: "Files",
        tools: &[
            tool("read", "Read file contents", RiskLevel::Low),
            tool("write", "Create or overwrite files", RiskLevel::Medium),
            tool("edit", "Make precise edits to files", RiskLevel::Medium),
        ],
    },
    CatalogSection {
        id: "runtime",
        label: "Runtime",
        tools: &[
            tool("exec", "Execute shell commands", RiskLevel::High),
            tool("process", "Manage background processes", RiskLevel::High),
        ],
    },
    CatalogSection {
        id: "web",
        label: "Web",
        tools: &[
            tool("web_search", "Search the web", RiskLevel::Low),
            tool("web_fetch", "Fetch content from URLs", RiskLevel::Low),
        ],
    },
    CatalogSection {
        id: "browser",
        label: "Browser",
        tools: &[tool("browser", "Control a web browser", RiskLevel::Medium)],
    },
    CatalogSection {
        id: "sessions",
        label: "Sessions",
        tools: &[
            tool("sessions_list", "List active sessions", RiskLevel::Low),
            tool("sessions_history", "View session history", RiskLevel::Low),
            tool("sessions_spawn", "Spawn sub-agent sessions", RiskLevel::Medium),
        ],
    },
    CatalogSection {
        id: "messaging",
        label: "Messaging",
        tools: &[
            tool("message", "Send messages via channels", RiskLevel::Medium),
            tool("tts", "Convert text to speech", RiskLevel::Low),
        ],
    },
    CatalogSection {
        id: "nodes",
        label: "Nodes",
        tools: &[tool("nodes", "Control paired devices", RiskLevel::Medium)],
    },
    CatalogSection {
        id: "media",
        label: "Media",
        tools: &[tool("image", "Analyze images with AI", RiskLevel::Low)],
    },
    CatalogSection {
        id: "automation",
        label: "Automation",
        tools: &[
            tool("cron", "Schedule recurring tasks", RiskLevel::Medium),
            tool("canvas", "Present UI canvases", RiskLevel::Medium),
        ],
    },
];

/// Iterate over every catalog tool in display order.
pub fn all_tools() -> impl Iterator<Item = &'static CatalogTool> {
    SECTIONS.iter().flat_map(|section| section.tools.iter())
}

/// Every catalog tool id in display order.
pub fn all_tool_ids() -> Vec<&'static str> {
    all_tools().map(|t| t.id).collect()
}

/// Look up a section by id.
pub fn section(id: &str) -> Option<&'static CatalogSection> {
    let id = id.trim();
    SECTIONS.iter().find(|s| s.id.eq_ignore_ascii_case(id))
}

/// Look up a tool by id.
pub fn tool_by_id(id: &str) -> Option<&'static CatalogTool> {
    let id = super::matcher::normalize_tool_name(id);
    all_tools().find(|t| t.id == id)
}
