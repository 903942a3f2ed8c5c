use serde::{Deserialize, Serialize};
use std::path::Path;

/// Source language, resolved once from a file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Language {
    JavaScript,
    TypeScript,
    Python,
    Rust,
    Go,
    Java,
    Kotlin,
    Swift,
    CFamily,
    Php,
    Ruby,
    Vue,
    Svelte,
    Html,
    Css,
    Json,
    Toml,
    Yaml,
    Sql,
    Markdown,
    Unknown,
}

impl Language {
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_ascii_lowercase().as_str() {
            "js" | "jsx" | "mjs" | "cjs" => Language::JavaScript,
            "ts" | "tsx" | "mts" | "cts" => Language::TypeScript,
            "py" | "pyw" => Language::Python,
            "rs" => Language::Rust,
            "go" => Language::Go,
            "java" => Language::Java,
            "kt" | "kts" => Language::Kotlin,
            "swift" => Language::Swift,
            "c" | "h" | "cc" | "cpp" | "hpp" | "cs" => Language::CFamily,
            "php" => Language::Php,
            "rb" => Language::Ruby,
            "vue" => Language::Vue,
            "svelte" => Language::Svelte,
            "html" | "htm" => Language::Html,
            "css" | "scss" | "sass" | "less" => Language::Css,
            "json" => Language::Json,
            "toml" => Language::Toml,
            "yaml" | "yml" => Language::Yaml,
            "sql" => Language::Sql,
            "md" | "markdown" => Language::Markdown,
            _ => Language::Unknown,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Self {
        path.as_ref()
            .extension()
            .and_then(|e| e.to_str())
            .map(Language::from_extension)
            .unwrap_or(Language::Unknown)
    }

    /// JavaScript-family sources, including single-file components.
    pub fn is_javascript_like(self) -> bool {
        matches!(
            self,
            Language::JavaScript | Language::TypeScript | Language::Vue | Language::Svelte
        )
    }
}
