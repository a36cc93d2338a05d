use std::path::{Path, PathBuf};

use tracing::{debug, warn};

/// Per-template size cap (characters).
const MAX_TEMPLATE_CHARS: usize = 20_000;

/// Loads prompt templates laid out as `<dir>/<agent>/<name>.md`.
#[derive(Debug, Clone, Default)]
pub struct PromptLoader {
    dir: Option<PathBuf>,
}

impl PromptLoader {
    pub fn new(dir: Option<impl Into<PathBuf>>) -> Self {
        Self {
            dir: dir.map(Into::into),
        }
    }

    /// Template text for `agent`/`name`, or `None` when no directory is set
    /// or the file is missing or empty.
    pub fn load(&self, agent: &str, name: &str) -> Option<String> {
        let dir = self.dir.as_ref()?;
        let path = dir.join(agent).join(format!("{name}.md"));
        read_and_truncate(&path)
    }

    /// Like [`load`](Self::load), falling back to a built-in template.
    pub fn load_or(&self, agent: &str, name: &str, fallback: &str) -> String {
        self.load(agent, name)
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// Replace every `{key}` in `template` with its value. Unknown placeholders
/// are left as they are.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    vars.iter().fold(template.to_string(), |acc, (key, value)| {
        acc.replace(&format!("{{{key}}}"), value)
    })
}

fn read_and_truncate(path: &Path) -> Option<String> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) => {
            debug!(path = %path.display(), "prompt template not loaded: {e}");
            return None;
        }
    };
    let content = content.trim();
    if content.is_empty() {
        return None;
    }
    if content.chars().count() > MAX_TEMPLATE_CHARS {
        warn!(path = %path.display(), max = MAX_TEMPLATE_CHARS, "prompt template truncated");
        return Some(content.chars().take(MAX_TEMPLATE_CHARS).collect());
    }
    Some(content.to_string())
}
