use super::*;

const TITLE_SYSTEM_PROMPT: &str = "You name software projects. Reply with a short, plain title \
(at most six words) for the app the user describes. No quotes, no punctuation at the end, \
no explanation.";

/// Instructions for the file-editing agent working inside one sandbox.
pub(super) fn system_prompt(sandbox: &SandboxConfig) -> String {
    let root = sandbox.project_root.trim_end_matches('/');
    format!(
        "You are an engineer building a web application inside a running sandbox.\n\
\n\
Environment:\n\
- The project is a Next.js app using the pages router, already scaffolded at {root}.\n\
- A development server is running on port {port} and reloads when files change.\n\
- Tailwind CSS is configured. Do not run commands; you can only work with files.\n\
\n\
Tools:\n\
- createFile(location, content): write a new file.\n\
- updateFile(location, content): replace the full content of an existing file.\n\
- deleteFile(location): remove a file.\n\
- readFile(location): return the content of a file.\n\
\n\
Rules:\n\
- Always pass absolute paths under {root}, for example {root}/pages/index.tsx.\n\
- Write complete files; partial edits are not supported.\n\
- Read a file before updating it when you are unsure of its content.\n\
- Keep the app self-contained; do not add packages that are not installed.\n\
- When the app is done, reply with a short summary of what you built and stop calling tools.",
        port = sandbox.preview_port,
    )
}

/// First user message of a run. Update runs carry the earlier requests so the
/// model edits the existing app instead of starting over.
pub(super) fn task_message(prompt: &str, earlier_requests: &[String]) -> String {
    if earlier_requests.is_empty() {
        return prompt.trim().to_string();
    }
    let mut message = String::from(
        "The app already exists in the sandbox. Earlier requests, oldest first:\n",
    );
    for request in earlier_requests {
        message.push_str("- ");
        message.push_str(&request.replace('\n', " "));
        message.push('\n');
    }
    message.push_str("\nApply this change to the existing app:\n");
    message.push_str(prompt.trim());
    message
}

pub(super) fn title_messages(prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage::system(TITLE_SYSTEM_PROMPT),
        ChatMessage::user(prompt.trim()),
    ]
}

/// Cleans a model-produced title; `None` when nothing usable remains.
pub(super) fn clean_title(raw: &str, max_chars: usize) -> Option<String> {
    let line = raw.lines().map(str::trim).find(|line| !line.is_empty())?;
    let cleaned = line
        .trim_start_matches(|ch: char| ch == '#' || ch.is_whitespace())
        .trim_start_matches("Title:")
        .trim()
        .trim_matches(|ch| matches!(ch, '"' | '\'' | '`' | '*'))
        .trim_end_matches('.')
        .trim();
    if cleaned.is_empty() {
        return None;
    }
    Some(truncate_chars(cleaned, max_chars))
}

pub(super) fn fallback_title(prompt: &str, max_chars: usize) -> String {
    prompt
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .map(|line| truncate_chars(line, max_chars))
        .unwrap_or_else(|| TITLE_FALLBACK.to_string())
}

fn truncate_chars(text: &str, max_chars: usize) -> String {
    let max_chars = max_chars.max(1);
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    text.chars().take(max_chars).collect::<String>().trim_end().to_string()
}
