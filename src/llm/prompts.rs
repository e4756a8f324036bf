//! Prompt templates, message assembly, and output sanitization.

use regex::Regex;
use std::sync::LazyLock;

use crate::llm::models::ChatMessage;

/// System preamble asking the model to format replies as Markdown.
pub const MARKDOWN_SYSTEM_PROMPT: &str = "\
Format your response using proper Markdown syntax:

- Use **bold** for emphasis and important terms, *italic* for definitions
- Use `inline code` for variables, functions, and file names
- Use fenced code blocks with a language tag for multi-line code
- Use # ## ### headers to create a clear hierarchy
- Use - for unordered lists and 1. 2. 3. for ordered lists
- Use | Column | tables with a |---| separator row for tabular data
- Use > for quotes and important notes
- Leave blank lines between different elements
";

/// Template for the retrieval-augmented path. The model must answer only
/// from the supplied context and defer to a human agent otherwise.
pub const RAG_TEMPLATE: &str = "\
You are a customer support assistant. Answer the user's question using only \
the context provided below. If the context does not contain the answer, say \
that you do not know and offer to hand the conversation over to a human \
agent. Do not cite or mention sources or URLs.

Context:
{context}

Previous conversation:
{history}

Question:
{query}
";

/// Template for the zero-shot fallback path, used when retrieval produced no
/// relevant context.
pub const ZERO_SHOT_TEMPLATE: &str = "\
You are an intelligent assistant. Answer the following question based on \
your knowledge:
{query}

Previous conversation:
{history}

Please give a clear and complete answer without citing or mentioning sources \
or URLs.
";

/// Fill a template's `{context}`, `{history}` and `{query}` slots.
pub fn render_template(template: &str, context: &str, history: &str, query: &str) -> String {
    template
        .replace("{context}", context)
        .replace("{history}", history)
        .replace("{query}", query)
}

/// Merge the system prompt, prior messages, and the user prompt into one
/// ordered message list.
///
/// When `markdown_format` is set the Markdown preamble is prepended to the
/// system content; a caller-supplied system prompt is appended after it.
/// Prior messages keep their conversation order; the user prompt goes last.
pub fn merge_prompt_messages(
    user_prompt: &str,
    system_prompt: Option<&str>,
    prior: Option<&[ChatMessage]>,
    markdown_format: bool,
) -> Vec<ChatMessage> {
    let mut messages = Vec::new();

    let mut system_content = String::new();
    if markdown_format {
        system_content.push_str(MARKDOWN_SYSTEM_PROMPT);
    }
    if let Some(prompt) = system_prompt {
        system_content.push_str(prompt);
    }
    let system_content = system_content.trim();
    if !system_content.is_empty() {
        messages.push(ChatMessage::system(system_content));
    }

    if let Some(prior) = prior {
        messages.extend(prior.iter().cloned());
    }
    messages.push(ChatMessage::user(user_prompt));

    messages
}

/// Render prior conversation turns into a plain-text history block for the
/// RAG and zero-shot templates.
pub fn format_history(messages: &[ChatMessage]) -> String {
    messages
        .iter()
        .map(|m| match m.role {
            crate::llm::models::MessageRole::Assistant => format!("AI: {}", m.content),
            _ => format!("Human: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n")
}

static CITATION_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[\d+\]|\(source.*?\)").expect("citation marker pattern is valid")
});

/// Strip citation markers (`[3]`) and parenthetical source markers
/// (`(source ...)`) from a final reply, then trim whitespace.
pub fn sanitize_output(text: &str) -> String {
    CITATION_MARKERS.replace_all(text, "").trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::models::MessageRole;

    #[test]
    fn test_sanitize_removes_citation_and_source() {
        assert_eq!(sanitize_output("Answer[1] (source: foo.com)"), "Answer");
    }

    #[test]
    fn test_sanitize_multiple_markers() {
        assert_eq!(
            sanitize_output("First[1] then[23] more (source a) and (source b)."),
            "First then more  and ."
        );
    }

    #[test]
    fn test_sanitize_plain_text_untouched() {
        assert_eq!(sanitize_output("  Plain answer.  "), "Plain answer.");
    }

    #[test]
    fn test_sanitize_keeps_non_numeric_brackets() {
        assert_eq!(sanitize_output("[note] stays"), "[note] stays");
    }

    #[test]
    fn test_render_template_fills_slots() {
        let rendered = render_template(RAG_TEMPLATE, "CTX", "HIST", "Q?");
        assert!(rendered.contains("CTX"));
        assert!(rendered.contains("HIST"));
        assert!(rendered.contains("Q?"));
        assert!(!rendered.contains("{context}"));
    }

    #[test]
    fn test_merge_order_is_preserved() {
        let prior = vec![
            ChatMessage::user("first"),
            ChatMessage::assistant("second"),
        ];
        let merged = merge_prompt_messages("third", Some("be brief"), Some(&prior), false);

        assert_eq!(merged.len(), 4);
        assert_eq!(merged[0].role, MessageRole::System);
        assert_eq!(merged[0].content, "be brief");
        assert_eq!(merged[1].content, "first");
        assert_eq!(merged[2].content, "second");
        assert_eq!(merged[3].role, MessageRole::User);
        assert_eq!(merged[3].content, "third");
    }

    #[test]
    fn test_merge_without_system_content() {
        let merged = merge_prompt_messages("hi", None, None, false);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].role, MessageRole::User);
    }

    #[test]
    fn test_merge_with_markdown_preamble() {
        let merged = merge_prompt_messages("hi", Some("extra"), None, true);
        assert_eq!(merged.len(), 2);
        assert!(merged[0].content.starts_with("Format your response"));
        assert!(merged[0].content.ends_with("extra"));
    }

    #[test]
    fn test_format_history() {
        let messages = vec![
            ChatMessage::user("question"),
            ChatMessage::assistant("answer"),
        ];
        assert_eq!(format_history(&messages), "Human: question\nAI: answer");
    }
}
