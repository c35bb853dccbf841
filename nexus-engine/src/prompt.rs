//! Prompt assembly for chat-style and completion-style models.
//!
//! An [`OptimizedContext`] plus a query (and optional conversation history)
//! renders into a model-specific payload. Token accounting uses the shared
//! counter plus a fixed per-message overhead for chat payloads.

use crate::optimizer::OptimizedContext;
use crate::tokens::SharedCounter;
use serde::{Deserialize, Serialize};

/// Accounted overhead per chat message.
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

const DEFAULT_SYSTEM_TEMPLATE: &str = "You are a helpful assistant. Answer the user's question using the provided context. \
If the context does not contain the answer, say so rather than guessing.";

const CODE_SYSTEM_TEMPLATE: &str = "You are an expert software engineer. Answer the user's question using the provided \
code context. Reference specific functions and types by name, and prefer minimal, correct examples.";

const COMPLETION_INTRO: &str =
    "Answer the question below using the provided context.";

const DOCUMENTATION_FORMAT_INSTRUCTIONS: &str = "Format the answer as documentation: start with a one-paragraph summary, then detail \
sections with headings, and include usage examples where relevant.";

const CODE_FORMAT_INSTRUCTIONS: &str = "Answer with code first: provide a complete, runnable snippet, then a short explanation \
of the important decisions.";

/// Role of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One chat message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A rendered prompt ready for dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Prompt {
    Completion {
        text: String,
        tokens: usize,
        model_type: String,
    },
    Chat {
        messages: Vec<ChatMessage>,
        tokens: usize,
        model_type: String,
    },
}

impl Prompt {
    pub fn tokens(&self) -> usize {
        match self {
            Self::Completion { tokens, .. } | Self::Chat { tokens, .. } => *tokens,
        }
    }

    pub fn model_type(&self) -> &str {
        match self {
            Self::Completion { model_type, .. } | Self::Chat { model_type, .. } => model_type,
        }
    }

    /// Flattened text length in characters, for rough dispatch accounting.
    pub fn text_len(&self) -> usize {
        match self {
            Self::Completion { text, .. } => text.len(),
            Self::Chat { messages, .. } => messages.iter().map(|m| m.content.len()).sum(),
        }
    }
}

/// Options for one build call.
#[derive(Debug, Clone, Default)]
pub struct PromptOptions {
    /// Prior conversation, rendered between system and final user message
    pub history: Vec<ChatMessage>,
    /// Fixed format instructions appended to the system region
    pub format_instructions: Option<String>,
    /// Override the automatic system template choice
    pub system_template: Option<String>,
}

/// Renders optimized contexts into prompts.
pub struct PromptBuilder {
    counter: SharedCounter,
}

impl PromptBuilder {
    pub fn new(counter: SharedCounter) -> Self {
        Self { counter }
    }

    /// Render a prompt for `model_type`, choosing the chat or completion
    /// shape from the model family.
    pub fn build(
        &self,
        query: &str,
        context: &OptimizedContext,
        model_type: &str,
        opts: &PromptOptions,
    ) -> Prompt {
        if is_chat_model(model_type) {
            self.build_chat(query, context, model_type, opts)
        } else {
            self.build_completion(query, context, model_type, opts)
        }
    }

    /// Render with prior conversation history.
    pub fn build_conversation(
        &self,
        query: &str,
        context: &OptimizedContext,
        model_type: &str,
        history: Vec<ChatMessage>,
    ) -> Prompt {
        let opts = PromptOptions {
            history,
            ..Default::default()
        };
        self.build(query, context, model_type, &opts)
    }

    /// Documentation-focused rendering with fixed format instructions.
    pub fn build_for_documentation(
        &self,
        query: &str,
        context: &OptimizedContext,
        model_type: &str,
    ) -> Prompt {
        let opts = PromptOptions {
            format_instructions: Some(DOCUMENTATION_FORMAT_INSTRUCTIONS.to_string()),
            ..Default::default()
        };
        self.build(query, context, model_type, &opts)
    }

    /// Code-focused rendering with fixed format instructions.
    pub fn build_for_code(
        &self,
        query: &str,
        context: &OptimizedContext,
        model_type: &str,
    ) -> Prompt {
        let opts = PromptOptions {
            format_instructions: Some(CODE_FORMAT_INSTRUCTIONS.to_string()),
            system_template: Some(CODE_SYSTEM_TEMPLATE.to_string()),
            ..Default::default()
        };
        self.build(query, context, model_type, &opts)
    }

    fn build_chat(
        &self,
        query: &str,
        context: &OptimizedContext,
        model_type: &str,
        opts: &PromptOptions,
    ) -> Prompt {
        let template = opts.system_template.clone().unwrap_or_else(|| {
            if context.is_code_majority() {
                CODE_SYSTEM_TEMPLATE.to_string()
            } else {
                DEFAULT_SYSTEM_TEMPLATE.to_string()
            }
        });

        let mut system = template;
        if let Some(instructions) = &opts.format_instructions {
            system.push_str("\n\n");
            system.push_str(instructions);
        }
        let context_block = render_context_block(context);
        if !context_block.is_empty() {
            system.push_str("\n\nCONTEXT:\n");
            system.push_str(&context_block);
        }

        let mut messages = Vec::with_capacity(opts.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(opts.history.iter().cloned());
        messages.push(ChatMessage::user(query));

        let tokens = messages
            .iter()
            .map(|m| self.counter.count(&m.content) + MESSAGE_OVERHEAD_TOKENS)
            .sum();

        Prompt::Chat {
            messages,
            tokens,
            model_type: model_type.to_string(),
        }
    }

    fn build_completion(
        &self,
        query: &str,
        context: &OptimizedContext,
        model_type: &str,
        opts: &PromptOptions,
    ) -> Prompt {
        let mut text = String::from(COMPLETION_INTRO);
        if let Some(instructions) = &opts.format_instructions {
            text.push_str("\n\n");
            text.push_str(instructions);
        }
        let context_block = render_context_block(context);
        if !context_block.is_empty() {
            text.push_str("\n\nCONTEXT:\n");
            text.push_str(&context_block);
        }
        text.push_str(&format!("\n\nQUESTION: {}\n\nANSWER:", query));

        let tokens = self.counter.count(&text);
        Prompt::Completion {
            text,
            tokens,
            model_type: model_type.to_string(),
        }
    }
}

/// `=== title ===` entries separated by blank lines.
fn render_context_block(context: &OptimizedContext) -> String {
    context
        .items
        .iter()
        .map(|item| format!("=== {} ===\n{}", item.title, item.content))
        .collect::<Vec<_>>()
        .join("\n\n")
}

/// Model families that take the chat shape.
fn is_chat_model(model_type: &str) -> bool {
    let lower = model_type.to_lowercase();
    ["gpt-4", "gpt-3.5", "gpt-5", "claude", "chat", "turbo", "gemini"]
        .iter()
        .any(|family| lower.contains(family))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::OptimizedContentItem;
    use crate::tokens::HeuristicCounter;
    use nexus_core::types::{ContentType, Metadata};

    fn item(title: &str, content: &str, content_type: ContentType) -> OptimizedContentItem {
        OptimizedContentItem {
            id: format!("item-{}", title),
            content: content.to_string(),
            title: title.to_string(),
            content_type,
            tokens: content.split_whitespace().count(),
            relevance: 0.8,
            chunk_index: None,
            metadata: Metadata::new(),
        }
    }

    fn context(items: Vec<OptimizedContentItem>) -> OptimizedContext {
        let total: usize = items.iter().map(|i| i.tokens).sum();
        OptimizedContext {
            total_tokens: total,
            remaining_tokens: 0,
            original_content_count: items.len(),
            selected_content_count: items.len(),
            query: "what is this?".to_string(),
            items,
        }
    }

    fn builder() -> PromptBuilder {
        PromptBuilder::new(HeuristicCounter::shared())
    }

    #[test]
    fn test_chat_shape() {
        let ctx = context(vec![item("Doc A", "alpha beta", ContentType::Text)]);
        let prompt = builder().build("what is alpha?", &ctx, "gpt-4", &PromptOptions::default());

        let Prompt::Chat { messages, tokens, .. } = prompt else {
            panic!("expected chat prompt");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].role, Role::System);
        assert!(messages[0].content.contains("CONTEXT:"));
        assert!(messages[0].content.contains("=== Doc A ==="));
        assert_eq!(messages[1].role, Role::User);
        assert_eq!(messages[1].content, "what is alpha?");
        assert!(tokens >= 2 * MESSAGE_OVERHEAD_TOKENS);
    }

    #[test]
    fn test_completion_shape() {
        let ctx = context(vec![item("Doc A", "alpha beta", ContentType::Text)]);
        let prompt = builder().build("what is alpha?", &ctx, "davinci-002", &PromptOptions::default());

        let Prompt::Completion { text, .. } = prompt else {
            panic!("expected completion prompt");
        };
        assert!(text.contains("CONTEXT:"));
        assert!(text.contains("QUESTION: what is alpha?"));
        assert!(text.ends_with("ANSWER:"));
    }

    #[test]
    fn test_code_majority_switches_template() {
        let ctx = context(vec![
            item("lib.rs", "fn main() {}", ContentType::Code),
            item("util.rs", "fn helper() {}", ContentType::Code),
            item("notes", "some prose", ContentType::Text),
        ]);
        let prompt = builder().build("how does main work?", &ctx, "gpt-4", &PromptOptions::default());

        let Prompt::Chat { messages, .. } = prompt else {
            panic!("expected chat prompt");
        };
        assert!(messages[0].content.starts_with("You are an expert software engineer."));
    }

    #[test]
    fn test_token_accounting_matches_counter() {
        let counter = HeuristicCounter::shared();
        let builder = PromptBuilder::new(counter.clone());
        let ctx = context(vec![item("Doc", "one two three", ContentType::Text)]);
        let prompt = builder.build("query", &ctx, "gpt-4", &PromptOptions::default());

        let Prompt::Chat { messages, tokens, .. } = prompt else {
            panic!("expected chat prompt");
        };
        let expected: usize = messages
            .iter()
            .map(|m| counter.count(&m.content) + MESSAGE_OVERHEAD_TOKENS)
            .sum();
        assert_eq!(tokens, expected);
    }

    #[test]
    fn test_conversation_history_between_regions() {
        let ctx = context(vec![item("Doc", "body", ContentType::Text)]);
        let history = vec![
            ChatMessage::user("earlier question"),
            ChatMessage::assistant("earlier answer"),
        ];
        let prompt = builder().build_conversation("follow-up", &ctx, "claude-3", history);

        let Prompt::Chat { messages, .. } = prompt else {
            panic!("expected chat prompt");
        };
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[1].content, "earlier question");
        assert_eq!(messages[2].content, "earlier answer");
        assert_eq!(messages[3].content, "follow-up");
    }

    #[test]
    fn test_documentation_entry_point_injects_instructions() {
        let ctx = context(vec![item("Doc", "body", ContentType::Text)]);
        let prompt = builder().build_for_documentation("explain", &ctx, "gpt-4");

        let Prompt::Chat { messages, .. } = prompt else {
            panic!("expected chat prompt");
        };
        assert!(messages[0].content.contains("Format the answer as documentation"));
    }
}
