use tether_core::config::ChannelsConfig;
use tether_engine::FragmentAssembler;

/// Prefix for a turn that ended with an error.
pub const ERROR_PREFIX: &str = "⚠️ Error: ";

pub fn error_reply(message: &str) -> String {
    format!("{ERROR_PREFIX}{message}")
}

/// Turn a finished assembly into reply text.
///
/// Layout: tool summaries, then thinking (as a quote), then the answer
/// text. A turn with an error renders as the error alone.
pub fn render_reply(assembly: &FragmentAssembler, settings: &ChannelsConfig) -> String {
    if let Some(error) = assembly.error() {
        return error_reply(error);
    }

    let mut sections = Vec::new();
    if settings.show_tools {
        let tools = assembly.tool_summaries();
        if !tools.is_empty() {
            sections.push(tools.join("\n"));
        }
    }
    if settings.show_thinking {
        let thinking = assembly.thinking();
        if !thinking.is_empty() {
            let quoted: Vec<String> = thinking.lines().map(|l| format!("> {l}")).collect();
            sections.push(quoted.join("\n"));
        }
    }
    let text = assembly.text();
    if !text.is_empty() {
        sections.push(text);
    }

    if sections.is_empty() {
        "(no response)".to_string()
    } else {
        sections.join("\n\n")
    }
}
