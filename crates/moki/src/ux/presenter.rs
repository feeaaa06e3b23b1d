use console::{Style, StyledObject};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChatMessageType {
    Prompt,
    Assistant,
    Footer,
    Error,
}

pub fn style_chat_text(text: &str, style: ChatMessageType) -> StyledObject<&str> {
    let style_obj = match style {
        ChatMessageType::Prompt => Style::new().blue().bold(),
        ChatMessageType::Assistant => Style::new().green().bold(),
        ChatMessageType::Footer => Style::new().white().dim(),
        ChatMessageType::Error => Style::new().red().bold(),
    };
    style_obj.apply_to(text)
}
