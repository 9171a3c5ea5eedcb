use chrono::Local;

use crate::core::app::ChatEngine;
use crate::core::registry::Session;

pub fn list_sessions(engine: &ChatEngine) {
    if engine.sessions().is_empty() {
        println!("No saved sessions.");
        return;
    }
    let current = engine.current_session_id();
    for (id, session) in engine.sessions() {
        let marker = if current == Some(id.as_str()) { "▶" } else { " " };
        println!(
            "{marker} {}",
            session_line(id, session, engine.model_label(&session.model))
        );
    }
}

pub(crate) fn session_line(id: &str, session: &Session, model_label: &str) -> String {
    let created = session.created_at.with_timezone(&Local).format("%Y-%m-%d %H:%M");
    let preview = session
        .messages
        .iter()
        .find(|m| m.is_user())
        .map(|m| preview(&m.content))
        .unwrap_or_else(|| "(empty)".to_string());
    format!(
        "{id}  {created}  {model_label:<10} {:>3} msgs  {preview}",
        session.messages.len()
    )
}

fn preview(content: &str) -> String {
    let first_line = content.lines().next().unwrap_or_default();
    let mut preview: String = first_line.chars().take(40).collect();
    if first_line.chars().count() > 40 || content.lines().nth(1).is_some() {
        preview.push('…');
    }
    preview
}
