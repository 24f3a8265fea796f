//! Line-oriented terminal rendering of the chat transcript.

use std::{
    io::{self, IsTerminal, Write},
    sync::atomic::{AtomicBool, Ordering},
};

use client_core::{Content, Message, RenderSurface};
use shared::domain::Role;

const BOLD: (&str, &str) = ("\x1b[1m", "\x1b[22m");
const ITALIC: (&str, &str) = ("\x1b[3m", "\x1b[23m");
const CODE: (&str, &str) = ("\x1b[36m", "\x1b[39m");
const DIM: (&str, &str) = ("\x1b[2m", "\x1b[22m");

pub struct TerminalSurface {
    styled: bool,
    log_expanded: AtomicBool,
}

impl TerminalSurface {
    pub fn new() -> Self {
        Self {
            styled: io::stdout().is_terminal(),
            log_expanded: AtomicBool::new(false),
        }
    }

    fn print_message(&self, message: &Message) {
        let label = match message.role {
            Role::User => "you",
            Role::Assistant => "assistant",
            Role::Error => "error",
        };
        let body = match &message.content {
            Content::Text(text) => text.clone(),
            Content::Markup(markup) => render_markup(markup, self.styled),
        };
        let stamp = message.created_at.format("%H:%M:%S");

        let mut out = io::stdout().lock();
        let _ = writeln!(out, "[{stamp}] {label}> {}", body.replace('\n', "\n    "));
        let _ = out.flush();
    }
}

impl Default for TerminalSurface {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderSurface for TerminalSurface {
    fn append_log_entry(&self, markup: &str) {
        if !self.log_expanded.load(Ordering::SeqCst) {
            return;
        }
        let text = render_markup(markup, false);
        let mut out = io::stdout().lock();
        for line in text.lines().filter(|line| !line.trim().is_empty()) {
            if self.styled {
                let _ = writeln!(out, "  {}| {line}{}", DIM.0, DIM.1);
            } else {
                let _ = writeln!(out, "  | {line}");
            }
        }
        let _ = out.flush();
    }

    // Printed log lines cannot be taken back.
    fn clear_log(&self) {}

    fn append_message(&self, message: &Message) {
        self.print_message(message);
    }

    fn replace_pending(&self, message: &Message) {
        self.print_message(message);
    }

    fn remove_pending(&self) {}

    fn set_loading(&self, loading: bool) {
        if loading {
            let _ = writeln!(io::stderr(), "... waiting for the backend");
        }
    }

    fn set_log_panel_expanded(&self, expanded: bool) {
        self.log_expanded.store(expanded, Ordering::SeqCst);
    }
}

/// Converts the small HTML subset the transcript carries into terminal text.
///
/// Emphasis tags become ANSI styles when `styled`; line breaks and closing
/// block tags become newlines; images become `[image: src]`; any other tag
/// is dropped.
pub fn render_markup(markup: &str, styled: bool) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;

    while let Some(open) = rest.find('<') {
        out.push_str(&decode_entities(&rest[..open]));
        let after = &rest[open + 1..];
        let Some(close) = after.find('>') else {
            out.push_str(&decode_entities(&rest[open..]));
            rest = "";
            break;
        };
        render_tag(&after[..close], styled, &mut out);
        rest = &after[close + 1..];
    }
    out.push_str(&decode_entities(rest));

    out.trim_end_matches('\n').to_string()
}

fn render_tag(tag: &str, styled: bool, out: &mut String) {
    let tag = tag.trim().trim_end_matches('/').trim_end();
    let (closing, tag) = match tag.strip_prefix('/') {
        Some(name) => (true, name.trim_start()),
        None => (false, tag),
    };
    let name = tag
        .split(|c: char| c.is_whitespace())
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();

    let style = match name.as_str() {
        "strong" | "b" => Some(BOLD),
        "em" | "i" => Some(ITALIC),
        "code" => Some(CODE),
        _ => None,
    };
    if let Some((on, off)) = style {
        if styled {
            out.push_str(if closing { off } else { on });
        }
        return;
    }

    match name.as_str() {
        "br" => out.push('\n'),
        "p" | "div" if closing && !out.is_empty() && !out.ends_with('\n') => out.push('\n'),
        "img" if !closing => {
            if let Some(src) = attribute(tag, "src") {
                out.push_str(&format!("[image: {src}]"));
            }
        }
        _ => {}
    }
}

fn attribute<'a>(tag: &'a str, name: &str) -> Option<&'a str> {
    let start = tag.find(&format!("{name}="))? + name.len() + 1;
    let value = &tag[start..];
    let quote = value.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let value = &value[1..];
    value.find(quote).map(|end| &value[..end])
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
}
