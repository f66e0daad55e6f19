//! Instruction templates with `{key}` placeholders.
//!
//! A placeholder is an identifier in braces, optionally namespaced
//! (`{app:theme}`) and optionally marked optional with a trailing `?`
//! (`{user_name?}`). Anything else in braces (JSON examples, prose) is kept
//! verbatim. Templates are parsed once at node construction so the referenced
//! keys are known before any run starts.

use std::sync::OnceLock;

use regex::Regex;

use tandem_core::context::{render_value, Context};

fn placeholder() -> &'static Regex {
    static PLACEHOLDER: OnceLock<Regex> = OnceLock::new();
    PLACEHOLDER.get_or_init(|| {
        Regex::new(r"\{([A-Za-z_][A-Za-z0-9_]*(?::[A-Za-z_][A-Za-z0-9_]*)?)(\?)?\}")
            .expect("placeholder pattern is valid")
    })
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(String),
    Key { name: String, optional: bool },
}

/// A parsed instruction template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    segments: Vec<Segment>,
}

impl Template {
    pub fn parse(source: &str) -> Self {
        let mut segments = Vec::new();
        let mut last = 0;

        for caps in placeholder().captures_iter(source) {
            let Some(whole) = caps.get(0) else { continue };
            if whole.start() > last {
                segments.push(Segment::Literal(source[last..whole.start()].to_string()));
            }
            segments.push(Segment::Key {
                name: caps[1].to_string(),
                optional: caps.get(2).is_some(),
            });
            last = whole.end();
        }
        if last < source.len() {
            segments.push(Segment::Literal(source[last..].to_string()));
        }

        Self { segments }
    }

    /// Keys that must be present when rendering, in first-reference order.
    pub fn required_keys(&self) -> Vec<&str> {
        self.keys(false)
    }

    /// Every referenced key, required or optional, in first-reference order.
    pub fn all_keys(&self) -> Vec<&str> {
        self.keys(true)
    }

    fn keys(&self, include_optional: bool) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for seg in &self.segments {
            if let Segment::Key { name, optional } = seg {
                if (include_optional || !optional) && !keys.contains(&name.as_str()) {
                    keys.push(name);
                }
            }
        }
        keys
    }

    /// Substitute placeholders from the context.
    ///
    /// Returns the first absent required key as the error.
    pub fn render(&self, ctx: &Context) -> std::result::Result<String, String> {
        let mut out = String::new();
        for seg in &self.segments {
            match seg {
                Segment::Literal(text) => out.push_str(text),
                Segment::Key { name, optional } => match ctx.get(name) {
                    Some(value) => out.push_str(&render_value(value)),
                    None if *optional => {}
                    None => return Err(name.clone()),
                },
            }
        }
        Ok(out)
    }
}
