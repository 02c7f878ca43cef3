use std::sync::Arc;

use crate::store::RollingContext;

/// Producer of the translator's system prompt. Injected into the pipeline so
/// callers can swap domain framing without touching the translation loop.
pub type SystemPromptFn = Arc<dyn Fn() -> String + Send + Sync>;

pub const TRANSLATE_TEMPLATE: &str = r#"{{context}}{{glossary}}Translate the following text into {{target_lang}}:

{{text}}

REQUIREMENTS:
1. Keep every [IMAGE_...] placeholder exactly as written.
2. Keep the blank-line paragraph breaks of the source.
3. Use the established glossary terms consistently.
4. Do not add explanations or commentary.
5. Return ONLY the translation.

Translation:"#;

pub const SUMMARY_TEMPLATE: &str = r#"Based on the following fragments, write a short chapter summary (1-2 sentences):

{{text}}

Summary:"#;

pub const TITLE_TEMPLATE: &str = r#"Translate this chapter title into {{target_lang}}. Return only the translated title:

{{title}}"#;

pub const SUMMARY_SYSTEM_PROMPT: &str = "You write short summaries of book chapters.";

pub fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (k, v) in vars {
        let pat = format!("{{{{{k}}}}}");
        out = out.replace(&pat, v);
    }
    out
}

pub fn default_system_prompt(target_language: &str, domain: Option<&str>) -> SystemPromptFn {
    let mut prompt = format!(
        "You are a professional book translator. You produce accurate, natural {target_language} \
         renderings of the source text, preserving the author's tone and register."
    );
    if let Some(domain) = domain {
        prompt.push_str(&format!(
            "\nSubject matter: {domain}. Use the terminology established in that field."
        ));
    }
    Arc::new(move || prompt.clone())
}

/// Continuity block prepended to a translation prompt: position in chapter,
/// previous-chapter summary, tail of the previous source paragraph, and the
/// most recent translations.
pub fn build_context_block(ctx: &RollingContext, index: usize, total: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    if total > 1 {
        let position = if (index as f64) < total as f64 * 0.3 {
            "beginning"
        } else if (index as f64) < total as f64 * 0.7 {
            "middle"
        } else {
            "end"
        };
        parts.push(format!(
            "Position in chapter: {position} ({}/{total})",
            index + 1
        ));
    }
    if let Some(summary) = ctx.previous_summary.as_deref() {
        parts.push(format!("Previous chapter summary: {summary}"));
    }
    if let Some(tail) = ctx.previous_tail.as_deref() {
        parts.push(format!("Previous paragraph ends: ...{tail}"));
    }
    if !ctx.recent_translations.is_empty() {
        parts.push(format!(
            "Recent translations:\n{}",
            ctx.recent_translations.join("\n")
        ));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!("CONTEXT:\n{}\n\n", parts.join("\n"))
    }
}

/// Read-only neighboring paragraphs for window-grouped requests. Empty when
/// the group carries no context.
pub fn render_neighbor_context(before: &[String], after: &[String]) -> String {
    if before.is_empty() && after.is_empty() {
        return String::new();
    }
    let mut out = String::from("SURROUNDING TEXT (for reference only, do not translate):\n");
    if !before.is_empty() {
        out.push_str("Before:\n");
        out.push_str(&before.join("\n"));
        out.push('\n');
    }
    if !after.is_empty() {
        out.push_str("After:\n");
        out.push_str(&after.join("\n"));
        out.push('\n');
    }
    out.push('\n');
    out
}

pub fn render_translate_prompt(
    text: &str,
    target_language: &str,
    context_block: &str,
    glossary_block: &str,
) -> String {
    let glossary = if glossary_block.is_empty() {
        String::new()
    } else {
        format!("{glossary_block}\n")
    };
    render_template(
        TRANSLATE_TEMPLATE,
        &[
            ("context", context_block),
            ("glossary", glossary.as_str()),
            ("target_lang", target_language),
            ("text", text),
        ],
    )
}

pub fn render_summary_prompt(sample: &str) -> String {
    render_template(SUMMARY_TEMPLATE, &[("text", sample)])
}

pub fn render_title_prompt(title: &str, target_language: &str) -> String {
    render_template(
        TITLE_TEMPLATE,
        &[("target_lang", target_language), ("title", title)],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn template_variables_are_replaced() {
        let out = render_template("a {{x}} b {{y}} c {{x}}", &[("x", "1"), ("y", "2")]);
        assert_eq!(out, "a 1 b 2 c 1");
    }

    #[test]
    fn empty_context_adds_nothing() {
        let ctx = RollingContext::default();
        assert_eq!(build_context_block(&ctx, 0, 1), "");
        let prompt = render_translate_prompt("Hello.", "Russian", "", "");
        assert!(prompt.starts_with("Translate the following text into Russian:"));
        assert!(prompt.contains("Hello."));
    }

    #[test]
    fn context_block_reports_position_and_tail() {
        let mut ctx = RollingContext::default();
        ctx.previous_summary = Some("The hero sets out.".into());
        ctx.note_source("a long paragraph about engines");
        ctx.push_translation("перевод");
        let block = build_context_block(&ctx, 8, 10);
        assert!(block.contains("end (9/10)"));
        assert!(block.contains("The hero sets out."));
        assert!(block.contains("...a long paragraph about engines"));
        assert!(block.contains("перевод"));
    }

    #[test]
    fn neighbor_context_renders_both_sides() {
        assert_eq!(render_neighbor_context(&[], &[]), "");
        let before = vec!["earlier paragraph".to_string()];
        let after = vec!["later paragraph".to_string()];
        let block = render_neighbor_context(&before, &after);
        assert!(block.contains("Before:\nearlier paragraph"));
        assert!(block.contains("After:\nlater paragraph"));
        assert!(block.contains("do not translate"));
    }

    #[test]
    fn system_prompt_injection_carries_domain() {
        let f = default_system_prompt("Russian", Some("organizational psychology"));
        let prompt = f();
        assert!(prompt.contains("Russian"));
        assert!(prompt.contains("organizational psychology"));
    }
}
