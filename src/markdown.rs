//! Markdown-to-HTML for assistant replies.
//!
//! Only a constrained subset is recognised: ATX headings, bold/italic, fenced
//! and inline code, links, blockquotes, unordered and ordered lists, and
//! paragraphs with hard line breaks. Every piece of source text is
//! HTML-escaped before it reaches the output, and link targets are limited to
//! http(s), mailto and relative URLs, so the result is safe to insert as HTML.
//!
//! The renderer is re-run on the whole accumulated buffer while a reply is
//! streaming, so it must cope with half-finished constructs: an unclosed
//! fence renders as a code block, an unclosed `**` renders literally.

/// Escape the five HTML-significant characters.
pub fn escape_html(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

/// User-authored text: escaped, newlines become `<br>`, nothing else.
pub fn render_plain(text: &str) -> String {
    escape_html(text).replace("\r\n", "\n").replace('\n', "<br>")
}

pub fn render_markdown(text: &str) -> String {
    let mut r = BlockRenderer::default();
    let mut fence: Option<(String, Vec<&str>)> = None;

    for line in text.lines() {
        if fence.is_some() {
            if line.trim_start().starts_with("```") {
                if let Some((lang, body)) = fence.take() {
                    r.code(&lang, &body);
                }
            } else if let Some((_, body)) = fence.as_mut() {
                body.push(line);
            }
            continue;
        }

        let trimmed = line.trim_start();
        if let Some(info) = trimmed.strip_prefix("```") {
            r.flush();
            fence = Some((fence_language(info), Vec::new()));
        } else if trimmed.trim_end().is_empty() {
            r.flush();
        } else if let Some((level, title)) = heading(trimmed) {
            r.flush();
            r.out.push_str(&format!("<h{0}>{1}</h{0}>", level, render_inline(title)));
        } else if let Some(quoted) = blockquote(trimmed) {
            r.flush_para();
            r.flush_list();
            r.quote.push(quoted);
        } else if let Some(item) = bullet_item(trimmed) {
            r.push_item(false, item);
        } else if let Some(item) = ordered_item(trimmed) {
            r.push_item(true, item);
        } else {
            r.flush_quote();
            r.flush_list();
            r.para.push(line.trim());
        }
    }

    // Still streaming: show the open fence as code.
    if let Some((lang, body)) = fence {
        r.code(&lang, &body);
    }
    r.flush();
    r.out
}

// ---------------------------------------------------------------------------
// Blocks
// ---------------------------------------------------------------------------

#[derive(Default)]
struct BlockRenderer<'a> {
    out: String,
    para: Vec<&'a str>,
    quote: Vec<&'a str>,
    /// `(ordered, items)`
    list: Option<(bool, Vec<&'a str>)>,
}

impl<'a> BlockRenderer<'a> {
    fn flush(&mut self) {
        self.flush_para();
        self.flush_quote();
        self.flush_list();
    }

    fn flush_para(&mut self) {
        if self.para.is_empty() {
            return;
        }
        let lines: Vec<String> = self.para.drain(..).map(render_inline).collect();
        self.out.push_str("<p>");
        self.out.push_str(&lines.join("<br>"));
        self.out.push_str("</p>");
    }

    fn flush_quote(&mut self) {
        if self.quote.is_empty() {
            return;
        }
        let lines: Vec<String> = self.quote.drain(..).map(render_inline).collect();
        self.out.push_str("<blockquote>");
        self.out.push_str(&lines.join("<br>"));
        self.out.push_str("</blockquote>");
    }

    fn flush_list(&mut self) {
        let Some((ordered, items)) = self.list.take() else {
            return;
        };
        let tag = if ordered { "ol" } else { "ul" };
        self.out.push_str(&format!("<{}>", tag));
        for item in items {
            self.out.push_str("<li>");
            self.out.push_str(&render_inline(item));
            self.out.push_str("</li>");
        }
        self.out.push_str(&format!("</{}>", tag));
    }

    fn push_item(&mut self, ordered: bool, item: &'a str) {
        self.flush_para();
        self.flush_quote();
        if matches!(self.list, Some((o, _)) if o != ordered) {
            self.flush_list();
        }
        self.list.get_or_insert_with(|| (ordered, Vec::new())).1.push(item);
    }

    fn code(&mut self, lang: &str, body: &[&str]) {
        self.flush();
        if lang.is_empty() {
            self.out.push_str("<pre><code>");
        } else {
            self.out.push_str(&format!("<pre><code class=\"language-{}\">", lang));
        }
        self.out.push_str(&escape_html(&body.join("\n")));
        self.out.push_str("</code></pre>");
    }
}

fn fence_language(info: &str) -> String {
    info.trim()
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '+'))
        .collect()
}

fn heading(line: &str) -> Option<(usize, &str)> {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    Some((hashes, rest.trim().trim_end_matches('#').trim_end()))
}

fn blockquote(line: &str) -> Option<&str> {
    line.strip_prefix('>').map(|rest| rest.strip_prefix(' ').unwrap_or(rest))
}

fn bullet_item(line: &str) -> Option<&str> {
    ["- ", "* ", "+ "]
        .iter()
        .find_map(|marker| line.strip_prefix(marker))
        .map(str::trim)
}

fn ordered_item(line: &str) -> Option<&str> {
    let digits = line.chars().take_while(|c| c.is_ascii_digit()).count();
    if digits == 0 {
        return None;
    }
    line[digits..]
        .strip_prefix(". ")
        .or_else(|| line[digits..].strip_prefix(") "))
        .map(str::trim)
}

// ---------------------------------------------------------------------------
// Inline
// ---------------------------------------------------------------------------

fn render_inline(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut rest = s;

    while let Some(c) = rest.chars().next() {
        match c {
            '`' => {
                if let Some(end) = rest[1..].find('`') {
                    let inner = &rest[1..1 + end];
                    if !inner.is_empty() {
                        out.push_str("<code>");
                        out.push_str(&escape_html(inner));
                        out.push_str("</code>");
                        rest = &rest[end + 2..];
                        continue;
                    }
                }
            }
            '[' => {
                if let Some((text, url, len)) = link(rest) {
                    let label = render_inline(text);
                    if is_safe_url(url) {
                        out.push_str(&format!(
                            "<a href=\"{}\" target=\"_blank\" rel=\"noopener noreferrer\">{}</a>",
                            escape_html(url),
                            label
                        ));
                    } else {
                        out.push_str(&label);
                    }
                    rest = &rest[len..];
                    continue;
                }
            }
            '*' | '_' if rest[1..].starts_with(c) => {
                let marker = &rest[..2];
                if let Some(end) = rest[2..].find(marker) {
                    let inner = &rest[2..2 + end];
                    if is_span(inner) {
                        out.push_str("<strong>");
                        out.push_str(&render_inline(inner));
                        out.push_str("</strong>");
                        rest = &rest[end + 4..];
                        continue;
                    }
                }
            }
            '*' => {
                if let Some(end) = rest[1..].find('*') {
                    let inner = &rest[1..1 + end];
                    if is_span(inner) {
                        out.push_str("<em>");
                        out.push_str(&render_inline(inner));
                        out.push_str("</em>");
                        rest = &rest[end + 2..];
                        continue;
                    }
                }
            }
            _ => {}
        }
        out.push_str(&escape_html(&rest[..c.len_utf8()]));
        rest = &rest[c.len_utf8()..];
    }
    out
}

fn is_span(inner: &str) -> bool {
    !inner.is_empty() && !inner.starts_with(char::is_whitespace) && !inner.ends_with(char::is_whitespace)
}

/// `[text](url)` at the start of `s`: `(text, url, consumed bytes)`.
fn link(s: &str) -> Option<(&str, &str, usize)> {
    let close = s.find("](")?;
    let text = &s[1..close];
    if text.is_empty() || text.contains('[') {
        return None;
    }
    let after = &s[close + 2..];
    let end = after.find(')')?;
    let url = after[..end].trim();
    if url.is_empty() {
        return None;
    }
    Some((text, url, close + 2 + end + 1))
}

fn is_safe_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    if lower.starts_with("http://") || lower.starts_with("https://") || lower.starts_with("mailto:") {
        return true;
    }
    // Relative: no scheme before the first path, query or fragment delimiter.
    match lower.find(':') {
        None => true,
        Some(colon) => lower[..colon].contains(['/', '?', '#']),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_paragraph() {
        assert_eq!(render_markdown("AB"), "<p>AB</p>");
    }

    #[test]
    fn test_paragraph_breaks() {
        assert_eq!(render_markdown("a\nb\n\nc"), "<p>a<br>b</p><p>c</p>");
    }

    #[test]
    fn test_headings() {
        assert_eq!(render_markdown("## Key points"), "<h2>Key points</h2>");
        assert_eq!(render_markdown("###### six"), "<h6>six</h6>");
        assert_eq!(render_markdown("#hashtag"), "<p>#hashtag</p>");
    }

    #[test]
    fn test_bold_and_italic() {
        assert_eq!(
            render_markdown("**a** and *b*"),
            "<p><strong>a</strong> and <em>b</em></p>"
        );
        assert_eq!(render_markdown("__c__"), "<p><strong>c</strong></p>");
    }

    #[test]
    fn test_unclosed_bold_is_literal() {
        assert_eq!(render_markdown("**bol"), "<p>**bol</p>");
    }

    #[test]
    fn test_snake_case_untouched() {
        assert_eq!(render_markdown("user_id and doctor_type"), "<p>user_id and doctor_type</p>");
    }

    #[test]
    fn test_html_is_escaped() {
        assert_eq!(
            render_markdown("<script>alert(1)</script>"),
            "<p>&lt;script&gt;alert(1)&lt;/script&gt;</p>"
        );
    }

    #[test]
    fn test_fenced_code() {
        assert_eq!(
            render_markdown("```rust\nlet x = 1 < 2;\n```"),
            "<pre><code class=\"language-rust\">let x = 1 &lt; 2;</code></pre>"
        );
    }

    #[test]
    fn test_unterminated_fence_renders_as_code() {
        assert_eq!(render_markdown("```\nfoo"), "<pre><code>foo</code></pre>");
    }

    #[test]
    fn test_inline_code_is_not_formatted() {
        assert_eq!(render_markdown("`a*b*`"), "<p><code>a*b*</code></p>");
    }

    #[test]
    fn test_safe_link() {
        assert_eq!(
            render_markdown("[site](https://example.org)"),
            "<p><a href=\"https://example.org\" target=\"_blank\" rel=\"noopener noreferrer\">site</a></p>"
        );
    }

    #[test]
    fn test_unsafe_link_drops_href() {
        let html = render_markdown("[x](javascript:alert(1))");
        assert!(!html.contains("<a"));
        assert!(!html.contains("href"));
    }

    #[test]
    fn test_relative_link_allowed() {
        assert!(render_markdown("[guide](/docs/guide.html)").contains("href=\"/docs/guide.html\""));
    }

    #[test]
    fn test_unordered_list() {
        assert_eq!(render_markdown("- a\n* b\n+ c"), "<ul><li>a</li><li>b</li><li>c</li></ul>");
    }

    #[test]
    fn test_ordered_list() {
        assert_eq!(render_markdown("1. one\n2. two"), "<ol><li>one</li><li>two</li></ol>");
    }

    #[test]
    fn test_list_kind_switch() {
        assert_eq!(
            render_markdown("- a\n1. b"),
            "<ul><li>a</li></ul><ol><li>b</li></ol>"
        );
    }

    #[test]
    fn test_blockquote() {
        assert_eq!(render_markdown("> note\n> more"), "<blockquote>note<br>more</blockquote>");
    }

    #[test]
    fn test_mixed_document() {
        let html = render_markdown("## Risks\n\n**Watch for:**\n- bleeding\n- infection\n\nDone.");
        assert_eq!(
            html,
            "<h2>Risks</h2><p><strong>Watch for:</strong></p><ul><li>bleeding</li><li>infection</li></ul><p>Done.</p>"
        );
    }

    #[test]
    fn test_render_plain_escapes_and_breaks() {
        assert_eq!(render_plain("<b>hi</b>\nthere"), "&lt;b&gt;hi&lt;/b&gt;<br>there");
        assert_eq!(render_plain("**not bold**"), "**not bold**");
    }

    #[test]
    fn test_escape_quotes() {
        assert_eq!(escape_html("\"'&"), "&quot;&#39;&amp;");
    }

    #[test]
    fn test_multibyte_text() {
        assert_eq!(render_markdown("**王**医生"), "<p><strong>王</strong>医生</p>");
    }
}
