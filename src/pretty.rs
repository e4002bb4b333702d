//! Indentation of finished HTML documents.
//!
//! A small tag-aware printer: block-level elements start on their own line
//! and indent their children, inline content stays on the line it is on, and
//! the contents of `script`, `style`, `pre` and `textarea` are left exactly as
//! written. Attribute values are never touched.

const INDENT: &str = "  ";

const BLOCK_TAGS: &[&str] = &[
    "address", "article", "aside", "base", "blockquote", "body", "dd", "details", "dialog",
    "div", "dl", "dt", "fieldset", "figcaption", "figure", "footer", "form", "h1", "h2", "h3",
    "h4", "h5", "h6", "head", "header", "hgroup", "hr", "html", "li", "link", "main", "meta",
    "nav", "noscript", "ol", "p", "section", "summary", "table", "tbody", "td", "template",
    "tfoot", "th", "thead", "title", "tr", "ul",
];

const RAW_TEXT_TAGS: &[&str] = &["pre", "script", "style", "textarea"];

const VOID_TAGS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

#[derive(Debug, PartialEq)]
enum Token<'a> {
    Open {
        name: String,
        raw: &'a str,
        self_closing: bool,
    },
    Close {
        name: String,
        raw: &'a str,
    },
    /// Doctype, comment or processing instruction.
    Special(&'a str),
    /// A raw-text element, open tag through close tag.
    RawBlock(&'a str),
    Text(&'a str),
}

/// Re-indent an HTML document.
pub fn pretty_html(input: &str) -> String {
    let mut printer = Printer::default();
    for token in tokenize(input) {
        printer.push(token);
    }
    printer.finish()
}

#[derive(Default)]
struct Printer {
    out: String,
    line: String,
    line_depth: usize,
    /// Open block elements, and whether each has block children.
    stack: Vec<(String, bool)>,
}

impl Printer {
    fn push(&mut self, token: Token<'_>) {
        match token {
            Token::Special(raw) | Token::RawBlock(raw) => {
                self.mark_block_child();
                self.own_line(raw);
            }
            Token::Open {
                name,
                raw,
                self_closing,
            } if is_block(&name) => {
                self.mark_block_child();
                self.flush();
                self.line_depth = self.stack.len();
                self.line.push_str(raw);
                if self_closing || VOID_TAGS.contains(&name.as_str()) {
                    self.flush();
                } else {
                    self.stack.push((name, false));
                }
            }
            Token::Close { name, raw } if is_block(&name) => {
                match self.stack.iter().rposition(|(open, _)| *open == name) {
                    Some(position) => {
                        let had_blocks = self.stack[position].1;
                        self.stack.truncate(position);
                        if had_blocks {
                            self.own_line(raw);
                        } else {
                            self.inline(raw);
                            self.flush();
                        }
                    }
                    None => self.inline(raw),
                }
            }
            Token::Open { raw, .. } | Token::Close { raw, .. } | Token::Text(raw) => {
                self.inline(raw)
            }
        }
    }

    fn mark_block_child(&mut self) {
        if let Some(parent) = self.stack.last_mut() {
            parent.1 = true;
        }
    }

    fn own_line(&mut self, raw: &str) {
        self.flush();
        self.line_depth = self.stack.len();
        self.line.push_str(raw);
        self.flush();
    }

    fn inline(&mut self, text: &str) {
        if self.line.is_empty() {
            let text = text.trim_start();
            if text.is_empty() {
                return;
            }
            self.line_depth = self.stack.len();
            self.line.push_str(text);
        } else {
            self.line.push_str(text);
        }
    }

    fn flush(&mut self) {
        let line = self.line.trim_end();
        if !line.is_empty() {
            for _ in 0..self.line_depth {
                self.out.push_str(INDENT);
            }
            self.out.push_str(line);
            self.out.push('\n');
        }
        self.line.clear();
    }

    fn finish(mut self) -> String {
        self.flush();
        self.out
    }
}

fn is_block(name: &str) -> bool {
    BLOCK_TAGS.contains(&name)
}

fn tokenize(input: &str) -> Vec<Token<'_>> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < input.len() {
        if bytes[pos] != b'<' || !starts_tag(&bytes[pos + 1..]) {
            let from = if bytes[pos] == b'<' { pos + 1 } else { pos };
            let next = input[from..].find('<').map_or(input.len(), |i| from + i);
            tokens.push(Token::Text(&input[pos..next]));
            pos = next;
            continue;
        }

        if input[pos..].starts_with("<!--") {
            let end = input[pos..].find("-->").map_or(input.len(), |i| pos + i + 3);
            tokens.push(Token::Special(&input[pos..end]));
            pos = end;
            continue;
        }

        let Some(end) = tag_end(bytes, pos) else {
            tokens.push(Token::Text(&input[pos..]));
            break;
        };
        let raw = &input[pos..end];

        if raw.starts_with("<!") || raw.starts_with("<?") {
            tokens.push(Token::Special(raw));
            pos = end;
        } else if let Some(rest) = raw.strip_prefix("</") {
            tokens.push(Token::Close {
                name: tag_name(rest),
                raw,
            });
            pos = end;
        } else {
            let name = tag_name(&raw[1..]);
            let self_closing = raw.ends_with("/>");
            if RAW_TEXT_TAGS.contains(&name.as_str()) && !self_closing {
                let block_end = raw_text_end(input, end, &name);
                tokens.push(Token::RawBlock(&input[pos..block_end]));
                pos = block_end;
            } else {
                tokens.push(Token::Open {
                    name,
                    raw,
                    self_closing,
                });
                pos = end;
            }
        }
    }
    tokens
}

fn starts_tag(rest: &[u8]) -> bool {
    matches!(rest.first(), Some(b) if b.is_ascii_alphabetic() || matches!(b, b'/' | b'!' | b'?'))
}

/// Index just past the `>` closing the tag at `start`, honoring quotes.
fn tag_end(bytes: &[u8], start: usize) -> Option<usize> {
    let mut quote: Option<u8> = None;
    for (offset, &b) in bytes[start + 1..].iter().enumerate() {
        match quote {
            Some(q) if b == q => quote = None,
            Some(_) => {}
            None if b == b'"' || b == b'\'' => quote = Some(b),
            None if b == b'>' => return Some(start + 1 + offset + 1),
            None => {}
        }
    }
    None
}

/// Index just past the close tag of a raw-text element.
fn raw_text_end(input: &str, from: usize, name: &str) -> usize {
    let needle = format!("</{name}");
    let lower = input[from..].to_ascii_lowercase();
    match lower.find(&needle) {
        Some(offset) => {
            let close = from + offset;
            tag_end(input.as_bytes(), close).unwrap_or(input.len())
        }
        None => input.len(),
    }
}

fn tag_name(rest: &str) -> String {
    rest.chars()
        .take_while(|c| c.is_ascii_alphanumeric() || *c == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn indents_block_structure() {
        let input = "<!DOCTYPE html><html><head><title>T</title></head><body><p>Hi <em>there</em></p></body></html>";
        let expected = "\
<!DOCTYPE html>
<html>
  <head>
    <title>T</title>
  </head>
  <body>
    <p>Hi <em>there</em></p>
  </body>
</html>
";
        assert_eq!(pretty_html(input), expected);
    }

    #[test]
    fn void_blocks_get_their_own_line() {
        let input = r#"<head><meta charset="utf-8"><link rel="stylesheet" href="/a.css"></head>"#;
        let expected = "\
<head>
  <meta charset=\"utf-8\">
  <link rel=\"stylesheet\" href=\"/a.css\">
</head>
";
        assert_eq!(pretty_html(input), expected);
    }

    #[test]
    fn raw_text_is_preserved() {
        let input =
            "<body><pre>  keep\n    this</pre><script>if (a < b && c > d) {}</script></body>";
        let output = pretty_html(input);
        assert!(output.contains("<pre>  keep\n    this</pre>"));
        assert!(output.contains("<script>if (a < b && c > d) {}</script>"));
    }

    #[test]
    fn quoted_angle_brackets_stay_in_tags() {
        let input = r#"<div title="a > b"><p>x</p></div>"#;
        let output = pretty_html(input);
        assert!(output.starts_with("<div title=\"a > b\">\n"));
        assert!(output.contains("  <p>x</p>\n"));
    }

    #[test]
    fn nested_lists() {
        let input = "<ul><li>one<ul><li>two</li></ul></li></ul>";
        let expected = "\
<ul>
  <li>one
    <ul>
      <li>two</li>
    </ul>
  </li>
</ul>
";
        assert_eq!(pretty_html(input), expected);
    }

    #[test]
    fn comments_and_stray_brackets() {
        let input = "<div><!-- note --><p>1 < 2</p></div>";
        let expected = "\
<div>
  <!-- note -->
  <p>1 < 2</p>
</div>
";
        assert_eq!(pretty_html(input), expected);
    }

    #[test]
    fn whitespace_between_blocks_is_dropped() {
        let input = "<div>\n\n   <p>a</p>\n  \n<p>b</p>\n</div>";
        let expected = "\
<div>
  <p>a</p>
  <p>b</p>
</div>
";
        assert_eq!(pretty_html(input), expected);
    }

    #[test]
    fn is_stable_on_its_own_output() {
        let once = pretty_html(
            "<html><body><main><h1>A</h1><p>b <a href=\"/\">c</a></p></main></body></html>",
        );
        assert_eq!(pretty_html(&once), once);
    }
}
