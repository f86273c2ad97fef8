//! Escaping for values embedded in filter graph text.

/// Characters the graph parser treats as escapes, quotes or delimiters.
const GRAPH_SPECIALS: &[char] = &['\\', '\'', '[', ']', ',', ';'];

/// Escape a value for the graph parser so it reaches the filter intact.
fn escape_graph_level(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len() + 8);
    for c in value.chars() {
        if GRAPH_SPECIALS.contains(&c) {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Single-quote a value for the filter option parser. A quote cannot appear
/// inside quotes, so each one closes the quote, is escaped, and reopens it.
fn quote_option(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Escape literal text for a drawtext `text=` value in a filter graph.
///
/// Three levels apply, innermost first: drawtext expansion (`\` and `%`),
/// the option parser (quoted, so `:` is literal) and the graph parser.
pub fn escape_drawtext(text: &str) -> String {
    let literal = text.replace('\\', r"\\").replace('%', r"\%");
    escape_graph_level(&quote_option(&literal))
}

/// Escape a file path used as a filter option value (e.g. `fontfile`).
pub fn escape_filter_path(path: &str) -> String {
    escape_graph_level(&quote_option(path))
}

const NAMED_COLORS: &[(&str, (u8, u8, u8))] = &[
    ("white", (255, 255, 255)),
    ("black", (0, 0, 0)),
    ("red", (255, 0, 0)),
    ("green", (0, 128, 0)),
    ("lime", (0, 255, 0)),
    ("blue", (0, 0, 255)),
    ("yellow", (255, 255, 0)),
    ("cyan", (0, 255, 255)),
    ("magenta", (255, 0, 255)),
    ("gray", (128, 128, 128)),
    ("grey", (128, 128, 128)),
    ("orange", (255, 165, 0)),
];

fn parse_color(color: &str) -> Option<(u8, u8, u8)> {
    let lower = color.trim().to_ascii_lowercase();
    if let Some((_, rgb)) = NAMED_COLORS.iter().find(|(name, _)| *name == lower) {
        return Some(*rgb);
    }
    let hex = lower
        .strip_prefix('#')
        .or_else(|| lower.strip_prefix("0x"))?;
    if hex.len() != 6 {
        return None;
    }
    let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).ok();
    Some((channel(0)?, channel(2)?, channel(4)?))
}

/// Inverse of a color, used as the drawtext border so text stays readable.
///
/// Accepts names and `#RRGGBB`/`0xRRGGBB`, with an optional `@alpha` suffix
/// that is carried over. Unknown colors get a black border.
pub fn invert_color(color: &str) -> String {
    let (base, alpha) = match color.split_once('@') {
        Some((base, alpha)) => (base, Some(alpha)),
        None => (color, None),
    };

    let inverted = match parse_color(base) {
        Some((r, g, b)) => {
            let rgb = (255 - r, 255 - g, 255 - b);
            NAMED_COLORS
                .iter()
                .find(|(_, named)| *named == rgb)
                .map(|(name, _)| name.to_string())
                .unwrap_or_else(|| format!("0x{:02X}{:02X}{:02X}", rgb.0, rgb.1, rgb.2))
        }
        None => "black".to_string(),
    };

    match alpha {
        Some(alpha) => format!("{}@{}", inverted, alpha),
        None => inverted,
    }
}


#[cfg(test)]
mod tests {
    use super::decode::{drawtext_literal, option_value};
    use super::*;

    fn roundtrip(text: &str) -> String {
        drawtext_literal(&option_value(&escape_drawtext(text)))
    }

    #[test]
    fn test_escape_levels() {
        assert_eq!(escape_drawtext("Artist: Title"), r"\'Artist: Title\'");
        assert_eq!(escape_drawtext("it's"), r"\'it\'\\\'\'s\'");
        assert_eq!(escape_drawtext("50%"), r"\'50\\%\'");
        assert_eq!(escape_drawtext("a,b;c"), r"\'a\,b\;c\'");
    }

    #[test]
    fn test_drawtext_decodes_exactly() {
        for text in [
            "Guns N' Roses: Live",
            r"back\slash",
            "[x](y) $5 @ 50%",
            "a,b;c",
            "'quoted'",
            "trailing space ",
        ] {
            assert_eq!(roundtrip(text), text);
        }
    }

    #[test]
    fn test_escaped_text_keeps_graph_intact() {
        let text = escape_drawtext("Band; feat. [DJ], 100%");
        let graph = format!("[base]drawtext=text={}[t0]", text);
        let stages = crate::graph::scan_labels(&graph);
        assert_eq!(stages.len(), 1);
        assert_eq!(stages[0].outputs, vec!["t0"]);
    }

    #[test]
    fn test_escape_filter_path() {
        let escaped = escape_filter_path("C:/Fonts/My Font's.ttf");
        assert_eq!(option_value(&escaped), "C:/Fonts/My Font's.ttf");
    }

    #[test]
    fn test_invert_color() {
        assert_eq!(invert_color("white"), "black");
        assert_eq!(invert_color("Black"), "white");
        assert_eq!(invert_color("#FF8000"), "0x007FFF");
        assert_eq!(invert_color("0x000000@0.5"), "white@0.5");
        assert_eq!(invert_color("chartreuse-ish"), "black");
    }
}
