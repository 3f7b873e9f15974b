use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use sf_core::{map_json, Bundle, StoryForgeError};

const PLAYER_TEMPLATE: &str = include_str!(concat!(
    env!("CARGO_MANIFEST_DIR"),
    "/templates/player.html"
));

pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(ch),
        }
    }
    out
}

fn theme_token(theme: Option<&str>) -> String {
    theme
        .unwrap_or("light")
        .chars()
        .filter(|ch| ch.is_ascii_alphanumeric() || *ch == '-')
        .collect::<String>()
        .to_ascii_lowercase()
}

/// Standalone player page with the bundle JSON embedded as base64.
pub fn render_player_html(bundle: &Bundle, title: &str) -> Result<String, StoryForgeError> {
    let json = serde_json::to_string(bundle).map_err(map_json)?;
    let encoded = STANDARD.encode(json.as_bytes());
    Ok(PLAYER_TEMPLATE
        .replace("__SF_BUNDLE__", &encoded)
        .replace("__SF_TITLE__", &escape_html(title))
        .replace("__SF_THEME__", &theme_token(bundle.metadata.theme.as_deref())))
}

#[cfg(test)]
mod html_tests {
    use super::*;

    #[test]
    fn escapes_markup_characters() {
        assert_eq!(
            escape_html(r#"<b>"Tom" & 'Jerry'</b>"#),
            "&lt;b&gt;&quot;Tom&quot; &amp; &#39;Jerry&#39;&lt;/b&gt;"
        );
    }

    #[test]
    fn theme_token_keeps_only_safe_characters() {
        assert_eq!(theme_token(Some("Dark\" onload=\"x")), "darkonloadx");
        assert_eq!(theme_token(None), "light");
    }

    #[test]
    fn template_has_every_placeholder() {
        for token in ["__SF_BUNDLE__", "__SF_TITLE__", "__SF_THEME__"] {
            assert!(PLAYER_TEMPLATE.contains(token), "{}", token);
        }
    }
}
