use once_cell::sync::Lazy;
use regex::Regex;

static SCRIPT_BLOCKS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?si)<script\b[^>]*>.*?</script\s*>").expect("script pattern"));

static FOREIGN_OBJECT_BLOCKS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?si)<foreignObject\b[^>]*>.*?</foreignObject\s*>").expect("foreignObject pattern")
});

static EVENT_HANDLER_ATTRS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)\s+on\w+\s*=\s*(?:"[^"]*"|'[^']*'|[^\s>]*)"#).expect("handler pattern")
});

/// Denylist filter applied to untrusted SVG markup before it reaches the
/// rendering layer: script blocks, foreignObject embeds, and inline event
/// handler attributes are removed, in that fixed order. Not a parser-based
/// sanitizer: entities are left alone, `javascript:` URIs in link
/// attributes survive, and well-formedness is not checked.
pub fn sanitize_svg(svg: &str) -> String {
    let pass = SCRIPT_BLOCKS.replace_all(svg, "");
    let pass = FOREIGN_OBJECT_BLOCKS.replace_all(&pass, "");
    EVENT_HANDLER_ATTRS.replace_all(&pass, "").into_owned()
}
