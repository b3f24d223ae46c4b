use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{
    CommandSpec, EXPORT_COMMAND, MULTI_PATH_COMMANDS, NO_ARG_COMMANDS, RAW_ARG_COMMANDS,
    SETTING_COMMANDS,
};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub prompt: Option<String>,
    pub settings_update: BTreeMap<String, Value>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            prompt: None,
            settings_update: BTreeMap::new(),
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn parse_path_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let remainder = &slash_tail[command_len..];
            let arg = if remainder.is_empty() {
                ""
            } else {
                remainder.trim()
            };

            if let Some(spec) = SETTING_COMMANDS.iter().find(|spec| spec.command == command) {
                let mut intent = Intent::new(spec.action, text);
                intent
                    .settings_update
                    .insert(spec.key.to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, RAW_ARG_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent
                    .command_args
                    .insert("provider".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if let Some(action) = find_action(&command, MULTI_PATH_COMMANDS) {
                let mut intent = Intent::new(action, text);
                intent.command_args.insert(
                    "paths".to_string(),
                    Value::Array(
                        parse_path_args(arg)
                            .into_iter()
                            .map(Value::String)
                            .collect(),
                    ),
                );
                return intent;
            }

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == EXPORT_COMMAND.command {
                let mut intent = Intent::new(EXPORT_COMMAND.action, text);
                intent.command_args.insert(
                    "format".to_string(),
                    Value::String(if arg.is_empty() {
                        "png".to_string()
                    } else {
                        arg.to_string()
                    }),
                );
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("refine", text);
    intent.prompt = Some(raw_trimmed.to_string());
    intent
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::parse_intent;

    #[test]
    fn plain_text_refines() {
        let intent = parse_intent("  make the lettering bolder  ");
        assert_eq!(intent.action, "refine");
        assert_eq!(intent.prompt.as_deref(), Some("make the lettering bolder"));
    }

    #[test]
    fn empty_input_is_a_noop() {
        assert_eq!(parse_intent("   ").action, "noop");
    }

    #[test]
    fn setting_commands_update_settings() {
        let ratio = parse_intent("/ratio 16:9");
        assert_eq!(ratio.action, "set_ratio");
        assert_eq!(ratio.settings_update["aspect_ratio"], json!("16:9"));

        let style = parse_intent("/style minimal line art");
        assert_eq!(style.action, "set_style");
        assert_eq!(style.settings_update["style"], json!("minimal line art"));

        let graphic = parse_intent("/type sticker");
        assert_eq!(graphic.action, "set_graphic_type");
        assert_eq!(graphic.settings_update["graphic_type"], json!("sticker"));

        let palette = parse_intent("/palette ocean blues");
        assert_eq!(palette.action, "set_palette");
        assert_eq!(palette.settings_update["palette"], json!("ocean blues"));
    }

    #[test]
    fn provider_command_carries_raw_argument() {
        let intent = parse_intent("/provider imagen");
        assert_eq!(intent.action, "set_provider");
        assert_eq!(intent.command_args["provider"], json!("imagen"));
    }

    #[test]
    fn reference_command_splits_quoted_paths() {
        let intent = parse_intent("/reference \"/tmp/a b.png\" /tmp/c.png");
        assert_eq!(intent.action, "add_references");
        assert_eq!(
            intent.command_args["paths"],
            json!(["/tmp/a b.png", "/tmp/c.png"])
        );
    }

    #[test]
    fn reference_command_falls_back_on_bad_quoting() {
        let intent = parse_intent("/reference \"broken.png other.png");
        assert_eq!(
            intent.command_args["paths"],
            json!(["\"broken.png", "other.png"])
        );
    }

    #[test]
    fn export_defaults_to_png() {
        let bare = parse_intent("/export");
        assert_eq!(bare.action, "export");
        assert_eq!(bare.command_args["format"], json!("png"));

        let svg = parse_intent("/export svg");
        assert_eq!(svg.command_args["format"], json!("svg"));
    }

    #[test]
    fn no_arg_commands() {
        assert_eq!(parse_intent("/history").action, "history");
        assert_eq!(parse_intent("/help").action, "help");
    }

    #[test]
    fn unknown_command_is_reported() {
        let intent = parse_intent("/magic foo bar");
        assert_eq!(intent.action, "unknown");
        assert_eq!(intent.command_args["command"], json!("magic"));
        assert_eq!(intent.command_args["arg"], json!("foo bar"));
    }
}
