#[derive(Clone, Copy, Debug)]
pub(crate) struct CommandSpec {
    pub command: &'static str,
    pub action: &'static str,
}

#[derive(Clone, Copy, Debug)]
pub(crate) struct SettingSpec {
    pub command: &'static str,
    pub action: &'static str,
    pub key: &'static str,
}

pub(crate) const SETTING_COMMANDS: &[SettingSpec] = &[
    SettingSpec {
        command: "ratio",
        action: "set_ratio",
        key: "aspect_ratio",
    },
    SettingSpec {
        command: "style",
        action: "set_style",
        key: "style",
    },
    SettingSpec {
        command: "type",
        action: "set_graphic_type",
        key: "graphic_type",
    },
    SettingSpec {
        command: "palette",
        action: "set_palette",
        key: "palette",
    },
];

pub(crate) const RAW_ARG_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "provider",
    action: "set_provider",
}];

pub(crate) const MULTI_PATH_COMMANDS: &[CommandSpec] = &[CommandSpec {
    command: "reference",
    action: "add_references",
}];

pub(crate) const NO_ARG_COMMANDS: &[CommandSpec] = &[
    CommandSpec {
        command: "history",
        action: "history",
    },
    CommandSpec {
        command: "help",
        action: "help",
    },
];

pub(crate) const EXPORT_COMMAND: CommandSpec = CommandSpec {
    command: "export",
    action: "export",
};

pub const CHAT_HELP_COMMANDS: &[&str] = &[
    "/ratio",
    "/style",
    "/type",
    "/palette",
    "/provider",
    "/reference",
    "/export",
    "/history",
    "/help",
];
