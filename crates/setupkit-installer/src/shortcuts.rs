use setupkit_core::{InstallOutcome, InstallPreferences, ProductConfig};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcutLocation {
    Desktop,
    QuickLaunch,
    StartMenu,
}

impl ShortcutLocation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Desktop => "desktop",
            Self::QuickLaunch => "quick-launch",
            Self::StartMenu => "start-menu",
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Desktop => "Desktop",
            Self::QuickLaunch => "Quick Launch",
            Self::StartMenu => "Start menu",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShortcutLevel {
    CurrentUser,
    SystemLevel,
}

impl ShortcutLevel {
    pub fn for_product(product: &ProductConfig) -> Self {
        if product.system_install {
            Self::SystemLevel
        } else {
            Self::CurrentUser
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::CurrentUser => "user",
            Self::SystemLevel => "system",
        }
    }
}

/// What to do with a single launcher file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShortcutOperation {
    CreateAlways,
    /// Rewrite the shortcut only if it is already present.
    ReplaceExisting,
}

/// How aggressively an install run creates shortcuts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallShortcutOperation {
    CreateAll,
    CreateMandatory,
    ReplaceExisting,
}

impl InstallShortcutOperation {
    pub fn for_install(prefs: &InstallPreferences, outcome: InstallOutcome) -> Self {
        if prefs.create_all_shortcuts {
            Self::CreateAll
        } else if matches!(
            outcome,
            InstallOutcome::FirstInstallSuccess | InstallOutcome::InstallRepaired
        ) {
            Self::CreateMandatory
        } else {
            Self::ReplaceExisting
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShortcutProperties {
    pub level: ShortcutLevel,
    pub executable: PathBuf,
    pub name: String,
    pub arguments: Option<String>,
    pub dual_mode: bool,
    pub pin_to_taskbar: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedShortcut {
    pub location: ShortcutLocation,
    pub operation: ShortcutOperation,
    pub properties: ShortcutProperties,
}

/// Lays out the shortcut work for one install, in execution order:
/// desktop, quick launch (plus the per-user copy on system installs),
/// then the start menu.
pub fn plan_shortcuts(
    product: &ProductConfig,
    executable: &Path,
    install_operation: InstallShortcutOperation,
    alternate_desktop_name: bool,
) -> Vec<PlannedShortcut> {
    let level = ShortcutLevel::for_product(product);
    let base = ShortcutProperties {
        level,
        executable: executable.to_path_buf(),
        name: product.name.clone(),
        arguments: None,
        dual_mode: false,
        pin_to_taskbar: false,
    };

    let mut operation = ShortcutOperation::ReplaceExisting;
    if install_operation == InstallShortcutOperation::CreateAll {
        operation = ShortcutOperation::CreateAlways;
    }

    let mut plan = Vec::with_capacity(4);

    let mut desktop = base.clone();
    if alternate_desktop_name {
        desktop.name = product.display_name(true).to_string();
    }
    plan.push(PlannedShortcut {
        location: ShortcutLocation::Desktop,
        operation,
        properties: desktop,
    });

    plan.push(PlannedShortcut {
        location: ShortcutLocation::QuickLaunch,
        operation,
        properties: base.clone(),
    });
    if level == ShortcutLevel::SystemLevel && operation == ShortcutOperation::CreateAlways {
        // The all-users quick launch entry only reaches new accounts.
        let mut user_quick_launch = base.clone();
        user_quick_launch.level = ShortcutLevel::CurrentUser;
        plan.push(PlannedShortcut {
            location: ShortcutLocation::QuickLaunch,
            operation,
            properties: user_quick_launch,
        });
    }

    if install_operation == InstallShortcutOperation::CreateMandatory {
        operation = ShortcutOperation::CreateAlways;
    }
    let mut start_menu = base;
    start_menu.dual_mode = true;
    start_menu.pin_to_taskbar = operation == ShortcutOperation::CreateAlways;
    plan.push(PlannedShortcut {
        location: ShortcutLocation::StartMenu,
        operation,
        properties: start_menu,
    });

    plan
}

pub fn describe_shortcut_operation(shortcut: &PlannedShortcut, failed: bool) -> String {
    let properties = &shortcut.properties;
    let mut message = String::new();
    if failed {
        message.push_str("Failed: ");
    }
    message.push_str(match shortcut.operation {
        ShortcutOperation::CreateAlways => "Creating ",
        ShortcutOperation::ReplaceExisting => "Overwriting ",
    });
    if failed && shortcut.operation == ShortcutOperation::ReplaceExisting {
        message.push_str("(maybe the shortcut doesn't exist?) ");
    }
    message.push_str(match properties.level {
        ShortcutLevel::CurrentUser => "per-user ",
        ShortcutLevel::SystemLevel => "all-users ",
    });
    message.push_str(shortcut.location.label());
    message.push(' ');
    message.push('"');
    message.push_str(&properties.name);
    message.push('"');
    message.push_str(" shortcut to ");
    message.push_str(&properties.executable.display().to_string());
    if let Some(arguments) = &properties.arguments {
        message.push(' ');
        message.push_str(arguments);
    }
    if properties.pin_to_taskbar {
        message.push_str(" and pinning to the taskbar.");
    } else {
        message.push('.');
    }
    message
}

pub fn launcher_file_name(name: &str) -> String {
    format!("{}.desktop", normalize_launcher_token(name))
}

pub fn render_launcher(properties: &ShortcutProperties) -> String {
    let mut desktop = String::new();
    desktop.push_str("[Desktop Entry]\n");
    desktop.push_str("Type=Application\n");
    desktop.push_str(&format!(
        "Name={}\n",
        sanitize_launcher_value(&properties.name)
    ));
    match &properties.arguments {
        Some(arguments) => desktop.push_str(&format!(
            "Exec=\"{}\" {}\n",
            properties.executable.display(),
            sanitize_launcher_value(arguments)
        )),
        None => desktop.push_str(&format!("Exec=\"{}\" %U\n", properties.executable.display())),
    }
    if properties.dual_mode {
        desktop.push_str("X-Setupkit-DualMode=true\n");
    }
    if properties.pin_to_taskbar {
        desktop.push_str("X-Setupkit-Pinned=true\n");
    }
    desktop
}

pub(crate) fn normalize_launcher_token(value: &str) -> String {
    let mut normalized = value
        .trim()
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || ch == '-' || ch == '_' || ch == '.' {
                ch
            } else {
                '_'
            }
        })
        .collect::<String>();
    if normalized.is_empty() {
        normalized.push('_');
    }
    normalized
}

fn sanitize_launcher_value(value: &str) -> String {
    value
        .chars()
        .map(|ch| if ch == '\n' || ch == '\r' { ' ' } else { ch })
        .collect::<String>()
        .trim()
        .to_string()
}
