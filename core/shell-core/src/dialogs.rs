//! Native dialog host.
//!
//! The bridge only ever reaches the OS through [`DialogHost`]. The default
//! implementation drives the platform's own dialog tool: `osascript` on macOS
//! and `zenity` on Linux. Each call blocks the calling thread until the user
//! dismisses the dialog.

#![cfg_attr(not(any(target_os = "macos", target_os = "linux")), allow(dead_code))]

use std::process::{Command, Output};

use deskshell_bridge_protocol::{
    MessageDialogOptions, MessageDialogResult, MessageKind, OpenDialogOptions, OpenDialogProperty,
    OpenDialogResult, SaveDialogOptions, SaveDialogResult,
};

use crate::error::{HostError, Result};

pub trait DialogHost: Send + Sync {
    fn open_file(&self, options: &OpenDialogOptions) -> Result<OpenDialogResult>;
    fn save_file(&self, options: &SaveDialogOptions) -> Result<SaveDialogResult>;
    fn message(&self, options: &MessageDialogOptions) -> Result<MessageDialogResult>;
}

/// Dialogs implemented by shelling out to the platform dialog tool.
#[derive(Debug, Default, Clone)]
pub struct CommandDialogs;

impl DialogHost for CommandDialogs {
    fn open_file(&self, options: &OpenDialogOptions) -> Result<OpenDialogResult> {
        #[cfg(target_os = "macos")]
        {
            macos::open_file(options)
        }

        #[cfg(target_os = "linux")]
        {
            linux::open_file(options)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = options;
            Err(HostError::UnsupportedPlatform("open file dialog".to_string()))
        }
    }

    fn save_file(&self, options: &SaveDialogOptions) -> Result<SaveDialogResult> {
        #[cfg(target_os = "macos")]
        {
            macos::save_file(options)
        }

        #[cfg(target_os = "linux")]
        {
            linux::save_file(options)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = options;
            Err(HostError::UnsupportedPlatform("save file dialog".to_string()))
        }
    }

    fn message(&self, options: &MessageDialogOptions) -> Result<MessageDialogResult> {
        #[cfg(target_os = "macos")]
        {
            macos::message(options)
        }

        #[cfg(target_os = "linux")]
        {
            linux::message(options)
        }

        #[cfg(not(any(target_os = "macos", target_os = "linux")))]
        {
            let _ = options;
            Err(HostError::UnsupportedPlatform("message dialog".to_string()))
        }
    }
}

fn run_dialog(command: &mut Command, name: &str) -> Result<Output> {
    command.output().map_err(|err| HostError::CommandFailed {
        command: name.to_string(),
        details: err.to_string(),
    })
}

fn stdout_lines(output: &Output) -> Vec<String> {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect()
}

/// Index the user picked, falling back to the cancel (or last) button.
fn cancel_index(options: &MessageDialogOptions) -> usize {
    options
        .cancel_id
        .unwrap_or_else(|| options.effective_buttons().len().saturating_sub(1))
}

fn button_index(options: &MessageDialogOptions, label: &str) -> Option<usize> {
    options
        .effective_buttons()
        .iter()
        .position(|button| button == label)
}

#[cfg(any(target_os = "linux", test))]
mod linux {
    use super::*;

    const ZENITY: &str = "zenity";
    const CANCELED_EXIT_CODE: i32 = 1;

    pub(super) fn open_file_args(options: &OpenDialogOptions) -> Vec<String> {
        let mut args = vec!["--file-selection".to_string()];
        push_common(&mut args, options.title.as_deref(), options.default_path.as_deref());
        if options.has_property(OpenDialogProperty::OpenDirectory) {
            args.push("--directory".to_string());
        }
        if options.has_property(OpenDialogProperty::MultiSelections) {
            args.push("--multiple".to_string());
            args.push("--separator=\n".to_string());
        }
        for filter in &options.filters {
            let patterns: Vec<String> = filter
                .extensions
                .iter()
                .map(|ext| format!("*.{}", ext.trim_start_matches('.')))
                .collect();
            args.push(format!("--file-filter={} | {}", filter.name, patterns.join(" ")));
        }
        args
    }

    pub(super) fn save_file_args(options: &SaveDialogOptions) -> Vec<String> {
        let mut args = vec![
            "--file-selection".to_string(),
            "--save".to_string(),
            "--confirm-overwrite".to_string(),
        ];
        push_common(&mut args, options.title.as_deref(), options.default_path.as_deref());
        args
    }

    pub(super) fn message_args(options: &MessageDialogOptions) -> Vec<String> {
        let buttons = options.effective_buttons();
        let mut args = Vec::new();
        if buttons.len() > 1 {
            args.push("--question".to_string());
            args.push(format!("--ok-label={}", buttons[0]));
            args.push(format!("--cancel-label={}", buttons[1]));
            for extra in &buttons[2..] {
                args.push(format!("--extra-button={}", extra));
            }
        } else {
            let kind = match options.kind {
                MessageKind::Error => "--error",
                MessageKind::Warning => "--warning",
                _ => "--info",
            };
            args.push(kind.to_string());
        }
        if let Some(title) = &options.title {
            args.push(format!("--title={}", title));
        }
        let text = match &options.detail {
            Some(detail) => format!("{}\n\n{}", options.message, detail),
            None => options.message.clone(),
        };
        args.push(format!("--text={}", text));
        args
    }

    fn push_common(args: &mut Vec<String>, title: Option<&str>, default_path: Option<&str>) {
        if let Some(title) = title {
            args.push(format!("--title={}", title));
        }
        if let Some(path) = default_path {
            args.push(format!("--filename={}", path));
        }
    }

    #[cfg_attr(test, allow(dead_code))]
    pub(super) fn open_file(options: &OpenDialogOptions) -> Result<OpenDialogResult> {
        let output = run_dialog(Command::new(ZENITY).args(open_file_args(options)), ZENITY)?;
        if !output.status.success() {
            return canceled_or_failed(&output).map(|()| OpenDialogResult {
                canceled: true,
                file_paths: Vec::new(),
            });
        }
        Ok(OpenDialogResult {
            canceled: false,
            file_paths: stdout_lines(&output),
        })
    }

    #[cfg_attr(test, allow(dead_code))]
    pub(super) fn save_file(options: &SaveDialogOptions) -> Result<SaveDialogResult> {
        let output = run_dialog(Command::new(ZENITY).args(save_file_args(options)), ZENITY)?;
        if !output.status.success() {
            return canceled_or_failed(&output).map(|()| SaveDialogResult {
                canceled: true,
                file_path: None,
            });
        }
        Ok(SaveDialogResult {
            canceled: false,
            file_path: stdout_lines(&output).into_iter().next(),
        })
    }

    #[cfg_attr(test, allow(dead_code))]
    pub(super) fn message(options: &MessageDialogOptions) -> Result<MessageDialogResult> {
        let output = run_dialog(Command::new(ZENITY).args(message_args(options)), ZENITY)?;
        if output.status.success() {
            return Ok(MessageDialogResult { response: 0 });
        }

        // Extra buttons print their label and exit non-zero.
        if let Some(label) = stdout_lines(&output).first() {
            if let Some(index) = button_index(options, label) {
                return Ok(MessageDialogResult { response: index });
            }
        }
        canceled_or_failed(&output)?;
        let response = if options.effective_buttons().len() > 1 {
            1
        } else {
            cancel_index(options)
        };
        Ok(MessageDialogResult { response })
    }

    fn canceled_or_failed(output: &Output) -> Result<()> {
        if output.status.code() == Some(CANCELED_EXIT_CODE) {
            return Ok(());
        }
        Err(HostError::CommandFailed {
            command: ZENITY.to_string(),
            details: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

#[cfg(any(target_os = "macos", test))]
mod macos {
    use super::*;

    const OSASCRIPT: &str = "osascript";
    /// AppleScript "User canceled." error number.
    const USER_CANCELED: &str = "-128";

    pub(super) fn quote(value: &str) -> String {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    }

    pub(super) fn open_file_script(options: &OpenDialogOptions) -> String {
        let chooser = if options.has_property(OpenDialogProperty::OpenDirectory) {
            "choose folder"
        } else {
            "choose file"
        };
        let mut script = format!("set picked to {}", chooser);
        if let Some(title) = &options.title {
            script.push_str(&format!(" with prompt {}", quote(title)));
        }
        if let Some(path) = &options.default_path {
            script.push_str(&format!(" default location (POSIX file {})", quote(path)));
        }
        if options.has_property(OpenDialogProperty::MultiSelections) {
            script.push_str(" with multiple selections allowed");
        }
        if options.has_property(OpenDialogProperty::ShowHiddenFiles) {
            script.push_str(" with invisibles");
        }
        script.push_str(
            "\nset out to \"\"\nrepeat with f in (picked as list)\n\
             set out to out & POSIX path of f & linefeed\nend repeat\nreturn out",
        );
        script
    }

    pub(super) fn save_file_script(options: &SaveDialogOptions) -> String {
        let mut script = "POSIX path of (choose file name".to_string();
        if let Some(title) = &options.title {
            script.push_str(&format!(" with prompt {}", quote(title)));
        }
        if let Some(path) = &options.default_path {
            let name = std::path::Path::new(path)
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if !name.is_empty() {
                script.push_str(&format!(" default name {}", quote(&name)));
            }
        }
        script.push(')');
        script
    }

    pub(super) fn message_script(options: &MessageDialogOptions) -> String {
        let buttons = options.effective_buttons();
        let labels: Vec<String> = buttons.iter().map(|b| quote(b)).collect();
        let text = match &options.detail {
            Some(detail) => format!("{}\n\n{}", options.message, detail),
            None => options.message.clone(),
        };
        let mut script = format!(
            "display dialog {} buttons {{{}}}",
            quote(&text),
            labels.join(", ")
        );
        if let Some(title) = &options.title {
            script.push_str(&format!(" with title {}", quote(title)));
        }
        script.push_str(&format!(
            " default button {}",
            options.default_id.unwrap_or(0) + 1
        ));
        if let Some(cancel) = options.cancel_id {
            script.push_str(&format!(" cancel button {}", cancel + 1));
        }
        let icon = match options.kind {
            MessageKind::Error => Some("stop"),
            MessageKind::Warning => Some("caution"),
            MessageKind::Info | MessageKind::Question => Some("note"),
            MessageKind::None => None,
        };
        if let Some(icon) = icon {
            script.push_str(&format!(" with icon {}", icon));
        }
        script
    }

    fn run_script(script: &str) -> Result<Output> {
        run_dialog(Command::new(OSASCRIPT).arg("-e").arg(script), OSASCRIPT)
    }

    fn was_canceled(output: &Output) -> Result<()> {
        let stderr = String::from_utf8_lossy(&output.stderr);
        if stderr.contains(USER_CANCELED) {
            return Ok(());
        }
        Err(HostError::CommandFailed {
            command: OSASCRIPT.to_string(),
            details: stderr.trim().to_string(),
        })
    }

    #[cfg_attr(test, allow(dead_code))]
    pub(super) fn open_file(options: &OpenDialogOptions) -> Result<OpenDialogResult> {
        let output = run_script(&open_file_script(options))?;
        if !output.status.success() {
            return was_canceled(&output).map(|()| OpenDialogResult {
                canceled: true,
                file_paths: Vec::new(),
            });
        }
        Ok(OpenDialogResult {
            canceled: false,
            file_paths: stdout_lines(&output),
        })
    }

    #[cfg_attr(test, allow(dead_code))]
    pub(super) fn save_file(options: &SaveDialogOptions) -> Result<SaveDialogResult> {
        let output = run_script(&save_file_script(options))?;
        if !output.status.success() {
            return was_canceled(&output).map(|()| SaveDialogResult {
                canceled: true,
                file_path: None,
            });
        }
        Ok(SaveDialogResult {
            canceled: false,
            file_path: stdout_lines(&output).into_iter().next(),
        })
    }

    #[cfg_attr(test, allow(dead_code))]
    pub(super) fn message(options: &MessageDialogOptions) -> Result<MessageDialogResult> {
        let output = run_script(&message_script(options))?;
        if !output.status.success() {
            was_canceled(&output)?;
            return Ok(MessageDialogResult {
                response: cancel_index(options),
            });
        }

        // "button returned:Delete"
        let stdout = String::from_utf8_lossy(&output.stdout);
        let label = stdout
            .trim()
            .strip_prefix("button returned:")
            .unwrap_or_default();
        Ok(MessageDialogResult {
            response: button_index(options, label).unwrap_or(0),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use deskshell_bridge_protocol::FileFilter;

    fn message_options(buttons: &[&str]) -> MessageDialogOptions {
        MessageDialogOptions {
            message: "Export finished".to_string(),
            kind: MessageKind::Info,
            title: Some("Exports".to_string()),
            detail: None,
            buttons: buttons.iter().map(|b| b.to_string()).collect(),
            default_id: None,
            cancel_id: None,
        }
    }

    #[test]
    fn zenity_open_args_map_properties_and_filters() {
        let options = OpenDialogOptions {
            title: Some("Import".to_string()),
            filters: vec![FileFilter {
                name: "Videos".to_string(),
                extensions: vec!["mp4".to_string(), ".mkv".to_string()],
            }],
            properties: vec![OpenDialogProperty::MultiSelections],
            ..Default::default()
        };
        let args = linux::open_file_args(&options);
        assert!(args.contains(&"--title=Import".to_string()));
        assert!(args.contains(&"--multiple".to_string()));
        assert!(args.contains(&"--file-filter=Videos | *.mp4 *.mkv".to_string()));
        assert!(!args.contains(&"--directory".to_string()));
    }

    #[test]
    fn zenity_save_args_confirm_overwrite() {
        let args = linux::save_file_args(&SaveDialogOptions {
            default_path: Some("/tmp/report.pdf".to_string()),
            ..Default::default()
        });
        assert_eq!(args[..3], ["--file-selection", "--save", "--confirm-overwrite"]);
        assert!(args.contains(&"--filename=/tmp/report.pdf".to_string()));
    }

    #[test]
    fn zenity_message_uses_question_for_multiple_buttons() {
        let args = linux::message_args(&message_options(&["Open", "Close", "Reveal"]));
        assert_eq!(args[0], "--question");
        assert!(args.contains(&"--ok-label=Open".to_string()));
        assert!(args.contains(&"--cancel-label=Close".to_string()));
        assert!(args.contains(&"--extra-button=Reveal".to_string()));

        let single = linux::message_args(&message_options(&[]));
        assert_eq!(single[0], "--info");
    }

    #[test]
    fn applescript_quotes_are_escaped() {
        assert_eq!(macos::quote(r#"say "hi" \ bye"#), r#""say \"hi\" \\ bye""#);
    }

    #[test]
    fn applescript_message_lists_buttons_and_cancel() {
        let mut options = message_options(&["Delete", "Cancel"]);
        options.kind = MessageKind::Warning;
        options.cancel_id = Some(1);
        let script = macos::message_script(&options);
        assert!(script.contains(r#"buttons {"Delete", "Cancel"}"#));
        assert!(script.contains("cancel button 2"));
        assert!(script.contains("with icon caution"));
    }

    #[test]
    fn applescript_open_supports_folders() {
        let options = OpenDialogOptions {
            properties: vec![OpenDialogProperty::OpenDirectory],
            ..Default::default()
        };
        assert!(macos::open_file_script(&options).starts_with("set picked to choose folder"));
    }

    #[test]
    fn applescript_save_uses_file_name_of_default_path() {
        let script = macos::save_file_script(&SaveDialogOptions {
            default_path: Some("/Users/me/exports/summary.xlsx".to_string()),
            ..Default::default()
        });
        assert!(script.contains(r#"default name "summary.xlsx""#));
    }

    #[test]
    fn cancel_index_defaults_to_last_button() {
        assert_eq!(cancel_index(&message_options(&["Yes", "No"])), 1);
        assert_eq!(cancel_index(&message_options(&[])), 0);
    }
}
