use std::io::IsTerminal;

use anstyle::{AnsiColor, Effects, Style};
use setupkit_core::Version;
use setupkit_installer::{InstallFailure, InstallReport, StepRecord, StepResult};

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum OutputStyle {
    Plain,
    Rich,
}

pub(crate) fn resolve_output_style(stdout_is_tty: bool, _stderr_is_tty: bool) -> OutputStyle {
    if stdout_is_tty {
        OutputStyle::Rich
    } else {
        OutputStyle::Plain
    }
}

pub(crate) fn current_output_style() -> OutputStyle {
    resolve_output_style(
        std::io::stdout().is_terminal(),
        std::io::stderr().is_terminal(),
    )
}

pub(crate) fn render_status_line(style: OutputStyle, status: &str, message: &str) -> String {
    match style {
        OutputStyle::Plain => message.to_string(),
        OutputStyle::Rich => format!("[{}] {message}", status.to_ascii_uppercase()),
    }
}

pub(crate) fn print_section(style: OutputStyle, title: &str) {
    if style == OutputStyle::Rich {
        println!("{}", colorize(section_style(), &format!("== {title} ==")));
    }
}

pub(crate) fn format_install_report_lines(
    report: &InstallReport,
    new_version: &Version,
    style: OutputStyle,
) -> Vec<String> {
    let outcome = report.outcome.as_str();
    let mut lines = Vec::new();
    if report.outcome.is_success() {
        lines.push(render_status_line(
            style,
            "ok",
            &format!("installed {new_version} ({outcome})"),
        ));
    } else {
        lines.push(render_status_line(
            style,
            "err",
            &format!("install of {new_version} failed ({outcome})"),
        ));
    }
    if let Some(existing) = &report.existing_version {
        lines.push(render_status_line(
            style,
            "step",
            &format!("previous version: {existing}"),
        ));
    }

    match &report.failure {
        Some(InstallFailure::Mutation {
            failed_at,
            rollback,
        }) => {
            lines.push(render_status_line(
                style,
                "err",
                &format!(
                    "mutation {} ({}) failed on {}: {}",
                    failed_at.index, failed_at.kind, failed_at.target, failed_at.source
                ),
            ));
            let positions = rollback
                .rolled_back
                .iter()
                .map(|index| index.to_string())
                .collect::<Vec<_>>();
            let positions = if positions.is_empty() {
                "none".to_string()
            } else {
                positions.join(", ")
            };
            lines.push(render_status_line(
                style,
                "step",
                &format!("rolled back: {positions}"),
            ));
            for failure in &rollback.failures {
                lines.push(render_status_line(
                    style,
                    "warn",
                    &format!(
                        "rollback of mutation {} ({}) on {} failed: {}",
                        failure.index, failure.kind, failure.target, failure.error
                    ),
                ));
            }
        }
        Some(InstallFailure::Downgrade(violation)) => {
            lines.push(render_status_line(style, "err", &violation.to_string()));
        }
        None => {}
    }

    lines.extend(format_step_lines(&report.steps, style));
    lines
}

pub(crate) fn format_step_lines(steps: &[StepRecord], style: OutputStyle) -> Vec<String> {
    let mut lines = Vec::new();
    for step in steps {
        let line = match &step.result {
            StepResult::Completed => {
                render_status_line(style, "step", &format!("{}: done", step.step.as_str()))
            }
            StepResult::Skipped => {
                render_status_line(style, "step", &format!("{}: skipped", step.step.as_str()))
            }
            StepResult::Failed(message) => render_status_line(
                style,
                "warn",
                &format!("{}: {message}", step.step.as_str()),
            ),
        };
        lines.push(line);
    }

    lines
}

fn section_style() -> Style {
    Style::new()
        .fg_color(Some(AnsiColor::BrightBlue.into()))
        .effects(Effects::BOLD)
}

fn colorize(style: Style, text: &str) -> String {
    format!("{}{}{}", style.render(), text, style.render_reset())
}
