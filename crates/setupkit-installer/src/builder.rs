use setupkit_core::{ProductConfig, Version};
use setupkit_workitems::{CopyMode, Mutation, MutationEnv, MutationSequence};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::layout::VISUAL_ELEMENTS_MANIFEST;
use crate::InstallLayout;

pub const VERSION_VALUE: &str = "pv";
pub const OLD_VERSION_VALUE: &str = "opv";
pub const RENAME_COMMAND_VALUE: &str = "cmd";
pub const NAME_VALUE: &str = "name";
pub const RENAME_EXECUTABLE_SWITCH: &str = "--rename-executable";

/// Inputs for one install run.
///
/// `src_path` is the unpacked payload: a `<version>/` tree plus the product
/// executable at its top level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallRequest {
    pub src_path: PathBuf,
    pub new_version: Version,
    pub setup_path: Option<PathBuf>,
    pub archive_path: Option<PathBuf>,
    pub preferences_path: Option<PathBuf>,
}

impl InstallRequest {
    pub fn new(src_path: impl Into<PathBuf>, new_version: Version) -> Self {
        Self {
            src_path: src_path.into(),
            new_version,
            setup_path: None,
            archive_path: None,
            preferences_path: None,
        }
    }
}

/// Builds the ordered mutations that install `request.new_version` into the
/// layout's target directory.
///
/// The version pointer (`pv`) is written last so the store only names the new
/// version once every file for it is in place. Whether the running executable
/// is in use is probed once, here; the copy target and the `opv`/`cmd` values
/// both follow that single answer.
pub fn build_install_sequence(
    env: MutationEnv,
    layout: &InstallLayout,
    product: &ProductConfig,
    request: &InstallRequest,
    current_version: Option<&Version>,
) -> MutationSequence {
    let target = layout.target_path();
    let new_version = &request.new_version;
    let version_dir = layout.version_dir(new_version);
    let installer_dir = layout.installer_dir(new_version);
    let executable = layout.executable_path(product);
    let new_executable = layout.new_executable_path(product);
    let in_use = current_version.is_some() && env.is_in_use(&executable);

    let mut sequence = MutationSequence::new(env);

    // Stale reboot-time removals would delete what is about to be installed.
    sequence.push(Mutation::remove_pending_removals(target));
    sequence.push(Mutation::create_dir(target));
    sequence.push(Mutation::copy_tree(
        request.src_path.join(new_version.to_string()),
        &version_dir,
        CopyMode::Always,
    ));

    let manifest = request.src_path.join(VISUAL_ELEMENTS_MANIFEST);
    if manifest.is_file() {
        sequence.push(Mutation::copy_tree(
            manifest,
            target.join(VISUAL_ELEMENTS_MANIFEST),
            CopyMode::Always,
        ));
    }

    sequence.push(Mutation::create_dir(&installer_dir));
    for payload in [&request.setup_path, &request.archive_path]
        .into_iter()
        .flatten()
    {
        if let Some(file_name) = payload.file_name() {
            sequence.push(Mutation::copy_tree(
                payload,
                installer_dir.join(file_name),
                CopyMode::Always,
            ));
        }
    }

    sequence.push(Mutation::create_key(&product.client_key));

    let staged_executable = request.src_path.join(&product.executable);
    match current_version {
        Some(current) if in_use => {
            debug!(
                executable = %executable.display(),
                "executable in use, staging replacement under new name"
            );
            sequence.push(Mutation::copy_tree(
                staged_executable,
                &new_executable,
                CopyMode::Always,
            ));
            sequence.push(Mutation::set_value(
                &product.client_key,
                OLD_VERSION_VALUE,
                current.to_string(),
            ));
            match rename_command(layout, request) {
                Some(command) => {
                    sequence.push(Mutation::set_value(
                        &product.client_key,
                        RENAME_COMMAND_VALUE,
                        command,
                    ));
                }
                None => {
                    warn!("no setup program staged, leaving rename command unset");
                    sequence.push(Mutation::delete_value(
                        &product.client_key,
                        RENAME_COMMAND_VALUE,
                    ));
                }
            }
        }
        _ => {
            sequence.push(Mutation::copy_tree(
                staged_executable,
                &executable,
                CopyMode::Always,
            ));
            sequence.push(Mutation::delete_value(&product.client_key, OLD_VERSION_VALUE));
            sequence.push(Mutation::delete_value(
                &product.client_key,
                RENAME_COMMAND_VALUE,
            ));
            sequence.push(Mutation::delete_path(&new_executable));
        }
    }

    sequence.push(Mutation::set_value(
        &product.client_key,
        NAME_VALUE,
        product.name.as_str(),
    ));
    sequence.push(Mutation::set_value(
        &product.client_key,
        VERSION_VALUE,
        new_version.to_string(),
    ));

    sequence
}

/// Command that swaps the staged executable in once the old one exits. It
/// points at the setup program copied into the version's installer directory.
fn rename_command(layout: &InstallLayout, request: &InstallRequest) -> Option<String> {
    let name = request.setup_path.as_deref().and_then(Path::file_name)?;
    let setup = layout.installer_dir(&request.new_version).join(name);
    Some(format!(
        "\"{}\" {RENAME_EXECUTABLE_SWITCH} --target \"{}\"",
        setup.display(),
        layout.target_path().display()
    ))
}
