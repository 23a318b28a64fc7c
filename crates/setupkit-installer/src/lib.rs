mod builder;
mod collaborators;
mod journal;
mod layout;
mod orchestrator;
mod probe;
mod resolver;
mod shortcuts;
mod stage;
mod visual_manifest;

pub use builder::{
    build_install_sequence, InstallRequest, NAME_VALUE, OLD_VERSION_VALUE, RENAME_COMMAND_VALUE,
    RENAME_EXECUTABLE_SWITCH, VERSION_VALUE,
};
pub use collaborators::{Collaborators, LocalCollaborators, CHANNEL_VALUE, DEFAULT_CLIENT_VALUE};
pub use journal::{
    append_journal_entry, claim_active_run, clear_active_run, current_unix_timestamp,
    new_run_id, read_active_run, read_current_stage, read_journal, read_run_metadata,
    update_run_status, write_current_stage, write_run_metadata, JournalEntry, JournalEvent,
    RunMetadata, RunStatus, RUN_METADATA_VERSION,
};
pub use layout::{
    InstallLayout, INSTALLER_DIR, MASTER_PREFERENCES_FILE, VISUAL_ELEMENTS_DIR,
    VISUAL_ELEMENTS_MANIFEST,
};
pub use orchestrator::{
    should_make_default, InstallFailure, InstallReport, InstallRun, Installer,
    NewVersionResult, StepRecord, StepResult,
};
pub use probe::ProcProbe;
pub use resolver::{check_version_order, resolve_outcome, CommitStatus, VersionOrderingViolation};
pub use shortcuts::{
    describe_shortcut_operation, launcher_file_name, plan_shortcuts, render_launcher,
    InstallShortcutOperation, PlannedShortcut, ShortcutLevel, ShortcutLocation,
    ShortcutOperation, ShortcutProperties,
};
pub use stage::{DiagnosticsSink, JournalSink, NullSink, StageTracker};
pub use visual_manifest::{
    create_visual_elements_manifest, escape_xml_attribute_single_quoted,
    render_visual_elements_manifest,
};
