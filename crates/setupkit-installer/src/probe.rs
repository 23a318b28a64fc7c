use setupkit_workitems::InUseCheck;
use std::path::Path;

/// Reports an executable as in use when a live process was started from it.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcProbe;

impl InUseCheck for ProcProbe {
    #[cfg(target_os = "linux")]
    fn is_in_use(&self, path: &Path) -> bool {
        let Ok(wanted) = path.canonicalize() else {
            return false;
        };
        let Ok(entries) = std::fs::read_dir("/proc") else {
            return false;
        };
        entries.flatten().any(|entry| {
            let pid_dir = entry.file_name();
            if !pid_dir.to_string_lossy().bytes().all(|b| b.is_ascii_digit()) {
                return false;
            }
            std::fs::read_link(entry.path().join("exe"))
                .map(|exe| exe == wanted)
                .unwrap_or(false)
        })
    }

    #[cfg(not(target_os = "linux"))]
    fn is_in_use(&self, _path: &Path) -> bool {
        false
    }
}
