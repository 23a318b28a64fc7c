use anyhow::{Context, Result};
use setupkit_core::Version;
use std::fs;
use std::path::Path;
use tracing::debug;

use crate::layout::{VISUAL_ELEMENTS_DIR, VISUAL_ELEMENTS_MANIFEST};

pub fn escape_xml_attribute_single_quoted(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '\'' => escaped.push_str("&apos;"),
            '<' => escaped.push_str("&lt;"),
            _ => escaped.push(ch),
        }
    }
    escaped
}

pub fn render_visual_elements_manifest(display_name: &str, elements_dir: &str) -> String {
    let display_name = escape_xml_attribute_single_quoted(display_name);
    [
        "<Application>".to_string(),
        "  <VisualElements".to_string(),
        format!("      DisplayName='{display_name}'"),
        format!("      Logo='{elements_dir}\\Logo.png'"),
        format!("      SmallLogo='{elements_dir}\\SmallLogo.png'"),
        "      ForegroundText='light'".to_string(),
        "      BackgroundColor='#323232'>".to_string(),
        "    <DefaultTile ShowName='allLogos'/>".to_string(),
        format!("    <SplashScreen Image='{elements_dir}\\splash-620x300.png'/>"),
        "  </VisualElements>".to_string(),
        "</Application>".to_string(),
    ]
    .join("\r\n")
}

/// Writes the tile manifest into the staged payload when the staged version
/// ships visual elements. Returns whether a manifest was written.
pub fn create_visual_elements_manifest(
    src_path: &Path,
    version: &Version,
    display_name: &str,
) -> Result<bool> {
    let elements_dir = format!("{version}\\{VISUAL_ELEMENTS_DIR}");
    let elements_path = src_path.join(version.to_string()).join(VISUAL_ELEMENTS_DIR);
    if !elements_path.exists() {
        debug!(
            src = %src_path.display(),
            "no visual elements found, not writing {VISUAL_ELEMENTS_MANIFEST}"
        );
        return Ok(false);
    }

    let manifest_path = src_path.join(VISUAL_ELEMENTS_MANIFEST);
    let manifest = render_visual_elements_manifest(display_name, &elements_dir);
    fs::write(&manifest_path, manifest.as_bytes())
        .with_context(|| format!("failed to write {}", manifest_path.display()))?;
    debug!(path = %manifest_path.display(), "wrote visual elements manifest");
    Ok(true)
}
