//! Shared utility functions.

use std::path::PathBuf;

use tokio::process::Command;

/// Apply platform-specific flags so a spawned worker does not pop up a console.
/// On non-Windows platforms, this is a no-op.
#[cfg(target_os = "windows")]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    use std::os::windows::process::CommandExt;
    const CREATE_NO_WINDOW: u32 = 0x08000000;
    cmd.creation_flags(CREATE_NO_WINDOW)
}

#[cfg(not(target_os = "windows"))]
pub fn apply_creation_flags(cmd: &mut Command) -> &mut Command {
    cmd
}

/// endpoint-host 데이터 디렉토리 경로를 해석합니다.
///
/// Windows: `%APPDATA%/endpoint-host`
/// Linux/macOS: `~/.config/endpoint-host`
pub fn resolve_data_dir() -> PathBuf {
    #[cfg(target_os = "windows")]
    {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return PathBuf::from(appdata).join("endpoint-host");
        }
    }
    #[cfg(not(target_os = "windows"))]
    {
        if let Ok(home) = std::env::var("HOME") {
            return PathBuf::from(home).join(".config").join("endpoint-host");
        }
    }
    PathBuf::from(".").join("endpoint-host")
}
