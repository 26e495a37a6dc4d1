//! Host manifest registration.
//!
//! `native_messaging` writes the manifests (or registry keys on Windows) for
//! the browsers it knows. Chrome for Testing reads its own directory, so the
//! Chrome manifest is mirrored there afterwards.

use native_messaging::{install, remove, Scope};
use std::path::{Path, PathBuf};
use std::{fs, io};

pub const NATIVE_HOST_NAME: &str = "app.laserpresets.nativehost";
pub const NATIVE_HOST_DESCRIPTION: &str = "Laser Presets native messaging host";
pub const FIREFOX_EXTENSION_ID: &str = "laserpresets@laserpresets.app";
// Dev ID from the static key in the extension manifest.
pub const CHROME_EXTENSION_ORIGIN: &str = "chrome-extension://gbkhmafnkgdnncijbmdpjgdpmloefdpb/";

pub const ALL_BROWSERS: &[&str] = &[
    "chrome",
    "edge",
    "chromium",
    "brave",
    "vivaldi",
    "firefox",
    "librewolf",
];

#[cfg(target_os = "linux")]
const CHROME_DIR: Option<&str> = Some(".config/google-chrome/NativeMessagingHosts");
#[cfg(target_os = "linux")]
const MIRROR_DIRS: &[&str] = &[".config/google-chrome-for-testing/NativeMessagingHosts"];

#[cfg(target_os = "macos")]
const CHROME_DIR: Option<&str> =
    Some("Library/Application Support/Google/Chrome/NativeMessagingHosts");
#[cfg(target_os = "macos")]
const MIRROR_DIRS: &[&str] =
    &["Library/Application Support/Google/Chrome for Testing/NativeMessagingHosts"];

// Windows registrations live in the registry; nothing to mirror.
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const CHROME_DIR: Option<&str> = None;
#[cfg(not(any(target_os = "linux", target_os = "macos")))]
const MIRROR_DIRS: &[&str] = &[];

fn manifest_file() -> String {
    format!("{}.json", NATIVE_HOST_NAME)
}

/// Copy the Chrome manifest under `home` into the mirror directories.
/// Returns the files written; none when Chrome has no manifest yet.
pub fn mirror_chrome_manifest(home: &Path) -> io::Result<Vec<PathBuf>> {
    let Some(chrome_dir) = CHROME_DIR else {
        return Ok(Vec::new());
    };
    let source = home.join(chrome_dir).join(manifest_file());
    if !source.exists() {
        return Ok(Vec::new());
    }

    let content = fs::read(&source)?;
    let mut written = Vec::new();
    for dir in MIRROR_DIRS {
        let target_dir = home.join(dir);
        if let Err(e) = fs::create_dir_all(&target_dir) {
            eprintln!("Warning: could not create {}: {}", target_dir.display(), e);
            continue;
        }
        let target = target_dir.join(manifest_file());
        fs::write(&target, &content)?;
        println!("  Copied manifest to {}", target.display());
        written.push(target);
    }
    Ok(written)
}

pub fn remove_mirrors(home: &Path) -> io::Result<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for dir in MIRROR_DIRS {
        let target = home.join(dir).join(manifest_file());
        if target.exists() {
            fs::remove_file(&target)?;
            println!("  Removed {}", target.display());
            removed.push(target);
        }
    }
    Ok(removed)
}

pub fn install_all(exe_path: &Path) -> io::Result<()> {
    install(
        NATIVE_HOST_NAME,
        NATIVE_HOST_DESCRIPTION,
        exe_path,
        &[CHROME_EXTENSION_ORIGIN.to_string()],
        &[FIREFOX_EXTENSION_ID.to_string()],
        ALL_BROWSERS,
        Scope::User,
    )?;
    if let Some(home) = dirs::home_dir() {
        mirror_chrome_manifest(&home)?;
    }
    Ok(())
}

pub fn uninstall_all() -> io::Result<()> {
    remove(NATIVE_HOST_NAME, ALL_BROWSERS, Scope::User)?;
    if let Some(home) = dirs::home_dir() {
        remove_mirrors(&home)?;
    }
    Ok(())
}

#[cfg(all(test, any(target_os = "linux", target_os = "macos")))]
mod tests {
    use super::*;

    #[test]
    fn test_mirror_needs_chrome_manifest() {
        let home = tempfile::tempdir().unwrap();
        assert!(mirror_chrome_manifest(home.path()).unwrap().is_empty());
        assert!(remove_mirrors(home.path()).unwrap().is_empty());
    }

    #[test]
    fn test_mirror_copies_then_removes() {
        let home = tempfile::tempdir().unwrap();
        let chrome = home.path().join(CHROME_DIR.unwrap());
        fs::create_dir_all(&chrome).unwrap();
        fs::write(chrome.join(manifest_file()), r#"{"name":"app.laserpresets.nativehost"}"#)
            .unwrap();

        let written = mirror_chrome_manifest(home.path()).unwrap();
        assert_eq!(written.len(), MIRROR_DIRS.len());
        assert_eq!(
            fs::read_to_string(&written[0]).unwrap(),
            r#"{"name":"app.laserpresets.nativehost"}"#
        );

        let removed = remove_mirrors(home.path()).unwrap();
        assert_eq!(removed, written);
        assert!(chrome.join(manifest_file()).exists(), "Chrome's own manifest is left alone");
    }
}
