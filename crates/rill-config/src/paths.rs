//! Platform-specific locations for settings and flows.
//!
//! - **User config**: `~/.config/rill/` (Linux), `~/Library/Application Support/rill/` (macOS), `%APPDATA%\rill\` (Windows)
//! - **User flows**: `<user config>/flows/`

use std::path::{Path, PathBuf};

const APP_NAME: &str = "rill";
const FLOWS_SUBDIR: &str = "flows";
const CONFIG_FILE: &str = "config.toml";

/// Returns the user-specific configuration directory.
///
/// Falls back to the current directory when the platform has none.
pub fn user_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_NAME)
}

/// Default location of the settings file.
pub fn default_config_file() -> PathBuf {
    user_config_dir().join(CONFIG_FILE)
}

/// Directory searched for flows given by bare name.
pub fn user_flows_dir() -> PathBuf {
    user_config_dir().join(FLOWS_SUBDIR)
}

/// Find a flow file by path or name.
///
/// An existing path wins; otherwise `name` and `name.toml` are looked up in
/// `search` and then in the user flows directory.
pub fn find_flow(name: &str, search: Option<&Path>) -> Option<PathBuf> {
    let direct = Path::new(name);
    if direct.is_file() {
        return Some(direct.to_path_buf());
    }
    let user = user_flows_dir();
    search
        .into_iter()
        .chain(std::iter::once(user.as_path()))
        .find_map(|dir| lookup(dir, name))
}

fn lookup(dir: &Path, name: &str) -> Option<PathBuf> {
    let exact = dir.join(name);
    if exact.is_file() {
        return Some(exact);
    }
    let with_ext = dir.join(format!("{name}.toml"));
    with_ext.is_file().then_some(with_ext)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_file_lives_under_app_dir() {
        let file = default_config_file();
        assert!(file.ends_with("rill/config.toml"));
        assert!(user_flows_dir().ends_with("rill/flows"));
    }

    #[test]
    fn finds_by_name_with_or_without_extension() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("drone.toml"), "").unwrap();

        assert_eq!(
            find_flow("drone", Some(dir.path())),
            Some(dir.path().join("drone.toml"))
        );
        assert_eq!(
            find_flow("drone.toml", Some(dir.path())),
            Some(dir.path().join("drone.toml"))
        );
        assert!(find_flow("missing-flow-name", Some(dir.path())).is_none());
    }

    #[test]
    fn existing_path_wins() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("x.toml");
        std::fs::write(&path, "").unwrap();
        assert_eq!(find_flow(path.to_str().unwrap(), None), Some(path));
    }
}
