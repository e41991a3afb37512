//! Editor edition detection and on-disk path layout.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use settingsync_common::{Error, Result};

/// Environment variable set by portable editor installs.
pub const PORTABLE_ENV: &str = "VSCODE_PORTABLE";

/// A build of the editor, which decides where its data lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Edition {
    Standard,
    Insiders,
    Exploration,
    Codium,
    CodiumInsiders,
    Oss,
    Coder,
    CodeServer,
    Cursor,
    Windsurf,
    Trae,
    TraeCn,
    RemoteServer,
}

impl Edition {
    pub const ALL: [Edition; 13] = [
        Edition::Standard,
        Edition::Insiders,
        Edition::Exploration,
        Edition::Codium,
        Edition::CodiumInsiders,
        Edition::Oss,
        Edition::Coder,
        Edition::CodeServer,
        Edition::Cursor,
        Edition::Windsurf,
        Edition::Trae,
        Edition::TraeCn,
        Edition::RemoteServer,
    ];

    /// Name of the per-user data directory under the platform config dir.
    pub fn data_dir_name(&self) -> &'static str {
        match self {
            Edition::Standard | Edition::Coder => "Code",
            Edition::Insiders => "Code - Insiders",
            Edition::Exploration => "Code - Exploration",
            Edition::Codium => "VSCodium",
            Edition::CodiumInsiders => "VSCodium - Insiders",
            Edition::Oss => "Code - OSS",
            Edition::CodeServer => "code-server",
            Edition::Cursor => "Cursor",
            Edition::Windsurf => "WindSurf",
            Edition::Trae => "Trae",
            Edition::TraeCn => "Trae CN",
            Edition::RemoteServer => ".vscode-server",
        }
    }

    /// Name of the dot directory in the home directory holding `extensions/`.
    pub fn extensions_dir_name(&self) -> &'static str {
        match self {
            Edition::Standard => ".vscode",
            Edition::Insiders => ".vscode-insiders",
            Edition::Exploration => ".vscode-exploration",
            Edition::Codium | Edition::Oss => ".vscode-oss",
            Edition::CodiumInsiders => ".vscodium-insiders",
            Edition::Coder => "vscode",
            Edition::CodeServer => ".local/share/code-server",
            Edition::Cursor => ".cursor",
            Edition::Windsurf => ".windsurf",
            Edition::Trae => ".trae",
            Edition::TraeCn => ".trae-cn",
            Edition::RemoteServer => ".vscode-server",
        }
    }

    /// Command-line launcher used for host-side installs.
    pub fn cli_command(&self) -> &'static str {
        match self {
            Edition::Standard | Edition::Coder | Edition::RemoteServer => "code",
            Edition::Insiders => "code-insiders",
            Edition::Exploration => "code-exploration",
            Edition::Codium => "codium",
            Edition::CodiumInsiders => "codium-insiders",
            Edition::Oss => "code-oss",
            Edition::CodeServer => "code-server",
            Edition::Cursor => "cursor",
            Edition::Windsurf => "windsurf",
            Edition::Trae | Edition::TraeCn => "trae",
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Edition::Standard => "code",
            Edition::Insiders => "insiders",
            Edition::Exploration => "exploration",
            Edition::Codium => "vscodium",
            Edition::CodiumInsiders => "vscodium-insiders",
            Edition::Oss => "code-oss",
            Edition::Coder => "coder",
            Edition::CodeServer => "code-server",
            Edition::Cursor => "cursor",
            Edition::Windsurf => "windsurf",
            Edition::Trae => "trae",
            Edition::TraeCn => "trae-cn",
            Edition::RemoteServer => "remote",
        }
    }
}

impl fmt::Display for Edition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Edition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let normalized = s.trim().to_ascii_lowercase();
        let alias = match normalized.as_str() {
            "standard" | "vscode" => Some(Edition::Standard),
            "codium" => Some(Edition::Codium),
            "oss" => Some(Edition::Oss),
            "remote-ssh" | "vscode-server" => Some(Edition::RemoteServer),
            _ => None,
        };
        alias
            .or_else(|| Edition::ALL.iter().copied().find(|e| e.as_str() == normalized))
            .ok_or_else(|| Error::InvalidInput(format!("Unknown editor edition '{}'", s)))
    }
}

/// Resolved data and extension directories for one editor install.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EditorEnvironment {
    edition: Edition,
    data_dir: PathBuf,
    extensions_dir: PathBuf,
    portable: bool,
}

impl EditorEnvironment {
    /// Detect paths for `edition` from the process environment.
    ///
    /// # Errors
    /// - Home or platform configuration directory cannot be determined
    pub fn detect(edition: Edition) -> Result<Self> {
        let home = dirs::home_dir().ok_or_else(|| {
            Error::Configuration("Cannot determine the home directory".to_string())
        })?;
        let config_dir = dirs::config_dir().ok_or_else(|| {
            Error::Configuration("Cannot determine the configuration directory".to_string())
        })?;
        let portable = std::env::var_os(PORTABLE_ENV)
            .map(PathBuf::from)
            .filter(|p| !p.as_os_str().is_empty());

        Ok(Self::resolve(edition, portable.as_deref(), &home, &config_dir))
    }

    /// Resolve paths from explicit roots.
    pub fn resolve(
        edition: Edition,
        portable: Option<&Path>,
        home: &Path,
        config_dir: &Path,
    ) -> Self {
        if let Some(root) = portable {
            return Self {
                edition,
                data_dir: root.join("user-data"),
                extensions_dir: root.join("extensions"),
                portable: true,
            };
        }

        let (data_dir, extensions_dir) = match edition {
            Edition::RemoteServer => {
                let server = home.join(".vscode-server");
                let data = first_with_settings(
                    &[server.join("data"), server.clone()],
                    server.join("data"),
                );
                let ext = first_existing(
                    &[server.join("extensions"), server.join("data").join("extensions")],
                    server.join("extensions"),
                );
                (data, ext)
            }
            Edition::CodeServer => {
                let data = first_with_settings(
                    &[
                        PathBuf::from("/config/data"),
                        home.join(".local/share/code-server"),
                        home.join(".config/code-server"),
                    ],
                    PathBuf::from("/config/data"),
                );
                let ext = first_existing(
                    &[
                        PathBuf::from("/config/extensions"),
                        home.join(".local/share/code-server/extensions"),
                        home.join(".config/code-server/extensions"),
                    ],
                    PathBuf::from("/config/extensions"),
                );
                (data, ext)
            }
            _ => (
                config_dir.join(edition.data_dir_name()),
                home.join(edition.extensions_dir_name()).join("extensions"),
            ),
        };

        Self {
            edition,
            data_dir,
            extensions_dir,
            portable: false,
        }
    }

    /// Override the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Override the extensions directory.
    pub fn with_extensions_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.extensions_dir = dir.into();
        self
    }

    pub fn edition(&self) -> Edition {
        self.edition
    }

    pub fn is_portable(&self) -> bool {
        self.portable
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn extensions_dir(&self) -> &Path {
        &self.extensions_dir
    }

    /// `<data>/User`, the live configuration directory.
    pub fn user_dir(&self) -> PathBuf {
        self.data_dir.join("User")
    }

    pub fn settings_path(&self) -> PathBuf {
        self.user_dir().join("settings.json")
    }

    pub fn snippets_dir(&self) -> PathBuf {
        self.user_dir().join("snippets")
    }

    /// Editor state database holding the disabled add-on list.
    pub fn state_db_path(&self) -> PathBuf {
        self.user_dir().join("globalStorage").join("state.vscdb")
    }

    /// Installed add-on manifest maintained by the editor.
    pub fn manifest_path(&self) -> PathBuf {
        self.extensions_dir.join("extensions.json")
    }

    /// Directories pending removal by the editor.
    pub fn obsolete_path(&self) -> PathBuf {
        self.extensions_dir.join(".obsolete")
    }
}

fn first_with_settings(candidates: &[PathBuf], fallback: PathBuf) -> PathBuf {
    candidates
        .iter()
        .find(|c| c.join("User").join("settings.json").exists())
        .cloned()
        .unwrap_or(fallback)
}

fn first_existing(candidates: &[PathBuf], fallback: PathBuf) -> PathBuf {
    candidates
        .iter()
        .find(|c| c.exists())
        .cloned()
        .unwrap_or(fallback)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_standard_layout() {
        let env = EditorEnvironment::resolve(
            Edition::Standard,
            None,
            Path::new("/home/u"),
            Path::new("/home/u/.config"),
        );
        assert_eq!(env.data_dir(), Path::new("/home/u/.config/Code"));
        assert_eq!(env.extensions_dir(), Path::new("/home/u/.vscode/extensions"));
        assert_eq!(
            env.settings_path(),
            PathBuf::from("/home/u/.config/Code/User/settings.json")
        );
        assert_eq!(
            env.manifest_path(),
            PathBuf::from("/home/u/.vscode/extensions/extensions.json")
        );
    }

    #[test]
    fn test_portable_layout() {
        let env = EditorEnvironment::resolve(
            Edition::Cursor,
            Some(Path::new("/opt/editor/data")),
            Path::new("/home/u"),
            Path::new("/home/u/.config"),
        );
        assert!(env.is_portable());
        assert_eq!(env.data_dir(), Path::new("/opt/editor/data/user-data"));
        assert_eq!(env.extensions_dir(), Path::new("/opt/editor/data/extensions"));
    }

    #[test]
    fn test_remote_server_prefers_existing_dirs() {
        let temp = TempDir::new().unwrap();
        let server = temp.path().join(".vscode-server");
        std::fs::create_dir_all(server.join("User")).unwrap();
        std::fs::write(server.join("User").join("settings.json"), "{}").unwrap();
        std::fs::create_dir_all(server.join("data").join("extensions")).unwrap();

        let env = EditorEnvironment::resolve(
            Edition::RemoteServer,
            None,
            temp.path(),
            &temp.path().join(".config"),
        );
        assert_eq!(env.data_dir(), server.as_path());
        assert_eq!(env.extensions_dir(), server.join("data").join("extensions"));
    }

    #[test]
    fn test_overrides() {
        let env = EditorEnvironment::resolve(
            Edition::Standard,
            None,
            Path::new("/h"),
            Path::new("/c"),
        )
        .with_data_dir("/d")
        .with_extensions_dir("/e");
        assert_eq!(env.user_dir(), PathBuf::from("/d/User"));
        assert_eq!(env.extensions_dir(), Path::new("/e"));
    }

    #[test]
    fn test_edition_parse() {
        assert_eq!("Cursor".parse::<Edition>().unwrap(), Edition::Cursor);
        assert_eq!("vscode".parse::<Edition>().unwrap(), Edition::Standard);
        assert_eq!("trae-cn".parse::<Edition>().unwrap(), Edition::TraeCn);
        assert!("emacs".parse::<Edition>().is_err());
        for edition in Edition::ALL {
            assert_eq!(edition.as_str().parse::<Edition>().unwrap(), edition);
        }
    }
}
