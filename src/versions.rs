//! Binding-set layout and version resolution.
//!
//! Binding sets live under `<root>/ac<RELEASE>/b<BUILD><kind>.json`, where
//! `<kind>` is `types`, `commands` or `utilities`. The resolver picks the
//! newest release and build not exceeding the target; it never rounds up.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bindings::Bindings;
use crate::catalog::{Catalog, Class, Command};
use crate::error::VersionError;
use crate::types::{COMMAND_NAMESPACE, MIN_RELEASE};

/// A `(release, build)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Version {
    pub release: u32,
    pub build: u32,
}

impl Version {
    pub fn new(release: u32, build: u32) -> Self {
        Self { release, build }
    }

    fn validate(self) -> Result<Self, VersionError> {
        if self.release < MIN_RELEASE || self.build < 1 {
            return Err(VersionError::InvalidTarget {
                release: self.release,
                build: self.build,
            });
        }
        Ok(self)
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ac{}/b{}", self.release, self.build)
    }
}

/// The three files of a binding set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingKind {
    Types,
    Commands,
    Utilities,
}

impl BindingKind {
    pub const ALL: [BindingKind; 3] = [
        BindingKind::Types,
        BindingKind::Commands,
        BindingKind::Utilities,
    ];

    pub fn suffix(&self) -> &'static str {
        match self {
            BindingKind::Types => "types",
            BindingKind::Commands => "commands",
            BindingKind::Utilities => "utilities",
        }
    }
}

/// Contents of `b<BUILD>utilities.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BindingManifest {
    pub release: u32,
    pub build: u32,
    pub command_namespace: String,
}

/// A loaded binding set.
#[derive(Debug, Clone)]
pub struct BindingSet {
    pub version: Version,
    pub manifest: BindingManifest,
    pub bindings: Arc<Bindings>,
}

/// A directory of binding sets.
#[derive(Debug, Clone)]
pub struct ReleaseLayout {
    root: PathBuf,
}

impl ReleaseLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path of one file of a binding set.
    pub fn path_of(&self, version: Version, kind: BindingKind) -> PathBuf {
        self.release_dir(version.release)
            .join(format!("b{}{}.json", version.build, kind.suffix()))
    }

    fn release_dir(&self, release: u32) -> PathBuf {
        self.root.join(format!("ac{}", release))
    }

    /// Available releases, ascending. Directories below the minimum release
    /// are ignored.
    pub fn releases(&self) -> Result<Vec<u32>, VersionError> {
        let mut releases: Vec<u32> = read_dir(&self.root)?
            .into_iter()
            .filter(|(_, is_dir)| *is_dir)
            .filter_map(|(name, _)| name.strip_prefix("ac")?.parse().ok())
            .filter(|release| *release >= MIN_RELEASE)
            .collect();
        releases.sort_unstable();
        releases.dedup();
        Ok(releases)
    }

    /// Available builds of a release, ascending.
    pub fn builds(&self, release: u32) -> Result<Vec<u32>, VersionError> {
        let mut builds: Vec<u32> = read_dir(&self.release_dir(release))?
            .into_iter()
            .filter(|(_, is_dir)| !*is_dir)
            .filter_map(|(name, _)| parse_build(&name))
            .collect();
        builds.sort_unstable();
        builds.dedup();
        Ok(builds)
    }

    /// Pick the newest binding set at or below `target`.
    ///
    /// # Errors
    ///
    /// `InvalidTarget` for a release below 24 or build 0; `NoRelease` or
    /// `NoBuild` when every candidate is newer than the target.
    pub fn resolve(&self, target: Version) -> Result<Version, VersionError> {
        let target = target.validate()?;

        let release = self
            .releases()?
            .into_iter()
            .filter(|r| *r <= target.release)
            .max()
            .ok_or_else(|| VersionError::NoRelease {
                root: self.root.clone(),
                target: target.release,
            })?;

        let build = self
            .builds(release)?
            .into_iter()
            .filter(|b| *b <= target.build)
            .max()
            .ok_or(VersionError::NoBuild {
                release,
                target: target.build,
            })?;

        let chosen = Version::new(release, build);
        for kind in BindingKind::ALL {
            let path = self.path_of(chosen, kind);
            if !path.exists() {
                tracing::warn!(version = %chosen, missing = %path.display(), "incomplete binding set");
            }
        }
        tracing::info!(requested = %target, chosen = %chosen, "resolved binding set");
        Ok(chosen)
    }

    /// Resolve `target` and load the chosen binding set.
    pub fn load(&self, target: Version) -> Result<BindingSet, VersionError> {
        let version = self.resolve(target)?;
        self.load_exact(version)
    }

    /// Load the binding set stored for exactly `version`.
    pub fn load_exact(&self, version: Version) -> Result<BindingSet, VersionError> {
        let classes: Vec<Class> = self.read(version, BindingKind::Types)?;
        let commands: Vec<Command> = self.read(version, BindingKind::Commands)?;
        let manifest: BindingManifest = self.read(version, BindingKind::Utilities)?;

        let catalog = Catalog {
            classes,
            commands,
            warnings: Vec::new(),
        };
        let bindings = Bindings::from_catalog(catalog)
            .map_err(|e| VersionError::Load {
                path: self.release_dir(version.release),
                message: e.to_string(),
            })?
            .with_namespace(manifest.command_namespace.clone());

        Ok(BindingSet {
            version,
            manifest,
            bindings: Arc::new(bindings),
        })
    }

    /// Write a catalog as the binding set for `version`.
    pub fn write(&self, version: Version, catalog: &Catalog) -> Result<(), VersionError> {
        self.write_with_namespace(version, catalog, COMMAND_NAMESPACE)
    }

    /// Write a binding set whose commands are sent as `<namespace>.<Name>`.
    pub fn write_with_namespace(
        &self,
        version: Version,
        catalog: &Catalog,
        namespace: &str,
    ) -> Result<(), VersionError> {
        let version = version.validate()?;
        let dir = self.release_dir(version.release);
        fs::create_dir_all(&dir).map_err(|source| VersionError::Io {
            path: dir.clone(),
            source,
        })?;

        let manifest = BindingManifest {
            release: version.release,
            build: version.build,
            command_namespace: namespace.to_string(),
        };
        self.write_json(version, BindingKind::Types, &catalog.classes)?;
        self.write_json(version, BindingKind::Commands, &catalog.commands)?;
        self.write_json(version, BindingKind::Utilities, &manifest)?;
        tracing::info!(version = %version, root = %self.root.display(), "wrote binding set");
        Ok(())
    }

    fn read<T: serde::de::DeserializeOwned>(
        &self,
        version: Version,
        kind: BindingKind,
    ) -> Result<T, VersionError> {
        let path = self.path_of(version, kind);
        let content = fs::read_to_string(&path).map_err(|source| VersionError::Io {
            path: path.clone(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|e| VersionError::Load {
            path,
            message: e.to_string(),
        })
    }

    fn write_json<T: Serialize>(
        &self,
        version: Version,
        kind: BindingKind,
        value: &T,
    ) -> Result<(), VersionError> {
        let path = self.path_of(version, kind);
        let content = serde_json::to_string_pretty(value).map_err(|e| VersionError::Load {
            path: path.clone(),
            message: e.to_string(),
        })?;
        fs::write(&path, content).map_err(|source| VersionError::Io { path, source })
    }
}

/// Directory entry names with an is-directory flag.
fn read_dir(dir: &Path) -> Result<Vec<(String, bool)>, VersionError> {
    let io_err = |source| VersionError::Io {
        path: dir.to_path_buf(),
        source,
    };
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        let is_dir = entry.file_type().map_err(io_err)?.is_dir();
        if let Some(name) = entry.file_name().to_str() {
            entries.push((name.to_string(), is_dir));
        }
    }
    Ok(entries)
}

/// Build number of a `b<BUILD><kind>[.json]` file name.
fn parse_build(file_name: &str) -> Option<u32> {
    let stem = file_name.strip_suffix(".json").unwrap_or(file_name);
    let rest = stem.strip_prefix('b')?;
    BindingKind::ALL
        .iter()
        .find_map(|kind| rest.strip_suffix(kind.suffix()))
        .and_then(|digits| digits.parse().ok())
}
