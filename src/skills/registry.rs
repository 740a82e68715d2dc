//! Skill registry
//!
//! Discovers packages under the skills root, loads their logic manifests and
//! publishes the resulting capability set as an immutable snapshot. A rescan
//! builds a new snapshot and swaps it in; readers holding the previous one
//! keep a consistent view.

use super::{CapabilityLoadError, Capability, LoadContext, LogicManifest};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};

pub const DOC_FILE: &str = "doc.md";
pub const LOGIC_FILE: &str = "logic.yaml";

const PREFERENCE_LABEL: &str = "preferred brain:";

/// A discovered package directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillPackage {
    pub name: String,
    pub dir: PathBuf,
    pub has_doc: bool,
    pub has_logic: bool,
    pub preferred_model_id: Option<String>,
}

impl SkillPackage {
    pub fn doc_path(&self) -> Option<PathBuf> {
        self.has_doc.then(|| self.dir.join(DOC_FILE))
    }
}

/// A registered capability with its provenance
#[derive(Clone)]
pub struct CapabilityEntry {
    /// `<package>.<short_name>`
    pub qualified_name: String,
    pub short_name: String,
    pub package: String,
    pub handler: Arc<dyn Capability>,
    pub doc_ref: Option<PathBuf>,
    pub preferred_model_id: Option<String>,
}

impl std::fmt::Debug for CapabilityEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityEntry")
            .field("qualified_name", &self.qualified_name)
            .field("package", &self.package)
            .field("preferred_model_id", &self.preferred_model_id)
            .finish_non_exhaustive()
    }
}

#[derive(Default)]
struct Snapshot {
    packages: BTreeMap<String, SkillPackage>,
    by_short: BTreeMap<String, CapabilityEntry>,
    by_qualified: BTreeMap<String, CapabilityEntry>,
}

/// Shared handle to the live capability set. Clones share state.
#[derive(Clone)]
pub struct SkillRegistry {
    root: PathBuf,
    snapshot: Arc<RwLock<Arc<Snapshot>>>,
    scan_lock: Arc<Mutex<()>>,
}

impl SkillRegistry {
    /// Create an empty registry rooted at `root`. Nothing is loaded until
    /// the first `scan`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            snapshot: Arc::new(RwLock::new(Arc::new(Snapshot::default()))),
            scan_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Rebuild the capability set from disk and publish it.
    ///
    /// Returns the names of packages that carry documentation. A package
    /// whose logic fails to load is logged and skipped; its documentation
    /// still counts.
    pub fn scan(&self) -> BTreeSet<String> {
        let _guard = self.scan_lock.lock();

        if let Err(e) = std::fs::create_dir_all(&self.root) {
            warn!(root = %self.root.display(), error = %e, "failed to create skills root");
        }

        let mut next = Snapshot::default();
        for package in discover_packages(&self.root) {
            if package.has_logic {
                match load_logic(&self.root, &package) {
                    Ok(entries) => {
                        for entry in entries {
                            if let Some(prev) = next.by_short.get(&entry.short_name) {
                                warn!(
                                    capability = %entry.short_name,
                                    previous = %prev.package,
                                    package = %entry.package,
                                    "capability name collision, later package wins"
                                );
                            }
                            next.by_qualified
                                .insert(entry.qualified_name.clone(), entry.clone());
                            next.by_short.insert(entry.short_name.clone(), entry);
                        }
                    }
                    Err(e) => warn!(package = %package.name, error = %e.reason, "skipping skill logic"),
                }
            }
            next.packages.insert(package.name.clone(), package);
        }

        let documented: BTreeSet<String> = next
            .packages
            .values()
            .filter(|p| p.has_doc)
            .map(|p| p.name.clone())
            .collect();

        info!(
            packages = next.packages.len(),
            capabilities = next.by_short.len(),
            documented = documented.len(),
            "skill registry scanned"
        );

        *self.snapshot.write() = Arc::new(next);
        documented
    }

    fn current(&self) -> Arc<Snapshot> {
        self.snapshot.read().clone()
    }

    /// Every discovered package, sorted by name
    pub fn packages(&self) -> Vec<SkillPackage> {
        self.current().packages.values().cloned().collect()
    }

    pub fn package(&self, name: &str) -> Option<SkillPackage> {
        self.current().packages.get(name).cloned()
    }

    /// Look up by short name
    pub fn lookup(&self, short_name: &str) -> Option<CapabilityEntry> {
        self.current().by_short.get(short_name).cloned()
    }

    /// Look up by `<package>.<short_name>`
    pub fn lookup_qualified(&self, qualified_name: &str) -> Option<CapabilityEntry> {
        self.current().by_qualified.get(qualified_name).cloned()
    }

    pub fn qualified_names(&self) -> Vec<String> {
        self.current().by_qualified.keys().cloned().collect()
    }

    /// Reachable capabilities as `(short name, description)`, sorted
    pub fn capabilities(&self) -> Vec<(String, String)> {
        self.current()
            .by_short
            .iter()
            .map(|(name, entry)| (name.clone(), entry.handler.description().to_string()))
            .collect()
    }

    /// Documentation for a package (or for the package owning a capability),
    /// read on demand. Never fails: missing docs yield a sentinel message.
    pub fn get_detail(&self, skill_name: &str) -> String {
        let name = skill_name.trim();
        let snapshot = self.current();

        let package = snapshot.packages.get(name).or_else(|| {
            snapshot
                .by_qualified
                .get(name)
                .or_else(|| snapshot.by_short.get(name))
                .and_then(|entry| snapshot.packages.get(&entry.package))
        });

        let doc = package
            .and_then(SkillPackage::doc_path)
            .and_then(|path| std::fs::read_to_string(path).ok());

        match (package, doc) {
            (Some(package), Some(doc)) => {
                debug!(package = %package.name, "serving skill manual");
                format!("--- Manual for skill '{}' ---\n{}", package.name, doc.trim_end())
            }
            _ => format!("Error: no detailed manual found for skill '{}'.", name),
        }
    }

    /// Routing hint declared in a package's documentation
    pub fn preferred_model_for(&self, skill_name: &str) -> Option<String> {
        self.current()
            .packages
            .get(skill_name.trim())
            .and_then(|p| p.preferred_model_id.clone())
    }
}

/// Package directories under `root`, sorted by name
fn discover_packages(root: &Path) -> Vec<SkillPackage> {
    let entries = match std::fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(root = %root.display(), error = %e, "failed to read skills root");
            return Vec::new();
        }
    };

    let mut packages: Vec<SkillPackage> = entries
        .flatten()
        .filter(|entry| entry.path().is_dir())
        .filter_map(|entry| {
            let name = entry.file_name().to_str()?.to_string();
            if name.starts_with('.') || name.starts_with("__") {
                return None;
            }
            let dir = entry.path();
            let has_doc = dir.join(DOC_FILE).is_file();
            let has_logic = dir.join(LOGIC_FILE).is_file();
            if !has_doc && !has_logic {
                return None;
            }
            let preferred_model_id = if has_doc {
                std::fs::read_to_string(dir.join(DOC_FILE))
                    .ok()
                    .and_then(|doc| extract_preferred_model(&doc))
            } else {
                None
            };
            Some(SkillPackage {
                name,
                dir,
                has_doc,
                has_logic,
                preferred_model_id,
            })
        })
        .collect();

    packages.sort_by(|a, b| a.name.cmp(&b.name));
    packages
}

fn load_logic(root: &Path, package: &SkillPackage) -> Result<Vec<CapabilityEntry>, CapabilityLoadError> {
    let load_error = |reason: String| CapabilityLoadError {
        package: package.name.clone(),
        reason,
    };

    let manifest = LogicManifest::load(&package.dir.join(LOGIC_FILE)).map_err(load_error)?;
    let ctx = LoadContext {
        package: package.name.clone(),
        package_dir: package.dir.clone(),
        skills_root: root.to_path_buf(),
    };
    let table = manifest.instantiate(&ctx).map_err(load_error)?;

    debug!(package = %package.name, capabilities = table.len(), "loaded skill logic");

    Ok(table
        .into_iter()
        .map(|(short_name, handler)| CapabilityEntry {
            qualified_name: format!("{}.{}", package.name, short_name),
            short_name,
            package: package.name.clone(),
            handler,
            doc_ref: package.doc_path(),
            preferred_model_id: package.preferred_model_id.clone(),
        })
        .collect())
}

/// Find a `Preferred Brain: <id>` line in a package document.
///
/// The first matching line decides; the id is its first token, lowercased.
pub fn extract_preferred_model(doc: &str) -> Option<String> {
    let line = doc.lines().find_map(|line| {
        let text = line.trim_start_matches(['*', '-', '#', '>', ' ', '\t']);
        let head = text.get(..PREFERENCE_LABEL.len())?;
        head.eq_ignore_ascii_case(PREFERENCE_LABEL)
            .then(|| &text[PREFERENCE_LABEL.len()..])
    })?;

    let id = line
        .trim_start_matches(['*', '_', '`', ' ', '\t'])
        .split_whitespace()
        .next()?
        .trim_matches(|c: char| matches!(c, '*' | '_' | '`' | ',' | '.' | ';'))
        .to_ascii_lowercase();

    (!id.is_empty()).then_some(id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_package(root: &Path, name: &str, doc: Option<&str>, logic: Option<&str>) {
        let dir = root.join(name);
        std::fs::create_dir_all(&dir).unwrap();
        if let Some(doc) = doc {
            std::fs::write(dir.join(DOC_FILE), doc).unwrap();
        }
        if let Some(logic) = logic {
            std::fs::write(dir.join(LOGIC_FILE), logic).unwrap();
        }
    }

    #[test]
    fn test_extract_preferred_model() {
        assert_eq!(
            extract_preferred_model("# Files\nPreferred Brain: R1\n"),
            Some("r1".to_string())
        );
        assert_eq!(
            extract_preferred_model("- **Preferred Brain:** coder (fast)"),
            Some("coder".to_string())
        );
        assert_eq!(
            extract_preferred_model("preferred brain:   qwen2.5 "),
            Some("qwen2.5".to_string())
        );
        assert_eq!(extract_preferred_model("Preferred Brain:"), None);
        assert_eq!(extract_preferred_model("no hints here"), None);
        // First matching line wins
        assert_eq!(
            extract_preferred_model("Preferred Brain: a\nPreferred Brain: b"),
            Some("a".to_string())
        );
    }

    #[test]
    fn test_scan_returns_documented_packages() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("skills");
        write_package(&root, "until", Some("File tools\nPreferred Brain: r1"), Some("entry: local_files"));
        write_package(&root, "notes", Some("Just notes"), None);
        write_package(&root, "logic_only", None, Some("entry: local_files"));
        std::fs::create_dir_all(root.join("empty_dir")).unwrap();
        std::fs::create_dir_all(root.join("__pycache__")).unwrap();

        let registry = SkillRegistry::new(&root);
        let documented = registry.scan();

        assert_eq!(
            documented.into_iter().collect::<Vec<_>>(),
            vec!["notes".to_string(), "until".to_string()]
        );
        let names: Vec<String> = registry.packages().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["logic_only", "notes", "until"]);

        assert_eq!(registry.preferred_model_for("until"), Some("r1".to_string()));
        assert_eq!(registry.preferred_model_for("notes"), None);
    }

    #[test]
    fn test_scan_creates_missing_root() {
        let temp = TempDir::new().unwrap();
        let root = temp.path().join("not").join("yet");
        let registry = SkillRegistry::new(&root);
        assert!(registry.scan().is_empty());
        assert!(root.is_dir());
    }

    #[test]
    fn test_broken_logic_is_skipped() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "broken", Some("doc"), Some("entry: does_not_exist"));
        write_package(temp.path(), "good", None, Some("entry: local_files"));

        let registry = SkillRegistry::new(temp.path());
        let documented = registry.scan();

        assert!(documented.contains("broken"));
        assert!(registry.lookup("read_local_file").is_some());
        assert!(registry
            .qualified_names()
            .iter()
            .all(|name| name.starts_with("good.")));
    }

    #[test]
    fn test_collision_last_package_wins() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "a_files", None, Some("entry: local_files"));
        write_package(temp.path(), "b_files", None, Some("entry: local_files"));

        let registry = SkillRegistry::new(temp.path());
        registry.scan();

        assert_eq!(registry.lookup("getdate").unwrap().package, "b_files");
        // Qualified names keep both reachable
        assert_eq!(
            registry.lookup_qualified("a_files.getdate").unwrap().package,
            "a_files"
        );
        assert_eq!(
            registry.lookup_qualified("b_files.getdate").unwrap().qualified_name,
            "b_files.getdate"
        );
    }

    #[test]
    fn test_rescan_without_changes_is_stable() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "a_files", Some("# a\nPreferred Brain: coder\n"), Some("entry: local_files"));
        write_package(temp.path(), "b_files", None, Some("entry: local_files"));
        write_package(temp.path(), "notes", Some("# Notes only\n"), None);

        let registry = SkillRegistry::new(temp.path());
        let first = registry.scan();
        let names = registry.qualified_names();
        let packages = registry.packages();
        let short_owner = registry.lookup("getdate").unwrap().package;

        let second = registry.scan();
        assert_eq!(first, second);
        assert_eq!(registry.qualified_names(), names);
        assert_eq!(registry.packages(), packages);
        assert_eq!(registry.lookup("getdate").unwrap().package, short_owner);
        assert_eq!(packages.len(), 3);
    }

    #[test]
    fn test_rescan_picks_up_changes() {
        let temp = TempDir::new().unwrap();
        let registry = SkillRegistry::new(temp.path());
        registry.scan();
        assert!(registry.lookup("getdate").is_none());

        write_package(temp.path(), "until", None, Some("entry: local_files"));
        // Not visible until rescan
        assert!(registry.lookup("getdate").is_none());

        let handle = registry.clone();
        handle.scan();
        assert!(registry.lookup("getdate").is_some());

        std::fs::remove_dir_all(temp.path().join("until")).unwrap();
        registry.scan();
        assert!(registry.lookup("getdate").is_none());
        assert!(registry.capabilities().is_empty());
    }

    #[test]
    fn test_get_detail() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "until", Some("# Until\nReads files.\n"), Some("entry: local_files"));
        write_package(temp.path(), "quiet", None, Some("entry: self_learning"));

        let registry = SkillRegistry::new(temp.path());
        registry.scan();

        let detail = registry.get_detail("until");
        assert!(detail.starts_with("--- Manual for skill 'until' ---"));
        assert!(detail.contains("Reads files."));

        // A capability name finds its package's manual
        assert!(registry.get_detail("read_local_file").contains("Reads files."));
        assert!(registry.get_detail("until.getdate").contains("Reads files."));

        assert_eq!(
            registry.get_detail("quiet"),
            "Error: no detailed manual found for skill 'quiet'."
        );
        assert_eq!(
            registry.get_detail("missing"),
            "Error: no detailed manual found for skill 'missing'."
        );
    }

    #[test]
    fn test_capabilities_listing_is_sorted() {
        let temp = TempDir::new().unwrap();
        write_package(temp.path(), "until", None, Some("entry: local_files"));
        let registry = SkillRegistry::new(temp.path());
        registry.scan();

        let names: Vec<String> = registry.capabilities().into_iter().map(|(n, _)| n).collect();
        let mut sorted = names.clone();
        sorted.sort();
        assert_eq!(names, sorted);
        assert!(names.contains(&"list_files_recursive".to_string()));
    }
}
