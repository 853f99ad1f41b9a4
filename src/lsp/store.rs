use crate::config::Config;
use crate::language::ast::{Ast, NodeIndex, NodeTag};
use crate::lsp::document::Buffer;
use crate::lsp::offsets::OffsetEncoding;
use crate::lsp::uri::{path_to_uri, uri_to_path};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::process::Command;
use std::sync::Arc;
use tower_lsp_server::lsp_types::{TextDocumentContentChangeEvent, Uri};

/// One file under management: open in the editor, or kept alive because an
/// open file (transitively) imports it.
#[derive(Debug)]
pub struct Handle {
    pub uri: Uri,
    pub text: Arc<str>,
    pub tree: Arc<Ast>,
    pub open: bool,
    /// Import targets in lexical order, one entry per import expression.
    pub import_uris: Vec<Uri>,
    /// Number of import edges pointing at this handle from other handles.
    pub ref_count: u32,
    pub build_file: Option<Uri>,
}

/// A `build.zig` whose described package table seeds import resolution for
/// the files underneath it.
#[derive(Clone, Debug)]
pub struct BuildFile {
    pub uri: Uri,
    pub packages: HashMap<String, Uri>,
}

#[derive(Deserialize)]
struct DescribedBuild {
    #[serde(default)]
    packages: Vec<DescribedPackage>,
}

#[derive(Deserialize)]
struct DescribedPackage {
    name: String,
    path: PathBuf,
}

/// Owns every handle, keyed by URI. All mutation funnels through the
/// document lifecycle methods so the import graph refcounts stay balanced.
pub struct DocumentStore {
    handles: HashMap<Uri, Handle>,
    build_files: HashMap<Uri, BuildFile>,
    config: Arc<Config>,
    encoding: OffsetEncoding,
}

impl DocumentStore {
    pub fn new(config: Arc<Config>) -> Self {
        Self {
            handles: HashMap::new(),
            build_files: HashMap::new(),
            config,
            encoding: OffsetEncoding::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn encoding(&self) -> OffsetEncoding {
        self.encoding
    }

    /// Set once while handling `initialize`.
    pub fn set_encoding(&mut self, encoding: OffsetEncoding) {
        self.encoding = encoding;
    }

    pub fn get_handle(&self, uri: &Uri) -> Option<&Handle> {
        self.handles.get(uri)
    }

    pub fn handles(&self) -> impl Iterator<Item = &Handle> {
        self.handles.values()
    }

    pub fn build_file(&self, uri: &Uri) -> Option<&BuildFile> {
        self.build_files.get(uri)
    }

    // ----- lifecycle -----

    pub fn open_document(&mut self, uri: Uri, text: String) -> Option<&Handle> {
        if self.handles.contains_key(&uri) {
            let same = self
                .handles
                .get(&uri)
                .is_some_and(|handle| *handle.text == *text);
            if let Some(handle) = self.handles.get_mut(&uri) {
                handle.open = true;
            }
            if !same {
                self.set_text_and_reparse(&uri, text);
                self.sync_imports(&uri);
            }
            return self.handles.get(&uri);
        }

        if is_build_file(&uri) {
            self.register_build_file(uri.clone());
        }
        let build_file = self.find_build_file_on_disk(&uri);
        let tree = Arc::new(Ast::parse(&text));
        self.handles.insert(
            uri.clone(),
            Handle {
                uri: uri.clone(),
                text: text.into(),
                tree,
                open: true,
                import_uris: Vec::new(),
                ref_count: 0,
                build_file,
            },
        );
        self.sync_imports(&uri);
        self.handles.get(&uri)
    }

    pub fn close_document(&mut self, uri: &Uri) {
        if let Some(handle) = self.handles.get_mut(uri) {
            handle.open = false;
        }
        self.maybe_prune(uri.clone());
    }

    pub fn apply_changes(&mut self, uri: &Uri, changes: &[TextDocumentContentChangeEvent]) {
        let Some(handle) = self.handles.get(uri) else {
            return;
        };
        let mut buffer = Buffer::new(handle.text.to_string());
        for change in changes {
            buffer.apply(change, self.encoding);
        }
        self.set_text_and_reparse(uri, buffer.into_text());
        self.sync_imports(uri);
    }

    /// Saving a build script re-runs build discovery; for source files this
    /// is a no-op.
    pub fn apply_save(&mut self, uri: &Uri) {
        if !is_build_file(uri) {
            return;
        }
        self.register_build_file(uri.clone());
        let dependents: Vec<Uri> = self
            .handles
            .values()
            .filter(|handle| handle.build_file.as_ref() == Some(uri))
            .map(|handle| handle.uri.clone())
            .collect();
        for dependent in dependents {
            self.sync_imports(&dependent);
        }
    }

    // ----- import resolution -----

    /// Resolve an import string against the owner's build-file package
    /// table, the standard library root, or the owner's directory. Purely
    /// computes the target URI; no handle is created.
    pub fn resolve_import(&self, owner: &Handle, import: &str) -> Option<Uri> {
        if import == "std" {
            let lib = self.config.zig_lib_path.as_ref()?;
            let std_root = lib.join("std").join("std.zig");
            if std_root.is_file() {
                return path_to_uri(&std_root).ok();
            }
            return None;
        }
        if let Some(build_uri) = &owner.build_file {
            if let Some(build) = self.build_files.get(build_uri) {
                if let Some(target) = build.packages.get(import) {
                    return Some(target.clone());
                }
            }
        }
        if import.ends_with(".zig") {
            let owner_path = uri_to_path(&owner.uri).ok()?;
            let candidate = normalize_path(&owner_path.parent()?.join(import));
            if candidate.is_file() {
                return path_to_uri(&candidate).ok();
            }
        }
        None
    }

    /// Resolve an import and make sure the target is present in the store.
    /// Returns `None` (creating nothing) when the import does not resolve.
    pub fn uri_from_import(&mut self, owner_uri: &Uri, import: &str) -> Option<Uri> {
        let owner = self.handles.get(owner_uri)?;
        let target = self.resolve_import(owner, import)?;
        self.load_document(target.clone());
        Some(target)
    }

    /// Load a file from disk as a non-open handle, then load its own imports
    /// transitively. Already-present URIs are left untouched.
    fn load_document(&mut self, uri: Uri) {
        if self.handles.contains_key(&uri) {
            return;
        }
        let Ok(path) = uri_to_path(&uri) else {
            return;
        };
        let Ok(text) = fs::read_to_string(&path) else {
            return;
        };
        let build_file = self.assign_build_file(&uri);
        let tree = Arc::new(Ast::parse(&text));
        self.handles.insert(
            uri.clone(),
            Handle {
                uri: uri.clone(),
                text: text.into(),
                tree,
                open: false,
                import_uris: Vec::new(),
                ref_count: 0,
                build_file,
            },
        );
        self.sync_imports(&uri);
    }

    /// Re-scan the handle's import expressions, resolve them, and settle the
    /// refcount delta between the old and new import sets. Targets of new
    /// edges are loaded on demand; targets that lost their last edge are
    /// pruned (cascading).
    fn sync_imports(&mut self, uri: &Uri) {
        let Some(handle) = self.handles.get(uri) else {
            return;
        };
        let old_imports = handle.import_uris.clone();
        let import_strings = scan_imports(&handle.tree, &handle.text);

        let mut new_imports = Vec::new();
        for import in &import_strings {
            if let Some(target) = self.uri_from_import(uri, import) {
                new_imports.push(target);
            }
        }
        if let Some(handle) = self.handles.get_mut(uri) {
            handle.import_uris = new_imports.clone();
        }

        let mut delta: HashMap<Uri, i64> = HashMap::new();
        for target in &new_imports {
            *delta.entry(target.clone()).or_default() += 1;
        }
        for target in &old_imports {
            *delta.entry(target.clone()).or_default() -= 1;
        }
        for (target, count) in delta {
            if count > 0 {
                if let Some(handle) = self.handles.get_mut(&target) {
                    handle.ref_count += count as u32;
                }
            } else if count < 0 {
                if let Some(handle) = self.handles.get_mut(&target) {
                    handle.ref_count = handle.ref_count.saturating_sub((-count) as u32);
                }
                self.maybe_prune(target);
            }
        }
    }

    /// Destroy the handle if nothing holds it open or imports it, releasing
    /// its own import edges in post-order.
    fn maybe_prune(&mut self, uri: Uri) {
        let mut work = vec![uri];
        while let Some(uri) = work.pop() {
            let eligible = self
                .handles
                .get(&uri)
                .is_some_and(|handle| !handle.open && handle.ref_count == 0);
            if !eligible {
                continue;
            }
            let Some(removed) = self.handles.remove(&uri) else {
                continue;
            };
            for target in removed.import_uris {
                if let Some(handle) = self.handles.get_mut(&target) {
                    handle.ref_count = handle.ref_count.saturating_sub(1);
                }
                work.push(target);
            }
        }
    }

    // ----- build files -----

    fn register_build_file(&mut self, uri: Uri) {
        let packages = self.describe_build(&uri);
        self.build_files.insert(
            uri.clone(),
            BuildFile {
                uri: uri.clone(),
                packages,
            },
        );
        // adopt the new build file where it is a better (longer) match
        let assignments: Vec<(Uri, Option<Uri>)> = self
            .handles
            .keys()
            .cloned()
            .map(|handle_uri| {
                let assigned = self.longest_build_file_prefix(&handle_uri);
                (handle_uri, assigned)
            })
            .collect();
        for (handle_uri, assigned) in assignments {
            if let Some(handle) = self.handles.get_mut(&handle_uri) {
                if assigned.is_some() {
                    handle.build_file = assigned;
                }
            }
        }
    }

    fn assign_build_file(&self, uri: &Uri) -> Option<Uri> {
        self.longest_build_file_prefix(uri)
            .or_else(|| self.find_build_file_on_disk(uri))
    }

    fn longest_build_file_prefix(&self, uri: &Uri) -> Option<Uri> {
        let path = uri_to_path(uri).ok()?;
        let mut best: Option<(usize, Uri)> = None;
        for build_uri in self.build_files.keys() {
            let Ok(build_path) = uri_to_path(build_uri) else {
                continue;
            };
            let Some(root) = build_path.parent() else {
                continue;
            };
            if path.starts_with(root) {
                let depth = root.components().count();
                if best.as_ref().is_none_or(|(d, _)| depth > *d) {
                    best = Some((depth, build_uri.clone()));
                }
            }
        }
        best.map(|(_, uri)| uri)
    }

    /// Walk up from the document towards the filesystem root looking for a
    /// `build.zig` next to it.
    fn find_build_file_on_disk(&self, uri: &Uri) -> Option<Uri> {
        let path = uri_to_path(uri).ok()?;
        let mut dir = path.parent()?;
        loop {
            let candidate = dir.join("build.zig");
            if candidate.is_file() {
                return path_to_uri(&candidate).ok();
            }
            dir = dir.parent()?;
        }
    }

    /// `zig run <build_runner> -- <project dir>`, stdout is a JSON package
    /// table. Missing toolchain or runner yields an empty table.
    fn describe_build(&self, build_uri: &Uri) -> HashMap<String, Uri> {
        let mut packages = HashMap::new();
        let Some(zig) = self.config.resolved_zig_path() else {
            return packages;
        };
        let Some(runner) = self.config.build_runner_path.as_ref() else {
            return packages;
        };
        let Ok(build_path) = uri_to_path(build_uri) else {
            return packages;
        };
        let Some(project_dir) = build_path.parent() else {
            return packages;
        };
        let output = Command::new(zig)
            .arg("run")
            .arg(runner)
            .arg("--")
            .arg(project_dir)
            .output();
        let Ok(output) = output else {
            return packages;
        };
        if !output.status.success() {
            return packages;
        }
        let Ok(described) = serde_json::from_slice::<DescribedBuild>(&output.stdout) else {
            return packages;
        };
        for package in described.packages {
            let path = if package.path.is_absolute() {
                package.path
            } else {
                project_dir.join(package.path)
            };
            if let Ok(uri) = path_to_uri(&normalize_path(&path)) {
                packages.insert(package.name, uri);
            }
        }
        packages
    }

    fn set_text_and_reparse(&mut self, uri: &Uri, text: String) {
        if let Some(handle) = self.handles.get_mut(uri) {
            handle.tree = Arc::new(Ast::parse(&text));
            handle.text = text.into();
        }
    }
}

/// Import strings in lexical order, one per `@import("...")` expression.
pub fn scan_imports(tree: &Ast, text: &str) -> Vec<String> {
    let mut calls: Vec<(u32, NodeIndex)> = Vec::new();
    for index in 0..tree.node_count() as NodeIndex {
        if tree.node_tag(index) != NodeTag::BuiltinCall {
            continue;
        }
        let node = tree.node(index);
        if tree.token_source(text, node.main_token) != "@import" {
            continue;
        }
        calls.push((node.main_token, index));
    }
    calls.sort_by_key(|(token, _)| *token);
    let mut imports = Vec::new();
    for (_, index) in calls {
        let args = tree.extra_range(tree.node(index).lhs);
        let Some(&arg) = args.first() else {
            continue;
        };
        if tree.node_tag(arg) != NodeTag::StringLiteral {
            continue;
        }
        let raw = tree.token_source(text, tree.node(arg).main_token);
        let inner = raw.trim_matches('"');
        if !inner.is_empty() {
            imports.push(inner.to_string());
        }
    }
    imports
}

fn is_build_file(uri: &Uri) -> bool {
    uri_to_path(uri)
        .ok()
        .and_then(|path| path.file_name().map(|name| name == "build.zig"))
        .unwrap_or(false)
}

/// Lexically resolve `.` and `..` components so equal files get equal URIs.
fn normalize_path(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;
    use tempfile::{tempdir, TempDir};

    fn store() -> DocumentStore {
        DocumentStore::new(Arc::new(Config::default()))
    }

    fn write_fixture(dir: &TempDir, name: &str, text: &str) -> Uri {
        let path = dir.path().join(name);
        fs::write(&path, text).expect("write fixture");
        path_to_uri(&path).expect("fixture uri")
    }

    #[test]
    fn open_close_prunes_unreferenced_handles() {
        let mut store = store();
        let uri = Uri::from_str("file:///mem/main.zig").unwrap();
        store.open_document(uri.clone(), "const x = 1;".into());
        assert!(store.get_handle(&uri).is_some());
        store.close_document(&uri);
        assert!(store.get_handle(&uri).is_none());
    }

    #[test]
    fn reopen_keeps_consistent_identity() {
        let mut store = store();
        let uri = Uri::from_str("file:///mem/main.zig").unwrap();
        store.open_document(uri.clone(), "const x = 1;".into());
        store.open_document(uri.clone(), "const x = 2;".into());
        let handle = store.get_handle(&uri).expect("handle");
        assert!(handle.open);
        assert_eq!(&*handle.text, "const x = 2;");
        assert_eq!(handle.ref_count, 0);
    }

    #[test]
    fn imports_are_loaded_and_refcounted() {
        let dir = tempdir().expect("tempdir");
        let a = write_fixture(&dir, "a.zig", "pub const X = 1;");
        let b_path = dir.path().join("b.zig");
        fs::write(&b_path, "const a = @import(\"a.zig\");").expect("write b");
        let b = path_to_uri(&b_path).unwrap();

        let mut store = store();
        store.open_document(b.clone(), fs::read_to_string(&b_path).unwrap());
        let a_handle = store.get_handle(&a).expect("a loaded transitively");
        assert!(!a_handle.open);
        assert_eq!(a_handle.ref_count, 1);

        // dropping the import edge releases the handle
        store.apply_changes(
            &b,
            &[TextDocumentContentChangeEvent {
                range: None,
                range_length: None,
                text: "const x = 1;".into(),
            }],
        );
        assert!(store.get_handle(&a).is_none());
    }

    #[test]
    fn close_cascades_through_import_chain() {
        let dir = tempdir().expect("tempdir");
        write_fixture(&dir, "leaf.zig", "pub const L = 1;");
        let mid = write_fixture(&dir, "mid.zig", "const leaf = @import(\"leaf.zig\");");
        let root_path = dir.path().join("root.zig");
        fs::write(&root_path, "const mid = @import(\"mid.zig\");").expect("write root");
        let root = path_to_uri(&root_path).unwrap();

        let mut store = store();
        store.open_document(root.clone(), fs::read_to_string(&root_path).unwrap());
        assert_eq!(store.handles().count(), 3);
        store.close_document(&root);
        assert_eq!(store.handles().count(), 0);
        drop(mid);
    }

    #[test]
    fn missing_import_creates_no_handle() {
        let dir = tempdir().expect("tempdir");
        let main_path = dir.path().join("main.zig");
        fs::write(&main_path, "const gone = @import(\"gone.zig\");").expect("write main");
        let main = path_to_uri(&main_path).unwrap();

        let mut store = store();
        store.open_document(main.clone(), fs::read_to_string(&main_path).unwrap());
        assert_eq!(store.handles().count(), 1);
        let handle = store.get_handle(&main).unwrap();
        assert!(handle.import_uris.is_empty());
    }

    #[test]
    fn open_import_survives_importer_close() {
        let dir = tempdir().expect("tempdir");
        let a = write_fixture(&dir, "a.zig", "pub const X = 1;");
        let b_path = dir.path().join("b.zig");
        fs::write(&b_path, "const a = @import(\"a.zig\");").expect("write b");
        let b = path_to_uri(&b_path).unwrap();

        let mut store = store();
        store.open_document(b.clone(), fs::read_to_string(&b_path).unwrap());
        store.open_document(a.clone(), "pub const X = 1;".into());
        store.close_document(&b);
        let a_handle = store.get_handle(&a).expect("a stays open");
        assert!(a_handle.open);
        assert_eq!(a_handle.ref_count, 0);
    }

    #[test]
    fn scan_imports_preserves_lexical_order() {
        let text = "const b = @import(\"b.zig\");\nconst a = @import(\"a.zig\");";
        let tree = Ast::parse(text);
        assert_eq!(scan_imports(&tree, text), vec!["b.zig", "a.zig"]);
    }
}
