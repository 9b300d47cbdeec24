// Purpose: Resolve template URIs to compiled templates, building each file
//   once and caching the result.
// Inputs/Outputs: URIs (absolute or relative to a calling template) map to
//   files under the configured directories; results are shared handles.
// Invariants: Concurrent lookups of the same URI produce one parse and one
//   compile; later callers get the cached handle.
// Gotchas: Staleness is only checked when filesystem_checks is on; a cached
//   template otherwise outlives edits to its source file.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::SystemTime;

use anyhow::{bail, Context as _};
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;

use crate::error::CompileError;
use crate::template::Template;
use crate::tree::TemplateNode;

/// Turns template source into a parse tree. The text syntax lives behind
/// this seam; trees can also be supplied directly via put_tree.
pub trait TemplateParser: Send + Sync {
    fn parse(&self, source: &str, uri: &str) -> Result<TemplateNode, CompileError>;
}

pub struct TemplateLookup {
    dirs: Vec<PathBuf>,
    parser: Arc<dyn TemplateParser>,
    filesystem_checks: bool,
    collection: RwLock<FxHashMap<String, Arc<Template>>>,
    build_lock: Mutex<()>,
}

impl TemplateLookup {
    pub fn new(dirs: Vec<PathBuf>, parser: Arc<dyn TemplateParser>) -> Arc<TemplateLookup> {
        Self::with_filesystem_checks(dirs, parser, false)
    }

    pub fn with_filesystem_checks(
        dirs: Vec<PathBuf>,
        parser: Arc<dyn TemplateParser>,
        filesystem_checks: bool,
    ) -> Arc<TemplateLookup> {
        Arc::new(TemplateLookup {
            dirs,
            parser,
            filesystem_checks,
            collection: RwLock::new(FxHashMap::default()),
            build_lock: Mutex::new(()),
        })
    }

    /// Canonicalize a URI, resolving it against the calling template's
    /// location when it is not absolute.
    pub fn adjust_uri(uri: &str, relative_to: Option<&str>) -> String {
        let combined = if uri.starts_with('/') {
            uri.to_string()
        } else {
            match relative_to {
                Some(calling) => {
                    let dir = match calling.rfind('/') {
                        Some(idx) => &calling[..idx],
                        None => "",
                    };
                    format!("{}/{}", dir, uri)
                }
                None => format!("/{}", uri),
            }
        };
        let mut parts: Vec<&str> = Vec::new();
        for part in combined.split('/') {
            match part {
                "" | "." => {}
                ".." => {
                    parts.pop();
                }
                other => parts.push(other),
            }
        }
        format!("/{}", parts.join("/"))
    }

    pub fn get_template(self: &Arc<Self>, uri: &str) -> anyhow::Result<Arc<Template>> {
        self.get_by_key(&Self::adjust_uri(uri, None))
    }

    pub(crate) fn get_template_relative(
        self: &Arc<Self>,
        uri: &str,
        calling_uri: &str,
    ) -> anyhow::Result<Arc<Template>> {
        self.get_by_key(&Self::adjust_uri(uri, Some(calling_uri)))
    }

    fn get_by_key(self: &Arc<Self>, key: &str) -> anyhow::Result<Arc<Template>> {
        if let Some(template) = self.collection.read().get(key) {
            if self.is_fresh(template) {
                return Ok(template.clone());
            }
        }
        let _guard = self.build_lock.lock();
        // another builder may have won the race while we waited
        if let Some(template) = self.collection.read().get(key) {
            if self.is_fresh(template) {
                return Ok(template.clone());
            }
        }
        let (path, source, modified) = self.load_source(key)?;
        let root = self
            .parser
            .parse(&source, key)
            .with_context(|| format!("parsing template '{}'", key))?;
        let mut template = Template::from_tree(key, &root)
            .with_context(|| format!("compiling template '{}'", key))?;
        template.filename = Some(path);
        template.last_modified = modified;
        let template = Arc::new(template);
        template.set_lookup(self);
        self.collection
            .write()
            .insert(key.to_string(), template.clone());
        Ok(template)
    }

    fn load_source(&self, key: &str) -> anyhow::Result<(PathBuf, String, Option<SystemTime>)> {
        let rel = key.trim_start_matches('/');
        for dir in &self.dirs {
            let path = dir.join(rel);
            if path.is_file() {
                let source = std::fs::read_to_string(&path)
                    .with_context(|| format!("reading template file {}", path.display()))?;
                let modified = std::fs::metadata(&path).and_then(|m| m.modified()).ok();
                return Ok((path, source, modified));
            }
        }
        bail!(
            "template '{}' not found in {} lookup director{}",
            key,
            self.dirs.len(),
            if self.dirs.len() == 1 { "y" } else { "ies" }
        );
    }

    fn is_fresh(&self, template: &Arc<Template>) -> bool {
        if !self.filesystem_checks {
            return true;
        }
        let Some(path) = &template.filename else {
            // trees registered directly have no file to go stale against
            return true;
        };
        let on_disk = std::fs::metadata(path).and_then(|m| m.modified()).ok();
        on_disk == template.last_modified && on_disk.is_some()
    }

    /// Register a parse tree under a URI, bypassing the filesystem.
    pub fn put_tree(
        self: &Arc<Self>,
        uri: &str,
        root: &TemplateNode,
    ) -> Result<Arc<Template>, CompileError> {
        let key = Self::adjust_uri(uri, None);
        let template = Arc::new(Template::from_tree(&key, root)?);
        template.set_lookup(self);
        self.collection.write().insert(key, template.clone());
        Ok(template)
    }

    /// Register an already-built template under its own URI.
    pub fn put_template(self: &Arc<Self>, template: Template) -> Arc<Template> {
        let template = Arc::new(template);
        template.set_lookup(self);
        self.collection
            .write()
            .insert(template.uri.clone(), template.clone());
        template
    }
}
