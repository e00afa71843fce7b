//! Dependency composer: turns references in authored content into nested
//! repositories, keeping `submodules` and `supermodules` consistent on both
//! sides.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use interbrain_shared::constants::DESCRIPTOR_FILE;
use interbrain_shared::{Beacon, ChangeHash, Descriptor, Rid};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::error::{InterbrainError, Result};
use crate::locks::RepoLocks;
use crate::references::{extract_references, rewrite_references, ContentKind};
use crate::retry::{bounded, with_retry};
use crate::vault::Vault;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeRef {
    pub rid: Rid,
    pub title: String,
    pub path: PathBuf,
}

/// A reference into a standalone node elsewhere in the vault.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalRef {
    pub reference: String,
    pub node: NodeRef,
}

/// A reference into a node already nested inside the owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NestedRef {
    pub reference: String,
    pub node: NodeRef,
    /// Path of the nested repository relative to the owner.
    pub submodule_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyAnalysis {
    pub content_path: PathBuf,
    pub owning_node: NodeRef,
    /// Every reference found, vault-relative, in order.
    pub declared_refs: Vec<String>,
    pub external_refs: Vec<ExternalRef>,
    pub nested_refs: Vec<NestedRef>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CompositionReport {
    pub added: Vec<Rid>,
    pub removed: Vec<Rid>,
    /// Back-references that were missing on one side and got restored.
    pub repaired: Vec<Rid>,
    pub rewritten: usize,
    pub commits: Vec<ChangeHash>,
}

pub struct DependencyComposer {
    vault: Arc<Vault>,
    locks: RepoLocks,
    retry: RetryPolicy,
    boundaries: Mutex<HashMap<PathBuf, Option<PathBuf>>>,
}

impl DependencyComposer {
    pub fn new(vault: Arc<Vault>, locks: RepoLocks, retry: RetryPolicy) -> Self {
        Self {
            vault,
            locks,
            retry,
            boundaries: Mutex::new(HashMap::new()),
        }
    }

    /// Forget memoized node boundaries, e.g. after nodes were moved.
    pub fn clear_cache(&self) {
        if let Ok(mut cache) = self.boundaries.lock() {
            cache.clear();
        }
    }

    // ------------------------------------------------------------------
    // Analysis
    // ------------------------------------------------------------------

    /// Read the references in one content file and classify each one by the
    /// node it lands in.
    pub async fn analyze_dependencies(&self, content_path: &Path) -> Result<DependencyAnalysis> {
        let content_path = self.absolute(content_path);
        let kind = ContentKind::of(&content_path).ok_or_else(|| {
            InterbrainError::InvalidInput(format!("{} is not canvas or markdown", content_path.display()))
        })?;
        let text = tokio::fs::read_to_string(&content_path).await?;
        let declared_refs = extract_references(kind, &text)?;

        let owner_dir = self
            .boundary(&content_path)?
            .ok_or_else(|| InterbrainError::NotFound(format!("no node owns {}", content_path.display())))?;
        let owning_node = self.node_at(&owner_dir).await?;

        let mut external_refs = Vec::new();
        let mut nested_refs = Vec::new();
        for reference in &declared_refs {
            let target = self.vault.root().join(reference);
            let Some(dir) = self.boundary(&target)? else {
                debug!(reference = %reference, "Reference outside any node");
                continue;
            };
            if dir == owner_dir {
                continue;
            }
            let node = match self.node_at(&dir).await {
                Ok(node) => node,
                Err(e) => {
                    warn!(reference = %reference, error = %e, "Unresolvable reference");
                    continue;
                }
            };
            match dir.strip_prefix(&owner_dir) {
                Ok(rel) => nested_refs.push(NestedRef {
                    reference: reference.clone(),
                    node,
                    submodule_path: to_slash(rel),
                }),
                Err(_) => external_refs.push(ExternalRef {
                    reference: reference.clone(),
                    node,
                }),
            }
        }

        debug!(
            owner = %owning_node.rid,
            declared = declared_refs.len(),
            external = external_refs.len(),
            nested = nested_refs.len(),
            "Analyzed dependencies"
        );
        Ok(DependencyAnalysis {
            content_path,
            owning_node,
            declared_refs,
            external_refs,
            nested_refs,
        })
    }

    fn absolute(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.vault.root().join(path)
        }
    }

    /// Nearest directory at or above `path` (inside the vault) holding a
    /// descriptor.
    fn boundary(&self, path: &Path) -> Result<Option<PathBuf>> {
        let mut cache = self
            .boundaries
            .lock()
            .map_err(|_| InterbrainError::Internal("boundary cache poisoned".into()))?;

        let root = self.vault.root();
        let mut visited = Vec::new();
        let mut found = None;
        for dir in path.ancestors() {
            if !dir.starts_with(root) || dir == root {
                break;
            }
            if let Some(known) = cache.get(dir) {
                found = known.clone();
                break;
            }
            visited.push(dir.to_path_buf());
            if dir.join(DESCRIPTOR_FILE).is_file() {
                found = Some(dir.to_path_buf());
                break;
            }
        }
        for dir in visited {
            cache.insert(dir, found.clone());
        }
        Ok(found)
    }

    async fn node_at(&self, dir: &Path) -> Result<NodeRef> {
        if let Some(record) = self.vault.find_by_path(dir)? {
            return Ok(NodeRef {
                rid: record.rid,
                title: record.title,
                path: record.path,
            });
        }
        // Nested clones are not registered; their descriptor names them.
        let descriptor = self.vault.gateway().read_descriptor(dir).await?;
        Ok(NodeRef {
            rid: descriptor.id,
            title: descriptor.title,
            path: dir.to_path_buf(),
        })
    }

    // ------------------------------------------------------------------
    // Composition
    // ------------------------------------------------------------------

    /// Import every external reference as a nested repository, drop nested
    /// repositories nothing refers to any more and bring both sides'
    /// back-references in line. Safe to re-run on a half-finished state.
    pub async fn sync_dependencies(&self, rid: &Rid, analysis: &DependencyAnalysis) -> Result<CompositionReport> {
        if &analysis.owning_node.rid != rid {
            return Err(InterbrainError::InvalidInput(format!(
                "analysis belongs to {}, not {rid}",
                analysis.owning_node.rid
            )));
        }
        let (parent_path, _) = self.vault.load_descriptor(rid).await?;
        let vcs = self.vault.gateway().vcs();
        let timeout = self.vault.timeout();

        // One entry per child, first reference wins.
        let mut children: Vec<&NodeRef> = Vec::new();
        for external in &analysis.external_refs {
            if !children.iter().any(|c| c.rid == external.node.rid) {
                children.push(&external.node);
            }
        }

        let mut existing: HashMap<Rid, String> = HashMap::new();
        for sub in bounded(timeout, vcs.list_submodules(&parent_path)).await? {
            match self.vault.gateway().read_descriptor(&parent_path.join(&sub.path)).await {
                Ok(descriptor) => {
                    existing.insert(descriptor.id, sub.path);
                }
                Err(e) => warn!(parent = %rid, path = %sub.path, error = %e, "Unreadable submodule"),
            }
        }

        let referenced: HashSet<&Rid> = children
            .iter()
            .map(|c| &c.rid)
            .chain(analysis.nested_refs.iter().map(|n| &n.node.rid))
            .collect();
        let stale: Vec<(Rid, String)> = existing
            .iter()
            .filter(|(child, _)| !referenced.contains(child))
            .map(|(child, path)| (child.clone(), path.clone()))
            .collect();

        // Listed by the parent but never imported, e.g. after an interrupted run.
        let dropped: Vec<Rid> = self
            .vault
            .gateway()
            .read_descriptor(&parent_path)
            .await?
            .submodules
            .into_iter()
            .filter(|child| !referenced.contains(child) && !existing.contains_key(child))
            .collect();

        let mut standalone: HashMap<Rid, PathBuf> = HashMap::new();
        for child in &children {
            standalone.insert(child.rid.clone(), child.path.clone());
        }
        for child in analysis
            .nested_refs
            .iter()
            .map(|n| &n.node.rid)
            .chain(stale.iter().map(|(r, _)| r))
            .chain(dropped.iter())
        {
            if let Ok(record) = self.vault.node(child) {
                standalone.insert(child.clone(), record.path);
            }
        }

        let mut paths: Vec<&Path> = standalone.values().map(PathBuf::as_path).collect();
        paths.push(&parent_path);
        let _guards = self.locks.lock_all(&paths).await?;

        let mut report = CompositionReport::default();
        let kind = ContentKind::of(&analysis.content_path);

        let owner_title = analysis.owning_node.title.as_str();
        for child in children.iter().copied() {
            let known = existing.get(&child.rid).cloned();
            let known = known.as_deref();
            let parent = parent_path.as_path();
            let label = format!("compose {} into {rid}", child.rid);
            let sub_path = with_retry(&self.retry, &label, move || {
                self.attach_child(parent, rid, owner_title, child, known)
            })
            .await?;
            existing.insert(child.rid.clone(), sub_path.clone());

            if let Some(kind) = kind {
                let mapping = self.rewrite_mapping(analysis, child, &parent_path, &sub_path);
                report.rewritten += self.rewrite_content(kind, &analysis.content_path, &mapping).await?;
            }

            let beacon = Beacon::composition(child.rid.clone(), &child.title);
            let message = beacon.commit_message(&format!("Add submodule: {}", child.title));
            if let Some(hash) = bounded(timeout, vcs.commit(&parent_path, &message)).await? {
                info!(parent = %rid, child = %child.rid, hash = %hash.short(), "Composed child");
                report.added.push(child.rid.clone());
                report.commits.push(hash);
            }
        }

        // Nested nodes must be referenced from both sides as well.
        let mut descriptor = self.vault.gateway().read_descriptor(&parent_path).await?;
        let mut parent_dirty = false;
        for nested in &analysis.nested_refs {
            let child = &nested.node.rid;
            let mut repaired = descriptor.add_child(child);
            parent_dirty |= repaired;
            if let Some(path) = standalone.get(child) {
                let label = format!("link {child} to {rid}");
                repaired |= with_retry(&self.retry, &label, move || {
                    self.link_child_side(path, child, rid, owner_title)
                })
                .await
                .map_err(|e| partial_failure(rid, child, "child side", e))?;
            }
            if repaired && !report.repaired.contains(child) {
                report.repaired.push(child.clone());
            }
        }

        for (child, sub_path) in &stale {
            bounded(timeout, vcs.remove_submodule(&parent_path, sub_path)).await?;
            parent_dirty |= descriptor.remove_child(child);
            self.detach_child_side(standalone.get(child), child, rid, owner_title).await?;
            info!(parent = %rid, child = %child, "Removed unreferenced submodule");
            report.removed.push(child.clone());
        }
        for child in &dropped {
            if !descriptor.remove_child(child) {
                continue;
            }
            parent_dirty = true;
            self.detach_child_side(standalone.get(child), child, rid, owner_title).await?;
            info!(parent = %rid, child = %child, "Dropped composition that was never imported");
            report.removed.push(child.clone());
        }

        if parent_dirty {
            self.vault.gateway().write_descriptor(&parent_path, &descriptor).await?;
        }
        if parent_dirty || !stale.is_empty() {
            if let Some(hash) = bounded(timeout, vcs.commit(&parent_path, "Update composition")).await? {
                report.commits.push(hash);
            }
        }

        if !report.commits.is_empty() && !rid.is_local_only() {
            if let Err(e) = bounded(timeout, self.vault.gateway().publish(&parent_path, rid)).await {
                warn!(rid = %rid, error = %e, "Publishing composition failed");
            }
        }
        // Nested repositories came and went.
        self.clear_cache();
        Ok(report)
    }

    /// Import one child, make it list the parent and make the parent list it.
    /// Each step is skipped when already done, so a failed attempt can simply
    /// be run again.
    async fn attach_child(
        &self,
        parent_path: &Path,
        parent: &Rid,
        parent_title: &str,
        child: &NodeRef,
        known: Option<&str>,
    ) -> Result<String> {
        let sub_path = match known {
            Some(path) => path.to_string(),
            None => self
                .import_child(parent_path, child)
                .await
                .map_err(|e| partial_failure(parent, &child.rid, "import", e))?,
        };

        self.link_child_side(&child.path, &child.rid, parent, parent_title)
            .await
            .map_err(|e| partial_failure(parent, &child.rid, "child side", e))?;

        let gateway = self.vault.gateway();
        let mut descriptor = gateway
            .read_descriptor(parent_path)
            .await
            .map_err(|e| partial_failure(parent, &child.rid, "parent side", InterbrainError::from_gateway(e)))?;
        if descriptor.add_child(&child.rid) {
            gateway
                .write_descriptor(parent_path, &descriptor)
                .await
                .map_err(|e| partial_failure(parent, &child.rid, "parent side", InterbrainError::from_gateway(e)))?;
        }
        Ok(sub_path)
    }

    async fn import_child(&self, parent_path: &Path, child: &NodeRef) -> Result<String> {
        let name = child
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| child.rid.urn_body().to_string());
        let gateway = self.vault.gateway();
        if let Ok(nested) = gateway.read_descriptor(&parent_path.join(&name)).await {
            if nested.id == child.rid {
                return Ok(name);
            }
        }
        let url = child.path.to_string_lossy().into_owned();
        bounded(self.vault.timeout(), gateway.vcs().add_submodule(parent_path, &url, &name)).await?;
        Ok(name)
    }

    /// Strip `parent` from the standalone child, if the child is here.
    async fn detach_child_side(&self, path: Option<&PathBuf>, child: &Rid, parent: &Rid, parent_title: &str) -> Result<()> {
        let Some(path) = path else {
            debug!(parent = %parent, child = %child, "Child not in the vault, only the parent side changes");
            return Ok(());
        };
        let label = format!("unlink {child} from {parent}");
        with_retry(&self.retry, &label, move || {
            self.unlink_child_side(path, child, parent, parent_title)
        })
        .await
        .map_err(|e| partial_failure(parent, child, "child side", e))?;
        Ok(())
    }

    /// Make sure the standalone child lists `parent`. Returns whether it had
    /// to be added.
    async fn link_child_side(&self, child_path: &Path, child: &Rid, parent: &Rid, parent_title: &str) -> Result<bool> {
        self.update_child(child_path, child, &format!("Add supermodule: {parent_title}"), |d| {
            d.add_parent(parent)
        })
        .await
    }

    async fn unlink_child_side(&self, child_path: &Path, child: &Rid, parent: &Rid, parent_title: &str) -> Result<bool> {
        self.update_child(child_path, child, &format!("Remove supermodule: {parent_title}"), |d| {
            d.remove_parent(parent)
        })
        .await
    }

    async fn update_child<F>(&self, child_path: &Path, child: &Rid, message: &str, change: F) -> Result<bool>
    where
        F: FnOnce(&mut Descriptor) -> bool,
    {
        let gateway = self.vault.gateway();
        let mut descriptor = gateway.read_descriptor(child_path).await?;
        if !change(&mut descriptor) {
            return Ok(false);
        }
        gateway.write_descriptor(child_path, &descriptor).await?;
        bounded(self.vault.timeout(), gateway.vcs().commit(child_path, message)).await?;
        if !child.is_local_only() {
            if let Err(e) = bounded(self.vault.timeout(), gateway.publish(child_path, child)).await {
                warn!(rid = %child, error = %e, "Publishing back-reference failed");
            }
        }
        Ok(true)
    }

    /// Map references into the standalone child onto its nested copy.
    fn rewrite_mapping(
        &self,
        analysis: &DependencyAnalysis,
        child: &NodeRef,
        parent_path: &Path,
        sub_path: &str,
    ) -> HashMap<String, String> {
        let root = self.vault.root();
        let (Ok(child_rel), Ok(parent_rel)) = (child.path.strip_prefix(root), parent_path.strip_prefix(root)) else {
            return HashMap::new();
        };
        let child_rel = to_slash(child_rel);
        let nested = format!("{}/{sub_path}", to_slash(parent_rel));

        analysis
            .external_refs
            .iter()
            .filter(|e| e.node.rid == child.rid)
            .filter_map(|e| {
                let rest = e.reference.strip_prefix(&child_rel)?;
                Some((e.reference.clone(), format!("{nested}{rest}")))
            })
            .collect()
    }

    async fn rewrite_content(&self, kind: ContentKind, path: &Path, mapping: &HashMap<String, String>) -> Result<usize> {
        if mapping.is_empty() {
            return Ok(0);
        }
        let text = tokio::fs::read_to_string(path).await?;
        match rewrite_references(kind, &text, mapping)? {
            Some(rewritten) => {
                tokio::fs::write(path, rewritten).await?;
                Ok(mapping.len())
            }
            None => Ok(0),
        }
    }
}

/// Attribute a failed step to one parent/child pair. Already attributed
/// failures pass through unchanged.
fn partial_failure(parent: &Rid, child: &Rid, step: &str, error: InterbrainError) -> InterbrainError {
    match error {
        InterbrainError::PartialCompositionFailure { .. } => error,
        other => InterbrainError::PartialCompositionFailure {
            parent: parent.clone(),
            child: child.clone(),
            reason: format!("{step}: {other}"),
        },
    }
}

fn to_slash(path: &Path) -> String {
    path.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
