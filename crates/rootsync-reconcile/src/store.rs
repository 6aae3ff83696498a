use std::sync::Arc;
use tracing::{debug, error, warn};

use rootsync_core::{
    LibraryConfig, LibraryHandle, LibraryId, LibraryOp, LibraryRoots, LibraryTable, ModuleId,
    Result, RootKind, RootSyncError, WriteLock,
};

/// Configuration store adapter over one module's library table.
///
/// Reads are free. Every mutation requires the project's write scope to be held
/// by the calling thread and fails with [`RootSyncError::MutationOutsideWriteScope`]
/// otherwise.
pub struct LibraryStore {
    module: ModuleId,
    table: Arc<dyn LibraryTable>,
    write_lock: Arc<WriteLock>,
    naming: LibraryConfig,
}

impl LibraryStore {
    pub fn new(
        module: ModuleId,
        table: Arc<dyn LibraryTable>,
        write_lock: Arc<WriteLock>,
        naming: LibraryConfig,
    ) -> Self {
        Self {
            module,
            table,
            write_lock,
            naming,
        }
    }

    pub fn managed_name(&self) -> &str {
        &self.naming.name
    }

    /// All libraries the naming policy would treat as managed, in table order.
    pub fn managed_candidates(&self) -> Vec<LibraryHandle> {
        self.table
            .libraries()
            .into_iter()
            .filter(|lib| self.naming.matches(&lib.name))
            .collect()
    }

    /// First library matching the naming policy. Several matches are reported, not resolved.
    pub fn find_managed(&self) -> Option<LibraryHandle> {
        let candidates = self.managed_candidates();
        if candidates.len() > 1 {
            warn!(
                "{} libraries in module {} match managed name {:?}; using {:?}",
                candidates.len(),
                self.module,
                self.naming.name,
                candidates[0].name
            );
        }
        candidates.into_iter().next()
    }

    pub fn roots(&self, id: LibraryId) -> Result<LibraryRoots> {
        self.table
            .roots(id)
            .ok_or(RootSyncError::LibraryNotFound(id))
    }

    pub fn transaction(&self) -> Result<LibraryTransaction<'_>> {
        self.ensure_write_scope("open library transaction")?;
        Ok(LibraryTransaction {
            store: self,
            ops: Vec::new(),
            finished: false,
        })
    }

    fn ensure_write_scope(&self, action: &str) -> Result<()> {
        if self.write_lock.is_held_by_current_thread() {
            return Ok(());
        }
        error!(
            "attempted to {} for module {} without holding the write scope",
            action, self.module
        );
        Err(RootSyncError::MutationOutsideWriteScope(format!(
            "{} for module {}",
            action, self.module
        )))
    }
}

/// Buffered library mutations applied by the table as one unit on [`commit`](Self::commit).
/// Dropping without committing abandons them.
pub struct LibraryTransaction<'a> {
    store: &'a LibraryStore,
    ops: Vec<LibraryOp>,
    finished: bool,
}

impl LibraryTransaction<'_> {
    pub fn create_library(&mut self, name: &str) -> Result<LibraryId> {
        self.store.ensure_write_scope("create library")?;
        let id = LibraryId::new_v4();
        self.ops.push(LibraryOp::CreateLibrary {
            id,
            name: name.to_string(),
        });
        Ok(id)
    }

    pub fn remove_library(&mut self, id: LibraryId) -> Result<()> {
        self.store.ensure_write_scope("remove library")?;
        self.ops.push(LibraryOp::RemoveLibrary { id });
        Ok(())
    }

    /// Remove every current root, then add every desired root.
    pub fn replace_roots(
        &mut self,
        id: LibraryId,
        current: &LibraryRoots,
        desired: &LibraryRoots,
    ) -> Result<()> {
        self.store.ensure_write_scope("replace library roots")?;
        for kind in [RootKind::Classes, RootKind::Sources] {
            for url in current.get(kind) {
                self.ops.push(LibraryOp::RemoveRoot {
                    id,
                    kind,
                    url: url.clone(),
                });
            }
        }
        for kind in [RootKind::Classes, RootKind::Sources] {
            for url in desired.get(kind) {
                self.ops.push(LibraryOp::AddRoot {
                    id,
                    kind,
                    url: url.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn ops(&self) -> &[LibraryOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Apply all buffered ops. Returns the number of ops applied.
    pub fn commit(mut self) -> Result<usize> {
        self.finished = true;
        self.store.ensure_write_scope("commit library transaction")?;
        let ops = std::mem::take(&mut self.ops);
        let count = ops.len();
        if count == 0 {
            return Ok(0);
        }
        self.store.table.apply(ops)?;
        debug!("committed {} library ops in {}", count, self.store.module);
        Ok(count)
    }

    pub fn abandon(mut self) {
        self.finished = true;
        if !self.ops.is_empty() {
            debug!(
                "abandoned {} library ops in {}",
                self.ops.len(),
                self.store.module
            );
        }
    }
}

impl Drop for LibraryTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.ops.is_empty() {
            debug!(
                "library transaction for {} dropped with {} uncommitted ops",
                self.store.module,
                self.ops.len()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rootsync_core::{ModuleKind, ProjectModel, RootUrl};
    use rootsync_project::InMemoryProject;

    fn store_for(project: &Arc<InMemoryProject>, module: &str) -> LibraryStore {
        let m = project.add_module(module, ModuleKind::Java, true);
        LibraryStore::new(
            m.id_ref().clone(),
            m.table().clone(),
            project.write_lock(),
            LibraryConfig::default(),
        )
    }

    #[test]
    fn mutation_outside_write_scope_fails_loudly() {
        let project = InMemoryProject::for_tests("p");
        let store = store_for(&project, "app");
        let err = store.transaction().err().expect("transaction must be refused");
        assert!(matches!(err, RootSyncError::MutationOutsideWriteScope(_)));
        assert!(err.is_programming_error());
    }

    #[test]
    fn transaction_commits_create_and_roots_atomically() {
        let project = InMemoryProject::for_tests("p");
        let store = store_for(&project, "app");
        let lock = project.write_lock();
        let _scope = lock.acquire();

        let desired = LibraryRoots {
            classes: [RootUrl::new("/lib/foo.jar!/")].into_iter().collect(),
            sources: [RootUrl::new("/lib/foo-src")].into_iter().collect(),
        };
        let mut tx = store.transaction().unwrap();
        let id = tx.create_library(store.managed_name()).unwrap();
        tx.replace_roots(id, &LibraryRoots::default(), &desired).unwrap();
        assert_eq!(tx.commit().unwrap(), 3);

        let found = store.find_managed().unwrap();
        assert_eq!(found.id, id);
        assert_eq!(store.roots(id).unwrap(), desired);
    }

    #[test]
    fn replace_roots_removes_everything_before_adding() {
        let project = InMemoryProject::for_tests("p");
        let store = store_for(&project, "app");
        let lock = project.write_lock();
        let _scope = lock.acquire();

        let current = LibraryRoots {
            classes: [RootUrl::new("/old.jar!/")].into_iter().collect(),
            sources: Default::default(),
        };
        let desired = LibraryRoots {
            classes: [RootUrl::new("/new.jar!/")].into_iter().collect(),
            sources: Default::default(),
        };
        let id = LibraryId::new_v4();
        let mut tx = store.transaction().unwrap();
        tx.replace_roots(id, &current, &desired).unwrap();
        assert!(matches!(tx.ops()[0], LibraryOp::RemoveRoot { .. }));
        assert!(matches!(tx.ops()[1], LibraryOp::AddRoot { .. }));
        tx.abandon();
    }

    #[test]
    fn abandoned_transaction_leaves_table_untouched() {
        let project = InMemoryProject::for_tests("p");
        let m = project.add_module("app", ModuleKind::Java, true);
        let store = LibraryStore::new(
            m.id_ref().clone(),
            m.table().clone(),
            project.write_lock(),
            LibraryConfig::default(),
        );
        let lock = project.write_lock();
        let _scope = lock.acquire();
        {
            let mut tx = store.transaction().unwrap();
            tx.create_library(store.managed_name()).unwrap();
        }
        assert!(store.find_managed().is_none());
        assert_eq!(m.table().commit_count(), 0);
    }

    #[test]
    fn prefix_lookup_reports_first_of_several_matches() {
        let project = InMemoryProject::for_tests("p");
        let m = project.add_module("app", ModuleKind::Java, true);
        let user = m
            .table()
            .insert_user_library("<JavaScript metadata library> custom", LibraryRoots::default());
        m.table()
            .insert_user_library("<JavaScript metadata library> (2)", LibraryRoots::default());
        let store = LibraryStore::new(
            m.id_ref().clone(),
            m.table().clone(),
            project.write_lock(),
            LibraryConfig::default(),
        );
        assert_eq!(store.managed_candidates().len(), 2);
        assert_eq!(store.find_managed().unwrap().id, user);
    }
}
