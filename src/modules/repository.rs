//! 模块仓库
//!
//! 列表顺序稳定：先按 priority，再按声明（插入）顺序。

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::core::Stage;
use crate::modules::{Module, ModuleError};

#[derive(Debug, Clone, Default)]
pub struct ModuleFilter {
    pub stage: Option<Stage>,
    pub active_only: bool,
}

impl ModuleFilter {
    pub fn active() -> Self {
        Self {
            stage: None,
            active_only: true,
        }
    }

    pub fn stage(stage: Stage) -> Self {
        Self {
            stage: Some(stage),
            active_only: true,
        }
    }

    fn accepts(&self, module: &Module) -> bool {
        (!self.active_only || module.active)
            && self.stage.map_or(true, |s| module.stage() == Some(s))
    }
}

#[async_trait]
pub trait ModuleRepository: Send + Sync {
    async fn get(&self, name: &str) -> Option<Module>;

    async fn list(&self, filter: &ModuleFilter) -> Vec<Module>;

    /// 新增或替换同名模块（替换时保留原声明顺序）
    async fn save(&self, module: Module) -> Result<(), ModuleError>;

    async fn remove(&self, name: &str) -> Result<Module, ModuleError>;
}

#[derive(Debug, Default)]
pub struct InMemoryModuleRepository {
    inner: RwLock<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    modules: HashMap<String, (u64, Module)>,
    next_seq: u64,
}

impl InMemoryModuleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// 批量构造；名称重复时报错
    pub async fn with_modules(
        modules: impl IntoIterator<Item = Module>,
    ) -> Result<Self, ModuleError> {
        let repo = Self::new();
        {
            let mut inner = repo.inner.write().await;
            for module in modules {
                if inner.modules.contains_key(&module.name) {
                    return Err(ModuleError::Duplicate(module.name));
                }
                let seq = inner.next_seq;
                inner.next_seq += 1;
                inner.modules.insert(module.name.clone(), (seq, module));
            }
        }
        Ok(repo)
    }
}

#[async_trait]
impl ModuleRepository for InMemoryModuleRepository {
    async fn get(&self, name: &str) -> Option<Module> {
        self.inner
            .read()
            .await
            .modules
            .get(name)
            .map(|(_, m)| m.clone())
    }

    async fn list(&self, filter: &ModuleFilter) -> Vec<Module> {
        let inner = self.inner.read().await;
        let mut found: Vec<&(u64, Module)> = inner
            .modules
            .values()
            .filter(|(_, m)| filter.accepts(m))
            .collect();
        found.sort_by_key(|(seq, m)| (m.priority, *seq));
        found.into_iter().map(|(_, m)| m.clone()).collect()
    }

    async fn save(&self, module: Module) -> Result<(), ModuleError> {
        Module::validate_name(&module.name)?;
        let mut inner = self.inner.write().await;
        let seq = match inner.modules.get(&module.name) {
            Some((seq, _)) => *seq,
            None => {
                let seq = inner.next_seq;
                inner.next_seq += 1;
                seq
            }
        };
        inner.modules.insert(module.name.clone(), (seq, module));
        Ok(())
    }

    async fn remove(&self, name: &str) -> Result<Module, ModuleError> {
        self.inner
            .write()
            .await
            .modules
            .remove(name)
            .map(|(_, m)| m)
            .ok_or_else(|| ModuleError::NotFound(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ExecutionContext;

    #[tokio::test]
    async fn test_list_orders_by_priority_then_declaration() {
        let repo = InMemoryModuleRepository::with_modules(vec![
            Module::new_static("b", "B").unwrap().with_priority(1),
            Module::new_static("a", "A").unwrap().with_priority(1),
            Module::new_static("c", "C").unwrap(),
        ])
        .await
        .unwrap();
        let names: Vec<String> = repo
            .list(&ModuleFilter::default())
            .await
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["c", "b", "a"]);
    }

    #[tokio::test]
    async fn test_filter_by_stage_and_active() {
        let repo = InMemoryModuleRepository::with_modules(vec![
            Module::new_scripted("post", "x = 1", "")
                .unwrap()
                .with_context(ExecutionContext::PostResponse),
            Module::new_scripted("off", "x = 1", "")
                .unwrap()
                .with_context(ExecutionContext::PostResponse)
                .inactive(),
        ])
        .await
        .unwrap();
        let found = repo.list(&ModuleFilter::stage(Stage::Four)).await;
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].name, "post");
    }

    #[tokio::test]
    async fn test_duplicate_names_rejected() {
        let err = InMemoryModuleRepository::with_modules(vec![
            Module::new_static("a", "1").unwrap(),
            Module::new_static("a", "2").unwrap(),
        ])
        .await
        .unwrap_err();
        assert_eq!(err, ModuleError::Duplicate("a".into()));
    }
}
