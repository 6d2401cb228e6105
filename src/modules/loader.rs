//! 模块目录加载器
//!
//! 从 config/modules/ 读取 `*.toml`，每个文件一个 `[module]` 表。
//! 单个文件解析失败只告警并跳过，不影响其余模块。

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::core::ExecutionContext;
use crate::modules::{Module, ModuleError, ModuleRepository};

/// `[module]` 表
#[derive(Debug, Clone, Deserialize)]
pub struct ModuleToml {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub script: Option<String>,
    /// 相对于模块文件所在目录的脚本路径（与 script 二选一）
    #[serde(default)]
    pub script_file: Option<PathBuf>,
    #[serde(default)]
    pub trigger: Option<String>,
    #[serde(default)]
    pub execution_context: ExecutionContext,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct ModuleFile {
    module: ModuleToml,
}

pub struct ModuleLoader {
    modules_dir: PathBuf,
}

impl ModuleLoader {
    pub fn new(modules_dir: impl AsRef<Path>) -> Self {
        Self {
            modules_dir: modules_dir.as_ref().to_path_buf(),
        }
    }

    /// 依次尝试 config/modules、../config/modules
    pub fn from_default() -> Self {
        let dirs = [
            PathBuf::from("config/modules"),
            PathBuf::from("../config/modules"),
        ];
        let modules_dir = dirs
            .into_iter()
            .find(|d| d.exists())
            .unwrap_or_else(|| PathBuf::from("config/modules"));
        Self::new(modules_dir)
    }

    pub fn dir(&self) -> &Path {
        &self.modules_dir
    }

    /// 加载目录下所有模块，按文件名排序以保证声明顺序稳定
    pub fn load_all(&self) -> anyhow::Result<Vec<Module>> {
        if !self.modules_dir.exists() {
            tracing::debug!(dir = %self.modules_dir.display(), "module directory missing");
            return Ok(Vec::new());
        }

        let mut paths: Vec<PathBuf> = std::fs::read_dir(&self.modules_dir)?
            .flatten()
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut modules = Vec::new();
        for path in paths {
            match load_module_file(&path) {
                Ok(module) => {
                    if modules.iter().any(|m: &Module| m.name == module.name) {
                        tracing::warn!(path = %path.display(), module = %module.name, "duplicate module name; skipped");
                        continue;
                    }
                    modules.push(module);
                }
                Err(e) => tracing::warn!(error = %e, "skipping module file"),
            }
        }

        tracing::info!("Loaded {} modules", modules.len());
        Ok(modules)
    }

    /// 加载并写入仓库，返回写入数量
    pub async fn load_into(&self, repo: &dyn ModuleRepository) -> anyhow::Result<usize> {
        let modules = self.load_all()?;
        let count = modules.len();
        for module in modules {
            repo.save(module).await?;
        }
        Ok(count)
    }
}

pub fn load_module_file(path: &Path) -> Result<Module, ModuleError> {
    let load_err = |message: String| ModuleError::Load {
        path: path.display().to_string(),
        message,
    };
    let text = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
    let file: ModuleFile = toml::from_str(&text).map_err(|e| load_err(e.to_string()))?;
    let entry = file.module;

    let script = match (&entry.script, &entry.script_file) {
        (Some(_), Some(_)) => {
            return Err(load_err("both 'script' and 'script_file' are set".into()))
        }
        (Some(s), None) => Some(s.clone()),
        (None, Some(rel)) => {
            let base = path.parent().unwrap_or_else(|| Path::new("."));
            Some(std::fs::read_to_string(base.join(rel)).map_err(|e| load_err(e.to_string()))?)
        }
        (None, None) => None,
    };

    let mut module = match script {
        Some(script) => Module::new_scripted(&entry.name, script, entry.content)?,
        None => Module::new_static(&entry.name, entry.content)?,
    }
    .with_context(entry.execution_context)
    .with_priority(entry.priority);
    module.trigger = entry.trigger;
    module.description = entry.description;
    module.active = entry.active;
    Ok(module)
}
