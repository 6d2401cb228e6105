//! 沙箱策略钩子
//!
//! 解释器在三个位置询问策略：属性访问、迭代、导入。任一钩子返回 Err 即以运行期错误终止当前语句。

/// 允许脚本导入的标准库子集
pub const ALLOWED_MODULES: &[&str] = &["datetime", "time", "math", "json", "re", "uuid", "random"];

/// 可被 for 循环遍历的类型
const ITERABLE_KINDS: &[&str] = &["list", "str", "dict"];

pub trait SandboxPolicy: Send + Sync {
    /// `owner.attr` 访问前调用；owner 为值的类型名
    fn check_attribute(&self, owner: &str, attr: &str) -> Result<(), String>;

    /// 每一轮循环调用一次；kind 为被遍历对象的类型名，while 循环为 "while"
    fn check_iteration(&self, kind: &str, consumed: u64) -> Result<(), String>;

    fn check_import(&self, module: &str) -> Result<(), String>;
}

/// 默认策略：禁止下划线属性、限制循环总次数、只允许白名单模块
#[derive(Debug, Clone)]
pub struct RestrictedPolicy {
    pub max_loop_iterations: u64,
}

impl RestrictedPolicy {
    pub fn new(max_loop_iterations: u64) -> Self {
        Self {
            max_loop_iterations,
        }
    }
}

impl Default for RestrictedPolicy {
    fn default() -> Self {
        Self::new(100_000)
    }
}

impl SandboxPolicy for RestrictedPolicy {
    fn check_attribute(&self, owner: &str, attr: &str) -> Result<(), String> {
        if attr.starts_with('_') {
            return Err(format!(
                "access to attribute '{attr}' of '{owner}' is not allowed"
            ));
        }
        Ok(())
    }

    fn check_iteration(&self, kind: &str, consumed: u64) -> Result<(), String> {
        if kind != "while" && !ITERABLE_KINDS.contains(&kind) {
            return Err(format!("'{kind}' object is not iterable"));
        }
        if consumed > self.max_loop_iterations {
            return Err(format!(
                "loop iteration budget of {} exceeded",
                self.max_loop_iterations
            ));
        }
        Ok(())
    }

    fn check_import(&self, module: &str) -> Result<(), String> {
        if ALLOWED_MODULES.contains(&module) {
            Ok(())
        } else {
            Err(format!("import of module '{module}' is not allowed"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_underscore_attributes_blocked() {
        let policy = RestrictedPolicy::default();
        assert!(policy.check_attribute("str", "__class__").is_err());
        assert!(policy.check_attribute("ctx", "_host").is_err());
        assert!(policy.check_attribute("str", "upper").is_ok());
    }

    #[test]
    fn test_import_allow_list() {
        let policy = RestrictedPolicy::default();
        assert!(policy.check_import("math").is_ok());
        assert!(policy.check_import("os").is_err());
        assert!(policy.check_import("subprocess").is_err());
    }

    #[test]
    fn test_iteration_budget() {
        let policy = RestrictedPolicy::new(10);
        assert!(policy.check_iteration("list", 10).is_ok());
        assert!(policy.check_iteration("while", 11).is_err());
        assert!(policy.check_iteration("int", 1).is_err());
    }
}
