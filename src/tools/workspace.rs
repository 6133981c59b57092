//! 工具共享的仓库根目录与路径校验

use std::path::{Path, PathBuf};

/// 遍历时跳过的目录
pub(crate) const SKIP_DIRS: [&str; 4] = ["target", "node_modules", "dist", "build"];

/// 研究工具可访问的仓库根；所有路径参数都必须落在根目录内
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self {
            root: root.canonicalize().unwrap_or_else(|_| root.to_path_buf()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// 解析相对（或绝对）路径并拒绝越界访问
    pub fn resolve(&self, path: &str) -> Result<PathBuf, String> {
        let p = Path::new(path);
        let absolute = if p.is_absolute() {
            p.to_path_buf()
        } else {
            self.root.join(p)
        };
        // 文件可能不存在，规范化失败时退回拼接路径
        let canonical = absolute.canonicalize().unwrap_or(absolute);

        if !canonical.starts_with(&self.root) || has_parent_component(&canonical) {
            return Err(format!(
                "Access denied: path '{}' is outside the repository root",
                path
            ));
        }
        Ok(canonical)
    }

    /// 相对根目录的展示路径
    pub fn display(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }
}

fn has_parent_component(path: &Path) -> bool {
    path.components()
        .any(|c| matches!(c, std::path::Component::ParentDir))
}

/// 遍历过滤：跳过隐藏目录与构建产物
pub(crate) fn is_visible(entry: &walkdir::DirEntry) -> bool {
    if entry.depth() == 0 {
        return true;
    }
    let name = entry.file_name().to_string_lossy();
    !name.starts_with('.') && !(entry.file_type().is_dir() && SKIP_DIRS.contains(&name.as_ref()))
}

/// 按字符截断，附加省略号
pub(crate) fn truncate_chars(s: &str, max: usize) -> String {
    if s.chars().count() > max {
        format!("{}...", s.chars().take(max).collect::<String>())
    } else {
        s.to_string()
    }
}
