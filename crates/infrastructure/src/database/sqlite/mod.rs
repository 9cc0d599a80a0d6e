pub mod sqlite_job_store;
pub mod sqlite_node_directory;
pub mod sqlite_task_repository;

pub use sqlite_job_store::SqliteJobStore;
pub use sqlite_node_directory::SqliteNodeDirectory;
pub use sqlite_task_repository::SqliteTaskRepository;

/// 把搜索词转换为以 `\` 转义的 LIKE 模式，空白输入视为不过滤
pub(crate) fn like_pattern(search: Option<&str>) -> Option<String> {
    let term = search.map(str::trim).filter(|t| !t.is_empty())?;
    let mut escaped = String::with_capacity(term.len() + 2);
    escaped.push('%');
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped.push('%');
    Some(escaped)
}
