use std::path::PathBuf;

use crate::errors::{FleetError, FleetResult};

const FORBIDDEN_PATH_CHARS: &[char] = &[
    ';', '&', '|', '>', '<', '`', '$', '(', ')', '{', '}', '[', ']', '!', '#',
];

/// 验证必填字段非空
pub fn not_blank(field: &str, value: &str) -> FleetResult<()> {
    if value.trim().is_empty() {
        return Err(FleetError::validation(format!("{field} 不能为空")));
    }
    Ok(())
}

/// 节点名称会出现在URL路径和SSE事件名中，只允许字母、数字和 `._-`
pub fn node_name(name: &str) -> FleetResult<()> {
    not_blank("name", name)?;
    if let Some(c) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-')))
    {
        return Err(FleetError::validation(format!(
            "节点名称包含非法字符: {c:?}"
        )));
    }
    Ok(())
}

/// 清洗部署源路径
///
/// 路径最终会作为参数传给构建子进程，因此只接受指向已存在的
/// `.cfg` 文件的纯ASCII路径，并转换为绝对路径。
pub fn sanitize_path(raw: &str) -> FleetResult<PathBuf> {
    if raw.trim().is_empty() {
        return Err(FleetError::validation("路径不能为空"));
    }

    let decoded = urlencoding::decode(raw)
        .map_err(|e| FleetError::validation(format!("路径解码失败: {e}")))?;
    let decoded = decoded.trim();

    if decoded.starts_with("\\\\") {
        return Err(FleetError::validation("不允许使用UNC路径"));
    }

    if decoded.contains("..") {
        return Err(FleetError::validation("路径中不允许包含 .."));
    }

    if let Some(c) = decoded.chars().find(|c| FORBIDDEN_PATH_CHARS.contains(c)) {
        return Err(FleetError::validation(format!("路径包含非法字符: {c}")));
    }

    if !decoded.is_ascii() {
        return Err(FleetError::validation("路径只能包含ASCII字符"));
    }

    let path = PathBuf::from(decoded);
    if path.extension().and_then(|ext| ext.to_str()) != Some("cfg") {
        return Err(FleetError::validation("路径必须指向 .cfg 文件"));
    }

    if !path.exists() {
        return Err(FleetError::validation(format!(
            "路径不存在: {}",
            path.display()
        )));
    }

    path.canonicalize()
        .map_err(|e| FleetError::validation(format!("无法解析绝对路径: {e}")))
}
