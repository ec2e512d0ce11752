use std::collections::HashMap;

/// 实例元数据，键值均为字符串
pub type Metadata = HashMap<String, String>;

/// 求两份元数据的交集，仅保留键和值都相同的条目
///
/// 批量恢复上报用它归纳一组异常实例的共同标签。
pub fn metadata_intersection(a: &Metadata, b: &Metadata) -> Metadata {
    a.iter()
        .filter(|(key, value)| b.get(*key) == Some(*value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
