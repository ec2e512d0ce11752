use serde::{Deserialize, Serialize};

/// 实例的地理位置，三级结构：大区 / 可用区 / 园区
///
/// 空字符串表示该级未知。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    #[serde(default)]
    pub region: String,
    #[serde(default)]
    pub zone: String,
    #[serde(default)]
    pub campus: String,
}

impl Location {
    pub fn new(
        region: impl Into<String>,
        zone: impl Into<String>,
        campus: impl Into<String>,
    ) -> Self {
        Self {
            region: region.into(),
            zone: zone.into(),
            campus: campus.into(),
        }
    }

    /// 三级全部未知时为空
    pub fn is_empty(&self) -> bool {
        self.region.is_empty() && self.zone.is_empty() && self.campus.is_empty()
    }

    /// 逐级求交集：取值相同的级别保留，不同的清空
    ///
    /// 批量恢复上报用它归纳一组异常实例的共同位置。
    pub fn intersection(&self, other: &Location) -> Location {
        let pick = |a: &str, b: &str| {
            if a == b {
                a.to_string()
            } else {
                String::new()
            }
        };
        Location {
            region: pick(&self.region, &other.region),
            zone: pick(&self.zone, &other.zone),
            campus: pick(&self.campus, &other.campus),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_intersection_keeps_common_levels() {
        let a = Location::new("south", "zone-1", "campus-a");
        let b = Location::new("south", "zone-1", "campus-b");
        let joined = a.intersection(&b);
        assert_eq!(joined, Location::new("south", "zone-1", ""));
        assert!(!joined.is_empty());
    }

    #[test]
    fn test_intersection_of_disjoint_locations_is_empty() {
        let a = Location::new("south", "zone-1", "campus-a");
        let b = Location::new("north", "zone-9", "campus-x");
        assert!(a.intersection(&b).is_empty());
    }

    #[test]
    fn test_default_is_empty() {
        assert!(Location::default().is_empty());
    }
}
