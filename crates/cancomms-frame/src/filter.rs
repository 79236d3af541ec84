//! 内核接收过滤器

/// CAN 接收过滤器（mask, pattern）
///
/// 打开传输层时一次性交给内核（`CAN_RAW_FILTER`），之后不再变化。
/// 当 `raw_id & mask == pattern & mask` 时帧被接收。
///
/// # 示例
///
/// ```rust
/// use cancomms_frame::CanFilter;
///
/// // 只接收标准帧 0x200
/// let filter = CanFilter::new(0x7FF, 0x200);
/// assert!(filter.matches(0x200));
/// assert!(!filter.matches(0x201));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFilter {
    mask: u32,
    pattern: u32,
}

impl CanFilter {
    pub const fn new(mask: u32, pattern: u32) -> Self {
        Self { mask, pattern }
    }

    /// 接收所有帧的过滤器
    pub const fn accept_all() -> Self {
        Self::new(0, 0)
    }

    pub const fn mask(&self) -> u32 {
        self.mask
    }

    pub const fn pattern(&self) -> u32 {
        self.pattern
    }

    /// 与内核 `can_rcv_filter` 的匹配规则相同
    pub const fn matches(&self, raw_id: u32) -> bool {
        (raw_id & self.mask) == (self.pattern & self.mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{CAN_EFF_FLAG, CAN_EFF_MASK};

    #[test]
    fn test_accept_all_matches_everything() {
        let filter = CanFilter::accept_all();
        assert!(filter.matches(0));
        assert!(filter.matches(0x7FF));
        assert!(filter.matches(CAN_EFF_FLAG | 0x1234_5678));
    }

    #[test]
    fn test_extended_filter_requires_flag() {
        let mask = CAN_EFF_FLAG | CAN_EFF_MASK;
        let filter = CanFilter::new(mask, CAN_EFF_FLAG | 0x0001_0000);
        assert!(filter.matches(CAN_EFF_FLAG | 0x0001_0000));
        // 同样的 ID 但是标准帧
        assert!(!filter.matches(0x0001_0000));
    }

    #[test]
    fn test_getters() {
        let filter = CanFilter::new(0x700, 0x200);
        assert_eq!(filter.mask(), 0x700);
        assert_eq!(filter.pattern(), 0x200);
        // 掩码之外的位不参与比较
        assert!(filter.matches(0x2FF));
    }
}
