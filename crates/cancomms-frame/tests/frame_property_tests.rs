//! CanMessage 的属性测试
//!
//! 使用 proptest 验证标志位构造与原始 ID 往返。

use cancomms_frame::{CAN_EFF_MASK, CAN_ERR_FLAG, CanMessage};
use proptest::prelude::*;

proptest! {
    /// 语义构造器的分类结果与输入标志一致
    #[test]
    fn flags_match_constructor(
        is_extended in any::<bool>(),
        is_remote in any::<bool>(),
        id in 0u32..=CAN_EFF_MASK,
        payload in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        let message = CanMessage::new(is_extended, is_remote, id, &payload);
        prop_assert_eq!(message.is_extended_id(), is_extended);
        prop_assert_eq!(message.is_standard_id(), !is_extended);
        prop_assert_eq!(message.is_remote_transmission_request(), is_remote);
        prop_assert_eq!(message.id(), id & CAN_EFF_MASK);
        prop_assert!(message.is_data_frame());
        prop_assert_eq!(message.payload(), payload.as_slice());
    }

    /// id() 总是去除高 3 位，与 id 参数中是否带标志无关
    #[test]
    fn id_strips_flag_bits(
        is_extended in any::<bool>(),
        is_remote in any::<bool>(),
        id in any::<u32>(),
    ) {
        let message = CanMessage::new(is_extended, is_remote, id, &[]);
        prop_assert_eq!(message.id(), id & CAN_EFF_MASK);
    }

    /// 原始 ID + 数据往返不变
    #[test]
    fn raw_roundtrip(
        raw_id in any::<u32>(),
        payload in proptest::collection::vec(any::<u8>(), 0..=8),
    ) {
        let message = CanMessage::from_raw(raw_id, &payload);
        prop_assert_eq!(message.raw_id(), raw_id);
        prop_assert_eq!(message.payload(), payload.as_slice());
        prop_assert_eq!(message.is_error_frame(), raw_id & CAN_ERR_FLAG != 0);
        prop_assert_eq!(message.error_class().is_some(), message.is_error_frame());
    }
}
