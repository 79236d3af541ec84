//! ListenerRegistry 的属性测试
//!
//! 任意 add / remove / clear 序列之后，注册表的内容与一个朴素 Vec 模型一致。

use cancomms_can::CanMessage;
use cancomms_driver::{CanMessageListener, ListenerRegistry, ListenerResult};
use proptest::prelude::*;
use std::sync::Arc;

#[allow(dead_code)]
struct Tagged(usize);

impl CanMessageListener for Tagged {
    fn on_message(&self, _message: &CanMessage) -> ListenerResult {
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Add(usize),
    Remove(usize),
    Clear,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..4).prop_map(Op::Add),
        3 => (0usize..4).prop_map(Op::Remove),
        1 => Just(Op::Clear),
    ]
}

proptest! {
    #[test]
    fn registry_matches_vec_model(ops in proptest::collection::vec(op(), 0..64)) {
        let pool: Vec<Arc<dyn CanMessageListener>> =
            (0..4).map(|i| Arc::new(Tagged(i)) as Arc<dyn CanMessageListener>).collect();
        let registry: ListenerRegistry<dyn CanMessageListener> = ListenerRegistry::new();
        let mut model: Vec<usize> = Vec::new();

        for op in ops {
            match op {
                Op::Add(i) => {
                    registry.add(pool[i].clone());
                    model.push(i);
                },
                Op::Remove(i) => {
                    let expected = match model.iter().position(|&m| m == i) {
                        Some(pos) => {
                            model.remove(pos);
                            true
                        },
                        None => false,
                    };
                    prop_assert_eq!(registry.remove(&pool[i]), expected);
                },
                Op::Clear => {
                    registry.clear();
                    model.clear();
                },
            }
        }

        let snapshot = registry.snapshot();
        prop_assert_eq!(snapshot.len(), model.len());
        for (entry, &index) in snapshot.iter().zip(model.iter()) {
            prop_assert!(std::ptr::eq(
                Arc::as_ptr(entry) as *const (),
                Arc::as_ptr(&pool[index]) as *const (),
            ));
        }
    }
}
